use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Root directory of the filesystem object store.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size_tokens: default_chunk_size(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    512
}
fn default_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichmentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Cap on synthetic sentences appended to a single chunk.
    #[serde(default = "default_max_sentences")]
    pub max_sentences: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_sentences: default_max_sentences(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_sentences() -> usize {
    40
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama, or an OpenAI-compatible endpoint).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-request HTTP timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound for one batch, retries included.
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
            batch_timeout_secs: 120,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_batch_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    /// Pause between files in a batch run.
    #[serde(default = "default_pause_ms")]
    pub pause_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            pause_ms: default_pause_ms(),
        }
    }
}

fn default_pause_ms() -> u64 {
    500
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Config {
    /// Defaults rooted at `./data`, used by tests and tooling that run
    /// without a config file.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/ingest.sqlite"),
            },
            storage: StorageConfig {
                root: PathBuf::from("./data/objects"),
            },
            chunking: ChunkingConfig::default(),
            enrichment: EnrichmentConfig::default(),
            embedding: EmbeddingConfig::default(),
            batch: BatchConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size_tokens == 0 {
            anyhow::bail!("chunking.chunk_size_tokens must be > 0");
        }
        if self.chunking.overlap_tokens >= self.chunking.chunk_size_tokens {
            anyhow::bail!("chunking.overlap_tokens must be smaller than chunking.chunk_size_tokens");
        }

        if self.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
        if self.embedding.is_enabled() {
            if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                );
            }
        }

        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "ollama" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
                other
            ),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> Result<Config> {
        let toml_str = format!(
            "[db]\npath = \"/tmp/x.sqlite\"\n[storage]\nroot = \"/tmp/objects\"\n{}",
            extra
        );
        let config: Config = toml::from_str(&toml_str)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn defaults_apply() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg.chunking.chunk_size_tokens, 512);
        assert_eq!(cfg.chunking.overlap_tokens, 100);
        assert!(!cfg.embedding.is_enabled());
        assert_eq!(cfg.batch.pause_ms, 500);
        assert!(cfg.enrichment.enabled);
    }

    #[test]
    fn overlap_must_be_below_chunk_size() {
        let err = parse("[chunking]\nchunk_size_tokens = 100\noverlap_tokens = 100\n").unwrap_err();
        assert!(err.to_string().contains("overlap_tokens"));
    }

    #[test]
    fn enabled_provider_requires_model_and_dims() {
        assert!(parse("[embedding]\nprovider = \"openai\"\n").is_err());
        assert!(parse("[embedding]\nprovider = \"openai\"\nmodel = \"m\"\n").is_err());
        assert!(parse("[embedding]\nprovider = \"openai\"\nmodel = \"m\"\ndims = 8\n").is_ok());
    }

    #[test]
    fn unknown_provider_rejected() {
        let err = parse("[embedding]\nprovider = \"magic\"\nmodel = \"m\"\ndims = 8\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }
}
