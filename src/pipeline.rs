//! Pipeline orchestrator and reprocessor.
//!
//! Runs one file through the stages
//!
//! ```text
//! object store → extract → chunk → enrich → embed → chunk store
//! ```
//!
//! and owns every status transition of that file. Errors never escape:
//! [`Pipeline::process`] and [`Pipeline::reprocess`] always return a
//! [`ProcessingResult`], and the file record is left `completed` or
//! `failed` on every path after a successful claim, unless `files reset`
//! took the claim away mid-run; then the stale run touches nothing.
//!
//! | Stage | Fatal? |
//! |-------|--------|
//! | Reading bytes, extraction, empty document | yes |
//! | Enrichment of a single chunk | no, falls back to the raw text |
//! | Embedding (any batch), chunk insert | yes, nothing is written |
//!
//! A run only starts after [`FileStore::begin_processing`] claims the file,
//! so two concurrent runs for the same file id cannot interleave; the
//! loser gets a failure result and the record is not touched.

use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::chunk::Chunker;
use crate::config::Config;
use crate::db;
use crate::embedder::Embedder;
use crate::embedding::EmbeddingService;
use crate::enrich::{enrich_chunks, Enricher, TableEnricher};
use crate::error::{PipelineError, Result};
use crate::extract::{self, ExtractedDocument};
use crate::models::{FileDescriptor, NewChunk, ProcessingResult};
use crate::object_store::{FsObjectStore, ObjectStore};
use crate::progress::{PipelineStep, ProgressReporter};
use crate::store::{ChunkStore, ClaimOutcome, FileStore, SqliteStore};

pub struct Pipeline {
    files: Arc<dyn FileStore>,
    chunks: Arc<dyn ChunkStore>,
    objects: Arc<dyn ObjectStore>,
    embedder: Embedder,
    chunker: Chunker,
    enricher: Option<Arc<dyn Enricher>>,
}

/// Counts produced by a successful run.
struct RunOutput {
    chunk_count: usize,
    total_tokens: usize,
}

impl Pipeline {
    /// A pipeline without an enricher. Add one with
    /// [`with_enricher`](Self::with_enricher).
    pub fn new(
        files: Arc<dyn FileStore>,
        chunks: Arc<dyn ChunkStore>,
        objects: Arc<dyn ObjectStore>,
        embedder: Embedder,
        chunker: Chunker,
    ) -> Self {
        Self {
            files,
            chunks,
            objects,
            embedder,
            chunker,
            enricher: None,
        }
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    /// Wire a pipeline from configuration: chunk sizes, batch settings,
    /// and the table enricher when `enrichment.enabled`.
    pub fn from_config(
        config: &Config,
        files: Arc<dyn FileStore>,
        chunks: Arc<dyn ChunkStore>,
        objects: Arc<dyn ObjectStore>,
        service: Arc<dyn EmbeddingService>,
    ) -> Self {
        let pipeline = Self::new(
            files,
            chunks,
            objects,
            Embedder::from_config(service, &config.embedding),
            Chunker::from_config(&config.chunking),
        );
        if config.enrichment.enabled {
            pipeline.with_enricher(Arc::new(TableEnricher::from_config(&config.enrichment)))
        } else {
            pipeline
        }
    }

    pub fn file_store(&self) -> &Arc<dyn FileStore> {
        &self.files
    }

    /// Look up a registered file and process it.
    pub async fn process_by_id(
        &self,
        file_id: &str,
        progress: Option<&dyn ProgressReporter>,
    ) -> ProcessingResult {
        match self.descriptor(file_id).await {
            Ok(desc) => self.process(&desc, progress).await,
            Err(e) => ProcessingResult::failure(file_id, e.to_string(), Vec::new()),
        }
    }

    /// Look up a registered file and reprocess it.
    pub async fn reprocess_by_id(
        &self,
        file_id: &str,
        progress: Option<&dyn ProgressReporter>,
    ) -> ProcessingResult {
        match self.descriptor(file_id).await {
            Ok(desc) => self.reprocess(&desc, progress).await,
            Err(e) => ProcessingResult::failure(file_id, e.to_string(), Vec::new()),
        }
    }

    async fn descriptor(&self, file_id: &str) -> Result<FileDescriptor> {
        self.files
            .get(file_id)
            .await
            .map_err(PipelineError::Store)?
            .map(|record| record.descriptor())
            .ok_or_else(|| PipelineError::FileNotFound(file_id.to_string()))
    }

    /// Run the full pipeline for one file.
    pub async fn process(
        &self,
        desc: &FileDescriptor,
        progress: Option<&dyn ProgressReporter>,
    ) -> ProcessingResult {
        if let Err(e) = self.claim(&desc.file_id).await {
            return self.rejected(desc, e);
        }
        self.run_claimed(desc, progress).await
    }

    /// Delete the file's existing chunks, then run it again from scratch.
    ///
    /// The file is claimed first, so deletion cannot race an in-flight run.
    /// A file with no chunks is fine.
    pub async fn reprocess(
        &self,
        desc: &FileDescriptor,
        progress: Option<&dyn ProgressReporter>,
    ) -> ProcessingResult {
        if let Err(e) = self.claim(&desc.file_id).await {
            return self.rejected(desc, e);
        }

        match self.chunks.delete_chunks_for_file(&desc.file_id).await {
            Ok(removed) => {
                info!(file_id = %desc.file_id, removed, "cleared chunks for reprocessing");
            }
            Err(e) => {
                let err = PipelineError::Store(e);
                return self.fail(desc, err, Vec::new()).await;
            }
        }

        self.run_claimed(desc, progress).await
    }

    async fn claim(&self, file_id: &str) -> Result<()> {
        match self
            .files
            .begin_processing(file_id)
            .await
            .map_err(PipelineError::Store)?
        {
            ClaimOutcome::Claimed => Ok(()),
            ClaimOutcome::AlreadyProcessing => {
                Err(PipelineError::AlreadyProcessing(file_id.to_string()))
            }
            ClaimOutcome::NotFound => Err(PipelineError::FileNotFound(file_id.to_string())),
        }
    }

    /// The file was never claimed; its record belongs to someone else (or
    /// does not exist), so report without touching it.
    fn rejected(&self, desc: &FileDescriptor, err: PipelineError) -> ProcessingResult {
        warn!(file_id = %desc.file_id, error = %err, "pipeline run rejected");
        ProcessingResult::failure(&desc.file_id, err.to_string(), Vec::new())
    }

    async fn run_claimed(
        &self,
        desc: &FileDescriptor,
        progress: Option<&dyn ProgressReporter>,
    ) -> ProcessingResult {
        info!(
            file_id = %desc.file_id,
            project_id = %desc.project_id,
            filename = %desc.filename,
            "processing file"
        );

        let mut warnings = Vec::new();
        let output = match self.run(desc, progress, &mut warnings).await {
            Ok(output) => output,
            Err(e) => return self.fail(desc, e, warnings).await,
        };

        match self
            .files
            .mark_completed(&desc.file_id, output.chunk_count as i64, Utc::now())
            .await
        {
            Ok(true) => {}
            Ok(false) => return self.claim_lost(desc, warnings),
            Err(e) => return self.fail(desc, PipelineError::Store(e), warnings).await,
        }

        report(progress, PipelineStep::Done, 1.0);
        info!(
            file_id = %desc.file_id,
            chunks = output.chunk_count,
            tokens = output.total_tokens,
            warnings = warnings.len(),
            "file completed"
        );
        ProcessingResult::success(&desc.file_id, output.chunk_count, output.total_tokens, warnings)
    }

    /// Record a failed run. A `failed` file keeps no chunks, including ones
    /// left over from an earlier successful run.
    async fn fail(
        &self,
        desc: &FileDescriptor,
        err: PipelineError,
        warnings: Vec<String>,
    ) -> ProcessingResult {
        let message = err.to_string();
        warn!(file_id = %desc.file_id, error = %message, "file failed");
        match self.files.mark_failed(&desc.file_id, &message).await {
            Ok(true) => {
                if let Err(e) = self.chunks.delete_chunks_for_file(&desc.file_id).await {
                    error!(file_id = %desc.file_id, error = %e, "failed to remove chunks of failed file");
                }
            }
            Ok(false) => return self.claim_lost(desc, warnings),
            Err(e) => {
                error!(file_id = %desc.file_id, error = %e, "failed to record failure status");
            }
        }
        ProcessingResult::failure(&desc.file_id, message, warnings)
    }

    /// The file left `processing` under this run (an administrative reset,
    /// possibly followed by a new claim). Its record and chunks now belong
    /// to someone else, so leave both alone.
    fn claim_lost(&self, desc: &FileDescriptor, warnings: Vec<String>) -> ProcessingResult {
        let err = PipelineError::ClaimLost(desc.file_id.clone());
        warn!(file_id = %desc.file_id, error = %err, "pipeline run lost its claim");
        ProcessingResult::failure(&desc.file_id, err.to_string(), warnings)
    }

    async fn run(
        &self,
        desc: &FileDescriptor,
        progress: Option<&dyn ProgressReporter>,
        warnings: &mut Vec<String>,
    ) -> Result<RunOutput> {
        report(progress, PipelineStep::Extracting, 0.0);
        let doc = self.extract(desc).await?;
        warnings.extend(doc.warnings.iter().cloned());
        debug!(
            file_id = %desc.file_id,
            segments = doc.segments.len(),
            estimated_tokens = doc.estimated_tokens,
            "extracted"
        );

        report(progress, PipelineStep::Chunking, 0.0);
        let chunks = self.chunker.chunk(&doc.segments);
        if chunks.is_empty() {
            return Err(PipelineError::EmptyDocument);
        }

        report(progress, PipelineStep::Enriching, 0.0);
        let enriched = enrich_chunks(self.enricher.as_deref(), &desc.file_id, &doc, &chunks).await;

        report(progress, PipelineStep::Embedding, 0.0);
        let texts: Vec<String> = enriched.iter().map(|e| e.text.clone()).collect();
        let on_batch = |done: usize, total: usize| {
            report(progress, PipelineStep::Embedding, done as f32 / total as f32);
        };
        let vectors = self.embedder.embed_all(&texts, &on_batch).await?;

        report(progress, PipelineStep::Storing, 0.0);
        let rows: Vec<NewChunk> = chunks
            .iter()
            .zip(enriched)
            .zip(vectors)
            .map(|((chunk, enriched), embedding)| NewChunk {
                id: uuid::Uuid::new_v4().to_string(),
                project_id: desc.project_id.clone(),
                file_id: desc.file_id.clone(),
                chunk_index: chunk.chunk_index as i64,
                hash: content_hash(&enriched.text),
                chunk_text: enriched.text,
                embedding,
                source_file: desc.filename.clone(),
                page_number: chunk.page_number,
                section_title: chunk.section_title.clone(),
                token_count: chunk.token_count as i64,
                metadata: enriched.metadata,
            })
            .collect();

        self.chunks
            .insert_chunks(&desc.file_id, &rows)
            .await
            .map_err(PipelineError::Store)?;

        Ok(RunOutput {
            chunk_count: rows.len(),
            total_tokens: chunks.iter().map(|c| c.token_count).sum(),
        })
    }

    async fn extract(&self, desc: &FileDescriptor) -> Result<ExtractedDocument> {
        let bytes = self
            .objects
            .get_bytes(&desc.storage_path)
            .await
            .map_err(PipelineError::Storage)?;

        // PDF parsing is CPU-bound.
        let filename = desc.filename.clone();
        let mime_type = desc.mime_type.clone();
        let doc = tokio::task::spawn_blocking(move || extract::extract(&bytes, &filename, &mime_type))
            .await
            .map_err(|e| PipelineError::ExtractionAborted(e.to_string()))??;
        Ok(doc)
    }
}

/// Open the database and object store named in the config and wire a
/// pipeline over them. The caller closes the returned pool.
pub async fn open_pipeline(config: &Config) -> anyhow::Result<(Pipeline, sqlx::SqlitePool)> {
    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteStore::new(pool.clone()));
    let objects = Arc::new(FsObjectStore::new(&config.storage.root));
    let service = crate::embedding::create_service(&config.embedding)?;
    let pipeline = Pipeline::from_config(config, store.clone(), store, objects, service);
    Ok((pipeline, pool))
}

/// `ingest process <file-id>` / `ingest reprocess <file-id>`
pub async fn run_single(
    config: &Config,
    file_id: &str,
    reprocess: bool,
    progress: &dyn ProgressReporter,
    json: bool,
) -> anyhow::Result<()> {
    let (pipeline, pool) = open_pipeline(config).await?;
    let result = if reprocess {
        pipeline.reprocess_by_id(file_id, Some(progress)).await
    } else {
        pipeline.process_by_id(file_id, Some(progress)).await
    };
    pool.close().await;

    print_result(&result, json)?;
    if !result.success {
        anyhow::bail!(
            "processing failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

pub fn print_result(result: &ProcessingResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(result)?);
        return Ok(());
    }
    if result.success {
        println!(
            "ok      {}  {} chunks, {} tokens",
            result.file_id, result.chunk_count, result.total_tokens
        );
    } else {
        println!(
            "FAILED  {}  {}",
            result.file_id,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    for w in &result.warnings {
        println!("        warning: {}", w);
    }
    Ok(())
}

fn report(progress: Option<&dyn ProgressReporter>, step: PipelineStep, fraction: f32) {
    if let Some(p) = progress {
        p.report(step, fraction);
    }
}

/// SHA-256 of the embedded text, hex encoded.
fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
