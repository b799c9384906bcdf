//! Core data models used throughout the ingestion pipeline.
//!
//! These types represent the file records, chunks, and per-run results that
//! flow between the extractor, chunker, enricher, embedder, and stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Processing state of an uploaded file.
///
/// `Pending` is set at registration. `Completed` and `Failed` are terminal;
/// a terminal file re-enters `Processing` only through an explicit
/// re-submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingStatus::Pending => "pending",
            EmbeddingStatus::Processing => "processing",
            EmbeddingStatus::Completed => "completed",
            EmbeddingStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EmbeddingStatus::Completed | EmbeddingStatus::Failed)
    }
}

impl fmt::Display for EmbeddingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmbeddingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EmbeddingStatus::Pending),
            "processing" => Ok(EmbeddingStatus::Processing),
            "completed" => Ok(EmbeddingStatus::Completed),
            "failed" => Ok(EmbeddingStatus::Failed),
            other => anyhow::bail!("unknown embedding status: '{}'", other),
        }
    }
}

/// A registered project file and its processing state.
///
/// `chunk_count` and `embedded_at` are only meaningful once the status is
/// `Completed`; `last_error` is only set while the status is `Failed`.
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub id: String,
    pub project_id: String,
    pub storage_path: String,
    pub filename: String,
    pub mime_type: String,
    pub embedding_status: EmbeddingStatus,
    pub chunk_count: i64,
    pub embedded_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    /// Create a freshly registered record in the `pending` state.
    pub fn new_pending(
        id: impl Into<String>,
        project_id: impl Into<String>,
        storage_path: impl Into<String>,
        filename: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            storage_path: storage_path.into(),
            filename: filename.into(),
            mime_type: mime_type.into(),
            embedding_status: EmbeddingStatus::Pending,
            chunk_count: 0,
            embedded_at: None,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    pub fn descriptor(&self) -> FileDescriptor {
        FileDescriptor {
            file_id: self.id.clone(),
            project_id: self.project_id.clone(),
            storage_path: self.storage_path.clone(),
            filename: self.filename.clone(),
            mime_type: self.mime_type.clone(),
        }
    }
}

/// Everything a caller provides to run the pipeline for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub file_id: String,
    pub project_id: String,
    pub storage_path: String,
    pub filename: String,
    pub mime_type: String,
}

/// What the enrichment stage added to a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChunkEnrichment {
    /// Nothing was added; the embedded text is the chunk text.
    Plain,
    /// Synthetic sentences describing a detected table were appended.
    Table {
        table_name: String,
        row_count: usize,
        synthetic_sentences: usize,
    },
    /// Structure was described at extraction time (XML sources).
    Structured {
        tables: Vec<String>,
        synthetic_sentences: usize,
    },
}

impl ChunkEnrichment {
    pub fn has_table(&self) -> bool {
        match self {
            ChunkEnrichment::Plain => false,
            ChunkEnrichment::Table { .. } => true,
            ChunkEnrichment::Structured { tables, .. } => !tables.is_empty(),
        }
    }
}

/// Metadata persisted alongside each chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub enrichment: ChunkEnrichment,
    /// Text before enrichment; `None` when enrichment added nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
    /// Name of the enricher that produced the text, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enriched_by: Option<String>,
}

impl ChunkMetadata {
    pub fn plain() -> Self {
        Self {
            enrichment: ChunkEnrichment::Plain,
            original_text: None,
            enriched_by: None,
        }
    }
}

/// A chunk ready to be written by the chunk store.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub id: String,
    pub project_id: String,
    pub file_id: String,
    pub chunk_index: i64,
    pub chunk_text: String,
    pub embedding: Vec<f32>,
    pub source_file: String,
    pub page_number: Option<u32>,
    pub section_title: Option<String>,
    pub token_count: i64,
    pub hash: String,
    pub metadata: ChunkMetadata,
}

/// A chunk as read back from a chunk store.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub id: String,
    pub project_id: String,
    pub file_id: String,
    pub chunk_index: i64,
    pub chunk_text: String,
    pub embedding: Vec<f32>,
    pub source_file: String,
    pub page_number: Option<u32>,
    pub section_title: Option<String>,
    pub token_count: i64,
    pub metadata: ChunkMetadata,
}

/// Outcome of a single-file pipeline run. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub success: bool,
    pub file_id: String,
    pub chunk_count: usize,
    pub total_tokens: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessingResult {
    pub fn success(
        file_id: &str,
        chunk_count: usize,
        total_tokens: usize,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            success: true,
            file_id: file_id.to_string(),
            chunk_count,
            total_tokens,
            warnings,
            error: None,
        }
    }

    pub fn failure(file_id: &str, error: impl Into<String>, warnings: Vec<String>) -> Self {
        Self {
            success: false,
            file_id: file_id.to_string(),
            chunk_count: 0,
            total_tokens: 0,
            warnings,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_its_own_names() {
        for status in [
            EmbeddingStatus::Pending,
            EmbeddingStatus::Processing,
            EmbeddingStatus::Completed,
            EmbeddingStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<EmbeddingStatus>().unwrap(), status);
        }
        assert!("done".parse::<EmbeddingStatus>().is_err());
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(EmbeddingStatus::Completed.is_terminal());
        assert!(EmbeddingStatus::Failed.is_terminal());
        assert!(!EmbeddingStatus::Pending.is_terminal());
        assert!(!EmbeddingStatus::Processing.is_terminal());
    }

    #[test]
    fn metadata_json_is_tagged_by_kind() {
        let meta = ChunkMetadata {
            enrichment: ChunkEnrichment::Table {
                table_name: "Emissions".to_string(),
                row_count: 3,
                synthetic_sentences: 6,
            },
            original_text: Some("a | b".to_string()),
            enriched_by: Some("table-heuristic".to_string()),
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["enrichment"]["kind"], "table");
        assert_eq!(json["enrichment"]["table_name"], "Emissions");

        let plain = serde_json::to_value(ChunkMetadata::plain()).unwrap();
        assert!(plain.get("original_text").is_none());
        assert!(!ChunkMetadata::plain().enrichment.has_table());
    }

    #[test]
    fn failure_result_has_no_counts() {
        let r = ProcessingResult::failure("f1", "boom", vec![]);
        assert!(!r.success);
        assert_eq!(r.chunk_count, 0);
        assert_eq!(r.error.as_deref(), Some("boom"));
    }
}
