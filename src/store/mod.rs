//! Persistence for file records and chunks.
//!
//! Two traits split the relational store along the pipeline's needs:
//!
//! | Trait | Responsibility |
//! |-------|----------------|
//! | [`FileStore`] | File records and the per-file status machine |
//! | [`ChunkStore`] | Bulk chunk writes, bulk delete by file, read-back |
//!
//! Both are implemented by [`SqliteStore`] and by the in-memory
//! [`MemoryStore`] used in tests. The orchestrator takes them as separate
//! `Arc<dyn ...>` handles so either can be replaced by a test double.
//!
//! # Status transitions
//!
//! ```text
//! pending ──begin_processing──▶ processing ──mark_completed──▶ completed
//!    ▲                              │      ──mark_failed─────▶ failed
//!    └──────reset_to_pending────────┘
//! completed / failed ──begin_processing──▶ processing   (re-submission)
//! ```
//!
//! `begin_processing` is a compare-and-set: it refuses a file that is
//! already `processing`.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{FileRecord, NewChunk, StoredChunk};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Outcome of [`FileStore::begin_processing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyProcessing,
    NotFound,
}

/// Per-status file counts for one project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

impl StatusCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.completed + self.failed
    }
}

/// Chunk and token totals for one project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChunkTotals {
    pub chunks: i64,
    pub tokens: i64,
}

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Insert a newly uploaded file record.
    async fn register(&self, record: &FileRecord) -> Result<()>;

    async fn get(&self, file_id: &str) -> Result<Option<FileRecord>>;

    /// All files of a project, oldest first.
    async fn list_by_project(&self, project_id: &str) -> Result<Vec<FileRecord>>;

    /// Move a file to `processing` unless it already is. Clears
    /// `chunk_count`, `embedded_at`, and `last_error`.
    async fn begin_processing(&self, file_id: &str) -> Result<ClaimOutcome>;

    /// Set `completed` together with `chunk_count` and `embedded_at`.
    ///
    /// Only applies to a file still in `processing`. Returns `false` when
    /// the claim was lost, e.g. to an administrative reset.
    async fn mark_completed(
        &self,
        file_id: &str,
        chunk_count: i64,
        embedded_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Set `failed` and record the error message. Same claim rule as
    /// [`mark_completed`](Self::mark_completed).
    async fn mark_failed(&self, file_id: &str, error: &str) -> Result<bool>;

    /// Administrative reset of a stuck `processing` file back to
    /// `pending`. Returns `false` when the file was not `processing`.
    async fn reset_to_pending(&self, file_id: &str) -> Result<bool>;

    async fn status_counts(&self, project_id: &str) -> Result<StatusCounts>;
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Write all chunks for a file as one unit, replacing any chunks the
    /// file already had. On error nothing is written.
    async fn insert_chunks(&self, file_id: &str, chunks: &[NewChunk]) -> Result<()>;

    /// Remove every chunk of a file. Returns the number removed; a file
    /// without chunks is not an error.
    async fn delete_chunks_for_file(&self, file_id: &str) -> Result<u64>;

    /// Chunks of a file ordered by `chunk_index`.
    async fn chunks_for_file(&self, file_id: &str) -> Result<Vec<StoredChunk>>;

    async fn chunk_totals(&self, project_id: &str) -> Result<ChunkTotals>;
}
