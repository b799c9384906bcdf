//! In-memory [`FileStore`] + [`ChunkStore`] for tests and embedding in
//! other programs.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Every operation
//! takes its lock once, so chunk replacement is atomic to readers.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{EmbeddingStatus, FileRecord, NewChunk, StoredChunk};

use super::{ChunkStore, ChunkTotals, ClaimOutcome, FileStore, StatusCounts};

#[derive(Default)]
pub struct MemoryStore {
    files: RwLock<HashMap<String, FileRecord>>,
    chunks: RwLock<Vec<StoredChunk>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow::anyhow!("memory store lock poisoned")
}

impl MemoryStore {
    /// Apply `f` if the file is still `processing`; `false` otherwise.
    fn update_claimed<F>(&self, file_id: &str, f: F) -> Result<bool>
    where
        F: FnOnce(&mut FileRecord),
    {
        let mut files = self.files.write().map_err(poisoned)?;
        match files.get_mut(file_id) {
            Some(record) if record.embedding_status == EmbeddingStatus::Processing => {
                f(record);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => bail!("file not found: {}", file_id),
        }
    }
}

#[async_trait]
impl FileStore for MemoryStore {
    async fn register(&self, record: &FileRecord) -> Result<()> {
        let mut files = self.files.write().map_err(poisoned)?;
        if files.contains_key(&record.id) {
            bail!("file already registered: {}", record.id);
        }
        files.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, file_id: &str) -> Result<Option<FileRecord>> {
        let files = self.files.read().map_err(poisoned)?;
        Ok(files.get(file_id).cloned())
    }

    async fn list_by_project(&self, project_id: &str) -> Result<Vec<FileRecord>> {
        let files = self.files.read().map_err(poisoned)?;
        let mut out: Vec<FileRecord> = files
            .values()
            .filter(|f| f.project_id == project_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn begin_processing(&self, file_id: &str) -> Result<ClaimOutcome> {
        let mut files = self.files.write().map_err(poisoned)?;
        let Some(record) = files.get_mut(file_id) else {
            return Ok(ClaimOutcome::NotFound);
        };
        if record.embedding_status == EmbeddingStatus::Processing {
            return Ok(ClaimOutcome::AlreadyProcessing);
        }
        record.embedding_status = EmbeddingStatus::Processing;
        record.chunk_count = 0;
        record.embedded_at = None;
        record.last_error = None;
        Ok(ClaimOutcome::Claimed)
    }

    async fn mark_completed(
        &self,
        file_id: &str,
        chunk_count: i64,
        embedded_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.update_claimed(file_id, |r| {
            r.embedding_status = EmbeddingStatus::Completed;
            r.chunk_count = chunk_count;
            r.embedded_at = Some(embedded_at);
            r.last_error = None;
        })
    }

    async fn mark_failed(&self, file_id: &str, error: &str) -> Result<bool> {
        self.update_claimed(file_id, |r| {
            r.embedding_status = EmbeddingStatus::Failed;
            r.chunk_count = 0;
            r.embedded_at = None;
            r.last_error = Some(error.to_string());
        })
    }

    async fn reset_to_pending(&self, file_id: &str) -> Result<bool> {
        let mut files = self.files.write().map_err(poisoned)?;
        match files.get_mut(file_id) {
            Some(r) if r.embedding_status == EmbeddingStatus::Processing => {
                r.embedding_status = EmbeddingStatus::Pending;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => bail!("file not found: {}", file_id),
        }
    }

    async fn status_counts(&self, project_id: &str) -> Result<StatusCounts> {
        let files = self.files.read().map_err(poisoned)?;
        let mut counts = StatusCounts::default();
        for f in files.values().filter(|f| f.project_id == project_id) {
            match f.embedding_status {
                EmbeddingStatus::Pending => counts.pending += 1,
                EmbeddingStatus::Processing => counts.processing += 1,
                EmbeddingStatus::Completed => counts.completed += 1,
                EmbeddingStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn insert_chunks(&self, file_id: &str, chunks: &[NewChunk]) -> Result<()> {
        if let Some(c) = chunks.iter().find(|c| c.file_id != file_id) {
            bail!("chunk {} belongs to file {}, not {}", c.id, c.file_id, file_id);
        }
        let mut stored = self.chunks.write().map_err(poisoned)?;
        stored.retain(|c| c.file_id != file_id);
        stored.extend(chunks.iter().map(|c| StoredChunk {
            id: c.id.clone(),
            project_id: c.project_id.clone(),
            file_id: c.file_id.clone(),
            chunk_index: c.chunk_index,
            chunk_text: c.chunk_text.clone(),
            embedding: c.embedding.clone(),
            source_file: c.source_file.clone(),
            page_number: c.page_number,
            section_title: c.section_title.clone(),
            token_count: c.token_count,
            metadata: c.metadata.clone(),
        }));
        Ok(())
    }

    async fn delete_chunks_for_file(&self, file_id: &str) -> Result<u64> {
        let mut stored = self.chunks.write().map_err(poisoned)?;
        let before = stored.len();
        stored.retain(|c| c.file_id != file_id);
        Ok((before - stored.len()) as u64)
    }

    async fn chunks_for_file(&self, file_id: &str) -> Result<Vec<StoredChunk>> {
        let stored = self.chunks.read().map_err(poisoned)?;
        let mut out: Vec<StoredChunk> = stored
            .iter()
            .filter(|c| c.file_id == file_id)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.chunk_index);
        Ok(out)
    }

    async fn chunk_totals(&self, project_id: &str) -> Result<ChunkTotals> {
        let stored = self.chunks.read().map_err(poisoned)?;
        let mut totals = ChunkTotals::default();
        for c in stored.iter().filter(|c| c.project_id == project_id) {
            totals.chunks += 1;
            totals.tokens += c.token_count;
        }
        Ok(totals)
    }
}
