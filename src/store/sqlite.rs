//! SQLite-backed [`FileStore`] + [`ChunkStore`].
//!
//! Schema lives in [`crate::migrate`]. Timestamps are stored as unix
//! seconds, embeddings as little-endian f32 BLOBs, chunk metadata as JSON.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::models::{ChunkMetadata, EmbeddingStatus, FileRecord, NewChunk, StoredChunk};

use super::{ChunkStore, ChunkTotals, ClaimOutcome, FileStore, StatusCounts};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Interpret a guarded status update: one row means the claim held,
    /// zero rows means the file is gone or no longer `processing`.
    async fn claim_held(&self, file_id: &str, rows_affected: u64) -> Result<bool> {
        if rows_affected == 1 {
            return Ok(true);
        }
        if self.get(file_id).await?.is_none() {
            bail!("file not found: {}", file_id);
        }
        Ok(false)
    }
}

const FILE_COLUMNS: &str = "id, project_id, storage_path, filename, mime_type, embedding_status, \
                            chunk_count, embedded_at, last_error, created_at";

fn from_ts(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

fn row_to_file(row: &SqliteRow) -> Result<FileRecord> {
    let status: String = row.get("embedding_status");
    let embedded_at: Option<i64> = row.get("embedded_at");
    Ok(FileRecord {
        id: row.get("id"),
        project_id: row.get("project_id"),
        storage_path: row.get("storage_path"),
        filename: row.get("filename"),
        mime_type: row.get("mime_type"),
        embedding_status: status.parse()?,
        chunk_count: row.get("chunk_count"),
        embedded_at: embedded_at.map(from_ts),
        last_error: row.get("last_error"),
        created_at: from_ts(row.get("created_at")),
    })
}

fn row_to_chunk(row: &SqliteRow) -> Result<StoredChunk> {
    let blob: Vec<u8> = row.get("embedding");
    let page_number: Option<i64> = row.get("page_number");
    let metadata_json: String = row.get("metadata_json");
    let metadata: ChunkMetadata =
        serde_json::from_str(&metadata_json).context("invalid chunk metadata_json")?;
    Ok(StoredChunk {
        id: row.get("id"),
        project_id: row.get("project_id"),
        file_id: row.get("file_id"),
        chunk_index: row.get("chunk_index"),
        chunk_text: row.get("chunk_text"),
        embedding: blob_to_vec(&blob),
        source_file: row.get("source_file"),
        page_number: page_number.map(|p| p as u32),
        section_title: row.get("section_title"),
        token_count: row.get("token_count"),
        metadata,
    })
}

#[async_trait]
impl FileStore for SqliteStore {
    async fn register(&self, record: &FileRecord) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO files (id, project_id, storage_path, filename, mime_type,
                               embedding_status, chunk_count, embedded_at, last_error,
                               created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.project_id)
        .bind(&record.storage_path)
        .bind(&record.filename)
        .bind(&record.mime_type)
        .bind(record.embedding_status.as_str())
        .bind(record.chunk_count)
        .bind(record.embedded_at.map(|t| t.timestamp()))
        .bind(&record.last_error)
        .bind(record.created_at.timestamp())
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to register file {}", record.id))?;
        Ok(())
    }

    async fn get(&self, file_id: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM files WHERE id = ?", FILE_COLUMNS))
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_file).transpose()
    }

    async fn list_by_project(&self, project_id: &str) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM files WHERE project_id = ? ORDER BY created_at ASC, id ASC",
            FILE_COLUMNS
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_file).collect()
    }

    async fn begin_processing(&self, file_id: &str) -> Result<ClaimOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE files
            SET embedding_status = 'processing', chunk_count = 0, embedded_at = NULL,
                last_error = NULL, updated_at = ?
            WHERE id = ? AND embedding_status != 'processing'
            "#,
        )
        .bind(Utc::now().timestamp())
        .bind(file_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(ClaimOutcome::Claimed);
        }

        let matching: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE id = ?")
            .bind(file_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(if matching > 0 {
            ClaimOutcome::AlreadyProcessing
        } else {
            ClaimOutcome::NotFound
        })
    }

    async fn mark_completed(
        &self,
        file_id: &str,
        chunk_count: i64,
        embedded_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE files
            SET embedding_status = 'completed', chunk_count = ?, embedded_at = ?,
                last_error = NULL, updated_at = ?
            WHERE id = ? AND embedding_status = 'processing'
            "#,
        )
        .bind(chunk_count)
        .bind(embedded_at.timestamp())
        .bind(Utc::now().timestamp())
        .bind(file_id)
        .execute(&self.pool)
        .await?;
        self.claim_held(file_id, result.rows_affected()).await
    }

    async fn mark_failed(&self, file_id: &str, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE files
            SET embedding_status = 'failed', chunk_count = 0, embedded_at = NULL,
                last_error = ?, updated_at = ?
            WHERE id = ? AND embedding_status = 'processing'
            "#,
        )
        .bind(error)
        .bind(Utc::now().timestamp())
        .bind(file_id)
        .execute(&self.pool)
        .await?;
        self.claim_held(file_id, result.rows_affected()).await
    }

    async fn reset_to_pending(&self, file_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE files SET embedding_status = 'pending', updated_at = ? \
             WHERE id = ? AND embedding_status = 'processing'",
        )
        .bind(Utc::now().timestamp())
        .bind(file_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if self.get(file_id).await?.is_none() {
            bail!("file not found: {}", file_id);
        }
        Ok(false)
    }

    async fn status_counts(&self, project_id: &str) -> Result<StatusCounts> {
        let rows = sqlx::query(
            "SELECT embedding_status, COUNT(*) AS n FROM files WHERE project_id = ? \
             GROUP BY embedding_status",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::default();
        for row in &rows {
            let status: String = row.get("embedding_status");
            let n: i64 = row.get("n");
            match status.parse::<EmbeddingStatus>()? {
                EmbeddingStatus::Pending => counts.pending = n,
                EmbeddingStatus::Processing => counts.processing = n,
                EmbeddingStatus::Completed => counts.completed = n,
                EmbeddingStatus::Failed => counts.failed = n,
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn insert_chunks(&self, file_id: &str, chunks: &[NewChunk]) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            if chunk.file_id != file_id {
                bail!(
                    "chunk {} belongs to file {}, not {}",
                    chunk.id,
                    chunk.file_id,
                    file_id
                );
            }
            let metadata_json = serde_json::to_string(&chunk.metadata)?;
            sqlx::query(
                r#"
                INSERT INTO chunks (id, project_id, file_id, chunk_index, chunk_text,
                                    embedding, dims, source_file, page_number,
                                    section_title, token_count, hash, metadata_json,
                                    created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.project_id)
            .bind(&chunk.file_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.chunk_text)
            .bind(vec_to_blob(&chunk.embedding))
            .bind(chunk.embedding.len() as i64)
            .bind(&chunk.source_file)
            .bind(chunk.page_number.map(i64::from))
            .bind(&chunk.section_title)
            .bind(chunk.token_count)
            .bind(&chunk.hash)
            .bind(metadata_json)
            .bind(now)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to insert chunk {} of file {}", chunk.chunk_index, file_id))?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_chunks_for_file(&self, file_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE file_id = ?")
            .bind(file_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn chunks_for_file(&self, file_id: &str) -> Result<Vec<StoredChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, project_id, file_id, chunk_index, chunk_text, embedding, source_file,
                   page_number, section_title, token_count, metadata_json
            FROM chunks WHERE file_id = ? ORDER BY chunk_index ASC
            "#,
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_chunk).collect()
    }

    async fn chunk_totals(&self, project_id: &str) -> Result<ChunkTotals> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS chunks, COALESCE(SUM(token_count), 0) AS tokens \
             FROM chunks WHERE project_id = ?",
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(ChunkTotals {
            chunks: row.get("chunks"),
            tokens: row.get("tokens"),
        })
    }
}
