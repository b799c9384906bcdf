//! Per-project ingestion statistics.
//!
//! [`project_stats`] is the read-only aggregator: file counts by status
//! plus chunk and token totals. [`run_stats`] renders it for `ingest stats`.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::db;
use crate::store::{ChunkStore, FileStore, SqliteStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStats {
    pub total: i64,
    /// Files in `completed`.
    pub processed: i64,
    pub pending: i64,
    /// Files currently (or stuck) in `processing`.
    pub processing: i64,
    pub failed: i64,
    pub total_chunks: i64,
    pub total_tokens: i64,
}

pub async fn project_stats(
    files: &dyn FileStore,
    chunks: &dyn ChunkStore,
    project_id: &str,
) -> Result<ProjectStats> {
    let counts = files.status_counts(project_id).await?;
    let totals = chunks.chunk_totals(project_id).await?;
    Ok(ProjectStats {
        total: counts.total(),
        processed: counts.completed,
        pending: counts.pending,
        processing: counts.processing,
        failed: counts.failed,
        total_chunks: totals.chunks,
        total_tokens: totals.tokens,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config, project_id: &str, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let stats = project_stats(&store, &store, project_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        pool.close().await;
        return Ok(());
    }

    let last_embedded = store
        .list_by_project(project_id)
        .await?
        .iter()
        .filter_map(|f| f.embedded_at)
        .max();

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Ingestion Stats: {}", project_id);
    println!("================================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Files:       {}", stats.total);
    println!("  Processed:   {}", stats.processed);
    println!("  Pending:     {}", stats.pending);
    if stats.processing > 0 {
        println!("  Processing:  {}", stats.processing);
    }
    println!("  Failed:      {}", stats.failed);
    println!();
    println!("  Chunks:      {}", stats.total_chunks);
    println!("  Tokens:      {}", stats.total_tokens);
    println!(
        "  Last embed:  {}",
        match last_embedded {
            Some(ts) => format_ts_relative(ts.timestamp()),
            None => "never".to_string(),
        }
    );
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMetadata, FileRecord, NewChunk};
    use crate::store::MemoryStore;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn relative_times() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 120), "2 mins ago");
        assert_eq!(format_ts_relative(now - 3600), "1 hour ago");
    }

    #[tokio::test]
    async fn aggregates_counts_and_totals() {
        let store = MemoryStore::new();
        for id in ["a", "b", "c", "d"] {
            store
                .register(&FileRecord::new_pending(id, "p1", id, "x.txt", "text/plain"))
                .await
                .unwrap();
        }
        store
            .register(&FileRecord::new_pending("other", "p2", "o", "x.txt", "text/plain"))
            .await
            .unwrap();

        store.begin_processing("a").await.unwrap();
        store.mark_completed("a", 2, chrono::Utc::now()).await.unwrap();
        store.begin_processing("b").await.unwrap();
        store.mark_failed("b", "bad pdf").await.unwrap();

        let chunk = |i: i64| NewChunk {
            id: format!("c{}", i),
            project_id: "p1".to_string(),
            file_id: "a".to_string(),
            chunk_index: i,
            chunk_text: "t".to_string(),
            embedding: vec![0.0],
            source_file: "x.txt".to_string(),
            page_number: None,
            section_title: None,
            token_count: 10,
            hash: String::new(),
            metadata: ChunkMetadata::plain(),
        };
        store.insert_chunks("a", &[chunk(0), chunk(1)]).await.unwrap();

        let stats = project_stats(&store, &store, "p1").await.unwrap();
        assert_eq!(
            stats,
            ProjectStats {
                total: 4,
                processed: 1,
                pending: 2,
                processing: 0,
                failed: 1,
                total_chunks: 2,
                total_tokens: 20,
            }
        );
    }
}
