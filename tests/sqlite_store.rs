//! SQLite-backed file and chunk stores.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tempfile::TempDir;

use rag_ingest::config::Config;
use rag_ingest::embedding::EmbeddingService;
use rag_ingest::files::register_file;
use rag_ingest::models::{
    ChunkEnrichment, ChunkMetadata, EmbeddingStatus, FileRecord, NewChunk,
};
use rag_ingest::object_store::FsObjectStore;
use rag_ingest::pipeline::Pipeline;
use rag_ingest::stats::project_stats;
use rag_ingest::store::{ChunkStore, ClaimOutcome, FileStore, SqliteStore};
use rag_ingest::{db, migrate};

async fn setup() -> (TempDir, Config, SqlitePool, SqliteStore) {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::minimal();
    config.db.path = tmp.path().join("data/ingest.sqlite");
    config.storage.root = tmp.path().join("objects");
    config.chunking.chunk_size_tokens = 40;
    config.chunking.overlap_tokens = 5;

    let pool = db::connect(&config).await.unwrap();
    migrate::create_schema(&pool).await.unwrap();
    let store = SqliteStore::new(pool.clone());
    (tmp, config, pool, store)
}

async fn add_file(store: &SqliteStore, id: &str, project: &str) -> FileRecord {
    let record = FileRecord::new_pending(id, project, format!("{}/{}", project, id), "a.txt", "text/plain");
    store.register(&record).await.unwrap();
    record
}

fn chunk(file_id: &str, index: i64, text: &str) -> NewChunk {
    NewChunk {
        id: uuid::Uuid::new_v4().to_string(),
        project_id: "p1".to_string(),
        file_id: file_id.to_string(),
        chunk_index: index,
        chunk_text: text.to_string(),
        embedding: vec![index as f32, 0.5, -1.0],
        source_file: "a.txt".to_string(),
        page_number: Some(1),
        section_title: None,
        token_count: 10,
        hash: format!("h{}", index),
        metadata: ChunkMetadata::plain(),
    }
}

#[tokio::test]
async fn schema_creation_is_idempotent() {
    let (_tmp, _config, pool, _store) = setup().await;
    migrate::create_schema(&pool).await.unwrap();
}

#[tokio::test]
async fn claim_is_compare_and_set() {
    let (_tmp, _config, _pool, store) = setup().await;
    add_file(&store, "f1", "p1").await;

    assert_eq!(store.begin_processing("f1").await.unwrap(), ClaimOutcome::Claimed);
    assert_eq!(
        store.begin_processing("f1").await.unwrap(),
        ClaimOutcome::AlreadyProcessing
    );
    assert_eq!(
        store.begin_processing("missing").await.unwrap(),
        ClaimOutcome::NotFound
    );

    store.mark_failed("f1", "boom").await.unwrap();
    let record = store.get("f1").await.unwrap().unwrap();
    assert_eq!(record.embedding_status, EmbeddingStatus::Failed);
    assert_eq!(record.last_error.as_deref(), Some("boom"));

    // Re-submission from a terminal state clears the error.
    assert_eq!(store.begin_processing("f1").await.unwrap(), ClaimOutcome::Claimed);
    let record = store.get("f1").await.unwrap().unwrap();
    assert_eq!(record.embedding_status, EmbeddingStatus::Processing);
    assert!(record.last_error.is_none());

    store.mark_completed("f1", 7, Utc::now()).await.unwrap();
    let record = store.get("f1").await.unwrap().unwrap();
    assert_eq!(record.embedding_status, EmbeddingStatus::Completed);
    assert_eq!(record.chunk_count, 7);
    assert!(record.embedded_at.is_some());
}

#[tokio::test]
async fn reset_only_touches_processing_files() {
    let (_tmp, _config, _pool, store) = setup().await;
    add_file(&store, "f1", "p1").await;

    assert!(!store.reset_to_pending("f1").await.unwrap());
    store.begin_processing("f1").await.unwrap();
    assert!(store.reset_to_pending("f1").await.unwrap());
    let record = store.get("f1").await.unwrap().unwrap();
    assert_eq!(record.embedding_status, EmbeddingStatus::Pending);
}

#[tokio::test]
async fn status_updates_require_a_live_claim() {
    let (_tmp, _config, _pool, store) = setup().await;
    add_file(&store, "f1", "p1").await;

    // Never claimed.
    assert!(!store.mark_completed("f1", 3, Utc::now()).await.unwrap());

    store.begin_processing("f1").await.unwrap();
    assert!(store.reset_to_pending("f1").await.unwrap());
    assert!(!store.mark_completed("f1", 3, Utc::now()).await.unwrap());
    assert!(!store.mark_failed("f1", "late").await.unwrap());

    let record = store.get("f1").await.unwrap().unwrap();
    assert_eq!(record.embedding_status, EmbeddingStatus::Pending);
    assert_eq!(record.chunk_count, 0);
    assert!(record.last_error.is_none());

    // A fresh claim can complete.
    store.begin_processing("f1").await.unwrap();
    assert!(store.mark_completed("f1", 3, Utc::now()).await.unwrap());
    assert!(store.mark_completed("missing", 1, Utc::now()).await.is_err());
}

#[tokio::test]
async fn insert_replaces_and_rolls_back() {
    let (_tmp, _config, _pool, store) = setup().await;
    add_file(&store, "f1", "p1").await;

    store
        .insert_chunks("f1", &[chunk("f1", 0, "first"), chunk("f1", 1, "second")])
        .await
        .unwrap();
    store
        .insert_chunks("f1", &[chunk("f1", 0, "only")])
        .await
        .unwrap();
    let chunks = store.chunks_for_file("f1").await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].chunk_text, "only");
    assert_eq!(chunks[0].embedding, vec![0.0, 0.5, -1.0]);
    assert_eq!(chunks[0].page_number, Some(1));

    // Duplicate chunk_index violates the unique key mid-insert.
    let err = store
        .insert_chunks("f1", &[chunk("f1", 0, "x"), chunk("f1", 0, "y")])
        .await;
    assert!(err.is_err());
    let chunks = store.chunks_for_file("f1").await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].chunk_text, "only");
}

#[tokio::test]
async fn delete_is_idempotent() {
    let (_tmp, _config, _pool, store) = setup().await;
    add_file(&store, "f1", "p1").await;
    store
        .insert_chunks("f1", &[chunk("f1", 0, "a"), chunk("f1", 1, "b")])
        .await
        .unwrap();

    assert_eq!(store.delete_chunks_for_file("f1").await.unwrap(), 2);
    assert_eq!(store.delete_chunks_for_file("f1").await.unwrap(), 0);
    assert_eq!(store.delete_chunks_for_file("never-existed").await.unwrap(), 0);
}

#[tokio::test]
async fn counts_and_totals_are_per_project() {
    let (_tmp, _config, _pool, store) = setup().await;
    add_file(&store, "a", "p1").await;
    add_file(&store, "b", "p1").await;
    add_file(&store, "c", "p1").await;
    add_file(&store, "other", "p2").await;

    store.begin_processing("a").await.unwrap();
    store
        .insert_chunks("a", &[chunk("a", 0, "x"), chunk("a", 1, "y")])
        .await
        .unwrap();
    store.mark_completed("a", 2, Utc::now()).await.unwrap();
    store.begin_processing("b").await.unwrap();
    store.mark_failed("b", "bad").await.unwrap();

    let counts = store.status_counts("p1").await.unwrap();
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.pending, 1);
    assert_eq!(counts.processing, 0);
    assert_eq!(counts.total(), 3);

    let totals = store.chunk_totals("p1").await.unwrap();
    assert_eq!(totals.chunks, 2);
    assert_eq!(totals.tokens, 20);

    let stats = project_stats(&store, &store, "p1").await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.total_chunks, 2);

    let empty = project_stats(&store, &store, "nobody").await.unwrap();
    assert_eq!(empty.total, 0);
    assert_eq!(empty.total_tokens, 0);
}

struct ConstantService;

#[async_trait]
impl EmbeddingService for ConstantService {
    fn model_name(&self) -> &str {
        "constant"
    }
    fn dims(&self) -> usize {
        4
    }
    fn max_batch_size(&self) -> usize {
        16
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.25; 4]).collect())
    }
}

#[tokio::test]
async fn pipeline_persists_table_enrichment() {
    let (_tmp, config, _pool, store) = setup().await;
    let store = Arc::new(store);
    let objects = Arc::new(FsObjectStore::new(&config.storage.root));

    let text = "Table 2: Prices\n| item | price |\n|---|---|\n| apple | 3 |\n| pear | 4 |\n";
    let record = register_file(
        store.as_ref(),
        objects.as_ref(),
        "p1",
        "prices.md",
        text.as_bytes(),
        None,
    )
    .await
    .unwrap();

    let pipeline = Pipeline::from_config(
        &config,
        store.clone(),
        store.clone(),
        objects,
        Arc::new(ConstantService),
    );
    let result = pipeline.process(&record.descriptor(), None).await;
    assert!(result.success, "process failed: {:?}", result.error);

    let chunks = store.chunks_for_file(&record.id).await.unwrap();
    assert_eq!(chunks.len(), 1);
    let chunk = &chunks[0];
    assert!(chunk.chunk_text.contains("In Prices, apple has price of 3."));
    assert_eq!(chunk.embedding, vec![0.25; 4]);
    match &chunk.metadata.enrichment {
        ChunkEnrichment::Table {
            table_name,
            row_count,
            ..
        } => {
            assert_eq!(table_name, "Prices");
            assert_eq!(*row_count, 2);
        }
        other => panic!("expected table enrichment, got {:?}", other),
    }
    assert_eq!(chunk.metadata.enriched_by.as_deref(), Some("table-heuristic"));
    assert!(chunk.metadata.original_text.is_some());

    let stored = store.get(&record.id).await.unwrap().unwrap();
    assert_eq!(stored.embedding_status, EmbeddingStatus::Completed);
    assert_eq!(stored.chunk_count, 1);
}
