//! Sequential batch runner.
//!
//! Feeds files to the [`Pipeline`] one at a time, pausing between files to
//! keep load on the embedding service bounded. One file's failure never
//! stops the batch.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use crate::config::{BatchConfig, Config};
use crate::models::{EmbeddingStatus, FileDescriptor, ProcessingResult};
use crate::pipeline::{open_pipeline, print_result, Pipeline};
use crate::progress::ProgressReporter;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<ProcessingResult>,
}

pub struct BatchRunner {
    pipeline: Arc<Pipeline>,
    pause: Duration,
}

impl BatchRunner {
    pub fn new(pipeline: Arc<Pipeline>, pause: Duration) -> Self {
        Self { pipeline, pause }
    }

    pub fn from_config(pipeline: Arc<Pipeline>, config: &BatchConfig) -> Self {
        Self::new(pipeline, Duration::from_millis(config.pause_ms))
    }

    /// Process `files` in order. `on_file(result, index, total)` is called
    /// after each file with its 0-based index.
    pub async fn run<F>(
        &self,
        files: &[FileDescriptor],
        progress: Option<&dyn ProgressReporter>,
        mut on_file: F,
    ) -> BatchSummary
    where
        F: FnMut(&ProcessingResult, usize, usize),
    {
        let total = files.len();
        let mut summary = BatchSummary {
            total,
            ..BatchSummary::default()
        };

        for (index, desc) in files.iter().enumerate() {
            if index > 0 && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }

            let result = self.pipeline.process(desc, progress).await;
            if result.success {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
            on_file(&result, index, total);
            summary.results.push(result);
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            total,
            "batch complete: {}/{} files succeeded",
            summary.succeeded,
            total
        );
        summary
    }

    /// Process a project's `pending` and `failed` files, or every file not
    /// currently `processing` when `include_completed` is set.
    pub async fn run_project<F>(
        &self,
        project_id: &str,
        include_completed: bool,
        progress: Option<&dyn ProgressReporter>,
        on_file: F,
    ) -> Result<BatchSummary>
    where
        F: FnMut(&ProcessingResult, usize, usize),
    {
        let files: Vec<FileDescriptor> = self
            .pipeline
            .file_store()
            .list_by_project(project_id)
            .await?
            .into_iter()
            .filter(|f| match f.embedding_status {
                EmbeddingStatus::Pending | EmbeddingStatus::Failed => true,
                EmbeddingStatus::Completed => include_completed,
                EmbeddingStatus::Processing => false,
            })
            .map(|f| f.descriptor())
            .collect();

        info!(project_id, files = files.len(), "starting batch");
        Ok(self.run(&files, progress, on_file).await)
    }
}

/// `ingest process --project <id> [--all]`
pub async fn run_batch(
    config: &Config,
    project_id: &str,
    include_completed: bool,
    progress: &dyn ProgressReporter,
    json: bool,
) -> Result<()> {
    let (pipeline, pool) = open_pipeline(config).await?;
    let runner = BatchRunner::from_config(Arc::new(pipeline), &config.batch);

    let summary = runner
        .run_project(project_id, include_completed, Some(progress), |result, index, total| {
            if !json {
                print!("[{}/{}] ", index + 1, total);
                let _ = print_result(result, false);
            }
        })
        .await?;
    pool.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!();
        println!(
            "Batch complete: {}/{} succeeded, {} failed",
            summary.succeeded, summary.total, summary.failed
        );
    }
    Ok(())
}
