//! Background ingestion queue.
//!
//! Upload handlers hand files to an [`IngestQueue`] instead of running the
//! pipeline inline. A single tokio worker drains an `mpsc` channel and runs
//! files one after another through the [`Pipeline`], pausing between them
//! like the batch runner. Each submission gets a `oneshot` receiver for its
//! [`ProcessingResult`]; if the submitter drops it, the outcome is logged
//! against the file id instead.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::models::{FileDescriptor, ProcessingResult};
use crate::pipeline::Pipeline;

const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Process,
    Reprocess,
}

struct Job {
    descriptor: FileDescriptor,
    kind: JobKind,
    reply: oneshot::Sender<ProcessingResult>,
}

pub struct IngestQueue {
    sender: mpsc::Sender<Job>,
    worker: JoinHandle<()>,
}

impl IngestQueue {
    /// Spawn the worker on the current tokio runtime.
    pub fn start(pipeline: Arc<Pipeline>, pause: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let worker = tokio::spawn(run_worker(pipeline, receiver, pause));
        Self { sender, worker }
    }

    /// Queue a file for processing.
    pub async fn submit(
        &self,
        descriptor: FileDescriptor,
    ) -> Result<oneshot::Receiver<ProcessingResult>> {
        self.enqueue(descriptor, JobKind::Process).await
    }

    /// Queue a file for reprocessing (existing chunks are replaced).
    pub async fn submit_reprocess(
        &self,
        descriptor: FileDescriptor,
    ) -> Result<oneshot::Receiver<ProcessingResult>> {
        self.enqueue(descriptor, JobKind::Reprocess).await
    }

    async fn enqueue(
        &self,
        descriptor: FileDescriptor,
        kind: JobKind,
    ) -> Result<oneshot::Receiver<ProcessingResult>> {
        let (reply, rx) = oneshot::channel();
        let file_id = descriptor.file_id.clone();
        self.sender
            .send(Job {
                descriptor,
                kind,
                reply,
            })
            .await
            .map_err(|_| anyhow::anyhow!("ingest queue is shut down; file {} not queued", file_id))?;
        Ok(rx)
    }

    /// Stop accepting work, finish everything already queued, and wait for
    /// the worker to exit.
    pub async fn shutdown(self) -> Result<()> {
        drop(self.sender);
        self.worker.await?;
        Ok(())
    }
}

async fn run_worker(pipeline: Arc<Pipeline>, mut receiver: mpsc::Receiver<Job>, pause: Duration) {
    info!("ingest queue worker started");
    let mut last_finished: Option<Instant> = None;

    while let Some(job) = receiver.recv().await {
        if let Some(finished) = last_finished {
            let since = finished.elapsed();
            if since < pause {
                tokio::time::sleep(pause - since).await;
            }
        }

        let file_id = job.descriptor.file_id.clone();
        let result = match job.kind {
            JobKind::Process => pipeline.process(&job.descriptor, None).await,
            JobKind::Reprocess => pipeline.reprocess(&job.descriptor, None).await,
        };
        last_finished = Some(Instant::now());

        if let Err(result) = job.reply.send(result) {
            match &result.error {
                None => info!(
                    file_id = %file_id,
                    chunks = result.chunk_count,
                    "queued file completed (no listener)"
                ),
                Some(error) => warn!(
                    file_id = %file_id,
                    error = %error,
                    "queued file failed (no listener)"
                ),
            }
        }
    }

    info!("ingest queue worker stopped");
}
