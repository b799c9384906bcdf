//! Pipeline error types.
//!
//! Every variant here is fatal for the file being processed. The
//! orchestrator turns them into a `failed` status and a failure
//! [`ProcessingResult`](crate::models::ProcessingResult); they never escape
//! the pipeline boundary.

use thiserror::Error;

use crate::extract::ExtractError;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("file {0} is already being processed")]
    AlreadyProcessing(String),

    #[error("file {0} was reset while processing; result discarded")]
    ClaimLost(String),

    #[error("could not read source file: {0:#}")]
    Storage(anyhow::Error),

    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractError),

    #[error("extraction task aborted: {0}")]
    ExtractionAborted(String),

    #[error("document contains no extractable text")]
    EmptyDocument,

    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),

    #[error("embedding batch {batch} timed out after {secs}s")]
    EmbeddingTimeout { batch: usize, secs: u64 },

    #[error("embedding service returned {actual} vectors for {expected} texts")]
    VectorCountMismatch { expected: usize, actual: usize },

    #[error("invalid embedding dimension: expected {expected}, got {actual}")]
    InvalidEmbeddingDimension { expected: usize, actual: usize },

    #[error("chunk store error: {0:#}")]
    Store(anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_human_readable() {
        let err = PipelineError::EmbeddingTimeout { batch: 2, secs: 30 };
        assert_eq!(err.to_string(), "embedding batch 2 timed out after 30s");

        let err = PipelineError::Store(anyhow::anyhow!("disk full"));
        assert_eq!(err.to_string(), "chunk store error: disk full");

        let err: PipelineError = ExtractError::PasswordProtected.into();
        assert!(err.to_string().contains("password-protected"));
    }
}
