//! Batched embedder.
//!
//! Splits chunk texts into sub-batches no larger than both the configured
//! `embedding.batch_size` and the service's own per-call limit, embeds
//! them in order, and reassembles the vectors so position *i* of the output
//! belongs to text *i* of the input.
//!
//! Every batch runs under `embedding.batch_timeout_secs`. A failed or timed
//! out batch fails the whole call; vectors from earlier batches are dropped
//! with it.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::embedding::EmbeddingService;
use crate::error::{PipelineError, Result};

pub struct Embedder {
    service: Arc<dyn EmbeddingService>,
    batch_size: usize,
    batch_timeout: Duration,
}

impl Embedder {
    pub fn new(service: Arc<dyn EmbeddingService>, batch_size: usize, batch_timeout: Duration) -> Self {
        Self {
            service,
            batch_size,
            batch_timeout,
        }
    }

    pub fn from_config(service: Arc<dyn EmbeddingService>, config: &EmbeddingConfig) -> Self {
        Self::new(
            service,
            config.batch_size,
            Duration::from_secs(config.batch_timeout_secs),
        )
    }

    /// `min(configured, service limit)`, never below 1.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.min(self.service.max_batch_size()).max(1)
    }

    /// Embed all texts. `on_progress(done, total)` is called after each
    /// sub-batch completes.
    pub async fn embed_all(
        &self,
        texts: &[String],
        on_progress: &(dyn Fn(usize, usize) + Send + Sync),
    ) -> Result<Vec<Vec<f32>>> {
        let total = texts.len();
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(total);
        let expected_dims = self.service.dims();

        for (batch, slice) in texts.chunks(self.effective_batch_size()).enumerate() {
            debug!(batch, size = slice.len(), "embedding batch");

            let embedded = tokio::time::timeout(self.batch_timeout, self.service.embed(slice))
                .await
                .map_err(|_| PipelineError::EmbeddingTimeout {
                    batch,
                    secs: self.batch_timeout.as_secs(),
                })?
                .map_err(PipelineError::Embedding)?;

            if embedded.len() != slice.len() {
                return Err(PipelineError::VectorCountMismatch {
                    expected: slice.len(),
                    actual: embedded.len(),
                });
            }

            for vector in embedded {
                let want = if expected_dims > 0 {
                    expected_dims
                } else {
                    vectors.first().map(Vec::len).unwrap_or(vector.len())
                };
                if vector.len() != want || vector.is_empty() {
                    return Err(PipelineError::InvalidEmbeddingDimension {
                        expected: want,
                        actual: vector.len(),
                    });
                }
                vectors.push(vector);
            }

            on_progress(vectors.len(), total);
        }

        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Encodes each text's numeric suffix into the vector.
    struct NumberingService {
        max_batch: usize,
        calls: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl EmbeddingService for NumberingService {
        fn model_name(&self) -> &str {
            "numbering"
        }
        fn dims(&self) -> usize {
            2
        }
        fn max_batch_size(&self) -> usize {
            self.max_batch
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.calls.lock().unwrap().push(texts.len());
            Ok(texts
                .iter()
                .map(|t| {
                    let n: f32 = t.trim_start_matches("text-").parse().unwrap_or(-1.0);
                    vec![n, 1.0]
                })
                .collect())
        }
    }

    struct SlowService;

    #[async_trait]
    impl EmbeddingService for SlowService {
        fn model_name(&self) -> &str {
            "slow"
        }
        fn dims(&self) -> usize {
            2
        }
        fn max_batch_size(&self) -> usize {
            10
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![vec![0.0, 0.0]; texts.len()])
        }
    }

    struct ShortService {
        dims: usize,
        drop_one: bool,
    }

    #[async_trait]
    impl EmbeddingService for ShortService {
        fn model_name(&self) -> &str {
            "short"
        }
        fn dims(&self) -> usize {
            4
        }
        fn max_batch_size(&self) -> usize {
            10
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            let n = if self.drop_one { texts.len() - 1 } else { texts.len() };
            Ok(vec![vec![0.0; self.dims]; n])
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("text-{}", i)).collect()
    }

    fn no_progress(_: usize, _: usize) {}

    #[tokio::test]
    async fn batches_respect_service_limit_and_keep_order() {
        let service = Arc::new(NumberingService {
            max_batch: 4,
            calls: Mutex::new(Vec::new()),
        });
        let embedder = Embedder::new(service.clone(), 64, Duration::from_secs(5));
        assert_eq!(embedder.effective_batch_size(), 4);

        let progress = Mutex::new(Vec::new());
        let vectors = embedder
            .embed_all(&texts(10), &|done, total| progress.lock().unwrap().push((done, total)))
            .await
            .unwrap();

        assert_eq!(*service.calls.lock().unwrap(), vec![4, 4, 2]);
        for (i, v) in vectors.iter().enumerate() {
            assert_eq!(v[0], i as f32);
        }
        assert_eq!(*progress.lock().unwrap(), vec![(4, 10), (8, 10), (10, 10)]);
    }

    #[tokio::test]
    async fn configured_batch_size_wins_when_smaller() {
        let service = Arc::new(NumberingService {
            max_batch: 100,
            calls: Mutex::new(Vec::new()),
        });
        let embedder = Embedder::new(service.clone(), 3, Duration::from_secs(5));
        embedder.embed_all(&texts(7), &no_progress).await.unwrap();
        assert_eq!(*service.calls.lock().unwrap(), vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn slow_batch_times_out() {
        let embedder = Embedder::new(Arc::new(SlowService), 10, Duration::from_millis(20));
        let err = embedder.embed_all(&texts(2), &no_progress).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmbeddingTimeout { batch: 0, .. }));
    }

    #[tokio::test]
    async fn vector_count_is_checked() {
        let service = Arc::new(ShortService {
            dims: 4,
            drop_one: true,
        });
        let embedder = Embedder::new(service, 10, Duration::from_secs(5));
        let err = embedder.embed_all(&texts(3), &no_progress).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::VectorCountMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn dimension_is_checked() {
        let service = Arc::new(ShortService {
            dims: 3,
            drop_one: false,
        });
        let embedder = Embedder::new(service, 10, Duration::from_secs(5));
        let err = embedder.embed_all(&texts(2), &no_progress).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidEmbeddingDimension {
                expected: 4,
                actual: 3
            }
        ));
    }

    #[tokio::test]
    async fn empty_input_makes_no_calls() {
        let service = Arc::new(NumberingService {
            max_batch: 4,
            calls: Mutex::new(Vec::new()),
        });
        let embedder = Embedder::new(service.clone(), 4, Duration::from_secs(5));
        assert!(embedder.embed_all(&[], &no_progress).await.unwrap().is_empty());
        assert!(service.calls.lock().unwrap().is_empty());
    }
}
