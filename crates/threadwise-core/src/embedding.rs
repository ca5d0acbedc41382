//! Batched embedding with retry, plus vector utilities.
//!
//! [`Embedder`] wraps an [`EmbeddingProvider`] with the policy every
//! caller needs: inputs are cut into `batch_size` batches, each call runs
//! under a deadline, retryable failures back off exponentially with
//! jitter, and the provider's output is checked for count and
//! dimensionality before it is trusted.
//!
//! Backoff follows [`RetryPolicy`](crate::retry::RetryPolicy).

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::config::EmbedderConfig;
use crate::error::{ConfigError, EmbeddingError, ProviderError};
use crate::provider::EmbeddingProvider;

/// Batching, retrying front end for an [`EmbeddingProvider`].
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    config: EmbedderConfig,
}

impl Embedder {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        config: EmbedderConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { provider, config })
    }

    pub fn config(&self) -> &EmbedderConfig {
        &self.config
    }

    /// Embed every text, one vector per input in input order.
    ///
    /// On failure the error names the failing batch and carries the
    /// vectors of every batch completed before it.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let batch_size = self.config.batch_size;
        let mut vectors = Vec::with_capacity(texts.len());

        for (batch_index, batch) in texts.chunks(batch_size).enumerate() {
            let start = batch_index * batch_size;
            match self.embed_batch(batch_index, batch).await {
                Ok(batch_vectors) => vectors.extend(batch_vectors),
                Err((attempts, source)) => {
                    return Err(EmbeddingError {
                        batch_index,
                        range: start..start + batch.len(),
                        attempts,
                        completed: vectors,
                        source,
                    })
                }
            }
        }

        debug!(texts = texts.len(), "embedded all batches");
        Ok(vectors)
    }

    /// Embed a single text with one provider call and no retry.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let input = [text.to_string()];
        let mut vectors = self.call(&input).await?;
        vectors
            .pop()
            .ok_or_else(|| ProviderError::permanent("provider returned no vector"))
    }

    async fn embed_batch(
        &self,
        batch_index: usize,
        batch: &[String],
    ) -> Result<Vec<Vec<f32>>, (u32, ProviderError)> {
        let operation = format!("embedding batch {}", batch_index);
        self.config
            .retry_policy()
            .run(&operation, move || self.call(batch))
            .await
            .map_err(|e| (e.attempts, e.error))
    }

    async fn call(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let timeout = self.config.timeout();
        let deadline = Instant::now() + timeout;
        let call = self
            .provider
            .embed(batch, &self.config.model, self.config.dimensions, deadline);

        let vectors = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ProviderError::timeout(format!(
                    "embedding call exceeded {:?}",
                    timeout
                )))
            }
        };

        if vectors.len() != batch.len() {
            return Err(ProviderError::permanent(format!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                batch.len()
            )));
        }
        if let Some(v) = vectors.iter().find(|v| v.len() != self.config.dimensions) {
            return Err(ProviderError::permanent(format!(
                "provider returned a {}-dimension vector, expected {}",
                v.len(),
                self.config.dimensions
            )));
        }
        Ok(vectors)
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.config.retry_policy().backoff(attempt)
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DIMS: usize = 4;

    fn config() -> EmbedderConfig {
        EmbedderConfig {
            dimensions: DIMS,
            ..Default::default()
        }
    }

    /// Fails the calls listed in `failures` (1-based call numbers) with `kind`.
    struct Scripted {
        calls: AtomicUsize,
        failures: Vec<usize>,
        kind: ProviderErrorKind,
        dims: usize,
    }

    impl Scripted {
        fn new(failures: Vec<usize>, kind: ProviderErrorKind) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                failures,
                kind,
                dims: DIMS,
            })
        }
    }

    #[async_trait]
    impl EmbeddingProvider for Scripted {
        async fn embed(
            &self,
            texts: &[String],
            _model: &str,
            _dimensions: usize,
            _deadline: Instant,
        ) -> Result<Vec<Vec<f32>>, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.failures.contains(&n) {
                return Err(ProviderError::new(self.kind, format!("call {}", n)));
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32; self.dims]).collect())
        }
    }

    struct Stalled;

    #[async_trait]
    impl EmbeddingProvider for Stalled {
        async fn embed(
            &self,
            _: &[String],
            _: &str,
            _: usize,
            _: Instant,
        ) -> Result<Vec<Vec<f32>>, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("text {}", i)).collect()
    }

    #[tokio::test]
    async fn test_batches_preserve_order() {
        let provider = Scripted::new(vec![], ProviderErrorKind::Transient);
        let embedder = Embedder::new(provider.clone(), config()).unwrap();
        let input = texts(250);
        let vectors = embedder.embed(&input).await.unwrap();
        assert_eq!(vectors.len(), 250);
        assert_eq!(vectors[249][0], input[249].len() as f32);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retried() {
        let provider = Scripted::new(vec![1, 2], ProviderErrorKind::RateLimited);
        let embedder = Embedder::new(provider.clone(), config()).unwrap();
        let vectors = embedder.embed(&texts(3)).await.unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_reports_batch_and_completed() {
        // Batch 2 fails on every attempt.
        let provider = Scripted::new(vec![3, 4, 5], ProviderErrorKind::RateLimited);
        let embedder = Embedder::new(provider.clone(), config()).unwrap();
        let err = embedder.embed(&texts(250)).await.unwrap_err();

        assert_eq!(err.batch_index, 2);
        assert_eq!(err.range, 200..250);
        assert_eq!(err.attempts, 3);
        assert_eq!(err.completed.len(), 200);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let provider = Scripted::new(vec![1], ProviderErrorKind::Permanent);
        let embedder = Embedder::new(provider.clone(), config()).unwrap();
        let err = embedder.embed(&texts(5)).await.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert!(err.completed.is_empty());
        assert!(!err.is_retryable());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let provider = Arc::new(Scripted {
            calls: AtomicUsize::new(0),
            failures: vec![],
            kind: ProviderErrorKind::Transient,
            dims: DIMS + 1,
        });
        let embedder = Embedder::new(provider, config()).unwrap();
        let err = embedder.embed(&texts(2)).await.unwrap_err();
        assert_eq!(err.source.kind, ProviderErrorKind::Permanent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_provider_times_out() {
        let embedder = Embedder::new(Arc::new(Stalled), config()).unwrap();
        let err = embedder.embed(&texts(1)).await.unwrap_err();
        assert_eq!(err.source.kind, ProviderErrorKind::Timeout);
        assert_eq!(err.attempts, 3);
    }

    #[test]
    fn test_backoff_capped() {
        let provider = Scripted::new(vec![], ProviderErrorKind::Transient);
        let embedder = Embedder::new(provider, config()).unwrap();
        let first = embedder.backoff(0);
        assert!(first >= Duration::from_millis(1000));
        assert!(first < Duration::from_millis(2000));
        assert_eq!(embedder.backoff(20), Duration::from_millis(60_000));
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
