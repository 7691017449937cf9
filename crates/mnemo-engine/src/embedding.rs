//! Embeddings and the embedding gateway
//!
//! Text is converted to fixed-length vectors by an [`EmbeddingProvider`].
//! The [`EmbeddingGateway`] wraps a provider with bounded retries and a
//! deterministic hash-vector fallback so the transfer pipeline never
//! blocks on embedding unavailability.

use crate::error::{MemoryError, MemoryResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A dense float vector with provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    /// The vector components
    pub vector: Vec<f32>,

    /// Dimensionality of the vector
    pub dimensions: usize,

    /// Model that produced the vector
    pub model: String,
}

impl Embedding {
    /// Create an embedding from a vector
    pub fn new(vector: Vec<f32>, model: impl Into<String>) -> Self {
        let dimensions = vector.len();
        Self {
            vector,
            dimensions,
            model: model.into(),
        }
    }

    /// Cosine similarity against another embedding
    ///
    /// Dimensions must agree; a mismatch is a hard error, never a
    /// silently-degenerate score.
    pub fn cosine_similarity(&self, other: &Embedding) -> MemoryResult<f32> {
        if self.dimensions != other.dimensions {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dimensions,
                actual: other.dimensions,
            });
        }

        let dot: f32 = self
            .vector
            .iter()
            .zip(other.vector.iter())
            .map(|(a, b)| a * b)
            .sum();

        let norm_a: f32 = self.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = other.vector.iter().map(|x| x * x).sum::<f32>().sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            return Ok(0.0);
        }

        Ok(dot / (norm_a * norm_b))
    }
}

/// Backend capable of turning text into embeddings
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for the given text
    async fn embed(&self, text: &str) -> MemoryResult<Embedding>;

    /// Name of the underlying model
    fn model_name(&self) -> &str;

    /// Output dimensionality
    fn dimensions(&self) -> usize;
}

/// Deterministic content-hash embeddings
///
/// Derives each component from a seeded hash of the input, so identical
/// text always maps to an identical vector. Used as the gateway fallback
/// and in tests; not a semantic model.
pub struct HashEmbeddingProvider {
    dimensions: usize,
}

impl HashEmbeddingProvider {
    /// Create a hash provider with the given dimensionality
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn hash_embed(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut vector = vec![0.0; self.dimensions];

        for (i, slot) in vector.iter_mut().enumerate() {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);

            let hash = hasher.finish();
            // Normalize to [-1, 1]
            *slot = ((hash as f32) / (u64::MAX as f32)) * 2.0 - 1.0;
        }

        vector
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed(&self, text: &str) -> MemoryResult<Embedding> {
        Ok(Embedding::new(self.hash_embed(text), "hash"))
    }

    fn model_name(&self) -> &str {
        "hash-embedding"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Retry policy for the gateway
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts before falling back
    pub max_attempts: u32,

    /// Initial backoff delay
    pub initial_delay: Duration,

    /// Multiplier applied per attempt
    pub multiplier: f64,

    /// Cap on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Jittered delay for the given zero-based attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);
        let jitter = rand::random::<f64>() * 0.3 + 0.85; // 85%..115%
        Duration::from_millis((capped * jitter) as u64)
    }
}

/// Provider wrapper with bounded retries and a deterministic fallback
///
/// On repeated provider failure the gateway degrades to a content-hash
/// vector of the provider's dimensionality instead of failing the caller.
pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    fallback: HashEmbeddingProvider,
    policy: RetryPolicy,
}

impl EmbeddingGateway {
    /// Wrap a provider with the default retry policy
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        let fallback = HashEmbeddingProvider::new(provider.dimensions());
        Self {
            provider,
            fallback,
            policy: RetryPolicy::default(),
        }
    }

    /// Wrap a provider with a custom retry policy
    pub fn with_policy(provider: Arc<dyn EmbeddingProvider>, policy: RetryPolicy) -> Self {
        let fallback = HashEmbeddingProvider::new(provider.dimensions());
        Self {
            provider,
            fallback,
            policy,
        }
    }

    /// Output dimensionality (shared by provider and fallback)
    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Embed text, retrying transient failures and degrading to the
    /// deterministic fallback when the provider stays unavailable
    pub async fn embed(&self, text: &str) -> MemoryResult<Embedding> {
        let mut last_error = None;

        for attempt in 0..self.policy.max_attempts {
            match self.provider.embed(text).await {
                Ok(embedding) => {
                    if embedding.dimensions != self.provider.dimensions() {
                        return Err(MemoryError::DimensionMismatch {
                            expected: self.provider.dimensions(),
                            actual: embedding.dimensions,
                        });
                    }
                    return Ok(embedding);
                }
                Err(err) if err.is_transient() => {
                    let delay = self.policy.delay_for(attempt);
                    debug!(
                        attempt = attempt + 1,
                        max = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "embedding attempt failed, backing off"
                    );
                    last_error = Some(err);
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }

        warn!(
            model = self.provider.model_name(),
            error = %last_error
                .unwrap_or(MemoryError::EmbeddingUnavailable {
                    reason: "exhausted retries".to_string(),
                }),
            "embedding provider unavailable, using deterministic fallback vector"
        );
        self.fallback.embed(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_cosine_similarity() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0], "test");
        let b = Embedding::new(vec![1.0, 0.0, 0.0], "test");
        let c = Embedding::new(vec![0.0, 1.0, 0.0], "test");

        assert!((a.cosine_similarity(&b).unwrap() - 1.0).abs() < 1e-6);
        assert!(a.cosine_similarity(&c).unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_dimension_mismatch() {
        let a = Embedding::new(vec![1.0, 0.0], "test");
        let b = Embedding::new(vec![1.0, 0.0, 0.0], "test");

        assert!(matches!(
            a.cosine_similarity(&b),
            Err(MemoryError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = Embedding::new(vec![0.0, 0.0], "test");
        let b = Embedding::new(vec![1.0, 1.0], "test");
        assert_eq!(a.cosine_similarity(&b).unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_hash_provider_is_deterministic() {
        let provider = HashEmbeddingProvider::new(64);

        let a = provider.embed("same text").await.unwrap();
        let b = provider.embed("same text").await.unwrap();
        let c = provider.embed("other text").await.unwrap();

        assert_eq!(a.dimensions, 64);
        assert_eq!(a.vector, b.vector);
        assert!((a.cosine_similarity(&c).unwrap() - 1.0).abs() > 1e-3);
    }

    /// Provider that fails a configurable number of times before succeeding
    struct FlakyProvider {
        failures: AtomicU32,
        dimensions: usize,
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for FlakyProvider {
        async fn embed(&self, text: &str) -> MemoryResult<Embedding> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n > 0 {
                    Some(n - 1)
                } else {
                    None
                }
            }).is_ok()
            {
                return Err(MemoryError::EmbeddingUnavailable {
                    reason: "simulated outage".to_string(),
                });
            }
            HashEmbeddingProvider::new(self.dimensions).embed(text).await
        }

        fn model_name(&self) -> &str {
            "flaky"
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            multiplier: 1.0,
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_gateway_retries_transient_failures() {
        let provider = Arc::new(FlakyProvider {
            failures: AtomicU32::new(2),
            dimensions: 16,
        });
        let gateway = EmbeddingGateway::with_policy(provider, fast_policy());

        let embedding = gateway.embed("hello").await.unwrap();
        assert_eq!(embedding.dimensions, 16);
        assert_eq!(embedding.model, "hash");
    }

    #[tokio::test]
    async fn test_gateway_falls_back_when_provider_stays_down() {
        let provider = Arc::new(FlakyProvider {
            failures: AtomicU32::new(u32::MAX),
            dimensions: 16,
        });
        let gateway = EmbeddingGateway::with_policy(provider, fast_policy());

        // Fallback is deterministic: same text, same vector
        let a = gateway.embed("offline").await.unwrap();
        let b = gateway.embed("offline").await.unwrap();
        assert_eq!(a.vector, b.vector);
        assert_eq!(a.dimensions, 16);
    }
}
