//! Embedding provider seam.
//!
//! The engine calls the provider only when a caller submits text without a
//! vector; the returned vector's dimension is validated against the
//! collection before intake.

use async_trait::async_trait;

use quiver_core::{CoreError, CoreResult};

/// Text-to-vector conversion, supplied by an external collaborator.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generates an embedding for the given text.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing model rejects the input or is
    /// unavailable.
    async fn embed(&self, text: &str) -> CoreResult<Vec<f32>>;
}

/// Deterministic provider for tests and embedding-free deployments.
///
/// Hashes the input to seed a small LCG, then L2-normalizes, so equal
/// inputs always embed identically without any ML dependency.
pub struct MockEmbeddingProvider {
    dimension: usize,
}

impl MockEmbeddingProvider {
    /// Creates a provider emitting vectors of the given dimension.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    /// The dimension of emitted vectors.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> CoreResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(CoreError::invalid_argument("cannot embed empty text"));
        }

        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut state = hasher.finish();

        let mut embedding = Vec::with_capacity(self.dimension);
        for _ in 0..self.dimension {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let value = ((state >> 16) as f32) / 32768.0 - 1.0;
            embedding.push(value);
        }

        let magnitude = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut embedding {
                *value /= magnitude;
            }
        }
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_provider_is_deterministic() {
        let provider = MockEmbeddingProvider::new(32);
        assert_eq!(provider.dimension(), 32);
        let a = provider.embed("hello world").await.unwrap();
        let b = provider.embed("hello world").await.unwrap();
        let c = provider.embed("something else").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn mock_provider_normalizes() {
        let provider = MockEmbeddingProvider::new(64);
        let embedding = provider.embed("normalize me").await.unwrap();
        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn mock_provider_rejects_empty_text() {
        let provider = MockEmbeddingProvider::new(8);
        assert!(provider.embed("   ").await.is_err());
    }
}
