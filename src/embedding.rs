//! Embedding provider seam
//!
//! The store never talks to a model directly; callers inject an
//! [`EmbeddingProvider`] and the store uses it to embed semantic search
//! queries. Entity vectors arrive pre-computed through the write API, so a
//! store without a provider still works for everything except query
//! embedding.

use async_trait::async_trait;

use crate::error::Result;

/// Source of embedding vectors
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed multiple texts
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Dimensionality of produced vectors
    fn dimension(&self) -> usize;
}

#[cfg(test)]
pub(crate) mod stub {
    use super::*;

    /// Deterministic provider for tests: same text, same vector.
    pub struct HashEmbedder {
        pub dimension: usize,
    }

    impl HashEmbedder {
        pub fn new(dimension: usize) -> Self {
            Self { dimension }
        }

        pub fn vector_for(&self, text: &str) -> Vec<f32> {
            let mut state: u64 = 0xcbf2_9ce4_8422_2325;
            for byte in text.bytes() {
                state ^= u64::from(byte);
                state = state.wrapping_mul(0x0100_0000_01b3);
            }
            (0..self.dimension)
                .map(|i| {
                    let mut x = state.wrapping_add(i as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
                    x ^= x >> 31;
                    // Map to [-1, 1]
                    (x as f64 / u64::MAX as f64 * 2.0 - 1.0) as f32
                })
                .collect()
        }
    }

    #[async_trait]
    impl EmbeddingProvider for HashEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(self.vector_for(text))
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }
}
