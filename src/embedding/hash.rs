//! FNV-1a feature-hashing encoder.
//!
//! Each lowercase alphanumeric token is hashed into one of `dimension` buckets,
//! with the sign taken from a high hash bit, and the result is L2-normalized.
//! It captures lexical overlap only, but it is deterministic, needs no model
//! files, and runs anywhere.

use super::{normalize_text, EmbeddingError, EmbeddingProvider, EmbeddingResult};
use async_trait::async_trait;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Default output dimension, matching the MiniLM models.
pub const DEFAULT_HASH_DIMENSION: usize = crate::DEFAULT_EMBEDDING_DIMENSION;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    model_name: String,
}

impl HashEmbedder {
    /// Create an encoder producing `dimension`-length vectors (minimum 1).
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            model_name: format!("fnv1a-{}", dimension),
        }
    }

    /// Rebuild an encoder from a stored model name such as `fnv1a-384`.
    pub fn from_model_name(name: &str) -> Option<Self> {
        let dimension = name.trim().strip_prefix("fnv1a-")?.parse::<usize>().ok()?;
        (dimension > 0).then(|| Self::new(dimension))
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let normalized = normalize_text(text);

        for token in normalized
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Text cannot be empty".to_string()));
        }
        Ok(self.encode(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.iter().any(|text| text.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput("All texts must be non-empty".to_string()));
        }
        Ok(texts.iter().map(|text| self.encode(text)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_model_name() {
        let encoder = HashEmbedder::from_model_name("fnv1a-128").unwrap();
        assert_eq!(encoder.dimension(), 128);
        assert!(HashEmbedder::from_model_name("fnv1a-0").is_none());
        assert!(HashEmbedder::from_model_name("AllMiniLML6V2").is_none());
    }

    #[test]
    fn test_fnv1a_reference_values() {
        assert_eq!(fnv1a(b""), FNV_OFFSET_BASIS);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[tokio::test]
    async fn test_embed_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("A dragon's quest").await.unwrap();
        let b = embedder.embed("a   DRAGON'S quest").await.unwrap();

        assert_eq!(a.len(), DEFAULT_HASH_DIMENSION);
        assert_eq!(a, b);

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_embed_rejects_blank_text() {
        let embedder = HashEmbedder::new(16);
        assert!(matches!(
            embedder.embed(" \t\n").await,
            Err(EmbeddingError::InvalidInput(_))
        ));
        assert!(embedder.embed_batch(&["ok", ""]).await.is_err());
    }

    #[tokio::test]
    async fn test_punctuation_only_yields_zero_vector() {
        let embedder = HashEmbedder::new(16);
        let v = embedder.embed("?!").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_batch_matches_single() {
        let embedder = HashEmbedder::new(32);
        let batch = embedder
            .embed_batch(&["knight's quest", "history of dragons"])
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1], embedder.embed("history of dragons").await.unwrap());
    }

    #[test]
    fn test_dimension_floor() {
        assert_eq!(HashEmbedder::new(0).dimension(), 1);
    }
}
