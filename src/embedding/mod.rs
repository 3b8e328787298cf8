//! Query encoder abstraction and implementations.
//!
//! This module defines the interface for turning text into vectors in the same
//! space as the catalog's description embeddings, and provides two encoders:
//! a local FastEmbed sentence-transformer and an FNV-1a feature-hashing
//! fallback that needs no model download.
//!
//! The abstraction allows the index build pass and query-time encoding to share
//! one model, which is what keeps nearest-neighbor distances meaningful.

pub mod fastembed;
pub mod hash;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use self::fastembed::FastEmbedProvider;
use self::hash::{HashEmbedder, DEFAULT_HASH_DIMENSION};
use crate::models::EmbeddingConfig;

/// Errors that can occur during encoding.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Invalid input text (e.g., empty or whitespace-only)
    #[error("Invalid input text: {0}")]
    InvalidInput(String),

    /// Model could not be initialized
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Inference backend failed
    #[error("Encoding failed: {0}")]
    Backend(String),
}

/// Result type for embedding operations.
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Trait for text embedding providers.
///
/// Implementors must be deterministic for a fixed model: the same text always
/// yields the same vector. `embed` may block on model inference but must not
/// mutate state visible to other callers, so any number of calls can be in
/// flight concurrently.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text.
    ///
    /// # Errors
    /// Returns `EmbeddingError::InvalidInput` for empty or whitespace-only text
    /// and `EmbeddingError::Backend` if inference fails.
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>>;

    /// Generate embeddings for multiple texts, in input order.
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// Number of dimensions in the produced vectors.
    fn dimension(&self) -> usize;

    /// Identifier of the model (stored with the index it builds).
    fn model_name(&self) -> &str;
}

/// Normalizes text for consistent embedding generation.
///
/// Lowercases, trims, and collapses runs of whitespace to a single space.
///
/// ```
/// use book_recommender::embedding::normalize_text;
/// assert_eq!(normalize_text("  A Dragon's   QUEST "), "a dragon's quest");
/// ```
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run blocking inference on the blocking thread pool.
///
/// Keeps the async worker threads free, so a caller's `tokio::time::timeout`
/// can fire while the model is still computing.
pub async fn run_blocking<T, F>(f: F) -> EmbeddingResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> EmbeddingResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EmbeddingError::Backend(format!("embedding task join error: {}", e)))?
}

/// Encoder families selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EncoderKind {
    /// Local sentence-transformer via FastEmbed
    FastEmbed,
    /// FNV-1a feature hashing, no model download
    Hash,
}

impl EncoderKind {
    /// Infer the family that produced a vector file from its stored model name.
    pub fn detect(model_name: &str) -> Self {
        if HashEmbedder::from_model_name(model_name).is_some() {
            EncoderKind::Hash
        } else {
            EncoderKind::FastEmbed
        }
    }
}

/// Encoders selectable at runtime by the binaries.
pub enum AnyEncoder {
    FastEmbed(FastEmbedProvider),
    Hash(HashEmbedder),
}

impl AnyEncoder {
    /// Create a fresh encoder for an index build.
    ///
    /// `model` names a FastEmbed model for `FastEmbed` and is ignored for
    /// `Hash`, which uses `dimension` (default 384) instead.
    pub fn build(
        kind: EncoderKind,
        model: Option<&str>,
        dimension: Option<usize>,
        cache_dir: Option<PathBuf>,
    ) -> EmbeddingResult<Self> {
        match kind {
            EncoderKind::FastEmbed => {
                let model = match model {
                    Some(name) => Some(FastEmbedProvider::model_from_name(name).ok_or_else(|| {
                        EmbeddingError::ConfigError(format!("Unknown FastEmbed model: {}", name))
                    })?),
                    None => None,
                };
                Ok(AnyEncoder::FastEmbed(FastEmbedProvider::new(model, cache_dir)?))
            }
            EncoderKind::Hash => Ok(AnyEncoder::Hash(HashEmbedder::new(
                dimension.unwrap_or(DEFAULT_HASH_DIMENSION),
            ))),
        }
    }

    /// Create the encoder that matches a stored vector file.
    ///
    /// # Errors
    /// Returns `EmbeddingError::ConfigError` if the stored model is unknown or
    /// does not belong to `kind`.
    pub fn for_store(
        config: &EmbeddingConfig,
        kind: Option<EncoderKind>,
        cache_dir: Option<PathBuf>,
    ) -> EmbeddingResult<Self> {
        let kind = kind.unwrap_or_else(|| EncoderKind::detect(&config.model_name));
        info!(model = %config.model_name, ?kind, "Selecting query encoder");

        match kind {
            EncoderKind::Hash => HashEmbedder::from_model_name(&config.model_name)
                .map(AnyEncoder::Hash)
                .ok_or_else(|| {
                    EmbeddingError::ConfigError(format!(
                        "Vectors were built with '{}', not a hash encoder",
                        config.model_name
                    ))
                }),
            EncoderKind::FastEmbed => {
                Self::build(kind, Some(&config.model_name), None, cache_dir)
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for AnyEncoder {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        match self {
            AnyEncoder::FastEmbed(p) => p.embed(text).await,
            AnyEncoder::Hash(p) => p.embed(text).await,
        }
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        match self {
            AnyEncoder::FastEmbed(p) => p.embed_batch(texts).await,
            AnyEncoder::Hash(p) => p.embed_batch(texts).await,
        }
    }

    fn dimension(&self) -> usize {
        match self {
            AnyEncoder::FastEmbed(p) => p.dimension(),
            AnyEncoder::Hash(p) => p.dimension(),
        }
    }

    fn model_name(&self) -> &str {
        match self {
            AnyEncoder::FastEmbed(p) => p.model_name(),
            AnyEncoder::Hash(p) => p.model_name(),
        }
    }
}

impl std::fmt::Debug for AnyEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnyEncoder::FastEmbed(p) => p.fmt(f),
            AnyEncoder::Hash(p) => p.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("Hello World"), "hello world");
        assert_eq!(normalize_text("  Multiple   Spaces  "), "multiple spaces");
        assert_eq!(normalize_text("tabs\tand\nnewlines"), "tabs and newlines");
        assert_eq!(normalize_text("   "), "");
    }

    #[tokio::test]
    async fn test_any_encoder_dispatches_to_hash() {
        let encoder = AnyEncoder::Hash(HashEmbedder::new(64));
        assert_eq!(encoder.dimension(), 64);
        assert_eq!(encoder.model_name(), "fnv1a-64");

        let v = encoder.embed("a dragon's quest").await.unwrap();
        assert_eq!(v.len(), 64);
        assert!(format!("{:?}", encoder).contains("HashEmbedder"));
    }

    #[test]
    fn test_encoder_for_store() {
        let config = EmbeddingConfig {
            model_name: "fnv1a-32".to_string(),
            dimension: 32,
        };
        assert_eq!(EncoderKind::detect(&config.model_name), EncoderKind::Hash);
        assert_eq!(EncoderKind::detect("AllMiniLML6V2"), EncoderKind::FastEmbed);

        let encoder = AnyEncoder::for_store(&config, None, None).unwrap();
        assert_eq!(encoder.dimension(), 32);

        let fastembed = EmbeddingConfig {
            model_name: "AllMiniLML6V2".to_string(),
            dimension: 384,
        };
        assert!(matches!(
            AnyEncoder::for_store(&fastembed, Some(EncoderKind::Hash), None),
            Err(EmbeddingError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_run_blocking_propagates_result() {
        let value = run_blocking(|| Ok(vec![1.0f32, 2.0])).await.unwrap();
        assert_eq!(value, vec![1.0, 2.0]);

        let err = run_blocking::<Vec<f32>, _>(|| Err(EmbeddingError::Backend("boom".to_string())))
            .await
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::Backend(msg) if msg == "boom"));
    }

    #[test]
    fn test_build_rejects_unknown_model() {
        assert!(matches!(
            AnyEncoder::build(EncoderKind::FastEmbed, Some("no-such-model"), None, None),
            Err(EmbeddingError::ConfigError(_))
        ));
        let hash = AnyEncoder::build(EncoderKind::Hash, None, Some(16), None).unwrap();
        assert_eq!(hash.model_name(), "fnv1a-16");
    }
}
