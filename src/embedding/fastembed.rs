//! FastEmbed query encoder.
//!
//! Runs a sentence-transformer locally through ONNX Runtime. The default model,
//! `AllMiniLML6V2`, is the `all-MiniLM-L6-v2` model the catalog descriptions
//! were embedded with (384 dimensions).

use super::{run_blocking, EmbeddingError, EmbeddingProvider, EmbeddingResult};
use ::fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Models this encoder knows the dimensionality of.
const KNOWN_MODELS: [(EmbeddingModel, usize); 8] = [
    (EmbeddingModel::AllMiniLML6V2, 384),
    (EmbeddingModel::BGESmallENV15, 384),
    (EmbeddingModel::BGEBaseENV15, 768),
    (EmbeddingModel::BGELargeENV15, 1024),
    (EmbeddingModel::NomicEmbedTextV1, 768),
    (EmbeddingModel::NomicEmbedTextV15, 768),
    (EmbeddingModel::ParaphraseMLMiniLML12V2, 384),
    (EmbeddingModel::ParaphraseMLMpnetBaseV2, 768),
];

/// FastEmbed-backed encoder.
#[derive(Clone)]
pub struct FastEmbedProvider {
    /// Shared model instance; inference is serialized through the lock and
    /// runs on the blocking pool
    model: Arc<Mutex<TextEmbedding>>,

    model_name: String,

    embedding_dimension: usize,
}

impl FastEmbedProvider {
    /// Create a new FastEmbed encoder.
    ///
    /// # Arguments
    /// * `model` - Optional model to use (defaults to AllMiniLML6V2)
    /// * `cache_dir` - Optional cache directory for downloaded model files
    ///
    /// # Errors
    /// Returns `EmbeddingError::ConfigError` if model initialization fails
    pub fn new(model: Option<EmbeddingModel>, cache_dir: Option<PathBuf>) -> EmbeddingResult<Self> {
        let model_type = model.unwrap_or(EmbeddingModel::AllMiniLML6V2);
        let model_name = format!("{:?}", model_type);
        let embedding_dimension = Self::dimension_of(&model_type);

        let mut init_options = InitOptions::new(model_type);
        if let Some(dir) = cache_dir {
            debug!("Using FastEmbed cache directory {}", dir.display());
            init_options = init_options.with_cache_dir(dir);
        }

        let text_embedding = TextEmbedding::try_new(init_options).map_err(|e| {
            EmbeddingError::ConfigError(format!("Failed to initialize FastEmbed model: {}", e))
        })?;

        Ok(Self {
            model: Arc::new(Mutex::new(text_embedding)),
            model_name,
            embedding_dimension,
        })
    }

    /// Resolve a model from its name as stored in an index (e.g. "AllMiniLML6V2").
    pub fn model_from_name(name: &str) -> Option<EmbeddingModel> {
        KNOWN_MODELS
            .iter()
            .map(|(model, _)| model.clone())
            .find(|model| format!("{:?}", model).eq_ignore_ascii_case(name.trim()))
    }

    /// Run the model off the async worker threads.
    async fn infer(&self, texts: Vec<String>) -> EmbeddingResult<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        run_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| EmbeddingError::Backend("FastEmbed model lock poisoned".to_string()))?;
            model
                .embed(texts, None)
                .map_err(|e| EmbeddingError::Backend(format!("Embedding generation failed: {}", e)))
        })
        .await
    }

    fn dimension_of(model: &EmbeddingModel) -> usize {
        KNOWN_MODELS
            .iter()
            .find(|(known, _)| known == model)
            .map(|(_, dim)| *dim)
            .unwrap_or(384)
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Text cannot be empty".to_string()));
        }

        let embeddings = self.infer(vec![text.to_string()]).await?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Backend("No embedding generated".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        if texts.iter().any(|text| text.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput("All texts must be non-empty".to_string()));
        }

        let text_strings: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();
        self.infer(text_strings).await
    }

    fn dimension(&self) -> usize {
        self.embedding_dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

// TextEmbedding does not implement Debug
impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("model_name", &self.model_name)
            .field("embedding_dimension", &self.embedding_dimension)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_from_name() {
        assert_eq!(
            FastEmbedProvider::model_from_name("AllMiniLML6V2"),
            Some(EmbeddingModel::AllMiniLML6V2)
        );
        assert_eq!(
            FastEmbedProvider::model_from_name("bgebaseenv15"),
            Some(EmbeddingModel::BGEBaseENV15)
        );
        assert_eq!(FastEmbedProvider::model_from_name("word2vec"), None);
    }

    #[test]
    fn test_dimension_of_known_models() {
        let default = FastEmbedProvider::model_from_name(crate::DEFAULT_EMBEDDING_MODEL).unwrap();
        assert_eq!(
            FastEmbedProvider::dimension_of(&default),
            crate::DEFAULT_EMBEDDING_DIMENSION
        );
        assert_eq!(FastEmbedProvider::dimension_of(&EmbeddingModel::BGELargeENV15), 1024);
    }

    // The tests below download model weights on first run.

    #[tokio::test]
    #[ignore = "downloads the AllMiniLM-L6-v2 model"]
    async fn test_embed_is_deterministic() {
        let provider = FastEmbedProvider::new(None, None).expect("model should load");
        assert_eq!(provider.dimension(), 384);
        assert!(provider.model_name().contains("AllMiniLML6V2"));

        let first = provider.embed("a dragon's quest").await.unwrap();
        let second = provider.embed("a dragon's quest").await.unwrap();
        assert_eq!(first.len(), 384);
        assert_eq!(first, second);
    }

    #[tokio::test]
    #[ignore = "downloads the AllMiniLM-L6-v2 model"]
    async fn test_embed_rejects_blank_text() {
        let provider = FastEmbedProvider::new(None, None).expect("model should load");

        assert!(matches!(
            provider.embed("   \n\t  ").await,
            Err(EmbeddingError::InvalidInput(_))
        ));
        assert!(matches!(
            provider.embed_batch(&["valid", ""]).await,
            Err(EmbeddingError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    #[ignore = "downloads the AllMiniLM-L6-v2 model"]
    async fn test_batch_matches_single() {
        let provider = FastEmbedProvider::new(None, None).expect("model should load");
        let single = provider.embed("history of dragons").await.unwrap();
        let batch = provider.embed_batch(&["history of dragons"]).await.unwrap();
        assert_eq!(single, batch[0]);
    }
}
