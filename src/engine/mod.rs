//! Recommendation engine.
//!
//! Turns a free-text description into an ordered list of books:
//!
//! 1. reject blank queries
//! 2. encode the query with the same model the index was built with
//! 3. fetch a broad candidate set (`candidate_k`) from the index
//! 4. resolve candidates against the catalog, silently dropping stale ids
//! 5. keep only the requested category, preserving similarity order
//! 6. if a tone was requested, stable-sort by that emotion score descending
//! 7. truncate to `final_k`
//!
//! Category and tone are hard constraints the embedding space does not encode,
//! so they are applied after a deliberately oversized similarity pass rather
//! than folded into the vector search.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use book_recommender::catalog::Catalog;
//! use book_recommender::embedding::hash::HashEmbedder;
//! use book_recommender::engine::{RecommendQuery, RecommendationEngine};
//! use book_recommender::index::{embed_catalog, Metric};
//! use book_recommender::models::Emotion;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = Catalog::load("books_with_emotions.csv")?;
//! let encoder = HashEmbedder::default();
//! let index = embed_catalog(&encoder, &catalog, 64, |_| {})
//!     .await?
//!     .into_index(Metric::Cosine)?;
//!
//! let engine = RecommendationEngine::new(encoder, Arc::new(catalog), Arc::new(index))?;
//! let query = RecommendQuery::new("a dark story about revenge and justice")
//!     .with_category("Fiction")
//!     .with_tone(Emotion::Fear);
//!
//! for rec in engine.recommend(&query).await? {
//!     println!("{} ({:.3})", rec.book.title, rec.score);
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::catalog::{Catalog, CatalogError};
use crate::config::RecommenderConfig;
use crate::embedding::{normalize_text, AnyEncoder, EmbeddingError, EmbeddingProvider, EncoderKind};
use crate::index::{EmbeddingStore, FlatIndex, IndexError};
use crate::models::{parse_category_filter, Emotion, Recommendation};

/// Default number of recommendations returned.
pub const DEFAULT_FINAL_K: usize = 16;

/// Default size of the similarity candidate set.
pub const DEFAULT_CANDIDATE_K: usize = 50;

/// Errors that can occur while producing recommendations.
#[derive(Debug, Error)]
pub enum RecommendError {
    /// Caller misuse: blank query, zero or inconsistent k
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The query encoder failed
    #[error("Encoding error: {0}")]
    Encoding(#[from] EmbeddingError),

    /// The index rejected the search
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// The book dataset could not be loaded
    #[error("Dataset error: {0}")]
    Dataset(#[from] CatalogError),

    /// The caller-supplied deadline expired during encode and search
    #[error("Deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// Encoder and index are incompatible
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type for recommendation operations.
pub type RecommendResult<T> = Result<T, RecommendError>;

/// Parameters of a single recommendation request.
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendQuery {
    /// Natural-language description of the desired book
    pub query: String,

    /// Exact category label to keep; `None` keeps every category
    pub category: Option<String>,

    /// Emotion to rank by; `None` keeps pure similarity order
    pub tone: Option<Emotion>,

    /// Maximum number of books returned
    pub final_k: usize,

    /// Number of similarity candidates fetched before filtering
    pub candidate_k: usize,
}

impl RecommendQuery {
    /// Create a query with no filters and the default result sizes.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            category: None,
            tone: None,
            final_k: DEFAULT_FINAL_K,
            candidate_k: DEFAULT_CANDIDATE_K,
        }
    }

    /// Restrict results to a category; "All" clears the filter.
    pub fn with_category(mut self, category: impl AsRef<str>) -> Self {
        self.category = parse_category_filter(category.as_ref());
        self
    }

    pub fn with_tone(mut self, tone: impl Into<Option<Emotion>>) -> Self {
        self.tone = tone.into();
        self
    }

    pub fn with_final_k(mut self, final_k: usize) -> Self {
        self.final_k = final_k;
        self
    }

    pub fn with_candidate_k(mut self, candidate_k: usize) -> Self {
        self.candidate_k = candidate_k;
        self
    }

    /// Check the query text and result sizes.
    ///
    /// # Errors
    /// Returns `RecommendError::InvalidArgument` for a blank query,
    /// `final_k == 0`, or `candidate_k < final_k`.
    pub fn validate(&self) -> RecommendResult<()> {
        if self.query.trim().is_empty() {
            return Err(RecommendError::InvalidArgument("query must not be empty".to_string()));
        }
        if self.final_k == 0 {
            return Err(RecommendError::InvalidArgument("final_k must be at least 1".to_string()));
        }
        if self.candidate_k < self.final_k {
            return Err(RecommendError::InvalidArgument(format!(
                "candidate_k ({}) must be at least final_k ({})",
                self.candidate_k, self.final_k
            )));
        }
        Ok(())
    }
}

/// Stateless recommendation engine over a shared catalog and index.
///
/// Cloning is cheap; every clone reads the same immutable catalog and index,
/// so requests can run concurrently on separate tasks without locking.
pub struct RecommendationEngine<E: EmbeddingProvider> {
    encoder: Arc<E>,
    catalog: Arc<Catalog>,
    index: Arc<FlatIndex>,
}

impl<E: EmbeddingProvider> Clone for RecommendationEngine<E> {
    fn clone(&self) -> Self {
        Self {
            encoder: Arc::clone(&self.encoder),
            catalog: Arc::clone(&self.catalog),
            index: Arc::clone(&self.index),
        }
    }
}

impl<E: EmbeddingProvider> RecommendationEngine<E> {
    /// Create an engine.
    ///
    /// # Errors
    /// Returns `RecommendError::Configuration` if the encoder's dimensionality
    /// differs from the index's.
    pub fn new(encoder: E, catalog: Arc<Catalog>, index: Arc<FlatIndex>) -> RecommendResult<Self> {
        if encoder.dimension() != index.dimension() {
            return Err(RecommendError::Configuration(format!(
                "encoder '{}' produces {} dimensions but the index holds {}",
                encoder.model_name(),
                encoder.dimension(),
                index.dimension()
            )));
        }

        let stale = index
            .ids()
            .iter()
            .filter(|id| catalog.lookup(id).is_none())
            .count();
        if stale > 0 {
            debug!(stale, "Index references books missing from the catalog");
        }

        Ok(Self {
            encoder: Arc::new(encoder),
            catalog,
            index,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Produce recommendations for `query`.
    ///
    /// Fewer than `final_k` results (including none) is a valid outcome when
    /// filtering leaves too few candidates.
    ///
    /// # Errors
    /// Returns `RecommendError::InvalidArgument` for invalid parameters and
    /// `RecommendError::Encoding` if the encoder fails; no partial results
    /// are returned.
    pub async fn recommend(&self, query: &RecommendQuery) -> RecommendResult<Vec<Recommendation>> {
        query.validate()?;

        let vector = self.encoder.embed(&normalize_text(&query.query)).await?;
        self.rank(query, &vector)
    }

    /// Like [`recommend`](Self::recommend), but fails with
    /// `RecommendError::DeadlineExceeded` if encoding and search do not finish
    /// within `deadline`.
    pub async fn recommend_with_deadline(
        &self,
        query: &RecommendQuery,
        deadline: Duration,
    ) -> RecommendResult<Vec<Recommendation>> {
        tokio::time::timeout(deadline, self.recommend(query))
            .await
            .map_err(|_| RecommendError::DeadlineExceeded(deadline))?
    }

    fn rank(&self, query: &RecommendQuery, vector: &[f32]) -> RecommendResult<Vec<Recommendation>> {
        let neighbors = self.index.search(vector, query.candidate_k)?;
        let candidate_count = neighbors.len();
        let metric = self.index.metric();

        let mut results: Vec<Recommendation> = neighbors
            .into_iter()
            .filter_map(|hit| {
                self.catalog.lookup(hit.isbn13).map(|book| (book, hit.distance))
            })
            .filter(|(book, _)| match &query.category {
                Some(category) => &book.category == category,
                None => true,
            })
            .map(|(book, distance)| {
                Recommendation::new(book.clone(), distance, metric.similarity(distance))
            })
            .collect();

        let filtered_count = results.len();

        if let Some(emotion) = query.tone {
            // sort_by is stable: equal scores keep similarity order
            results.sort_by(|a, b| {
                b.book
                    .emotion_scores
                    .get(emotion)
                    .total_cmp(&a.book.emotion_scores.get(emotion))
            });
        }

        results.truncate(query.final_k);

        debug!(
            candidates = candidate_count,
            after_filter = filtered_count,
            returned = results.len(),
            category = ?query.category,
            tone = ?query.tone,
            "Ranked recommendations"
        );

        Ok(results)
    }
}

impl RecommendationEngine<AnyEncoder> {
    /// Load the catalog and vector file named by `config` and pair them with
    /// the encoder that built the vectors.
    ///
    /// `kind` forces an encoder family; `None` infers it from the vector file.
    ///
    /// # Errors
    /// Returns `RecommendError::Dataset` if the dataset cannot be loaded,
    /// `RecommendError::Index` if the vector file is unreadable or was built
    /// by a different model, and `RecommendError::Encoding` if the encoder
    /// cannot be created.
    pub fn from_config(config: &RecommenderConfig, kind: Option<EncoderKind>) -> RecommendResult<Self> {
        let catalog = Catalog::load(&config.dataset_path)?;
        let store = EmbeddingStore::load(&config.vectors_path)?;

        let encoder = AnyEncoder::for_store(&store.config, kind, config.cache_dir.clone())?;
        store.check_encoder(&encoder)?;

        let index = store.into_index(config.metric)?;
        info!(
            books = catalog.len(),
            vectors = index.len(),
            model = %encoder.model_name(),
            metric = %index.metric(),
            "Recommendation engine ready"
        );
        Self::new(encoder, Arc::new(catalog), Arc::new(index))
    }
}
