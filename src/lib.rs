//! Book Recommender - semantic book recommendations from a free-text description.
//!
//! A reader describes the book they want ("a story about forgiveness"), picks
//! an optional category and an optional emotional tone, and gets back an
//! ordered list of books whose descriptions are semantically closest, filtered
//! to the category and re-ranked by the tone.
//!
//! # Architecture
//!
//! - **models**: Core data structures (BookRecord, EmotionScores, Tone, Recommendation)
//! - **catalog**: CSV dataset loading and validation, lookup by ISBN-13
//! - **embedding**: Query encoders (FastEmbed, FNV-1a hashing) and text normalization
//! - **index**: Exact nearest-neighbor index and the on-disk vector file
//! - **engine**: Candidate retrieval, category filter, tone re-ranking
//! - **config**: TOML configuration shared by the binaries
//! - **server**: Line-delimited JSON service over stdio
//!
//! # Workflow
//!
//! ## Offline build (`build_index`)
//!
//! 1. Load and validate the book dataset
//! 2. Embed every description with the chosen encoder
//! 3. Write the vectors together with the model name and dimension
//!
//! ## Online recommendation (`recommend`, `serve`)
//!
//! 1. Load the dataset and vectors; check the encoder matches the vectors
//! 2. Embed the query and fetch `candidate_k` nearest books
//! 3. Keep the requested category, then stable-sort by the requested emotion
//! 4. Return the first `final_k`
//!
//! # Example
//!
//! ```rust,no_run
//! use book_recommender::{config::RecommenderConfig, RecommendQuery, RecommendationEngine};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = RecommendationEngine::from_config(&RecommenderConfig::default(), None)?;
//! let query = RecommendQuery::new("a story about forgiveness").with_category("Fiction");
//!
//! for rec in engine.recommend(&query).await? {
//!     println!("{}", rec.book.caption());
//! }
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod index;
pub mod models;
pub mod server;

pub use catalog::Catalog;
pub use embedding::EmbeddingProvider;
pub use engine::{RecommendQuery, RecommendationEngine};
pub use index::FlatIndex;
pub use models::{BookRecord, Emotion, EmotionScores, Recommendation, RelevanceLevel, Tone};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default FastEmbed model name
pub const DEFAULT_EMBEDDING_MODEL: &str = "AllMiniLML6V2";

/// Default embedding dimension for AllMiniLML6V2
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;
