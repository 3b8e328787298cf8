//! Runtime configuration.
//!
//! Settings come from built-in defaults, optionally overridden by a TOML file,
//! and finally by command-line flags in the binaries.
//!
//! ```toml
//! dataset_path = "data/books_with_emotions.csv"
//! vectors_path = "data/book_vectors.json"
//! final_k = 16
//! candidate_k = 50
//! metric = "cosine"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::engine::{DEFAULT_CANDIDATE_K, DEFAULT_FINAL_K};
use crate::index::Metric;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Recommender settings shared by all binaries.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RecommenderConfig {
    /// CSV dataset with categories and emotion scores
    pub dataset_path: PathBuf,

    /// Precomputed vector file written by `build_index`
    pub vectors_path: PathBuf,

    /// FastEmbed model name; `None` uses the default model
    pub embedding_model: Option<String>,

    /// FastEmbed model cache directory
    pub cache_dir: Option<PathBuf>,

    pub final_k: usize,

    pub candidate_k: usize,

    pub metric: Metric,

    /// Per-request deadline for the service
    pub request_timeout_secs: u64,

    /// Maximum requests the service processes at once
    pub max_concurrent_requests: usize,
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            dataset_path: PathBuf::from("books_with_emotions.csv"),
            vectors_path: PathBuf::from("book_vectors.json"),
            embedding_model: None,
            cache_dir: None,
            final_k: DEFAULT_FINAL_K,
            candidate_k: DEFAULT_CANDIDATE_K,
            metric: Metric::Cosine,
            request_timeout_secs: 30,
            max_concurrent_requests: 100,
        }
    }
}

impl RecommenderConfig {
    /// Read a TOML config file; missing keys keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Reject settings the engine would refuse at request time.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.final_k == 0 {
            return Err(ConfigError::Invalid("final_k must be at least 1".to_string()));
        }
        if self.candidate_k < self.final_k {
            return Err(ConfigError::Invalid(format!(
                "candidate_k ({}) must be at least final_k ({})",
                self.candidate_k, self.final_k
            )));
        }
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
