//! Nearest-neighbor index over description embeddings.
//!
//! The index is built exactly once from a sequence of [`EmbeddingEntry`]s and
//! is read-only afterwards, so it can be shared across concurrent requests
//! without locking. Search is an exact scan: for catalogs of this size it is
//! fast enough, and it makes tie-breaking fully deterministic (equal distances
//! resolve by insertion position).

pub mod store;

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub use store::{embed_catalog, EmbeddingStore};

/// Errors that can occur while building, loading or querying the index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The index could not be built from the given entries
    #[error("Index build failed: {0}")]
    Build(String),

    /// Vectors disagree on dimensionality
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Caller misuse (e.g., k = 0)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Vector file could not be read or written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Vector file is malformed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// A book identifier paired with its description embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingEntry {
    pub isbn13: String,
    pub vector: Vec<f32>,
}

impl EmbeddingEntry {
    pub fn new(isbn13: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            isbn13: isbn13.into(),
            vector,
        }
    }
}

/// Distance metric, fixed when the index is built.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// `1 - cos(a, b)`; zero-norm vectors have similarity 0
    #[default]
    Cosine,
    /// Euclidean distance
    L2,
}

impl Metric {
    /// Convert a distance under this metric into a similarity score.
    ///
    /// Cosine yields the cosine similarity itself; L2 maps to `1 / (1 + d)`.
    pub fn similarity(&self, distance: f32) -> f32 {
        match self {
            Metric::Cosine => 1.0 - distance,
            Metric::L2 => 1.0 / (1.0 + distance),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Cosine => f.write_str("cosine"),
            Metric::L2 => f.write_str("l2"),
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            "l2" | "euclidean" => Ok(Metric::L2),
            other => Err(format!("unknown metric '{}', expected cosine or l2", other)),
        }
    }
}

/// Euclidean distance between two vectors of equal length.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// One search hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor<'a> {
    pub isbn13: &'a str,
    pub distance: f32,
}

/// Exact (flat) nearest-neighbor index.
///
/// Vectors are stored contiguously; position `i` always maps back to the
/// `i`-th entry given to [`FlatIndex::build`].
#[derive(Debug, Clone)]
pub struct FlatIndex {
    ids: Vec<String>,
    vectors: Vec<f32>,
    norms: Vec<f32>,
    dimension: usize,
    metric: Metric,
}

impl FlatIndex {
    /// Build an index from embedding entries.
    ///
    /// # Errors
    /// Returns `IndexError::Build` if `entries` is empty, a vector is empty or
    /// an `isbn13` repeats, and `IndexError::DimensionMismatch` if vectors
    /// differ in length.
    pub fn build(entries: Vec<EmbeddingEntry>, metric: Metric) -> IndexResult<Self> {
        let dimension = match entries.first() {
            Some(first) => first.vector.len(),
            None => return Err(IndexError::Build("no embedding entries".to_string())),
        };
        if dimension == 0 {
            return Err(IndexError::Build("embedding vectors are empty".to_string()));
        }

        let mut ids = Vec::with_capacity(entries.len());
        let mut vectors = Vec::with_capacity(entries.len() * dimension);
        let mut norms = Vec::with_capacity(entries.len());
        let mut seen = HashSet::with_capacity(entries.len());

        for entry in entries {
            if entry.vector.len() != dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: dimension,
                    got: entry.vector.len(),
                });
            }
            if !seen.insert(entry.isbn13.clone()) {
                return Err(IndexError::Build(format!(
                    "duplicate embedding entry for isbn13 {}",
                    entry.isbn13
                )));
            }
            norms.push(norm(&entry.vector));
            vectors.extend_from_slice(&entry.vector);
            ids.push(entry.isbn13);
        }

        info!(
            entries = ids.len(),
            dimension,
            %metric,
            "Built embedding index"
        );

        Ok(Self {
            ids,
            vectors,
            norms,
            dimension,
            metric,
        })
    }

    /// Return up to `k` nearest entries, most similar first.
    ///
    /// Equal distances are ordered by insertion position.
    ///
    /// # Errors
    /// Returns `IndexError::InvalidArgument` if `k` is 0 and
    /// `IndexError::DimensionMismatch` if the query has the wrong length.
    pub fn search(&self, query: &[f32], k: usize) -> IndexResult<Vec<Neighbor<'_>>> {
        if k == 0 {
            return Err(IndexError::InvalidArgument("k must be at least 1".to_string()));
        }
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                got: query.len(),
            });
        }

        let query_norm = norm(query);
        let mut scored: Vec<(usize, f32)> = (0..self.ids.len())
            .map(|pos| (pos, self.distance_at(pos, query, query_norm)))
            .collect();

        let by_distance_then_position =
            |a: &(usize, f32), b: &(usize, f32)| -> Ordering {
                a.1.total_cmp(&b.1).then(a.0.cmp(&b.0))
            };

        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_distance_then_position);
            scored.truncate(k);
        }
        scored.sort_unstable_by(by_distance_then_position);

        Ok(scored
            .into_iter()
            .map(|(pos, distance)| Neighbor {
                isbn13: &self.ids[pos],
                distance,
            })
            .collect())
    }

    fn distance_at(&self, pos: usize, query: &[f32], query_norm: f32) -> f32 {
        let start = pos * self.dimension;
        let stored = &self.vectors[start..start + self.dimension];

        match self.metric {
            Metric::Cosine => {
                let denom = self.norms[pos] * query_norm;
                if denom == 0.0 {
                    return 1.0;
                }
                let dot: f32 = stored.iter().zip(query).map(|(x, y)| x * y).sum();
                1.0 - dot / denom
            }
            Metric::L2 => l2_distance(stored, query),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Identifiers in insertion order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, v: &[f32]) -> EmbeddingEntry {
        EmbeddingEntry::new(id, v.to_vec())
    }

    fn ids<'a>(hits: &[Neighbor<'a>]) -> Vec<&'a str> {
        hits.iter().map(|h| h.isbn13).collect()
    }

    #[test]
    fn test_build_rejects_empty_and_ragged() {
        assert!(matches!(
            FlatIndex::build(vec![], Metric::Cosine),
            Err(IndexError::Build(_))
        ));
        assert!(matches!(
            FlatIndex::build(vec![entry("1", &[])], Metric::Cosine),
            Err(IndexError::Build(_))
        ));
        assert!(matches!(
            FlatIndex::build(
                vec![entry("1", &[1.0, 0.0]), entry("2", &[1.0, 0.0, 0.0])],
                Metric::Cosine
            ),
            Err(IndexError::DimensionMismatch { expected: 2, got: 3 })
        ));
    }

    #[test]
    fn test_build_rejects_repeated_isbn() {
        let result = FlatIndex::build(
            vec![
                entry("1", &[1.0, 0.0]),
                entry("1", &[1.0, 0.1]),
                entry("2", &[0.0, 1.0]),
            ],
            Metric::Cosine,
        );
        match result {
            Err(IndexError::Build(msg)) => assert!(msg.contains("duplicate")),
            other => panic!("Expected build error, got {:?}", other.map(|i| i.len())),
        }
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let index = FlatIndex::build(
            vec![
                entry("far", &[0.0, 1.0, 0.0]),
                entry("near", &[1.0, 0.0, 0.0]),
                entry("mid", &[0.8, 0.6, 0.0]),
            ],
            Metric::Cosine,
        )
        .unwrap();

        let hits = index.search(&[1.0, 0.0, 0.0], 3).unwrap();
        assert_eq!(ids(&hits), vec!["near", "mid", "far"]);
        assert!(hits[0].distance.abs() < 1e-6);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_search_ties_break_by_insertion_order() {
        let index = FlatIndex::build(
            vec![
                entry("9", &[1.0, 0.0]),
                entry("1", &[2.0, 0.0]),
                entry("5", &[0.5, 0.0]),
                entry("0", &[0.0, 1.0]),
            ],
            Metric::Cosine,
        )
        .unwrap();

        // All three parallel vectors have identical cosine distance
        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(ids(&hits), vec!["9", "1"]);

        let hits = index.search(&[1.0, 0.0], 4).unwrap();
        assert_eq!(ids(&hits), vec!["9", "1", "5", "0"]);
    }

    #[test]
    fn test_search_k_larger_than_index_returns_all() {
        let index =
            FlatIndex::build(vec![entry("a", &[1.0, 0.0]), entry("b", &[0.0, 1.0])], Metric::L2)
                .unwrap();
        let hits = index.search(&[0.0, 1.0], 50).unwrap();
        assert_eq!(ids(&hits), vec!["b", "a"]);
    }

    #[test]
    fn test_search_rejects_bad_arguments() {
        let index = FlatIndex::build(vec![entry("a", &[1.0, 0.0])], Metric::Cosine).unwrap();
        assert!(matches!(
            index.search(&[1.0, 0.0], 0),
            Err(IndexError::InvalidArgument(_))
        ));
        assert!(matches!(
            index.search(&[1.0], 1),
            Err(IndexError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_l2_metric() {
        let index = FlatIndex::build(
            vec![entry("origin", &[0.0, 0.0]), entry("unit", &[3.0, 4.0])],
            Metric::L2,
        )
        .unwrap();
        let hits = index.search(&[3.0, 4.0], 2).unwrap();
        assert_eq!(ids(&hits), vec!["unit", "origin"]);
        assert!((hits[1].distance - 5.0).abs() < 1e-6);
        assert!((Metric::L2.similarity(hits[1].distance) - 1.0 / 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_vector_is_least_similar_under_cosine() {
        let index = FlatIndex::build(
            vec![entry("zero", &[0.0, 0.0]), entry("x", &[1.0, 0.0])],
            Metric::Cosine,
        )
        .unwrap();
        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(ids(&hits), vec!["x", "zero"]);
        assert_eq!(hits[1].distance, 1.0);
    }

    #[test]
    fn test_metric_parsing() {
        assert_eq!("cosine".parse::<Metric>().unwrap(), Metric::Cosine);
        assert_eq!("L2".parse::<Metric>().unwrap(), Metric::L2);
        assert!("manhattan".parse::<Metric>().is_err());
        assert_eq!(Metric::default().to_string(), "cosine");
    }
}
