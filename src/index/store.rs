//! Precomputed vector file and the build-time embedding pass.
//!
//! The vector file is a JSON document recording the model that produced the
//! vectors alongside one entry per book, so query-time encoding can be checked
//! against it before any request is served.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{EmbeddingEntry, FlatIndex, IndexError, IndexResult, Metric};
use crate::catalog::Catalog;
use crate::embedding::{normalize_text, EmbeddingError, EmbeddingProvider, EmbeddingResult};
use crate::models::EmbeddingConfig;

/// Embeddings for a catalog plus the model that produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingStore {
    pub config: EmbeddingConfig,
    pub entries: Vec<EmbeddingEntry>,
}

impl EmbeddingStore {
    pub fn new(config: EmbeddingConfig, entries: Vec<EmbeddingEntry>) -> Self {
        Self { config, entries }
    }

    /// Read a vector file.
    ///
    /// # Errors
    /// Returns `IndexError::Io` if the file cannot be opened and
    /// `IndexError::Serialization` if it is not a valid vector file.
    pub fn load<P: AsRef<Path>>(path: P) -> IndexResult<Self> {
        let path = path.as_ref();
        info!("Loading embeddings from {}", path.display());

        let reader = BufReader::new(File::open(path)?);
        let store: Self = serde_json::from_reader(reader)?;

        debug!(
            entries = store.entries.len(),
            model = %store.config.model_name,
            "Loaded embedding store"
        );
        Ok(store)
    }

    /// Write the vector file, replacing any existing one.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> IndexResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;

        info!(
            entries = self.entries.len(),
            "Saved embeddings to {}",
            path.display()
        );
        Ok(())
    }

    /// Check that an encoder produces vectors compatible with this store.
    ///
    /// # Errors
    /// Returns `IndexError::Build` on a model name mismatch and
    /// `IndexError::DimensionMismatch` on a dimensionality mismatch.
    pub fn check_encoder<E: EmbeddingProvider + ?Sized>(&self, encoder: &E) -> IndexResult<()> {
        if encoder.model_name() != self.config.model_name {
            return Err(IndexError::Build(format!(
                "embedding model mismatch: encoder uses '{}' but vectors were built with '{}'",
                encoder.model_name(),
                self.config.model_name
            )));
        }
        if encoder.dimension() != self.config.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.config.dimension,
                got: encoder.dimension(),
            });
        }
        Ok(())
    }

    /// Build the searchable index from the stored entries.
    pub fn into_index(self, metric: Metric) -> IndexResult<FlatIndex> {
        if let Some(bad) = self
            .entries
            .iter()
            .find(|e| e.vector.len() != self.config.dimension)
        {
            return Err(IndexError::DimensionMismatch {
                expected: self.config.dimension,
                got: bad.vector.len(),
            });
        }
        FlatIndex::build(self.entries, metric)
    }
}

/// Embed every catalog description through `provider`, in catalog order.
///
/// Descriptions are normalized exactly as queries are, then encoded in chunks
/// of `batch_size`. `on_progress` receives the number of books embedded so far
/// after each chunk.
pub async fn embed_catalog<E, F>(
    provider: &E,
    catalog: &Catalog,
    batch_size: usize,
    mut on_progress: F,
) -> EmbeddingResult<EmbeddingStore>
where
    E: EmbeddingProvider + ?Sized,
    F: FnMut(usize),
{
    let books: Vec<_> = catalog.iter().collect();
    let mut entries = Vec::with_capacity(books.len());

    for chunk in books.chunks(batch_size.max(1)) {
        let texts: Vec<String> = chunk.iter().map(|b| normalize_text(&b.description)).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();

        let vectors = provider.embed_batch(&refs).await?;
        if vectors.len() != chunk.len() {
            return Err(EmbeddingError::Backend(format!(
                "expected {} embeddings, got {}",
                chunk.len(),
                vectors.len()
            )));
        }

        entries.extend(
            chunk
                .iter()
                .zip(vectors)
                .map(|(book, vector)| EmbeddingEntry::new(book.isbn13.clone(), vector)),
        );
        on_progress(entries.len());
    }

    let config = EmbeddingConfig {
        model_name: provider.model_name().to_string(),
        dimension: provider.dimension(),
    };
    Ok(EmbeddingStore::new(config, entries))
}
