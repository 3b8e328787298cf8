//! Book catalog loading and lookup.
//!
//! The catalog is an immutable, in-memory table of [`BookRecord`]s built once
//! at startup from the tabular dataset produced by the offline cleaning,
//! classification and emotion-scoring steps. Rows missing any required field
//! are dropped during the load rather than aborting it; the load only fails
//! when the source is unreadable or no valid row survives.

use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{BookRecord, EmotionScores};

/// Errors that can occur while loading or querying the catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The dataset could not be read or yielded no usable rows
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// No book with the requested identifier
    #[error("Book not found: {0}")]
    NotFound(String),
}

/// Result type for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Row counts from a catalog load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub rows_read: usize,
    pub loaded: usize,
    pub dropped_invalid: usize,
    pub dropped_duplicate: usize,
}

/// One dataset row as it appears on disk.
///
/// Every field is optional so a malformed row is reported as invalid instead of
/// failing deserialization; unknown columns are ignored.
#[derive(Debug, Default, Deserialize)]
struct DatasetRow {
    #[serde(default)]
    isbn13: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    authors: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, alias = "category")]
    simple_categories: Option<String>,
    #[serde(default, alias = "cover_url")]
    thumbnail: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    average_rating: Option<f32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    num_pages: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    published_year: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    joy: Option<f32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    surprise: Option<f32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    anger: Option<f32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    fear: Option<f32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    sadness: Option<f32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    disgust: Option<f32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    neutral: Option<f32>,
}

fn required(field: Option<String>, name: &str) -> Result<String, String> {
    match field {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(format!("missing {}", name)),
    }
}

fn required_score(score: Option<f32>, name: &str) -> Result<f32, String> {
    score.ok_or_else(|| format!("missing {} score", name))
}

impl TryFrom<DatasetRow> for BookRecord {
    type Error = String;

    fn try_from(row: DatasetRow) -> Result<Self, Self::Error> {
        let emotion_scores = EmotionScores {
            joy: required_score(row.joy, "joy")?,
            surprise: required_score(row.surprise, "surprise")?,
            anger: required_score(row.anger, "anger")?,
            fear: required_score(row.fear, "fear")?,
            sadness: required_score(row.sadness, "sadness")?,
            disgust: required_score(row.disgust, "disgust")?,
            neutral: required_score(row.neutral, "neutral")?,
        };

        Ok(BookRecord {
            isbn13: required(row.isbn13, "isbn13")?,
            title: required(row.title, "title")?,
            authors: row.authors.map(|a| a.trim().to_string()).unwrap_or_default(),
            description: required(row.description, "description")?,
            category: required(row.simple_categories, "category")?,
            emotion_scores,
            cover_url: row.thumbnail.filter(|t| !t.trim().is_empty()),
            average_rating: row.average_rating,
            num_pages: row.num_pages.filter(|n| *n >= 0.0).map(|n| n as u32),
            published_year: row.published_year.map(|y| y as i32),
        })
    }
}

/// Check the catalog invariants for a single record.
fn validate_record(record: &BookRecord) -> Result<(), String> {
    if record.isbn13.is_empty() || !record.isbn13.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("isbn13 '{}' is not a digit string", record.isbn13));
    }
    if record.title.trim().is_empty() {
        return Err("missing title".to_string());
    }
    if record.description.trim().is_empty() {
        return Err("missing description".to_string());
    }
    if record.category.trim().is_empty() {
        return Err("missing category".to_string());
    }
    if !record.emotion_scores.is_valid() {
        return Err("emotion score outside [0, 1]".to_string());
    }
    Ok(())
}

/// Immutable table of books indexed by ISBN-13.
///
/// Built once and shared read-only (typically behind an `Arc`) by every request.
#[derive(Debug, Clone)]
pub struct Catalog {
    books: Vec<BookRecord>,
    by_isbn: HashMap<String, usize>,
    stats: LoadStats,
}

impl Catalog {
    /// Load the catalog from a CSV file.
    ///
    /// # Errors
    /// Returns `CatalogError::Dataset` if the file cannot be opened, its header
    /// cannot be read, or no valid row remains.
    pub fn load<P: AsRef<Path>>(path: P) -> CatalogResult<Self> {
        let path = path.as_ref();
        info!("Loading catalog from {}", path.display());

        let file = std::fs::File::open(path).map_err(|e| {
            CatalogError::Dataset(format!("failed to open {}: {}", path.display(), e))
        })?;
        Self::from_reader(file)
    }

    /// Load the catalog from any CSV byte stream with a header row.
    pub fn from_reader<R: Read>(reader: R) -> CatalogResult<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        csv_reader
            .headers()
            .map_err(|e| CatalogError::Dataset(format!("failed to read header row: {}", e)))?;

        let mut records = Vec::new();
        let mut unparsable = 0;

        for (line, row) in csv_reader.deserialize::<DatasetRow>().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) if e.is_io_error() => {
                    return Err(CatalogError::Dataset(format!("read failed: {}", e)));
                }
                Err(e) => {
                    debug!(line = line + 2, error = %e, "Skipping unparsable row");
                    unparsable += 1;
                    continue;
                }
            };

            match BookRecord::try_from(row) {
                Ok(record) => records.push(record),
                Err(reason) => {
                    debug!(line = line + 2, %reason, "Skipping incomplete row");
                    unparsable += 1;
                }
            }
        }

        let mut catalog = Self::build(records)?;
        catalog.stats.rows_read += unparsable;
        catalog.stats.dropped_invalid += unparsable;
        catalog.log_stats();
        Ok(catalog)
    }

    /// Build a catalog from in-memory records, applying the same validation
    /// as a file load.
    pub fn from_records(records: Vec<BookRecord>) -> CatalogResult<Self> {
        let catalog = Self::build(records)?;
        catalog.log_stats();
        Ok(catalog)
    }

    fn build(records: Vec<BookRecord>) -> CatalogResult<Self> {
        let mut stats = LoadStats {
            rows_read: records.len(),
            ..LoadStats::default()
        };
        let mut books = Vec::with_capacity(records.len());
        let mut by_isbn = HashMap::with_capacity(records.len());

        for record in records {
            if let Err(reason) = validate_record(&record) {
                debug!(isbn13 = %record.isbn13, %reason, "Dropping invalid record");
                stats.dropped_invalid += 1;
                continue;
            }
            if by_isbn.contains_key(&record.isbn13) {
                debug!(isbn13 = %record.isbn13, "Dropping duplicate record");
                stats.dropped_duplicate += 1;
                continue;
            }
            by_isbn.insert(record.isbn13.clone(), books.len());
            books.push(record);
        }

        stats.loaded = books.len();
        if books.is_empty() {
            return Err(CatalogError::Dataset(format!(
                "no valid rows ({} read, {} invalid, {} duplicate)",
                stats.rows_read, stats.dropped_invalid, stats.dropped_duplicate
            )));
        }

        Ok(Self {
            books,
            by_isbn,
            stats,
        })
    }

    fn log_stats(&self) {
        let dropped = self.stats.dropped_invalid + self.stats.dropped_duplicate;
        if dropped > 0 {
            warn!(
                invalid = self.stats.dropped_invalid,
                duplicate = self.stats.dropped_duplicate,
                "Dropped {} of {} dataset rows",
                dropped,
                self.stats.rows_read
            );
        }
        info!("Catalog contains {} books", self.books.len());
    }

    /// Look up a book by ISBN-13.
    ///
    /// # Errors
    /// Returns `CatalogError::NotFound` if no such book exists.
    pub fn get(&self, isbn13: &str) -> CatalogResult<&BookRecord> {
        self.lookup(isbn13)
            .ok_or_else(|| CatalogError::NotFound(isbn13.to_string()))
    }

    /// Look up a book by ISBN-13, returning `None` on a miss.
    pub fn lookup(&self, isbn13: &str) -> Option<&BookRecord> {
        self.by_isbn.get(isbn13).map(|&pos| &self.books[pos])
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    /// Books in load order.
    pub fn iter(&self) -> impl Iterator<Item = &BookRecord> {
        self.books.iter()
    }

    pub fn stats(&self) -> LoadStats {
        self.stats
    }

    /// Distinct category labels, sorted.
    pub fn categories(&self) -> Vec<String> {
        self.books
            .iter()
            .map(|b| b.category.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Category dropdown values: "All" followed by the sorted labels.
    pub fn category_choices(&self) -> Vec<String> {
        std::iter::once("All".to_string())
            .chain(self.categories())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::book;
    use std::io::Write;

    const HEADER: &str = "isbn13,isbn10,title,authors,categories,thumbnail,description,published_year,average_rating,num_pages,simple_categories,anger,disgust,fear,joy,sadness,surprise,neutral";

    fn csv_with(rows: &[&str]) -> String {
        let mut out = String::from(HEADER);
        for row in rows {
            out.push('\n');
            out.push_str(row);
        }
        out
    }

    #[test]
    fn test_load_valid_rows() {
        let data = csv_with(&[
            "9780002005883,0002005883,Gilead,Marilynne Robinson,Fiction,http://img/1,A novel about a pastor,2004.0,3.85,247.0,Fiction,0.06,0.1,0.05,0.9,0.5,0.07,0.5",
            "9780002261982,0002261987,Spider's Web,Charles Osborne;Agatha Christie,Detective,,A murder mystery,2000,3.83,241,Fiction,0.1,0.2,0.9,0.1,0.3,0.2,0.4",
        ]);

        let catalog = Catalog::from_reader(data.as_bytes()).unwrap();
        assert_eq!(catalog.len(), 2);

        let gilead = catalog.get("9780002005883").unwrap();
        assert_eq!(gilead.title, "Gilead");
        assert_eq!(gilead.category, "Fiction");
        assert_eq!(gilead.num_pages, Some(247));
        assert_eq!(gilead.published_year, Some(2004));
        assert_eq!(gilead.cover_url.as_deref(), Some("http://img/1"));
        assert!((gilead.emotion_scores.joy - 0.9).abs() < 1e-6);

        let spider = catalog.get("9780002261982").unwrap();
        assert_eq!(spider.cover_url, None);
        assert_eq!(spider.author_display(), "Charles Osborne and Agatha Christie");
    }

    #[test]
    fn test_rows_missing_required_fields_are_dropped() {
        let data = csv_with(&[
            // valid
            "9780000000001,,Kept,A,,,Some description,,,,Fiction,0.1,0.1,0.1,0.1,0.1,0.1,0.1",
            // missing description
            "9780000000002,,No Desc,A,,,,,,,Fiction,0.1,0.1,0.1,0.1,0.1,0.1,0.1",
            // missing category
            "9780000000003,,No Cat,A,,,Desc,,,,,0.1,0.1,0.1,0.1,0.1,0.1,0.1",
            // missing an emotion score
            "9780000000004,,No Joy,A,,,Desc,,,,Fiction,0.1,0.1,0.1,,0.1,0.1,0.1",
            // garbage emotion score
            "9780000000005,,Bad Joy,A,,,Desc,,,,Fiction,0.1,0.1,0.1,lots,0.1,0.1,0.1",
            // non-digit isbn
            "97800000000X6,,Bad Isbn,A,,,Desc,,,,Fiction,0.1,0.1,0.1,0.1,0.1,0.1,0.1",
        ]);

        let catalog = Catalog::from_reader(data.as_bytes()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("9780000000001").is_ok());

        let stats = catalog.stats();
        assert_eq!(stats.rows_read, 6);
        assert_eq!(stats.loaded, 1);
        assert_eq!(stats.dropped_invalid, 5);
    }

    #[test]
    fn test_unknown_columns_are_tolerated() {
        let data = "isbn13,title,description,category,mystery_column,joy,surprise,anger,fear,sadness,disgust,neutral\n\
                    9781,T,D,Nonfiction,whatever,0.2,0.2,0.2,0.2,0.2,0.2,0.2";

        let catalog = Catalog::from_reader(data.as_bytes()).unwrap();
        assert_eq!(catalog.get("9781").unwrap().category, "Nonfiction");
    }

    #[test]
    fn test_duplicate_isbn_keeps_first() {
        let data = csv_with(&[
            "9781,,First,A,,,D,,,,Fiction,0.1,0.1,0.1,0.1,0.1,0.1,0.1",
            "9781,,Second,A,,,D,,,,Fiction,0.1,0.1,0.1,0.1,0.1,0.1,0.1",
        ]);

        let catalog = Catalog::from_reader(data.as_bytes()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("9781").unwrap().title, "First");
        assert_eq!(catalog.stats().dropped_duplicate, 1);
    }

    #[test]
    fn test_all_rows_invalid_is_dataset_error() {
        let data = csv_with(&["9781,,T,A,,,,,,,Fiction,0.1,0.1,0.1,0.1,0.1,0.1,0.1"]);
        let result = Catalog::from_reader(data.as_bytes());
        assert!(matches!(result, Err(CatalogError::Dataset(_))));

        let result = Catalog::from_reader(HEADER.as_bytes());
        assert!(matches!(result, Err(CatalogError::Dataset(_))));
    }

    #[test]
    fn test_unreadable_source_is_dataset_error() {
        let result = Catalog::load("/definitely/not/here/books.csv");
        match result {
            Err(CatalogError::Dataset(msg)) => assert!(msg.contains("failed to open")),
            other => panic!("Expected Dataset error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "{}",
            csv_with(&["9781,,T,A,,,D,,,,Fiction,0.1,0.1,0.1,0.1,0.1,0.1,0.1"])
        )
        .unwrap();

        let catalog = Catalog::load(file.path()).unwrap();
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let catalog = Catalog::from_records(vec![book("1", "Fiction", 0.5, "d")]).unwrap();
        assert!(matches!(catalog.get("2"), Err(CatalogError::NotFound(_))));
        assert!(catalog.lookup("2").is_none());
    }

    #[test]
    fn test_from_records_validates() {
        let mut bad = book("2", "Fiction", 0.5, "d");
        bad.emotion_scores.sadness = 3.0;
        let catalog =
            Catalog::from_records(vec![book("1", "Fiction", 0.5, "d"), bad]).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.stats().dropped_invalid, 1);
    }

    #[test]
    fn test_category_choices_sorted_with_all() {
        let catalog = Catalog::from_records(vec![
            book("1", "Nonfiction", 0.1, "d"),
            book("2", "Fiction", 0.1, "d"),
            book("3", "Children's Fiction", 0.1, "d"),
            book("4", "Fiction", 0.1, "d"),
        ])
        .unwrap();

        assert_eq!(
            catalog.category_choices(),
            vec!["All", "Children's Fiction", "Fiction", "Nonfiction"]
        );
        let order: Vec<&str> = catalog.iter().map(|b| b.isbn13.as_str()).collect();
        assert_eq!(order, vec!["1", "2", "3", "4"]);
    }
}
