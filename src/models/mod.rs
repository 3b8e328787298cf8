//! Core data models for the book recommender.
//!
//! This module contains the fundamental data structures used across the application,
//! including book records, the fixed emotion vocabulary, mood tones, and
//! recommendation results.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Placeholder cover shown when a book has no thumbnail.
pub const COVER_NOT_FOUND: &str = "cover-not-found.jpg";

/// Number of description words kept in a caption.
pub const CAPTION_WORDS: usize = 30;

/// One of the fixed emotion keys scored for every book.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Joy,
    Surprise,
    Anger,
    Fear,
    Sadness,
    Disgust,
    Neutral,
}

impl Emotion {
    /// All emotion keys, in dataset column order.
    pub const ALL: [Emotion; 7] = [
        Emotion::Anger,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Joy,
        Emotion::Sadness,
        Emotion::Surprise,
        Emotion::Neutral,
    ];

    /// The dataset column / key name.
    pub fn key(&self) -> &'static str {
        match self {
            Emotion::Joy => "joy",
            Emotion::Surprise => "surprise",
            Emotion::Anger => "anger",
            Emotion::Fear => "fear",
            Emotion::Sadness => "sadness",
            Emotion::Disgust => "disgust",
            Emotion::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Emotion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Emotion::ALL
            .into_iter()
            .find(|e| e.key().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown emotion key '{}'", s))
    }
}

/// User-facing mood labels and the emotion each one sorts by.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Tone {
    Happy,
    Surprising,
    Angry,
    Suspenseful,
    Sad,
}

/// Tone dropdown values, "All" meaning no mood sorting.
pub const TONE_CHOICES: [&str; 6] = ["All", "Happy", "Surprising", "Angry", "Suspenseful", "Sad"];

impl Tone {
    pub const ALL: [Tone; 5] = [
        Tone::Happy,
        Tone::Surprising,
        Tone::Angry,
        Tone::Suspenseful,
        Tone::Sad,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Tone::Happy => "Happy",
            Tone::Surprising => "Surprising",
            Tone::Angry => "Angry",
            Tone::Suspenseful => "Suspenseful",
            Tone::Sad => "Sad",
        }
    }

    pub fn emotion(&self) -> Emotion {
        match self {
            Tone::Happy => Emotion::Joy,
            Tone::Surprising => Emotion::Surprise,
            Tone::Angry => Emotion::Anger,
            Tone::Suspenseful => Emotion::Fear,
            Tone::Sad => Emotion::Sadness,
        }
    }
}

impl FromStr for Tone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tone::ALL
            .into_iter()
            .find(|t| t.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown tone '{}'", s))
    }
}

/// Resolve a tone dropdown value into the emotion to sort by.
///
/// "All" (or an empty string) disables mood sorting. Both tone labels
/// ("Happy") and raw emotion keys ("joy") are accepted.
pub fn parse_tone_filter(label: &str) -> Result<Option<Emotion>, String> {
    let label = label.trim();
    if label.is_empty() || label.eq_ignore_ascii_case("all") {
        return Ok(None);
    }
    if let Ok(tone) = label.parse::<Tone>() {
        return Ok(Some(tone.emotion()));
    }
    label
        .parse::<Emotion>()
        .map(Some)
        .map_err(|_| format!("unknown tone '{}', expected one of {:?}", label, TONE_CHOICES))
}

/// Resolve a category dropdown value; "All" (or empty) means no filter.
pub fn parse_category_filter(label: &str) -> Option<String> {
    let label = label.trim();
    if label.is_empty() || label.eq_ignore_ascii_case("all") {
        None
    } else {
        Some(label.to_string())
    }
}

/// Per-book emotion probabilities, each in `[0, 1]`.
///
/// Scores come from an external multi-label classifier and need not sum to 1.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct EmotionScores {
    pub joy: f32,
    pub surprise: f32,
    pub anger: f32,
    pub fear: f32,
    pub sadness: f32,
    pub disgust: f32,
    pub neutral: f32,
}

impl EmotionScores {
    pub fn get(&self, emotion: Emotion) -> f32 {
        match emotion {
            Emotion::Joy => self.joy,
            Emotion::Surprise => self.surprise,
            Emotion::Anger => self.anger,
            Emotion::Fear => self.fear,
            Emotion::Sadness => self.sadness,
            Emotion::Disgust => self.disgust,
            Emotion::Neutral => self.neutral,
        }
    }

    /// True when every score is a finite probability.
    pub fn is_valid(&self) -> bool {
        Emotion::ALL
            .iter()
            .map(|e| self.get(*e))
            .all(|s| s.is_finite() && (0.0..=1.0).contains(&s))
    }
}

/// A single catalog entry.
///
/// Records are validated once at load time and never mutated afterwards. The
/// category and emotion scores are precomputed attributes of the dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookRecord {
    /// ISBN-13, digits only (primary key)
    pub isbn13: String,

    pub title: String,

    /// Authors separated by `;`
    pub authors: String,

    /// Full description (the text that was embedded)
    pub description: String,

    /// Simplified category label (e.g. "Fiction", "Children's Nonfiction")
    pub category: String,

    pub emotion_scores: EmotionScores,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_rating: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_pages: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_year: Option<i32>,
}

impl BookRecord {
    /// Human-readable author list: "A", "A and B", or "A, B, and C".
    pub fn author_display(&self) -> String {
        let authors: Vec<&str> = self
            .authors
            .split(';')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .collect();

        match authors.as_slice() {
            [] => String::new(),
            [one] => one.to_string(),
            [first, second] => format!("{} and {}", first, second),
            [init @ .., last] => format!("{}, and {}", init.join(", "), last),
        }
    }

    /// The first `words` words of the description followed by an ellipsis.
    pub fn short_description(&self, words: usize) -> String {
        let head: Vec<&str> = self.description.split_whitespace().take(words).collect();
        format!("{}...", head.join(" "))
    }

    /// Cover URL sized for gallery display, or the placeholder image.
    pub fn large_thumbnail(&self) -> String {
        match self.cover_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => format!("{}&fife=w800", url),
            _ => COVER_NOT_FOUND.to_string(),
        }
    }

    /// Gallery caption: "{title} by {authors}: {short description}".
    pub fn caption(&self) -> String {
        format!(
            "{} by {}: {}",
            self.title,
            self.author_display(),
            self.short_description(CAPTION_WORDS)
        )
    }
}

/// Relevance classification for recommendations.
///
/// Books are bucketed by their semantic similarity to the query so clients can
/// tell strong matches from loose ones after mood re-sorting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RelevanceLevel {
    /// Similarity > 0.95
    Identical,

    /// Similarity > 0.85
    HighlySimilar,

    /// Similarity > 0.70
    Similar,

    Relevant,
}

impl RelevanceLevel {
    pub fn from_score(score: f32) -> Self {
        if score > 0.95 {
            RelevanceLevel::Identical
        } else if score > 0.85 {
            RelevanceLevel::HighlySimilar
        } else if score > 0.70 {
            RelevanceLevel::Similar
        } else {
            RelevanceLevel::Relevant
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RelevanceLevel::Identical => "IDENTICAL",
            RelevanceLevel::HighlySimilar => "HIGHLY_SIMILAR",
            RelevanceLevel::Similar => "SIMILAR",
            RelevanceLevel::Relevant => "RELEVANT",
        }
    }
}

/// A single recommended book with its similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub book: BookRecord,

    /// Distance reported by the index (lower is closer)
    pub distance: f32,

    /// Similarity derived from the distance (higher is better)
    pub score: f32,

    pub relevance: RelevanceLevel,
}

impl Recommendation {
    pub fn new(book: BookRecord, distance: f32, score: f32) -> Self {
        Self {
            book,
            distance,
            score,
            relevance: RelevanceLevel::from_score(score),
        }
    }
}

/// Configuration of the embedding model that produced an index.
///
/// Stored alongside the vectors so query-time encoding can be checked against
/// the model used at build time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingConfig {
    pub model_name: String,
    pub dimension: usize,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn book(isbn13: &str, category: &str, joy: f32, description: &str) -> BookRecord {
        BookRecord {
            isbn13: isbn13.to_string(),
            title: format!("Book {}", isbn13),
            authors: "Test Author".to_string(),
            description: description.to_string(),
            category: category.to_string(),
            emotion_scores: EmotionScores {
                joy,
                ..EmotionScores::default()
            },
            cover_url: None,
            average_rating: None,
            num_pages: None,
            published_year: None,
        }
    }
}
