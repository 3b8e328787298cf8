//! Line-delimited JSON recommendation service.
//!
//! Each input line is one request; each output line is one response. Requests
//! are handled concurrently on separate tasks (bounded by a semaphore), so
//! responses can arrive out of order and are correlated by the echoed `id`.
//!
//! ```text
//! > {"id": 1, "query": "a dark story about revenge", "category": "Fiction", "tone": "Suspenseful"}
//! < {"id": 1, "query": "a dark story about revenge", "count": 16, "results": [...]}
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::config::RecommenderConfig;
use crate::embedding::EmbeddingProvider;
use crate::engine::{RecommendError, RecommendQuery, RecommendationEngine};
use crate::models::{parse_tone_filter, Recommendation, CAPTION_WORDS};

/// Errors that stop the service loop.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// One recommendation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendRequest {
    /// Opaque correlation id echoed in the response
    #[serde(default)]
    pub id: Value,

    pub query: String,

    /// Category label or "All"
    #[serde(default)]
    pub category: Option<String>,

    /// Tone label ("Happy", "Sad", ...), emotion key, or "All"
    #[serde(default)]
    pub tone: Option<String>,

    #[serde(default)]
    pub final_k: Option<usize>,

    #[serde(default)]
    pub candidate_k: Option<usize>,
}

impl RecommendRequest {
    /// Convert to an engine query, filling sizes from `defaults`.
    pub fn to_query(&self, defaults: &ServiceConfig) -> Result<RecommendQuery, String> {
        let tone = match &self.tone {
            Some(label) => parse_tone_filter(label)?,
            None => None,
        };

        let mut query = RecommendQuery::new(self.query.clone())
            .with_tone(tone)
            .with_final_k(self.final_k.unwrap_or(defaults.final_k))
            .with_candidate_k(self.candidate_k.unwrap_or(defaults.candidate_k));
        if let Some(category) = &self.category {
            query = query.with_category(category);
        }
        Ok(query)
    }
}

/// A recommended book shaped for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationDto {
    pub isbn13: String,
    pub title: String,
    pub authors: String,
    pub category: String,
    pub description: String,
    pub thumbnail: String,
    pub caption: String,
    pub score: f32,
    /// e.g. "HIGHLY_SIMILAR"
    pub relevance: String,
}

impl From<Recommendation> for RecommendationDto {
    fn from(rec: Recommendation) -> Self {
        Self {
            authors: rec.book.author_display(),
            description: rec.book.short_description(CAPTION_WORDS),
            thumbnail: rec.book.large_thumbnail(),
            caption: rec.book.caption(),
            relevance: rec.relevance.label().to_string(),
            score: rec.score,
            isbn13: rec.book.isbn13,
            title: rec.book.title,
            category: rec.book.category,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

/// Response line: results or an error, always carrying the request id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecommendResponse {
    Success {
        id: Value,
        query: String,
        count: usize,
        results: Vec<RecommendationDto>,
    },
    Failure {
        id: Value,
        error: ErrorBody,
    },
}

impl RecommendResponse {
    fn failure(id: Value, kind: &str, message: impl Into<String>) -> Self {
        RecommendResponse::Failure {
            id,
            error: ErrorBody {
                kind: kind.to_string(),
                message: message.into(),
            },
        }
    }

    fn from_error(id: Value, err: &RecommendError) -> Self {
        let kind = match err {
            RecommendError::InvalidArgument(_) => "invalid_argument",
            RecommendError::Encoding(_) => "encoding_error",
            RecommendError::Index(_) => "index_error",
            RecommendError::DeadlineExceeded(_) => "deadline_exceeded",
            RecommendError::Configuration(_) => "configuration_error",
            RecommendError::Dataset(_) => "dataset_error",
        };
        Self::failure(id, kind, err.to_string())
    }
}

/// Service limits and request defaults.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub final_k: usize,
    pub candidate_k: usize,
    pub request_timeout: Duration,
    pub max_concurrent_requests: usize,
}

impl From<&RecommenderConfig> for ServiceConfig {
    fn from(config: &RecommenderConfig) -> Self {
        Self {
            final_k: config.final_k,
            candidate_k: config.candidate_k,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            max_concurrent_requests: config.max_concurrent_requests.max(1),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from(&RecommenderConfig::default())
    }
}

/// The recommendation service.
pub struct RecommendationService<E: EmbeddingProvider> {
    engine: RecommendationEngine<E>,
    config: ServiceConfig,
}

impl<E: EmbeddingProvider + 'static> RecommendationService<E> {
    pub fn new(engine: RecommendationEngine<E>, config: ServiceConfig) -> Self {
        Self { engine, config }
    }

    /// Handle one request.
    pub async fn handle(&self, request: RecommendRequest) -> RecommendResponse {
        let query = match request.to_query(&self.config) {
            Ok(query) => query,
            Err(message) => {
                return RecommendResponse::failure(request.id, "invalid_request", message);
            }
        };

        match self
            .engine
            .recommend_with_deadline(&query, self.config.request_timeout)
            .await
        {
            Ok(results) => RecommendResponse::Success {
                id: request.id,
                query: request.query,
                count: results.len(),
                results: results.into_iter().map(RecommendationDto::from).collect(),
            },
            Err(err) => {
                debug!(error = %err, "Request failed");
                RecommendResponse::from_error(request.id, &err)
            }
        }
    }

    /// Handle one raw input line.
    pub async fn handle_line(&self, line: &str) -> RecommendResponse {
        match serde_json::from_str::<RecommendRequest>(line) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                // Salvage the id if the line is at least a JSON object
                let id = serde_json::from_str::<Value>(line)
                    .ok()
                    .and_then(|v| v.get("id").cloned())
                    .unwrap_or(Value::Null);
                RecommendResponse::failure(id, "invalid_request", e.to_string())
            }
        }
    }

    /// Serve requests from `reader` until EOF, writing responses to `writer`.
    ///
    /// Returns once every accepted request has been answered.
    pub async fn run<R, W>(self, reader: R, mut writer: W) -> ServerResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let service = Arc::new(self);
        let limit = service.config.max_concurrent_requests.max(1);
        let permits = Arc::new(Semaphore::new(limit));
        let (tx, mut rx) = mpsc::channel::<RecommendResponse>(limit);

        let writer_permits = Arc::clone(&permits);
        let writer_task = tokio::spawn(async move {
            let written = async {
                while let Some(response) = rx.recv().await {
                    let mut line = serde_json::to_vec(&response)?;
                    line.push(b'\n');
                    writer.write_all(&line).await?;
                    writer.flush().await?;
                }
                Ok::<_, ServerError>(())
            }
            .await;

            if let Err(e) = &written {
                warn!(error = %e, "Writing responses failed, no longer accepting requests");
                writer_permits.close();
            }
            written
        });

        info!(
            max_concurrent = limit,
            timeout = ?service.config.request_timeout,
            "Recommendation service ready"
        );

        let mut lines = reader.lines();
        let mut accepted = 0usize;
        while let Some(line) = lines.next_line().await? {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }

            // The writer closes the semaphore when output fails
            if tx.is_closed() {
                break;
            }
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            accepted += 1;

            let service = Arc::clone(&service);
            let tx = tx.clone();
            tokio::spawn(async move {
                let response = service.handle_line(&line).await;
                if tx.send(response).await.is_err() {
                    warn!("Response dropped: writer closed");
                }
                drop(permit);
            });
        }

        drop(tx);
        let written = writer_task
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        info!(requests = accepted, "Input closed, service stopped");
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::embedding::hash::HashEmbedder;
    use crate::index::{embed_catalog, Metric};
    use crate::models::fixtures::book;
    use crate::embedding::EmbeddingResult;
    use async_trait::async_trait;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use tokio::io::{AsyncReadExt, BufReader};

    async fn service() -> RecommendationService<HashEmbedder> {
        service_with(HashEmbedder::new(64), ServiceConfig::default()).await
    }

    async fn service_with<E: EmbeddingProvider + 'static>(
        encoder: E,
        config: ServiceConfig,
    ) -> RecommendationService<E> {
        let mut happy = book("1", "Fiction", 0.9, "a dragon's quest across the mountains");
        happy.cover_url = Some("http://img/1".to_string());
        let catalog = Catalog::from_records(vec![
            happy,
            book("2", "Fiction", 0.1, "a knight's quest for the grail"),
            book("3", "Nonfiction", 0.8, "a history of dragons in folklore"),
        ])
        .unwrap();

        let index = embed_catalog(&encoder, &catalog, 8, |_| {})
            .await
            .unwrap()
            .into_index(Metric::Cosine)
            .unwrap();
        let engine =
            RecommendationEngine::new(encoder, Arc::new(catalog), Arc::new(index)).unwrap();
        RecommendationService::new(engine, config)
    }

    /// Hash encoder that counts how many queries it encoded.
    struct CountingEncoder {
        inner: HashEmbedder,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingEncoder {
        async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(text).await
        }

        async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
            self.inner.embed_batch(texts).await
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn model_name(&self) -> &str {
            self.inner.model_name()
        }
    }

    /// Output whose every write fails as if the reader went away.
    struct ClosedPipe;

    impl AsyncWrite for ClosedPipe {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "reader closed",
            )))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_handle_filters_and_sorts() {
        let service = service().await;
        let response = service
            .handle_line(r#"{"id": 7, "query": "dragon quest", "category": "Fiction", "tone": "Happy", "final_k": 2}"#)
            .await;

        match response {
            RecommendResponse::Success { id, count, results, .. } => {
                assert_eq!(id, Value::from(7));
                assert_eq!(count, 2);
                let isbns: Vec<&str> = results.iter().map(|r| r.isbn13.as_str()).collect();
                assert_eq!(isbns, vec!["1", "2"]);
                assert_eq!(results[0].thumbnail, "http://img/1&fife=w800");
                assert!(results[0].caption.starts_with("Book 1 by Test Author: a dragon's"));
            }
            other => panic!("Expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handle_reports_errors() {
        let service = service().await;

        let response = service.handle_line(r#"{"id": "a", "query": "  "}"#).await;
        match response {
            RecommendResponse::Failure { id, error } => {
                assert_eq!(id, Value::from("a"));
                assert_eq!(error.kind, "invalid_argument");
            }
            other => panic!("Expected failure, got {:?}", other),
        }

        let response = service
            .handle_line(r#"{"id": 2, "query": "dragons", "tone": "Whimsical"}"#)
            .await;
        assert!(matches!(
            response,
            RecommendResponse::Failure { ref error, .. } if error.kind == "invalid_request"
        ));

        let response = service.handle_line(r#"{"id": 3}"#).await;
        match response {
            RecommendResponse::Failure { id, error } => {
                assert_eq!(id, Value::from(3));
                assert_eq!(error.kind, "invalid_request");
            }
            other => panic!("Expected failure, got {:?}", other),
        }

        let response = service.handle_line("not json").await;
        assert!(matches!(
            response,
            RecommendResponse::Failure { id: Value::Null, .. }
        ));
    }

    #[tokio::test]
    async fn test_run_answers_every_line() {
        let service = service().await;
        let input = concat!(
            r#"{"id": 1, "query": "dragon quest"}"#,
            "\n\n",
            r#"{"id": 2, "query": "knight", "category": "Fiction"}"#,
            "\n",
            "garbage\n",
        );

        let (client, server_side) = tokio::io::duplex(64 * 1024);
        service
            .run(BufReader::new(input.as_bytes()), server_side)
            .await
            .unwrap();

        let mut output = String::new();
        let mut client = client;
        client.read_to_string(&mut output).await.unwrap();

        let responses: Vec<Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(responses.len(), 3);

        let mut ids: Vec<String> = responses.iter().map(|r| r["id"].to_string()).collect();
        ids.sort();
        assert_eq!(ids, vec!["1", "2", "null"]);
        assert!(responses
            .iter()
            .any(|r| r["id"] == Value::from(2) && r["count"].as_u64().is_some()));
    }

    #[tokio::test]
    async fn test_run_stops_reading_when_output_fails() {
        let calls = Arc::new(AtomicUsize::new(0));
        let encoder = CountingEncoder {
            inner: HashEmbedder::new(64),
            calls: Arc::clone(&calls),
        };
        let config = ServiceConfig {
            max_concurrent_requests: 1,
            ..ServiceConfig::default()
        };
        let service = service_with(encoder, config).await;

        let input: String = (0..200)
            .map(|i| format!("{{\"id\": {}, \"query\": \"dragon quest\"}}\n", i))
            .collect();

        let result = service
            .run(BufReader::new(input.as_bytes()), ClosedPipe)
            .await;

        match result {
            Err(ServerError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe),
            other => panic!("Expected broken pipe, got {:?}", other),
        }
        let handled = calls.load(Ordering::SeqCst);
        assert!(handled < 10, "kept handling requests after output failed: {}", handled);
    }
}
