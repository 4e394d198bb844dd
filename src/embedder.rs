//! Embedding Client (C3): talks to an Ollama-compatible embedding backend
//! over HTTP, with bounded-concurrency batching and a retry/backoff
//! discipline that distinguishes transient network failures from backend
//! protocol errors.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::OllamaConfig;
use crate::error::{IndexerError, IndexerResult};

pub const EMBEDDING_DIM: usize = 1024;

#[derive(Debug, Clone, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Clone, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct TagEntry {
    name: String,
}

/// HTTP client for the embedding backend. One instance is shared across an
/// indexing run; `reqwest::Client` is internally pooled and cheap to clone.
#[derive(Clone)]
pub struct EmbeddingClient {
    http: Client,
    base_url: String,
    model: String,
    retries: u32,
}

impl EmbeddingClient {
    pub fn new(config: &OllamaConfig) -> IndexerResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| IndexerError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            retries: config.retries,
        })
    }

    /// Whether the backend responds at all, regardless of model presence.
    pub async fn ping(&self) -> bool {
        self.http
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    /// Whether the configured model is present in the backend's model list.
    pub async fn has_model(&self) -> IndexerResult<bool> {
        let resp = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|e| IndexerError::TransientBackend {
                attempts: 1,
                source: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(IndexerError::BackendProtocol(format!(
                "GET /api/tags returned {}",
                resp.status()
            )));
        }
        let tags: TagsResponse = resp
            .json()
            .await
            .map_err(|e| IndexerError::BackendProtocol(format!("malformed /api/tags body: {e}")))?;
        Ok(tags.models.iter().any(|m| model_matches(&m.name, &self.model)))
    }

    /// Embed a single string, retrying transient network/timeout failures
    /// with exponential backoff. Non-network 4xx/5xx responses are treated
    /// as permanent protocol errors and are not retried.
    pub async fn embed(&self, text: &str) -> IndexerResult<Vec<f32>> {
        let max_attempts = self.retries.max(1);
        let mut last_err = None;
        for attempt in 1..=max_attempts {
            match self.embed_once(text).await {
                Ok(vec) => return Ok(vec),
                Err(RetryClass::Permanent(e)) => return Err(e),
                Err(RetryClass::Transient(e)) => {
                    last_err = Some(e);
                    if attempt < max_attempts {
                        let backoff_ms = backoff_millis(attempt);
                        warn!(attempt, backoff_ms, "embedding request failed, retrying");
                        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    }
                }
            }
        }
        Err(IndexerError::TransientBackend {
            attempts: max_attempts,
            source: last_err.unwrap_or_default(),
        })
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, RetryClass> {
        let body = EmbedRequest { model: &self.model, prompt: text };
        let resp = self
            .http
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    RetryClass::Transient(e.to_string())
                } else {
                    RetryClass::Permanent(IndexerError::BackendProtocol(e.to_string()))
                }
            })?;

        let status = resp.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            // Treat 5xx/429 as transient: the backend is overloaded, not wrong.
            return Err(RetryClass::Transient(format!("POST /api/embeddings returned {status}")));
        }
        if !status.is_success() {
            return Err(RetryClass::Permanent(IndexerError::BackendProtocol(format!(
                "POST /api/embeddings returned {status}"
            ))));
        }

        let parsed: EmbedResponse = resp.json().await.map_err(|e| {
            RetryClass::Permanent(IndexerError::BackendProtocol(format!("malformed /api/embeddings body: {e}")))
        })?;
        Ok(parsed.embedding)
    }

    /// Embed a batch of chunk texts with bounded concurrency. A chunk whose
    /// embedding fails after retries is substituted with a zero vector so
    /// one bad chunk does not sink the whole batch; the whole batch fails
    /// only when every chunk in it failed.
    pub async fn embed_batch(&self, texts: &[String], concurrency: usize) -> IndexerResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = Vec::with_capacity(texts.len());
        for text in texts {
            let client = self.clone();
            let text = text.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                client.embed(&text).await
            }));
        }

        let mut vectors = Vec::with_capacity(texts.len());
        let mut failures = 0usize;
        for task in tasks {
            match task.await {
                Ok(Ok(vec)) => vectors.push(vec),
                Ok(Err(e)) => {
                    debug!(error = %e, "chunk embedding failed, substituting zero vector");
                    failures += 1;
                    vectors.push(vec![0.0f32; EMBEDDING_DIM]);
                }
                Err(join_err) => {
                    debug!(error = %join_err, "embedding task panicked, substituting zero vector");
                    failures += 1;
                    vectors.push(vec![0.0f32; EMBEDDING_DIM]);
                }
            }
        }

        if failures == texts.len() {
            return Err(IndexerError::TransientBackend {
                attempts: self.retries.max(1),
                source: "every chunk in the batch failed to embed".to_string(),
            });
        }
        Ok(vectors)
    }
}

enum RetryClass {
    Transient(String),
    Permanent(IndexerError),
}

/// A model entry matches the configured name when it equals it exactly or
/// begins with its base prefix — everything before the first `:`. This
/// lets a configured `qwen3-embedding` match a tagged entry like
/// `qwen3-embedding:latest`.
fn model_matches(candidate: &str, configured: &str) -> bool {
    let prefix = configured.split(':').next().unwrap_or(configured);
    candidate == configured || candidate.starts_with(prefix)
}

/// `min(1000 * 2^(attempt-2), 10000)` ms, floored at 0 for the first attempt.
fn backoff_millis(attempt: u32) -> u64 {
    if attempt < 2 {
        return 0;
    }
    let exp = attempt - 2;
    let scaled = 1000u64.saturating_mul(1u64 << exp.min(16));
    scaled.min(10_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_millis(1), 0);
        assert_eq!(backoff_millis(2), 1000);
        assert_eq!(backoff_millis(3), 2000);
        assert_eq!(backoff_millis(4), 4000);
        assert_eq!(backoff_millis(5), 8000);
        assert_eq!(backoff_millis(6), 10_000);
        assert_eq!(backoff_millis(20), 10_000);
    }

    #[tokio::test]
    async fn embed_batch_empty_is_empty() {
        let config = OllamaConfig::default();
        let client = EmbeddingClient::new(&config).unwrap();
        let result = client.embed_batch(&[], 4).await.unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn model_matches_exact_name() {
        assert!(model_matches("qwen3-embedding", "qwen3-embedding"));
    }

    #[test]
    fn model_matches_tagged_variant_of_base_prefix() {
        assert!(model_matches("qwen3-embedding:latest", "qwen3-embedding"));
    }

    #[test]
    fn model_matches_rejects_unrelated_name() {
        assert!(!model_matches("llama3:latest", "qwen3-embedding"));
    }

    #[test]
    fn model_matches_handles_configured_name_with_tag() {
        assert!(model_matches("qwen3-embedding:latest", "qwen3-embedding:latest"));
        assert!(model_matches("qwen3-embedding:q4", "qwen3-embedding:latest"));
    }
}
