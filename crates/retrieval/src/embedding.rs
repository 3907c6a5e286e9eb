//! Embedding service client
//!
//! Query text to vector over HTTP. There is no local fallback: vector
//! search is meaningless without the query vector, so a failure here is
//! fatal to the request.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::RetrievalError;

/// Embedding seam. The HTTP client is the production implementation;
/// tests plug in deterministic embedders.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts. The output order matches the input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError>;

    /// One-shot startup probe; returns the model's output dimension.
    async fn probe_dimension(&self) -> Result<usize, RetrievalError> {
        let vectors = self.embed(&["dimension probe".to_string()]).await?;
        vectors
            .first()
            .map(Vec::len)
            .ok_or_else(|| RetrievalError::Embedding("probe returned no vector".into()))
    }
}

/// Embedding client configuration.
#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    pub endpoint: String,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8081".to_string(),
            model: "e5-multilingual".to_string(),
            timeout: Duration::from_secs(5),
            max_retries: 2,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

/// HTTP embedding client.
pub struct HttpEmbedder {
    client: Client,
    config: EmbedderConfig,
}

impl HttpEmbedder {
    pub fn new(config: EmbedderConfig) -> Result<Self, RetrievalError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RetrievalError::Embedding(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn embed_url(&self) -> String {
        format!("{}/embed", self.config.endpoint.trim_end_matches('/'))
    }

    async fn execute(&self, request: &EmbedRequest<'_>) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let response = self
            .client
            .post(self.embed_url())
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Embedding(format!(
                "embedding service returned {status}: {body}"
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Embedding(format!("invalid response: {e}")))?;
        Ok(parsed.embeddings)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let request = EmbedRequest {
            model: &self.config.model,
            texts,
        };

        // Retry transient failures with exponential backoff; 4xx answers
        // are never retried.
        let mut backoff = self.config.initial_backoff;
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::warn!(
                    attempt,
                    max = self.config.max_retries,
                    "embedding request failed, retrying in {:?}",
                    backoff
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            match self.execute(&request).await {
                Ok(vectors) => {
                    if vectors.len() != texts.len() {
                        return Err(RetrievalError::Embedding(format!(
                            "embedding count mismatch: sent {}, got {}",
                            texts.len(),
                            vectors.len()
                        )));
                    }
                    return Ok(vectors);
                }
                Err(e @ RetrievalError::Timeout) => last_error = Some(e),
                Err(RetrievalError::Search(msg)) => {
                    last_error = Some(RetrievalError::Embedding(msg))
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| RetrievalError::Embedding("max retries exceeded".into())))
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    texts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embed_url_trims_trailing_slash() {
        let embedder = HttpEmbedder::new(EmbedderConfig {
            endpoint: "http://localhost:8081/".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(embedder.embed_url(), "http://localhost:8081/embed");
    }

    #[tokio::test]
    async fn test_probe_dimension_uses_embed() {
        struct Fixed;

        #[async_trait]
        impl Embedder for Fixed {
            async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
                Ok(texts.iter().map(|_| vec![0.0; 384]).collect())
            }
        }

        assert_eq!(Fixed.probe_dimension().await.unwrap(), 384);
    }
}
