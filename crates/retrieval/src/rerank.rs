//! Cross-encoder rerank client
//!
//! Query-document relevance rescoring via an external model service. This
//! stage is strictly best-effort: the orchestrator falls back to the
//! fusion ordering on timeout or error and never blocks the pipeline on
//! it.

use std::cmp::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use ragline_core::{CandidateArena, Ranked};

use crate::RetrievalError;

/// Rerank seam; tests plug in deterministic scorers.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score `docs` (id, text) against `query`. The output is aligned
    /// with the input order.
    async fn rerank(
        &self,
        query: &str,
        docs: &[(String, String)],
    ) -> Result<Vec<f32>, RetrievalError>;

    /// Liveness probe for readiness reporting.
    async fn probe(&self) -> bool {
        true
    }
}

/// Cross-encoder client configuration.
#[derive(Debug, Clone)]
pub struct RerankerClientConfig {
    pub endpoint: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for RerankerClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8082".to_string(),
            model: "bge-reranker-v2-m3".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// HTTP reranker client.
pub struct HttpReranker {
    client: Client,
    config: RerankerClientConfig,
}

impl HttpReranker {
    pub fn new(config: RerankerClientConfig) -> Result<Self, RetrievalError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RetrievalError::Rerank(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn rerank_url(&self) -> String {
        format!("{}/rerank", self.config.endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(
        &self,
        query: &str,
        docs: &[(String, String)],
    ) -> Result<Vec<f32>, RetrievalError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let request = RerankRequest {
            model: &self.config.model,
            query,
            texts: docs.iter().map(|(_, text)| text.as_str()).collect(),
        };

        let response = self
            .client
            .post(self.rerank_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RetrievalError::Timeout
                } else {
                    RetrievalError::Rerank(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Rerank(format!(
                "reranker returned {status}: {body}"
            )));
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Rerank(format!("invalid response: {e}")))?;

        if parsed.scores.len() != docs.len() {
            return Err(RetrievalError::Rerank(format!(
                "score count mismatch: sent {}, got {}",
                docs.len(),
                parsed.scores.len()
            )));
        }
        Ok(parsed.scores)
    }

    async fn probe(&self) -> bool {
        let url = format!("{}/health", self.config.endpoint.trim_end_matches('/'));
        self.client
            .get(url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    texts: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    scores: Vec<f32>,
}

/// Run the rerank stage: hand the top `input_k` candidates to the service,
/// write rerank scores back and return up to `output_k` results, best
/// first. Errors propagate so the orchestrator can apply the fusion-order
/// fallback.
pub async fn rerank_stage(
    reranker: &dyn Reranker,
    query: &str,
    arena: &mut CandidateArena,
    ranked: &[Ranked],
    input_k: usize,
    output_k: usize,
) -> Result<Vec<Ranked>, RetrievalError> {
    let input: Vec<Ranked> = ranked.iter().take(input_k).copied().collect();
    if input.is_empty() {
        return Ok(Vec::new());
    }

    let docs: Vec<(String, String)> = input
        .iter()
        .map(|r| {
            let candidate = arena.get(r.idx);
            (candidate.id.clone(), candidate.content.clone())
        })
        .collect();

    let scores = reranker.rerank(query, &docs).await?;

    let mut rescored: Vec<Ranked> = input
        .iter()
        .zip(scores)
        .map(|(r, score)| {
            let candidate = arena.get_mut(r.idx);
            candidate.scores.rerank = Some(score);
            candidate.scores.final_score = score;
            Ranked::new(r.idx, score)
        })
        .collect();

    rescored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| arena.get(a.idx).id.cmp(&arena.get(b.idx).id))
    });
    rescored.truncate(output_k);
    Ok(rescored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragline_core::{Candidate, Payload};

    struct ContainsScorer;

    #[async_trait]
    impl Reranker for ContainsScorer {
        async fn rerank(
            &self,
            query: &str,
            docs: &[(String, String)],
        ) -> Result<Vec<f32>, RetrievalError> {
            Ok(docs
                .iter()
                .map(|(_, text)| if text.contains(query) { 0.9 } else { 0.1 })
                .collect())
        }
    }

    struct FailingReranker;

    #[async_trait]
    impl Reranker for FailingReranker {
        async fn rerank(
            &self,
            _query: &str,
            _docs: &[(String, String)],
        ) -> Result<Vec<f32>, RetrievalError> {
            Err(RetrievalError::Timeout)
        }
    }

    fn seed(arena: &mut CandidateArena, id: &str, content: &str, score: f32) -> Ranked {
        let idx = arena.insert(Candidate::new(
            id,
            content,
            Payload {
                tenant: "t".into(),
                doc_id: id.into(),
                ..Default::default()
            },
        ));
        arena.get_mut(idx).scores.fusion = Some(score);
        Ranked::new(idx, score)
    }

    #[tokio::test]
    async fn test_rerank_stage_reorders_and_truncates() {
        let mut arena = CandidateArena::new();
        let weak = seed(&mut arena, "weak", "nothing relevant", 0.9);
        let strong = seed(&mut arena, "strong", "isharoth day facts", 0.5);
        let third = seed(&mut arena, "third", "other text", 0.4);

        let out = rerank_stage(
            &ContainsScorer,
            "isharoth",
            &mut arena,
            &[weak, strong, third],
            3,
            2,
        )
        .await
        .unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].idx, strong.idx);
        assert_eq!(arena.get(strong.idx).scores.rerank, Some(0.9));
    }

    #[tokio::test]
    async fn test_rerank_stage_propagates_errors_for_fallback() {
        let mut arena = CandidateArena::new();
        let r = seed(&mut arena, "a", "text", 0.5);
        let err = rerank_stage(&FailingReranker, "q", &mut arena, &[r], 1, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Timeout));
    }

    #[tokio::test]
    async fn test_rerank_stage_empty_input() {
        let mut arena = CandidateArena::new();
        let out = rerank_stage(&ContainsScorer, "q", &mut arena, &[], 20, 8)
            .await
            .unwrap();
        assert!(out.is_empty());
    }
}
