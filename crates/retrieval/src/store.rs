//! Document store seam
//!
//! The engine owns no durable storage; it consumes a store that offers
//! k-NN with payload filtering, full-text search over payload fields and
//! point fetch by id. Backends implement [`DocumentStore`]; the pipeline
//! only ever sees this trait.

use async_trait::async_trait;
use ragline_core::Payload;
use thiserror::Error;

/// Push-down access filter, produced by the filter builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreFilter {
    /// Exact tenant match.
    pub tenant: String,
    /// Candidate ACL must intersect this set.
    pub principals: Vec<String>,
    /// Candidate language must be one of these; empty admits all.
    pub languages: Vec<String>,
}

/// One hit coming back from a store operation.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub content: String,
    pub payload: Payload,
}

/// Store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("search error: {0}")]
    Search(String),

    #[error("collection error: {0}")]
    Collection(String),

    #[error("malformed point: {0}")]
    Malformed(String),
}

/// Operations the engine needs from its store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Cosine k-NN with the push-down filter. `ef` is an optional HNSW
    /// search-accuracy override.
    async fn knn_search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &StoreFilter,
        ef: Option<u64>,
    ) -> Result<Vec<ScoredPoint>, StoreError>;

    /// Full-text search over payload fields with the same filter. Scores
    /// are backend-defined but must order by descending relevance.
    async fn text_search(
        &self,
        terms: &[String],
        top_k: usize,
        filter: &StoreFilter,
    ) -> Result<Vec<ScoredPoint>, StoreError>;

    /// Sibling chunks of a structured section: same document, section
    /// paths under `section_prefix`, still subject to the filter.
    async fn fetch_siblings(
        &self,
        doc_id: &str,
        section_prefix: &str,
        limit: usize,
        filter: &StoreFilter,
    ) -> Result<Vec<ScoredPoint>, StoreError>;

    /// Point fetch by ids. Scores come back as 0.
    async fn fetch(&self, ids: &[String]) -> Result<Vec<ScoredPoint>, StoreError>;

    /// Sample chunk contents for corpus-statistics refresh.
    async fn sample_contents(&self, limit: usize) -> Result<Vec<String>, StoreError>;

    /// Liveness probe for readiness reporting.
    async fn probe(&self) -> bool;
}
