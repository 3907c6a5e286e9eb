//! Retrieval pipeline stages
//!
//! Everything between the caller's question and the packed context:
//! - Access filtering (tenant + ACL + language), push-down and in-process
//! - Query analysis (keyphrases, intent, per-query search weights)
//! - Embedding client
//! - Document store seam with Qdrant and in-memory backends
//! - Rank fusion with selectable strategies
//! - Corpus-statistics-driven keyword re-scoring
//! - Cross-encoder rerank client with fusion-order fallback
//! - Structured section reconstruction
//! - Token-budgeted, novelty-aware context packing
//! - Source-aware confidence model and answerability guardrail

pub mod analyzer;
pub mod confidence;
pub mod domainless;
pub mod embedding;
pub mod filter;
pub mod fusion;
pub mod guardrail;
pub mod memory;
pub mod packer;
pub mod qdrant;
pub mod rerank;
pub mod section;
pub mod stats;
pub mod store;

pub use analyzer::{QueryAnalysis, QueryAnalyzer, QueryIntent, WeightedPhrase, PACK_VERSION};
pub use confidence::{ConfidenceConfig, ConfidenceModel, ConfidenceReport, ConfidenceStrategy};
pub use domainless::DomainlessReranker;
pub use embedding::{Embedder, EmbedderConfig, HttpEmbedder};
pub use filter::AccessFilter;
pub use fusion::{fuse, FusionOutcome, FusionParams};
pub use guardrail::{Guardrail, GuardrailOutcome};
pub use memory::{MemoryDoc, MemoryStore};
pub use packer::{ContextPacker, PackedContext, PackerConfig};
pub use qdrant::{QdrantConfig, QdrantStore};
pub use rerank::{rerank_stage, HttpReranker, Reranker, RerankerClientConfig};
pub use section::{SectionConfig, SectionOutcome, SectionReconstructor};
pub use stats::{CorpusStats, CorpusStatsHandle, StatsRefresher};
pub use store::{DocumentStore, ScoredPoint, StoreError, StoreFilter};

use thiserror::Error;

/// Retrieval errors
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("search error: {0}")]
    Search(String),

    #[error("rerank error: {0}")]
    Rerank(String),

    #[error("timeout")]
    Timeout,

    #[error("access denied: {0}")]
    Access(String),
}

impl From<StoreError> for RetrievalError {
    fn from(err: StoreError) -> Self {
        RetrievalError::Store(err.to_string())
    }
}

impl From<reqwest::Error> for RetrievalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RetrievalError::Timeout
        } else {
            RetrievalError::Search(err.to_string())
        }
    }
}
