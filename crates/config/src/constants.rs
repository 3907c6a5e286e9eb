//! Centralized operational constants
//!
//! Single source of truth for infrastructure defaults used across the
//! workspace. Business-facing tuning belongs in `TenantConfig`, not here.

/// Service endpoints (loaded from env vars with fallback defaults)
pub mod endpoints {
    use once_cell::sync::Lazy;

    /// Qdrant vector store endpoint (env: QDRANT_URL)
    pub static QDRANT_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://127.0.0.1:6334".to_string())
    });

    /// Embedding service endpoint (env: EMBEDDING_URL)
    pub static EMBEDDING_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("EMBEDDING_URL").unwrap_or_else(|_| "http://127.0.0.1:8081".to_string())
    });

    /// Cross-encoder reranker endpoint (env: RERANKER_URL)
    pub static RERANKER_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("RERANKER_URL").unwrap_or_else(|_| "http://127.0.0.1:8082".to_string())
    });

    /// OpenAI-compatible LLM endpoint (env: LLM_API_BASE)
    pub static LLM_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("LLM_API_BASE").unwrap_or_else(|_| "http://127.0.0.1:11434/v1".to_string())
    });
}

/// Per-stage timeouts (milliseconds)
pub mod timeouts {
    /// Whole-request budget.
    pub const OVERALL_MS: u64 = 45_000;

    /// Query-text embedding.
    pub const EMBEDDING_MS: u64 = 5_000;

    /// k-NN search.
    pub const VECTOR_SEARCH_MS: u64 = 5_000;

    /// Full-text search.
    pub const KEYWORD_SEARCH_MS: u64 = 3_000;

    /// Cross-encoder rerank.
    pub const RERANK_MS: u64 = 10_000;

    /// Sibling fetch + merge for one request.
    pub const SECTION_COMPLETION_MS: u64 = 2_000;

    /// LLM synthesis.
    pub const LLM_MS: u64 = 25_000;
}

/// Retrieval defaults
pub mod retrieval {
    /// Candidates requested from each search arm.
    pub const SEARCH_TOP_K: usize = 20;

    /// Search-arm multiplier when the domain-less reranker needs headroom.
    pub const DOMAINLESS_TOP_K_FACTOR: usize = 50;

    /// Final result count.
    pub const DEFAULT_K: usize = 8;

    /// Candidates handed to the cross-encoder.
    pub const RERANK_INPUT_K: usize = 20;

    /// Context budget in tokens.
    pub const MAX_CONTEXT_TOKENS: usize = 8_000;
}

/// Server defaults
pub mod server {
    pub const HOST: &str = "0.0.0.0";
    pub const PORT: u16 = 8080;
    pub const MAX_CONCURRENT_REQUESTS: usize = 64;
    pub const ADMISSION_QUEUE_LIMIT: usize = 128;
}
