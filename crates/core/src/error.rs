//! Request-level error taxonomy
//!
//! Hard failures abort the request with a single structured error; soft
//! degradations never surface here (they travel inside `StageOutcome`).

use thiserror::Error;

/// Errors that abort a request.
#[derive(Error, Debug)]
pub enum Error {
    /// Caller identity is missing or inconsistent (no tenant, no user,
    /// or a filter override that contradicts the authenticated tenant).
    #[error("invalid caller: {0}")]
    InvalidCaller(String),

    /// Malformed request body or parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The embedding service failed or timed out. Fatal: vector search is
    /// meaningless without the query vector.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Both retrieval arms failed; there is nothing to ground an answer on.
    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// The LLM provider failed or timed out during synthesis.
    #[error("synthesis unavailable: {0}")]
    SynthesisUnavailable(String),

    /// Admission queue is full.
    #[error("overloaded")]
    Overloaded,

    /// The overall request deadline was reached.
    #[error("deadline exceeded in stage {stage}")]
    DeadlineExceeded { stage: &'static str },

    /// An internal invariant was violated (e.g. a candidate tagged with a
    /// foreign tenant). Always accompanied by a security audit entry.
    #[error("internal invariant violation: {0}")]
    InvariantViolation(String),

    /// Configuration could not be loaded or validated.
    #[error("configuration error: {0}")]
    Config(String),

    /// Anything else; a bug, not an operational condition.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code for the `{error, code}` wire format.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidCaller(_) => "invalid_caller",
            Error::InvalidRequest(_) => "invalid_request",
            Error::EmbeddingUnavailable(_) => "embedding_unavailable",
            Error::RetrievalUnavailable(_) => "retrieval_unavailable",
            Error::SynthesisUnavailable(_) => "synthesis_unavailable",
            Error::Overloaded => "overloaded",
            Error::DeadlineExceeded { .. } => "deadline_exceeded",
            Error::InvariantViolation(_) => "invariant_violation",
            Error::Config(_) => "config_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Whether this error must also emit a security audit event.
    pub fn is_security_event(&self) -> bool {
        matches!(self, Error::InvariantViolation(_))
    }
}

/// Result alias used across the engine.
pub type Result<T> = std::result::Result<T, Error>;
