//! LLM synthesis
//!
//! Features:
//! - Chat-completion backend trait with an OpenAI-compatible HTTP client
//! - Streaming (SSE) and one-shot generation, consolidated to one answer
//! - Grounded prompt assembly with stable document ids and citation rules
//! - Tenant → language → global system-prompt resolution

pub mod backend;
pub mod prompt;
pub mod synthesizer;

pub use backend::{
    ChatBackend, ChatRequest, ChatResult, FinishReason, OpenAiCompatBackend, OpenAiCompatConfig,
};
pub use prompt::{ContextChunk, Message, PromptBuilder, Role};
pub use synthesizer::{Synthesizer, SynthesizerConfig};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("generation error: {0}")]
    Generation(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timeout")]
    Timeout,

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for ragline_core::Error {
    fn from(err: LlmError) -> Self {
        ragline_core::Error::SynthesisUnavailable(err.to_string())
    }
}
