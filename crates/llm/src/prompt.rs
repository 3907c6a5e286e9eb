//! Prompt assembly
//!
//! System preamble + tenant system prompt + ordered context with stable
//! document ids + the user's question. The preamble pins the citation
//! contract the extractor parses afterwards: inline `[^n]` markers only,
//! and an honest refusal when the context does not carry the answer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// One context entry as the synthesiser sees it.
#[derive(Debug, Clone)]
pub struct ContextChunk {
    /// 1-based position; the number the model cites with `[^n]`.
    pub number: usize,
    pub doc_id: String,
    pub content: String,
}

const PREAMBLE: &str = "\
You are a careful assistant that answers strictly from the provided sources.

Rules:
- Use only the numbered sources below. Never bring in outside knowledge.
- Cite every factual claim with an inline marker like [^1] that names the \
source it came from. Use the source numbers exactly as given.
- If the sources do not contain the answer, say \"I don't know.\" and \
nothing else. Do not guess.
- Keep the answer concise and directly responsive to the question.";

/// Builds the message list for one synthesis call.
#[derive(Debug, Default)]
pub struct PromptBuilder {
    tenant_prompt: Option<String>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tenant-resolved system prompt (already selected for the caller's
    /// language upstream).
    pub fn with_tenant_prompt(mut self, prompt: Option<String>) -> Self {
        self.tenant_prompt = prompt;
        self
    }

    pub fn build(&self, context: &[ContextChunk], query: &str) -> Vec<Message> {
        let mut system = String::from(PREAMBLE);
        if let Some(ref tenant_prompt) = self.tenant_prompt {
            system.push_str("\n\n");
            system.push_str(tenant_prompt);
        }

        let mut user = String::new();
        user.push_str("Sources:\n\n");
        for chunk in context {
            user.push_str(&format!(
                "[^{}] (document: {})\n{}\n\n",
                chunk.number, chunk.doc_id, chunk.content
            ));
        }
        user.push_str("Question: ");
        user.push_str(query);

        vec![Message::system(system), Message::user(user)]
    }
}
