//! Chat-completion backends
//!
//! One trait, one production implementation: an OpenAI-compatible HTTP
//! client that works against OpenAI, Azure, vLLM and local servers with
//! the same wire format. Streaming consumes SSE chunks; both paths
//! deliver a single consolidated result.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::prompt::{Message, Role};
use crate::LlmError;

/// One synthesis call's parameters. Model and sampling come from tenant
/// configuration, not the backend, so one connection pool serves all
/// tenants.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    Cancelled,
}

/// Consolidated generation result.
#[derive(Debug, Clone)]
pub struct ChatResult {
    pub text: String,
    pub tokens: usize,
    pub total_time_ms: u64,
    pub finish_reason: FinishReason,
}

/// Backend seam.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// One-shot generation.
    async fn generate(&self, request: &ChatRequest) -> Result<ChatResult, LlmError>;

    /// Streaming generation; tokens flow through `tx` as they arrive and
    /// the consolidated result comes back at the end.
    async fn generate_stream(
        &self,
        request: &ChatRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<ChatResult, LlmError>;

    /// Liveness probe for readiness reporting.
    async fn probe(&self) -> bool;
}

/// OpenAI-compatible backend configuration.
#[derive(Debug, Clone)]
pub struct OpenAiCompatConfig {
    /// Base URL up to and including `/v1`.
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for OpenAiCompatConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:11434/v1".to_string(),
            api_key: None,
            timeout: Duration::from_secs(25),
            max_retries: 2,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

/// OpenAI-compatible HTTP backend.
pub struct OpenAiCompatBackend {
    client: Client,
    config: OpenAiCompatConfig,
}

impl OpenAiCompatBackend {
    pub fn new(config: OpenAiCompatConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn chat_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        )
    }

    fn request_builder(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(url);
        if let Some(ref api_key) = self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }
        builder
    }

    fn wire_messages(request: &ChatRequest) -> Vec<WireMessage> {
        request
            .messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    Role::System => "system".to_string(),
                    Role::User => "user".to_string(),
                    Role::Assistant => "assistant".to_string(),
                },
                content: m.content.clone(),
            })
            .collect()
    }

    fn is_retryable(error: &LlmError) -> bool {
        matches!(error, LlmError::Network(_) | LlmError::Timeout)
    }

    async fn execute(&self, request: &ChatCompletionRequest) -> Result<ChatCompletionResponse, LlmError> {
        let response = self
            .request_builder(&self.chat_url())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(LlmError::Network(format!("server error {status}: {body}")));
            }
            return Err(LlmError::Api(format!("HTTP {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatBackend {
    async fn generate(&self, request: &ChatRequest) -> Result<ChatResult, LlmError> {
        let start = std::time::Instant::now();
        let wire = ChatCompletionRequest {
            model: request.model.clone(),
            messages: Self::wire_messages(request),
            max_tokens: Some(request.max_tokens),
            temperature: Some(request.temperature),
            stream: Some(false),
        };

        // Retry transient failures with exponential backoff.
        let mut backoff = self.config.initial_backoff;
        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::warn!(
                    attempt,
                    max = self.config.max_retries,
                    "LLM request failed, retrying in {:?}",
                    backoff
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            match self.execute(&wire).await {
                Ok(response) => {
                    let choice = response
                        .choices
                        .into_iter()
                        .next()
                        .ok_or_else(|| LlmError::InvalidResponse("no choices".into()))?;
                    let tokens = response
                        .usage
                        .map(|u| u.completion_tokens)
                        .unwrap_or(0);
                    return Ok(ChatResult {
                        text: choice.message.content,
                        tokens,
                        total_time_ms: start.elapsed().as_millis() as u64,
                        finish_reason: match choice.finish_reason.as_deref() {
                            Some("length") => FinishReason::Length,
                            _ => FinishReason::Stop,
                        },
                    });
                }
                Err(e) if Self::is_retryable(&e) => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::Network("max retries exceeded".into())))
    }

    async fn generate_stream(
        &self,
        request: &ChatRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<ChatResult, LlmError> {
        use futures::StreamExt;

        let start = std::time::Instant::now();
        let wire = ChatCompletionRequest {
            model: request.model.clone(),
            messages: Self::wire_messages(request),
            max_tokens: Some(request.max_tokens),
            temperature: Some(request.temperature),
            stream: Some(true),
        };

        let response = self
            .request_builder(&self.chat_url())
            .json(&wire)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {status}: {body}")));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut full_text = String::new();
        let mut token_count = 0usize;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Network(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer = buffer[line_end + 1..].to_string();

                if line.is_empty() || line == "data: [DONE]" {
                    continue;
                }
                let Some(json_str) = line.strip_prefix("data: ") else {
                    continue;
                };
                let Ok(chunk) = serde_json::from_str::<StreamChunk>(json_str) else {
                    continue;
                };
                for choice in chunk.choices {
                    if let Some(content) = choice.delta.and_then(|d| d.content) {
                        full_text.push_str(&content);
                        token_count += 1;
                        if tx.send(content).await.is_err() {
                            // Receiver dropped: request cancelled.
                            return Ok(ChatResult {
                                text: full_text,
                                tokens: token_count,
                                total_time_ms: start.elapsed().as_millis() as u64,
                                finish_reason: FinishReason::Cancelled,
                            });
                        }
                    }
                }
            }
        }

        Ok(ChatResult {
            text: full_text,
            tokens: token_count,
            total_time_ms: start.elapsed().as_millis() as u64,
            finish_reason: FinishReason::Stop,
        })
    }

    async fn probe(&self) -> bool {
        let url = format!("{}/models", self.config.endpoint.trim_end_matches('/'));
        let mut builder = self.client.get(&url).timeout(Duration::from_secs(5));
        if let Some(ref api_key) = self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }
        builder
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

// Wire types
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    completion_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}
