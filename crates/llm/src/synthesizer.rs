//! Answer synthesis
//!
//! Wraps a chat backend with the grounded-answer discipline: assemble the
//! prompt, call the provider with a low temperature, consolidate streamed
//! tokens, and on any failure surface an error — never a fabricated
//! answer.

use std::sync::Arc;
use std::time::Duration;

use ragline_config::TenantConfig;
use tokio::sync::mpsc;

use crate::backend::{ChatBackend, ChatRequest, ChatResult};
use crate::prompt::{ContextChunk, PromptBuilder};
use crate::LlmError;

/// Synthesis tuning, resolved per tenant.
#[derive(Debug, Clone)]
pub struct SynthesizerConfig {
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub timeout: Duration,
    pub stream: bool,
}

impl SynthesizerConfig {
    pub fn from_tenant(config: &TenantConfig, stream: bool) -> Self {
        Self {
            model: config.llm_model.clone(),
            max_tokens: config.llm_max_tokens,
            temperature: config.llm_temperature,
            timeout: Duration::from_millis(config.llm_timeout),
            stream,
        }
    }
}

/// The synthesis stage.
pub struct Synthesizer {
    backend: Arc<dyn ChatBackend>,
}

impl Synthesizer {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    /// Produce one consolidated answer from the packed context.
    ///
    /// `timeout` is the stage budget already clamped to the request
    /// deadline by the caller.
    pub async fn synthesize(
        &self,
        config: &SynthesizerConfig,
        tenant_prompt: Option<String>,
        context: &[ContextChunk],
        query: &str,
        timeout: Duration,
    ) -> Result<ChatResult, LlmError> {
        let messages = PromptBuilder::new()
            .with_tenant_prompt(tenant_prompt)
            .build(context, query);

        let request = ChatRequest {
            messages,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        };

        let effective = timeout.min(config.timeout);
        let result = if config.stream {
            // Streamed tokens are consolidated here; the channel only
            // exists to keep the backend honest about cancellation.
            let (tx, mut rx) = mpsc::channel::<String>(64);
            let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });
            let result =
                tokio::time::timeout(effective, self.backend.generate_stream(&request, tx)).await;
            drain.abort();
            result
        } else {
            tokio::time::timeout(effective, self.backend.generate(&request)).await
        };

        match result {
            Ok(Ok(chat)) => {
                tracing::debug!(
                    tokens = chat.tokens,
                    elapsed_ms = chat.total_time_ms,
                    model = %config.model,
                    "synthesis complete"
                );
                Ok(chat)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(LlmError::Timeout),
        }
    }

    pub async fn probe(&self) -> bool {
        self.backend.probe().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FinishReason;
    use async_trait::async_trait;

    struct CannedBackend {
        answer: String,
        delay: Duration,
    }

    #[async_trait]
    impl ChatBackend for CannedBackend {
        async fn generate(&self, _request: &ChatRequest) -> Result<ChatResult, LlmError> {
            tokio::time::sleep(self.delay).await;
            Ok(ChatResult {
                text: self.answer.clone(),
                tokens: 4,
                total_time_ms: self.delay.as_millis() as u64,
                finish_reason: FinishReason::Stop,
            })
        }

        async fn generate_stream(
            &self,
            request: &ChatRequest,
            tx: mpsc::Sender<String>,
        ) -> Result<ChatResult, LlmError> {
            for word in self.answer.split_inclusive(' ') {
                let _ = tx.send(word.to_string()).await;
            }
            self.generate(request).await
        }

        async fn probe(&self) -> bool {
            true
        }
    }

    fn config(stream: bool) -> SynthesizerConfig {
        SynthesizerConfig {
            model: "test-model".into(),
            max_tokens: 128,
            temperature: 0.1,
            timeout: Duration::from_secs(5),
            stream,
        }
    }

    #[tokio::test]
    async fn test_one_shot_synthesis() {
        let synthesizer = Synthesizer::new(Arc::new(CannedBackend {
            answer: "A day lasts 31 hours. [^1]".into(),
            delay: Duration::from_millis(1),
        }));
        let result = synthesizer
            .synthesize(&config(false), None, &[], "How long?", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(result.text.contains("31 hours"));
    }

    #[tokio::test]
    async fn test_stream_consolidates_to_single_answer() {
        let synthesizer = Synthesizer::new(Arc::new(CannedBackend {
            answer: "Seven tiers exist. [^1]".into(),
            delay: Duration::from_millis(1),
        }));
        let result = synthesizer
            .synthesize(&config(true), None, &[], "q", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.text, "Seven tiers exist. [^1]");
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_error() {
        let synthesizer = Synthesizer::new(Arc::new(CannedBackend {
            answer: "late".into(),
            delay: Duration::from_secs(5),
        }));
        let err = synthesizer
            .synthesize(&config(false), None, &[], "q", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Timeout));
    }
}
