//! Thin call wrapper over a [`Provider`] with relay-wide limits applied.

use relay_provider::{ChatRequest, Message, Provider, ProviderError};
use std::sync::Arc;
use std::time::Duration;

/// Sends composed prompts to the completion service.
///
/// An `Ok` with empty text means the model declined to answer; it is not an
/// error. Errors carry [`ProviderError::is_context_overflow`] so callers can
/// tell an oversized prompt apart from every other failure.
#[derive(Clone)]
pub struct CompletionClient {
    provider: Arc<dyn Provider>,
    max_tokens: i64,
    timeout: Duration,
}

impl CompletionClient {
    pub fn new(provider: Arc<dyn Provider>, max_tokens: i64, timeout: Duration) -> Self {
        Self {
            provider,
            max_tokens,
            timeout,
        }
    }

    /// Same limits, different provider.
    pub fn with_provider(&self, provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            max_tokens: self.max_tokens,
            timeout: self.timeout,
        }
    }

    /// Send a prompt with the default answer length.
    pub async fn send(
        &self,
        messages: Vec<Message>,
        temperature: f64,
        model: &str,
    ) -> Result<String, ProviderError> {
        self.send_bounded(messages, temperature, model, self.max_tokens)
            .await
    }

    /// Send a prompt with an explicit answer length limit.
    pub async fn send_bounded(
        &self,
        messages: Vec<Message>,
        temperature: f64,
        model: &str,
        max_tokens: i64,
    ) -> Result<String, ProviderError> {
        let message_count = messages.len();
        let request = ChatRequest {
            model: model.to_string(),
            messages,
            max_tokens: Some(max_tokens),
            temperature: Some(temperature),
            timeout: Some(self.timeout),
        };

        match self.provider.chat(request).await {
            Ok(response) => {
                tracing::debug!(
                    provider = %response.provider,
                    model = %response.model,
                    messages = message_count,
                    latency_ms = response.latency_ms,
                    output_tokens = response.usage.output_tokens,
                    "Completion received"
                );
                Ok(response.content)
            }
            Err(e) => {
                tracing::debug!(
                    model,
                    messages = message_count,
                    overflow = e.is_context_overflow(),
                    error = %e,
                    "Completion failed"
                );
                Err(e)
            }
        }
    }

    pub async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        self.provider.list_models().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_provider::{ChatResponse, TokenUsage};
    use std::sync::Mutex;

    struct RecordingProvider {
        seen: Mutex<Vec<ChatRequest>>,
        answer: &'static str,
    }

    #[async_trait]
    impl Provider for RecordingProvider {
        fn name(&self) -> &str {
            "recording"
        }

        fn models(&self) -> Vec<&str> {
            vec!["m2", "m1", "m2"]
        }

        fn supports_model(&self, _model: &str) -> bool {
            true
        }

        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            let model = request.model.clone();
            self.seen.lock().unwrap().push(request);
            Ok(ChatResponse {
                provider: "recording".into(),
                model,
                content: self.answer.into(),
                usage: TokenUsage::default(),
                finish_reason: None,
                latency_ms: 0,
            })
        }
    }

    #[tokio::test]
    async fn send_applies_limits() {
        let provider = Arc::new(RecordingProvider {
            seen: Mutex::new(Vec::new()),
            answer: "hi",
        });
        let client = CompletionClient::new(provider.clone(), 2000, Duration::from_secs(30));

        let text = client
            .send(vec![Message::new("user", "hello")], 0.7, "gpt-4")
            .await
            .unwrap();
        assert_eq!(text, "hi");

        client
            .send_bounded(vec![Message::new("user", "x")], 0.1, "gpt-4", 300)
            .await
            .unwrap();

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen[0].max_tokens, Some(2000));
        assert_eq!(seen[0].temperature, Some(0.7));
        assert_eq!(seen[0].timeout, Some(Duration::from_secs(30)));
        assert_eq!(seen[1].max_tokens, Some(300));
    }

    #[tokio::test]
    async fn list_models_uses_provider_default() {
        let provider = Arc::new(RecordingProvider {
            seen: Mutex::new(Vec::new()),
            answer: "",
        });
        let client = CompletionClient::new(provider, 100, Duration::from_secs(1));
        assert_eq!(client.list_models().await.unwrap(), vec!["m1", "m2"]);
    }
}
