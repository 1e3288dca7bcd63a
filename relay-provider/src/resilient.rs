//! Retry and fallback wrapper around a chain of completion endpoints.
//!
//! Transport faults are retried with exponential backoff and then handed to
//! the next endpoint in the chain. A context-window overflow is a property of
//! the prompt, not of the endpoint, so it is returned to the caller at once.

use super::{ChatRequest, ChatResponse, Provider, ProviderError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Retry policy for [`ResilientProvider`].
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Retries per endpoint before moving to the next one.
    pub max_retries: u32,
    /// First backoff delay in milliseconds; doubles with each retry.
    pub base_backoff_ms: u64,
    /// Upper bound for a single backoff delay.
    pub max_backoff_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff_ms: 100,
            max_backoff_ms: 10_000,
        }
    }
}

/// Tries each endpoint in order, retrying remote failures.
pub struct ResilientProvider {
    providers: Vec<Arc<dyn Provider>>,
    config: ResilienceConfig,
}

impl ResilientProvider {
    /// The first provider is the primary, the rest are fallbacks in order.
    pub fn new(providers: Vec<Arc<dyn Provider>>, config: ResilienceConfig) -> Self {
        Self { providers, config }
    }

    pub fn with_defaults(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self::new(providers, ResilienceConfig::default())
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .config
            .base_backoff_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.config.max_backoff_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
impl Provider for ResilientProvider {
    fn name(&self) -> &str {
        self.providers.first().map_or("resilient", |p| p.name())
    }

    fn models(&self) -> Vec<&str> {
        self.providers.iter().flat_map(|p| p.models()).collect()
    }

    fn supports_model(&self, model: &str) -> bool {
        self.providers.iter().any(|p| p.supports_model(model))
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut failures = Vec::new();

        for (idx, provider) in self.providers.iter().enumerate() {
            let provider_name = provider.name();

            for attempt in 0..=self.config.max_retries {
                match provider.chat(request.clone()).await {
                    Ok(response) => {
                        if attempt > 0 || idx > 0 {
                            tracing::info!(
                                provider = provider_name,
                                attempt = attempt + 1,
                                "Completion endpoint recovered"
                            );
                        }
                        return Ok(response);
                    }
                    Err(e) if e.is_context_overflow() => {
                        tracing::debug!(
                            provider = provider_name,
                            "Prompt exceeds context window, not retrying"
                        );
                        return Err(e);
                    }
                    Err(e) => {
                        failures.push(format!(
                            "{} attempt {}/{}: {}",
                            provider_name,
                            attempt + 1,
                            self.config.max_retries + 1,
                            e.message
                        ));

                        if attempt < self.config.max_retries {
                            let delay = self.backoff_delay(attempt);
                            tracing::warn!(
                                provider = provider_name,
                                attempt = attempt + 1,
                                max_retries = self.config.max_retries,
                                delay_ms = delay.as_millis() as u64,
                                status = e.status_code,
                                "Completion call failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }

            if let Some(next) = self.providers.get(idx + 1) {
                tracing::warn!(
                    failed_provider = provider_name,
                    next_provider = next.name(),
                    "Switching to fallback endpoint"
                );
            }
        }

        Err(ProviderError::remote(
            self.name().to_string(),
            request.model,
            format!("All endpoints failed:\n{}", failures.join("\n")),
            None,
        ))
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let mut last_error = None;
        for provider in &self.providers {
            match provider.list_models().await {
                Ok(models) => return Ok(models),
                Err(e) => {
                    tracing::warn!(provider = provider.name(), error = %e, "Model listing failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            ProviderError::remote("resilient", "", "No completion endpoints configured", None)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProviderErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockProvider {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        fail_until: usize,
        failure: ProviderErrorKind,
        response: &'static str,
    }

    impl MockProvider {
        fn new(
            name: &'static str,
            fail_until: usize,
            failure: ProviderErrorKind,
            response: &'static str,
        ) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    name,
                    calls: Arc::clone(&calls),
                    fail_until,
                    failure,
                    response,
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn models(&self) -> Vec<&str> {
            vec!["test-model"]
        }

        fn supports_model(&self, _model: &str) -> bool {
            true
        }

        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

            if attempt <= self.fail_until {
                return Err(match self.failure {
                    ProviderErrorKind::Remote => {
                        ProviderError::remote(self.name, request.model, "down", Some(500))
                    }
                    ProviderErrorKind::ContextOverflow => ProviderError::context_overflow(
                        self.name,
                        request.model,
                        "maximum context length exceeded",
                        Some(400),
                    ),
                });
            }

            Ok(ChatResponse {
                provider: self.name.to_string(),
                model: request.model,
                content: self.response.to_string(),
                usage: Default::default(),
                finish_reason: Some("stop".to_string()),
                latency_ms: 1,
            })
        }
    }

    fn fast() -> ResilienceConfig {
        ResilienceConfig {
            max_retries: 2,
            base_backoff_ms: 1,
            max_backoff_ms: 10,
        }
    }

    fn make_request() -> ChatRequest {
        ChatRequest {
            model: "test-model".to_string(),
            messages: vec![],
            max_tokens: None,
            temperature: None,
            timeout: None,
        }
    }

    #[tokio::test]
    async fn retries_remote_failures_then_succeeds() {
        let (provider, calls) =
            MockProvider::new("primary", 1, ProviderErrorKind::Remote, "recovered");
        let resilient = ResilientProvider::new(vec![Arc::new(provider)], fast());

        let result = resilient.chat(make_request()).await.unwrap();
        assert_eq!(result.content, "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn overflow_is_never_retried() {
        let (primary, primary_calls) =
            MockProvider::new("primary", usize::MAX, ProviderErrorKind::ContextOverflow, "");
        let (fallback, fallback_calls) =
            MockProvider::new("fallback", 0, ProviderErrorKind::Remote, "never");

        let resilient =
            ResilientProvider::new(vec![Arc::new(primary), Arc::new(fallback)], fast());

        let err = resilient.chat(make_request()).await.unwrap_err();
        assert!(err.is_context_overflow());
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn falls_back_after_retries_exhausted() {
        let (primary, primary_calls) =
            MockProvider::new("primary", usize::MAX, ProviderErrorKind::Remote, "never");
        let (fallback, fallback_calls) =
            MockProvider::new("fallback", 0, ProviderErrorKind::Remote, "from_fallback");

        let resilient = ResilientProvider::new(
            vec![Arc::new(primary), Arc::new(fallback)],
            ResilienceConfig {
                max_retries: 1,
                ..fast()
            },
        );

        let result = resilient.chat(make_request()).await.unwrap();
        assert_eq!(result.content, "from_fallback");
        assert_eq!(primary_calls.load(Ordering::SeqCst), 2);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn aggregated_error_is_remote() {
        let (p1, _) = MockProvider::new("p1", usize::MAX, ProviderErrorKind::Remote, "");
        let (p2, _) = MockProvider::new("p2", usize::MAX, ProviderErrorKind::Remote, "");

        let resilient = ResilientProvider::new(
            vec![Arc::new(p1), Arc::new(p2)],
            ResilienceConfig {
                max_retries: 0,
                ..fast()
            },
        );

        let err = resilient.chat(make_request()).await.unwrap_err();
        assert!(!err.is_context_overflow());
        assert!(err.message.contains("p1 attempt 1/1"));
        assert!(err.message.contains("p2 attempt 1/1"));
    }

    #[tokio::test]
    async fn list_models_uses_first_answering_endpoint() {
        let (p1, _) = MockProvider::new("p1", 0, ProviderErrorKind::Remote, "");
        let resilient = ResilientProvider::with_defaults(vec![Arc::new(p1)]);
        assert_eq!(resilient.list_models().await.unwrap(), vec!["test-model".to_string()]);

        let empty = ResilientProvider::with_defaults(vec![]);
        assert!(empty.list_models().await.is_err());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let resilient = ResilientProvider::new(
            vec![],
            ResilienceConfig {
                max_retries: 10,
                base_backoff_ms: 100,
                max_backoff_ms: 500,
            },
        );

        assert_eq!(resilient.backoff_delay(0).as_millis(), 100);
        assert_eq!(resilient.backoff_delay(1).as_millis(), 200);
        assert_eq!(resilient.backoff_delay(20).as_millis(), 500);
    }
}
