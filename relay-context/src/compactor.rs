//! Shortens a finished turn before it is written to history.

use crate::summarizer::{Origin, Summarizer};
use crate::types::Turn;

/// Keeps committed turns within a per-turn memory budget.
#[derive(Clone)]
pub struct HistoryCompactor {
    summarizer: Summarizer,
    turn_budget: usize,
}

impl HistoryCompactor {
    pub fn new(summarizer: Summarizer, turn_budget: usize) -> Self {
        Self {
            summarizer,
            turn_budget,
        }
    }

    /// Turns to commit for one query/answer exchange.
    ///
    /// Each side is shortened independently, and only when it exceeds the
    /// budget. Roles and order are fixed: user first, then assistant.
    pub async fn compact(&self, query: &str, answer: &str) -> [Turn; 2] {
        let user = self
            .summarizer
            .compress(query, self.turn_budget, Origin::User, false)
            .await;
        let assistant = self
            .summarizer
            .compress(answer, self.turn_budget, Origin::Assistant, false)
            .await;
        [Turn::user(user), Turn::assistant(assistant)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::CompletionClient;
    use async_trait::async_trait;
    use relay_provider::{ChatRequest, ChatResponse, Provider, ProviderError, TokenUsage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct ShortProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Provider for ShortProvider {
        fn name(&self) -> &str {
            "short"
        }

        fn models(&self) -> Vec<&str> {
            vec![]
        }

        fn supports_model(&self, _model: &str) -> bool {
            true
        }

        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ChatResponse {
                provider: "short".into(),
                model: request.model,
                content: "gist".into(),
                usage: TokenUsage::default(),
                finish_reason: None,
                latency_ms: 0,
            })
        }
    }

    fn compactor(budget: usize) -> (HistoryCompactor, Arc<ShortProvider>) {
        let provider = Arc::new(ShortProvider {
            calls: AtomicUsize::new(0),
        });
        let client = CompletionClient::new(provider.clone(), 2000, Duration::from_secs(5));
        let summarizer = Summarizer::new(client, "gpt-3.5-turbo", 0.1);
        (HistoryCompactor::new(summarizer, budget), provider)
    }

    #[tokio::test]
    async fn short_turns_are_committed_verbatim() {
        let (compactor, provider) = compactor(100);
        let turns = compactor.compact("hello", "hi there").await;
        assert_eq!(turns, [Turn::user("hello"), Turn::assistant("hi there")]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn each_side_is_compacted_independently() {
        let (compactor, provider) = compactor(10);
        let long_answer = "a".repeat(50);
        let turns = compactor.compact("short q", &long_answer).await;
        assert_eq!(turns, [Turn::user("short q"), Turn::assistant("gist")]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }
}
