//! Condense-and-retry-once handling of context window overflow.

use crate::client::CompletionClient;
use crate::composer::compose;
use crate::summarizer::{Origin, Summarizer};
use crate::trimmer::ContextTrimmer;
use crate::types::{transcript, Turn};

/// Where a turn stands with respect to overflow handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    /// No overflow seen
    Normal,
    /// The model rejected the prompt as too long
    Overflowed,
    /// The retry with condensed context produced an answer
    Recovered,
    /// The retry overflowed again, failed, or came back empty
    Failed,
}

impl RecoveryState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Overflowed => "overflowed",
            Self::Recovered => "recovered",
            Self::Failed => "failed",
        }
    }
}

/// Result of one recovery attempt.
#[derive(Debug, Clone)]
pub struct RecoveryOutcome {
    pub state: RecoveryState,
    /// Model answer; empty unless `state` is `Recovered`
    pub answer: String,
    /// Condensed prior context the retry was sent with
    pub context: Vec<Turn>,
}

/// Prompt pieces that stay fixed between the first attempt and the retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryPrompt<'a> {
    pub preamble: &'a str,
    pub style_prompt: Option<&'a str>,
    pub temperature: f64,
    pub model: &'a str,
}

/// Summarizes the whole dialogue into one system turn and retries once.
#[derive(Clone)]
pub struct OverflowRecovery {
    client: CompletionClient,
    summarizer: Summarizer,
    trimmer: ContextTrimmer,
}

impl OverflowRecovery {
    /// `condensed_budget` bounds both the summary and the retried context.
    pub fn new(
        client: CompletionClient,
        summarizer: Summarizer,
        max_entries: usize,
        condensed_budget: usize,
    ) -> Self {
        Self {
            client,
            summarizer,
            trimmer: ContextTrimmer::new(max_entries, condensed_budget),
        }
    }

    /// Replace `history` with a single summary turn, sized for the retry.
    ///
    /// The in-flight query is kept out of the summary. If the summary and the
    /// query together still do not fit, the summary is dropped.
    pub async fn condense(&self, history: &[Turn], query: &str) -> Vec<Turn> {
        let dialog = transcript(history);
        let summary = self
            .summarizer
            .compress(&dialog, self.trimmer.max_size, Origin::Dialog, true)
            .await;

        let working = vec![Turn::system(summary), Turn::user(query)];
        let mut kept = self.trimmer.trim(&working);
        // The query itself is never traded away
        kept.pop();
        if kept.is_empty() {
            tracing::warn!(
                budget = self.trimmer.max_size,
                "Condensed summary does not fit next to the query, dropping it"
            );
        }
        kept
    }

    /// Run the recovery protocol for a turn whose prompt overflowed.
    ///
    /// Exactly one retry is made; any failure on it ends in `Failed`.
    pub async fn recover(&self, history: &[Turn], query: &str, prompt: RetryPrompt<'_>) -> RecoveryOutcome {
        tracing::info!(
            entries = history.len(),
            state = RecoveryState::Overflowed.as_str(),
            "Condensing dialogue after overflow"
        );

        let context = self.condense(history, query).await;
        let messages = compose(prompt.preamble, prompt.style_prompt, &context, query);

        let (state, answer) = match self.client.send(messages, prompt.temperature, prompt.model).await {
            Ok(text) if !text.trim().is_empty() => (RecoveryState::Recovered, text),
            Ok(_) => {
                tracing::warn!("Retry after overflow returned no answer");
                (RecoveryState::Failed, String::new())
            }
            Err(e) => {
                tracing::warn!(
                    overflow = e.is_context_overflow(),
                    error = %e,
                    "Retry after overflow failed"
                );
                (RecoveryState::Failed, String::new())
            }
        };

        tracing::info!(state = state.as_str(), "Overflow recovery finished");
        RecoveryOutcome {
            state,
            answer,
            context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_provider::{ChatRequest, ChatResponse, Provider, ProviderError, TokenUsage};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Pops one scripted result per call and records every request.
    struct SequenceProvider {
        script: Mutex<VecDeque<Result<&'static str, bool>>>,
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl SequenceProvider {
        /// `Err(true)` is an overflow, `Err(false)` a remote failure.
        fn new(script: Vec<Result<&'static str, bool>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Provider for SequenceProvider {
        fn name(&self) -> &str {
            "sequence"
        }

        fn models(&self) -> Vec<&str> {
            vec![]
        }

        fn supports_model(&self, _model: &str) -> bool {
            true
        }

        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            let model = request.model.clone();
            self.seen.lock().unwrap().push(request);
            match self.script.lock().unwrap().pop_front().unwrap_or(Ok("")) {
                Ok(text) => Ok(ChatResponse {
                    provider: "sequence".into(),
                    model,
                    content: text.into(),
                    usage: TokenUsage::default(),
                    finish_reason: None,
                    latency_ms: 0,
                }),
                Err(true) => Err(ProviderError::context_overflow("sequence", model, "maximum context length", Some(400))),
                Err(false) => Err(ProviderError::remote("sequence", model, "down", Some(500))),
            }
        }
    }

    fn recovery(provider: Arc<SequenceProvider>, budget: usize) -> OverflowRecovery {
        let client = CompletionClient::new(provider, 2000, Duration::from_secs(5));
        let summarizer = Summarizer::new(client.clone(), "gpt-3.5-turbo", 0.1);
        OverflowRecovery::new(client, summarizer, 10, budget)
    }

    fn prompt() -> RetryPrompt<'static> {
        RetryPrompt {
            preamble: "pre",
            style_prompt: Some("style"),
            temperature: 1.0,
            model: "gpt-3.5-turbo",
        }
    }

    fn long_history() -> Vec<Turn> {
        vec![
            Turn::user("first question"),
            Turn::assistant("first answer"),
            Turn::user("second question"),
            Turn::assistant("second answer"),
        ]
    }

    #[tokio::test]
    async fn condense_summarizes_full_history() {
        let provider = SequenceProvider::new(vec![Ok("they talked about two questions")]);
        let context = recovery(provider.clone(), 1500).condense(&long_history(), "third").await;

        assert_eq!(context, vec![Turn::system("they talked about two questions")]);
        let seen = provider.seen.lock().unwrap();
        let instruction = &seen[0].messages[0].content;
        assert!(instruction.contains("user - first question"));
        assert!(instruction.contains("assistant - second answer"));
        assert!(!instruction.contains("third"));
        assert_eq!(seen[0].max_tokens, Some(1500));
    }

    #[tokio::test]
    async fn condense_drops_summary_that_cannot_fit() {
        let provider = SequenceProvider::new(vec![Ok("summary")]);
        let huge_query = "q".repeat(200);
        let context = recovery(provider, 100).condense(&long_history(), &huge_query).await;
        assert!(context.is_empty());
    }

    #[tokio::test]
    async fn retry_success_is_recovered() {
        let provider = SequenceProvider::new(vec![Ok("summary"), Ok("answer")]);
        let outcome = recovery(provider.clone(), 1500)
            .recover(&long_history(), "third", prompt())
            .await;

        assert_eq!(outcome.state, RecoveryState::Recovered);
        assert_eq!(outcome.answer, "answer");
        assert_eq!(outcome.context, vec![Turn::system("summary")]);

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        let retry: Vec<&str> = seen[1].messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(retry, vec!["pre", "style", "summary", "third"]);
    }

    #[tokio::test]
    async fn second_overflow_fails_without_looping() {
        let provider = SequenceProvider::new(vec![Ok("summary"), Err(true), Ok("never")]);
        let outcome = recovery(provider.clone(), 1500)
            .recover(&long_history(), "third", prompt())
            .await;

        assert_eq!(outcome.state, RecoveryState::Failed);
        assert!(outcome.answer.is_empty());
        assert_eq!(provider.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_retry_answer_fails() {
        let provider = SequenceProvider::new(vec![Ok("summary"), Ok("  ")]);
        let outcome = recovery(provider, 1500)
            .recover(&long_history(), "third", prompt())
            .await;
        assert_eq!(outcome.state, RecoveryState::Failed);
    }

    #[tokio::test]
    async fn failed_summary_still_retries_with_local_transcript() {
        let provider = SequenceProvider::new(vec![Err(false), Ok("answer")]);
        let outcome = recovery(provider, 1500)
            .recover(&long_history(), "third", prompt())
            .await;

        assert_eq!(outcome.state, RecoveryState::Recovered);
        assert_eq!(outcome.context.len(), 1);
        assert!(outcome.context[0].content.starts_with("user - first question"));
    }
}
