//! Budget-bounded text shrinking: model summaries with a local fallback.

use crate::client::CompletionClient;
use relay_provider::Message;

/// Whose text is being shortened; selects the instruction sent to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A query written by the user
    User,
    /// A reply written by the model
    Assistant,
    /// A whole conversation transcript
    Dialog,
}

impl Origin {
    fn instruction(self, budget: usize, text: &str) -> String {
        match self {
            Self::User => format!(
                "Shorten the text to {budget} characters, keeping its meaning and important details. \
                 The text is a user's request in a conversation between a user and an AI. \
                 Use short words. Text:\n{text}"
            ),
            Self::Assistant => format!(
                "Shorten the text to {budget} characters, keeping its meaning and important details. \
                 The text is an AI's reply in a conversation between a user and an AI. \
                 Use short words. Text:\n{text}"
            ),
            Self::Dialog => format!(
                "Summarize the conversation between the user and the assistant to {budget} characters, \
                 rewrite all negative content as neutral:\n{text}"
            ),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Dialog => "dialog",
        }
    }
}

/// Shrinks text to a character budget.
#[derive(Clone)]
pub struct Summarizer {
    client: CompletionClient,
    model: String,
    temperature: f64,
}

impl Summarizer {
    pub fn new(client: CompletionClient, model: impl Into<String>, temperature: f64) -> Self {
        Self {
            client,
            model: model.into(),
            temperature,
        }
    }

    /// Shorten `text` to roughly `budget` characters.
    ///
    /// Text already within budget is returned as is unless `force` is set,
    /// in which case the model summary is taken even if it is not shorter.
    /// When the model fails or does not shrink the text, falls back to
    /// [`zip_text`], then to a hard cut at `budget` characters.
    /// Never fails.
    pub async fn compress(&self, text: &str, budget: usize, origin: Origin, force: bool) -> String {
        let length = text.chars().count();
        if length <= budget && !force {
            return text.to_string();
        }

        let prompt = origin.instruction(budget, text);
        let limit = i64::try_from(budget).unwrap_or(i64::MAX).max(1);
        match self
            .client
            .send_bounded(vec![Message::new("user", prompt)], self.temperature, &self.model, limit)
            .await
        {
            Ok(summary) if !summary.trim().is_empty() && (force || summary.chars().count() < length) => {
                tracing::debug!(
                    origin = origin.as_str(),
                    before = length,
                    after = summary.chars().count(),
                    "Text summarized"
                );
                return summary;
            }
            Ok(_) => {
                tracing::warn!(origin = origin.as_str(), "Summary did not shrink text, compacting locally");
            }
            Err(e) => {
                tracing::warn!(origin = origin.as_str(), error = %e, "Summarization failed, compacting locally");
            }
        }

        local_compact(text, budget)
    }
}

/// Deterministic shrink used when no usable summary is available.
pub fn local_compact(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    let zipped = zip_text(text);
    if zipped.chars().count() <= budget {
        zipped
    } else {
        hard_truncate(text, budget)
    }
}

/// Vowels removed by [`zip_text`]: Cyrillic and Latin `o`.
const DROPPED_VOWELS: &[char] = &['о', 'О', 'o', 'O'];

/// Lossy shrink: drop a few vowels, then collapse runs of the same character.
pub fn zip_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = None;
    for c in text.chars().filter(|c| !DROPPED_VOWELS.contains(c)) {
        if last != Some(c) {
            out.push(c);
        }
        last = Some(c);
    }
    out
}

/// First `budget` characters of `text`.
pub fn hard_truncate(text: &str, budget: usize) -> String {
    text.chars().take(budget).collect()
}
