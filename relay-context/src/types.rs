//! Conversation data model: turns, histories and per-conversation settings.

use relay_common::ContextConfig;
use relay_provider::Message;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a turn in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Query from the end user
    User,
    /// Model reply
    Assistant,
    /// Prompt text and dialogue summaries
    System,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    /// Parse a role name; unknown names are treated as user input.
    #[allow(clippy::match_same_arms)]
    pub fn parse(s: &str) -> Self {
        match s {
            "user" => Self::User,
            "assistant" => Self::Assistant,
            "system" => Self::System,
            _ => Self::User,
        }
    }
}

/// One role-tagged message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: MessageRole,
    pub content: String,
}

impl Turn {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }
}

impl From<&Turn> for Message {
    fn from(turn: &Turn) -> Self {
        Message::new(turn.role.as_str(), turn.content.clone())
    }
}

/// Ordered turns of one conversation, oldest first.
pub type History = Vec<Turn>;

/// Approximate cost of a history: character count of its JSON form.
///
/// This is deliberately not a token count. Bounds and budgets across the
/// context manager are all expressed in this unit.
pub fn approximate_size(history: &[Turn]) -> usize {
    if history.is_empty() {
        return 0;
    }
    serde_json::to_string(history)
        .map(|s| s.chars().count())
        .unwrap_or_else(|_| history.iter().map(|t| t.content.chars().count()).sum())
}

/// Flat `role - content` rendering of a history, turns separated by a blank line.
pub fn transcript(history: &[Turn]) -> String {
    if history.is_empty() {
        return "Empty".to_string();
    }
    history
        .iter()
        .map(|t| format!("{} - {}\n", t.role.as_str(), t.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Completion endpoint a conversation uses instead of the relay's own.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Per-conversation settings, created with defaults on first access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Persisted style prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Sampling temperature in [0, 2]
    pub temperature: f64,
    /// Model used instead of the relay default
    #[serde(default)]
    pub model_override: Option<String>,
    /// Own endpoint and key; `None` uses the relay's provider chain
    #[serde(default)]
    pub endpoint: Option<Endpoint>,
}

impl ConversationConfig {
    pub fn from_defaults(defaults: &ContextConfig) -> Self {
        Self {
            system_prompt: Some(defaults.default_style_prompt.clone()),
            temperature: defaults.default_temperature,
            model_override: None,
            endpoint: None,
        }
    }

    /// Model for this conversation, falling back to `default_model`.
    pub fn model<'a>(&'a self, default_model: &'a str) -> &'a str {
        self.model_override
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(default_model)
    }
}
