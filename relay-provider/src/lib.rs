//! Completion provider abstraction for the relay.
//!
//! Provides a unified interface for calling OpenAI-compatible chat completion
//! endpoints, with consistent request/response formats and an error type that
//! separates context-window overflow from every other remote failure.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

mod compatible;
mod resilient;

pub use compatible::{AuthStyle, CompatibleProvider};
pub use resilient::{ResilienceConfig, ResilientProvider};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Provider Trait
// ============================================================================

/// Unified interface for LLM providers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Get models known to this provider without a network call.
    fn models(&self) -> Vec<&str>;

    /// Check if this provider supports a given model.
    fn supports_model(&self, model: &str) -> bool;

    /// Send a chat completion request.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// List models available on the remote service.
    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let mut models: Vec<String> = self.models().into_iter().map(String::from).collect();
        models.sort();
        models.dedup();
        Ok(models)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// What kind of failure a provider reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Transport, auth, protocol or model fault unrelated to prompt size
    Remote,
    /// The composed prompt does not fit the model's context window
    ContextOverflow,
}

/// Error from a provider.
#[derive(Debug, Clone, thiserror::Error)]
#[error("[{provider}:{model}] {message}")]
pub struct ProviderError {
    pub provider: String,
    pub model: String,
    pub message: String,
    pub status_code: Option<u16>,
    pub kind: ProviderErrorKind,
}

impl ProviderError {
    /// A remote failure that is not about prompt size.
    pub fn remote(
        provider: impl Into<String>,
        model: impl Into<String>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            message: message.into(),
            status_code,
            kind: ProviderErrorKind::Remote,
        }
    }

    /// The remote model rejected the prompt as too long.
    pub fn context_overflow(
        provider: impl Into<String>,
        model: impl Into<String>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            message: message.into(),
            status_code,
            kind: ProviderErrorKind::ContextOverflow,
        }
    }

    /// Build an error from a non-success HTTP response body.
    pub fn from_api_response(provider: &str, model: &str, status: u16, body: &str) -> Self {
        let message = format!("API error ({}): {}", status, sanitize_api_error(body));
        if is_context_overflow(Some(status), body) {
            Self::context_overflow(provider, model, message, Some(status))
        } else {
            Self::remote(provider, model, message, Some(status))
        }
    }

    pub fn is_context_overflow(&self) -> bool {
        self.kind == ProviderErrorKind::ContextOverflow
    }
}

/// Phrases remote services use when a prompt exceeds the context window.
const OVERFLOW_MARKERS: &[&str] = &[
    "context_length_exceeded",
    "maximum context length",
    "context window",
];

/// Decide whether an error response means "prompt too long".
pub fn is_context_overflow(status_code: Option<u16>, body: &str) -> bool {
    if !matches!(status_code, Some(400) | Some(413)) {
        return false;
    }
    let lower = body.to_lowercase();
    OVERFLOW_MARKERS.iter().any(|m| lower.contains(m))
}

const MAX_API_ERROR_CHARS: usize = 200;

fn is_secret_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

fn token_end(input: &str, from: usize) -> usize {
    let mut end = from;
    for (i, c) in input[from..].char_indices() {
        if is_secret_char(c) {
            end = from + i + c.len_utf8();
        } else {
            break;
        }
    }
    end
}

/// Scrub known secret-like token prefixes from provider error strings.
pub fn scrub_secret_patterns(input: &str) -> String {
    const PREFIXES: [&str; 2] = ["sk-", "Bearer "];

    let mut scrubbed = input.to_string();

    for prefix in PREFIXES {
        let mut search_from = 0;
        loop {
            let Some(rel) = scrubbed[search_from..].find(prefix) else {
                break;
            };

            let start = search_from + rel;
            let content_start = start + prefix.len();
            let end = token_end(&scrubbed, content_start);

            if end == content_start {
                search_from = content_start;
                continue;
            }

            scrubbed.replace_range(start..end, "[REDACTED]");
            search_from = start + "[REDACTED]".len();
        }
    }

    scrubbed
}

/// Sanitize API error text by scrubbing secrets and truncating length.
pub fn sanitize_api_error(input: &str) -> String {
    let scrubbed = scrub_secret_patterns(input);

    if scrubbed.chars().count() <= MAX_API_ERROR_CHARS {
        return scrubbed;
    }

    let mut end = MAX_API_ERROR_CHARS;
    while end > 0 && !scrubbed.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}...", &scrubbed[..end])
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Unified chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model to use
    pub model: String,
    /// Messages in the conversation, already in send order
    pub messages: Vec<Message>,
    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    /// Temperature (0.0 - 2.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Per-call timeout; the provider default applies when unset
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Unified chat response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Provider name
    pub provider: String,
    /// Model used
    pub model: String,
    /// Response content; empty when the model declined to answer
    pub content: String,
    /// Token usage
    pub usage: TokenUsage,
    /// Finish reason
    pub finish_reason: Option<String>,
    /// Response latency in milliseconds
    pub latency_ms: u64,
}

/// Token usage information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
}
