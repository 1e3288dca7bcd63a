//! The per-turn procedure and administrative operations.
//!
//! A turn runs entirely under its conversation's lock:
//! load → trim → compose → send → (overflow: condense and retry once) →
//! compact → commit. Failures never escape as errors; every path ends in a
//! [`TurnReply`] with text for the end user.

use crate::client::CompletionClient;
use crate::compactor::HistoryCompactor;
use crate::composer::{compose, situational_preamble, TurnRequest};
use crate::lock::ConversationLocks;
use crate::recovery::{OverflowRecovery, RecoveryState, RetryPrompt};
use crate::store::{ConfigStore, SessionStore};
use crate::summarizer::{local_compact, Summarizer};
use crate::trimmer::ContextTrimmer;
use crate::types::{approximate_size, transcript, ConversationConfig, Endpoint, History, Turn};
use chrono::Local;
use relay_common::logging::generate_trace_id;
use relay_common::{Config, ContextConfig, Error, LlmConfig, Result};
use relay_provider::{CompatibleProvider, Provider};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// Answered on the first attempt
    Answered,
    /// Answered after condensing the dialogue
    Recovered,
    /// The model returned an empty answer
    NoAnswer,
    /// Transport, auth or model failure
    RemoteFailure,
    /// Overflow recovery did not produce an answer
    Failed,
    /// Query rejected before any remote call
    TooLong,
    /// History could not be loaded or saved
    StorageFailure,
}

impl TurnStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Answered => "answered",
            Self::Recovered => "recovered",
            Self::NoAnswer => "no_answer",
            Self::RemoteFailure => "remote_failure",
            Self::Failed => "failed",
            Self::TooLong => "too_long",
            Self::StorageFailure => "storage_failure",
        }
    }

    /// Whether the model produced an answer.
    pub fn is_answered(self) -> bool {
        matches!(self, Self::Answered | Self::Recovered)
    }
}

/// Text for the end user plus how the turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReply {
    pub text: String,
    pub status: TurnStatus,
}

impl TurnReply {
    fn new(text: impl Into<String>, status: TurnStatus) -> Self {
        Self {
            text: text.into(),
            status,
        }
    }
}

/// Builds the provider for a conversation that brings its own endpoint.
pub type EndpointFactory = dyn Fn(&Endpoint) -> Arc<dyn Provider> + Send + Sync;

fn compatible_endpoint(endpoint: &Endpoint) -> Arc<dyn Provider> {
    Arc::new(CompatibleProvider::custom(
        "conversation",
        &endpoint.base_url,
        endpoint.api_key.as_deref(),
    ))
}

/// Everything that talks to one completion service on behalf of a turn.
#[derive(Clone)]
struct Route {
    client: CompletionClient,
    recovery: OverflowRecovery,
    compactor: HistoryCompactor,
}

impl Route {
    fn new(client: CompletionClient, settings: &ContextConfig, summary_model: &str) -> Self {
        let summarizer = Summarizer::new(client.clone(), summary_model, settings.summary_temperature);
        Self {
            recovery: OverflowRecovery::new(
                client.clone(),
                summarizer.clone(),
                settings.max_history_entries,
                settings.condensed_budget,
            ),
            compactor: HistoryCompactor::new(summarizer, settings.turn_memory_budget),
            client,
        }
    }
}

/// Conversational context manager.
pub struct ChatRelay {
    sessions: Arc<SessionStore>,
    configs: Arc<ConfigStore>,
    locks: ConversationLocks,
    route: Route,
    endpoints: Box<EndpointFactory>,
    trimmer: ContextTrimmer,
    settings: ContextConfig,
    default_model: String,
}

impl ChatRelay {
    pub fn new(
        settings: ContextConfig,
        llm: &LlmConfig,
        provider: Arc<dyn Provider>,
        sessions: Arc<SessionStore>,
        configs: Arc<ConfigStore>,
    ) -> Self {
        let client = CompletionClient::new(
            provider,
            llm.max_tokens,
            Duration::from_secs(llm.timeout_secs),
        );

        Self {
            sessions,
            configs,
            locks: ConversationLocks::new(),
            route: Route::new(client, &settings, &llm.model),
            endpoints: Box::new(compatible_endpoint),
            trimmer: ContextTrimmer::new(settings.max_history_entries, settings.max_history_size),
            default_model: llm.model.clone(),
            settings,
        }
    }

    pub fn from_config(
        config: &Config,
        provider: Arc<dyn Provider>,
        sessions: Arc<SessionStore>,
        configs: Arc<ConfigStore>,
    ) -> Self {
        Self::new(config.context.clone(), &config.llm, provider, sessions, configs)
    }

    /// Replace how per-conversation endpoints are turned into providers.
    pub fn with_endpoint_factory(
        mut self,
        factory: impl Fn(&Endpoint) -> Arc<dyn Provider> + Send + Sync + 'static,
    ) -> Self {
        self.endpoints = Box::new(factory);
        self
    }

    /// The relay's own route, or one bound to the conversation's endpoint.
    fn route_for(&self, config: &ConversationConfig) -> Route {
        match &config.endpoint {
            Some(endpoint) => {
                let client = self.route.client.with_provider((self.endpoints)(endpoint));
                Route::new(client, &self.settings, &self.default_model)
            }
            None => self.route.clone(),
        }
    }

    /// Answer one inbound message.
    pub async fn chat(&self, request: TurnRequest) -> TurnReply {
        let span = tracing::info_span!(
            "turn",
            trace_id = %generate_trace_id(),
            conversation_id = %request.conversation_id,
        );
        async move {
            let start = Instant::now();
            let reply = self.run_turn(&request).await;
            tracing::info!(
                status = reply.status.as_str(),
                latency_ms = start.elapsed().as_millis() as u64,
                "Turn finished"
            );
            reply
        }
        .instrument(span)
        .await
    }

    async fn run_turn(&self, request: &TurnRequest) -> TurnReply {
        let query_chars = request.query.chars().count();
        if query_chars > self.settings.max_query_chars {
            tracing::info!(
                chars = query_chars,
                limit = self.settings.max_query_chars,
                "Query rejected as too long"
            );
            return TurnReply::new(
                format!(
                    "Message too long: {} characters, the limit is {}.",
                    query_chars, self.settings.max_query_chars
                ),
                TurnStatus::TooLong,
            );
        }

        let id = request.conversation_id.as_str();
        let _guard = self.locks.acquire(id).await;

        let history = match self.sessions.get(id).await {
            Ok(history) => history.unwrap_or_default(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to load history");
                return self.failure_reply(TurnStatus::StorageFailure);
            }
        };
        let config = match self.ensure_config(id).await {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load conversation config");
                return self.failure_reply(TurnStatus::StorageFailure);
            }
        };
        let route = self.route_for(&config);
        let model = config.model(&self.default_model);
        let style_prompt = config.system_prompt.as_deref();

        let trimmed = self.trimmer.trim(&history);
        let preamble = situational_preamble(request, Local::now());
        let messages = compose(&preamble, style_prompt, &trimmed, &request.query);

        tracing::debug!(
            model,
            entries = trimmed.len(),
            stored_entries = history.len(),
            "Sending turn"
        );

        let (answer, base, state) = match route.client.send(messages, config.temperature, model).await {
            Ok(text) if text.trim().is_empty() => {
                tracing::info!("Model returned an empty answer, nothing committed");
                return TurnReply::new(self.settings.no_answer_text.clone(), TurnStatus::NoAnswer);
            }
            Ok(text) => (text, trimmed, RecoveryState::Normal),
            Err(e) if e.is_context_overflow() => {
                tracing::warn!(
                    model,
                    size = approximate_size(&trimmed),
                    "Prompt exceeds the model context window"
                );
                let prompt = RetryPrompt {
                    preamble: &preamble,
                    style_prompt,
                    temperature: config.temperature,
                    model,
                };
                let outcome = route.recovery.recover(&history, &request.query, prompt).await;
                if outcome.state != RecoveryState::Recovered {
                    return TurnReply::new(self.settings.no_answer_text.clone(), TurnStatus::Failed);
                }
                (outcome.answer, outcome.context, outcome.state)
            }
            Err(e) => {
                tracing::error!(model, error = %e, "Completion call failed");
                return self.failure_reply(TurnStatus::RemoteFailure);
            }
        };

        let pair = route.compactor.compact(&request.query, &answer).await;
        let committed = self.committed_history(base, pair);
        tracing::debug!(state = state.as_str(), entries = committed.len(), "Committing turn");

        if let Err(e) = self.sessions.set(id, &committed).await {
            tracing::error!(error = %e, "Failed to save history, answer not recorded");
            return TurnReply::new(answer, TurnStatus::StorageFailure);
        }

        let status = match state {
            RecoveryState::Normal => TurnStatus::Answered,
            _ => TurnStatus::Recovered,
        };
        TurnReply::new(answer, status)
    }

    /// `base` plus the new exchange, within the history bounds.
    ///
    /// Older entries give way first; the new exchange itself is never dropped.
    fn committed_history(&self, base: History, pair: [Turn; 2]) -> History {
        let pair = self.fit_pair(pair);
        let mut committed = base;
        committed.extend(pair.iter().cloned());

        let committed = self.trimmer.trim(&committed);
        if committed.ends_with(&pair) {
            committed
        } else {
            pair.to_vec()
        }
    }

    /// Shrink an exchange locally until it fits `max_history_size` on its own.
    fn fit_pair(&self, pair: [Turn; 2]) -> [Turn; 2] {
        let max_size = self.settings.max_history_size;
        if approximate_size(&pair) <= max_size {
            return pair;
        }

        let envelope = approximate_size(&[Turn::user(""), Turn::assistant("")]);
        let mut budget = max_size.saturating_sub(envelope) / 2;
        loop {
            let shrunk = pair
                .clone()
                .map(|t| Turn::new(t.role, local_compact(&t.content, budget)));
            if budget == 0 || approximate_size(&shrunk) <= max_size {
                tracing::warn!(
                    size = approximate_size(&pair),
                    max_size,
                    "New exchange exceeds the history window, compacted locally"
                );
                return shrunk;
            }
            budget /= 2;
        }
    }

    fn failure_reply(&self, status: TurnStatus) -> TurnReply {
        TurnReply::new(self.settings.remote_failure_text.clone(), status)
    }

    /// Stored settings for `id`, writing the defaults on first access.
    async fn ensure_config(&self, id: &str) -> Result<ConversationConfig> {
        if let Some(config) = self.configs.get(id).await? {
            return Ok(config);
        }
        let config = ConversationConfig::from_defaults(&self.settings);
        self.configs.set(id, &config).await?;
        tracing::debug!(conversation_id = id, "Created conversation config");
        Ok(config)
    }

    async fn update_config(&self, id: &str, apply: impl FnOnce(&mut ConversationConfig)) -> Result<ConversationConfig> {
        let _guard = self.locks.acquire(id).await;
        let mut config = self.ensure_config(id).await?;
        apply(&mut config);
        self.configs.set(id, &config).await?;
        Ok(config)
    }

    // ========================================================================
    // Administrative operations
    // ========================================================================

    /// Empty the history of `id`. Unknown conversations are left untouched.
    pub async fn reset(&self, id: &str) -> Result<()> {
        let _guard = self.locks.acquire(id).await;
        if self.sessions.contains(id).await? {
            self.sessions.set(id, &Vec::new()).await?;
            tracing::info!(conversation_id = id, "History reset");
        }
        Ok(())
    }

    /// Set the sampling temperature, which must lie in [0, 2].
    pub async fn set_temperature(&self, id: &str, temperature: f64) -> Result<()> {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(Error::InvalidInput(format!(
                "temperature {temperature} is outside 0..=2"
            )));
        }
        self.update_config(id, |c| c.temperature = temperature).await?;
        tracing::info!(conversation_id = id, temperature, "Temperature updated");
        Ok(())
    }

    /// Override the model for `id`; an empty name restores the default.
    pub async fn set_model(&self, id: &str, model: &str) -> Result<()> {
        let model = model.trim();
        let override_model = (!model.is_empty()).then(|| model.to_string());
        self.update_config(id, |c| c.model_override = override_model).await?;
        tracing::info!(conversation_id = id, model, "Model override updated");
        Ok(())
    }

    /// Replace the style prompt for `id`; empty text restores the default.
    pub async fn set_style_prompt(&self, id: &str, prompt: &str) -> Result<()> {
        let prompt = if prompt.trim().is_empty() {
            self.settings.default_style_prompt.clone()
        } else {
            prompt.to_string()
        };
        self.update_config(id, |c| c.system_prompt = Some(prompt)).await?;
        tracing::info!(conversation_id = id, "Style prompt updated");
        Ok(())
    }

    /// Send `id`'s turns to its own endpoint; an empty URL returns it to the
    /// relay's provider chain.
    pub async fn set_endpoint(&self, id: &str, base_url: &str, api_key: Option<&str>) -> Result<()> {
        let base_url = base_url.trim();
        let endpoint = if base_url.is_empty() {
            None
        } else if base_url.starts_with("http://") || base_url.starts_with("https://") {
            Some(Endpoint {
                base_url: base_url.trim_end_matches('/').to_string(),
                api_key: api_key.map(str::trim).filter(|k| !k.is_empty()).map(String::from),
            })
        } else {
            return Err(Error::InvalidInput(format!(
                "endpoint '{base_url}' must start with http:// or https://"
            )));
        };

        let custom = endpoint.is_some();
        self.update_config(id, |c| c.endpoint = endpoint).await?;
        tracing::info!(conversation_id = id, custom, "Endpoint updated");
        Ok(())
    }

    pub async fn conversation_config(&self, id: &str) -> Result<ConversationConfig> {
        let _guard = self.locks.acquire(id).await;
        self.ensure_config(id).await
    }

    /// Committed history of `id`; empty for unknown conversations.
    pub async fn history(&self, id: &str) -> Result<History> {
        let _guard = self.locks.acquire(id).await;
        Ok(self.sessions.get(id).await?.unwrap_or_default())
    }

    /// `role - content` dump of the committed history, or "Empty".
    pub async fn transcript(&self, id: &str) -> Result<String> {
        Ok(transcript(&self.history(id).await?))
    }

    /// Models offered by the completion service.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        self.route
            .client
            .list_models()
            .await
            .map_err(|e| Error::External(e.to_string()))
    }

    /// Model used for conversations without an override.
    pub fn default_model(&self) -> &str {
        &self.default_model
    }
}
