//! Generic OpenAI-compatible provider.
//!
//! Most LLM APIs follow the same `/v1/chat/completions` format, so one
//! implementation covers OpenAI itself, self-hosted gateways, and any
//! custom endpoint a conversation owner points the relay at.

use super::{ChatRequest, ChatResponse, Provider, ProviderError, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// How the provider expects the API key to be sent.
#[derive(Debug, Clone)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `x-api-key: <key>`
    XApiKey,
    /// Custom header name
    Custom(String),
}

/// A provider that speaks the OpenAI-compatible chat completions API.
pub struct CompatibleProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    auth_style: AuthStyle,
    models: Vec<String>,
    client: Client,
}

#[derive(Debug, Serialize)]
struct CompatibleRequest<'a> {
    model: &'a str,
    messages: &'a [super::Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CompatibleResponse {
    choices: Vec<CompatibleChoice>,
    #[serde(default)]
    usage: Option<CompatibleUsage>,
}

#[derive(Debug, Deserialize)]
struct CompatibleChoice {
    message: CompatibleResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompatibleResponseMessage {
    /// `null` when the model declined to answer
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompatibleUsage {
    prompt_tokens: Option<i64>,
    completion_tokens: Option<i64>,
    total_tokens: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

impl CompatibleProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: &str,
        base_url: &str,
        api_key: Option<&str>,
        auth_style: AuthStyle,
        models: Vec<&str>,
    ) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()).map(ToString::to_string),
            auth_style,
            models: models.into_iter().map(|s| s.to_string()).collect(),
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Create the stock OpenAI provider.
    pub fn openai(api_key: Option<&str>) -> Self {
        Self::new(
            "openai",
            "https://api.openai.com",
            api_key,
            AuthStyle::Bearer,
            vec!["gpt-4o", "gpt-4o-mini", "gpt-4-turbo", "gpt-3.5-turbo"],
        )
    }

    /// Create a custom provider with any OpenAI-compatible endpoint.
    pub fn custom(name: &str, base_url: &str, api_key: Option<&str>) -> Self {
        Self::new(name, base_url, api_key, AuthStyle::Bearer, vec![])
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let Some(api_key) = self.api_key.as_deref() else {
            return req;
        };
        match &self.auth_style {
            AuthStyle::Bearer => {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }
            AuthStyle::XApiKey => {
                req = req.header("x-api-key", api_key);
            }
            AuthStyle::Custom(header) => {
                req = req.header(header.as_str(), api_key);
            }
        }
        req
    }

    fn remote_error(&self, model: &str, message: String) -> ProviderError {
        ProviderError::remote(self.name.clone(), model, message, None)
    }
}

#[async_trait]
impl Provider for CompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> Vec<&str> {
        self.models.iter().map(|s| s.as_str()).collect()
    }

    fn supports_model(&self, model: &str) -> bool {
        // No static model list means the endpoint decides
        if self.models.is_empty() {
            return true;
        }
        self.models.iter().any(|m| m == model)
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let start = Instant::now();

        let body = CompatibleRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut req = self.authorize(self.client.post(&url).json(&body));
        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        let response = req
            .send()
            .await
            .map_err(|e| self.remote_error(&request.model, format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_api_response(
                &self.name,
                &request.model,
                status.as_u16(),
                &error_text,
            ));
        }

        let result: CompatibleResponse = response.json().await.map_err(|e| {
            self.remote_error(&request.model, format!("Failed to parse response: {}", e))
        })?;

        let choice = result
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| self.remote_error(&request.model, format!("No response from {}", self.name)))?;

        let usage = result.usage.map_or(TokenUsage::default(), |u| TokenUsage {
            input_tokens: u.prompt_tokens.unwrap_or(0),
            output_tokens: u.completion_tokens.unwrap_or(0),
            total_tokens: u.total_tokens.unwrap_or(0),
        });

        Ok(ChatResponse {
            provider: self.name.clone(),
            model: request.model,
            content: choice.message.content.unwrap_or_default(),
            usage,
            finish_reason: choice.finish_reason,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| self.remote_error("", format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_api_response(
                &self.name,
                "",
                status.as_u16(),
                &error_text,
            ));
        }

        let list: ModelList = response
            .json()
            .await
            .map_err(|e| self.remote_error("", format!("Failed to parse model list: {}", e)))?;

        let mut models: Vec<String> = list.data.into_iter().map(|m| m.id).collect();
        models.sort();
        models.dedup();
        Ok(models)
    }
}
