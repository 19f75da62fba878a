//! OpenAI-compatible chat completions, shared by the generator and the
//! classifier. Transient failures (429, 408, 5xx, transport errors) are
//! retried with exponential backoff plus jitter.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::generator::UsageMetadata;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_JITTER_MS: u64 = 120;

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl LlmConfig {
    /// `LLM_API_KEY`, `LLM_MODEL`, `LLM_API_ENDPOINT` and `LLM_TIMEOUT` (ms).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            api_key: var("LLM_API_KEY"),
            model: var("LLM_MODEL").unwrap_or(defaults.model),
            endpoint: with_version_suffix(&var("LLM_API_ENDPOINT").unwrap_or(defaults.endpoint)),
            timeout: var("LLM_TIMEOUT")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// One completion request. Classification asks for a short, deterministic
/// answer; generation leaves sampling to the model defaults.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![
                ChatMessage {
                    role: ChatRole::System,
                    content: system.into(),
                },
                ChatMessage {
                    role: ChatRole::User,
                    content: user.into(),
                },
            ],
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    stream: bool,
    #[serde(flatten)]
    request: &'a ChatRequest,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: Option<i64>,
    completion_tokens: Option<i64>,
    total_tokens: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: UsageMetadata,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm not configured: missing {0}")]
    NotConfigured(&'static str),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("llm returned HTTP {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("malformed completion: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("completion had no content")]
    Empty,
}

impl LlmError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => {
                *status == reqwest::StatusCode::TOO_MANY_REQUESTS
                    || *status == reqwest::StatusCode::REQUEST_TIMEOUT
                    || status.is_server_error()
            }
            _ => false,
        }
    }
}

#[derive(Clone)]
pub struct LlmClient {
    config: LlmConfig,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    pub fn from_env() -> Self {
        Self::new(LlmConfig::from_env())
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn is_configured(&self) -> bool {
        self.api_key().is_some() && !self.config.model.trim().is_empty()
    }

    fn api_key(&self) -> Option<&str> {
        self.config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
    }

    pub async fn complete(&self, request: &ChatRequest) -> Result<Completion, LlmError> {
        let api_key = self.api_key().ok_or(LlmError::NotConfigured("LLM_API_KEY"))?;
        let url = format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'));
        let body = WireRequest {
            model: &self.config.model,
            stream: false,
            request,
        };

        let mut attempt = 1;
        let response = loop {
            match self.send(&url, api_key, &body).await {
                Ok(response) => break response,
                Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(attempt, error = %err, "llm call failed, retrying");
                    tokio::time::sleep(backoff(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        };

        let text = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(LlmError::Empty)?;
        let usage = response.usage;
        Ok(Completion {
            text,
            usage: UsageMetadata {
                model: response.model.or_else(|| Some(self.config.model.clone())),
                prompt_tokens: usage.as_ref().and_then(|u| u.prompt_tokens),
                completion_tokens: usage.as_ref().and_then(|u| u.completion_tokens),
                total_tokens: usage.as_ref().and_then(|u| u.total_tokens),
            },
        })
    }

    async fn send(
        &self,
        url: &str,
        api_key: &str,
        body: &WireRequest<'_>,
    ) -> Result<WireResponse, LlmError> {
        let resp = self
            .http
            .post(url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Status { status, body });
        }
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Delay before retry number `attempt` (1-based).
fn backoff(attempt: u32) -> Duration {
    let jitter = rand::rng().random_range(0..=BACKOFF_JITTER_MS);
    BACKOFF_BASE * 2u32.pow(attempt.saturating_sub(1)) + Duration::from_millis(jitter)
}

fn with_version_suffix(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.ends_with("/v1") || trimmed.contains("/v1/") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}
