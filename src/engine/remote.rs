use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::config::RemoteConfig;
use crate::error::{RecapError, Result};
use crate::level::SummaryLevel;
use crate::parse::{ResponseParser, StructuredSummary};
use crate::prompt::{self, PromptMessages};
use crate::secrets::SecretStore;

use super::{EngineTier, RequestContext, SummarizationEngine};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Wire shape of the hosted chat API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }

    #[must_use]
    pub const fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
        }
    }

    const fn endpoint(self) -> &'static str {
        match self {
            Self::OpenAi => "chat/completions",
            Self::Anthropic => "messages",
        }
    }

    /// Whether `model` belongs to this provider's catalog.
    fn accepts_model(self, model: &str) -> bool {
        let claude = model.starts_with("claude-");
        match self {
            Self::Anthropic => claude,
            Self::OpenAi => !claude,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = RecapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(RecapError::Config(format!(
                "unknown remote provider: {other} (available: openai, anthropic)"
            ))),
        }
    }
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    text: Option<String>,
}

/// Hosted chat API tier. Sends transcript text off the device.
pub struct RemoteEngine {
    client: Client,
    config: RemoteConfig,
    secrets: Arc<dyn SecretStore>,
    calls: Mutex<u64>,
}

impl fmt::Debug for RemoteEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteEngine")
            .field("provider", &self.config.provider)
            .field("model", &self.config.model)
            .field("base_url", &self.base_url())
            .finish_non_exhaustive()
    }
}

impl RemoteEngine {
    pub fn new(config: RemoteConfig, secrets: Arc<dyn SecretStore>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| RecapError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            secrets,
            calls: Mutex::new(0),
        })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or_else(|| self.config.provider.default_base_url())
            .trim_end_matches('/')
    }

    /// Completed API requests, successful or not.
    pub async fn calls(&self) -> u64 {
        *self.calls.lock().await
    }

    fn check_model(&self) -> Result<()> {
        let provider = self.config.provider;
        if provider.accepts_model(&self.config.model) {
            return Ok(());
        }
        Err(RecapError::Config(format!(
            "model {} cannot be used with the {provider} provider",
            self.config.model
        )))
    }

    /// Fetched per request and never kept.
    fn credential(&self) -> Result<String> {
        let provider = self.config.provider.as_str();
        self.secrets.get(provider)?.ok_or_else(|| {
            RecapError::Config(format!("no API key stored for the {provider} provider"))
        })
    }

    async fn check_endpoint(&self) -> Result<()> {
        let unavailable = |reason: String| RecapError::Unavailable {
            tier: EngineTier::Remote,
            reason,
        };

        let url = Url::parse(self.base_url())
            .map_err(|e| RecapError::Config(format!("invalid remote base URL: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| RecapError::Config("remote base URL has no host".to_string()))?;
        let port = url.port_or_known_default().unwrap_or(443);

        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(unavailable(format!("{host}:{port} unreachable: {e}"))),
            Err(_) => Err(unavailable(format!("{host}:{port} did not answer in time"))),
        }
    }

    fn request_body(&self, messages: &PromptMessages) -> serde_json::Value {
        match self.config.provider {
            ProviderKind::OpenAi => json!({
                "model": self.config.model,
                "messages": [
                    {"role": "system", "content": messages.system},
                    {"role": "user", "content": messages.user},
                ],
                "temperature": self.config.temperature,
                "max_tokens": self.config.max_tokens,
            }),
            ProviderKind::Anthropic => json!({
                "model": self.config.model,
                "max_tokens": self.config.max_tokens,
                "system": messages.system,
                "messages": [
                    {"role": "user", "content": messages.user},
                ],
                "temperature": self.config.temperature,
            }),
        }
    }

    async fn complete(&self, messages: &PromptMessages) -> Result<String> {
        let key = self.credential()?;
        let url = format!("{}/{}", self.base_url(), self.config.provider.endpoint());

        let mut request = self.client.post(&url).json(&self.request_body(messages));
        request = match self.config.provider {
            ProviderKind::OpenAi => request.bearer_auth(&key),
            ProviderKind::Anthropic => request
                .header("x-api-key", &key)
                .header("anthropic-version", ANTHROPIC_VERSION),
        };

        let resp = request.send().await.map_err(classify_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &body));
        }

        let content = match self.config.provider {
            ProviderKind::OpenAi => resp
                .json::<OpenAiResponse>()
                .await
                .map_err(classify_decode)?
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content),
            ProviderKind::Anthropic => resp
                .json::<AnthropicResponse>()
                .await
                .map_err(classify_decode)?
                .content
                .into_iter()
                .next()
                .and_then(|b| b.text),
        };

        content.ok_or_else(|| RecapError::Generation("response had no text content".to_string()))
    }
}

fn classify_transport(e: reqwest::Error) -> RecapError {
    if e.is_timeout() || e.is_connect() {
        return RecapError::TransientRemote {
            status: None,
            retry_after_secs: None,
            message: e.to_string(),
        };
    }
    RecapError::Network(format!("remote request failed: {e}"))
}

/// A body that stops arriving is a timeout, not a malformed reply.
fn classify_decode(e: reqwest::Error) -> RecapError {
    if e.is_timeout() {
        return classify_transport(e);
    }
    RecapError::Generation(format!("failed to decode response: {e}"))
}

/// Map a non-success status to the error a caller should act on.
fn classify_status(status: StatusCode, retry_after_secs: Option<u64>, body: &str) -> RecapError {
    let code = status.as_u16();
    let detail: String = body.chars().take(300).collect();
    match code {
        401 | 403 => RecapError::Config(format!("remote authentication failed ({status}): {detail}")),
        408 | 429 | 500..=599 => RecapError::TransientRemote {
            status: Some(code),
            retry_after_secs,
            message: detail,
        },
        400 | 404 | 422 => RecapError::Config(format!("remote rejected the request ({status}): {detail}")),
        _ => RecapError::Generation(format!("remote returned {status}: {detail}")),
    }
}

impl SummarizationEngine for RemoteEngine {
    fn tier(&self) -> EngineTier {
        EngineTier::Remote
    }

    async fn readiness(&self) -> Result<()> {
        self.check_model()?;
        self.credential()?;
        self.check_endpoint().await
    }

    async fn summarize(
        &self,
        level: SummaryLevel,
        text: &str,
        ctx: &RequestContext,
    ) -> Result<StructuredSummary> {
        self.check_model()?;
        let messages = prompt::build_messages(level, text, &ctx.metadata);

        let mut calls = self.calls.lock().await;
        let mut cancel = ctx.cancel.clone();
        let raw = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RecapError::Cancelled),
            raw = self.complete(&messages) => raw,
        };
        *calls += 1;
        drop(calls);

        let raw = raw?;
        Ok(ResponseParser::parse(level, &raw, text)?.with_tier(EngineTier::Remote))
    }
}
