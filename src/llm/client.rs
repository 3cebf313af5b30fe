//! Reasoning provider seam, the OpenRouter adapter and the retrying client.

use super::guardrails::{self, GuardrailRejection};
use super::parse::parse_fix_response;
use super::prompts::{direct_fix_prompt, DIRECT_FIX_SYSTEM};
use super::retry::RetryPolicy;
use crate::config::Config;
use crate::error::ProviderError;
use crate::types::FileChange;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// OpenRouter direct API URL (BYOK mode)
const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Token usage as reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        if self.total_tokens > 0 {
            self.total_tokens
        } else {
            self.prompt_tokens + self.completion_tokens
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// Characters sent to the provider, for usage approximation.
    pub fn prompt_chars(&self) -> usize {
        self.system.chars().count()
            + self
                .messages
                .iter()
                .map(|m| m.content.chars().count())
                .sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub usage: Option<Usage>,
}

/// One external reasoning service.
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError>;
}

// ═══════════════════════════════════════════════════════════════════════════
//  OPENROUTER
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

/// Error object OpenRouter embeds in otherwise successful responses.
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    message: String,
}

pub struct OpenRouterProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenRouterProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Other(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        let api_key = config.api_key().ok_or(ProviderError::MissingApiKey)?;
        Self::new(api_key, config.model.clone(), config.request_timeout())
    }
}

#[async_trait]
impl ReasoningProvider for OpenRouterProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(WireMessage {
            role: Role::System,
            content: &request.system,
        });
        messages.extend(request.messages.iter().map(|m| WireMessage {
            role: m.role,
            content: &m.content,
        }));
        let body = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: request.max_tokens,
            stream: false,
        };

        let response = self
            .http
            .post(OPENROUTER_URL)
            .header("Content-Type", "application/json")
            .header("HTTP-Referer", "https://github.com/migrate-doctor")
            .header("X-Title", "migrate-doctor")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| ProviderError::from_reqwest(&e))?;

        if !status.is_success() {
            return Err(ProviderError::Http {
                status: status.as_u16(),
                message: truncate_str(&text, 200).to_string(),
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            ProviderError::InvalidResponse(format!("{} ({})", e, truncate_str(&text, 200)))
        })?;

        if let Some(err) = parsed.error {
            return Err(classify_embedded_error(err));
        }

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("response contained no choices".to_string()))?;

        Ok(Completion {
            content,
            usage: parsed.usage,
        })
    }
}

fn classify_embedded_error(err: ErrorBody) -> ProviderError {
    let code = err.code.as_ref().and_then(|c| match c {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    });
    match code {
        Some(429) => ProviderError::Throttled(err.message),
        Some(502) | Some(503) | Some(529) => ProviderError::Unavailable(err.message),
        Some(status) if (400..600).contains(&status) => ProviderError::Http {
            status: status as u16,
            message: err.message,
        },
        _ => ProviderError::Other(err.message),
    }
}

/// Truncate a string for display (Unicode-safe)
pub(crate) fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  REASONING CLIENT
// ═══════════════════════════════════════════════════════════════════════════

/// A single-shot fix request for callers that already hold the file content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectFixRequest {
    pub error_message: String,
    pub file_path: String,
    pub file_content: String,
    /// Explicit rules the fix must respect (e.g. "do not change package versions").
    pub constraints: Vec<String>,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectFixResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Vec<FileChange>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<GuardrailRejection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the caller may try the same request again.
    #[serde(default)]
    pub retryable: bool,
}

impl DirectFixResponse {
    fn rejected(rejection: GuardrailRejection) -> Self {
        Self {
            success: false,
            reasoning: Some(rejection.to_string()),
            rejection: Some(rejection),
            retryable: false,
            ..Self::default()
        }
    }

    fn provider_failure(err: &ProviderError) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            retryable: err.is_retryable(),
            ..Self::default()
        }
    }
}

/// The reasoning provider wrapped in the retry policy.
#[derive(Clone)]
pub struct ReasoningClient {
    provider: Arc<dyn ReasoningProvider>,
    retry: RetryPolicy,
    max_tokens: u32,
}

impl ReasoningClient {
    pub fn new(provider: Arc<dyn ReasoningProvider>, retry: RetryPolicy) -> Self {
        Self {
            provider,
            retry,
            max_tokens: Config::default().max_completion_tokens,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    /// One completion, retried per the policy.
    pub async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let provider: &dyn ReasoningProvider = self.provider.as_ref();
        self.retry.run(move || provider.complete(request)).await
    }

    /// Guarded single-shot fix: pre-check the request, call the provider, and
    /// reject responses that touch the dependency manifest.
    pub async fn request_fix(&self, request: &DirectFixRequest) -> DirectFixResponse {
        if let Err(rejection) = guardrails::check_request(request) {
            tracing::info!(reason = %rejection, "fix request rejected before provider call");
            return DirectFixResponse::rejected(rejection);
        }

        let completion = CompletionRequest {
            system: DIRECT_FIX_SYSTEM.to_string(),
            messages: vec![ChatMessage::user(direct_fix_prompt(request))],
            max_tokens: self.max_tokens,
        };
        let response = match self.complete(&completion).await {
            Ok(r) => r,
            Err(err) => {
                tracing::warn!(error = %err, "direct fix provider call failed");
                return DirectFixResponse::provider_failure(&err);
            }
        };

        let parsed = match parse_fix_response(&response.content, &request.file_path) {
            Ok(p) => p,
            Err(e) => {
                return DirectFixResponse {
                    success: false,
                    error: Some(format!("Could not parse provider response: {}", e)),
                    retryable: true,
                    ..DirectFixResponse::default()
                }
            }
        };

        if let Err(rejection) = guardrails::check_response(&parsed.changes) {
            tracing::info!(reason = %rejection, "fix response rejected after provider call");
            return DirectFixResponse::rejected(rejection);
        }

        DirectFixResponse {
            success: !parsed.changes.is_empty(),
            changes: Some(parsed.changes),
            reasoning: Some(parsed.reasoning),
            confidence: Some(parsed.confidence),
            ..DirectFixResponse::default()
        }
    }
}
