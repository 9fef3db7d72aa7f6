//! The text-completion capability: one schema-constrained request in, raw
//! JSON text out.
//!
//! [`CompletionService`] is the seam the extraction adapter depends on.
//! Implementations must classify every failure into an [`ErrorKind`] so the
//! adapter can tell transient failures from final ones without knowing
//! anything about the wire protocol.

use crate::config::PipelineConfig;
use crate::error::{ErrorKind, PipelineError};
use crate::prompts::schema_instruction;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A single schema-constrained completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    /// JSON-Schema the answer must satisfy.
    pub schema: Value,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// A classified completion failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CompletionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for CompletionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for CompletionError {}

#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Issue exactly one request. No retries here.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}

/// [`CompletionService`] backed by an `edgequake-llm` provider.
pub struct LlmCompletion {
    provider: Arc<dyn LLMProvider>,
    timeout: Duration,
}

impl LlmCompletion {
    pub fn new(provider: Arc<dyn LLMProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Resolve a provider from `config` (see [`resolve_provider`]).
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(
            provider,
            Duration::from_secs(config.adapter.request_timeout_secs.max(1)),
        ))
    }
}

#[async_trait]
impl CompletionService for LlmCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let messages = build_messages(request);
        let options = build_options(request);

        let call = self.provider.chat(&messages, Some(&options));
        let response = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| {
                CompletionError::new(
                    ErrorKind::TimedOut,
                    format!("no response within {}s", self.timeout.as_secs()),
                )
            })?
            .map_err(|e| {
                let message = e.to_string();
                CompletionError::new(classify_llm_error(&message), message)
            })?;

        debug!(
            input_tokens = response.prompt_tokens,
            output_tokens = response.completion_tokens,
            "Completion received"
        );

        if response.content.trim().is_empty() {
            return Err(CompletionError::new(
                ErrorKind::SchemaViolation,
                "empty response from model",
            ));
        }
        Ok(response.content)
    }
}

/// System turn with the schema contract appended, then the user turn.
fn build_messages(request: &CompletionRequest) -> Vec<ChatMessage> {
    let system = format!("{}{}", request.system, schema_instruction(&request.schema));
    vec![
        ChatMessage::system(system.as_str()),
        ChatMessage::user(request.user.as_str()),
    ]
}

/// Sampling options plus JSON mode, so the provider only emits an object.
fn build_options(request: &CompletionRequest) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(request.temperature),
        max_tokens: Some(request.max_tokens),
        response_format: Some("json_object".to_string()),
        ..Default::default()
    }
}

/// Map a provider error message onto the failure taxonomy.
///
/// Providers surface HTTP status and transport failures through their
/// message text, so classification is by substring. Anything unrecognised
/// is final.
pub fn classify_llm_error(message: &str) -> ErrorKind {
    let m = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| m.contains(n));

    if has(&["429", "rate limit", "rate_limit", "ratelimit", "too many requests"]) {
        ErrorKind::RateLimited
    } else if has(&[
        "401",
        "403",
        "unauthorized",
        "forbidden",
        "authentication",
        "api key",
        "api_key",
    ]) {
        ErrorKind::Auth
    } else if has(&["timed out", "timeout", "deadline"]) {
        ErrorKind::TimedOut
    } else if has(&[
        "connection",
        "connect error",
        "network",
        "dns",
        "broken pipe",
        "reset by peer",
    ]) {
        ErrorKind::ConnectionFailed
    } else if has(&[
        "500",
        "502",
        "503",
        "504",
        "internal server",
        "bad gateway",
        "service unavailable",
        "overloaded",
    ]) {
        ErrorKind::UpstreamInternal
    } else {
        ErrorKind::MalformedRequest
    }
}

/// Instantiate a named provider with the given model.
fn create_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        PipelineError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) with `config.adapter.model`.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        return create_provider(name, &config.adapter.model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_provider("openai", &config.adapter.model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| PipelineError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RESULT_SCHEMA;

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "You extract contract terms.".into(),
            user: "This Agreement".into(),
            schema: RESULT_SCHEMA.clone(),
            temperature: 0.1,
            max_tokens: 2048,
        }
    }

    #[test]
    fn build_options_requests_json_mode() {
        let opts = build_options(&request());
        assert_eq!(opts.response_format.as_deref(), Some("json_object"));
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(2048));
    }

    #[test]
    fn system_turn_carries_the_request_schema() {
        let mut req = request();
        req.schema = serde_json::json!({"type": "object", "required": ["marker_field"]});
        let messages = build_messages(&req);
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.starts_with("You extract contract terms."));
        assert!(messages[0].content.contains("marker_field"));
        assert_eq!(messages[1].content, "This Agreement");
    }

    #[test]
    fn classifies_transient_messages() {
        assert_eq!(
            classify_llm_error("API error: 429 Too Many Requests"),
            ErrorKind::RateLimited
        );
        assert_eq!(
            classify_llm_error("Rate limit exceeded, retry later"),
            ErrorKind::RateLimited
        );
        assert_eq!(
            classify_llm_error("request timed out after 60s"),
            ErrorKind::TimedOut
        );
        assert_eq!(
            classify_llm_error("error sending request: connection refused"),
            ErrorKind::ConnectionFailed
        );
        assert_eq!(
            classify_llm_error("HTTP 503 Service Unavailable"),
            ErrorKind::UpstreamInternal
        );
        assert_eq!(
            classify_llm_error("The server is overloaded"),
            ErrorKind::UpstreamInternal
        );
    }

    #[test]
    fn classifies_final_messages() {
        assert_eq!(
            classify_llm_error("401 Unauthorized: invalid api key"),
            ErrorKind::Auth
        );
        assert_eq!(
            classify_llm_error("400 Bad Request: unknown parameter"),
            ErrorKind::MalformedRequest
        );
        assert_eq!(classify_llm_error("something odd"), ErrorKind::MalformedRequest);
    }

    #[test]
    fn every_transient_classification_is_on_the_allow_list() {
        for msg in ["429", "timeout", "network unreachable", "502 Bad Gateway"] {
            assert!(classify_llm_error(msg).is_transient(), "{msg}");
        }
    }

    #[test]
    fn completion_error_display() {
        let e = CompletionError::new(ErrorKind::RateLimited, "slow down");
        assert_eq!(e.to_string(), "rate-limited: slow down");
    }
}
