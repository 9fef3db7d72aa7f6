//! Configuration types for the extraction pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. The per-stage [`StagePolicy`] values are
//! constructed once here and handed to the orchestrator; nothing reads
//! configuration from the environment after `build()`.
//!
//! # Design choice: builder over constructor
//! The config has a couple of dozen knobs. The builder lets callers set only
//! what they care about and rely on documented defaults for the rest.

use crate::error::{ErrorKind, PipelineError};
use crate::retry::RetryPolicy;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const MIB: usize = 1024 * 1024;

// ── Parser ───────────────────────────────────────────────────────────────

/// Limits enforced by the validator before any page-level work runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Byte-length ceiling. Default: 25 MiB.
    pub max_file_size_bytes: usize,
    /// Page-count ceiling. Default: 100.
    pub max_pages: usize,
    /// Inserted between pages in the concatenated text. Default: blank line.
    pub page_separator: PageSeparator,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 25 * MIB,
            max_pages: 100,
            page_separator: PageSeparator::default(),
        }
    }
}

/// How to separate pages in the concatenated document text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum PageSeparator {
    /// "\n\n" (default)
    #[default]
    BlankLine,
    /// ASCII form feed on its own line: "\n\x0C\n"
    FormFeed,
    /// Marker with page number: "\n\n--- page N ---\n\n"
    Marker,
    /// Custom string surrounded by blank lines.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator placed *before* `page_num` (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::BlankLine => "\n\n".to_string(),
            PageSeparator::FormFeed => "\n\x0C\n".to_string(),
            PageSeparator::Marker => format!("\n\n--- page {} ---\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}

// ── Adapter ──────────────────────────────────────────────────────────────

/// Structured-extraction adapter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterSettings {
    /// Model identifier, recorded on every result row. Default: "gpt-4o-mini".
    pub model: String,

    /// Character budget for the document text. Default: 200 000.
    ///
    /// Text beyond the budget is dropped; there is no chunking.
    pub max_input_chars: usize,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Extraction is transcription, not generation: keep it near zero.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 4096.
    pub max_tokens: usize,

    /// Retry policy for transient completion failures. Default: 3 attempts,
    /// 1 s initial, ×2, capped at 60 s.
    pub retry: RetryPolicy,

    /// Per-request timeout in seconds. Default: 60.
    pub request_timeout_secs: u64,

    /// Custom system prompt. If None, uses the built-in contract prompt.
    pub system_prompt: Option<String>,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_input_chars: 200_000,
            temperature: 0.1,
            max_tokens: 4096,
            retry: RetryPolicy::default(),
            request_timeout_secs: 60,
            system_prompt: None,
        }
    }
}

// ── Stage policies ───────────────────────────────────────────────────────

/// Timeout and retry behaviour for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagePolicy {
    /// Wall-clock budget for a single attempt.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

/// The three stage policies, fixed at pipeline construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagePolicies {
    pub parse: StagePolicy,
    pub extract: StagePolicy,
    pub persist: StagePolicy,
}

impl Default for StagePolicies {
    fn default() -> Self {
        Self {
            parse: StagePolicy {
                timeout: Duration::from_secs(5 * 60),
                retry: RetryPolicy::new(2).with_non_retryable([
                    ErrorKind::Validation,
                    ErrorKind::Parse,
                    ErrorKind::NotFound,
                    ErrorKind::Conflict,
                ]),
            },
            extract: StagePolicy {
                timeout: Duration::from_secs(2 * 60),
                retry: RetryPolicy::new(3)
                    .with_backoff(Duration::from_secs(2), 2.0, Duration::from_secs(30))
                    .with_non_retryable([
                        ErrorKind::EmptyInput,
                        ErrorKind::Auth,
                        ErrorKind::MalformedRequest,
                        ErrorKind::SchemaViolation,
                        ErrorKind::RetriesExhausted,
                    ]),
            },
            persist: StagePolicy {
                timeout: Duration::from_secs(60),
                retry: RetryPolicy::new(3)
                    .with_backoff(Duration::from_secs(1), 2.0, Duration::from_secs(10))
                    .with_non_retryable([ErrorKind::NotFound]),
            },
        }
    }
}

impl StagePolicies {
    /// Whether a [`crate::error::ParseError`] ends the run.
    pub fn parse_errors_are_final(&self) -> bool {
        !self.parse.retry.allows_retry(ErrorKind::Parse)
    }

    fn validate(&self) -> Result<(), String> {
        for (name, policy) in [
            ("parse", &self.parse),
            ("extract", &self.extract),
            ("persist", &self.persist),
        ] {
            if policy.timeout.is_zero() {
                return Err(format!("{name}: stage timeout must be > 0"));
            }
            policy.retry.validate(name)?;
        }
        Ok(())
    }
}

// ── Pipeline config ──────────────────────────────────────────────────────

/// Configuration for the whole pipeline.
///
/// Built via [`PipelineConfig::builder()`], [`PipelineConfig::from_env()`]
/// or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_extract::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .model("gpt-4o-mini")
///     .max_pages(50)
///     .concurrency(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.parser.max_pages, 50);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    pub parser: ParserConfig,
    pub adapter: AdapterSettings,
    pub policies: StagePolicies,

    /// Bucket holding submitted bytes (`{document_id}.pdf`). Default: "uploads".
    pub uploads_bucket: String,

    /// Bucket holding result artifacts (`{document_id}.json`). Default: "extractions".
    pub results_bucket: String,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pipelines run concurrently by [`crate::dispatch::run_batch`]. Default: 4.
    pub concurrency: usize,

    /// Download timeout for URL sources in seconds. Default: 120.
    pub download_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parser: ParserConfig::default(),
            adapter: AdapterSettings::default(),
            policies: StagePolicies::default(),
            uploads_bucket: "uploads".to_string(),
            results_bucket: "extractions".to_string(),
            provider_name: None,
            provider: None,
            concurrency: 4,
            download_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("parser", &self.parser)
            .field("adapter", &self.adapter)
            .field("policies", &self.policies)
            .field("uploads_bucket", &self.uploads_bucket)
            .field("results_bucket", &self.results_bucket)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Defaults overridden by `EXTRACT_*` environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `EXTRACT_MODEL` | `adapter.model` |
    /// | `EXTRACT_MAX_CHARS` | `adapter.max_input_chars` |
    /// | `EXTRACT_TEMPERATURE` | `adapter.temperature` |
    /// | `EXTRACT_MAX_RETRIES` | `adapter.retry.max_attempts` |
    /// | `EXTRACT_MAX_FILE_MB` | `parser.max_file_size_bytes` |
    /// | `EXTRACT_MAX_PAGES` | `parser.max_pages` |
    /// | `EXTRACT_UPLOADS_BUCKET` | `uploads_bucket` |
    /// | `EXTRACT_RESULTS_BUCKET` | `results_bucket` |
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::builder()
            .apply_env(|key| std::env::var(key).ok())?
            .build()
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, PipelineError> {
    raw.trim()
        .parse()
        .map_err(|_| PipelineError::InvalidConfig(format!("{key}: cannot parse '{raw}'")))
}

impl PipelineConfigBuilder {
    /// Apply `EXTRACT_*` overrides read through `lookup`.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("EXTRACT_MODEL") {
            self = self.model(v);
        }
        if let Some(v) = lookup("EXTRACT_MAX_CHARS") {
            self = self.max_input_chars(parse_var("EXTRACT_MAX_CHARS", &v)?);
        }
        if let Some(v) = lookup("EXTRACT_TEMPERATURE") {
            self = self.temperature(parse_var("EXTRACT_TEMPERATURE", &v)?);
        }
        if let Some(v) = lookup("EXTRACT_MAX_RETRIES") {
            self = self.max_retries(parse_var("EXTRACT_MAX_RETRIES", &v)?);
        }
        if let Some(v) = lookup("EXTRACT_MAX_FILE_MB") {
            let mb: usize = parse_var("EXTRACT_MAX_FILE_MB", &v)?;
            self = self.max_file_size_bytes(mb.saturating_mul(MIB));
        }
        if let Some(v) = lookup("EXTRACT_MAX_PAGES") {
            self = self.max_pages(parse_var("EXTRACT_MAX_PAGES", &v)?);
        }
        if let Some(v) = lookup("EXTRACT_UPLOADS_BUCKET") {
            self = self.uploads_bucket(v);
        }
        if let Some(v) = lookup("EXTRACT_RESULTS_BUCKET") {
            self = self.results_bucket(v);
        }
        Ok(self)
    }

    pub fn max_file_size_bytes(mut self, n: usize) -> Self {
        self.config.parser.max_file_size_bytes = n;
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.parser.max_pages = n;
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.parser.page_separator = sep;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.adapter.model = model.into();
        self
    }

    pub fn max_input_chars(mut self, n: usize) -> Self {
        self.config.adapter.max_input_chars = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.adapter.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.adapter.max_tokens = n;
        self
    }

    /// Total completion attempts for transient failures (1 = no retry).
    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.adapter.retry.max_attempts = n;
        self
    }

    pub fn adapter_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.adapter.retry = policy;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.adapter.request_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.adapter.system_prompt = Some(prompt.into());
        self
    }

    pub fn uploads_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.config.uploads_bucket = bucket.into();
        self
    }

    pub fn results_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.config.results_bucket = bucket.into();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn parse_policy(mut self, policy: StagePolicy) -> Self {
        self.config.policies.parse = policy;
        self
    }

    pub fn extract_policy(mut self, policy: StagePolicy) -> Self {
        self.config.policies.extract = policy;
        self
    }

    pub fn persist_policy(mut self, policy: StagePolicy) -> Self {
        self.config.policies.persist = policy;
        self
    }

    /// Let the parse stage retry structural [`crate::error::ParseError`]s.
    ///
    /// Off by default: re-reading unchanged corrupt bytes rarely helps. When
    /// on, the parse stage no longer marks the document failed on a parse
    /// error, and an exhausted budget leaves it pending for a later restart.
    pub fn retry_parse_errors(mut self, enabled: bool) -> Self {
        let retry = &mut self.config.policies.parse.retry;
        if enabled {
            *retry = retry.clone().without_non_retryable(ErrorKind::Parse);
        } else {
            *retry = retry.clone().with_non_retryable([ErrorKind::Parse]);
        }
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.parser.max_file_size_bytes == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_file_size_bytes must be > 0".into(),
            ));
        }
        if c.parser.max_pages == 0 {
            return Err(PipelineError::InvalidConfig("max_pages must be ≥ 1".into()));
        }
        if c.adapter.max_input_chars == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_input_chars must be > 0".into(),
            ));
        }
        if c.adapter.model.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("model must not be empty".into()));
        }
        if c.uploads_bucket.is_empty() || c.results_bucket.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "bucket names must not be empty".into(),
            ));
        }
        c.adapter
            .retry
            .validate("adapter")
            .map_err(PipelineError::InvalidConfig)?;
        c.policies.validate().map_err(PipelineError::InvalidConfig)?;
        Ok(self.config)
    }
}
