//! Structured extraction adapter: text → schema-validated result.
//!
//! Thin by intent. Prompt wording lives in [`crate::prompts`], wire
//! mechanics in [`crate::completion`]; this module owns truncation, the
//! transient-retry loop and payload validation.
//!
//! ## Retry Strategy
//!
//! Only the four transient kinds (rate-limited, connection-failed,
//! timed-out, upstream-internal) are retried, with capped exponential
//! backoff. With the defaults (1 s, ×2, cap 60 s, 3 attempts) the waits are
//! 1 s → 2 s. Every other kind, including a schema violation, is final on
//! first sight.

use crate::completion::{CompletionRequest, CompletionService};
use crate::config::AdapterSettings;
use crate::error::{AdapterError, ErrorKind};
use crate::prompts::{user_prompt, DEFAULT_SYSTEM_PROMPT};
use crate::schema::{validate_payload, ContractExtraction, RESULT_SCHEMA};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Keep a sentence-boundary cut only if it retains at least this share of
/// the budget.
const SENTENCE_CUT_MIN_RATIO: f64 = 0.8;

/// The structured-extraction adapter.
#[derive(Clone)]
pub struct ExtractionAdapter {
    service: Arc<dyn CompletionService>,
    settings: AdapterSettings,
}

impl ExtractionAdapter {
    pub fn new(service: Arc<dyn CompletionService>, settings: AdapterSettings) -> Self {
        Self { service, settings }
    }

    /// Model identifier recorded on result rows.
    pub fn model(&self) -> &str {
        &self.settings.model
    }

    /// Extract a [`ContractExtraction`] from document text.
    ///
    /// Success means the whole payload validated. Anything else is an
    /// [`AdapterError`].
    pub async fn extract(&self, text: &str) -> Result<ContractExtraction, AdapterError> {
        if text.trim().is_empty() {
            return Err(AdapterError::EmptyInput);
        }

        let input = truncate_text(text, self.settings.max_input_chars);
        let request = self.build_request(input);
        let policy = &self.settings.retry;

        let mut attempt: u32 = 1;
        loop {
            let failure = match self.service.complete(&request).await {
                Ok(raw) => match validate_payload(&raw) {
                    Ok(payload) => {
                        info!(
                            attempt,
                            confidence = payload.confidence,
                            "Extraction validated"
                        );
                        return Ok(payload);
                    }
                    Err(violation) => {
                        warn!(attempt, error = %violation, "Model payload rejected");
                        return Err(AdapterError::Rejected {
                            kind: ErrorKind::SchemaViolation,
                            message: violation.to_string(),
                        });
                    }
                },
                Err(e) => e,
            };

            if !failure.kind.is_transient() {
                warn!(attempt, kind = %failure.kind, "Non-retryable completion error");
                return Err(AdapterError::Rejected {
                    kind: failure.kind,
                    message: failure.message,
                });
            }

            if !policy.should_retry(failure.kind, attempt) {
                warn!(
                    attempts = attempt,
                    kind = %failure.kind,
                    "Completion retries exhausted"
                );
                return Err(AdapterError::RetriesExhausted {
                    kind: failure.kind,
                    attempts: attempt,
                    message: failure.message,
                });
            }

            let backoff = policy.backoff_for(attempt);
            warn!(
                "Completion attempt {}/{} failed ({}); retrying in {:?}",
                attempt, policy.max_attempts, failure.kind, backoff
            );
            sleep(backoff).await;
            attempt += 1;
        }
    }

    fn build_request(&self, text: &str) -> CompletionRequest {
        let system = self
            .settings
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        CompletionRequest {
            system: system.to_string(),
            user: user_prompt(text),
            schema: RESULT_SCHEMA.clone(),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        }
    }
}

/// Cut `text` to at most `max_chars` characters.
///
/// Prefers ending on a sentence boundary when that keeps at least 80% of
/// the budget. Content past the budget is dropped.
pub fn truncate_text(text: &str, max_chars: usize) -> &str {
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return text;
    };
    let head = &text[..cut];

    let min_keep = (max_chars as f64 * SENTENCE_CUT_MIN_RATIO) as usize;
    let truncated = match head.rfind('.') {
        Some(dot) if head[..dot].chars().count() >= min_keep => &head[..=dot],
        _ => head,
    };

    warn!(
        original_chars = text.chars().count(),
        kept_chars = truncated.chars().count(),
        "Document text truncated to the character budget"
    );
    debug!(budget = max_chars, "Truncation applied");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionError;
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    fn payload() -> String {
        json!({
            "parties": {"party_one": "Acme", "party_two": "Widget", "additional_parties": []},
            "dates": {"effective_date": null, "termination_date": null, "term_length": null},
            "clauses": {
                "governing_law": "Delaware", "termination": null, "confidentiality": null,
                "indemnification": null, "limitation_of_liability": null,
                "dispute_resolution": null, "payment_terms": null, "intellectual_property": null
            },
            "confidence": 0.9,
            "summary": null
        })
        .to_string()
    }

    /// Replays scripted responses and records when each call arrived.
    struct Scripted {
        responses: Mutex<VecDeque<Result<String, CompletionError>>>,
        fallback: Result<String, CompletionError>,
        calls: Mutex<Vec<Instant>>,
        last: Mutex<Option<CompletionRequest>>,
    }

    impl Scripted {
        fn new(
            responses: Vec<Result<String, CompletionError>>,
            fallback: Result<String, CompletionError>,
        ) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                fallback,
                calls: Mutex::new(Vec::new()),
                last: Mutex::new(None),
            })
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionService for Scripted {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
            self.calls.lock().unwrap().push(Instant::now());
            *self.last.lock().unwrap() = Some(request.clone());
            let next = self.responses.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }
    }

    fn rate_limited() -> Result<String, CompletionError> {
        Err(CompletionError::new(ErrorKind::RateLimited, "429"))
    }

    fn adapter(service: Arc<Scripted>, retry: RetryPolicy) -> ExtractionAdapter {
        ExtractionAdapter::new(
            service,
            AdapterSettings {
                retry,
                ..AdapterSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn empty_text_never_calls_the_service() {
        let svc = Scripted::new(vec![], Ok(payload()));
        let err = adapter(svc.clone(), RetryPolicy::default())
            .extract(" \n\t ")
            .await
            .unwrap_err();
        assert_eq!(err, AdapterError::EmptyInput);
        assert!(svc.call_times().is_empty());
    }

    #[tokio::test]
    async fn valid_payload_returns_first_time() {
        let svc = Scripted::new(vec![], Ok(payload()));
        let out = adapter(svc.clone(), RetryPolicy::default())
            .extract("Acme and Widget agree.")
            .await
            .unwrap();
        assert_eq!(out.parties.party_one.as_deref(), Some("Acme"));
        assert_eq!(svc.call_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_then_success() {
        let svc = Scripted::new(
            vec![
                rate_limited(),
                Err(CompletionError::new(ErrorKind::ConnectionFailed, "reset")),
            ],
            Ok(payload()),
        );
        let out = adapter(svc.clone(), RetryPolicy::new(3))
            .extract("Acme and Widget agree.")
            .await;
        assert!(out.is_ok());
        assert_eq!(svc.call_times().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_rate_limit_backs_off_then_exhausts() {
        let svc = Scripted::new(vec![], rate_limited());
        let policy = RetryPolicy::new(4).with_backoff(
            Duration::from_secs(1),
            2.0,
            Duration::from_secs(60),
        );
        let err = adapter(svc.clone(), policy)
            .extract("Acme and Widget agree.")
            .await
            .unwrap_err();

        assert_eq!(
            err,
            AdapterError::RetriesExhausted {
                kind: ErrorKind::RateLimited,
                attempts: 4,
                message: "429".into(),
            }
        );

        let times = svc.call_times();
        assert_eq!(times.len(), 4);
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        for pair in gaps.windows(2) {
            assert!(pair[1] > pair[0], "backoff not increasing: {gaps:?}");
        }
        assert!(gaps[0] >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn final_kinds_are_not_retried() {
        for kind in [ErrorKind::Auth, ErrorKind::MalformedRequest] {
            let svc = Scripted::new(vec![], Err(CompletionError::new(kind, "nope")));
            let err = adapter(svc.clone(), RetryPolicy::new(5))
                .extract("text")
                .await
                .unwrap_err();
            assert_eq!(err.kind(), kind);
            assert_eq!(svc.call_times().len(), 1);
        }
    }

    #[tokio::test]
    async fn schema_violation_is_final() {
        let svc = Scripted::new(vec![], Ok("{\"parties\": {}}".into()));
        let err = adapter(svc.clone(), RetryPolicy::new(5))
            .extract("text")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaViolation);
        assert_eq!(svc.call_times().len(), 1);
    }

    #[tokio::test]
    async fn oversized_text_is_truncated_before_sending() {
        let svc = Scripted::new(vec![], Ok(payload()));
        let settings = AdapterSettings {
            max_input_chars: 10,
            ..AdapterSettings::default()
        };
        ExtractionAdapter::new(svc.clone(), settings)
            .extract("abcdefghijKLMNOP")
            .await
            .unwrap();
        let user = svc.last.lock().unwrap().clone().unwrap().user;
        assert!(user.ends_with("abcdefghij"), "got {user}");
        assert!(!user.contains('K'));
    }

    #[tokio::test]
    async fn request_carries_result_schema_and_prompt_override() {
        let svc = Scripted::new(vec![], Ok(payload()));
        let settings = AdapterSettings {
            system_prompt: Some("Extract lease terms.".into()),
            ..AdapterSettings::default()
        };
        ExtractionAdapter::new(svc.clone(), settings)
            .extract("The tenant shall pay rent.")
            .await
            .unwrap();
        let request = svc.last.lock().unwrap().clone().unwrap();
        assert_eq!(request.system, "Extract lease terms.");
        assert_eq!(request.schema, *RESULT_SCHEMA);
    }

    #[test]
    fn truncate_prefers_late_sentence_boundary() {
        // Dot at char 9 of a 10-char budget: 90% kept.
        assert_eq!(truncate_text("aaaaaaaaa.bbbbbb", 10), "aaaaaaaaa.");
        // Dot at char 2: too early, hard cut instead.
        assert_eq!(truncate_text("aa.bbbbbbbbbbbb", 10), "aa.bbbbbbb");
    }

    #[test]
    fn truncate_is_char_safe() {
        let text = "ééééééé";
        assert_eq!(truncate_text(text, 3), "ééé");
        assert_eq!(truncate_text(text, 100), text);
    }
}
