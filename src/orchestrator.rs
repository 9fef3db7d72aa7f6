//! The extraction orchestrator: a linear state machine over three stages.
//!
//! ```text
//! Created ──▶ Parsing ──▶ Extracting ──▶ Persisting ──▶ Completed
//!                │
//!                └──▶ Failed   (input rejected by the parser)
//! ```
//!
//! The orchestrator performs no storage or network I/O of its own. It holds
//! a [`StageRunner`], the per-stage [`StagePolicies`] and a [`RunJournal`]
//! in which it checkpoints its position, most importantly the result
//! identifier generated on first entry. A restarted run reuses that
//! identifier, which is what turns at-least-once stage execution into
//! at-most-one persisted result.
//!
//! ## Attempts, timeouts and cancellation
//!
//! Every stage attempt runs on its own Tokio task under the stage timeout.
//! A timed-out attempt is aborted and counts as one failed attempt of kind
//! `stage-timeout`. The whole run is itself spawned, so a caller that stops
//! waiting on [`Orchestrator::start`] abandons the run without interrupting
//! the stage in flight.

use crate::config::{StagePolicies, StagePolicy};
use crate::error::{PipelineError, StageError};
use crate::journal::{RunCheckpoint, RunJournal, RunState};
use crate::model::{DocumentId, RunOutcome};
use crate::pipeline::stages::{StageKind, StageOutput, StageRequest, StageRunner};
use crate::progress::{NoopObserver, SharedObserver};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

/// A stage that gave up, with the number of attempts it made.
#[derive(Debug)]
struct StageFailure {
    stage: StageKind,
    attempts: u32,
    error: StageError,
}

/// Releases a document's in-flight claim when the run ends.
struct InFlight {
    set: Arc<Mutex<HashSet<DocumentId>>>,
    id: DocumentId,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.id);
    }
}

/// Sequences parse → extract → persist for one document at a time.
///
/// Cheap to clone; clones share the in-flight registry.
#[derive(Clone)]
pub struct Orchestrator {
    stages: Arc<dyn StageRunner>,
    journal: Arc<dyn RunJournal>,
    policies: StagePolicies,
    observer: SharedObserver,
    in_flight: Arc<Mutex<HashSet<DocumentId>>>,
}

impl Orchestrator {
    pub fn new(
        stages: Arc<dyn StageRunner>,
        journal: Arc<dyn RunJournal>,
        policies: StagePolicies,
    ) -> Self {
        Self {
            stages,
            journal,
            policies,
            observer: Arc::new(NoopObserver),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    /// The journal's view of a document's run, if any.
    pub async fn checkpoint(
        &self,
        document_id: DocumentId,
    ) -> Result<Option<RunCheckpoint>, PipelineError> {
        self.journal.load(document_id).await
    }

    /// Run (or resume) the pipeline for `document_id`.
    ///
    /// Returns the terminal payload when the document reaches `completed`
    /// or `failed`. Returns an error when a stage gives up without a
    /// terminal status; the run can then be started again and will reuse
    /// the same result identifier.
    pub async fn start(&self, document_id: DocumentId) -> Result<RunOutcome, PipelineError> {
        let claim = self.claim(document_id)?;
        let this = self.clone();
        tokio::spawn(async move {
            let _claim = claim;
            this.run(document_id).await
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("pipeline task failed: {e}")))?
    }

    fn claim(&self, document_id: DocumentId) -> Result<InFlight, PipelineError> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(document_id) {
            return Err(PipelineError::AlreadyRunning(document_id));
        }
        Ok(InFlight {
            set: Arc::clone(&self.in_flight),
            id: document_id,
        })
    }

    async fn run(&self, document_id: DocumentId) -> Result<RunOutcome, PipelineError> {
        let (mut cp, resumed) = match self.journal.load(document_id).await? {
            Some(cp) => {
                if let Some(outcome) = cp.outcome() {
                    info!(%document_id, status = %outcome.status, "Run already finished");
                    return Ok(outcome);
                }
                let mut cp = cp;
                cp.runs += 1;
                (cp, true)
            }
            None => (RunCheckpoint::new(document_id), false),
        };
        self.journal.record(&cp).await?;

        let result_id = cp.result_id;
        info!(%document_id, %result_id, resumed, run = cp.runs, "Pipeline started");
        self.observer.on_run_start(document_id, result_id, resumed);

        // ── Parse ─────────────────────────────────────────────────────────
        self.enter(&mut cp, RunState::Parsing).await?;
        let parse = self
            .run_stage(
                StageRequest::Parse { document_id },
                &self.policies.parse,
                StageOutput::into_parsed,
            )
            .await;
        let parsed = match parse {
            Ok(parsed) => parsed,
            Err(failure) if matches!(failure.error, StageError::Rejected(_)) => {
                let message = failure.error.to_string();
                cp.last_error = Some(message.clone());
                self.enter(&mut cp, RunState::Failed).await?;
                let outcome = RunOutcome::failed(document_id, message);
                info!(%document_id, error = ?outcome.error_message, "Document rejected");
                self.observer.on_run_complete(&outcome);
                return Ok(outcome);
            }
            Err(failure) => return Err(self.abort(&mut cp, failure).await),
        };

        // ── Extract ───────────────────────────────────────────────────────
        self.enter(&mut cp, RunState::Extracting).await?;
        let payload = match self
            .run_stage(
                StageRequest::Extract {
                    document_id,
                    text: parsed.text,
                },
                &self.policies.extract,
                StageOutput::into_extracted,
            )
            .await
        {
            Ok(payload) => payload,
            Err(failure) => return Err(self.abort(&mut cp, failure).await),
        };

        // ── Persist ───────────────────────────────────────────────────────
        self.enter(&mut cp, RunState::Persisting).await?;
        if let Err(failure) = self
            .run_stage(
                StageRequest::Persist {
                    result_id,
                    document_id,
                    payload,
                },
                &self.policies.persist,
                StageOutput::into_persisted,
            )
            .await
        {
            return Err(self.abort(&mut cp, failure).await);
        }

        cp.last_error = None;
        self.enter(&mut cp, RunState::Completed).await?;
        let outcome = RunOutcome::completed(document_id, result_id);
        info!(%document_id, %result_id, "Pipeline completed");
        self.observer.on_run_complete(&outcome);
        Ok(outcome)
    }

    async fn enter(&self, cp: &mut RunCheckpoint, state: RunState) -> Result<(), PipelineError> {
        cp.advance(state);
        self.journal.record(cp).await
    }

    /// Record a non-terminal failure and build the caller-facing error.
    ///
    /// The checkpoint keeps its state, so the next `start` resumes with the
    /// same result identifier.
    async fn abort(&self, cp: &mut RunCheckpoint, failure: StageFailure) -> PipelineError {
        let document_id = cp.document_id;
        cp.last_error = Some(failure.error.to_string());
        if let Err(e) = self.journal.record(cp).await {
            warn!(%document_id, error = %e, "Could not record failed run");
        }
        warn!(
            %document_id,
            stage = %failure.stage,
            attempts = failure.attempts,
            error = %failure.error,
            "Pipeline aborted; document left in its last stable status"
        );
        self.observer
            .on_run_error(document_id, &failure.error.to_string());
        PipelineError::StageFailed {
            document_id,
            stage: failure.stage,
            attempts: failure.attempts,
            source: failure.error,
        }
    }

    /// Drive one stage to success or to the end of its retry budget.
    async fn run_stage<T>(
        &self,
        request: StageRequest,
        policy: &StagePolicy,
        unwrap: fn(StageOutput) -> Result<T, StageError>,
    ) -> Result<T, StageFailure> {
        let stage = request.kind();
        let document_id = request.document_id();
        let mut attempt: u32 = 1;

        loop {
            self.observer.on_stage_start(document_id, stage, attempt);
            let result = self
                .attempt(request.clone(), policy.timeout)
                .await
                .and_then(unwrap);

            let error = match result {
                Ok(value) => {
                    self.observer.on_stage_complete(document_id, stage);
                    return Ok(value);
                }
                Err(e) => e,
            };

            let rejected = matches!(error, StageError::Rejected(_));
            if rejected || !policy.retry.should_retry(error.kind(), attempt) {
                return Err(StageFailure {
                    stage,
                    attempts: attempt,
                    error,
                });
            }

            let backoff = policy.retry.backoff_for(attempt);
            warn!(
                %document_id,
                %stage,
                attempt,
                kind = %error.kind(),
                error = %error,
                "Stage attempt failed; retrying in {:?}",
                backoff
            );
            self.observer
                .on_stage_retry(document_id, stage, attempt, &error.to_string());
            sleep(backoff).await;
            attempt += 1;
        }
    }

    /// One attempt on its own task, bounded by `timeout`.
    async fn attempt(
        &self,
        request: StageRequest,
        timeout: Duration,
    ) -> Result<StageOutput, StageError> {
        let stage = request.kind();
        let stages = Arc::clone(&self.stages);
        let started = Instant::now();
        let mut handle = tokio::spawn(async move { stages.run(request).await });

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(StageError::Crashed {
                stage,
                detail: join.to_string(),
            }),
            Err(_) => {
                handle.abort();
                Err(StageError::Timeout {
                    stage,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })
            }
        }
    }
}
