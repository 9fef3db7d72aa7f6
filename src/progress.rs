//! Observer trait for pipeline lifecycle events.
//!
//! Inject an [`Arc<dyn PipelineObserver>`] via
//! [`crate::Orchestrator::with_observer`] to receive events as a run moves
//! through its stages. The `docextract` binary renders them as an
//! `indicatif` progress display; a service could forward them to a channel.
//!
//! # Example
//!
//! ```rust
//! use edgequake_extract::{DocumentId, PipelineObserver, StageKind};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct RetryCounter(AtomicUsize);
//!
//! impl PipelineObserver for RetryCounter {
//!     fn on_stage_retry(&self, _doc: DocumentId, _stage: StageKind, _attempt: u32, _error: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//! ```

use crate::model::{DocumentId, ResultId, RunOutcome};
use crate::pipeline::stages::StageKind;
use std::sync::Arc;

/// Called by the orchestrator as a run progresses.
///
/// Many pipelines run concurrently, so implementations must be
/// `Send + Sync` and protect shared state themselves. All methods default
/// to no-ops.
pub trait PipelineObserver: Send + Sync {
    /// A run was entered (fresh or resumed).
    fn on_run_start(&self, document_id: DocumentId, result_id: ResultId, resumed: bool) {
        let _ = (document_id, result_id, resumed);
    }

    /// An attempt of `stage` is about to run (`attempt` is 1-based).
    fn on_stage_start(&self, document_id: DocumentId, stage: StageKind, attempt: u32) {
        let _ = (document_id, stage, attempt);
    }

    /// An attempt failed and another one will follow.
    fn on_stage_retry(&self, document_id: DocumentId, stage: StageKind, attempt: u32, error: &str) {
        let _ = (document_id, stage, attempt, error);
    }

    /// `stage` returned successfully.
    fn on_stage_complete(&self, document_id: DocumentId, stage: StageKind) {
        let _ = (document_id, stage);
    }

    /// The run reached a terminal status.
    fn on_run_complete(&self, outcome: &RunOutcome) {
        let _ = outcome;
    }

    /// The run aborted without a terminal status.
    fn on_run_error(&self, document_id: DocumentId, error: &str) {
        let _ = (document_id, error);
    }
}

/// The default observer.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Convenience alias for the type held by the orchestrator.
pub type SharedObserver = Arc<dyn PipelineObserver>;
