//! Running many independent pipelines at once.
//!
//! Pipelines for different documents share nothing but the stores, so they
//! are driven through a bounded `buffer_unordered` window. Results come back
//! in input order regardless of completion order.

use crate::error::PipelineError;
use crate::model::{DocumentId, RunOutcome};
use crate::orchestrator::Orchestrator;
use futures::stream::{self, StreamExt};
use tracing::info;

/// Run `start` for every id with at most `concurrency` runs in flight.
///
/// One document's failure never affects another; each gets its own result.
pub async fn run_batch(
    orchestrator: &Orchestrator,
    ids: &[DocumentId],
    concurrency: usize,
) -> Vec<(DocumentId, Result<RunOutcome, PipelineError>)> {
    let total = ids.len();
    let mut results: Vec<(usize, DocumentId, Result<RunOutcome, PipelineError>)> =
        stream::iter(ids.iter().copied().enumerate().map(|(idx, id)| {
            let orch = orchestrator.clone();
            async move { (idx, id, orch.start(id).await) }
        }))
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    results.sort_by_key(|(idx, _, _)| *idx);
    let ok = results.iter().filter(|(_, _, r)| r.is_ok()).count();
    info!(total, ok, errors = total - ok, "Batch finished");

    results.into_iter().map(|(_, id, r)| (id, r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StagePolicies;
    use crate::error::StageError;
    use crate::journal::MemoryJournal;
    use crate::model::{DocumentStatus, ObjectLocation, ParsedDocument};
    use crate::pipeline::stages::{PersistReceipt, StageOutput, StageRequest, StageRunner};
    use crate::schema::{Clauses, ContractExtraction, Dates, Parties};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Succeeds for every document and tracks peak concurrency.
    #[derive(Default)]
    struct Counting {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl StageRunner for Counting {
        async fn run(&self, request: StageRequest) -> Result<StageOutput, StageError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            Ok(match request {
                StageRequest::Parse { .. } => StageOutput::Parsed(ParsedDocument {
                    text: "t".into(),
                    page_count: 1,
                }),
                StageRequest::Extract { .. } => StageOutput::Extracted(ContractExtraction {
                    parties: Parties::default(),
                    dates: Dates::default(),
                    clauses: Clauses::default(),
                    confidence: 0.5,
                    summary: None,
                }),
                StageRequest::Persist { .. } => StageOutput::Persisted(PersistReceipt {
                    artifact_location: ObjectLocation {
                        bucket: "extractions".into(),
                        key: "k".into(),
                    },
                    inserted: true,
                }),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn batch_respects_concurrency_and_order() {
        let runner = Arc::new(Counting::default());
        let orch = Orchestrator::new(
            runner.clone(),
            Arc::new(MemoryJournal::new()),
            StagePolicies::default(),
        );
        let ids: Vec<DocumentId> = (0..6).map(|_| DocumentId::new()).collect();

        let results = run_batch(&orch, &ids, 2).await;

        assert_eq!(results.len(), 6);
        for ((id, r), expected) in results.iter().zip(&ids) {
            assert_eq!(id, expected);
            assert_eq!(r.as_ref().unwrap().status, DocumentStatus::Completed);
        }
        assert!(runner.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn duplicate_ids_in_one_batch_do_not_overlap() {
        let orch = Orchestrator::new(
            Arc::new(Counting::default()),
            Arc::new(MemoryJournal::new()),
            StagePolicies::default(),
        );
        let id = DocumentId::new();
        let results = run_batch(&orch, &[id, id], 2).await;
        let refused = results
            .iter()
            .filter(|(_, r)| matches!(r, Err(PipelineError::AlreadyRunning(_))))
            .count();
        let completed = results.iter().filter(|(_, r)| r.is_ok()).count();
        assert_eq!(refused + completed, 2);
        assert!(completed >= 1);
    }
}
