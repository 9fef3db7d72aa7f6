//! The three stage executors.
//!
//! A stage is a commit point: it either completes its side effects or fails
//! without leaving anything a retry cannot overwrite.
//!
//! | Stage | Input | Side effects | Output |
//! |-------|-------|--------------|--------|
//! | parse | document id | status → `processing` (or `failed` on rejection) | [`ParsedDocument`] |
//! | extract | document id, text | one outbound completion request | [`ContractExtraction`] |
//! | persist | result id, document id, payload | artifact put, result row, status → `completed` | [`PersistReceipt`] |
//!
//! The orchestrator only sees [`StageRunner`]; [`StageExecutors`] is the
//! production implementation, holding every I/O handle explicitly.

use crate::completion::CompletionService;
use crate::config::{ParserConfig, PipelineConfig};
use crate::error::{ParserError, PersistenceError, StageError};
use crate::model::{
    DocumentId, DocumentStatus, DocumentUpdate, ExtractionResult, ObjectLocation, ParsedDocument,
    ResultId,
};
use crate::pipeline::extract::ExtractionAdapter;
use crate::pipeline::parse::parse_document;
use crate::pipeline::pdf::PdfBackend;
use crate::schema::ContractExtraction;
use crate::store::{artifact_key, input_key, ByteStore, InsertOutcome, StatusStore};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// The three stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Parse,
    Extract,
    Persist,
}

impl StageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Parse => "parse",
            StageKind::Extract => "extract",
            StageKind::Persist => "persist",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input of one stage invocation.
#[derive(Debug, Clone)]
pub enum StageRequest {
    Parse {
        document_id: DocumentId,
    },
    Extract {
        document_id: DocumentId,
        text: String,
    },
    Persist {
        result_id: ResultId,
        document_id: DocumentId,
        payload: ContractExtraction,
    },
}

impl StageRequest {
    pub fn kind(&self) -> StageKind {
        match self {
            StageRequest::Parse { .. } => StageKind::Parse,
            StageRequest::Extract { .. } => StageKind::Extract,
            StageRequest::Persist { .. } => StageKind::Persist,
        }
    }

    pub fn document_id(&self) -> DocumentId {
        match self {
            StageRequest::Parse { document_id }
            | StageRequest::Extract { document_id, .. }
            | StageRequest::Persist { document_id, .. } => *document_id,
        }
    }
}

/// What the persist stage wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistReceipt {
    pub artifact_location: ObjectLocation,
    /// False when the result row already existed from an earlier attempt.
    pub inserted: bool,
}

/// Output of one stage invocation.
#[derive(Debug, Clone)]
pub enum StageOutput {
    Parsed(ParsedDocument),
    Extracted(ContractExtraction),
    Persisted(PersistReceipt),
}

impl StageOutput {
    pub fn kind(&self) -> StageKind {
        match self {
            StageOutput::Parsed(_) => StageKind::Parse,
            StageOutput::Extracted(_) => StageKind::Extract,
            StageOutput::Persisted(_) => StageKind::Persist,
        }
    }

    pub fn into_parsed(self) -> Result<ParsedDocument, StageError> {
        match self {
            StageOutput::Parsed(p) => Ok(p),
            other => Err(other.mismatch(StageKind::Parse)),
        }
    }

    pub fn into_extracted(self) -> Result<ContractExtraction, StageError> {
        match self {
            StageOutput::Extracted(p) => Ok(p),
            other => Err(other.mismatch(StageKind::Extract)),
        }
    }

    pub fn into_persisted(self) -> Result<PersistReceipt, StageError> {
        match self {
            StageOutput::Persisted(r) => Ok(r),
            other => Err(other.mismatch(StageKind::Persist)),
        }
    }

    fn mismatch(&self, stage: StageKind) -> StageError {
        StageError::UnexpectedOutput {
            stage,
            actual: self.kind(),
        }
    }
}

/// Executes one stage invocation. The orchestrator's only dependency.
#[async_trait]
pub trait StageRunner: Send + Sync {
    async fn run(&self, request: StageRequest) -> Result<StageOutput, StageError>;
}

/// Artifact body written by the persist stage.
///
/// Carries no timestamp, so repeated writes produce identical bytes.
#[derive(Serialize)]
struct Artifact<'a> {
    result_id: ResultId,
    document_id: DocumentId,
    model_used: &'a str,
    payload: &'a ContractExtraction,
}

/// Production stage executors over explicit storage, PDF and completion
/// handles.
pub struct StageExecutors {
    bytes: Arc<dyn ByteStore>,
    status: Arc<dyn StatusStore>,
    pdf: Arc<dyn PdfBackend>,
    adapter: ExtractionAdapter,
    parser: ParserConfig,
    uploads_bucket: String,
    results_bucket: String,
    parse_errors_final: bool,
}

impl StageExecutors {
    pub fn new(
        config: &PipelineConfig,
        bytes: Arc<dyn ByteStore>,
        status: Arc<dyn StatusStore>,
        pdf: Arc<dyn PdfBackend>,
        completion: Arc<dyn CompletionService>,
    ) -> Self {
        Self {
            bytes,
            status,
            pdf,
            adapter: ExtractionAdapter::new(completion, config.adapter.clone()),
            parser: config.parser.clone(),
            uploads_bucket: config.uploads_bucket.clone(),
            results_bucket: config.results_bucket.clone(),
            parse_errors_final: config.policies.parse_errors_are_final(),
        }
    }

    /// parse-stage: fetch bytes, parse, record the outcome on the document.
    pub async fn parse(&self, document_id: DocumentId) -> Result<ParsedDocument, StageError> {
        let bytes = self
            .bytes
            .get(&self.uploads_bucket, &input_key(document_id))
            .await?;

        let pdf = Arc::clone(&self.pdf);
        let config = self.parser.clone();
        let parsed = tokio::task::spawn_blocking(move || parse_document(&bytes, &config, &*pdf))
            .await
            .map_err(|e| StageError::Crashed {
                stage: StageKind::Parse,
                detail: e.to_string(),
            })?;

        match parsed {
            Ok(doc) => {
                let update = DocumentUpdate::Parsed {
                    text: doc.text.clone(),
                    page_count: doc.page_count,
                };
                match self.status.update_document(document_id, update).await {
                    Ok(_) => {
                        info!(%document_id, pages = doc.page_count, "Document marked processing")
                    }
                    // A resumed run whose last checkpoint predates completion.
                    Err(PersistenceError::InvalidTransition {
                        from: DocumentStatus::Completed,
                        ..
                    }) => {
                        info!(%document_id, "Document already completed; status left unchanged")
                    }
                    Err(e) => return Err(e.into()),
                }
                Ok(doc)
            }
            Err(ParserError::Parse(e)) if !self.parse_errors_final => Err(e.into()),
            Err(e) => {
                self.mark_failed(document_id, &e.to_string()).await?;
                Err(StageError::Rejected(e))
            }
        }
    }

    async fn mark_failed(
        &self,
        document_id: DocumentId,
        message: &str,
    ) -> Result<(), StageError> {
        warn!(%document_id, error = message, "Document rejected");
        self.status
            .update_document(
                document_id,
                DocumentUpdate::Failed {
                    message: message.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    /// extract-stage: a pure compute call; no status mutation.
    pub async fn extract(&self, text: &str) -> Result<ContractExtraction, StageError> {
        Ok(self.adapter.extract(text).await?)
    }

    /// persist-stage: artifact, result row, then `completed`. Each step is
    /// idempotent, so a retry after any partial failure converges.
    ///
    /// A row already stored under `result_id` wins over `payload`: a resumed
    /// run re-extracts, and the fresh payload may differ from the one an
    /// earlier attempt committed. The artifact is always written from the
    /// row that ends up persisted.
    pub async fn persist(
        &self,
        result_id: ResultId,
        document_id: DocumentId,
        payload: ContractExtraction,
    ) -> Result<PersistReceipt, StageError> {
        let existing = self.status.get_result(result_id).await?;
        let (artifact_location, inserted) = match existing {
            Some(row) => {
                info!(%result_id, "Result row already present; artifact rebuilt from it");
                (self.write_artifact(&row).await?, false)
            }
            None => {
                let mut row = ExtractionResult {
                    id: result_id,
                    document_id,
                    model_used: self.adapter.model().to_string(),
                    confidence: payload.confidence,
                    structured_payload: payload,
                    artifact_location: self.artifact_location(document_id),
                    created_at: Utc::now(),
                };
                let location = self.write_artifact(&row).await?;
                match self.status.insert_result(row.clone()).await? {
                    InsertOutcome::Inserted => (location, true),
                    InsertOutcome::AlreadyExists => {
                        // Lost a race with another writer; its row is the result.
                        row = self
                            .status
                            .get_result(result_id)
                            .await?
                            .ok_or_else(|| PersistenceError::Database {
                                op: "get result",
                                message: format!("result {result_id} vanished after insert"),
                            })?;
                        (self.write_artifact(&row).await?, false)
                    }
                }
            }
        };

        self.status
            .update_document(document_id, DocumentUpdate::Completed)
            .await?;
        info!(%document_id, %result_id, location = %artifact_location, "Document completed");

        Ok(PersistReceipt {
            artifact_location,
            inserted,
        })
    }

    fn artifact_location(&self, document_id: DocumentId) -> ObjectLocation {
        ObjectLocation {
            bucket: self.results_bucket.clone(),
            key: artifact_key(document_id),
        }
    }

    async fn write_artifact(&self, row: &ExtractionResult) -> Result<ObjectLocation, StageError> {
        let body = serde_json::to_vec_pretty(&Artifact {
            result_id: row.id,
            document_id: row.document_id,
            model_used: &row.model_used,
            payload: &row.structured_payload,
        })
        .map_err(|source| PersistenceError::Serialization {
            what: "artifact",
            source,
        })?;
        Ok(self
            .bytes
            .put(
                &row.artifact_location.bucket,
                &row.artifact_location.key,
                body,
            )
            .await?)
    }
}

#[async_trait]
impl StageRunner for StageExecutors {
    async fn run(&self, request: StageRequest) -> Result<StageOutput, StageError> {
        match request {
            StageRequest::Parse { document_id } => {
                self.parse(document_id).await.map(StageOutput::Parsed)
            }
            StageRequest::Extract { text, .. } => {
                self.extract(&text).await.map(StageOutput::Extracted)
            }
            StageRequest::Persist {
                result_id,
                document_id,
                payload,
            } => self
                .persist(result_id, document_id, payload)
                .await
                .map(StageOutput::Persisted),
        }
    }
}
