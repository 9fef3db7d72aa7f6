//! Persisted records and the values that flow between stages.

use crate::error::PersistenceError;
use crate::schema::ContractExtraction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ── Identifiers ──────────────────────────────────────────────────────────

/// Identifier of a submitted document. Assigned by the request layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

/// The stable result identifier, generated once per pipeline run.
///
/// It is random rather than derived from content, so re-submitting identical
/// bytes yields an independent document/result pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultId(Uuid);

macro_rules! uuid_newtype {
    ($name:ident) => {
        impl $name {
            /// Generate a fresh random (v4) identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}

uuid_newtype!(DocumentId);
uuid_newtype!(ResultId);

// ── Document ─────────────────────────────────────────────────────────────

/// The only statuses the request layer can ever observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    /// `completed` and `failed` admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            DocumentStatus::Pending => 0,
            DocumentStatus::Processing => 1,
            DocumentStatus::Completed | DocumentStatus::Failed => 2,
        }
    }

    /// Forward-only, except that a status may be re-written by a retry of
    /// the stage that produced it.
    pub fn can_transition_to(self, next: DocumentStatus) -> bool {
        if self == next {
            return true;
        }
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted document and its pipeline status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub filename: String,
    pub file_size: usize,
    pub status: DocumentStatus,
    pub page_count: Option<u32>,
    /// Set if and only if the status has reached at least `processing`.
    pub raw_text: Option<String>,
    pub error_message: Option<String>,
    pub bucket: String,
    pub object_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields the request layer supplies when registering an upload.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub id: DocumentId,
    pub filename: String,
    pub file_size: usize,
    pub bucket: String,
    pub object_key: String,
}

impl Document {
    pub fn pending(new: NewDocument) -> Self {
        let now = Utc::now();
        Self {
            id: new.id,
            filename: new.filename,
            file_size: new.file_size,
            status: DocumentStatus::Pending,
            page_count: None,
            raw_text: None,
            error_message: None,
            bucket: new.bucket,
            object_key: new.object_key,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a stage's status mutation, enforcing forward-only transitions.
    ///
    /// Every store implementation funnels updates through here so the
    /// `raw_text`/status invariant holds regardless of backend.
    pub fn apply(&mut self, update: DocumentUpdate) -> Result<(), PersistenceError> {
        let next = update.status();
        if !self.status.can_transition_to(next) {
            return Err(PersistenceError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }

        match update {
            DocumentUpdate::Parsed { text, page_count } => {
                self.raw_text = Some(text);
                self.page_count = Some(page_count);
                self.error_message = None;
            }
            DocumentUpdate::Failed { message } => {
                self.error_message = Some(message);
            }
            DocumentUpdate::Completed => {
                self.error_message = None;
            }
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// The three status mutations stage executors are allowed to make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentUpdate {
    /// parse-stage success → `processing`, with the extracted text.
    Parsed { text: String, page_count: u32 },
    /// parse-stage rejection → `failed`, with a human-readable message.
    Failed { message: String },
    /// persist-stage success → `completed`.
    Completed,
}

impl DocumentUpdate {
    pub fn status(&self) -> DocumentStatus {
        match self {
            DocumentUpdate::Parsed { .. } => DocumentStatus::Processing,
            DocumentUpdate::Failed { .. } => DocumentStatus::Failed,
            DocumentUpdate::Completed => DocumentStatus::Completed,
        }
    }
}

// ── Stage values ─────────────────────────────────────────────────────────

/// Output of the parser: concatenated page text and total page count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub text: String,
    pub page_count: u32,
}

/// Where a byte-store object lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// The persisted extraction row. Exactly one exists per completed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub id: ResultId,
    pub document_id: DocumentId,
    pub model_used: String,
    pub structured_payload: ContractExtraction,
    pub confidence: f64,
    pub artifact_location: ObjectLocation,
    pub created_at: DateTime<Utc>,
}

// ── Run outcome ──────────────────────────────────────────────────────────

/// Terminal payload returned by [`crate::Orchestrator::start`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub status: DocumentStatus,
    pub document_id: DocumentId,
    /// Present when `status == completed`.
    pub result_id: Option<ResultId>,
    /// Present when `status == failed`.
    pub error_message: Option<String>,
}

impl RunOutcome {
    pub fn completed(document_id: DocumentId, result_id: ResultId) -> Self {
        Self {
            status: DocumentStatus::Completed,
            document_id,
            result_id: Some(result_id),
            error_message: None,
        }
    }

    pub fn failed(document_id: DocumentId, message: impl Into<String>) -> Self {
        Self {
            status: DocumentStatus::Failed,
            document_id,
            result_id: None,
            error_message: Some(message.into()),
        }
    }
}
