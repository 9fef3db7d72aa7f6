//! Error types for the edgequake-extract pipeline.
//!
//! The taxonomy mirrors where a failure is discovered and what a retry can
//! change:
//!
//! * [`ValidationError`] — the input itself is unacceptable (not a PDF, too
//!   large, too many pages, encrypted, image-only). **Always final.**
//! * [`ParseError`] — structural corruption discovered while extracting
//!   page text. The only parser error a caller may choose to retry.
//! * [`AdapterError`] — the structured-extraction call failed, either with a
//!   final kind or after exhausting its transient-retry budget.
//! * [`PersistenceError`] — byte-store or status-store failure. A duplicate
//!   result row is *not* an error; see [`crate::store::InsertOutcome`].
//!
//! Stage executors return [`StageError`] (the union of the above plus
//! timeouts); the orchestrator wraps its final verdict in [`PipelineError`].
//! Every error maps onto a flat [`ErrorKind`] which is what
//! [`crate::retry::RetryPolicy`] reasons about.

use crate::model::DocumentId;
use crate::pipeline::stages::StageKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

// ── Classification ───────────────────────────────────────────────────────

/// Flat classification of every failure the pipeline can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    // Parser
    Validation,
    Parse,
    // Text-completion: transient allow-list
    RateLimited,
    ConnectionFailed,
    TimedOut,
    UpstreamInternal,
    // Text-completion: final
    Auth,
    MalformedRequest,
    SchemaViolation,
    EmptyInput,
    RetriesExhausted,
    // Storage
    Storage,
    NotFound,
    Conflict,
    // Orchestration
    StageTimeout,
    Internal,
}

impl ErrorKind {
    /// The fixed allow-list of text-completion failures worth retrying.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited
                | ErrorKind::ConnectionFailed
                | ErrorKind::TimedOut
                | ErrorKind::UpstreamInternal
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Parse => "parse",
            ErrorKind::RateLimited => "rate-limited",
            ErrorKind::ConnectionFailed => "connection-failed",
            ErrorKind::TimedOut => "timed-out",
            ErrorKind::UpstreamInternal => "upstream-internal",
            ErrorKind::Auth => "auth",
            ErrorKind::MalformedRequest => "malformed-request",
            ErrorKind::SchemaViolation => "schema-violation",
            ErrorKind::EmptyInput => "empty-input",
            ErrorKind::RetriesExhausted => "retries-exhausted",
            ErrorKind::Storage => "storage",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::StageTimeout => "stage-timeout",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Parser errors ────────────────────────────────────────────────────────

/// The submitted bytes can never be processed. Retrying changes nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unsupported content: missing PDF header (first bytes: {magic:?})")]
    MissingHeader { magic: Vec<u8> },

    #[error("file too large: {size} bytes > {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    #[error("too many pages: {pages} > {limit}")]
    TooManyPages { pages: usize, limit: usize },

    #[error("encrypted PDF: password-protected documents are not supported")]
    Encrypted,

    #[error("no text content: PDF may be scanned/image-only (OCR not supported)")]
    NoTextContent,
}

/// Structural corruption found while opening the document or reading page text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("failed to parse PDF: {detail}")]
    Corrupt { detail: String },

    #[error("failed to extract text from page {page}: {detail}")]
    PageText { page: usize, detail: String },
}

/// Either half of the parser's two-tier split.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParserError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

// ── Adapter errors ───────────────────────────────────────────────────────

/// Failure of the structured-extraction adapter.
///
/// The adapter never returns a partially validated payload: a
/// [`AdapterError`] is the only alternative to a fully validated result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("empty text provided")]
    EmptyInput,

    /// A final kind (auth, malformed request, schema violation, …).
    #[error("non-retryable {kind} error: {message}")]
    Rejected { kind: ErrorKind, message: String },

    /// A transient kind kept failing until the attempt budget ran out.
    #[error("{kind} error persisted after {attempts} attempts: {message}")]
    RetriesExhausted {
        kind: ErrorKind,
        attempts: u32,
        message: String,
    },
}

impl AdapterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdapterError::EmptyInput => ErrorKind::EmptyInput,
            AdapterError::Rejected { kind, .. } => *kind,
            AdapterError::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
        }
    }
}

// ── Persistence errors ───────────────────────────────────────────────────

/// Storage or row-write failure.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("{op} failed for {bucket}/{key}: {message}")]
    Storage {
        op: &'static str,
        bucket: String,
        key: String,
        message: String,
    },

    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("document {0} not found")]
    DocumentNotFound(DocumentId),

    #[error("document {id} already exists")]
    DocumentExists { id: DocumentId },

    #[error("document {id}: illegal status transition {from} → {to}")]
    InvalidTransition {
        id: DocumentId,
        from: crate::model::DocumentStatus,
        to: crate::model::DocumentStatus,
    },

    #[error("status store {op} failed: {message}")]
    Database { op: &'static str, message: String },

    #[error("failed to (de)serialise {what}: {source}")]
    Serialization {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl PersistenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PersistenceError::Storage { .. } | PersistenceError::Database { .. } => {
                ErrorKind::Storage
            }
            PersistenceError::ObjectNotFound { .. } | PersistenceError::DocumentNotFound(_) => {
                ErrorKind::NotFound
            }
            PersistenceError::DocumentExists { .. } | PersistenceError::InvalidTransition { .. } => {
                ErrorKind::Conflict
            }
            PersistenceError::Serialization { .. } => ErrorKind::Internal,
        }
    }
}

// ── Stage errors ─────────────────────────────────────────────────────────

/// Everything a single stage attempt can fail with.
#[derive(Debug, Error)]
pub enum StageError {
    /// The parser rejected the input and the stage recorded `failed` on the
    /// document. Never retried.
    #[error(transparent)]
    Rejected(ParserError),

    /// A parse failure the stage left retryable; the document is untouched.
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("{stage} stage timed out after {elapsed_ms}ms")]
    Timeout { stage: StageKind, elapsed_ms: u64 },

    #[error("{stage} stage task failed: {detail}")]
    Crashed { stage: StageKind, detail: String },

    #[error("{stage} stage returned output for the {actual} stage")]
    UnexpectedOutput { stage: StageKind, actual: StageKind },
}

impl StageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::Rejected(ParserError::Validation(_)) => ErrorKind::Validation,
            StageError::Rejected(ParserError::Parse(_)) | StageError::Parse(_) => ErrorKind::Parse,
            StageError::Adapter(e) => e.kind(),
            StageError::Persistence(e) => e.kind(),
            StageError::Timeout { .. } => ErrorKind::StageTimeout,
            StageError::Crashed { .. } | StageError::UnexpectedOutput { .. } => {
                ErrorKind::Internal
            }
        }
    }
}

// ── Pipeline errors ──────────────────────────────────────────────────────

/// Errors surfaced to the caller of [`crate::Orchestrator::start`] and the
/// request-layer helpers.
///
/// A document rejected by the parser is *not* an error here: the run reaches
/// the terminal `failed` status and `start` returns it as a normal outcome.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage gave up; the document stays in its last stable status and the
    /// run can be restarted with the same result identifier.
    #[error("{stage} stage failed after {attempts} attempt(s) for document {document_id}: {source}")]
    StageFailed {
        document_id: DocumentId,
        stage: StageKind,
        attempts: u32,
        #[source]
        source: StageError,
    },

    #[error("document {0} already has a pipeline in flight")]
    AlreadyRunning(DocumentId),

    #[error("run journal {op} failed for document {document_id}: {message}")]
    Journal {
        op: &'static str,
        document_id: DocumentId,
        message: String,
    },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    // ── Source resolution ─────────────────────────────────────────────────
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Setup ─────────────────────────────────────────────────────────────
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
