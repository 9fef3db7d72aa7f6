//! # edgequake-extract
//!
//! Turn uploaded contract PDFs into validated structured records with a
//! durable, idempotent three-stage pipeline.
//!
//! ## Why this crate?
//!
//! An extraction request touches three unreliable things: a PDF library, a
//! hosted language model and two stores. Any of them can fail or stall,
//! and a worker can crash between any two writes. This crate gives each
//! document a linear state machine whose stages may run more than once
//! while the observable effects happen at most once: one status trajectory,
//! one artifact, one result row.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload ─▶ Intake::submit          (bytes + pending row)
//!             │
//!             ▼
//!     Orchestrator::start(document_id)
//!             │
//!             ├─ 1. Parse    pdfium text extraction, validation tiers
//!             ├─ 2. Extract  LLM call, JSON-Schema validation, retries
//!             └─ 3. Persist  artifact + result row keyed by a stable id
//!             │
//!             ▼
//!     completed / failed   (Intake::status)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_extract::{
//!     FsByteStore, FsJournal, FsStatusStore, Intake, LlmCompletion, Orchestrator,
//!     PdfiumBackend, PipelineConfig, StageExecutors,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::from_env()?;
//!     let bytes = Arc::new(FsByteStore::new("./data"));
//!     let status = Arc::new(FsStatusStore::new("./data"));
//!
//!     let intake = Intake::new(bytes.clone(), status.clone(), &config.uploads_bucket);
//!     let doc = intake.submit(std::fs::read("contract.pdf")?, "contract.pdf").await?;
//!
//!     let stages = StageExecutors::new(
//!         &config,
//!         bytes,
//!         status,
//!         Arc::new(PdfiumBackend::new()?),
//!         Arc::new(LlmCompletion::from_config(&config)?),
//!     );
//!     let orchestrator = Orchestrator::new(
//!         Arc::new(stages),
//!         Arc::new(FsJournal::new("./data")),
//!         config.policies.clone(),
//!     );
//!     let outcome = orchestrator.start(doc.id).await?;
//!     println!("{} → {}", outcome.document_id, outcome.status);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docextract` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod completion;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod intake;
pub mod journal;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod retry;
pub mod schema;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use completion::{CompletionService, LlmCompletion};
pub use config::{
    AdapterSettings, PageSeparator, ParserConfig, PipelineConfig, PipelineConfigBuilder,
    StagePolicies, StagePolicy,
};
pub use dispatch::run_batch;
pub use error::{
    AdapterError, ErrorKind, ParseError, PersistenceError, PipelineError, StageError,
    ValidationError,
};
pub use intake::{resolve_source, Intake, StatusReport};
pub use journal::{FsJournal, MemoryJournal, RunCheckpoint, RunJournal, RunState};
pub use model::{
    Document, DocumentId, DocumentStatus, ExtractionResult, ParsedDocument, ResultId, RunOutcome,
};
pub use orchestrator::Orchestrator;
pub use pipeline::extract::ExtractionAdapter;
pub use pipeline::parse::parse_document;
pub use pipeline::pdf::{PdfBackend, PdfiumBackend};
pub use pipeline::stages::{StageExecutors, StageKind, StageRunner};
pub use progress::{NoopObserver, PipelineObserver};
pub use retry::RetryPolicy;
pub use schema::{validate_payload, ContractExtraction};
pub use store::{
    ByteStore, FsByteStore, FsStatusStore, MemoryByteStore, MemoryStatusStore, StatusStore,
};
