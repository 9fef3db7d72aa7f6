//! Run journal: the orchestrator's durable memory.
//!
//! A restarted `start(document_id)` must reuse the result identifier of the
//! interrupted run, otherwise a crash after the result row was written would
//! yield a second row. The journal records one [`RunCheckpoint`] per
//! document at every state transition.

use crate::error::PipelineError;
use crate::model::{DocumentId, ResultId, RunOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Orchestrator states. Strictly linear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Created,
    Parsing,
    Extracting,
    Persisting,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Created => "created",
            RunState::Parsing => "parsing",
            RunState::Extracting => "extracting",
            RunState::Persisting => "persisting",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The last recorded position of a document's run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCheckpoint {
    pub document_id: DocumentId,
    pub result_id: ResultId,
    pub state: RunState,
    /// Number of times `start` has entered this run.
    pub runs: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl RunCheckpoint {
    pub fn new(document_id: DocumentId) -> Self {
        Self {
            document_id,
            result_id: ResultId::new(),
            state: RunState::Created,
            runs: 1,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// Move to `state`, stamping the time.
    pub fn advance(&mut self, state: RunState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    /// The terminal payload a finished run reports.
    pub fn outcome(&self) -> Option<RunOutcome> {
        match self.state {
            RunState::Completed => Some(RunOutcome::completed(self.document_id, self.result_id)),
            RunState::Failed => Some(RunOutcome::failed(
                self.document_id,
                self.last_error.clone().unwrap_or_default(),
            )),
            _ => None,
        }
    }
}

#[async_trait]
pub trait RunJournal: Send + Sync {
    async fn load(&self, document_id: DocumentId) -> Result<Option<RunCheckpoint>, PipelineError>;

    async fn record(&self, checkpoint: &RunCheckpoint) -> Result<(), PipelineError>;
}

// ── In-memory ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct MemoryJournal {
    entries: Arc<RwLock<HashMap<DocumentId, RunCheckpoint>>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunJournal for MemoryJournal {
    async fn load(&self, document_id: DocumentId) -> Result<Option<RunCheckpoint>, PipelineError> {
        Ok(self.entries.read().await.get(&document_id).cloned())
    }

    async fn record(&self, checkpoint: &RunCheckpoint) -> Result<(), PipelineError> {
        self.entries
            .write()
            .await
            .insert(checkpoint.document_id, checkpoint.clone());
        Ok(())
    }
}

// ── Filesystem ───────────────────────────────────────────────────────────

/// One JSON file per document under `<root>/runs/`.
#[derive(Debug, Clone)]
pub struct FsJournal {
    dir: PathBuf,
}

impl FsJournal {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            dir: root.into().join("runs"),
        }
    }

    fn path(&self, id: DocumentId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

fn journal_error(
    op: &'static str,
    document_id: DocumentId,
    e: impl fmt::Display,
) -> PipelineError {
    PipelineError::Journal {
        op,
        document_id,
        message: e.to_string(),
    }
}

#[async_trait]
impl RunJournal for FsJournal {
    async fn load(&self, document_id: DocumentId) -> Result<Option<RunCheckpoint>, PipelineError> {
        match tokio::fs::read(self.path(document_id)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| journal_error("load", document_id, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(journal_error("load", document_id, e)),
        }
    }

    async fn record(&self, checkpoint: &RunCheckpoint) -> Result<(), PipelineError> {
        let id = checkpoint.document_id;
        let bytes =
            serde_json::to_vec_pretty(checkpoint).map_err(|e| journal_error("record", id, e))?;
        let dir = self.dir.clone();
        let path = self.path(id);

        tokio::task::spawn_blocking(move || -> io::Result<()> {
            use std::io::Write;
            std::fs::create_dir_all(&dir)?;
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| journal_error("record", id, e))?
        .map_err(|e| journal_error("record", id, e))
    }
}
