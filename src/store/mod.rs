//! Byte storage and the status store.
//!
//! Both are external collaborators: the pipeline only needs the operations
//! below. Two backends ship with the crate:
//!
//! - [`memory`]: `tokio::sync::RwLock`-guarded maps, for tests and demos
//! - [`fs`]: a directory tree that survives process restarts, used by the
//!   `docextract` CLI
//!
//! Keys are deterministic. Input bytes live at `{uploads}/{document_id}.pdf`,
//! the result artifact at `{results}/{document_id}.json`, so a repeated
//! write lands on the same object.

use crate::error::PersistenceError;
use crate::model::{
    Document, DocumentId, DocumentUpdate, ExtractionResult, NewDocument, ObjectLocation, ResultId,
};
use async_trait::async_trait;

pub mod fs;
pub mod memory;

pub use fs::{FsByteStore, FsStatusStore};
pub use memory::{MemoryByteStore, MemoryStatusStore};

/// Key of a document's submitted bytes.
pub fn input_key(id: DocumentId) -> String {
    format!("{id}.pdf")
}

/// Key of a document's result artifact.
pub fn artifact_key(id: DocumentId) -> String {
    format!("{id}.json")
}

/// Object storage with overwrite semantics.
#[async_trait]
pub trait ByteStore: Send + Sync {
    /// Fetch an object. A missing object is [`PersistenceError::ObjectNotFound`].
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, PersistenceError>;

    /// Write an object, replacing any previous content.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
    ) -> Result<ObjectLocation, PersistenceError>;
}

/// What [`StatusStore::insert_result`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row with this id already existed; it was left untouched.
    AlreadyExists,
}

/// Persisted document and result rows.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Register a submitted document with status `pending`.
    async fn create_document(&self, new: NewDocument) -> Result<Document, PersistenceError>;

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>, PersistenceError>;

    /// Apply a status mutation. Backends must route through
    /// [`Document::apply`] so transitions stay forward-only.
    async fn update_document(
        &self,
        id: DocumentId,
        update: DocumentUpdate,
    ) -> Result<Document, PersistenceError>;

    /// Insert a result row keyed by its id. Idempotent on the id.
    async fn insert_result(
        &self,
        result: ExtractionResult,
    ) -> Result<InsertOutcome, PersistenceError>;

    async fn get_result(&self, id: ResultId) -> Result<Option<ExtractionResult>, PersistenceError>;

    /// Every result row for a document, oldest first.
    async fn results_for(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<ExtractionResult>, PersistenceError>;

    /// The most recent result row for a document.
    async fn latest_result(
        &self,
        document_id: DocumentId,
    ) -> Result<Option<ExtractionResult>, PersistenceError> {
        Ok(self.results_for(document_id).await?.pop())
    }
}
