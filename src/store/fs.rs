//! Filesystem backends rooted at a data directory.
//!
//! ```text
//! <root>/
//! ├── objects/<bucket>/<key>        FsByteStore
//! ├── documents/<document_id>.json  FsStatusStore
//! ├── results/<result_id>.json      FsStatusStore
//! └── result-index/<document_id>/<result_id>
//! ```
//!
//! The index holds one empty marker per result row, so listing a document's
//! results never touches another document's files.
//!
//! Every write goes to a temp file in the destination directory and is then
//! renamed into place, so a crash never leaves a torn object. Result rows
//! are created with no-clobber semantics: the second insert of the same id
//! finds the file and reports [`InsertOutcome::AlreadyExists`].

use super::{ByteStore, InsertOutcome, StatusStore};
use crate::error::PersistenceError;
use crate::model::{
    Document, DocumentId, DocumentUpdate, ExtractionResult, NewDocument, ObjectLocation, ResultId,
};
use async_trait::async_trait;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// Write `bytes` to `path` via a sibling temp file.
///
/// Returns `Ok(false)` when `clobber` is off and `path` already exists.
fn write_atomic(path: &Path, bytes: &[u8], clobber: bool) -> io::Result<bool> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;

    if clobber {
        tmp.persist(path).map_err(|e| e.error)?;
        return Ok(true);
    }
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error),
    }
}

async fn write_blocking(path: PathBuf, bytes: Vec<u8>, clobber: bool) -> io::Result<bool> {
    tokio::task::spawn_blocking(move || write_atomic(&path, &bytes, clobber))
        .await
        .map_err(|e| io::Error::other(format!("write task failed: {e}")))?
}

/// Reject names that would escape the data directory.
fn safe_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0')
}

// ── Byte store ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FsByteStore {
    root: PathBuf,
}

impl FsByteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into().join("objects"),
        }
    }

    fn path_for(
        &self,
        op: &'static str,
        bucket: &str,
        key: &str,
    ) -> Result<PathBuf, PersistenceError> {
        if !safe_component(bucket) || !safe_component(key) {
            return Err(PersistenceError::Storage {
                op,
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: "invalid bucket or key".to_string(),
            });
        }
        Ok(self.root.join(bucket).join(key))
    }
}

#[async_trait]
impl ByteStore for FsByteStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, PersistenceError> {
        let path = self.path_for("get", bucket, key)?;
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                PersistenceError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                PersistenceError::Storage {
                    op: "get",
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    message: e.to_string(),
                }
            }
        })
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
    ) -> Result<ObjectLocation, PersistenceError> {
        let path = self.path_for("put", bucket, key)?;
        let len = bytes.len();
        write_blocking(path, bytes, true)
            .await
            .map_err(|e| PersistenceError::Storage {
                op: "put",
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: e.to_string(),
            })?;
        debug!(bucket, key, bytes = len, "Object written");
        Ok(ObjectLocation {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

// ── Status store ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct FsStatusStore {
    documents: PathBuf,
    results: PathBuf,
    index: PathBuf,
    /// Serialises read-modify-write cycles on document files.
    write_lock: Mutex<()>,
}

impl FsStatusStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            documents: root.join("documents"),
            results: root.join("results"),
            index: root.join("result-index"),
            write_lock: Mutex::new(()),
        }
    }

    fn document_path(&self, id: DocumentId) -> PathBuf {
        self.documents.join(format!("{id}.json"))
    }

    fn result_path(&self, id: ResultId) -> PathBuf {
        self.results.join(format!("{id}.json"))
    }

    fn index_dir(&self, document_id: DocumentId) -> PathBuf {
        self.index.join(document_id.to_string())
    }

    async fn read_document(&self, id: DocumentId) -> Result<Option<Document>, PersistenceError> {
        read_json(&self.document_path(id), "document").await
    }

    async fn write_document(
        &self,
        doc: &Document,
        clobber: bool,
    ) -> Result<bool, PersistenceError> {
        let bytes = serde_json::to_vec_pretty(doc).map_err(|source| {
            PersistenceError::Serialization {
                what: "document",
                source,
            }
        })?;
        write_blocking(self.document_path(doc.id), bytes, clobber)
            .await
            .map_err(|e| PersistenceError::Database {
                op: "write document",
                message: e.to_string(),
            })
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    path: &Path,
    what: &'static str,
) -> Result<Option<T>, PersistenceError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| PersistenceError::Serialization { what, source }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PersistenceError::Database {
            op: "read",
            message: format!("{}: {e}", path.display()),
        }),
    }
}

#[async_trait]
impl StatusStore for FsStatusStore {
    async fn create_document(&self, new: NewDocument) -> Result<Document, PersistenceError> {
        let _guard = self.write_lock.lock().await;
        let doc = Document::pending(new);
        if !self.write_document(&doc, false).await? {
            return Err(PersistenceError::DocumentExists { id: doc.id });
        }
        Ok(doc)
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>, PersistenceError> {
        self.read_document(id).await
    }

    async fn update_document(
        &self,
        id: DocumentId,
        update: DocumentUpdate,
    ) -> Result<Document, PersistenceError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self
            .read_document(id)
            .await?
            .ok_or(PersistenceError::DocumentNotFound(id))?;
        doc.apply(update)?;
        self.write_document(&doc, true).await?;
        Ok(doc)
    }

    async fn insert_result(
        &self,
        result: ExtractionResult,
    ) -> Result<InsertOutcome, PersistenceError> {
        let bytes = serde_json::to_vec_pretty(&result).map_err(|source| {
            PersistenceError::Serialization {
                what: "result",
                source,
            }
        })?;
        let created = write_blocking(self.result_path(result.id), bytes, false)
            .await
            .map_err(|e| PersistenceError::Database {
                op: "insert result",
                message: e.to_string(),
            })?;
        // Written on both outcomes so a crash between the two writes heals.
        let marker = self.index_dir(result.document_id).join(result.id.to_string());
        write_blocking(marker, Vec::new(), true)
            .await
            .map_err(|e| PersistenceError::Database {
                op: "index result",
                message: e.to_string(),
            })?;
        Ok(if created {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::AlreadyExists
        })
    }

    async fn get_result(&self, id: ResultId) -> Result<Option<ExtractionResult>, PersistenceError> {
        read_json(&self.result_path(id), "result").await
    }

    async fn results_for(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<ExtractionResult>, PersistenceError> {
        let mut entries = match tokio::fs::read_dir(self.index_dir(document_id)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(PersistenceError::Database {
                    op: "list results",
                    message: e.to_string(),
                })
            }
        };

        let mut rows = Vec::new();
        loop {
            let entry = entries
                .next_entry()
                .await
                .map_err(|e| PersistenceError::Database {
                    op: "list results",
                    message: e.to_string(),
                })?;
            let Some(entry) = entry else { break };
            let name = entry.file_name();
            let Some(result_id) = name.to_str() else {
                continue;
            };
            let path = self.results.join(format!("{result_id}.json"));
            if let Some(row) = read_json::<ExtractionResult>(&path, "result").await? {
                rows.push(row);
            }
        }
        rows.sort_by_key(|r| r.created_at);
        Ok(rows)
    }
}
