//! Request-layer helpers: submitting documents and reading their status.
//!
//! Submission only stores bytes and registers a `pending` row. It never
//! validates content; that is the parse stage's job, and a rejected upload
//! shows up as a `failed` document with a readable message.
//!
//! [`resolve_source`] turns a CLI argument (local path or `http(s)://` URL)
//! into bytes. URL sources are fetched with `reqwest` under a timeout.

use crate::error::{PersistenceError, PipelineError};
use crate::model::{Document, DocumentId, DocumentStatus, ExtractionResult, NewDocument};
use crate::store::{input_key, ByteStore, StatusStore};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Writes uploads and answers status queries.
#[derive(Clone)]
pub struct Intake {
    bytes: Arc<dyn ByteStore>,
    status: Arc<dyn StatusStore>,
    uploads_bucket: String,
}

/// Everything a caller polling a document needs.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub document_id: DocumentId,
    pub filename: String,
    pub status: DocumentStatus,
    pub page_count: Option<u32>,
    pub error_message: Option<String>,
    /// The persisted result, once the document is completed.
    pub result: Option<ExtractionResult>,
}

impl Intake {
    pub fn new(
        bytes: Arc<dyn ByteStore>,
        status: Arc<dyn StatusStore>,
        uploads_bucket: impl Into<String>,
    ) -> Self {
        Self {
            bytes,
            status,
            uploads_bucket: uploads_bucket.into(),
        }
    }

    /// Store `bytes` under a fresh document id and register it as `pending`.
    pub async fn submit(
        &self,
        bytes: Vec<u8>,
        filename: impl Into<String>,
    ) -> Result<Document, PipelineError> {
        let id = DocumentId::new();
        let key = input_key(id);
        let file_size = bytes.len();
        let location = self.bytes.put(&self.uploads_bucket, &key, bytes).await?;

        let document = self
            .status
            .create_document(NewDocument {
                id,
                filename: filename.into(),
                file_size,
                bucket: location.bucket,
                object_key: location.key,
            })
            .await?;
        info!(document_id = %id, file_size, "Document submitted");
        Ok(document)
    }

    pub async fn status(&self, document_id: DocumentId) -> Result<StatusReport, PipelineError> {
        let doc = self
            .status
            .get_document(document_id)
            .await?
            .ok_or(PersistenceError::DocumentNotFound(document_id))?;

        let result = if doc.status == DocumentStatus::Completed {
            self.status.latest_result(document_id).await?
        } else {
            None
        };

        Ok(StatusReport {
            document_id,
            filename: doc.filename,
            status: doc.status,
            page_count: doc.page_count,
            error_message: doc.error_message,
            result,
        })
    }
}

// ── Source resolution ────────────────────────────────────────────────────

/// Bytes read from a local file or a URL, with a display filename.
#[derive(Debug, Clone)]
pub struct SourceBytes {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Read `input` from disk, or download it when it is a URL.
pub async fn resolve_source(input: &str, timeout_secs: u64) -> Result<SourceBytes, PipelineError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(input).await
    }
}

async fn read_local(path_str: &str) -> Result<SourceBytes, PipelineError> {
    let path = PathBuf::from(path_str);
    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(PipelineError::PermissionDenied { path });
        }
        Err(_) => return Err(PipelineError::FileNotFound { path }),
    };
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path_str.to_string());
    debug!("Read {} bytes from {}", bytes.len(), path.display());
    Ok(SourceBytes { filename, bytes })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<SourceBytes, PipelineError> {
    info!("Downloading PDF from: {}", url);

    let failed = |reason: String| PipelineError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            PipelineError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    Ok(SourceBytes {
        filename: filename_from_url(url),
        bytes: bytes.to_vec(),
    })
}

/// Last path segment of `url` when it looks like a file name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}
