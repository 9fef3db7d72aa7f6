//! PDF access behind a small trait so the parser can be tested without the
//! native pdfium library.
//!
//! ## Why a fresh `Pdfium` per call?
//!
//! With the `thread_safe` feature `pdfium-render` serialises every FFI call
//! behind a global lock, but a `Pdfium` value still borrows the bindings it
//! was created from. Binding per call keeps [`PdfiumBackend`] a plain
//! `Send + Sync` value; the OS caches `dlopen`, so repeat binds are cheap.
//!
//! All methods are blocking. Call them from `spawn_blocking`.

use crate::error::{ParseError, ParserError, PipelineError, ValidationError};
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};

/// What the parser learns from opening a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdfInfo {
    pub page_count: usize,
    /// pdfium reports a security handler on the opened document.
    pub encrypted: bool,
}

/// Structural access to PDF bytes.
pub trait PdfBackend: Send + Sync {
    /// Open the document and report page count and encryption.
    ///
    /// A document that cannot be opened without a password is reported as
    /// [`ValidationError::Encrypted`]; any other open failure is a
    /// [`ParseError`].
    fn inspect(&self, bytes: &[u8]) -> Result<PdfInfo, ParserError>;

    /// Extract raw text for every page, in page order.
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, ParseError>;
}

/// Production backend over `pdfium-render`.
#[derive(Debug, Clone, Default)]
pub struct PdfiumBackend {
    library_path: Option<PathBuf>,
}

impl PdfiumBackend {
    /// Create a backend, verifying the pdfium library can be bound.
    ///
    /// Discovery order:
    /// 1. `PDFIUM_LIB_PATH` env var (explicit path to the library file)
    /// 2. Alongside the running executable
    /// 3. System library search paths
    pub fn new() -> Result<Self, PipelineError> {
        let backend = Self::default();
        backend.bind().map_err(PipelineError::PdfiumBindingFailed)?;
        Ok(backend)
    }

    /// Use an explicit library file instead of the discovery order.
    pub fn with_library(path: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let backend = Self {
            library_path: Some(path.into()),
        };
        backend.bind().map_err(PipelineError::PdfiumBindingFailed)?;
        Ok(backend)
    }

    fn bind(&self) -> Result<Pdfium, String> {
        if let Some(path) = &self.library_path {
            return bind_path(&path.to_string_lossy());
        }

        if let Ok(path) = std::env::var("PDFIUM_LIB_PATH") {
            debug!(path = %path, "Loading pdfium from PDFIUM_LIB_PATH");
            return bind_path(&path);
        }

        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let lib_path =
                    Pdfium::pdfium_platform_library_name_at_path(dir.to_string_lossy().as_ref());
                if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
                    debug!(dir = %dir.display(), "Loaded pdfium next to executable");
                    return Ok(Pdfium::new(bindings));
                }
            }
        }

        Pdfium::bind_to_system_library()
            .map(Pdfium::new)
            .map_err(|e| format!("pdfium library not found: {e:?}"))
    }

    fn open_error(&self, detail: String) -> ParseError {
        ParseError::Corrupt {
            detail: format!("pdfium unavailable: {detail}"),
        }
    }
}

fn bind_path(path: &str) -> Result<Pdfium, String> {
    Pdfium::bind_to_library(path)
        .map(Pdfium::new)
        .map_err(|e| format!("failed to load pdfium from {path}: {e:?}"))
}

/// Classify a pdfium load error: a password prompt means encrypted, anything
/// else is structural corruption.
fn map_load_error(e: PdfiumError) -> ParserError {
    let detail = format!("{e:?}");
    let lower = detail.to_lowercase();
    if lower.contains("password") {
        ValidationError::Encrypted.into()
    } else {
        ParseError::Corrupt { detail }.into()
    }
}

impl PdfBackend for PdfiumBackend {
    fn inspect(&self, bytes: &[u8]) -> Result<PdfInfo, ParserError> {
        let pdfium = self.bind().map_err(|e| self.open_error(e))?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(map_load_error)?;
        let page_count = document.pages().len() as usize;
        let encrypted = is_protected(document.permissions().security_handler_revision());
        info!(page_count, encrypted, "PDF opened");
        Ok(PdfInfo {
            page_count,
            encrypted,
        })
    }

    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, ParseError> {
        let pdfium = self.bind().map_err(|e| self.open_error(e))?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(|e| ParseError::Corrupt {
                detail: format!("{e:?}"),
            })?;

        let mut pages = Vec::with_capacity(document.pages().len() as usize);
        for (idx, page) in document.pages().iter().enumerate() {
            let text = page.text().map_err(|e| ParseError::PageText {
                page: idx + 1,
                detail: format!("{e:?}"),
            })?;
            let content = text.all();
            debug!(page = idx + 1, chars = content.len(), "Extracted page text");
            pages.push(content);
        }
        Ok(pages)
    }
}

/// Whether an opened document carries a security handler.
///
/// pdfium opens owner-password-only documents without complaint, so a
/// successful load alone says nothing. A revision pdfium-render cannot name
/// (AES-256 handlers) comes back as an error and still counts as protected.
fn is_protected(revision: Result<PdfSecurityHandlerRevision, PdfiumError>) -> bool {
    !matches!(revision, Ok(PdfSecurityHandlerRevision::Unprotected))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unprotected_documents_pass() {
        assert!(!is_protected(Ok(PdfSecurityHandlerRevision::Unprotected)));
        assert!(is_protected(Ok(PdfSecurityHandlerRevision::Revision4)));
    }

    #[test]
    fn explicit_missing_library_fails_to_bind() {
        let err = PdfiumBackend::with_library("/nonexistent/libpdfium.so").unwrap_err();
        assert!(matches!(err, PipelineError::PdfiumBindingFailed(_)));
    }
}
