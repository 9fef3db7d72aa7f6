//! Document validator and parser: raw bytes → (text, page count).
//!
//! Validation runs cheapest-check-first and stops at the first failure:
//!
//! ```text
//! header ──▶ size ──▶ open + page ceiling ──▶ encryption ──▶ page text ──▶ non-empty
//!  (4 B)     (len)        (pdfium)         (security handler)  (pdfium)
//! ```
//!
//! Every rejection up to and including the empty-text check is a
//! [`ValidationError`] and is final. A [`ParseError`] is raised only when
//! the backend fails on structurally corrupt content.
//!
//! The function is blocking (pdfium); stage executors call it from
//! `spawn_blocking`.

use crate::config::ParserConfig;
use crate::error::{ParserError, ValidationError};
use crate::model::ParsedDocument;
use crate::pipeline::clean::clean_page_text;
use crate::pipeline::pdf::PdfBackend;
use tracing::{debug, info};

const PDF_MAGIC: &[u8] = b"%PDF";

/// Validate `bytes` and extract the text of every page.
pub fn parse_document(
    bytes: &[u8],
    config: &ParserConfig,
    backend: &dyn PdfBackend,
) -> Result<ParsedDocument, ParserError> {
    // 1. Magic header
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(ValidationError::MissingHeader {
            magic: bytes.iter().take(PDF_MAGIC.len()).copied().collect(),
        }
        .into());
    }

    // 2. Byte-length ceiling
    if bytes.len() > config.max_file_size_bytes {
        return Err(ValidationError::TooLarge {
            size: bytes.len(),
            limit: config.max_file_size_bytes,
        }
        .into());
    }

    // 3. Structural open + page ceiling
    let info = backend.inspect(bytes)?;
    if info.page_count > config.max_pages {
        return Err(ValidationError::TooManyPages {
            pages: info.page_count,
            limit: config.max_pages,
        }
        .into());
    }

    // 4. Encryption
    if info.encrypted {
        return Err(ValidationError::Encrypted.into());
    }

    // 5. Per-page text
    let raw_pages = backend.extract_pages(bytes)?;
    let pages: Vec<String> = raw_pages.iter().map(|p| clean_page_text(p)).collect();
    let text_pages = pages.iter().filter(|p| !p.is_empty()).count();
    debug!(pages = pages.len(), text_pages, "Page text cleaned");

    // 6. Image-only rejection
    if text_pages == 0 {
        return Err(ValidationError::NoTextContent.into());
    }

    let mut text = String::with_capacity(pages.iter().map(String::len).sum::<usize>());
    for (idx, page) in pages.iter().enumerate() {
        if idx > 0 {
            text.push_str(&config.page_separator.render(idx + 1));
        }
        text.push_str(page);
    }
    let text = text.trim().to_string();

    let page_count = u32::try_from(info.page_count).unwrap_or(u32::MAX);
    info!(page_count, chars = text.len(), "Document parsed");
    Ok(ParsedDocument { text, page_count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PageSeparator;
    use crate::error::ParseError;
    use crate::pipeline::pdf::PdfInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted backend that records how far the parser got.
    struct FakeBackend {
        info: Result<PdfInfo, ParserError>,
        pages: Result<Vec<String>, ParseError>,
        inspect_calls: AtomicUsize,
        extract_calls: AtomicUsize,
    }

    impl FakeBackend {
        fn with_pages(pages: &[&str]) -> Self {
            Self {
                info: Ok(PdfInfo {
                    page_count: pages.len(),
                    encrypted: false,
                }),
                pages: Ok(pages.iter().map(|s| s.to_string()).collect()),
                inspect_calls: AtomicUsize::new(0),
                extract_calls: AtomicUsize::new(0),
            }
        }

        fn info(mut self, info: Result<PdfInfo, ParserError>) -> Self {
            self.info = info;
            self
        }

        fn extract_calls(&self) -> usize {
            self.extract_calls.load(Ordering::SeqCst)
        }

        fn inspect_calls(&self) -> usize {
            self.inspect_calls.load(Ordering::SeqCst)
        }
    }

    impl PdfBackend for FakeBackend {
        fn inspect(&self, _bytes: &[u8]) -> Result<PdfInfo, ParserError> {
            self.inspect_calls.fetch_add(1, Ordering::SeqCst);
            self.info.clone()
        }

        fn extract_pages(&self, _bytes: &[u8]) -> Result<Vec<String>, ParseError> {
            self.extract_calls.fetch_add(1, Ordering::SeqCst);
            self.pages.clone()
        }
    }

    fn pdf_bytes(len: usize) -> Vec<u8> {
        let mut b = b"%PDF-1.7\n".to_vec();
        b.resize(len.max(b.len()), b' ');
        b
    }

    fn validation(err: ParserError) -> ValidationError {
        match err {
            ParserError::Validation(v) => v,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn joins_pages_with_separator() {
        let backend = FakeBackend::with_pages(&["  Page one  \r\n", "", "Page three"]);
        let out = parse_document(&pdf_bytes(64), &ParserConfig::default(), &backend).unwrap();
        assert_eq!(out.page_count, 3);
        assert_eq!(out.text, "Page one\n\n\n\nPage three");
    }

    #[test]
    fn marker_separator_numbers_pages() {
        let backend = FakeBackend::with_pages(&["a", "b"]);
        let config = ParserConfig {
            page_separator: PageSeparator::Marker,
            ..ParserConfig::default()
        };
        let out = parse_document(&pdf_bytes(64), &config, &backend).unwrap();
        assert_eq!(out.text, "a\n\n--- page 2 ---\n\nb");
    }

    #[test]
    fn missing_header_rejected_before_backend() {
        let backend = FakeBackend::with_pages(&["text"]);
        for input in [&b"PK\x03\x04zip"[..], b"", b"%PD", b"hello %PDF"] {
            let err = validation(
                parse_document(input, &ParserConfig::default(), &backend).unwrap_err(),
            );
            assert!(matches!(err, ValidationError::MissingHeader { .. }));
        }
        assert_eq!(backend.inspect_calls(), 0);
        assert_eq!(backend.extract_calls(), 0);
    }

    #[test]
    fn oversized_input_rejected_before_backend() {
        let backend = FakeBackend::with_pages(&["text"]);
        let config = ParserConfig {
            max_file_size_bytes: 100,
            ..ParserConfig::default()
        };
        let err = validation(parse_document(&pdf_bytes(101), &config, &backend).unwrap_err());
        assert_eq!(err, ValidationError::TooLarge { size: 101, limit: 100 });
        assert_eq!(backend.inspect_calls(), 0);

        // Exactly at the ceiling is accepted.
        assert!(parse_document(&pdf_bytes(100), &config, &backend).is_ok());
    }

    #[test]
    fn page_ceiling_rejected_without_extraction() {
        let backend = FakeBackend::with_pages(&["x"]).info(Ok(PdfInfo {
            page_count: 101,
            encrypted: false,
        }));
        let err = validation(
            parse_document(&pdf_bytes(64), &ParserConfig::default(), &backend).unwrap_err(),
        );
        assert_eq!(err, ValidationError::TooManyPages { pages: 101, limit: 100 });
        assert_eq!(backend.extract_calls(), 0);
    }

    #[test]
    fn encrypted_rejected_without_extraction() {
        let backend = FakeBackend::with_pages(&["x"]).info(Ok(PdfInfo {
            page_count: 1,
            encrypted: true,
        }));
        let err = validation(
            parse_document(&pdf_bytes(64), &ParserConfig::default(), &backend).unwrap_err(),
        );
        assert_eq!(err, ValidationError::Encrypted);
        assert_eq!(backend.extract_calls(), 0);
    }

    #[test]
    fn whitespace_only_pages_are_image_only() {
        let backend = FakeBackend::with_pages(&["   ", "\n\t\r\n", "\u{200B}"]);
        let err = validation(
            parse_document(&pdf_bytes(64), &ParserConfig::default(), &backend).unwrap_err(),
        );
        assert_eq!(err, ValidationError::NoTextContent);
    }

    #[test]
    fn corrupt_open_is_parse_error() {
        let backend = FakeBackend::with_pages(&["x"]).info(Err(ParseError::Corrupt {
            detail: "xref table broken".into(),
        }
        .into()));
        let err = parse_document(&pdf_bytes(64), &ParserConfig::default(), &backend).unwrap_err();
        assert!(matches!(err, ParserError::Parse(ParseError::Corrupt { .. })));
    }

    #[test]
    fn page_text_failure_is_parse_error() {
        let mut backend = FakeBackend::with_pages(&["x", "y"]);
        backend.pages = Err(ParseError::PageText {
            page: 2,
            detail: "bad content stream".into(),
        });
        let err = parse_document(&pdf_bytes(64), &ParserConfig::default(), &backend).unwrap_err();
        assert!(matches!(err, ParserError::Parse(ParseError::PageText { page: 2, .. })));
    }

    #[test]
    fn parsing_is_deterministic() {
        let backend = FakeBackend::with_pages(&["Alpha", "Beta"]);
        let a = parse_document(&pdf_bytes(64), &ParserConfig::default(), &backend).unwrap();
        let b = parse_document(&pdf_bytes(64), &ParserConfig::default(), &backend).unwrap();
        assert_eq!(a, b);
    }
}
