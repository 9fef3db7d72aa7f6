//! The three stages and the pieces they are built from.
//!
//! ## Data Flow
//!
//! ```text
//! bytes ──▶ parse ──▶ text ──▶ extract ──▶ payload ──▶ persist
//!          (pdfium)           (LLM + schema)           (stores)
//! ```
//!
//! 1. [`pdf`]     — the [`pdf::PdfBackend`] seam and its pdfium implementation
//! 2. [`parse`]   — validation tiers and page-text concatenation; CPU-bound,
//!    runs in `spawn_blocking`
//! 3. [`clean`]   — deterministic text cleanup shared by the parser and the
//!    schema validator
//! 4. [`extract`] — the structured-extraction adapter with its own transient
//!    retry loop; the only stage with network I/O
//! 5. [`stages`]  — executors that bind the above to the stores and mutate
//!    document status

pub mod clean;
pub mod extract;
pub mod parse;
pub mod pdf;
pub mod stages;
