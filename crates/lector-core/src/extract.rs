//! Document text extraction
//!
//! Extraction is blocking; async callers should run it on the blocking pool.

use bytes::Bytes;
use std::panic::{self, AssertUnwindSafe};
use tracing::debug;

use crate::error::{Error, Result};

/// An uploaded source document
#[derive(Debug, Clone)]
pub struct Document {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl Document {
    pub fn new(filename: impl Into<String>, content_type: Option<String>, data: Bytes) -> Self {
        Self {
            filename: filename.into(),
            content_type,
            data,
        }
    }

    /// Best guess at the document kind from content type, extension and magic bytes
    pub fn kind(&self) -> Option<DocumentKind> {
        let content_type = self
            .content_type
            .as_deref()
            .map(|c| c.split(';').next().unwrap_or(c).trim().to_ascii_lowercase());
        let extension = self
            .filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase());

        if content_type.as_deref() == Some("application/pdf")
            || extension.as_deref() == Some("pdf")
            || self.data.starts_with(b"%PDF-")
        {
            return Some(DocumentKind::Pdf);
        }

        let is_text_type = content_type
            .as_deref()
            .map(|c| c.starts_with("text/"))
            .unwrap_or(false);
        let is_text_ext = matches!(extension.as_deref(), Some("txt" | "md" | "text"));
        if is_text_type || is_text_ext {
            return Some(DocumentKind::PlainText);
        }

        None
    }
}

/// Document kinds with a built-in extractor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    PlainText,
}

/// Produces the text of a document
pub trait TextExtractor: Send + Sync {
    /// Fails with [`Error::ExtractionError`] when no text can be recovered
    fn extract(&self, document: &Document) -> Result<String>;
}

/// Extractor for PDF and UTF-8 text documents
#[derive(Debug, Clone, Default)]
pub struct DocumentExtractor;

impl DocumentExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl TextExtractor for DocumentExtractor {
    fn extract(&self, document: &Document) -> Result<String> {
        let text = match document.kind() {
            Some(DocumentKind::Pdf) => extract_pdf(document)?,
            Some(DocumentKind::PlainText) => String::from_utf8(document.data.to_vec())
                .map_err(|e| {
                    Error::ExtractionError(format!("{} is not UTF-8: {}", document.filename, e))
                })?,
            None => {
                return Err(Error::ExtractionError(format!(
                    "unsupported document type: {}",
                    document.filename
                )))
            }
        };

        if text.trim().is_empty() {
            return Err(Error::ExtractionError(format!(
                "no extractable text found in {}",
                document.filename
            )));
        }

        debug!(
            "Extracted {} chars from {}",
            text.chars().count(),
            document.filename
        );
        Ok(text)
    }
}

fn extract_pdf(document: &Document) -> Result<String> {
    // pdf-extract panics on some malformed files instead of returning an error
    let parsed = panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem(&document.data)
    }))
    .map_err(|_| Error::ExtractionError(format!("{}: malformed PDF", document.filename)))?;

    parsed.map_err(|e| Error::ExtractionError(format!("{}: {}", document.filename, e)))
}
