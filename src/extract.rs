//! Local, deterministic document-text extraction.
//!
//! The cheap, free extraction path run before any remote OCR call.
//! Extraction sits behind [`DocumentParser`] so each target platform ships
//! one implementation; callers never patch in ambient capabilities.

pub const MIME_PDF: &str = "application/pdf";

/// Extraction error. No panic; the resolver decides whether to fall back
/// to OCR or fail the job.
#[derive(Debug)]
pub enum ExtractError {
    Pdf(String),
    Encoding(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Encoding(e) => write!(f, "text decoding failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Local text extraction over raw manual bytes.
pub trait DocumentParser: Send + Sync {
    fn parse(&self, bytes: &[u8], content_type: &str) -> Result<String, ExtractError>;
}

/// Default parser: `pdf-extract` for PDFs, direct UTF-8 decoding for
/// `text/*` payloads. Manuals uploaded as plain text must never reach OCR.
pub struct PdfTextParser;

impl DocumentParser for PdfTextParser {
    fn parse(&self, bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
        if content_type == MIME_PDF {
            return pdf_extract::extract_text_from_mem(bytes)
                .map_err(|e| ExtractError::Pdf(e.to_string()));
        }
        if content_type.starts_with("text/") {
            return String::from_utf8(bytes.to_vec())
                .map_err(|e| ExtractError::Encoding(e.to_string()));
        }
        // Unknown content types are still tried as PDF: manual uploads
        // frequently arrive as application/octet-stream.
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
    }
}
