//! Page-level text extraction for normalized PDF documents.
//!
//! The OCR stage guarantees a text layer; this module only reads it back.
//! Extraction runs on the blocking pool because `pdf-extract` is CPU-bound
//! and can panic on malformed input; a panic becomes a [`PipelineError`].

use std::path::Path;

use crate::error::PipelineError;
use crate::models::PageText;

/// Magic prefix every PDF file starts with.
const PDF_MAGIC: &[u8] = b"%PDF-";

/// Whether `bytes` look like a PDF document.
pub fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_MAGIC)
}

/// Extract per-page text from PDF bytes. Pages are numbered from 1.
pub fn pdf_pages_from_mem(bytes: &[u8]) -> Result<Vec<PageText>, PipelineError> {
    if !is_pdf(bytes) {
        return Err(PipelineError::Segmentation(
            "normalized document is not a PDF".to_string(),
        ));
    }
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| PipelineError::Segmentation(format!("PDF extraction failed: {}", e)))?;

    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| PageText {
            number: (i + 1) as u32,
            text,
        })
        .collect())
}

/// Read a PDF from disk and extract its pages off the async runtime.
pub async fn pdf_pages(path: &Path) -> Result<Vec<PageText>, PipelineError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        PipelineError::Segmentation(format!("cannot read {}: {}", path.display(), e))
    })?;

    tokio::task::spawn_blocking(move || pdf_pages_from_mem(&bytes))
        .await
        .map_err(|e| PipelineError::Segmentation(format!("PDF extraction aborted: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_pdf_magic() {
        assert!(is_pdf(b"%PDF-1.7\n..."));
        assert!(!is_pdf(b"PK\x03\x04"));
        assert!(!is_pdf(b""));
    }

    #[test]
    fn non_pdf_returns_error() {
        let err = pdf_pages_from_mem(b"not a pdf").unwrap_err();
        assert!(matches!(err, PipelineError::Segmentation(_)));
    }

    #[tokio::test]
    async fn truncated_pdf_returns_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("broken.ocr.pdf");
        std::fs::write(&path, b"%PDF-1.4\ngarbage").unwrap();
        let err = pdf_pages(&path).await.unwrap_err();
        assert!(matches!(err, PipelineError::Segmentation(_)));
    }

    #[tokio::test]
    async fn missing_file_returns_error() {
        let err = pdf_pages(Path::new("/no/such/file.pdf")).await.unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }
}
