//! Error taxonomy for the ingestion and answering pipeline.
//!
//! Each stage has its own variant so callers (the transport layer, the CLI)
//! can map failures to a status without string matching. "No index yet" is
//! not an error but a query outcome
//! ([`QueryStatus::NotFound`](crate::service::QueryStatus::NotFound)).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The identity string cannot scope an index (empty, too long, control chars).
    #[error("invalid user identity: {0}")]
    InvalidIdentity(String),

    /// The uploaded document is not in the supported input format.
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// The OCR stage could not produce a text-bearing document.
    #[error("document normalization failed: {0}")]
    Normalization(String),

    /// Text could not be extracted or split into chunks.
    #[error("document segmentation failed: {0}")]
    Segmentation(String),

    #[error("index build failed: {0}")]
    IndexBuild(String),

    /// An index directory exists but cannot be read back.
    #[error("index load failed: {0}")]
    IndexLoad(String),

    #[error("index delete failed: {0}")]
    IndexDelete(String),

    #[error("retrieval failed: {0}")]
    Retrieval(String),

    /// Storage root maintenance (creation, wipe) failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl PipelineError {
    /// Machine-readable code used in HTTP error bodies and CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::InvalidIdentity(_) => "invalid_identity",
            PipelineError::UnsupportedFormat(_) => "unsupported_format",
            PipelineError::Normalization(_) => "normalization_failed",
            PipelineError::Segmentation(_) => "segmentation_failed",
            PipelineError::IndexBuild(_) => "index_build_failed",
            PipelineError::IndexLoad(_) => "index_load_failed",
            PipelineError::IndexDelete(_) => "index_delete_failed",
            PipelineError::Retrieval(_) => "retrieval_failed",
            PipelineError::Storage(_) => "storage_error",
        }
    }

    /// Whether the failure was caused by the caller's input rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidIdentity(_) | PipelineError::UnsupportedFormat(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_classified() {
        assert!(PipelineError::InvalidIdentity("".into()).is_client_error());
        assert!(PipelineError::UnsupportedFormat("text/plain".into()).is_client_error());
        assert!(!PipelineError::IndexBuild("disk full".into()).is_client_error());
    }

    #[test]
    fn display_includes_stage() {
        let err = PipelineError::Normalization("ocrmypdf exited with status 2".into());
        assert_eq!(
            err.to_string(),
            "document normalization failed: ocrmypdf exited with status 2"
        );
        assert_eq!(err.code(), "normalization_failed");
    }
}
