//! Core data types shared across the pipeline.
//!
//! - [`UserIdentity`]: validated key scoping exactly one index.
//! - [`SourceDocument`] / [`NormalizedDocument`]: temporary files owned by one ingestion.
//! - [`PageText`]: text of one page of a normalized document.
//! - [`Chunk`]: the unit of embedding and retrieval.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;

/// Longest identity accepted, in bytes.
pub const MAX_IDENTITY_BYTES: usize = 256;

/// An opaque user key. Construction validates the string; the index
/// manager never uses it verbatim as a path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserIdentity(String);

impl UserIdentity {
    /// Accepts the string exactly as given. Padding and control characters
    /// are rejected rather than stripped, so distinct inputs never share an index.
    pub fn parse(raw: impl Into<String>) -> Result<Self, PipelineError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(PipelineError::InvalidIdentity(
                "user_id must not be empty".to_string(),
            ));
        }
        if raw.len() > MAX_IDENTITY_BYTES {
            return Err(PipelineError::InvalidIdentity(format!(
                "user_id exceeds {} bytes",
                MAX_IDENTITY_BYTES
            )));
        }
        if raw.chars().any(char::is_control) {
            return Err(PipelineError::InvalidIdentity(
                "user_id must not contain control characters".to_string(),
            ));
        }
        if raw.trim() != raw {
            return Err(PipelineError::InvalidIdentity(
                "user_id must not have leading or trailing whitespace".to_string(),
            ));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserIdentity {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<UserIdentity> for String {
    fn from(id: UserIdentity) -> Self {
        id.0
    }
}

/// Uploaded document written to the upload directory for the duration of one ingestion.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: PathBuf,
}

/// OCR output, written next to its [`SourceDocument`].
#[derive(Debug, Clone)]
pub struct NormalizedDocument {
    pub path: PathBuf,
}

impl SourceDocument {
    /// Path the normalizer writes its output to: `<stem>.ocr.pdf` in the same directory.
    pub fn normalized_path(&self) -> PathBuf {
        normalized_sibling(&self.path)
    }
}

fn normalized_sibling(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    path.with_file_name(format!("{}.ocr.pdf", stem))
}

/// Text of a single page. `number` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// A contiguous span of page text.
///
/// `offset` is the character offset of `text` within its page, so
/// `(page, offset)` locates the chunk in the source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position within the document, contiguous from 0.
    pub index: i64,
    pub page: u32,
    pub offset: usize,
    pub text: String,
    /// SHA-256 hex of `text`.
    pub hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_kept_verbatim() {
        let id = UserIdentity::parse("alice smith").unwrap();
        assert_eq!(id.as_str(), "alice smith");
    }

    #[test]
    fn identity_rejects_padding() {
        for raw in [" alice", "alice ", "  alice  "] {
            let err = UserIdentity::parse(raw).unwrap_err();
            assert!(matches!(err, PipelineError::InvalidIdentity(_)), "{raw:?}");
        }
    }

    #[test]
    fn identity_rejects_empty_and_control() {
        assert!(UserIdentity::parse("   ").is_err());
        assert!(UserIdentity::parse("bob\n").is_err());
        assert!(UserIdentity::parse("bo\u{0}b").is_err());
        assert!(UserIdentity::parse("bo\tb").is_err());
        assert!(UserIdentity::parse("x".repeat(MAX_IDENTITY_BYTES + 1)).is_err());
    }

    #[test]
    fn identity_allows_path_like_strings() {
        // Traversal is prevented by path derivation, not by rejecting input.
        assert!(UserIdentity::parse("../../etc/passwd").is_ok());
    }

    #[test]
    fn normalized_path_is_adjacent() {
        let src = SourceDocument {
            path: PathBuf::from("/tmp/uploads/abc.pdf"),
        };
        assert_eq!(
            src.normalized_path(),
            PathBuf::from("/tmp/uploads/abc.ocr.pdf")
        );
    }
}
