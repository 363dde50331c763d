//! OCR normalization: turn a possibly image-only PDF into a text-bearing one.
//!
//! The recognition itself is delegated to an [`OcrEngine`]. The production
//! engine, [`OcrMyPdf`], shells out to the `ocrmypdf` program with
//! `--force-ocr`, so pages are re-recognized even if the source already has
//! an embedded text layer.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

use crate::config::OcrConfig;
use crate::error::PipelineError;
use crate::models::{NormalizedDocument, SourceDocument};

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

/// An OCR tool: reads `input`, writes a text-bearing PDF to `output`.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn run(
        &self,
        input: &Path,
        output: &Path,
        language: &str,
        force: bool,
    ) -> Result<(), OcrError>;
}

/// Runs the `ocrmypdf` command-line tool as a subprocess.
pub struct OcrMyPdf {
    program: String,
    timeout: Duration,
}

impl OcrMyPdf {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            program: config.program.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl OcrEngine for OcrMyPdf {
    async fn run(
        &self,
        input: &Path,
        output: &Path,
        language: &str,
        force: bool,
    ) -> Result<(), OcrError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--quiet").arg("-l").arg(language);
        if force {
            cmd.arg("--force-ocr");
        }
        cmd.arg(input)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| OcrError::Spawn {
            program: self.program.clone(),
            source: e,
        })?;

        let result = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| OcrError::Timeout {
                program: self.program.clone(),
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| OcrError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;

        if !result.status.success() {
            return Err(OcrError::Failed {
                program: self.program.clone(),
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

/// Wraps an engine with the configured language and output naming.
#[derive(Clone)]
pub struct OcrNormalizer {
    engine: Arc<dyn OcrEngine>,
    language: String,
}

impl OcrNormalizer {
    pub fn new(engine: Arc<dyn OcrEngine>, language: impl Into<String>) -> Self {
        Self {
            engine,
            language: language.into(),
        }
    }

    /// Produce `<stem>.ocr.pdf` next to the source. The source is left untouched.
    pub async fn normalize(
        &self,
        source: &SourceDocument,
    ) -> Result<NormalizedDocument, PipelineError> {
        let output = source.normalized_path();
        tracing::info!(input = %source.path.display(), "starting OCR");

        self.engine
            .run(&source.path, &output, &self.language, true)
            .await
            .map_err(|e| PipelineError::Normalization(e.to_string()))?;

        let produced = tokio::fs::metadata(&output)
            .await
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false);
        if !produced {
            return Err(PipelineError::Normalization(format!(
                "OCR produced no output at {}",
                output.display()
            )));
        }

        tracing::info!(output = %output.display(), "OCR complete");
        Ok(NormalizedDocument { path: output })
    }
}
