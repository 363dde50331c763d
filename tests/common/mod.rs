//! Fakes and fixtures shared by the integration tests.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use report_agent::agent::model::ReasoningModel;
use report_agent::agent::tools::WebSearch;
use report_agent::config::{parse_config, Config};
use report_agent::embedding::EmbeddingProvider;
use report_agent::ocr::{OcrEngine, OcrError};
use report_agent::service::{Providers, ReportService};

pub const DIMS: usize = 64;

/// Hashed bag-of-words. Texts sharing words land close together.
pub struct WordHashEmbedder;

#[async_trait]
impl EmbeddingProvider for WordHashEmbedder {
    fn model_name(&self) -> &str {
        "word-hash"
    }
    fn dims(&self) -> Option<usize> {
        Some(DIMS)
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| word_hash(t)).collect())
    }
}

fn word_hash(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut h: u32 = 2166136261;
        for b in word.to_lowercase().bytes() {
            h ^= b as u32;
            h = h.wrapping_mul(16777619);
        }
        v[(h as usize) % DIMS] += 1.0;
    }
    v
}

/// "OCR" that copies the input, which is already a text PDF.
pub struct CopyOcr {
    pub calls: AtomicUsize,
}

#[async_trait]
impl OcrEngine for CopyOcr {
    async fn run(&self, input: &Path, output: &Path, _: &str, force: bool) -> Result<(), OcrError> {
        assert!(force, "normalizer must force OCR");
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::copy(input, output)
            .await
            .map(|_| ())
            .map_err(|e| OcrError::Spawn {
                program: "copy".into(),
                source: e,
            })
    }
}

pub struct FailingOcr;

#[async_trait]
impl OcrEngine for FailingOcr {
    async fn run(&self, _: &Path, _: &Path, _: &str, _: bool) -> Result<(), OcrError> {
        Err(OcrError::Failed {
            program: "ocrmypdf".into(),
            status: "exit status: 6".into(),
            stderr: "page already has text".into(),
        })
    }
}

/// Reasoning model driven by a closure over the prompt.
pub struct FnModel<F> {
    respond: F,
    pub calls: AtomicUsize,
}

impl<F> FnModel<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    pub fn new(respond: F) -> Self {
        Self {
            respond,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl<F> ReasoningModel for FnModel<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn name(&self) -> &str {
        "fn-model"
    }
    async fn complete(&self, prompt: &str, _stop: &[&str]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.respond)(prompt))
    }
}

/// Replies with the retrieved health data as the final answer.
pub fn echo_context_model() -> FnModel<impl Fn(&str) -> String + Send + Sync> {
    FnModel::new(|prompt: &str| {
        let data = prompt
            .split("Health Data:\n")
            .nth(1)
            .and_then(|rest| rest.split("\n\nYour task:").next())
            .unwrap_or("")
            .to_string();
        format!(" I have the data\nFinal Answer: From your report: {}", data)
    })
}

/// Replays fixed replies in order, then repeats the last one.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    last: Mutex<String>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            last: Mutex::new(String::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ReasoningModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }
    async fn complete(&self, prompt: &str, _stop: &[&str]) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let next = self.replies.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(reply) = next {
            *last = reply;
        }
        Ok(last.clone())
    }
}

pub struct CannedSearch;

#[async_trait]
impl WebSearch for CannedSearch {
    async fn search(&self, query: &str) -> Result<String> {
        Ok(format!("Normal fasting glucose is 70 to 99 mg/dL ({})", query))
    }
}

pub fn test_config(tmp: &TempDir, max_steps: usize) -> Config {
    let toml_str = format!(
        r#"
[storage]
root = '{}'
uploads = '{}'

[agent]
max_steps = {}
"#,
        tmp.path().join("indexes").display(),
        tmp.path().join("uploads").display(),
        max_steps
    );
    parse_config(&toml_str).unwrap()
}

pub async fn service_with(
    tmp: &TempDir,
    ocr: Arc<dyn OcrEngine>,
    model: Arc<dyn ReasoningModel>,
    max_steps: usize,
) -> ReportService {
    let config = test_config(tmp, max_steps);
    let providers = Providers {
        embedder: Arc::new(WordHashEmbedder),
        ocr,
        model,
        search: Arc::new(CannedSearch),
    };
    let service = ReportService::new(&config, providers).unwrap();
    service.ensure_storage_root().await.unwrap();
    service
}

pub fn copy_ocr() -> Arc<CopyOcr> {
    Arc::new(CopyOcr {
        calls: AtomicUsize::new(0),
    })
}

/// Minimal single-page PDF, one text line per entry. Builds the body then
/// the xref with correct byte offsets so pdf-extract can parse it.
/// Lines must be ASCII without parentheses or backslashes.
pub fn pdf_with_lines(lines: &[&str]) -> Vec<u8> {
    let mut content = String::from("BT /F1 12 Tf 72 720 Td");
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            content.push_str(" 0 -16 Td");
        }
        content.push_str(&format!(" ({}) Tj", line));
    }
    content.push_str(" ET");

    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

pub fn health_report_pdf() -> Vec<u8> {
    pdf_with_lines(&[
        "Patient Lab Report",
        "Glucose Fasting 110 mg/dL reference 70-99",
        "Hemoglobin 14.2 g/dL reference 13.5-17.5",
        "Total Cholesterol 185 mg/dL reference below 200",
    ])
}

pub fn index_dirs(root: &Path) -> Vec<String> {
    std::fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("index_"))
        .collect()
}

pub fn dir_is_empty(path: &Path) -> bool {
    std::fs::read_dir(path).map(|mut d| d.next().is_none()).unwrap_or(true)
}
