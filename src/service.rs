//! Ingestion and query entry points shared by the CLI and the HTTP server.
//!
//! [`ReportService`] owns every provider handle and sequences the pipeline:
//!
//! ```text
//! create_index:  bytes → upload file → OCR → pages → chunks → build
//! answer_query:  load → retrieve → prompt → agent → QueryResponse
//! ```
//!
//! Operations on the same identity are serialized by [`IdentityLocks`];
//! [`ReportService::wipe_all`] excludes everything else through a
//! storage-wide `RwLock`.

use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::agent::model::{create_model, ReasoningModel};
use crate::agent::tools::{create_search, Toolbox, WebSearch};
use crate::agent::{AgentOutcome, ReasoningAgent};
use crate::chunk::Splitter;
use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::PipelineError;
use crate::extract;
use crate::index::IndexManager;
use crate::models::{SourceDocument, UserIdentity};
use crate::ocr::{OcrEngine, OcrMyPdf, OcrNormalizer};
use crate::retrieval::{RetrievedContext, Retriever};

pub const NOT_FOUND_TEXT: &str =
    "I couldn't find a health report for you. Please upload one first.";
const RETRIEVAL_FAILED_TEXT: &str =
    "I'm sorry, I encountered an error while retrieving your health data.";
const AGENT_FAILED_TEXT: &str =
    "I'm sorry, I encountered an error while processing your request.";

/// The external collaborators a service is built from.
#[derive(Clone)]
pub struct Providers {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub ocr: Arc<dyn OcrEngine>,
    pub model: Arc<dyn ReasoningModel>,
    pub search: Arc<dyn WebSearch>,
}

impl Providers {
    /// Construct the providers named in `config`. Fails on unknown provider
    /// names or missing API keys.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            embedder: create_provider(&config.embedding)?,
            ocr: Arc::new(OcrMyPdf::new(&config.ocr)),
            model: create_model(&config.agent)?,
            search: create_search(&config.search)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub identity: UserIdentity,
    pub pages: usize,
    pub chunks: usize,
    pub model: String,
    pub dims: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Ok,
    NotFound,
    RetrievalFailed,
    AgentFailed,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Ok => "ok",
            QueryStatus::NotFound => "not_found",
            QueryStatus::RetrievalFailed => "retrieval_failed",
            QueryStatus::AgentFailed => "agent_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub status: QueryStatus,
    pub found: bool,
    /// Always human-readable, including on failure.
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<AgentOutcome>,
}

impl QueryResponse {
    fn failed(status: QueryStatus, found: bool, answer: &str) -> Self {
        Self {
            status,
            found,
            answer: answer.to_string(),
            outcome: None,
        }
    }
}

/// In-process advisory locks, one async mutex per identity.
#[derive(Default)]
pub struct IdentityLocks {
    inner: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IdentityLocks {
    pub fn lock_for(&self, identity: &UserIdentity) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        // Drop locks nobody holds or waits on.
        map.retain(|_, m| Arc::strong_count(m) > 1);
        map.entry(identity.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Removes temporary documents when dropped, on every exit path.
struct TempFiles(Vec<PathBuf>);

impl Drop for TempFiles {
    fn drop(&mut self) {
        for path in &self.0 {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::debug!(path = %path.display(), "removed temporary file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not remove temporary file"),
            }
        }
    }
}

pub struct ReportService {
    indexes: IndexManager,
    retriever: Retriever,
    splitter: Splitter,
    normalizer: OcrNormalizer,
    agent: ReasoningAgent,
    search: Arc<dyn WebSearch>,
    uploads: PathBuf,
    locks: IdentityLocks,
    storage: RwLock<()>,
}

impl ReportService {
    pub fn new(config: &Config, providers: Providers) -> Result<Self, PipelineError> {
        let splitter = Splitter::from_config(&config.chunking)?;
        let indexes = IndexManager::new(
            config.storage.root.clone(),
            providers.embedder.clone(),
            config.embedding.batch_size,
        )
        .with_window(splitter.size(), splitter.overlap());

        Ok(Self {
            indexes,
            retriever: Retriever::new(providers.embedder, config.retrieval.top_k),
            splitter,
            normalizer: OcrNormalizer::new(providers.ocr, config.ocr.language.clone()),
            agent: ReasoningAgent::new(providers.model, config.agent.max_steps),
            search: providers.search,
            uploads: config.storage.uploads.clone(),
            locks: IdentityLocks::default(),
            storage: RwLock::new(()),
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self::new(config, Providers::from_config(config)?)?)
    }

    pub fn indexes(&self) -> &IndexManager {
        &self.indexes
    }

    /// Create the storage root and upload directory, sweeping leftovers of
    /// interrupted builds. Call once before serving requests.
    pub async fn ensure_storage_root(&self) -> Result<(), PipelineError> {
        self.indexes.ensure_storage_root().await?;
        tokio::fs::create_dir_all(&self.uploads)
            .await
            .map_err(|e| PipelineError::Storage(format!("{}: {}", self.uploads.display(), e)))
    }

    /// Index `bytes` as the report of `identity`, replacing any previous one.
    ///
    /// The previous index is removed before processing starts, so a failed
    /// ingestion leaves the identity with no index.
    pub async fn create_index(
        &self,
        identity: &UserIdentity,
        bytes: &[u8],
    ) -> Result<IngestSummary, PipelineError> {
        if !extract::is_pdf(bytes) {
            return Err(PipelineError::UnsupportedFormat(
                "only PDF documents are supported".to_string(),
            ));
        }

        let _storage = self.storage.read().await;
        let lock = self.locks.lock_for(identity);
        let _guard = lock.lock().await;

        self.indexes.delete(identity).await?;

        tokio::fs::create_dir_all(&self.uploads)
            .await
            .map_err(|e| PipelineError::Storage(format!("{}: {}", self.uploads.display(), e)))?;
        let source = SourceDocument {
            path: self.uploads.join(format!("{}.pdf", Uuid::new_v4())),
        };
        let _cleanup = TempFiles(vec![source.path.clone(), source.normalized_path()]);

        tokio::fs::write(&source.path, bytes)
            .await
            .map_err(|e| PipelineError::Storage(format!("{}: {}", source.path.display(), e)))?;

        let normalized = self.normalizer.normalize(&source).await?;
        let pages = extract::pdf_pages(&normalized.path).await?;
        let chunks = self.splitter.segment(&pages);
        tracing::info!(%identity, pages = pages.len(), chunks = chunks.len(), "document segmented");

        let index = self.indexes.build(identity, chunks).await?;

        Ok(IngestSummary {
            identity: identity.clone(),
            pages: pages.len(),
            chunks: index.len(),
            model: index.manifest.model.clone(),
            dims: index.manifest.dims,
        })
    }

    /// Returns whether an index existed.
    pub async fn delete_index(&self, identity: &UserIdentity) -> Result<bool, PipelineError> {
        let _storage = self.storage.read().await;
        let lock = self.locks.lock_for(identity);
        let _guard = lock.lock().await;
        self.indexes.delete(identity).await
    }

    /// Answer `query` from the report of `identity`. Never fails: every
    /// problem is reported through [`QueryResponse::status`].
    pub async fn answer_query(&self, identity: &UserIdentity, query: &str) -> QueryResponse {
        let _storage = self.storage.read().await;
        let lock = self.locks.lock_for(identity);
        let _guard = lock.lock().await;

        let index = match self.indexes.load(identity).await {
            Ok(Some(index)) => index,
            Ok(None) => {
                tracing::info!(%identity, "query for identity without an index");
                return QueryResponse::failed(QueryStatus::NotFound, false, NOT_FOUND_TEXT);
            }
            Err(e) => {
                tracing::warn!(%identity, error = %e, "could not load index");
                return QueryResponse::failed(QueryStatus::RetrievalFailed, true, RETRIEVAL_FAILED_TEXT);
            }
        };

        let context = match self.retriever.retrieve_default(&index, query).await {
            Ok(context) => context,
            Err(e) => {
                tracing::warn!(%identity, error = %e, "retrieval failed");
                return QueryResponse::failed(QueryStatus::RetrievalFailed, true, RETRIEVAL_FAILED_TEXT);
            }
        };
        if context.is_empty() {
            tracing::info!(%identity, "no relevant chunks, agent will rely on tools");
        }

        let prompt = health_advisor_prompt(identity, query, &context);
        let tools = Toolbox::new(identity.clone(), self.indexes.clone(), self.search.clone());

        match self.agent.answer(&prompt, &tools).await {
            Ok(answer) => {
                let status = match answer.outcome {
                    AgentOutcome::Completed => QueryStatus::Ok,
                    AgentOutcome::MaxIterationsExceeded | AgentOutcome::ToolFailure => {
                        QueryStatus::AgentFailed
                    }
                };
                tracing::info!(%identity, outcome = %answer.outcome, steps = answer.steps.len(), "agent finished");
                QueryResponse {
                    status,
                    found: true,
                    answer: answer.text,
                    outcome: Some(answer.outcome),
                }
            }
            Err(e) => {
                tracing::warn!(%identity, error = %e, "agent failed");
                QueryResponse::failed(QueryStatus::AgentFailed, true, AGENT_FAILED_TEXT)
            }
        }
    }

    /// Delete every index. Waits for in-flight operations to finish and
    /// blocks new ones until done.
    pub async fn wipe_all(&self) -> Result<bool, PipelineError> {
        let _storage = self.storage.write().await;
        self.indexes.wipe_all().await
    }
}

/// The input handed to the reasoning agent.
pub fn health_advisor_prompt(
    identity: &UserIdentity,
    query: &str,
    context: &RetrievedContext,
) -> String {
    format!(
        "You are given a user's personal health report data.\n\
         \n\
         User ID: {identity}\n\
         User Query: {query}\n\
         \n\
         Health Data:\n\
         {data}\n\
         \n\
         Your task:\n\
         1. Analyze whether each reported value is within or outside its normal range.\n\
         2. Respond naturally and helpfully:\n   \
            - Within range: give a reassuring message and include the stats.\n   \
            - Outside range: give a kind, short explanation of possible causes and one-line advice or precaution.\n\
         3. Adapt your tone to sound caring, knowledgeable and clear, like a friendly health advisor.\n\
         4. Keep your explanation concise and professional.\n\
         5. Include the numeric stats and normal ranges where relevant.\n",
        identity = identity,
        query = query,
        data = context.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use crate::retrieval::NO_CONTEXT_PLACEHOLDER;

    fn id(s: &str) -> UserIdentity {
        UserIdentity::parse(s).unwrap()
    }

    #[test]
    fn prompt_contains_inputs() {
        let ctx = RetrievedContext {
            chunks: vec![(
                Chunk {
                    index: 0,
                    page: 1,
                    offset: 0,
                    text: "Glucose 110 mg/dL".into(),
                    hash: String::new(),
                },
                0.0,
            )],
        };
        let prompt = health_advisor_prompt(&id("alice"), "How is my glucose?", &ctx);
        assert!(prompt.contains("User ID: alice"));
        assert!(prompt.contains("User Query: How is my glucose?"));
        assert!(prompt.contains("Health Data:\nGlucose 110 mg/dL\n"));

        let empty = health_advisor_prompt(&id("alice"), "q", &RetrievedContext::default());
        assert!(empty.contains(NO_CONTEXT_PLACEHOLDER));
    }

    #[tokio::test]
    async fn identity_locks_serialize_same_identity() {
        let locks = IdentityLocks::default();
        let a1 = locks.lock_for(&id("a"));
        let _held = a1.lock().await;

        let a2 = locks.lock_for(&id("a"));
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(a2.try_lock().is_err());

        let b = locks.lock_for(&id("b"));
        assert!(b.try_lock().is_ok());
    }

    #[test]
    fn idle_locks_are_pruned() {
        let locks = IdentityLocks::default();
        drop(locks.lock_for(&id("a")));
        drop(locks.lock_for(&id("b")));
        let _c = locks.lock_for(&id("c"));
        assert_eq!(locks.inner.lock().unwrap().len(), 1);
    }

    #[test]
    fn temp_files_removed_on_drop() {
        let tmp = tempfile::TempDir::new().unwrap();
        let a = tmp.path().join("a.pdf");
        std::fs::write(&a, b"x").unwrap();
        let missing = tmp.path().join("a.ocr.pdf");
        drop(TempFiles(vec![a.clone(), missing]));
        assert!(!a.exists());
    }
}
