//! Similarity retrieval over a loaded [`VectorIndex`].
//!
//! The query is embedded with the same provider that built the index and
//! compared to every stored vector by cosine distance. Results come back
//! nearest first; equal distances keep document order.

use std::sync::Arc;

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::PipelineError;
use crate::index::VectorIndex;
use crate::models::Chunk;

/// Shown to the reasoning agent when retrieval found nothing.
pub const NO_CONTEXT_PLACEHOLDER: &str = "No specific data found for this query.";

/// Chunks relevant to one query, ascending by distance.
#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub chunks: Vec<(Chunk, f32)>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.chunks.iter().map(|(c, _)| c.text.as_str())
    }

    /// Chunk texts separated by blank lines, or the placeholder when empty.
    pub fn render(&self) -> String {
        if self.is_empty() {
            return NO_CONTEXT_PLACEHOLDER.to_string();
        }
        self.texts().collect::<Vec<_>>().join("\n\n")
    }
}

pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    default_k: usize,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, default_k: usize) -> Self {
        Self { embedder, default_k }
    }

    /// The `min(k, index.len())` chunks nearest to `query`.
    ///
    /// `k == 0`, an empty index or a blank query short-circuit to an empty
    /// context without calling the embedding provider.
    pub async fn retrieve(
        &self,
        index: &VectorIndex,
        query: &str,
        k: usize,
    ) -> Result<RetrievedContext, PipelineError> {
        if k == 0 || index.is_empty() || query.trim().is_empty() {
            return Ok(RetrievedContext::default());
        }

        let vector = embed_query(self.embedder.as_ref(), query)
            .await
            .map_err(|e| PipelineError::Retrieval(format!("embedding query: {}", e)))?;
        if vector.len() != index.manifest.dims {
            return Err(PipelineError::Retrieval(format!(
                "query embedding has {} dims, index was built with {} ({})",
                vector.len(),
                index.manifest.dims,
                index.manifest.model
            )));
        }

        let chunks = index.nearest(&vector, k);
        tracing::debug!(identity = %index.identity, k, hits = chunks.len(), "retrieved context");
        Ok(RetrievedContext { chunks })
    }

    /// [`retrieve`](Self::retrieve) with the configured default `k`.
    pub async fn retrieve_default(
        &self,
        index: &VectorIndex,
        query: &str,
    ) -> Result<RetrievedContext, PipelineError> {
        self.retrieve(index, query, self.default_k).await
    }
}
