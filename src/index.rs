//! Vector Index Manager: the on-disk lifecycle of one index per identity.
//!
//! # Layout
//!
//! ```text
//! <storage root>/
//! ├── index_<sha256(identity)>/
//! │   ├── index.sqlite      chunks + embedding BLOBs
//! │   └── manifest.json     written last; marks the index complete
//! └── .staging-XXXXXX/      in-progress build, never a valid index
//! ```
//!
//! A build writes everything into a private staging directory and publishes
//! it with a single `rename`. A crash mid-build leaves only a staging
//! directory, which [`IndexManager::ensure_storage_root`] sweeps at startup.
//! An index directory without a readable manifest is reported as corrupt by
//! [`IndexManager::load`], never as a valid empty index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::Row;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::db;
use crate::embedding::{blob_to_vec, cosine_distance, embed_batched, vec_to_blob, EmbeddingProvider};
use crate::error::PipelineError;
use crate::migrate;
use crate::models::{Chunk, UserIdentity};

pub const INDEX_FILE: &str = "index.sqlite";
pub const MANIFEST_FILE: &str = "manifest.json";
const INDEX_DIR_PREFIX: &str = "index_";
const STAGING_PREFIX: &str = ".staging-";
const MANIFEST_VERSION: u32 = 1;

/// Metadata stored next to the index file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub version: u32,
    pub identity: String,
    pub model: String,
    pub dims: usize,
    pub chunk_count: usize,
    /// Segmentation window the chunks were produced with, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<Window>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

/// A chunk together with its embedding.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// An index loaded in memory. Search is brute-force cosine distance.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    pub identity: UserIdentity,
    pub manifest: IndexManifest,
    entries: Vec<IndexedChunk>,
}

impl VectorIndex {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All chunks in document order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.entries.iter().map(|e| &e.chunk)
    }

    /// The `k` chunks nearest to `query`, ascending by cosine distance.
    /// Ties keep document order.
    pub fn nearest(&self, query: &[f32], k: usize) -> Vec<(Chunk, f32)> {
        if k == 0 || self.entries.is_empty() || query.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(&IndexedChunk, f32)> = self
            .entries
            .iter()
            .map(|e| (e, cosine_distance(query, &e.vector)))
            .collect();
        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.chunk.index.cmp(&b.0.chunk.index))
        });
        scored
            .into_iter()
            .take(k)
            .map(|(e, d)| (e.chunk.clone(), d))
            .collect()
    }
}

/// Owns the storage root and the embedding provider used for builds.
#[derive(Clone)]
pub struct IndexManager {
    root: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    window: Option<Window>,
}

impl IndexManager {
    pub fn new(root: impl Into<PathBuf>, embedder: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        Self {
            root: root.into(),
            embedder,
            batch_size,
            window: None,
        }
    }

    /// Record the segmentation window in every manifest this manager writes.
    pub fn with_window(mut self, chunk_size: usize, chunk_overlap: usize) -> Self {
        self.window = Some(Window {
            chunk_size,
            chunk_overlap,
        });
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of the index for `identity`. Pure and deterministic; the
    /// directory name is the SHA-256 of the identity, so any identity string
    /// maps to a single path component under the root.
    pub fn locate(&self, identity: &UserIdentity) -> PathBuf {
        let digest = Sha256::digest(identity.as_str().as_bytes());
        self.root
            .join(format!("{}{}", INDEX_DIR_PREFIX, hex::encode(digest)))
    }

    /// Create the storage root and remove staging directories left by an
    /// interrupted build. Call once at startup.
    pub async fn ensure_storage_root(&self) -> Result<(), PipelineError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| storage_err(&self.root, e))?;

        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| storage_err(&self.root, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_err(&self.root, e))?
        {
            if entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
                tracing::warn!(path = %entry.path().display(), "removing stale staging directory");
                if let Err(e) = tokio::fs::remove_dir_all(entry.path()).await {
                    tracing::warn!(path = %entry.path().display(), error = %e, "could not remove staging directory");
                }
            }
        }
        Ok(())
    }

    /// Embed `chunks` and persist them as the index for `identity`,
    /// replacing any previous index. All-or-nothing: on failure no index
    /// remains for the identity and no staging files are left behind.
    pub async fn build(
        &self,
        identity: &UserIdentity,
        chunks: Vec<Chunk>,
    ) -> Result<VectorIndex, PipelineError> {
        let target = self.locate(identity);

        if dir_exists(&target).await.map_err(build_io(&target))? {
            tracing::info!(%identity, "removing existing index before rebuild");
            tokio::fs::remove_dir_all(&target)
                .await
                .map_err(build_io(&target))?;
        }

        if chunks.is_empty() {
            return Err(PipelineError::IndexBuild(
                "document produced no chunks".to_string(),
            ));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_batched(self.embedder.as_ref(), &texts, self.batch_size)
            .await
            .map_err(|e| PipelineError::IndexBuild(format!("embedding failed: {}", e)))?;
        let dims = check_dimensions(&vectors, self.embedder.dims())?;

        let manifest = IndexManifest {
            version: MANIFEST_VERSION,
            identity: identity.as_str().to_string(),
            model: self.embedder.model_name().to_string(),
            dims,
            chunk_count: chunks.len(),
            window: self.window,
            created_at: Utc::now(),
        };
        let entries: Vec<IndexedChunk> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexedChunk { chunk, vector })
            .collect();

        // Dropping `staging` removes it, so every early return below cleans up.
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.root)
            .map_err(build_io(&self.root))?;

        write_index_file(&staging.path().join(INDEX_FILE), &entries)
            .await
            .map_err(|e| PipelineError::IndexBuild(format!("writing index: {}", e)))?;

        let manifest_json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| PipelineError::IndexBuild(format!("encoding manifest: {}", e)))?;
        let manifest_path = staging.path().join(MANIFEST_FILE);
        tokio::fs::write(&manifest_path, manifest_json)
            .await
            .map_err(build_io(&manifest_path))?;

        if dir_exists(&target).await.map_err(build_io(&target))? {
            tokio::fs::remove_dir_all(&target)
                .await
                .map_err(build_io(&target))?;
        }
        tokio::fs::rename(staging.path(), &target)
            .await
            .map_err(build_io(&target))?;

        tracing::info!(
            %identity,
            chunks = manifest.chunk_count,
            dims = manifest.dims,
            path = %target.display(),
            "index saved"
        );

        Ok(VectorIndex {
            identity: identity.clone(),
            manifest,
            entries,
        })
    }

    /// Load the index for `identity`. `Ok(None)` means no index exists.
    pub async fn load(&self, identity: &UserIdentity) -> Result<Option<VectorIndex>, PipelineError> {
        let dir = self.locate(identity);
        if !dir_exists(&dir).await.map_err(|e| load_err(&dir, e))? {
            tracing::debug!(%identity, "no index found");
            return Ok(None);
        }

        let manifest_path = dir.join(MANIFEST_FILE);
        let raw = tokio::fs::read(&manifest_path)
            .await
            .map_err(|e| load_err(&manifest_path, e))?;
        let manifest: IndexManifest = serde_json::from_slice(&raw)
            .map_err(|e| PipelineError::IndexLoad(format!("corrupt manifest: {}", e)))?;
        if manifest.identity != identity.as_str() {
            return Err(PipelineError::IndexLoad(
                "manifest belongs to a different identity".to_string(),
            ));
        }

        let entries = read_index_file(&dir.join(INDEX_FILE))
            .await
            .map_err(|e| PipelineError::IndexLoad(format!("reading index: {}", e)))?;

        if entries.len() != manifest.chunk_count {
            return Err(PipelineError::IndexLoad(format!(
                "manifest lists {} chunks, index holds {}",
                manifest.chunk_count,
                entries.len()
            )));
        }
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != manifest.dims) {
            return Err(PipelineError::IndexLoad(format!(
                "chunk {} has {} dims, expected {}",
                bad.chunk.index,
                bad.vector.len(),
                manifest.dims
            )));
        }

        Ok(Some(VectorIndex {
            identity: identity.clone(),
            manifest,
            entries,
        }))
    }

    /// Remove the index for `identity`. Returns whether one existed.
    pub async fn delete(&self, identity: &UserIdentity) -> Result<bool, PipelineError> {
        let dir = self.locate(identity);
        match tokio::fs::symlink_metadata(&dir).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(%identity, "index not found, nothing to delete");
                return Ok(false);
            }
            Err(e) => return Err(delete_err(&dir, e)),
        }
        // A non-directory at the index location is an I/O failure, not absence.
        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| delete_err(&dir, e))?;
        tracing::info!(%identity, "deleted index");
        Ok(true)
    }

    /// Remove the whole storage root and recreate it empty.
    /// Returns whether the root existed beforehand.
    pub async fn wipe_all(&self) -> Result<bool, PipelineError> {
        let existed = dir_exists(&self.root)
            .await
            .map_err(|e| storage_err(&self.root, e))?;
        if existed {
            tokio::fs::remove_dir_all(&self.root)
                .await
                .map_err(|e| storage_err(&self.root, e))?;
        }
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| storage_err(&self.root, e))?;
        tracing::warn!(root = %self.root.display(), existed, "wiped all indexes");
        Ok(existed)
    }
}

fn check_dimensions(vectors: &[Vec<f32>], expected: Option<usize>) -> Result<usize, PipelineError> {
    let dims = vectors.first().map(|v| v.len()).unwrap_or(0);
    if dims == 0 {
        return Err(PipelineError::IndexBuild(
            "embedding provider returned empty vectors".to_string(),
        ));
    }
    if let Some(expected) = expected {
        if expected != dims {
            return Err(PipelineError::IndexBuild(format!(
                "embedding has {} dims, provider declares {}",
                dims, expected
            )));
        }
    }
    if vectors.iter().any(|v| v.len() != dims) {
        return Err(PipelineError::IndexBuild(
            "embedding provider returned vectors of mixed dimensionality".to_string(),
        ));
    }
    Ok(dims)
}

async fn write_index_file(path: &Path, entries: &[IndexedChunk]) -> Result<(), sqlx::Error> {
    let pool = db::connect(path, true).await?;
    migrate::create_index_schema(&pool).await?;

    let mut tx = pool.begin().await?;
    for entry in entries {
        let c = &entry.chunk;
        sqlx::query(
            "INSERT INTO chunks (chunk_index, page, char_offset, text, hash) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(c.index)
        .bind(c.page as i64)
        .bind(c.offset as i64)
        .bind(&c.text)
        .bind(&c.hash)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO embeddings (chunk_index, dims, vector) VALUES (?, ?, ?)")
            .bind(c.index)
            .bind(entry.vector.len() as i64)
            .bind(vec_to_blob(&entry.vector))
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    pool.close().await;
    Ok(())
}

async fn read_index_file(path: &Path) -> Result<Vec<IndexedChunk>, sqlx::Error> {
    let pool = db::connect(path, false).await?;

    let rows = sqlx::query(
        r#"
        SELECT c.chunk_index, c.page, c.char_offset, c.text, c.hash, e.vector
        FROM chunks c
        JOIN embeddings e ON e.chunk_index = c.chunk_index
        ORDER BY c.chunk_index
        "#,
    )
    .fetch_all(&pool)
    .await;
    pool.close().await;

    let mut entries = Vec::new();
    for row in rows? {
        let page: i64 = row.try_get("page")?;
        let offset: i64 = row.try_get("char_offset")?;
        let blob: Vec<u8> = row.try_get("vector")?;
        entries.push(IndexedChunk {
            chunk: Chunk {
                index: row.try_get("chunk_index")?,
                page: page.max(0) as u32,
                offset: offset.max(0) as usize,
                text: row.try_get("text")?,
                hash: row.try_get("hash")?,
            },
            vector: blob_to_vec(&blob),
        });
    }
    Ok(entries)
}

async fn dir_exists(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(m) => Ok(m.is_dir()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn build_io(path: &Path) -> impl Fn(std::io::Error) -> PipelineError + '_ {
    move |e| PipelineError::IndexBuild(format!("{}: {}", path.display(), e))
}

fn delete_err(path: &Path, e: std::io::Error) -> PipelineError {
    PipelineError::IndexDelete(format!("{}: {}", path.display(), e))
}

fn load_err(path: &Path, e: std::io::Error) -> PipelineError {
    PipelineError::IndexLoad(format!("{}: {}", path.display(), e))
}

fn storage_err(path: &Path, e: std::io::Error) -> PipelineError {
    PipelineError::Storage(format!("{}: {}", path.display(), e))
}
