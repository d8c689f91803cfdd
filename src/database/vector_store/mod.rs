
use std::collections::HashMap;
use std::path::PathBuf;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::embeddings::chunking::Chunk;
use crate::{RagError, Result};

const FILE_PREFIX: &str = "vectors_";
const FILE_EXTENSION: &str = "json";

/// One persisted (embedding, text) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredVector {
    pub embedding: Vec<f32>,
    pub content: String,
}

/// File-backed vector store with nearest-neighbor search.
///
/// Each document owns one JSON file holding its complete vector
/// collection; writes replace the file atomically so a crash mid-write
/// leaves the previous version intact. A per-document cache avoids
/// re-reading collections within a session, but disk stays authoritative
/// and the cache can be dropped at any time.
pub struct VectorStore {
    directory: PathBuf,
    cache: RwLock<HashMap<Uuid, Vec<StoredVector>>>,
}

impl VectorStore {
    /// Create a store rooted at `directory`, creating it if needed.
    ///
    /// # Returns
    /// * `Err(RagError::Storage)` when the directory cannot be created
    #[inline]
    pub fn new(directory: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&directory).map_err(|e| {
            RagError::Storage(format!(
                "Failed to create vector directory {}: {e}",
                directory.display()
            ))
        })?;
        debug!("Vector store rooted at {}", directory.display());

        Ok(Self {
            directory,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Append embedded chunks to their documents' collections.
    ///
    /// Pairs are grouped by document; each affected collection is loaded,
    /// extended in input order, and rewritten atomically. A failed write
    /// is logged and dropped rather than aborting the other documents.
    pub async fn add_many(&self, pairs: Vec<(Chunk, Vec<f32>)>) -> Result<()> {
        if pairs.is_empty() {
            return Ok(());
        }

        let grouped: HashMap<Uuid, Vec<(Chunk, Vec<f32>)>> = pairs
            .into_iter()
            .map(|(chunk, embedding)| (chunk.document_id, (chunk, embedding)))
            .into_group_map();

        for (document_id, group) in grouped {
            let mut collection = self.load(document_id).await;
            collection.reserve(group.len());
            for (chunk, embedding) in group {
                collection.push(StoredVector {
                    embedding,
                    content: chunk.content,
                });
            }
            self.save(document_id, collection).await;
        }
        Ok(())
    }

    /// Nearest stored vectors for a query, closest first.
    ///
    /// # Arguments
    /// * `document_id` - Document whose collection is searched
    /// * `query_embeddings` - Query vectors; only the first is used
    /// * `top_k` - Maximum number of results
    ///
    /// # Returns
    /// * `Err(RagError::Storage)` when a stored vector's length differs
    ///   from the query's
    pub async fn search(
        &self,
        document_id: Uuid,
        query_embeddings: &[Vec<f32>],
        top_k: usize,
    ) -> Result<Vec<StoredVector>> {
        let Some(query) = query_embeddings.first() else {
            return Ok(Vec::new());
        };

        let collection = self.load(document_id).await;
        if collection.is_empty() {
            return Ok(Vec::new());
        }

        let mut ranked: Vec<(f32, StoredVector)> = Vec::with_capacity(collection.len());
        for stored in collection {
            if stored.embedding.len() != query.len() {
                return Err(RagError::Storage(format!(
                    "Vector length mismatch: stored {} vs query {}",
                    stored.embedding.len(),
                    query.len()
                )));
            }
            ranked.push((euclidean_distance(&stored.embedding, query), stored));
        }

        ranked.sort_by(|a, b| a.0.total_cmp(&b.0));
        ranked.truncate(top_k);
        Ok(ranked.into_iter().map(|(_, stored)| stored).collect())
    }

    /// Remove a document's collection from disk and cache; idempotent.
    pub async fn delete(&self, document_id: Uuid) -> Result<()> {
        self.cache.write().await.remove(&document_id);

        let path = self.file_path(document_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted vector collection for document {document_id}");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RagError::Storage(format!(
                "Failed to delete {}: {e}",
                path.display()
            ))),
        }
    }

    /// Drop every cached collection; disk copies are untouched.
    pub async fn clear_cache(&self) {
        let mut cache = self.cache.write().await;
        debug!("Clearing {} cached vector collections", cache.len());
        cache.clear();
    }

    fn file_path(&self, document_id: Uuid) -> PathBuf {
        self.directory
            .join(format!("{FILE_PREFIX}{document_id}.{FILE_EXTENSION}"))
    }

    /// Cached collection, or the on-disk one; unreadable or missing
    /// files read as empty.
    async fn load(&self, document_id: Uuid) -> Vec<StoredVector> {
        {
            let cache = self.cache.read().await;
            if let Some(collection) = cache.get(&document_id) {
                return collection.clone();
            }
        }

        let path = self.file_path(document_id);
        let collection = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<StoredVector>>(&bytes) {
                Ok(collection) => collection,
                Err(e) => {
                    warn!(
                        "Ignoring unreadable vector collection {}: {e}",
                        path.display()
                    );
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!("Failed to read vector collection {}: {e}", path.display());
                Vec::new()
            }
        };

        self.cache
            .write()
            .await
            .insert(document_id, collection.clone());
        collection
    }

    /// Atomically replace a document's collection file. A failed write
    /// drops the update and invalidates the cache entry so disk stays
    /// authoritative.
    async fn save(&self, document_id: Uuid, collection: Vec<StoredVector>) {
        let path = self.file_path(document_id);
        let temp = path.with_extension(format!("{FILE_EXTENSION}.tmp"));

        let json = match serde_json::to_vec(&collection) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize vector collection for {document_id}: {e}");
                self.cache.write().await.remove(&document_id);
                return;
            }
        };

        if let Err(e) = tokio::fs::write(&temp, &json).await {
            error!("Failed to write {}: {e}; dropping update", temp.display());
            self.cache.write().await.remove(&document_id);
            return;
        }
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            error!("Failed to replace {}: {e}; dropping update", path.display());
            let _ = tokio::fs::remove_file(&temp).await;
            self.cache.write().await.remove(&document_id);
            return;
        }

        debug!(
            "Persisted {} vectors for document {document_id}",
            collection.len()
        );
        self.cache.write().await.insert(document_id, collection);
    }
}

/// Euclidean distance between two equal-length vectors
fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
