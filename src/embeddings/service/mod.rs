
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, PoisonError};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::embeddings::chunking::Chunk;
use crate::embeddings::context::EmbeddingContext;
use crate::{RagError, Result};

/// Fallback embedding dimension before a model has reported its own
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;

type SharedContext = Arc<StdMutex<EmbeddingContext>>;
type ContextLoader = dyn Fn(&Path, usize) -> Result<EmbeddingContext> + Send + Sync;

/// Process-wide embedding front end.
///
/// The context is created once on first use and reused for the process
/// lifetime; the outer async lock serializes creation so concurrent
/// first callers cannot race two models into memory. The inner blocking
/// lock is held only around the native call itself, inside
/// `spawn_blocking`.
///
/// Chunk-level calls never fail: any error degrades to a zero vector of
/// the expected dimension so a single bad chunk cannot abort an import.
pub struct EmbeddingService {
    context: Mutex<Option<SharedContext>>,
    dimension: AtomicUsize,
    loader: Arc<ContextLoader>,
}

impl Default for EmbeddingService {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingService {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_loader(Arc::new(|model_path: &Path, dimension: usize| {
            EmbeddingContext::load(model_path, dimension)
        }))
    }

    #[inline]
    #[must_use]
    pub fn with_loader(loader: Arc<ContextLoader>) -> Self {
        Self {
            context: Mutex::new(None),
            dimension: AtomicUsize::new(DEFAULT_EMBEDDING_DIMENSION),
            loader,
        }
    }

    /// The process-wide service instance
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<EmbeddingService>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(Self::new())))
    }

    /// Dimension used for zero-vector fallbacks
    #[inline]
    #[must_use]
    pub fn expected_dimension(&self) -> usize {
        self.dimension.load(Ordering::Relaxed)
    }

    /// Override the fallback dimension before the model has loaded
    #[inline]
    pub fn set_expected_dimension(&self, dimension: usize) {
        self.dimension.store(dimension, Ordering::Relaxed);
    }

    /// Drop the loaded context, releasing its native resources.
    pub async fn unload(&self) {
        let mut slot = self.context.lock().await;
        if slot.take().is_some() {
            info!("Unloaded embedding context");
        }
    }

    /// Embed one chunk, degrading to a zero vector on failure.
    pub async fn embed_chunk(&self, chunk: &Chunk, model_path: &Path) -> Vec<f32> {
        match self.embed_text(&chunk.content, model_path).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!("Embedding failed for chunk {}: {e}", chunk.id);
                self.zero_vector()
            }
        }
    }

    /// Embed chunks in one batched pass, padding any chunk the batch
    /// could not cover with a zero vector.
    pub async fn embed_chunks(&self, chunks: &[Chunk], model_path: &Path) -> Vec<Vec<f32>> {
        if chunks.is_empty() {
            return Vec::new();
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
        match self.embed_texts(texts, model_path).await {
            Ok(mut vectors) => {
                if let Some(first) = vectors.first() {
                    if !first.is_empty() {
                        self.dimension.store(first.len(), Ordering::Relaxed);
                    }
                }
                if vectors.len() < chunks.len() {
                    warn!(
                        "{} of {} chunks fell back to zero vectors",
                        chunks.len() - vectors.len(),
                        chunks.len()
                    );
                    while vectors.len() < chunks.len() {
                        vectors.push(self.zero_vector());
                    }
                }
                vectors
            }
            Err(e) => {
                warn!("Batch embedding failed: {e}; returning zero vectors");
                (0..chunks.len()).map(|_| self.zero_vector()).collect()
            }
        }
    }

    /// Embed arbitrary text, propagating failures to the caller.
    pub async fn embed_text(&self, text: &str, model_path: &Path) -> Result<Vec<f32>> {
        let context = self.context(model_path).await?;
        let text = text.to_string();

        let vector = tokio::task::spawn_blocking(move || {
            let mut guard = context.lock().unwrap_or_else(PoisonError::into_inner);
            guard.embed(&text)
        })
        .await
        .map_err(|e| RagError::Embedding(format!("Embedding task failed: {e}")))??;

        if !vector.is_empty() {
            self.dimension.store(vector.len(), Ordering::Relaxed);
        }
        Ok(vector)
    }

    async fn embed_texts(&self, texts: Vec<String>, model_path: &Path) -> Result<Vec<Vec<f32>>> {
        let context = self.context(model_path).await?;

        tokio::task::spawn_blocking(move || {
            let mut guard = context.lock().unwrap_or_else(PoisonError::into_inner);
            guard.embed_batch(&texts)
        })
        .await
        .map_err(|e| RagError::Embedding(format!("Embedding task failed: {e}")))?
    }

    /// Existing context, or a freshly created one; creation is
    /// serialized by the outer lock.
    async fn context(&self, model_path: &Path) -> Result<SharedContext> {
        let mut slot = self.context.lock().await;
        if let Some(context) = slot.as_ref() {
            return Ok(Arc::clone(context));
        }

        debug!("Creating embedding context from {}", model_path.display());
        let path: PathBuf = model_path.to_path_buf();
        let expected = self.expected_dimension();
        let loader = Arc::clone(&self.loader);
        let loaded = tokio::task::spawn_blocking(move || loader(&path, expected))
            .await
            .map_err(|e| RagError::ModelLoad(format!("Model load task failed: {e}")))??;

        self.dimension.store(loaded.dimension(), Ordering::Relaxed);
        info!(
            "Embedding context ready ({} dimensions)",
            loaded.dimension()
        );

        let context = Arc::new(StdMutex::new(loaded));
        *slot = Some(Arc::clone(&context));
        Ok(context)
    }

    fn zero_vector(&self) -> Vec<f32> {
        vec![0.0; self.expected_dimension()]
    }
}
