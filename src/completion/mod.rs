//! Streaming text completion over the shared on-device causal model.
//!
//! Each call to [`CompletionEngine::generate`] runs its own generation
//! session and delivers progress over a channel-backed stream. Sessions
//! share one lazily created model context, so decode work is serialized
//! while the result streams stay independent.

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, PoisonError};

use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::runtime::CompletionBackend;
use crate::runtime::onnx::OnnxCompletionModel;
use crate::{RagError, Result};

const EVENT_CHANNEL_CAPACITY: usize = 32;

type SharedModel = Arc<StdMutex<Box<dyn CompletionBackend>>>;
type ModelLoader = dyn Fn(&Path, usize) -> Result<Box<dyn CompletionBackend>> + Send + Sync;

/// Progress of one generation request, delivered in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionEvent {
    /// Model is loading or the request is queued behind another session.
    Waiting,
    /// A newly decoded text fragment.
    Progressing(String),
    /// Terminal event carrying the full accumulated text, also emitted
    /// after cancellation with whatever was produced up to the stop.
    Finished(String),
    /// Terminal event for a request that could not run.
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationPhase {
    Idle,
    Loading,
    Generating,
    Finished,
    Cancelled,
    Failed,
}

impl std::fmt::Display for GenerationPhase {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            GenerationPhase::Idle => write!(f, "Idle"),
            GenerationPhase::Loading => write!(f, "Loading"),
            GenerationPhase::Generating => write!(f, "Generating"),
            GenerationPhase::Finished => write!(f, "Finished"),
            GenerationPhase::Cancelled => write!(f, "Cancelled"),
            GenerationPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Lazily loads the completion model once and streams generations from it.
///
/// The model slot uses the same two-level locking as the embedding side:
/// an async lock makes creation single-flight, a blocking lock guards the
/// native decode calls inside `spawn_blocking`. An additional session lock
/// keeps one generation's decode state from interleaving with another's.
pub struct CompletionEngine {
    model: Arc<Mutex<Option<SharedModel>>>,
    session: Arc<Mutex<()>>,
    loader: Arc<ModelLoader>,
    shutdown: CancellationToken,
}

impl Default for CompletionEngine {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionEngine {
    #[inline]
    pub fn new() -> Self {
        Self::with_loader(Arc::new(|path, max_output_tokens| {
            Ok(Box::new(OnnxCompletionModel::load(path, max_output_tokens)?)
                as Box<dyn CompletionBackend>)
        }))
    }

    #[inline]
    pub fn with_loader(loader: Arc<ModelLoader>) -> Self {
        Self {
            model: Arc::new(Mutex::new(None)),
            session: Arc::new(Mutex::new(())),
            loader,
            shutdown: CancellationToken::new(),
        }
    }

    /// Process-wide engine instance.
    #[inline]
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<CompletionEngine>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(Self::new())))
    }

    /// Drops the loaded model so the next request reloads it.
    #[inline]
    pub async fn unload(&self) {
        let mut slot = self.model.lock().await;
        if slot.take().is_some() {
            info!("Completion model released");
        }
    }

    /// Stop every live generation session.
    ///
    /// Each session ends with `Finished` carrying its accumulated text,
    /// exactly as if its own cancellation handle had been used. The engine
    /// stays shut down; later requests finish immediately.
    #[inline]
    pub fn shutdown(&self) {
        info!("Completion engine shutting down");
        self.shutdown.cancel();
    }

    /// Starts a generation session and returns its event stream.
    ///
    /// The stream yields `Waiting`, then `Progressing` fragments, and ends
    /// with exactly one terminal event. Cancelling the token, or shutting
    /// the engine down, stops decoding after the current step and still
    /// ends the stream with `Finished` carrying the text accumulated so
    /// far; only requests that never reach the decode loop end with
    /// `Failed`.
    #[inline]
    pub fn generate(
        &self,
        prompt: String,
        model_path: &Path,
        max_output_tokens: usize,
        cancellation: CancellationToken,
    ) -> ReceiverStream<CompletionEvent> {
        let (events, stream) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let request = GenerationRequest {
            prompt,
            model_path: model_path.to_path_buf(),
            max_output_tokens,
            cancellation,
            shutdown: self.shutdown.clone(),
            model_slot: Arc::clone(&self.model),
            session: Arc::clone(&self.session),
            loader: Arc::clone(&self.loader),
        };

        tokio::spawn(run_generation(request, events));

        ReceiverStream::new(stream)
    }
}

struct GenerationRequest {
    prompt: String,
    model_path: PathBuf,
    max_output_tokens: usize,
    cancellation: CancellationToken,
    shutdown: CancellationToken,
    model_slot: Arc<Mutex<Option<SharedModel>>>,
    session: Arc<Mutex<()>>,
    loader: Arc<ModelLoader>,
}

async fn run_generation(request: GenerationRequest, events: mpsc::Sender<CompletionEvent>) {
    let mut phase = GenerationPhase::Idle;
    phase = advance(phase, GenerationPhase::Loading);

    if !request.model_path.exists() {
        let message = format!(
            "Completion model not found at {}",
            request.model_path.display()
        );
        error!("{message}");
        advance(phase, GenerationPhase::Failed);
        let _ = events.send(CompletionEvent::Failed(message)).await;
        return;
    }

    if events.send(CompletionEvent::Waiting).await.is_err() {
        return;
    }

    let model = match load_model(&request).await {
        Ok(model) => model,
        Err(e) => {
            error!("Completion model load failed: {e}");
            advance(phase, GenerationPhase::Failed);
            let _ = events.send(CompletionEvent::Failed(e.to_string())).await;
            return;
        }
    };

    // One decode session at a time; the blocking model lock below only
    // guards individual native calls.
    let _session = request.session.lock().await;

    if let Err(e) = prime(&model, &request.prompt).await {
        error!("Prompt priming failed: {e}");
        advance(phase, GenerationPhase::Failed);
        let _ = events.send(CompletionEvent::Failed(e.to_string())).await;
        return;
    }

    phase = advance(phase, GenerationPhase::Generating);

    let mut accumulated = String::new();
    let outcome = loop {
        if request.cancellation.is_cancelled() || request.shutdown.is_cancelled() {
            break GenerationPhase::Cancelled;
        }

        match decode_step(&model).await {
            Ok(Some(piece)) => {
                if piece.is_empty() {
                    continue;
                }
                accumulated.push_str(&piece);
                if events
                    .send(CompletionEvent::Progressing(piece))
                    .await
                    .is_err()
                {
                    // Receiver dropped; treat like cancellation.
                    break GenerationPhase::Cancelled;
                }
            }
            Ok(None) => break GenerationPhase::Finished,
            Err(e) => {
                error!("Decode step failed: {e}");
                advance(phase, GenerationPhase::Failed);
                let _ = events.send(CompletionEvent::Failed(e.to_string())).await;
                return;
            }
        }
    };

    advance(phase, outcome);
    let _ = events.send(CompletionEvent::Finished(accumulated)).await;
}

/// Existing model, or a freshly loaded one; creation is serialized by the
/// slot lock.
async fn load_model(request: &GenerationRequest) -> Result<SharedModel> {
    let mut slot = request.model_slot.lock().await;
    if let Some(model) = slot.as_ref() {
        return Ok(Arc::clone(model));
    }

    debug!(
        "Creating completion context from {}",
        request.model_path.display()
    );
    let path = request.model_path.clone();
    let max_output_tokens = request.max_output_tokens;
    let loader = Arc::clone(&request.loader);
    let loaded = tokio::task::spawn_blocking(move || loader(&path, max_output_tokens))
        .await
        .map_err(|e| RagError::ModelLoad(format!("Model load task failed: {e}")))??;

    info!("Completion context ready");
    let model = Arc::new(StdMutex::new(loaded));
    *slot = Some(Arc::clone(&model));
    Ok(model)
}

async fn prime(model: &SharedModel, prompt: &str) -> Result<()> {
    let model = Arc::clone(model);
    let prompt = prompt.to_string();
    tokio::task::spawn_blocking(move || {
        let mut guard = model.lock().unwrap_or_else(PoisonError::into_inner);
        let tokens = guard.tokenize(&prompt)?;
        guard.begin(&tokens)
    })
    .await
    .map_err(|e| RagError::Generation(format!("Completion task failed: {e}")))?
}

async fn decode_step(model: &SharedModel) -> Result<Option<String>> {
    let model = Arc::clone(model);
    tokio::task::spawn_blocking(move || {
        let mut guard = model.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.next_token()? {
            Some(token) => guard.piece(token).map(Some),
            None => Ok(None),
        }
    })
    .await
    .map_err(|e| RagError::Generation(format!("Completion task failed: {e}")))?
}

fn advance(from: GenerationPhase, to: GenerationPhase) -> GenerationPhase {
    debug!("Generation phase moved from {from} to {to}");
    to
}
