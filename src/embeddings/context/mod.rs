
use std::path::Path;

use tracing::{debug, warn};

use crate::runtime::onnx::OnnxEmbeddingModel;
use crate::runtime::{EmbeddingBackend, ForwardPass, SequenceId, TokenBatch};
use crate::{RagError, Result};

/// Retrieval marker prepended to every embedded text
pub const QUERY_PREFIX: &str = "search_query: ";

/// Total token budget for one forward pass
pub const BATCH_TOKEN_BUDGET: usize = 4096;

/// Maximum distinct sequences admitted into one batch
pub const MAX_BATCH_SEQUENCES: usize = 512;

/// Drives one loaded embedding model.
///
/// Holds the model's working buffers, so calls take `&mut self` and
/// callers serialize access. Embedding is blocking; drive it from a
/// blocking-friendly context.
pub struct EmbeddingContext {
    backend: Box<dyn EmbeddingBackend>,
    token_budget: usize,
    max_sequences: usize,
}

impl EmbeddingContext {
    #[inline]
    pub fn new(backend: Box<dyn EmbeddingBackend>) -> Self {
        Self {
            backend,
            token_budget: BATCH_TOKEN_BUDGET,
            max_sequences: MAX_BATCH_SEQUENCES,
        }
    }

    /// Load the ONNX embedding model at `model_path`.
    #[inline]
    pub fn load(model_path: &Path, dimension: usize) -> Result<Self> {
        let backend = OnnxEmbeddingModel::load(model_path, dimension)?;
        Ok(Self::new(Box::new(backend)))
    }

    #[inline]
    pub fn with_token_budget(mut self, budget: usize) -> Self {
        self.token_budget = budget;
        self
    }

    #[inline]
    pub fn with_max_sequences(mut self, max_sequences: usize) -> Self {
        self.max_sequences = max_sequences;
        self
    }

    /// Embedding dimension of the loaded model
    #[inline]
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.backend.dimension()
    }

    /// Embed a single text into a unit-length vector.
    ///
    /// # Returns
    /// * `Err(RagError::Tokenization)` for empty input or zero tokens
    /// * `Err(RagError::Embedding)` when the token budget is exceeded or
    ///   the model produces an all-zero vector
    pub fn embed(&mut self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(RagError::Tokenization(
                "Cannot embed empty or whitespace-only text".to_string(),
            ));
        }

        let prefixed = format!("{QUERY_PREFIX}{text}");
        let tokens = self.backend.tokenize(&prefixed)?;
        if tokens.is_empty() {
            return Err(RagError::Tokenization(
                "Text produced zero tokens".to_string(),
            ));
        }
        if tokens.len() > self.token_budget {
            return Err(RagError::Embedding(format!(
                "Token count {} exceeds batch budget {}",
                tokens.len(),
                self.token_budget
            )));
        }

        let mut batch = TokenBatch::new(self.token_budget);
        batch.push_sequence(&tokens, 0)?;
        let pass = self.backend.forward(&batch)?;

        let mut vector = extract_sequence_vector(&pass, 0).ok_or_else(|| {
            RagError::Embedding("Embedding produced an all-zero vector".to_string())
        })?;
        l2_normalize(&mut vector);
        Ok(vector)
    }

    /// Embed many texts in one shared forward pass.
    ///
    /// Texts that are empty or tokenize to zero tokens are skipped, and
    /// admission stops once the token budget or the sequence cap is
    /// reached, so the result can be shorter than the input. A sequence
    /// whose vector cannot be extracted yields a zero vector instead of
    /// failing the whole batch.
    pub fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut batch = TokenBatch::new(self.token_budget);
        let mut admitted: Vec<SequenceId> = Vec::new();
        let window = self.backend.max_tokens();

        for (index, text) in texts.iter().enumerate() {
            if admitted.len() >= self.max_sequences {
                warn!(
                    "Sequence cap {} reached; embedding {} of {} texts",
                    self.max_sequences,
                    admitted.len(),
                    texts.len()
                );
                break;
            }
            if text.trim().is_empty() {
                warn!("Skipping empty text at index {index}");
                continue;
            }

            let prefixed = format!("{QUERY_PREFIX}{text}");
            let mut tokens = self.backend.tokenize(&prefixed)?;
            if tokens.is_empty() {
                warn!("Skipping text at index {index}: produced zero tokens");
                continue;
            }
            if tokens.len() > window {
                warn!(
                    "Truncating text at index {index} from {} to {window} tokens",
                    tokens.len()
                );
                tokens.truncate(window);
            }
            if tokens.len() > batch.remaining() {
                warn!(
                    "Token budget exhausted; embedding {} of {} texts",
                    admitted.len(),
                    texts.len()
                );
                break;
            }

            let sequence = admitted.len() as SequenceId;
            batch.push_sequence(&tokens, sequence)?;
            admitted.push(sequence);
        }

        if batch.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Embedding {} sequences ({} tokens) in one pass",
            admitted.len(),
            batch.len()
        );
        let pass = self.backend.forward(&batch)?;

        let dimension = if pass.dimension() > 0 {
            pass.dimension()
        } else {
            self.backend.dimension()
        };

        let mut vectors = Vec::with_capacity(admitted.len());
        for &sequence in &admitted {
            match extract_sequence_vector(&pass, sequence) {
                Some(mut vector) => {
                    l2_normalize(&mut vector);
                    vectors.push(vector);
                }
                None => {
                    warn!("Sequence {sequence} produced an all-zero vector; storing zeros");
                    vectors.push(vec![0.0; dimension]);
                }
            }
        }
        Ok(vectors)
    }
}

/// Pooled vector for a sequence, falling back to a manual mean over
/// per-token vectors when the pooled read-back is absent or all-zero.
///
/// Returns `None` when no usable vector exists.
fn extract_sequence_vector(pass: &ForwardPass, sequence: SequenceId) -> Option<Vec<f32>> {
    if let Some(pooled) = pass.pooled(sequence) {
        if !is_all_zero(pooled) {
            return Some(pooled.to_vec());
        }
    }

    let token_vectors = pass.token_vectors(sequence);
    if token_vectors.is_empty() {
        return None;
    }
    debug!("Pooled vector unavailable for sequence {sequence}; averaging token vectors");

    let dimension = token_vectors[0].len();
    let mut mean = vec![0.0f32; dimension];
    for vector in token_vectors {
        for (accumulator, value) in mean.iter_mut().zip(vector) {
            *accumulator += value;
        }
    }
    let count = token_vectors.len() as f32;
    for value in &mut mean {
        *value /= count;
    }

    if is_all_zero(&mean) { None } else { Some(mean) }
}

fn is_all_zero(vector: &[f32]) -> bool {
    vector.iter().all(|value| value.abs() <= f32::EPSILON)
}

/// Scale `vector` to unit Euclidean length; all-zero input is left as is.
fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}
