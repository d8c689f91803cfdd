#[cfg(test)]
mod tests;

pub mod onnx;

use std::collections::HashMap;

use crate::{RagError, Result};

/// Token identifier produced by a model's tokenizer
pub type TokenId = u32;

/// Identifier distinguishing sequences within one batch
pub type SequenceId = u32;

/// One (token, position, sequence) triple within a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchItem {
    pub token: TokenId,
    pub position: usize,
    pub sequence: SequenceId,
}

/// A bounded buffer of token triples submitted to one forward pass.
///
/// The capacity is the batch token budget; admission beyond it fails
/// rather than silently reallocating, matching the fixed-size native
/// buffers the runtime allocates up front.
#[derive(Debug, Clone)]
pub struct TokenBatch {
    items: Vec<BatchItem>,
    capacity: usize,
}

impl TokenBatch {
    #[inline]
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a single token triple.
    ///
    /// # Returns
    /// * `Err(RagError::Tokenization)` when the batch is already full
    #[inline]
    pub fn push(&mut self, token: TokenId, position: usize, sequence: SequenceId) -> Result<()> {
        if self.items.len() >= self.capacity {
            return Err(RagError::Tokenization(format!(
                "Token batch capacity {} exceeded",
                self.capacity
            )));
        }
        self.items.push(BatchItem {
            token,
            position,
            sequence,
        });
        Ok(())
    }

    /// Add a whole sequence, assigning positions `0..tokens.len()`.
    #[inline]
    pub fn push_sequence(&mut self, tokens: &[TokenId], sequence: SequenceId) -> Result<()> {
        for (position, &token) in tokens.iter().enumerate() {
            self.push(token, position, sequence)?;
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity - self.items.len()
    }

    #[inline]
    #[must_use]
    pub fn items(&self) -> &[BatchItem] {
        &self.items
    }

    /// Sequence ids in first-seen order.
    #[must_use]
    pub fn sequence_ids(&self) -> Vec<SequenceId> {
        let mut seen = Vec::new();
        for item in &self.items {
            if !seen.contains(&item.sequence) {
                seen.push(item.sequence);
            }
        }
        seen
    }

    #[inline]
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// Read-back of one embedding forward pass.
///
/// A sequence may carry a model-native pooled vector, per-token vectors,
/// or both; callers decide which to use.
#[derive(Debug, Clone, Default)]
pub struct ForwardPass {
    dimension: usize,
    pooled: HashMap<SequenceId, Vec<f32>>,
    token_vectors: HashMap<SequenceId, Vec<Vec<f32>>>,
}

impl ForwardPass {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            pooled: HashMap::new(),
            token_vectors: HashMap::new(),
        }
    }

    /// Embedding dimension of every vector in this pass
    #[inline]
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn set_pooled(&mut self, sequence: SequenceId, vector: Vec<f32>) {
        self.pooled.insert(sequence, vector);
    }

    #[inline]
    pub fn push_token_vector(&mut self, sequence: SequenceId, vector: Vec<f32>) {
        self.token_vectors.entry(sequence).or_default().push(vector);
    }

    /// Model-native pooled vector for a sequence, if the model produced one
    #[inline]
    #[must_use]
    pub fn pooled(&self, sequence: SequenceId) -> Option<&[f32]> {
        self.pooled.get(&sequence).map(Vec::as_slice)
    }

    /// Per-token vectors for a sequence, in token order
    #[inline]
    #[must_use]
    pub fn token_vectors(&self, sequence: SequenceId) -> &[Vec<f32>] {
        self.token_vectors
            .get(&sequence)
            .map_or(&[], Vec::as_slice)
    }
}

/// Contract an embedding model must satisfy.
///
/// Implementations own the loaded weights and any working buffers; calls
/// are blocking and must be driven from a blocking-friendly context.
pub trait EmbeddingBackend: Send {
    /// Convert text to token ids
    fn tokenize(&self, text: &str) -> Result<Vec<TokenId>>;

    /// Run one forward pass over the batch
    fn forward(&mut self, batch: &TokenBatch) -> Result<ForwardPass>;

    /// Embedding dimension this model produces
    fn dimension(&self) -> usize;

    /// Context window in tokens for a single sequence
    fn max_tokens(&self) -> usize;
}

/// Contract a completion model must satisfy.
///
/// One generation at a time: `begin` primes the decode state for a prompt
/// and `next_token` advances it one step until the model stops.
pub trait CompletionBackend: Send {
    /// Convert text to token ids
    fn tokenize(&self, text: &str) -> Result<Vec<TokenId>>;

    /// Prime the decode state from a prompt, discarding any prior session
    fn begin(&mut self, prompt: &[TokenId]) -> Result<()>;

    /// Advance one decoding step.
    ///
    /// # Returns
    /// * `Ok(Some(token))` for a newly sampled token
    /// * `Ok(None)` when the model signalled end of sequence
    fn next_token(&mut self) -> Result<Option<TokenId>>;

    /// Text fragment a sampled token adds to the output
    fn piece(&mut self, token: TokenId) -> Result<String>;
}
