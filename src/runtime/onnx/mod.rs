
use std::path::{Path, PathBuf};

use ndarray::Axis;
use tokenizers::Tokenizer;
use tract_onnx::prelude::*;
use tracing::debug;

use super::{CompletionBackend, EmbeddingBackend, ForwardPass, SequenceId, TokenBatch, TokenId};
use crate::{RagError, Result};

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Context window applied to embedding sequences
pub const CONTEXT_WINDOW_TOKENS: usize = 2048;

/// End-of-sequence token spellings probed in the tokenizer vocabulary
const EOS_TOKENS: &[&str] = &[
    "</s>",
    "<|endoftext|>",
    "<|end|>",
    "<|eot_id|>",
    "<|im_end|>",
];

/// Tokenizer file expected next to a model file
fn sibling_tokenizer_path(model_path: &Path) -> PathBuf {
    model_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("tokenizer.json")
}

fn load_tract_model(model_path: &Path) -> Result<TractModel> {
    if !model_path.exists() {
        return Err(RagError::ModelLoad(format!(
            "Model file not found: {}",
            model_path.display()
        )));
    }

    tract_onnx::onnx()
        .model_for_path(model_path)
        .map_err(|e| RagError::ModelLoad(format!("Failed to read ONNX model: {e}")))?
        .into_optimized()
        .map_err(|e| RagError::ModelLoad(format!("Failed to optimize ONNX model: {e}")))?
        .into_runnable()
        .map_err(|e| RagError::ModelLoad(format!("Failed to plan ONNX model: {e}")))
}

fn load_tokenizer(model_path: &Path) -> Result<Tokenizer> {
    let tokenizer_path = sibling_tokenizer_path(model_path);
    Tokenizer::from_file(&tokenizer_path).map_err(|e| {
        RagError::ModelLoad(format!(
            "Failed to load tokenizer {}: {e}",
            tokenizer_path.display()
        ))
    })
}

/// Index of the largest logit, ignoring NaN; ties resolve to the
/// lowest index
fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    let mut best_value = f32::NEG_INFINITY;
    for (index, &value) in values.iter().enumerate() {
        if value > best_value {
            best = index;
            best_value = value;
        }
    }
    best
}

/// Text newly added by a decode whose previous output was `emitted`.
///
/// Byte-level tokenizers can rewrite the tail of earlier output while a
/// multi-byte character completes, so when `full` no longer extends
/// `emitted` the delta restarts at the last point the two decodes agree.
fn decode_delta(emitted: &str, full: &str) -> String {
    if let Some(delta) = full.strip_prefix(emitted) {
        return delta.to_string();
    }
    let common: usize = emitted
        .chars()
        .zip(full.chars())
        .take_while(|(a, b)| a == b)
        .map(|(a, _)| a.len_utf8())
        .sum();
    full[common..].to_string()
}

/// Pad ragged token sequences into row-major `[batch, seq_len]` buffers.
///
/// # Returns
/// * `(input_ids, attention_mask, seq_len)` with zero-padded ids and a
///   0/1 mask marking real tokens
fn padded_batch(sequences: &[(SequenceId, Vec<TokenId>)]) -> (Vec<i64>, Vec<i64>, usize) {
    let seq_len = sequences
        .iter()
        .map(|(_, tokens)| tokens.len())
        .max()
        .unwrap_or(0);

    let mut input_ids = Vec::with_capacity(sequences.len() * seq_len);
    let mut attention_mask = Vec::with_capacity(sequences.len() * seq_len);
    for (_, tokens) in sequences {
        for &token in tokens {
            input_ids.push(i64::from(token));
            attention_mask.push(1);
        }
        for _ in tokens.len()..seq_len {
            input_ids.push(0);
            attention_mask.push(0);
        }
    }

    (input_ids, attention_mask, seq_len)
}

/// BERT-style encoder loaded through tract.
///
/// Accepts exports with two inputs (ids, mask) or three (ids, mask,
/// token type ids). A rank-3 output is read as per-token vectors; a
/// rank-2 output is read as a model-native pooled vector per sequence.
pub struct OnnxEmbeddingModel {
    model: TractModel,
    tokenizer: Tokenizer,
    input_count: usize,
    dimension: usize,
}

impl OnnxEmbeddingModel {
    /// Load a model file and its sibling `tokenizer.json`.
    ///
    /// # Arguments
    /// * `model_path` - Path to the `.onnx` file
    /// * `dimension` - Expected embedding dimension, corrected from the
    ///   model output once a forward pass has run
    pub fn load(model_path: &Path, dimension: usize) -> Result<Self> {
        let model = load_tract_model(model_path)?;
        let tokenizer = load_tokenizer(model_path)?;

        let input_count = model.model().inputs.len();
        if !(2..=3).contains(&input_count) {
            return Err(RagError::ModelLoad(format!(
                "Embedding model expects 2 or 3 inputs, found {input_count}"
            )));
        }

        debug!(
            "Loaded embedding model {} ({} inputs)",
            model_path.display(),
            input_count
        );

        Ok(Self {
            model,
            tokenizer,
            input_count,
            dimension,
        })
    }

    fn run(&self, sequences: &[(SequenceId, Vec<TokenId>)]) -> Result<TVec<TValue>> {
        let (input_ids, attention_mask, seq_len) = padded_batch(sequences);
        let shape = [sequences.len(), seq_len];

        let ids = Tensor::from_shape(&shape, &input_ids)
            .map_err(|e| RagError::Embedding(format!("Failed to build input tensor: {e}")))?;
        let mask = Tensor::from_shape(&shape, &attention_mask)
            .map_err(|e| RagError::Embedding(format!("Failed to build mask tensor: {e}")))?;

        let mut inputs: TVec<TValue> = tvec![ids.into(), mask.into()];
        if self.input_count == 3 {
            let token_types = vec![0i64; sequences.len() * seq_len];
            let types = Tensor::from_shape(&shape, &token_types)
                .map_err(|e| RagError::Embedding(format!("Failed to build type tensor: {e}")))?;
            inputs.push(types.into());
        }

        self.model
            .run(inputs)
            .map_err(|e| RagError::Embedding(format!("Forward pass failed: {e}")))
    }
}

impl EmbeddingBackend for OnnxEmbeddingModel {
    fn tokenize(&self, text: &str) -> Result<Vec<TokenId>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| RagError::Tokenization(format!("Failed to tokenize text: {e}")))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn forward(&mut self, batch: &TokenBatch) -> Result<ForwardPass> {
        if batch.is_empty() {
            return Ok(ForwardPass::new(self.dimension));
        }

        let mut sequences: Vec<(SequenceId, Vec<TokenId>)> = Vec::new();
        for item in batch.items() {
            match sequences.iter_mut().find(|(id, _)| *id == item.sequence) {
                Some((_, tokens)) => tokens.push(item.token),
                None => sequences.push((item.sequence, vec![item.token])),
            }
        }

        let outputs = self.run(&sequences)?;
        let view = outputs[0]
            .to_array_view::<f32>()
            .map_err(|e| RagError::Embedding(format!("Failed to read model output: {e}")))?;

        match view.ndim() {
            3 => {
                let hidden = view
                    .to_owned()
                    .into_dimensionality::<ndarray::Ix3>()
                    .map_err(|e| RagError::Embedding(format!("Unexpected output shape: {e}")))?;
                self.dimension = hidden.shape()[2];

                let mut pass = ForwardPass::new(self.dimension);
                for (row, (sequence, tokens)) in sequences.iter().enumerate() {
                    let per_token = hidden.index_axis(Axis(0), row);
                    for position in 0..tokens.len() {
                        pass.push_token_vector(*sequence, per_token.row(position).to_vec());
                    }
                }
                Ok(pass)
            }
            2 => {
                let pooled = view
                    .to_owned()
                    .into_dimensionality::<ndarray::Ix2>()
                    .map_err(|e| RagError::Embedding(format!("Unexpected output shape: {e}")))?;
                self.dimension = pooled.shape()[1];

                let mut pass = ForwardPass::new(self.dimension);
                for (row, (sequence, _)) in sequences.iter().enumerate() {
                    pass.set_pooled(*sequence, pooled.row(row).to_vec());
                }
                Ok(pass)
            }
            rank => Err(RagError::Embedding(format!(
                "Unexpected output rank {rank} from embedding model"
            ))),
        }
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_tokens(&self) -> usize {
        CONTEXT_WINDOW_TOKENS
    }
}

impl Drop for OnnxEmbeddingModel {
    fn drop(&mut self) {
        debug!("Released embedding model resources");
    }
}

/// Greedy causal decoder loaded through tract.
///
/// Exports without KV-cache inputs are supported by re-running the full
/// sequence each step, so per-step cost grows with output length.
pub struct OnnxCompletionModel {
    model: TractModel,
    tokenizer: Tokenizer,
    input_count: usize,
    eos_ids: Vec<TokenId>,
    max_new_tokens: usize,
    tokens: Vec<TokenId>,
    generated: Vec<TokenId>,
    emitted: String,
}

impl OnnxCompletionModel {
    /// Load a model file and its sibling `tokenizer.json`.
    ///
    /// # Arguments
    /// * `model_path` - Path to the `.onnx` file
    /// * `max_new_tokens` - Hard cap on generated tokens per session
    pub fn load(model_path: &Path, max_new_tokens: usize) -> Result<Self> {
        let model = load_tract_model(model_path)?;
        let tokenizer = load_tokenizer(model_path)?;

        let input_count = model.model().inputs.len();
        if !(1..=3).contains(&input_count) {
            return Err(RagError::ModelLoad(format!(
                "Completion model expects 1 to 3 inputs, found {input_count}"
            )));
        }

        let eos_ids: Vec<TokenId> = EOS_TOKENS
            .iter()
            .filter_map(|token| tokenizer.token_to_id(token))
            .collect();
        if eos_ids.is_empty() {
            debug!("No end-of-sequence token in vocabulary; relying on the token cap");
        }

        debug!(
            "Loaded completion model {} ({} inputs, {} stop tokens)",
            model_path.display(),
            input_count,
            eos_ids.len()
        );

        Ok(Self {
            model,
            tokenizer,
            input_count,
            eos_ids,
            max_new_tokens,
            tokens: Vec::new(),
            generated: Vec::new(),
            emitted: String::new(),
        })
    }

    fn run_logits(&self) -> Result<Vec<f32>> {
        let len = self.tokens.len();
        let input_ids: Vec<i64> = self.tokens.iter().map(|&t| i64::from(t)).collect();
        let shape = [1usize, len];

        let ids = Tensor::from_shape(&shape, &input_ids)
            .map_err(|e| RagError::Generation(format!("Failed to build input tensor: {e}")))?;
        let mut inputs: TVec<TValue> = tvec![ids.into()];

        if self.input_count >= 2 {
            let mask = Tensor::from_shape(&shape, &vec![1i64; len])
                .map_err(|e| RagError::Generation(format!("Failed to build mask tensor: {e}")))?;
            inputs.push(mask.into());
        }
        if self.input_count == 3 {
            let position_ids: Vec<i64> = (0..len as i64).collect();
            let positions = Tensor::from_shape(&shape, &position_ids).map_err(|e| {
                RagError::Generation(format!("Failed to build position tensor: {e}"))
            })?;
            inputs.push(positions.into());
        }

        let outputs = self
            .model
            .run(inputs)
            .map_err(|e| RagError::Generation(format!("Decode step failed: {e}")))?;

        let view = outputs[0]
            .to_array_view::<f32>()
            .map_err(|e| RagError::Generation(format!("Failed to read logits: {e}")))?;

        // Logits arrive as [1, len, vocab] or already reduced to the
        // last position as [1, vocab].
        match view.ndim() {
            3 => {
                let logits = view
                    .to_owned()
                    .into_dimensionality::<ndarray::Ix3>()
                    .map_err(|e| RagError::Generation(format!("Unexpected logits shape: {e}")))?;
                let last = logits.shape()[1] - 1;
                Ok(logits.index_axis(Axis(0), 0).row(last).to_vec())
            }
            2 => {
                let logits = view
                    .to_owned()
                    .into_dimensionality::<ndarray::Ix2>()
                    .map_err(|e| RagError::Generation(format!("Unexpected logits shape: {e}")))?;
                Ok(logits.row(0).to_vec())
            }
            rank => Err(RagError::Generation(format!(
                "Unexpected logits rank {rank} from completion model"
            ))),
        }
    }
}

impl CompletionBackend for OnnxCompletionModel {
    fn tokenize(&self, text: &str) -> Result<Vec<TokenId>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| RagError::Tokenization(format!("Failed to tokenize prompt: {e}")))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn begin(&mut self, prompt: &[TokenId]) -> Result<()> {
        if prompt.is_empty() {
            return Err(RagError::Tokenization(
                "Prompt tokenized to zero tokens".to_string(),
            ));
        }
        self.tokens = prompt.to_vec();
        self.generated.clear();
        self.emitted.clear();
        Ok(())
    }

    fn next_token(&mut self) -> Result<Option<TokenId>> {
        if self.generated.len() >= self.max_new_tokens {
            debug!("Token cap of {} reached", self.max_new_tokens);
            return Ok(None);
        }

        let logits = self.run_logits()?;
        if logits.is_empty() {
            return Err(RagError::Generation(
                "Completion model produced empty logits".to_string(),
            ));
        }

        let token = argmax(&logits) as TokenId;
        if self.eos_ids.contains(&token) {
            return Ok(None);
        }

        self.tokens.push(token);
        self.generated.push(token);
        Ok(Some(token))
    }

    fn piece(&mut self, _token: TokenId) -> Result<String> {
        let full = self
            .tokenizer
            .decode(&self.generated, true)
            .map_err(|e| RagError::Generation(format!("Failed to decode output: {e}")))?;

        let delta = decode_delta(&self.emitted, &full);
        self.emitted = full;
        Ok(delta)
    }
}

impl Drop for OnnxCompletionModel {
    fn drop(&mut self) {
        debug!("Released completion model resources");
    }
}
