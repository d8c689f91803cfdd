
use serde::{Deserialize, Serialize};
use tracing::debug;
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

/// Default target word count per chunk.
///
/// A 512-token embedding window corresponds to roughly 350-400 English
/// words; 200 is a conservative target that keeps chunks well under it.
pub const DEFAULT_TARGET_WORDS: usize = 200;

/// A bounded span of document text prepared for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub content: String,
}

/// Configuration for document chunking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk size in whitespace-separated words
    pub target_words: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            target_words: DEFAULT_TARGET_WORDS,
        }
    }
}

/// Splits document text into sentence-aligned chunks.
///
/// Sentences are grouped until adding the next one would push the chunk
/// past the target word count, so no sentence is ever split across
/// chunks. A single sentence longer than the target becomes a chunk of
/// its own.
#[derive(Debug, Clone, Default)]
pub struct ChunkGenerator {
    config: ChunkingConfig,
}

impl ChunkGenerator {
    #[inline]
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// Split `text` into chunks for the given document.
    ///
    /// # Arguments
    /// * `document_id` - Document the chunks belong to
    /// * `text` - Raw document text
    ///
    /// # Returns
    /// * Chunks in document order; empty when `text` has no sentences
    #[inline]
    pub fn generate(&self, document_id: Uuid, text: &str) -> Vec<Chunk> {
        let target = self.config.target_words;
        let mut chunks = Vec::new();
        let mut current_sentences: Vec<&str> = Vec::new();
        let mut current_words = 0usize;

        for sentence in text.unicode_sentences() {
            let sentence = sentence.trim();
            if sentence.is_empty() {
                continue;
            }

            let sentence_words = sentence.split_whitespace().count();

            // Close the open chunk when this sentence would push it past
            // the target; the sentence then starts the next chunk.
            if current_words > 0 && current_words + sentence_words > target {
                chunks.push(Self::finish_chunk(document_id, &current_sentences));
                current_sentences.clear();
                current_words = 0;
            }

            current_sentences.push(sentence);
            current_words += sentence_words;
        }

        if !current_sentences.is_empty() {
            chunks.push(Self::finish_chunk(document_id, &current_sentences));
        }

        debug!(
            "Chunked document {} into {} chunks (target {} words)",
            document_id,
            chunks.len(),
            target
        );

        chunks
    }

    fn finish_chunk(document_id: Uuid, sentences: &[&str]) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            document_id,
            content: sentences.join(" "),
        }
    }
}
