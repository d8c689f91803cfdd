// Embeddings module
// Chunking, the embedding context, and the process-wide embedding service

pub mod chunking;
pub mod context;
pub mod service;

pub use chunking::{Chunk, ChunkGenerator, ChunkingConfig, DEFAULT_TARGET_WORDS};
pub use context::{BATCH_TOKEN_BUDGET, EmbeddingContext, MAX_BATCH_SEQUENCES, QUERY_PREFIX};
pub use service::{DEFAULT_EMBEDDING_DIMENSION, EmbeddingService};
