// Database module
// Dual persistence: SQLite for metadata, per-document JSON files for vectors

pub mod sqlite;
pub mod vector_store;

pub use sqlite::*;
pub use vector_store::{StoredVector, VectorStore};
