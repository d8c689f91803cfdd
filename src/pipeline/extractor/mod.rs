
use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::Result;

/// Pulls plain text out of a document file.
///
/// `Ok(None)` means the file holds nothing the extractor can read, such
/// as a missing file or a non-text payload; the import flow turns that
/// into a document with zero chunks.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<Option<String>>;
}

/// Extractor for UTF-8 text files (plain text, markdown, source code).
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFileExtractor;

#[async_trait]
impl ContentExtractor for TextFileExtractor {
    async fn extract(&self, path: &Path) -> Result<Option<String>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No file to extract at {}", path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match String::from_utf8(bytes) {
            Ok(text) => Ok(Some(text)),
            Err(_) => {
                debug!("Skipping non-UTF-8 content at {}", path.display());
                Ok(None)
            }
        }
    }
}
