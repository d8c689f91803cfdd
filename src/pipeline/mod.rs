// Pipeline module
// Import and question answering flows composed from the engine parts

pub mod extractor;


use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::completion::{CompletionEngine, CompletionEvent};
use crate::config::Config;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{Document, MessageRole, NewConversationMessage, NewDocument};
use crate::database::vector_store::VectorStore;
use crate::embeddings::chunking::ChunkGenerator;
use crate::embeddings::service::EmbeddingService;
use crate::prompt::build_prompt;

pub use extractor::{ContentExtractor, TextFileExtractor};

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// End-to-end document question answering pipeline.
///
/// Owns the metadata database, the vector store, and the model front
/// ends; the import and answer flows run entirely through it.
pub struct RagPipeline {
    config: Config,
    database: Database,
    vector_store: VectorStore,
    embedding: Arc<EmbeddingService>,
    completion: Arc<CompletionEngine>,
    extractor: Box<dyn ContentExtractor>,
    chunker: ChunkGenerator,
}

/// A running answer generation bound to its conversation record.
pub struct AnswerSession {
    pub conversation_id: Uuid,
    pub events: ReceiverStream<CompletionEvent>,
}

impl RagPipeline {
    /// Create a pipeline wired to the locations in `config`.
    #[inline]
    pub async fn new(config: Config) -> Result<Self> {
        let database = Database::initialize_from_config_dir(config.get_base_dir())
            .await
            .context("Failed to initialize SQLite database")?;

        let vector_store = VectorStore::new(config.vector_database_path()?)
            .context("Failed to initialize vector store")?;

        let embedding = EmbeddingService::shared();
        embedding.set_expected_dimension(config.models.embedding_dimension);

        let chunker = ChunkGenerator::new(config.chunking);

        Ok(Self {
            config,
            database,
            vector_store,
            embedding,
            completion: CompletionEngine::shared(),
            extractor: Box::new(TextFileExtractor),
            chunker,
        })
    }

    /// Replace the embedding service.
    #[inline]
    #[must_use]
    pub fn with_embedding_service(mut self, embedding: Arc<EmbeddingService>) -> Self {
        self.embedding = embedding;
        self
    }

    /// Replace the completion engine.
    #[inline]
    #[must_use]
    pub fn with_completion_engine(mut self, completion: Arc<CompletionEngine>) -> Self {
        self.completion = completion;
        self
    }

    /// Replace the content extractor.
    #[inline]
    #[must_use]
    pub fn with_extractor(mut self, extractor: Box<dyn ContentExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Import a document file end to end.
    ///
    /// Extracts the text (an unreadable file reads as empty), chunks it,
    /// embeds the chunks in one batch, persists the vectors, and records
    /// the document. Returns the stored record, whose `chunk_count`
    /// reflects what was actually indexed.
    pub async fn import_document(
        &self,
        path: &Path,
        display_name: Option<String>,
    ) -> Result<Document> {
        let text = self
            .extractor
            .extract(path)
            .await
            .context("Failed to extract document content")?
            .unwrap_or_default();

        let document_id = Uuid::new_v4();
        let chunks = self.chunker.generate(document_id, &text);
        let chunk_count = chunks.len() as i64;

        let embedding_model = self.config.embedding_model_path()?;
        let vectors = self.embedding.embed_chunks(&chunks, &embedding_model).await;
        let pairs: Vec<_> = chunks.into_iter().zip(vectors).collect();
        self.vector_store
            .add_many(pairs)
            .await
            .context("Failed to store document vectors")?;

        let file_name = display_name.unwrap_or_else(|| {
            path.file_name().map_or_else(
                || path.display().to_string(),
                |name| name.to_string_lossy().into_owned(),
            )
        });

        let document = self
            .database
            .create_document(NewDocument {
                id: document_id,
                file_name,
                source_path: path.display().to_string(),
                chunk_count,
            })
            .await
            .context("Failed to record imported document")?;

        info!(
            "Imported {} as document {} ({} chunks)",
            document.file_name, document.id, document.chunk_count
        );

        Ok(document)
    }

    /// Answer a question against one document's indexed content.
    ///
    /// Records the question, retrieves the closest chunks, and starts a
    /// cancellable completion stream over the grounded prompt. The
    /// assistant's reply is recorded when the stream finishes, including
    /// the partial text kept after a cancellation.
    pub async fn answer_query(
        &self,
        document_id: Uuid,
        question: &str,
        top_k: usize,
        cancellation: CancellationToken,
    ) -> Result<AnswerSession> {
        let document = self
            .database
            .get_document(document_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Document {document_id} not found"))?;

        let conversation = self.database.create_conversation(document.id).await?;
        self.database
            .add_conversation_message(NewConversationMessage {
                conversation_id: conversation.id,
                role: MessageRole::User,
                content: question.to_string(),
            })
            .await?;

        let embedding_model = self.config.embedding_model_path()?;
        let query_vector = self
            .embedding
            .embed_text(question, &embedding_model)
            .await
            .context("Failed to embed question")?;

        let ranked = self
            .vector_store
            .search(document.id, &[query_vector], top_k)
            .await?;
        let context_chunks: Vec<&str> = ranked
            .iter()
            .map(|stored| stored.content.as_str())
            .collect();
        let prompt = build_prompt(question, &context_chunks);

        info!(
            "Answering question for document {} with {} context chunks",
            document.id,
            context_chunks.len()
        );

        let completion_model = self.config.completion_model_path()?;
        let upstream = self.completion.generate(
            prompt,
            &completion_model,
            self.config.models.max_output_tokens,
            cancellation,
        );

        let events = self.record_and_relay(conversation.id, upstream);

        Ok(AnswerSession {
            conversation_id: conversation.id,
            events,
        })
    }

    /// Remove a document's metadata, conversations, and vectors.
    ///
    /// Returns whether the metadata row existed. Vector cleanup runs
    /// either way; it is idempotent.
    pub async fn delete_document(&self, document_id: Uuid) -> Result<bool> {
        let deleted = self.database.delete_document(document_id).await?;
        self.vector_store
            .delete(document_id)
            .await
            .context("Failed to delete document vectors")?;

        if deleted {
            info!("Deleted document {document_id}");
        }
        Ok(deleted)
    }

    /// Forward completion events, recording the finished answer on the
    /// conversation as it passes through.
    fn record_and_relay(
        &self,
        conversation_id: Uuid,
        upstream: ReceiverStream<CompletionEvent>,
    ) -> ReceiverStream<CompletionEvent> {
        let (sender, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let database = self.database.clone();

        tokio::spawn(async move {
            let mut upstream = upstream.into_inner();
            while let Some(event) = upstream.recv().await {
                if let CompletionEvent::Finished(answer) = &event {
                    let message = NewConversationMessage {
                        conversation_id,
                        role: MessageRole::Assistant,
                        content: answer.clone(),
                    };
                    if let Err(e) = database.add_conversation_message(message).await {
                        error!("Failed to record assistant message: {e}");
                    }
                }
                if sender.send(event).await.is_err() {
                    debug!("Answer stream receiver dropped");
                    break;
                }
            }
        });

        ReceiverStream::new(receiver)
    }
}
