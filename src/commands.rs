use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::completion::CompletionEvent;
use crate::config::{Config, get_config_dir};
use crate::database::sqlite::Database;
use crate::database::sqlite::models::Document;
use crate::database::vector_store::VectorStore;
use crate::pipeline::RagPipeline;

/// Import a document file into the library
#[inline]
pub async fn import_document(file: PathBuf, name: Option<String>) -> Result<()> {
    info!("Importing document: {}", file.display());

    if !file.exists() {
        return Err(anyhow::anyhow!("File not found: {}", file.display()));
    }

    let config_dir = get_config_dir()?;
    let config = Config::load(&config_dir).context("Failed to load configuration")?;
    let pipeline = RagPipeline::new(config).await?;

    let bar = if console::user_attended_stderr() {
        ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} Importing {msg}")
                .expect("style template is valid"),
        )
    } else {
        ProgressBar::hidden()
    };
    bar.set_message(file.display().to_string());
    bar.enable_steady_tick(Duration::from_millis(100));

    let imported = pipeline.import_document(&file, name).await;
    bar.finish_and_clear();
    let document = imported?;

    println!(
        "Imported document: {} (ID: {})",
        document.file_name, document.id
    );
    println!("  Source: {}", document.source_path);
    println!("  Chunks indexed: {}", document.chunk_count);

    if document.chunk_count == 0 {
        println!("  ⚠️  No readable text found; answers cannot be grounded in this document.");
    }

    println!();
    println!(
        "Use 'doc-rag ask {} \"<question>\"' to query it.",
        document.id
    );

    Ok(())
}

/// Ask a question about an imported document, streaming the answer
#[inline]
pub async fn ask_question(
    document: String,
    question: String,
    top_k: Option<usize>,
) -> Result<()> {
    let config_dir = get_config_dir()?;
    let config = Config::load(&config_dir).context("Failed to load configuration")?;
    let pipeline = RagPipeline::new(config).await?;

    let target = resolve_document(pipeline.database(), &document).await?;
    let top_k = top_k.unwrap_or(pipeline.config().retrieval.top_k);

    info!(
        "Asking document {} with top_k {}: {}",
        target.id, top_k, question
    );

    println!("📚 {} (ID: {})", target.file_name, target.id);
    println!();

    let cancellation = CancellationToken::new();
    let session = pipeline
        .answer_query(target.id, &question, top_k, cancellation.clone())
        .await?;
    let conversation_id = session.conversation_id;
    let mut events = session.events;
    let mut failed = false;

    loop {
        tokio::select! {
            event = events.next() => {
                match event {
                    Some(CompletionEvent::Waiting) => {
                        println!("⏳ Generating answer (Ctrl+C to stop)...");
                        println!();
                    }
                    Some(CompletionEvent::Progressing(fragment)) => {
                        print!("{}", fragment);
                        std::io::stdout().flush().ok();
                    }
                    Some(CompletionEvent::Finished(_)) => {
                        println!();
                        break;
                    }
                    Some(CompletionEvent::Failed(message)) => {
                        error!("Completion failed: {}", message);
                        println!("❌ Completion failed: {}", message);
                        failed = true;
                        break;
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("📴 Received interrupt signal, stopping generation...");
                cancellation.cancel();
            }
        }
    }

    if !failed {
        println!();
        println!("💬 Saved to conversation {}", conversation_id);
        println!("   Use 'doc-rag history {}' to revisit it.", target.id);
    }

    Ok(())
}

/// List all imported documents with comprehensive information
#[inline]
pub async fn list_documents() -> Result<()> {
    let config_dir = get_config_dir()?;
    let database = Database::initialize_from_config_dir(&config_dir)
        .await
        .context("Failed to initialize database")?;

    let documents = database
        .list_documents()
        .await
        .context("Failed to list documents")?;

    if documents.is_empty() {
        println!("No documents have been imported yet.");
        println!("Use 'doc-rag import <file>' to index a document.");
        return Ok(());
    }

    println!("Imported Documents ({} total):", documents.len());
    println!();

    for document in &documents {
        println!("📚 {} (ID: {})", document.file_name, document.id);
        println!("   Source: {}", document.source_path);
        println!("   Chunks: {}", document.chunk_count);

        match database.list_conversations(document.id).await {
            Ok(conversations) if !conversations.is_empty() => {
                println!("   Conversations: {}", conversations.len());
            }
            Ok(_) => {}
            Err(e) => println!("   Conversations: Error - {}", e),
        }

        println!(
            "   Imported: {}",
            document.created_date.format("%Y-%m-%d %H:%M:%S")
        );
        println!();
    }

    let stats = database
        .library_statistics()
        .await
        .context("Failed to load library statistics")?;

    println!("Summary:");
    println!("  Total Documents: {}", stats.total_documents);
    println!("  Total Chunks: {}", stats.total_chunks);
    println!("  Total Conversations: {}", stats.total_conversations);

    Ok(())
}

/// Show recorded conversations for a document
#[inline]
pub async fn show_history(document: String) -> Result<()> {
    let config_dir = get_config_dir()?;
    let database = Database::initialize_from_config_dir(&config_dir)
        .await
        .context("Failed to initialize database")?;

    let target = resolve_document(&database, &document).await?;

    let conversations = database
        .list_conversations(target.id)
        .await
        .context("Failed to list conversations")?;

    if conversations.is_empty() {
        println!("No conversations recorded for {} yet.", target.file_name);
        println!(
            "Use 'doc-rag ask {} \"<question>\"' to start one.",
            target.id
        );
        return Ok(());
    }

    println!(
        "💬 Conversations for {} ({} total):",
        target.file_name,
        conversations.len()
    );
    println!();

    for conversation in &conversations {
        println!(
            "Conversation {} ({})",
            conversation.id,
            conversation.created_date.format("%Y-%m-%d %H:%M:%S")
        );

        let messages = database.conversation_messages(conversation.id).await?;
        for message in &messages {
            println!("  [{}] {}", message.role, message.content);
        }

        println!();
    }

    Ok(())
}

/// Delete a document and its indexed content
#[inline]
pub async fn delete_document(document: String) -> Result<()> {
    let config_dir = get_config_dir()?;
    let config = Config::load(&config_dir).context("Failed to load configuration")?;
    let pipeline = RagPipeline::new(config).await?;

    let target = resolve_document(pipeline.database(), &document).await?;

    println!(
        "Found document: {} ({})",
        target.file_name, target.source_path
    );

    let deleted = pipeline
        .delete_document(target.id)
        .await
        .context("Failed to delete document")?;

    if deleted {
        println!("Document deleted: {} (ID: {})", target.file_name, target.id);
        println!("✓ Document metadata deleted");
        println!("✓ Conversation history deleted");
        println!("✓ Vector embeddings deleted");
    } else {
        println!("Document was already removed.");
    }

    Ok(())
}

/// Show detailed status of the question answering engine
#[inline]
pub async fn show_status() -> Result<()> {
    let config_dir = get_config_dir()?;
    let config = Config::load(&config_dir).unwrap_or_else(|_| Config {
        base_dir: config_dir,
        ..Config::default()
    });

    println!("📊 Doc RAG Status Report");
    println!("{}", "=".repeat(50));
    println!();

    // Configuration
    println!("⚙️  Configuration:");
    match config.config_file_path() {
        Ok(path) if path.exists() => {
            println!("   ✅ Config file: {}", path.display());
        }
        Ok(path) => {
            println!("   ⚠️  No config file at {} (using defaults)", path.display());
        }
        Err(e) => {
            println!("   ❌ Config directory unavailable - {}", e);
        }
    }
    println!(
        "   🔢 Embedding dimension: {}",
        config.models.embedding_dimension
    );
    println!("   📏 Chunk target words: {}", config.chunking.target_words);
    println!("   🎯 Retrieval top-k: {}", config.retrieval.top_k);

    // Database connectivity
    println!();
    println!("🗄️  Database Status:");
    let database = match Database::initialize_from_config_dir(config.get_base_dir()).await {
        Ok(db) => {
            println!("   ✅ SQLite: Connected");
            Some(db)
        }
        Err(e) => {
            println!("   ❌ SQLite: Failed to connect - {}", e);
            None
        }
    };

    // Vector store
    println!();
    println!("🔍 Vector Store Status:");
    match config.vector_database_path() {
        Ok(directory) => match VectorStore::new(directory.clone()) {
            Ok(_store) => {
                println!("   ✅ Vector directory: {}", directory.display());
            }
            Err(e) => {
                println!("   ❌ Vector directory: {}", e);
            }
        },
        Err(e) => {
            println!("   ❌ Vector directory unavailable - {}", e);
        }
    }

    // Model files
    println!();
    println!("🧠 Model Status:");
    let embedding_model = config.embedding_model_path()?;
    if embedding_model.exists() {
        println!("   ✅ Embedding model: {}", embedding_model.display());
    } else {
        println!(
            "   ❌ Embedding model missing: {}",
            embedding_model.display()
        );
    }

    let completion_model = config.completion_model_path()?;
    if completion_model.exists() {
        println!("   ✅ Completion model: {}", completion_model.display());
    } else {
        println!(
            "   ❌ Completion model missing: {}",
            completion_model.display()
        );
    }

    // Library overview
    if let Some(database) = database {
        println!();
        println!("📚 Library Overview:");
        match database.library_statistics().await {
            Ok(stats) => {
                if stats.total_documents == 0 {
                    println!("   📭 No documents imported yet");
                } else {
                    println!("   📊 Total Documents: {}", stats.total_documents);
                    println!("   📄 Total Chunks: {}", stats.total_chunks);
                    println!("   💬 Total Conversations: {}", stats.total_conversations);
                }
            }
            Err(e) => {
                println!("   ❌ Failed to load library statistics: {}", e);
            }
        }
    }

    println!();
    println!("💡 Next Steps:");
    println!("   • Use 'doc-rag config' to set model paths and options");
    println!("   • Use 'doc-rag import <file>' to index a document");
    println!("   • Use 'doc-rag ask <document> \"<question>\"' to query your library");

    Ok(())
}

async fn resolve_document(database: &Database, identifier: &str) -> Result<Document> {
    // Try to find the document by id first, then by file name
    let document = if let Ok(id) = Uuid::parse_str(identifier) {
        database.get_document(id).await?
    } else if let Some(document) = database.get_document_by_file_name(identifier).await? {
        Some(document)
    } else {
        // Fall back to a substring match (first hit wins)
        let documents = database.list_documents().await?;
        documents.into_iter().find(|document| {
            document
                .file_name
                .to_lowercase()
                .contains(&identifier.to_lowercase())
        })
    };

    document.ok_or_else(|| anyhow::anyhow!("Document not found: {}", identifier))
}
