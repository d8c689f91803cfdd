use clap::{Parser, Subcommand};
use doc_rag::Result;
use doc_rag::commands::{
    ask_question, delete_document, import_document, list_documents, show_history, show_status,
};
use doc_rag::config::{run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "doc-rag")]
#[command(about = "A local document indexing and question answering system")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure model paths, chunking, and retrieval settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Import a document file into the library
    Import {
        /// Path of the file to import
        file: PathBuf,
        /// Optional display name for the document
        #[arg(long)]
        name: Option<String>,
    },
    /// Ask a question about an imported document
    Ask {
        /// Document ID or file name to query
        document: String,
        /// Question to answer from the document's content
        question: String,
        /// Number of context chunks to retrieve (defaults to the configured value)
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// List all imported documents
    List,
    /// Show recorded conversations for a document
    History {
        /// Document ID or file name
        document: String,
    },
    /// Delete a document and its indexed content
    Delete {
        /// Document ID or file name to delete
        document: String,
    },
    /// Show detailed status of the question answering engine
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                run_interactive_config()?;
            }
        }
        Commands::Import { file, name } => {
            import_document(file, name).await?;
        }
        Commands::Ask {
            document,
            question,
            top_k,
        } => {
            ask_question(document, question, top_k).await?;
        }
        Commands::List => {
            list_documents().await?;
        }
        Commands::History { document } => {
            show_history(document).await?;
        }
        Commands::Delete { document } => {
            delete_document(document).await?;
        }
        Commands::Status => {
            show_status().await?;
        }
    }

    Ok(())
}
