use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

use crate::database::sqlite::models::{
    Conversation, ConversationMessage, Document, LibraryStatistics, NewConversationMessage,
    NewDocument,
};
use crate::database::sqlite::queries::{ConversationQueries, DocumentQueries};

#[cfg(test)]
mod tests;

pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    pub async fn new<P: AsRef<Path>>(database_url: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_url)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn begin_transaction(&self) -> Result<sqlx::Transaction<'_, Sqlite>> {
        self.pool
            .begin()
            .await
            .context("Failed to begin transaction")
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        let db_path = config_dir.join("metadata.db");
        let db_url = db_path.to_string_lossy();

        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(db_url.as_ref()).await
    }

    // Document operations
    pub async fn create_document(&self, new_document: NewDocument) -> Result<Document> {
        DocumentQueries::create(&self.pool, new_document).await
    }

    pub async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        DocumentQueries::get_by_id(&self.pool, id).await
    }

    pub async fn get_document_by_file_name(&self, file_name: &str) -> Result<Option<Document>> {
        DocumentQueries::get_by_file_name(&self.pool, file_name).await
    }

    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        DocumentQueries::list_all(&self.pool).await
    }

    pub async fn update_document_chunk_count(
        &self,
        id: Uuid,
        chunk_count: i64,
    ) -> Result<Option<Document>> {
        DocumentQueries::update_chunk_count(&self.pool, id, chunk_count).await
    }

    pub async fn delete_document(&self, id: Uuid) -> Result<bool> {
        DocumentQueries::delete(&self.pool, id).await
    }

    pub async fn library_statistics(&self) -> Result<LibraryStatistics> {
        DocumentQueries::statistics(&self.pool).await
    }

    // Conversation operations
    pub async fn create_conversation(&self, document_id: Uuid) -> Result<Conversation> {
        ConversationQueries::create(&self.pool, document_id).await
    }

    pub async fn list_conversations(&self, document_id: Uuid) -> Result<Vec<Conversation>> {
        ConversationQueries::list_for_document(&self.pool, document_id).await
    }

    pub async fn add_conversation_message(
        &self,
        new_message: NewConversationMessage,
    ) -> Result<ConversationMessage> {
        ConversationQueries::add_message(&self.pool, new_message).await
    }

    pub async fn conversation_messages(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<ConversationMessage>> {
        ConversationQueries::messages(&self.pool, conversation_id).await
    }

    /// Optimize database performance by running VACUUM and ANALYZE
    pub async fn optimize(&self) -> Result<()> {
        info!("Optimizing database performance");

        // Run VACUUM to reclaim space and defragment
        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .context("Failed to vacuum database")?;

        // Run ANALYZE to update table statistics for better query planning
        sqlx::query("ANALYZE")
            .execute(&self.pool)
            .await
            .context("Failed to analyze database")?;

        debug!("Database optimization completed");
        Ok(())
    }
}
