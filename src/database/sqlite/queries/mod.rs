#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::models::*;

pub struct DocumentQueries;

impl DocumentQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_document: NewDocument) -> Result<Document> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            "INSERT INTO documents (id, file_name, source_path, chunk_count, created_date) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(new_document.id)
        .bind(&new_document.file_name)
        .bind(&new_document.source_path)
        .bind(new_document.chunk_count)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create document")?;

        Self::get_by_id(pool, new_document.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created document"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Document>> {
        let result = sqlx::query_as::<_, Document>(
            "SELECT id, file_name, source_path, chunk_count, created_date FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get document by id")?;

        Ok(result)
    }

    #[inline]
    pub async fn get_by_file_name(pool: &SqlitePool, file_name: &str) -> Result<Option<Document>> {
        let result = sqlx::query_as::<_, Document>(
            "SELECT id, file_name, source_path, chunk_count, created_date FROM documents WHERE file_name = ?",
        )
        .bind(file_name)
        .fetch_optional(pool)
        .await
        .context("Failed to get document by file name")?;

        Ok(result)
    }

    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Document>> {
        let documents = sqlx::query_as::<_, Document>(
            "SELECT id, file_name, source_path, chunk_count, created_date FROM documents ORDER BY created_date DESC, rowid DESC",
        )
        .fetch_all(pool)
        .await
        .context("Failed to list documents")?;

        Ok(documents)
    }

    #[inline]
    pub async fn update_chunk_count(
        pool: &SqlitePool,
        id: Uuid,
        chunk_count: i64,
    ) -> Result<Option<Document>> {
        sqlx::query("UPDATE documents SET chunk_count = ? WHERE id = ?")
            .bind(chunk_count)
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to update document chunk count")?;

        Self::get_by_id(pool, id).await
    }

    #[inline]
    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete document")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn statistics(pool: &SqlitePool) -> Result<LibraryStatistics> {
        let total_documents = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM documents")
            .fetch_one(pool)
            .await
            .context("Failed to count documents")?;

        let total_chunks =
            sqlx::query_scalar::<_, i64>("SELECT COALESCE(SUM(chunk_count), 0) FROM documents")
                .fetch_one(pool)
                .await
                .context("Failed to sum chunk counts")?;

        let total_conversations =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM conversations")
                .fetch_one(pool)
                .await
                .context("Failed to count conversations")?;

        Ok(LibraryStatistics {
            total_documents,
            total_chunks,
            total_conversations,
        })
    }
}

pub struct ConversationQueries;

impl ConversationQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, document_id: Uuid) -> Result<Conversation> {
        let id = Uuid::new_v4();
        let now = Utc::now().naive_utc();
        sqlx::query("INSERT INTO conversations (id, document_id, created_date) VALUES (?, ?, ?)")
            .bind(id)
            .bind(document_id)
            .bind(now)
            .execute(pool)
            .await
            .context("Failed to create conversation")?;

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created conversation"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Conversation>> {
        let result = sqlx::query_as::<_, Conversation>(
            "SELECT id, document_id, created_date FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get conversation by id")?;

        Ok(result)
    }

    #[inline]
    pub async fn list_for_document(
        pool: &SqlitePool,
        document_id: Uuid,
    ) -> Result<Vec<Conversation>> {
        let conversations = sqlx::query_as::<_, Conversation>(
            "SELECT id, document_id, created_date FROM conversations WHERE document_id = ? ORDER BY created_date ASC, rowid ASC",
        )
        .bind(document_id)
        .fetch_all(pool)
        .await
        .context("Failed to list conversations for document")?;

        Ok(conversations)
    }

    #[inline]
    pub async fn add_message(
        pool: &SqlitePool,
        new_message: NewConversationMessage,
    ) -> Result<ConversationMessage> {
        let id = Uuid::new_v4();
        let now = Utc::now().naive_utc();
        sqlx::query(
            "INSERT INTO conversation_messages (id, conversation_id, role, content, created_date) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(new_message.conversation_id)
        .bind(new_message.role)
        .bind(&new_message.content)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to add conversation message")?;

        let message = sqlx::query_as::<_, ConversationMessage>(
            "SELECT id, conversation_id, role, content, created_date FROM conversation_messages WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get conversation message by id")?;

        message.ok_or_else(|| anyhow::anyhow!("Failed to retrieve created message"))
    }

    #[inline]
    pub async fn messages(
        pool: &SqlitePool,
        conversation_id: Uuid,
    ) -> Result<Vec<ConversationMessage>> {
        let messages = sqlx::query_as::<_, ConversationMessage>(
            "SELECT id, conversation_id, role, content, created_date FROM conversation_messages WHERE conversation_id = ? ORDER BY created_date ASC, rowid ASC",
        )
        .bind(conversation_id)
        .fetch_all(pool)
        .await
        .context("Failed to list conversation messages")?;

        Ok(messages)
    }
}
