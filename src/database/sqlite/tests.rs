use super::*;
use anyhow::Result;
use chrono::Utc;
use std::collections::HashSet;
use tempfile::TempDir;

use crate::database::sqlite::models::MessageRole;
use crate::database::sqlite::queries::{ConversationQueries, DocumentQueries};

async fn create_test_database() -> Result<(TempDir, Database)> {
    let temp_dir = TempDir::new()?;
    let database = Database::initialize_from_config_dir(temp_dir.path()).await?;
    Ok((temp_dir, database))
}

fn new_document(file_name: &str, chunk_count: i64) -> NewDocument {
    NewDocument {
        id: Uuid::new_v4(),
        file_name: file_name.to_string(),
        source_path: format!("/tmp/{file_name}"),
        chunk_count,
    }
}

#[tokio::test]
async fn integration_schema_migration() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx_%'",
    )
    .fetch_all(database.pool())
    .await?;

    let expected_tables: HashSet<&'static str> =
        ["documents", "conversations", "conversation_messages"]
            .into_iter()
            .collect();

    let actual_tables: HashSet<&str> = tables.iter().map(|t| t.as_str()).collect();
    assert_eq!(actual_tables, expected_tables);

    Ok(())
}

#[tokio::test]
async fn integration_foreign_key_constraints() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let document = database.create_document(new_document("cascade.txt", 2)).await?;
    let conversation = database.create_conversation(document.id).await?;
    database
        .add_conversation_message(NewConversationMessage {
            conversation_id: conversation.id,
            role: MessageRole::User,
            content: "Question?".to_string(),
        })
        .await?;

    let deleted = database.delete_document(document.id).await?;
    assert!(deleted);

    let conversation_after_delete =
        ConversationQueries::get_by_id(database.pool(), conversation.id).await?;
    assert!(conversation_after_delete.is_none());

    let messages_after_delete = database.conversation_messages(conversation.id).await?;
    assert!(messages_after_delete.is_empty());

    Ok(())
}

#[tokio::test]
async fn integration_question_answer_workflow() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let document = database.create_document(new_document("paris.txt", 0)).await?;
    assert_eq!(document.chunk_count, 0);

    let indexed = database
        .update_document_chunk_count(document.id, 4)
        .await?
        .expect("should update document chunk count successfully");
    assert_eq!(indexed.chunk_count, 4);

    let conversation = database.create_conversation(document.id).await?;
    assert_eq!(conversation.document_id, document.id);

    database
        .add_conversation_message(NewConversationMessage {
            conversation_id: conversation.id,
            role: MessageRole::User,
            content: "What is the capital of France?".to_string(),
        })
        .await?;
    database
        .add_conversation_message(NewConversationMessage {
            conversation_id: conversation.id,
            role: MessageRole::Assistant,
            content: "The capital of France is Paris.".to_string(),
        })
        .await?;

    let messages = database.conversation_messages(conversation.id).await?;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(messages[1].content, "The capital of France is Paris.");

    let follow_up = database
        .add_conversation_message(NewConversationMessage {
            conversation_id: conversation.id,
            role: MessageRole::User,
            content: "How many people live there?".to_string(),
        })
        .await?;
    assert!(follow_up.is_user());

    let conversations = database.list_conversations(document.id).await?;
    assert_eq!(conversations.len(), 1);

    let statistics = database.library_statistics().await?;
    assert_eq!(statistics.total_documents, 1);
    assert_eq!(statistics.total_chunks, 4);
    assert_eq!(statistics.total_conversations, 1);

    Ok(())
}

#[tokio::test]
async fn integration_error_handling() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let missing_document = database.get_document(Uuid::new_v4()).await?;
    assert!(missing_document.is_none());

    let missing_by_name = database.get_document_by_file_name("nonexistent.txt").await?;
    assert!(missing_by_name.is_none());

    let deleted = database.delete_document(Uuid::new_v4()).await?;
    assert!(!deleted);

    Ok(())
}

#[tokio::test]
async fn integration_transaction_rollback() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let document_id = Uuid::new_v4();
    let mut transaction = database.begin_transaction().await?;

    sqlx::query(
        "INSERT INTO documents (id, file_name, source_path, chunk_count, created_date) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(document_id)
    .bind("rollback.txt")
    .bind("/tmp/rollback.txt")
    .bind(1_i64)
    .bind(Utc::now().naive_utc())
    .execute(&mut *transaction)
    .await?;

    transaction.rollback().await?;

    let document_after_rollback = database.get_document(document_id).await?;
    assert!(document_after_rollback.is_none());

    Ok(())
}

#[tokio::test]
async fn integration_concurrent_access() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let mut handles = Vec::new();

    for i in 0..10 {
        let pool = database.pool().clone();

        let handle = tokio::spawn(async move {
            DocumentQueries::create(&pool, new_document(&format!("doc{i}.txt"), i)).await
        });

        handles.push(handle);
    }

    let mut successful_inserts = 0;
    for handle in handles {
        if handle
            .await
            .expect("handle should join successfully")
            .is_ok()
        {
            successful_inserts += 1;
        }
    }

    assert_eq!(successful_inserts, 10);

    let statistics = database.library_statistics().await?;
    assert_eq!(statistics.total_documents, 10);

    Ok(())
}
