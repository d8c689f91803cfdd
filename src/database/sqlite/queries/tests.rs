use super::*;
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;

async fn create_test_pool() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db_path = temp_dir.path().join("test.db");

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            sqlx::sqlite::SqliteConnectOptions::new()
                .filename(&db_path)
                .create_if_missing(true)
                .foreign_keys(true),
        )
        .await
        .expect("Failed to create test pool");

    sqlx::query(include_str!("../migrations/001_initial_schema.sql"))
        .execute(&pool)
        .await
        .expect("Failed to run migrations");

    (temp_dir, pool)
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
async fn document_crud_operations() {
    let (_temp_dir, pool) = create_test_pool().await;

    let new_doc = new_document("paris.txt", 4);
    let expected_id = new_doc.id;

    let created = DocumentQueries::create(&pool, new_doc)
        .await
        .expect("Failed to create document");

    assert_eq!(created.id, expected_id);
    assert_eq!(created.file_name, "paris.txt");
    assert_eq!(created.source_path, "/tmp/paris.txt");
    assert_eq!(created.chunk_count, 4);

    let retrieved = DocumentQueries::get_by_id(&pool, created.id)
        .await
        .expect("Failed to get document")
        .expect("Document should exist");

    assert_eq!(retrieved, created);

    let by_name = DocumentQueries::get_by_file_name(&pool, "paris.txt")
        .await
        .expect("Failed to get document by file name")
        .expect("Document should exist");

    assert_eq!(by_name.id, created.id);

    let updated = DocumentQueries::update_chunk_count(&pool, created.id, 9)
        .await
        .expect("Failed to update chunk count")
        .expect("Document should exist");

    assert_eq!(updated.chunk_count, 9);

    let deleted = DocumentQueries::delete(&pool, created.id)
        .await
        .expect("Failed to delete document");

    assert!(deleted);

    let not_found = DocumentQueries::get_by_id(&pool, created.id)
        .await
        .expect("Query should succeed");

    assert!(not_found.is_none());

    let deleted_again = DocumentQueries::delete(&pool, created.id)
        .await
        .expect("Delete should succeed");

    assert!(!deleted_again);
}

#[tokio::test]
async fn documents_list_newest_first() {
    let (_temp_dir, pool) = create_test_pool().await;

    let older = DocumentQueries::create(&pool, new_document("first.txt", 1))
        .await
        .expect("Failed to create document");
    let newer = DocumentQueries::create(&pool, new_document("second.txt", 1))
        .await
        .expect("Failed to create document");

    let documents = DocumentQueries::list_all(&pool)
        .await
        .expect("Failed to list documents");

    assert_eq!(documents.len(), 2);
    assert_eq!(documents[0].id, newer.id);
    assert_eq!(documents[1].id, older.id);
}

#[tokio::test]
async fn conversation_operations() {
    let (_temp_dir, pool) = create_test_pool().await;

    let document = DocumentQueries::create(&pool, new_document("guide.txt", 2))
        .await
        .expect("Failed to create document");

    let conversation = ConversationQueries::create(&pool, document.id)
        .await
        .expect("Failed to create conversation");

    assert_eq!(conversation.document_id, document.id);

    let retrieved = ConversationQueries::get_by_id(&pool, conversation.id)
        .await
        .expect("Failed to get conversation")
        .expect("Conversation should exist");

    assert_eq!(retrieved.id, conversation.id);

    let message = ConversationQueries::add_message(
        &pool,
        NewConversationMessage {
            conversation_id: conversation.id,
            role: MessageRole::User,
            content: "What is the capital of France?".to_string(),
        },
    )
    .await
    .expect("Failed to add message");

    assert_eq!(message.conversation_id, conversation.id);
    assert!(message.is_user());

    let messages = ConversationQueries::messages(&pool, conversation.id)
        .await
        .expect("Failed to list messages");

    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "What is the capital of France?");
}

#[tokio::test]
async fn conversation_requires_existing_document() {
    let (_temp_dir, pool) = create_test_pool().await;

    let result = ConversationQueries::create(&pool, Uuid::new_v4()).await;

    assert!(result.is_err());
}

#[tokio::test]
async fn messages_keep_exchange_order() {
    let (_temp_dir, pool) = create_test_pool().await;

    let document = DocumentQueries::create(&pool, new_document("faq.txt", 1))
        .await
        .expect("Failed to create document");
    let conversation = ConversationQueries::create(&pool, document.id)
        .await
        .expect("Failed to create conversation");

    let exchanges = [
        (MessageRole::User, "What is the capital of France?"),
        (MessageRole::Assistant, "The capital of France is Paris."),
        (MessageRole::User, "How many people live there?"),
        (
            MessageRole::Assistant,
            "Paris has a population of over two million.",
        ),
    ];

    for (role, content) in exchanges {
        ConversationQueries::add_message(
            &pool,
            NewConversationMessage {
                conversation_id: conversation.id,
                role,
                content: content.to_string(),
            },
        )
        .await
        .expect("Failed to add message");
    }

    let messages = ConversationQueries::messages(&pool, conversation.id)
        .await
        .expect("Failed to list messages");

    assert_eq!(messages.len(), 4);
    assert!(messages[0].is_user());
    assert!(messages[1].is_assistant());
    assert!(messages[2].is_user());
    assert!(messages[3].is_assistant());
    assert_eq!(messages[2].content, "How many people live there?");
}

#[tokio::test]
async fn conversations_scoped_to_document() {
    let (_temp_dir, pool) = create_test_pool().await;

    let first = DocumentQueries::create(&pool, new_document("first.txt", 1))
        .await
        .expect("Failed to create document");
    let second = DocumentQueries::create(&pool, new_document("second.txt", 1))
        .await
        .expect("Failed to create document");

    let on_first = ConversationQueries::create(&pool, first.id)
        .await
        .expect("Failed to create conversation");
    ConversationQueries::create(&pool, second.id)
        .await
        .expect("Failed to create conversation");

    let conversations = ConversationQueries::list_for_document(&pool, first.id)
        .await
        .expect("Failed to list conversations");

    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].id, on_first.id);
}

#[tokio::test]
async fn statistics_reflect_library_contents() {
    let (_temp_dir, pool) = create_test_pool().await;

    let empty = DocumentQueries::statistics(&pool)
        .await
        .expect("Failed to get statistics");

    assert_eq!(empty.total_documents, 0);
    assert_eq!(empty.total_chunks, 0);
    assert_eq!(empty.total_conversations, 0);

    let first = DocumentQueries::create(&pool, new_document("first.txt", 3))
        .await
        .expect("Failed to create document");
    DocumentQueries::create(&pool, new_document("second.txt", 5))
        .await
        .expect("Failed to create document");
    ConversationQueries::create(&pool, first.id)
        .await
        .expect("Failed to create conversation");

    let stats = DocumentQueries::statistics(&pool)
        .await
        .expect("Failed to get statistics");

    assert_eq!(stats.total_documents, 2);
    assert_eq!(stats.total_chunks, 8);
    assert_eq!(stats.total_conversations, 1);
}
