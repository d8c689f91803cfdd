use chrono::Utc;
use uuid::Uuid;

use super::*;

#[test]
fn message_role_serialization() {
    assert_eq!(MessageRole::User.to_string(), "User");
    assert_eq!(MessageRole::Assistant.to_string(), "Assistant");
}

#[test]
fn message_role_helpers() {
    let message = ConversationMessage {
        id: Uuid::new_v4(),
        conversation_id: Uuid::new_v4(),
        role: MessageRole::User,
        content: "What is the capital of France?".to_string(),
        created_date: Utc::now().naive_utc(),
    };

    assert!(message.is_user());
    assert!(!message.is_assistant());

    let reply = ConversationMessage {
        role: MessageRole::Assistant,
        ..message
    };

    assert!(reply.is_assistant());
    assert!(!reply.is_user());
}
