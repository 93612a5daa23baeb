use serde::{Deserialize, Serialize};

use super::{ConversationId, MessageId, Timestamp, UserId};

/// A chat message as stored by the authoritative service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: Timestamp,
}

/// Payload of the `sendMessage` client action. The ack carries the stored
/// [`Message`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
}

impl From<&Message> for SendMessageRequest {
    fn from(message: &Message) -> Self {
        Self {
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn message_uses_camel_case_fields() {
        let message = Message {
            id: Uuid::nil(),
            conversation_id: Uuid::nil(),
            sender_id: Uuid::nil(),
            content: "hello".into(),
            created_at: Timestamp::from_millis(0),
        };

        let json = serde_json::to_value(&message).unwrap();
        assert!(json.get("conversationId").is_some());
        assert!(json.get("senderId").is_some());
        assert!(json.get("createdAt").is_some());
    }

    #[test]
    fn send_request_copies_message_fields() {
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            content: "draft".into(),
            created_at: Timestamp::now(),
        };

        let request = SendMessageRequest::from(&message);
        assert_eq!(request.conversation_id, message.conversation_id);
        assert_eq!(request.sender_id, message.sender_id);
        assert_eq!(request.content, "draft");
    }
}
