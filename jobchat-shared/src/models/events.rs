use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{
    Conversation, ConversationId, Message, NotificationEvent, SendMessageRequest, UserId,
};

/// Payload of `readConversation` and `unreadReset`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
}

/// Payload of `conversation:create`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub participants: Vec<UserId>,
}

/// Payload of `notification:read:all`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MarkAllReadRequest {
    pub user_id: UserId,
}

/// Server to client events delivered over the push channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "payload")]
pub enum PushEvent {
    #[serde(rename = "newMessage")]
    NewMessage(Message),
    #[serde(rename = "conversation:new")]
    ConversationNew(Conversation),
    #[serde(rename = "unreadReset")]
    UnreadReset(ReadReceipt),
    #[serde(rename = "newNotification")]
    NewNotification(NotificationEvent),
}

impl PushEvent {
    /// Decodes an event from its name and JSON payload as framed by the
    /// transport.
    ///
    /// # Errors
    /// Returns an error when the name is unknown or the payload does not
    /// match the event's shape.
    pub fn from_frame(event: &str, payload: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(json!({ "event": event, "payload": payload }))
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "newMessage",
            Self::ConversationNew(_) => "conversation:new",
            Self::UnreadReset(_) => "unreadReset",
            Self::NewNotification(_) => "newNotification",
        }
    }
}

/// Client to server actions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "payload")]
pub enum ClientEvent {
    #[serde(rename = "joinUser")]
    JoinUser(UserId),
    #[serde(rename = "joinRoom")]
    JoinRoom(ConversationId),
    #[serde(rename = "leaveRoom")]
    LeaveRoom(ConversationId),
    #[serde(rename = "joinNotificationRoom")]
    JoinNotificationRoom(UserId),
    #[serde(rename = "leaveNotificationRoom")]
    LeaveNotificationRoom(UserId),
    #[serde(rename = "sendMessage")]
    SendMessage(SendMessageRequest),
    #[serde(rename = "conversation:create")]
    ConversationCreate(CreateConversationRequest),
    #[serde(rename = "readConversation")]
    ReadConversation(ReadReceipt),
    #[serde(rename = "notification:read:all")]
    NotificationReadAll(MarkAllReadRequest),
}

impl ClientEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::JoinUser(_) => "joinUser",
            Self::JoinRoom(_) => "joinRoom",
            Self::LeaveRoom(_) => "leaveRoom",
            Self::JoinNotificationRoom(_) => "joinNotificationRoom",
            Self::LeaveNotificationRoom(_) => "leaveNotificationRoom",
            Self::SendMessage(_) => "sendMessage",
            Self::ConversationCreate(_) => "conversation:create",
            Self::ReadConversation(_) => "readConversation",
            Self::NotificationReadAll(_) => "notification:read:all",
        }
    }
}

/// Named broadcast group on the push transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Channel {
    /// Per-user channel carrying badge counts and conversation events. Lives
    /// for the whole authenticated session.
    User(UserId),
    Conversation(ConversationId),
    Notifications(UserId),
}

impl Channel {
    #[must_use]
    pub const fn join_event(&self) -> ClientEvent {
        match *self {
            Self::User(id) => ClientEvent::JoinUser(id),
            Self::Conversation(id) => ClientEvent::JoinRoom(id),
            Self::Notifications(id) => ClientEvent::JoinNotificationRoom(id),
        }
    }

    /// The user channel has no leave action; it is released by disconnecting.
    #[must_use]
    pub const fn leave_event(&self) -> Option<ClientEvent> {
        match *self {
            Self::User(_) => None,
            Self::Conversation(id) => Some(ClientEvent::LeaveRoom(id)),
            Self::Notifications(id) => Some(ClientEvent::LeaveNotificationRoom(id)),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Conversation(id) => write!(f, "conversation:{id}"),
            Self::Notifications(id) => write!(f, "user-notifications:{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Timestamp;
    use uuid::Uuid;

    #[test]
    fn decodes_new_message_frame() {
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            content: "hi".into(),
            created_at: Timestamp::from_millis(5),
        };
        let payload = serde_json::to_value(&message).unwrap();

        let event = PushEvent::from_frame("newMessage", payload).unwrap();
        assert_eq!(event, PushEvent::NewMessage(message));
        assert_eq!(event.name(), "newMessage");
    }

    #[test]
    fn rejects_unknown_event_name() {
        let result = PushEvent::from_frame("typing", json!({}));
        assert!(result.is_err());
    }

    #[test]
    fn client_event_envelope_carries_name_and_payload() {
        let receipt = ReadReceipt {
            conversation_id: Uuid::nil(),
            user_id: Uuid::nil(),
        };
        let event = ClientEvent::ReadConversation(receipt);

        let envelope = serde_json::to_value(&event).unwrap();
        assert_eq!(envelope["event"], event.name());
        assert!(envelope["payload"].get("conversationId").is_some());
    }

    #[test]
    fn subscription_payload_is_bare_identifier() {
        let id = Uuid::new_v4();
        let envelope = serde_json::to_value(ClientEvent::JoinRoom(id)).unwrap();
        assert_eq!(envelope["payload"], json!(id.to_string()));
    }

    #[test]
    fn channel_names_and_subscription_events() {
        let id = Uuid::nil();
        assert_eq!(Channel::User(id).to_string(), format!("user:{id}"));
        assert_eq!(
            Channel::Notifications(id).to_string(),
            format!("user-notifications:{id}")
        );
        assert_eq!(Channel::Conversation(id).join_event(), ClientEvent::JoinRoom(id));
        assert_eq!(Channel::User(id).leave_event(), None);
        assert_eq!(
            Channel::Notifications(id).leave_event(),
            Some(ClientEvent::LeaveNotificationRoom(id))
        );
    }
}
