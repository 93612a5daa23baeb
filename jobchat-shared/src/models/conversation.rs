use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::{ConversationId, Message, MessageId, Timestamp, UserId};

/// Denormalized copy of the newest message of a conversation. It is a cache;
/// the message store stays the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub id: MessageId,
    pub content: String,
    pub sender_id: UserId,
    pub created_at: Timestamp,
}

impl From<&Message> for LastMessage {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            content: message.content.clone(),
            sender_id: message.sender_id,
            created_at: message.created_at,
        }
    }
}

/// Conversation summary as listed by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: BTreeSet<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub unread_counters: HashMap<UserId, u32>,
}

impl Conversation {
    /// Local stand-in for a conversation known only through a message event.
    /// Replaced field by field once the server summary arrives.
    #[must_use]
    pub fn placeholder(id: ConversationId, participants: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            id,
            participants: participants.into_iter().collect(),
            last_message: None,
            unread_counters: HashMap::new(),
        }
    }

    #[must_use]
    pub fn unread_for(&self, user_id: &UserId) -> u32 {
        self.unread_counters.get(user_id).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn last_activity(&self) -> Option<Timestamp> {
        self.last_message.as_ref().map(|message| message.created_at)
    }
}

/// Partial update merged into a directory entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationPatch {
    pub id: ConversationId,
    pub participants: Option<BTreeSet<UserId>>,
    pub last_message: Option<LastMessage>,
    pub unread_counters: Option<HashMap<UserId, u32>>,
}

impl ConversationPatch {
    #[must_use]
    pub fn new(id: ConversationId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_last_message(mut self, message: &Message) -> Self {
        self.last_message = Some(LastMessage::from(message));
        self
    }

    #[must_use]
    pub fn with_participants(mut self, participants: impl IntoIterator<Item = UserId>) -> Self {
        self.participants = Some(participants.into_iter().collect());
        self
    }
}

impl From<Conversation> for ConversationPatch {
    fn from(conversation: Conversation) -> Self {
        Self {
            id: conversation.id,
            participants: Some(conversation.participants),
            last_message: conversation.last_message,
            unread_counters: Some(conversation.unread_counters),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn deserializes_server_summary() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let id = Uuid::new_v4();
        let json = serde_json::json!({
            "id": id,
            "participants": [alice, bob],
            "unreadCounters": { alice.to_string(): 3 }
        });

        let conversation: Conversation = serde_json::from_value(json).unwrap();
        assert_eq!(conversation.participants.len(), 2);
        assert_eq!(conversation.unread_for(&alice), 3);
        assert_eq!(conversation.unread_for(&bob), 0);
        assert!(conversation.last_message.is_none());
    }

    #[test]
    fn patch_from_conversation_carries_every_field() {
        let alice = Uuid::new_v4();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            participants: [alice].into_iter().collect(),
            last_message: None,
            unread_counters: HashMap::from([(alice, 2)]),
        };

        let patch = ConversationPatch::from(conversation.clone());
        assert_eq!(patch.id, conversation.id);
        assert_eq!(patch.participants, Some(conversation.participants));
        assert_eq!(patch.unread_counters, Some(conversation.unread_counters));
    }
}
