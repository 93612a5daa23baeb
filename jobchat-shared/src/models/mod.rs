pub mod conversation;
pub mod errors;
pub mod events;
pub mod message;
pub mod notification;
pub mod timestamp;

use uuid::Uuid;

pub use conversation::{Conversation, ConversationPatch, LastMessage};
pub use errors::ErrorResponse;
pub use events::{
    Channel, ClientEvent, CreateConversationRequest, MarkAllReadRequest, PushEvent, ReadReceipt,
};
pub use message::{Message, SendMessageRequest};
pub use notification::{NotificationEvent, NotificationPayload};
pub use timestamp::Timestamp;

/// Identifier of an authenticated user.
pub type UserId = Uuid;

/// Identifier of a conversation.
pub type ConversationId = Uuid;

/// Identifier of a message. Temporary client ids share this type but are
/// never treated as authoritative.
pub type MessageId = Uuid;

/// Identifier of a notification record.
pub type NotificationId = Uuid;
