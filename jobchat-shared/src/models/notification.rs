use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ConversationId, NotificationId, Timestamp, UserId};

/// Kind-specific body of a notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationPayload {
    #[serde(rename_all = "camelCase")]
    Message {
        conversation_id: ConversationId,
        sender_id: UserId,
    },
    #[serde(rename_all = "camelCase")]
    JobApplication { job_id: Uuid, applicant_id: UserId },
    #[serde(rename_all = "camelCase")]
    ApplicationStatus { job_id: Uuid, status: String },
    System { text: String },
    #[serde(other)]
    Other,
}

impl NotificationPayload {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::JobApplication { .. } => "job_application",
            Self::ApplicationStatus { .. } => "application_status",
            Self::System { .. } => "system",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub id: NotificationId,
    pub recipient_id: UserId,
    pub payload: NotificationPayload,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind_falls_back_to_other() {
        let json = serde_json::json!({
            "id": Uuid::nil(),
            "recipientId": Uuid::nil(),
            "payload": { "kind": "interview_invite" },
            "createdAt": "2024-01-01T00:00:00Z"
        });

        let event: NotificationEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event.payload, NotificationPayload::Other);
        assert!(!event.is_read);
    }

    #[test]
    fn job_application_round_trips_kind_tag() {
        let payload = NotificationPayload::JobApplication {
            job_id: Uuid::nil(),
            applicant_id: Uuid::nil(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "job_application");
        assert!(json.get("applicantId").is_some());
        assert_eq!(payload.kind(), "job_application");
    }
}
