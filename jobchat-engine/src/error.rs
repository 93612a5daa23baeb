//! # Sync Engine Error Types
//!
//! Transport, snapshot fetch and send failures. Duplicate push events are not
//! errors; they surface as [`crate::store::AppendOutcome::Duplicate`].

use std::time::Duration;

use shared::models::{ErrorResponse, MessageId};
use thiserror::Error;

/// Result type alias for push-channel operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Failures of the push channel. Recovered by reconnecting; never fatal.
#[derive(Error, Debug)]
pub enum TransportError {
    /// No connection has been opened for this session
    #[error("Push channel is not connected")]
    NotConnected,

    /// The connection was closed while an operation was pending
    #[error("Push channel closed: {reason}")]
    Closed { reason: String },

    /// The server did not acknowledge an action in time
    #[error("No acknowledgement for `{event}` within {timeout:?}")]
    AckTimeout {
        event: &'static str,
        timeout: Duration,
    },

    /// The server answered an action with an error
    #[error("Server rejected `{event}`: {response}")]
    Rejected {
        event: &'static str,
        response: ErrorResponse,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl TransportError {
    pub fn closed<T: Into<String>>(reason: T) -> Self {
        Self::Closed {
            reason: reason.into(),
        }
    }

    pub fn rejected(event: &'static str, response: ErrorResponse) -> Self {
        Self::Rejected { event, response }
    }
}

/// Failures of REST snapshot requests.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status with the server's error body
    #[error("Request failed with status {status}: {response}")]
    Status { status: u16, response: ErrorResponse },

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    /// Every retry attempt failed; carries the last failure
    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
}

impl FetchError {
    pub fn status(status: u16, body: &str) -> Self {
        Self::Status {
            status,
            response: ErrorResponse::from_body(body),
        }
    }

    /// Client errors will fail the same way on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Decode(_) | Self::Endpoint(_) | Self::Exhausted { .. } => false,
        }
    }
}

/// Failures of a user's own optimistic send. Always surfaced per message.
#[derive(Error, Debug)]
pub enum SendError {
    /// The send was not acknowledged; the message is kept as failed
    #[error("Message {temp_id} was not delivered: {source}")]
    Undelivered {
        temp_id: MessageId,
        #[source]
        source: TransportError,
    },

    /// Retry or discard was requested for a message that is not failed
    #[error("Message {temp_id} is not awaiting retry")]
    NotFailed { temp_id: MessageId },

    /// No viewer has been attached to the session
    #[error("No active session to send from")]
    NoSession,
}

impl SendError {
    #[must_use]
    pub const fn temp_id(&self) -> Option<MessageId> {
        match self {
            Self::Undelivered { temp_id, .. } | Self::NotFailed { temp_id } => Some(*temp_id),
            Self::NoSession => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_display() {
        let error = TransportError::AckTimeout {
            event: "sendMessage",
            timeout: Duration::from_secs(2),
        };
        assert_eq!(
            error.to_string(),
            "No acknowledgement for `sendMessage` within 2s"
        );

        let error = FetchError::status(404, r#"{"message":"Not found"}"#);
        assert_eq!(
            error.to_string(),
            "Request failed with status 404: Not found"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(FetchError::status(503, "unavailable").is_transient());
        assert!(FetchError::status(429, "slow down").is_transient());
        assert!(!FetchError::status(403, "forbidden").is_transient());
    }

    #[test]
    fn test_send_error_carries_temp_id() {
        let temp_id = Uuid::new_v4();
        let error = SendError::Undelivered {
            temp_id,
            source: TransportError::NotConnected,
        };
        assert_eq!(error.temp_id(), Some(temp_id));
        assert_eq!(SendError::NoSession.temp_id(), None);
    }
}
