use serde::{Deserialize, Serialize};

/// Error body returned by the REST collaborators.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ErrorResponse {
    /// The main error message
    pub message: String,
    /// Optional additional details about the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    /// Creates a new error response with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    /// Creates a new error response with message and details.
    pub fn with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: Some(details.into()),
        }
    }

    /// Best-effort parse of a response body; plain-text bodies become the
    /// message verbatim.
    #[must_use]
    pub fn from_body(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_else(|_| Self::new(body.trim()))
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{}: {}", self.message, details),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ErrorResponse {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_display() {
        let error = ErrorResponse::new("Not found");
        assert_eq!(error.to_string(), "Not found");

        let error = ErrorResponse::with_details("Forbidden", "not a participant");
        assert_eq!(error.to_string(), "Forbidden: not a participant");
    }

    #[test]
    fn test_error_response_from_json_body() {
        let error = ErrorResponse::from_body(r#"{"message":"Conflict","details":"exists"}"#);
        assert_eq!(error, ErrorResponse::with_details("Conflict", "exists"));
    }

    #[test]
    fn test_error_response_from_plain_body() {
        let error = ErrorResponse::from_body("gateway timeout\n");
        assert_eq!(error.message, "gateway timeout");
        assert_eq!(error.details, None);
    }
}
