use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level outcome carried in every control API body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    /// The request was understood but refused, e.g. a limit switch blocks
    /// table travel.
    Warning,
    Error,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ResponseStatus {
    pub fn is_success(self) -> bool {
        self == ResponseStatus::Success
    }
}

/// A body the server answered with a non-success status.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ApiError {
    pub status: ResponseStatus,
    pub message: String,
}

impl ApiError {
    pub fn new(status: ResponseStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Builds the rejection for a non-success body, falling back to a generic
    /// message when the server sent none.
    pub fn from_status(status: ResponseStatus, message: Option<&str>) -> Self {
        let message = match message {
            Some(text) if !text.trim().is_empty() => text.to_string(),
            _ => format!("server reported status {status:?}"),
        };
        Self::new(status, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_strings_decode_as_unknown() {
        let status: ResponseStatus = serde_json::from_str("\"pending\"").expect("decode");
        assert_eq!(status, ResponseStatus::Unknown);
    }

    #[test]
    fn blank_message_gets_generic_text() {
        let err = ApiError::from_status(ResponseStatus::Warning, Some("  "));
        assert_eq!(err.to_string(), "server reported status Warning");
    }
}
