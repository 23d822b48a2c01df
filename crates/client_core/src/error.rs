use std::time::Duration;

use shared::error::{ApiError, ResponseStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("server returned HTTP {status}: {}", .message.as_deref().unwrap_or("no message"))]
    HttpStatus { status: u16, message: Option<String> },
    #[error("{}", .0.message)]
    Rejected(ApiError),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
}

impl ControlError {
    /// True when the server answered but refused, as opposed to the request
    /// never completing.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ControlError::Rejected(_))
    }

    pub fn is_limit_warning(&self) -> bool {
        matches!(self, ControlError::Rejected(err) if err.status == ResponseStatus::Warning)
    }
}

impl From<ApiError> for ControlError {
    fn from(value: ApiError) -> Self {
        Self::Rejected(value)
    }
}

impl From<reqwest::Error> for ControlError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value.to_string())
    }
}
