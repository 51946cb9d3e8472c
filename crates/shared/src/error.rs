use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const INVALID_CODE_MESSAGE: &str = "Invalid tracking code. Try a code starting with \"DEMO\"";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    EmptyCode,
    InvalidCode,
    Superseded,
    NotReady,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Validation failure for a submitted tracking code. The message is shown to
/// the user verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct InvalidCodeError {
    pub message: String,
}

impl InvalidCodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn unrecognized() -> Self {
        Self::new(INVALID_CODE_MESSAGE)
    }
}

impl From<InvalidCodeError> for ApiError {
    fn from(value: InvalidCodeError) -> Self {
        Self {
            code: ErrorCode::InvalidCode,
            message: value.message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("tracking code must not be empty")]
pub struct EmptyCodeError;

impl From<EmptyCodeError> for ApiError {
    fn from(value: EmptyCodeError) -> Self {
        Self::new(ErrorCode::EmptyCode, value.to_string())
    }
}
