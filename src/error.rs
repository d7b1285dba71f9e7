//! Unified client error model and mapping helpers.
//! Gateway, storage and session code all report failures as `AppError`; the session
//! store turns them into display strings at its public boundary.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    /// The backend answered and refused the request (bad credentials, validation).
    Rejected { code: String, message: String },
    /// 401/403 from the backend: the bearer token is missing, expired or revoked.
    Unauthorized { code: String, message: String },
    Transport { code: String, message: String },
    Decode { code: String, message: String },
    Storage { code: String, message: String },
    /// Durable storage holds something that cannot be a session (e.g. unparsable identity).
    CorruptState { code: String, message: String },
    UserInput { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::Rejected { code, .. }
            | AppError::Unauthorized { code, .. }
            | AppError::Transport { code, .. }
            | AppError::Decode { code, .. }
            | AppError::Storage { code, .. }
            | AppError::CorruptState { code, .. }
            | AppError::UserInput { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Rejected { message, .. }
            | AppError::Unauthorized { message, .. }
            | AppError::Transport { message, .. }
            | AppError::Decode { message, .. }
            | AppError::Storage { message, .. }
            | AppError::CorruptState { message, .. }
            | AppError::UserInput { message, .. } => message.as_str(),
        }
    }

    pub fn rejected<S: Into<String>>(code: S, msg: S) -> Self { AppError::Rejected { code: code.into(), message: msg.into() } }
    pub fn unauthorized<S: Into<String>>(code: S, msg: S) -> Self { AppError::Unauthorized { code: code.into(), message: msg.into() } }
    pub fn transport<S: Into<String>>(code: S, msg: S) -> Self { AppError::Transport { code: code.into(), message: msg.into() } }
    pub fn decode<S: Into<String>>(code: S, msg: S) -> Self { AppError::Decode { code: code.into(), message: msg.into() } }
    pub fn storage<S: Into<String>>(code: S, msg: S) -> Self { AppError::Storage { code: code.into(), message: msg.into() } }
    pub fn corrupt<S: Into<String>>(code: S, msg: S) -> Self { AppError::CorruptState { code: code.into(), message: msg.into() } }
    pub fn user<S: Into<String>>(code: S, msg: S) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }

    pub fn is_unauthorized(&self) -> bool { matches!(self, AppError::Unauthorized { .. }) }

    /// Text safe to show on a page: the backend's own words for a rejection,
    /// the operation's generic fallback for everything else.
    pub fn display_message(&self, fallback: &str) -> String {
        match self {
            AppError::Rejected { message, .. } if !message.trim().is_empty() => message.clone(),
            _ => fallback.to_string(),
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AppError::Decode { code: "decode_error".into(), message: err.to_string() }
        } else {
            AppError::Transport { code: "transport_error".into(), message: err.to_string() }
        }
    }
}

impl From<reqwest::header::InvalidHeaderValue> for AppError {
    fn from(err: reqwest::header::InvalidHeaderValue) -> Self {
        AppError::UserInput { code: "invalid_header".into(), message: err.to_string() }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Decode { code: "json_error".into(), message: err.to_string() }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage { code: "io_error".into(), message: err.to_string() }
    }
}

/// Map a URL parse/join failure; reqwest does not re-export the url crate's error type.
pub fn invalid_url(err: impl Display) -> AppError {
    AppError::UserInput { code: "invalid_url".into(), message: err.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_message_prefers_backend_text_for_rejections() {
        let e = AppError::rejected("rejected", "Invalid credentials");
        assert_eq!(e.display_message("Login failed"), "Invalid credentials");

        let blank = AppError::rejected("rejected", "  ");
        assert_eq!(blank.display_message("Login failed"), "Login failed");

        let t = AppError::transport("transport_error", "connection refused");
        assert_eq!(t.display_message("Login failed"), "Login failed");
    }

    #[test]
    fn unauthorized_is_classified() {
        assert!(AppError::unauthorized("unauthorized", "HTTP 401").is_unauthorized());
        assert!(!AppError::decode("decode_error", "bad json").is_unauthorized());
    }

    #[test]
    fn serializes_with_type_tag() {
        let v = serde_json::to_value(AppError::corrupt("corrupt_identity", "not json")).unwrap();
        assert_eq!(v["type"], "corrupt_state");
        assert_eq!(v["code"], "corrupt_identity");
        assert_eq!(format!("{}", AppError::storage("io_error", "denied")), "io_error: denied");
    }
}
