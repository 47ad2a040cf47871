use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A convenience `Result` alias using [`ChatError`].
pub type ChatResult<T> = Result<T, ChatError>;

/// Top-level error type for chatwire.
#[derive(Error, Debug)]
pub enum ChatError {
    /// The backend could not be reached, or the response body could not be read.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The backend answered `401 Unauthorized`.
    #[error("unauthenticated")]
    Unauthenticated,

    /// The backend answered with a non-2xx status other than 401.
    #[error("API error {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message taken from the error body, or the status line.
        message: String,
    },

    /// The backend answered with a body that does not follow its protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid or missing configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Whether the error calls for a sign-in flow rather than a generic message.
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, ChatError::Unauthenticated)
    }
}

/// The error a session publishes after a failed or degraded turn.
///
/// Presentation code renders [`LastError::Unauthenticated`] as a sign-in
/// prompt and everything else as an inline message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum LastError {
    /// The backend rejected the credentials.
    Unauthenticated,
    /// Any other failure, or an `error` event emitted mid-stream.
    Message(String),
}

impl LastError {
    /// Sentinel string used for [`LastError::Unauthenticated`].
    pub const UNAUTHENTICATED: &'static str = "unauthenticated";

    /// The display text of this error.
    pub fn as_str(&self) -> &str {
        match self {
            LastError::Unauthenticated => Self::UNAUTHENTICATED,
            LastError::Message(message) => message,
        }
    }
}

impl fmt::Display for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&ChatError> for LastError {
    fn from(err: &ChatError) -> Self {
        match err {
            ChatError::Unauthenticated => LastError::Unauthenticated,
            ChatError::Api { message, .. } => LastError::Message(message.clone()),
            other => LastError::Message(other.to_string()),
        }
    }
}

impl PartialEq<str> for LastError {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for LastError {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}
