//! Primitives shared by the upload and chat sessions.

use serde::Serialize;
use std::fmt::{Display, Formatter};
use thiserror::Error;
use uuid::Uuid;

/// Identifies one session instance. A fresh id is minted every time a session starts, so events
/// produced for an earlier instance can be told apart and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// State of a session state machine.
pub trait SessionState {
    /// Terminal states accept no further events for the session instance.
    fn is_terminal(&self) -> bool;
}

/// Failure reported by the upload transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    /// HTTP status, when a response was received at all.
    pub status: Option<u16>,
    /// Server-provided description of what went wrong.
    pub detail: Option<String>,
    /// Generic fallback message.
    pub message: String,
}

impl TransportFailure {
    pub fn generic(message: impl Into<String>) -> Self {
        Self {
            status: None,
            detail: None,
            message: message.into(),
        }
    }

    pub fn from_status(status: u16, detail: Option<String>) -> Self {
        Self {
            status: Some(status),
            detail,
            message: format!("upload failed with status {status}"),
        }
    }

    /// The structured cause when the server gave one, the generic message otherwise.
    pub fn description(&self) -> &str {
        self.detail.as_deref().unwrap_or(&self.message)
    }
}

impl Display for TransportFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no endpoint is configured for demo `{0}`")]
    UnsupportedDemo(String),

    #[error("`{file}` ({content_type}) is not accepted, expected one of: {accepted}")]
    UnsupportedFileType {
        file: String,
        content_type: String,
        accepted: String,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    TransportFailure(TransportFailure),

    #[error("chat channel unavailable: {0}")]
    ChannelUnavailable(String),
}

impl SessionError {
    /// Stable machine-readable name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::UnsupportedDemo(_) => "unsupported_demo",
            SessionError::UnsupportedFileType { .. } => "unsupported_file_type",
            SessionError::Cancelled => "cancelled",
            SessionError::TransportFailure(_) => "transport_failure",
            SessionError::ChannelUnavailable(_) => "channel_unavailable",
        }
    }
}

impl From<TransportFailure> for SessionError {
    fn from(failure: TransportFailure) -> Self {
        SessionError::TransportFailure(failure)
    }
}
