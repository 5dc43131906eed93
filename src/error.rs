//! Session error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the session and its collaborators
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Stream failed to open or dropped irrecoverably
    #[error("{message}")]
    Transport { message: String, retryable: bool },

    /// Bounded reconnect attempts exhausted
    #[error("Connection lost: maximum reconnection attempts reached")]
    MaxReconnectExceeded,

    /// Prior history could not be fetched or parsed
    #[error("Failed to load transcript for {instance_id}: {message}")]
    TranscriptLoad { instance_id: String, message: String },

    /// Operation invoked in a state where it has no meaning
    #[error("Invalid operation: {0}")]
    CallerMisuse(String),
}

impl SessionError {
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    #[must_use]
    pub fn transcript_load(instance_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TranscriptLoad {
            instance_id: instance_id.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } => ErrorKind::Transport,
            Self::MaxReconnectExceeded => ErrorKind::MaxReconnectExceeded,
            Self::TranscriptLoad { .. } => ErrorKind::TranscriptLoad,
            Self::CallerMisuse(_) => ErrorKind::CallerMisuse,
        }
    }

    /// Whether the transport may retry the connection after this error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { retryable: true, .. })
    }
}

/// Error classification for UI display
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    MaxReconnectExceeded,
    TranscriptLoad,
    CallerMisuse,
}
