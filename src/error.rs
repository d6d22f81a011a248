//! Error types for liftrelay.
//!
//! All errors are strongly typed using thiserror so callers can match on the
//! specific failure. None of them is fatal to the bridge: the controller logs
//! them and keeps relaying.

use thiserror::Error;

/// Errors raised by a [`Transport`](crate::transport::Transport) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Value cannot cross the transport natively: {reason}")]
    Unrepresentable {
        reason: String,
    },

    #[error("Transport is closed")]
    Closed,
}

/// Errors produced by the fallback string codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed encoded payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid reference path '{path}'")]
    InvalidPath {
        path: String,
    },

    #[error("Reference '{path}' does not resolve to an earlier value")]
    UnresolvedReference {
        path: String,
    },
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid action filter pattern '{pattern}': {reason}")]
    InvalidPattern {
        pattern: String,
        reason: String,
    },

    #[error("Failed to read options file {path}: {message}")]
    Io {
        path: String,
        message: String,
    },

    #[error("Failed to parse options: {message}")]
    Parse {
        message: String,
    },
}

/// Top-level error type for liftrelay.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Import failed: {reason}")]
    Import {
        reason: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl RelayError {
    /// Creates an import error.
    #[must_use]
    pub fn import(reason: impl Into<String>) -> Self {
        Self::Import {
            reason: reason.into(),
        }
    }

    /// Returns true if this is a transport error.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true if this is a codec error.
    #[must_use]
    pub const fn is_codec(&self) -> bool {
        matches!(self, Self::Codec(_))
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if this is an import error.
    #[must_use]
    pub const fn is_import(&self) -> bool {
        matches!(self, Self::Import { .. })
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal {
            message: format!("json: {err}"),
        }
    }
}

/// Result type alias for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
