//! Error types for statussync.
//!
//! Every error is strongly typed using thiserror. Each concern owns a leaf
//! enum (transition validation, transport, persistence, configuration) and
//! `SyncError` wraps them so callers can match on the failing layer.

use thiserror::Error;

pub use crate::transition::TransitionError;

/// Transport errors raised by a change-event channel.
///
/// These are absorbed by the health monitor as quality degradation; they only
/// surface to callers from operations that talk to the transport directly
/// (opening a channel, sending a presence message).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Failed to open channel '{topic}': {message}")]
    OpenFailed {
        topic: String,
        message: String,
    },

    #[error("Failed to send on channel '{topic}': {message}")]
    SendFailed {
        topic: String,
        message: String,
    },

    #[error("Channel '{topic}' is closed")]
    Closed {
        topic: String,
    },

    #[error("Channel '{topic}' does not support broadcast messages")]
    BroadcastUnsupported {
        topic: String,
    },
}

/// Persistence errors raised by a history store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("History store unavailable: {0}")]
    Unavailable(String),

    #[error("Duplicate history entry: {0}")]
    DuplicateEntry(String),

    #[error("History store backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue {
        field: String,
        reason: String,
    },
}

/// Top-level error type for statussync.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{0}")]
    Transition(#[from] TransitionError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl SyncError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a transition validation error.
    #[must_use]
    pub const fn is_transition(&self) -> bool {
        matches!(self, Self::Transition(_))
    }

    /// Returns true if this is a transport error.
    #[must_use]
    pub const fn is_channel(&self) -> bool {
        matches!(self, Self::Channel(_))
    }

    /// Returns true if this is a persistence error.
    #[must_use]
    pub const fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transition(_) | Self::Config(_) | Self::Internal { .. } => false,
            Self::Channel(e) => !matches!(e, ChannelError::BroadcastUnsupported { .. }),
            Self::Store(e) => matches!(e, StoreError::Unavailable(_)),
        }
    }
}

/// Result type alias for statussync operations.
pub type SyncResult<T> = Result<T, SyncError>;
