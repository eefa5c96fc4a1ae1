//! Abstract change-event transport.
//!
//! A [`ChangeEventSource`] opens named channels. Each channel delivers row
//! changes for one table (or ephemeral broadcast messages) to a handler, in
//! the order the transport produced them, and reports its own state
//! transitions through the same handler.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ChannelError;
use crate::event::{ChangeOperation, Row};

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Subscription requested, not yet confirmed.
    Connecting,
    /// Live and delivering events.
    Subscribed,
    /// Closed by either side.
    Closed,
    /// Failed; no further events will arrive.
    Errored,
}

impl ChannelState {
    /// True when the channel is live.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Subscribed)
    }

    /// True when the channel will not deliver any more events.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Subscribed => write!(f, "subscribed"),
            Self::Closed => write!(f, "closed"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

/// What a channel carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Row changes captured from `table`.
    Changes {
        table: String,
    },
    /// Ephemeral messages sent by other channel members.
    Broadcast,
}

/// Request to open a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelSpec {
    /// Channel name, unique per topic.
    pub name: String,
    /// What the channel carries.
    pub kind: ChannelKind,
}

impl ChannelSpec {
    /// A channel carrying row changes for `table`.
    #[must_use]
    pub fn changes(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::Changes {
                table: table.into(),
            },
        }
    }

    /// A broadcast channel.
    #[must_use]
    pub fn broadcast(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::Broadcast,
        }
    }
}

/// A raw row change as captured by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    /// Source table name.
    pub table: String,
    /// Row operation.
    pub operation: ChangeOperation,
    /// Row image before the change; absent for inserts.
    #[serde(default)]
    pub before: Option<Row>,
    /// Row image after the change; absent for deletes.
    #[serde(default)]
    pub after: Option<Row>,
    /// Commit time reported by the transport, if any.
    #[serde(default)]
    pub commit_timestamp: Option<DateTime<Utc>>,
}

impl RawChange {
    /// An UPDATE with both row images.
    #[must_use]
    pub fn update(table: impl Into<String>, before: Row, after: Row) -> Self {
        Self {
            table: table.into(),
            operation: ChangeOperation::Update,
            before: Some(before),
            after: Some(after),
            commit_timestamp: None,
        }
    }

    /// An INSERT with the new row image.
    #[must_use]
    pub fn insert(table: impl Into<String>, after: Row) -> Self {
        Self {
            table: table.into(),
            operation: ChangeOperation::Insert,
            before: None,
            after: Some(after),
            commit_timestamp: None,
        }
    }

    /// A DELETE with the old row image.
    #[must_use]
    pub fn delete(table: impl Into<String>, before: Row) -> Self {
        Self {
            table: table.into(),
            operation: ChangeOperation::Delete,
            before: Some(before),
            after: None,
            commit_timestamp: None,
        }
    }
}

/// Event delivered to a channel handler.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A captured row change.
    Change(RawChange),
    /// An ephemeral broadcast payload.
    Broadcast(Value),
    /// The channel moved to a new state.
    State(ChannelState),
}

/// Handler invoked for every event on a channel.
pub type ChannelEventHandler = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

/// An open channel.
pub trait ChannelHandle: Send + Sync {
    /// Name the channel was opened with.
    fn name(&self) -> &str;

    /// Current state.
    fn state(&self) -> ChannelState;

    /// Sends an ephemeral message to every member of a broadcast channel.
    ///
    /// # Errors
    /// `BroadcastUnsupported` on change channels, `Closed` after `close()`.
    fn send(&self, message: Value) -> Result<(), ChannelError>;

    /// Closes the channel. Idempotent.
    fn close(&self);
}

/// The external change-data-capture transport.
///
/// # Contract
/// - Events on one channel are delivered in order.
/// - Many channels may be open at once, including several with the same name.
/// - `open_channel` must not invoke `handler` before it returns, and handlers
///   must not be invoked while the source holds locks the caller could need.
pub trait ChangeEventSource: Send + Sync {
    /// Opens a channel.
    ///
    /// # Errors
    /// `OpenFailed` when the transport refuses the subscription.
    fn open_channel(
        &self,
        spec: &ChannelSpec,
        handler: ChannelEventHandler,
    ) -> Result<Box<dyn ChannelHandle>, ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_source_object_safe(_: &dyn ChangeEventSource) {}
    fn _assert_handle_object_safe(_: &dyn ChannelHandle) {}

    #[test]
    fn only_subscribed_counts_as_connected() {
        assert!(ChannelState::Subscribed.is_connected());
        assert!(!ChannelState::Connecting.is_connected());
        assert!(ChannelState::Errored.is_terminal());
        assert!(!ChannelState::Connecting.is_terminal());
    }

    #[test]
    fn raw_change_deserializes_with_missing_images() {
        let raw: RawChange = serde_json::from_value(serde_json::json!({
            "table": "inventory",
            "operation": "INSERT",
            "after": {"id": 1}
        }))
        .unwrap();
        assert!(raw.before.is_none());
        assert_eq!(raw.operation, ChangeOperation::Insert);
    }
}
