//! Status change orchestration.
//!
//! A status change request moves through a small state machine:
//!
//! ```text
//! Pending ──validate──▶ Validated ──record──▶ Committed ──publish──▶ Notified
//!    │                      │
//!    └──▶ Rejected          └──▶ (stops here on a history store failure)
//! ```
//!
//! Observers are only ever told about changes the history store accepted.

mod history;

#[cfg(feature = "persistent")]
mod codec;
#[cfg(feature = "persistent")]
mod file;

use std::fmt;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::event::{ChangeOperation, InventoryChange, Row, StatusChange, StatusUpdate};
use crate::registry::{SubscriptionRegistry, Topic};
use crate::status::{DualStatus, StatusPatch};
use crate::transition::{StatusTransitionValidator, ValidatedTransition};

pub use history::{HistoryStore, MemoryHistoryStore};

#[cfg(feature = "persistent")]
pub use file::FileHistoryStore;

/// Stage a status change request reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeState {
    /// Received, not yet validated.
    Pending,
    /// Passed validation, not recorded.
    Validated,
    /// Recorded in history.
    Committed,
    /// Published to subscribers.
    Notified,
    /// Refused by validation.
    Rejected,
}

impl fmt::Display for ChangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Validated => write!(f, "validated"),
            Self::Committed => write!(f, "committed"),
            Self::Notified => write!(f, "notified"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// A request to change one inventory record's status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChangeRequest {
    /// Inventory record id.
    pub record_id: String,
    /// Currently committed status of the record.
    pub current: DualStatus,
    /// Fields to change.
    pub proposed: StatusPatch,
    /// User making the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
}

impl StatusChangeRequest {
    /// Creates an anonymous request.
    #[must_use]
    pub fn new(record_id: impl Into<String>, current: DualStatus, proposed: StatusPatch) -> Self {
        Self {
            record_id: record_id.into(),
            current,
            proposed,
            actor_id: None,
        }
    }

    /// Attributes the request to `actor_id`.
    #[must_use]
    pub fn by(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }
}

/// Outcome of a fully processed request.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChangeReceipt {
    /// Committed status, stamped with the update time and actor.
    pub status: DualStatus,
    /// True if the physical status moved.
    pub physical_status_changed: bool,
    /// True if the business status moved.
    pub business_status_changed: bool,
    /// The update that was recorded and published.
    pub update: StatusUpdate,
    /// Number of local callbacks the update was delivered to.
    pub notified: usize,
    /// Final stage reached.
    pub state: ChangeState,
}

/// A request that stopped before notification.
#[derive(Debug, Error)]
#[error("status change stopped at {state}: {error}")]
pub struct StatusChangeFailure {
    /// Last stage reached.
    pub state: ChangeState,
    /// Why the request stopped.
    #[source]
    pub error: SyncError,
}

impl StatusChangeFailure {
    /// True if the request was rejected by validation.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self.state, ChangeState::Rejected)
    }
}

/// Validates, records and publishes inventory status changes.
pub struct StatusChangeNotifier {
    registry: SubscriptionRegistry,
    history: Arc<dyn HistoryStore>,
}

impl StatusChangeNotifier {
    /// Creates a notifier publishing through `registry`.
    #[must_use]
    pub fn new(registry: SubscriptionRegistry, history: Arc<dyn HistoryStore>) -> Self {
        Self { registry, history }
    }

    /// Runs `request` through validation, persistence and notification.
    ///
    /// # Errors
    /// A [`StatusChangeFailure`] at `Rejected` for validation failures
    /// (including the no-op rejection) or at `Validated` when the history
    /// store refuses the record. Nothing is published in either case.
    pub fn submit(&self, request: &StatusChangeRequest) -> Result<StatusChangeReceipt, StatusChangeFailure> {
        let record_id = request.record_id.as_str();

        let validated = StatusTransitionValidator::validate(&request.current, &request.proposed).map_err(|e| {
            if e.is_no_op() {
                debug!(record_id, "status change is a no-op");
            } else {
                info!(record_id, error = e.error(), details = %e.details(), "status change rejected");
            }
            StatusChangeFailure {
                state: ChangeState::Rejected,
                error: e.into(),
            }
        })?;

        let update = audit_update(request, &validated);
        if let Err(e) = self.history.record(&update) {
            warn!(record_id, update_id = %update.id, error = %e, "history store rejected status change");
            return Err(StatusChangeFailure {
                state: ChangeState::Validated,
                error: e.into(),
            });
        }
        debug!(record_id, update_id = %update.id, "status change committed");

        let notified = self.registry.publish(Topic::InventoryStatus, &update);
        debug!(record_id, update_id = %update.id, notified, "status change published");

        let status = validated
            .merged
            .stamped(update.timestamp, request.actor_id.clone());
        Ok(StatusChangeReceipt {
            status,
            physical_status_changed: validated.physical_status_changed,
            business_status_changed: validated.business_status_changed,
            update,
            notified,
            state: ChangeState::Notified,
        })
    }
}

impl fmt::Debug for StatusChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusChangeNotifier").finish_non_exhaustive()
    }
}

/// Builds the audit entry: only changed fields, plus the update stamp.
fn audit_update(request: &StatusChangeRequest, validated: &ValidatedTransition) -> StatusUpdate {
    let current = &request.current;
    let merged = &validated.merged;
    let at = Utc::now();

    let mut old_status = Row::new();
    let mut new_status = Row::new();
    if validated.physical_status_changed {
        old_status.insert("physical_status".into(), Value::from(current.physical_status.as_str()));
        new_status.insert("physical_status".into(), Value::from(merged.physical_status.as_str()));
    }
    if validated.business_status_changed {
        old_status.insert("business_status".into(), Value::from(current.business_status.as_str()));
        new_status.insert("business_status".into(), Value::from(merged.business_status.as_str()));
    }
    new_status.insert(
        "status_updated_at".into(),
        Value::from(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    new_status.insert(
        "status_updated_by".into(),
        request.actor_id.clone().map_or(Value::Null, Value::from),
    );

    let change = StatusChange::Inventory(InventoryChange {
        old_physical: Some(current.physical_status),
        new_physical: Some(merged.physical_status),
        old_business: Some(current.business_status),
        new_business: Some(merged.business_status),
    });

    StatusUpdate::new("inventory", request.record_id.clone(), ChangeOperation::Update, change)
        .with_images(old_status, new_status)
        .at(at)
        .by(request.actor_id.clone())
}
