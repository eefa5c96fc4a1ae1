//! Status update events delivered to subscribers.
//!
//! Raw change events from the transport carry loosely-typed row images. The
//! registry normalizes them into a [`StatusUpdate`] whose `change` field is a
//! strongly-typed [`StatusChange`] for the topic family that produced it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::status::{BusinessStatus, PhysicalStatus};

/// A JSON row image or status projection.
pub type Row = Map<String, Value>;

/// Kind of row operation that produced a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOperation {
    /// Row inserted.
    Insert,
    /// Row updated.
    Update,
    /// Row deleted.
    Delete,
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "INSERT"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// Inventory dual-status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryChange {
    /// Physical status before the change.
    pub old_physical: Option<PhysicalStatus>,
    /// Physical status after the change.
    pub new_physical: Option<PhysicalStatus>,
    /// Business status before the change.
    pub old_business: Option<BusinessStatus>,
    /// Business status after the change.
    pub new_business: Option<BusinessStatus>,
}

impl InventoryChange {
    /// True when the physical dimension moved.
    #[must_use]
    pub fn physical_changed(&self) -> bool {
        self.old_physical != self.new_physical
    }

    /// True when the business dimension moved.
    #[must_use]
    pub fn business_changed(&self) -> bool {
        self.old_business != self.new_business
    }
}

/// Order `status` column change. Order statuses are workflow-specific and
/// kept as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderChange {
    /// Status before the change.
    pub old_status: Option<String>,
    /// Status after the change.
    pub new_status: Option<String>,
}

/// Part-number modification row change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartModificationChange {
    /// Request status before the change.
    pub old_status: Option<String>,
    /// Request status after the change; `None` on delete.
    pub new_status: Option<String>,
    /// Part number being replaced.
    pub old_part_number: Option<String>,
    /// Replacement part number.
    pub new_part_number: Option<String>,
}

/// Typed change payload, one variant per topic family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum StatusChange {
    /// Inventory physical/business status change.
    Inventory(InventoryChange),
    /// Purchase, sales or repair order status change.
    Order(OrderChange),
    /// Part-number modification request change.
    PartModification(PartModificationChange),
}

/// A normalized status change delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Unique event id.
    pub id: Uuid,
    /// Source table.
    pub table: String,
    /// Primary key of the changed row, as text.
    pub record_id: String,
    /// Status columns before the change.
    pub old_status: Row,
    /// Status columns after the change.
    pub new_status: Row,
    /// Commit time, or receipt time when the transport gives none.
    pub timestamp: DateTime<Utc>,
    /// Row operation.
    pub operation: ChangeOperation,
    /// User that made the change, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    /// Typed view of the change.
    pub change: StatusChange,
}

impl StatusUpdate {
    /// Creates an update with a fresh id.
    #[must_use]
    pub fn new(
        table: impl Into<String>,
        record_id: impl Into<String>,
        operation: ChangeOperation,
        change: StatusChange,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            table: table.into(),
            record_id: record_id.into(),
            old_status: Row::new(),
            new_status: Row::new(),
            timestamp: Utc::now(),
            operation,
            actor_id: None,
            change,
        }
    }

    /// Sets the before/after status projections.
    #[must_use]
    pub fn with_images(mut self, old_status: Row, new_status: Row) -> Self {
        self.old_status = old_status;
        self.new_status = new_status;
        self
    }

    /// Sets the event timestamp.
    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the actor that caused the change.
    #[must_use]
    pub fn by(mut self, actor_id: Option<String>) -> Self {
        self.actor_id = actor_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inventory_change_flags() {
        let change = InventoryChange {
            old_physical: Some(PhysicalStatus::Depot),
            new_physical: Some(PhysicalStatus::InTransit),
            old_business: Some(BusinessStatus::Available),
            new_business: Some(BusinessStatus::Available),
        };
        assert!(change.physical_changed());
        assert!(!change.business_changed());
    }

    #[test]
    fn status_update_serializes_tagged_change() {
        let update = StatusUpdate::new(
            "sales_orders",
            "42",
            ChangeOperation::Update,
            StatusChange::Order(OrderChange {
                old_status: Some("draft".to_string()),
                new_status: Some("confirmed".to_string()),
            }),
        );
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["operation"], "UPDATE");
        assert_eq!(json["change"]["family"], "order");
        assert_eq!(json["change"]["new_status"], "confirmed");
        assert!(json.get("actor_id").is_none());
    }
}
