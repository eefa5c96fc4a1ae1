//! Subscription topics.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Order workflows that publish status changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// `purchase_orders`.
    Purchase,
    /// `sales_orders`.
    Sales,
    /// `repair_orders`.
    Repair,
}

impl OrderType {
    /// Every order type.
    pub const ALL: [Self; 3] = [Self::Purchase, Self::Sales, Self::Repair];

    /// Backing table name.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Purchase => "purchase_orders",
            Self::Sales => "sales_orders",
            Self::Repair => "repair_orders",
        }
    }
}

/// A logical group of change events sharing one transport channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "topic", content = "order_type", rename_all = "snake_case")]
pub enum Topic {
    /// Inventory dual-status changes.
    InventoryStatus,
    /// Order status changes for one order workflow.
    OrderStatus(OrderType),
    /// Part-number modification requests.
    PartNumberModifications,
}

impl Topic {
    /// Table the topic's changes are captured from.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::InventoryStatus => "inventory",
            Self::OrderStatus(order_type) => order_type.table(),
            Self::PartNumberModifications => "part_number_modification_requests",
        }
    }

    /// Transport channel name.
    #[must_use]
    pub fn channel_name(self) -> String {
        match self {
            Self::InventoryStatus => "inventory-status".to_string(),
            Self::OrderStatus(order_type) => format!("{}-status", order_type.table()),
            Self::PartNumberModifications => "part-number-modifications".to_string(),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.channel_name())
    }
}
