//! Inventory dual-status types.
//!
//! An inventory record tracks two independent status dimensions: where the
//! item physically is, and what its commercial state is. The pair is settable
//! field by field, but some combinations are forbidden; see
//! [`crate::transition`] for the rules.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an inventory item physically is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhysicalStatus {
    /// Stored at a depot.
    Depot,
    /// Out for repair.
    InRepair,
    /// Moving between locations.
    InTransit,
}

impl PhysicalStatus {
    /// Every declared value, in declaration order.
    pub const ALL: [Self; 3] = [Self::Depot, Self::InRepair, Self::InTransit];

    /// Wire name of this value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Depot => "depot",
            Self::InRepair => "in_repair",
            Self::InTransit => "in_transit",
        }
    }
}

impl fmt::Display for PhysicalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhysicalStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Commercial state of an inventory item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessStatus {
    /// Free to be reserved or sold.
    Available,
    /// Held for a customer.
    Reserved,
    /// Sold.
    Sold,
}

impl BusinessStatus {
    /// Every declared value, in declaration order.
    pub const ALL: [Self; 3] = [Self::Available, Self::Reserved, Self::Sold];

    /// Wire name of this value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Reserved => "reserved",
            Self::Sold => "sold",
        }
    }
}

impl fmt::Display for BusinessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BusinessStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// A status string that is not one of the declared values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown status '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

/// The committed (physical, business) status pair of an inventory record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DualStatus {
    /// Where the item is.
    pub physical_status: PhysicalStatus,
    /// Commercial state of the item.
    pub business_status: BusinessStatus,
    /// When the status was last changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_updated_at: Option<DateTime<Utc>>,
    /// Who last changed the status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_updated_by: Option<String>,
}

impl DualStatus {
    /// Creates a status pair with no update stamp.
    #[must_use]
    pub const fn new(physical_status: PhysicalStatus, business_status: BusinessStatus) -> Self {
        Self {
            physical_status,
            business_status,
            status_updated_at: None,
            status_updated_by: None,
        }
    }

    /// Returns the pair with the update stamp set.
    #[must_use]
    pub fn stamped(mut self, at: DateTime<Utc>, by: Option<String>) -> Self {
        self.status_updated_at = Some(at);
        self.status_updated_by = by;
        self
    }

    /// True when the two dimensions (ignoring stamps) are equal.
    #[must_use]
    pub fn same_pair(&self, other: &Self) -> bool {
        self.physical_status == other.physical_status && self.business_status == other.business_status
    }
}

impl fmt::Display for DualStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.physical_status, self.business_status)
    }
}

/// A proposed partial update to a [`DualStatus`].
///
/// Values are kept as raw strings: a proposal arrives from outside the crate
/// and may name values that are not declared. The validator reports those
/// rather than the deserializer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPatch {
    /// Proposed physical status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_status: Option<String>,
    /// Proposed business status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_status: Option<String>,
}

impl StatusPatch {
    /// An empty proposal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Proposes a physical status.
    #[must_use]
    pub fn physical(mut self, value: impl Into<String>) -> Self {
        self.physical_status = Some(value.into());
        self
    }

    /// Proposes a business status.
    #[must_use]
    pub fn business(mut self, value: impl Into<String>) -> Self {
        self.business_status = Some(value.into());
        self
    }

    /// True when neither field is proposed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.physical_status.is_none() && self.business_status.is_none()
    }
}
