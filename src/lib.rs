//! # statussync - Real-time status synchronization
//!
//! statussync keeps many observers informed, in near real time, of status
//! changes on inventory and order records, and enforces the dual-status state
//! machine that governs which inventory transitions are legal.
//!
//! ## Core Concepts
//!
//! - **DualStatus**: the (physical, business) status pair of an inventory record
//! - **Topic**: a group of change events sharing one transport channel
//! - **StatusUpdate**: a normalized change delivered to subscribers
//! - **ConnectionState**: aggregated liveness of every tracked channel
//! - **Presence**: ephemeral "who is doing what to which record" signals
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use statussync::{
//!     BusinessStatus, DualStatus, MemoryEventSource, MemoryHistoryStore, PhysicalStatus,
//!     StatusChangeRequest, StatusPatch, StatusSync, SyncConfig,
//! };
//!
//! let sync = StatusSync::new(
//!     Arc::new(MemoryEventSource::new()),
//!     Arc::new(MemoryHistoryStore::new()),
//!     None,
//!     SyncConfig::default(),
//! )?;
//!
//! let _sub = sync.subscribe_to_inventory_status(|update| println!("{}", update.record_id));
//!
//! let current = DualStatus::new(PhysicalStatus::Depot, BusinessStatus::Available);
//! let request = StatusChangeRequest::new("42", current, StatusPatch::new().physical("in_transit"));
//! let receipt = sync.update_inventory_status(&request)?;
//! assert!(receipt.physical_status_changed);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod event;
pub mod status;
pub mod transition;

// Transport and fan-out
pub mod registry;
pub mod source;

// Components
pub mod config;
pub mod health;
pub mod notifier;
pub mod presence;
pub mod service;

// Re-export primary types at crate root for convenience
pub use config::SyncConfig;
pub use error::{ChannelError, ConfigError, StoreError, SyncError, SyncResult};
pub use event::{ChangeOperation, InventoryChange, OrderChange, PartModificationChange, Row, StatusChange, StatusUpdate};
pub use health::{
    ConnectionHealthMonitor, ConnectionQuality, ConnectionState, ConnectionStatusSubscription, HealthMonitorConfig,
    QualityThresholds,
};
pub use notifier::{
    ChangeState, HistoryStore, MemoryHistoryStore, StatusChangeFailure, StatusChangeNotifier, StatusChangeReceipt,
    StatusChangeRequest,
};
#[cfg(feature = "persistent")]
pub use notifier::FileHistoryStore;
pub use presence::{
    PresenceAction, PresenceActivity, PresenceBroadcaster, PresenceConfig, PresenceSubscription, UserIdentity,
};
pub use registry::{OrderType, StatusCallback, Subscription, SubscriptionRegistry, SubscriptionStats, Topic};
pub use service::StatusSync;
pub use source::{ChangeEventSource, ChannelHandle, ChannelState, MemoryEventSource, RawChange};
pub use status::{BusinessStatus, DualStatus, PhysicalStatus, StatusPatch};
pub use transition::{StatusTransitionValidator, TransitionError, TransitionViolation, ValidatedTransition};
