//! Composition root.
//!
//! [`StatusSync`] owns one instance of every component, wired together over a
//! single change-event source. Applications create one per session and hand
//! it to whatever needs status updates; there is no process-wide state.

use std::sync::Arc;

use serde_json::Value;

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::event::StatusUpdate;
use crate::health::{ConnectionHealthMonitor, ConnectionState, ConnectionStatusSubscription};
use crate::notifier::{HistoryStore, StatusChangeFailure, StatusChangeNotifier, StatusChangeReceipt, StatusChangeRequest};
use crate::presence::{PresenceAction, PresenceActivity, PresenceBroadcaster, PresenceSubscription, UserIdentity};
use crate::registry::{OrderType, Subscription, SubscriptionRegistry, SubscriptionStats, Topic};
use crate::source::ChangeEventSource;

/// Status synchronization for one session.
pub struct StatusSync {
    registry: SubscriptionRegistry,
    monitor: ConnectionHealthMonitor,
    presence: PresenceBroadcaster,
    notifier: StatusChangeNotifier,
}

impl StatusSync {
    /// Wires every component over `source`.
    ///
    /// `identity` tags presence broadcasts; `None` makes the session
    /// anonymous.
    ///
    /// # Errors
    /// `Config` if `config` fails validation, `Internal` if the health
    /// monitor cannot start.
    pub fn new(
        source: Arc<dyn ChangeEventSource>,
        history: Arc<dyn HistoryStore>,
        identity: Option<UserIdentity>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        config.validate()?;
        let registry = SubscriptionRegistry::new(Arc::clone(&source));
        let monitor = ConnectionHealthMonitor::new(registry.clone(), config.health)?;
        let presence = PresenceBroadcaster::new(source, identity, config.presence);
        let notifier = StatusChangeNotifier::new(registry.clone(), history);
        Ok(Self {
            registry,
            monitor,
            presence,
            notifier,
        })
    }

    fn subscribe(
        &self,
        topic: Topic,
        callback: impl Fn(&StatusUpdate) + Send + Sync + 'static,
    ) -> Subscription {
        self.registry.subscribe(topic, Arc::new(callback))
    }

    /// Receives inventory dual-status changes.
    pub fn subscribe_to_inventory_status(
        &self,
        callback: impl Fn(&StatusUpdate) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(Topic::InventoryStatus, callback)
    }

    /// Receives status changes for one order workflow.
    pub fn subscribe_to_order_status(
        &self,
        order_type: OrderType,
        callback: impl Fn(&StatusUpdate) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(Topic::OrderStatus(order_type), callback)
    }

    /// Receives every part-number modification request change.
    pub fn subscribe_to_part_number_modifications(
        &self,
        callback: impl Fn(&StatusUpdate) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(Topic::PartNumberModifications, callback)
    }

    /// Receives other users' presence on `(table, record_id)`.
    pub fn subscribe_to_user_activity(
        &self,
        table: &str,
        record_id: &str,
        callback: impl Fn(&PresenceActivity) + Send + Sync + 'static,
    ) -> PresenceSubscription {
        self.presence.subscribe(table, record_id, Arc::new(callback))
    }

    /// Announces the local user's presence on `(table, record_id)`.
    ///
    /// # Errors
    /// `Channel` if the presence channel cannot be used.
    pub fn broadcast_user_activity(
        &self,
        table: &str,
        record_id: &str,
        action: PresenceAction,
        metadata: Option<Value>,
    ) -> SyncResult<()> {
        self.presence.broadcast(table, record_id, action, metadata)
    }

    /// Receives aggregated connection state, starting with the current one.
    pub fn subscribe_to_connection_status(
        &self,
        callback: impl Fn(&ConnectionState) + Send + Sync + 'static,
    ) -> ConnectionStatusSubscription {
        self.monitor.subscribe(Arc::new(callback))
    }

    /// Closes and reopens every tracked channel.
    ///
    /// # Errors
    /// `Internal` if the health monitor is not running.
    pub fn reconnect_all(&self) -> SyncResult<()> {
        self.monitor.reconnect_all()
    }

    /// Channel and callback counts.
    #[must_use]
    pub fn get_subscription_stats(&self) -> SubscriptionStats {
        self.registry.stats()
    }

    /// Snapshot of the aggregated connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.monitor.current_state()
    }

    /// Validates, records and publishes an inventory status change.
    ///
    /// # Errors
    /// See [`StatusChangeNotifier::submit`].
    pub fn update_inventory_status(
        &self,
        request: &StatusChangeRequest,
    ) -> Result<StatusChangeReceipt, StatusChangeFailure> {
        self.notifier.submit(request)
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }
}

impl std::fmt::Debug for StatusSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusSync")
            .field("registry", &self.registry)
            .field("monitor", &self.monitor)
            .field("presence", &self.presence)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, SyncError};
    use crate::notifier::MemoryHistoryStore;
    use crate::source::MemoryEventSource;

    fn session(source: &MemoryEventSource) -> StatusSync {
        StatusSync::new(
            Arc::new(source.clone()),
            Arc::new(MemoryHistoryStore::new()),
            Some(UserIdentity::new("u1", "Ana")),
            SyncConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        let mut config = SyncConfig::default();
        config.health.heartbeat_interval = std::time::Duration::ZERO;
        let err = StatusSync::new(
            Arc::new(MemoryEventSource::new()),
            Arc::new(MemoryHistoryStore::new()),
            None,
            config,
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Config(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn stats_track_every_subscription_kind() {
        let source = MemoryEventSource::new();
        let sync = session(&source);
        let _inv = sync.subscribe_to_inventory_status(|_| {});
        let _ord = sync.subscribe_to_order_status(OrderType::Purchase, |_| {});
        let _ord2 = sync.subscribe_to_order_status(OrderType::Purchase, |_| {});
        let _pn = sync.subscribe_to_part_number_modifications(|_| {});

        let stats = sync.get_subscription_stats();
        assert_eq!(stats.total_channels, 3);
        assert_eq!(stats.total_callbacks, 4);
        let names: Vec<&str> = stats.topics.iter().map(|t| t.topic.as_str()).collect();
        assert_eq!(names, ["inventory-status", "part-number-modifications", "purchase_orders-status"]);
    }

    #[test]
    fn dropping_subscriptions_releases_channels() {
        let source = MemoryEventSource::new();
        let sync = session(&source);
        {
            let _a = sync.subscribe_to_inventory_status(|_| {});
            let _b = sync.subscribe_to_inventory_status(|_| {});
        }
        assert_eq!(source.open_count(), 1);
        assert_eq!(source.close_count(), 1);
        assert_eq!(sync.get_subscription_stats(), SubscriptionStats::default());
    }
}
