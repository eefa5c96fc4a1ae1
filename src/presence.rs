//! Ephemeral presence broadcasting.
//!
//! Presence messages ("user X is editing record Y") travel over one shared
//! broadcast channel per broadcaster, opened lazily on first use. Nothing is
//! persisted or replayed: a message is either delivered to the subscribers
//! that are listening when it arrives, or it is gone.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ChannelError, SyncError, SyncResult};
use crate::source::{ChangeEventSource, ChannelEvent, ChannelEventHandler, ChannelHandle, ChannelSpec, ChannelState};

/// What a user is doing with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceAction {
    /// Looking at the record.
    Viewing,
    /// Has the record open for editing.
    Editing,
    /// Saving a change to the record.
    Updating,
}

impl fmt::Display for PresenceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Viewing => write!(f, "viewing"),
            Self::Editing => write!(f, "editing"),
            Self::Updating => write!(f, "updating"),
        }
    }
}

/// One presence message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceActivity {
    /// Sender id.
    pub user_id: String,
    /// Sender display name.
    pub user_name: String,
    /// Table of the record.
    pub table: String,
    /// Record the activity is about.
    pub record_id: String,
    /// What the sender is doing.
    pub action: PresenceAction,
    /// Send time.
    pub timestamp: DateTime<Utc>,
    /// Free-form extra data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl PresenceActivity {
    /// True if the message is older than `window` at `now`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match chrono::Duration::from_std(window) {
            Ok(window) => now.signed_duration_since(self.timestamp) > window,
            Err(_) => false,
        }
    }
}

/// Who the local session is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Stable user id.
    pub user_id: String,
    /// Display name.
    pub user_name: String,
}

impl UserIdentity {
    /// Creates an identity.
    #[must_use]
    pub fn new(user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
        }
    }
}

/// Presence broadcaster settings.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// Name of the shared broadcast channel.
    pub channel_name: String,
    /// Messages older than this at receipt are dropped.
    pub staleness_window: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            channel_name: "user-activity".to_string(),
            staleness_window: Duration::from_secs(5 * 60),
        }
    }
}

/// Callback receiving presence messages.
pub type PresenceCallback = Arc<dyn Fn(&PresenceActivity) + Send + Sync>;

struct Watcher {
    table: String,
    record_id: String,
    callback: PresenceCallback,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct PresenceShared {
    source: Arc<dyn ChangeEventSource>,
    identity: Option<UserIdentity>,
    cfg: PresenceConfig,
    channel: Mutex<Option<Arc<dyn ChannelHandle>>>,
    watchers: Mutex<BTreeMap<u64, Watcher>>,
    next_watcher: AtomicU64,
}

impl PresenceShared {
    /// Returns the shared channel, opening it if it is missing or dead.
    fn channel(self: &Arc<Self>) -> Result<Arc<dyn ChannelHandle>, ChannelError> {
        let mut slot = lock(&self.channel);
        if let Some(handle) = slot.as_ref() {
            if !handle.state().is_terminal() {
                return Ok(Arc::clone(handle));
            }
            handle.close();
        }

        let weak = Arc::downgrade(self);
        let handler: ChannelEventHandler = Arc::new(move |event: ChannelEvent| {
            if let Some(shared) = weak.upgrade() {
                shared.on_event(event);
            }
        });
        let spec = ChannelSpec::broadcast(self.cfg.channel_name.clone());
        let handle: Arc<dyn ChannelHandle> = Arc::from(self.source.open_channel(&spec, handler)?);
        debug!(channel = %self.cfg.channel_name, "opened presence channel");
        *slot = Some(Arc::clone(&handle));
        Ok(handle)
    }

    fn on_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Broadcast(payload) => self.deliver(payload),
            ChannelEvent::State(state) => {
                if state == ChannelState::Errored {
                    warn!(channel = %self.cfg.channel_name, "presence channel errored");
                } else {
                    debug!(channel = %self.cfg.channel_name, state = %state, "presence channel state changed");
                }
            }
            ChannelEvent::Change(_) => {}
        }
    }

    fn deliver(&self, payload: Value) {
        let activity: PresenceActivity = match serde_json::from_value(payload) {
            Ok(a) => a,
            Err(e) => {
                warn!(channel = %self.cfg.channel_name, error = %e, "dropping malformed presence message");
                return;
            }
        };

        if self
            .identity
            .as_ref()
            .is_some_and(|me| me.user_id == activity.user_id)
        {
            return;
        }
        if activity.is_stale(Utc::now(), self.cfg.staleness_window) {
            debug!(user_id = %activity.user_id, record_id = %activity.record_id, "dropping stale presence message");
            return;
        }

        let callbacks: Vec<PresenceCallback> = lock(&self.watchers)
            .values()
            .filter(|w| w.table == activity.table && w.record_id == activity.record_id)
            .map(|w| Arc::clone(&w.callback))
            .collect();
        for callback in callbacks {
            callback(&activity);
        }
    }
}

/// Disposer for a presence watcher. Dropping it unsubscribes.
#[must_use = "dropping a PresenceSubscription unsubscribes its callback"]
pub struct PresenceSubscription {
    id: u64,
    shared: Weak<PresenceShared>,
    unsubscribed: AtomicBool,
}

impl PresenceSubscription {
    /// Removes the watcher. Idempotent.
    pub fn unsubscribe(&self) {
        if self.unsubscribed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            lock(&shared.watchers).remove(&self.id);
        }
    }
}

impl Drop for PresenceSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for PresenceSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresenceSubscription")
            .field("id", &self.id)
            .field("unsubscribed", &self.unsubscribed.load(Ordering::Acquire))
            .finish()
    }
}

/// Broadcasts and receives presence messages over one shared channel.
pub struct PresenceBroadcaster {
    shared: Arc<PresenceShared>,
}

impl PresenceBroadcaster {
    /// Creates a broadcaster. `identity` is `None` for anonymous sessions,
    /// which may watch but never broadcast.
    #[must_use]
    pub fn new(source: Arc<dyn ChangeEventSource>, identity: Option<UserIdentity>, cfg: PresenceConfig) -> Self {
        Self {
            shared: Arc::new(PresenceShared {
                source,
                identity,
                cfg,
                channel: Mutex::new(None),
                watchers: Mutex::new(BTreeMap::new()),
                next_watcher: AtomicU64::new(0),
            }),
        }
    }

    /// Announces that the local user is acting on `(table, record_id)`.
    ///
    /// Does nothing for anonymous sessions.
    ///
    /// # Errors
    /// `Channel` if the shared channel cannot be opened or the send fails.
    pub fn broadcast(
        &self,
        table: &str,
        record_id: &str,
        action: PresenceAction,
        metadata: Option<Value>,
    ) -> SyncResult<()> {
        let Some(identity) = self.shared.identity.as_ref() else {
            debug!(table, record_id, "anonymous session; presence broadcast skipped");
            return Ok(());
        };

        let activity = PresenceActivity {
            user_id: identity.user_id.clone(),
            user_name: identity.user_name.clone(),
            table: table.to_string(),
            record_id: record_id.to_string(),
            action,
            timestamp: Utc::now(),
            metadata,
        };
        let payload = serde_json::to_value(&activity)
            .map_err(|e| SyncError::internal(format!("failed to encode presence message: {e}")))?;

        let channel = self.shared.channel()?;
        channel.send(payload).map_err(|e| {
            warn!(table, record_id, error = %e, "presence broadcast failed");
            SyncError::from(e)
        })
    }

    /// Watches presence messages for `(table, record_id)` from other users.
    ///
    /// A failed channel open is logged and retried by the next `subscribe`
    /// or `broadcast`; the watcher stays registered.
    pub fn subscribe(&self, table: &str, record_id: &str, callback: PresenceCallback) -> PresenceSubscription {
        let id = self.shared.next_watcher.fetch_add(1, Ordering::Relaxed) + 1;
        lock(&self.shared.watchers).insert(
            id,
            Watcher {
                table: table.to_string(),
                record_id: record_id.to_string(),
                callback,
            },
        );
        if let Err(e) = self.shared.channel() {
            warn!(table, record_id, error = %e, "failed to open presence channel");
        }
        PresenceSubscription {
            id,
            shared: Arc::downgrade(&self.shared),
            unsubscribed: AtomicBool::new(false),
        }
    }

    /// Identity messages are tagged with, if any.
    #[must_use]
    pub fn identity(&self) -> Option<&UserIdentity> {
        self.shared.identity.as_ref()
    }

    /// Number of registered watchers.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        lock(&self.shared.watchers).len()
    }

    /// State of the shared channel, `None` before it is first opened.
    #[must_use]
    pub fn channel_state(&self) -> Option<ChannelState> {
        lock(&self.shared.channel).as_ref().map(|h| h.state())
    }
}

impl Drop for PresenceBroadcaster {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.shared.channel).take() {
            handle.close();
        }
    }
}

impl fmt::Debug for PresenceBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresenceBroadcaster")
            .field("identity", &self.shared.identity)
            .field("watchers", &self.watcher_count())
            .finish_non_exhaustive()
    }
}
