//! Subscription registry.
//!
//! The registry shares one transport channel per [`Topic`] across any number
//! of callbacks. A channel is opened on the first registration for its topic
//! and closed when the last callback for that topic is removed. Inbound
//! changes are normalized once per event and handed to every callback on the
//! topic, inline and in registration order.
//!
//! The topic map is guarded by a mutex; callbacks are always invoked after
//! the lock is released, so a callback may subscribe or unsubscribe freely.

mod handle;
/// Raw change normalization per topic family.
pub mod normalize;
/// Topic definitions.
pub mod topic;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ChannelError;
use crate::event::StatusUpdate;
use crate::source::{ChangeEventSource, ChannelEvent, ChannelEventHandler, ChannelHandle, ChannelSpec, ChannelState};

pub use handle::Subscription;
pub use topic::{OrderType, Topic};

/// Callback receiving normalized status updates.
pub type StatusCallback = Arc<dyn Fn(&StatusUpdate) + Send + Sync>;

/// Listener notified of every channel state transition.
pub type ChannelStateListener = Arc<dyn Fn(Topic, ChannelState) + Send + Sync>;

/// Identity of one registered callback. Ids increase with registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CallbackId(u64);

/// Per-topic entry in [`SubscriptionStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicStats {
    /// Channel name.
    pub topic: String,
    /// `None` when the topic has callbacks but no open channel.
    pub state: Option<ChannelState>,
    /// Registered callbacks.
    pub callbacks: usize,
}

/// Snapshot of registry occupancy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    /// Open channels.
    pub total_channels: usize,
    /// Registered callbacks across all topics.
    pub total_callbacks: usize,
    /// Per-topic breakdown in topic order.
    pub topics: Vec<TopicStats>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct OpenChannel {
    handle: Box<dyn ChannelHandle>,
    generation: u64,
    last_state: ChannelState,
}

impl OpenChannel {
    fn state(&self) -> ChannelState {
        if self.last_state.is_terminal() {
            self.last_state
        } else {
            self.handle.state()
        }
    }
}

#[derive(Default)]
struct TopicEntry {
    channel: Option<OpenChannel>,
    callbacks: BTreeMap<CallbackId, StatusCallback>,
}

pub(crate) struct RegistryShared {
    source: Arc<dyn ChangeEventSource>,
    topics: Mutex<HashMap<Topic, TopicEntry>>,
    listeners: Mutex<BTreeMap<u64, ChannelStateListener>>,
    next_callback: AtomicU64,
    next_generation: AtomicU64,
    next_listener: AtomicU64,
}

impl RegistryShared {
    /// Opens the channel for `topic`. Called with the topic map locked.
    fn open(self: &Arc<Self>, topic: Topic, entry: &mut TopicEntry) -> Result<ChannelState, ChannelError> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let weak = Arc::downgrade(self);
        let handler: ChannelEventHandler = Arc::new(move |event: ChannelEvent| {
            if let Some(shared) = weak.upgrade() {
                shared.dispatch(topic, generation, event);
            }
        });

        let spec = ChannelSpec::changes(topic.channel_name(), topic.table());
        let handle = self.source.open_channel(&spec, handler).map_err(|e| {
            warn!(topic = %topic, error = %e, "failed to open channel");
            e
        })?;
        let state = handle.state();
        debug!(topic = %topic, generation, state = %state, "opened channel");
        entry.channel = Some(OpenChannel {
            handle,
            generation,
            last_state: state,
        });
        Ok(state)
    }

    fn dispatch(&self, topic: Topic, generation: u64, event: ChannelEvent) {
        match event {
            ChannelEvent::Change(raw) => {
                let callbacks: Vec<StatusCallback> = {
                    let topics = lock(&self.topics);
                    let Some(entry) = topics.get(&topic) else {
                        return;
                    };
                    match &entry.channel {
                        Some(ch) if ch.generation == generation && !ch.last_state.is_terminal() => {}
                        _ => {
                            debug!(topic = %topic, generation, "dropping change from inactive channel");
                            return;
                        }
                    }
                    entry.callbacks.values().cloned().collect()
                };

                let Some(update) = normalize::normalize(topic, &raw) else {
                    return;
                };
                for callback in &callbacks {
                    callback(&update);
                }
            }
            ChannelEvent::State(state) => {
                {
                    let mut topics = lock(&self.topics);
                    let Some(ch) = topics
                        .get_mut(&topic)
                        .and_then(|e| e.channel.as_mut())
                        .filter(|c| c.generation == generation)
                    else {
                        return;
                    };
                    ch.last_state = state;
                }
                if state == ChannelState::Errored {
                    warn!(topic = %topic, generation, "channel errored; forwarding stopped");
                } else {
                    debug!(topic = %topic, generation, state = %state, "channel state changed");
                }
                self.notify_listeners(topic, state);
            }
            ChannelEvent::Broadcast(_) => {
                debug!(topic = %topic, "ignoring broadcast on change channel");
            }
        }
    }

    pub(crate) fn remove_callback(&self, topic: Topic, id: CallbackId) {
        let removed_topic = {
            let mut topics = lock(&self.topics);
            let Some(entry) = topics.get_mut(&topic) else {
                return;
            };
            if entry.callbacks.remove(&id).is_none() {
                return;
            }
            debug!(topic = %topic, callback = id.0, remaining = entry.callbacks.len(), "removed callback");
            if entry.callbacks.is_empty() {
                topics.remove(&topic)
            } else {
                None
            }
        };

        if let Some(entry) = removed_topic {
            if let Some(ch) = entry.channel {
                ch.handle.close();
                debug!(topic = %topic, generation = ch.generation, "closed channel after last unsubscribe");
            }
            self.notify_listeners(topic, ChannelState::Closed);
        }
    }

    fn notify_listeners(&self, topic: Topic, state: ChannelState) {
        let listeners: Vec<ChannelStateListener> = lock(&self.listeners).values().cloned().collect();
        for listener in listeners {
            listener(topic, state);
        }
    }

    fn snapshot(&self, topic: Topic) -> Vec<StatusCallback> {
        lock(&self.topics)
            .get(&topic)
            .map(|e| e.callbacks.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// Multiplexes many callbacks per topic onto one transport channel.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    shared: Arc<RegistryShared>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry over `source`.
    #[must_use]
    pub fn new(source: Arc<dyn ChangeEventSource>) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                source,
                topics: Mutex::new(HashMap::new()),
                listeners: Mutex::new(BTreeMap::new()),
                next_callback: AtomicU64::new(0),
                next_generation: AtomicU64::new(0),
                next_listener: AtomicU64::new(0),
            }),
        }
    }

    /// Registers `callback` for `topic`.
    ///
    /// Opens the topic's channel if it has none. A failed open is logged and
    /// left for the health monitor to recover; the callback stays registered.
    pub fn subscribe(&self, topic: Topic, callback: StatusCallback) -> Subscription {
        let id = CallbackId(self.shared.next_callback.fetch_add(1, Ordering::Relaxed) + 1);

        let opened = {
            let mut topics = lock(&self.shared.topics);
            let entry = topics.entry(topic).or_default();
            entry.callbacks.insert(id, callback);
            debug!(topic = %topic, callback = id.0, callbacks = entry.callbacks.len(), "registered callback");
            if entry.channel.is_none() {
                Some(self.shared.open(topic, entry))
            } else {
                None
            }
        };

        if let Some(result) = opened {
            self.shared
                .notify_listeners(topic, result.unwrap_or(ChannelState::Errored));
        }

        Subscription::new(topic, id, Arc::downgrade(&self.shared))
    }

    /// Delivers `update` to every callback on `topic` without going through
    /// the transport. Returns the number of callbacks invoked.
    pub fn publish(&self, topic: Topic, update: &StatusUpdate) -> usize {
        let callbacks = self.shared.snapshot(topic);
        for callback in &callbacks {
            callback(update);
        }
        callbacks.len()
    }

    /// Closes and forgets every open channel, keeping all callbacks.
    ///
    /// Returns the number of channels closed.
    pub fn reset_channels(&self) -> usize {
        let closed: Vec<(Topic, OpenChannel)> = {
            let mut topics = lock(&self.shared.topics);
            topics
                .iter_mut()
                .filter_map(|(topic, entry)| entry.channel.take().map(|ch| (*topic, ch)))
                .collect()
        };

        for (topic, ch) in &closed {
            ch.handle.close();
            self.shared.notify_listeners(*topic, ChannelState::Closed);
        }
        info!(channels = closed.len(), "reset channels");
        closed.len()
    }

    /// Opens a channel for every topic that has callbacks but no channel.
    ///
    /// Returns the number of channels opened successfully.
    pub fn reattach(&self) -> usize {
        let attempts: Vec<(Topic, Result<ChannelState, ChannelError>)> = {
            let mut topics = lock(&self.shared.topics);
            let mut out = Vec::new();
            for (topic, entry) in topics.iter_mut() {
                if entry.channel.is_none() && !entry.callbacks.is_empty() {
                    out.push((*topic, self.shared.open(*topic, entry)));
                }
            }
            out
        };

        let mut opened = 0;
        for (topic, result) in attempts {
            if result.is_ok() {
                opened += 1;
            }
            self.shared
                .notify_listeners(topic, result.unwrap_or(ChannelState::Errored));
        }
        info!(channels = opened, "reattached channels");
        opened
    }

    /// State of each tracked topic's channel, sorted by topic. Topics without
    /// an open channel report `Closed`.
    #[must_use]
    pub fn channel_states(&self) -> Vec<(Topic, ChannelState)> {
        let topics = lock(&self.shared.topics);
        let mut out: Vec<(Topic, ChannelState)> = topics
            .iter()
            .map(|(topic, entry)| {
                let state = entry.channel.as_ref().map_or(ChannelState::Closed, OpenChannel::state);
                (*topic, state)
            })
            .collect();
        out.sort_by_key(|(topic, _)| *topic);
        out
    }

    /// Topics with at least one callback, sorted.
    #[must_use]
    pub fn topics(&self) -> Vec<Topic> {
        let mut out: Vec<Topic> = lock(&self.shared.topics).keys().copied().collect();
        out.sort();
        out
    }

    /// Number of callbacks registered on `topic`.
    #[must_use]
    pub fn callback_count(&self, topic: Topic) -> usize {
        lock(&self.shared.topics)
            .get(&topic)
            .map_or(0, |e| e.callbacks.len())
    }

    /// Occupancy snapshot.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let topics = lock(&self.shared.topics);
        let mut stats = SubscriptionStats::default();
        for (topic, entry) in topics.iter() {
            let state = entry.channel.as_ref().map(OpenChannel::state);
            if state.is_some() {
                stats.total_channels += 1;
            }
            stats.total_callbacks += entry.callbacks.len();
            stats.topics.push(TopicStats {
                topic: topic.channel_name(),
                state,
                callbacks: entry.callbacks.len(),
            });
        }
        stats.topics.sort_by(|a, b| a.topic.cmp(&b.topic));
        stats
    }

    /// Registers a listener for channel state transitions. Returns an id for
    /// [`SubscriptionRegistry::remove_state_listener`].
    pub fn add_state_listener(&self, listener: ChannelStateListener) -> u64 {
        let id = self.shared.next_listener.fetch_add(1, Ordering::Relaxed) + 1;
        lock(&self.shared.listeners).insert(id, listener);
        id
    }

    /// Removes a state listener.
    pub fn remove_state_listener(&self, id: u64) {
        lock(&self.shared.listeners).remove(&id);
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("topics", &self.topics())
            .finish_non_exhaustive()
    }
}
