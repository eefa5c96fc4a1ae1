//! Connection health monitor.
//!
//! Aggregates the liveness of every channel tracked by a
//! [`SubscriptionRegistry`] into one [`ConnectionState`] and drives bounded
//! reconnection. The monitor runs a dedicated worker thread fed by a bounded
//! control queue; channel state transitions are forwarded to it with a
//! non-blocking `try_send`, so the delivery path never waits on the monitor.
//! The state is recomputed on every heartbeat tick and after every channel
//! state transition.

mod quality;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::registry::{SubscriptionRegistry, Topic};
use crate::source::ChannelState;

pub use quality::{assess, ConnectionQuality, ConnectionState, QualityThresholds};

/// Observer of aggregated connection state.
pub type ConnectionStatusCallback = Arc<dyn Fn(&ConnectionState) + Send + Sync>;

/// Connection health monitor settings.
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Interval between heartbeat recomputations.
    pub heartbeat_interval: Duration,
    /// Schedule a reconnect when quality drops to `disconnected`.
    pub auto_reconnect: bool,
    /// Delay before a scheduled automatic reconnect runs.
    pub reconnect_delay: Duration,
    /// Pause between closing channels and reopening them.
    pub settle_delay: Duration,
    /// Cap on consecutive automatic attempts; `None` is unbounded.
    pub max_reconnect_attempts: Option<u32>,
    /// Ratios used to label connection quality.
    pub thresholds: QualityThresholds,
    /// Max queued control messages.
    pub control_queue_capacity: usize,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            auto_reconnect: false,
            reconnect_delay: Duration::from_secs(30),
            settle_delay: Duration::from_secs(1),
            max_reconnect_attempts: None,
            thresholds: QualityThresholds::default(),
            control_queue_capacity: 1024,
        }
    }
}

#[derive(Debug)]
enum ControlMsg {
    ChannelStateChanged { topic: Topic, state: ChannelState },
    Reconnect,
    Shutdown,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy)]
struct Assessment {
    quality: ConnectionQuality,
    tracked: usize,
}

impl Assessment {
    fn needs_reconnect(self) -> bool {
        self.quality == ConnectionQuality::Disconnected && self.tracked > 0
    }
}

struct MonitorShared {
    registry: SubscriptionRegistry,
    cfg: HealthMonitorConfig,
    state: Mutex<ConnectionState>,
    observers: Mutex<BTreeMap<u64, ConnectionStatusCallback>>,
    next_observer: AtomicU64,
}

impl MonitorShared {
    /// Recomputes the connection state from the registry's channels.
    ///
    /// Observers are notified on every heartbeat and whenever the state
    /// changed outside of one.
    fn refresh(&self, heartbeat: bool) -> Assessment {
        let channels = self.registry.channel_states();
        let states: Vec<ChannelState> = channels.iter().map(|(_, s)| *s).collect();
        let (connected, tracked, quality) = assess(&states, &self.cfg.thresholds);
        let subscriptions: Vec<String> = channels.iter().map(|(t, _)| t.channel_name()).collect();

        let (snapshot, previous, changed) = {
            let mut state = lock(&self.state);
            let previous = state.connection_quality;
            let changed = state.is_connected != (connected > 0)
                || state.connection_quality != quality
                || state.subscriptions != subscriptions;
            state.is_connected = connected > 0;
            state.connection_quality = quality;
            state.subscriptions = subscriptions;
            if heartbeat {
                state.last_heartbeat = Some(Utc::now());
            }
            (state.clone(), previous, changed)
        };

        if previous != quality {
            info!(from = %previous, to = %quality, connected, tracked, "connection quality changed");
        }
        if heartbeat || changed {
            self.notify(&snapshot);
        }
        Assessment { quality, tracked }
    }

    fn notify(&self, state: &ConnectionState) {
        let observers: Vec<ConnectionStatusCallback> = lock(&self.observers).values().cloned().collect();
        for observer in observers {
            observer(state);
        }
    }

    fn record_attempt(&self) -> u32 {
        let mut state = lock(&self.state);
        state.reconnect_attempts = state.reconnect_attempts.saturating_add(1);
        state.reconnect_attempts
    }

    fn remove_observer(&self, id: u64) {
        lock(&self.observers).remove(&id);
    }

    /// Closes every channel, waits for the settle delay, then reopens the
    /// channels of every topic that still has callbacks.
    ///
    /// Returns `false` if shutdown was requested while settling.
    fn reconnect(&self, control_rx: &Receiver<ControlMsg>) -> bool {
        let closed = self.registry.reset_channels();
        if !settle(control_rx, self.cfg.settle_delay) {
            return false;
        }
        let opened = self.registry.reattach();
        let assessment = self.refresh(false);
        info!(closed, opened, quality = %assessment.quality, "reconnect finished");
        true
    }
}

/// Waits out `delay` while draining the control queue. Messages other than
/// shutdown are dropped; the state is recomputed once the wait ends.
fn settle(control_rx: &Receiver<ControlMsg>, delay: Duration) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        match control_rx.recv_deadline(deadline) {
            Ok(ControlMsg::Shutdown) | Err(RecvTimeoutError::Disconnected) => return false,
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) => return true,
        }
    }
}

/// Disposer for a connection status observer. Dropping it unsubscribes.
#[must_use = "dropping a ConnectionStatusSubscription unsubscribes its observer"]
pub struct ConnectionStatusSubscription {
    id: u64,
    monitor: Weak<MonitorShared>,
    unsubscribed: AtomicBool,
}

impl ConnectionStatusSubscription {
    /// Removes the observer. Idempotent.
    pub fn unsubscribe(&self) {
        if self.unsubscribed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(shared) = self.monitor.upgrade() {
            shared.remove_observer(self.id);
        }
    }
}

impl Drop for ConnectionStatusSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for ConnectionStatusSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionStatusSubscription")
            .field("id", &self.id)
            .field("unsubscribed", &self.unsubscribed.load(Ordering::Acquire))
            .finish()
    }
}

/// Aggregates channel liveness and drives reconnection.
///
/// Dropping the monitor stops its worker thread.
pub struct ConnectionHealthMonitor {
    shared: Arc<MonitorShared>,
    control_tx: Sender<ControlMsg>,
    listener_id: u64,
    worker: Option<ThreadId>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionHealthMonitor {
    /// Starts monitoring `registry`.
    ///
    /// # Errors
    /// `Internal` if the worker thread cannot be spawned.
    pub fn new(registry: SubscriptionRegistry, cfg: HealthMonitorConfig) -> SyncResult<Self> {
        let (control_tx, control_rx) = bounded::<ControlMsg>(cfg.control_queue_capacity.max(1));

        let shared = Arc::new(MonitorShared {
            registry: registry.clone(),
            cfg,
            state: Mutex::new(ConnectionState::default()),
            observers: Mutex::new(BTreeMap::new()),
            next_observer: AtomicU64::new(0),
        });

        let thread_shared = Arc::clone(&shared);
        let join = thread::Builder::new()
            .name("statussync-health".to_string())
            .spawn(move || worker_loop(&thread_shared, &control_rx))
            .map_err(|e| SyncError::internal(format!("failed to spawn health monitor worker: {e}")))?;
        let worker = Some(join.thread().id());

        let listener_tx = control_tx.clone();
        let listener_id = registry.add_state_listener(Arc::new(move |topic: Topic, state: ChannelState| {
            match listener_tx.try_send(ControlMsg::ChannelStateChanged { topic, state }) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                Err(TrySendError::Full(_)) => {
                    // The next heartbeat picks the change up.
                    debug!(topic = %topic, state = %state, "health control queue full; state change deferred");
                }
            }
        }));

        Ok(Self {
            shared,
            control_tx,
            listener_id,
            worker,
            join: Mutex::new(Some(join)),
        })
    }

    /// Snapshot of the aggregated connection state.
    #[must_use]
    pub fn current_state(&self) -> ConnectionState {
        lock(&self.shared.state).clone()
    }

    /// Registers `callback` for connection state updates and invokes it once
    /// with the current state before returning.
    pub fn subscribe(&self, callback: ConnectionStatusCallback) -> ConnectionStatusSubscription {
        let id = self.shared.next_observer.fetch_add(1, Ordering::Relaxed) + 1;
        lock(&self.shared.observers).insert(id, Arc::clone(&callback));
        callback(&self.current_state());
        ConnectionStatusSubscription {
            id,
            monitor: Arc::downgrade(&self.shared),
            unsubscribed: AtomicBool::new(false),
        }
    }

    /// Requests an immediate reconnect of every tracked channel.
    ///
    /// The attempt is counted before this returns; the reconnect itself runs
    /// on the worker thread.
    ///
    /// # Errors
    /// `Internal` if the worker has stopped or its queue is full.
    pub fn reconnect_all(&self) -> SyncResult<()> {
        let attempt = self.shared.record_attempt();
        info!(attempt, "manual reconnect requested");
        self.control_tx.try_send(ControlMsg::Reconnect).map_err(|e| match e {
            TrySendError::Full(_) => SyncError::internal("health monitor control queue is full"),
            TrySendError::Disconnected(_) => SyncError::internal("health monitor worker has stopped"),
        })
    }

    /// Monitor configuration.
    #[must_use]
    pub fn config(&self) -> &HealthMonitorConfig {
        &self.shared.cfg
    }
}

impl std::fmt::Debug for ConnectionHealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHealthMonitor")
            .field("state", &self.current_state())
            .finish_non_exhaustive()
    }
}

impl Drop for ConnectionHealthMonitor {
    fn drop(&mut self) {
        self.shared.registry.remove_state_listener(self.listener_id);
        let _ = self.control_tx.try_send(ControlMsg::Shutdown);

        // Release our sender so the worker also stops on disconnect.
        let (dummy_tx, _) = bounded::<ControlMsg>(1);
        drop(std::mem::replace(&mut self.control_tx, dummy_tx));

        let handle = lock(&self.join).take();
        if let Some(handle) = handle {
            // An observer dropping the last handle runs on the worker itself.
            if Some(thread::current().id()) == self.worker {
                return;
            }
            if handle.join().is_err() {
                warn!("health monitor worker panicked");
            }
        }
    }
}

fn worker_loop(shared: &MonitorShared, control_rx: &Receiver<ControlMsg>) {
    let cfg = shared.cfg.clone();
    let heartbeat = cfg.heartbeat_interval.max(Duration::from_millis(1));
    let mut next_heartbeat = Instant::now() + heartbeat;
    let mut pending_reconnect: Option<Instant> = None;
    let mut consecutive: u32 = 0;
    let may_schedule =
        |consecutive: u32| cfg.auto_reconnect && cfg.max_reconnect_attempts.map_or(true, |max| consecutive < max);

    loop {
        let wake = pending_reconnect.map_or(next_heartbeat, |at| at.min(next_heartbeat));
        let timeout = wake.saturating_duration_since(Instant::now());

        select! {
            recv(control_rx) -> msg => {
                match msg {
                    Ok(ControlMsg::ChannelStateChanged { topic, state }) => {
                        debug!(topic = %topic, state = %state, "channel state change observed");
                        let assessment = shared.refresh(false);
                        if assessment.needs_reconnect() {
                            if may_schedule(consecutive) {
                                // A further disconnect reschedules instead of stacking attempts.
                                pending_reconnect = Some(Instant::now() + cfg.reconnect_delay);
                            }
                        } else if assessment.quality != ConnectionQuality::Disconnected {
                            consecutive = 0;
                            pending_reconnect = None;
                        }
                    }
                    Ok(ControlMsg::Reconnect) => {
                        pending_reconnect = None;
                        info!("running manual reconnect");
                        if !shared.reconnect(control_rx) {
                            break;
                        }
                    }
                    Ok(ControlMsg::Shutdown) | Err(_) => break,
                }
            }
            default(timeout) => {}
        }

        let now = Instant::now();
        if now >= next_heartbeat {
            next_heartbeat = now + heartbeat;
            let assessment = shared.refresh(true);
            if assessment.needs_reconnect() {
                if pending_reconnect.is_none() && may_schedule(consecutive) {
                    pending_reconnect = Some(now + cfg.reconnect_delay);
                }
            } else if assessment.quality != ConnectionQuality::Disconnected {
                consecutive = 0;
                pending_reconnect = None;
            }
        }

        if pending_reconnect.is_some_and(|at| now >= at) {
            pending_reconnect = None;
            consecutive += 1;
            let attempt = shared.record_attempt();
            info!(attempt, consecutive, "running automatic reconnect");
            if !shared.reconnect(control_rx) {
                break;
            }
            if !may_schedule(consecutive) && cfg.auto_reconnect {
                warn!(consecutive, "automatic reconnect limit reached; waiting for manual reconnect");
            }
        }
    }
    debug!("health monitor worker stopped");
}
