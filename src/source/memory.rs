//! In-memory change-event source.
//!
//! Thread-safe in-process transport intended for embedded usage, tests, and as
//! a reference implementation of the [`ChangeEventSource`] contract. Tests
//! drive it by injecting row changes and state transitions; broadcast messages
//! loop back to every open channel with the same name.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::error::ChannelError;
use crate::source::traits::{
    ChangeEventSource, ChannelEvent, ChannelEventHandler, ChannelHandle, ChannelKind, ChannelSpec,
    ChannelState, RawChange,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct MemoryChannel {
    spec: ChannelSpec,
    handler: ChannelEventHandler,
    state: ChannelState,
}

#[derive(Default)]
struct MemoryState {
    channels: BTreeMap<u64, MemoryChannel>,
    next_id: u64,
    fail_next_open: Option<String>,
    initial_state: Option<ChannelState>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<MemoryState>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl Shared {
    fn handlers_for(&self, name: &str, new_state: Option<ChannelState>) -> Vec<ChannelEventHandler> {
        let mut st = lock(&self.state);
        st.channels
            .values_mut()
            .filter(|c| c.spec.name == name)
            .map(|c| {
                if let Some(s) = new_state {
                    c.state = s;
                }
                Arc::clone(&c.handler)
            })
            .collect()
    }
}

/// In-memory [`ChangeEventSource`].
#[derive(Clone, Default)]
pub struct MemoryEventSource {
    shared: Arc<Shared>,
}

impl MemoryEventSource {
    /// Creates a source whose channels start `Subscribed`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the state newly opened channels start in.
    pub fn set_initial_state(&self, state: ChannelState) {
        lock(&self.shared.state).initial_state = Some(state);
    }

    /// Makes the next `open_channel` call fail with `message`.
    pub fn fail_next_open(&self, message: impl Into<String>) {
        lock(&self.shared.state).fail_next_open = Some(message.into());
    }

    /// Delivers a row change to every open channel named `name`.
    ///
    /// Returns the number of channels it was delivered to.
    pub fn emit(&self, name: &str, change: RawChange) -> usize {
        let handlers = self.shared.handlers_for(name, None);
        for h in &handlers {
            h(ChannelEvent::Change(change.clone()));
        }
        handlers.len()
    }

    /// Moves every open channel named `name` to `state` and notifies its handler.
    ///
    /// Returns the number of channels affected.
    pub fn set_state(&self, name: &str, state: ChannelState) -> usize {
        let handlers = self.shared.handlers_for(name, Some(state));
        for h in &handlers {
            h(ChannelEvent::State(state));
        }
        handlers.len()
    }

    /// Total `open_channel` calls that succeeded.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Total channels closed.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Names of the currently open channels, one entry per channel.
    #[must_use]
    pub fn open_channels(&self) -> Vec<String> {
        lock(&self.shared.state)
            .channels
            .values()
            .map(|c| c.spec.name.clone())
            .collect()
    }
}

impl ChangeEventSource for MemoryEventSource {
    fn open_channel(
        &self,
        spec: &ChannelSpec,
        handler: ChannelEventHandler,
    ) -> Result<Box<dyn ChannelHandle>, ChannelError> {
        let mut st = lock(&self.shared.state);
        if let Some(message) = st.fail_next_open.take() {
            return Err(ChannelError::OpenFailed {
                topic: spec.name.clone(),
                message,
            });
        }

        st.next_id += 1;
        let id = st.next_id;
        let state = st.initial_state.unwrap_or(ChannelState::Subscribed);
        st.channels.insert(
            id,
            MemoryChannel {
                spec: spec.clone(),
                handler,
                state,
            },
        );
        self.shared.opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemoryChannelHandle {
            id,
            spec: spec.clone(),
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct MemoryChannelHandle {
    id: u64,
    spec: ChannelSpec,
    shared: Arc<Shared>,
}

impl ChannelHandle for MemoryChannelHandle {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn state(&self) -> ChannelState {
        lock(&self.shared.state)
            .channels
            .get(&self.id)
            .map_or(ChannelState::Closed, |c| c.state)
    }

    fn send(&self, message: Value) -> Result<(), ChannelError> {
        if self.spec.kind != ChannelKind::Broadcast {
            return Err(ChannelError::BroadcastUnsupported {
                topic: self.spec.name.clone(),
            });
        }

        let handlers = {
            let st = lock(&self.shared.state);
            match st.channels.get(&self.id) {
                Some(c) if c.state.is_connected() => {}
                _ => {
                    return Err(ChannelError::Closed {
                        topic: self.spec.name.clone(),
                    })
                }
            }
            st.channels
                .values()
                .filter(|c| c.spec.name == self.spec.name && c.state.is_connected())
                .map(|c| Arc::clone(&c.handler))
                .collect::<Vec<_>>()
        };

        for h in handlers {
            h(ChannelEvent::Broadcast(message.clone()));
        }
        Ok(())
    }

    fn close(&self) {
        let removed = lock(&self.shared.state).channels.remove(&self.id);
        if removed.is_some() {
            self.shared.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
