use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use super::topic::Topic;
use super::{CallbackId, RegistryShared};

/// Disposer for one registered callback.
///
/// Dropping the handle unsubscribes. Call [`Subscription::unsubscribe`] to
/// do it explicitly; both paths are idempotent.
#[must_use = "dropping a Subscription unsubscribes its callback"]
pub struct Subscription {
    topic: Topic,
    id: CallbackId,
    registry: Weak<RegistryShared>,
    unsubscribed: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(topic: Topic, id: CallbackId, registry: Weak<RegistryShared>) -> Self {
        Self {
            topic,
            id,
            registry,
            unsubscribed: AtomicBool::new(false),
        }
    }

    /// Topic the callback is registered on.
    #[must_use]
    pub const fn topic(&self) -> Topic {
        self.topic
    }

    /// Identity of the registered callback.
    #[must_use]
    pub const fn id(&self) -> CallbackId {
        self.id
    }

    /// Removes the callback. Events arriving after this returns are not
    /// delivered to it.
    pub fn unsubscribe(&self) {
        if self.unsubscribed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(shared) = self.registry.upgrade() {
            shared.remove_callback(self.topic, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .field("unsubscribed", &self.unsubscribed.load(Ordering::Acquire))
            .finish()
    }
}
