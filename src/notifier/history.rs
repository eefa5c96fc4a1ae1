//! History store contract and in-memory backend.

use std::collections::HashSet;
use std::sync::{Mutex, RwLock};

use uuid::Uuid;

use crate::error::StoreError;
use crate::event::StatusUpdate;

/// Audit/history collaborator that durably records committed status changes.
///
/// # Safety Considerations
/// - `record` must be durable when it returns `Ok`; the notifier emits the
///   change to observers only after that.
/// - Implementations must be safe for concurrent callers.
pub trait HistoryStore: Send + Sync {
    /// Records one committed status change.
    ///
    /// # Errors
    /// `Unavailable` for transient failures, `DuplicateEntry` if an update
    /// with the same id was already recorded, `Backend`/`Serialization` for
    /// anything else.
    fn record(&self, update: &StatusUpdate) -> Result<(), StoreError>;
}

fn lock_err(context: &'static str) -> StoreError {
    StoreError::Backend(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct HistoryState {
    entries: Vec<StatusUpdate>,
    ids: HashSet<Uuid>,
}

/// Thread-safe in-memory [`HistoryStore`].
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    state: RwLock<HistoryState>,
    fail_next: Mutex<Option<StoreError>>,
}

impl MemoryHistoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `record` call fail with `error`.
    pub fn fail_next(&self, error: StoreError) {
        if let Ok(mut slot) = self.fail_next.lock() {
            *slot = Some(error);
        }
    }

    /// All recorded updates in commit order.
    ///
    /// # Errors
    /// `Backend` if the store lock is poisoned.
    pub fn entries(&self) -> Result<Vec<StatusUpdate>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("history_state"))?;
        Ok(state.entries.clone())
    }

    /// Recorded updates for one record, in commit order.
    ///
    /// # Errors
    /// `Backend` if the store lock is poisoned.
    pub fn for_record(&self, record_id: &str) -> Result<Vec<StatusUpdate>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("history_state"))?;
        Ok(state
            .entries
            .iter()
            .filter(|u| u.record_id == record_id)
            .cloned()
            .collect())
    }

    /// Number of recorded updates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().map_or(0, |s| s.entries.len())
    }

    /// True when nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn record(&self, update: &StatusUpdate) -> Result<(), StoreError> {
        if let Some(error) = self.fail_next.lock().map_err(|_| lock_err("history_fail_next"))?.take() {
            return Err(error);
        }

        let mut state = self.state.write().map_err(|_| lock_err("history_state"))?;
        if !state.ids.insert(update.id) {
            return Err(StoreError::DuplicateEntry(update.id.to_string()));
        }
        state.entries.push(update.clone());
        Ok(())
    }
}
