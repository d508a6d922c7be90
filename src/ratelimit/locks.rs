//! Per-key locks guarding each key's window log.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use super::window::WindowLog;

/// Shared handle to one key's lock and the window log it protects.
pub type KeyState = Arc<Mutex<WindowLog>>;

/// Lazily created per-key locks.
///
/// Each key owns one mutex around its [`WindowLog`]; operations on different
/// keys never wait on each other. Creation goes through the map's entry API,
/// so concurrent first access to a key always observes the same lock.
#[derive(Debug, Default)]
pub struct KeyLockTable {
    states: DashMap<String, KeyState>,
}

impl KeyLockTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the lock for `key`, creating it on first use.
    pub fn get_or_create(&self, key: &str) -> KeyState {
        if let Some(state) = self.states.get(key) {
            return Arc::clone(state.value());
        }

        let state = self.states.entry(key.to_string()).or_insert_with(|| {
            debug!(key = %key, "Creating window state");
            Arc::new(Mutex::new(WindowLog::new()))
        });
        Arc::clone(state.value())
    }

    /// Number of keys with live state.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// True when no key has state.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Remove idle keys, returning how many were dropped.
    ///
    /// `prune` receives the key and its locked log; it should evict stale
    /// entries and return true if the log may be discarded. A key is only
    /// offered to `prune` when no caller holds its handle and its lock is
    /// free. Both are checked under the map's shard write lock, which also
    /// blocks new lookups of that key until the decision is made.
    pub fn reap_idle<F>(&self, mut prune: F) -> usize
    where
        F: FnMut(&str, &mut WindowLog) -> bool,
    {
        let before = self.states.len();

        self.states.retain(|key, state| {
            if Arc::strong_count(state) > 1 {
                return true;
            }
            let Some(mut log) = state.try_lock() else {
                return true;
            };
            !prune(key.as_str(), &mut *log)
        });

        before.saturating_sub(self.states.len())
    }
}
