//! Per-key limit configuration with a process-wide default.

use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

use super::limit::Limit;
use crate::error::Result;

/// Maps keys to their configured [`Limit`].
///
/// Keys without an override resolve to the default supplied at construction.
/// Overrides are replaced wholesale, so a reader sees either the old limit or
/// the new one, never a mix.
#[derive(Debug)]
pub struct LimitRegistry {
    default: Limit,
    overrides: DashMap<String, Limit>,
}

impl LimitRegistry {
    /// Create a registry with the given default limit.
    pub fn new(default: Limit) -> Self {
        Self {
            default,
            overrides: DashMap::new(),
        }
    }

    /// Install or replace the limit for `key`.
    ///
    /// Validation happens before anything is published, so a rejected call
    /// leaves the registry untouched.
    pub fn set_limit(&self, key: &str, max_admissions: u32, window: Duration) -> Result<()> {
        let limit = Limit::new(max_admissions, window)?;
        self.insert(key, limit);
        Ok(())
    }

    /// Install an already validated limit.
    pub fn insert(&self, key: &str, limit: Limit) {
        debug!(
            key = %key,
            max_admissions = limit.max_admissions(),
            window = ?limit.window(),
            "Installing limit"
        );
        self.overrides.insert(key.to_string(), limit);
    }

    /// Resolve the limit for `key`.
    pub fn get_limit(&self, key: &str) -> Limit {
        self.overrides
            .get(key)
            .map(|entry| *entry.value())
            .unwrap_or(self.default)
    }

    /// Drop the override for `key`, returning it to the default limit.
    pub fn remove_limit(&self, key: &str) -> Option<Limit> {
        self.overrides.remove(key).map(|(_, limit)| limit)
    }

    /// The limit used for keys without an override.
    pub fn default_limit(&self) -> Limit {
        self.default
    }

    /// Number of keys with an explicit override.
    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }
}
