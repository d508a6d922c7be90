//! Sliding window log of admission timestamps.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::warn;

use super::limit::Limit;

/// Point-in-time view of a key's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    /// Admissions currently inside the window
    pub count: u32,
    /// Time until the oldest counted admission leaves the window
    pub ttl: Duration,
}

impl Usage {
    /// Usage of a key with no admissions in its window.
    pub const EMPTY: Usage = Usage {
        count: 0,
        ttl: Duration::ZERO,
    };
}

/// Ordered admission timestamps for a single key.
///
/// Timestamps are appended at the tail only and are nondecreasing, so stale
/// entries are always at the head.
#[derive(Debug, Default)]
pub struct WindowLog {
    entries: VecDeque<Duration>,
}

impl WindowLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every entry at or before `now - window`.
    pub fn evict(&mut self, now: Duration, window: Duration) {
        // Nothing can be stale before a full window has elapsed since the epoch.
        let Some(boundary) = now.checked_sub(window) else {
            return;
        };

        while let Some(&oldest) = self.entries.front() {
            if oldest > boundary {
                break;
            }
            self.entries.pop_front();
        }
    }

    /// Evict, then record an admission at `now` if the limit has room.
    pub fn try_admit(&mut self, now: Duration, limit: &Limit) -> bool {
        self.evict(now, limit.window());

        if self.entries.len() >= limit.max_admissions() as usize {
            return false;
        }

        let stamp = match self.entries.back() {
            Some(&newest) if newest > now => {
                warn!(
                    now = ?now,
                    newest = ?newest,
                    "Clock moved backwards, clamping admission timestamp"
                );
                newest
            }
            _ => now,
        };
        self.entries.push_back(stamp);
        true
    }

    /// Evict, then report count and time-to-live of the oldest entry.
    pub fn snapshot(&mut self, now: Duration, window: Duration) -> Usage {
        self.evict(now, window);

        let Some(&oldest) = self.entries.front() else {
            return Usage::EMPTY;
        };

        // A window too long to represent never expires within the clock's range.
        let ttl = oldest
            .checked_add(window)
            .map_or(Duration::MAX, |expires| expires.saturating_sub(now));

        Usage {
            count: self.len(),
            ttl,
        }
    }

    /// Number of recorded admissions, stale or not.
    pub fn len(&self) -> u32 {
        // Bounded by a u32 limit after every admission.
        self.entries.len() as u32
    }

    /// True when no admissions are recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
