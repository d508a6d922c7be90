//! Core admission engine.

use std::time::Duration;

use tracing::{debug, info, trace};

use super::clock::{Clock, MonotonicClock};
use super::limit::Limit;
use super::locks::KeyLockTable;
use super::registry::LimitRegistry;
use super::window::Usage;
use crate::config::GateConfig;
use crate::error::Result;

/// Outcome of [`AdmissionEngine::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request was admitted and recorded.
    Allowed {
        /// Admissions left in the current window after this one
        remaining: u32,
    },
    /// The request was rejected and nothing was recorded.
    Rejected {
        /// Time until the oldest admission leaves the window
        retry_after: Duration,
    },
}

impl Decision {
    /// True for [`Decision::Allowed`].
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Exact sliding-window admission control keyed by caller-supplied strings.
///
/// This struct is thread-safe and is meant to be shared (e.g. behind an
/// `Arc`) by every caller in a process or subsystem. Calls for the same key
/// are serialized by that key's lock; calls for different keys run in
/// parallel.
pub struct AdmissionEngine<C: Clock = MonotonicClock> {
    clock: C,
    registry: LimitRegistry,
    locks: KeyLockTable,
}

impl AdmissionEngine<MonotonicClock> {
    /// Create an engine on real time with the given default limit.
    pub fn new(default: Limit) -> Self {
        Self::with_clock(default, MonotonicClock::new())
    }

    /// Build an engine from validated configuration, installing every
    /// per-key override it lists.
    pub fn from_config(config: &GateConfig) -> Result<Self> {
        let default = Limit::try_from(config.default_limit)?;
        let engine = Self::new(default);

        for entry in &config.limits {
            engine.registry.insert(&entry.key, Limit::try_from(entry.spec())?);
        }

        info!(
            max_admissions = default.max_admissions(),
            window = ?default.window(),
            overrides = engine.registry.override_count(),
            "Admission engine configured"
        );
        Ok(engine)
    }
}

impl<C: Clock> AdmissionEngine<C> {
    /// Create an engine reading time from `clock`.
    pub fn with_clock(default: Limit, clock: C) -> Self {
        Self {
            clock,
            registry: LimitRegistry::new(default),
            locks: KeyLockTable::new(),
        }
    }

    /// Install or replace the limit for `key`.
    ///
    /// Takes effect for every decision that resolves its limit afterwards.
    /// Admissions already recorded for the key are kept and counted against
    /// the new limit.
    pub fn set_limit(&self, key: &str, max_admissions: u32, window: Duration) -> Result<()> {
        self.registry.set_limit(key, max_admissions, window)
    }

    /// The limit currently in force for `key`.
    pub fn get_limit(&self, key: &str) -> Limit {
        self.registry.get_limit(key)
    }

    /// Drop the override for `key`, returning it to the default limit.
    pub fn remove_limit(&self, key: &str) -> Option<Limit> {
        self.registry.remove_limit(key)
    }

    /// Decide whether one unit of work for `key` may proceed.
    ///
    /// On `true` the admission is recorded and counts against the key until
    /// it ages out of the window.
    pub fn allow(&self, key: &str) -> bool {
        self.check(key).is_allowed()
    }

    /// Alias of [`AdmissionEngine::allow`].
    pub fn allow_request(&self, key: &str) -> bool {
        self.allow(key)
    }

    /// Like [`AdmissionEngine::allow`], but also reports the remaining
    /// capacity or how long to wait before retrying.
    pub fn check(&self, key: &str) -> Decision {
        let state = self.locks.get_or_create(key);
        let mut log = state.lock();

        let limit = self.registry.get_limit(key);
        let now = self.clock.now();
        let admitted = log.try_admit(now, &limit);

        trace!(
            key = %key,
            count = log.len(),
            max_admissions = limit.max_admissions(),
            admitted,
            "Checked admission"
        );

        if admitted {
            return Decision::Allowed {
                remaining: limit.max_admissions().saturating_sub(log.len()),
            };
        }

        let retry_after = log.snapshot(now, limit.window()).ttl;
        debug!(
            key = %key,
            retry_after = ?retry_after,
            "Admission rejected"
        );
        Decision::Rejected { retry_after }
    }

    /// Number of admissions inside the key's window and the time until the
    /// oldest one expires. Never records an admission.
    pub fn usage(&self, key: &str) -> Usage {
        let state = self.locks.get_or_create(key);
        let mut log = state.lock();

        let window = self.registry.get_limit(key).window();
        log.snapshot(self.clock.now(), window)
    }

    /// Alias of [`AdmissionEngine::usage`].
    pub fn get_usage(&self, key: &str) -> Usage {
        self.usage(key)
    }

    /// Drop state for keys whose window is empty and whose lock is idle.
    ///
    /// Keys with admissions still inside their window are always kept, so
    /// reaping never resets a quota. Returns the number of keys removed.
    pub fn reap_idle(&self) -> usize {
        let now = self.clock.now();
        let removed = self.locks.reap_idle(|key, log| {
            log.evict(now, self.registry.get_limit(key).window());
            log.is_empty()
        });

        if removed > 0 {
            info!(
                removed,
                remaining = self.locks.len(),
                "Reaped idle keys"
            );
        }
        removed
    }

    /// Number of keys currently holding window state.
    pub fn tracked_keys(&self) -> usize {
        self.locks.len()
    }

    /// The clock this engine reads.
    pub fn clock(&self) -> &C {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    use crate::error::GateError;
    use crate::ratelimit::clock::ManualClock;
    use tokio_test::{assert_err, assert_ok};

    fn engine(max: u32, window: Duration) -> (AdmissionEngine<Arc<ManualClock>>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let engine =
            AdmissionEngine::with_clock(Limit::new(max, window).unwrap(), Arc::clone(&clock));
        (engine, clock)
    }

    #[test]
    fn test_first_n_calls_admitted_then_rejected() {
        let (engine, clock) = engine(5, Duration::from_secs(2));

        let results: Vec<bool> = (0..5).map(|_| engine.allow("user:alice")).collect();
        assert_eq!(results, vec![true; 5]);
        assert!(!engine.allow("user:alice"));

        clock.advance(Duration::from_millis(2100));
        assert!(engine.allow("user:alice"));
    }

    #[test]
    fn test_window_recovery_is_per_admission() {
        let (engine, clock) = engine(2, Duration::from_secs(1));

        assert!(engine.allow("k"));
        clock.advance(Duration::from_millis(500));
        assert!(engine.allow("k"));
        assert!(!engine.allow("k"));

        // Only the first admission has aged out.
        clock.advance(Duration::from_millis(500));
        assert!(engine.allow("k"));
        assert!(!engine.allow("k"));
    }

    #[test]
    fn test_zero_limit_rejects_everything() {
        let (engine, clock) = engine(5, Duration::from_secs(2));
        assert_ok!(engine.set_limit("blocked", 0, Duration::from_secs(1)));

        for _ in 0..10 {
            assert!(!engine.allow("blocked"));
            clock.advance(Duration::from_millis(700));
        }
        assert_eq!(engine.usage("blocked"), Usage::EMPTY);
    }

    #[test]
    fn test_lowering_limit_keeps_existing_admissions() {
        let (engine, clock) = engine(5, Duration::from_secs(2));

        assert!(engine.allow("k"));
        assert!(engine.allow("k"));
        assert_ok!(engine.set_limit("k", 1, Duration::from_secs(2)));

        assert!(!engine.allow("k"));
        assert_eq!(engine.usage("k").count, 2);

        clock.advance(Duration::from_secs(2));
        assert!(engine.allow("k"));
        assert!(!engine.allow("k"));
    }

    #[test]
    fn test_huge_window_never_panics() {
        let (engine, clock) = engine(5, Duration::from_secs(2));
        assert_ok!(engine.set_limit("k", 1, Duration::MAX));
        clock.advance(Duration::from_secs(1));

        assert!(engine.allow("k"));
        assert_eq!(
            engine.usage("k"),
            Usage {
                count: 1,
                ttl: Duration::MAX
            }
        );
        assert_eq!(
            engine.check("k"),
            Decision::Rejected {
                retry_after: Duration::MAX
            }
        );
    }

    #[test]
    fn test_invalid_limit_is_rejected() {
        let (engine, _clock) = engine(5, Duration::from_secs(2));
        let err = assert_err!(engine.set_limit("k", 3, Duration::ZERO));
        assert!(matches!(err, GateError::InvalidConfiguration(_)));
        assert_eq!(engine.get_limit("k").max_admissions(), 5);
    }

    #[test]
    fn test_usage_reports_count_and_ttl() {
        let (engine, clock) = engine(5, Duration::from_secs(2));

        assert_eq!(engine.usage("k"), Usage::EMPTY);

        engine.allow("k");
        clock.advance(Duration::from_millis(300));
        engine.allow("k");
        clock.advance(Duration::from_millis(200));

        let usage = engine.usage("k");
        assert_eq!(usage.count, 2);
        assert_eq!(usage.ttl, Duration::from_millis(1500));

        clock.advance(Duration::from_millis(1500));
        let usage = engine.usage("k");
        assert_eq!(usage.count, 1);
        assert_eq!(usage.ttl, Duration::from_millis(300));
    }

    #[test]
    fn test_usage_never_admits() {
        let (engine, _clock) = engine(1, Duration::from_secs(1));
        for _ in 0..5 {
            engine.usage("k");
        }
        assert!(engine.allow("k"));
    }

    #[test]
    fn test_keys_are_isolated() {
        let (engine, _clock) = engine(5, Duration::from_secs(2));
        assert_ok!(engine.set_limit("a", 2, Duration::from_secs(2)));

        assert!(engine.allow("a"));
        assert!(engine.allow("a"));
        assert!(!engine.allow("a"));

        let results: Vec<bool> = (0..5).map(|_| engine.allow("b")).collect();
        assert_eq!(results, vec![true; 5]);
    }

    #[test]
    fn test_check_reports_remaining_and_retry_after() {
        let (engine, clock) = engine(2, Duration::from_secs(2));

        assert_eq!(engine.check("k"), Decision::Allowed { remaining: 1 });
        clock.advance(Duration::from_millis(500));
        assert_eq!(engine.check("k"), Decision::Allowed { remaining: 0 });
        assert_eq!(
            engine.check("k"),
            Decision::Rejected {
                retry_after: Duration::from_millis(1500)
            }
        );
    }

    #[test]
    fn test_remove_limit_restores_default() {
        let (engine, _clock) = engine(3, Duration::from_secs(1));
        assert_ok!(engine.set_limit("k", 0, Duration::from_secs(1)));
        assert!(!engine.allow("k"));

        engine.remove_limit("k");
        assert!(engine.allow("k"));
    }

    #[test]
    fn test_reap_keeps_keys_with_live_admissions() {
        let (engine, clock) = engine(5, Duration::from_secs(1));

        engine.allow("active");
        engine.usage("idle");
        assert_eq!(engine.tracked_keys(), 2);

        assert_eq!(engine.reap_idle(), 1);
        assert_eq!(engine.usage("active").count, 1);

        clock.advance(Duration::from_secs(1));
        assert_eq!(engine.reap_idle(), 1);
        assert_eq!(engine.tracked_keys(), 0);
    }

    #[test]
    fn test_reaped_key_starts_fresh_with_same_limit() {
        let (engine, clock) = engine(5, Duration::from_secs(1));
        assert_ok!(engine.set_limit("k", 1, Duration::from_secs(1)));

        assert!(engine.allow("k"));
        clock.advance(Duration::from_secs(1));
        assert_eq!(engine.reap_idle(), 1);

        assert!(engine.allow("k"));
        assert!(!engine.allow("k"));
    }

    #[test]
    fn test_concurrent_callers_admit_exactly_limit() {
        const CALLERS: usize = 64;
        const LIMIT: u32 = 10;

        let (engine, _clock) = engine(LIMIT, Duration::from_secs(60));
        let engine = Arc::new(engine);
        let barrier = Arc::new(Barrier::new(CALLERS));
        let accepted = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let barrier = Arc::clone(&barrier);
                let accepted = Arc::clone(&accepted);
                thread::spawn(move || {
                    barrier.wait();
                    if engine.allow("hot") {
                        accepted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(accepted.load(Ordering::SeqCst), LIMIT);
        assert_eq!(engine.usage("hot").count, LIMIT);
    }

    #[test]
    fn test_usage_matches_admissions_under_concurrency() {
        const THREADS: usize = 8;
        const ATTEMPTS: usize = 50;

        let (engine, clock) = engine(100, Duration::from_secs(10));
        let engine = Arc::new(engine);
        let accepted = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let engine = Arc::clone(&engine);
                let clock = Arc::clone(&clock);
                let accepted = Arc::clone(&accepted);
                thread::spawn(move || {
                    for _ in 0..ATTEMPTS {
                        if engine.allow("shared") {
                            accepted.fetch_add(1, Ordering::SeqCst);
                        }
                        engine.allow(&format!("own-{}", i));
                        if i == 0 {
                            clock.advance(Duration::from_millis(1));
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // Total elapsed time stays well inside the window.
        assert_eq!(engine.usage("shared").count, accepted.load(Ordering::SeqCst));
        assert_eq!(accepted.load(Ordering::SeqCst), 100);
        for i in 0..THREADS {
            assert_eq!(engine.usage(&format!("own-{}", i)).count, ATTEMPTS as u32);
        }
    }
}
