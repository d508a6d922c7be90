//! Limit definitions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GateError, Result};

/// Maximum admissions allowed within a trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Limit {
    max_admissions: u32,
    window: Duration,
}

impl Limit {
    /// Create a validated limit.
    ///
    /// `max_admissions == 0` is accepted and rejects every request. A zero
    /// window is an [`GateError::InvalidConfiguration`].
    pub fn new(max_admissions: u32, window: Duration) -> Result<Self> {
        if window.is_zero() {
            return Err(GateError::InvalidConfiguration(
                "window must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            max_admissions,
            window,
        })
    }

    /// Maximum admissions per window.
    pub fn max_admissions(&self) -> u32 {
        self.max_admissions
    }

    /// Length of the trailing window.
    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Untyped limit as it appears in configuration files.
///
/// Signed fields so that negative values parse and are then reported as
/// configuration errors instead of deserialization failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSpec {
    /// Maximum admissions allowed in the window
    pub max_admissions: i64,
    /// Window length in milliseconds
    pub window_ms: i64,
}

impl Default for LimitSpec {
    fn default() -> Self {
        Self {
            max_admissions: 5,
            window_ms: 2000,
        }
    }
}

impl TryFrom<LimitSpec> for Limit {
    type Error = GateError;

    fn try_from(spec: LimitSpec) -> Result<Self> {
        if spec.max_admissions < 0 {
            return Err(GateError::InvalidConfiguration(format!(
                "max_admissions must not be negative, got {}",
                spec.max_admissions
            )));
        }
        let max_admissions = u32::try_from(spec.max_admissions).map_err(|_| {
            GateError::InvalidConfiguration(format!(
                "max_admissions {} exceeds {}",
                spec.max_admissions,
                u32::MAX
            ))
        })?;

        if spec.window_ms <= 0 {
            return Err(GateError::InvalidConfiguration(format!(
                "window_ms must be positive, got {}",
                spec.window_ms
            )));
        }

        Limit::new(max_admissions, Duration::from_millis(spec.window_ms as u64))
    }
}

impl From<Limit> for LimitSpec {
    fn from(limit: Limit) -> Self {
        Self {
            max_admissions: i64::from(limit.max_admissions),
            window_ms: i64::try_from(limit.window.as_millis()).unwrap_or(i64::MAX),
        }
    }
}
