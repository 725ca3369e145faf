//! Bounded exponential backoff for polling intervals.

use std::time::Duration;

/// Integer backoff multiplier that doubles on failure up to a ceiling.
///
/// The effective polling interval is `base * current()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffMultiplier {
    current: u32,
    max: u32,
}

impl BackoffMultiplier {
    /// Creates a multiplier starting at 1, capping at `max` (at least 1).
    pub fn new(max: u32) -> Self {
        Self {
            current: 1,
            max: max.max(1),
        }
    }

    /// Returns the current multiplier.
    pub fn current(&self) -> u32 {
        self.current
    }

    /// Returns the ceiling.
    pub fn max(&self) -> u32 {
        self.max
    }

    /// Returns true once further failures can no longer grow the interval.
    pub fn is_saturated(&self) -> bool {
        self.current >= self.max
    }

    /// Doubles the multiplier, capped at max.
    ///
    /// Returns true if the value changed.
    pub fn escalate(&mut self) -> bool {
        if self.is_saturated() {
            return false;
        }
        self.current = self.current.saturating_mul(2).min(self.max);
        true
    }

    /// Resets the multiplier to 1.
    ///
    /// Returns true if the value changed.
    pub fn reset(&mut self) -> bool {
        if self.current == 1 {
            return false;
        }
        self.current = 1;
        true
    }

    /// Returns `base` scaled by the current multiplier.
    pub fn interval(&self, base: Duration) -> Duration {
        base.saturating_mul(self.current)
    }
}

impl Default for BackoffMultiplier {
    fn default() -> Self {
        Self::new(8)
    }
}
