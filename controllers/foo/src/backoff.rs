//! # Fibonacci Backoff
//!
//! Requeue delays for failed reconciliations. Delays grow along the
//! Fibonacci sequence, more slowly than exponential backoff, so a Foo that
//! keeps failing is retried regularly without hammering the API server.
//!
//! Sequence with the defaults: 1s, 1s, 2s, 3s, 5s, 8s, 13s, 21s, 34s, 55s, 60s (max).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Smallest requeue delay, in seconds
pub const MIN_BACKOFF_SECS: u64 = 1;

/// Largest requeue delay, in seconds
pub const MAX_BACKOFF_SECS: u64 = 60;

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two, capped at `max_seconds`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Minimum backoff value in seconds (for reset)
    min_seconds: u64,
    /// Previous backoff value in seconds
    prev_seconds: u64,
    /// Current backoff value in seconds
    current_seconds: u64,
    /// Maximum backoff value in seconds
    max_seconds: u64,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff with specified minimum and maximum values in seconds
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            prev_seconds: 0,
            current_seconds: min_seconds,
            max_seconds,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_seconds;

        let next = self.prev_seconds.saturating_add(self.current_seconds);
        self.prev_seconds = self.current_seconds;
        self.current_seconds = next.min(self.max_seconds);

        Duration::from_secs(result)
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev_seconds = 0;
        self.current_seconds = self.min_seconds;
    }
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(MIN_BACKOFF_SECS, MAX_BACKOFF_SECS)
    }
}

/// Backoff state per object (namespace/name -> FibonacciBackoff)
#[derive(Debug, Default)]
pub struct RequeueBackoff {
    states: Mutex<HashMap<String, FibonacciBackoff>>,
}

impl RequeueBackoff {
    /// Creates an empty backoff table.
    pub fn new() -> Self {
        Self::default()
    }

    fn states(&self) -> MutexGuard<'_, HashMap<String, FibonacciBackoff>> {
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Delay before retrying `key` after another failure
    pub fn next(&self, key: &str) -> Duration {
        self.states()
            .entry(key.to_string())
            .or_default()
            .next_backoff()
    }

    /// Forget the failures of `key` after a successful pass
    pub fn reset(&self, key: &str) {
        if let Some(backoff) = self.states().get_mut(key) {
            backoff.reset();
        }
    }
}
