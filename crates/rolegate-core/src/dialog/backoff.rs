//! Geometric backoff between invalid dialog replies.

use std::sync::Mutex;
use std::time::Duration;

/// Backoff settings for one dialog.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// First delay. Zero disables backoff entirely.
    pub initial: Duration,
    /// Growth factor applied after every delay. Values below 1 are treated as 1.
    pub factor: f64,
    /// Upper bound on any single delay.
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::ZERO,
            factor: 2.0,
            max: Duration::from_secs(5),
        }
    }
}

impl BackoffConfig {
    pub fn disabled() -> Self {
        Self::default()
    }
}

/// Running backoff state for a single `select` call.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    factor: f64,
    max: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let factor = if config.factor.is_finite() {
            config.factor.max(1.0)
        } else {
            1.0
        };
        Self {
            current: config.initial,
            factor,
            max: config.max,
        }
    }

    /// The delay to apply now, or `None` when backoff is disabled.
    ///
    /// Successive delays are non-decreasing and never exceed `max`.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.current.is_zero() {
            return None;
        }
        let delay = self.current.min(self.max);
        let grown_nanos = delay.as_nanos() as f64 * self.factor;
        let grown = if grown_nanos.is_finite() && grown_nanos < self.max.as_nanos() as f64 {
            Duration::from_nanos(grown_nanos.round() as u64)
        } else {
            self.max
        };
        self.current = grown.max(delay);
        Some(delay)
    }
}

/// Suspension point used for backoff, injectable for tests.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Records requested sleeps without sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
    }
}
