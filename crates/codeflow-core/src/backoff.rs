//! Retry and idle backoff policies
//!
//! Two loops in the engine wait without blocking:
//!
//! - the scheduler poll loop, which sleeps when it finds no launch closure
//!   (`IdleBackoff`: doubling sleep, capped, reset on work)
//! - a streaming codelet's push/pop loop on a full/empty Fifo
//!   (`RetryPolicy`: spin, then yield, then doubling sleeps, bounded attempts)

use std::time::Duration;

/// Doubling sleep used by the scheduler poll loop
#[derive(Debug, Clone)]
pub struct IdleBackoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl IdleBackoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = min.max(Duration::from_nanos(1));
        let max = max.max(min);
        Self { min, max, current: min }
    }

    /// Work was found: go back to the shortest sleep
    #[inline]
    pub fn reset(&mut self) {
        self.current = self.min;
    }

    /// Sleep for the current interval, then double it up to the ceiling
    pub fn idle(&mut self) {
        std::thread::sleep(self.current);
        self.advance();
    }

    /// Double the interval without sleeping
    #[inline]
    pub fn advance(&mut self) {
        self.current = (self.current * 2).min(self.max);
    }

    #[inline]
    pub fn current(&self) -> Duration {
        self.current
    }
}

/// Bounded retry policy for streaming push/pop loops
///
/// Attempt `n` (1-based) waits by:
/// - `n <= spins`: one `spin_loop` hint
/// - `n <= spins + yields`: `thread::yield_now`
/// - otherwise: sleep, starting at `sleep_min` and doubling up to `sleep_max`
///
/// After `max_attempts` failed attempts the caller gets the failure back.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub spins: u32,
    pub yields: u32,
    pub sleep_min: Duration,
    pub sleep_max: Duration,
    pub max_attempts: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            spins: 64,
            yields: 64,
            sleep_min: Duration::from_micros(1),
            sleep_max: Duration::from_micros(100),
            max_attempts: 4_000_000,
        }
    }
}

impl RetryPolicy {
    /// Pure spinning, no sleeps; for tight single-producer/single-consumer stages
    pub fn spin(max_attempts: u64) -> Self {
        Self {
            spins: u32::MAX,
            yields: 0,
            sleep_min: Duration::ZERO,
            sleep_max: Duration::ZERO,
            max_attempts,
        }
    }

    pub fn max_attempts(mut self, n: u64) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn stepper(&self) -> RetryStepper<'_> {
        RetryStepper {
            policy: self,
            attempts: 0,
            sleep: self.sleep_min,
        }
    }
}

/// Per-call retry state
pub struct RetryStepper<'a> {
    policy: &'a RetryPolicy,
    attempts: u64,
    sleep: Duration,
}

impl RetryStepper<'_> {
    /// Record a failed attempt and wait before the next one
    ///
    /// Returns false once the attempt budget is exhausted; the caller
    /// must stop retrying.
    pub fn wait(&mut self) -> bool {
        self.attempts += 1;
        if self.attempts >= self.policy.max_attempts {
            return false;
        }
        let spins = self.policy.spins as u64;
        let yields = self.policy.yields as u64;
        if self.attempts <= spins {
            core::hint::spin_loop();
        } else if self.attempts <= spins.saturating_add(yields) {
            std::thread::yield_now();
        } else {
            std::thread::sleep(self.sleep);
            self.sleep = (self.sleep * 2).min(self.policy.sleep_max);
        }
        true
    }

    #[inline]
    pub fn attempts(&self) -> u64 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_backoff_doubles_and_caps() {
        let mut b = IdleBackoff::new(Duration::from_micros(1), Duration::from_micros(500));
        let mut seen = Vec::new();
        for _ in 0..12 {
            seen.push(b.current().as_micros());
            b.advance();
        }
        assert_eq!(&seen[..4], &[1, 2, 4, 8]);
        assert_eq!(*seen.last().unwrap(), 500);

        b.reset();
        assert_eq!(b.current(), Duration::from_micros(1));
    }

    #[test]
    fn test_idle_backoff_clamps_inverted_bounds() {
        let b = IdleBackoff::new(Duration::from_micros(10), Duration::from_micros(2));
        assert_eq!(b.current(), Duration::from_micros(10));
    }

    #[test]
    fn test_retry_budget_is_bounded() {
        let policy = RetryPolicy::spin(5);
        let mut step = policy.stepper();
        let mut waits = 0;
        while step.wait() {
            waits += 1;
        }
        assert_eq!(waits, 4);
        assert_eq!(step.attempts(), 5);
    }

    #[test]
    fn test_retry_sleep_phase() {
        let policy = RetryPolicy {
            spins: 1,
            yields: 1,
            sleep_min: Duration::from_micros(1),
            sleep_max: Duration::from_micros(4),
            max_attempts: 10,
        };
        let mut step = policy.stepper();
        for _ in 0..6 {
            assert!(step.wait());
        }
        assert_eq!(step.sleep, Duration::from_micros(4));
    }
}
