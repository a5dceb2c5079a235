//! Bounded exponential backoff for outbound calls.

use std::time::Duration;

/// Retry policy applied per endpoint candidate.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per candidate, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Timeout for a single outbound call.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts. Useful in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Delay after the `attempt`-th failure (1-based): base * 2^(attempt-1), capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2u32.pow(exponent))
            .min(self.max_delay)
    }

    /// Upper bound on time spent on one candidate.
    pub fn worst_case(&self) -> Duration {
        let waits: Duration = (1..self.max_attempts).map(|a| self.delay_for(a)).sum();
        self.call_timeout.saturating_mul(self.max_attempts) + waits
    }
}
