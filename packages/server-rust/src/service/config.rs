use std::time::Duration;

use super::classify::RetryClassifier;
use super::confirm::NackPolicy;
use super::operation::DEFAULT_ROUTE_TIMEOUT_MS;
use super::retry::ExponentialBackoff;

/// Default inbound work queue.
pub const DEFAULT_QUEUE: &str = "employeeServiceQueue";

/// Service-level configuration for request processing.
///
/// Controls the retry policy, route timeouts, and publisher confirm handling.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Work queue the consumer reads requests from.
    pub queue: String,
    /// Maximum processing attempts per delivery, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound for any single backoff delay in milliseconds.
    pub max_backoff_ms: u64,
    /// Growth factor applied to the delay after every retry.
    pub backoff_multiplier: f64,
    /// Timeout for a single route call in milliseconds.
    pub route_timeout_ms: u64,
    /// Capacity of the publisher confirm channel.
    pub confirm_channel_capacity: usize,
    /// Interval between confirm tracker housekeeping ticks in milliseconds.
    pub confirm_tick_interval_ms: u64,
    /// How long the consumer holds a delivery waiting for its reply's
    /// confirm before requeueing it.
    pub confirm_timeout_ms: u64,
    /// What to do when the broker refuses a reply.
    pub nack_policy: NackPolicy,
}

impl ServiceConfig {
    /// Backoff schedule derived from this configuration.
    #[must_use]
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.initial_backoff_ms),
            self.backoff_multiplier,
            Duration::from_millis(self.max_backoff_ms),
        )
    }

    #[must_use]
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }

    /// Retry classifier enforcing `max_attempts`.
    #[must_use]
    pub fn retry_classifier(&self) -> RetryClassifier {
        RetryClassifier::new(self.max_attempts)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_string(),
            max_attempts: 3,
            initial_backoff_ms: 3_000,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            route_timeout_ms: DEFAULT_ROUTE_TIMEOUT_MS,
            confirm_channel_capacity: 256,
            confirm_tick_interval_ms: 60_000,
            confirm_timeout_ms: 30_000,
            nack_policy: NackPolicy::Passive,
        }
    }
}
