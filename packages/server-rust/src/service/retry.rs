//! Bounded retry of delivery processing with exponential backoff.
//!
//! Each delivery gets a fresh [`RetryAttemptState`]. The executor runs the
//! handler until it succeeds, fails fatally, or the [`RetryClassifier`]
//! refuses another attempt, and returns the [`Settlement`] for the delivery.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use super::classify::{FatalClassifier, RetryClassifier};
use super::operation::ProcessError;
use super::processor::DeliveryHandler;
use crate::broker::{InboundDelivery, Settlement};

// ---------------------------------------------------------------------------
// ExponentialBackoff
// ---------------------------------------------------------------------------

/// Delay schedule: `initial * multiplier^(retry - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    initial: Duration,
    multiplier: f64,
    max: Duration,
}

impl ExponentialBackoff {
    /// Multipliers below 1.0 are raised to 1.0; `initial` is capped at `max`.
    #[must_use]
    pub fn new(initial: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            initial: initial.min(max),
            multiplier: if multiplier.is_finite() {
                multiplier.max(1.0)
            } else {
                1.0
            },
            max,
        }
    }

    /// Delay to wait before retry number `retry` (1 = the second attempt).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let initial_ms = self.initial.as_millis() as f64;
        #[allow(clippy::cast_precision_loss)]
        let max_ms = self.max.as_millis() as f64;

        let scaled = initial_ms * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= max_ms {
            return self.max;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(scaled as u64)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(3_000), 2.0, Duration::from_millis(10_000))
    }
}

// ---------------------------------------------------------------------------
// RetryAttemptState
// ---------------------------------------------------------------------------

/// Attempt bookkeeping for one delivery. Never shared between deliveries.
#[derive(Debug, Default)]
pub struct RetryAttemptState {
    attempt: u32,
    last_failure: Option<ProcessError>,
}

impl RetryAttemptState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts started so far.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    #[must_use]
    pub fn last_failure(&self) -> Option<&ProcessError> {
        self.last_failure.as_ref()
    }

    fn begin_attempt(&mut self) {
        self.attempt += 1;
    }

    fn record_failure(&mut self, err: ProcessError) {
        self.last_failure = Some(err);
    }
}

// ---------------------------------------------------------------------------
// RetryExecutor
// ---------------------------------------------------------------------------

/// Runs a [`DeliveryHandler`] under the retry and fatal classification
/// policy.
pub struct RetryExecutor<H: ?Sized> {
    handler: Arc<H>,
    fatal: FatalClassifier,
    retry: RetryClassifier,
    backoff: ExponentialBackoff,
}

impl<H: DeliveryHandler + ?Sized> RetryExecutor<H> {
    #[must_use]
    pub fn new(
        handler: Arc<H>,
        fatal: FatalClassifier,
        retry: RetryClassifier,
        backoff: ExponentialBackoff,
    ) -> Self {
        Self {
            handler,
            fatal,
            retry,
            backoff,
        }
    }

    /// Processes one delivery and returns how it must be settled.
    ///
    /// Whether another attempt is allowed is decided from the recorded
    /// state alone: the attempt count and the last failure.
    pub async fn execute(&self, delivery: &InboundDelivery) -> Settlement {
        let correlation_id = delivery.headers.correlation_id.as_deref().unwrap_or("");
        let mut state = RetryAttemptState::new();

        loop {
            if !self.retry.can_retry(state.last_failure(), state.attempt()) {
                return self.give_up(correlation_id, &state);
            }
            if let Some(err) = state.last_failure() {
                let delay = self.backoff.delay_for(state.attempt());
                #[allow(clippy::cast_possible_truncation)]
                let delay_ms = delay.as_millis() as u64;
                warn!(
                    correlation_id,
                    attempt = state.attempt(),
                    delay_ms,
                    error = %err,
                    "attempt failed, retrying"
                );
                metrics::counter!("employee_request_retries_total").increment(1);
                tokio::time::sleep(delay).await;
            }

            state.begin_attempt();
            match self.handler.handle(delivery).await {
                Ok(handled) => {
                    debug!(
                        correlation_id,
                        attempt = state.attempt(),
                        replayed = handled.is_replay(),
                        "delivery handled"
                    );
                    return Settlement::Ack;
                }
                Err(err) if self.fatal.is_fatal(&err) => {
                    error!(correlation_id, error = %err, "fatal failure, dead-lettering");
                    return dead_letter(err.to_string(), state.attempt(), "fatal");
                }
                Err(err) => state.record_failure(err),
            }
        }
    }

    fn give_up(&self, correlation_id: &str, state: &RetryAttemptState) -> Settlement {
        let Some(err) = state.last_failure() else {
            error!(correlation_id, "no processing attempts allowed");
            return dead_letter("no processing attempts allowed".to_string(), 0, "exhausted");
        };
        let reason = if self.retry.is_retryable(err.kind()) {
            "exhausted"
        } else {
            "not_retryable"
        };
        error!(
            correlation_id,
            attempts = state.attempt(),
            error = %err,
            reason,
            "giving up on delivery"
        );
        dead_letter(err.to_string(), state.attempt(), reason)
    }
}

fn dead_letter(reason: String, attempts: u32, label: &'static str) -> Settlement {
    metrics::counter!("employee_requests_dead_lettered_total", "reason" => label).increment(1);
    Settlement::DeadLetter { reason, attempts }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use proptest::prelude::*;
    use tokio::time::Instant;

    use super::*;
    use crate::broker::DeliveryHeaders;
    use crate::service::operation::OperationError;
    use crate::service::processor::Handled;

    /// Fails the first `failures` calls with the error built by `make_err`.
    struct FlakyHandler {
        failures: u32,
        make_err: fn() -> ProcessError,
        calls: AtomicU32,
        call_times: parking_lot::Mutex<Vec<Instant>>,
    }

    impl FlakyHandler {
        fn new(failures: u32, make_err: fn() -> ProcessError) -> Arc<Self> {
            Arc::new(Self {
                failures,
                make_err,
                calls: AtomicU32::new(0),
                call_times: parking_lot::Mutex::new(Vec::new()),
            })
        }

        fn gaps_ms(&self) -> Vec<u128> {
            let times = self.call_times.lock();
            times
                .windows(2)
                .map(|w| (w[1] - w[0]).as_millis())
                .collect()
        }
    }

    #[async_trait]
    impl DeliveryHandler for FlakyHandler {
        async fn handle(&self, _delivery: &InboundDelivery) -> Result<Handled, ProcessError> {
            self.call_times.lock().push(Instant::now());
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err((self.make_err)())
            } else {
                Ok(Handled::Processed("{}".to_string()))
            }
        }
    }

    fn unavailable() -> ProcessError {
        ProcessError::Route(OperationError::Unavailable(anyhow::anyhow!("db down")))
    }

    fn missing_reply_to() -> ProcessError {
        ProcessError::MissingHeader { header: "replyTo" }
    }

    fn invalid_payload() -> ProcessError {
        let source = serde_json::from_str::<i64>("\"x\"").unwrap_err();
        ProcessError::Route(OperationError::InvalidPayload {
            request_type: employee_core::RequestType::GetEmployeeById,
            source,
        })
    }

    fn delivery() -> InboundDelivery {
        InboundDelivery {
            delivery_tag: 1,
            redelivered: false,
            headers: DeliveryHeaders {
                correlation_id: Some("c1".to_string()),
                reply_to: Some("replies".to_string()),
                request_type: Some("GET_EMPLOYEE_BY_ID".to_string()),
            },
            body: br#"{"requestBody":1}"#.to_vec(),
        }
    }

    fn executor(handler: Arc<FlakyHandler>, max_attempts: u32) -> RetryExecutor<FlakyHandler> {
        RetryExecutor::new(
            handler,
            FatalClassifier::default(),
            RetryClassifier::new(max_attempts),
            ExponentialBackoff::default(),
        )
    }

    #[test]
    fn backoff_grows_then_caps() {
        let backoff = ExponentialBackoff::default();
        assert_eq!(backoff.delay_for(1), Duration::from_millis(3_000));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(6_000));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(10_000));
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_millis(10_000));
    }

    #[test]
    fn backoff_clamps_degenerate_inputs() {
        let backoff = ExponentialBackoff::new(
            Duration::from_millis(50_000),
            0.5,
            Duration::from_millis(1_000),
        );
        assert_eq!(backoff.delay_for(1), Duration::from_millis(1_000));
        assert_eq!(backoff.delay_for(4), Duration::from_millis(1_000));
    }

    proptest! {
        #[test]
        fn backoff_is_monotonic_and_bounded(
            initial in 1u64..20_000,
            max in 1u64..60_000,
            multiplier in 1.0f64..8.0,
            retry in 1u32..64,
        ) {
            let backoff = ExponentialBackoff::new(
                Duration::from_millis(initial),
                multiplier,
                Duration::from_millis(max),
            );
            let current = backoff.delay_for(retry);
            let next = backoff.delay_for(retry + 1);
            prop_assert!(current <= next);
            prop_assert!(next <= Duration::from_millis(max));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let handler = FlakyHandler::new(2, unavailable);
        let settlement = executor(Arc::clone(&handler), 3).execute(&delivery()).await;

        assert_eq!(settlement, Settlement::Ack);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(handler.gaps_ms(), vec![3_000, 6_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts() {
        let handler = FlakyHandler::new(u32::MAX, unavailable);
        let settlement = executor(Arc::clone(&handler), 3).execute(&delivery()).await;

        assert!(matches!(settlement, Settlement::DeadLetter { attempts: 3, .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(handler.gaps_ms(), vec![3_000, 6_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn delays_cap_with_many_attempts() {
        let handler = FlakyHandler::new(u32::MAX, unavailable);
        let settlement = executor(Arc::clone(&handler), 5).execute(&delivery()).await;

        assert!(matches!(settlement, Settlement::DeadLetter { attempts: 5, .. }));
        assert_eq!(handler.gaps_ms(), vec![3_000, 6_000, 10_000, 10_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_failure_short_circuits() {
        let handler = FlakyHandler::new(u32::MAX, missing_reply_to);
        let settlement = executor(Arc::clone(&handler), 3).execute(&delivery()).await;

        match settlement {
            Settlement::DeadLetter { reason, attempts } => {
                assert_eq!(attempts, 1);
                assert_eq!(reason, "no replyTo header set in message");
            }
            other => panic!("fatal failure must dead-letter, got {other:?}"),
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_failure_stops_after_one_attempt() {
        let handler = FlakyHandler::new(u32::MAX, invalid_payload);
        let settlement = executor(Arc::clone(&handler), 3).execute(&delivery()).await;

        assert!(matches!(settlement, Settlement::DeadLetter { attempts: 1, .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn attempt_state_tracks_the_last_failure() {
        let mut state = RetryAttemptState::new();
        assert_eq!(state.attempt(), 0);
        assert!(state.last_failure().is_none());

        state.begin_attempt();
        state.record_failure(unavailable());
        assert_eq!(state.attempt(), 1);
        assert_eq!(
            state.last_failure().map(ProcessError::kind),
            Some(crate::service::FailureKind::StoreUnavailable)
        );

        state.begin_attempt();
        state.record_failure(invalid_payload());
        assert_eq!(state.attempt(), 2);
        assert_eq!(
            state.last_failure().map(ProcessError::kind),
            Some(crate::service::FailureKind::InvalidPayload)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempt_budget_never_calls_handler() {
        let handler = FlakyHandler::new(0, unavailable);
        let settlement = executor(Arc::clone(&handler), 0).execute(&delivery()).await;

        assert!(matches!(settlement, Settlement::DeadLetter { attempts: 0, .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn recorded_non_retryable_failure_reports_its_message() {
        let handler = FlakyHandler::new(u32::MAX, invalid_payload);
        let settlement = executor(Arc::clone(&handler), 3).execute(&delivery()).await;

        let Settlement::DeadLetter { reason, attempts } = settlement else {
            panic!("expected a dead letter");
        };
        assert_eq!(attempts, 1);
        assert_eq!(reason, invalid_payload().to_string());
    }
}
