//! Consumer loop: pulls deliveries from a [`DeliverySource`], runs each
//! through the [`RetryExecutor`], and settles it exactly once.
//!
//! With a confirm gate, a delivery whose reply was published is only acked
//! after the broker confirms that reply. A refused or unconfirmed reply
//! requeues the delivery so its redelivery replays the stored response.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tracing::{error, info, warn};

use super::confirm::ConfirmWaiters;
use super::processor::DeliveryHandler;
use super::retry::RetryExecutor;
use crate::broker::{ConfirmOutcome, InboundDelivery, Settlement};
use crate::traits::DeliverySource;

/// Counts of settled deliveries, returned when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub acked: u64,
    pub dead_lettered: u64,
    pub requeued: u64,
}

struct ConfirmGate {
    waiters: ConfirmWaiters,
    timeout: Duration,
}

/// Sequential consumer over one delivery source.
pub struct ServiceConsumer<S, H: ?Sized> {
    source: S,
    executor: RetryExecutor<H>,
    gate: Option<ConfirmGate>,
}

impl<S, H> ServiceConsumer<S, H>
where
    S: DeliverySource,
    H: DeliveryHandler + ?Sized,
{
    #[must_use]
    pub fn new(source: S, executor: RetryExecutor<H>) -> Self {
        Self {
            source,
            executor,
            gate: None,
        }
    }

    /// Holds each ack until the reply's publisher confirm is resolved on
    /// `waiters`, or requeues after `timeout` without one.
    #[must_use]
    pub fn with_confirm_gate(mut self, waiters: ConfirmWaiters, timeout: Duration) -> Self {
        self.gate = Some(ConfirmGate { waiters, timeout });
        self
    }

    /// Runs until `shutdown` becomes `true` (or its sender is dropped) or the
    /// source is exhausted. A delivery already being processed is finished
    /// and settled before the loop exits.
    ///
    /// # Errors
    ///
    /// Returns an error if a delivery cannot be settled.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<ConsumerStats> {
        let mut stats = ConsumerStats::default();

        loop {
            if *shutdown.borrow() {
                break;
            }
            let delivery = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                delivery = self.source.next_delivery() => delivery,
            };
            let Some(delivery) = delivery else {
                info!("delivery source closed");
                break;
            };

            // Registered before processing so a fast confirm is not missed.
            let waiter = self.register_waiter(&delivery);
            let settlement = self.executor.execute(&delivery).await;
            let settlement = self.await_confirm(waiter, settlement).await;

            let correlation_id = delivery.headers.correlation_id.as_deref().unwrap_or("");
            match &settlement {
                Settlement::Ack => stats.acked += 1,
                Settlement::DeadLetter { reason, attempts } => {
                    warn!(
                        delivery_tag = delivery.delivery_tag,
                        correlation_id,
                        attempts,
                        reason = %reason,
                        "dead-lettering delivery"
                    );
                    stats.dead_lettered += 1;
                }
                Settlement::Requeue { reason } => {
                    warn!(
                        delivery_tag = delivery.delivery_tag,
                        correlation_id,
                        reason = %reason,
                        "requeueing delivery"
                    );
                    stats.requeued += 1;
                }
            }
            self.source.settle(&delivery, settlement).await?;
        }

        info!(
            acked = stats.acked,
            dead_lettered = stats.dead_lettered,
            requeued = stats.requeued,
            "consumer stopped"
        );
        Ok(stats)
    }

    fn register_waiter(
        &self,
        delivery: &InboundDelivery,
    ) -> Option<(String, oneshot::Receiver<ConfirmOutcome>)> {
        let gate = self.gate.as_ref()?;
        let correlation_id = delivery
            .headers
            .correlation_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())?;
        let rx = gate.waiters.register(correlation_id);
        Some((correlation_id.to_string(), rx))
    }

    async fn await_confirm(
        &self,
        waiter: Option<(String, oneshot::Receiver<ConfirmOutcome>)>,
        settlement: Settlement,
    ) -> Settlement {
        let (Some(gate), Some((correlation_id, rx))) = (&self.gate, waiter) else {
            return settlement;
        };
        if settlement != Settlement::Ack {
            gate.waiters.cancel(&correlation_id);
            return settlement;
        }

        match tokio::time::timeout(gate.timeout, rx).await {
            Ok(Ok(ConfirmOutcome::Ack)) => Settlement::Ack,
            Ok(Ok(ConfirmOutcome::Nack { reason })) => Settlement::Requeue {
                reason: format!(
                    "reply refused by broker: {}",
                    reason.as_deref().unwrap_or("unspecified")
                ),
            },
            Ok(Err(_)) => Settlement::Requeue {
                reason: "confirm tracker stopped before the reply was confirmed".to_string(),
            },
            Err(_) => {
                gate.waiters.cancel(&correlation_id);
                Settlement::Requeue {
                    reason: format!("reply not confirmed within {} ms", gate.timeout.as_millis()),
                }
            }
        }
    }
}

/// Flips `shutdown` to `true` once `signal` completes. If the signal cannot
/// be awaited the error is logged and `shutdown` is left untouched, so the
/// service keeps running until stopped some other way.
pub async fn forward_shutdown<F>(signal: F, shutdown: watch::Sender<bool>)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("shutdown signal received");
            let _ = shutdown.send(true);
        }
        Err(e) => {
            error!(error = %e, "cannot listen for shutdown signal");
            // Dropping the sender would read as a shutdown to the consumer.
            std::future::pending::<()>().await;
        }
    }
}
