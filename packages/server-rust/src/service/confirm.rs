//! Publisher confirm handling: removes outbox entries once the broker has
//! accepted the reply, and releases the inbound delivery waiting on it.
//!
//! [`ConfirmTracker`] runs on a [`BackgroundWorker`](super::worker::BackgroundWorker)
//! fed with [`ConfirmEvent`]s by the reply publisher. A positive confirm is
//! the only path that deletes a ledger entry. [`ConfirmWaiters`] carries the
//! final verdict for each correlation id back to the consumer.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::worker::BackgroundRunnable;
use crate::broker::{ConfirmEvent, ConfirmOutcome, OutboundReply};
use crate::traits::{OutboxLedger, ReplyPublisher};

/// What to do when the broker refuses a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NackPolicy {
    /// Keep the outbox entry and requeue the request; its redelivery replays
    /// the stored response.
    #[default]
    Passive,
    /// Republish the stored response, at most `max_resends` times per
    /// correlation id, before falling back to `Passive`.
    Resend { max_resends: u32 },
}

// ---------------------------------------------------------------------------
// ConfirmWaiters
// ---------------------------------------------------------------------------

/// Deliveries whose settlement is held until their reply is confirmed.
///
/// Clones share the same table. At most one waiter exists per correlation
/// id; registering again replaces the previous one.
#[derive(Debug, Clone, Default)]
pub struct ConfirmWaiters {
    waiting: Arc<DashMap<String, oneshot::Sender<ConfirmOutcome>>>,
}

impl ConfirmWaiters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts waiting for the final confirm of `correlation_id`.
    pub fn register(&self, correlation_id: &str) -> oneshot::Receiver<ConfirmOutcome> {
        let (tx, rx) = oneshot::channel();
        self.waiting.insert(correlation_id.to_string(), tx);
        rx
    }

    /// Hands `outcome` to the waiter of `correlation_id`, if any. Returns
    /// whether a waiter received it.
    pub fn resolve(&self, correlation_id: &str, outcome: ConfirmOutcome) -> bool {
        match self.waiting.remove(correlation_id) {
            Some((_, tx)) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    pub fn cancel(&self, correlation_id: &str) {
        self.waiting.remove(correlation_id);
    }

    /// Drops every waiter; their receivers observe a closed channel.
    pub fn clear(&self) {
        self.waiting.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ConfirmTracker
// ---------------------------------------------------------------------------

/// Consumes publisher confirms and maintains the outbox ledger.
pub struct ConfirmTracker {
    ledger: Arc<dyn OutboxLedger>,
    policy: NackPolicy,
    publisher: Option<Arc<dyn ReplyPublisher>>,
    waiters: Option<ConfirmWaiters>,
    resends: HashMap<String, u32>,
}

impl ConfirmTracker {
    #[must_use]
    pub fn new(ledger: Arc<dyn OutboxLedger>, policy: NackPolicy) -> Self {
        Self {
            ledger,
            policy,
            publisher: None,
            waiters: None,
            resends: HashMap::new(),
        }
    }

    /// Publisher used by `NackPolicy::Resend`. Without one, nacks are
    /// handled passively.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn ReplyPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Waiters released with the final outcome of each correlation id. A
    /// nack followed by a resend is not final.
    #[must_use]
    pub fn with_waiters(mut self, waiters: ConfirmWaiters) -> Self {
        self.waiters = Some(waiters);
        self
    }

    fn release(&self, correlation_id: &str, outcome: ConfirmOutcome) {
        if let Some(waiters) = &self.waiters {
            if !waiters.resolve(correlation_id, outcome) {
                debug!(%correlation_id, "no delivery waiting on this confirm");
            }
        }
    }

    async fn on_ack(&mut self, correlation_id: String) {
        self.resends.remove(&correlation_id);
        match self.ledger.delete(&correlation_id).await {
            Ok(()) => debug!(%correlation_id, "reply confirmed, outbox entry removed"),
            Err(e) => error!(%correlation_id, error = %e, "failed to remove confirmed outbox entry"),
        }
        self.release(&correlation_id, ConfirmOutcome::Ack);
    }

    async fn on_nack(&mut self, correlation_id: String, reason: Option<String>) {
        if self.resend(&correlation_id).await {
            return;
        }
        warn!(
            %correlation_id,
            reason = reason.as_deref().unwrap_or("unspecified"),
            "reply not confirmed, keeping outbox entry for replay"
        );
        self.release(&correlation_id, ConfirmOutcome::Nack { reason });
    }

    /// Republishes the stored response under `NackPolicy::Resend`. Returns
    /// whether a resend went out.
    async fn resend(&mut self, correlation_id: &str) -> bool {
        let (max_resends, publisher) = match (self.policy, &self.publisher) {
            (NackPolicy::Resend { max_resends }, Some(publisher)) => {
                (max_resends, Arc::clone(publisher))
            }
            _ => return false,
        };

        let sent = self.resends.get(correlation_id).copied().unwrap_or(0);
        if sent >= max_resends {
            warn!(%correlation_id, resends = sent, "resend limit reached");
            return false;
        }

        let record = match self.ledger.find(correlation_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(%correlation_id, "nack for entry already removed");
                return false;
            }
            Err(e) => {
                error!(%correlation_id, error = %e, "failed to load outbox entry for resend");
                return false;
            }
        };
        let Some(reply_to) = record.reply_to else {
            warn!(%correlation_id, "outbox entry has no reply destination, cannot resend");
            return false;
        };

        self.resends.insert(correlation_id.to_string(), sent + 1);
        let reply = OutboundReply {
            correlation_id: correlation_id.to_string(),
            reply_to,
            body: record.payload.into_bytes(),
        };
        match publisher.publish(reply).await {
            Ok(()) => {
                info!(%correlation_id, attempt = sent + 1, "resent unconfirmed reply");
                true
            }
            Err(e) => {
                error!(%correlation_id, error = %e, "resend failed");
                false
            }
        }
    }
}

#[async_trait]
impl BackgroundRunnable for ConfirmTracker {
    type Task = ConfirmEvent;

    async fn run(&mut self, event: ConfirmEvent) {
        let outcome = match event.outcome {
            ConfirmOutcome::Ack => "ack",
            ConfirmOutcome::Nack { .. } => "nack",
        };
        metrics::counter!("employee_confirms_total", "outcome" => outcome).increment(1);

        let Some(correlation_id) = event.correlation_id else {
            warn!(outcome, "confirm without correlation data, ignoring");
            return;
        };

        match event.outcome {
            ConfirmOutcome::Ack => self.on_ack(correlation_id).await,
            ConfirmOutcome::Nack { reason } => self.on_nack(correlation_id, reason).await,
        }
    }

    /// Forgets resend counters of entries that no longer exist.
    async fn on_tick(&mut self) {
        let tracked: Vec<String> = self.resends.keys().cloned().collect();
        for correlation_id in tracked {
            if let Ok(None) = self.ledger.find(&correlation_id).await {
                self.resends.remove(&correlation_id);
            }
        }
        debug!(pending_resends = self.resends.len(), "confirm tracker tick");
    }

    async fn shutdown(&mut self) {
        let waiting = self.waiters.as_ref().map_or(0, ConfirmWaiters::len);
        if let Some(waiters) = &self.waiters {
            waiters.clear();
        }
        info!(pending_resends = self.resends.len(), waiting, "confirm tracker stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use employee_core::OutboxRecord;

    use super::*;
    use crate::service::worker::BackgroundWorker;
    use crate::storage::MemoryOutboxLedger;

    #[derive(Default)]
    struct RecordingPublisher {
        replies: parking_lot::Mutex<Vec<OutboundReply>>,
    }

    #[async_trait]
    impl ReplyPublisher for RecordingPublisher {
        async fn publish(&self, reply: OutboundReply) -> anyhow::Result<()> {
            self.replies.lock().push(reply);
            Ok(())
        }
    }

    async fn ledger_with(correlation_id: &str) -> Arc<MemoryOutboxLedger> {
        let ledger = Arc::new(MemoryOutboxLedger::new());
        ledger
            .save(OutboxRecord::new(
                correlation_id,
                "{\"success\":true}",
                Some("replies".to_string()),
            ))
            .await
            .unwrap();
        ledger
    }

    #[tokio::test]
    async fn ack_removes_entry() {
        let ledger = ledger_with("c1").await;
        let mut tracker = ConfirmTracker::new(ledger.clone(), NackPolicy::Passive);

        tracker.run(ConfirmEvent::ack("c1")).await;

        assert!(!ledger.contains("c1"));
    }

    #[tokio::test]
    async fn passive_nack_keeps_entry() {
        let ledger = ledger_with("c1").await;
        let publisher = Arc::new(RecordingPublisher::default());
        let mut tracker = ConfirmTracker::new(ledger.clone(), NackPolicy::Passive)
            .with_publisher(publisher.clone());

        tracker
            .run(ConfirmEvent::nack("c1", Some("queue full".to_string())))
            .await;

        assert!(ledger.contains("c1"));
        assert!(publisher.replies.lock().is_empty());
    }

    #[tokio::test]
    async fn resend_policy_republishes_up_to_limit() {
        let ledger = ledger_with("c1").await;
        let publisher = Arc::new(RecordingPublisher::default());
        let mut tracker = ConfirmTracker::new(ledger.clone(), NackPolicy::Resend { max_resends: 2 })
            .with_publisher(publisher.clone());

        for _ in 0..3 {
            tracker.run(ConfirmEvent::nack("c1", None)).await;
        }

        let replies = publisher.replies.lock();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].reply_to, "replies");
        assert_eq!(replies[0].body, b"{\"success\":true}".to_vec());
        assert!(ledger.contains("c1"));
    }

    #[tokio::test]
    async fn tick_forgets_resends_of_removed_entries() {
        let ledger = ledger_with("c1").await;
        ledger
            .save(OutboxRecord::new("c2", "{}", Some("replies".to_string())))
            .await
            .unwrap();
        let mut tracker = ConfirmTracker::new(ledger.clone(), NackPolicy::Resend { max_resends: 5 })
            .with_publisher(Arc::new(RecordingPublisher::default()));

        tracker.run(ConfirmEvent::nack("c1", None)).await;
        tracker.run(ConfirmEvent::nack("c2", None)).await;
        ledger.delete("c1").await.unwrap();
        tracker.on_tick().await;

        assert_eq!(tracker.resends.len(), 1);
        assert!(tracker.resends.contains_key("c2"));
    }

    #[tokio::test]
    async fn resend_without_publisher_is_passive() {
        let ledger = ledger_with("c1").await;
        let mut tracker = ConfirmTracker::new(ledger.clone(), NackPolicy::Resend { max_resends: 3 });

        tracker.run(ConfirmEvent::nack("c1", None)).await;

        assert!(ledger.contains("c1"));
    }

    #[tokio::test]
    async fn confirm_without_correlation_id_is_ignored() {
        let ledger = ledger_with("c1").await;
        let mut tracker = ConfirmTracker::new(ledger.clone(), NackPolicy::Passive);

        tracker
            .run(ConfirmEvent {
                correlation_id: None,
                outcome: ConfirmOutcome::Ack,
            })
            .await;

        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn ack_for_unknown_id_is_noop() {
        let ledger = ledger_with("c1").await;
        let mut tracker = ConfirmTracker::new(ledger.clone(), NackPolicy::Passive);

        tracker.run(ConfirmEvent::ack("other")).await;

        assert!(ledger.contains("c1"));
    }

    #[tokio::test]
    async fn runs_on_background_worker() {
        let ledger = ledger_with("c1").await;
        let tracker = ConfirmTracker::new(ledger.clone(), NackPolicy::Passive);
        let mut worker = BackgroundWorker::start(tracker, 60_000);

        worker.sender().unwrap().send(ConfirmEvent::ack("c1")).await.unwrap();
        worker.stop().await;

        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn ack_releases_waiting_delivery() {
        let ledger = ledger_with("c1").await;
        let waiters = ConfirmWaiters::new();
        let mut tracker =
            ConfirmTracker::new(ledger.clone(), NackPolicy::Passive).with_waiters(waiters.clone());
        let rx = waiters.register("c1");

        tracker.run(ConfirmEvent::ack("c1")).await;

        assert_eq!(rx.await.unwrap(), ConfirmOutcome::Ack);
        assert!(waiters.is_empty());
        assert!(!ledger.contains("c1"));
    }

    #[tokio::test]
    async fn passive_nack_releases_waiter_with_nack() {
        let ledger = ledger_with("c1").await;
        let waiters = ConfirmWaiters::new();
        let mut tracker =
            ConfirmTracker::new(ledger.clone(), NackPolicy::Passive).with_waiters(waiters.clone());
        let rx = waiters.register("c1");

        tracker
            .run(ConfirmEvent::nack("c1", Some("queue full".to_string())))
            .await;

        assert_eq!(
            rx.await.unwrap(),
            ConfirmOutcome::Nack {
                reason: Some("queue full".to_string())
            }
        );
        assert!(ledger.contains("c1"));
    }

    #[tokio::test]
    async fn resend_holds_waiter_until_limit() {
        let ledger = ledger_with("c1").await;
        let waiters = ConfirmWaiters::new();
        let publisher = Arc::new(RecordingPublisher::default());
        let mut tracker = ConfirmTracker::new(ledger.clone(), NackPolicy::Resend { max_resends: 1 })
            .with_publisher(publisher.clone())
            .with_waiters(waiters.clone());
        let mut rx = waiters.register("c1");

        tracker.run(ConfirmEvent::nack("c1", None)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(waiters.len(), 1);

        tracker.run(ConfirmEvent::nack("c1", None)).await;
        assert!(matches!(rx.try_recv(), Ok(ConfirmOutcome::Nack { .. })));
        assert_eq!(publisher.replies.lock().len(), 1);
    }

    #[tokio::test]
    async fn resend_then_ack_releases_with_ack() {
        let ledger = ledger_with("c1").await;
        let waiters = ConfirmWaiters::new();
        let mut tracker = ConfirmTracker::new(ledger.clone(), NackPolicy::Resend { max_resends: 3 })
            .with_publisher(Arc::new(RecordingPublisher::default()))
            .with_waiters(waiters.clone());
        let rx = waiters.register("c1");

        tracker.run(ConfirmEvent::nack("c1", None)).await;
        tracker.run(ConfirmEvent::ack("c1")).await;

        assert_eq!(rx.await.unwrap(), ConfirmOutcome::Ack);
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn shutdown_closes_pending_waiters() {
        let ledger = ledger_with("c1").await;
        let waiters = ConfirmWaiters::new();
        let mut tracker =
            ConfirmTracker::new(ledger, NackPolicy::Passive).with_waiters(waiters.clone());
        let rx = waiters.register("c1");

        tracker.shutdown().await;

        assert!(rx.await.is_err());
        assert!(waiters.is_empty());
    }

    #[test]
    fn waiter_registration_replaces_and_cancels() {
        let waiters = ConfirmWaiters::new();
        let first = waiters.register("c1");
        let _second = waiters.register("c1");
        assert_eq!(waiters.len(), 1);
        drop(first);

        assert!(waiters.resolve("c1", ConfirmOutcome::Ack));
        assert!(!waiters.resolve("c1", ConfirmOutcome::Ack));

        let _third = waiters.register("c2");
        waiters.cancel("c2");
        assert!(waiters.is_empty());
    }
}
