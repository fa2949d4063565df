//! In-process broker: a work queue with requeue, per-destination reply
//! queues, a dead-letter list, and scripted publisher confirms.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use employee_core::{RequestBody, RequestType};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use super::message::{ConfirmEvent, DeliveryHeaders, InboundDelivery, OutboundReply, Settlement};
use crate::traits::{DeliverySource, ReplyPublisher};

/// How the broker confirms published replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfirmMode {
    #[default]
    Ack,
    Nack,
    /// Never confirm, as if the confirm was lost.
    Silent,
}

struct BrokerState {
    work_tx: Mutex<Option<mpsc::UnboundedSender<InboundDelivery>>>,
    work_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundDelivery>>>,
    next_tag: AtomicU64,
    replies: DashMap<String, Vec<OutboundReply>>,
    dead_letters: Mutex<Vec<InboundDelivery>>,
    acked: Mutex<Vec<u64>>,
    requeued: Mutex<Vec<u64>>,
    redelivery_limit: Mutex<Option<u32>>,
    confirm_mode: Mutex<ConfirmMode>,
    publish_failures: AtomicU32,
    confirm_nacks: AtomicU32,
}

/// Shared handle to an in-memory broker. Clones refer to the same broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(BrokerState {
                work_tx: Mutex::new(Some(tx)),
                work_rx: Mutex::new(Some(rx)),
                next_tag: AtomicU64::new(1),
                replies: DashMap::new(),
                dead_letters: Mutex::new(Vec::new()),
                acked: Mutex::new(Vec::new()),
                requeued: Mutex::new(Vec::new()),
                redelivery_limit: Mutex::new(None),
                confirm_mode: Mutex::new(ConfirmMode::Ack),
                publish_failures: AtomicU32::new(0),
                confirm_nacks: AtomicU32::new(0),
            }),
        }
    }

    /// Enqueues a raw message on the work queue and returns its delivery tag.
    ///
    /// # Errors
    ///
    /// Returns an error once the work queue has been closed.
    pub fn send(&self, headers: DeliveryHeaders, body: impl Into<Vec<u8>>) -> anyhow::Result<u64> {
        let delivery_tag = self.state.next_tag.fetch_add(1, Ordering::Relaxed);
        let delivery = InboundDelivery {
            delivery_tag,
            redelivered: false,
            headers,
            body: body.into(),
        };
        let guard = self.state.work_tx.lock();
        let tx = guard
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("work queue closed"))?;
        tx.send(delivery)
            .map_err(|_| anyhow::anyhow!("work queue consumer dropped"))?;
        Ok(delivery_tag)
    }

    /// Enqueues a well-formed request wrapping `payload` as `requestBody`.
    ///
    /// # Errors
    ///
    /// Returns an error once the work queue has been closed.
    pub fn send_request(
        &self,
        correlation_id: &str,
        reply_to: &str,
        request_type: RequestType,
        payload: Value,
    ) -> anyhow::Result<u64> {
        let headers = DeliveryHeaders {
            correlation_id: Some(correlation_id.to_string()),
            reply_to: Some(reply_to.to_string()),
            request_type: Some(request_type.as_str().to_string()),
        };
        let body = serde_json::to_vec(&RequestBody {
            request_body: payload,
        })?;
        self.send(headers, body)
    }

    /// Closes the work queue; the consumer ends once it is drained.
    pub fn close(&self) {
        self.state.work_tx.lock().take();
    }

    /// Takes the single consumer of the work queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer was already taken.
    pub fn consumer(&self) -> anyhow::Result<MemoryConsumer> {
        let rx = self
            .state
            .work_rx
            .lock()
            .take()
            .ok_or_else(|| anyhow::anyhow!("work queue already has a consumer"))?;
        Ok(MemoryConsumer {
            broker: self.clone(),
            rx,
            requeued: VecDeque::new(),
        })
    }

    /// A publisher that reports confirms on `confirms`.
    #[must_use]
    pub fn publisher(&self, confirms: mpsc::Sender<ConfirmEvent>) -> MemoryPublisher {
        MemoryPublisher {
            broker: self.clone(),
            confirms,
        }
    }

    pub fn set_confirm_mode(&self, mode: ConfirmMode) {
        *self.state.confirm_mode.lock() = mode;
    }

    /// Makes the next `count` publishes fail before reaching a reply queue.
    pub fn fail_next_publishes(&self, count: u32) {
        self.state.publish_failures.store(count, Ordering::SeqCst);
    }

    /// Nacks the next `count` published replies, then falls back to the
    /// confirm mode.
    pub fn nack_next_confirms(&self, count: u32) {
        self.state.confirm_nacks.store(count, Ordering::SeqCst);
    }

    /// Dead-letters a message instead of requeueing it once it has been
    /// redelivered `limit` times, like a queue `x-delivery-limit`.
    pub fn set_redelivery_limit(&self, limit: u32) {
        *self.state.redelivery_limit.lock() = Some(limit);
    }

    /// Replies published to `reply_to`, oldest first.
    #[must_use]
    pub fn replies(&self, reply_to: &str) -> Vec<OutboundReply> {
        self.state
            .replies
            .get(reply_to)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn dead_letters(&self) -> Vec<InboundDelivery> {
        self.state.dead_letters.lock().clone()
    }

    /// Delivery tags acknowledged by the consumer.
    #[must_use]
    pub fn acked(&self) -> Vec<u64> {
        self.state.acked.lock().clone()
    }

    /// Delivery tags returned to the queue, once per requeue.
    #[must_use]
    pub fn requeued(&self) -> Vec<u64> {
        self.state.requeued.lock().clone()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// MemoryConsumer
// ---------------------------------------------------------------------------

/// Work-queue consumer of an [`InMemoryBroker`].
///
/// Requeued messages go back to the head of the queue, keep their delivery
/// tag, and come back flagged as redelivered.
pub struct MemoryConsumer {
    broker: InMemoryBroker,
    rx: mpsc::UnboundedReceiver<InboundDelivery>,
    requeued: VecDeque<InboundDelivery>,
}

impl MemoryConsumer {
    fn requeue(&mut self, delivery: &InboundDelivery) {
        let state = &self.broker.state;
        let redeliveries = {
            let mut requeued = state.requeued.lock();
            requeued.push(delivery.delivery_tag);
            requeued.iter().filter(|tag| **tag == delivery.delivery_tag).count()
        };
        let limit = *state.redelivery_limit.lock();
        let redeliveries = u32::try_from(redeliveries).unwrap_or(u32::MAX);
        if limit.is_some_and(|limit| redeliveries > limit) {
            warn!(delivery_tag = delivery.delivery_tag, "redelivery limit reached, dead-lettering");
            state.dead_letters.lock().push(delivery.clone());
            return;
        }
        self.requeued.push_back(InboundDelivery {
            redelivered: true,
            ..delivery.clone()
        });
    }
}

#[async_trait]
impl DeliverySource for MemoryConsumer {
    async fn next_delivery(&mut self) -> Option<InboundDelivery> {
        if let Some(delivery) = self.requeued.pop_front() {
            return Some(delivery);
        }
        self.rx.recv().await
    }

    async fn settle(
        &mut self,
        delivery: &InboundDelivery,
        settlement: Settlement,
    ) -> anyhow::Result<()> {
        match settlement {
            Settlement::Ack => self.broker.state.acked.lock().push(delivery.delivery_tag),
            Settlement::DeadLetter { .. } => {
                self.broker.state.dead_letters.lock().push(delivery.clone());
            }
            Settlement::Requeue { .. } => self.requeue(delivery),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryPublisher
// ---------------------------------------------------------------------------

/// Reply publisher of an [`InMemoryBroker`].
#[derive(Clone)]
pub struct MemoryPublisher {
    broker: InMemoryBroker,
    confirms: mpsc::Sender<ConfirmEvent>,
}

#[async_trait]
impl ReplyPublisher for MemoryPublisher {
    async fn publish(&self, reply: OutboundReply) -> anyhow::Result<()> {
        let state = &self.broker.state;
        if state
            .publish_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("reply channel unavailable");
        }

        let correlation_id = reply.correlation_id.clone();
        state
            .replies
            .entry(reply.reply_to.clone())
            .or_default()
            .push(reply);

        let scripted_nack = state
            .confirm_nacks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let mode = if scripted_nack {
            ConfirmMode::Nack
        } else {
            *state.confirm_mode.lock()
        };
        let event = match mode {
            ConfirmMode::Ack => ConfirmEvent::ack(correlation_id),
            ConfirmMode::Nack => {
                ConfirmEvent::nack(correlation_id, Some("rejected by broker".to_string()))
            }
            ConfirmMode::Silent => return Ok(()),
        };
        // The confirm tracker republishes through this publisher; awaiting
        // channel capacity here could block it on its own queue.
        let confirms = self.confirms.clone();
        tokio::spawn(async move {
            if confirms.send(event).await.is_err() {
                warn!("confirm channel closed, dropping publisher confirm");
            }
        });
        Ok(())
    }
}
