//! RabbitMQ adapter over `lapin`.
//!
//! - [`declare_topology`]: work exchange/queue plus dead-letter exchange/queue
//! - [`AmqpConsumer`]: manual-ack consumer; dead-lettering rejects without
//!   requeue, an unconfirmed reply rejects with requeue
//! - [`AmqpPublisher`]: publisher-confirm channel; each confirm is awaited on a
//!   spawned task and forwarded as a [`ConfirmEvent`]

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::acker::Acker;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::message::{
    ConfirmEvent, ConfirmOutcome, DeliveryHeaders, InboundDelivery, OutboundReply, Settlement,
};
use crate::traits::{DeliverySource, ReplyPublisher};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Opens a connection to the broker at `uri`.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect(uri: &str) -> anyhow::Result<Connection> {
    let connection = Connection::connect(uri, ConnectionProperties::default()).await?;
    info!("connected to AMQP broker");
    Ok(connection)
}

// ---------------------------------------------------------------------------
// Topology
// ---------------------------------------------------------------------------

/// Names of the exchanges, queues and routing keys the service uses.
#[derive(Debug, Clone)]
pub struct Topology {
    pub exchange: String,
    pub routing_key: String,
    pub queue: String,
    pub dead_letter_exchange: String,
    pub dead_letter_routing_key: String,
    pub dead_letter_queue: String,
}

impl Topology {
    /// Default topology around the given work queue.
    #[must_use]
    pub fn for_queue(queue: impl Into<String>) -> Self {
        Self {
            exchange: "employeeServiceExchange".to_string(),
            routing_key: "employeeService".to_string(),
            queue: queue.into(),
            dead_letter_exchange: "deadLetterExchange".to_string(),
            dead_letter_routing_key: "employeeServiceDeadLetter".to_string(),
            dead_letter_queue: "employeeServiceDeadLetterQueue".to_string(),
        }
    }
}

/// Declares the work and dead-letter exchanges and queues and binds them.
/// Messages rejected without requeue on the work queue are routed to the
/// dead-letter queue.
///
/// # Errors
///
/// Returns an error if any declaration fails, e.g. because an existing queue
/// was declared with different arguments.
pub async fn declare_topology(channel: &Channel, topology: &Topology) -> anyhow::Result<()> {
    channel
        .exchange_declare(
            &topology.exchange,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;
    channel
        .exchange_declare(
            &topology.dead_letter_exchange,
            ExchangeKind::Direct,
            ExchangeDeclareOptions::default(),
            FieldTable::default(),
        )
        .await?;

    let mut queue_args = FieldTable::default();
    queue_args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(topology.dead_letter_exchange.as_str().into()),
    );
    queue_args.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(topology.dead_letter_routing_key.as_str().into()),
    );
    channel
        .queue_declare(
            &topology.queue,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            queue_args,
        )
        .await?;
    channel
        .queue_declare(
            &topology.dead_letter_queue,
            QueueDeclareOptions::default(),
            FieldTable::default(),
        )
        .await?;

    channel
        .queue_bind(
            &topology.queue,
            &topology.exchange,
            &topology.routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;
    channel
        .queue_bind(
            &topology.dead_letter_queue,
            &topology.dead_letter_exchange,
            &topology.dead_letter_routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    debug!(queue = %topology.queue, "declared broker topology");
    Ok(())
}

// ---------------------------------------------------------------------------
// AmqpConsumer
// ---------------------------------------------------------------------------

/// Work-queue consumer with manual acknowledgement.
pub struct AmqpConsumer {
    consumer: Consumer,
    pending: HashMap<u64, Acker>,
}

impl AmqpConsumer {
    /// Starts consuming `queue` with at most `prefetch` unsettled deliveries.
    ///
    /// # Errors
    ///
    /// Returns an error if QoS cannot be set or the consumer cannot start.
    pub async fn start(channel: &Channel, queue: &str, prefetch: u16) -> anyhow::Result<Self> {
        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await?;
        let consumer_tag = format!("employee-service-{}", uuid::Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        info!(queue, consumer_tag, "consuming work queue");
        Ok(Self {
            consumer,
            pending: HashMap::new(),
        })
    }
}

fn header_string(headers: &FieldTable, name: &str) -> Option<String> {
    headers
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == name)
        .and_then(|(_, value)| match value {
            AMQPValue::LongString(s) => Some(String::from_utf8_lossy(s.as_bytes()).into_owned()),
            AMQPValue::ShortString(s) => Some(s.as_str().to_string()),
            _ => None,
        })
}

fn into_inbound(delivery: Delivery) -> (InboundDelivery, Acker) {
    let properties = &delivery.properties;
    let headers = DeliveryHeaders {
        correlation_id: properties
            .correlation_id()
            .as_ref()
            .map(|s| s.as_str().to_string()),
        reply_to: properties.reply_to().as_ref().map(|s| s.as_str().to_string()),
        request_type: properties
            .headers()
            .as_ref()
            .and_then(|h| header_string(h, employee_core::REQUEST_TYPE_HEADER)),
    };
    let inbound = InboundDelivery {
        delivery_tag: delivery.delivery_tag,
        redelivered: delivery.redelivered,
        headers,
        body: delivery.data,
    };
    (inbound, delivery.acker)
}

#[async_trait]
impl DeliverySource for AmqpConsumer {
    async fn next_delivery(&mut self) -> Option<InboundDelivery> {
        match self.consumer.next().await? {
            Ok(delivery) => {
                let (inbound, acker) = into_inbound(delivery);
                self.pending.insert(inbound.delivery_tag, acker);
                Some(inbound)
            }
            Err(e) => {
                error!(error = %e, "consumer stream failed");
                None
            }
        }
    }

    async fn settle(
        &mut self,
        delivery: &InboundDelivery,
        settlement: Settlement,
    ) -> anyhow::Result<()> {
        let acker = self
            .pending
            .remove(&delivery.delivery_tag)
            .ok_or_else(|| anyhow::anyhow!("unknown delivery tag {}", delivery.delivery_tag))?;
        match settlement {
            Settlement::Ack => acker.ack(BasicAckOptions::default()).await?,
            Settlement::DeadLetter { .. } => {
                acker
                    .reject(BasicRejectOptions { requeue: false })
                    .await?;
            }
            Settlement::Requeue { .. } => {
                acker.reject(BasicRejectOptions { requeue: true }).await?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AmqpPublisher
// ---------------------------------------------------------------------------

/// Publishes replies to the default exchange with publisher confirms enabled.
#[derive(Clone)]
pub struct AmqpPublisher {
    channel: Channel,
    confirms: mpsc::Sender<ConfirmEvent>,
}

impl AmqpPublisher {
    /// Puts `channel` in confirm mode; confirms are reported on `confirms`.
    ///
    /// # Errors
    ///
    /// Returns an error if confirm mode cannot be enabled.
    pub async fn new(channel: Channel, confirms: mpsc::Sender<ConfirmEvent>) -> anyhow::Result<Self> {
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        Ok(Self { channel, confirms })
    }
}

fn confirm_outcome(confirmation: lapin::Result<Confirmation>) -> ConfirmOutcome {
    match confirmation {
        Ok(Confirmation::Ack(None) | Confirmation::NotRequested) => ConfirmOutcome::Ack,
        // A returned message was unroutable (mandatory flag).
        Ok(Confirmation::Ack(Some(_))) => ConfirmOutcome::Nack {
            reason: Some("reply unroutable".to_string()),
        },
        Ok(Confirmation::Nack(_)) => ConfirmOutcome::Nack {
            reason: Some("rejected by broker".to_string()),
        },
        Err(e) => ConfirmOutcome::Nack {
            reason: Some(e.to_string()),
        },
    }
}

#[async_trait]
impl ReplyPublisher for AmqpPublisher {
    async fn publish(&self, reply: OutboundReply) -> anyhow::Result<()> {
        let properties = BasicProperties::default()
            .with_correlation_id(reply.correlation_id.clone().into())
            .with_content_type(JSON_CONTENT_TYPE.into());
        let confirm = self
            .channel
            .basic_publish(
                "",
                &reply.reply_to,
                BasicPublishOptions {
                    mandatory: true,
                    ..BasicPublishOptions::default()
                },
                &reply.body,
                properties,
            )
            .await?;

        let confirms = self.confirms.clone();
        let correlation_id = reply.correlation_id;
        tokio::spawn(async move {
            let outcome = confirm_outcome(confirm.await);
            let event = ConfirmEvent {
                correlation_id: Some(correlation_id),
                outcome,
            };
            if confirms.send(event).await.is_err() {
                warn!("confirm channel closed, dropping publisher confirm");
            }
        });
        Ok(())
    }
}
