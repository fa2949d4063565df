//! Broker-agnostic message types exchanged between the adapters and the
//! processing core.

/// Correlation metadata read from an inbound message.
///
/// Every field is optional on the wire; the processor decides which absences
/// are fatal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryHeaders {
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub request_type: Option<String>,
}

/// One delivery of an inbound request message.
///
/// The same logical request may arrive several times (at-least-once
/// delivery); each arrival gets its own `delivery_tag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundDelivery {
    /// Broker-assigned tag used to settle this delivery.
    pub delivery_tag: u64,
    /// Whether the broker flagged this as a redelivery.
    pub redelivered: bool,
    pub headers: DeliveryHeaders,
    /// Raw request body (`{"requestBody": ...}` JSON).
    pub body: Vec<u8>,
}

/// A response message ready to be published to a reply destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundReply {
    /// Copied from the request so the confirm can be traced back to the
    /// outbox entry.
    pub correlation_id: String,
    pub reply_to: String,
    /// Serialized `ResponseEnvelope`.
    pub body: Vec<u8>,
}

/// Broker verdict on a published reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The broker durably accepted the message.
    Ack,
    /// The broker refused or lost the message.
    Nack { reason: Option<String> },
}

/// Publisher confirm for one outbound reply, pushed onto the confirm channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmEvent {
    /// Correlation id of the confirmed reply. `None` when the broker client
    /// could not attach correlation data.
    pub correlation_id: Option<String>,
    pub outcome: ConfirmOutcome,
}

impl ConfirmEvent {
    #[must_use]
    pub fn ack(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            outcome: ConfirmOutcome::Ack,
        }
    }

    #[must_use]
    pub fn nack(correlation_id: impl Into<String>, reason: Option<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            outcome: ConfirmOutcome::Nack { reason },
        }
    }
}

/// Final disposition of an inbound delivery. Each delivery is settled
/// exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// The reply was published and the broker confirmed it.
    Ack,
    /// Return the message to the work queue for redelivery. Used when the
    /// reply was published but not confirmed; the redelivery replays the
    /// stored response.
    Requeue { reason: String },
    /// Reject without requeue so the broker routes the message, unmodified,
    /// to the dead-letter destination.
    DeadLetter { reason: String, attempts: u32 },
}

impl Settlement {
    #[must_use]
    pub fn is_dead_letter(&self) -> bool {
        matches!(self, Self::DeadLetter { .. })
    }
}
