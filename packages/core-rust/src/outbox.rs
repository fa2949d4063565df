//! Outbox ledger record: the durable witness that a correlation id has
//! already produced a response.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A response computed for one correlation id, kept until the broker
/// confirms delivery of the outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxRecord {
    /// Primary key; unique per logical request.
    pub correlation_id: String,
    /// Serialized `ResponseEnvelope`, republished verbatim on replay.
    pub payload: String,
    /// Destination the response was first published to, used for resends.
    pub reply_to: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OutboxRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(
        correlation_id: impl Into<String>,
        payload: impl Into<String>,
        reply_to: Option<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            payload: payload.into(),
            reply_to,
            created_at: Utc::now(),
        }
    }
}
