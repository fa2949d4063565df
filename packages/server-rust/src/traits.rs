use async_trait::async_trait;
use employee_core::{Employee, OutboxRecord};

use crate::broker::{InboundDelivery, OutboundReply, Settlement};

/// Keyed idempotency log of already-computed responses.
/// Implementations: in-memory (`DashMap`), `PostgreSQL`.
///
/// Concurrency contract: `find`, `save` and `delete` may run concurrently
/// from the processing path and the confirm path. Operations on different
/// correlation ids are independent; operations on the same id must be
/// atomic per key (a per-key lock or a primary-key upsert/delete suffices).
#[async_trait]
pub trait OutboxLedger: Send + Sync {
    /// Look up the record for a correlation id.
    async fn find(&self, correlation_id: &str) -> anyhow::Result<Option<OutboxRecord>>;

    /// Persist a record. An existing record for the same id is kept.
    async fn save(&self, record: OutboxRecord) -> anyhow::Result<()>;

    /// Remove the record for a correlation id. Deleting a missing id is a no-op.
    async fn delete(&self, correlation_id: &str) -> anyhow::Result<()>;
}

/// Persistence for the employee business entity.
#[async_trait]
pub trait EmployeeStore: Send + Sync {
    /// Load an employee by id.
    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<Employee>>;

    /// Store an employee, assigning an id when `employee.id` is 0.
    /// Returns the stored employee.
    async fn save(&self, employee: Employee) -> anyhow::Result<Employee>;
}

/// Publishes replies to their reply destination.
///
/// Delivery confirmation is asynchronous: implementations report the broker
/// verdict for every published reply as a `ConfirmEvent` on the confirm
/// channel they were constructed with. `Ok` from `publish` only means the
/// message was handed to the broker.
#[async_trait]
pub trait ReplyPublisher: Send + Sync {
    async fn publish(&self, reply: OutboundReply) -> anyhow::Result<()>;
}

/// Source of inbound request deliveries (a work-queue consumer).
#[async_trait]
pub trait DeliverySource: Send {
    /// Wait for the next delivery. `None` once the source is closed.
    async fn next_delivery(&mut self) -> Option<InboundDelivery>;

    /// Settle a delivery previously returned by `next_delivery`.
    async fn settle(
        &mut self,
        delivery: &InboundDelivery,
        settlement: Settlement,
    ) -> anyhow::Result<()>;
}
