//! Employee Service: idempotent request/reply consumer over a message broker,
//! with an outbox ledger, bounded retries, and publisher-confirm cleanup.

pub mod broker;
pub mod service;
pub mod storage;
pub mod traits;

pub use traits::{DeliverySource, EmployeeStore, OutboxLedger, ReplyPublisher};
