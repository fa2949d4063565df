//! Broker adapters and the message types they exchange with the service.
//!
//! - [`message`]: broker-agnostic deliveries, replies, confirms, settlements
//! - [`memory`]: in-process broker for tests and local runs
//! - `amqp`: RabbitMQ over `lapin` (feature `amqp`)

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod memory;
pub mod message;

pub use memory::{ConfirmMode, InMemoryBroker, MemoryConsumer, MemoryPublisher};
pub use message::{
    ConfirmEvent, ConfirmOutcome, DeliveryHeaders, InboundDelivery, OutboundReply, Settlement,
};
