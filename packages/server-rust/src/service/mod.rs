//! Request processing framework.
//!
//! 1. **Consumer** (`consumer`): pulls deliveries and settles each one
//! 2. **Retry** (`retry`, `classify`): bounded attempts with backoff; fatal failures dead-letter
//! 3. **Processor** (`processor`): outbox-ledger idempotency around routing and publish
//! 4. **Routing** (`router`, `middleware`, `domain`): dispatch to employee handlers
//! 5. **Confirms** (`confirm`, `worker`): background cleanup of confirmed outbox entries;
//!    the consumer holds each ack until its reply is confirmed

pub mod classify;
pub mod config;
pub mod confirm;
pub mod consumer;
pub mod domain;
pub mod middleware;
pub mod operation;
pub mod processor;
pub mod retry;
pub mod router;
pub mod worker;

// Re-export key types for convenient access.
pub use classify::{ErrorClassifier, FailureClass, FailureKind, FatalClassifier, RetryClassifier};
pub use config::ServiceConfig;
pub use confirm::{ConfirmTracker, ConfirmWaiters, NackPolicy};
pub use consumer::{forward_shutdown, ConsumerStats, ServiceConsumer};
pub use domain::employee_router;
pub use middleware::{build_route_pipeline, RoutePipeline};
pub use operation::{OperationError, ProcessError, RouteRequest};
pub use processor::{DeliveryHandler, Handled, MessageProcessor};
pub use retry::{ExponentialBackoff, RetryAttemptState, RetryExecutor};
pub use router::RequestRouter;
pub use worker::{BackgroundRunnable, BackgroundWorker};
