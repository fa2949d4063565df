//! Tower middleware layers for the route pipeline.
//!
//! - [`timeout`]: Per-request timeout enforcement
//! - [`metrics`]: Route timing and outcome via `tracing` spans
//! - [`pipeline`]: Composes the layers around the request router

pub mod metrics;
pub mod pipeline;
pub mod timeout;

pub use metrics::MetricsLayer;
pub use pipeline::{build_route_pipeline, RoutePipeline};
pub use timeout::TimeoutLayer;
