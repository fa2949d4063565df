//! Metrics middleware for routed requests.
//!
//! Wraps each call in a `route` span recording duration and outcome, and
//! feeds `employee_route_calls_total` / `employee_route_duration_seconds`.

use std::task::{Context, Poll};
use std::time::Instant;

use employee_core::ResponseEnvelope;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::operation::{OperationError, RouteRequest};
use crate::service::router::RouteFuture;

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records route duration and outcome in tracing spans.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

/// Outcome label for a routed call: business failures are `rejected`, not
/// errors.
fn outcome(result: &Result<ResponseEnvelope, OperationError>) -> &'static str {
    match result {
        Ok(envelope) if envelope.success => "ok",
        Ok(_) => "rejected",
        Err(_) => "error",
    }
}

impl<S> Service<RouteRequest> for MetricsService<S>
where
    S: Service<RouteRequest, Response = ResponseEnvelope, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = ResponseEnvelope;
    type Error = OperationError;
    type Future = RouteFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: RouteRequest) -> Self::Future {
        let request_type = req.request_type.as_str();
        let span = info_span!(
            "route",
            correlation_id = %req.correlation_id,
            request_type,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(req);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;

                let elapsed = start.elapsed();
                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                let outcome = outcome(&result);
                metrics::counter!(
                    "employee_route_calls_total",
                    "request_type" => request_type,
                    "outcome" => outcome
                )
                .increment(1);
                metrics::histogram!("employee_route_duration_seconds", "request_type" => request_type)
                    .record(elapsed.as_secs_f64());
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);
                tracing::debug!(request_type, duration_ms, outcome, "route complete");

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
