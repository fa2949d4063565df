//! Deadline for a routed employee request.
//!
//! Each [`RouteRequest`] carries its own `timeout_ms`; a handler still running
//! when it elapses is dropped and the call fails with
//! [`OperationError::Timeout`], which the retry policy treats as retryable.
//! A `timeout_ms` of zero disables the deadline.

use std::task::{Context, Poll};
use std::time::Duration;

use employee_core::ResponseEnvelope;
use tower::{Layer, Service};
use tracing::warn;

use crate::service::operation::{OperationError, RouteRequest};
use crate::service::router::RouteFuture;

#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutLayer;

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService { inner }
    }
}

/// Races the wrapped handler against the request's deadline.
#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
}

impl<S> Service<RouteRequest> for TimeoutService<S>
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
        let timeout_ms = req.timeout_ms;
        if timeout_ms == 0 {
            return Box::pin(self.inner.call(req));
        }

        let correlation_id = req.correlation_id.clone();
        let request_type = req.request_type;
        let handler = self.inner.call(req);
        Box::pin(async move {
            let deadline = Duration::from_millis(timeout_ms);
            tokio::time::timeout(deadline, handler).await.unwrap_or_else(|_| {
                warn!(
                    %correlation_id,
                    request_type = request_type.as_str(),
                    timeout_ms,
                    "handler deadline elapsed"
                );
                metrics::counter!(
                    "employee_route_timeouts_total",
                    "request_type" => request_type.as_str()
                )
                .increment(1);
                Err(OperationError::Timeout { timeout_ms })
            })
        })
    }
}
