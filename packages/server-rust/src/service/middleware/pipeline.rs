//! Pipeline composition: wraps the request router in the middleware layers.

use tower::ServiceBuilder;

use super::metrics::{MetricsLayer, MetricsService};
use super::timeout::{TimeoutLayer, TimeoutService};
use crate::service::router::RequestRouter;

/// The routing service used by the message processor.
pub type RoutePipeline = TimeoutService<MetricsService<RequestRouter>>;

/// Build the route pipeline around a `RequestRouter`.
///
/// Layer order (outermost to innermost):
/// 1. `TimeoutLayer` -- enforce per-request timeouts
/// 2. `MetricsLayer` -- record timing and outcome (closest to the handler)
#[must_use]
pub fn build_route_pipeline(router: RequestRouter) -> RoutePipeline {
    ServiceBuilder::new()
        .layer(TimeoutLayer)
        .layer(MetricsLayer)
        .service(router)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::task::{Context, Poll};
    use std::time::Duration;

    use employee_core::{RequestType, ResponseEnvelope};
    use serde_json::json;
    use tower::{Service, ServiceExt};

    use super::*;
    use crate::service::operation::{OperationError, RouteRequest};
    use crate::service::router::RouteFuture;

    #[derive(Clone)]
    struct SleepyHandler;

    impl Service<RouteRequest> for SleepyHandler {
        type Response = ResponseEnvelope;
        type Error = OperationError;
        type Future = RouteFuture;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: RouteRequest) -> Self::Future {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(ResponseEnvelope::empty_success())
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pipeline_applies_timeout_to_routed_calls() {
        let mut router = RequestRouter::new();
        router.register(RequestType::CreateEmployee, SleepyHandler);
        let pipeline = build_route_pipeline(router);

        let req = RouteRequest::new("c1", RequestType::CreateEmployee, json!({})).with_timeout_ms(100);
        let err = pipeline.clone().oneshot(req).await.unwrap_err();
        assert!(matches!(err, OperationError::Timeout { timeout_ms: 100 }));

        let req = RouteRequest::new("c2", RequestType::CreateEmployee, json!({})).with_timeout_ms(10_000);
        assert!(pipeline.oneshot(req).await.unwrap().success);
    }

    #[tokio::test]
    async fn pipeline_surfaces_unknown_request_type() {
        let pipeline = build_route_pipeline(RequestRouter::new());
        let req = RouteRequest::new("c1", RequestType::GetEmployeeById, json!(1));
        let err = pipeline.oneshot(req).await.unwrap_err();
        assert!(matches!(err, OperationError::UnknownRequestType { .. }));
    }
}
