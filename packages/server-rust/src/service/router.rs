//! Request routing: dispatches a `RouteRequest` to the handler registered for
//! its `RequestType`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use employee_core::{RequestType, ResponseEnvelope};
use tower::{Service, ServiceExt};

use super::operation::{OperationError, RouteRequest};

/// Boxed future returned by every routed call.
pub type RouteFuture = Pin<Box<dyn Future<Output = Result<ResponseEnvelope, OperationError>> + Send>>;

// ---------------------------------------------------------------------------
// RouteHandler (type-erased handler)
// ---------------------------------------------------------------------------

/// A handler service with its concrete type erased.
///
/// Each call clones the registered service and drives it with `oneshot`, so
/// readiness is polled per call and the router itself can be shared freely.
trait RouteHandler: Send + Sync {
    fn dispatch(&self, req: RouteRequest) -> RouteFuture;
}

struct ServiceWrapper<S>(S);

impl<S> RouteHandler for ServiceWrapper<S>
where
    S: Service<RouteRequest, Response = ResponseEnvelope, Error = OperationError>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
{
    fn dispatch(&self, req: RouteRequest) -> RouteFuture {
        Box::pin(self.0.clone().oneshot(req))
    }
}

// ---------------------------------------------------------------------------
// RequestRouter
// ---------------------------------------------------------------------------

/// Routes `RouteRequest` values to the handler registered for their type.
///
/// Requests whose type has no handler fail with
/// `OperationError::UnknownRequestType`.
#[derive(Clone, Default)]
pub struct RequestRouter {
    handlers: HashMap<RequestType, Arc<dyn RouteHandler>>,
}

impl RequestRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a request type, replacing any previous one.
    pub fn register<S>(&mut self, request_type: RequestType, service: S)
    where
        S: Service<RouteRequest, Response = ResponseEnvelope, Error = OperationError>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        self.handlers
            .insert(request_type, Arc::new(ServiceWrapper(service)));
    }

    #[must_use]
    pub fn handles(&self, request_type: RequestType) -> bool {
        self.handlers.contains_key(&request_type)
    }
}

impl Service<RouteRequest> for RequestRouter {
    type Response = ResponseEnvelope;
    type Error = OperationError;
    type Future = RouteFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: RouteRequest) -> Self::Future {
        match self.handlers.get(&req.request_type) {
            Some(handler) => handler.dispatch(req),
            None => {
                let request_type = req.request_type;
                Box::pin(async move { Err(OperationError::UnknownRequestType { request_type }) })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
