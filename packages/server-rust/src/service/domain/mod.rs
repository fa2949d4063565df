//! Domain request handlers.
//!
//! Each handler is a `tower::Service<RouteRequest>` holding the employee
//! store; [`employee_router`] registers all of them on a `RequestRouter`.

pub mod employee;

use std::sync::Arc;
use std::task::{Context, Poll};

use employee_core::{RequestType, ResponseEnvelope};
use tower::Service;

use crate::service::operation::{OperationError, RouteRequest};
use crate::service::router::{RequestRouter, RouteFuture};
use crate::traits::EmployeeStore;

// ---------------------------------------------------------------------------
// Macro for store-backed handler services
// ---------------------------------------------------------------------------

/// Generate a handler service that forwards each request to an async
/// function taking the employee store.
macro_rules! store_handler {
    (
        $(#[$meta:meta])*
        $name:ident, $handler:path
    ) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name {
            store: Arc<dyn EmployeeStore>,
        }

        impl $name {
            #[must_use]
            pub fn new(store: Arc<dyn EmployeeStore>) -> Self {
                Self { store }
            }
        }

        impl Service<RouteRequest> for $name {
            type Response = ResponseEnvelope;
            type Error = OperationError;
            type Future = RouteFuture;

            fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
                Poll::Ready(Ok(()))
            }

            fn call(&mut self, req: RouteRequest) -> Self::Future {
                let store = Arc::clone(&self.store);
                Box::pin(async move { $handler(store.as_ref(), req).await })
            }
        }
    };
}

store_handler!(
    /// Handles `CREATE_EMPLOYEE`.
    CreateEmployeeHandler,
    employee::create_employee
);

store_handler!(
    /// Handles `GET_EMPLOYEE_BY_ID`.
    GetEmployeeByIdHandler,
    employee::get_employee_by_id
);

/// Router with a handler registered for every supported request type.
#[must_use]
pub fn employee_router(store: Arc<dyn EmployeeStore>) -> RequestRouter {
    let mut router = RequestRouter::new();
    router.register(
        RequestType::CreateEmployee,
        CreateEmployeeHandler::new(Arc::clone(&store)),
    );
    router.register(
        RequestType::GetEmployeeById,
        GetEmployeeByIdHandler::new(store),
    );
    router
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::storage::MemoryEmployeeStore;

    #[test]
    fn registers_every_request_type() {
        let router = employee_router(Arc::new(MemoryEmployeeStore::new()));
        for request_type in RequestType::ALL {
            assert!(router.handles(request_type), "{request_type} not routed");
        }
    }

    #[tokio::test]
    async fn created_employee_is_visible_to_lookup() {
        let router = employee_router(Arc::new(MemoryEmployeeStore::new()));

        let create = RouteRequest::new(
            "c1",
            RequestType::CreateEmployee,
            json!({"name": "A", "startDate": "2021-04-08T12:30:00"}),
        );
        let created = router.clone().oneshot(create).await.unwrap();
        let id = created.response_body.unwrap()["id"].clone();

        let get = RouteRequest::new("c2", RequestType::GetEmployeeById, id);
        let found = router.oneshot(get).await.unwrap();
        assert!(found.success);
        assert_eq!(found.response_body.unwrap()["name"], json!("A"));
    }
}
