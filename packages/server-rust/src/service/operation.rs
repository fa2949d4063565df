//! Request and error types flowing through the routing pipeline.

use employee_core::{RequestType, UnknownRequestType};
use serde_json::Value;

/// Default route timeout in milliseconds.
pub const DEFAULT_ROUTE_TIMEOUT_MS: u64 = 30_000;

/// A parsed request handed to the router.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub correlation_id: String,
    pub request_type: RequestType,
    /// The `requestBody` value of the inbound message.
    pub payload: Value,
    /// Upper bound for handler execution, enforced by `TimeoutLayer`.
    pub timeout_ms: u64,
}

impl RouteRequest {
    #[must_use]
    pub fn new(correlation_id: impl Into<String>, request_type: RequestType, payload: Value) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            request_type,
            payload,
            timeout_ms: DEFAULT_ROUTE_TIMEOUT_MS,
        }
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Errors returned by request handlers and routing middleware.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("no handler registered for request type [{request_type}]")]
    UnknownRequestType { request_type: RequestType },
    #[error("invalid payload for {request_type}: {source}")]
    InvalidPayload {
        request_type: RequestType,
        #[source]
        source: serde_json::Error,
    },
    #[error("employee store unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Errors from processing one inbound delivery.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("no {header} header set in message")]
    MissingHeader { header: &'static str },
    #[error("request body is not a valid request: {0}")]
    MalformedBody(#[source] serde_json::Error),
    #[error(transparent)]
    UnknownRequestType(#[from] UnknownRequestType),
    #[error(transparent)]
    Route(#[from] OperationError),
    #[error("outbox ledger failure: {0}")]
    Ledger(#[source] anyhow::Error),
    #[error("failed to encode response: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to publish reply to [{reply_to}]: {source}")]
    Publish {
        reply_to: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_request_defaults_timeout() {
        let req = RouteRequest::new("c1", RequestType::GetEmployeeById, Value::from(1));
        assert_eq!(req.timeout_ms, DEFAULT_ROUTE_TIMEOUT_MS);
        assert_eq!(req.with_timeout_ms(50).timeout_ms, 50);
    }

    #[test]
    fn error_messages_name_the_failure() {
        let err = ProcessError::MissingHeader {
            header: "correlationId",
        };
        assert_eq!(err.to_string(), "no correlationId header set in message");

        let err = ProcessError::from(UnknownRequestType("FIRE_EMPLOYEE".to_string()));
        assert_eq!(err.to_string(), "unrecognized request type [FIRE_EMPLOYEE]");

        let err = ProcessError::from(OperationError::Timeout { timeout_ms: 50 });
        assert_eq!(err.to_string(), "operation timed out after 50ms");
    }
}
