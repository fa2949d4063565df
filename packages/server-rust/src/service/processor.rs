//! Idempotent processing of one inbound delivery.
//!
//! For each correlation id the processor either replays the response stored
//! in the outbox ledger, or routes the request, stores the serialized
//! response, and only then publishes it. Deliveries sharing a correlation id
//! are processed one at a time.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use employee_core::{InboundRequest, OutboxRecord, RequestBody, RequestType, ResponseEnvelope};
use tower::{Service, ServiceExt};
use tracing::{debug, info};

use super::classify::{ErrorClassifier, FailureClass};
use super::operation::{OperationError, ProcessError, RouteRequest, DEFAULT_ROUTE_TIMEOUT_MS};
use crate::broker::{InboundDelivery, OutboundReply};
use crate::traits::{OutboxLedger, ReplyPublisher};

const CORRELATION_ID_HEADER: &str = "correlationId";
const REPLY_TO_HEADER: &str = "replyTo";

// ---------------------------------------------------------------------------
// DeliveryHandler
// ---------------------------------------------------------------------------

/// Result of a successfully handled delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    /// Business logic ran and the new response was published.
    Processed(String),
    /// The response stored for this correlation id was republished.
    Replayed(String),
}

impl Handled {
    /// The serialized response that was published.
    #[must_use]
    pub fn payload(&self) -> &str {
        match self {
            Self::Processed(payload) | Self::Replayed(payload) => payload,
        }
    }

    #[must_use]
    pub fn is_replay(&self) -> bool {
        matches!(self, Self::Replayed(_))
    }
}

/// Processes a single delivery attempt.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, delivery: &InboundDelivery) -> Result<Handled, ProcessError>;
}

// ---------------------------------------------------------------------------
// MessageProcessor
// ---------------------------------------------------------------------------

/// Orchestrates ledger lookup, routing, ledger save and publish.
///
/// Generic over the routing service so tests can substitute a stub; in
/// production it is the [`RoutePipeline`](super::middleware::RoutePipeline).
pub struct MessageProcessor<R> {
    ledger: Arc<dyn OutboxLedger>,
    router: R,
    publisher: Arc<dyn ReplyPublisher>,
    classifier: ErrorClassifier,
    route_timeout_ms: u64,
    in_flight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl<R> MessageProcessor<R>
where
    R: Service<RouteRequest, Response = ResponseEnvelope, Error = OperationError>
        + Clone
        + Send
        + Sync
        + 'static,
    R::Future: Send,
{
    #[must_use]
    pub fn new(
        ledger: Arc<dyn OutboxLedger>,
        router: R,
        publisher: Arc<dyn ReplyPublisher>,
    ) -> Self {
        Self {
            ledger,
            router,
            publisher,
            classifier: ErrorClassifier::default(),
            route_timeout_ms: DEFAULT_ROUTE_TIMEOUT_MS,
            in_flight: DashMap::new(),
        }
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    #[must_use]
    pub fn with_route_timeout_ms(mut self, route_timeout_ms: u64) -> Self {
        self.route_timeout_ms = route_timeout_ms;
        self
    }

    /// Correlation ids currently being processed.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    async fn handle_request(&self, request: &InboundRequest) -> Result<Handled, ProcessError> {
        let existing = self
            .ledger
            .find(&request.correlation_id)
            .await
            .map_err(ProcessError::Ledger)?;

        let handled = match existing {
            Some(record) => {
                info!(
                    correlation_id = %request.correlation_id,
                    request_type = %request.request_type,
                    "replaying stored response"
                );
                metrics::counter!("employee_requests_replayed_total").increment(1);
                Handled::Replayed(record.payload)
            }
            None => {
                let envelope = self.route(request).await?;
                let payload = envelope.to_json().map_err(ProcessError::Encode)?;
                self.ledger
                    .save(OutboxRecord::new(
                        request.correlation_id.clone(),
                        payload.clone(),
                        Some(request.reply_to.clone()),
                    ))
                    .await
                    .map_err(ProcessError::Ledger)?;
                info!(
                    correlation_id = %request.correlation_id,
                    request_type = %request.request_type,
                    success = envelope.success,
                    "request processed"
                );
                metrics::counter!("employee_requests_processed_total").increment(1);
                Handled::Processed(payload)
            }
        };

        let reply = OutboundReply {
            correlation_id: request.correlation_id.clone(),
            reply_to: request.reply_to.clone(),
            body: handled.payload().as_bytes().to_vec(),
        };
        self.publisher
            .publish(reply)
            .await
            .map_err(|source| ProcessError::Publish {
                reply_to: request.reply_to.clone(),
                source,
            })?;

        Ok(handled)
    }

    async fn route(&self, request: &InboundRequest) -> Result<ResponseEnvelope, ProcessError> {
        let route_request = RouteRequest::new(
            request.correlation_id.clone(),
            request.request_type,
            request.payload.clone(),
        )
        .with_timeout_ms(self.route_timeout_ms);

        match self.router.clone().oneshot(route_request).await {
            Ok(envelope) => Ok(envelope),
            Err(err) => match self.classifier.classify(err.kind()) {
                FailureClass::Definitive => {
                    debug!(
                        correlation_id = %request.correlation_id,
                        error = %err,
                        "route failed definitively, replying with failure"
                    );
                    Ok(ResponseEnvelope::failure(err.to_string()))
                }
                FailureClass::Fatal | FailureClass::Retryable => Err(ProcessError::Route(err)),
            },
        }
    }

    fn lock_for(&self, correlation_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.in_flight
                .entry(correlation_id.to_string())
                .or_default()
                .value(),
        )
    }

    fn release(&self, correlation_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        drop(lock);
        self.in_flight
            .remove_if(correlation_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[async_trait]
impl<R> DeliveryHandler for MessageProcessor<R>
where
    R: Service<RouteRequest, Response = ResponseEnvelope, Error = OperationError>
        + Clone
        + Send
        + Sync
        + 'static,
    R::Future: Send,
{
    async fn handle(&self, delivery: &InboundDelivery) -> Result<Handled, ProcessError> {
        let request = parse_request(delivery)?;

        let lock = self.lock_for(&request.correlation_id);
        let result = {
            let _guard = lock.lock().await;
            self.handle_request(&request).await
        };
        self.release(&request.correlation_id, lock);
        result
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Validates correlation metadata and decodes the request wrapper.
///
/// # Errors
///
/// Returns a fatal `ProcessError` when a header is missing or empty, the
/// request type is unknown, or the body is not `{"requestBody": ...}` JSON.
pub fn parse_request(delivery: &InboundDelivery) -> Result<InboundRequest, ProcessError> {
    let headers = &delivery.headers;
    let correlation_id = required_header(headers.correlation_id.as_deref(), CORRELATION_ID_HEADER)?;
    let reply_to = required_header(headers.reply_to.as_deref(), REPLY_TO_HEADER)?;
    let request_type: RequestType = required_header(
        headers.request_type.as_deref(),
        employee_core::REQUEST_TYPE_HEADER,
    )?
    .parse()?;

    let body: RequestBody =
        serde_json::from_slice(&delivery.body).map_err(ProcessError::MalformedBody)?;

    Ok(InboundRequest {
        correlation_id,
        reply_to,
        request_type,
        payload: body.request_body,
    })
}

fn required_header(value: Option<&str>, header: &'static str) -> Result<String, ProcessError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ProcessError::MissingHeader { header }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
