//! Employee Service Core: request/response envelopes, the employee model,
//! and outbox ledger records shared by the service and its clients.

pub mod employee;
pub mod envelope;
pub mod outbox;
pub mod request;

pub use employee::{Area, Employee, Location, Role};
pub use envelope::ResponseEnvelope;
pub use outbox::OutboxRecord;
pub use request::{
    InboundRequest, RequestBody, RequestType, UnknownRequestType, REQUEST_TYPE_HEADER,
};
