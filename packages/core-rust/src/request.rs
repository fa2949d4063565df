//! Inbound request contracts: request-type tags, the body wrapper, and the
//! validated [`InboundRequest`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header carrying the request-type tag on inbound messages.
pub const REQUEST_TYPE_HEADER: &str = "requestType";

/// Operations this service supports, used to route a request.
///
/// Wire tags are `CREATE_EMPLOYEE` and `GET_EMPLOYEE_BY_ID`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    /// Create a new employee from the payload.
    CreateEmployee,
    /// Look up an employee by numeric id.
    GetEmployeeById,
}

impl RequestType {
    /// All supported request types.
    pub const ALL: [RequestType; 2] = [RequestType::CreateEmployee, RequestType::GetEmployeeById];

    /// Wire tag for this request type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateEmployee => "CREATE_EMPLOYEE",
            Self::GetEmployeeById => "GET_EMPLOYEE_BY_ID",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a request-type tag is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized request type [{0}]")]
pub struct UnknownRequestType(pub String);

impl FromStr for RequestType {
    type Err = UnknownRequestType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownRequestType(s.to_string()))
    }
}

/// JSON wrapper around the request payload: `{"requestBody": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBody {
    pub request_body: Value,
}

/// A request whose correlation metadata has been validated.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRequest {
    /// Caller-assigned token, unique per logical attempt chain.
    pub correlation_id: String,
    /// Destination the response is published to.
    pub reply_to: String,
    /// Operation to route to.
    pub request_type: RequestType,
    /// Operation-specific payload.
    pub payload: Value,
}
