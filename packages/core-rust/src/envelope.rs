//! Response envelope returned to the caller's reply destination.
//!
//! Every request produces exactly one [`ResponseEnvelope`]. Business outcomes,
//! including rejected input, are carried as data in the envelope rather than
//! as errors, so the caller never has to tell "service down" apart from
//! "validation failed" through the same channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of a single request, serialized as
/// `{"success": .., "errorMessage": .., "responseBody": ..}`.
///
/// `error_message` is present iff `success` is false. `response_body` may be
/// absent even on success for operations that have nothing to return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    /// Whether the request was fulfilled.
    pub success: bool,
    /// Human-readable reason for a failed request.
    pub error_message: Option<String>,
    /// Operation-specific result body.
    pub response_body: Option<Value>,
}

impl ResponseEnvelope {
    /// Successful outcome carrying a body.
    #[must_use]
    pub fn success(body: Value) -> Self {
        Self {
            success: true,
            error_message: None,
            response_body: Some(body),
        }
    }

    /// Successful outcome with nothing to return.
    #[must_use]
    pub fn empty_success() -> Self {
        Self {
            success: true,
            error_message: None,
            response_body: None,
        }
    }

    /// Failed outcome with the reason surfaced to the caller.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            response_body: None,
        }
    }

    /// Serializes the envelope into the JSON wire representation.
    ///
    /// # Errors
    ///
    /// Returns an error if the response body cannot be serialized.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parses an envelope from its JSON wire representation.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is not a valid envelope.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
