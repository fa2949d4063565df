//! Failure classification: maps processing errors to a closed set of kinds
//! and decides which are fatal, which are retried, and which become a failed
//! response.
//!
//! | Kind                 | Class      | Retried |
//! |----------------------|------------|---------|
//! | `MissingMetadata`    | Fatal      | no      |
//! | `MalformedBody`      | Fatal      | no      |
//! | `UnknownRequestType` | Fatal      | no      |
//! | `InvalidPayload`     | Definitive | no      |
//! | `StoreUnavailable`   | Retryable  | yes     |
//! | `Timeout`            | Retryable  | yes     |
//! | `Ledger`             | Retryable  | yes     |
//! | `Serialization`      | Retryable  | yes     |
//! | `Publish`            | Retryable  | yes     |
//! | `Internal`           | Retryable  | yes     |

use std::collections::{HashMap, HashSet};

use super::operation::{OperationError, ProcessError};

// ---------------------------------------------------------------------------
// FailureKind / FailureClass
// ---------------------------------------------------------------------------

/// Root cause of a processing failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Correlation id, reply destination or request-type header absent.
    MissingMetadata,
    /// Body is not the JSON request wrapper.
    MalformedBody,
    /// Request-type tag not recognised or not routable.
    UnknownRequestType,
    /// Payload has the wrong shape for its request type.
    InvalidPayload,
    StoreUnavailable,
    Timeout,
    Ledger,
    Serialization,
    Publish,
    Internal,
}

/// How the processor reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Cannot succeed on any attempt: dead-letter immediately.
    Fatal,
    /// May succeed later: handed to the retry policy.
    Retryable,
    /// A final answer for the caller: captured as a failed response envelope.
    Definitive,
}

impl OperationError {
    /// Root failure kind of a routing error.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::UnknownRequestType { .. } => FailureKind::UnknownRequestType,
            Self::InvalidPayload { .. } => FailureKind::InvalidPayload,
            Self::Unavailable(_) => FailureKind::StoreUnavailable,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Internal(_) => FailureKind::Internal,
        }
    }
}

impl ProcessError {
    /// Root failure kind, looking through wrapped routing errors.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::MissingHeader { .. } => FailureKind::MissingMetadata,
            Self::MalformedBody(_) => FailureKind::MalformedBody,
            Self::UnknownRequestType(_) => FailureKind::UnknownRequestType,
            Self::Route(op) => op.kind(),
            Self::Ledger(_) => FailureKind::Ledger,
            Self::Encode(_) => FailureKind::Serialization,
            Self::Publish { .. } => FailureKind::Publish,
        }
    }
}

// ---------------------------------------------------------------------------
// FatalClassifier
// ---------------------------------------------------------------------------

/// Decides which failures must never be requeued.
#[derive(Debug, Clone)]
pub struct FatalClassifier {
    fatal_kinds: HashSet<FailureKind>,
}

impl FatalClassifier {
    /// Classifier with the given fatal kinds.
    #[must_use]
    pub fn new(fatal_kinds: impl IntoIterator<Item = FailureKind>) -> Self {
        Self {
            fatal_kinds: fatal_kinds.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn is_fatal_kind(&self, kind: FailureKind) -> bool {
        self.fatal_kinds.contains(&kind)
    }

    #[must_use]
    pub fn is_fatal(&self, err: &ProcessError) -> bool {
        self.is_fatal_kind(err.kind())
    }
}

impl Default for FatalClassifier {
    fn default() -> Self {
        Self::new([
            FailureKind::MissingMetadata,
            FailureKind::MalformedBody,
            FailureKind::UnknownRequestType,
        ])
    }
}

// ---------------------------------------------------------------------------
// RetryClassifier
// ---------------------------------------------------------------------------

/// Decides whether another attempt may be made after a failure.
///
/// Kinds absent from the table fall into the default bucket.
#[derive(Debug, Clone)]
pub struct RetryClassifier {
    max_attempts: u32,
    table: HashMap<FailureKind, bool>,
    default_retryable: bool,
}

impl RetryClassifier {
    /// Classifier allowing at most `max_attempts` attempts, with fatal kinds
    /// and `InvalidPayload` marked not retryable and everything else retryable.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        let table = [
            FailureKind::MissingMetadata,
            FailureKind::MalformedBody,
            FailureKind::UnknownRequestType,
            FailureKind::InvalidPayload,
        ]
        .into_iter()
        .map(|kind| (kind, false))
        .collect();

        Self {
            max_attempts,
            table,
            default_retryable: true,
        }
    }

    /// Overrides the retry decision for one kind.
    #[must_use]
    pub fn with_rule(mut self, kind: FailureKind, retryable: bool) -> Self {
        self.table.insert(kind, retryable);
        self
    }

    /// Sets the decision for kinds without an explicit rule.
    #[must_use]
    pub fn with_default(mut self, retryable: bool) -> Self {
        self.default_retryable = retryable;
        self
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn is_retryable(&self, kind: FailureKind) -> bool {
        self.table
            .get(&kind)
            .copied()
            .unwrap_or(self.default_retryable)
    }

    /// Whether attempt `attempt + 1` may be made. `attempt` counts attempts
    /// already made, starting at 1.
    #[must_use]
    pub fn can_retry(&self, last_failure: Option<&ProcessError>, attempt: u32) -> bool {
        let under_ceiling = attempt < self.max_attempts;
        match last_failure {
            None => under_ceiling,
            Some(err) => self.is_retryable(err.kind()) && under_ceiling,
        }
    }
}

impl Default for RetryClassifier {
    fn default() -> Self {
        Self::new(3)
    }
}

// ---------------------------------------------------------------------------
// ErrorClassifier
// ---------------------------------------------------------------------------

/// Maps a failure kind to the [`FailureClass`] the processor switches on.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    fatal: FatalClassifier,
    definitive_kinds: HashSet<FailureKind>,
}

impl ErrorClassifier {
    #[must_use]
    pub fn new(
        fatal: FatalClassifier,
        definitive_kinds: impl IntoIterator<Item = FailureKind>,
    ) -> Self {
        Self {
            fatal,
            definitive_kinds: definitive_kinds.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn classify(&self, kind: FailureKind) -> FailureClass {
        if self.fatal.is_fatal_kind(kind) {
            FailureClass::Fatal
        } else if self.definitive_kinds.contains(&kind) {
            FailureClass::Definitive
        } else {
            FailureClass::Retryable
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(FatalClassifier::default(), [FailureKind::InvalidPayload])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
