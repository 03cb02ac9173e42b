//! Error types for monetization sessions.

use std::fmt;

/// Base error type for monetization operations.
#[derive(Debug, thiserror::Error)]
pub enum MonetizationError {
    /// The host document exposes no monetization object.
    #[error("{0}")]
    UnsupportedEnvironment(#[from] UnsupportedEnvironmentError),

    /// Readiness was queried before discovery ran.
    #[error("{0}")]
    Unconfigured(#[from] UnconfiguredError),

    /// A progress message from the channel could not be parsed.
    #[error("{0}")]
    MalformedProgress(#[from] MalformedProgressError),
}

/// The host document has no monetization object.
///
/// Returned when a [`MonetizationHandler`](crate::MonetizationHandler) is built
/// against a document whose [`monetization`](crate::document::Document::monetization)
/// accessor yields nothing. The environment cannot be used for payments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnsupportedEnvironmentError;

impl fmt::Display for UnsupportedEnvironmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "No web monetization support in host document")
    }
}

impl std::error::Error for UnsupportedEnvironmentError {}

/// The monetization state is undefined.
///
/// Discovery has never run against the host object, so there is neither a
/// target nor a `stopped` fallback. This is a programming error on the
/// caller's side, not a "not ready" answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnconfiguredError;

impl fmt::Display for UnconfiguredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Monetization state is undefined: no meta[name=\"monetization\"] discovery has run"
        )
    }
}

impl std::error::Error for UnconfiguredError {}

/// A channel message was not a valid `{ amount, assetCode, assetScale }` payload.
#[derive(Debug, thiserror::Error)]
#[error("Malformed progress payload: {source}")]
pub struct MalformedProgressError {
    /// The underlying JSON error.
    #[from]
    source: serde_json::Error,
}

impl MalformedProgressError {
    /// Returns the JSON error that rejected the payload.
    #[must_use]
    pub const fn json_error(&self) -> &serde_json::Error {
        &self.source
    }
}
