//! Error types.
//!
//! Matchers never fail: decode problems surface as a
//! [`MatchOutcome::Mismatch`](crate::matcher::MatchOutcome). The types here
//! cover rule construction, dispatch and verification.

use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while building rules or fixtures.
#[derive(Debug, Error)]
pub enum RuleError {
    /// A regular expression did not compile.
    #[error("invalid regex '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A fixture file could not be read.
    #[error("unable to load fixture '{path}': {source}")]
    Fixture {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// An expected form body could not be decoded.
    #[error("invalid form body: {0}")]
    InvalidForm(String),

    /// A base64 fixture could not be decoded.
    #[error("invalid base64 content: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    /// A status code outside 100..=599.
    #[error("invalid status code: {0}")]
    InvalidStatus(u16),
}

/// A fault injected by a rule in place of a response.
///
/// Dispatch hands the fault back to the caller untouched; the call is still
/// recorded, without a response.
#[derive(Debug, Clone, Error)]
pub enum Fault {
    /// The remote end refused the connection.
    #[error("connection refused")]
    ConnectionRefused,

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// A generic failure with a message.
    #[error("{0}")]
    Message(String),

    /// A caller-supplied error, returned as-is.
    #[error(transparent)]
    Custom(Arc<dyn StdError + Send + Sync>),
}

impl Fault {
    /// Wrap an arbitrary error.
    pub fn custom<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Fault::Custom(Arc::new(error))
    }

    /// Downcast a [`Fault::Custom`] back to the injected error type.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Fault::Custom(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// Errors returned from [`Dispatcher::dispatch`](crate::Dispatcher::dispatch).
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The matched rule injects a fault.
    #[error("injected fault: {0}")]
    Fault(#[source] Fault),

    /// The matched rule's body could not be generated.
    #[error("failed to generate body for rule {rule}: {message}")]
    BodyGeneration { rule: String, message: String },
}

impl DispatchError {
    /// The injected fault, if that is what this error is.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            DispatchError::Fault(fault) => Some(fault),
            DispatchError::BodyGeneration { .. } => None,
        }
    }
}

/// A failed call verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// The number of matching calls differs from the expected count.
    #[error("expected {expected} call(s) matching {pattern} but found {actual}")]
    CountMismatch {
        expected: usize,
        actual: usize,
        pattern: String,
    },

    /// No recorded call matches.
    #[error("expected at least 1 call matching {pattern} but found 0")]
    NotCalled { pattern: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("backend exploded")]
    struct Boom;

    #[test]
    fn test_custom_fault_downcast() {
        let fault = Fault::custom(Boom);
        assert_eq!(fault.to_string(), "backend exploded");
        assert!(fault.downcast_ref::<Boom>().is_some());
        assert!(Fault::Timeout.downcast_ref::<Boom>().is_none());
    }

    #[test]
    fn test_verification_message_names_counts() {
        let err = VerificationError::CountMismatch {
            expected: 3,
            actual: 2,
            pattern: "[POST /api/bookings]".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("expected 3"));
        assert!(message.contains("found 2"));
        assert!(message.contains("[POST /api/bookings]"));
    }
}
