//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors raised while validating user-supplied domain values.
///
/// These are the "invalid user input" class of failures: they are returned
/// to the caller synchronously and never leave partial state behind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A timer domain could not be reduced to a host name.
    #[error("Invalid domain: '{input}'")]
    InvalidDomain { input: String },

    /// A block pattern was empty after normalisation.
    #[error("Invalid block pattern: '{input}'")]
    InvalidPattern { input: String },

    /// Timer limits must be strictly positive.
    #[error("Invalid time limit: {limit} (expected a positive number of seconds)")]
    InvalidTimeLimit { limit: i64 },

    /// Invalid field value
    #[error("Invalid {field}: {value} (expected {expected})")]
    InvalidFieldValue {
        field: String,
        value: String,
        expected: String,
    },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
