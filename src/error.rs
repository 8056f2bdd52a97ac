//! Error types for the Proxima library.
//!
//! All fallible operations in Proxima return [`Result`], whose error type is
//! the [`ProximaError`] enum. Storage-mutation errors are always reported to
//! the immediate caller; the only place where errors are swallowed is
//! best-effort teardown (bucket and dispatcher destruction), where individual
//! release failures are logged and cleanup continues.
//!
//! # Examples
//!
//! ```
//! use proxima::error::{ProximaError, Result};
//!
//! fn example_operation() -> Result<()> {
//!     Err(ProximaError::invalid_argument("Invalid input"))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use std::io;

use thiserror::Error;

/// The main error type for Proxima operations.
#[derive(Error, Debug)]
pub enum ProximaError {
    /// I/O errors (backing storage of a bucket, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Insert into a bucket whose hard capacity would be exceeded.
    #[error("Bucket capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Insert of a data-equal object into a no-duplicate bucket.
    #[error("Duplicate object: {0}")]
    DuplicateObject(String),

    /// Delete or lookup targeting an absent object or bucket id.
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// Dispatcher already holds its maximal number of buckets.
    #[error("Dispatcher capacity full: {0}")]
    CapacityFull(String),

    /// An admission filter vetoed an insert.
    #[error("Insert rejected by filter: {0}")]
    FilterRejected(String),

    /// A delete would drop the bucket occupation below its low limit.
    #[error("Occupation below low limit: {0}")]
    OccupationLow(String),

    /// Invalid structural operation (e.g. moving a bucket owned elsewhere).
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Invalid argument passed by the caller.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Object serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases.
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error.
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with [`ProximaError`].
pub type Result<T> = std::result::Result<T, ProximaError>;

impl ProximaError {
    /// Create a new capacity-exceeded error.
    pub fn capacity_exceeded<S: Into<String>>(msg: S) -> Self {
        ProximaError::CapacityExceeded(msg.into())
    }

    /// Create a new duplicate-object error.
    pub fn duplicate_object<S: Into<String>>(msg: S) -> Self {
        ProximaError::DuplicateObject(msg.into())
    }

    /// Create a new object-not-found error.
    pub fn object_not_found<S: Into<String>>(msg: S) -> Self {
        ProximaError::ObjectNotFound(msg.into())
    }

    /// Create a new capacity-full error.
    pub fn capacity_full<S: Into<String>>(msg: S) -> Self {
        ProximaError::CapacityFull(msg.into())
    }

    /// Create a new filter-rejected error.
    pub fn filter_rejected<S: Into<String>>(msg: S) -> Self {
        ProximaError::FilterRejected(msg.into())
    }

    /// Create a new occupation-low error.
    pub fn occupation_low<S: Into<String>>(msg: S) -> Self {
        ProximaError::OccupationLow(msg.into())
    }

    /// Create a new illegal-state error.
    pub fn illegal_state<S: Into<String>>(msg: S) -> Self {
        ProximaError::IllegalState(msg.into())
    }

    /// Create a new invalid-argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        ProximaError::InvalidArgument(msg.into())
    }

    /// Create a new serialization error.
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        ProximaError::Serialization(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        ProximaError::Other(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProximaError::capacity_exceeded("bucket 1 is full");
        assert_eq!(
            err.to_string(),
            "Bucket capacity exceeded: bucket 1 is full"
        );

        let err = ProximaError::object_not_found("locator 'abc'");
        assert_eq!(err.to_string(), "Object not found: locator 'abc'");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "gone");
        let err: ProximaError = io_err.into();
        assert!(matches!(err, ProximaError::Io(_)));
    }
}
