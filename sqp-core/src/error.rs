//! Error types for the SQP engine.

use thiserror::Error;

/// Errors that can occur while setting up or running a solve.
///
/// These are programmer errors caught before any optimization begins.
/// Conditions reached *during* a solve (QP failure, budget exhaustion,
/// infeasibility under the current penalty) are not errors; they map to
/// terminal [`OptStatus`](crate::sqp::OptStatus) values.
#[derive(Error, Debug)]
pub enum SqpError {
    /// `optimize` was called before `initialize`
    #[error("optimizer was not initialized with a starting point")]
    NotInitialized,

    /// Initialization vector has the wrong length
    #[error("initialization vector has wrong length: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Number of decision variables in the problem
        expected: usize,
        /// Length of the supplied vector
        got: usize,
    },

    /// Problem validation failed
    #[error("invalid problem: {0}")]
    InvalidProblem(String),
}

/// Result type for SQP operations.
pub type SqpResult<T> = Result<T, SqpError>;
