//! Error types for ohpipe-core
//!
//! Stream-scoped problems are values of [`Error`] and are resolved by the
//! element that detects them (flush-and-stop plus an event). Broken pipeline
//! invariants are not errors: they panic.

use thiserror::Error;

/// Main error type for the pipeline core
#[derive(Error, Debug)]
pub enum Error {
    /// The animator cannot play the proposed stream format
    #[error("Format unsupported: {0}")]
    FormatUnsupported(String),

    /// A format description that cannot exist (zero channels, bad bit depth)
    #[error("Invalid audio format: {0}")]
    InvalidFormat(String),

    /// Errors from the shared foundations (jiffies, config)
    #[error(transparent)]
    Common(#[from] ohpipe_common::Error),
}

/// Convenience Result type using the pipeline core Error
pub type Result<T> = std::result::Result<T, Error>;
