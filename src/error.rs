//! Error types for the mixer core
//!
//! Defines the crate error type using thiserror for clear error propagation.
//! Recoverable data conditions inside the alignment loop (stale packets,
//! buffer holes, cursor drift) are not errors: they are logged and absorbed,
//! and at most cost one output block.

use thiserror::Error;

/// Main error type for the mixer core
#[derive(Error, Debug)]
pub enum Error {
    /// No registered kernel factory accepted the configured format.
    /// The mixer remains unbound; `attach` may be retried after the
    /// registry is extended.
    #[error("no suitable mix kernel for the configured format")]
    NoKernel,

    /// An input index beyond the registered input set was used
    #[error("no such input: {0}")]
    NoSuchInput(usize),
}

/// Convenience Result type using the mixer core Error
pub type Result<T> = std::result::Result<T, Error>;
