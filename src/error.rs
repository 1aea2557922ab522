//! Error types shared across the sonar processing core.
//!
//! The taxonomy follows the error design in spec §7: a single
//! not-found/out-of-range condition, a corruption condition (bad record
//! sizes, version/type mismatches), and a misuse condition (API contracts
//! violated by the caller). Cache misses and store `mod_count` changes are
//! never represented here — they are transient conditions handled by
//! recomputation, not errors.

use thiserror::Error;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The store could not serve the requested index or time. A single
    /// condition covers both "unknown index" and "I/O error" per spec §4.1.
    #[error("not found")]
    NotFound,

    /// A record's shape contradicts its channel's declared parameters:
    /// byte count not a multiple of the sample size, signals-channel
    /// discretization mismatch, or an API version mismatch at open time.
    #[error("corrupt data: {message}")]
    Corrupt { message: String },

    /// The caller violated an API contract: write on a read-opened
    /// channel, re-opening an already-open channel, requesting a second
    /// concurrent tile generation, etc.
    #[error("misuse: {message}")]
    Misuse { message: String },

    /// Propagated I/O failure from a collaborator that exposes `io::Error`
    /// directly (e.g. the in-memory test store).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn corrupt(message: impl Into<String>) -> Self {
        CoreError::Corrupt {
            message: message.into(),
        }
    }

    pub fn misuse(message: impl Into<String>) -> Self {
        CoreError::Misuse {
            message: message.into(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
