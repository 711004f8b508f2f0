//! Error types for the core primitives.

use thiserror::Error;

/// Errors produced by the core buffering and sequencing primitives.
///
/// Completion is deliberately not an error: a writer that has already
/// completed reports subsequent writes with `Ok(false)` rather than
/// failing the call.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller-supplied parameter violates the construction contract
    /// (e.g. a request threshold that is not below the buffer capacity).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The operation is not legal in the component's current state
    /// (e.g. a push after the final write, or completing with writes
    /// still queued).
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// A write would extend past the final size fixed by the end write.
    #[error("write of {count} bytes at offset {offset} extends past the final size {end_offset}")]
    RangeExceeded {
        offset: u64,
        count: usize,
        end_offset: u64,
    },

    /// The downstream sink failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns `true` if this error indicates a caller contract violation
    /// rather than an environmental failure.
    #[inline]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_) | Self::InvalidState(_) | Self::RangeExceeded { .. }
        )
    }
}
