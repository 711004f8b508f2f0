//! Error types for the async buffering and pump layer.

use thiserror::Error;

/// Errors from the buffered reader, the data-request handlers and the
/// async capability adapters.
///
/// The enum is `Clone` because several of these are latched and may be
/// surfaced by more than one subsequent call; wrapped failures carry
/// their rendered message for the same reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// A caller-supplied parameter violates the construction contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The operation is not legal in the component's current state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// A write would extend past the final size fixed by the end write.
    #[error("write of {count} bytes at offset {offset} extends past the final size {end_offset}")]
    RangeExceeded {
        offset: u64,
        count: usize,
        end_offset: u64,
    },

    /// No tokio runtime was available to dispatch a data-request
    /// callback.
    #[error("no tokio runtime available to dispatch a data request")]
    NoRuntime,

    /// A serial data-request callback failed. Latched by the buffered
    /// reader and surfaced once serial reads drain to zero.
    #[error("serial data request failed: {0}")]
    SerialRequest(String),

    /// A random data-request callback failed. Propagates through the
    /// random read that invoked it.
    #[error("random data request failed: {0}")]
    RandomRequest(String),

    /// Underlying source or sink failure.
    #[error("i/o failure: {0}")]
    Io(String),
}

impl StreamError {
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

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<seqio::Error> for StreamError {
    fn from(e: seqio::Error) -> Self {
        match e {
            seqio::Error::InvalidArgument(msg) => Self::InvalidArgument(msg),
            seqio::Error::InvalidState(msg) => Self::InvalidState(msg),
            seqio::Error::RangeExceeded {
                offset,
                count,
                end_offset,
            } => Self::RangeExceeded {
                offset,
                count,
                end_offset,
            },
            seqio::Error::Io(e) => Self::Io(e.to_string()),
        }
    }
}

impl From<StreamError> for seqio::Error {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::InvalidArgument(msg) => Self::InvalidArgument(msg),
            StreamError::InvalidState(msg) => Self::InvalidState(msg),
            StreamError::RangeExceeded {
                offset,
                count,
                end_offset,
            } => Self::RangeExceeded {
                offset,
                count,
                end_offset,
            },
            other => Self::Io(std::io::Error::other(other.to_string())),
        }
    }
}

/// Errors from the read-write pumps. Once latched, the same error is
/// reported by the pump call that observed it and by any later call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PumpError {
    /// A source read failed.
    #[error("source read failed: {0}")]
    Read(StreamError),

    /// A sink write failed.
    #[error("sink write failed: {0}")]
    Write(StreamError),

    /// The sink refused a write it was required to accept.
    #[error("sink refused a mandatory write at offset {offset}")]
    SinkRefused { offset: u64 },

    /// The pump was canceled.
    #[error("pump canceled")]
    Canceled,
}

impl PumpError {
    /// Returns `true` for external cancellation (as opposed to a fault).
    #[inline]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}
