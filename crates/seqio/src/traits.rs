//! Capability traits for the synchronous half of the I/O core.
//!
//! Each trait names one access capability; concrete endpoints implement
//! the one or two capabilities they actually have. The async variants
//! live in the companion stream crate.

use bytes::Bytes;

use crate::{IoResult, Result};

/// In-order reader. Every call consumes from the current position.
pub trait SerialRead {
    /// Total size of the data, if known.
    fn size(&self) -> Option<u64>;

    /// Reads up to `buf.len()` bytes. `count == 0` with `is_end == false`
    /// means no data right now; with `is_end == true`, the end of data.
    fn read(&mut self, buf: &mut [u8]) -> Result<IoResult>;
}

/// Positioned reader. Calls are independent of one another.
pub trait RandomRead {
    /// Total size of the data, if known.
    fn size(&self) -> Option<u64>;

    /// Reads up to `buf.len()` bytes starting at the absolute `offset`.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<IoResult>;
}

/// In-order writer with an explicit terminal write.
pub trait SerialWrite {
    /// Writes up to `buf.len()` bytes; `count` in the result reports how
    /// many were accepted.
    fn write(&mut self, buf: &[u8]) -> Result<IoResult>;

    /// Writes the last bytes and fixes the stream size. Returns the end
    /// offset of the stream.
    fn final_write(&mut self, buf: &[u8]) -> Result<u64>;
}

/// Positioned writer accepting writes at arbitrary target offsets, in any
/// submission order and from any thread. Implementors serialize
/// internally, which is why the methods take `&self`.
///
/// Completion is a silent sink state: every method returns `Ok(false)`
/// once the writer has completed rather than failing the call.
pub trait RandomWrite: Send + Sync {
    /// Submits `data` for the absolute `offset`. Returns `Ok(false)` if
    /// the writer has already completed.
    fn write_at(&self, data: Bytes, offset: u64) -> Result<bool>;

    /// Submits the terminal write; `offset + data.len()` fixes the final
    /// stream size. An empty `data` is legal and fixes the size at
    /// `offset`.
    fn end_write_at(&self, data: Bytes, offset: u64) -> Result<bool>;

    /// Completes the writer. With `abort`, pending writes are discarded;
    /// without, an end write must have been submitted and no writes may
    /// remain queued.
    fn set_complete(&self, abort: bool) -> Result<bool>;
}

/// Push boundary of a transform pipeline stage (and of the pipeline's
/// terminal sink). `write` reports the accepted count; a stage that
/// buffers residue internally still reports the full input as accepted.
pub trait FilterWrite {
    /// Pushes bytes into the stage. Returns the number of input bytes
    /// accepted.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Pushes the last bytes, flushes anything the stage was holding and
    /// locks the stage against further writes.
    fn final_write(&mut self, buf: &[u8]) -> Result<()>;
}
