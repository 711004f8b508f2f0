//! Async capability traits mirroring the sync set in `seqio`.
//!
//! All traits are object safe (`async_trait`), so pumps can hold their
//! endpoints as `Arc<dyn ...>`. Methods take `&self`: endpoints are
//! shared across pump tasks and serialize internally.

use async_trait::async_trait;
use bytes::Bytes;
use seqio::IoResult;

use crate::buffered::BufferedReader;
use crate::error::StreamError;

/// In-order async reader.
///
/// Several reads may be issued concurrently; the implementation
/// serializes them internally and reports each chunk's absolute offset
/// in its result, so completions can be consumed out of order.
#[async_trait]
pub trait SerialAsyncRead: Send + Sync {
    /// Total size of the data, if known.
    fn size(&self) -> Option<u64>;

    /// Reads up to `buf.len()` bytes from the current position.
    async fn read(&self, buf: &mut [u8]) -> Result<IoResult, StreamError>;
}

/// Positioned async reader.
#[async_trait]
pub trait RandomAsyncRead: Send + Sync {
    /// Total size of the data, if known.
    fn size(&self) -> Option<u64>;

    /// Reads up to `buf.len()` bytes starting at the absolute `offset`.
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<IoResult, StreamError>;
}

/// In-order async writer with an explicit terminal write.
///
/// Implementations must not retain the caller's slice past the call;
/// anything dispatched asynchronously is copied first.
#[async_trait]
pub trait SerialAsyncWrite: Send + Sync {
    /// Writes up to `buf.len()` bytes.
    async fn write(&self, buf: &[u8]) -> Result<IoResult, StreamError>;

    /// Writes the last bytes and fixes the stream size. Returns the end
    /// offset.
    async fn final_write(&self, buf: &[u8]) -> Result<u64, StreamError>;
}

/// Positioned async writer accepting writes in any order.
///
/// Completion is a silent sink state: methods return `Ok(false)` once
/// the writer has completed. A zero-length end write is legal and must
/// be accepted as the completion signal.
#[async_trait]
pub trait RandomAsyncWrite: Send + Sync {
    /// Submits `data` for the absolute `offset`.
    async fn write_at(&self, data: Bytes, offset: u64) -> Result<bool, StreamError>;

    /// Submits the terminal write; `offset + data.len()` fixes the final
    /// stream size.
    async fn end_write_at(&self, data: Bytes, offset: u64) -> Result<bool, StreamError>;

    /// Completes the writer, discarding pending writes when `abort`.
    async fn set_complete(&self, abort: bool) -> Result<bool, StreamError>;
}

/// Refill callback of a [`BufferedReader`].
///
/// Invoked when a serial read leaves fewer than the request threshold
/// buffered. The implementation pulls from its underlying source and
/// pushes into `reader` via [`BufferedReader::write`] /
/// [`BufferedReader::final_write`].
#[async_trait]
pub trait SerialDataSource: Send + Sync {
    /// Requests up to `size_wanted` more bytes to be pushed into
    /// `reader`.
    async fn data_requested(
        &self,
        reader: &BufferedReader,
        size_wanted: usize,
    ) -> Result<(), StreamError>;
}

/// Out-of-window supplier for a [`BufferedReader`]'s random reads.
///
/// Invoked for the portion of a random read the buffered window cannot
/// serve.
#[async_trait]
pub trait RandomDataSource: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at the absolute `offset`.
    async fn data_requested(&self, buf: &mut [u8], offset: u64) -> Result<IoResult, StreamError>;
}
