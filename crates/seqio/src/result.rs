//! The result record shared by every read and write operation.

/// Sentinel offset meaning "no offset observed yet".
///
/// Used as the identity for min-offset aggregation when combining the
/// results of several concurrent reads. Never returned for a read that
/// actually produced data.
pub const NO_OFFSET: u64 = u64::MAX;

/// Outcome of a single read or write operation.
///
/// `offset` is absolute: measured from byte 0 of the logical stream
/// (source offset for reads, sink offset for writes). When `count == 0`,
/// `offset` carries the closest offset at which data exists, so callers
/// can tell how far away the next byte is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoResult {
    /// Absolute offset the operation applied to.
    pub offset: u64,
    /// Bytes transferred. Zero with `is_end == false` means transient
    /// exhaustion; callers may retry later.
    pub count: usize,
    /// Whether the end of the data was reached at `offset + count`.
    pub is_end: bool,
}

impl IoResult {
    /// Creates a result for a transfer of `count` bytes at `offset`.
    #[inline]
    pub fn new(offset: u64, count: usize, is_end: bool) -> Self {
        Self {
            offset,
            count,
            is_end,
        }
    }

    /// Terminal result: no data, end of stream at `offset`.
    #[inline]
    pub fn end(offset: u64) -> Self {
        Self {
            offset,
            count: 0,
            is_end: true,
        }
    }

    /// Transient result: no data right now, more may appear at `offset`.
    #[inline]
    pub fn drained(offset: u64) -> Self {
        Self {
            offset,
            count: 0,
            is_end: false,
        }
    }

    /// Returns `true` if this result definitively marks the end of data.
    #[inline]
    pub fn is_data_end(&self) -> bool {
        self.count == 0 && self.is_end
    }

    /// First offset past the transferred range.
    #[inline]
    pub fn end_offset(&self) -> u64 {
        self.offset + self.count as u64
    }
}
