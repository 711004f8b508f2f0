//! Debug assertion macros for the async layer invariants.
//!
//! Only active in debug builds; zero overhead in release builds.

// =============================================================================
// Read window ordering
// =============================================================================

/// Assert that the serial read cursor never passes the write cursor.
///
/// Used in: `BufferedReader` after every cursor update.
macro_rules! debug_assert_read_window {
    ($read_offset:expr, $write_offset:expr) => {
        debug_assert!(
            $read_offset <= $write_offset,
            "read offset {} passed write offset {}",
            $read_offset,
            $write_offset
        )
    };
}

// =============================================================================
// End-index discard rule
// =============================================================================

/// Assert that a read processed after the end was announced lies within
/// the stream.
///
/// Used in: `BoundedPump` completion handling, after the discard check.
macro_rules! debug_assert_within_end {
    ($end_announced:expr, $index:expr, $end_index:expr) => {
        debug_assert!(
            !$end_announced || $index <= $end_index,
            "processing read {} past the announced end read {}",
            $index,
            $end_index
        )
    };
}

// =============================================================================
// Re-exports for crate-internal use
// =============================================================================

pub(crate) use debug_assert_read_window;
pub(crate) use debug_assert_within_end;
