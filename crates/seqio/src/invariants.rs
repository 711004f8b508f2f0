//! Debug assertion macros for the buffering and sequencing invariants.
//!
//! Only active in debug builds (`debug_assert!`), so there is zero
//! overhead in release builds.

// =============================================================================
// Bounded occupancy
// =============================================================================

/// Assert that the pending count never exceeds capacity.
///
/// Used in: `RingBuffer::add()` / `RingBuffer::take()` after index updates.
macro_rules! debug_assert_pending_bounded {
    ($pending:expr, $capacity:expr) => {
        debug_assert!(
            $pending <= $capacity,
            "ring pending count {} exceeds capacity {}",
            $pending,
            $capacity
        )
    };
}

// =============================================================================
// Index wrapping
// =============================================================================

/// Assert that a physical ring index stays within the storage bounds.
///
/// Used in: `RingBuffer` copy loops after wrapping arithmetic.
macro_rules! debug_assert_ring_index {
    ($name:literal, $idx:expr, $capacity:expr) => {
        debug_assert!(
            $capacity == 0 || $idx < $capacity,
            "ring {} index {} outside storage of {} slots",
            $name,
            $idx,
            $capacity
        )
    };
}

// =============================================================================
// Gap-free emission
// =============================================================================

/// Assert that a sequenced segment is emitted exactly at the downstream
/// cursor, with no gap and no rewind.
///
/// Used in: `WriteSequencer` while collecting the ready prefix.
macro_rules! debug_assert_emission_contiguous {
    ($cursor:expr, $offset:expr) => {
        debug_assert!(
            $cursor == $offset,
            "sequenced segment at offset {} does not meet the downstream cursor {}",
            $offset,
            $cursor
        )
    };
}

// =============================================================================
// Re-exports for crate-internal use
// =============================================================================

pub(crate) use debug_assert_emission_contiguous;
pub(crate) use debug_assert_pending_bounded;
pub(crate) use debug_assert_ring_index;
