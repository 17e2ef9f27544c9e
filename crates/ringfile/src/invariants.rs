//! Debug assertion macros for the four-cursor protocol.
//!
//! Only active in debug builds, so there is zero overhead in release builds.
//! The mapped header is shared with other processes, so a failure here can
//! also mean a corrupted or foreign file rather than a local bug.

/// Assert the cursor ordering `cons_tail <= cons_head <= prod_tail <= prod_head`.
///
/// Holds at every observable point in archive mode. Not checked in wrap mode,
/// where the producer is allowed to lap the consumer.
macro_rules! debug_assert_cursor_order {
    ($cons_tail:expr, $cons_head:expr, $prod_tail:expr, $prod_head:expr) => {
        debug_assert!(
            $cons_tail <= $cons_head && $cons_head <= $prod_tail && $prod_tail <= $prod_head,
            "cursor order violated: cons_tail {} cons_head {} prod_tail {} prod_head {}",
            $cons_tail,
            $cons_head,
            $prod_tail,
            $prod_head
        )
    };
}

/// Assert that occupancy never exceeds capacity (archive mode).
///
/// `prod_head - cons_tail` on the unbounded logical counters is the exact
/// word occupancy regardless of how often the ring wrapped physically.
macro_rules! debug_assert_bounded_occupancy {
    ($occupancy:expr, $capacity:expr) => {
        debug_assert!(
            $occupancy <= $capacity,
            "occupancy {} exceeds capacity {} words",
            $occupancy,
            $capacity
        )
    };
}

/// Assert that a cursor only moves forward.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "{} moved backwards from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

pub(crate) use debug_assert_bounded_occupancy;
pub(crate) use debug_assert_cursor_order;
pub(crate) use debug_assert_monotonic;
