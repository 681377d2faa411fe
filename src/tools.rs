//! Ring index arithmetic shared by the buffers.
//!
//! All indices are in `[0, size)` and intervals are inclusive on both ends: the
//! interval `[from, to]` wraps past the end of the ring when `to < from`.
//! Callers are expected to pass in-range arguments; this is checked in debug
//! builds only.

/// `(index + step) mod size`.
#[inline]
pub fn increment(index: usize, step: usize, size: usize) -> usize {
    debug_assert!(size > 0, "ring size must be positive");
    (index + step % size) % size
}

/// `(index - step) mod size`.
#[inline]
pub fn decrement(index: usize, step: usize, size: usize) -> usize {
    debug_assert!(size > 0, "ring size must be positive");
    (index + size - step % size) % size
}

/// Number of elements in the inclusive interval `[from, to]` of a ring of `size`.
///
/// `from == to` yields 1: a single element, never the whole ring.
#[inline]
pub fn compute_sub_length(from: usize, to: usize, size: usize) -> usize {
    debug_assert!(from < size && to < size, "indices out of range");
    if to >= from {
        to - from + 1
    } else {
        to + size + 1 - from
    }
}

/// Start of the interval of `sub_length` elements ending at `to`.
#[inline]
pub fn compute_from_index(to: usize, sub_length: usize, size: usize) -> usize {
    debug_assert!(sub_length > 0 && sub_length <= size);
    decrement(to, sub_length - 1, size)
}

/// End of the interval of `sub_length` elements starting at `from`.
#[inline]
pub fn compute_to_index(from: usize, sub_length: usize, size: usize) -> usize {
    debug_assert!(sub_length > 0 && sub_length <= size);
    increment(from, sub_length - 1, size)
}

/// Whether `query` lies in the inclusive, possibly wrapped, interval `[start, end]`.
#[inline]
pub fn is_inside_bounds(query: usize, start: usize, end: usize, size: usize) -> bool {
    if query >= size {
        false
    } else if start <= end {
        query >= start && query <= end
    } else {
        query <= end || query >= start
    }
}

/// Copy `length` elements of `ring` starting at `from`, wrapping around.
///
/// When `length` exceeds the ring size, the extra elements are `T::default()`.
pub fn ring_array_copy<T: Copy + Default>(ring: &[T], from: usize, length: usize) -> Vec<T> {
    let size = ring.len();
    let mut copy = vec![T::default(); length];
    if size == 0 {
        return copy;
    }
    let copied = length.min(size);
    let first = copied.min(size - from);
    copy[..first].copy_from_slice(&ring[from..from + first]);
    copy[first..copied].copy_from_slice(&ring[..copied - first]);
    copy
}

/// Overwrite `length` elements of `ring` starting at `from` with `value`.
///
/// `length` is clamped to the ring size.
pub fn ring_array_fill<T: Copy>(ring: &mut [T], value: T, from: usize, length: usize) {
    let size = ring.len();
    if size == 0 {
        return;
    }
    let length = length.min(size);
    let first = length.min(size - from);
    ring[from..from + first].fill(value);
    ring[..length - first].fill(value);
}
