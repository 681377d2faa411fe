//! Buffer properties: ring size, cursor and active window.
//!
//! The active window is the inclusive interval `[in_point, out_point]`. When
//! `in_point > out_point` the window wraps: it covers `[in_point, size)` and
//! `[0, out_point]`.

use crate::tools;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size, cursor and active window of a ring buffer.
///
/// Only the manager mutates the properties of a shared buffer; consumers work
/// on copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BufferProperties {
    size: usize,
    current_index: usize,
    in_point: usize,
    out_point: usize,
}

impl BufferProperties {
    /// Properties of a ring of `size` with cursor and window at index 0.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            current_index: 0,
            in_point: 0,
            out_point: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn in_point(&self) -> usize {
        self.in_point
    }

    pub fn out_point(&self) -> usize {
        self.out_point
    }

    /// Number of frames in the active window.
    pub fn active_buffer_length(&self) -> usize {
        if self.size == 0 {
            return 0;
        }
        tools::compute_sub_length(self.in_point, self.out_point, self.size)
    }

    pub fn is_index_between_bounds(&self, index: usize) -> bool {
        tools::is_inside_bounds(index, self.in_point, self.out_point, self.size)
    }

    /// Advance the cursor by one and return the new cursor.
    ///
    /// With `update_bounds` the out-point follows the cursor, and the in-point
    /// is pushed forward when the window would cover the whole ring plus one.
    /// Without it the cursor stays in the active window: leaving the window,
    /// or starting outside of it, snaps the cursor to the in-point.
    pub fn increment_index(&mut self, update_bounds: bool) -> usize {
        if self.size == 0 {
            return 0;
        }
        let next = tools::increment(self.current_index, 1, self.size);

        if update_bounds {
            self.current_index = next;
            self.out_point = next;
            if self.out_point == self.in_point {
                self.in_point = tools::increment(self.in_point, 1, self.size);
            }
        } else if self.is_index_between_bounds(self.current_index)
            && self.is_index_between_bounds(next)
        {
            self.current_index = next;
        } else {
            self.current_index = self.in_point;
        }
        self.current_index
    }

    /// Repeat [`increment_index`](Self::increment_index) `step` times.
    /// A negative step decrements instead.
    pub fn increment_index_by(&mut self, update_bounds: bool, step: isize) -> usize {
        if step < 0 {
            return self.decrement_index_by(step.unsigned_abs());
        }
        for _ in 0..step {
            self.increment_index(update_bounds);
        }
        self.current_index
    }

    /// Move the cursor back by one, snapping to the out-point when it leaves
    /// the active window.
    pub fn decrement_index(&mut self) -> usize {
        if self.size == 0 {
            return 0;
        }
        let previous = tools::decrement(self.current_index, 1, self.size);

        if self.is_index_between_bounds(self.current_index)
            && self.is_index_between_bounds(previous)
        {
            self.current_index = previous;
        } else {
            self.current_index = self.out_point;
        }
        self.current_index
    }

    pub fn decrement_index_by(&mut self, step: usize) -> usize {
        for _ in 0..step {
            self.decrement_index();
        }
        self.current_index
    }

    /// Returns `false` and leaves the properties untouched if `index` is out of
    /// range or already the cursor.
    pub fn set_current_index(&mut self, index: usize) -> bool {
        if index >= self.size || index == self.current_index {
            return false;
        }
        self.current_index = index;
        true
    }

    pub fn set_in_point(&mut self, index: usize) -> bool {
        if index >= self.size || index == self.in_point {
            return false;
        }
        self.in_point = index;
        true
    }

    pub fn set_out_point(&mut self, index: usize) -> bool {
        if index >= self.size || index == self.out_point {
            return false;
        }
        self.out_point = index;
        true
    }

    /// Replace every field at once, used after a resize or a crop.
    pub(crate) fn reset(
        &mut self,
        size: usize,
        current_index: usize,
        in_point: usize,
        out_point: usize,
    ) {
        debug_assert!(size == 0 || (current_index < size && in_point < size && out_point < size));
        self.size = size;
        self.current_index = current_index;
        self.in_point = in_point;
        self.out_point = out_point;
    }
}

impl fmt::Display for BufferProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "size {}, index {}, in {}, out {}",
            self.size, self.current_index, self.in_point, self.out_point
        )
    }
}
