//! Requests exchanged between the manager and the consumers.
//!
//! Pull and push requests carry one value for one variable. They travel
//! through single-slot [`Mailbox`]es: a new request replaces the pending one,
//! so a slow reader only ever sees the latest value.

use crate::properties::BufferProperties;
use crate::registry::{Value, Variable};
use crate::tools;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Single-slot, last-write-wins exchange cell.
#[derive(Debug)]
pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `item`, returning the request it replaced, if any.
    pub fn put(&self, item: T) -> Option<T> {
        self.slot.lock().replace(item)
    }

    /// Remove and return the pending item.
    pub fn take(&self) -> Option<T> {
        self.slot.lock().take()
    }

    pub fn is_occupied(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn clear(&self) {
        self.slot.lock().take();
    }

    /// Run `f` on the pending item without removing it.
    pub fn with_pending<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        f(self.slot.lock().as_ref())
    }
}

impl<T: Clone> Mailbox<T> {
    pub fn peek(&self) -> Option<T> {
        self.slot.lock().clone()
    }
}

/// A value prepared by the manager, to be applied to a consumer variable.
#[derive(Debug, Clone)]
pub struct PullRequest {
    target: Arc<Variable>,
    bits: u64,
}

impl PullRequest {
    pub fn new(target: Arc<Variable>, bits: u64) -> Self {
        Self { target, bits }
    }

    pub fn target(&self) -> &Arc<Variable> {
        &self.target
    }

    pub fn value_as_long_bits(&self) -> u64 {
        self.bits
    }

    pub fn value(&self) -> Value {
        Value::from_bits(self.target.kind(), self.bits)
    }

    /// Apply the value to the target. Returns `true` if the target changed.
    pub fn pull(&self) -> bool {
        self.target.set_value_from_long_bits(self.bits)
    }
}

/// A value submitted by a consumer, to be applied to a buffered variable.
#[derive(Debug, Clone)]
pub struct PushRequest {
    target: Arc<Variable>,
    bits: u64,
}

impl PushRequest {
    pub fn new(target: Arc<Variable>, bits: u64) -> Self {
        Self { target, bits }
    }

    pub fn target(&self) -> &Arc<Variable> {
        &self.target
    }

    pub fn value_as_long_bits(&self) -> u64 {
        self.bits
    }

    pub fn value(&self) -> Value {
        Value::from_bits(self.target.kind(), self.bits)
    }

    /// Whether applying the request would change the target.
    pub fn is_push_necessary(&self) -> bool {
        self.target.value_as_long_bits() != self.bits
    }

    /// Apply the value to the target. Returns `true` if the target changed.
    pub fn push(&self) -> bool {
        self.target.set_value_from_long_bits(self.bits)
    }
}

/// Span of a variable's buffer a consumer asks to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferSampleRequest {
    /// Every frame, starting at index 0.
    Entire,
    /// The active window, from the in-point to the out-point.
    ActiveOnly,
    /// From the given index to the out-point.
    StartingFrom(usize),
    /// `length` frames starting at `from`, wrapping around.
    Window { from: usize, length: usize },
}

impl BufferSampleRequest {
    /// Turn the request into `(from, length)` for the given properties.
    ///
    /// Returns `None` when the request does not fit in the buffer.
    pub fn resolve(&self, properties: &BufferProperties) -> Option<(usize, usize)> {
        let size = properties.size();
        if size == 0 {
            return None;
        }
        match *self {
            BufferSampleRequest::Entire => Some((0, size)),
            BufferSampleRequest::ActiveOnly => {
                Some((properties.in_point(), properties.active_buffer_length()))
            }
            BufferSampleRequest::StartingFrom(from) => {
                if from >= size {
                    return None;
                }
                Some((from, tools::compute_sub_length(from, properties.out_point(), size)))
            }
            BufferSampleRequest::Window { from, length } => {
                if from >= size || length == 0 || length > size {
                    return None;
                }
                Some((from, length))
            }
        }
    }
}

/// Shrink the buffers to the inclusive span `[from, to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropBufferRequest {
    pub from: usize,
    pub to: usize,
}

impl CropBufferRequest {
    pub fn new(from: usize, to: usize) -> Self {
        Self { from, to }
    }

    /// `to - from + 1`, or the unchanged `size` when `from > to`.
    pub fn cropped_size(&self, size: usize) -> usize {
        if self.from <= self.to {
            self.to - self.from + 1
        } else {
            size
        }
    }
}

/// Overwrite the inclusive span `[from, to]` with zeros or with the current
/// value of each variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillBufferRequest {
    pub zero_fill: bool,
    pub from: usize,
    pub to: usize,
}

impl FillBufferRequest {
    pub fn new(zero_fill: bool, from: usize, to: usize) -> Self {
        Self { zero_fill, from, to }
    }

    /// Number of frames covered, following the ring.
    pub fn filled_size(&self, size: usize) -> usize {
        if size == 0 || self.from >= size || self.to >= size {
            return 0;
        }
        tools::compute_sub_length(self.from, self.to, size)
    }
}
