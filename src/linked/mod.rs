//! Consumer-side handles onto a shared buffer.
//!
//! A consumer never touches the buffers directly. It works on its own copy of
//! the variables and exchanges values with the manager through the linked
//! elements of this module:
//!
//! - [`LinkedVariable`]: one consumer variable bound to one buffered variable.
//! - [`LinkedRegistry`]: every linked variable of a consumer tree, with the
//!   consumer tree and the buffer tree mirrored into each other.
//! - [`LinkedBufferProperties`]: a copy of the buffer properties.
//!
//! # Protocol
//!
//! Each direction goes through a single-slot mailbox:
//!
//! ```text
//! manager                                   consumer
//!   prepare_for_pull ──► pull mailbox ──►   pull
//!   process_push     ◄── push mailbox ◄──   push
//! ```
//!
//! A mailbox holds at most one request. Writing a new request replaces the
//! pending one, so consumers and manager never wait on each other.

mod array;
mod properties;
mod registry;
mod variable;

pub use array::LinkedBufferArray;
pub use properties::LinkedBufferProperties;
pub use registry::{LinkedRegistry, StructuralLock};
pub use variable::LinkedVariable;

use crate::properties::BufferProperties;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Weak;

static NEXT_LINKED_BUFFER_ID: AtomicU32 = AtomicU32::new(0);

/// Identity of a linked element, unique within the process.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LinkedBufferId(pub u32);

impl LinkedBufferId {
    pub const INVALID: LinkedBufferId = LinkedBufferId(u32::MAX);

    pub(crate) fn next() -> Self {
        LinkedBufferId(NEXT_LINKED_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Debug for LinkedBufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "LinkedBufferId(INVALID)")
        } else {
            write!(f, "LinkedBufferId({})", self.0)
        }
    }
}

impl fmt::Display for LinkedBufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Notified when a linked element receives a push from its consumer.
#[cfg_attr(test, mockall::automock)]
pub trait PushRequestListener: Send + Sync {
    fn push_requested(&self, source: LinkedBufferId);
}

/// An element linked to the shared buffer.
///
/// `push` and `pull` belong to the consumer. The other operations are called
/// by the manager through the shared buffer.
pub trait LinkedBuffer: Send + Sync {
    fn id(&self) -> LinkedBufferId;

    /// Submit the consumer's current value(s) to the manager.
    fn push(&self);

    /// Apply the values prepared by the manager. Returns `true` if a pull
    /// request was pending.
    fn pull(&self) -> bool;

    /// Apply the pending push, if any. With `write_buffer` the new value is
    /// also recorded at the current index. Returns `true` if a buffered
    /// variable changed.
    fn process_push(&self, write_buffer: bool, properties: &BufferProperties) -> bool;

    /// Drop the pending push without applying it.
    fn flush_push(&self);

    /// Prepare the next pull and serve the pending sample request.
    fn prepare_for_pull(&self, properties: &BufferProperties);

    /// Whether a sample request waits for the manager.
    fn has_request_pending(&self) -> bool;

    fn is_active(&self) -> bool;

    fn add_push_request_listener(&self, listener: Weak<dyn PushRequestListener>);

    fn dispose(&self);
}
