//! Consumer copy of the buffer properties.

use super::LinkedBufferId;
use crate::properties::BufferProperties;
use crate::request::Mailbox;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Consumer-side copy of the shared buffer's properties.
///
/// The manager posts a snapshot on every `prepare_linked_buffers_for_pull`;
/// the consumer picks up the latest one with [`pull`](Self::pull). Until the
/// first pull the copy is empty.
#[derive(Debug)]
pub struct LinkedBufferProperties {
    id: LinkedBufferId,
    pending: Mailbox<BufferProperties>,
    current: Mutex<Option<BufferProperties>>,
    disposed: AtomicBool,
}

impl LinkedBufferProperties {
    pub(crate) fn new() -> Self {
        Self {
            id: LinkedBufferId::next(),
            pending: Mailbox::new(),
            current: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> LinkedBufferId {
        self.id
    }

    pub(crate) fn prepare_for_pull(&self, properties: &BufferProperties) {
        if self.is_active() {
            self.pending.put(*properties);
        }
    }

    /// Adopt the latest snapshot. Returns `true` if one was pending.
    pub fn pull(&self) -> bool {
        if !self.is_active() {
            return false;
        }
        match self.pending.take() {
            Some(properties) => {
                *self.current.lock() = Some(properties);
                true
            }
            None => false,
        }
    }

    /// Last pulled snapshot.
    pub fn properties(&self) -> Option<BufferProperties> {
        *self.current.lock()
    }

    /// Pending snapshot if any, otherwise the last pulled one.
    pub fn peek_current(&self) -> Option<BufferProperties> {
        self.pending.peek().or_else(|| self.properties())
    }

    pub fn is_active(&self) -> bool {
        !self.disposed.load(Ordering::Acquire)
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        self.pending.clear();
        self.current.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_empty() {
        let linked = LinkedBufferProperties::new();
        assert!(linked.properties().is_none());
        assert!(linked.peek_current().is_none());
        assert!(!linked.pull());
    }

    #[test]
    fn test_pull_adopts_latest_snapshot() {
        let linked = LinkedBufferProperties::new();
        let mut props = BufferProperties::new(10);
        linked.prepare_for_pull(&props);
        props.set_current_index(4);
        linked.prepare_for_pull(&props);

        assert_eq!(linked.peek_current().unwrap().current_index(), 4);
        assert!(linked.properties().is_none());
        assert!(linked.pull());
        assert_eq!(linked.properties(), Some(props));
    }

    #[test]
    fn test_disposed_stops_updating() {
        let linked = LinkedBufferProperties::new();
        linked.dispose();
        linked.prepare_for_pull(&BufferProperties::new(10));
        assert!(!linked.pull());
        assert!(linked.properties().is_none());
    }
}
