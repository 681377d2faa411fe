//! Fan-out over a set of linked elements.
//!
//! The array does not own its elements. An element stays in the array while
//! someone else holds it (a consumer, or the linked registry that created it)
//! and is forgotten on the next `prepare_for_pull` once it is dropped or
//! disposed.

use super::{LinkedBuffer, LinkedBufferId, PushRequestListener};
use crate::properties::BufferProperties;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

#[derive(Default)]
struct Elements {
    by_id: HashMap<LinkedBufferId, Weak<dyn LinkedBuffer>>,
    ordered: Vec<(LinkedBufferId, Weak<dyn LinkedBuffer>)>,
}

/// Fans each operation out to a set of linked elements.
///
/// The array listens to its elements' pushes. With dirty tracking enabled,
/// `process_push` only visits the elements that reported a push since the
/// last sweep.
pub struct LinkedBufferArray {
    owner: LinkedBufferId,
    me: Weak<LinkedBufferArray>,
    elements: RwLock<Elements>,
    dirty: Mutex<HashSet<LinkedBufferId>>,
    track_dirty: bool,
    listeners: RwLock<Vec<Weak<dyn PushRequestListener>>>,
}

impl LinkedBufferArray {
    /// `owner` is reported to this array's own listeners when an element is
    /// pushed.
    pub fn new(owner: LinkedBufferId, track_dirty: bool) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            owner,
            me: me.clone(),
            elements: RwLock::new(Elements::default()),
            dirty: Mutex::new(HashSet::new()),
            track_dirty,
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// Track `element` without taking ownership of it.
    pub fn add(&self, element: &Arc<dyn LinkedBuffer>) {
        let me: Weak<dyn PushRequestListener> = self.me.clone();
        element.add_push_request_listener(me);
        let id = element.id();
        let weak = Arc::downgrade(element);
        let mut elements = self.elements.write();
        elements.by_id.insert(id, weak.clone());
        elements.ordered.push((id, weak));
    }

    /// Returns `true` if the element was tracked.
    pub fn remove(&self, id: LinkedBufferId) -> bool {
        let mut elements = self.elements.write();
        if elements.by_id.remove(&id).is_none() {
            return false;
        }
        elements.ordered.retain(|(e, _)| *e != id);
        self.dirty.lock().remove(&id);
        true
    }

    /// Number of tracked elements, including dropped ones not yet forgotten.
    pub fn len(&self) -> usize {
        self.elements.read().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements still alive. The lock is released before the caller uses them.
    fn snapshot(&self) -> Vec<Arc<dyn LinkedBuffer>> {
        self.elements
            .read()
            .ordered
            .iter()
            .filter_map(|(_, e)| e.upgrade())
            .collect()
    }

    pub fn push(&self) {
        for element in self.snapshot() {
            element.push();
        }
    }

    /// Returns `true` if any element had a pull request pending.
    pub fn pull(&self) -> bool {
        let mut pulled = false;
        for element in self.snapshot() {
            pulled |= element.pull();
        }
        pulled
    }

    pub fn process_push(&self, write_buffer: bool, properties: &BufferProperties) -> bool {
        let targets: Vec<Arc<dyn LinkedBuffer>> = if self.track_dirty {
            let dirty: Vec<LinkedBufferId> = self.dirty.lock().drain().collect();
            if dirty.is_empty() {
                return false;
            }
            let elements = self.elements.read();
            dirty
                .iter()
                .filter_map(|id| elements.by_id.get(id).and_then(Weak::upgrade))
                .collect()
        } else {
            self.snapshot()
        };

        let mut modified = false;
        for element in targets {
            modified |= element.process_push(write_buffer, properties);
        }
        if modified {
            tracing::trace!("Applied pushes from linked buffers of {}", self.owner);
        }
        modified
    }

    pub fn flush_push(&self) {
        self.dirty.lock().clear();
        for element in self.snapshot() {
            element.flush_push();
        }
    }

    /// Prepare every active element and forget the dropped and disposed ones.
    pub fn prepare_for_pull(&self, properties: &BufferProperties) {
        let tracked: Vec<(LinkedBufferId, Weak<dyn LinkedBuffer>)> =
            self.elements.read().ordered.clone();
        let mut inactive = Vec::new();
        for (id, weak) in tracked {
            match weak.upgrade() {
                Some(element) if element.is_active() => element.prepare_for_pull(properties),
                _ => inactive.push(id),
            }
        }
        if !inactive.is_empty() {
            tracing::trace!(
                "Forgetting {} inactive linked buffers of {}",
                inactive.len(),
                self.owner
            );
        }
        for id in inactive {
            self.remove(id);
        }
    }

    pub fn has_request_pending(&self) -> bool {
        self.snapshot().iter().any(|e| e.has_request_pending())
    }

    pub fn add_push_request_listener(&self, listener: Weak<dyn PushRequestListener>) {
        self.listeners.write().push(listener);
    }

    pub fn dispose(&self) {
        let elements = self.snapshot();
        {
            let mut tracked = self.elements.write();
            tracked.by_id.clear();
            tracked.ordered.clear();
        }
        for element in elements {
            element.dispose();
        }
        self.dirty.lock().clear();
        self.listeners.write().clear();
    }
}

impl PushRequestListener for LinkedBufferArray {
    fn push_requested(&self, source: LinkedBufferId) {
        if self.track_dirty {
            self.dirty.lock().insert(source);
        }
        let listeners: Vec<_> = self.listeners.read().iter().filter_map(Weak::upgrade).collect();
        for listener in listeners {
            listener.push_requested(self.owner);
        }
    }
}
