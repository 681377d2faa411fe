//! One ring buffer per variable of a tree.
//!
//! The [`RegistryBuffer`] watches its root registry: variables and registries
//! added to the tree later get a buffer as soon as they appear. Buffers are
//! keyed by full variable path and shared as [`SharedVariableBuffer`] so the
//! linked variables of consumer trees can reach them.

use crate::buffer::VariableBuffer;
use crate::error::{Result, SimBufError};
use crate::registry::{ensure_path_exists, ListenerId, Registry, RegistryChange, Variable};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

pub type SharedVariableBuffer = Arc<RwLock<VariableBuffer>>;

#[derive(Default)]
struct BufferTable {
    by_path: HashMap<String, SharedVariableBuffer>,
    ordered: Vec<SharedVariableBuffer>,
}

struct RegistryBufferShared {
    root: Arc<Registry>,
    capacity: AtomicUsize,
    table: RwLock<BufferTable>,
    parallel_threshold: usize,
    listener: Mutex<Option<ListenerId>>,
}

impl RegistryBufferShared {
    fn insert(&self, variable: &Arc<Variable>) -> SharedVariableBuffer {
        let path = variable.full_name();
        let mut table = self.table.write();
        if let Some(existing) = table.by_path.get(&path) {
            return Arc::clone(existing);
        }
        let buffer = Arc::new(RwLock::new(VariableBuffer::new(
            Arc::clone(variable),
            self.capacity.load(Ordering::Acquire),
        )));
        tracing::trace!("Buffer created for {}", path);
        table.by_path.insert(path, Arc::clone(&buffer));
        table.ordered.push(Arc::clone(&buffer));
        buffer
    }

    fn on_change(&self, change: &RegistryChange) {
        match change {
            RegistryChange::VariableAdded(variable) => {
                self.insert(variable);
            }
            RegistryChange::RegistryAdded(registry) => {
                for variable in registry.collect_subtree_variables() {
                    self.insert(&variable);
                }
            }
        }
    }
}

/// Buffers of every variable under a root registry.
#[derive(Clone)]
pub struct RegistryBuffer {
    shared: Arc<RegistryBufferShared>,
}

impl RegistryBuffer {
    /// Create buffers of `capacity` frames for every variable under `root` and
    /// keep following the tree.
    ///
    /// Bulk writes and resizes run in parallel once the tree holds more than
    /// `parallel_threshold` variables.
    pub fn new(root: Arc<Registry>, capacity: usize, parallel_threshold: usize) -> Self {
        let shared = Arc::new(RegistryBufferShared {
            root: Arc::clone(&root),
            capacity: AtomicUsize::new(capacity),
            table: RwLock::new(BufferTable::default()),
            parallel_threshold,
            listener: Mutex::new(None),
        });

        let weak: Weak<RegistryBufferShared> = Arc::downgrade(&shared);
        let id = root.add_listener(move |change| {
            if let Some(shared) = weak.upgrade() {
                shared.on_change(change);
            }
        });
        *shared.listener.lock() = Some(id);

        for variable in root.collect_subtree_variables() {
            shared.insert(&variable);
        }
        tracing::debug!(
            "Registry buffer for '{}': {} variables, {} frames",
            root.name(),
            shared.table.read().ordered.len(),
            capacity
        );

        Self { shared }
    }

    pub fn root(&self) -> &Arc<Registry> {
        &self.shared.root
    }

    /// Number of frames of every buffer.
    pub fn capacity(&self) -> usize {
        self.shared.capacity.load(Ordering::Acquire)
    }

    pub fn number_of_buffers(&self) -> usize {
        self.shared.table.read().ordered.len()
    }

    /// All buffers, in creation order.
    pub fn buffers(&self) -> Vec<SharedVariableBuffer> {
        self.shared.table.read().ordered.clone()
    }

    /// Buffer of the variable with the same full path as `variable`.
    pub fn find_buffer(&self, variable: &Variable) -> Option<SharedVariableBuffer> {
        self.find_buffer_by_path(&variable.full_name())
    }

    pub fn find_buffer_by_path(&self, path: &str) -> Option<SharedVariableBuffer> {
        self.shared.table.read().by_path.get(path).cloned()
    }

    /// Buffer for the variable with the same full path as `variable`.
    ///
    /// If the tree has no such variable, a copy of `variable` is added to it,
    /// creating the registries on its path as needed. The returned buffer may
    /// hold a variable of another kind; callers check.
    pub fn find_or_create_buffer(&self, variable: &Variable) -> Result<SharedVariableBuffer> {
        if let Some(buffer) = self.find_buffer(variable) {
            return Ok(buffer);
        }

        let namespace = variable.namespace();
        let registry = ensure_path_exists(&self.shared.root, &namespace).ok_or_else(|| {
            SimBufError::NamespaceMismatch {
                namespace: namespace.to_string(),
                root: self.shared.root.name().to_string(),
            }
        })?;

        // Adding the variable fires the tree listener, which creates the buffer.
        let buffered = match registry.variable(variable.name()) {
            Some(existing) => existing,
            None => variable.duplicate(&registry)?,
        };

        Ok(self.shared.insert(&buffered))
    }

    /// Keep `length` frames starting at `from` in every buffer.
    pub fn resize_buffer(&self, from: usize, length: usize) {
        let table = self.shared.table.write();
        self.shared.capacity.store(length, Ordering::Release);
        let resize = |buffer: &SharedVariableBuffer| buffer.write().resize(from, length);
        if table.ordered.len() > self.shared.parallel_threshold {
            table.ordered.par_iter().for_each(resize);
        } else {
            table.ordered.iter().for_each(resize);
        }
        tracing::debug!(
            "Resized {} buffers to {} frames from {}",
            table.ordered.len(),
            length,
            from
        );
    }

    pub fn fill_buffer(&self, zero: bool, from: usize, length: usize) {
        for buffer in self.buffers() {
            buffer.write().fill(zero, from, length);
        }
    }

    /// Record the current value of every variable at `index`.
    pub fn write_buffer_at(&self, index: usize) {
        let buffers = self.buffers();
        if buffers.len() > self.shared.parallel_threshold {
            buffers.par_iter().for_each(|b| b.write().write_at(index));
        } else {
            buffers.iter().for_each(|b| b.write().write_at(index));
        }
    }

    /// Load the values at `index` into the variables. Returns `true` if any
    /// variable changed.
    pub fn read_buffer_at(&self, index: usize) -> bool {
        let mut changed = false;
        for buffer in self.buffers() {
            changed |= buffer.read().read_at(index);
        }
        changed
    }

    /// Bytes used by one frame across all buffers.
    pub fn registry_memory_size(&self) -> usize {
        self.buffers().iter().map(|b| b.read().memory_size()).sum()
    }

    /// Stop following the tree and drop every buffer.
    pub fn dispose(&self) {
        if let Some(id) = self.shared.listener.lock().take() {
            self.shared.root.remove_listener(id);
        }
        let mut table = self.shared.table.write();
        table.by_path.clear();
        table.ordered.clear();
    }
}
