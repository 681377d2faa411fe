//! Two-way link between a consumer tree and the buffer tree.
//!
//! A [`LinkedRegistry`] mirrors the variables of both trees into each other,
//! links each consumer variable to its buffer and keeps doing so for variables
//! added later on either side. Dropping the last handle detaches it.

use super::{LinkedBuffer, LinkedBufferArray, LinkedBufferId, LinkedVariable, PushRequestListener};
use crate::error::{Result, SimBufError};
use crate::properties::BufferProperties;
use crate::registry::{
    duplicate_missing_variables, ensure_path_exists, ListenerId, Registry, RegistryChange, Variable,
};
use crate::registry_buffer::RegistryBuffer;
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Lock serializing structural changes between the buffer tree and the
/// consumer trees.
///
/// Reentrant: mirroring a variable into one tree fires the listeners of that
/// tree, which may mirror back on the same thread.
pub type StructuralLock = Arc<ReentrantMutex<()>>;

/// Variables touched by a change, in tree order.
fn changed_variables(change: &RegistryChange) -> Vec<Arc<Variable>> {
    match change {
        RegistryChange::VariableAdded(variable) => vec![Arc::clone(variable)],
        RegistryChange::RegistryAdded(registry) => registry.collect_subtree_variables(),
    }
}

/// Copy `variable` into the tree of `target_root` unless a variable with the
/// same path is already there. Returns the variable of the target tree.
fn mirror_variable(target_root: &Arc<Registry>, variable: &Variable) -> Result<Arc<Variable>> {
    let namespace = variable.namespace();
    let registry = ensure_path_exists(target_root, &namespace).ok_or_else(|| {
        SimBufError::NamespaceMismatch {
            namespace: namespace.to_string(),
            root: target_root.namespace().to_string(),
        }
    })?;
    match registry.variable(variable.name()) {
        Some(existing) => Ok(existing),
        None => variable.duplicate(&registry),
    }
}

/// A consumer's tree linked to the shared buffer.
///
/// The consumer tree and the matching part of the buffer tree are kept in
/// sync both ways: a variable added on either side is copied to the other and
/// linked. Values only move through the linked variables.
pub struct LinkedRegistry {
    id: LinkedBufferId,
    root: Arc<Registry>,
    buffer_root: Arc<Registry>,
    registry_buffer: RegistryBuffer,
    lock: StructuralLock,
    variables: Arc<LinkedBufferArray>,
    linked: Mutex<HashMap<String, Arc<LinkedVariable>>>,
    root_listener: Mutex<Option<ListenerId>>,
    buffer_root_listener: Mutex<Option<ListenerId>>,
    disposed: AtomicBool,
}

impl LinkedRegistry {
    /// Mirror `root` and the buffer tree into each other and link every
    /// variable of `root`.
    ///
    /// Fails with [`SimBufError::NamespaceMismatch`] if `root` cannot be placed
    /// in the buffer tree, and with [`SimBufError::KindMismatch`] if a variable
    /// of `root` has another kind than the buffered variable at its path.
    pub(crate) fn new(
        root: Arc<Registry>,
        registry_buffer: RegistryBuffer,
        lock: StructuralLock,
        track_dirty_pushes: bool,
    ) -> Result<Arc<Self>> {
        let _guard = lock.lock();
        let namespace = root.namespace();
        let buffer_root = ensure_path_exists(registry_buffer.root(), &namespace).ok_or_else(|| {
            SimBufError::NamespaceMismatch {
                namespace: namespace.to_string(),
                root: registry_buffer.root().name().to_string(),
            }
        })?;

        let id = LinkedBufferId::next();
        let linked = Arc::new(Self {
            id,
            root: Arc::clone(&root),
            buffer_root,
            registry_buffer,
            lock: Arc::clone(&lock),
            variables: LinkedBufferArray::new(id, track_dirty_pushes),
            linked: Mutex::new(HashMap::new()),
            root_listener: Mutex::new(None),
            buffer_root_listener: Mutex::new(None),
            disposed: AtomicBool::new(false),
        });

        // Listen before the sweep. A variable added on another thread is either
        // in the tree when the sweep walks it or delivered to the listener,
        // which waits for the structural lock.
        linked.register_tree_listeners();
        if let Err(err) = linked.link_trees() {
            linked.dispose();
            return Err(err);
        }

        tracing::debug!(
            "Linked registry {} created for '{}' with {} variables",
            id,
            namespace,
            linked.number_of_linked_variables()
        );
        Ok(linked)
    }

    fn link_trees(&self) -> Result<()> {
        duplicate_missing_variables(&self.buffer_root, &self.root)?;
        for variable in self.root.collect_subtree_variables() {
            self.link_variable(&variable)?;
        }
        Ok(())
    }

    fn register_tree_listeners(self: &Arc<Self>) {
        let weak: Weak<LinkedRegistry> = Arc::downgrade(self);
        let buffer_listener = self.buffer_root.add_listener(move |change| {
            if let Some(this) = weak.upgrade() {
                this.on_buffer_tree_change(change);
            }
        });
        *self.buffer_root_listener.lock() = Some(buffer_listener);

        let weak: Weak<LinkedRegistry> = Arc::downgrade(self);
        let root_listener = self.root.add_listener(move |change| {
            if let Some(this) = weak.upgrade() {
                this.on_consumer_tree_change(change);
            }
        });
        *self.root_listener.lock() = Some(root_listener);
    }

    fn on_buffer_tree_change(&self, change: &RegistryChange) {
        if self.is_disposed() {
            return;
        }
        let _guard = self.lock.lock();
        if let Some(registry) = change.added_registry() {
            ensure_path_exists(&self.root, &registry.namespace());
        }
        for variable in changed_variables(change) {
            let result = mirror_variable(&self.root, &variable)
                .and_then(|mirrored| self.link_variable(&mirrored));
            if let Err(err) = result {
                tracing::error!(
                    "Failed to mirror {} into consumer tree: {}",
                    variable.full_name(),
                    err
                );
            }
        }
    }

    fn on_consumer_tree_change(&self, change: &RegistryChange) {
        if self.is_disposed() {
            return;
        }
        let _guard = self.lock.lock();
        for variable in changed_variables(change) {
            if let Err(err) = self.link_variable(&variable) {
                tracing::error!("Failed to link {}: {}", variable.full_name(), err);
            }
        }
    }

    /// Root of the consumer tree.
    pub fn root(&self) -> &Arc<Registry> {
        &self.root
    }

    /// Registry of the buffer tree mirrored by the consumer tree.
    pub fn buffer_root(&self) -> &Arc<Registry> {
        &self.buffer_root
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn existing_link(&self, path: &str, variable: &Arc<Variable>) -> Option<Arc<LinkedVariable>> {
        self.linked
            .lock()
            .get(path)
            .filter(|existing| Arc::ptr_eq(existing.variable(), variable))
            .cloned()
    }

    /// Link a variable of the consumer tree to its buffer, creating the
    /// buffered variable if needed.
    ///
    /// Linking the same variable twice returns the same handle.
    pub fn link_variable(&self, variable: &Arc<Variable>) -> Result<Arc<LinkedVariable>> {
        if self.is_disposed() {
            return Err(SimBufError::Disposed);
        }
        let namespace = variable.namespace();
        if !namespace.starts_with(&self.root.namespace()) {
            return Err(SimBufError::NamespaceMismatch {
                namespace: namespace.to_string(),
                root: self.root.namespace().to_string(),
            });
        }

        let _guard = self.lock.lock();
        let path = variable.full_name();
        if let Some(existing) = self.existing_link(&path, variable) {
            return Ok(existing);
        }

        // May fire the tree listeners, which can link the same variable.
        let buffer = self.registry_buffer.find_or_create_buffer(variable)?;
        if let Some(existing) = self.existing_link(&path, variable) {
            return Ok(existing);
        }

        let linked = Arc::new(LinkedVariable::new(Arc::clone(variable), buffer)?);
        let element: Arc<dyn LinkedBuffer> = linked.clone();
        self.variables.add(&element);
        let replaced = self.linked.lock().insert(path, Arc::clone(&linked));
        if let Some(replaced) = replaced {
            self.variables.remove(replaced.id());
            replaced.dispose();
        }
        Ok(linked)
    }

    /// Linked variable by full path.
    pub fn linked_variable(&self, path: &str) -> Option<Arc<LinkedVariable>> {
        self.linked.lock().get(path).cloned()
    }

    pub fn linked_variables(&self) -> Vec<Arc<LinkedVariable>> {
        self.linked.lock().values().cloned().collect()
    }

    pub fn number_of_linked_variables(&self) -> usize {
        self.linked.lock().len()
    }
}

impl LinkedBuffer for LinkedRegistry {
    fn id(&self) -> LinkedBufferId {
        self.id
    }

    fn push(&self) {
        if self.is_disposed() {
            return;
        }
        self.variables.push();
    }

    fn pull(&self) -> bool {
        if self.is_disposed() {
            return false;
        }
        self.variables.pull()
    }

    fn process_push(&self, write_buffer: bool, properties: &BufferProperties) -> bool {
        if self.is_disposed() {
            return false;
        }
        self.variables.process_push(write_buffer, properties)
    }

    fn flush_push(&self) {
        self.variables.flush_push();
    }

    fn prepare_for_pull(&self, properties: &BufferProperties) {
        if self.is_disposed() {
            return;
        }
        self.variables.prepare_for_pull(properties);
    }

    fn has_request_pending(&self) -> bool {
        !self.is_disposed() && self.variables.has_request_pending()
    }

    fn is_active(&self) -> bool {
        !self.is_disposed()
    }

    fn add_push_request_listener(&self, listener: Weak<dyn PushRequestListener>) {
        if self.is_disposed() {
            return;
        }
        self.variables.add_push_request_listener(listener);
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _guard = self.lock.lock();
        if let Some(id) = self.root_listener.lock().take() {
            self.root.remove_listener(id);
        }
        if let Some(id) = self.buffer_root_listener.lock().take() {
            self.buffer_root.remove_listener(id);
        }
        self.variables.dispose();
        self.linked.lock().clear();
        tracing::debug!("Linked registry {} disposed", self.id);
    }
}

impl Drop for LinkedRegistry {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for LinkedRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedRegistry")
            .field("id", &self.id)
            .field("root", &self.root.namespace())
            .field("linked", &self.linked.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Value, VariableKind};

    fn setup() -> (Arc<Registry>, RegistryBuffer, StructuralLock) {
        let root = Registry::new("root");
        let robot = Registry::new("robot");
        root.add_child(robot.clone()).unwrap();
        robot.add_variable("q", VariableKind::Double).unwrap();
        robot.add_variable("count", VariableKind::Integer).unwrap();
        let registry_buffer = RegistryBuffer::new(root.clone(), 16, 256);
        (root, registry_buffer, Arc::new(ReentrantMutex::new(())))
    }

    #[test]
    fn test_consumer_tree_receives_buffer_variables() {
        let (_, registry_buffer, lock) = setup();
        let consumer = Registry::new("root");
        let linked = LinkedRegistry::new(consumer.clone(), registry_buffer, lock, true).unwrap();

        assert!(consumer.find_variable("robot.q").is_some());
        assert_eq!(linked.number_of_linked_variables(), 2);
        assert!(linked.linked_variable("root.robot.count").is_some());
    }

    #[test]
    fn test_sub_registry_consumer() {
        let (root, registry_buffer, lock) = setup();
        let consumer_root = Registry::new("root");
        let consumer_robot = Registry::new("robot");
        consumer_root.add_child(consumer_robot.clone()).unwrap();

        let linked = LinkedRegistry::new(consumer_robot.clone(), registry_buffer, lock, true).unwrap();
        assert!(Arc::ptr_eq(linked.buffer_root(), &root.child("robot").unwrap()));
        assert!(consumer_robot.variable("count").is_some());
    }

    #[test]
    fn test_variables_mirrored_and_linked_both_ways() {
        let (root, registry_buffer, lock) = setup();
        let consumer = Registry::new("root");
        let linked = LinkedRegistry::new(consumer.clone(), registry_buffer.clone(), lock, true).unwrap();

        root.child("robot")
            .unwrap()
            .add_variable("qd", VariableKind::Double)
            .unwrap();
        assert!(consumer.find_variable("robot.qd").is_some());
        assert!(linked.linked_variable("root.robot.qd").is_some());

        let leg = Registry::new("leg");
        leg.add_variable("knee", VariableKind::Double).unwrap();
        consumer.add_child(leg).unwrap();
        assert!(root.find_variable("leg.knee").is_some());
        assert!(registry_buffer.find_buffer_by_path("root.leg.knee").is_some());
        assert!(linked.linked_variable("root.leg.knee").is_some());
        assert_eq!(linked.number_of_linked_variables(), 4);
    }

    #[test]
    fn test_kind_mismatch_at_creation() {
        let (_, registry_buffer, lock) = setup();
        let consumer = Registry::new("root");
        let robot = Registry::new("robot");
        consumer.add_child(robot.clone()).unwrap();
        robot.add_variable("q", VariableKind::Long).unwrap();

        let err = LinkedRegistry::new(consumer, registry_buffer, lock, true).unwrap_err();
        assert!(matches!(err, SimBufError::KindMismatch { .. }));
    }

    #[test]
    fn test_namespace_mismatch() {
        let (_, registry_buffer, lock) = setup();
        let err = LinkedRegistry::new(Registry::new("elsewhere"), registry_buffer, lock, true).unwrap_err();
        assert!(matches!(err, SimBufError::NamespaceMismatch { .. }));
    }

    #[test]
    fn test_push_and_pull_through_registry() {
        let (root, registry_buffer, lock) = setup();
        let consumer = Registry::new("root");
        let linked = LinkedRegistry::new(consumer.clone(), registry_buffer, lock, true).unwrap();
        let props = BufferProperties::new(16);

        let q = root.find_variable("robot.q").unwrap();
        q.set_f64(1.25);
        linked.prepare_for_pull(&props);
        assert!(linked.pull());
        let consumer_q = consumer.find_variable("robot.q").unwrap();
        assert_eq!(consumer_q.value(), Value::Double(1.25));

        consumer_q.set_f64(9.0);
        linked.linked_variable("root.robot.q").unwrap().push();
        assert!(linked.process_push(false, &props));
        assert_eq!(q.value(), Value::Double(9.0));
    }

    #[test]
    fn test_link_variable_is_idempotent() {
        let (_, registry_buffer, lock) = setup();
        let consumer = Registry::new("root");
        let linked = LinkedRegistry::new(consumer.clone(), registry_buffer, lock, true).unwrap();
        let q = consumer.find_variable("robot.q").unwrap();
        let first = linked.link_variable(&q).unwrap();
        let second = linked.link_variable(&q).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(linked.number_of_linked_variables(), 2);
    }

    #[test]
    fn test_link_variable_outside_consumer_tree() {
        let (_, registry_buffer, lock) = setup();
        let consumer_root = Registry::new("root");
        let consumer_robot = Registry::new("robot");
        consumer_root.add_child(consumer_robot.clone()).unwrap();
        let linked = LinkedRegistry::new(consumer_robot, registry_buffer, lock, true).unwrap();

        let outside = consumer_root.add_variable("t", VariableKind::Double).unwrap();
        assert!(matches!(
            linked.link_variable(&outside),
            Err(SimBufError::NamespaceMismatch { .. })
        ));
    }

    #[test]
    fn test_dispose_detaches_trees() {
        let (root, registry_buffer, lock) = setup();
        let consumer = Registry::new("root");
        let linked = LinkedRegistry::new(consumer.clone(), registry_buffer, lock, true).unwrap();
        linked.dispose();

        root.add_variable("late", VariableKind::Boolean).unwrap();
        assert!(consumer.variable("late").is_none());
        let q = consumer.find_variable("robot.q").unwrap();
        assert!(matches!(linked.link_variable(&q), Err(SimBufError::Disposed)));
        assert_eq!(linked.number_of_linked_variables(), 0);
    }

    #[test]
    fn test_dropped_registry_detaches_trees() {
        let (root, registry_buffer, lock) = setup();
        let consumer = Registry::new("root");
        let linked = LinkedRegistry::new(consumer.clone(), registry_buffer, lock, true).unwrap();
        let linked_q = linked.linked_variable("root.robot.q").unwrap();
        let weak = Arc::downgrade(&linked);
        drop(linked);

        assert!(weak.upgrade().is_none());
        assert!(!linked_q.is_active());
        root.add_variable("late", VariableKind::Boolean).unwrap();
        assert!(consumer.variable("late").is_none());
    }

    #[test]
    fn test_failed_creation_leaves_no_listener() {
        let (root, registry_buffer, lock) = setup();
        let consumer = Registry::new("root");
        let robot = Registry::new("robot");
        consumer.add_child(robot.clone()).unwrap();
        robot.add_variable("count", VariableKind::Boolean).unwrap();

        assert!(LinkedRegistry::new(consumer.clone(), registry_buffer, lock, true).is_err());
        root.add_variable("late", VariableKind::Double).unwrap();
        assert!(consumer.variable("late").is_none());
    }
}
