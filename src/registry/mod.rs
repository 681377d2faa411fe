//! Variable tree.
//!
//! A [`Registry`] is a named node holding [`Variable`]s and child registries.
//! Registries are shared as `Arc<Registry>`; a child keeps a weak link to its
//! parent so a tree can be walked upward without reference cycles.
//!
//! Listeners registered on a registry see every [`RegistryChange`] in its
//! subtree: a change is reported to the registry where it happened and to all
//! of its ancestors. Listeners run after the registry's own locks are
//! released, so they may freely add variables or registries.

mod namespace;
mod variable;

pub use namespace::{Namespace, NAMESPACE_SEPARATOR};
pub use variable::{EnumSpec, Value, Variable, VariableKind, MAX_ENUM_CONSTANTS, NULL_ENUM_ORDINAL};

use crate::error::{Result, SimBufError};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned by [`Registry::add_listener`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A structural change in a variable tree.
#[derive(Debug, Clone)]
pub enum RegistryChange {
    VariableAdded(Arc<Variable>),
    RegistryAdded(Arc<Registry>),
}

impl RegistryChange {
    pub fn added_variable(&self) -> Option<&Arc<Variable>> {
        match self {
            RegistryChange::VariableAdded(v) => Some(v),
            RegistryChange::RegistryAdded(_) => None,
        }
    }

    pub fn added_registry(&self) -> Option<&Arc<Registry>> {
        match self {
            RegistryChange::RegistryAdded(r) => Some(r),
            RegistryChange::VariableAdded(_) => None,
        }
    }
}

pub type RegistryListener = Arc<dyn Fn(&RegistryChange) + Send + Sync>;

/// A named node of the variable tree.
pub struct Registry {
    name: String,
    parent: RwLock<Weak<Registry>>,
    children: RwLock<Vec<Arc<Registry>>>,
    variables: RwLock<Vec<Arc<Variable>>>,
    listeners: RwLock<Vec<(ListenerId, RegistryListener)>>,
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SimBufError::Registry("names cannot be empty".to_string()));
    }
    if name.contains(NAMESPACE_SEPARATOR) {
        return Err(SimBufError::Registry(format!(
            "name '{}' cannot contain '{}'",
            name, NAMESPACE_SEPARATOR
        )));
    }
    Ok(())
}

impl Registry {
    /// Create a detached registry. It becomes a root, or a child through
    /// [`Registry::add_child`].
    pub fn new(name: impl Into<String>) -> Arc<Registry> {
        Arc::new(Registry {
            name: name.into(),
            parent: RwLock::new(Weak::new()),
            children: RwLock::new(Vec::new()),
            variables: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<Arc<Registry>> {
        self.parent.read().upgrade()
    }

    pub fn is_root(&self) -> bool {
        self.parent().is_none()
    }

    /// Full path from the root of the tree down to this registry.
    pub fn namespace(&self) -> Namespace {
        let mut names = vec![self.name.clone()];
        let mut current = self.parent();
        while let Some(registry) = current {
            names.push(registry.name.clone());
            current = registry.parent();
        }
        names.reverse();
        Namespace::new(names)
    }

    pub fn children(&self) -> Vec<Arc<Registry>> {
        self.children.read().clone()
    }

    pub fn child(&self, name: &str) -> Option<Arc<Registry>> {
        self.children.read().iter().find(|c| c.name == name).cloned()
    }

    pub fn variables(&self) -> Vec<Arc<Variable>> {
        self.variables.read().clone()
    }

    pub fn variable(&self, name: &str) -> Option<Arc<Variable>> {
        self.variables.read().iter().find(|v| v.name() == name).cloned()
    }

    pub fn number_of_variables(&self) -> usize {
        self.variables.read().len()
    }

    /// Attach `child` under this registry.
    ///
    /// Fails if `child` already has a parent, if the name is taken or if the
    /// child is an ancestor of this registry.
    pub fn add_child(self: &Arc<Self>, child: Arc<Registry>) -> Result<()> {
        validate_name(&child.name)?;
        if child.parent().is_some() {
            return Err(SimBufError::Registry(format!(
                "registry '{}' already has a parent",
                child.name
            )));
        }
        let mut ancestor = Some(Arc::clone(self));
        while let Some(registry) = ancestor {
            if Arc::ptr_eq(&registry, &child) {
                return Err(SimBufError::Registry(format!(
                    "registry '{}' cannot be its own descendant",
                    child.name
                )));
            }
            ancestor = registry.parent();
        }

        {
            let mut children = self.children.write();
            if children.iter().any(|c| c.name == child.name) {
                return Err(SimBufError::Registry(format!(
                    "registry '{}' already has a child named '{}'",
                    self.namespace(),
                    child.name
                )));
            }
            *child.parent.write() = Arc::downgrade(self);
            children.push(Arc::clone(&child));
        }

        tracing::debug!("Registry added: {}", child.namespace());
        self.notify(RegistryChange::RegistryAdded(child));
        Ok(())
    }

    /// Create a boolean, integer, long or double variable.
    pub fn add_variable(self: &Arc<Self>, name: &str, kind: VariableKind) -> Result<Arc<Variable>> {
        if kind == VariableKind::Enum {
            return Err(SimBufError::Registry(format!(
                "enum variable '{}' needs its constants, use add_enum_variable",
                name
            )));
        }
        self.insert_variable(name, kind, None)
    }

    /// Create an enum variable with the given constants.
    pub fn add_enum_variable<S: AsRef<str>>(
        self: &Arc<Self>,
        name: &str,
        constants: &[S],
        null_allowed: bool,
    ) -> Result<Arc<Variable>> {
        let constants = constants.iter().map(|c| c.as_ref().to_string()).collect();
        let spec = EnumSpec::new(constants, null_allowed)?;
        self.insert_variable(name, VariableKind::Enum, Some(spec))
    }

    pub(crate) fn insert_variable(
        self: &Arc<Self>,
        name: &str,
        kind: VariableKind,
        enum_spec: Option<EnumSpec>,
    ) -> Result<Arc<Variable>> {
        validate_name(name)?;
        let variable = {
            let mut variables = self.variables.write();
            if variables.iter().any(|v| v.name() == name) {
                return Err(SimBufError::Registry(format!(
                    "registry '{}' already has a variable named '{}'",
                    self.namespace(),
                    name
                )));
            }
            let variable = Arc::new(Variable::new(
                name.to_string(),
                kind,
                enum_spec,
                Arc::downgrade(self),
            ));
            variables.push(Arc::clone(&variable));
            variable
        };

        self.notify(RegistryChange::VariableAdded(Arc::clone(&variable)));
        Ok(variable)
    }

    /// Register a listener for changes in this registry's subtree.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&RegistryChange) + Send + Sync + 'static,
    {
        let id = ListenerId::next();
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Returns `true` if the listener was registered here.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    fn notify(self: &Arc<Self>, change: RegistryChange) {
        let mut listeners: Vec<RegistryListener> = Vec::new();
        let mut current = Some(Arc::clone(self));
        while let Some(registry) = current {
            listeners.extend(registry.listeners.read().iter().map(|(_, l)| Arc::clone(l)));
            current = registry.parent();
        }
        for listener in listeners {
            listener(&change);
        }
    }

    /// All variables of this registry and its descendants, depth first.
    pub fn collect_subtree_variables(&self) -> Vec<Arc<Variable>> {
        let mut out = Vec::new();
        self.collect_into(&mut out);
        out
    }

    fn collect_into(&self, out: &mut Vec<Arc<Variable>>) {
        out.extend(self.variables.read().iter().cloned());
        for child in self.children.read().iter() {
            child.collect_into(out);
        }
    }

    /// Find a variable in this subtree by name or by dotted path.
    ///
    /// A plain name matches the first variable with that name. A dotted path
    /// matches a variable whose full name ends with that path.
    pub fn find_variable(&self, path: &str) -> Option<Arc<Variable>> {
        let path = Namespace::parse(path);
        let name = path.short_name()?;
        let parent = path.parent().unwrap_or_default();
        self.collect_subtree_variables()
            .into_iter()
            .find(|v| v.name() == name && v.namespace().ends_with(&parent))
    }

    /// Find the registry with the given full namespace in this subtree.
    pub fn find_registry(self: &Arc<Self>, namespace: &Namespace) -> Option<Arc<Registry>> {
        let rest = namespace.remove_start(&self.namespace())?;
        let mut current = Arc::clone(self);
        for name in rest.sub_names() {
            current = current.child(name)?;
        }
        Some(current)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("namespace", &self.namespace())
            .field("variables", &self.variables.read().len())
            .field("children", &self.children.read().len())
            .finish()
    }
}

/// Make sure the registries of `namespace` exist below `root`, creating the
/// missing ones.
///
/// `namespace` must start with the namespace of `root`, otherwise `None` is
/// returned. Returns the registry at the end of the path.
pub fn ensure_path_exists(root: &Arc<Registry>, namespace: &Namespace) -> Option<Arc<Registry>> {
    let rest = namespace.remove_start(&root.namespace())?;
    let mut current = Arc::clone(root);
    for name in rest.sub_names() {
        current = match current.child(name) {
            Some(child) => child,
            None => {
                let child = Registry::new(name.clone());
                if let Err(err) = current.add_child(Arc::clone(&child)) {
                    // Lost a race against another writer creating the same child.
                    tracing::debug!("ensure_path_exists: {}", err);
                    current.child(name)?
                } else {
                    child
                }
            }
        };
    }
    Some(current)
}

/// Copy into `target` every variable and registry of `original` that `target`
/// lacks, recursively. Returns the number of variables created.
pub fn duplicate_missing_variables(
    original: &Arc<Registry>,
    target: &Arc<Registry>,
) -> Result<usize> {
    let mut created = 0;
    for variable in original.variables() {
        if target.variable(variable.name()).is_none() {
            variable.duplicate(target)?;
            created += 1;
        }
    }
    for child in original.children() {
        let target_child = match target.child(child.name()) {
            Some(existing) => existing,
            None => {
                let new_child = Registry::new(child.name());
                target.add_child(Arc::clone(&new_child))?;
                new_child
            }
        };
        created += duplicate_missing_variables(&child, &target_child)?;
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn build_tree() -> (Arc<Registry>, Arc<Registry>) {
        let root = Registry::new("root");
        let robot = Registry::new("robot");
        root.add_child(robot.clone()).unwrap();
        root.add_variable("t", VariableKind::Double).unwrap();
        robot.add_variable("q", VariableKind::Double).unwrap();
        robot.add_variable("count", VariableKind::Integer).unwrap();
        (root, robot)
    }

    #[test]
    fn test_collect_subtree_variables() {
        let (root, _) = build_tree();
        let names: Vec<String> = root
            .collect_subtree_variables()
            .iter()
            .map(|v| v.full_name())
            .collect();
        assert_eq!(names, vec!["root.t", "root.robot.q", "root.robot.count"]);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let (root, robot) = build_tree();
        assert!(robot.add_variable("q", VariableKind::Long).is_err());
        assert!(root.add_child(Registry::new("robot")).is_err());
        assert!(root.add_variable("a.b", VariableKind::Long).is_err());
    }

    #[test]
    fn test_add_child_rejects_cycles() {
        let (root, robot) = build_tree();
        let detached = Registry::new("x");
        robot.add_child(detached.clone()).unwrap();
        assert!(detached.add_child(root).is_err());
    }

    #[test]
    fn test_find_variable() {
        let (root, _) = build_tree();
        assert_eq!(root.find_variable("q").unwrap().full_name(), "root.robot.q");
        assert_eq!(
            root.find_variable("robot.count").unwrap().full_name(),
            "root.robot.count"
        );
        assert!(root.find_variable("other.q").is_none());
    }

    #[test]
    fn test_find_registry() {
        let (root, robot) = build_tree();
        let found = root.find_registry(&Namespace::parse("root.robot")).unwrap();
        assert!(Arc::ptr_eq(&found, &robot));
        assert!(root.find_registry(&Namespace::parse("root.arm")).is_none());
    }

    #[test]
    fn test_listener_sees_descendant_changes() {
        let (root, robot) = build_tree();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let id = root.add_listener(move |change| {
            if change.added_variable().is_some() {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        robot.add_variable("qd", VariableKind::Double).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        assert!(root.remove_listener(id));
        robot.add_variable("qdd", VariableKind::Double).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_may_mutate_tree() {
        let root = Registry::new("root");
        let weak = Arc::downgrade(&root);
        root.add_listener(move |change| {
            if let (Some(v), Some(root)) = (change.added_variable(), weak.upgrade()) {
                if v.name() == "trigger" {
                    root.add_variable("spawned", VariableKind::Boolean).unwrap();
                }
            }
        });
        root.add_variable("trigger", VariableKind::Boolean).unwrap();
        assert!(root.variable("spawned").is_some());
    }

    #[test]
    fn test_ensure_path_exists() {
        let (root, robot) = build_tree();
        let arm = ensure_path_exists(&root, &Namespace::parse("root.robot.arm")).unwrap();
        assert_eq!(arm.namespace().to_string(), "root.robot.arm");
        assert!(robot.child("arm").is_some());

        let same = ensure_path_exists(&root, &Namespace::parse("root.robot")).unwrap();
        assert!(Arc::ptr_eq(&same, &robot));

        assert!(ensure_path_exists(&root, &Namespace::parse("other.robot")).is_none());

        let leg = ensure_path_exists(&robot, &Namespace::parse("root.robot.leg")).unwrap();
        assert_eq!(leg.namespace().to_string(), "root.robot.leg");
        assert!(ensure_path_exists(&robot, &Namespace::parse("root")).is_none());
    }

    #[test]
    fn test_duplicate_missing_variables() {
        let (root, _) = build_tree();
        root.find_variable("robot.q").unwrap().set_f64(2.5);

        let copy = Registry::new("root");
        copy.add_variable("t", VariableKind::Double).unwrap();
        let created = duplicate_missing_variables(&root, &copy).unwrap();

        assert_eq!(created, 2);
        let q = copy.find_variable("robot.q").unwrap();
        assert_eq!(q.value(), Value::Double(2.5));
        assert_eq!(duplicate_missing_variables(&root, &copy).unwrap(), 0);
    }
}
