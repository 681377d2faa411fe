//! Test data builders for creating variable trees

use simbuf_rs::{Registry, VariableKind};
use std::sync::Arc;

enum Entry {
    Variable(String, VariableKind),
    Enum(String, Vec<String>, bool),
    Child(RegistryBuilder),
}

/// Builder for creating test registries
pub struct RegistryBuilder {
    name: String,
    entries: Vec<Entry>,
}

impl RegistryBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn variable(mut self, name: &str, kind: VariableKind) -> Self {
        self.entries.push(Entry::Variable(name.to_string(), kind));
        self
    }

    pub fn enum_variable(mut self, name: &str, constants: &[&str], null_allowed: bool) -> Self {
        let constants = constants.iter().map(|c| c.to_string()).collect();
        self.entries
            .push(Entry::Enum(name.to_string(), constants, null_allowed));
        self
    }

    pub fn child(mut self, child: RegistryBuilder) -> Self {
        self.entries.push(Entry::Child(child));
        self
    }

    pub fn build(self) -> Arc<Registry> {
        let registry = Registry::new(self.name);
        for entry in self.entries {
            match entry {
                Entry::Variable(name, kind) => {
                    registry.add_variable(&name, kind).unwrap();
                }
                Entry::Enum(name, constants, null_allowed) => {
                    registry
                        .add_enum_variable(&name, constants.as_slice(), null_allowed)
                        .unwrap();
                }
                Entry::Child(child) => {
                    registry.add_child(child.build()).unwrap();
                }
            }
        }
        registry
    }
}

/// A tree with one variable of every kind:
///
/// ```text
/// root
/// ├── time: double
/// └── robot
///     ├── enabled: boolean
///     ├── counter: integer
///     ├── ticks: long
///     ├── mode: enum [Idle, Walk, Run], nullable
///     └── q: double
/// ```
pub fn robot_tree() -> Arc<Registry> {
    RegistryBuilder::new("root")
        .variable("time", VariableKind::Double)
        .child(
            RegistryBuilder::new("robot")
                .variable("enabled", VariableKind::Boolean)
                .variable("counter", VariableKind::Integer)
                .variable("ticks", VariableKind::Long)
                .enum_variable("mode", &["Idle", "Walk", "Run"], true)
                .variable("q", VariableKind::Double),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_builder() {
        let root = robot_tree();
        assert_eq!(root.collect_subtree_variables().len(), 6);
        let mode = root.find_variable("robot.mode").unwrap();
        assert_eq!(mode.kind(), VariableKind::Enum);
        assert!(mode.enum_spec().unwrap().null_allowed);
    }
}
