//! Dotted paths identifying registries in a variable tree.

use std::fmt;

/// Separator between the names of a namespace.
pub const NAMESPACE_SEPARATOR: char = '.';

/// Ordered list of registry names from the root down, e.g. `root.robot.arm`.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Namespace {
    names: Vec<String>,
}

impl Namespace {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Parse a dotted path. Empty segments are skipped.
    pub fn parse(path: &str) -> Self {
        Self {
            names: path
                .split(NAMESPACE_SEPARATOR)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn sub_names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// First name of the path, the root registry.
    pub fn root_name(&self) -> Option<&str> {
        self.names.first().map(String::as_str)
    }

    /// Last name of the path.
    pub fn short_name(&self) -> Option<&str> {
        self.names.last().map(String::as_str)
    }

    /// Namespace with `name` appended.
    pub fn append(&self, name: impl Into<String>) -> Namespace {
        let mut names = self.names.clone();
        names.push(name.into());
        Namespace { names }
    }

    /// Namespace without its last name, `None` for an empty namespace.
    pub fn parent(&self) -> Option<Namespace> {
        if self.names.is_empty() {
            return None;
        }
        Some(Namespace {
            names: self.names[..self.names.len() - 1].to_vec(),
        })
    }

    pub fn starts_with(&self, other: &Namespace) -> bool {
        self.names.starts_with(&other.names)
    }

    pub fn ends_with(&self, other: &Namespace) -> bool {
        self.names.ends_with(&other.names)
    }

    /// Strip `start` from the beginning of this namespace.
    ///
    /// Returns `None` when this namespace does not start with `start`.
    pub fn remove_start(&self, start: &Namespace) -> Option<Namespace> {
        if !self.starts_with(start) {
            return None;
        }
        Some(Namespace {
            names: self.names[start.names.len()..].to_vec(),
        })
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, name) in self.names.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", NAMESPACE_SEPARATOR)?;
            }
            write!(f, "{}", name)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Namespace({})", self)
    }
}

impl From<&str> for Namespace {
    fn from(path: &str) -> Self {
        Namespace::parse(path)
    }
}
