//! Typed telemetry variables.
//!
//! Every kind of value fits in 64 bits, so a [`Variable`] stores its value as an
//! `AtomicU64` bit pattern. This gives the uniform `value_as_long_bits` view used
//! by the buffers and makes variables `Send + Sync` without a lock.
//!
//! # Bit patterns
//!
//! | Kind    | Native | Bits                               |
//! |---------|--------|------------------------------------|
//! | Boolean | `bool` | `0` or `1`                         |
//! | Integer | `i32`  | sign-extended to 64 bits           |
//! | Long    | `i64`  | two's complement                   |
//! | Double  | `f64`  | IEEE 754 (`f64::to_bits`)          |
//! | Enum    | `u8`   | ordinal, `-1` (all ones) for null  |

use super::Registry;
use crate::error::{Result, SimBufError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::namespace::Namespace;

/// Ordinal used to encode a null enum value.
pub const NULL_ENUM_ORDINAL: i64 = -1;

/// Maximum number of constants an enum variable may declare.
///
/// Enum buffers store ordinals as `i8`, with `-1` reserved for null.
pub const MAX_ENUM_CONSTANTS: usize = i8::MAX as usize + 1;

/// The closed set of value kinds a variable can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableKind {
    Boolean,
    Integer,
    Long,
    Double,
    Enum,
}

impl VariableKind {
    pub fn all() -> &'static [VariableKind] {
        &[
            VariableKind::Boolean,
            VariableKind::Integer,
            VariableKind::Long,
            VariableKind::Double,
            VariableKind::Enum,
        ]
    }

    /// Bytes used per buffered sample.
    pub fn size_bytes(&self) -> usize {
        match self {
            VariableKind::Boolean | VariableKind::Enum => 1,
            VariableKind::Integer => 4,
            VariableKind::Long | VariableKind::Double => 8,
        }
    }
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableKind::Boolean => write!(f, "boolean"),
            VariableKind::Integer => write!(f, "integer"),
            VariableKind::Long => write!(f, "long"),
            VariableKind::Double => write!(f, "double"),
            VariableKind::Enum => write!(f, "enum"),
        }
    }
}

/// A native value of one of the supported kinds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Boolean(bool),
    Integer(i32),
    Long(i64),
    Double(f64),
    /// Enum ordinal, `None` for the null value.
    Enum(Option<u8>),
}

impl Value {
    pub fn kind(&self) -> VariableKind {
        match self {
            Value::Boolean(_) => VariableKind::Boolean,
            Value::Integer(_) => VariableKind::Integer,
            Value::Long(_) => VariableKind::Long,
            Value::Double(_) => VariableKind::Double,
            Value::Enum(_) => VariableKind::Enum,
        }
    }

    /// The zero value of a kind. For enums this is ordinal 0.
    pub fn zero(kind: VariableKind) -> Value {
        match kind {
            VariableKind::Boolean => Value::Boolean(false),
            VariableKind::Integer => Value::Integer(0),
            VariableKind::Long => Value::Long(0),
            VariableKind::Double => Value::Double(0.0),
            VariableKind::Enum => Value::Enum(Some(0)),
        }
    }

    pub fn to_bits(&self) -> u64 {
        match *self {
            Value::Boolean(b) => b as u64,
            Value::Integer(i) => i as i64 as u64,
            Value::Long(l) => l as u64,
            Value::Double(d) => d.to_bits(),
            Value::Enum(Some(ordinal)) => ordinal as u64,
            Value::Enum(None) => NULL_ENUM_ORDINAL as u64,
        }
    }

    /// Decode a bit pattern for the given kind.
    ///
    /// Enum ordinals outside `[0, 255]` decode as null.
    pub fn from_bits(kind: VariableKind, bits: u64) -> Value {
        match kind {
            VariableKind::Boolean => Value::Boolean(bits != 0),
            VariableKind::Integer => Value::Integer(bits as i64 as i32),
            VariableKind::Long => Value::Long(bits as i64),
            VariableKind::Double => Value::Double(f64::from_bits(bits)),
            VariableKind::Enum => Value::Enum(u8::try_from(bits as i64).ok()),
        }
    }

    /// Numeric view, mostly for charting. Null enums map to NaN.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Boolean(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Integer(i) => i as f64,
            Value::Long(l) => l as f64,
            Value::Double(d) => d,
            Value::Enum(Some(ordinal)) => ordinal as f64,
            Value::Enum(None) => f64::NAN,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Long(l) => write!(f, "{}", l),
            Value::Double(d) => write!(f, "{}", d),
            Value::Enum(Some(ordinal)) => write!(f, "#{}", ordinal),
            Value::Enum(None) => write!(f, "null"),
        }
    }
}

/// Constants of an enum variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumSpec {
    pub constants: Vec<String>,
    pub null_allowed: bool,
}

impl EnumSpec {
    pub fn new(constants: Vec<String>, null_allowed: bool) -> Result<Self> {
        if constants.len() > MAX_ENUM_CONSTANTS {
            return Err(SimBufError::Registry(format!(
                "enum declares {} constants, at most {} are supported",
                constants.len(),
                MAX_ENUM_CONSTANTS
            )));
        }
        Ok(Self {
            constants,
            null_allowed,
        })
    }

    fn accepts(&self, ordinal: i64) -> bool {
        if ordinal == NULL_ENUM_ORDINAL {
            self.null_allowed
        } else {
            ordinal >= 0 && (ordinal as usize) < self.constants.len()
        }
    }
}

/// A named, typed, mutable scalar cell living in a [`Registry`].
///
/// Variables are only created through their registry, see
/// [`Registry::add_variable`] and [`Registry::add_enum_variable`].
pub struct Variable {
    name: String,
    kind: VariableKind,
    enum_spec: Option<EnumSpec>,
    bits: AtomicU64,
    registry: Weak<Registry>,
}

impl Variable {
    pub(super) fn new(
        name: String,
        kind: VariableKind,
        enum_spec: Option<EnumSpec>,
        registry: Weak<Registry>,
    ) -> Self {
        let initial = match (&enum_spec, kind) {
            (Some(spec), VariableKind::Enum) if spec.constants.is_empty() => {
                NULL_ENUM_ORDINAL as u64
            }
            _ => Value::zero(kind).to_bits(),
        };
        Self {
            name,
            kind,
            enum_spec,
            bits: AtomicU64::new(initial),
            registry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> VariableKind {
        self.kind
    }

    pub fn enum_spec(&self) -> Option<&EnumSpec> {
        self.enum_spec.as_ref()
    }

    /// The registry this variable belongs to, if it is still alive.
    pub fn registry(&self) -> Option<Arc<Registry>> {
        self.registry.upgrade()
    }

    pub fn namespace(&self) -> Namespace {
        self.registry()
            .map(|r| r.namespace())
            .unwrap_or_default()
    }

    /// Full dotted path, e.g. `root.robot.q`.
    pub fn full_name(&self) -> String {
        let namespace = self.namespace();
        if namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", namespace, self.name)
        }
    }

    pub fn value(&self) -> Value {
        Value::from_bits(self.kind, self.value_as_long_bits())
    }

    /// Set the value. Returns `true` if the value actually changed.
    ///
    /// Values of another kind, and enum ordinals this variable does not
    /// declare, are rejected.
    pub fn set_value(&self, value: Value) -> bool {
        if value.kind() != self.kind {
            tracing::debug!(
                "Rejected {} value for {} variable '{}'",
                value.kind(),
                self.kind,
                self.name
            );
            return false;
        }
        self.set_value_from_long_bits(value.to_bits())
    }

    pub fn value_as_long_bits(&self) -> u64 {
        // Single writer per cell; cross-thread hand-off goes through the mailboxes.
        self.bits.load(Ordering::Relaxed)
    }

    /// Set the value from its bit pattern. Returns `true` if it changed.
    pub fn set_value_from_long_bits(&self, bits: u64) -> bool {
        let bits = match self.kind {
            VariableKind::Boolean => (bits != 0) as u64,
            VariableKind::Integer => bits as i64 as i32 as i64 as u64,
            VariableKind::Long | VariableKind::Double => bits,
            VariableKind::Enum => {
                let ordinal = bits as i64;
                let valid = match &self.enum_spec {
                    Some(spec) => spec.accepts(ordinal),
                    None => (NULL_ENUM_ORDINAL..=u8::MAX as i64).contains(&ordinal),
                };
                if !valid {
                    return false;
                }
                bits
            }
        };
        self.bits.swap(bits, Ordering::Relaxed) != bits
    }

    pub fn as_bool(&self) -> bool {
        self.value_as_long_bits() != 0
    }

    pub fn as_f64(&self) -> f64 {
        self.value().as_f64()
    }

    pub fn set_bool(&self, value: bool) -> bool {
        self.set_value(Value::Boolean(value))
    }

    pub fn set_i32(&self, value: i32) -> bool {
        self.set_value(Value::Integer(value))
    }

    pub fn set_i64(&self, value: i64) -> bool {
        self.set_value(Value::Long(value))
    }

    pub fn set_f64(&self, value: f64) -> bool {
        self.set_value(Value::Double(value))
    }

    pub fn set_enum(&self, ordinal: Option<u8>) -> bool {
        self.set_value(Value::Enum(ordinal))
    }

    /// Create a variable with the same name, kind and value in `target`.
    pub fn duplicate(&self, target: &Arc<Registry>) -> Result<Arc<Variable>> {
        let duplicate = target.insert_variable(&self.name, self.kind, self.enum_spec.clone())?;
        duplicate.set_value_from_long_bits(self.value_as_long_bits());
        Ok(duplicate)
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variable")
            .field("name", &self.full_name())
            .field("value", &self.value())
            .finish()
    }
}
