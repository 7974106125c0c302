//! Runtime value representation
//!
//! This module defines the [`Value`] enum, which represents every value a binding,
//! an array element slot, or a control-signal field can hold. Primitives are stored
//! unboxed; heap-resident objects are reached through a [`Reference`].
//!
//! # Value Types
//!
//! - [`Value::Undefined`]: the "unassigned" sentinel used by `const` declarations
//! - [`Value::Null`]: the null value (equivalent to [`Reference::NULL`])
//! - [`Value::Bool`], [`Value::Int`], [`Value::Float`], [`Value::Char`], [`Value::Str`]
//! - [`Value::Reference`]: index of a heap object header
//!
//! # Const Tracking
//!
//! The `Undefined` variant lets a `const` binding be declared before it is
//! assigned; the first assignment replaces the sentinel and every later one fails.

use std::fmt;
use std::sync::Arc;

/// Index into the simulated heap. Slot 0 is never allocated and stands for null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference(pub(crate) usize);

impl Reference {
    pub const NULL: Reference = Reference(0);

    pub fn new(slot: usize) -> Self {
        Reference(slot)
    }

    /// Slot index of the object header
    pub fn slot(self) -> usize {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Reference to the slot `offset` positions after this one
    pub(crate) fn offset(self, offset: usize) -> Reference {
        Reference(self.0 + offset)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{:04}", self.0)
    }
}

/// Runtime values in the interpreter
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined, // Sentinel for a const that has not been assigned yet
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    Str(Arc<str>),
    Reference(Reference),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    /// Check if this value is the unassigned sentinel
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Check if this value is null (including a null reference)
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Reference(r) => r.is_null(),
            _ => false,
        }
    }

    /// Get the heap reference, returns None for primitives and null
    pub fn as_reference(&self) -> Option<Reference> {
        match self {
            Value::Reference(r) if !r.is_null() => Some(*r),
            _ => None,
        }
    }

    /// Get the integer value, returns None if not an Int
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Rewrite the reference held by this value, if any
    pub(crate) fn map_reference(&mut self, f: &impl Fn(Reference) -> Reference) {
        if let Value::Reference(r) = self {
            *r = f(*r);
        }
    }

    /// Script-level truthiness: null, false, zero and the empty string are false
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(x) => *x != 0.0,
            Value::Char(_) => true,
            Value::Str(s) => !s.is_empty(),
            Value::Reference(r) => !r.is_null(),
        }
    }

    /// Name of the value's runtime type, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Char(_) => "char",
            Value::Str(_) => "string",
            Value::Reference(_) => "reference",
        }
    }
}

impl From<Reference> for Value {
    fn from(r: Reference) -> Self {
        if r.is_null() {
            Value::Null
        } else {
            Value::Reference(r)
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "<unassigned>"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Char(c) => write!(f, "'{}'", c),
            Value::Str(s) => write!(f, "\"{}\"", s),
            Value::Reference(r) => write!(f, "{}", r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_reference_converts_to_null() {
        assert_eq!(Value::from(Reference::NULL), Value::Null);
        assert!(Value::Reference(Reference::NULL).is_null());
        assert_eq!(Value::from(Reference::new(3)).as_reference(), Some(Reference::new(3)));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Int(-1).is_truthy());
        assert!(!Value::str("").is_truthy());
        assert!(Value::Reference(Reference::new(1)).is_truthy());
    }
}
