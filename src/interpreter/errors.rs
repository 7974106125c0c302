//! Runtime error types for the scripting runtime
//!
//! This module defines [`RuntimeError`], which covers every failure the heap,
//! the scope graph and the call machinery can report. Errors fall into three
//! classes (see [`ErrorClass`]):
//!
//! - **Fatal**: VM-level failures such as heap exhaustion or stack overflow.
//!   Scripts cannot catch them; they terminate the running script.
//! - **Misuse**: scope or control misuse (`break` outside a loop, reassigning a
//!   const). A well-formed program never triggers these.
//! - **Script**: catchable errors. [`Interpreter::raise`] turns them into heap
//!   error objects and throws them through the control-signal protocol.
//!
//! [`Interpreter::raise`]: crate::interpreter::engine::Interpreter::raise

use thiserror::Error;

use crate::ast::SourceLocation;

/// How an error propagates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Fatal,
    Misuse,
    Script,
}

/// Runtime errors that can occur during execution
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    /// No contiguous run of the requested size, even after collection
    #[error("Out of memory: requested {requested} slots, {available} free")]
    OutOfMemory { requested: usize, available: usize },

    /// Call depth exceeded the configured limit
    #[error("Stack overflow: depth {depth} exceeds limit {limit} at line {}", .location.line)]
    StackOverflow {
        depth: usize,
        limit: usize,
        location: SourceLocation,
    },

    /// Free-list accounting no longer matches the heap
    #[error("Free list corrupted: {message}")]
    FreeListCorrupted { message: String },

    /// Reference does not point at a live object or data slot
    #[error("Invalid reference @{reference:04}")]
    InvalidReference { reference: usize },

    /// Freed run does not match an allocated object
    #[error("Invalid free of {length} slots at @{reference:04}: {message}")]
    InvalidFree {
        reference: usize,
        length: usize,
        message: String,
    },

    #[error("Failed to spawn thread: {message}")]
    ThreadSpawnFailed { message: String },

    #[error("'break' outside of a loop")]
    BreakOutsideLoop { label: Option<String> },

    #[error("'continue' outside of a loop")]
    ContinueOutsideLoop { label: Option<String> },

    #[error("'fallthrough' outside of a case")]
    FallthroughOutsideCase,

    #[error("'yield' outside of a case expression")]
    YieldOutsideCase,

    #[error("'return' outside of a function")]
    ReturnOutsideFunction,

    /// Attempted to assign a const a second time
    #[error("Attempted to modify const variable '{name}'")]
    ConstReassignment { name: String },

    #[error("Name '{name}' is already defined in this scope")]
    NameRedefinition { name: String },

    /// Environment id was collected or never created
    #[error("Unknown scope #{id}")]
    UnknownScope { id: usize },

    #[error("Scope #{id} is not an instance scope")]
    NotAnInstance { id: usize },

    #[error("Undefined variable '{name}'")]
    UndefinedVariable { name: String },

    #[error("Object has no attribute '{name}'")]
    AttributeNotFound { name: String },

    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    #[error("Index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: i64, len: usize },

    #[error(
        "Function '{function}' expects {expected} argument{}, got {got}",
        plural(.expected)
    )]
    ArgumentCountMismatch {
        function: String,
        expected: usize,
        got: usize,
    },

    #[error("Value of type {type_name} is not callable")]
    NotCallable { type_name: String },
}

fn plural(n: &usize) -> &'static str {
    if *n == 1 {
        ""
    } else {
        "s"
    }
}

impl RuntimeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RuntimeError::OutOfMemory { .. }
            | RuntimeError::StackOverflow { .. }
            | RuntimeError::FreeListCorrupted { .. }
            | RuntimeError::InvalidReference { .. }
            | RuntimeError::InvalidFree { .. }
            | RuntimeError::ThreadSpawnFailed { .. } => ErrorClass::Fatal,

            RuntimeError::BreakOutsideLoop { .. }
            | RuntimeError::ContinueOutsideLoop { .. }
            | RuntimeError::FallthroughOutsideCase
            | RuntimeError::YieldOutsideCase
            | RuntimeError::ReturnOutsideFunction
            | RuntimeError::ConstReassignment { .. }
            | RuntimeError::NameRedefinition { .. }
            | RuntimeError::UnknownScope { .. }
            | RuntimeError::NotAnInstance { .. } => ErrorClass::Misuse,

            RuntimeError::UndefinedVariable { .. }
            | RuntimeError::AttributeNotFound { .. }
            | RuntimeError::TypeError { .. }
            | RuntimeError::IndexOutOfBounds { .. }
            | RuntimeError::ArgumentCountMismatch { .. }
            | RuntimeError::NotCallable { .. } => ErrorClass::Script,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    /// Whether scripts can intercept this error with `try`
    pub fn is_catchable(&self) -> bool {
        self.class() == ErrorClass::Script
    }

    /// Type name given to the heap object a catchable error is raised as
    pub fn script_type_name(&self) -> &'static str {
        match self {
            RuntimeError::UndefinedVariable { .. } => "NameError",
            RuntimeError::AttributeNotFound { .. } => "AttributeError",
            RuntimeError::TypeError { .. }
            | RuntimeError::NotCallable { .. }
            | RuntimeError::ArgumentCountMismatch { .. } => "TypeError",
            RuntimeError::IndexOutOfBounds { .. } => "IndexError",
            _ => "InternalError",
        }
    }

    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            RuntimeError::StackOverflow { location, .. } => Some(location),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert!(RuntimeError::OutOfMemory {
            requested: 2,
            available: 1
        }
        .is_fatal());
        assert_eq!(
            RuntimeError::BreakOutsideLoop { label: None }.class(),
            ErrorClass::Misuse
        );
        assert!(RuntimeError::UndefinedVariable {
            name: "x".to_string()
        }
        .is_catchable());
    }

    #[test]
    fn test_display_messages() {
        let err = RuntimeError::ArgumentCountMismatch {
            function: "f".to_string(),
            expected: 1,
            got: 2,
        };
        assert_eq!(err.to_string(), "Function 'f' expects 1 argument, got 2");

        let err = RuntimeError::StackOverflow {
            depth: 1001,
            limit: 1000,
            location: SourceLocation::new(12, 3),
        };
        assert_eq!(
            err.to_string(),
            "Stack overflow: depth 1001 exceeds limit 1000 at line 12"
        );
        assert_eq!(
            RuntimeError::InvalidReference { reference: 7 }.to_string(),
            "Invalid reference @0007"
        );
    }
}
