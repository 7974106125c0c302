// Boundary between the runtime core and the tree-walking evaluator
//
// The parser and the per-node evaluation logic live outside this crate. Every
// AST node only has to honour one contract: evaluate itself against an
// environment and produce a value.

use std::fmt;
use std::sync::Arc;

use crate::environment::EnvId;
use crate::interpreter::engine::Interpreter;
use crate::interpreter::errors::RuntimeError;
use crate::memory::value::Value;

/// Source location information for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// An evaluable AST node.
///
/// Implementations call back into the [`Interpreter`] to resolve names,
/// allocate objects and raise control signals. Statement sequencing must check
/// [`Interpreter::interrupted`] and [`Interpreter::has_exception`] after every
/// step; the drivers in [`crate::interpreter::jumps`] do exactly that.
pub trait Node: fmt::Debug + Send + Sync {
    fn evaluate(&self, interp: &mut Interpreter, env: EnvId) -> Result<Value, RuntimeError>;

    fn location(&self) -> SourceLocation {
        SourceLocation::default()
    }
}

/// Shared handle to an AST node (function bodies are shared by every closure)
pub type NodeRef = Arc<dyn Node>;
