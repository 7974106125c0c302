//! Call stack implementation
//!
//! This module provides the bounded stack of active calls:
//! - [`CallStack`]: the stack of active-call records plus its depth limit
//! - [`StackTraceNode`]: a single call's activation record
//!
//! The collector treats every frame's environment as a root, and the frames are
//! rendered into a trace when a thrown value escapes to the top level.

use std::fmt;

use crate::ast::SourceLocation;
use crate::environment::EnvId;
use crate::interpreter::constants::DEFAULT_STACK_LIMIT;
use crate::interpreter::errors::RuntimeError;

/// Stack frame for one active call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackTraceNode {
    pub function_name: String,
    /// Activation environment of the call
    pub env: EnvId,
    /// Where the call was made from
    pub call_site: SourceLocation,
}

impl StackTraceNode {
    pub fn new(function_name: impl Into<String>, env: EnvId, call_site: SourceLocation) -> Self {
        StackTraceNode {
            function_name: function_name.into(),
            env,
            call_site,
        }
    }
}

impl fmt::Display for StackTraceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "at {} (line {}, column {})",
            self.function_name, self.call_site.line, self.call_site.column
        )
    }
}

/// The call stack
#[derive(Debug, Clone)]
pub struct CallStack {
    frames: Vec<StackTraceNode>,
    limit: usize,
}

impl CallStack {
    pub fn new(limit: usize) -> Self {
        CallStack {
            frames: Vec::new(),
            limit,
        }
    }

    /// Push a new stack frame, failing once the depth would exceed the limit
    pub fn push(&mut self, frame: StackTraceNode) -> Result<(), RuntimeError> {
        let depth = self.frames.len() + 1;
        if depth > self.limit {
            return Err(RuntimeError::StackOverflow {
                depth,
                limit: self.limit,
                location: frame.call_site,
            });
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Pop the top stack frame
    pub fn pop(&mut self) -> Option<StackTraceNode> {
        self.frames.pop()
    }

    /// Get the current (top) frame
    pub fn current(&self) -> Option<&StackTraceNode> {
        self.frames.last()
    }

    /// Get all frames, outermost first
    pub fn frames(&self) -> &[StackTraceNode] {
        &self.frames
    }

    /// Get the depth of the call stack
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Render the active frames innermost first, one per line
    pub fn render_trace(&self) -> Vec<String> {
        self.frames.iter().rev().map(|frame| frame.to_string()).collect()
    }
}

impl Default for CallStack {
    fn default() -> Self {
        Self::new(DEFAULT_STACK_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(name: &str, line: usize) -> StackTraceNode {
        StackTraceNode::new(name, EnvId::new(0), SourceLocation::new(line, 1))
    }

    #[test]
    fn test_push_pop_depth() {
        let mut stack = CallStack::new(4);
        stack.push(frame("main", 1)).unwrap();
        stack.push(frame("f", 2)).unwrap();
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.current().unwrap().function_name, "f");
        assert_eq!(stack.pop().unwrap().function_name, "f");
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn test_limit_is_inclusive() {
        let mut stack = CallStack::new(2);
        stack.push(frame("a", 1)).unwrap();
        stack.push(frame("b", 2)).unwrap();
        match stack.push(frame("c", 3)) {
            Err(RuntimeError::StackOverflow { depth, limit, .. }) => {
                assert_eq!(depth, 3);
                assert_eq!(limit, 2);
            }
            other => panic!("Expected stack overflow, got {:?}", other),
        }
        assert_eq!(stack.depth(), 2);
    }

    #[test]
    fn test_render_trace_innermost_first() {
        let mut stack = CallStack::new(8);
        stack.push(frame("main", 1)).unwrap();
        stack.push(frame("helper", 7)).unwrap();
        assert_eq!(
            stack.render_trace(),
            vec![
                "at helper (line 7, column 1)".to_string(),
                "at main (line 1, column 1)".to_string()
            ]
        );
    }
}
