//! Scripting runtime execution core
//!
//! This module provides the session object and the drivers built on it:
//! - [`engine`]: The [`Interpreter`](engine::Interpreter) session (allocation with
//!   collection fallback, scopes, calls, exception reporting)
//! - [`jumps`]: Statement sequencing, loops, `try` and case constructs
//! - [`threads`]: Lock-guarded sessions shared by script threads
//! - [`errors`]: Runtime error types
//!
//! # Execution Model
//!
//! AST nodes evaluate themselves against a scope and call back into the
//! session. Control flow never unwinds the host stack: `return`, `break`,
//! `continue`, `fallthrough`, `yield` and thrown values are recorded on the
//! owning scope, and the drivers in [`jumps`] stop sequencing as soon as one is
//! pending.

pub mod constants;
pub mod engine;
pub mod errors;
pub mod jumps;
pub mod threads;
