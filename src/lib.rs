//! # Introduction
//!
//! Kestrel is the runtime core of a dynamically typed, class-based scripting
//! language. It provides the pieces a tree-walking evaluator needs underneath
//! its AST: a simulated slot heap with a mark-sweep collector, a scope graph
//! with name resolution and access partitions, and a control-signal protocol
//! that implements structured jumps and exceptions without native unwinding.
//!
//! ## Layers
//!
//! ```text
//! AST nodes → Interpreter session → Environments (scopes, control state)
//!                                 → Memory (heap, free list, GC, compaction)
//! ```
//!
//! 1. [`ast`]: the contract every AST node implements.
//! 2. [`interpreter`]: the [`interpreter::engine::Interpreter`] session plus
//!    statement drivers, threads and errors.
//! 3. [`environment`]: the scope arena, name resolution and control signals.
//! 4. [`memory`]: values, the slot heap, the collector and the call stack.
//! 5. [`config`]: session options and tracing setup.
//!
//! ## Memory model
//!
//! Objects live in a fixed number of slots. Single-slot requests pop the head
//! of the free list; larger requests take the first run of consecutive free
//! addresses. When a request cannot be met the session collects garbage,
//! retries, and finally slides live objects together before giving up.

pub mod ast;
pub mod config;
pub mod environment;
pub mod interpreter;
pub mod memory;
