//! Statement drivers built on the control-signal protocol.
//!
//! Adds `impl Interpreter` methods for the constructs whose sequencing depends
//! on pending control state: plain statement sequences, loops, `try` and case
//! constructs. After every step a driver checks [`Interpreter::interrupted`]
//! and [`Interpreter::has_exception`] and stops as soon as either is set; the
//! scope that owns the signal decides what happens next.

use crate::ast::NodeRef;
use crate::environment::{EnvId, Scope};
use crate::interpreter::engine::Interpreter;
use crate::interpreter::errors::RuntimeError;
use crate::memory::value::Value;

/// One arm of a case construct
#[derive(Debug, Clone)]
pub struct CaseArm {
    /// Value compared against the subject; `None` marks the default arm
    pub pattern: Option<NodeRef>,
    pub body: Vec<NodeRef>,
}

/// Handler of a `try` statement
#[derive(Debug, Clone, Copy)]
pub struct CatchClause<'a> {
    /// Name the caught value is bound to
    pub binding: &'a str,
    pub body: &'a [NodeRef],
}

impl Interpreter {
    /// Evaluate one node. Catchable errors are thrown as script exceptions.
    pub fn evaluate(&mut self, node: &NodeRef, env: EnvId) -> Result<Value, RuntimeError> {
        match node.evaluate(self, env) {
            Ok(value) => Ok(value),
            Err(err) => {
                self.raise(env, err)?;
                Ok(Value::Null)
            }
        }
    }

    /// Whether sequencing in `env` must stop
    pub fn halted(&self, env: EnvId) -> bool {
        self.has_exception(env) || self.interrupted(env)
    }

    /// Evaluate `statements` in order until one leaves a control signal or
    /// exception pending. Returns the value of the last statement evaluated.
    pub fn execute_sequence(
        &mut self,
        env: EnvId,
        statements: &[NodeRef],
    ) -> Result<Value, RuntimeError> {
        let mut last = Value::Null;
        for statement in statements {
            last = self.evaluate(statement, env)?;
            if self.halted(env) {
                break;
            }
        }
        Ok(last)
    }

    /// Evaluate `statements` in a fresh block scope
    pub fn execute_block(
        &mut self,
        env: EnvId,
        statements: &[NodeRef],
    ) -> Result<Value, RuntimeError> {
        let block = self.enter_scope(Scope::Block, env);
        let result = self.execute_sequence(block, statements);
        self.exit_scope(block);
        result
    }

    /// Run a loop.
    ///
    /// `condition` is checked before every iteration (a missing condition is
    /// always true) and `update` runs after it. Each iteration's body gets its
    /// own block scope inside the loop scope. `break` ends the loop, `continue`
    /// is cleared before the next iteration, and any signal owned further out
    /// (a return, or a jump to an outer titled loop) ends it as well.
    pub fn execute_loop(
        &mut self,
        env: EnvId,
        label: Option<&str>,
        condition: Option<&NodeRef>,
        update: Option<&NodeRef>,
        body: &[NodeRef],
    ) -> Result<(), RuntimeError> {
        let scope = match label {
            Some(title) => Scope::titled_loop(title),
            None => Scope::new_loop(),
        };
        let loop_env = self.enter_scope(scope, env);
        let result = self.run_loop(loop_env, condition, update, body);
        self.exit_scope(loop_env);
        result
    }

    fn run_loop(
        &mut self,
        loop_env: EnvId,
        condition: Option<&NodeRef>,
        update: Option<&NodeRef>,
        body: &[NodeRef],
    ) -> Result<(), RuntimeError> {
        loop {
            if let Some(condition) = condition {
                let value = self.evaluate(condition, loop_env)?;
                if self.halted(loop_env) || !value.is_truthy() {
                    break;
                }
            }

            self.execute_block(loop_env, body)?;

            let state = self.envs.loop_state(loop_env)?;
            if state.broken || self.has_exception(loop_env) {
                break;
            }
            if state.paused {
                self.resume_loop(loop_env)?;
            }
            if self.interrupted(loop_env) {
                break;
            }

            if let Some(update) = update {
                self.evaluate(update, loop_env)?;
                if self.halted(loop_env) {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Run a `try` statement.
    ///
    /// An exception left by `body` is handed to `catch` (bound to its name in a
    /// new block scope) or, without a handler, rethrown to the next
    /// exception-aware scope. `finally` runs with pending return, exception,
    /// loop and case state parked; if it produces control state of its own that
    /// state wins, otherwise the parked state is restored.
    pub fn execute_try(
        &mut self,
        env: EnvId,
        body: &[NodeRef],
        catch: Option<CatchClause<'_>>,
        finally: Option<&[NodeRef]>,
    ) -> Result<(), RuntimeError> {
        let try_env = self.enter_scope(Scope::try_block(), env);
        let outcome = self.execute_sequence(try_env, body);
        let caught = self.envs.take_exception(try_env);
        self.exit_scope(try_env);
        outcome?;

        if let Some(pending) = caught {
            match catch {
                Some(clause) => {
                    let catch_env = self.enter_scope(Scope::Block, env);
                    let result = self
                        .define_var(catch_env, clause.binding, pending.value)
                        .and_then(|()| self.execute_sequence(catch_env, clause.body));
                    self.exit_scope(catch_env);
                    result?;
                }
                None => self.envs.throw_exception(env, pending)?,
            }
        }

        if let Some(finally) = finally {
            let token = self.envs.suspend_control(env);
            let result = self.execute_block(env, finally);
            self.envs.restore_control(token);
            result?;
        }
        Ok(())
    }

    /// Run a case construct against `subject`.
    ///
    /// The first arm whose pattern equals the subject runs, or the default arm
    /// when none does. An arm that ends with `fallthrough` continues into the
    /// next arm. Returns the value passed to `yield`, if any.
    pub fn execute_case(
        &mut self,
        env: EnvId,
        subject: &Value,
        arms: &[CaseArm],
    ) -> Result<Option<Value>, RuntimeError> {
        let case_env = self.enter_scope(Scope::case(), env);
        let result = self.run_case(case_env, subject, arms);
        self.exit_scope(case_env);
        result
    }

    fn run_case(
        &mut self,
        case_env: EnvId,
        subject: &Value,
        arms: &[CaseArm],
    ) -> Result<Option<Value>, RuntimeError> {
        let mut selected = None;
        let mut default = None;
        for (index, arm) in arms.iter().enumerate() {
            match &arm.pattern {
                Some(pattern) => {
                    let value = self.evaluate(pattern, case_env)?;
                    if self.halted(case_env) {
                        return Ok(None);
                    }
                    if value == *subject {
                        selected = Some(index);
                        break;
                    }
                }
                None => {
                    default = default.or(Some(index));
                }
            }
        }

        let Some(mut index) = selected.or(default) else {
            return Ok(None);
        };
        loop {
            self.execute_block(case_env, &arms[index].body)?;

            if let Some(value) = self.envs.take_yield(case_env)? {
                return Ok(Some(value));
            }
            let fell_through = self.envs.take_fallthrough(case_env)?;
            if !fell_through || index + 1 >= arms.len() || self.halted(case_env) {
                return Ok(None);
            }
            index += 1;
        }
    }
}
