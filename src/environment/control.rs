//! Control-signal protocol
//!
//! Structured jumps are recorded as state on the nearest scope that owns the
//! concept instead of unwinding the host stack:
//!
//! | Signal                  | Owner                     | Delegated by                 |
//! |-------------------------|---------------------------|------------------------------|
//! | return                  | Function, Method          | every Sub-kind scope         |
//! | break / continue        | Loop, LoopTitle           | Block, Try, Case, Thread     |
//! | fallthrough / yield     | Case                      | Block, Try                   |
//! | exception               | Try, Thread, Global       | everything else              |
//!
//! Function and method activations forward exceptions to their calling scope so
//! a thrown value travels up the dynamic call chain. A delegation that runs out
//! of scopes is a misuse error.
//!
//! Statement sequencing checks [`Environments::interrupted`] and
//! [`Environments::has_exception`] after every step.

use super::{EnvId, Environments, LoopState, ReturnState, Scope};
use crate::interpreter::errors::RuntimeError;
use crate::memory::value::Value;

/// A thrown value together with the call trace captured when it was thrown
#[derive(Debug, Clone, PartialEq)]
pub struct PendingException {
    pub value: Value,
    pub trace: Vec<String>,
}

impl PendingException {
    pub fn new(value: Value, trace: Vec<String>) -> Self {
        PendingException { value, trace }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Return,
    Break,
    Continue,
    Fallthrough,
    Yield,
    Exception,
}

impl Signal {
    /// Error for a request no scope up to `last` owns
    fn misuse(self, label: Option<&str>, last: EnvId) -> RuntimeError {
        let label = label.map(str::to_string);
        match self {
            Signal::Return => RuntimeError::ReturnOutsideFunction,
            Signal::Break => RuntimeError::BreakOutsideLoop { label },
            Signal::Continue => RuntimeError::ContinueOutsideLoop { label },
            Signal::Fallthrough => RuntimeError::FallthroughOutsideCase,
            Signal::Yield => RuntimeError::YieldOutsideCase,
            Signal::Exception => RuntimeError::UnknownScope { id: last.index() },
        }
    }
}

/// Control state parked while a `finally` block runs
#[derive(Debug, Clone, Default)]
pub(crate) struct SuspendedControl {
    ret: Option<(EnvId, ReturnState)>,
    exception: Option<(EnvId, PendingException)>,
    /// Loop flags of every loop between the `try` and its Main scope
    loops: Vec<(EnvId, LoopState)>,
    /// Fallthrough flag and yielded value of every enclosing case
    cases: Vec<(EnvId, bool, Option<Value>)>,
    /// Owners checked on restore for state produced by the finally block
    owners: Vec<EnvId>,
}

impl SuspendedControl {
    pub(crate) fn for_each_value(&self, mut visit: impl FnMut(&Value)) {
        if let Some((_, ret)) = &self.ret {
            visit(&ret.value);
        }
        if let Some((_, pending)) = &self.exception {
            visit(&pending.value);
        }
        for (_, _, yielded) in &self.cases {
            if let Some(value) = yielded {
                visit(value);
            }
        }
    }

    pub(crate) fn map_references(
        &mut self,
        f: &impl Fn(crate::memory::value::Reference) -> crate::memory::value::Reference,
    ) {
        if let Some((_, ret)) = &mut self.ret {
            ret.value.map_reference(f);
        }
        if let Some((_, pending)) = &mut self.exception {
            pending.value.map_reference(f);
        }
        for (_, _, yielded) in &mut self.cases {
            if let Some(value) = yielded {
                value.map_reference(f);
            }
        }
    }
}

/// Handle returned by [`Environments::suspend_control`]
#[derive(Debug, PartialEq, Eq)]
#[must_use = "suspended control state must be restored"]
pub struct SuspendToken(usize);

impl Environments {
    /// Scope that owns `signal` for a request raised in `env`
    fn owner(&self, env: EnvId, signal: Signal, label: Option<&str>) -> Result<EnvId, RuntimeError> {
        let mut current = env;
        loop {
            let scope = self.env(current)?;
            let next = match (&scope.scope, signal) {
                (Scope::Function { .. } | Scope::Method { .. }, Signal::Return) => {
                    return Ok(current)
                }
                (Scope::Loop(_), Signal::Break | Signal::Continue) if label.is_none() => {
                    return Ok(current)
                }
                (Scope::LoopTitle { title, .. }, Signal::Break | Signal::Continue)
                    if label.map_or(true, |l| l == title.as_str()) =>
                {
                    return Ok(current)
                }
                (Scope::Case { .. }, Signal::Fallthrough | Signal::Yield) => return Ok(current),
                (
                    Scope::Global { .. } | Scope::Try { .. } | Scope::Thread { .. },
                    Signal::Exception,
                ) => return Ok(current),

                // Exceptions travel along the dynamic chain out of activations
                (Scope::Function { calling, .. } | Scope::Method { calling, .. }, Signal::Exception) => {
                    calling.or(scope.outer)
                }
                (_, Signal::Exception) => scope.outer,

                (Scope::Block | Scope::Try { .. }, _) => scope.outer,
                (Scope::Loop(_) | Scope::LoopTitle { .. }, Signal::Return | Signal::Break | Signal::Continue) => {
                    scope.outer
                }
                (Scope::Case { .. } | Scope::Thread { .. }, Signal::Return | Signal::Break | Signal::Continue) => {
                    scope.outer
                }
                _ => None,
            };
            match next {
                Some(outer) => current = outer,
                None => return Err(signal.misuse(label, current)),
            }
        }
    }

    /// Record a return value on the enclosing function or method activation
    pub fn set_return(&mut self, env: EnvId, value: Value) -> Result<(), RuntimeError> {
        let owner = self.owner(env, Signal::Return, None)?;
        if let Some(ret) = self.return_state_mut(owner) {
            ret.returned = true;
            ret.value = value;
        }
        Ok(())
    }

    /// Pending return value of an activation scope, if one was set
    pub fn return_value(&self, activation: EnvId) -> Option<&Value> {
        match &self.env(activation).ok()?.scope {
            Scope::Function { ret, .. } | Scope::Method { ret, .. } if ret.returned => {
                Some(&ret.value)
            }
            _ => None,
        }
    }

    /// Clear and return the pending return value of an activation scope
    pub fn take_return(&mut self, activation: EnvId) -> Option<Value> {
        let ret = self.return_state_mut(activation)?;
        if !ret.returned {
            return None;
        }
        Some(std::mem::take(ret).value)
    }

    fn return_state_mut(&mut self, id: EnvId) -> Option<&mut ReturnState> {
        match &mut self.env_mut(id).ok()?.scope {
            Scope::Function { ret, .. } | Scope::Method { ret, .. } => Some(ret),
            _ => None,
        }
    }

    /// `break`, optionally targeting a titled loop
    pub fn break_loop(&mut self, env: EnvId, label: Option<&str>) -> Result<(), RuntimeError> {
        let owner = self.owner(env, Signal::Break, label)?;
        if let Some(state) = self.loop_state_mut(owner) {
            state.broken = true;
        }
        Ok(())
    }

    /// `continue`: skip the rest of the current iteration
    pub fn pause_loop(&mut self, env: EnvId, label: Option<&str>) -> Result<(), RuntimeError> {
        let owner = self.owner(env, Signal::Continue, label)?;
        if let Some(state) = self.loop_state_mut(owner) {
            state.paused = true;
        }
        Ok(())
    }

    /// Clear the pause flag of the nearest loop so the next iteration runs
    pub fn resume_loop(&mut self, env: EnvId) -> Result<(), RuntimeError> {
        let owner = self.owner(env, Signal::Continue, None)?;
        if let Some(state) = self.loop_state_mut(owner) {
            state.paused = false;
        }
        Ok(())
    }

    /// Flags of a loop scope
    pub fn loop_state(&self, loop_env: EnvId) -> Result<LoopState, RuntimeError> {
        match &self.env(loop_env)?.scope {
            Scope::Loop(state) | Scope::LoopTitle { state, .. } => Ok(*state),
            _ => Err(RuntimeError::BreakOutsideLoop { label: None }),
        }
    }

    fn loop_state_mut(&mut self, id: EnvId) -> Option<&mut LoopState> {
        match &mut self.env_mut(id).ok()?.scope {
            Scope::Loop(state) | Scope::LoopTitle { state, .. } => Some(state),
            _ => None,
        }
    }

    /// Continue into the next case arm
    pub fn fallthrough(&mut self, env: EnvId) -> Result<(), RuntimeError> {
        let owner = self.owner(env, Signal::Fallthrough, None)?;
        if let Scope::Case { fallthrough, .. } = &mut self.env_mut(owner)?.scope {
            *fallthrough = true;
        }
        Ok(())
    }

    /// Clear and return the fallthrough flag of a case scope
    pub fn take_fallthrough(&mut self, case_env: EnvId) -> Result<bool, RuntimeError> {
        match &mut self.env_mut(case_env)?.scope {
            Scope::Case { fallthrough, .. } => Ok(std::mem::take(fallthrough)),
            _ => Err(RuntimeError::FallthroughOutsideCase),
        }
    }

    /// Produce the result of a case construct used as an expression
    pub fn yield_value(&mut self, env: EnvId, value: Value) -> Result<(), RuntimeError> {
        let owner = self.owner(env, Signal::Yield, None)?;
        if let Scope::Case { yielded, .. } = &mut self.env_mut(owner)?.scope {
            *yielded = Some(value);
        }
        Ok(())
    }

    pub fn take_yield(&mut self, case_env: EnvId) -> Result<Option<Value>, RuntimeError> {
        match &mut self.env_mut(case_env)?.scope {
            Scope::Case { yielded, .. } => Ok(yielded.take()),
            _ => Err(RuntimeError::YieldOutsideCase),
        }
    }

    /// Record a thrown value on the nearest exception-aware scope
    pub fn throw_exception(
        &mut self,
        env: EnvId,
        exception: PendingException,
    ) -> Result<(), RuntimeError> {
        let owner = self.owner(env, Signal::Exception, None)?;
        if let Some(slot) = self.exception_slot_mut(owner) {
            *slot = Some(exception);
        }
        Ok(())
    }

    pub fn has_exception(&self, env: EnvId) -> bool {
        self.exception(env).is_some()
    }

    /// Exception pending on the scope that would catch a throw from `env`
    pub fn exception(&self, env: EnvId) -> Option<&PendingException> {
        let owner = self.owner(env, Signal::Exception, None).ok()?;
        match &self.env(owner).ok()?.scope {
            Scope::Global { exception } | Scope::Try { exception } | Scope::Thread { exception } => {
                exception.as_ref()
            }
            _ => None,
        }
    }

    /// Clear and return the exception visible from `env`
    pub fn take_exception(&mut self, env: EnvId) -> Option<PendingException> {
        let owner = self.owner(env, Signal::Exception, None).ok()?;
        self.exception_slot_mut(owner)?.take()
    }

    fn exception_slot_mut(&mut self, id: EnvId) -> Option<&mut Option<PendingException>> {
        match &mut self.env_mut(id).ok()?.scope {
            Scope::Global { exception } | Scope::Try { exception } | Scope::Thread { exception } => {
                Some(exception)
            }
            _ => None,
        }
    }

    /// Whether the statement sequence running in `env` must stop.
    ///
    /// A Sub-kind scope is interrupted if its own flags are set or its outer
    /// scope is interrupted; a Main-kind scope only looks at its own return flag.
    pub fn interrupted(&self, env: EnvId) -> bool {
        let mut current = Some(env);
        while let Some(id) = current {
            let Ok(scope) = self.env(id) else {
                return false;
            };
            match &scope.scope {
                Scope::Function { ret, .. } | Scope::Method { ret, .. } => return ret.returned,
                Scope::Global { .. } | Scope::Module { .. } | Scope::Instance(_) => return false,
                Scope::Loop(state) | Scope::LoopTitle { state, .. } if state.is_set() => {
                    return true
                }
                Scope::Case {
                    fallthrough,
                    yielded,
                } if *fallthrough || yielded.is_some() => return true,
                _ => current = scope.outer,
            }
        }
        false
    }

    /// Park pending return, exception, loop and case state so a `finally`
    /// block runs with a clean control state.
    ///
    /// Loop and case state is parked on every Sub-kind scope up to the nearest
    /// Main scope, so jumps aimed at a titled outer loop are parked too.
    pub fn suspend_control(&mut self, env: EnvId) -> SuspendToken {
        let mut parked = SuspendedControl::default();

        if let Ok(owner) = self.owner(env, Signal::Return, None) {
            parked.owners.push(owner);
            if let Some(ret) = self.return_state_mut(owner) {
                if ret.returned {
                    parked.ret = Some((owner, std::mem::take(ret)));
                }
            }
        }
        if let Ok(owner) = self.owner(env, Signal::Exception, None) {
            parked.owners.push(owner);
            if let Some(pending) = self.exception_slot_mut(owner).and_then(Option::take) {
                parked.exception = Some((owner, pending));
            }
        }

        let mut current = Some(env);
        while let Some(id) = current {
            let Ok(scope) = self.env_mut(id) else {
                break;
            };
            match &mut scope.scope {
                Scope::Global { .. }
                | Scope::Module { .. }
                | Scope::Function { .. }
                | Scope::Method { .. }
                | Scope::Instance(_) => break,
                Scope::Loop(state) | Scope::LoopTitle { state, .. } => {
                    parked.owners.push(id);
                    if state.is_set() {
                        parked.loops.push((id, std::mem::take(state)));
                    }
                }
                Scope::Case {
                    fallthrough,
                    yielded,
                } => {
                    parked.owners.push(id);
                    if *fallthrough || yielded.is_some() {
                        parked
                            .cases
                            .push((id, std::mem::take(fallthrough), yielded.take()));
                    }
                }
                _ => {}
            }
            current = scope.outer;
        }

        self.suspended.push(parked);
        SuspendToken(self.suspended.len() - 1)
    }

    /// Restore parked control state unless the `finally` block produced its own,
    /// in which case the new state wins and the parked state is discarded
    pub fn restore_control(&mut self, token: SuspendToken) {
        debug_assert_eq!(token.0 + 1, self.suspended.len(), "finally blocks restore in LIFO order");
        self.suspended.truncate(token.0 + 1);
        let Some(parked) = self.suspended.pop() else {
            return;
        };

        let superseded = parked.owners.iter().any(|&owner| self.has_own_control_state(owner));
        if superseded {
            return;
        }

        if let Some((owner, ret)) = parked.ret {
            if let Some(slot) = self.return_state_mut(owner) {
                *slot = ret;
            }
        }
        if let Some((owner, pending)) = parked.exception {
            if let Some(slot) = self.exception_slot_mut(owner) {
                *slot = Some(pending);
            }
        }
        for (owner, state) in parked.loops {
            if let Some(slot) = self.loop_state_mut(owner) {
                *slot = state;
            }
        }
        for (owner, flag, value) in parked.cases {
            if let Ok(Scope::Case {
                fallthrough,
                yielded,
            }) = self.env_mut(owner).map(|env| &mut env.scope)
            {
                *fallthrough = flag;
                *yielded = value;
            }
        }
    }

    fn has_own_control_state(&self, id: EnvId) -> bool {
        match self.env(id).map(|env| &env.scope) {
            Ok(Scope::Function { ret, .. } | Scope::Method { ret, .. }) => ret.returned,
            Ok(Scope::Global { exception } | Scope::Try { exception } | Scope::Thread { exception }) => {
                exception.is_some()
            }
            Ok(Scope::Loop(state) | Scope::LoopTitle { state, .. }) => state.is_set(),
            Ok(Scope::Case {
                fallthrough,
                yielded,
            }) => *fallthrough || yielded.is_some(),
            _ => false,
        }
    }
}
