//! Scope graph
//!
//! Environments live in an arena ([`Environments`]) and refer to each other by
//! [`EnvId`]. Edges between scopes are plain ids:
//! - `outer`: the lexical parent
//! - `calling`: for function and method activations, the caller's scope
//! - namespaces: module scopes imported into a Main-kind scope
//!
//! Heap objects (instances, modules, closures) point into the arena by id and
//! scopes point back into the heap by [`Reference`], so cycles between the two
//! never involve owning pointers. The collector reclaims unreachable scopes
//! together with unreachable objects.
//!
//! - [`resolve`]: name lookup, assignment and declaration
//! - [`control`]: the control-signal protocol (return, break, continue,
//!   fallthrough, yield, exceptions)

pub mod control;
pub mod resolve;

use std::fmt;

use rustc_hash::FxHashMap;

use crate::interpreter::errors::RuntimeError;
use crate::memory::value::{Reference, Value};

pub use control::{PendingException, SuspendToken};

/// Index of an environment in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvId(pub(crate) usize);

impl EnvId {
    pub fn new(index: usize) -> Self {
        EnvId(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether a scope is a declaration boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Main,
    Sub,
}

/// Variant tag without the owned state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Module,
    Function,
    Method,
    Instance,
    Block,
    Loop,
    LoopTitle,
    Case,
    Try,
    Thread,
}

impl ScopeKind {
    pub fn category(self) -> Category {
        match self {
            ScopeKind::Global
            | ScopeKind::Module
            | ScopeKind::Function
            | ScopeKind::Method
            | ScopeKind::Instance => Category::Main,
            _ => Category::Sub,
        }
    }
}

/// One name binding
#[derive(Debug, Clone, PartialEq)]
pub struct VarEntry {
    pub value: Value,
    pub is_const: bool,
}

impl VarEntry {
    pub fn var(value: Value) -> Self {
        VarEntry {
            value,
            is_const: false,
        }
    }

    pub fn constant(value: Value) -> Self {
        VarEntry {
            value,
            is_const: true,
        }
    }
}

/// Break/continue flags owned by a loop scope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopState {
    pub broken: bool,
    pub paused: bool,
}

impl LoopState {
    pub fn is_set(&self) -> bool {
        self.broken || self.paused
    }
}

/// Pending return owned by a function or method activation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReturnState {
    pub returned: bool,
    pub value: Value,
}

/// Access partitions of an instance scope. Public fields are ordinary bindings.
#[derive(Debug, Clone, Default)]
pub struct InstanceFields {
    pub generics: FxHashMap<String, VarEntry>,
    pub private: FxHashMap<String, VarEntry>,
    pub protected: FxHashMap<String, VarEntry>,
}

/// Scope variant together with the control state it owns
#[derive(Debug, Clone)]
pub enum Scope {
    Global {
        exception: Option<PendingException>,
    },
    Module {
        name: String,
    },
    Function {
        calling: Option<EnvId>,
        ret: ReturnState,
    },
    Method {
        calling: Option<EnvId>,
        ret: ReturnState,
        this: Reference,
    },
    Instance(Box<InstanceFields>),
    Block,
    Loop(LoopState),
    LoopTitle {
        title: String,
        state: LoopState,
    },
    Case {
        fallthrough: bool,
        yielded: Option<Value>,
    },
    Try {
        exception: Option<PendingException>,
    },
    Thread {
        exception: Option<PendingException>,
    },
}

impl Scope {
    pub fn module(name: impl Into<String>) -> Self {
        Scope::Module { name: name.into() }
    }

    pub fn function(calling: Option<EnvId>) -> Self {
        Scope::Function {
            calling,
            ret: ReturnState::default(),
        }
    }

    pub fn method(calling: Option<EnvId>, this: Reference) -> Self {
        Scope::Method {
            calling,
            ret: ReturnState::default(),
            this,
        }
    }

    pub fn instance() -> Self {
        Scope::Instance(Box::default())
    }

    pub fn new_loop() -> Self {
        Scope::Loop(LoopState::default())
    }

    pub fn titled_loop(title: impl Into<String>) -> Self {
        Scope::LoopTitle {
            title: title.into(),
            state: LoopState::default(),
        }
    }

    pub fn case() -> Self {
        Scope::Case {
            fallthrough: false,
            yielded: None,
        }
    }

    pub fn try_block() -> Self {
        Scope::Try { exception: None }
    }

    pub fn thread() -> Self {
        Scope::Thread { exception: None }
    }

    pub fn kind(&self) -> ScopeKind {
        match self {
            Scope::Global { .. } => ScopeKind::Global,
            Scope::Module { .. } => ScopeKind::Module,
            Scope::Function { .. } => ScopeKind::Function,
            Scope::Method { .. } => ScopeKind::Method,
            Scope::Instance(_) => ScopeKind::Instance,
            Scope::Block => ScopeKind::Block,
            Scope::Loop(_) => ScopeKind::Loop,
            Scope::LoopTitle { .. } => ScopeKind::LoopTitle,
            Scope::Case { .. } => ScopeKind::Case,
            Scope::Try { .. } => ScopeKind::Try,
            Scope::Thread { .. } => ScopeKind::Thread,
        }
    }

    pub fn category(&self) -> Category {
        self.kind().category()
    }
}

/// One lexical or dynamic scope
#[derive(Debug, Clone)]
pub struct Environment {
    pub(crate) scope: Scope,
    pub(crate) outer: Option<EnvId>,
    pub(crate) bindings: FxHashMap<String, VarEntry>,
    /// Imported module scopes, in import order
    pub(crate) namespaces: Vec<EnvId>,
    serial: u64,
    pub(crate) marked: bool,
}

impl Environment {
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn kind(&self) -> ScopeKind {
        self.scope.kind()
    }

    pub fn outer(&self) -> Option<EnvId> {
        self.outer
    }

    /// Unique id that is never reused, unlike the arena index
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn binding(&self, name: &str) -> Option<&VarEntry> {
        self.bindings.get(name)
    }

    /// Names bound directly in this scope, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.bindings.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn namespaces(&self) -> &[EnvId] {
        &self.namespaces
    }

    /// Caller scope recorded by function and method activations
    pub fn calling(&self) -> Option<EnvId> {
        match &self.scope {
            Scope::Function { calling, .. } | Scope::Method { calling, .. } => *calling,
            _ => None,
        }
    }

    /// Visit every value held by this scope: bindings, partitions and control state
    pub(crate) fn for_each_value(&self, mut visit: impl FnMut(&Value)) {
        self.bindings.values().for_each(|entry| visit(&entry.value));
        match &self.scope {
            Scope::Instance(fields) => {
                for partition in [&fields.generics, &fields.private, &fields.protected] {
                    partition.values().for_each(|entry| visit(&entry.value));
                }
            }
            Scope::Function { ret, .. } => visit(&ret.value),
            Scope::Method { ret, this, .. } => {
                visit(&ret.value);
                visit(&Value::from(*this));
            }
            Scope::Case {
                yielded: Some(value),
                ..
            } => visit(value),
            Scope::Global {
                exception: Some(pending),
            }
            | Scope::Try {
                exception: Some(pending),
            }
            | Scope::Thread {
                exception: Some(pending),
            } => visit(&pending.value),
            _ => {}
        }
    }

    /// Rewrite every reference held by this scope
    pub(crate) fn map_references(&mut self, f: &impl Fn(Reference) -> Reference) {
        self.bindings
            .values_mut()
            .for_each(|entry| entry.value.map_reference(f));
        match &mut self.scope {
            Scope::Instance(fields) => {
                for partition in [
                    &mut fields.generics,
                    &mut fields.private,
                    &mut fields.protected,
                ] {
                    partition
                        .values_mut()
                        .for_each(|entry| entry.value.map_reference(f));
                }
            }
            Scope::Function { ret, .. } => ret.value.map_reference(f),
            Scope::Method { ret, this, .. } => {
                ret.value.map_reference(f);
                *this = f(*this);
            }
            Scope::Case {
                yielded: Some(value),
                ..
            } => value.map_reference(f),
            Scope::Global {
                exception: Some(pending),
            }
            | Scope::Try {
                exception: Some(pending),
            }
            | Scope::Thread {
                exception: Some(pending),
            } => pending.value.map_reference(f),
            _ => {}
        }
    }
}

/// Arena of all environments of one interpreter session
#[derive(Debug, Clone)]
pub struct Environments {
    scopes: Vec<Option<Environment>>,
    vacant: Vec<usize>,
    next_serial: u64,
    global: EnvId,
    /// Control state parked while `finally` blocks run, innermost last
    pub(crate) suspended: Vec<control::SuspendedControl>,
}

impl Environments {
    /// Create an arena holding only the global scope
    pub fn new() -> Self {
        let mut envs = Environments {
            scopes: Vec::new(),
            vacant: Vec::new(),
            next_serial: 0,
            global: EnvId(0),
            suspended: Vec::new(),
        };
        envs.global = envs.create(Scope::Global { exception: None }, None);
        envs
    }

    pub fn global(&self) -> EnvId {
        self.global
    }

    /// Create a scope with the given lexical parent
    pub fn create(&mut self, scope: Scope, outer: Option<EnvId>) -> EnvId {
        let env = Environment {
            scope,
            outer,
            bindings: FxHashMap::default(),
            namespaces: Vec::new(),
            serial: self.next_serial,
            marked: false,
        };
        self.next_serial += 1;

        match self.vacant.pop() {
            Some(index) => {
                self.scopes[index] = Some(env);
                EnvId(index)
            }
            None => {
                self.scopes.push(Some(env));
                EnvId(self.scopes.len() - 1)
            }
        }
    }

    pub fn env(&self, id: EnvId) -> Result<&Environment, RuntimeError> {
        self.scopes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(RuntimeError::UnknownScope { id: id.0 })
    }

    pub(crate) fn env_mut(&mut self, id: EnvId) -> Result<&mut Environment, RuntimeError> {
        self.scopes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(RuntimeError::UnknownScope { id: id.0 })
    }

    pub fn contains(&self, id: EnvId) -> bool {
        self.env(id).is_ok()
    }

    pub fn kind(&self, id: EnvId) -> Result<ScopeKind, RuntimeError> {
        Ok(self.env(id)?.kind())
    }

    pub fn outer(&self, id: EnvId) -> Result<Option<EnvId>, RuntimeError> {
        Ok(self.env(id)?.outer)
    }

    /// Number of live environments
    pub fn live_count(&self) -> usize {
        self.scopes.iter().filter(|slot| slot.is_some()).count()
    }

    /// Ids of every live environment
    pub fn ids(&self) -> impl Iterator<Item = EnvId> + '_ {
        self.scopes
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| EnvId(index))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Environment> {
        self.scopes.iter_mut().flatten()
    }

    /// Drop a scope; its index becomes reusable
    pub(crate) fn release(&mut self, id: EnvId) {
        if let Some(slot) = self.scopes.get_mut(id.0) {
            if slot.take().is_some() {
                self.vacant.push(id.0);
            }
        }
    }

    /// Nearest Main-kind scope, starting with `id` itself
    pub fn nearest_main(&self, id: EnvId) -> Result<EnvId, RuntimeError> {
        let mut current = id;
        loop {
            let env = self.env(current)?;
            if env.scope.category() == Category::Main {
                return Ok(current);
            }
            match env.outer {
                Some(outer) => current = outer,
                None => return Ok(current),
            }
        }
    }

    /// Attach a module scope as a namespace of the nearest Main-kind scope
    pub fn attach_namespace(&mut self, id: EnvId, module_env: EnvId) -> Result<(), RuntimeError> {
        self.env(module_env)?;
        let main = self.nearest_main(id)?;
        let env = self.env_mut(main)?;
        if !env.namespaces.contains(&module_env) {
            env.namespaces.push(module_env);
        }
        Ok(())
    }
}

impl Default for Environments {
    fn default() -> Self {
        Self::new()
    }
}
