// Interpreter session: heap, scope graph, call stack and root registries

use rustc_hash::FxHashMap;
use tracing::{debug, info, trace};

use crate::ast::{NodeRef, SourceLocation};
use crate::config::Config;
use crate::environment::resolve::{instance_env, SUPER_BINDING, THIS_BINDING};
use crate::environment::{EnvId, Environments, PendingException, Scope};
use crate::interpreter::errors::RuntimeError;
use crate::interpreter::threads::ThreadTable;
use crate::memory::compact;
use crate::memory::gc::{self, GcReport, RootSet};
use crate::memory::heap::{
    Callable, CallableBody, CallableKind, ClassData, HeapObject, NativeFn, ObjectData,
};
use crate::memory::stack::{CallStack, StackTraceNode};
use crate::memory::value::{Reference, Value};
use crate::memory::{AvailableView, Memory};

/// One interpreter session.
///
/// Owns everything a running script shares: the heap, the scope arena, the
/// call stack and the registries the collector treats as roots. Several
/// sessions can coexist in one process.
pub struct Interpreter {
    config: Config,

    /// Heap plus managed/permanent/guarded references
    pub(crate) memory: Memory,

    /// Scope arena, global scope included
    pub(crate) envs: Environments,

    /// Active calls
    stack: CallStack,

    /// Scopes entered by a driver and not yet exited
    temp_roots: Vec<EnvId>,

    /// Threads waiting for the session lock
    pub(crate) threads: ThreadTable,
}

impl Interpreter {
    pub fn new(config: Config) -> Self {
        Interpreter {
            memory: Memory::new(config.heap_size, config.check_contracts),
            envs: Environments::new(),
            stack: CallStack::new(config.stack_limit),
            temp_roots: Vec::new(),
            threads: ThreadTable::default(),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn envs(&self) -> &Environments {
        &self.envs
    }

    pub fn envs_mut(&mut self) -> &mut Environments {
        &mut self.envs
    }

    pub fn stack(&self) -> &CallStack {
        &self.stack
    }

    pub fn global(&self) -> EnvId {
        self.envs.global()
    }

    // ===== Allocation =====

    /// Allocate `size` contiguous slots.
    ///
    /// On exhaustion this collects, retries once, then compacts (when enabled)
    /// and retries again before failing. A collection or compaction invalidates
    /// references that are held only in host locals.
    pub fn allocate(&mut self, size: usize) -> Result<Reference, RuntimeError> {
        let size = size.max(1);
        if let Some(r) = self.memory.try_allocate(size) {
            return Ok(r);
        }

        if self.config.gc_trace {
            info!(requested = size, available = self.memory.available(), "heap exhausted, collecting");
        } else {
            debug!(requested = size, available = self.memory.available(), "heap exhausted, collecting");
        }
        self.collect(None)?;
        if let Some(r) = self.memory.try_allocate(size) {
            return Ok(r);
        }

        if self.config.compaction {
            self.slide()?;
            if let Some(r) = self.memory.try_allocate(size) {
                return Ok(r);
            }
        }

        Err(RuntimeError::OutOfMemory {
            requested: size,
            available: self.memory.available(),
        })
    }

    /// Allocate a single-slot object.
    ///
    /// References and scopes held by `data` stay rooted while the allocation
    /// runs and are rewritten if a compaction moves their targets.
    pub fn allocate_object(&mut self, data: ObjectData) -> Result<Reference, RuntimeError> {
        if let ObjectData::Array { len } = data {
            return self.allocate_array(vec![Value::Null; len]);
        }

        let mut data = data;
        let mut held = Vec::new();
        data.references(|r| held.push(r));

        let mark = self.memory.guard(held.iter().map(|&r| Value::Reference(r)));
        let roots = self.temp_roots.len();
        self.temp_roots.extend(data.environment());

        let result = self.allocate(1);

        self.temp_roots.truncate(roots);
        let relocated = self.memory.release_guard(mark);
        let r = result?;

        let forward: FxHashMap<Reference, Reference> = held
            .into_iter()
            .zip(relocated)
            .filter_map(|(old, new)| match new {
                Value::Reference(new) if new != old => Some((old, new)),
                _ => None,
            })
            .collect();
        if !forward.is_empty() {
            data.map_references(&|r| forward.get(&r).copied().unwrap_or(r));
        }

        self.memory.init(r, HeapObject::new(data))?;
        trace!(reference = %r, "allocated object");
        Ok(r)
    }

    /// Allocate an array whose elements follow the header
    pub fn allocate_array(&mut self, elements: Vec<Value>) -> Result<Reference, RuntimeError> {
        let len = elements.len();
        let mark = self.memory.guard(elements);
        let result = self.allocate(len + 1);
        let elements = self.memory.release_guard(mark);
        let r = result?;

        for (index, value) in elements.into_iter().enumerate() {
            self.memory.heap.write(r.offset(index + 1), value)?;
        }
        trace!(reference = %r, len, "allocated array");
        Ok(r)
    }

    /// Allocate a script function closing over `closure`
    pub fn allocate_function(
        &mut self,
        name: &str,
        params: Vec<String>,
        body: NodeRef,
        closure: EnvId,
    ) -> Result<Reference, RuntimeError> {
        self.allocate_object(ObjectData::Callable(Callable {
            name: name.to_string(),
            kind: CallableKind::Function,
            params,
            body: CallableBody::Script(body),
            closure: Some(closure),
            this: None,
        }))
    }

    /// Allocate a method bound to `this`
    pub fn allocate_method(
        &mut self,
        name: &str,
        params: Vec<String>,
        body: NodeRef,
        closure: EnvId,
        this: Reference,
    ) -> Result<Reference, RuntimeError> {
        self.allocate_object(ObjectData::Callable(Callable {
            name: name.to_string(),
            kind: CallableKind::Method,
            params,
            body: CallableBody::Script(body),
            closure: Some(closure),
            this: Some(this),
        }))
    }

    /// Allocate a host function taking exactly `arity` arguments
    pub fn allocate_native(
        &mut self,
        name: &str,
        arity: usize,
        function: NativeFn,
    ) -> Result<Reference, RuntimeError> {
        self.allocate_object(ObjectData::Callable(Callable {
            name: name.to_string(),
            kind: CallableKind::Native,
            params: (0..arity).map(|i| format!("arg{}", i)).collect(),
            body: CallableBody::Native(function),
            closure: None,
            this: None,
        }))
    }

    pub fn allocate_class(
        &mut self,
        name: &str,
        superclass: Option<Reference>,
        attributes: Vec<Reference>,
    ) -> Result<Reference, RuntimeError> {
        self.allocate_object(ObjectData::Class(ClassData {
            name: name.to_string(),
            superclass,
            attributes,
        }))
    }

    /// Allocate an instance of `class` together with its scope
    pub fn allocate_instance(
        &mut self,
        class: Reference,
        outer: EnvId,
    ) -> Result<(Reference, EnvId), RuntimeError> {
        let env = self.envs.create(Scope::instance(), Some(outer));
        let r = self.allocate_object(ObjectData::Instance { class, env })?;
        Ok((r, env))
    }

    /// Link `instance` to the parent instance it delegates to
    pub fn bind_super(&mut self, instance: Reference, parent: Reference) -> Result<(), RuntimeError> {
        let env = instance_env(&self.memory.heap, instance)?;
        instance_env(&self.memory.heap, parent)?;
        self.envs
            .define_var(env, SUPER_BINDING, Value::Reference(parent))
    }

    /// Allocate a module together with its scope
    pub fn allocate_module(
        &mut self,
        name: &str,
        outer: EnvId,
    ) -> Result<(Reference, EnvId), RuntimeError> {
        let env = self.envs.create(Scope::module(name), Some(outer));
        let r = self.allocate_object(ObjectData::Module {
            name: name.to_string(),
            env,
        })?;
        Ok((r, env))
    }

    /// Attach the module at `module` as a namespace of the scope enclosing `env`
    pub fn import(&mut self, env: EnvId, module: Reference) -> Result<(), RuntimeError> {
        let module_env = match &self.memory.get(module)?.data {
            ObjectData::Module { env, .. } => *env,
            other => {
                return Err(RuntimeError::TypeError {
                    expected: "Module".to_string(),
                    got: other.kind_name().to_string(),
                })
            }
        };
        self.envs.attach_namespace(env, module_env)
    }

    /// Allocate the object a catchable error is thrown as
    pub fn allocate_error(&mut self, type_name: &str, message: &str) -> Result<Reference, RuntimeError> {
        self.allocate_object(ObjectData::Native {
            type_name: type_name.to_string(),
            payload: Value::str(message),
        })
    }

    pub fn free(&mut self, r: Reference, length: usize) -> Result<(), RuntimeError> {
        self.memory.free(r, length)
    }

    // ===== Collection =====

    /// Collect garbage now
    pub fn gc(&mut self) -> Result<GcReport, RuntimeError> {
        self.collect(None)
    }

    /// Collect garbage, additionally rooting `env` and its chain
    pub fn gc_from(&mut self, env: EnvId) -> Result<GcReport, RuntimeError> {
        self.collect(Some(env))
    }

    /// Collect garbage and slide the survivors together.
    /// Returns the number of objects that moved.
    pub fn compact(&mut self) -> Result<usize, RuntimeError> {
        self.collect(None)?;
        self.slide()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn collect(&mut self, extra: Option<EnvId>) -> Result<GcReport, RuntimeError> {
        let mut envs: Vec<EnvId> = self.stack.frames().iter().map(|frame| frame.env).collect();
        envs.extend(self.temp_roots.iter().copied());
        envs.extend(extra);
        let roots = RootSet {
            envs,
            values: self.threads.values().cloned().collect(),
        };

        let report = gc::collect(&mut self.memory, &mut self.envs, &roots);
        if self.config.gc_summary {
            info!(%report, "collection finished");
        } else {
            debug!(%report, "collection finished");
        }

        if self.memory.check_contracts() {
            self.memory.verify_free_list()?;
        }
        Ok(report)
    }

    fn slide(&mut self) -> Result<usize, RuntimeError> {
        let forwarding = compact::compact(&mut self.memory, &mut self.envs);
        self.threads.remap(&|r| forwarding.resolve(r));
        debug!(
            moved = forwarding.len(),
            available = self.memory.available(),
            "compacted heap"
        );

        if self.memory.check_contracts() {
            self.memory.verify_free_list()?;
        }
        Ok(forwarding.len())
    }

    // ===== Scopes =====

    /// Create a scope and keep it rooted until [`Interpreter::exit_scope`]
    pub fn enter_scope(&mut self, scope: Scope, outer: EnvId) -> EnvId {
        let id = self.envs.create(scope, Some(outer));
        self.temp_roots.push(id);
        trace!(scope = %id, outer = %outer, "enter scope");
        id
    }

    /// Stop rooting a scope. It survives only if something still reaches it.
    pub fn exit_scope(&mut self, id: EnvId) {
        if let Some(position) = self.temp_roots.iter().rposition(|&root| root == id) {
            self.temp_roots.remove(position);
        }
        trace!(scope = %id, "exit scope");
    }

    pub fn get(&self, env: EnvId, name: &str) -> Result<Value, RuntimeError> {
        self.envs.get(&self.memory.heap, env, name)
    }

    pub fn set(&mut self, env: EnvId, name: &str, value: Value) -> Result<(), RuntimeError> {
        self.envs.set(&self.memory.heap, env, name, value)
    }

    pub fn has_name(&self, env: EnvId, name: &str) -> bool {
        self.envs.has_name(&self.memory.heap, env, name)
    }

    pub fn define_var(&mut self, env: EnvId, name: &str, value: Value) -> Result<(), RuntimeError> {
        self.envs.define_var(env, name, value)
    }

    pub fn define_const(&mut self, env: EnvId, name: &str, value: Value) -> Result<(), RuntimeError> {
        self.envs.define_const(env, name, value)
    }

    pub fn get_member(&self, instance: Reference, name: &str) -> Result<Value, RuntimeError> {
        self.envs.get_member(&self.memory.heap, instance, name)
    }

    pub fn set_member(
        &mut self,
        instance: Reference,
        name: &str,
        value: Value,
    ) -> Result<(), RuntimeError> {
        self.envs
            .set_member(&self.memory.heap, instance, name, value)
    }

    // ===== Control signals =====

    pub fn interrupted(&self, env: EnvId) -> bool {
        self.envs.interrupted(env)
    }

    pub fn has_exception(&self, env: EnvId) -> bool {
        self.envs.has_exception(env)
    }

    pub fn set_return(&mut self, env: EnvId, value: Value) -> Result<(), RuntimeError> {
        self.envs.set_return(env, value)
    }

    pub fn break_loop(&mut self, env: EnvId, label: Option<&str>) -> Result<(), RuntimeError> {
        self.envs.break_loop(env, label)
    }

    pub fn pause_loop(&mut self, env: EnvId, label: Option<&str>) -> Result<(), RuntimeError> {
        self.envs.pause_loop(env, label)
    }

    pub fn resume_loop(&mut self, env: EnvId) -> Result<(), RuntimeError> {
        self.envs.resume_loop(env)
    }

    pub fn fallthrough(&mut self, env: EnvId) -> Result<(), RuntimeError> {
        self.envs.fallthrough(env)
    }

    pub fn yield_value(&mut self, env: EnvId, value: Value) -> Result<(), RuntimeError> {
        self.envs.yield_value(env, value)
    }

    /// Throw `value`, recording the current call trace
    pub fn throw(&mut self, env: EnvId, value: Value) -> Result<(), RuntimeError> {
        let trace = self.stack.render_trace();
        debug!(value = %value, depth = trace.len(), "throw");
        self.envs
            .throw_exception(env, PendingException::new(value, trace))
    }

    /// Route an error raised while evaluating in `env`.
    ///
    /// Catchable errors become error objects thrown through the scope graph;
    /// fatal and misuse errors are handed back to the caller.
    pub fn raise(&mut self, env: EnvId, err: RuntimeError) -> Result<(), RuntimeError> {
        if !err.is_catchable() {
            return Err(err);
        }
        let error = self.allocate_error(err.script_type_name(), &err.to_string())?;
        self.throw(env, Value::Reference(error))
    }

    /// Take the exception pending for `env` and render it with its trace
    pub fn report_uncaught(&mut self, env: EnvId) -> Option<String> {
        let pending = self.envs.take_exception(env)?;
        let mut report = format!("Uncaught exception: {}", self.describe(&pending.value));
        for line in &pending.trace {
            report.push_str("\n    ");
            report.push_str(line);
        }
        Some(report)
    }

    fn describe(&self, value: &Value) -> String {
        let Some(r) = value.as_reference() else {
            return value.to_string();
        };
        match self.memory.get(r).map(|object| &object.data) {
            Ok(ObjectData::Native {
                type_name,
                payload: Value::Str(message),
            }) => format!("{}: {}", type_name, message),
            Ok(ObjectData::Native { type_name, payload }) => format!("{}: {}", type_name, payload),
            Ok(ObjectData::Instance { class, .. }) => match self.memory.get(*class) {
                Ok(HeapObject {
                    data: ObjectData::Class(class),
                    ..
                }) => format!("<{} instance>", class.name),
                _ => "<instance>".to_string(),
            },
            Ok(other) => format!("<{}>", other.kind_name()),
            Err(_) => value.to_string(),
        }
    }

    // ===== Calls =====

    /// Push a frame, failing with a stack overflow past the configured limit
    pub fn push_stack(&mut self, frame: StackTraceNode) -> Result<(), RuntimeError> {
        self.stack.push(frame)
    }

    pub fn pop_stack(&mut self) -> Option<StackTraceNode> {
        self.stack.pop()
    }

    /// Call `callee` with `args` from `caller`.
    ///
    /// The activation's outer scope is the callee's closure and its calling
    /// scope is `caller`, so exceptions travel back along the call chain.
    /// Returns the value passed to `return`, or null.
    #[tracing::instrument(level = "trace", skip_all, fields(callee = %callee, depth = self.stack.depth()))]
    pub fn call(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        caller: EnvId,
        call_site: SourceLocation,
    ) -> Result<Value, RuntimeError> {
        let callable = match callee.as_reference().map(|r| self.memory.get(r)) {
            Some(Ok(HeapObject {
                data: ObjectData::Callable(callable),
                ..
            })) => callable.clone(),
            Some(Ok(object)) => {
                return Err(RuntimeError::NotCallable {
                    type_name: object.kind_name().to_string(),
                })
            }
            Some(Err(err)) => return Err(err),
            None => {
                return Err(RuntimeError::NotCallable {
                    type_name: callee.type_name().to_string(),
                })
            }
        };

        if args.len() != callable.params.len() {
            return Err(RuntimeError::ArgumentCountMismatch {
                function: callable.name.clone(),
                expected: callable.params.len(),
                got: args.len(),
            });
        }

        let outer = callable.closure.unwrap_or_else(|| self.global());
        let scope = match callable.this {
            Some(this) => Scope::method(Some(caller), this),
            None => Scope::function(Some(caller)),
        };
        let activation = self.envs.create(scope, Some(outer));
        self.stack
            .push(StackTraceNode::new(&callable.name, activation, call_site))?;

        let result = self.run_activation(&callable, activation, args);
        self.stack.pop();

        let value = result?;
        Ok(self.envs.take_return(activation).unwrap_or(value))
    }

    fn run_activation(
        &mut self,
        callable: &Callable,
        activation: EnvId,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        if let Some(this) = callable.this {
            self.envs
                .define_var(activation, THIS_BINDING, Value::Reference(this))?;
        }
        for (param, arg) in callable.params.iter().zip(&args) {
            self.envs.define_var(activation, param, arg.clone())?;
        }

        match &callable.body {
            CallableBody::Script(body) => {
                body.evaluate(self, activation)?;
                Ok(Value::Null)
            }
            CallableBody::Native(function) => function(self, activation, &args),
        }
    }

    // ===== Diagnostics =====

    pub fn memory_view(&self) -> String {
        self.memory.memory_view()
    }

    pub fn available_view(&self) -> AvailableView {
        self.memory.available_view()
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter::new(Config::default())
    }
}
