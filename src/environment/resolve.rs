//! Name resolution, assignment and declaration
//!
//! Lookup walks `outer` edges from the starting scope. Two variants extend the
//! plain walk:
//! - an instance scope checks its partitions in order (generics, private,
//!   protected, public) and then follows its `super` binding to the parent
//!   instance; private fields are skipped on super-delegated steps
//! - a method scope falls back to its bound `this` instance before moving outward
//!
//! If the lexical walk fails, every namespace attached along the chain is
//! searched, innermost scope first and each scope's namespaces in import order.
//!
//! Redeclaration is checked only up to the nearest Main-kind scope, so a name can
//! be declared again across a function, module or instance boundary but not in
//! nested blocks of one function.

use super::{Category, EnvId, Environments, Scope, VarEntry};
use crate::interpreter::errors::RuntimeError;
use crate::memory::heap::{Heap, ObjectData};
use crate::memory::value::{Reference, Value};

/// Partition of an instance scope a binding lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Public,
    Generic,
    Private,
    Protected,
}

/// Name bound to the parent instance inside an instance scope
pub const SUPER_BINDING: &str = "super";

/// Name bound to the receiver inside a method activation
pub const THIS_BINDING: &str = "this";

impl Environments {
    /// Look up `name` starting at `env`
    pub fn get(&self, heap: &Heap, env: EnvId, name: &str) -> Result<Value, RuntimeError> {
        match self.locate(heap, env, name)? {
            Some((id, partition)) => Ok(self.entry(id, partition, name)?.value.clone()),
            None => Err(RuntimeError::UndefinedVariable {
                name: name.to_string(),
            }),
        }
    }

    /// Assign to an existing binding. A const accepts exactly one assignment.
    pub fn set(
        &mut self,
        heap: &Heap,
        env: EnvId,
        name: &str,
        value: Value,
    ) -> Result<(), RuntimeError> {
        match self.locate(heap, env, name)? {
            Some((id, partition)) => self.assign(id, partition, name, value),
            None => Err(RuntimeError::UndefinedVariable {
                name: name.to_string(),
            }),
        }
    }

    pub fn has_name(&self, heap: &Heap, env: EnvId, name: &str) -> bool {
        matches!(self.locate(heap, env, name), Ok(Some(_)))
    }

    pub fn define_var(&mut self, env: EnvId, name: &str, value: Value) -> Result<(), RuntimeError> {
        self.define(env, Partition::Public, name, VarEntry::var(value))
    }

    /// Declare a const. Pass [`Value::Undefined`] to assign it later.
    pub fn define_const(
        &mut self,
        env: EnvId,
        name: &str,
        value: Value,
    ) -> Result<(), RuntimeError> {
        self.define(env, Partition::Public, name, VarEntry::constant(value))
    }

    /// Declare a binding in a specific partition of an instance scope
    pub fn define_field(
        &mut self,
        env: EnvId,
        partition: Partition,
        name: &str,
        entry: VarEntry,
    ) -> Result<(), RuntimeError> {
        if partition != Partition::Public && !matches!(self.env(env)?.scope, Scope::Instance(_)) {
            return Err(RuntimeError::NotAnInstance { id: env.0 });
        }
        self.define(env, partition, name, entry)
    }

    /// Read a member of an instance object, private fields included
    pub fn get_member(
        &self,
        heap: &Heap,
        instance: Reference,
        name: &str,
    ) -> Result<Value, RuntimeError> {
        let env = instance_env(heap, instance)?;
        match self.locate_in(heap, env, name, true, 0)? {
            Some((id, partition)) => Ok(self.entry(id, partition, name)?.value.clone()),
            None => Err(RuntimeError::AttributeNotFound {
                name: name.to_string(),
            }),
        }
    }

    /// Assign a member of an instance object
    pub fn set_member(
        &mut self,
        heap: &Heap,
        instance: Reference,
        name: &str,
        value: Value,
    ) -> Result<(), RuntimeError> {
        let env = instance_env(heap, instance)?;
        match self.locate_in(heap, env, name, true, 0)? {
            Some((id, partition)) => self.assign(id, partition, name, value),
            None => Err(RuntimeError::AttributeNotFound {
                name: name.to_string(),
            }),
        }
    }

    fn define(
        &mut self,
        env: EnvId,
        partition: Partition,
        name: &str,
        entry: VarEntry,
    ) -> Result<(), RuntimeError> {
        // Walk Sub-kind scopes up to and including the enclosing Main-kind scope
        let mut current = Some(env);
        while let Some(id) = current {
            let scope = self.env(id)?;
            if binds_locally(scope, name) {
                return Err(RuntimeError::NameRedefinition {
                    name: name.to_string(),
                });
            }
            if scope.scope.category() == Category::Main {
                break;
            }
            current = scope.outer;
        }

        let scope = self.env_mut(env)?;
        let table = match (&mut scope.scope, partition) {
            (_, Partition::Public) => &mut scope.bindings,
            (Scope::Instance(fields), Partition::Generic) => &mut fields.generics,
            (Scope::Instance(fields), Partition::Private) => &mut fields.private,
            (Scope::Instance(fields), Partition::Protected) => &mut fields.protected,
            _ => return Err(RuntimeError::NotAnInstance { id: env.0 }),
        };
        table.insert(name.to_string(), entry);
        Ok(())
    }

    fn assign(
        &mut self,
        id: EnvId,
        partition: Partition,
        name: &str,
        value: Value,
    ) -> Result<(), RuntimeError> {
        let entry = self.entry_mut(id, partition, name)?;
        if entry.is_const && !entry.value.is_undefined() {
            return Err(RuntimeError::ConstReassignment {
                name: name.to_string(),
            });
        }
        entry.value = value;
        Ok(())
    }

    /// Find the scope and partition holding `name`
    pub(crate) fn locate(
        &self,
        heap: &Heap,
        env: EnvId,
        name: &str,
    ) -> Result<Option<(EnvId, Partition)>, RuntimeError> {
        let mut current = Some(env);
        while let Some(id) = current {
            if let Some(found) = self.locate_in(heap, id, name, true, 0)? {
                return Ok(Some(found));
            }
            current = self.env(id)?.outer;
        }

        // Last resort: imported namespaces along the chain
        let mut current = Some(env);
        while let Some(id) = current {
            let scope = self.env(id)?;
            for &namespace in &scope.namespaces {
                if self.env(namespace)?.bindings.contains_key(name) {
                    return Ok(Some((namespace, Partition::Public)));
                }
            }
            current = scope.outer;
        }
        Ok(None)
    }

    /// Resolve `name` within one scope, including instance and `this` fallbacks
    fn locate_in(
        &self,
        heap: &Heap,
        id: EnvId,
        name: &str,
        private_visible: bool,
        depth: usize,
    ) -> Result<Option<(EnvId, Partition)>, RuntimeError> {
        // Super chains are acyclic in well-formed programs; bound the walk anyway
        if depth > self.live_count() {
            return Ok(None);
        }

        let env = self.env(id)?;
        match &env.scope {
            Scope::Instance(fields) => {
                if fields.generics.contains_key(name) {
                    return Ok(Some((id, Partition::Generic)));
                }
                if private_visible && fields.private.contains_key(name) {
                    return Ok(Some((id, Partition::Private)));
                }
                if fields.protected.contains_key(name) {
                    return Ok(Some((id, Partition::Protected)));
                }
                if env.bindings.contains_key(name) {
                    return Ok(Some((id, Partition::Public)));
                }
                let parent = env
                    .bindings
                    .get(SUPER_BINDING)
                    .and_then(|entry| entry.value.as_reference());
                match parent.and_then(|r| instance_env(heap, r).ok()) {
                    Some(parent_env) => self.locate_in(heap, parent_env, name, false, depth + 1),
                    None => Ok(None),
                }
            }
            Scope::Method { this, .. } => {
                if env.bindings.contains_key(name) {
                    return Ok(Some((id, Partition::Public)));
                }
                match instance_env(heap, *this) {
                    Ok(receiver) => self.locate_in(heap, receiver, name, true, depth + 1),
                    Err(_) => Ok(None),
                }
            }
            _ => Ok(env.bindings.contains_key(name).then_some((id, Partition::Public))),
        }
    }

    fn entry(&self, id: EnvId, partition: Partition, name: &str) -> Result<&VarEntry, RuntimeError> {
        let env = self.env(id)?;
        let table = match (&env.scope, partition) {
            (_, Partition::Public) => &env.bindings,
            (Scope::Instance(fields), Partition::Generic) => &fields.generics,
            (Scope::Instance(fields), Partition::Private) => &fields.private,
            (Scope::Instance(fields), Partition::Protected) => &fields.protected,
            _ => return Err(RuntimeError::NotAnInstance { id: id.0 }),
        };
        table.get(name).ok_or_else(|| RuntimeError::UndefinedVariable {
            name: name.to_string(),
        })
    }

    fn entry_mut(
        &mut self,
        id: EnvId,
        partition: Partition,
        name: &str,
    ) -> Result<&mut VarEntry, RuntimeError> {
        let env = self.env_mut(id)?;
        let table = match (&mut env.scope, partition) {
            (_, Partition::Public) => &mut env.bindings,
            (Scope::Instance(fields), Partition::Generic) => &mut fields.generics,
            (Scope::Instance(fields), Partition::Private) => &mut fields.private,
            (Scope::Instance(fields), Partition::Protected) => &mut fields.protected,
            _ => return Err(RuntimeError::NotAnInstance { id: id.0 }),
        };
        table
            .get_mut(name)
            .ok_or_else(|| RuntimeError::UndefinedVariable {
                name: name.to_string(),
            })
    }
}

fn binds_locally(env: &super::Environment, name: &str) -> bool {
    if env.bindings.contains_key(name) {
        return true;
    }
    match &env.scope {
        Scope::Instance(fields) => {
            fields.generics.contains_key(name)
                || fields.private.contains_key(name)
                || fields.protected.contains_key(name)
        }
        _ => false,
    }
}

/// Environment of the instance object at `r`
pub(crate) fn instance_env(heap: &Heap, r: Reference) -> Result<EnvId, RuntimeError> {
    match &heap.object(r)?.data {
        ObjectData::Instance { env, .. } => Ok(*env),
        other => Err(RuntimeError::TypeError {
            expected: "instance".to_string(),
            got: other.kind_name().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn new_instance(heap: &mut Heap, envs: &mut Environments) -> (Reference, EnvId) {
        let env = envs.create(Scope::instance(), Some(envs.global()));
        let r = heap.reserve(1).unwrap();
        heap.object_mut(r).unwrap().data = ObjectData::Instance {
            class: Reference::NULL,
            env,
        };
        (r, env)
    }

    #[test]
    fn test_lexical_lookup_and_shadowing() {
        let heap = Heap::new(4);
        let mut envs = Environments::new();
        let global = envs.global();
        envs.define_var(global, "x", Value::Int(1)).unwrap();

        let func = envs.create(Scope::function(Some(global)), Some(global));
        let block = envs.create(Scope::Block, Some(func));
        assert_eq!(envs.get(&heap, block, "x").unwrap(), Value::Int(1));

        envs.define_var(func, "x", Value::Int(2)).unwrap();
        assert_eq!(envs.get(&heap, block, "x").unwrap(), Value::Int(2));
        assert_eq!(envs.get(&heap, global, "x").unwrap(), Value::Int(1));
    }

    #[test]
    fn test_undefined_name() {
        let heap = Heap::new(4);
        let envs = Environments::new();
        assert_eq!(
            envs.get(&heap, envs.global(), "missing"),
            Err(RuntimeError::UndefinedVariable {
                name: "missing".to_string()
            })
        );
    }

    #[test]
    fn test_const_assigned_once() {
        let heap = Heap::new(4);
        let mut envs = Environments::new();
        let global = envs.global();
        envs.define_const(global, "k", Value::Undefined).unwrap();
        envs.set(&heap, global, "k", Value::Int(5)).unwrap();
        assert_eq!(
            envs.set(&heap, global, "k", Value::Int(6)),
            Err(RuntimeError::ConstReassignment {
                name: "k".to_string()
            })
        );
        assert_eq!(envs.get(&heap, global, "k").unwrap(), Value::Int(5));
    }

    #[test]
    fn test_var_reassigned_freely() {
        let heap = Heap::new(4);
        let mut envs = Environments::new();
        let global = envs.global();
        envs.define_var(global, "v", Value::Int(0)).unwrap();
        for i in 1..10 {
            envs.set(&heap, global, "v", Value::Int(i)).unwrap();
        }
        assert_eq!(envs.get(&heap, global, "v").unwrap(), Value::Int(9));
    }

    #[test]
    fn test_redefinition_boundary() {
        let mut envs = Environments::new();
        let global = envs.global();
        let func = envs.create(Scope::function(Some(global)), Some(global));
        envs.define_var(func, "a", Value::Int(1)).unwrap();

        let block = envs.create(Scope::Block, Some(func));
        let nested = envs.create(Scope::new_loop(), Some(block));
        assert!(matches!(
            envs.define_var(nested, "a", Value::Int(2)),
            Err(RuntimeError::NameRedefinition { .. })
        ));

        let inner = envs.create(Scope::function(Some(nested)), Some(nested));
        assert!(envs.define_var(inner, "a", Value::Int(3)).is_ok());
    }

    #[test]
    fn test_instance_partitions_and_super() {
        let mut heap = Heap::new(8);
        let mut envs = Environments::new();
        let (parent, parent_env) = new_instance(&mut heap, &mut envs);
        let (child, child_env) = new_instance(&mut heap, &mut envs);

        envs.define_field(parent_env, Partition::Private, "secret", VarEntry::var(Value::Int(1)))
            .unwrap();
        envs.define_field(parent_env, Partition::Protected, "shared", VarEntry::var(Value::Int(2)))
            .unwrap();
        envs.define_var(parent_env, "name", Value::str("parent")).unwrap();
        envs.define_var(child_env, SUPER_BINDING, Value::Reference(parent))
            .unwrap();

        assert_eq!(envs.get_member(&heap, child, "shared").unwrap(), Value::Int(2));
        assert_eq!(envs.get_member(&heap, child, "name").unwrap(), Value::str("parent"));
        assert!(matches!(
            envs.get_member(&heap, child, "secret"),
            Err(RuntimeError::AttributeNotFound { .. })
        ));
        assert_eq!(envs.get_member(&heap, parent, "secret").unwrap(), Value::Int(1));
    }

    #[test]
    fn test_partitions_share_one_declaration_space() {
        let mut heap = Heap::new(4);
        let mut envs = Environments::new();
        let (obj, env) = new_instance(&mut heap, &mut envs);
        envs.define_var(env, "T", Value::str("public")).unwrap();
        // Redefinition across partitions of one instance is rejected
        assert!(envs
            .define_field(env, Partition::Generic, "T", VarEntry::var(Value::str("generic")))
            .is_err());
        envs.define_field(env, Partition::Generic, "U", VarEntry::var(Value::Int(7)))
            .unwrap();
        assert_eq!(envs.get_member(&heap, obj, "U").unwrap(), Value::Int(7));
    }

    #[test]
    fn test_method_falls_back_to_this() {
        let mut heap = Heap::new(4);
        let mut envs = Environments::new();
        let (obj, env) = new_instance(&mut heap, &mut envs);
        envs.define_field(env, Partition::Private, "count", VarEntry::var(Value::Int(3)))
            .unwrap();

        let global = envs.global();
        let method = envs.create(Scope::method(Some(global), obj), Some(global));
        assert_eq!(envs.get(&heap, method, "count").unwrap(), Value::Int(3));
        envs.set(&heap, method, "count", Value::Int(4)).unwrap();
        assert_eq!(envs.get_member(&heap, obj, "count").unwrap(), Value::Int(4));
    }

    #[test]
    fn test_namespaces_resolve_in_import_order() {
        let heap = Heap::new(4);
        let mut envs = Environments::new();
        let global = envs.global();
        let first = envs.create(Scope::module("first"), Some(global));
        let second = envs.create(Scope::module("second"), Some(global));
        envs.define_var(first, "pi", Value::Int(3)).unwrap();
        envs.define_var(second, "pi", Value::Int(4)).unwrap();
        envs.define_var(second, "e", Value::Int(2)).unwrap();

        envs.attach_namespace(global, first).unwrap();
        envs.attach_namespace(global, second).unwrap();

        let block = envs.create(Scope::Block, Some(global));
        assert_eq!(envs.get(&heap, block, "pi").unwrap(), Value::Int(3));
        assert_eq!(envs.get(&heap, block, "e").unwrap(), Value::Int(2));
        assert!(envs.has_name(&heap, block, "e"));
        assert!(!envs.has_name(&heap, block, "tau"));
    }

    #[test]
    fn test_non_instance_partition_rejected() {
        let mut envs = Environments::new();
        let global = envs.global();
        assert_eq!(
            envs.define_field(global, Partition::Private, "p", VarEntry::var(Value::Null)),
            Err(RuntimeError::NotAnInstance { id: global.index() })
        );
    }
}
