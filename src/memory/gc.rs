//! Mark-sweep garbage collector
//!
//! Stop-the-world and non-incremental. Marking runs over one worklist holding
//! both scopes and heap objects, so deep object graphs never recurse on the
//! host stack. Sweeping scans the heap from the first usable slot, frees every
//! unmarked header together with its data slots, and rebuilds the free list in
//! address order. Unmarked scopes are released from the arena afterwards.
//!
//! Roots:
//! - the global scope
//! - every call-stack frame's scope (its calling chain is followed by marking)
//! - registered temporary scopes
//! - managed, permanent and guarded references held by [`Memory`]
//! - control state parked by `finally` blocks
//! - any extra values supplied by the caller (pending thread requests)

use std::fmt;

use super::heap::{FreeList, Slot};
use super::value::{Reference, Value};
use super::Memory;
use crate::environment::{EnvId, Environments};
use crate::interpreter::constants::FIRST_USABLE_SLOT;

/// Roots supplied by the interpreter session on top of the ones [`Memory`] and
/// [`Environments`] already hold
#[derive(Debug, Clone, Default)]
pub struct RootSet {
    pub envs: Vec<EnvId>,
    pub values: Vec<Value>,
}

/// Outcome of one collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    pub freed_objects: usize,
    pub freed_slots: usize,
    pub freed_envs: usize,
    /// Free-list length after the sweep
    pub available: usize,
}

impl fmt::Display for GcReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "freed {} objects ({} slots) and {} scopes, {} slots available",
            self.freed_objects, self.freed_slots, self.freed_envs, self.available
        )
    }
}

enum Work {
    Env(EnvId),
    Object(Reference),
}

/// Run one full collection
pub fn collect(memory: &mut Memory, envs: &mut Environments, roots: &RootSet) -> GcReport {
    let mut work: Vec<Work> = Vec::new();

    work.push(Work::Env(envs.global()));
    work.extend(roots.envs.iter().copied().map(Work::Env));
    push_values(&mut work, roots.values.iter());
    push_values(&mut work, memory.guarded.iter());
    work.extend(memory.managed.iter().copied().map(Work::Object));
    work.extend(memory.permanent.iter().copied().map(Work::Object));
    for parked in &envs.suspended {
        parked.for_each_value(|value| push_value(&mut work, value));
    }

    mark(memory, envs, work);

    let mut report = sweep_heap(memory);
    report.freed_envs = sweep_envs(envs);
    report
}

fn push_value(work: &mut Vec<Work>, value: &Value) {
    if let Some(r) = value.as_reference() {
        work.push(Work::Object(r));
    }
}

fn push_values<'a>(work: &mut Vec<Work>, values: impl Iterator<Item = &'a Value>) {
    values.for_each(|value| push_value(work, value));
}

fn mark(memory: &mut Memory, envs: &mut Environments, mut work: Vec<Work>) {
    while let Some(item) = work.pop() {
        match item {
            Work::Env(id) => {
                let Ok(env) = envs.env_mut(id) else {
                    continue;
                };
                if env.marked {
                    continue;
                }
                env.marked = true;
                work.extend(env.outer.map(Work::Env));
                work.extend(env.calling().map(Work::Env));
                work.extend(env.namespaces.iter().copied().map(Work::Env));
                env.for_each_value(|value| push_value(&mut work, value));
            }
            Work::Object(r) => {
                let span = match memory.heap.slots_mut().get_mut(r.slot()) {
                    Some(Slot::Object(object)) if !object.marked && !r.is_null() => {
                        object.marked = true;
                        object.data.references(|child| work.push(Work::Object(child)));
                        work.extend(object.data.environment().map(Work::Env));
                        object.span()
                    }
                    _ => continue,
                };
                // Array elements are stored unboxed after the header
                for offset in 1..span {
                    if let Some(Slot::Data(value)) = memory.heap.slot(r.slot() + offset) {
                        push_value(&mut work, value);
                    }
                }
            }
        }
    }
}

fn sweep_heap(memory: &mut Memory) -> GcReport {
    let mut report = GcReport::default();
    let mut free = Vec::new();
    let slots = memory.heap.slots_mut();
    let end = slots.len();

    let mut index = FIRST_USABLE_SLOT;
    while index < end {
        let (live, span) = match &mut slots[index] {
            Slot::Object(object) => {
                let live = object.marked;
                object.marked = false;
                (Some(live), object.span().min(end - index))
            }
            Slot::Empty | Slot::Data(_) => (None, 1),
        };

        match live {
            // Skip the data slots of a live array without testing them
            Some(true) => {}
            Some(false) => {
                for slot in &mut slots[index..index + span] {
                    *slot = Slot::Empty;
                }
                free.extend(index..index + span);
                report.freed_objects += 1;
                report.freed_slots += span;
            }
            None => {
                // Stray data slots have no header left to own them
                slots[index] = Slot::Empty;
                free.push(index);
            }
        }
        index += span;
    }

    report.available = free.len();
    memory.heap.replace_free_list(FreeList::from_ordered(free));
    report
}

fn sweep_envs(envs: &mut Environments) -> usize {
    let global = envs.global();
    let ids: Vec<EnvId> = envs.ids().collect();
    let mut freed = 0;
    for id in ids {
        let Ok(env) = envs.env_mut(id) else {
            continue;
        };
        if env.marked || id == global {
            env.marked = false;
        } else {
            envs.release(id);
            freed += 1;
        }
    }
    freed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Scope;
    use crate::memory::heap::{HeapObject, ObjectData};
    use pretty_assertions::assert_eq;

    fn native(memory: &mut Memory, payload: Value) -> Reference {
        let r = memory.try_allocate(1).unwrap();
        memory
            .init(
                r,
                HeapObject::new(ObjectData::Native {
                    type_name: "Box".to_string(),
                    payload,
                }),
            )
            .unwrap();
        r
    }

    #[test]
    fn test_unreachable_objects_are_freed() {
        let mut memory = Memory::new(8, true);
        let mut envs = Environments::new();
        let kept = native(&mut memory, Value::Int(1));
        let lost = native(&mut memory, Value::Int(2));
        envs.define_var(envs.global(), "kept", Value::Reference(kept))
            .unwrap();

        let report = collect(&mut memory, &mut envs, &RootSet::default());
        assert_eq!(report.freed_objects, 1);
        assert_eq!(report.available, 6);
        assert!(memory.get(kept).is_ok());
        assert!(memory.get(lost).is_err());
        assert_eq!(memory.heap().free_list().iter().next(), Some(lost.slot()));
        memory.verify_free_list().unwrap();
    }

    #[test]
    fn test_array_elements_keep_targets_alive() {
        let mut memory = Memory::new(10, true);
        let mut envs = Environments::new();
        let target = native(&mut memory, Value::Null);
        let array = memory.try_allocate(3).unwrap();
        memory
            .write_element(array, 1, Value::Reference(target))
            .unwrap();
        memory.manage(array);

        let report = collect(&mut memory, &mut envs, &RootSet::default());
        assert_eq!(report.freed_objects, 0);
        assert!(memory.get(target).is_ok());
        assert_eq!(memory.available_view().slots, vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_cycles_through_scopes_are_collected() {
        let mut memory = Memory::new(8, true);
        let mut envs = Environments::new();
        let global = envs.global();
        let instance_env = envs.create(Scope::instance(), Some(global));
        let instance = memory.try_allocate(1).unwrap();
        memory
            .init(
                instance,
                HeapObject::new(ObjectData::Instance {
                    class: Reference::NULL,
                    env: instance_env,
                }),
            )
            .unwrap();
        // The instance refers to itself through its own scope
        envs.define_var(instance_env, "me", Value::Reference(instance))
            .unwrap();

        let report = collect(&mut memory, &mut envs, &RootSet::default());
        assert_eq!(report.freed_objects, 1);
        assert_eq!(report.freed_envs, 1);
        assert!(!envs.contains(instance_env));
        assert!(envs.contains(global));
    }

    #[test]
    fn test_calling_chain_is_rooted() {
        let mut memory = Memory::new(8, true);
        let mut envs = Environments::new();
        let global = envs.global();
        let caller = envs.create(Scope::Block, Some(global));
        let callee = envs.create(Scope::function(Some(caller)), Some(global));
        let held = native(&mut memory, Value::Null);
        envs.define_var(caller, "held", Value::Reference(held)).unwrap();

        let roots = RootSet {
            envs: vec![callee],
            values: Vec::new(),
        };
        let report = collect(&mut memory, &mut envs, &roots);
        assert_eq!(report.freed_objects, 0);
        assert!(envs.contains(caller));
    }
}
