//! Sliding compaction
//!
//! Runs after a collection failed to produce a contiguous run large enough for
//! a request. Live objects slide toward the first usable slot in address order,
//! so multi-slot objects stay contiguous and keep their relative order. Every
//! reference the heap, the scope arena and the root registries hold is then
//! rewritten through the forwarding table, and the free list becomes a single
//! run covering the end of the heap.
//!
//! References held only in host locals across a compaction are stale afterwards.
//! Callers that need to keep one must root it first.

use rustc_hash::FxHashMap;

use super::heap::{FreeList, Slot};
use super::value::Reference;
use super::Memory;
use crate::environment::Environments;
use crate::interpreter::constants::FIRST_USABLE_SLOT;

/// Old header slot to new header slot, for every object that moved
#[derive(Debug, Clone, Default)]
pub struct Forwarding {
    moved: FxHashMap<usize, usize>,
}

impl Forwarding {
    /// New location of `r`; references to objects that did not move are unchanged
    pub fn resolve(&self, r: Reference) -> Reference {
        self.moved
            .get(&r.slot())
            .map_or(r, |&slot| Reference::new(slot))
    }

    /// Number of objects that moved
    pub fn len(&self) -> usize {
        self.moved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moved.is_empty()
    }
}

/// Slide live objects down and rewrite every reference to them
pub fn compact(memory: &mut Memory, envs: &mut Environments) -> Forwarding {
    let forwarding = slide(memory);
    if forwarding.is_empty() {
        return forwarding;
    }

    let resolve = |r: Reference| forwarding.resolve(r);

    for slot in memory.heap.slots_mut() {
        match slot {
            Slot::Data(value) => value.map_reference(&resolve),
            Slot::Object(object) => object.data.map_references(&resolve),
            Slot::Empty => {}
        }
    }
    for env in envs.iter_mut() {
        env.map_references(&resolve);
    }
    for parked in &mut envs.suspended {
        parked.map_references(&resolve);
    }
    for r in memory.managed.iter_mut().chain(memory.permanent.iter_mut()) {
        *r = resolve(*r);
    }
    for value in &mut memory.guarded {
        value.map_reference(&resolve);
    }

    forwarding
}

fn slide(memory: &mut Memory) -> Forwarding {
    let mut forwarding = Forwarding::default();
    let slots = memory.heap.slots_mut();
    let end = slots.len();

    let mut cursor = FIRST_USABLE_SLOT;
    let mut index = FIRST_USABLE_SLOT;
    while index < end {
        let span = match &slots[index] {
            Slot::Object(object) => Some(object.span().min(end - index)),
            Slot::Data(_) | Slot::Empty => None,
        };
        let Some(span) = span else {
            // Data slots without a header are garbage
            slots[index] = Slot::Empty;
            index += 1;
            continue;
        };

        if cursor != index {
            // Everything in cursor..index is empty, so ascending swaps never clobber
            for offset in 0..span {
                slots.swap(cursor + offset, index + offset);
            }
            forwarding.moved.insert(index, cursor);
        }
        cursor += span;
        index += span;
    }

    memory
        .heap
        .replace_free_list(FreeList::from_ordered(cursor..end));
    forwarding
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::heap::{HeapObject, ObjectData};
    use crate::memory::value::Value;
    use pretty_assertions::assert_eq;

    fn boxed(memory: &mut Memory, payload: Value) -> Reference {
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
    fn test_compaction_coalesces_free_space() {
        let mut memory = Memory::new(8, true);
        let mut envs = Environments::new();
        let refs: Vec<_> = (0..5)
            .map(|i| boxed(&mut memory, Value::Int(i)))
            .collect();
        memory.free(refs[1], 1).unwrap();
        memory.free(refs[3], 1).unwrap();
        assert!(memory.try_allocate(4).is_none());

        let global = envs.global();
        envs.define_var(global, "last", Value::Reference(refs[4]))
            .unwrap();
        let forwarding = compact(&mut memory, &mut envs);

        assert_eq!(forwarding.len(), 2);
        assert_eq!(memory.available_view().slots, vec![4, 5, 6, 7]);
        let last = envs.get(memory.heap(), global, "last").unwrap();
        assert_eq!(last, Value::Reference(Reference::new(3)));
        match &memory.get(Reference::new(3)).unwrap().data {
            ObjectData::Native { payload, .. } => assert_eq!(payload, &Value::Int(4)),
            other => panic!("unexpected object {:?}", other),
        }
        assert!(memory.try_allocate(4).is_some());
        memory.verify_free_list().unwrap();
    }

    #[test]
    fn test_arrays_move_as_a_unit() {
        let mut memory = Memory::new(10, true);
        let mut envs = Environments::new();
        let gap = boxed(&mut memory, Value::Null);
        let target = boxed(&mut memory, Value::Int(7));
        let array = memory.try_allocate(3).unwrap();
        memory
            .write_element(array, 0, Value::Reference(target))
            .unwrap();
        memory.write_element(array, 1, Value::Int(8)).unwrap();
        memory.manage(array);
        memory.free(gap, 1).unwrap();

        compact(&mut memory, &mut envs);

        let moved_array = memory.managed()[0];
        assert_eq!(moved_array, Reference::new(2));
        assert_eq!(memory.array_len(moved_array).unwrap(), 2);
        assert_eq!(
            memory.read_element(moved_array, 0).unwrap(),
            Value::Reference(Reference::new(1))
        );
        assert_eq!(memory.read_element(moved_array, 1).unwrap(), Value::Int(8));
        assert_eq!(memory.available(), 5);
    }
}
