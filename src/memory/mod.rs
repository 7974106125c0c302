//! Memory model for the scripting runtime
//!
//! This module provides the core memory abstractions:
//! - [`value`]: Runtime value representation (primitives and heap references)
//! - [`heap`]: The fixed-size slot heap, object headers and the free list
//! - [`gc`]: Mark-sweep collector over the heap and the scope arena
//! - [`compact`]: Sliding compaction used when collection alone cannot satisfy a request
//! - [`stack`]: Bounded call stack
//!
//! [`Memory`] ties the heap to the root registries the collector consults on top
//! of the scope graph:
//! - *managed* references: objects not yet reachable through any scope
//! - *permanent* references: objects that are never collected
//! - *guarded* values: references held by an allocation entry point while the
//!   allocation runs
//!
//! # Contract Checking
//!
//! With contract checking on, [`Memory::free`] refuses runs that do not match an
//! object header of exactly that span, and [`Memory::verify_free_list`] audits
//! the free list after every collection.

pub mod compact;
pub mod gc;
pub mod heap;
pub mod stack;
pub mod value;

use std::fmt;

use crate::interpreter::constants::FIRST_USABLE_SLOT;
use crate::interpreter::errors::RuntimeError;
use heap::{Heap, HeapObject, ObjectData, Slot};
use value::{Reference, Value};

/// Heap plus root registries
#[derive(Debug, Clone)]
pub struct Memory {
    pub(crate) heap: Heap,
    pub(crate) managed: Vec<Reference>,
    pub(crate) permanent: Vec<Reference>,
    pub(crate) guarded: Vec<Value>,
    check_contracts: bool,
}

impl Memory {
    pub fn new(size: usize, check_contracts: bool) -> Self {
        Memory {
            heap: Heap::new(size),
            managed: Vec::new(),
            permanent: Vec::new(),
            guarded: Vec::new(),
            check_contracts,
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn capacity(&self) -> usize {
        self.heap.capacity()
    }

    /// Number of slots on the free list
    pub fn available(&self) -> usize {
        self.heap.available()
    }

    pub fn check_contracts(&self) -> bool {
        self.check_contracts
    }

    /// Reserve `size` contiguous slots without collecting
    pub fn try_allocate(&mut self, size: usize) -> Option<Reference> {
        self.heap.reserve(size)
    }

    /// Write the header of a freshly reserved block.
    ///
    /// The header must span exactly the reserved slots.
    pub fn init(&mut self, r: Reference, object: HeapObject) -> Result<(), RuntimeError> {
        let slot = self.heap.object_mut(r)?;
        if slot.span() != object.span() {
            return Err(RuntimeError::InvalidFree {
                reference: r.slot(),
                length: object.span(),
                message: format!("reserved block spans {} slots", slot.span()),
            });
        }
        *slot = object;
        Ok(())
    }

    /// Return `length` slots starting at `r` to the head of the free list
    pub fn free(&mut self, r: Reference, length: usize) -> Result<(), RuntimeError> {
        if r.is_null() || length == 0 || r.slot() + length > self.heap.capacity() {
            return Err(RuntimeError::InvalidFree {
                reference: r.slot(),
                length,
                message: "run is outside the heap".to_string(),
            });
        }
        if self.check_contracts {
            let span = self.heap.object(r).map(HeapObject::span).map_err(|_| {
                RuntimeError::InvalidFree {
                    reference: r.slot(),
                    length,
                    message: "no object header at this slot".to_string(),
                }
            })?;
            if span != length {
                return Err(RuntimeError::InvalidFree {
                    reference: r.slot(),
                    length,
                    message: format!("object spans {} slots", span),
                });
            }
        }

        self.heap.release(r, length);
        self.managed.retain(|&m| m != r);
        self.permanent.retain(|&p| p != r);
        Ok(())
    }

    pub fn get(&self, r: Reference) -> Result<&HeapObject, RuntimeError> {
        self.heap.object(r)
    }

    pub fn get_mut(&mut self, r: Reference) -> Result<&mut HeapObject, RuntimeError> {
        self.heap.object_mut(r)
    }

    /// Replace the data of the object at `r`. The object may not change size.
    pub fn set(&mut self, r: Reference, data: ObjectData) -> Result<(), RuntimeError> {
        let object = self.heap.object_mut(r)?;
        let replacement = HeapObject::new(data);
        if replacement.span() != object.span() {
            return Err(RuntimeError::TypeError {
                expected: format!("object spanning {} slots", object.span()),
                got: format!("{} spanning {} slots", replacement.kind_name(), replacement.span()),
            });
        }
        object.data = replacement.data;
        Ok(())
    }

    /// Number of elements of the array at `r`
    pub fn array_len(&self, r: Reference) -> Result<usize, RuntimeError> {
        match &self.heap.object(r)?.data {
            ObjectData::Array { len } => Ok(*len),
            other => Err(RuntimeError::TypeError {
                expected: "Array".to_string(),
                got: other.kind_name().to_string(),
            }),
        }
    }

    fn element_slot(&self, r: Reference, index: i64) -> Result<Reference, RuntimeError> {
        let len = self.array_len(r)?;
        match usize::try_from(index) {
            Ok(i) if i < len => Ok(r.offset(i + 1)),
            _ => Err(RuntimeError::IndexOutOfBounds { index, len }),
        }
    }

    /// Read an array element stored in the slot after the header
    pub fn read_element(&self, r: Reference, index: i64) -> Result<Value, RuntimeError> {
        let slot = self.element_slot(r, index)?;
        self.heap.read(slot).cloned()
    }

    pub fn write_element(
        &mut self,
        r: Reference,
        index: i64,
        value: Value,
    ) -> Result<(), RuntimeError> {
        let slot = self.element_slot(r, index)?;
        self.heap.write(slot, value)
    }

    /// Keep `r` alive until [`Memory::unmanage`] is called
    pub fn manage(&mut self, r: Reference) {
        if !r.is_null() && !self.managed.contains(&r) {
            self.managed.push(r);
        }
    }

    pub fn unmanage(&mut self, r: Reference) {
        self.managed.retain(|&m| m != r);
    }

    /// Keep `r` alive for the rest of the session
    pub fn make_permanent(&mut self, r: Reference) {
        if !r.is_null() && !self.permanent.contains(&r) {
            self.permanent.push(r);
        }
    }

    pub fn managed(&self) -> &[Reference] {
        &self.managed
    }

    pub fn permanent(&self) -> &[Reference] {
        &self.permanent
    }

    /// Root `values` until the matching [`Memory::release_guard`].
    /// Returns the mark to release with.
    pub(crate) fn guard(&mut self, values: impl IntoIterator<Item = Value>) -> usize {
        let mark = self.guarded.len();
        self.guarded.extend(values);
        mark
    }

    /// Drop guards pushed since `mark`, returning the (possibly relocated) values
    pub(crate) fn release_guard(&mut self, mark: usize) -> Vec<Value> {
        self.guarded.split_off(mark.min(self.guarded.len()))
    }

    /// Render every non-empty slot, one per line
    pub fn memory_view(&self) -> String {
        let mut out = String::new();
        for (index, slot) in self.heap.slots().iter().enumerate().skip(FIRST_USABLE_SLOT) {
            match slot {
                Slot::Empty => {}
                Slot::Object(object) => {
                    out.push_str(&format!("{}  {}\n", Reference::new(index), describe(object)));
                }
                Slot::Data(value) => {
                    out.push_str(&format!("{}    = {}\n", Reference::new(index), value));
                }
            }
        }
        out
    }

    /// Snapshot of the free list in free-list order
    pub fn available_view(&self) -> AvailableView {
        let slots: Vec<usize> = self.heap.free_list().iter().collect();
        AvailableView {
            count: slots.len(),
            slots,
        }
    }

    /// Audit the free list against the heap.
    ///
    /// Every listed slot must be in range, listed once and empty, and every
    /// empty slot must be listed. Array data slots are never empty while their
    /// header is live, so they cannot appear.
    pub fn verify_free_list(&self) -> Result<(), RuntimeError> {
        let capacity = self.heap.capacity();
        let mut seen = vec![false; capacity];

        for slot in self.heap.free_list().iter() {
            if slot < FIRST_USABLE_SLOT || slot >= capacity {
                return Err(corrupted(format!("slot {} is outside the heap", slot)));
            }
            if seen[slot] {
                return Err(corrupted(format!("slot {} is listed twice", slot)));
            }
            seen[slot] = true;
            match self.heap.slot(slot) {
                Some(Slot::Empty) => {}
                Some(Slot::Data(_)) => {
                    return Err(corrupted(format!("array data slot {} is listed as free", slot)))
                }
                _ => return Err(corrupted(format!("live slot {} is listed as free", slot))),
            }
        }

        let leaked = self
            .heap
            .slots()
            .iter()
            .enumerate()
            .skip(FIRST_USABLE_SLOT)
            .filter(|(index, slot)| matches!(slot, Slot::Empty) && !seen[*index])
            .count();
        if leaked > 0 {
            return Err(corrupted(format!("{} empty slots are not on the free list", leaked)));
        }
        Ok(())
    }
}

impl Default for Memory {
    fn default() -> Self {
        Memory::new(crate::interpreter::constants::DEFAULT_HEAP_SIZE, true)
    }
}

fn corrupted(message: String) -> RuntimeError {
    RuntimeError::FreeListCorrupted { message }
}

fn describe(object: &HeapObject) -> String {
    match &object.data {
        ObjectData::Array { len } => format!("Array[{}]", len),
        ObjectData::Instance { class, env } => format!("Instance of {} (scope {})", class, env),
        ObjectData::Class(class) => format!("Class {}", class.name),
        ObjectData::Module { name, .. } => format!("Module {}", name),
        ObjectData::Callable(callable) => {
            format!("{} {}({})", object.kind_name(), callable.name, callable.params.join(", "))
        }
        ObjectData::Native { type_name, payload } => format!("{} {}", type_name, payload),
    }
}

/// Free-slot count and addresses, as returned by [`Memory::available_view`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableView {
    pub count: usize,
    pub slots: Vec<usize>,
}

impl fmt::Display for AvailableView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Available slots: {}", self.count)?;
        let slots: Vec<String> = self.slots.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", slots.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_free_checks_span() {
        let mut memory = Memory::new(8, true);
        let array = memory.try_allocate(3).unwrap();
        assert!(matches!(
            memory.free(array, 1),
            Err(RuntimeError::InvalidFree { .. })
        ));
        assert!(matches!(
            memory.free(array.offset(1), 1),
            Err(RuntimeError::InvalidFree { .. })
        ));
        memory.free(array, 3).unwrap();
        assert_eq!(memory.available(), 7);
        memory.verify_free_list().unwrap();
    }

    #[test]
    fn test_array_elements() {
        let mut memory = Memory::new(8, true);
        let array = memory.try_allocate(3).unwrap();
        memory.write_element(array, 1, Value::Int(5)).unwrap();
        assert_eq!(memory.read_element(array, 0).unwrap(), Value::Null);
        assert_eq!(memory.read_element(array, 1).unwrap(), Value::Int(5));
        assert_eq!(
            memory.read_element(array, 2),
            Err(RuntimeError::IndexOutOfBounds { index: 2, len: 2 })
        );
        assert_eq!(
            memory.read_element(array, -1),
            Err(RuntimeError::IndexOutOfBounds { index: -1, len: 2 })
        );
    }

    #[test]
    fn test_set_keeps_span() {
        let mut memory = Memory::new(8, true);
        let r = memory.try_allocate(1).unwrap();
        memory
            .set(
                r,
                ObjectData::Native {
                    type_name: "Point".to_string(),
                    payload: Value::Int(1),
                },
            )
            .unwrap();
        assert_eq!(memory.get(r).unwrap().kind_name(), "NativeObject");
        assert!(memory.set(r, ObjectData::Array { len: 2 }).is_err());
    }

    #[test]
    fn test_available_view_follows_free_list_order() {
        let mut memory = Memory::new(6, true);
        let refs: Vec<_> = (0..3).map(|_| memory.try_allocate(1).unwrap()).collect();
        memory.free(refs[0], 1).unwrap();
        let view = memory.available_view();
        assert_eq!(view.count, 3);
        assert_eq!(view.slots, vec![1, 4, 5]);
        assert_eq!(view.to_string(), "Available slots: 3\n[1, 4, 5]");
    }

    #[test]
    fn test_memory_view_lists_headers_and_elements() {
        let mut memory = Memory::new(4, true);
        let array = memory.try_allocate(2).unwrap();
        memory.write_element(array, 0, Value::Int(9)).unwrap();
        assert_eq!(memory.memory_view(), "@0001  Array[1]\n@0002    = 9\n");
    }

    #[test]
    fn test_verify_detects_live_slot_on_free_list() {
        let mut memory = Memory::new(4, true);
        let r = memory.try_allocate(1).unwrap();
        memory
            .heap
            .replace_free_list(heap::FreeList::from_ordered([r.slot(), 2, 3]));
        assert!(matches!(
            memory.verify_free_list(),
            Err(RuntimeError::FreeListCorrupted { .. })
        ));
    }
}
