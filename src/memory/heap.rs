//! Slot heap and free list
//!
//! The heap is a fixed-size array of [`Slot`]s. Slot 0 is reserved for null and
//! never handed out. Every object starts with a header slot ([`Slot::Object`]);
//! arrays are followed by one [`Slot::Data`] per element, stored unboxed.
//!
//! # Free List
//!
//! Available slot indices are kept in a [`FreeList`]:
//! - single-slot requests pop the head in O(1)
//! - multi-slot requests take the first run of consecutive addresses (first fit)
//! - freed runs are pushed at the head without sorting or coalescing
//!
//! Fragmentation introduced by manual frees is only repaired when the collector
//! rebuilds the list in address order.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use super::value::{Reference, Value};
use crate::ast::NodeRef;
use crate::environment::EnvId;
use crate::interpreter::engine::Interpreter;
use crate::interpreter::errors::RuntimeError;

/// Host function backing a native callable
pub type NativeFn =
    Arc<dyn Fn(&mut Interpreter, EnvId, &[Value]) -> Result<Value, RuntimeError> + Send + Sync>;

/// Content of one heap cell
#[derive(Debug, Clone, Default)]
pub enum Slot {
    #[default]
    Empty,
    Data(Value), // Array element storage
    Object(HeapObject),
}

/// A heap object header: type-specific data plus the collector's mark bit
#[derive(Debug, Clone)]
pub struct HeapObject {
    pub data: ObjectData,
    pub(crate) marked: bool,
}

impl HeapObject {
    pub fn new(data: ObjectData) -> Self {
        HeapObject {
            data,
            marked: false,
        }
    }

    /// Number of slots occupied by this object, header included
    pub fn span(&self) -> usize {
        match &self.data {
            ObjectData::Array { len } => len + 1,
            _ => 1,
        }
    }

    pub fn is_marked(&self) -> bool {
        self.marked
    }

    pub fn kind_name(&self) -> &'static str {
        self.data.kind_name()
    }
}

/// Type-specific part of a heap object
#[derive(Debug, Clone)]
pub enum ObjectData {
    /// Elements live in the `len` slots following the header
    Array { len: usize },
    Instance { class: Reference, env: EnvId },
    Class(ClassData),
    Module { name: String, env: EnvId },
    Callable(Callable),
    /// Host-side object such as a raised error
    Native { type_name: String, payload: Value },
}

impl ObjectData {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ObjectData::Array { .. } => "Array",
            ObjectData::Instance { .. } => "Instance",
            ObjectData::Class(_) => "Class",
            ObjectData::Module { .. } => "Module",
            ObjectData::Callable(c) => match c.kind {
                CallableKind::Function => "Function",
                CallableKind::Method => "Method",
                CallableKind::Native => "Native",
            },
            ObjectData::Native { .. } => "NativeObject",
        }
    }

    /// Visit every reference held directly by this header
    pub(crate) fn references(&self, mut visit: impl FnMut(Reference)) {
        match self {
            ObjectData::Instance { class, .. } => visit(*class),
            ObjectData::Class(class) => {
                if let Some(parent) = class.superclass {
                    visit(parent);
                }
                class.attributes.iter().copied().for_each(visit);
            }
            ObjectData::Callable(callable) => {
                if let Some(this) = callable.this {
                    visit(this);
                }
            }
            ObjectData::Native { payload, .. } => {
                if let Some(r) = payload.as_reference() {
                    visit(r);
                }
            }
            ObjectData::Array { .. } | ObjectData::Module { .. } => {}
        }
    }

    /// Environment owned by this header, if any
    pub(crate) fn environment(&self) -> Option<EnvId> {
        match self {
            ObjectData::Instance { env, .. } | ObjectData::Module { env, .. } => Some(*env),
            ObjectData::Callable(callable) => callable.closure,
            _ => None,
        }
    }

    pub(crate) fn map_references(&mut self, f: &impl Fn(Reference) -> Reference) {
        match self {
            ObjectData::Instance { class, .. } => *class = f(*class),
            ObjectData::Class(class) => {
                class.superclass = class.superclass.map(f);
                for attr in &mut class.attributes {
                    *attr = f(*attr);
                }
            }
            ObjectData::Callable(callable) => callable.this = callable.this.map(f),
            ObjectData::Native { payload, .. } => payload.map_reference(f),
            ObjectData::Array { .. } | ObjectData::Module { .. } => {}
        }
    }
}

/// Class header: methods and statics are reachable through `attributes`
#[derive(Debug, Clone)]
pub struct ClassData {
    pub name: String,
    pub superclass: Option<Reference>,
    pub attributes: Vec<Reference>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallableKind {
    Function,
    Method,
    Native,
}

/// A function, bound method or native function
#[derive(Debug, Clone)]
pub struct Callable {
    pub name: String,
    pub kind: CallableKind,
    pub params: Vec<String>,
    pub body: CallableBody,
    /// Definition-time environment (outer scope of every activation)
    pub closure: Option<EnvId>,
    /// Receiver for methods
    pub this: Option<Reference>,
}

#[derive(Clone)]
pub enum CallableBody {
    Script(NodeRef),
    Native(NativeFn),
}

impl fmt::Debug for CallableBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallableBody::Script(node) => f.debug_tuple("Script").field(node).finish(),
            CallableBody::Native(_) => f.write_str("Native(<fn>)"),
        }
    }
}

/// Available slot indices, head first
#[derive(Debug, Clone, Default)]
pub struct FreeList {
    slots: VecDeque<usize>,
}

impl FreeList {
    pub fn new() -> Self {
        FreeList {
            slots: VecDeque::new(),
        }
    }

    /// Build a list from indices already in the desired order
    pub(crate) fn from_ordered(slots: impl IntoIterator<Item = usize>) -> Self {
        FreeList {
            slots: slots.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots.iter().copied()
    }

    pub fn contains(&self, slot: usize) -> bool {
        self.slots.contains(&slot)
    }

    /// Remove the first run of `n` nodes whose addresses are consecutive.
    /// Returns the start address of the run.
    pub fn take_run(&mut self, n: usize) -> Option<usize> {
        if n == 0 {
            return None;
        }
        if n == 1 {
            return self.slots.pop_front();
        }

        let mut run_start = 0;
        let mut run_len = 0;
        for i in 0..self.slots.len() {
            if run_len > 0 && self.slots[i] == self.slots[i - 1] + 1 {
                run_len += 1;
            } else {
                run_start = i;
                run_len = 1;
            }
            if run_len == n {
                let address = self.slots[run_start];
                self.slots.drain(run_start..run_start + n);
                return Some(address);
            }
        }
        None
    }

    /// Prepend `len` slots starting at `start`, keeping them in ascending order
    pub fn push_run(&mut self, start: usize, len: usize) {
        for slot in (start..start + len).rev() {
            self.slots.push_front(slot);
        }
    }
}

/// The fixed-size slot heap
#[derive(Debug, Clone)]
pub struct Heap {
    slots: Vec<Slot>,
    free: FreeList,
}

impl Heap {
    /// Create a heap of `size` slots (slot 0 included)
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Heap {
            slots: vec![Slot::Empty; size],
            free: FreeList::from_ordered(1..size),
        }
    }

    /// Total number of slots, including the null slot
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots on the free list
    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn free_list(&self) -> &FreeList {
        &self.free
    }

    pub(crate) fn replace_free_list(&mut self, free: FreeList) {
        self.free = free;
    }

    /// Reserve `size` contiguous slots without collecting.
    ///
    /// The block is initialised as a null-filled array so that it is never
    /// mistaken for free space before the caller writes the real header.
    pub fn reserve(&mut self, size: usize) -> Option<Reference> {
        let start = self.free.take_run(size)?;
        self.slots[start] = Slot::Object(HeapObject::new(ObjectData::Array { len: size - 1 }));
        for slot in &mut self.slots[start + 1..start + size] {
            *slot = Slot::Data(Value::Null);
        }
        Some(Reference(start))
    }

    /// Clear `len` slots starting at `r` and push them at the head of the free list
    pub(crate) fn release(&mut self, r: Reference, len: usize) {
        for slot in &mut self.slots[r.0..r.0 + len] {
            *slot = Slot::Empty;
        }
        self.free.push_run(r.0, len);
    }

    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    pub(crate) fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [Slot] {
        &mut self.slots
    }

    /// Get the object header at `r`
    pub fn object(&self, r: Reference) -> Result<&HeapObject, RuntimeError> {
        match self.slots.get(r.0) {
            Some(Slot::Object(obj)) if !r.is_null() => Ok(obj),
            _ => Err(RuntimeError::InvalidReference { reference: r.0 }),
        }
    }

    /// Get a mutable object header
    pub fn object_mut(&mut self, r: Reference) -> Result<&mut HeapObject, RuntimeError> {
        match self.slots.get_mut(r.0) {
            Some(Slot::Object(obj)) if !r.is_null() => Ok(obj),
            _ => Err(RuntimeError::InvalidReference { reference: r.0 }),
        }
    }

    /// Read a raw data slot
    pub fn read(&self, r: Reference) -> Result<&Value, RuntimeError> {
        match self.slots.get(r.0) {
            Some(Slot::Data(value)) => Ok(value),
            _ => Err(RuntimeError::InvalidReference { reference: r.0 }),
        }
    }

    /// Write a raw data slot
    pub fn write(&mut self, r: Reference, value: Value) -> Result<(), RuntimeError> {
        match self.slots.get_mut(r.0) {
            Some(Slot::Data(old)) => {
                *old = value;
                Ok(())
            }
            _ => Err(RuntimeError::InvalidReference { reference: r.0 }),
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(crate::interpreter::constants::DEFAULT_HEAP_SIZE)
    }
}
