// Constants for the scripting runtime

/// Default heap size in slots, the null slot included
pub const DEFAULT_HEAP_SIZE: usize = 65_536;

/// Default maximum call depth
pub const DEFAULT_STACK_LIMIT: usize = 1000;

/// Slot 0 is null and never allocated
pub const FIRST_USABLE_SLOT: usize = 1;
