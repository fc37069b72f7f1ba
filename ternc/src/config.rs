//! Per-compilation configuration.
//!
//! One immutable [CodegenConfig] is threaded by reference through the whole
//! backend. There are deliberately no global feature flags: two methods can be
//! compiled concurrently with different configurations without sharing any
//! mutable state.

/// Which read-barrier scheme the target runtime's collector requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadBarrierKind {
    /// No read barriers (non-moving or stop-the-world collector).
    None,
    /// Baker-style barriers: a fast gray-check on the object's lock word with
    /// an out-of-line marking call on the slow path.
    Baker,
    /// Unconditionally call the generic read-barrier entry point after every
    /// guarded reference load. Slow, but collector-agnostic.
    Slow,
}

/// Fixed field offsets in the runtime's object model. Emitted field and array
/// access sequences use these verbatim; changing any of them invalidates all
/// previously compiled code.
#[derive(Debug, Clone, Copy)]
pub struct ObjectOffsets {
    /// Offset of the class pointer in every object header.
    pub class: i32,
    /// Offset of the lock word (which also carries the collector's
    /// read-barrier state bits) in every object header.
    pub lock_word: i32,
    /// Offset of the length field in array objects.
    pub array_length: i32,
    /// Offset of the first element of a word-sized array.
    pub array_data: i32,
    /// Offset of the superclass pointer in class objects.
    pub super_class: i32,
    /// Offset of the status word in class objects (class initialization
    /// state).
    pub class_status: i32,
    /// Status word value at or above which a class is visibly initialized.
    pub class_status_initialized: i32,
    /// Offset of the first embedded vtable entry in class objects.
    pub vtable: i32,
}

impl Default for ObjectOffsets {
    fn default() -> Self {
        Self {
            class: 0,
            lock_word: 4,
            array_length: 8,
            array_data: 12,
            super_class: 8,
            class_status: 112,
            class_status_initialized: 10,
            vtable: 176,
        }
    }
}

/// Fixed field offsets in the runtime's method structure.
#[derive(Debug, Clone, Copy)]
pub struct MethodOffsets {
    /// Offset of the resolved-methods table pointer in a method.
    pub dex_cache_methods: i32,
    /// Offset of a method's entry point for compiled code.
    pub entrypoint: i32,
    /// Offset of the resolved-types table pointer in a method.
    pub dex_cache_types: i32,
    /// Offset of the resolved-strings table pointer in a method.
    pub dex_cache_strings: i32,
}

impl Default for MethodOffsets {
    fn default() -> Self {
        Self {
            dex_cache_methods: 20,
            entrypoint: 32,
            dex_cache_types: 12,
            dex_cache_strings: 16,
        }
    }
}

/// Bit layout of the lock word's read-barrier state, shared with the runtime.
pub mod lock_word {
    /// Bit position of the low bit of the read-barrier state.
    pub const READ_BARRIER_STATE_SHIFT: u32 = 28;
    /// A lock word with this bit set marks the object gray.
    pub const GRAY_BIT: u32 = 1 << READ_BARRIER_STATE_SHIFT;
}

/// Offsets from the thread register into the runtime's per-thread structure.
#[derive(Debug, Clone, Copy)]
pub struct ThreadOffsets {
    /// 16-bit suspend-request flags, polled by suspend checks.
    pub suspend_flags: i32,
    /// Non-zero while the collector is in a marking phase; polled by GC-root
    /// read barriers.
    pub is_gc_marking: i32,
    /// The pending exception slot.
    pub exception: i32,
    /// The thread-local card-table base used by the write barrier.
    pub card_table: i32,
    /// Base of the table of quick runtime entry points; a specific entry
    /// point lives at `entrypoints + 4 * index`.
    pub entrypoints: i32,
    /// Base of the per-register read-barrier mark entry points; the entry
    /// point for core register `n` lives at `mark_entrypoints + 4 * n`.
    pub mark_entrypoints: i32,
}

impl Default for ThreadOffsets {
    fn default() -> Self {
        Self {
            suspend_flags: 0,
            is_gc_marking: 52,
            exception: 140,
            card_table: 136,
            entrypoints: 160,
            mark_entrypoints: 560,
        }
    }
}

/// Everything the backend needs to know about the target before compiling one
/// method. Construct once per compilation unit and share by reference.
#[derive(Debug, Clone)]
pub struct CodegenConfig {
    /// Does the CPU implement SDIV/UDIV? When false, non-constant integer
    /// division lowers to a runtime call.
    pub has_idiv: bool,
    /// The collector's read-barrier requirement.
    pub read_barrier: ReadBarrierKind,
    /// Compile null checks as implicit (rely on a fault handler, record a
    /// safepoint at the faulting load) rather than explicit compare-and-branch
    /// sequences.
    pub implicit_null_checks: bool,
    pub object: ObjectOffsets,
    pub method: MethodOffsets,
    pub thread: ThreadOffsets,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            has_idiv: true,
            read_barrier: ReadBarrierKind::Baker,
            implicit_null_checks: true,
            object: ObjectOffsets::default(),
            method: MethodOffsets::default(),
            thread: ThreadOffsets::default(),
        }
    }
}
