//! The tern optimizing-compiler backend for ARM (AArch32).
//!
//! This crate lowers an already-optimized, already-register-allocated
//! control-flow-graph IR ([ir::Graph]) into A32 machine code plus the
//! metadata a garbage-collected runtime needs: safepoint stack maps
//! (via the `ternsmp` crate), pc-relative patch records for the linker,
//! and frame layout facts.
//!
//! The pipeline has three externally visible steps:
//!
//! 1. [codegen::build_locations] — walk the graph once, producing a
//!    [codegen::location::LocationSummary] per instruction that declares
//!    register/stack constraints but emits no code.
//! 2. Register allocation — performed by an external collaborator, which
//!    replaces every unallocated constraint with a concrete location and
//!    fills in per-instruction live-register masks. This crate never
//!    allocates registers itself.
//! 3. [codegen::compile] — walk the graph a second time, consuming the
//!    concrete locations and emitting machine code, out-of-line slow
//!    paths, and the final [codegen::CompiledMethod].

use std::error::Error;
use thiserror::Error as ThisError;

pub mod codegen;
pub mod config;
pub mod ir;
mod log;

/// A failure to compile a method.
///
/// Guest-program run-time faults (null dereference, division by zero, and so
/// on) are *not* compilation errors: they compile into slow paths that throw
/// at run time. A `CompilationError` means no code object is produced for the
/// method and the caller must fall back to a baseline path.
#[derive(ThisError, Debug)]
pub enum CompilationError {
    #[error("General error: {0}")]
    /// The input graph has a shape this backend does not support. Interesting
    /// to a compiler developer, but not a bug.
    General(String),
    #[error("Internal error: {0}")]
    /// Something went wrong that is probably a bug in the backend.
    InternalError(String),
    #[error("Limit exceeded: {0}")]
    /// An internal index or encoding range was exceeded (e.g. a branch target
    /// out of range, too many blocks).
    LimitExceeded(String),
    #[error("Resource exhausted: {0}")]
    /// An external resource ran out during compilation; the end user probably
    /// wants to know.
    ResourceExhausted(Box<dyn Error>),
}
