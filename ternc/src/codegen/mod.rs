//! The code generator.
//!
//! Two passes over the input graph. The first ([build_locations]) declares a
//! [location::LocationSummary] per instruction and emits nothing; the second
//! ([compile]) runs once the external register allocator has made every
//! location concrete, and produces the machine code and its metadata as a
//! [CompiledMethod]. Between the two passes this crate holds no hidden state:
//! everything the allocator and the emitter exchange travels through the
//! [LocationMap].

use crate::codegen::location::LocationSummary;
use crate::config::CodegenConfig;
use crate::ir::{Graph, InstIdx};
use crate::CompilationError;
use index_vec::IndexVec;

pub mod arm;
pub mod frame;
pub mod location;
pub mod utils;

/// The per-instruction location summaries for one method, keyed by
/// instruction index. Instructions that need no locations (constants folded
/// into their users, for example) have no entry.
#[derive(Debug, Default)]
pub struct LocationMap {
    summaries: IndexVec<InstIdx, Option<LocationSummary>>,
}

impl LocationMap {
    fn with_len(len: usize) -> Self {
        Self {
            summaries: vec![None; len].into(),
        }
    }

    pub fn get(&self, iidx: InstIdx) -> Option<&LocationSummary> {
        self.summaries.get(iidx).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, iidx: InstIdx) -> Option<&mut LocationSummary> {
        self.summaries.get_mut(iidx).and_then(|s| s.as_mut())
    }

    pub(crate) fn set(&mut self, iidx: InstIdx, summary: LocationSummary) {
        self.summaries[iidx] = Some(summary);
    }

    /// Iterate over instructions that have a summary.
    pub fn iter(&self) -> impl Iterator<Item = (InstIdx, &LocationSummary)> {
        self.summaries
            .iter_enumerated()
            .filter_map(|(iidx, s)| s.as_ref().map(|s| (iidx, s)))
    }
}

/// What a pc-relative literal sequence refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    /// A class, by type index.
    TypeIndex,
    /// An interned string, by string index.
    StringIndex,
}

/// The positions of a movw/movt/add-pc sequence that the linker must rewrite
/// once the referenced symbol's address is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcRelativePatch {
    pub movw_offset: u32,
    pub movt_offset: u32,
    pub add_pc_offset: u32,
    pub kind: PatchKind,
    pub index: u32,
}

/// The finished output for one method.
#[derive(Debug)]
pub struct CompiledMethod {
    /// Position-dependent machine code, little-endian A32.
    pub code: Vec<u8>,
    pub frame_size: u32,
    pub core_spill_mask: u32,
    pub fpu_spill_mask: u32,
    /// Literal sequences the linker must patch.
    pub patches: Vec<PcRelativePatch>,
    /// Serialized safepoint records (see the `ternsmp` crate).
    pub stack_maps: Vec<u8>,
    /// The assembly listing, for logging and tests.
    pub listing: String,
}

/// First pass: declare a location summary for every instruction. Never emits
/// code; the result is the register allocator's input.
pub fn build_locations(
    g: &Graph,
    config: &CodegenConfig,
) -> Result<LocationMap, CompilationError> {
    let mut locations = LocationMap::with_len(g.insts_len());
    arm::build_locations(g, config, &mut locations)?;
    Ok(locations)
}

/// Second pass: emit machine code from concrete locations.
pub fn compile(
    g: &Graph,
    locations: &mut LocationMap,
    config: &CodegenConfig,
) -> Result<CompiledMethod, CompilationError> {
    arm::compile(g, locations, config)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Test support: a deterministic location filler standing in for the
    //! external register allocator, and `fm`-based listing matching.

    use super::arm::{CoreReg, SReg};
    use super::location::{Constraint, Location};
    use super::LocationMap;
    use crate::ir::{Graph, InstIdx};
    use fm::FMatcher;

    /// Match a listing against an `fm` pattern, panicking with the full
    /// listing on mismatch.
    pub(crate) fn match_asm(listing: &str, pattern: &str) {
        match FMatcher::new(pattern).unwrap().matches(listing) {
            Ok(()) => (),
            Err(e) => panic!(
                "\n!!! Emitted code didn't match !!!\n\n{}\nFull asm:\n{}\n",
                e, listing
            ),
        }
    }

    /// A deliberately naive stand-in for the register allocator: every
    /// constraint gets the next register from a fixed callee-saved pool,
    /// inputs inherit the producing instruction's output location when it is
    /// a register (a fresh register otherwise, standing in for the move the
    /// real allocator would insert), and nothing is ever spilled. Fine for
    /// the small graphs unit tests build; not a register allocator.
    #[derive(Default)]
    struct TestPools {
        next_core: usize,
        next_pair: usize,
        next_s: u32,
    }

    impl TestPools {
        const CORE: [CoreReg; 5] = [
            CoreReg::R4,
            CoreReg::R5,
            CoreReg::R8,
            CoreReg::R10,
            CoreReg::R11,
        ];
        const PAIRS: [(CoreReg, CoreReg); 1] = [(CoreReg::R6, CoreReg::R7)];

        fn fresh(&mut self, fpu: bool, wide: bool) -> Location {
            if fpu {
                if wide {
                    self.next_s = (16 + self.next_s).next_multiple_of(2) - 16;
                    let lo = SReg::from_code(16 + self.next_s);
                    let hi = SReg::from_code(16 + self.next_s + 1);
                    self.next_s += 2;
                    Location::FpuRegisterPair(lo, hi)
                } else {
                    let s = SReg::from_code(16 + self.next_s);
                    self.next_s += 1;
                    Location::FpuRegister(s)
                }
            } else if wide {
                let (lo, hi) = Self::PAIRS[self.next_pair % Self::PAIRS.len()];
                self.next_pair += 1;
                Location::RegisterPair(lo, hi)
            } else {
                let r = Self::CORE[self.next_core % Self::CORE.len()];
                self.next_core += 1;
                Location::Register(r)
            }
        }

        fn fill(&mut self, loc: &mut Location, wide: bool) {
            if let Location::Unallocated(c) = *loc {
                let fpu = c == Constraint::RequiresFpuRegister;
                *loc = self.fresh(fpu, wide);
            }
        }
    }

    pub(crate) fn allocate_for_test(g: &Graph, locations: &mut LocationMap) {
        let mut pools = TestPools::default();
        for iidx in (0..g.insts_len()).map(InstIdx::from_usize) {
            let inst = g.inst(iidx);
            let operands = inst.kind.operands();
            let wide_out = inst.ty.is_wide();
            let Some(summary) = locations.get_mut(iidx) else {
                continue;
            };
            for t in summary.temps_mut() {
                pools.fill(t, false);
            }
            let mut out = summary.out();
            pools.fill(&mut out, wide_out);
            summary.replace_out(out);

            for at in 0..operands.len() {
                let summary = locations.get(iidx).unwrap();
                let Location::Unallocated(c) = summary.in_at(at) else {
                    continue;
                };
                let operand_ty = g.inst(operands[at]).ty;
                let producer_out = locations
                    .get(operands[at])
                    .map(|s| s.out())
                    .expect("operand has no location");
                let resolved = match (c, producer_out) {
                    (
                        _,
                        out @ (Location::Register(_)
                        | Location::RegisterPair(..)
                        | Location::FpuRegister(_)
                        | Location::FpuRegisterPair(..)),
                    ) => out,
                    (Constraint::Any, out) if out.is_concrete() => out,
                    // The real allocator would emit a load; pretend it did.
                    _ => pools.fresh(operand_ty.is_fp(), operand_ty.is_wide()),
                };
                let summary = locations.get_mut(iidx).unwrap();
                summary.set_in_at(at, resolved);
            }
        }
    }
}
