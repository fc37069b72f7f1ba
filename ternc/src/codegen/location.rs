//! Where values live: the location model.
//!
//! A [Location] describes the storage assigned to one value: a core register,
//! an aligned register pair, a floating-point register or pair, a stack slot,
//! a constant, or (before register allocation has run) an unallocated
//! constraint. A [LocationSummary] collects the locations of one
//! instruction's inputs, temporaries and output; the location-builder pass
//! creates summaries full of constraints, the external register allocator
//! rewrites them to concrete locations, and the emitter consumes the result.

use crate::codegen::arm::{CoreReg, SReg};
use crate::ir::{ConstIdx, Ty};
use smallvec::SmallVec;
use static_assertions::const_assert;
use vob::Vob;

// Locations are copied around freely; keep them word-cheap.
const_assert!(std::mem::size_of::<Location>() <= 12);

/// A constraint on an as-yet-unallocated location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    /// Any storage will do, including a stack slot.
    Any,
    RequiresRegister,
    RequiresFpuRegister,
}

/// The storage assigned to one value.
///
/// A register pair's two halves are always named together and their order
/// never changes for the life of the value; `low` must sit at an even
/// register index with `high` immediately after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Invalid,
    Unallocated(Constraint),
    Constant(ConstIdx),
    Register(CoreReg),
    RegisterPair(CoreReg, CoreReg),
    FpuRegister(SReg),
    FpuRegisterPair(SReg, SReg),
    /// A 32-bit slot at this byte offset from the stack pointer.
    StackSlot(i32),
    /// A 64-bit slot; the offset names the low word.
    DoubleStackSlot(i32),
}

impl Location {
    pub fn is_valid(&self) -> bool {
        !matches!(self, Location::Invalid)
    }

    /// Is this location usable by the emitter (allocated, or a constant)?
    pub fn is_concrete(&self) -> bool {
        !matches!(self, Location::Invalid | Location::Unallocated(_))
    }

    pub fn is_register(&self) -> bool {
        matches!(self, Location::Register(_))
    }

    pub fn is_register_pair(&self) -> bool {
        matches!(self, Location::RegisterPair(..))
    }

    pub fn is_fpu_register(&self) -> bool {
        matches!(self, Location::FpuRegister(_))
    }

    pub fn is_fpu_register_pair(&self) -> bool {
        matches!(self, Location::FpuRegisterPair(..))
    }

    pub fn is_stack_slot(&self) -> bool {
        matches!(self, Location::StackSlot(_))
    }

    pub fn is_double_stack_slot(&self) -> bool {
        matches!(self, Location::DoubleStackSlot(_))
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Location::Constant(_))
    }

    /// Does this location occupy two words?
    pub fn is_wide(&self) -> bool {
        matches!(
            self,
            Location::RegisterPair(..)
                | Location::FpuRegisterPair(..)
                | Location::DoubleStackSlot(_)
        )
    }

    pub fn reg(&self) -> CoreReg {
        match self {
            Location::Register(r) => *r,
            _ => panic!("not a core register: {self:?}"),
        }
    }

    pub fn sreg(&self) -> SReg {
        match self {
            Location::FpuRegister(s) => *s,
            _ => panic!("not an fpu register: {self:?}"),
        }
    }

    pub fn pair_low(&self) -> CoreReg {
        match self {
            Location::RegisterPair(lo, _) => *lo,
            _ => panic!("not a register pair: {self:?}"),
        }
    }

    pub fn pair_high(&self) -> CoreReg {
        match self {
            Location::RegisterPair(_, hi) => *hi,
            _ => panic!("not a register pair: {self:?}"),
        }
    }

    pub fn fpu_pair_low(&self) -> SReg {
        match self {
            Location::FpuRegisterPair(lo, _) => *lo,
            _ => panic!("not an fpu register pair: {self:?}"),
        }
    }

    pub fn fpu_pair_high(&self) -> SReg {
        match self {
            Location::FpuRegisterPair(_, hi) => *hi,
            _ => panic!("not an fpu register pair: {self:?}"),
        }
    }

    pub fn stack_offset(&self) -> i32 {
        match self {
            Location::StackSlot(off) | Location::DoubleStackSlot(off) => *off,
            _ => panic!("not a stack location: {self:?}"),
        }
    }

    /// Offset of the high word of a double stack slot.
    pub fn high_stack_offset(&self) -> i32 {
        match self {
            Location::DoubleStackSlot(off) => off + 4,
            _ => panic!("not a double stack slot: {self:?}"),
        }
    }

    /// The 32-bit sub-location holding the low/high word of a wide location.
    pub fn split_low(&self) -> Location {
        match self {
            Location::RegisterPair(lo, _) => Location::Register(*lo),
            Location::FpuRegisterPair(lo, _) => Location::FpuRegister(*lo),
            Location::DoubleStackSlot(off) => Location::StackSlot(*off),
            _ => panic!("not a wide location: {self:?}"),
        }
    }

    pub fn split_high(&self) -> Location {
        match self {
            Location::RegisterPair(_, hi) => Location::Register(*hi),
            Location::FpuRegisterPair(_, hi) => Location::FpuRegister(*hi),
            Location::DoubleStackSlot(off) => Location::StackSlot(*off + 4),
            _ => panic!("not a wide location: {self:?}"),
        }
    }

    /// Do two locations denote (partially) the same storage? Pairs overlap
    /// their halves and neighbouring stack slots overlap where their byte
    /// ranges intersect; constants never overlap anything.
    pub fn overlaps(&self, other: &Location) -> bool {
        let core_regs = |l: &Location| -> SmallVec<[CoreReg; 2]> {
            match l {
                Location::Register(r) => SmallVec::from_slice(&[*r]),
                Location::RegisterPair(lo, hi) => SmallVec::from_slice(&[*lo, *hi]),
                _ => SmallVec::new(),
            }
        };
        let fpu_regs = |l: &Location| -> SmallVec<[SReg; 2]> {
            match l {
                Location::FpuRegister(s) => SmallVec::from_slice(&[*s]),
                Location::FpuRegisterPair(lo, hi) => SmallVec::from_slice(&[*lo, *hi]),
                _ => SmallVec::new(),
            }
        };
        let stack_range = |l: &Location| -> Option<(i32, i32)> {
            match l {
                Location::StackSlot(off) => Some((*off, *off + 4)),
                Location::DoubleStackSlot(off) => Some((*off, *off + 8)),
                _ => None,
            }
        };

        let a = core_regs(self);
        if !a.is_empty() && core_regs(other).iter().any(|r| a.contains(r)) {
            return true;
        }
        let a = fpu_regs(self);
        if !a.is_empty() && fpu_regs(other).iter().any(|s| a.contains(s)) {
            return true;
        }
        if let (Some((s1, e1)), Some((s2, e2))) = (stack_range(self), stack_range(other)) {
            return s1 < e2 && s2 < e1;
        }
        false
    }
}

/// A set of core and floating-point registers, as bit masks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterSet {
    core: u32,
    fpu: u32,
}

impl RegisterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_masks(core: u32, fpu: u32) -> Self {
        Self { core, fpu }
    }

    pub fn add(&mut self, loc: Location) {
        match loc {
            Location::Register(r) => self.core |= 1 << r.code(),
            Location::RegisterPair(lo, hi) => {
                self.core |= (1 << lo.code()) | (1 << hi.code());
            }
            Location::FpuRegister(s) => self.fpu |= 1 << s.code(),
            Location::FpuRegisterPair(lo, hi) => {
                self.fpu |= (1 << lo.code()) | (1 << hi.code());
            }
            _ => panic!("not a register location: {loc:?}"),
        }
    }

    pub fn contains_core(&self, r: CoreReg) -> bool {
        self.core & (1 << r.code()) != 0
    }

    pub fn contains_fpu(&self, s: SReg) -> bool {
        self.fpu & (1 << s.code()) != 0
    }

    pub fn core_mask(&self) -> u32 {
        self.core
    }

    pub fn fpu_mask(&self) -> u32 {
        self.fpu
    }

    pub fn is_empty(&self) -> bool {
        self.core == 0 && self.fpu == 0
    }
}

/// Does an instruction call into the runtime, and if so on which path?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    NoCall,
    CallOnSlowPath,
    CallOnMainPath,
}

/// May the output be assigned the same storage as an input?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlap {
    /// The output is written before the last input is read, so it must not
    /// share storage with any input.
    Yes,
    /// The output may share storage with an input.
    No,
}

/// The input/temporary/output location requirements of one instruction, and
/// (after register allocation) their concrete assignments.
#[derive(Debug, Clone)]
pub struct LocationSummary {
    inputs: SmallVec<[Location; 4]>,
    temps: SmallVec<[Location; 2]>,
    output: Location,
    output_overlap: Overlap,
    call_kind: CallKind,
    /// For [CallKind::CallOnSlowPath] instructions whose slow path clobbers
    /// fewer registers than a full runtime call, the exact caller-saved set.
    custom_slow_path_caller_saves: Option<RegisterSet>,
    /// Registers live across this instruction; filled by the register
    /// allocator, consumed by slow paths.
    live_registers: RegisterSet,
    /// The subset of `live_registers` holding object references.
    ref_registers: RegisterSet,
    /// Reference bits for the frame's spill slots at this safepoint; indexed
    /// in words from the base of the spill area.
    stack_mask: Vob,
}

impl LocationSummary {
    pub fn new(num_inputs: usize, call_kind: CallKind) -> Self {
        Self {
            inputs: SmallVec::from_elem(Location::Invalid, num_inputs),
            temps: SmallVec::new(),
            output: Location::Invalid,
            output_overlap: Overlap::No,
            call_kind,
            custom_slow_path_caller_saves: None,
            live_registers: RegisterSet::new(),
            ref_registers: RegisterSet::new(),
            stack_mask: Vob::new(),
        }
    }

    pub fn set_in_at(&mut self, at: usize, loc: Location) {
        self.inputs[at] = loc;
    }

    pub fn in_at(&self, at: usize) -> Location {
        self.inputs[at]
    }

    pub fn inputs(&self) -> &[Location] {
        &self.inputs
    }

    pub fn inputs_mut(&mut self) -> &mut [Location] {
        &mut self.inputs
    }

    pub fn add_temp(&mut self, loc: Location) {
        self.temps.push(loc);
    }

    pub fn temp(&self, at: usize) -> Location {
        self.temps[at]
    }

    pub fn temps(&self) -> &[Location] {
        &self.temps
    }

    pub fn temps_mut(&mut self) -> &mut [Location] {
        &mut self.temps
    }

    pub fn set_out(&mut self, loc: Location, overlap: Overlap) {
        self.output = loc;
        self.output_overlap = overlap;
    }

    /// Replace the output location, keeping the overlap declaration. Used by
    /// the register allocator.
    pub fn replace_out(&mut self, loc: Location) {
        self.output = loc;
    }

    pub fn out(&self) -> Location {
        self.output
    }

    pub fn output_overlap(&self) -> Overlap {
        self.output_overlap
    }

    pub fn call_kind(&self) -> CallKind {
        self.call_kind
    }

    pub fn can_call(&self) -> bool {
        !matches!(self.call_kind, CallKind::NoCall)
    }

    pub fn set_custom_slow_path_caller_saves(&mut self, saves: RegisterSet) {
        self.custom_slow_path_caller_saves = Some(saves);
    }

    pub fn custom_slow_path_caller_saves(&self) -> Option<&RegisterSet> {
        self.custom_slow_path_caller_saves.as_ref()
    }

    pub fn set_live_registers(&mut self, live: RegisterSet, refs: RegisterSet) {
        self.live_registers = live;
        self.ref_registers = refs;
    }

    pub fn live_registers(&self) -> &RegisterSet {
        &self.live_registers
    }

    pub fn register_contains_object(&self, r: CoreReg) -> bool {
        self.ref_registers.contains_core(r)
    }

    pub fn set_stack_bit(&mut self, slot: usize) {
        if self.stack_mask.len() <= slot {
            self.stack_mask.resize(slot + 1, false);
        }
        self.stack_mask.set(slot, true);
    }

    pub fn stack_mask(&self) -> &Vob {
        &self.stack_mask
    }

    /// True once the register allocator has replaced every constraint: no
    /// input, temp or output may remain unallocated at emission time.
    pub fn is_fully_allocated(&self) -> bool {
        self.inputs
            .iter()
            .chain(self.temps.iter())
            .chain(std::iter::once(&self.output))
            .all(|l| !matches!(l, Location::Unallocated(_)))
    }
}

/// One (source, destination, value kind) transfer in a parallel move batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveOperation {
    pub source: Location,
    pub destination: Location,
    pub ty: Ty,
}

impl MoveOperation {
    pub fn new(source: Location, destination: Location, ty: Ty) -> Self {
        Self {
            source,
            destination,
            ty,
        }
    }

    /// A move whose source and destination are identical is elided.
    pub fn is_redundant(&self) -> bool {
        self.source == self.destination
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::arm::{CoreReg, SReg};
    use crate::ir::ConstIdx;

    #[test]
    fn pair_overlap() {
        let pair = Location::RegisterPair(CoreReg::R0, CoreReg::R1);
        assert!(pair.overlaps(&Location::Register(CoreReg::R0)));
        assert!(pair.overlaps(&Location::Register(CoreReg::R1)));
        assert!(!pair.overlaps(&Location::Register(CoreReg::R2)));
        assert!(pair.overlaps(&Location::RegisterPair(CoreReg::R1, CoreReg::R2)));
        assert!(!pair.overlaps(&Location::FpuRegister(SReg::S0)));
    }

    #[test]
    fn stack_overlap() {
        let wide = Location::DoubleStackSlot(8);
        assert!(wide.overlaps(&Location::StackSlot(8)));
        assert!(wide.overlaps(&Location::StackSlot(12)));
        assert!(!wide.overlaps(&Location::StackSlot(16)));
        assert!(!wide.overlaps(&Location::StackSlot(4)));
        assert!(wide.overlaps(&Location::DoubleStackSlot(12)));
        // Same offsets in different storage classes do not overlap.
        assert!(!Location::StackSlot(0).overlaps(&Location::Register(CoreReg::R0)));
    }

    #[test]
    fn split_wide() {
        let d = Location::DoubleStackSlot(16);
        assert_eq!(d.split_low(), Location::StackSlot(16));
        assert_eq!(d.split_high(), Location::StackSlot(20));
        let p = Location::RegisterPair(CoreReg::R2, CoreReg::R3);
        assert_eq!(p.split_low(), Location::Register(CoreReg::R2));
        assert_eq!(p.split_high(), Location::Register(CoreReg::R3));
    }

    #[test]
    fn register_set_masks() {
        let mut s = RegisterSet::new();
        s.add(Location::Register(CoreReg::R4));
        s.add(Location::RegisterPair(CoreReg::R0, CoreReg::R1));
        s.add(Location::FpuRegister(SReg::S2));
        assert_eq!(s.core_mask(), 0b10011);
        assert_eq!(s.fpu_mask(), 0b100);
        assert!(s.contains_core(CoreReg::R4));
        assert!(!s.contains_core(CoreReg::R5));
        assert!(s.contains_fpu(SReg::S2));
    }

    #[test]
    fn summary_allocation_state() {
        let mut s = LocationSummary::new(2, CallKind::NoCall);
        s.set_in_at(0, Location::Unallocated(Constraint::RequiresRegister));
        s.set_in_at(1, Location::Constant(ConstIdx::from_usize(0)));
        s.set_out(
            Location::Unallocated(Constraint::RequiresRegister),
            Overlap::No,
        );
        assert!(!s.is_fully_allocated());
        s.set_in_at(0, Location::Register(CoreReg::R1));
        s.replace_out(Location::Register(CoreReg::R0));
        assert!(s.is_fully_allocated());
    }
}
