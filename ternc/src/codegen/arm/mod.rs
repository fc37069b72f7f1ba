//! The ARM (AArch32) backend.
//!
//! Conventions used in this module tree:
//!   * Functions with an `emit_X` prefix generate code for an IR construct
//!     `X`; functions with a `locations_X` prefix declare its constraints.
//!   * Helper function arguments are ordered `(<destination>, <source_1>,
//!     ... <source_n>)`.
//!   * `ip` (r12) is the backend's scratch register and is never allocatable;
//!     any helper may clobber it unless noted. `r9` is the thread register.
//!   * `d15` (`s30`/`s31`) is the reserved FPU scratch, used by the parallel
//!     move resolver.

use crate::codegen::arm::asm::{Assembler, Cond, LabelIdx, Op2};
use crate::codegen::arm::slowpath::SlowPath;
use crate::codegen::frame::Frame;
use crate::codegen::location::{CallKind, Location, LocationSummary, MoveOperation};
use crate::codegen::{CompiledMethod, LocationMap, PatchKind, PcRelativePatch};
use crate::config::CodegenConfig;
use crate::ir::{BlockIdx, FpBias, Graph, InstIdx};
use crate::{log, CompilationError};
use index_vec::IndexVec;
use strum::EnumCount;
use strum_macros::{EnumCount as EnumCountMacro, FromRepr};
use ternsmp::{MethodInfo, StackMapBuilder};
use vob::Vob;

pub mod asm;
mod builder;
pub mod callconv;
mod emit;
pub mod moves;
pub mod readbarrier;
pub mod slowpath;

/// A core (integer) register.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumCountMacro, FromRepr,
)]
#[repr(u32)]
pub enum CoreReg {
    R0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    R8,
    R9,
    R10,
    R11,
    R12,
    Sp,
    Lr,
    Pc,
}

impl CoreReg {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> CoreReg {
        CoreReg::from_repr(code).expect("bad core register number")
    }

    pub fn name(self) -> &'static str {
        match self {
            CoreReg::R0 => "r0",
            CoreReg::R1 => "r1",
            CoreReg::R2 => "r2",
            CoreReg::R3 => "r3",
            CoreReg::R4 => "r4",
            CoreReg::R5 => "r5",
            CoreReg::R6 => "r6",
            CoreReg::R7 => "r7",
            CoreReg::R8 => "r8",
            CoreReg::R9 => "r9",
            CoreReg::R10 => "r10",
            CoreReg::R11 => "r11",
            CoreReg::R12 => "ip",
            CoreReg::Sp => "sp",
            CoreReg::Lr => "lr",
            CoreReg::Pc => "pc",
        }
    }
}

/// A single-precision FPU register.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumCountMacro, FromRepr,
)]
#[repr(u32)]
#[rustfmt::skip]
pub enum SReg {
    S0, S1, S2, S3, S4, S5, S6, S7,
    S8, S9, S10, S11, S12, S13, S14, S15,
    S16, S17, S18, S19, S20, S21, S22, S23,
    S24, S25, S26, S27, S28, S29, S30, S31,
}

impl SReg {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> SReg {
        SReg::from_repr(code).expect("bad s register number")
    }

    pub fn name(self) -> &'static str {
        static NAMES: [&str; SReg::COUNT] = [
            "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "s12",
            "s13", "s14", "s15", "s16", "s17", "s18", "s19", "s20", "s21", "s22", "s23", "s24",
            "s25", "s26", "s27", "s28", "s29", "s30", "s31",
        ];
        NAMES[usize::try_from(self.code()).unwrap()]
    }
}

/// A double-precision FPU register; `Dn` aliases `S(2n)`/`S(2n+1)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumCountMacro, FromRepr,
)]
#[repr(u32)]
#[rustfmt::skip]
pub enum DReg {
    D0, D1, D2, D3, D4, D5, D6, D7,
    D8, D9, D10, D11, D12, D13, D14, D15,
}

impl DReg {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> DReg {
        DReg::from_repr(code).expect("bad d register number")
    }

    /// The double register aliasing an even/odd S-register pair.
    pub fn from_s_pair(lo: SReg, hi: SReg) -> DReg {
        debug_assert!(lo.code() % 2 == 0 && hi.code() == lo.code() + 1);
        DReg::from_code(lo.code() / 2)
    }

    pub fn name(self) -> &'static str {
        static NAMES: [&str; DReg::COUNT] = [
            "d0", "d1", "d2", "d3", "d4", "d5", "d6", "d7", "d8", "d9", "d10", "d11", "d12",
            "d13", "d14", "d15",
        ];
        NAMES[usize::try_from(self.code()).unwrap()]
    }
}

/// The scratch register; never allocatable.
pub const IP: CoreReg = CoreReg::R12;
/// The thread register, pointing at the runtime's per-thread structure.
pub const TR: CoreReg = CoreReg::R9;
/// The register holding the current method on entry and at calls.
pub const METHOD_REG: CoreReg = CoreReg::R0;
/// The reserved FPU scratch double register (`s30`/`s31`).
pub const FPU_SCRATCH: DReg = DReg::D15;

/// Callee-saved core registers (the thread register is carved out).
pub const CORE_CALLEE_SAVES: u32 = (1 << 4) | (1 << 5) | (1 << 6) | (1 << 7) | (1 << 8)
    | (1 << 10)
    | (1 << 11)
    | (1 << 14);
/// Core registers a call clobbers.
pub const CORE_CALLER_SAVES: u32 = 0b1111; // r0-r3
/// FPU registers a call clobbers (s0-s15).
pub const FPU_CALLER_SAVES: u32 = 0xFFFF;
/// Callee-saved FPU registers (s16-s31).
pub const FPU_CALLEE_SAVES: u32 = 0xFFFF_0000;

/// Map an IR condition to its A32 condition for a signed compare.
pub(crate) fn arm_cond(cond: crate::ir::Cond) -> Cond {
    use crate::ir::Cond as C;
    match cond {
        C::Eq => Cond::Eq,
        C::Ne => Cond::Ne,
        C::Lt => Cond::Lt,
        C::Le => Cond::Le,
        C::Gt => Cond::Gt,
        C::Ge => Cond::Ge,
        C::B => Cond::Lo,
        C::Be => Cond::Ls,
        C::A => Cond::Hi,
        C::Ae => Cond::Hs,
    }
}

/// Map a signed IR condition to the unsigned A32 condition with the same
/// outcome; used for the low words of wide compares.
pub(crate) fn arm_unsigned_cond(cond: crate::ir::Cond) -> Cond {
    use crate::ir::Cond as C;
    match cond {
        C::Eq => Cond::Eq,
        C::Ne => Cond::Ne,
        C::Lt | C::B => Cond::Lo,
        C::Le | C::Be => Cond::Ls,
        C::Gt | C::A => Cond::Hi,
        C::Ge | C::Ae => Cond::Hs,
    }
}

/// Map an IR condition to the A32 condition to use after a `vcmp`/`vmrs`
/// pair, honouring the requested NaN bias. The A32 floating-point condition
/// table makes "unordered" take exactly one side of each comparison.
pub(crate) fn arm_fp_cond(cond: crate::ir::Cond, bias: FpBias) -> Cond {
    use crate::ir::Cond as C;
    let gt_bias = bias == FpBias::Gt;
    match cond {
        C::Eq => Cond::Eq,
        C::Ne => Cond::Ne, // unordered counts as not-equal
        C::Lt => {
            if gt_bias {
                Cond::Lo
            } else {
                Cond::Lt // unordered
            }
        }
        C::Le => {
            if gt_bias {
                Cond::Ls
            } else {
                Cond::Le // unordered
            }
        }
        C::Gt => {
            if gt_bias {
                Cond::Hi // unordered
            } else {
                Cond::Gt
            }
        }
        C::Ge => {
            if gt_bias {
                Cond::Hs // unordered
            } else {
                Cond::Ge
            }
        }
        _ => panic!("unsigned condition on a floating-point compare"),
    }
}

/// One safepoint, recorded during emission and serialized by the finalizer.
#[derive(Debug)]
struct Safepoint {
    native_pc: u32,
    dex_pc: u32,
    register_mask: u32,
    stack_mask: Vob,
}

/// The single-method ARM code generator. One instance per compilation; no
/// state is shared between instances.
pub struct CodeGeneratorArm<'a> {
    pub(crate) g: &'a Graph,
    pub(crate) config: &'a CodegenConfig,
    pub(crate) locations: &'a mut LocationMap,
    pub(crate) asm: Assembler,
    pub(crate) frame: Frame,
    block_labels: IndexVec<BlockIdx, LabelIdx>,
    slow_paths: Vec<SlowPath>,
    safepoints: Vec<Safepoint>,
    patches: Vec<PcRelativePatch>,
    current_block: BlockIdx,
}

/// First pass: declare constraints. See [builder].
pub(crate) fn build_locations(
    g: &Graph,
    config: &CodegenConfig,
    locations: &mut LocationMap,
) -> Result<(), CompilationError> {
    builder::build(g, config, locations)
}

pub(crate) fn compile(
    g: &Graph,
    locations: &mut LocationMap,
    config: &CodegenConfig,
) -> Result<CompiledMethod, CompilationError> {
    for (iidx, summary) in locations.iter() {
        if !summary.is_fully_allocated() {
            return Err(CompilationError::InternalError(format!(
                "instruction %{} still has unallocated locations",
                usize::from(iidx)
            )));
        }
    }

    if log::log_ir_enabled() {
        log::log_ir(&g.to_string());
    }

    let mut cg = CodeGeneratorArm::new(g, locations, config);
    cg.prepare_frame();
    cg.emit_frame_entry();
    for bidx in g.block_order() {
        cg.bind_block(bidx);
        for &iidx in g.block(bidx).insts() {
            cg.emit_inst(iidx)?;
        }
    }
    cg.emit_slow_paths()?;
    cg.finish()
}

impl<'a> CodeGeneratorArm<'a> {
    fn new(g: &'a Graph, locations: &'a mut LocationMap, config: &'a CodegenConfig) -> Self {
        let mut asm = Assembler::new();
        let block_labels: IndexVec<BlockIdx, LabelIdx> =
            g.block_order().map(|_| asm.new_label()).collect();
        Self {
            g,
            config,
            locations,
            asm,
            frame: Frame::new(),
            block_labels,
            slow_paths: Vec::new(),
            safepoints: Vec::new(),
            patches: Vec::new(),
            current_block: BlockIdx::from_usize(0),
        }
    }

    pub(crate) fn block_label(&self, bidx: BlockIdx) -> LabelIdx {
        self.block_labels[bidx]
    }

    fn bind_block(&mut self, bidx: BlockIdx) {
        self.current_block = bidx;
        let label = self.block_labels[bidx];
        self.asm.bind(label);
    }

    /// Is `bidx` the block emitted immediately after the current one?
    pub(crate) fn is_next_block(&self, bidx: BlockIdx) -> bool {
        usize::from(bidx) == usize::from(self.current_block) + 1
    }

    /// Branch to `target`, unless it is the fall-through block.
    pub(crate) fn branch_or_fallthrough(&mut self, target: BlockIdx) {
        if !self.is_next_block(target) {
            let label = self.block_labels[target];
            self.asm.b(label);
        }
    }

    pub(crate) fn summary(&self, iidx: InstIdx) -> &LocationSummary {
        self.locations.get(iidx).expect("instruction has no locations")
    }

    // Frame layout and prologue/epilogue.

    /// Size all frame regions and freeze the layout. Also rewrites stack
    /// parameter locations, which up to now were relative to the caller's
    /// frame, into this frame's SP-relative offsets.
    fn prepare_frame(&mut self) {
        // Registers actually used by the allocation decide the spill masks.
        let mut used_core = 0u32;
        let mut used_fpu = 0u32;
        let mut record = |loc: &Location| match loc {
            Location::Register(r) => used_core |= 1 << r.code(),
            Location::RegisterPair(lo, hi) => {
                used_core |= (1 << lo.code()) | (1 << hi.code());
            }
            Location::FpuRegister(s) => used_fpu |= 1 << s.code(),
            Location::FpuRegisterPair(lo, hi) => {
                used_fpu |= (1 << lo.code()) | (1 << hi.code());
            }
            _ => (),
        };
        let mut max_spill_end = 0i32;
        let mut spill_slot = |loc: &Location| {
            if let Location::StackSlot(off) | Location::DoubleStackSlot(off) = loc {
                let end = off + if loc.is_wide() { 8 } else { 4 };
                max_spill_end = max_spill_end.max(end);
            }
        };
        for (_, summary) in self.locations.iter() {
            for loc in summary
                .inputs()
                .iter()
                .chain(summary.temps().iter())
                .chain(std::iter::once(&summary.out()))
            {
                record(loc);
                spill_slot(loc);
            }
            if summary.can_call() {
                let live = summary.live_registers();
                let caller_core = live.core_mask() & CORE_CALLER_SAVES;
                let caller_fpu = live.fpu_mask() & FPU_CALLER_SAVES;
                self.frame.update_slow_path_area_size(
                    (caller_core.count_ones() + caller_fpu.count_ones()) * 4,
                );
            }
        }

        // LR is always spilled: the frame must know its own return address.
        let core_spills = (used_core & CORE_CALLEE_SAVES) | (1 << CoreReg::Lr.code());
        // FPU spills are widened to full double registers so the prologue can
        // use vpush.
        let mut fpu_spills = used_fpu & FPU_CALLEE_SAVES;
        fpu_spills |= (fpu_spills & 0x5555_5555) << 1;
        fpu_spills |= (fpu_spills & 0xAAAA_AAAA) >> 1;
        self.frame.set_spill_masks(core_spills, fpu_spills);

        for iidx in (0..self.g.insts_len()).map(InstIdx::from_usize) {
            let Some(summary) = self.locations.get(iidx) else {
                continue;
            };
            if summary.call_kind() != CallKind::CallOnMainPath {
                continue;
            }
            // Managed calls may pass arguments on the stack; recompute their
            // footprint. Runtime calls only ever use registers, but their
            // slots are still reserved.
            let args: Option<&[InstIdx]> = match &self.g.inst(iidx).kind {
                crate::ir::InstKind::InvokeStaticOrDirect { args, .. }
                | crate::ir::InstKind::InvokeVirtual { args, .. } => Some(args),
                _ => None,
            };
            let bytes = match args {
                Some(args) => {
                    let mut conv = callconv::CallingConvention::new(callconv::Abi::Managed);
                    for &arg in args {
                        conv.next_location(self.g.inst(arg).ty);
                    }
                    conv.outgoing_args_size()
                }
                None => 4 * 4,
            };
            self.frame.update_outgoing_args_size(bytes);
        }

        // The spill area must cover the highest allocator-assigned slot
        // beyond the fixed regions.
        let fixed_end = i32::try_from(self.frame.slow_path_spill_offset()).unwrap();
        if max_spill_end > fixed_end {
            self.frame
                .set_spill_area_size(u32::try_from(max_spill_end - fixed_end).unwrap());
        }

        self.frame.finalize();

        // Stack parameters live in the caller's frame, above ours.
        let frame_size = i32::try_from(self.frame.frame_size()).unwrap();
        for iidx in (0..self.g.insts_len()).map(InstIdx::from_usize) {
            if !matches!(
                self.g.inst(iidx).kind,
                crate::ir::InstKind::Parameter { .. }
            ) {
                continue;
            }
            if let Some(summary) = self.locations.get_mut(iidx) {
                let out = summary.out();
                match out {
                    Location::StackSlot(off) => {
                        summary.replace_out(Location::StackSlot(off + frame_size));
                    }
                    Location::DoubleStackSlot(off) => {
                        summary.replace_out(Location::DoubleStackSlot(off + frame_size));
                    }
                    _ => (),
                }
            }
        }
    }

    fn emit_frame_entry(&mut self) {
        self.asm.comment("prologue");
        // Stack overflow probe: fault eagerly if the frame cannot fit.
        self.asm.sub(IP, CoreReg::Sp, Op2::imm(0x1000).unwrap());
        self.asm.ldr(IP, IP, 0);

        let core_spills = self.frame.core_spill_mask();
        self.asm.push_list(core_spills);
        let fpu_spills = self.frame.fpu_spill_mask();
        if fpu_spills != 0 {
            self.emit_fpu_spill_block(fpu_spills, true);
        }
        let adjust = self.frame.frame_size() - self.frame.entry_spill_size();
        self.add_sp(-(i64::try_from(adjust).unwrap() as i32));
        // Home the current method at the base of the frame.
        self.asm.str(METHOD_REG, CoreReg::Sp, 0);
    }

    pub(crate) fn emit_frame_exit(&mut self) {
        self.asm.comment("epilogue");
        let adjust = self.frame.frame_size() - self.frame.entry_spill_size();
        self.add_sp(i64::try_from(adjust).unwrap() as i32);
        let fpu_spills = self.frame.fpu_spill_mask();
        if fpu_spills != 0 {
            self.emit_fpu_spill_block(fpu_spills, false);
        }
        // Return by popping the saved LR straight into PC.
        let mut mask = self.frame.core_spill_mask();
        mask &= !(1 << CoreReg::Lr.code());
        mask |= 1 << CoreReg::Pc.code();
        self.asm.pop_list(mask);
    }

    /// vpush/vpop the (pair-widened) FPU spill mask as contiguous D ranges.
    fn emit_fpu_spill_block(&mut self, mask: u32, push: bool) {
        debug_assert_eq!(mask & 0x5555_5555, (mask & 0xAAAA_AAAA) >> 1);
        let mut runs: Vec<(u32, u32)> = Vec::new(); // (first d reg, count)
        let mut d = 0;
        while d < 16 {
            if mask & (1 << (2 * d)) != 0 {
                let start = d;
                while d < 16 && mask & (1 << (2 * d)) != 0 {
                    d += 1;
                }
                runs.push((start, d - start));
            } else {
                d += 1;
            }
        }
        // vpush decrements from the top; keep pops in mirror order.
        if push {
            for &(start, count) in runs.iter().rev() {
                self.asm.vpush_d(DReg::from_code(start), count);
            }
        } else {
            for &(start, count) in runs.iter() {
                self.asm.vpop_d(DReg::from_code(start), count);
            }
        }
    }

    fn add_sp(&mut self, delta: i32) {
        if delta == 0 {
            return;
        }
        let (rd, rn) = (CoreReg::Sp, CoreReg::Sp);
        if delta > 0 {
            if let Some(op2) = Op2::imm(delta as u32) {
                self.asm.add(rd, rn, op2);
            } else {
                self.asm.mov_imm32(IP, delta);
                self.asm.add(rd, rn, Op2::Reg(IP));
            }
        } else if let Some(op2) = Op2::imm((-delta) as u32) {
            self.asm.sub(rd, rn, op2);
        } else {
            self.asm.mov_imm32(IP, -delta);
            self.asm.sub(rd, rn, Op2::Reg(IP));
        }
    }

    // Loads, stores and moves between locations.

    /// Word load with a large-offset fallback through `ip`.
    pub(crate) fn load_word(&mut self, rt: CoreReg, base: CoreReg, offset: i32) {
        if (-0xFFF..=0xFFF).contains(&offset) {
            self.asm.ldr(rt, base, offset);
        } else {
            self.asm.mov_imm32(IP, offset);
            self.asm.add(IP, base, Op2::Reg(IP));
            self.asm.ldr(rt, IP, 0);
        }
    }

    pub(crate) fn store_word(&mut self, rt: CoreReg, base: CoreReg, offset: i32) {
        debug_assert!(rt != IP || (-0xFFF..=0xFFF).contains(&offset));
        if (-0xFFF..=0xFFF).contains(&offset) {
            self.asm.str(rt, base, offset);
        } else {
            self.asm.mov_imm32(IP, offset);
            self.asm.add(IP, base, Op2::Reg(IP));
            self.asm.str(rt, IP, 0);
        }
    }

    pub(crate) fn load_pair(&mut self, lo: CoreReg, hi: CoreReg, base: CoreReg, offset: i32) {
        if lo.code() % 2 == 0 && hi.code() == lo.code() + 1 && (-0xFF..=0xFF).contains(&offset) {
            self.asm.ldrd(lo, hi, base, offset);
        } else {
            self.load_word(lo, base, offset);
            self.load_word(hi, base, offset + 4);
        }
    }

    pub(crate) fn store_pair(&mut self, lo: CoreReg, hi: CoreReg, base: CoreReg, offset: i32) {
        if lo.code() % 2 == 0 && hi.code() == lo.code() + 1 && (-0xFF..=0xFF).contains(&offset) {
            self.asm.strd(lo, hi, base, offset);
        } else {
            self.store_word(lo, base, offset);
            self.store_word(hi, base, offset + 4);
        }
    }

    /// Move a 32-bit value between any two concrete locations.
    pub(crate) fn move_32(&mut self, dst: Location, src: Location) {
        if dst == src {
            return;
        }
        match (src, dst) {
            (Location::Register(s), Location::Register(d)) => self.asm.mov(d, s),
            (Location::Register(s), Location::FpuRegister(d)) => self.asm.vmov_sr(d, s),
            (Location::Register(s), Location::StackSlot(off)) => {
                self.store_word(s, CoreReg::Sp, off)
            }
            (Location::StackSlot(off), Location::Register(d)) => {
                self.load_word(d, CoreReg::Sp, off)
            }
            (Location::StackSlot(off), Location::FpuRegister(d)) => {
                self.asm.vldr_s(d, CoreReg::Sp, off)
            }
            (Location::StackSlot(s), Location::StackSlot(d)) => {
                self.load_word(IP, CoreReg::Sp, s);
                self.store_word(IP, CoreReg::Sp, d);
            }
            (Location::FpuRegister(s), Location::Register(d)) => self.asm.vmov_rs(d, s),
            (Location::FpuRegister(s), Location::FpuRegister(d)) => self.asm.vmov_ss(d, s),
            (Location::FpuRegister(s), Location::StackSlot(off)) => {
                self.asm.vstr_s(s, CoreReg::Sp, off)
            }
            (Location::Constant(cidx), dst) => {
                let value = self.g.const_(cidx).low_bits();
                match dst {
                    Location::Register(d) => self.asm.mov_imm32(d, value),
                    Location::FpuRegister(d) => {
                        self.asm.mov_imm32(IP, value);
                        self.asm.vmov_sr(d, IP);
                    }
                    Location::StackSlot(off) => {
                        self.asm.mov_imm32(IP, value);
                        self.store_word(IP, CoreReg::Sp, off);
                    }
                    _ => panic!("bad 32-bit constant move destination: {dst:?}"),
                }
            }
            _ => panic!("bad 32-bit move: {src:?} -> {dst:?}"),
        }
    }

    /// Move a 64-bit value between any two concrete locations.
    pub(crate) fn move_64(&mut self, dst: Location, src: Location) {
        if dst == src {
            return;
        }
        match (src, dst) {
            (Location::RegisterPair(slo, shi), Location::RegisterPair(dlo, dhi)) => {
                // The halves must not clobber each other mid-move.
                if dlo == shi {
                    self.asm.mov(dhi, shi);
                    self.asm.mov(dlo, slo);
                } else {
                    self.asm.mov(dlo, slo);
                    self.asm.mov(dhi, shi);
                }
            }
            (Location::RegisterPair(slo, shi), Location::FpuRegisterPair(dlo, dhi)) => {
                self.asm.vmov_drr(DReg::from_s_pair(dlo, dhi), slo, shi);
            }
            (Location::RegisterPair(slo, shi), Location::DoubleStackSlot(off)) => {
                self.store_pair(slo, shi, CoreReg::Sp, off);
            }
            (Location::FpuRegisterPair(slo, shi), Location::RegisterPair(dlo, dhi)) => {
                self.asm.vmov_rrd(dlo, dhi, DReg::from_s_pair(slo, shi));
            }
            (Location::FpuRegisterPair(slo, shi), Location::FpuRegisterPair(dlo, dhi)) => {
                self.asm
                    .vmov_dd(DReg::from_s_pair(dlo, dhi), DReg::from_s_pair(slo, shi));
            }
            (Location::FpuRegisterPair(slo, shi), Location::DoubleStackSlot(off)) => {
                self.asm
                    .vstr_d(DReg::from_s_pair(slo, shi), CoreReg::Sp, off);
            }
            (Location::DoubleStackSlot(off), Location::RegisterPair(dlo, dhi)) => {
                self.load_pair(dlo, dhi, CoreReg::Sp, off);
            }
            (Location::DoubleStackSlot(off), Location::FpuRegisterPair(dlo, dhi)) => {
                self.asm
                    .vldr_d(DReg::from_s_pair(dlo, dhi), CoreReg::Sp, off);
            }
            (Location::DoubleStackSlot(s), Location::DoubleStackSlot(d)) => {
                // Routed through the FPU scratch to keep ip free.
                self.asm.vldr_d(FPU_SCRATCH, CoreReg::Sp, s);
                self.asm.vstr_d(FPU_SCRATCH, CoreReg::Sp, d);
            }
            (Location::Constant(cidx), dst) => {
                let c = *self.g.const_(cidx);
                let (lo, hi) = (c.low_bits(), c.high_bits());
                match dst {
                    Location::RegisterPair(dlo, dhi) => {
                        self.asm.mov_imm32(dlo, lo);
                        self.asm.mov_imm32(dhi, hi);
                    }
                    Location::FpuRegisterPair(dlo, dhi) => {
                        self.asm.mov_imm32(IP, lo);
                        self.asm.vmov_sr(dlo, IP);
                        self.asm.mov_imm32(IP, hi);
                        self.asm.vmov_sr(dhi, IP);
                    }
                    Location::DoubleStackSlot(off) => {
                        self.asm.mov_imm32(IP, lo);
                        self.store_word(IP, CoreReg::Sp, off);
                        self.asm.mov_imm32(IP, hi);
                        self.store_word(IP, CoreReg::Sp, off + 4);
                    }
                    _ => panic!("bad 64-bit constant move destination: {dst:?}"),
                }
            }
            _ => panic!("bad 64-bit move: {src:?} -> {dst:?}"),
        }
    }

    /// Emit one already-scheduled move.
    pub(crate) fn emit_move(&mut self, mv: &MoveOperation) {
        if mv.is_redundant() {
            return;
        }
        if mv.ty.is_wide() {
            self.move_64(mv.destination, mv.source);
        } else {
            self.move_32(mv.destination, mv.source);
        }
    }

    // Runtime calls and safepoints.

    /// Call a runtime entry point through the thread register and record the
    /// safepoint for `iidx` at the return address.
    pub(crate) fn invoke_runtime(&mut self, entry: slowpath::Entrypoint, iidx: InstIdx) {
        self.asm.comment(&format!("call {}", entry.name()));
        self.asm.ldr(CoreReg::Lr, TR, entry.offset(self.config));
        self.asm.blx(CoreReg::Lr);
        self.record_pc_info(iidx);
    }

    /// Record a safepoint at the current pc for `iidx`.
    pub(crate) fn record_pc_info(&mut self, iidx: InstIdx) {
        self.record_safepoint_at(iidx, self.asm.pc_offset());
    }

    /// Record a safepoint for an implicit (fault-based) check at the address
    /// of the instruction just emitted.
    pub(crate) fn record_implicit_check(&mut self, iidx: InstIdx) {
        self.record_safepoint_at(iidx, self.asm.pc_offset() - 4);
    }

    fn record_safepoint_at(&mut self, iidx: InstIdx, native_pc: u32) {
        let dex_pc = self.g.inst(iidx).dex_pc;
        let bits = usize::from(self.frame.stack_mask_bits());
        let (register_mask, mut stack_mask) = {
            let summary = self.summary(iidx);
            (summary_ref_register_mask(summary), summary.stack_mask().clone())
        };
        stack_mask.resize(bits, false);
        self.safepoints.push(Safepoint {
            native_pc,
            dex_pc,
            register_mask,
            stack_mask,
        });
    }

    // Slow paths.

    pub(crate) fn add_slow_path(&mut self, mut sp: SlowPath) -> LabelIdx {
        sp.entry = self.asm.new_label();
        sp.exit = self.asm.new_label();
        let entry = sp.entry;
        self.slow_paths.push(sp);
        entry
    }

    /// Bind the exit label of the most recently added slow path at the
    /// current position (immediately after the triggering fast path).
    pub(crate) fn bind_last_slow_path_exit(&mut self) {
        let exit = self.slow_paths.last().expect("no slow path").exit;
        self.asm.bind(exit);
    }

    pub(crate) fn last_slow_path_exit(&self) -> LabelIdx {
        self.slow_paths.last().expect("no slow path").exit
    }

    fn emit_slow_paths(&mut self) -> Result<(), CompilationError> {
        // Emitted in creation order, after all main-line code.
        let mut i = 0;
        while i < self.slow_paths.len() {
            let sp = self.slow_paths[i].clone();
            slowpath::emit(self, &sp)?;
            i += 1;
        }
        Ok(())
    }

    // Pc-relative literals.

    /// Emit a movw/movt/add-pc sequence producing the (link-time) address of
    /// the referenced symbol in `rd`, and record the patch.
    pub(crate) fn emit_pc_relative_address(&mut self, rd: CoreReg, kind: PatchKind, index: u32) {
        let movw_offset = self.asm.pc_offset();
        self.asm.movw(rd, 0);
        let movt_offset = self.asm.pc_offset();
        self.asm.movt(rd, 0);
        let add_pc_offset = self.asm.pc_offset();
        self.asm.add(rd, rd, Op2::Reg(CoreReg::Pc));
        self.patches.push(PcRelativePatch {
            movw_offset,
            movt_offset,
            add_pc_offset,
            kind,
            index,
        });
    }

    // Finalization.

    fn finish(mut self) -> Result<CompiledMethod, CompilationError> {
        self.safepoints.sort_by_key(|s| s.native_pc);
        let info = MethodInfo {
            frame_size: self.frame.frame_size(),
            core_spill_mask: self.frame.core_spill_mask(),
            fpu_spill_mask: self.frame.fpu_spill_mask(),
        };
        let mut smb = StackMapBuilder::new(info, self.frame.stack_mask_bits());
        for sp in &self.safepoints {
            smb.push(sp.native_pc, sp.dex_pc, sp.register_mask, sp.stack_mask.clone());
        }

        let (code, listing_lines) = self.asm.finalize()?;
        let listing = listing_lines.join("\n");
        if log::log_asm_enabled() {
            log::log_asm(&listing);
        }

        Ok(CompiledMethod {
            code,
            frame_size: info.frame_size,
            core_spill_mask: info.core_spill_mask,
            fpu_spill_mask: info.fpu_spill_mask,
            patches: self.patches,
            stack_maps: smb.encode(),
            listing,
        })
    }
}

/// The mask of core registers holding references at a safepoint.
fn summary_ref_register_mask(summary: &LocationSummary) -> u32 {
    let mut mask = 0;
    for code in 0..u32::try_from(CoreReg::COUNT).unwrap() {
        if summary.register_contains_object(CoreReg::from_code(code)) {
            mask |= 1 << code;
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_names_and_codes() {
        assert_eq!(CoreReg::R0.code(), 0);
        assert_eq!(CoreReg::Pc.code(), 15);
        assert_eq!(IP, CoreReg::R12);
        assert_eq!(IP.name(), "ip");
        assert_eq!(SReg::S31.code(), 31);
        assert_eq!(DReg::from_s_pair(SReg::S4, SReg::S5), DReg::D2);
        assert_eq!(CoreReg::from_code(9), TR);
    }

    #[test]
    fn callee_save_masks() {
        // The thread register and scratch register are never callee-saved.
        assert_eq!(CORE_CALLEE_SAVES & (1 << TR.code()), 0);
        assert_eq!(CORE_CALLEE_SAVES & (1 << IP.code()), 0);
        assert_ne!(CORE_CALLEE_SAVES & (1 << CoreReg::Lr.code()), 0);
        assert_eq!(CORE_CALLEE_SAVES & CORE_CALLER_SAVES, 0);
        assert_eq!(FPU_CALLEE_SAVES & FPU_CALLER_SAVES, 0);
    }

    #[test]
    fn fp_condition_bias() {
        use crate::ir::Cond as C;
        // lt with gt-bias must not fire on NaN: carry-clear (lo).
        assert_eq!(arm_fp_cond(C::Lt, FpBias::Gt), Cond::Lo);
        // lt with lt-bias fires on NaN.
        assert_eq!(arm_fp_cond(C::Lt, FpBias::Lt), Cond::Lt);
        assert_eq!(arm_fp_cond(C::Gt, FpBias::Gt), Cond::Hi);
        assert_eq!(arm_fp_cond(C::Gt, FpBias::Lt), Cond::Gt);
    }
}
