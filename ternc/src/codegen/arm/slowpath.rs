//! Out-of-line slow paths.
//!
//! A slow path is created while its triggering instruction's fast path is
//! being emitted: the fast path branches to the slow path's entry label and
//! (for non-fatal paths) the slow path branches back to an exit label bound
//! immediately after the fast path. All slow paths are emitted, in creation
//! order, after the method's last block, so the hot code stays branch-ahead
//! and compact.
//!
//! Every failure kind is one variant of [SlowPathKind], dispatched by a
//! single `match` in [emit]; the payload carries exactly the locations the
//! out-of-line code needs. Fatal paths construct and throw a guest exception
//! and never return; non-fatal ones save the live caller-saved registers,
//! call the runtime, restore, and resume.

use crate::codegen::arm::asm::{Cond, LabelIdx, Op2};
use crate::codegen::arm::{
    moves, CodeGeneratorArm, CoreReg, DReg, SReg, CORE_CALLER_SAVES, FPU_CALLER_SAVES, IP, TR,
};
use crate::codegen::location::{Location, MoveOperation, RegisterSet};
use crate::config::CodegenConfig;
use crate::ir::{InstIdx, Ty};
use crate::CompilationError;
use strum_macros::IntoStaticStr;

/// Runtime entry points, indexed into the thread's entry point table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[repr(i32)]
pub enum Entrypoint {
    ThrowNullPointer = 0,
    ThrowDivZero = 1,
    ThrowArrayBounds = 2,
    ThrowStackOverflow = 3,
    DeliverException = 4,
    TestSuspend = 5,
    InitializeType = 6,
    InitializeStaticStorage = 7,
    ResolveString = 8,
    CheckInstanceOf = 9,
    AllocObject = 10,
    Idivmod = 11,
    Ldiv = 12,
    Lrem = 13,
    Fmod = 14,
    Fmodf = 15,
    L2f = 16,
    L2d = 17,
    F2l = 18,
    D2l = 19,
    ReadBarrierSlow = 20,
}

impl Entrypoint {
    /// Offset of this entry point's slot from the thread register.
    pub fn offset(self, config: &CodegenConfig) -> i32 {
        config.thread.entrypoints + 4 * (self as i32)
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// The runtime ABI's argument registers, in order.
pub(crate) const RUNTIME_ARGS: [CoreReg; 4] = [CoreReg::R0, CoreReg::R1, CoreReg::R2, CoreReg::R3];

/// Offset of the per-register marking entry point for `reg`.
pub(crate) fn mark_entrypoint_offset(config: &CodegenConfig, reg: CoreReg) -> i32 {
    config.thread.mark_entrypoints + 4 * i32::try_from(reg.code()).unwrap()
}

/// What a slow path does, with the locations its code consumes.
#[derive(Debug, Clone)]
pub enum SlowPathKind {
    NullCheck,
    DivZeroCheck,
    BoundsCheck {
        index: Location,
        length: Location,
    },
    SuspendCheck,
    TypeCheck {
        fatal: bool,
        object: Location,
        class: Location,
    },
    LoadClass {
        type_idx: u32,
        do_clinit: bool,
        out: Location,
    },
    LoadString {
        string_idx: u32,
        out: Location,
    },
    /// Baker read barrier: mark the reference held in `reference` (input and
    /// output; the marking entry point preserves all other registers).
    ReadBarrierMark {
        reference: Location,
    },
    /// Baker read barrier for compare-and-swap intrinsics: mark, then
    /// opportunistically CAS the field back from the stale reference.
    ReadBarrierMarkAndUpdateField {
        reference: Location,
        /// Register holding the field's address.
        field_addr: Location,
        /// Temp receiving the pre-mark reference.
        expected: Location,
        /// Temp for the CAS status.
        temp: Location,
    },
    /// Generic (non-Baker) read barrier: ask the runtime for the
    /// authoritative reference.
    ReadBarrierSlow {
        out: Location,
        reference: Location,
        holder: Location,
        offset: u32,
        /// For array elements, the index register; the effective offset is
        /// then `offset + (index << 2)`.
        index: Option<Location>,
    },
}

/// One out-of-line code region tied to one triggering instruction.
#[derive(Debug, Clone)]
pub struct SlowPath {
    pub kind: SlowPathKind,
    /// The triggering instruction.
    pub iidx: InstIdx,
    pub entry: LabelIdx,
    pub exit: LabelIdx,
}

impl SlowPath {
    pub fn new(kind: SlowPathKind, iidx: InstIdx) -> Self {
        Self {
            kind,
            iidx,
            // Real labels are assigned when the path is registered.
            entry: LabelIdx::from_raw(0),
            exit: LabelIdx::from_raw(0),
        }
    }

    /// Fatal paths throw and never rejoin the main line.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            SlowPathKind::NullCheck
                | SlowPathKind::DivZeroCheck
                | SlowPathKind::BoundsCheck { .. }
                | SlowPathKind::TypeCheck { fatal: true, .. }
        )
    }

    fn describe(&self) -> &'static str {
        match self.kind {
            SlowPathKind::NullCheck => "null check",
            SlowPathKind::DivZeroCheck => "div zero check",
            SlowPathKind::BoundsCheck { .. } => "bounds check",
            SlowPathKind::SuspendCheck => "suspend check",
            SlowPathKind::TypeCheck { .. } => "type check",
            SlowPathKind::LoadClass { .. } => "load class",
            SlowPathKind::LoadString { .. } => "load string",
            SlowPathKind::ReadBarrierMark { .. } => "read barrier mark",
            SlowPathKind::ReadBarrierMarkAndUpdateField { .. } => {
                "read barrier mark and update field"
            }
            SlowPathKind::ReadBarrierSlow { .. } => "read barrier slow",
        }
    }
}

/// Emit one slow path's code.
pub(crate) fn emit(cg: &mut CodeGeneratorArm, sp: &SlowPath) -> Result<(), CompilationError> {
    cg.asm.comment(&format!("slow path: {}", sp.describe()));
    let entry = sp.entry;
    cg.asm.bind(entry);
    let throws_into_catch = cg.g.inst(sp.iidx).throws_into_catch;

    match &sp.kind {
        SlowPathKind::NullCheck => {
            if throws_into_catch {
                // Live registers are restored by the catch handler's entry.
                save_live_registers(cg, sp.iidx);
            }
            cg.invoke_runtime(Entrypoint::ThrowNullPointer, sp.iidx);
        }
        SlowPathKind::DivZeroCheck => {
            if throws_into_catch {
                save_live_registers(cg, sp.iidx);
            }
            cg.invoke_runtime(Entrypoint::ThrowDivZero, sp.iidx);
        }
        SlowPathKind::BoundsCheck { index, length } => {
            if throws_into_catch {
                save_live_registers(cg, sp.iidx);
            }
            let args = RUNTIME_ARGS;
            moves::resolve(
                cg,
                &[
                    MoveOperation::new(*index, Location::Register(args[0]), Ty::Int),
                    MoveOperation::new(*length, Location::Register(args[1]), Ty::Int),
                ],
            );
            cg.invoke_runtime(Entrypoint::ThrowArrayBounds, sp.iidx);
        }
        SlowPathKind::SuspendCheck => {
            save_live_registers(cg, sp.iidx);
            cg.invoke_runtime(Entrypoint::TestSuspend, sp.iidx);
            restore_live_registers(cg, sp.iidx);
            cg.asm.b(sp.exit);
        }
        SlowPathKind::TypeCheck {
            fatal,
            object,
            class,
        } => {
            let args = RUNTIME_ARGS;
            if *fatal {
                // The inline hierarchy walk proved the cast fails; the
                // runtime call only constructs and throws.
                moves::resolve(
                    cg,
                    &[
                        MoveOperation::new(*object, Location::Register(args[0]), Ty::Ref),
                        MoveOperation::new(*class, Location::Register(args[1]), Ty::Ref),
                    ],
                );
                cg.invoke_runtime(Entrypoint::CheckInstanceOf, sp.iidx);
            } else {
                save_live_registers(cg, sp.iidx);
                moves::resolve(
                    cg,
                    &[
                        MoveOperation::new(*object, Location::Register(args[0]), Ty::Ref),
                        MoveOperation::new(*class, Location::Register(args[1]), Ty::Ref),
                    ],
                );
                cg.invoke_runtime(Entrypoint::CheckInstanceOf, sp.iidx);
                restore_live_registers(cg, sp.iidx);
                cg.asm.b(sp.exit);
            }
        }
        SlowPathKind::LoadClass {
            type_idx,
            do_clinit,
            out,
        } => {
            save_live_registers(cg, sp.iidx);
            let args = RUNTIME_ARGS;
            cg.asm.mov_imm32(args[0], i32::try_from(*type_idx).unwrap());
            let entry_point = if *do_clinit {
                Entrypoint::InitializeStaticStorage
            } else {
                Entrypoint::InitializeType
            };
            cg.invoke_runtime(entry_point, sp.iidx);
            if out.is_valid() {
                cg.move_32(*out, Location::Register(CoreReg::R0));
            }
            restore_live_registers(cg, sp.iidx);
            cg.asm.b(sp.exit);
        }
        SlowPathKind::LoadString { string_idx, out } => {
            save_live_registers(cg, sp.iidx);
            let args = RUNTIME_ARGS;
            cg.asm
                .mov_imm32(args[0], i32::try_from(*string_idx).unwrap());
            cg.invoke_runtime(Entrypoint::ResolveString, sp.iidx);
            cg.move_32(*out, Location::Register(CoreReg::R0));
            restore_live_registers(cg, sp.iidx);
            cg.asm.b(sp.exit);
        }
        SlowPathKind::ReadBarrierMark { reference } => {
            // The marking entry points use a compact convention: the
            // reference's own register is both argument and result, and every
            // other register is preserved, so nothing is saved here.
            let reg = reference.reg();
            cg.asm
                .ldr(CoreReg::Lr, TR, mark_entrypoint_offset(cg.config, reg));
            cg.asm.blx(CoreReg::Lr);
            cg.asm.b(sp.exit);
        }
        SlowPathKind::ReadBarrierMarkAndUpdateField {
            reference,
            field_addr,
            expected,
            temp,
        } => {
            let reg = reference.reg();
            let addr = field_addr.reg();
            let old = expected.reg();
            let status = temp.reg();
            // Remember the stale reference, then mark in place.
            cg.asm.mov(old, reg);
            cg.asm
                .ldr(CoreReg::Lr, TR, mark_entrypoint_offset(cg.config, reg));
            cg.asm.blx(CoreReg::Lr);
            // If marking moved the object, try once (lock-free retry only)
            // to update the field that still holds the stale reference.
            cg.asm.cmp(old, Op2::Reg(reg));
            cg.asm.b_cond(Cond::Eq, sp.exit);
            let retry = cg.asm.new_label();
            cg.asm.bind(retry);
            cg.asm.ldrex(status, addr);
            cg.asm.cmp(status, Op2::Reg(old));
            // Another mutator won the race; its value is as good as ours.
            cg.asm.b_cond(Cond::Ne, sp.exit);
            cg.asm.strex(status, reg, addr);
            cg.asm.cmp(status, Op2::imm(1).unwrap());
            cg.asm.b_cond(Cond::Eq, retry);
            cg.asm.b(sp.exit);
        }
        SlowPathKind::ReadBarrierSlow {
            out,
            reference,
            holder,
            offset,
            index,
        } => {
            save_live_registers(cg, sp.iidx);
            let args = RUNTIME_ARGS;
            if let Some(index) = index {
                // Effective offset = offset + (index << 2) for reference
                // arrays.
                cg.asm.lsl(IP, index.reg(), 2);
                if let Some(op2) = Op2::imm(*offset) {
                    cg.asm.add(IP, IP, op2);
                } else {
                    // The addend never exceeds an object's field span.
                    return Err(CompilationError::LimitExceeded(format!(
                        "read barrier offset {offset} not encodable"
                    )));
                }
            }
            moves::resolve(
                cg,
                &[
                    MoveOperation::new(*reference, Location::Register(args[0]), Ty::Ref),
                    MoveOperation::new(*holder, Location::Register(args[1]), Ty::Ref),
                ],
            );
            if index.is_some() {
                cg.asm.mov(args[2], IP);
            } else {
                cg.asm
                    .mov_imm32(args[2], i32::try_from(*offset).unwrap());
            }
            cg.invoke_runtime(Entrypoint::ReadBarrierSlow, sp.iidx);
            cg.move_32(*out, Location::Register(CoreReg::R0));
            restore_live_registers(cg, sp.iidx);
            cg.asm.b(sp.exit);
        }
    }
    Ok(())
}

/// Write every live caller-saved register to the frame's slow-path save
/// area, and mark the saved slots of object-holding registers in the
/// safepoint stack mask.
pub(crate) fn save_live_registers(cg: &mut CodeGeneratorArm, iidx: InstIdx) {
    let (core, fpu, object_regs) = spill_sets(cg, iidx);
    let base = cg.frame.slow_path_spill_offset();

    let mut stack_offset = base;
    let mut object_slots = Vec::new();
    for code in 0..32 {
        if core & (1 << code) == 0 {
            continue;
        }
        if object_regs & (1 << code) != 0 {
            object_slots.push(cg.frame.stack_mask_bit(stack_offset));
        }
        stack_offset += 4;
    }
    if let Some(summary) = cg.locations.get_mut(iidx) {
        for slot in object_slots {
            summary.set_stack_bit(slot);
        }
    }

    store_register_list(cg, core, base);
    save_fpu_registers(cg, fpu, stack_offset, true);
}

/// Mirror of [save_live_registers]; fatal paths never call this.
pub(crate) fn restore_live_registers(cg: &mut CodeGeneratorArm, iidx: InstIdx) {
    let (core, fpu, _) = spill_sets(cg, iidx);
    let base = cg.frame.slow_path_spill_offset();
    let stack_offset = base + 4 * core.count_ones();
    load_register_list(cg, core, base);
    save_fpu_registers(cg, fpu, stack_offset, false);
}

fn spill_sets(cg: &CodeGeneratorArm, iidx: InstIdx) -> (u32, u32, u32) {
    let summary = cg.summary(iidx);
    let caller_saves = summary
        .custom_slow_path_caller_saves()
        .copied()
        .unwrap_or_else(|| RegisterSet::from_masks(CORE_CALLER_SAVES, FPU_CALLER_SAVES));
    let live = summary.live_registers();
    let core = live.core_mask() & caller_saves.core_mask();
    let fpu = live.fpu_mask() & caller_saves.fpu_mask();
    let mut object_regs = 0u32;
    for code in 0..16 {
        if summary.register_contains_object(CoreReg::from_code(code)) {
            object_regs |= 1 << code;
        }
    }
    (core, fpu, object_regs)
}

/// Store the registers in `mask` at consecutive words from `offset`. A long
/// list becomes one block store to keep slow paths small; short lists use
/// individual stores.
fn store_register_list(cg: &mut CodeGeneratorArm, mask: u32, offset: u32) {
    if mask == 0 {
        return;
    }
    let offset = i32::try_from(offset).unwrap();
    if mask.count_ones() <= 2 {
        let mut off = offset;
        for code in 0..16 {
            if mask & (1 << code) != 0 {
                cg.asm.str(CoreReg::from_code(code), CoreReg::Sp, off);
                off += 4;
            }
        }
    } else if offset == 0 {
        cg.asm.stm(CoreReg::Sp, mask);
    } else {
        cg.asm.add(IP, CoreReg::Sp, Op2::imm(offset as u32).unwrap());
        cg.asm.stm(IP, mask);
    }
}

fn load_register_list(cg: &mut CodeGeneratorArm, mask: u32, offset: u32) {
    if mask == 0 {
        return;
    }
    let offset = i32::try_from(offset).unwrap();
    if mask.count_ones() <= 2 {
        let mut off = offset;
        for code in 0..16 {
            if mask & (1 << code) != 0 {
                cg.asm.ldr(CoreReg::from_code(code), CoreReg::Sp, off);
                off += 4;
            }
        }
    } else if offset == 0 {
        cg.asm.ldm(CoreReg::Sp, mask);
    } else {
        cg.asm.add(IP, CoreReg::Sp, Op2::imm(offset as u32).unwrap());
        cg.asm.ldm(IP, mask);
    }
}

/// Save or restore the S registers in `mask`, processing each contiguous run
/// with the widest safe transfers.
fn save_fpu_registers(cg: &mut CodeGeneratorArm, mut mask: u32, mut stack_offset: u32, save: bool) {
    while mask != 0 {
        let begin = mask.trailing_zeros();
        let tmp = mask.wrapping_add(1 << begin);
        mask &= tmp; // clear the contiguous run of ones
        let end = if tmp == 0 { 32 } else { tmp.trailing_zeros() };
        stack_offset = transfer_contiguous_sregs(cg, begin, end - 1, stack_offset, save);
    }
}

/// Transfer the contiguous S registers `first..=last`. Interior full D pairs
/// go through one vstm/vldm; a leading odd or trailing even S register is
/// transferred on its own.
fn transfer_contiguous_sregs(
    cg: &mut CodeGeneratorArm,
    mut first: u32,
    mut last: u32,
    mut stack_offset: u32,
    save: bool,
) -> u32 {
    debug_assert!(first <= last);
    let mut vone = |cg: &mut CodeGeneratorArm, s: u32, off: u32| {
        let s = SReg::from_code(s);
        if save {
            cg.asm.vstr_s(s, CoreReg::Sp, i32::try_from(off).unwrap());
        } else {
            cg.asm.vldr_s(s, CoreReg::Sp, i32::try_from(off).unwrap());
        }
    };

    if first == last && first == 0 {
        vone(cg, first, stack_offset);
        return stack_offset + 4;
    }
    if first % 2 == 1 {
        vone(cg, first, stack_offset);
        first += 1;
        stack_offset += 4;
    }

    let mut transfer_last = false;
    if last % 2 == 0 {
        transfer_last = true;
        last -= 1;
    }

    if first < last {
        let d = DReg::from_code(first / 2);
        let count = (last - first + 1) / 2;
        if count == 1 {
            if save {
                cg.asm.vstr_d(d, CoreReg::Sp, i32::try_from(stack_offset).unwrap());
            } else {
                cg.asm.vldr_d(d, CoreReg::Sp, i32::try_from(stack_offset).unwrap());
            }
        } else {
            let base = if stack_offset != 0 {
                cg.asm
                    .add(IP, CoreReg::Sp, Op2::imm(stack_offset).expect("unencodable offset"));
                IP
            } else {
                CoreReg::Sp
            };
            if save {
                cg.asm.vstm_d(base, d, count);
            } else {
                cg.asm.vldm_d(base, d, count);
            }
        }
        stack_offset += count * 8;
    }

    if transfer_last {
        vone(cg, last + 1, stack_offset);
        stack_offset += 4;
    }

    stack_offset
}

#[cfg(test)]
mod tests {
    use super::*;

    // The chunking helper is pure apart from emission; driving it through a
    // full code generator is overkill, so exercise the mask walk directly
    // over interesting masks.
    fn runs(mut mask: u32) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        while mask != 0 {
            let begin = mask.trailing_zeros();
            let tmp = mask.wrapping_add(1 << begin);
            mask &= tmp;
            let end = if tmp == 0 { 32 } else { tmp.trailing_zeros() };
            out.push((begin, end - 1));
        }
        out
    }

    #[test]
    fn contiguous_run_discovery() {
        assert_eq!(runs(0b0), vec![]);
        assert_eq!(runs(0b1), vec![(0, 0)]);
        // s1..s6 live: one run.
        assert_eq!(runs(0b111_1110), vec![(1, 6)]);
        // Two disjoint runs, low first.
        assert_eq!(runs(0b1100_0011), vec![(0, 1), (6, 7)]);
        // The top register alone.
        assert_eq!(runs(1 << 31), vec![(31, 31)]);
        assert_eq!(runs(0xFFFF_FFFF), vec![(0, 31)]);
    }

    #[test]
    fn fatal_kinds() {
        let fatal = SlowPath::new(SlowPathKind::NullCheck, InstIdx::from_usize(0));
        assert!(fatal.is_fatal());
        let fatal = SlowPath::new(
            SlowPathKind::TypeCheck {
                fatal: true,
                object: Location::Register(CoreReg::R4),
                class: Location::Register(CoreReg::R5),
            },
            InstIdx::from_usize(0),
        );
        assert!(fatal.is_fatal());
        let nonfatal = SlowPath::new(SlowPathKind::SuspendCheck, InstIdx::from_usize(0));
        assert!(!nonfatal.is_fatal());
        let nonfatal = SlowPath::new(
            SlowPathKind::ReadBarrierMark {
                reference: Location::Register(CoreReg::R4),
            },
            InstIdx::from_usize(0),
        );
        assert!(!nonfatal.is_fatal());
    }

    #[test]
    fn entrypoint_offsets() {
        let config = CodegenConfig::default();
        assert_eq!(
            Entrypoint::ThrowNullPointer.offset(&config),
            config.thread.entrypoints
        );
        assert_eq!(
            Entrypoint::TestSuspend.offset(&config),
            config.thread.entrypoints + 20
        );
        assert_eq!(Entrypoint::TestSuspend.name(), "TestSuspend");
        assert_eq!(
            mark_entrypoint_offset(&config, CoreReg::R5),
            config.thread.mark_entrypoints + 20
        );
    }
}
