//! Read barriers for a concurrent copying collector.
//!
//! A guarded reference load must hand back a to-space reference even while
//! the collector is concurrently moving objects. The Baker scheme does this
//! with a fast path that costs one extra load and one shift:
//!
//! 1. load the object's lock word, whose high bits hold the collector's
//!    read-barrier state;
//! 2. make the reference load's address computation data-dependent on that
//!    load by adding `lock_word >> 32` (always zero) to the base register —
//!    the dependency stops the CPU reordering the two loads without a fence;
//! 3. load the reference;
//! 4. shift the gray bit into the carry flag; if the object is gray, branch
//!    to a slow path that passes the just-loaded reference to a marking
//!    entry point using the reference's own register as both argument and
//!    result.
//!
//! The state sampled in step 1 may be stale by the time the slow path runs;
//! that is fine, because the marking entry point re-derives the authoritative
//! reference itself and a white/black observation means the reference was
//! already correct.
//!
//! When the collector is not Baker-style, [ReadBarrierKind::Slow] routes
//! every guarded load through a generic runtime call instead, with no
//! fast-path branch.

use crate::codegen::arm::asm::{Cond, Op2};
use crate::codegen::arm::slowpath::{SlowPath, SlowPathKind};
use crate::codegen::arm::{CodeGeneratorArm, CoreReg, IP, TR};
use crate::codegen::location::Location;
use crate::config::{lock_word, ReadBarrierKind};
use crate::ir::InstIdx;

/// The shift that moves the gray bit into the carry flag.
const GRAY_BIT_TO_CARRY_SHIFT: u32 = lock_word::READ_BARRIER_STATE_SHIFT + 1;

/// Load the reference field at `obj + offset` into `out`, applying the
/// configured barrier. `lock_temp` must be a caller-provided temp register
/// for the Baker fast path. If `record_null_check` is set, the first faulting
/// access records an implicit null check.
pub(crate) fn field_load(
    cg: &mut CodeGeneratorArm,
    iidx: InstIdx,
    out: Location,
    obj: CoreReg,
    offset: i32,
    lock_temp: Option<CoreReg>,
    record_null_check: bool,
) {
    let out_reg = out.reg();
    match cg.config.read_barrier {
        ReadBarrierKind::None => {
            cg.asm.ldr(out_reg, obj, offset);
            if record_null_check {
                cg.record_implicit_check(iidx);
            }
        }
        ReadBarrierKind::Baker => {
            let temp = lock_temp.expect("baker field load needs a lock-word temp");
            cg.asm.comment("baker read barrier fast path");
            cg.asm.ldr(temp, obj, cg.config.object.lock_word);
            if record_null_check {
                cg.record_implicit_check(iidx);
            }
            // Zero-valued in every execution; exists only to order the loads.
            cg.asm
                .add(obj, obj, Op2::RegShiftImm(temp, super::asm::Shift::Lsr, 32));
            cg.asm.ldr(out_reg, obj, offset);
            let entry = cg.add_slow_path(SlowPath::new(
                SlowPathKind::ReadBarrierMark { reference: out },
                iidx,
            ));
            cg.asm.lsrs(temp, temp, GRAY_BIT_TO_CARRY_SHIFT);
            cg.asm.b_cond(Cond::Hs, entry);
            cg.bind_last_slow_path_exit();
        }
        ReadBarrierKind::Slow => {
            cg.asm.ldr(out_reg, obj, offset);
            if record_null_check {
                cg.record_implicit_check(iidx);
            }
            generic_barrier(cg, iidx, out, obj, u32::try_from(offset).unwrap(), None);
        }
    }
}

/// Load the reference element at `array[index]` into `out`, applying the
/// configured barrier.
pub(crate) fn array_load(
    cg: &mut CodeGeneratorArm,
    iidx: InstIdx,
    out: Location,
    array: CoreReg,
    index: CoreReg,
    lock_temp: Option<CoreReg>,
    record_null_check: bool,
) {
    let data_offset = cg.config.object.array_data;
    let out_reg = out.reg();
    match cg.config.read_barrier {
        ReadBarrierKind::None => {
            cg.asm.add(IP, array, Op2::RegShiftImm(index, super::asm::Shift::Lsl, 2));
            cg.asm.ldr(out_reg, IP, data_offset);
            if record_null_check {
                cg.record_implicit_check(iidx);
            }
        }
        ReadBarrierKind::Baker => {
            let temp = lock_temp.expect("baker array load needs a lock-word temp");
            cg.asm.comment("baker read barrier fast path");
            cg.asm.ldr(temp, array, cg.config.object.lock_word);
            if record_null_check {
                cg.record_implicit_check(iidx);
            }
            cg.asm
                .add(array, array, Op2::RegShiftImm(temp, super::asm::Shift::Lsr, 32));
            cg.asm.add(IP, array, Op2::RegShiftImm(index, super::asm::Shift::Lsl, 2));
            cg.asm.ldr(out_reg, IP, data_offset);
            let entry = cg.add_slow_path(SlowPath::new(
                SlowPathKind::ReadBarrierMark { reference: out },
                iidx,
            ));
            cg.asm.lsrs(temp, temp, GRAY_BIT_TO_CARRY_SHIFT);
            cg.asm.b_cond(Cond::Hs, entry);
            cg.bind_last_slow_path_exit();
        }
        ReadBarrierKind::Slow => {
            cg.asm.add(IP, array, Op2::RegShiftImm(index, super::asm::Shift::Lsl, 2));
            cg.asm.ldr(out_reg, IP, data_offset);
            if record_null_check {
                cg.record_implicit_check(iidx);
            }
            generic_barrier(
                cg,
                iidx,
                out,
                array,
                u32::try_from(data_offset).unwrap(),
                Some(Location::Register(index)),
            );
        }
    }
}

/// Load the GC root at `obj + offset` into `root`. Roots have no per-object
/// gray state; the Baker fast path polls the thread's marking flag instead.
pub(crate) fn gc_root_load(
    cg: &mut CodeGeneratorArm,
    iidx: InstIdx,
    root: Location,
    obj: CoreReg,
    offset: i32,
) {
    let root_reg = root.reg();
    cg.asm.ldr(root_reg, obj, offset);
    match cg.config.read_barrier {
        ReadBarrierKind::None => (),
        ReadBarrierKind::Baker => {
            let entry = cg.add_slow_path(SlowPath::new(
                SlowPathKind::ReadBarrierMark { reference: root },
                iidx,
            ));
            cg.asm.ldr(IP, TR, cg.config.thread.is_gc_marking);
            cg.asm.cmp(IP, Op2::imm(0).unwrap());
            cg.asm.b_cond(Cond::Ne, entry);
            cg.bind_last_slow_path_exit();
        }
        ReadBarrierKind::Slow => {
            generic_barrier(cg, iidx, root, obj, u32::try_from(offset).unwrap(), None);
        }
    }
}

/// Baker barrier for compare-and-swap intrinsics: on a gray object, mark the
/// field's current value and opportunistically write the to-space reference
/// back, so the subsequent exclusive-load loop compares against to-space
/// references only. `field_addr` must already hold `obj + offset`.
pub(crate) fn cas_field_barrier(
    cg: &mut CodeGeneratorArm,
    iidx: InstIdx,
    obj: CoreReg,
    field_addr: CoreReg,
    value_temp: Location,
    lock_temp: CoreReg,
    expected_temp: Location,
    status_temp: Location,
) {
    debug_assert_eq!(cg.config.read_barrier, ReadBarrierKind::Baker);
    cg.asm.comment("baker read barrier (cas field update)");
    cg.asm.ldr(lock_temp, obj, cg.config.object.lock_word);
    cg.asm.add(
        field_addr,
        field_addr,
        Op2::RegShiftImm(lock_temp, super::asm::Shift::Lsr, 32),
    );
    cg.asm.ldr(value_temp.reg(), field_addr, 0);
    let entry = cg.add_slow_path(SlowPath::new(
        SlowPathKind::ReadBarrierMarkAndUpdateField {
            reference: value_temp,
            field_addr: Location::Register(field_addr),
            expected: expected_temp,
            temp: status_temp,
        },
        iidx,
    ));
    cg.asm.lsrs(lock_temp, lock_temp, GRAY_BIT_TO_CARRY_SHIFT);
    cg.asm.b_cond(Cond::Hs, entry);
    cg.bind_last_slow_path_exit();
}

/// The collector-agnostic fallback: branch unconditionally to a slow path
/// that asks the runtime for the authoritative reference.
fn generic_barrier(
    cg: &mut CodeGeneratorArm,
    iidx: InstIdx,
    out: Location,
    holder: CoreReg,
    offset: u32,
    index: Option<Location>,
) {
    let entry = cg.add_slow_path(SlowPath::new(
        SlowPathKind::ReadBarrierSlow {
            out,
            reference: out,
            holder: Location::Register(holder),
            offset,
            index,
        },
        iidx,
    ));
    cg.asm.b(entry);
    cg.bind_last_slow_path_exit();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gray_bit_reaches_carry() {
        // Shifting right by the state shift plus one leaves the gray bit as
        // the last bit shifted out, i.e. in the carry flag.
        let lock_word_gray: u32 = lock_word::GRAY_BIT | 0x1234;
        let shifted_out = (lock_word_gray >> (GRAY_BIT_TO_CARRY_SHIFT - 1)) & 1;
        assert_eq!(shifted_out, 1);
        let lock_word_white: u32 = 0x1234;
        let shifted_out = (lock_word_white >> (GRAY_BIT_TO_CARRY_SHIFT - 1)) & 1;
        assert_eq!(shifted_out, 0);
    }
}
