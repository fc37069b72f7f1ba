//! The parallel move resolver.
//!
//! A batch of moves must take effect as if simultaneously: no move may
//! observe another move's result. [schedule] orders a batch into a plain
//! sequence of machine moves, inserting scratch-location hops to break
//! cycles; [resolve] feeds the schedule to the emitter. Scheduling is a pure
//! function so its correctness can be tested by simulation, without an
//! emulator.
//!
//! The rules, in order:
//!  * moves whose source equals their destination are dropped;
//!  * a 64-bit stack-to-stack move is first decomposed into two 32-bit
//!    moves so both halves take part in the same conflict analysis;
//!  * any move whose destination no other pending move reads is safe to
//!    emit; among safe moves, constant sources go last (they can never be
//!    part of a cycle);
//!  * when nothing is safe the pending moves contain a cycle: the first
//!    blocked destination (pairs preferred, so a pair is never split
//!    mid-move) is saved to a scratch location, every reader of that
//!    location is redirected to the scratch, and resolution continues.
//!
//! `ip` is the 32-bit scratch and `d15` the 64-bit scratch; neither is
//! allocatable, so they are free by construction. If a batch nevertheless
//! mentions the scratch register itself, the reserved stack scratch slot is
//! used instead.

use crate::codegen::arm::{CodeGeneratorArm, SReg, FPU_SCRATCH, IP};
use crate::codegen::location::{Location, MoveOperation};
use crate::ir::Ty;

/// Emit `moves` so their combined effect is that of a parallel assignment.
pub(crate) fn resolve(cg: &mut CodeGeneratorArm, moves: &[MoveOperation]) {
    let scratch_slot = cg.frame.scratch_slot_offset();
    for mv in schedule(moves, scratch_slot) {
        cg.emit_move(&mv);
    }
}

/// Order a parallel move batch into an equivalent sequential one.
pub(crate) fn schedule(moves: &[MoveOperation], scratch_slot: i32) -> Vec<MoveOperation> {
    let mut pending: Vec<MoveOperation> = Vec::new();
    for mv in moves {
        if mv.is_redundant() {
            continue;
        }
        if mv.source.is_double_stack_slot() && mv.destination.is_double_stack_slot() {
            pending.push(MoveOperation::new(
                mv.source.split_low(),
                mv.destination.split_low(),
                Ty::Int,
            ));
            pending.push(MoveOperation::new(
                mv.source.split_high(),
                mv.destination.split_high(),
                Ty::Int,
            ));
        } else {
            pending.push(*mv);
        }
    }

    let mut out = Vec::with_capacity(pending.len() + 2);
    while !pending.is_empty() {
        // A move is safe when no *other* pending move still reads its
        // destination.
        let is_safe = |pending: &[MoveOperation], at: usize| {
            let dst = &pending[at].destination;
            pending
                .iter()
                .enumerate()
                .all(|(i, other)| i == at || !dst.overlaps(&other.source))
        };
        let safe = (0..pending.len())
            .filter(|&i| is_safe(&pending, i))
            .min_by_key(|&i| pending[i].source.is_constant());
        if let Some(i) = safe {
            out.push(pending.remove(i));
            continue;
        }

        // Every pending move is blocked: break a cycle by rotating through a
        // scratch. Prefer a wide destination so register pairs stay whole.
        let victim = (0..pending.len())
            .filter(|&i| !pending[i].source.is_constant())
            .max_by_key(|&i| pending[i].destination.is_wide())
            .expect("blocked parallel move with only constant sources");
        let saved = pending[victim].destination;
        let scratch = scratch_for(&saved, &pending, scratch_slot);
        out.push(MoveOperation::new(
            saved,
            scratch,
            if saved.is_wide() { Ty::Long } else { Ty::Int },
        ));
        for mv in &mut pending {
            mv.source = redirect(mv.source, &saved, &scratch);
        }
    }
    out
}

/// Pick the scratch location for a saved value: the scratch register of the
/// right width, or the reserved frame slot if the batch itself touches the
/// scratch register.
fn scratch_for(saved: &Location, pending: &[MoveOperation], scratch_slot: i32) -> Location {
    let (reg_scratch, slot_scratch) = if saved.is_wide() {
        (
            Location::FpuRegisterPair(
                SReg::from_code(FPU_SCRATCH.code() * 2),
                SReg::from_code(FPU_SCRATCH.code() * 2 + 1),
            ),
            Location::DoubleStackSlot(scratch_slot),
        )
    } else {
        (Location::Register(IP), Location::StackSlot(scratch_slot))
    };
    let clashes = pending
        .iter()
        .any(|m| m.source.overlaps(&reg_scratch) || m.destination.overlaps(&reg_scratch));
    if clashes {
        slot_scratch
    } else {
        reg_scratch
    }
}

/// If `src` reads (part of) the saved location, return the matching (part of
/// the) scratch.
fn redirect(src: Location, saved: &Location, scratch: &Location) -> Location {
    if src == *saved {
        return *scratch;
    }
    if !src.overlaps(saved) {
        return src;
    }
    if saved.is_wide() && !src.is_wide() {
        if src == saved.split_low() {
            return scratch.split_low();
        }
        if src == saved.split_high() {
            return scratch.split_high();
        }
    }
    panic!("unsupported partial overlap in parallel move: {src:?} reads {saved:?}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::arm::{CoreReg, SReg};
    use crate::ir::ConstIdx;
    use std::collections::HashMap;

    const SCRATCH_SLOT: i32 = 64;

    /// A canonical 32-bit storage cell.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Cell {
        Reg(CoreReg),
        Fpu(SReg),
        Stack(i32),
    }

    /// Word-level contents of one location.
    fn cells(loc: &Location) -> Vec<Cell> {
        match loc {
            Location::Register(r) => vec![Cell::Reg(*r)],
            Location::RegisterPair(lo, hi) => vec![Cell::Reg(*lo), Cell::Reg(*hi)],
            Location::FpuRegister(s) => vec![Cell::Fpu(*s)],
            Location::FpuRegisterPair(lo, hi) => vec![Cell::Fpu(*lo), Cell::Fpu(*hi)],
            Location::StackSlot(off) => vec![Cell::Stack(*off)],
            Location::DoubleStackSlot(off) => vec![Cell::Stack(*off), Cell::Stack(*off + 4)],
            _ => panic!("no cells for {loc:?}"),
        }
    }

    /// Abstract values: either "initial contents of cell X" or "word N of
    /// constant K".
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Value {
        Init(Cell),
        Const(u32, usize),
    }

    fn read(state: &HashMap<Cell, Value>, loc: &Location) -> Vec<Value> {
        if let Location::Constant(cidx) = loc {
            return vec![
                Value::Const(u32::try_from(usize::from(*cidx)).unwrap(), 0),
                Value::Const(u32::try_from(usize::from(*cidx)).unwrap(), 1),
            ];
        }
        cells(loc)
            .iter()
            .map(|c| state.get(c).copied().unwrap_or(Value::Init(*c)))
            .collect()
    }

    fn write(state: &mut HashMap<Cell, Value>, loc: &Location, values: &[Value]) {
        for (cell, v) in cells(loc).iter().zip(values) {
            state.insert(*cell, *v);
        }
    }

    /// Execute a schedule sequentially and compare against the parallel
    /// semantics of the original batch.
    fn check(moves: &[MoveOperation]) {
        let scheduled = schedule(moves, SCRATCH_SLOT);

        let mut seq: HashMap<Cell, Value> = HashMap::new();
        for mv in &scheduled {
            let values = read(&seq, &mv.source);
            write(&mut seq, &mv.destination, &values);
        }

        // Parallel semantics: all sources sampled from the initial state.
        for mv in moves {
            let expect: Vec<Value> = if let Location::Constant(cidx) = mv.source {
                vec![
                    Value::Const(u32::try_from(usize::from(cidx)).unwrap(), 0),
                    Value::Const(u32::try_from(usize::from(cidx)).unwrap(), 1),
                ]
            } else {
                cells(&mv.source).iter().map(|c| Value::Init(*c)).collect()
            };
            let got = read(&seq, &mv.destination);
            assert_eq!(
                got,
                expect[..got.len()],
                "{:?} -> {:?} (schedule: {scheduled:#?})",
                mv.source,
                mv.destination
            );
        }
    }

    fn reg(r: CoreReg) -> Location {
        Location::Register(r)
    }

    fn mv(src: Location, dst: Location, ty: Ty) -> MoveOperation {
        MoveOperation::new(src, dst, ty)
    }

    #[test]
    fn independent_moves_in_any_order() {
        check(&[
            mv(reg(CoreReg::R0), reg(CoreReg::R1), Ty::Int),
            mv(reg(CoreReg::R2), reg(CoreReg::R3), Ty::Int),
            mv(Location::StackSlot(8), reg(CoreReg::R4), Ty::Int),
        ]);
    }

    #[test]
    fn chains_emit_in_dependency_order() {
        // r0 -> r1 -> r2: the r1 -> r2 move must go first.
        check(&[
            mv(reg(CoreReg::R0), reg(CoreReg::R1), Ty::Int),
            mv(reg(CoreReg::R1), reg(CoreReg::R2), Ty::Int),
        ]);
    }

    #[test]
    fn two_cycle_registers() {
        check(&[
            mv(reg(CoreReg::R0), reg(CoreReg::R1), Ty::Int),
            mv(reg(CoreReg::R1), reg(CoreReg::R0), Ty::Int),
        ]);
    }

    #[test]
    fn three_cycle_registers() {
        check(&[
            mv(reg(CoreReg::R0), reg(CoreReg::R1), Ty::Int),
            mv(reg(CoreReg::R1), reg(CoreReg::R2), Ty::Int),
            mv(reg(CoreReg::R2), reg(CoreReg::R0), Ty::Int),
        ]);
    }

    #[test]
    fn two_cycle_stack_slots() {
        check(&[
            mv(Location::StackSlot(8), Location::StackSlot(12), Ty::Int),
            mv(Location::StackSlot(12), Location::StackSlot(8), Ty::Int),
        ]);
    }

    #[test]
    fn two_cycle_register_pairs() {
        check(&[
            mv(
                Location::RegisterPair(CoreReg::R0, CoreReg::R1),
                Location::RegisterPair(CoreReg::R2, CoreReg::R3),
                Ty::Long,
            ),
            mv(
                Location::RegisterPair(CoreReg::R2, CoreReg::R3),
                Location::RegisterPair(CoreReg::R0, CoreReg::R1),
                Ty::Long,
            ),
        ]);
    }

    #[test]
    fn pair_overlapping_half_moves() {
        // A pair lands on r2/r3 while r2 also feeds a scalar move: the pair
        // must stay whole.
        check(&[
            mv(
                Location::RegisterPair(CoreReg::R0, CoreReg::R1),
                Location::RegisterPair(CoreReg::R2, CoreReg::R3),
                Ty::Long,
            ),
            mv(reg(CoreReg::R2), reg(CoreReg::R0), Ty::Int),
        ]);
    }

    #[test]
    fn wide_stack_to_stack_is_decomposed() {
        let scheduled = schedule(
            &[mv(
                Location::DoubleStackSlot(8),
                Location::DoubleStackSlot(16),
                Ty::Long,
            )],
            SCRATCH_SLOT,
        );
        assert_eq!(scheduled.len(), 2);
        assert!(scheduled.iter().all(|m| m.source.is_stack_slot()));
        check(&[mv(
            Location::DoubleStackSlot(8),
            Location::DoubleStackSlot(16),
            Ty::Long,
        )]);
    }

    #[test]
    fn overlapping_wide_stack_swap() {
        check(&[
            mv(
                Location::DoubleStackSlot(0),
                Location::DoubleStackSlot(8),
                Ty::Long,
            ),
            mv(
                Location::DoubleStackSlot(8),
                Location::DoubleStackSlot(0),
                Ty::Long,
            ),
        ]);
    }

    #[test]
    fn constants_are_emitted_last() {
        let scheduled = schedule(
            &[
                mv(Location::Constant(ConstIdx::from_usize(0)), reg(CoreReg::R0), Ty::Int),
                mv(reg(CoreReg::R0), reg(CoreReg::R1), Ty::Int),
            ],
            SCRATCH_SLOT,
        );
        assert!(scheduled[0].source.is_register());
        assert!(scheduled[1].source.is_constant());
        check(&[
            mv(Location::Constant(ConstIdx::from_usize(0)), reg(CoreReg::R0), Ty::Int),
            mv(reg(CoreReg::R0), reg(CoreReg::R1), Ty::Int),
        ]);
    }

    #[test]
    fn redundant_moves_are_elided() {
        let scheduled = schedule(
            &[mv(reg(CoreReg::R0), reg(CoreReg::R0), Ty::Int)],
            SCRATCH_SLOT,
        );
        assert!(scheduled.is_empty());
    }

    #[test]
    fn mixed_cycle_with_fpu_and_stack() {
        check(&[
            mv(Location::FpuRegister(SReg::S0), Location::StackSlot(4), Ty::Float),
            mv(Location::StackSlot(4), Location::FpuRegister(SReg::S1), Ty::Float),
            mv(Location::FpuRegister(SReg::S1), Location::FpuRegister(SReg::S0), Ty::Float),
        ]);
    }

    #[test]
    fn cycle_plus_chain() {
        check(&[
            mv(reg(CoreReg::R0), reg(CoreReg::R1), Ty::Int),
            mv(reg(CoreReg::R1), reg(CoreReg::R0), Ty::Int),
            mv(reg(CoreReg::R0), reg(CoreReg::R2), Ty::Int),
            mv(Location::Constant(ConstIdx::from_usize(3)), reg(CoreReg::R4), Ty::Int),
        ]);
    }
}
