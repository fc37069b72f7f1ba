//! The emitter: the per-opcode second pass, consuming concrete locations.
//!
//! Every `emit_X` method assumes the register allocator has honoured the
//! constraints `builder` declared for `X`: inputs are where the summary says,
//! temporaries are distinct registers, and an output flagged as overlapping
//! shares storage with no input. `ip` is freely clobbered throughout.

use crate::codegen::arm::asm::{Barrier, Cond, LabelIdx, Op2, Shift};
use crate::codegen::arm::slowpath::{Entrypoint, SlowPath, SlowPathKind};
use crate::codegen::arm::{
    arm_cond, arm_fp_cond, arm_unsigned_cond, moves, readbarrier, CodeGeneratorArm, CoreReg,
    DReg, SReg, FPU_SCRATCH, IP, TR,
};
use crate::codegen::location::{Location, LocationSummary};
use crate::codegen::utils::magic_and_shift_for_div_rem;
use crate::codegen::PatchKind;
use crate::config::ReadBarrierKind;
use crate::ir::{BinOp, Cond as IrCond, FpBias, InstIdx, InstKind, Ty, UnOp};
use crate::CompilationError;

/// How many bits an object address is shifted to index the card table.
const CARD_SHIFT: u32 = 10;

impl CodeGeneratorArm<'_> {
    pub(crate) fn emit_inst(&mut self, iidx: InstIdx) -> Result<(), CompilationError> {
        let g = self.g;
        match &g.inst(iidx).kind {
            // Constants are materialized at their uses; parameters and the
            // current method are placed by the frame entry.
            InstKind::Constant(_) | InstKind::Parameter { .. } | InstKind::CurrentMethod => {}
            InstKind::Unary { op, .. } => self.emit_unary(iidx, *op),
            InstKind::Binary { op, .. } => self.emit_binary(iidx, *op)?,
            InstKind::Compare { lhs, bias, .. } => {
                self.emit_compare(iidx, g.inst(*lhs).ty, *bias)
            }
            InstKind::Condition { cond, lhs, .. } => {
                self.emit_condition(iidx, *cond, g.inst(*lhs).ty)
            }
            InstKind::If { .. } => self.emit_if(iidx),
            InstKind::Goto => {
                let succ = g.block(self.current_block).successors()[0];
                self.branch_or_fallthrough(succ);
            }
            InstKind::Return { .. } => self.emit_frame_exit(),
            InstKind::TypeConversion { input } => {
                self.emit_conversion(iidx, g.inst(*input).ty)
            }
            InstKind::NullCheck { .. } => self.emit_null_check(iidx),
            InstKind::DivZeroCheck { input } => {
                self.emit_div_zero_check(iidx, g.inst(*input).ty)
            }
            InstKind::BoundsCheck { .. } => self.emit_bounds_check(iidx),
            InstKind::SuspendCheck => self.emit_suspend_check(iidx),
            InstKind::FieldGet {
                offset, volatile, ..
            } => self.emit_field_get(iidx, *offset, *volatile),
            InstKind::FieldSet {
                offset,
                volatile,
                value,
                value_can_be_null,
                ..
            } => {
                let value_ty = g.inst(*value).ty;
                self.emit_field_set(iidx, *offset, *volatile, value_ty, *value_can_be_null)
            }
            InstKind::ArrayGet { .. } => self.emit_array_get(iidx),
            InstKind::ArraySet {
                value,
                value_can_be_null,
                ..
            } => {
                let value_ty = g.inst(*value).ty;
                self.emit_array_set(iidx, value_ty, *value_can_be_null)
            }
            InstKind::ArrayLength { .. } => {
                let s = self.summary(iidx).clone();
                let out = s.out().reg();
                let obj = s.in_at(0).reg();
                self.asm.ldr(out, obj, self.config.object.array_length);
                self.maybe_record_implicit_null_check(iidx);
            }
            InstKind::LoadClass {
                type_idx,
                check_clinit,
                ..
            } => self.emit_load_class(iidx, *type_idx, *check_clinit),
            InstKind::LoadString { string_idx, .. } => self.emit_load_string(iidx, *string_idx),
            InstKind::ClinitCheck { class } => self.emit_clinit_check(iidx, *class)?,
            InstKind::NewInstance { .. } => {
                // The class is already in the runtime ABI's first argument
                // register.
                self.invoke_runtime(Entrypoint::AllocObject, iidx);
            }
            InstKind::CheckCast { .. } => self.emit_check_cast(iidx),
            InstKind::InstanceOf { .. } => self.emit_instance_of(iidx),
            InstKind::InvokeStaticOrDirect {
                method_idx, args, ..
            } => {
                let num_args = args.len();
                self.emit_invoke_static_or_direct(iidx, *method_idx, num_args)
            }
            InstKind::InvokeVirtual { vtable_index, .. } => {
                self.emit_invoke_virtual(iidx, *vtable_index)
            }
            InstKind::UnsafeCasReference { .. } => self.emit_unsafe_cas_reference(iidx),
            InstKind::ParallelMove { moves: batch } => {
                moves::resolve(self, batch);
            }
            InstKind::Phi { .. } => {
                return Err(CompilationError::InternalError(
                    "phi reached the emitter".into(),
                ));
            }
        }
        Ok(())
    }

    /// The second operand for `loc`: a register, an encodable immediate, or
    /// the immediate materialized into `ip`.
    fn op2_from(&mut self, loc: Location) -> Op2 {
        match loc {
            Location::Register(r) => Op2::Reg(r),
            Location::Constant(cidx) => {
                let v = self.g.const_(cidx).low_bits();
                match Op2::imm(v as u32) {
                    Some(op2) => op2,
                    None => {
                        self.asm.mov_imm32(IP, v);
                        Op2::Reg(IP)
                    }
                }
            }
            _ => panic!("no operand2 for {loc:?}"),
        }
    }

    fn maybe_record_implicit_null_check(&mut self, iidx: InstIdx) {
        if self.config.implicit_null_checks && self.g.inst(iidx).can_throw {
            self.record_implicit_check(iidx);
        }
    }

    // Arithmetic and logic.

    fn emit_unary(&mut self, iidx: InstIdx, op: UnOp) {
        let s = self.summary(iidx).clone();
        let ty = self.g.inst(iidx).ty;
        match (op, ty) {
            (UnOp::Neg, Ty::Int) => {
                self.asm
                    .rsb(s.out().reg(), s.in_at(0).reg(), Op2::imm(0).unwrap());
            }
            (UnOp::Neg, Ty::Long) => {
                let (out_lo, out_hi) = (s.out().pair_low(), s.out().pair_high());
                let (in_lo, in_hi) = (s.in_at(0).pair_low(), s.in_at(0).pair_high());
                self.asm.rsbs(out_lo, in_lo, Op2::imm(0).unwrap());
                self.asm.rsc(out_hi, in_hi, Op2::imm(0).unwrap());
            }
            (UnOp::Neg, Ty::Float) => self.asm.vneg_s(s.out().sreg(), s.in_at(0).sreg()),
            (UnOp::Neg, Ty::Double) => self.asm.vneg_d(
                DReg::from_s_pair(s.out().fpu_pair_low(), s.out().fpu_pair_high()),
                DReg::from_s_pair(s.in_at(0).fpu_pair_low(), s.in_at(0).fpu_pair_high()),
            ),
            (UnOp::Not, Ty::Int) => self.asm.mvn(s.out().reg(), Op2::Reg(s.in_at(0).reg())),
            (UnOp::Not, Ty::Long) => {
                self.asm
                    .mvn(s.out().pair_low(), Op2::Reg(s.in_at(0).pair_low()));
                self.asm
                    .mvn(s.out().pair_high(), Op2::Reg(s.in_at(0).pair_high()));
            }
            _ => panic!("bad unary {op:?} on {ty:?}"),
        }
    }

    fn emit_binary(&mut self, iidx: InstIdx, op: BinOp) -> Result<(), CompilationError> {
        let ty = self.g.inst(iidx).ty;
        match op {
            BinOp::Add | BinOp::Sub | BinOp::And | BinOp::Orr | BinOp::Eor => {
                self.emit_data_proc(iidx, op, ty);
            }
            BinOp::Mul => self.emit_mul(iidx, ty),
            BinOp::Div | BinOp::Rem => self.emit_div_rem(iidx, op, ty)?,
            BinOp::Shl | BinOp::Shr | BinOp::UShr => self.emit_shift(iidx, op, ty),
            BinOp::Ror => self.emit_rotate(iidx, ty),
        }
        Ok(())
    }

    fn emit_data_proc(&mut self, iidx: InstIdx, op: BinOp, ty: Ty) {
        let s = self.summary(iidx).clone();
        match ty {
            Ty::Int => {
                let out = s.out().reg();
                let lhs = s.in_at(0).reg();
                let op2 = self.op2_from(s.in_at(1));
                match op {
                    BinOp::Add => self.asm.add(out, lhs, op2),
                    BinOp::Sub => self.asm.sub(out, lhs, op2),
                    BinOp::And => self.asm.and_(out, lhs, op2),
                    BinOp::Orr => self.asm.orr(out, lhs, op2),
                    BinOp::Eor => self.asm.eor(out, lhs, op2),
                    _ => unreachable!(),
                }
            }
            Ty::Long => {
                let (out_lo, out_hi) = (s.out().pair_low(), s.out().pair_high());
                let (l_lo, l_hi) = (s.in_at(0).pair_low(), s.in_at(0).pair_high());
                let (r_lo, r_hi) = (s.in_at(1).pair_low(), s.in_at(1).pair_high());
                match op {
                    BinOp::Add => {
                        self.asm.adds(out_lo, l_lo, Op2::Reg(r_lo));
                        self.asm.adc(out_hi, l_hi, Op2::Reg(r_hi));
                    }
                    BinOp::Sub => {
                        self.asm.subs(out_lo, l_lo, Op2::Reg(r_lo));
                        self.asm.sbc(out_hi, l_hi, Op2::Reg(r_hi));
                    }
                    BinOp::And => {
                        self.asm.and_(out_lo, l_lo, Op2::Reg(r_lo));
                        self.asm.and_(out_hi, l_hi, Op2::Reg(r_hi));
                    }
                    BinOp::Orr => {
                        self.asm.orr(out_lo, l_lo, Op2::Reg(r_lo));
                        self.asm.orr(out_hi, l_hi, Op2::Reg(r_hi));
                    }
                    BinOp::Eor => {
                        self.asm.eor(out_lo, l_lo, Op2::Reg(r_lo));
                        self.asm.eor(out_hi, l_hi, Op2::Reg(r_hi));
                    }
                    _ => unreachable!(),
                }
            }
            Ty::Float => {
                let (out, l, r) = (s.out().sreg(), s.in_at(0).sreg(), s.in_at(1).sreg());
                match op {
                    BinOp::Add => self.asm.vadd_s(out, l, r),
                    BinOp::Sub => self.asm.vsub_s(out, l, r),
                    _ => panic!("bad float op {op:?}"),
                }
            }
            Ty::Double => {
                let out = DReg::from_s_pair(s.out().fpu_pair_low(), s.out().fpu_pair_high());
                let l = DReg::from_s_pair(s.in_at(0).fpu_pair_low(), s.in_at(0).fpu_pair_high());
                let r = DReg::from_s_pair(s.in_at(1).fpu_pair_low(), s.in_at(1).fpu_pair_high());
                match op {
                    BinOp::Add => self.asm.vadd_d(out, l, r),
                    BinOp::Sub => self.asm.vsub_d(out, l, r),
                    _ => panic!("bad double op {op:?}"),
                }
            }
            _ => panic!("bad data-processing type {ty:?}"),
        }
    }

    fn emit_mul(&mut self, iidx: InstIdx, ty: Ty) {
        let s = self.summary(iidx).clone();
        match ty {
            Ty::Int => {
                self.asm
                    .mul(s.out().reg(), s.in_at(0).reg(), s.in_at(1).reg());
            }
            Ty::Long => {
                let (out_lo, out_hi) = (s.out().pair_low(), s.out().pair_high());
                let (l_lo, l_hi) = (s.in_at(0).pair_low(), s.in_at(0).pair_high());
                let (r_lo, r_hi) = (s.in_at(1).pair_low(), s.in_at(1).pair_high());
                // out_hi = l_lo*r_hi + l_hi*r_lo + high(l_lo*r_lo)
                self.asm.mul(IP, r_hi, l_lo);
                self.asm.mla(out_hi, r_lo, l_hi, IP);
                self.asm.umull(out_lo, IP, l_lo, r_lo);
                self.asm.add(out_hi, out_hi, Op2::Reg(IP));
            }
            Ty::Float => self
                .asm
                .vmul_s(s.out().sreg(), s.in_at(0).sreg(), s.in_at(1).sreg()),
            Ty::Double => self.asm.vmul_d(
                DReg::from_s_pair(s.out().fpu_pair_low(), s.out().fpu_pair_high()),
                DReg::from_s_pair(s.in_at(0).fpu_pair_low(), s.in_at(0).fpu_pair_high()),
                DReg::from_s_pair(s.in_at(1).fpu_pair_low(), s.in_at(1).fpu_pair_high()),
            ),
            _ => panic!("bad mul type {ty:?}"),
        }
    }

    fn emit_div_rem(&mut self, iidx: InstIdx, op: BinOp, ty: Ty) -> Result<(), CompilationError> {
        let s = self.summary(iidx).clone();
        match ty {
            Ty::Int => {
                if let Location::Constant(cidx) = s.in_at(1) {
                    let imm = match self.g.const_(cidx) {
                        crate::ir::Const::Int(v) => *v,
                        c => panic!("bad divisor constant {c:?}"),
                    };
                    self.emit_div_rem_constant(&s, op, imm);
                } else if self.config.has_idiv {
                    let out = s.out().reg();
                    let lhs = s.in_at(0).reg();
                    let rhs = s.in_at(1).reg();
                    if op == BinOp::Div {
                        self.asm.sdiv(out, lhs, rhs);
                    } else {
                        let temp = s.temp(0).reg();
                        self.asm.sdiv(temp, lhs, rhs);
                        self.asm.mls(out, temp, rhs, lhs);
                    }
                } else {
                    self.invoke_runtime(Entrypoint::Idivmod, iidx);
                }
            }
            Ty::Long => {
                let entry = if op == BinOp::Div {
                    Entrypoint::Ldiv
                } else {
                    Entrypoint::Lrem
                };
                self.invoke_runtime(entry, iidx);
            }
            Ty::Float => {
                if op == BinOp::Div {
                    self.asm
                        .vdiv_s(s.out().sreg(), s.in_at(0).sreg(), s.in_at(1).sreg());
                } else {
                    self.invoke_runtime(Entrypoint::Fmodf, iidx);
                }
            }
            Ty::Double => {
                if op == BinOp::Div {
                    self.asm.vdiv_d(
                        DReg::from_s_pair(s.out().fpu_pair_low(), s.out().fpu_pair_high()),
                        DReg::from_s_pair(s.in_at(0).fpu_pair_low(), s.in_at(0).fpu_pair_high()),
                        DReg::from_s_pair(s.in_at(1).fpu_pair_low(), s.in_at(1).fpu_pair_high()),
                    );
                } else {
                    self.invoke_runtime(Entrypoint::Fmod, iidx);
                }
            }
            _ => {
                return Err(CompilationError::General(format!(
                    "bad division type {ty:?}"
                )))
            }
        }
        Ok(())
    }

    /// Division or remainder by a compile-time constant; never uses a
    /// hardware divide.
    fn emit_div_rem_constant(&mut self, s: &LocationSummary, op: BinOp, imm: i32) {
        match imm {
            // A preceding zero check throws before this point; emit nothing.
            0 => (),
            1 | -1 => self.emit_div_rem_one_or_minus_one(s, op, imm),
            _ if imm.unsigned_abs().is_power_of_two() => {
                self.emit_div_rem_power_of_two(s, op, imm)
            }
            _ => self.emit_div_rem_any_constant(s, op, imm),
        }
    }

    fn emit_div_rem_one_or_minus_one(&mut self, s: &LocationSummary, op: BinOp, imm: i32) {
        let out = s.out().reg();
        let dividend = s.in_at(0).reg();
        if op == BinOp::Rem {
            self.asm.mov_imm8(Cond::Al, out, 0);
        } else if imm == 1 {
            if out != dividend {
                self.asm.mov(out, dividend);
            }
        } else {
            self.asm.rsb(out, dividend, Op2::imm(0).unwrap());
        }
    }

    fn emit_div_rem_power_of_two(&mut self, s: &LocationSummary, op: BinOp, imm: i32) {
        let out = s.out().reg();
        let dividend = s.in_at(0).reg();
        let temp = s.temp(0).reg();
        let abs_imm = imm.unsigned_abs();
        let ctz = abs_imm.trailing_zeros();

        // Round negative dividends toward zero by adding (abs_imm - 1),
        // derived branch-free from the sign bits.
        if ctz == 1 {
            self.asm.lsr(temp, dividend, 32 - ctz);
        } else {
            self.asm.asr(temp, dividend, 31);
            self.asm.lsr(temp, temp, 32 - ctz);
        }
        self.asm.add(out, temp, Op2::Reg(dividend));

        if op == BinOp::Div {
            self.asm.asr(out, out, ctz);
            if imm < 0 {
                self.asm.rsb(out, out, Op2::imm(0).unwrap());
            }
        } else {
            self.asm.ubfx(out, out, 0, ctz);
            self.asm.sub(out, out, Op2::Reg(temp));
        }
    }

    fn emit_div_rem_any_constant(&mut self, s: &LocationSummary, op: BinOp, imm: i32) {
        let out = s.out().reg();
        let dividend = s.in_at(0).reg();
        let temp1 = s.temp(0).reg();
        let temp2 = s.temp(1).reg();

        let (magic, shift) = magic_and_shift_for_div_rem(i64::from(imm), false);
        let magic = magic as i32;

        self.asm.mov_imm32(temp1, magic);
        self.asm.smull(temp2, temp1, dividend, temp1);

        if imm > 0 && magic < 0 {
            self.asm.add(temp1, temp1, Op2::Reg(dividend));
        } else if imm < 0 && magic > 0 {
            self.asm.sub(temp1, temp1, Op2::Reg(dividend));
        }

        if shift != 0 {
            self.asm.asr(temp1, temp1, shift);
        }

        if op == BinOp::Div {
            self.asm
                .sub(out, temp1, Op2::RegShiftImm(temp1, Shift::Asr, 31));
        } else {
            self.asm
                .sub(temp1, temp1, Op2::RegShiftImm(temp1, Shift::Asr, 31));
            self.asm.mov_imm32(temp2, imm);
            self.asm.mls(out, temp1, temp2, dividend);
        }
    }

    fn emit_shift(&mut self, iidx: InstIdx, op: BinOp, ty: Ty) {
        let s = self.summary(iidx).clone();
        let shift_kind = match op {
            BinOp::Shl => Shift::Lsl,
            BinOp::Shr => Shift::Asr,
            BinOp::UShr => Shift::Lsr,
            _ => unreachable!(),
        };
        match ty {
            Ty::Int => {
                let out = s.out().reg();
                let lhs = s.in_at(0).reg();
                match s.in_at(1) {
                    Location::Constant(cidx) => {
                        let amount = (self.g.const_(cidx).low_bits() as u32) & 31;
                        if amount == 0 {
                            if out != lhs {
                                self.asm.mov(out, lhs);
                            }
                        } else {
                            match shift_kind {
                                Shift::Lsl => self.asm.lsl(out, lhs, amount),
                                Shift::Asr => self.asm.asr(out, lhs, amount),
                                Shift::Lsr => self.asm.lsr(out, lhs, amount),
                                Shift::Ror => unreachable!(),
                            }
                        }
                    }
                    rhs => {
                        // The ISA only honours the low byte of a register
                        // amount; the guest semantics want modulo 32.
                        self.asm.and_(IP, rhs.reg(), Op2::imm(31).unwrap());
                        self.asm.shift_reg(shift_kind, out, lhs, IP);
                    }
                }
            }
            Ty::Long => match s.in_at(1) {
                Location::Constant(cidx) => {
                    let amount = (self.g.const_(cidx).low_bits() as u32) & 63;
                    self.emit_long_shift_constant(&s, shift_kind, amount);
                }
                rhs => self.emit_long_shift_register(&s, shift_kind, rhs.reg()),
            },
            _ => panic!("bad shift type {ty:?}"),
        }
    }

    fn emit_long_shift_constant(&mut self, s: &LocationSummary, kind: Shift, amount: u32) {
        let (out_lo, out_hi) = (s.out().pair_low(), s.out().pair_high());
        let (in_lo, in_hi) = (s.in_at(0).pair_low(), s.in_at(0).pair_high());
        match kind {
            Shift::Lsl => {
                if amount == 0 {
                    self.move_64(s.out(), s.in_at(0));
                } else if amount < 32 {
                    self.asm.lsl(out_hi, in_hi, amount);
                    self.asm
                        .orr(out_hi, out_hi, Op2::RegShiftImm(in_lo, Shift::Lsr, 32 - amount));
                    self.asm.lsl(out_lo, in_lo, amount);
                } else if amount == 32 {
                    self.asm.mov(out_hi, in_lo);
                    self.asm.mov_imm8(Cond::Al, out_lo, 0);
                } else {
                    self.asm.lsl(out_hi, in_lo, amount - 32);
                    self.asm.mov_imm8(Cond::Al, out_lo, 0);
                }
            }
            Shift::Asr => {
                if amount == 0 {
                    self.move_64(s.out(), s.in_at(0));
                } else if amount < 32 {
                    self.asm.lsr(out_lo, in_lo, amount);
                    self.asm
                        .orr(out_lo, out_lo, Op2::RegShiftImm(in_hi, Shift::Lsl, 32 - amount));
                    self.asm.asr(out_hi, in_hi, amount);
                } else if amount == 32 {
                    self.asm.mov(out_lo, in_hi);
                    self.asm.asr(out_hi, in_hi, 31);
                } else {
                    self.asm.asr(out_lo, in_hi, amount - 32);
                    self.asm.asr(out_hi, in_hi, 31);
                }
            }
            Shift::Lsr => {
                if amount == 0 {
                    self.move_64(s.out(), s.in_at(0));
                } else if amount < 32 {
                    self.asm.lsr(out_lo, in_lo, amount);
                    self.asm
                        .orr(out_lo, out_lo, Op2::RegShiftImm(in_hi, Shift::Lsl, 32 - amount));
                    self.asm.lsr(out_hi, in_hi, amount);
                } else if amount == 32 {
                    self.asm.mov(out_lo, in_hi);
                    self.asm.mov_imm8(Cond::Al, out_hi, 0);
                } else {
                    self.asm.lsr(out_lo, in_hi, amount - 32);
                    self.asm.mov_imm8(Cond::Al, out_hi, 0);
                }
            }
            Shift::Ror => unreachable!(),
        }
    }

    /// A wide shift by a register amount: two half-width shifts joined by an
    /// or, plus a predicated correction for amounts past the word size. The
    /// output pair overlaps no input.
    fn emit_long_shift_register(&mut self, s: &LocationSummary, kind: Shift, amount: CoreReg) {
        let (out_lo, out_hi) = (s.out().pair_low(), s.out().pair_high());
        let (in_lo, in_hi) = (s.in_at(0).pair_low(), s.in_at(0).pair_high());
        let t = s.temp(0).reg();
        self.asm.and_(t, amount, Op2::imm(63).unwrap());
        match kind {
            Shift::Lsl => {
                self.asm.shift_reg(Shift::Lsl, out_hi, in_hi, t);
                self.asm.rsb(IP, t, Op2::imm(32).unwrap());
                self.asm
                    .orr(out_hi, out_hi, Op2::RegShiftReg(in_lo, Shift::Lsr, IP));
                self.asm.subs(IP, t, Op2::imm(32).unwrap());
                self.asm.shift_reg_cond(Cond::Pl, Shift::Lsl, out_hi, in_lo, IP);
                self.asm.shift_reg(Shift::Lsl, out_lo, in_lo, t);
            }
            Shift::Asr => {
                self.asm.shift_reg(Shift::Lsr, out_lo, in_lo, t);
                self.asm.rsb(IP, t, Op2::imm(32).unwrap());
                self.asm
                    .orr(out_lo, out_lo, Op2::RegShiftReg(in_hi, Shift::Lsl, IP));
                self.asm.subs(IP, t, Op2::imm(32).unwrap());
                self.asm.shift_reg_cond(Cond::Pl, Shift::Asr, out_lo, in_hi, IP);
                self.asm.shift_reg(Shift::Asr, out_hi, in_hi, t);
            }
            Shift::Lsr => {
                self.asm.shift_reg(Shift::Lsr, out_lo, in_lo, t);
                self.asm.rsb(IP, t, Op2::imm(32).unwrap());
                self.asm
                    .orr(out_lo, out_lo, Op2::RegShiftReg(in_hi, Shift::Lsl, IP));
                self.asm.subs(IP, t, Op2::imm(32).unwrap());
                self.asm.shift_reg_cond(Cond::Pl, Shift::Lsr, out_lo, in_hi, IP);
                self.asm.shift_reg(Shift::Lsr, out_hi, in_hi, t);
            }
            Shift::Ror => unreachable!(),
        }
    }

    fn emit_rotate(&mut self, iidx: InstIdx, ty: Ty) {
        let s = self.summary(iidx).clone();
        match ty {
            Ty::Int => {
                let out = s.out().reg();
                let lhs = s.in_at(0).reg();
                match s.in_at(1) {
                    Location::Constant(cidx) => {
                        let amount = (self.g.const_(cidx).low_bits() as u32) & 31;
                        if amount == 0 {
                            if out != lhs {
                                self.asm.mov(out, lhs);
                            }
                        } else {
                            self.asm.ror(out, lhs, amount);
                        }
                    }
                    // Register rotates are inherently modulo the word size.
                    rhs => self.asm.shift_reg(Shift::Ror, out, lhs, rhs.reg()),
                }
            }
            Ty::Long => {
                let (out_lo, out_hi) = (s.out().pair_low(), s.out().pair_high());
                let (in_lo, in_hi) = (s.in_at(0).pair_low(), s.in_at(0).pair_high());
                match s.in_at(1) {
                    Location::Constant(cidx) => {
                        let rot = (self.g.const_(cidx).low_bits() as u32) & 63;
                        if rot == 0 {
                            self.move_64(s.out(), s.in_at(0));
                            return;
                        }
                        // Select source halves so the remaining rotation is
                        // within one word.
                        let (src_lo, src_hi, r) = if rot < 32 {
                            (in_lo, in_hi, rot)
                        } else {
                            (in_hi, in_lo, rot - 32)
                        };
                        if r == 0 {
                            self.asm.mov(out_lo, src_lo);
                            self.asm.mov(out_hi, src_hi);
                        } else {
                            self.asm.lsr(out_lo, src_lo, r);
                            self.asm
                                .orr(out_lo, out_lo, Op2::RegShiftImm(src_hi, Shift::Lsl, 32 - r));
                            self.asm.lsr(out_hi, src_hi, r);
                            self.asm
                                .orr(out_hi, out_hi, Op2::RegShiftImm(src_lo, Shift::Lsl, 32 - r));
                        }
                    }
                    rhs => {
                        let amount = rhs.reg();
                        let t = s.temp(0).reg();
                        self.asm.and_(t, amount, Op2::imm(31).unwrap());
                        self.asm.rsb(IP, t, Op2::imm(32).unwrap());
                        self.asm.shift_reg(Shift::Lsr, out_lo, in_lo, t);
                        self.asm
                            .orr(out_lo, out_lo, Op2::RegShiftReg(in_hi, Shift::Lsl, IP));
                        self.asm.shift_reg(Shift::Lsr, out_hi, in_hi, t);
                        self.asm
                            .orr(out_hi, out_hi, Op2::RegShiftReg(in_lo, Shift::Lsl, IP));
                        // A rotation past the word size swaps the halves.
                        self.asm.tst(amount, Op2::imm(32).unwrap());
                        self.asm.eor_cond(Cond::Ne, out_lo, out_lo, Op2::Reg(out_hi));
                        self.asm.eor_cond(Cond::Ne, out_hi, out_lo, Op2::Reg(out_hi));
                        self.asm.eor_cond(Cond::Ne, out_lo, out_lo, Op2::Reg(out_hi));
                    }
                }
            }
            _ => panic!("bad rotate type {ty:?}"),
        }
    }

    // Comparisons.

    /// Three-way compare producing exactly -1, 0 or 1.
    fn emit_compare(&mut self, iidx: InstIdx, operand_ty: Ty, bias: FpBias) {
        let s = self.summary(iidx).clone();
        let out = s.out().reg();
        let less = self.asm.new_label();
        let greater = self.asm.new_label();
        let done = self.asm.new_label();
        let less_cond;
        match operand_ty {
            Ty::Bool | Ty::Byte | Ty::Char | Ty::Short | Ty::Int => {
                // The move goes first: it must not disturb the flags.
                self.asm.mov_imm8(Cond::Al, out, 0);
                self.asm.cmp(s.in_at(0).reg(), Op2::Reg(s.in_at(1).reg()));
                less_cond = Cond::Lt;
            }
            Ty::Long => {
                self.asm
                    .cmp(s.in_at(0).pair_high(), Op2::Reg(s.in_at(1).pair_high()));
                self.asm.b_cond(Cond::Lt, less);
                self.asm.b_cond(Cond::Gt, greater);
                self.asm.mov_imm8(Cond::Al, out, 0);
                // The high words were equal; the tie-break on the low words
                // is unsigned.
                self.asm
                    .cmp(s.in_at(0).pair_low(), Op2::Reg(s.in_at(1).pair_low()));
                less_cond = Cond::Lo;
            }
            Ty::Float | Ty::Double => {
                self.asm.mov_imm8(Cond::Al, out, 0);
                self.emit_vcmp(&s, operand_ty);
                self.asm.vmrs();
                less_cond = arm_fp_cond(IrCond::Lt, bias);
            }
            _ => panic!("bad compare type {operand_ty:?}"),
        }
        self.asm.b_cond(Cond::Eq, done);
        self.asm.b_cond(less_cond, less);
        self.asm.bind(greater);
        self.asm.mov_imm8(Cond::Al, out, 1);
        self.asm.b(done);
        self.asm.bind(less);
        self.asm.mov_imm32(out, -1);
        self.asm.bind(done);
    }

    fn emit_vcmp(&mut self, s: &LocationSummary, ty: Ty) {
        let rhs = s.in_at(1);
        if ty == Ty::Float {
            if rhs.is_constant() {
                self.asm.vcmp_s_zero(s.in_at(0).sreg());
            } else {
                self.asm.vcmp_s(s.in_at(0).sreg(), rhs.sreg());
            }
        } else {
            let lhs = DReg::from_s_pair(s.in_at(0).fpu_pair_low(), s.in_at(0).fpu_pair_high());
            if rhs.is_constant() {
                self.asm.vcmp_d_zero(lhs);
            } else {
                self.asm
                    .vcmp_d(lhs, DReg::from_s_pair(rhs.fpu_pair_low(), rhs.fpu_pair_high()));
            }
        }
    }

    fn emit_condition(&mut self, iidx: InstIdx, cond: IrCond, operand_ty: Ty) {
        let s = self.summary(iidx).clone();
        let out = s.out().reg();
        match operand_ty {
            Ty::Long => {
                let true_label = self.asm.new_label();
                let false_label = self.asm.new_label();
                let done = self.asm.new_label();
                self.emit_long_compare_branch(&s, cond, true_label, false_label);
                self.asm.bind(true_label);
                self.asm.mov_imm8(Cond::Al, out, 1);
                self.asm.b(done);
                self.asm.bind(false_label);
                self.asm.mov_imm8(Cond::Al, out, 0);
                self.asm.bind(done);
            }
            Ty::Float | Ty::Double => {
                // The FP bias is fixed per operator by the front end; a bare
                // condition uses the gt bias.
                self.emit_vcmp(&s, operand_ty);
                self.asm.vmrs();
                self.asm.mov_imm8(Cond::Al, out, 0);
                self.asm.mov_imm8(arm_fp_cond(cond, FpBias::Gt), out, 1);
            }
            _ => {
                let op2 = self.op2_from(s.in_at(1));
                self.asm.cmp(s.in_at(0).reg(), op2);
                self.asm.mov_imm8(Cond::Al, out, 0);
                self.asm.mov_imm8(arm_cond(cond), out, 1);
            }
        }
    }

    /// Compare two longs and branch: the high words decide strictly, the low
    /// words break ties unsigned.
    fn emit_long_compare_branch(
        &mut self,
        s: &LocationSummary,
        cond: IrCond,
        true_label: LabelIdx,
        false_label: LabelIdx,
    ) {
        let (l_lo, l_hi) = (s.in_at(0).pair_low(), s.in_at(0).pair_high());
        let (r_lo, r_hi) = (s.in_at(1).pair_low(), s.in_at(1).pair_high());
        self.asm.cmp(l_hi, Op2::Reg(r_hi));
        match cond {
            IrCond::Eq => self.asm.b_cond(Cond::Ne, false_label),
            IrCond::Ne => self.asm.b_cond(Cond::Ne, true_label),
            _ => {
                let (high_true, high_false) = match cond {
                    IrCond::Lt | IrCond::Le => (Cond::Lt, Cond::Gt),
                    IrCond::Gt | IrCond::Ge => (Cond::Gt, Cond::Lt),
                    IrCond::B | IrCond::Be => (Cond::Lo, Cond::Hi),
                    IrCond::A | IrCond::Ae => (Cond::Hi, Cond::Lo),
                    IrCond::Eq | IrCond::Ne => unreachable!(),
                };
                self.asm.b_cond(high_true, true_label);
                self.asm.b_cond(high_false, false_label);
            }
        }
        self.asm.cmp(l_lo, Op2::Reg(r_lo));
        self.asm.b_cond(arm_unsigned_cond(cond), true_label);
        self.asm.b(false_label);
    }

    fn emit_if(&mut self, iidx: InstIdx) {
        let s = self.summary(iidx).clone();
        let block = self.g.block(self.current_block);
        let (succ_true, succ_false) = (block.successors()[0], block.successors()[1]);
        self.asm.cmp(s.in_at(0).reg(), Op2::imm(0).unwrap());
        if self.is_next_block(succ_false) {
            let label = self.block_label(succ_true);
            self.asm.b_cond(Cond::Ne, label);
        } else if self.is_next_block(succ_true) {
            let label = self.block_label(succ_false);
            self.asm.b_cond(Cond::Eq, label);
        } else {
            let label = self.block_label(succ_true);
            self.asm.b_cond(Cond::Ne, label);
            let label = self.block_label(succ_false);
            self.asm.b(label);
        }
    }

    // Conversions.

    fn emit_conversion(&mut self, iidx: InstIdx, from: Ty) {
        let to = self.g.inst(iidx).ty;
        let s = self.summary(iidx).clone();
        match (from, to) {
            (Ty::Int, Ty::Long) => {
                let (out_lo, out_hi) = (s.out().pair_low(), s.out().pair_high());
                let input = s.in_at(0).reg();
                self.asm.mov(out_lo, input);
                self.asm.asr(out_hi, input, 31);
            }
            (Ty::Long, Ty::Int) => {
                let input = s.in_at(0).pair_low();
                let out = s.out().reg();
                if out != input {
                    self.asm.mov(out, input);
                }
            }
            (Ty::Int, Ty::Byte) => self.asm.sbfx(s.out().reg(), s.in_at(0).reg(), 0, 8),
            (Ty::Int, Ty::Short) => self.asm.sbfx(s.out().reg(), s.in_at(0).reg(), 0, 16),
            (Ty::Int, Ty::Char) => self.asm.ubfx(s.out().reg(), s.in_at(0).reg(), 0, 16),
            (Ty::Int, Ty::Float) => {
                let out = s.out().sreg();
                self.asm.vmov_sr(out, s.in_at(0).reg());
                self.asm.vcvt_s32_to_f32(out, out);
            }
            (Ty::Int, Ty::Double) => {
                let scratch = SReg::from_code(FPU_SCRATCH.code() * 2);
                self.asm.vmov_sr(scratch, s.in_at(0).reg());
                self.asm.vcvt_s32_to_f64(
                    DReg::from_s_pair(s.out().fpu_pair_low(), s.out().fpu_pair_high()),
                    scratch,
                );
            }
            (Ty::Float, Ty::Int) => {
                let scratch = SReg::from_code(FPU_SCRATCH.code() * 2);
                self.asm.vcvt_f32_to_s32(scratch, s.in_at(0).sreg());
                self.asm.vmov_rs(s.out().reg(), scratch);
            }
            (Ty::Double, Ty::Int) => {
                let scratch = SReg::from_code(FPU_SCRATCH.code() * 2);
                self.asm.vcvt_f64_to_s32(
                    scratch,
                    DReg::from_s_pair(s.in_at(0).fpu_pair_low(), s.in_at(0).fpu_pair_high()),
                );
                self.asm.vmov_rs(s.out().reg(), scratch);
            }
            (Ty::Float, Ty::Double) => self.asm.vcvt_d_s(
                DReg::from_s_pair(s.out().fpu_pair_low(), s.out().fpu_pair_high()),
                s.in_at(0).sreg(),
            ),
            (Ty::Double, Ty::Float) => self.asm.vcvt_s_d(
                s.out().sreg(),
                DReg::from_s_pair(s.in_at(0).fpu_pair_low(), s.in_at(0).fpu_pair_high()),
            ),
            (Ty::Long, Ty::Float) => self.invoke_runtime(Entrypoint::L2f, iidx),
            (Ty::Long, Ty::Double) => self.invoke_runtime(Entrypoint::L2d, iidx),
            (Ty::Float, Ty::Long) => self.invoke_runtime(Entrypoint::F2l, iidx),
            (Ty::Double, Ty::Long) => self.invoke_runtime(Entrypoint::D2l, iidx),
            _ => panic!("unsupported conversion {from:?} -> {to:?}"),
        }
    }

    // Checks.

    fn emit_null_check(&mut self, iidx: InstIdx) {
        let s = self.summary(iidx).clone();
        let obj = s.in_at(0).reg();
        if self.config.implicit_null_checks {
            // Touch the object header; a fault here unwinds to the recorded
            // safepoint.
            self.asm.ldr(IP, obj, 0);
            self.record_implicit_check(iidx);
        } else {
            let entry = self.add_slow_path(SlowPath::new(SlowPathKind::NullCheck, iidx));
            self.asm.cmp(obj, Op2::imm(0).unwrap());
            self.asm.b_cond(Cond::Eq, entry);
            self.bind_last_slow_path_exit();
        }
        if s.out().is_valid() && s.out() != s.in_at(0) {
            self.move_32(s.out(), s.in_at(0));
        }
    }

    fn emit_div_zero_check(&mut self, iidx: InstIdx, ty: Ty) {
        let s = self.summary(iidx).clone();
        let entry = self.add_slow_path(SlowPath::new(SlowPathKind::DivZeroCheck, iidx));
        match s.in_at(0) {
            Location::Constant(cidx) => {
                let c = self.g.const_(cidx);
                if c.low_bits() == 0 && c.high_bits() == 0 {
                    self.asm.b(entry);
                }
            }
            Location::Register(r) => {
                self.asm.cmp(r, Op2::imm(0).unwrap());
                self.asm.b_cond(Cond::Eq, entry);
            }
            Location::RegisterPair(lo, hi) => {
                debug_assert!(ty.is_wide());
                self.asm.orr(IP, lo, Op2::Reg(hi));
                self.asm.cmp(IP, Op2::imm(0).unwrap());
                self.asm.b_cond(Cond::Eq, entry);
            }
            loc => panic!("bad div-zero input {loc:?}"),
        }
        self.bind_last_slow_path_exit();
        if s.out().is_valid() && s.out() != s.in_at(0) {
            if ty.is_wide() {
                self.move_64(s.out(), s.in_at(0));
            } else {
                self.move_32(s.out(), s.in_at(0));
            }
        }
    }

    fn emit_bounds_check(&mut self, iidx: InstIdx) {
        let s = self.summary(iidx).clone();
        let index = s.in_at(0);
        let length = s.in_at(1);
        let entry = self.add_slow_path(SlowPath::new(
            SlowPathKind::BoundsCheck { index, length },
            iidx,
        ));
        match (index, length) {
            (Location::Register(idx), _) => {
                let op2 = self.op2_from(length);
                self.asm.cmp(idx, op2);
                // index >= length, unsigned, also catches negative indexes.
                self.asm.b_cond(Cond::Hs, entry);
            }
            (Location::Constant(cidx), Location::Register(len)) => {
                let idx = self.g.const_(cidx).low_bits();
                let op2 = match Op2::imm(idx as u32) {
                    Some(op2) => op2,
                    None => {
                        self.asm.mov_imm32(IP, idx);
                        Op2::Reg(IP)
                    }
                };
                self.asm.cmp(len, op2);
                self.asm.b_cond(Cond::Ls, entry);
            }
            (Location::Constant(i), Location::Constant(l)) => {
                let idx = self.g.const_(i).low_bits() as u32;
                let len = self.g.const_(l).low_bits() as u32;
                if idx >= len {
                    self.asm.b(entry);
                }
            }
            _ => panic!("bad bounds check inputs {index:?} {length:?}"),
        }
        self.bind_last_slow_path_exit();
        if s.out().is_valid() && s.out() != index {
            self.move_32(s.out(), index);
        }
    }

    fn emit_suspend_check(&mut self, iidx: InstIdx) {
        let entry = self.add_slow_path(SlowPath::new(SlowPathKind::SuspendCheck, iidx));
        self.asm.ldrh(IP, TR, self.config.thread.suspend_flags);
        self.asm.cmp(IP, Op2::imm(0).unwrap());
        self.asm.b_cond(Cond::Ne, entry);
        self.bind_last_slow_path_exit();
    }

    // Field and array accesses.

    fn emit_field_get(&mut self, iidx: InstIdx, offset: u32, volatile: bool) {
        let ty = self.g.inst(iidx).ty;
        let s = self.summary(iidx).clone();
        let obj = s.in_at(0).reg();
        let offset = i32::try_from(offset).unwrap();
        match ty {
            Ty::Ref => {
                let lock_temp = if self.config.read_barrier == ReadBarrierKind::Baker {
                    Some(s.temp(0).reg())
                } else {
                    None
                };
                let record = self.config.implicit_null_checks && self.g.inst(iidx).can_throw;
                readbarrier::field_load(self, iidx, s.out(), obj, offset, lock_temp, record);
            }
            Ty::Bool => {
                self.asm.ldrb(s.out().reg(), obj, offset);
                self.maybe_record_implicit_null_check(iidx);
            }
            Ty::Byte => {
                self.asm.ldrsb(s.out().reg(), obj, offset);
                self.maybe_record_implicit_null_check(iidx);
            }
            Ty::Char => {
                self.asm.ldrh(s.out().reg(), obj, offset);
                self.maybe_record_implicit_null_check(iidx);
            }
            Ty::Short => {
                self.asm.ldrsh(s.out().reg(), obj, offset);
                self.maybe_record_implicit_null_check(iidx);
            }
            Ty::Int => {
                self.asm.ldr(s.out().reg(), obj, offset);
                self.maybe_record_implicit_null_check(iidx);
            }
            Ty::Long => {
                self.load_pair(s.out().pair_low(), s.out().pair_high(), obj, offset);
                self.maybe_record_implicit_null_check(iidx);
            }
            Ty::Float => {
                self.asm.vldr_s(s.out().sreg(), obj, offset);
                self.maybe_record_implicit_null_check(iidx);
            }
            Ty::Double => {
                self.asm.vldr_d(
                    DReg::from_s_pair(s.out().fpu_pair_low(), s.out().fpu_pair_high()),
                    obj,
                    offset,
                );
                self.maybe_record_implicit_null_check(iidx);
            }
            Ty::Void => panic!("void field"),
        }
        if volatile {
            // Load-acquire.
            self.asm.dmb(Barrier::Ish);
        }
    }

    fn emit_field_set(
        &mut self,
        iidx: InstIdx,
        offset: u32,
        volatile: bool,
        value_ty: Ty,
        value_can_be_null: bool,
    ) {
        let s = self.summary(iidx).clone();
        let obj = s.in_at(0).reg();
        let value = s.in_at(1);
        let offset = i32::try_from(offset).unwrap();
        if volatile {
            // Store-release.
            self.asm.dmb(Barrier::Ish);
        }
        match value_ty {
            Ty::Bool | Ty::Byte => {
                self.asm.strb(value.reg(), obj, offset);
            }
            Ty::Char | Ty::Short => {
                self.asm.strh(value.reg(), obj, offset);
            }
            Ty::Int | Ty::Ref => {
                self.asm.str(value.reg(), obj, offset);
            }
            Ty::Long => {
                self.store_pair(value.pair_low(), value.pair_high(), obj, offset);
            }
            Ty::Float => {
                self.asm.vstr_s(value.sreg(), obj, offset);
            }
            Ty::Double => {
                self.asm.vstr_d(
                    DReg::from_s_pair(value.fpu_pair_low(), value.fpu_pair_high()),
                    obj,
                    offset,
                );
            }
            Ty::Void => panic!("void store"),
        }
        self.maybe_record_implicit_null_check(iidx);
        if value_ty == Ty::Ref {
            let card = s.temp(0).reg();
            let temp = s.temp(1).reg();
            self.mark_gc_card(card, temp, obj, value.reg(), value_can_be_null);
        }
        if volatile {
            self.asm.dmb(Barrier::Ish);
        }
    }

    fn emit_array_get(&mut self, iidx: InstIdx) {
        let ty = self.g.inst(iidx).ty;
        let s = self.summary(iidx).clone();
        let array = s.in_at(0).reg();
        let index = s.in_at(1);
        let data = self.config.object.array_data;
        let shift = match ty.size() {
            1 => 0,
            2 => 1,
            4 => 2,
            8 => 3,
            _ => panic!("bad element size"),
        };

        if ty == Ty::Ref {
            let record = self.config.implicit_null_checks && self.g.inst(iidx).can_throw;
            match index {
                Location::Register(idx) => {
                    let lock_temp = if self.config.read_barrier == ReadBarrierKind::Baker {
                        Some(s.temp(0).reg())
                    } else {
                        None
                    };
                    readbarrier::array_load(self, iidx, s.out(), array, idx, lock_temp, record);
                }
                Location::Constant(cidx) => {
                    let idx = self.g.const_(cidx).low_bits();
                    let offset = data + (idx << 2);
                    let lock_temp = if self.config.read_barrier == ReadBarrierKind::Baker {
                        Some(s.temp(0).reg())
                    } else {
                        None
                    };
                    readbarrier::field_load(self, iidx, s.out(), array, offset, lock_temp, record);
                }
                loc => panic!("bad array index {loc:?}"),
            }
            return;
        }

        // Fold a constant index into the offset; otherwise form the scaled
        // address in ip first.
        let (base, offset) = match index {
            Location::Constant(cidx) => {
                let idx = self.g.const_(cidx).low_bits();
                (array, data + (idx << shift))
            }
            Location::Register(idx) => {
                self.asm
                    .add(IP, array, Op2::RegShiftImm(idx, Shift::Lsl, shift));
                (IP, data)
            }
            loc => panic!("bad array index {loc:?}"),
        };
        match ty {
            Ty::Bool => self.asm.ldrb(s.out().reg(), base, offset),
            Ty::Byte => self.asm.ldrsb(s.out().reg(), base, offset),
            Ty::Char => self.asm.ldrh(s.out().reg(), base, offset),
            Ty::Short => self.asm.ldrsh(s.out().reg(), base, offset),
            Ty::Int => self.asm.ldr(s.out().reg(), base, offset),
            Ty::Long => {
                self.load_pair(s.out().pair_low(), s.out().pair_high(), base, offset)
            }
            Ty::Float => self.asm.vldr_s(s.out().sreg(), base, offset),
            Ty::Double => self.asm.vldr_d(
                DReg::from_s_pair(s.out().fpu_pair_low(), s.out().fpu_pair_high()),
                base,
                offset,
            ),
            Ty::Ref | Ty::Void => unreachable!(),
        }
        self.maybe_record_implicit_null_check(iidx);
    }

    fn emit_array_set(&mut self, iidx: InstIdx, value_ty: Ty, value_can_be_null: bool) {
        let s = self.summary(iidx).clone();
        let array = s.in_at(0).reg();
        let index = s.in_at(1);
        let value = s.in_at(2);
        let data = self.config.object.array_data;
        let shift = match value_ty.size() {
            1 => 0,
            2 => 1,
            4 => 2,
            8 => 3,
            _ => panic!("bad element size"),
        };
        let (base, offset) = match index {
            Location::Constant(cidx) => {
                let idx = self.g.const_(cidx).low_bits();
                (array, data + (idx << shift))
            }
            Location::Register(idx) => {
                self.asm
                    .add(IP, array, Op2::RegShiftImm(idx, Shift::Lsl, shift));
                (IP, data)
            }
            loc => panic!("bad array index {loc:?}"),
        };
        match value_ty {
            Ty::Bool | Ty::Byte => self.asm.strb(value.reg(), base, offset),
            Ty::Char | Ty::Short => self.asm.strh(value.reg(), base, offset),
            Ty::Int | Ty::Ref => self.asm.str(value.reg(), base, offset),
            Ty::Long => self.store_pair(value.pair_low(), value.pair_high(), base, offset),
            Ty::Float => self.asm.vstr_s(value.sreg(), base, offset),
            Ty::Double => self.asm.vstr_d(
                DReg::from_s_pair(value.fpu_pair_low(), value.fpu_pair_high()),
                base,
                offset,
            ),
            Ty::Void => panic!("void store"),
        }
        self.maybe_record_implicit_null_check(iidx);
        if value_ty == Ty::Ref {
            let card = s.temp(0).reg();
            let temp = s.temp(1).reg();
            self.mark_gc_card(card, temp, array, value.reg(), value_can_be_null);
        }
    }

    /// Dirty the card covering `obj` after a reference store.
    fn mark_gc_card(
        &mut self,
        card: CoreReg,
        temp: CoreReg,
        obj: CoreReg,
        value: CoreReg,
        value_can_be_null: bool,
    ) {
        let done = self.asm.new_label();
        if value_can_be_null {
            self.asm.cmp(value, Op2::imm(0).unwrap());
            self.asm.b_cond(Cond::Eq, done);
        }
        self.asm.ldr(card, TR, self.config.thread.card_table);
        self.asm.lsr(temp, obj, CARD_SHIFT);
        // The card-table base's low byte doubles as the dirty value.
        self.asm.strb_reg(card, card, temp, 0);
        self.asm.bind(done);
    }

    // Classes, strings and type checks.

    fn emit_load_class(&mut self, iidx: InstIdx, type_idx: u32, check_clinit: bool) {
        let s = self.summary(iidx).clone();
        let out = s.out();
        let out_reg = out.reg();
        self.emit_pc_relative_address(out_reg, PatchKind::TypeIndex, type_idx);
        readbarrier::gc_root_load(self, iidx, out, out_reg, 0);
        let entry = self.add_slow_path(SlowPath::new(
            SlowPathKind::LoadClass {
                type_idx,
                do_clinit: check_clinit,
                out,
            },
            iidx,
        ));
        self.asm.cmp(out_reg, Op2::imm(0).unwrap());
        self.asm.b_cond(Cond::Eq, entry);
        if check_clinit {
            self.emit_clinit_status_check(out_reg, entry);
        }
        self.bind_last_slow_path_exit();
    }

    fn emit_load_string(&mut self, iidx: InstIdx, string_idx: u32) {
        let s = self.summary(iidx).clone();
        let out = s.out();
        let out_reg = out.reg();
        self.emit_pc_relative_address(out_reg, PatchKind::StringIndex, string_idx);
        readbarrier::gc_root_load(self, iidx, out, out_reg, 0);
        let entry = self.add_slow_path(SlowPath::new(
            SlowPathKind::LoadString { string_idx, out },
            iidx,
        ));
        self.asm.cmp(out_reg, Op2::imm(0).unwrap());
        self.asm.b_cond(Cond::Eq, entry);
        self.bind_last_slow_path_exit();
    }

    /// Compare a class's status word against the visibly-initialized
    /// threshold, branching to `entry` when initialization is still needed.
    fn emit_clinit_status_check(&mut self, class: CoreReg, entry: LabelIdx) {
        self.asm.ldr(IP, class, self.config.object.class_status);
        let threshold = self.config.object.class_status_initialized as u32;
        self.asm.cmp(IP, Op2::imm(threshold).unwrap());
        self.asm.b_cond(Cond::Lt, entry);
        // Initialization may have been completed by another thread; acquire
        // its stores.
        self.asm.dmb(Barrier::Ish);
    }

    fn emit_clinit_check(&mut self, iidx: InstIdx, class: InstIdx) -> Result<(), CompilationError> {
        let type_idx = match self.g.inst(class).kind {
            InstKind::LoadClass { type_idx, .. } => type_idx,
            _ => {
                return Err(CompilationError::General(
                    "clinit check input is not a class load".into(),
                ))
            }
        };
        let s = self.summary(iidx).clone();
        let class_reg = s.in_at(0).reg();
        let entry = self.add_slow_path(SlowPath::new(
            SlowPathKind::LoadClass {
                type_idx,
                do_clinit: true,
                out: Location::Invalid,
            },
            iidx,
        ));
        self.emit_clinit_status_check(class_reg, entry);
        self.bind_last_slow_path_exit();
        Ok(())
    }

    fn emit_check_cast(&mut self, iidx: InstIdx) {
        let s = self.summary(iidx).clone();
        let obj = s.in_at(0).reg();
        let class = s.in_at(1).reg();
        let temp = s.temp(0).reg();
        let fatal = !self.g.inst(iidx).throws_into_catch;
        let entry = self.add_slow_path(SlowPath::new(
            SlowPathKind::TypeCheck {
                fatal,
                object: s.in_at(0),
                class: s.in_at(1),
            },
            iidx,
        ));
        let done = self.last_slow_path_exit();
        // Null passes every cast.
        self.asm.cmp(obj, Op2::imm(0).unwrap());
        self.asm.b_cond(Cond::Eq, done);
        self.asm.ldr(temp, obj, self.config.object.class);
        let loop_label = self.asm.new_label();
        self.asm.bind(loop_label);
        self.asm.cmp(temp, Op2::Reg(class));
        self.asm.b_cond(Cond::Eq, done);
        self.asm.ldr(temp, temp, self.config.object.super_class);
        self.asm.cmp(temp, Op2::imm(0).unwrap());
        self.asm.b_cond(Cond::Ne, loop_label);
        // The chain ended without a match: definite failure.
        self.asm.b(entry);
        self.bind_last_slow_path_exit();
    }

    fn emit_instance_of(&mut self, iidx: InstIdx) {
        let s = self.summary(iidx).clone();
        let obj = s.in_at(0).reg();
        let class = s.in_at(1).reg();
        let temp = s.temp(0).reg();
        let out = s.out().reg();
        let done = self.asm.new_label();
        let loop_label = self.asm.new_label();
        self.asm.mov_imm8(Cond::Al, out, 0);
        self.asm.cmp(obj, Op2::imm(0).unwrap());
        self.asm.b_cond(Cond::Eq, done);
        self.asm.ldr(temp, obj, self.config.object.class);
        self.asm.bind(loop_label);
        self.asm.cmp(temp, Op2::Reg(class));
        self.asm.mov_imm8(Cond::Eq, out, 1);
        self.asm.b_cond(Cond::Eq, done);
        self.asm.ldr(temp, temp, self.config.object.super_class);
        self.asm.cmp(temp, Op2::imm(0).unwrap());
        self.asm.b_cond(Cond::Ne, loop_label);
        self.asm.bind(done);
    }

    // Calls.

    fn emit_invoke_static_or_direct(&mut self, iidx: InstIdx, method_idx: u32, num_args: usize) {
        let s = self.summary(iidx).clone();
        let current_method = s.in_at(num_args).reg();
        let callee = s.temp(0).reg();
        // callee = current_method->resolved_methods_[method_idx]
        self.asm.ldr(
            callee,
            current_method,
            self.config.method.dex_cache_methods,
        );
        self.load_word(
            callee,
            callee,
            i32::try_from(method_idx * 4).unwrap(),
        );
        self.asm.ldr(CoreReg::Lr, callee, self.config.method.entrypoint);
        self.asm.blx(CoreReg::Lr);
        self.record_pc_info(iidx);
    }

    fn emit_invoke_virtual(&mut self, iidx: InstIdx, vtable_index: u32) {
        let s = self.summary(iidx).clone();
        let receiver = s.in_at(0).reg();
        let callee = s.temp(0).reg();
        self.asm.ldr(callee, receiver, self.config.object.class);
        self.maybe_record_implicit_null_check(iidx);
        self.load_word(
            callee,
            callee,
            self.config.object.vtable + i32::try_from(vtable_index * 4).unwrap(),
        );
        self.asm.ldr(CoreReg::Lr, callee, self.config.method.entrypoint);
        self.asm.blx(CoreReg::Lr);
        self.record_pc_info(iidx);
    }

    // Intrinsics.

    fn emit_unsafe_cas_reference(&mut self, iidx: InstIdx) {
        let s = self.summary(iidx).clone();
        let obj = s.in_at(0).reg();
        let offset = s.in_at(1).reg();
        let expected = s.in_at(2).reg();
        let new_value = s.in_at(3).reg();
        let out = s.out().reg();
        let addr = s.temp(0).reg();
        let tmp = s.temp(1).reg();

        // The store below needs its card dirtied whether or not the swap
        // wins the race.
        self.mark_gc_card(addr, tmp, obj, new_value, false);

        self.asm.add(addr, obj, Op2::Reg(offset));
        if self.config.read_barrier == ReadBarrierKind::Baker {
            let expected_temp = s.temp(2);
            let status_temp = s.temp(3);
            readbarrier::cas_field_barrier(
                self,
                iidx,
                obj,
                addr,
                Location::Register(tmp),
                IP,
                expected_temp,
                status_temp,
            );
        }

        self.asm.dmb(Barrier::Ish);
        let retry = self.asm.new_label();
        let fail = self.asm.new_label();
        let done = self.asm.new_label();
        self.asm.bind(retry);
        self.asm.ldrex(tmp, addr);
        self.asm.cmp(tmp, Op2::Reg(expected));
        self.asm.b_cond(Cond::Ne, fail);
        self.asm.strex(tmp, new_value, addr);
        self.asm.cmp(tmp, Op2::imm(1).unwrap());
        self.asm.b_cond(Cond::Eq, retry);
        self.asm.mov_imm8(Cond::Al, out, 1);
        self.asm.b(done);
        self.asm.bind(fail);
        self.asm.mov_imm8(Cond::Al, out, 0);
        self.asm.bind(done);
        self.asm.dmb(Barrier::Ish);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::testing::{allocate_for_test, match_asm};
    use crate::codegen::{build_locations, compile};
    use crate::config::CodegenConfig;
    use crate::ir::{Const, Graph, Inst, InstKind};
    use smallvec::SmallVec;

    /// Build, allocate (with the test filler) and compile `g`, returning the
    /// finished method.
    fn compile_graph(g: &Graph, config: &CodegenConfig) -> crate::codegen::CompiledMethod {
        let mut locations = build_locations(g, config).unwrap();
        allocate_for_test(g, &mut locations);
        compile(g, &mut locations, config).unwrap()
    }

    fn int_param_graph() -> (Graph, crate::ir::BlockIdx, InstIdx) {
        let mut g = Graph::new(vec![Ty::Int]);
        let b0 = g.add_block();
        let p = g
            .add_inst(b0, Inst::new(InstKind::Parameter { index: 0 }, Ty::Int, 0))
            .unwrap();
        (g, b0, p)
    }

    fn ret(g: &mut Graph, b0: crate::ir::BlockIdx, value: InstIdx) {
        g.add_inst(
            b0,
            Inst::new(InstKind::Return { value: Some(value) }, Ty::Void, 9),
        )
        .unwrap();
    }

    #[test]
    fn rem_by_constant_uses_magic_multiply() {
        let (mut g, b0, p) = int_param_graph();
        let c7 = g.add_const(Const::Int(7));
        let seven = g
            .add_inst(b0, Inst::new(InstKind::Constant(c7), Ty::Int, 1))
            .unwrap();
        let rem = g
            .add_inst(
                b0,
                Inst::new(
                    InstKind::Binary {
                        op: BinOp::Rem,
                        lhs: p,
                        rhs: seven,
                    },
                    Ty::Int,
                    2,
                ),
            )
            .unwrap();
        ret(&mut g, b0, rem);

        let cm = compile_graph(&g, &CodegenConfig::default());
        // 0x92492493 is the published magic constant for division by 7.
        match_asm(
            &cm.listing,
            "...
movw r4, #9363
movt r4, #37449
smull r5, r4, r1, r4
add r4, r4, r1
asr r4, r4, #2
sub r4, r4, r4, asr #31
mov r5, #7
mls r8, r4, r5, r1
...",
        );
        // No hardware division anywhere in the main line.
        assert!(!cm.listing.contains("sdiv"));
    }

    #[test]
    fn div_by_constant_power_of_two() {
        let (mut g, b0, p) = int_param_graph();
        let c = g.add_const(Const::Int(8));
        let eight = g
            .add_inst(b0, Inst::new(InstKind::Constant(c), Ty::Int, 1))
            .unwrap();
        let div = g
            .add_inst(
                b0,
                Inst::new(
                    InstKind::Binary {
                        op: BinOp::Div,
                        lhs: p,
                        rhs: eight,
                    },
                    Ty::Int,
                    2,
                ),
            )
            .unwrap();
        ret(&mut g, b0, div);

        let cm = compile_graph(&g, &CodegenConfig::default());
        match_asm(
            &cm.listing,
            "...
asr r4, r1, #31
lsr r4, r4, #29
add r5, r4, r1
asr r5, r5, #3
...",
        );
        assert!(!cm.listing.contains("sdiv"));
    }

    #[test]
    fn div_without_idiv_calls_runtime() {
        let mut g = Graph::new(vec![Ty::Int, Ty::Int]);
        let b0 = g.add_block();
        let p0 = g
            .add_inst(b0, Inst::new(InstKind::Parameter { index: 0 }, Ty::Int, 0))
            .unwrap();
        let p1 = g
            .add_inst(b0, Inst::new(InstKind::Parameter { index: 1 }, Ty::Int, 0))
            .unwrap();
        let div = g
            .add_inst(
                b0,
                Inst::new(
                    InstKind::Binary {
                        op: BinOp::Div,
                        lhs: p0,
                        rhs: p1,
                    },
                    Ty::Int,
                    1,
                ),
            )
            .unwrap();
        ret(&mut g, b0, div);

        let config = CodegenConfig {
            has_idiv: false,
            ..CodegenConfig::default()
        };
        let cm = compile_graph(&g, &config);
        match_asm(
            &cm.listing,
            "...
; call Idivmod
ldr lr, [r9, #204]
blx lr
...",
        );
    }

    #[test]
    fn baker_field_get_orders_loads_and_marks() {
        let mut g = Graph::new(vec![Ty::Ref]);
        let b0 = g.add_block();
        let obj = g
            .add_inst(b0, Inst::new(InstKind::Parameter { index: 0 }, Ty::Ref, 0))
            .unwrap();
        let get = g
            .add_inst(
                b0,
                Inst::new(
                    InstKind::FieldGet {
                        object: obj,
                        offset: 16,
                        volatile: false,
                    },
                    Ty::Ref,
                    1,
                )
                .can_throw(),
            )
            .unwrap();
        ret(&mut g, b0, get);

        let cm = compile_graph(&g, &CodegenConfig::default());
        // Lock word first, data-dependent base, then the reference load; the
        // gray bit lands in the carry flag.
        match_asm(
            &cm.listing,
            "...
; baker read barrier fast path
ldr r4, [r1, #4]
add r1, r1, r4, lsr #32
ldr r5, [r1, #16]
lsrs r4, r4, #29
bhs l1
l2:
...
; slow path: read barrier mark
l1:
ldr lr, [r9, #580]
blx lr
b l2
...",
        );
    }

    #[test]
    fn explicit_null_check_branches_to_slow_path() {
        let mut g = Graph::new(vec![Ty::Ref]);
        let b0 = g.add_block();
        let obj = g
            .add_inst(b0, Inst::new(InstKind::Parameter { index: 0 }, Ty::Ref, 0))
            .unwrap();
        let check = g
            .add_inst(
                b0,
                Inst::new(InstKind::NullCheck { input: obj }, Ty::Ref, 1).can_throw(),
            )
            .unwrap();
        ret(&mut g, b0, check);

        let config = CodegenConfig {
            implicit_null_checks: false,
            ..CodegenConfig::default()
        };
        let cm = compile_graph(&g, &config);
        match_asm(
            &cm.listing,
            "...
cmp r1, #0
beq l1
l2:
...
; slow path: null check
l1:
; call ThrowNullPointer
ldr lr, [r9, #160]
blx lr",
        );
        // A fatal path never branches back.
        let after = cm.listing.split("; slow path").nth(1).unwrap();
        assert!(!after.contains("b l2"));
    }

    #[test]
    fn implicit_null_check_records_safepoint_at_load() {
        let mut g = Graph::new(vec![Ty::Ref]);
        let b0 = g.add_block();
        let obj = g
            .add_inst(b0, Inst::new(InstKind::Parameter { index: 0 }, Ty::Ref, 0))
            .unwrap();
        let len = g
            .add_inst(
                b0,
                Inst::new(InstKind::ArrayLength { array: obj }, Ty::Int, 7).can_throw(),
            )
            .unwrap();
        ret(&mut g, b0, len);

        let cm = compile_graph(&g, &CodegenConfig::default());
        let maps = ternsmp::StackMapParser::parse(&cm.stack_maps).unwrap();
        assert_eq!(maps.records.len(), 1);
        // The record points at the faulting load itself and carries its
        // source pc.
        assert_eq!(maps.records[0].dex_pc, 7);
        let pc = usize::try_from(maps.records[0].native_pc).unwrap();
        let insn = u32::from_le_bytes(cm.code[pc..pc + 4].try_into().unwrap());
        // An ldr of the length field: bits 27..20 = 0101_1001, offset 8.
        assert_eq!(insn & 0x0FF0_0FFF, 0x0590_0008);
    }

    #[test]
    fn suspend_check_polls_thread_flags() {
        let mut g = Graph::new(vec![]);
        let b0 = g.add_block();
        g.add_inst(b0, Inst::new(InstKind::SuspendCheck, Ty::Void, 3).needs_env())
            .unwrap();
        g.add_inst(b0, Inst::new(InstKind::Return { value: None }, Ty::Void, 4))
            .unwrap();

        let cm = compile_graph(&g, &CodegenConfig::default());
        match_asm(
            &cm.listing,
            "...
ldrh ip, [r9]
cmp ip, #0
bne l1
l2:
...
; slow path: suspend check
l1:
; call TestSuspend
ldr lr, [r9, #180]
blx lr
b l2",
        );
    }

    #[test]
    fn long_shift_by_register_corrects_past_word_size() {
        let mut g = Graph::new(vec![Ty::Long, Ty::Int]);
        let b0 = g.add_block();
        let v = g
            .add_inst(b0, Inst::new(InstKind::Parameter { index: 0 }, Ty::Long, 0))
            .unwrap();
        let amt = g
            .add_inst(b0, Inst::new(InstKind::Parameter { index: 1 }, Ty::Int, 0))
            .unwrap();
        let shl = g
            .add_inst(
                b0,
                Inst::new(
                    InstKind::Binary {
                        op: BinOp::Shl,
                        lhs: v,
                        rhs: amt,
                    },
                    Ty::Long,
                    1,
                ),
            )
            .unwrap();
        ret(&mut g, b0, shl);

        let cm = compile_graph(&g, &CodegenConfig::default());
        // The long arrives in r2/r3; the amount parameter lands on the stack
        // and the test filler stands in for the allocator's reload with r5.
        match_asm(
            &cm.listing,
            "...
and r4, r5, #63
lsl r7, r3, r4
rsb ip, r4, #32
orr r7, r7, r2, lsr ip
subs ip, r4, #32
lslpl r7, r2, ip
lsl r6, r2, r4
...",
        );
    }

    #[test]
    fn load_class_emits_patch_and_slow_path() {
        let mut g = Graph::new(vec![]);
        let b0 = g.add_block();
        let cur = g
            .add_inst(b0, Inst::new(InstKind::CurrentMethod, Ty::Ref, 0))
            .unwrap();
        let cls = g
            .add_inst(
                b0,
                Inst::new(
                    InstKind::LoadClass {
                        type_idx: 42,
                        current_method: cur,
                        check_clinit: false,
                    },
                    Ty::Ref,
                    1,
                )
                .can_throw(),
            )
            .unwrap();
        ret(&mut g, b0, cls);

        let cm = compile_graph(&g, &CodegenConfig::default());
        assert_eq!(cm.patches.len(), 1);
        let patch = &cm.patches[0];
        assert_eq!(patch.kind, crate::codegen::PatchKind::TypeIndex);
        assert_eq!(patch.index, 42);
        assert_eq!(patch.movt_offset, patch.movw_offset + 4);
        assert_eq!(patch.add_pc_offset, patch.movt_offset + 4);
        match_asm(
            &cm.listing,
            "...
movw r4, #0
movt r4, #0
add r4, r4, pc
ldr r4, [r4]
...",
        );
    }

    #[test]
    fn invoke_static_records_safepoint() {
        let mut g = Graph::new(vec![]);
        let b0 = g.add_block();
        let cur = g
            .add_inst(b0, Inst::new(InstKind::CurrentMethod, Ty::Ref, 0))
            .unwrap();
        let call = g
            .add_inst(
                b0,
                Inst::new(
                    InstKind::InvokeStaticOrDirect {
                        method_idx: 5,
                        current_method: cur,
                        args: SmallVec::new(),
                    },
                    Ty::Int,
                    6,
                )
                .can_throw()
                .needs_env(),
            )
            .unwrap();
        ret(&mut g, b0, call);

        let cm = compile_graph(&g, &CodegenConfig::default());
        match_asm(
            &cm.listing,
            "...
ldr r0, [r0, #20]
ldr r0, [r0, #20]
ldr lr, [r0, #32]
blx lr
...",
        );
        let maps = ternsmp::StackMapParser::parse(&cm.stack_maps).unwrap();
        assert_eq!(maps.records.len(), 1);
        assert_eq!(maps.records[0].dex_pc, 6);
        assert!(maps.records[0].native_pc > 0);
        assert_eq!(maps.info.frame_size, cm.frame_size);
    }

    #[test]
    fn frame_entry_and_exit_mirror() {
        let mut g = Graph::new(vec![]);
        let b0 = g.add_block();
        g.add_inst(b0, Inst::new(InstKind::Return { value: None }, Ty::Void, 0))
            .unwrap();
        let cm = compile_graph(&g, &CodegenConfig::default());
        match_asm(
            &cm.listing,
            "; prologue
sub ip, sp, #4096
ldr ip, [ip]
push {lr}
sub sp, sp, #12
str r0, [sp]
l0:
; epilogue
add sp, sp, #12
pop {pc}",
        );
    }

    #[test]
    fn three_way_long_compare_breaks_ties_unsigned() {
        let mut g = Graph::new(vec![Ty::Long, Ty::Long]);
        let b0 = g.add_block();
        let a = g
            .add_inst(b0, Inst::new(InstKind::Parameter { index: 0 }, Ty::Long, 0))
            .unwrap();
        let b = g
            .add_inst(b0, Inst::new(InstKind::Parameter { index: 1 }, Ty::Long, 0))
            .unwrap();
        let cmp = g
            .add_inst(
                b0,
                Inst::new(
                    InstKind::Compare {
                        lhs: a,
                        rhs: b,
                        bias: FpBias::Gt,
                    },
                    Ty::Int,
                    1,
                ),
            )
            .unwrap();
        ret(&mut g, b0, cmp);

        let cm = compile_graph(&g, &CodegenConfig::default());
        // High words signed, then low words unsigned (lo), producing
        // exactly -1/0/1.
        match_asm(
            &cm.listing,
            "...
cmp r3, r7
blt l1
bgt l2
mov r4, #0
cmp r2, r6
beq l3
blo l1
l2:
mov r4, #1
b l3
l1:
mvn r4, #0
l3:
...",
        );
    }

    #[test]
    fn slow_path_save_restore_mirror() {
        use crate::codegen::location::RegisterSet;

        let mut g = Graph::new(vec![]);
        let b0 = g.add_block();
        let sc = g
            .add_inst(b0, Inst::new(InstKind::SuspendCheck, Ty::Void, 2).needs_env())
            .unwrap();
        g.add_inst(b0, Inst::new(InstKind::Return { value: None }, Ty::Void, 3))
            .unwrap();

        let config = CodegenConfig::default();
        let mut locations = build_locations(&g, &config).unwrap();
        allocate_for_test(&g, &mut locations);
        // Pretend the allocator found r0-r3 and s0-s2/s5 live across the
        // check, with r1 holding a reference.
        let live = RegisterSet::from_masks(0b1111, 0b10_0111);
        let refs = RegisterSet::from_masks(0b0010, 0);
        locations.get_mut(sc).unwrap().set_live_registers(live, refs);
        let cm = compile(&g, &mut locations, &config).unwrap();

        // Saves: one block store for the four core registers, then the
        // widest safe FPU transfers; restores mirror them at the same
        // offsets.
        match_asm(
            &cm.listing,
            "...
; slow path: suspend check
l1:
add ip, sp, #12
stm ip, {r0, r1, r2, r3}
vstr d0, [sp, #28]
vstr s2, [sp, #36]
vstr s5, [sp, #40]
; call TestSuspend
ldr lr, [r9, #180]
blx lr
add ip, sp, #12
ldm ip, {r0, r1, r2, r3}
vldr d0, [sp, #28]
vldr s2, [sp, #36]
vldr s5, [sp, #40]
b l2",
        );

        // The saved slot of the reference-holding register (r1, second slot
        // of the save area) appears in the safepoint's stack mask.
        let maps = ternsmp::StackMapParser::parse(&cm.stack_maps).unwrap();
        let rec = &maps.records[0];
        assert_eq!(rec.dex_pc, 2);
        assert_eq!(rec.register_mask, 0b0010);
        let bits: Vec<usize> = rec.stack_mask.iter_set_bits(..).collect();
        assert_eq!(bits, vec![(12 + 4) / 4]);
    }

    #[test]
    fn cas_reference_marks_and_updates_field() {
        let mut g = Graph::new(vec![Ty::Ref, Ty::Int, Ty::Ref]);
        let b0 = g.add_block();
        let obj = g
            .add_inst(b0, Inst::new(InstKind::Parameter { index: 0 }, Ty::Ref, 0))
            .unwrap();
        let off = g
            .add_inst(b0, Inst::new(InstKind::Parameter { index: 1 }, Ty::Int, 0))
            .unwrap();
        let newv = g
            .add_inst(b0, Inst::new(InstKind::Parameter { index: 2 }, Ty::Ref, 0))
            .unwrap();
        let cas = g
            .add_inst(
                b0,
                Inst::new(
                    InstKind::UnsafeCasReference {
                        object: obj,
                        offset: off,
                        expected: newv,
                        new_value: newv,
                    },
                    Ty::Int,
                    4,
                ),
            )
            .unwrap();
        ret(&mut g, b0, cas);

        let cm = compile_graph(&g, &CodegenConfig::default());
        // Fast path: card mark, the barrier on the field, then the exclusive
        // load/store loop.
        match_asm(
            &cm.listing,
            "...
ldr r4, [r9, #136]
lsr r5, r1, #10
strb r4, [r4, r5]
l1:
add r4, r1, r2
; baker read barrier (cas field update)
ldr ip, [r1, #4]
add r4, r4, ip, lsr #32
ldr r5, [r4]
lsrs ip, ip, #29
bhs l2
l3:
dmb ish
l4:
ldrex r5, [r4]
cmp r5, r3
bne l5
strex r5, r3, [r4]
cmp r5, #1
beq l4
mov r11, #1
b l6
l5:
mov r11, #0
l6:
dmb ish
...
; slow path: read barrier mark and update field
l2:
mov r8, r5
ldr lr, [r9, #580]
blx lr
cmp r8, r5
beq l3
l7:
ldrex r10, [r4]
cmp r10, r8
bne l3
strex r10, r5, [r4]
cmp r10, #1
beq l7
b l3",
        );
    }
}
