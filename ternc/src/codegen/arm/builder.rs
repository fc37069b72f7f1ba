//! The location builder: one pass over the graph declaring every
//! instruction's [LocationSummary]. This pass emits no code and makes no
//! allocation decisions; it only states constraints for the external register
//! allocator, pins the locations ABIs dictate, and requests the temporaries
//! the emitter will need.

use crate::codegen::arm::callconv::{Abi, CallingConvention};
use crate::codegen::arm::{CoreReg, METHOD_REG};
use crate::codegen::location::{
    CallKind, Constraint, Location, LocationSummary, Overlap, RegisterSet,
};
use crate::codegen::LocationMap;
use crate::config::{CodegenConfig, ReadBarrierKind};
use crate::ir::{BinOp, Graph, Inst, InstIdx, InstKind, Ty, UnOp};
use crate::CompilationError;

fn requires_register() -> Location {
    Location::Unallocated(Constraint::RequiresRegister)
}

fn requires_fpu() -> Location {
    Location::Unallocated(Constraint::RequiresFpuRegister)
}

fn any() -> Location {
    Location::Unallocated(Constraint::Any)
}

/// The register-or-FPU constraint matching `ty`.
fn requires_for(ty: Ty) -> Location {
    if ty.is_fp() {
        requires_fpu()
    } else {
        requires_register()
    }
}

/// An input that may stay a constant if the operand is one.
fn register_or_constant(g: &Graph, iidx: InstIdx) -> Location {
    match g.inst(iidx).kind {
        InstKind::Constant(cidx) => Location::Constant(cidx),
        _ => requires_register(),
    }
}

pub(crate) fn build(
    g: &Graph,
    config: &CodegenConfig,
    locations: &mut LocationMap,
) -> Result<(), CompilationError> {
    let mut param_conv = CallingConvention::new(Abi::Managed);
    for bidx in g.block_order() {
        for &iidx in g.block(bidx).insts() {
            build_inst(g, config, locations, &mut param_conv, iidx)?;
        }
    }
    Ok(())
}

fn build_inst(
    g: &Graph,
    config: &CodegenConfig,
    locations: &mut LocationMap,
    param_conv: &mut CallingConvention,
    iidx: InstIdx,
) -> Result<(), CompilationError> {
    let inst = g.inst(iidx);
    let baker = config.read_barrier == ReadBarrierKind::Baker;
    let summary = match &inst.kind {
        InstKind::Constant(cidx) => {
            let mut s = LocationSummary::new(0, CallKind::NoCall);
            s.set_out(Location::Constant(*cidx), Overlap::No);
            s
        }
        InstKind::Parameter { .. } => {
            let mut s = LocationSummary::new(0, CallKind::NoCall);
            s.set_out(param_conv.next_location(inst.ty), Overlap::No);
            s
        }
        InstKind::CurrentMethod => {
            let mut s = LocationSummary::new(0, CallKind::NoCall);
            s.set_out(Location::Register(METHOD_REG), Overlap::No);
            s
        }
        InstKind::Unary { op, .. } => {
            let mut s = LocationSummary::new(1, CallKind::NoCall);
            s.set_in_at(0, requires_for(inst.ty));
            let overlap = match op {
                // The wide negate writes its low half before reading the
                // high input half.
                UnOp::Neg if inst.ty == Ty::Long => Overlap::Yes,
                _ => Overlap::No,
            };
            s.set_out(requires_for(inst.ty), overlap);
            s
        }
        InstKind::Binary { op, rhs, .. } => build_binary(g, config, inst, *op, *rhs)?,
        InstKind::Compare { lhs, rhs, .. } => {
            let operand_ty = g.inst(*lhs).ty;
            let mut s = LocationSummary::new(2, CallKind::NoCall);
            if operand_ty.is_fp() {
                s.set_in_at(0, requires_fpu());
                s.set_in_at(1, fpu_register_or_zero(g, *rhs));
            } else {
                s.set_in_at(0, requires_register());
                s.set_in_at(1, requires_register());
            }
            // The output is written before the last comparison.
            s.set_out(requires_register(), Overlap::Yes);
            s
        }
        InstKind::Condition { lhs, rhs, .. } => {
            let operand_ty = g.inst(*lhs).ty;
            let mut s = LocationSummary::new(2, CallKind::NoCall);
            if operand_ty.is_fp() {
                s.set_in_at(0, requires_fpu());
                s.set_in_at(1, fpu_register_or_zero(g, *rhs));
            } else {
                s.set_in_at(0, requires_register());
                s.set_in_at(
                    1,
                    if operand_ty == Ty::Long {
                        requires_register()
                    } else {
                        register_or_constant(g, *rhs)
                    },
                );
            }
            s.set_out(requires_register(), Overlap::No);
            s
        }
        InstKind::If { .. } => {
            let mut s = LocationSummary::new(1, CallKind::NoCall);
            s.set_in_at(0, requires_register());
            s
        }
        InstKind::Goto => return Ok(()),
        InstKind::Return { value } => {
            let mut s = LocationSummary::new(usize::from(value.is_some()), CallKind::NoCall);
            if let Some(v) = value {
                let ty = g.inst(*v).ty;
                s.set_in_at(0, CallingConvention::return_location(Abi::Managed, ty));
            }
            s
        }
        InstKind::TypeConversion { input } => {
            build_conversion(g.inst(*input).ty, inst.ty)?
        }
        InstKind::NullCheck { .. } => {
            let mut s = LocationSummary::new(1, CallKind::CallOnSlowPath);
            s.set_in_at(0, requires_register());
            s.set_out(requires_register(), Overlap::No);
            s
        }
        InstKind::DivZeroCheck { input } => {
            let mut s = LocationSummary::new(1, CallKind::CallOnSlowPath);
            let wide = g.inst(*input).ty.is_wide();
            if wide {
                s.set_in_at(0, requires_register());
                s.set_out(requires_register(), Overlap::No);
            } else {
                s.set_in_at(0, register_or_constant(g, *input));
                s.set_out(s.in_at(0), Overlap::No);
            }
            s
        }
        InstKind::BoundsCheck { index, length } => {
            let mut s = LocationSummary::new(2, CallKind::CallOnSlowPath);
            s.set_in_at(0, register_or_constant(g, *index));
            s.set_in_at(1, register_or_constant(g, *length));
            s.set_out(s.in_at(0), Overlap::No);
            s
        }
        InstKind::SuspendCheck => LocationSummary::new(0, CallKind::CallOnSlowPath),
        InstKind::FieldGet { .. } => {
            let is_baker_ref = inst.ty == Ty::Ref && baker;
            let call_kind = if ref_load_calls(config, inst.ty) {
                CallKind::CallOnSlowPath
            } else {
                CallKind::NoCall
            };
            let mut s = LocationSummary::new(1, call_kind);
            s.set_in_at(0, requires_register());
            if is_baker_ref {
                // Lock-word temp for the gray check; the marking entry point
                // preserves every other register.
                s.add_temp(requires_register());
                s.set_custom_slow_path_caller_saves(RegisterSet::new());
                s.set_out(requires_register(), Overlap::Yes);
            } else {
                s.set_out(requires_for(inst.ty), Overlap::No);
            }
            s
        }
        InstKind::FieldSet { value, .. } => {
            let value_ty = g.inst(*value).ty;
            let mut s = LocationSummary::new(2, CallKind::NoCall);
            s.set_in_at(0, requires_register());
            s.set_in_at(1, requires_for(value_ty));
            if value_ty == Ty::Ref {
                // Card-marking temps.
                s.add_temp(requires_register());
                s.add_temp(requires_register());
            }
            s
        }
        InstKind::ArrayGet { index, .. } => {
            let is_baker_ref = inst.ty == Ty::Ref && baker;
            let call_kind = if ref_load_calls(config, inst.ty) {
                CallKind::CallOnSlowPath
            } else {
                CallKind::NoCall
            };
            let mut s = LocationSummary::new(2, call_kind);
            s.set_in_at(0, requires_register());
            if is_baker_ref {
                // The barrier's address arithmetic needs the index in a
                // register.
                s.set_in_at(1, requires_register());
                s.add_temp(requires_register());
                s.set_custom_slow_path_caller_saves(RegisterSet::new());
                s.set_out(requires_register(), Overlap::Yes);
            } else {
                s.set_in_at(1, register_or_constant(g, *index));
                s.set_out(requires_for(inst.ty), Overlap::No);
            }
            s
        }
        InstKind::ArraySet { index, value, .. } => {
            let value_ty = g.inst(*value).ty;
            let mut s = LocationSummary::new(3, CallKind::NoCall);
            s.set_in_at(0, requires_register());
            s.set_in_at(1, register_or_constant(g, *index));
            s.set_in_at(2, requires_for(value_ty));
            if value_ty == Ty::Ref {
                s.add_temp(requires_register());
                s.add_temp(requires_register());
            }
            s
        }
        InstKind::ArrayLength { .. } => {
            let mut s = LocationSummary::new(1, CallKind::NoCall);
            s.set_in_at(0, requires_register());
            s.set_out(requires_register(), Overlap::No);
            s
        }
        InstKind::LoadClass { .. } => {
            let mut s = LocationSummary::new(0, CallKind::CallOnSlowPath);
            s.set_out(requires_register(), Overlap::No);
            s
        }
        InstKind::LoadString { .. } => {
            let mut s = LocationSummary::new(0, CallKind::CallOnSlowPath);
            s.set_out(requires_register(), Overlap::No);
            s
        }
        InstKind::ClinitCheck { .. } => {
            let mut s = LocationSummary::new(1, CallKind::CallOnSlowPath);
            s.set_in_at(0, requires_register());
            s
        }
        InstKind::NewInstance { .. } => {
            let mut s = LocationSummary::new(1, CallKind::CallOnMainPath);
            s.set_in_at(0, Location::Register(CoreReg::R0));
            s.set_out(
                CallingConvention::return_location(Abi::Runtime, Ty::Ref),
                Overlap::No,
            );
            s
        }
        InstKind::CheckCast { .. } => {
            let mut s = LocationSummary::new(2, CallKind::CallOnSlowPath);
            s.set_in_at(0, requires_register());
            s.set_in_at(1, requires_register());
            // Walks the superclass chain.
            s.add_temp(requires_register());
            s
        }
        InstKind::InstanceOf { .. } => {
            let mut s = LocationSummary::new(2, CallKind::NoCall);
            s.set_in_at(0, requires_register());
            s.set_in_at(1, requires_register());
            s.add_temp(requires_register());
            // The result is zeroed before the loop consumes the inputs.
            s.set_out(requires_register(), Overlap::Yes);
            s
        }
        InstKind::InvokeStaticOrDirect { args, .. } => {
            let mut s = build_invoke(g, args, inst.ty);
            // The caller's method reference, to reach the callee through the
            // resolved-methods table.
            s.set_in_at(args.len(), requires_register());
            s
        }
        InstKind::InvokeVirtual { args, .. } => build_invoke(g, args, inst.ty),
        InstKind::UnsafeCasReference { .. } => {
            let mut s = LocationSummary::new(4, CallKind::CallOnSlowPath);
            s.set_in_at(0, requires_register()); // object
            s.set_in_at(1, requires_register()); // offset
            s.set_in_at(2, requires_register()); // expected
            s.set_in_at(3, requires_register()); // new value
            s.add_temp(requires_register()); // field address
            s.add_temp(requires_register()); // loaded value / cas status
            if baker {
                s.add_temp(requires_register()); // pre-mark reference
                s.add_temp(requires_register()); // update-loop status
                s.set_custom_slow_path_caller_saves(RegisterSet::new());
            }
            s.set_out(requires_register(), Overlap::Yes);
            s
        }
        InstKind::ParallelMove { .. } => return Ok(()),
        InstKind::Phi { inputs } => {
            let mut s = LocationSummary::new(inputs.len(), CallKind::NoCall);
            for at in 0..inputs.len() {
                s.set_in_at(at, any());
            }
            s.set_out(any(), Overlap::No);
            s
        }
    };
    locations.set(iidx, summary);
    Ok(())
}

/// Does a reference load of `ty` need a slow path under the configured
/// barrier?
fn ref_load_calls(config: &CodegenConfig, ty: Ty) -> bool {
    ty == Ty::Ref && config.read_barrier != ReadBarrierKind::None
}

/// FP comparisons against literal zero fold into `vcmp` directly.
fn fpu_register_or_zero(g: &Graph, iidx: InstIdx) -> Location {
    match g.inst(iidx).kind {
        InstKind::Constant(cidx) => {
            let c = g.const_(cidx);
            if c.low_bits() == 0 && c.high_bits() == 0 {
                Location::Constant(cidx)
            } else {
                requires_fpu()
            }
        }
        _ => requires_fpu(),
    }
}

fn build_binary(
    g: &Graph,
    config: &CodegenConfig,
    inst: &Inst,
    op: BinOp,
    rhs: InstIdx,
) -> Result<LocationSummary, CompilationError> {
    let ty = inst.ty;
    let s = match op {
        BinOp::Add | BinOp::Sub | BinOp::And | BinOp::Orr | BinOp::Eor => {
            let mut s = LocationSummary::new(2, CallKind::NoCall);
            if ty.is_fp() {
                s.set_in_at(0, requires_fpu());
                s.set_in_at(1, requires_fpu());
                s.set_out(requires_fpu(), Overlap::No);
            } else {
                s.set_in_at(0, requires_register());
                s.set_in_at(
                    1,
                    if ty == Ty::Long {
                        requires_register()
                    } else {
                        register_or_constant(g, rhs)
                    },
                );
                // Wide ops write their low half before the high inputs are
                // read.
                let overlap = if ty == Ty::Long { Overlap::Yes } else { Overlap::No };
                s.set_out(requires_register(), overlap);
            }
            s
        }
        BinOp::Mul => {
            let mut s = LocationSummary::new(2, CallKind::NoCall);
            if ty.is_fp() {
                s.set_in_at(0, requires_fpu());
                s.set_in_at(1, requires_fpu());
                s.set_out(requires_fpu(), Overlap::No);
            } else {
                s.set_in_at(0, requires_register());
                s.set_in_at(1, requires_register());
                let overlap = if ty == Ty::Long { Overlap::Yes } else { Overlap::No };
                s.set_out(requires_register(), overlap);
            }
            s
        }
        BinOp::Div | BinOp::Rem => build_div_rem(g, config, inst, op, rhs)?,
        BinOp::Shl | BinOp::Shr | BinOp::UShr | BinOp::Ror => {
            let mut s = LocationSummary::new(2, CallKind::NoCall);
            s.set_in_at(0, requires_register());
            s.set_in_at(1, register_or_constant(g, rhs));
            if ty == Ty::Long {
                // Register-amount wide shifts write the output while both
                // input halves are still needed.
                s.set_out(requires_register(), Overlap::Yes);
                if !matches!(g.inst(rhs).kind, InstKind::Constant(_)) {
                    s.add_temp(requires_register());
                }
            } else {
                s.set_out(requires_register(), Overlap::No);
            }
            s
        }
    };
    Ok(s)
}

fn build_div_rem(
    g: &Graph,
    config: &CodegenConfig,
    inst: &Inst,
    op: BinOp,
    rhs: InstIdx,
) -> Result<LocationSummary, CompilationError> {
    let ty = inst.ty;
    match ty {
        Ty::Int => {
            if let Some(value) = g.as_int_const(rhs) {
                let mut s = LocationSummary::new(2, CallKind::NoCall);
                s.set_in_at(0, requires_register());
                s.set_in_at(1, register_or_constant(g, rhs));
                s.set_out(requires_register(), Overlap::No);
                if !matches!(value, -1 | 0 | 1) {
                    s.add_temp(requires_register());
                    if !value.unsigned_abs().is_power_of_two() {
                        s.add_temp(requires_register());
                    }
                }
                Ok(s)
            } else if config.has_idiv {
                let mut s = LocationSummary::new(2, CallKind::NoCall);
                s.set_in_at(0, requires_register());
                s.set_in_at(1, requires_register());
                s.set_out(requires_register(), Overlap::No);
                if op == BinOp::Rem {
                    s.add_temp(requires_register());
                }
                Ok(s)
            } else {
                // No hardware divide: the idivmod runtime call computes both
                // the quotient (r0) and the remainder (r1).
                let mut s = LocationSummary::new(2, CallKind::CallOnMainPath);
                s.set_in_at(0, Location::Register(CoreReg::R0));
                s.set_in_at(1, Location::Register(CoreReg::R1));
                let out = if op == BinOp::Div {
                    CoreReg::R0
                } else {
                    CoreReg::R1
                };
                s.set_out(Location::Register(out), Overlap::No);
                Ok(s)
            }
        }
        Ty::Long => {
            let mut s = LocationSummary::new(2, CallKind::CallOnMainPath);
            s.set_in_at(0, Location::RegisterPair(CoreReg::R0, CoreReg::R1));
            s.set_in_at(1, Location::RegisterPair(CoreReg::R2, CoreReg::R3));
            // ldiv hands the quotient back in r0/r1, lrem the remainder in
            // r2/r3.
            let out = if op == BinOp::Div {
                Location::RegisterPair(CoreReg::R0, CoreReg::R1)
            } else {
                Location::RegisterPair(CoreReg::R2, CoreReg::R3)
            };
            s.set_out(out, Overlap::No);
            Ok(s)
        }
        Ty::Float | Ty::Double => {
            if op == BinOp::Div {
                let mut s = LocationSummary::new(2, CallKind::NoCall);
                s.set_in_at(0, requires_fpu());
                s.set_in_at(1, requires_fpu());
                s.set_out(requires_fpu(), Overlap::No);
                Ok(s)
            } else {
                // fmod / fmodf runtime calls.
                let mut s = LocationSummary::new(2, CallKind::CallOnMainPath);
                if ty == Ty::Float {
                    s.set_in_at(0, Location::FpuRegister(super::SReg::S0));
                    s.set_in_at(1, Location::FpuRegister(super::SReg::S1));
                } else {
                    s.set_in_at(0, Location::FpuRegisterPair(super::SReg::S0, super::SReg::S1));
                    s.set_in_at(1, Location::FpuRegisterPair(super::SReg::S2, super::SReg::S3));
                }
                s.set_out(
                    CallingConvention::return_location(Abi::Runtime, ty),
                    Overlap::No,
                );
                Ok(s)
            }
        }
        _ => Err(CompilationError::General(format!(
            "unexpected {op:?} result type {ty:?}"
        ))),
    }
}

fn build_conversion(from: Ty, to: Ty) -> Result<LocationSummary, CompilationError> {
    let s = match (from, to) {
        (Ty::Int, Ty::Long) => {
            let mut s = LocationSummary::new(1, CallKind::NoCall);
            s.set_in_at(0, requires_register());
            // The low half is written while the input is still needed for
            // the sign extension.
            s.set_out(requires_register(), Overlap::Yes);
            s
        }
        (Ty::Long, Ty::Int) => {
            let mut s = LocationSummary::new(1, CallKind::NoCall);
            s.set_in_at(0, requires_register());
            s.set_out(requires_register(), Overlap::No);
            s
        }
        (Ty::Int, Ty::Byte | Ty::Short | Ty::Char) => {
            let mut s = LocationSummary::new(1, CallKind::NoCall);
            s.set_in_at(0, requires_register());
            s.set_out(requires_register(), Overlap::No);
            s
        }
        (Ty::Int, Ty::Float | Ty::Double) => {
            let mut s = LocationSummary::new(1, CallKind::NoCall);
            s.set_in_at(0, requires_register());
            s.set_out(requires_fpu(), Overlap::No);
            s
        }
        (Ty::Float | Ty::Double, Ty::Int) => {
            let mut s = LocationSummary::new(1, CallKind::NoCall);
            s.set_in_at(0, requires_fpu());
            s.set_out(requires_register(), Overlap::No);
            s
        }
        (Ty::Float, Ty::Double) | (Ty::Double, Ty::Float) => {
            let mut s = LocationSummary::new(1, CallKind::NoCall);
            s.set_in_at(0, requires_fpu());
            s.set_out(requires_fpu(), Overlap::No);
            s
        }
        (Ty::Long, Ty::Float | Ty::Double) => {
            // l2f / l2d runtime calls.
            let mut s = LocationSummary::new(1, CallKind::CallOnMainPath);
            s.set_in_at(0, Location::RegisterPair(CoreReg::R0, CoreReg::R1));
            s.set_out(CallingConvention::return_location(Abi::Runtime, to), Overlap::No);
            s
        }
        (Ty::Float | Ty::Double, Ty::Long) => {
            // f2l / d2l runtime calls.
            let mut s = LocationSummary::new(1, CallKind::CallOnMainPath);
            let in_loc = if from == Ty::Float {
                Location::FpuRegister(super::SReg::S0)
            } else {
                Location::FpuRegisterPair(super::SReg::S0, super::SReg::S1)
            };
            s.set_in_at(0, in_loc);
            s.set_out(CallingConvention::return_location(Abi::Runtime, to), Overlap::No);
            s
        }
        _ => {
            return Err(CompilationError::General(format!(
                "unsupported conversion {from:?} -> {to:?}"
            )))
        }
    };
    Ok(s)
}

/// Shared by both invoke kinds: arguments at their ABI locations, the callee
/// method pointer in its fixed register as a temp, the result where the ABI
/// returns it.
fn build_invoke(
    g: &Graph,
    args: &[InstIdx],
    return_ty: Ty,
) -> LocationSummary {
    let mut conv = CallingConvention::new(Abi::Managed);
    // One extra input slot for the direct-invoke method reference; virtual
    // invokes simply leave it unused.
    let mut s = LocationSummary::new(args.len() + 1, CallKind::CallOnMainPath);
    for (at, &arg) in args.iter().enumerate() {
        s.set_in_at(at, conv.next_location(g.inst(arg).ty));
    }
    s.set_in_at(args.len(), Location::Invalid);
    s.add_temp(CallingConvention::method_location());
    let ret = CallingConvention::return_location(Abi::Managed, return_ty);
    if ret.is_valid() {
        s.set_out(ret, Overlap::No);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::build_locations;
    use crate::ir::{Const, FpBias, InstKind};

    fn int_binop_graph(op: BinOp, rhs_const: Option<i32>) -> (Graph, InstIdx) {
        let mut g = Graph::new(vec![Ty::Int, Ty::Int]);
        let b0 = g.add_block();
        let lhs = g
            .add_inst(b0, Inst::new(InstKind::Parameter { index: 0 }, Ty::Int, 0))
            .unwrap();
        let rhs = match rhs_const {
            Some(v) => {
                let c = g.add_const(Const::Int(v));
                g.add_inst(b0, Inst::new(InstKind::Constant(c), Ty::Int, 0))
                    .unwrap()
            }
            None => g
                .add_inst(b0, Inst::new(InstKind::Parameter { index: 1 }, Ty::Int, 0))
                .unwrap(),
        };
        let bin = g
            .add_inst(b0, Inst::new(InstKind::Binary { op, lhs, rhs }, Ty::Int, 1))
            .unwrap();
        g.add_inst(
            b0,
            Inst::new(InstKind::Return { value: Some(bin) }, Ty::Void, 2),
        )
        .unwrap();
        (g, bin)
    }

    #[test]
    fn div_by_constant_temps() {
        let config = CodegenConfig::default();

        // Division by +/-1 needs no temps.
        let (g, div) = int_binop_graph(BinOp::Div, Some(-1));
        let locations = build_locations(&g, &config).unwrap();
        assert_eq!(locations.get(div).unwrap().temps().len(), 0);

        // A power of two needs one.
        let (g, div) = int_binop_graph(BinOp::Div, Some(8));
        let locations = build_locations(&g, &config).unwrap();
        assert_eq!(locations.get(div).unwrap().temps().len(), 1);

        // An arbitrary constant needs two for the magic multiply.
        let (g, div) = int_binop_graph(BinOp::Div, Some(7));
        let locations = build_locations(&g, &config).unwrap();
        let s = locations.get(div).unwrap();
        assert_eq!(s.temps().len(), 2);
        assert!(s.in_at(1).is_constant());
        assert_eq!(s.call_kind(), CallKind::NoCall);
    }

    #[test]
    fn div_without_hardware_divide_calls_runtime() {
        let config = CodegenConfig {
            has_idiv: false,
            ..CodegenConfig::default()
        };
        let (g, div) = int_binop_graph(BinOp::Div, None);
        let locations = build_locations(&g, &config).unwrap();
        let s = locations.get(div).unwrap();
        assert_eq!(s.call_kind(), CallKind::CallOnMainPath);
        assert_eq!(s.in_at(0), Location::Register(CoreReg::R0));
        assert_eq!(s.out(), Location::Register(CoreReg::R0));
    }

    #[test]
    fn compare_output_overlaps() {
        let mut g = Graph::new(vec![Ty::Long, Ty::Long]);
        let b0 = g.add_block();
        let lhs = g
            .add_inst(b0, Inst::new(InstKind::Parameter { index: 0 }, Ty::Long, 0))
            .unwrap();
        let rhs = g
            .add_inst(b0, Inst::new(InstKind::Parameter { index: 1 }, Ty::Long, 0))
            .unwrap();
        let cmp = g
            .add_inst(
                b0,
                Inst::new(
                    InstKind::Compare {
                        lhs,
                        rhs,
                        bias: FpBias::Gt,
                    },
                    Ty::Int,
                    1,
                ),
            )
            .unwrap();
        g.add_inst(
            b0,
            Inst::new(InstKind::Return { value: Some(cmp) }, Ty::Void, 2),
        )
        .unwrap();
        let locations = build_locations(&g, &CodegenConfig::default()).unwrap();
        let s = locations.get(cmp).unwrap();
        assert_eq!(s.output_overlap(), Overlap::Yes);
    }

    #[test]
    fn parameters_follow_the_managed_abi() {
        let mut g = Graph::new(vec![Ty::Int, Ty::Long, Ty::Float]);
        let b0 = g.add_block();
        let p0 = g
            .add_inst(b0, Inst::new(InstKind::Parameter { index: 0 }, Ty::Int, 0))
            .unwrap();
        let p1 = g
            .add_inst(b0, Inst::new(InstKind::Parameter { index: 1 }, Ty::Long, 0))
            .unwrap();
        let p2 = g
            .add_inst(b0, Inst::new(InstKind::Parameter { index: 2 }, Ty::Float, 0))
            .unwrap();
        g.add_inst(b0, Inst::new(InstKind::Return { value: None }, Ty::Void, 1))
            .unwrap();
        let locations = build_locations(&g, &CodegenConfig::default()).unwrap();
        assert_eq!(
            locations.get(p0).unwrap().out(),
            Location::Register(CoreReg::R1)
        );
        assert_eq!(
            locations.get(p1).unwrap().out(),
            Location::RegisterPair(CoreReg::R2, CoreReg::R3)
        );
        assert_eq!(
            locations.get(p2).unwrap().out(),
            Location::FpuRegister(super::super::SReg::S0)
        );
    }
}
