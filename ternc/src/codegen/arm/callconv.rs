//! Parameter and return location assignment for the two ABIs the backend
//! speaks: the managed-method ABI (callee receives the method pointer in r0,
//! arguments in r1-r3/s0-s15, the rest on the stack) and the runtime-call ABI
//! (arguments in r0-r3/s0-s3, results always in core registers).
//!
//! [CallingConvention::next_location] is called once per value in declaration
//! order and threads three cursors: the next core register, the next single
//! FPU register, and the next overall stack index. Stack space is reserved
//! for every parameter, including ones passed in registers, so a parameter's
//! stack index is simply its position in the flattened (word-counted)
//! parameter list.

use crate::codegen::arm::{CoreReg, SReg};
use crate::codegen::location::Location;
use crate::ir::Ty;

const MANAGED_CORE_ARGS: [CoreReg; 3] = [CoreReg::R1, CoreReg::R2, CoreReg::R3];
#[rustfmt::skip]
const MANAGED_FPU_ARGS: [SReg; 16] = [
    SReg::S0, SReg::S1, SReg::S2, SReg::S3, SReg::S4, SReg::S5, SReg::S6, SReg::S7,
    SReg::S8, SReg::S9, SReg::S10, SReg::S11, SReg::S12, SReg::S13, SReg::S14, SReg::S15,
];

const RUNTIME_CORE_ARGS: [CoreReg; 4] = [CoreReg::R0, CoreReg::R1, CoreReg::R2, CoreReg::R3];
const RUNTIME_FPU_ARGS: [SReg; 4] = [SReg::S0, SReg::S1, SReg::S2, SReg::S3];

/// Which ABI a [CallingConvention] maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abi {
    Managed,
    Runtime,
}

/// A stateful parameter-location mapper. Create one per call site or method
/// signature and feed it every value kind in order.
pub struct CallingConvention {
    abi: Abi,
    core: &'static [CoreReg],
    fpu: &'static [SReg],
    gp_index: usize,
    float_index: usize,
    double_index: usize,
    stack_index: usize,
}

impl CallingConvention {
    pub fn new(abi: Abi) -> Self {
        let (core, fpu): (&[CoreReg], &[SReg]) = match abi {
            Abi::Managed => (&MANAGED_CORE_ARGS, &MANAGED_FPU_ARGS),
            Abi::Runtime => (&RUNTIME_CORE_ARGS, &RUNTIME_FPU_ARGS),
        };
        Self {
            abi,
            core,
            fpu,
            gp_index: 0,
            float_index: 0,
            double_index: 0,
            stack_index: 0,
        }
    }

    /// Byte offset (from the callee's entry SP, before any frame setup) of
    /// the given overall stack index. The word at offset 0 holds the method
    /// pointer.
    fn stack_offset_of(&self, stack_index: usize) -> i32 {
        i32::try_from(4 + stack_index * 4).unwrap()
    }

    /// Bytes of outgoing stack the parameters mapped so far occupy,
    /// including the slots reserved for register-passed parameters.
    pub fn outgoing_args_size(&self) -> u32 {
        u32::try_from(4 + self.stack_index * 4).unwrap()
    }

    /// Assign the next parameter of kind `ty`.
    pub fn next_location(&mut self, ty: Ty) -> Location {
        match ty {
            Ty::Bool | Ty::Byte | Ty::Char | Ty::Short | Ty::Int | Ty::Ref => {
                let index = self.gp_index;
                self.gp_index += 1;
                self.stack_index += 1;
                if index < self.core.len() {
                    Location::Register(self.core[index])
                } else {
                    Location::StackSlot(self.stack_offset_of(self.stack_index - 1))
                }
            }
            Ty::Long => {
                let mut index = self.gp_index;
                let stack_index = self.stack_index;
                self.gp_index += 2;
                self.stack_index += 2;
                if index + 1 < self.core.len() && self.core[index] == CoreReg::R1 {
                    // A pair's low half must sit at an even register; skip r1
                    // and use r2/r3.
                    self.gp_index += 1;
                    index += 1;
                }
                if index + 1 < self.core.len() {
                    let (lo, hi) = (self.core[index], self.core[index + 1]);
                    debug_assert!(lo.code() % 2 == 0 && hi.code() == lo.code() + 1);
                    Location::RegisterPair(lo, hi)
                } else {
                    Location::DoubleStackSlot(self.stack_offset_of(stack_index))
                }
            }
            Ty::Float => {
                let stack_index = self.stack_index;
                self.stack_index += 1;
                if self.float_index % 2 == 0 {
                    // No alignment hole to fill: catch up with the doubles.
                    self.float_index = self.float_index.max(self.double_index);
                }
                if self.float_index < self.fpu.len() {
                    let s = self.fpu[self.float_index];
                    self.float_index += 1;
                    Location::FpuRegister(s)
                } else {
                    Location::StackSlot(self.stack_offset_of(stack_index))
                }
            }
            Ty::Double => {
                let stack_index = self.stack_index;
                self.stack_index += 2;
                // Round up to an even register index before consulting
                // availability, so the pair is double-word aligned no matter
                // how many floats came first.
                self.double_index = self.double_index.max(self.float_index.next_multiple_of(2));
                if self.double_index + 1 < self.fpu.len() {
                    let index = self.double_index;
                    self.double_index += 2;
                    let (lo, hi) = (self.fpu[index], self.fpu[index + 1]);
                    debug_assert!(lo.code() % 2 == 0 && hi.code() == lo.code() + 1);
                    Location::FpuRegisterPair(lo, hi)
                } else {
                    Location::DoubleStackSlot(self.stack_offset_of(stack_index))
                }
            }
            Ty::Void => panic!("void parameter"),
        }
    }

    /// Where a result of kind `ty` comes back. A pure function of the ABI
    /// and kind.
    pub fn return_location(abi: Abi, ty: Ty) -> Location {
        let _ = abi; // both ABIs return results in the same places
        match ty {
            Ty::Void => Location::Invalid,
            Ty::Long => Location::RegisterPair(CoreReg::R0, CoreReg::R1),
            Ty::Double => Location::FpuRegisterPair(SReg::S0, SReg::S1),
            Ty::Float => Location::FpuRegister(SReg::S0),
            _ => Location::Register(CoreReg::R0),
        }
    }

    /// The method pointer's fixed location for managed calls.
    pub fn method_location() -> Location {
        Location::Register(crate::codegen::arm::METHOD_REG)
    }

    pub fn abi(&self) -> Abi {
        self.abi
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(abi: Abi, tys: &[Ty]) -> Vec<Location> {
        let mut cc = CallingConvention::new(abi);
        tys.iter().map(|&ty| cc.next_location(ty)).collect()
    }

    #[test]
    fn managed_ints_spill_after_r3() {
        let locs = map(Abi::Managed, &[Ty::Int, Ty::Int, Ty::Int, Ty::Int, Ty::Int]);
        assert_eq!(locs[0], Location::Register(CoreReg::R1));
        assert_eq!(locs[1], Location::Register(CoreReg::R2));
        assert_eq!(locs[2], Location::Register(CoreReg::R3));
        // Overall stack index 3; slot 0 is the method pointer.
        assert_eq!(locs[3], Location::StackSlot(16));
        assert_eq!(locs[4], Location::StackSlot(20));
    }

    #[test]
    fn managed_long_skips_r1() {
        // A long first: r1 would be a misaligned pair low, so r2/r3 is used
        // and r1 is never back-filled.
        let locs = map(Abi::Managed, &[Ty::Long, Ty::Int]);
        assert_eq!(locs[0], Location::RegisterPair(CoreReg::R2, CoreReg::R3));
        assert_eq!(locs[1], Location::StackSlot(4 + 2 * 4));
    }

    #[test]
    fn managed_int_then_long_spills() {
        let locs = map(Abi::Managed, &[Ty::Int, Ty::Long]);
        assert_eq!(locs[0], Location::Register(CoreReg::R1));
        // gp cursor 1: r2/r3 form an aligned pair.
        assert_eq!(locs[1], Location::RegisterPair(CoreReg::R2, CoreReg::R3));

        let locs = map(Abi::Managed, &[Ty::Int, Ty::Int, Ty::Long]);
        // gp cursor 2: only r3 left, so the long goes to the stack whole.
        assert_eq!(locs[2], Location::DoubleStackSlot(4 + 2 * 4));
    }

    #[test]
    fn double_alignment_is_independent_of_preceding_floats() {
        let locs = map(Abi::Managed, &[Ty::Float, Ty::Double, Ty::Float]);
        assert_eq!(locs[0], Location::FpuRegister(SReg::S0));
        // One float used s0; the double rounds up to s2/s3.
        assert_eq!(locs[1], Location::FpuRegisterPair(SReg::S2, SReg::S3));
        // The hole at s1 is still usable by the next float.
        assert_eq!(locs[2], Location::FpuRegister(SReg::S1));
    }

    #[test]
    fn floats_after_doubles_continue_upward() {
        let locs = map(Abi::Managed, &[Ty::Double, Ty::Float, Ty::Float]);
        assert_eq!(locs[0], Location::FpuRegisterPair(SReg::S0, SReg::S1));
        assert_eq!(locs[1], Location::FpuRegister(SReg::S2));
        assert_eq!(locs[2], Location::FpuRegister(SReg::S3));
    }

    #[test]
    fn runtime_long_uses_r0_r1() {
        let locs = map(Abi::Runtime, &[Ty::Long, Ty::Int]);
        assert_eq!(locs[0], Location::RegisterPair(CoreReg::R0, CoreReg::R1));
        assert_eq!(locs[1], Location::Register(CoreReg::R2));

        // From an odd cursor the long skips r1 for alignment.
        let locs = map(Abi::Runtime, &[Ty::Int, Ty::Long]);
        assert_eq!(locs[0], Location::Register(CoreReg::R0));
        assert_eq!(locs[1], Location::RegisterPair(CoreReg::R2, CoreReg::R3));
    }

    #[test]
    fn round_trip_permutations() {
        // Mapping the same kinds twice yields the same locations, pair lows
        // are always even, and no two parameters overlap.
        let perms: [&[Ty]; 8] = [
            &[Ty::Int, Ty::Ref, Ty::Long, Ty::Float, Ty::Double],
            &[Ty::Double, Ty::Float, Ty::Long, Ty::Ref, Ty::Int],
            &[Ty::Long, Ty::Long, Ty::Long],
            &[Ty::Float, Ty::Float, Ty::Double, Ty::Double, Ty::Float],
            &[Ty::Int, Ty::Int, Ty::Int, Ty::Int, Ty::Long, Ty::Double],
            &[Ty::Ref, Ty::Double, Ty::Int, Ty::Float, Ty::Long],
            &[Ty::Double, Ty::Double, Ty::Double, Ty::Double, Ty::Double,
              Ty::Double, Ty::Double, Ty::Double, Ty::Double],
            &[Ty::Float, Ty::Long, Ty::Float, Ty::Long, Ty::Float, Ty::Long],
        ];
        for tys in perms {
            for abi in [Abi::Managed, Abi::Runtime] {
                let a = map(abi, tys);
                let b = map(abi, tys);
                assert_eq!(a, b);
                for (i, loc) in a.iter().enumerate() {
                    assert!(loc.is_concrete());
                    if let Location::RegisterPair(lo, hi) = loc {
                        assert_eq!(lo.code() % 2, 0, "{tys:?}[{i}]");
                        assert_eq!(hi.code(), lo.code() + 1);
                    }
                    if let Location::FpuRegisterPair(lo, hi) = loc {
                        assert_eq!(lo.code() % 2, 0, "{tys:?}[{i}]");
                        assert_eq!(hi.code(), lo.code() + 1);
                    }
                    for other in &a[i + 1..] {
                        assert!(!loc.overlaps(other), "{tys:?}: {loc:?} vs {other:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn return_locations() {
        assert_eq!(
            CallingConvention::return_location(Abi::Managed, Ty::Int),
            Location::Register(CoreReg::R0)
        );
        assert_eq!(
            CallingConvention::return_location(Abi::Managed, Ty::Long),
            Location::RegisterPair(CoreReg::R0, CoreReg::R1)
        );
        assert_eq!(
            CallingConvention::return_location(Abi::Managed, Ty::Double),
            Location::FpuRegisterPair(SReg::S0, SReg::S1)
        );
        assert!(!CallingConvention::return_location(Abi::Managed, Ty::Void).is_valid());
    }
}
