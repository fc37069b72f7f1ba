//! The control-flow-graph IR the backend consumes.
//!
//! The graph arrives fully built and fully optimized; this crate only reads
//! it. As in the rest of the codebase, the IR stores indexes into vectors
//! rather than references: a [BlockIdx] names a block, an [InstIdx] names an
//! instruction, and a [ConstIdx] names an entry in the constant table. This
//! keeps the graph compact, makes it trivially cloneable in tests, and means
//! no lifetime ties an instruction to its neighbours.
//!
//! Abbreviations used throughout the backend (in alphabetical order):
//!
//!  * `bidx`: a [BlockIdx]
//!  * `cidx`: a [ConstIdx]
//!  * `g`: the name conventionally given to the shared [Graph] instance
//!  * `iidx`: an [InstIdx]
//!
//! Blocks are stored in layout order: code is emitted for block 0 first,
//! block 1 second, and so on, with fall-through between adjacent blocks where
//! the terminator allows it.

use crate::CompilationError;
use index_vec::IndexVec;
use smallvec::SmallVec;
use std::fmt;

index_vec::define_index_type! {
    pub struct BlockIdx = u16;
}

index_vec::define_index_type! {
    pub struct InstIdx = u32;
}

index_vec::define_index_type! {
    pub struct ConstIdx = u32;
}

/// A value type. `Bool`, `Byte`, `Char` and `Short` only appear at memory and
/// conversion boundaries; arithmetic is performed on `Int`-or-wider values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ty {
    Bool,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Ref,
    Void,
}

impl Ty {
    /// Does a value of this type occupy two 32-bit words?
    pub fn is_wide(self) -> bool {
        matches!(self, Ty::Long | Ty::Double)
    }

    pub fn is_fp(self) -> bool {
        matches!(self, Ty::Float | Ty::Double)
    }

    /// Size of a value of this type in the guest's memory, in bytes.
    pub fn size(self) -> u32 {
        match self {
            Ty::Bool | Ty::Byte => 1,
            Ty::Char | Ty::Short => 2,
            Ty::Int | Ty::Float | Ty::Ref => 4,
            Ty::Long | Ty::Double => 8,
            Ty::Void => 0,
        }
    }
}

/// A compile-time constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Const {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,
}

impl Const {
    /// The low 32 bits of this constant's representation. Valid for every
    /// kind except `Float`/`Double` use their raw bit patterns.
    pub fn low_bits(&self) -> i32 {
        match self {
            Const::Int(v) => *v,
            Const::Long(v) => *v as i32,
            Const::Float(v) => v.to_bits() as i32,
            Const::Double(v) => v.to_bits() as i32,
            Const::Null => 0,
        }
    }

    /// The high 32 bits; only meaningful for wide constants.
    pub fn high_bits(&self) -> i32 {
        match self {
            Const::Long(v) => (*v >> 32) as i32,
            Const::Double(v) => (v.to_bits() >> 32) as i32,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Orr,
    Eor,
    /// Shift left.
    Shl,
    /// Arithmetic (sign-propagating) shift right.
    Shr,
    /// Logical shift right.
    UShr,
    /// Rotate right.
    Ror,
}

/// A comparison condition, in source-language (signed unless stated) terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Unsigned below.
    B,
    /// Unsigned below-or-equal.
    Be,
    /// Unsigned above.
    A,
    /// Unsigned above-or-equal.
    Ae,
}

impl Cond {
    pub fn opposite(self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Lt => Cond::Ge,
            Cond::Le => Cond::Gt,
            Cond::Gt => Cond::Le,
            Cond::Ge => Cond::Lt,
            Cond::B => Cond::Ae,
            Cond::Be => Cond::A,
            Cond::A => Cond::Be,
            Cond::Ae => Cond::B,
        }
    }
}

/// How a floating-point comparison treats an unordered (NaN) outcome. The
/// source language's `cmpg`/`cmpl` operators need one of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpBias {
    /// Unordered compares as greater-than.
    Gt,
    /// Unordered compares as less-than.
    Lt,
}

/// The payload of one instruction. Operands are [InstIdx]es into the owning
/// graph; every reference to another value goes through the graph.
#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    Constant(ConstIdx),
    /// The `index`th formal parameter of the method, in declaration order.
    Parameter {
        index: u16,
    },
    /// The pointer to the method currently executing; needed to reach the
    /// method's own dex-cache tables.
    CurrentMethod,
    Unary {
        op: UnOp,
        input: InstIdx,
    },
    Binary {
        op: BinOp,
        lhs: InstIdx,
        rhs: InstIdx,
    },
    /// Three-way compare producing exactly -1, 0 or 1 (an `Int`).
    Compare {
        lhs: InstIdx,
        rhs: InstIdx,
        bias: FpBias,
    },
    /// A materialized boolean condition over two values.
    Condition {
        cond: Cond,
        lhs: InstIdx,
        rhs: InstIdx,
    },
    /// Block terminator; successor 0 is taken when `input` is non-zero,
    /// successor 1 otherwise.
    If {
        input: InstIdx,
    },
    /// Unconditional block terminator; branches to successor 0.
    Goto,
    Return {
        value: Option<InstIdx>,
    },
    /// Conversion from `input`'s type to this instruction's type.
    TypeConversion {
        input: InstIdx,
    },
    /// Throws if `input` is null; the value of this instruction is `input`.
    NullCheck {
        input: InstIdx,
    },
    /// Throws if `input` is zero; the value of this instruction is `input`.
    DivZeroCheck {
        input: InstIdx,
    },
    /// Throws unless `0 <= index < length`; the value is `index`.
    BoundsCheck {
        index: InstIdx,
        length: InstIdx,
    },
    /// GC safepoint poll.
    SuspendCheck,
    FieldGet {
        object: InstIdx,
        offset: u32,
        volatile: bool,
    },
    FieldSet {
        object: InstIdx,
        value: InstIdx,
        offset: u32,
        volatile: bool,
        value_can_be_null: bool,
    },
    ArrayGet {
        array: InstIdx,
        index: InstIdx,
    },
    ArraySet {
        array: InstIdx,
        index: InstIdx,
        value: InstIdx,
        value_can_be_null: bool,
    },
    ArrayLength {
        array: InstIdx,
    },
    /// Resolve (and optionally initialize) the class with the given type
    /// index, via the current method's tables.
    LoadClass {
        type_idx: u32,
        current_method: InstIdx,
        check_clinit: bool,
    },
    LoadString {
        string_idx: u32,
        current_method: InstIdx,
    },
    /// Ensure the class produced by `class` is initialized.
    ClinitCheck {
        class: InstIdx,
    },
    /// Allocate a new instance of `class`; always calls the runtime.
    NewInstance {
        class: InstIdx,
    },
    /// Throws unless `object` is null or an instance of `class`.
    CheckCast {
        object: InstIdx,
        class: InstIdx,
    },
    InstanceOf {
        object: InstIdx,
        class: InstIdx,
    },
    InvokeStaticOrDirect {
        method_idx: u32,
        current_method: InstIdx,
        args: SmallVec<[InstIdx; 4]>,
    },
    InvokeVirtual {
        vtable_index: u32,
        args: SmallVec<[InstIdx; 4]>,
    },
    /// Atomically replace the reference field at `object + offset` with
    /// `new_value` if it currently holds `expected`; produces 1 on success, 0
    /// on failure.
    UnsafeCasReference {
        object: InstIdx,
        offset: InstIdx,
        expected: InstIdx,
        new_value: InstIdx,
    },
    /// A batch of simultaneous location moves inserted by the register
    /// allocator at control-flow merges and around calls.
    ParallelMove {
        moves: Vec<crate::codegen::location::MoveOperation>,
    },
    /// Never emitted; exists so the register allocator can see merges.
    Phi {
        inputs: SmallVec<[InstIdx; 2]>,
    },
}

/// One IR instruction: a kind plus the attributes every kind shares.
#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    pub kind: InstKind,
    /// The type of the value this instruction produces ([Ty::Void] if none).
    pub ty: Ty,
    /// The source program counter, for safepoint records and diagnostics.
    pub dex_pc: u32,
    pub can_throw: bool,
    /// True if a throw from this instruction can be caught within the method.
    pub throws_into_catch: bool,
    /// True if this instruction must record a safepoint environment.
    pub needs_env: bool,
}

impl InstKind {
    /// The value operands of this instruction, in the order the backend's
    /// location summaries declare them.
    pub fn operands(&self) -> SmallVec<[InstIdx; 4]> {
        use InstKind::*;
        match self {
            Constant(_) | Parameter { .. } | CurrentMethod | Goto | SuspendCheck
            | ParallelMove { .. } => SmallVec::new(),
            // Class and string loads reach their targets through pc-relative
            // literals; the method reference is carried for diagnostics only.
            LoadClass { .. } | LoadString { .. } => SmallVec::new(),
            Unary { input, .. }
            | If { input }
            | TypeConversion { input }
            | NullCheck { input }
            | DivZeroCheck { input } => SmallVec::from_slice(&[*input]),
            Binary { lhs, rhs, .. } | Compare { lhs, rhs, .. } | Condition { lhs, rhs, .. } => {
                SmallVec::from_slice(&[*lhs, *rhs])
            }
            Return { value } => value.iter().copied().collect(),
            BoundsCheck { index, length } => SmallVec::from_slice(&[*index, *length]),
            FieldGet { object, .. } => SmallVec::from_slice(&[*object]),
            FieldSet { object, value, .. } => SmallVec::from_slice(&[*object, *value]),
            ArrayGet { array, index } => SmallVec::from_slice(&[*array, *index]),
            ArraySet {
                array,
                index,
                value,
                ..
            } => SmallVec::from_slice(&[*array, *index, *value]),
            ArrayLength { array } => SmallVec::from_slice(&[*array]),
            ClinitCheck { class } | NewInstance { class } => SmallVec::from_slice(&[*class]),
            CheckCast { object, class } | InstanceOf { object, class } => {
                SmallVec::from_slice(&[*object, *class])
            }
            InvokeStaticOrDirect {
                args,
                current_method,
                ..
            } => args.iter().chain(std::iter::once(current_method)).copied().collect(),
            InvokeVirtual { args, .. } => args.clone(),
            UnsafeCasReference {
                object,
                offset,
                expected,
                new_value,
            } => SmallVec::from_slice(&[*object, *offset, *expected, *new_value]),
            Phi { inputs } => inputs.iter().copied().collect(),
        }
    }
}

impl Inst {
    pub fn new(kind: InstKind, ty: Ty, dex_pc: u32) -> Self {
        Self {
            kind,
            ty,
            dex_pc,
            can_throw: false,
            throws_into_catch: false,
            needs_env: false,
        }
    }

    pub fn can_throw(mut self) -> Self {
        self.can_throw = true;
        self
    }

    pub fn throws_into_catch(mut self) -> Self {
        self.can_throw = true;
        self.throws_into_catch = true;
        self
    }

    pub fn needs_env(mut self) -> Self {
        self.needs_env = true;
        self
    }

    /// Is this instruction a block terminator?
    pub fn is_terminator(&self) -> bool {
        matches!(
            self.kind,
            InstKind::If { .. } | InstKind::Goto | InstKind::Return { .. }
        )
    }
}

/// A basic block: an ordered list of instructions ending in a terminator,
/// plus its successors in the CFG.
#[derive(Debug, Clone, Default)]
pub struct Block {
    insts: Vec<InstIdx>,
    successors: SmallVec<[BlockIdx; 2]>,
}

impl Block {
    pub fn insts(&self) -> &[InstIdx] {
        &self.insts
    }

    pub fn successors(&self) -> &[BlockIdx] {
        &self.successors
    }
}

/// The top-level container for one method's IR.
#[derive(Debug, Default)]
pub struct Graph {
    blocks: IndexVec<BlockIdx, Block>,
    insts: IndexVec<InstIdx, Inst>,
    consts: IndexVec<ConstIdx, Const>,
    /// Types of the method's formal parameters, in declaration order.
    param_tys: Vec<Ty>,
}

impl Graph {
    pub fn new(param_tys: Vec<Ty>) -> Self {
        Self {
            blocks: IndexVec::new(),
            insts: IndexVec::new(),
            consts: IndexVec::new(),
            param_tys,
        }
    }

    pub fn param_tys(&self) -> &[Ty] {
        &self.param_tys
    }

    pub fn add_block(&mut self) -> BlockIdx {
        self.blocks.push(Block::default())
    }

    pub fn set_successors(&mut self, bidx: BlockIdx, successors: &[BlockIdx]) {
        self.blocks[bidx].successors = SmallVec::from_slice(successors);
    }

    pub fn add_inst(&mut self, bidx: BlockIdx, inst: Inst) -> Result<InstIdx, CompilationError> {
        if self.insts.len() >= usize::try_from(u32::MAX).unwrap() {
            return Err(CompilationError::LimitExceeded(
                "instruction count exceeds InstIdx range".into(),
            ));
        }
        let iidx = self.insts.push(inst);
        self.blocks[bidx].insts.push(iidx);
        Ok(iidx)
    }

    pub fn add_const(&mut self, c: Const) -> ConstIdx {
        self.consts.push(c)
    }

    pub fn inst(&self, iidx: InstIdx) -> &Inst {
        &self.insts[iidx]
    }

    pub fn const_(&self, cidx: ConstIdx) -> &Const {
        &self.consts[cidx]
    }

    pub fn block(&self, bidx: BlockIdx) -> &Block {
        &self.blocks[bidx]
    }

    pub fn blocks_len(&self) -> usize {
        self.blocks.len()
    }

    pub fn insts_len(&self) -> usize {
        self.insts.len()
    }

    /// Block indices in layout (emission) order.
    pub fn block_order(&self) -> impl Iterator<Item = BlockIdx> + '_ {
        (0..self.blocks.len()).map(BlockIdx::from_usize)
    }

    /// If `iidx` is a reference to a constant instruction, the constant.
    pub fn as_const(&self, iidx: InstIdx) -> Option<&Const> {
        match self.inst(iidx).kind {
            InstKind::Constant(cidx) => Some(self.const_(cidx)),
            _ => None,
        }
    }

    /// If `iidx` is an `Int` constant, its value.
    pub fn as_int_const(&self, iidx: InstIdx) -> Option<i32> {
        match self.as_const(iidx) {
            Some(Const::Int(v)) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bidx in self.block_order() {
            writeln!(f, "b{}:", usize::from(bidx))?;
            for &iidx in self.block(bidx).insts() {
                let inst = self.inst(iidx);
                writeln!(
                    f,
                    "  %{}: {:?} = {:?}",
                    usize::from(iidx),
                    inst.ty,
                    inst.kind
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_query() {
        let mut g = Graph::new(vec![Ty::Int]);
        let b0 = g.add_block();
        let c7 = g.add_const(Const::Int(7));
        let p = g
            .add_inst(b0, Inst::new(InstKind::Parameter { index: 0 }, Ty::Int, 0))
            .unwrap();
        let k = g
            .add_inst(b0, Inst::new(InstKind::Constant(c7), Ty::Int, 0))
            .unwrap();
        let add = g
            .add_inst(
                b0,
                Inst::new(
                    InstKind::Binary {
                        op: BinOp::Add,
                        lhs: p,
                        rhs: k,
                    },
                    Ty::Int,
                    1,
                ),
            )
            .unwrap();
        g.add_inst(
            b0,
            Inst::new(InstKind::Return { value: Some(add) }, Ty::Void, 2),
        )
        .unwrap();

        assert_eq!(g.blocks_len(), 1);
        assert_eq!(g.block(b0).insts().len(), 4);
        assert_eq!(g.as_int_const(k), Some(7));
        assert!(g.as_int_const(p).is_none());
        assert!(g.inst(g.block(b0).insts()[3]).is_terminator());
    }

    #[test]
    fn wide_const_halves() {
        let c = Const::Long(0x1122_3344_5566_7788);
        assert_eq!(c.low_bits(), 0x5566_7788);
        assert_eq!(c.high_bits(), 0x1122_3344);
        assert_eq!(Const::Null.low_bits(), 0);
    }
}
