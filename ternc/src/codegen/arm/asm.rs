//! The A32 assembler.
//!
//! Emission is strictly append-only: instructions are encoded into a byte
//! buffer as they are produced, and every branch to a label (bound or not)
//! goes through the fixup table, which [Assembler::finalize] resolves in one
//! pass. Nothing outside this module sees a half-patched buffer.
//!
//! Alongside the encoded bytes the assembler keeps a text listing, one line
//! per instruction plus label and comment lines. The listing is what the
//! `TERND_LOG_ASM` logger prints and what codegen tests match against, so its
//! syntax is kept stable and boring: lowercase mnemonics, `lN:` labels,
//! `; ...` comments.

use crate::codegen::arm::{CoreReg, DReg, SReg};
use crate::CompilationError;
use byteorder::{ByteOrder, LittleEndian};
use index_vec::IndexVec;

index_vec::define_index_type! {
    pub struct LabelIdx = u32;
}

/// An A32 condition code, encoded in the top nibble of every instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Cond {
    Eq = 0x0,
    Ne = 0x1,
    /// Unsigned higher-or-same (carry set).
    Hs = 0x2,
    /// Unsigned lower (carry clear).
    Lo = 0x3,
    Mi = 0x4,
    Pl = 0x5,
    Vs = 0x6,
    Vc = 0x7,
    Hi = 0x8,
    Ls = 0x9,
    Ge = 0xA,
    Lt = 0xB,
    Gt = 0xC,
    Le = 0xD,
    Al = 0xE,
}

impl Cond {
    fn suffix(self) -> &'static str {
        match self {
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Hs => "hs",
            Cond::Lo => "lo",
            Cond::Mi => "mi",
            Cond::Pl => "pl",
            Cond::Vs => "vs",
            Cond::Vc => "vc",
            Cond::Hi => "hi",
            Cond::Ls => "ls",
            Cond::Ge => "ge",
            Cond::Lt => "lt",
            Cond::Gt => "gt",
            Cond::Le => "le",
            Cond::Al => "",
        }
    }

    fn bits(self) -> u32 {
        (self as u32) << 28
    }
}

/// A shift applied to a register operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Shift {
    Lsl = 0,
    Lsr = 1,
    Asr = 2,
    Ror = 3,
}

impl Shift {
    fn name(self) -> &'static str {
        match self {
            Shift::Lsl => "lsl",
            Shift::Lsr => "lsr",
            Shift::Asr => "asr",
            Shift::Ror => "ror",
        }
    }
}

/// The flexible second operand of a data-processing instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op2 {
    /// An immediate expressible as an 8-bit value rotated right by an even
    /// amount. Constructed via [Op2::imm]; the fields are (value, rot, imm8).
    Imm(u32, u32, u32),
    Reg(CoreReg),
    /// `rm, <shift> #amount`. For LSR/ASR an amount of 32 is encoded as 0.
    RegShiftImm(CoreReg, Shift, u32),
    /// `rm, <shift> rs`.
    RegShiftReg(CoreReg, Shift, CoreReg),
}

impl Op2 {
    /// Encode `v` as a rotated 8-bit immediate if possible.
    pub fn imm(v: u32) -> Option<Op2> {
        for rot in 0..16 {
            let rotated = v.rotate_left(rot * 2);
            if rotated <= 0xFF {
                return Some(Op2::Imm(v, rot, rotated));
            }
        }
        None
    }

    fn encode(&self) -> u32 {
        match self {
            // Bit 25 selects the immediate form.
            Op2::Imm(_, rot, imm8) => (1 << 25) | (rot << 8) | imm8,
            Op2::Reg(rm) => rm.code(),
            Op2::RegShiftImm(rm, sh, amount) => {
                let amount = match (sh, amount) {
                    (Shift::Lsr | Shift::Asr, 32) => 0,
                    _ => *amount,
                };
                debug_assert!(amount < 32);
                (amount << 7) | ((*sh as u32) << 5) | rm.code()
            }
            Op2::RegShiftReg(rm, sh, rs) => {
                (rs.code() << 8) | ((*sh as u32) << 5) | (1 << 4) | rm.code()
            }
        }
    }
}

impl std::fmt::Display for Op2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Op2::Imm(v, ..) => write!(f, "#{}", *v as i32),
            Op2::Reg(rm) => write!(f, "{}", rm.name()),
            Op2::RegShiftImm(rm, sh, amount) => {
                write!(f, "{}, {} #{}", rm.name(), sh.name(), amount)
            }
            Op2::RegShiftReg(rm, sh, rs) => {
                write!(f, "{}, {} {}", rm.name(), sh.name(), rs.name())
            }
        }
    }
}

/// Memory barrier domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Barrier {
    /// Full inner-shareable barrier (`dmb ish`).
    Ish,
    /// Store-store inner-shareable barrier (`dmb ishst`).
    Ishst,
}

/// A pending branch waiting for its label's final offset.
#[derive(Debug)]
struct Fixup {
    /// Byte offset of the branch instruction.
    offset: u32,
    label: LabelIdx,
}

pub struct Assembler {
    buf: Vec<u8>,
    labels: IndexVec<LabelIdx, Option<u32>>,
    fixups: Vec<Fixup>,
    listing: Vec<String>,
}

// Data-processing opcodes (bits 24..21).
const OP_AND: u32 = 0x0;
const OP_EOR: u32 = 0x1;
const OP_SUB: u32 = 0x2;
const OP_RSB: u32 = 0x3;
const OP_ADD: u32 = 0x4;
const OP_ADC: u32 = 0x5;
const OP_SBC: u32 = 0x6;
const OP_RSC: u32 = 0x7;
const OP_TST: u32 = 0x8;
const OP_CMP: u32 = 0xA;
const OP_ORR: u32 = 0xC;
const OP_MOV: u32 = 0xD;
const OP_BIC: u32 = 0xE;
const OP_MVN: u32 = 0xF;

impl Assembler {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            labels: IndexVec::new(),
            fixups: Vec::new(),
            listing: Vec::new(),
        }
    }

    /// The byte offset the next instruction will be emitted at.
    pub fn pc_offset(&self) -> u32 {
        u32::try_from(self.buf.len()).unwrap()
    }

    fn push(&mut self, word: u32, text: String) {
        let mut bytes = [0u8; 4];
        LittleEndian::write_u32(&mut bytes, word);
        self.buf.extend_from_slice(&bytes);
        self.listing.push(text);
    }

    /// Add a comment line to the listing; emits nothing.
    pub fn comment(&mut self, text: &str) {
        self.listing.push(format!("; {text}"));
    }

    pub fn new_label(&mut self) -> LabelIdx {
        self.labels.push(None)
    }

    /// Attach `label` to the next instruction emitted.
    pub fn bind(&mut self, label: LabelIdx) {
        debug_assert!(self.labels[label].is_none(), "label bound twice");
        self.labels[label] = Some(self.pc_offset());
        self.listing.push(format!("l{}:", usize::from(label)));
    }

    pub fn label_offset(&self, label: LabelIdx) -> Option<u32> {
        self.labels[label]
    }

    // Data processing.

    fn dp(&mut self, cond: Cond, op: u32, s: bool, rd: u32, rn: u32, op2: &Op2) -> u32 {
        cond.bits() | (op << 21) | (u32::from(s) << 20) | (rn << 16) | (rd << 12) | op2.encode()
    }

    fn dp3(&mut self, name: &str, cond: Cond, op: u32, s: bool, rd: CoreReg, rn: CoreReg, op2: Op2) {
        let word = self.dp(cond, op, s, rd.code(), rn.code(), &op2);
        let s = if s { "s" } else { "" };
        self.push(
            word,
            format!("{name}{s}{} {}, {}, {op2}", cond.suffix(), rd.name(), rn.name()),
        );
    }

    pub fn add(&mut self, rd: CoreReg, rn: CoreReg, op2: Op2) {
        self.dp3("add", Cond::Al, OP_ADD, false, rd, rn, op2);
    }

    pub fn adds(&mut self, rd: CoreReg, rn: CoreReg, op2: Op2) {
        self.dp3("add", Cond::Al, OP_ADD, true, rd, rn, op2);
    }

    pub fn adc(&mut self, rd: CoreReg, rn: CoreReg, op2: Op2) {
        self.dp3("adc", Cond::Al, OP_ADC, false, rd, rn, op2);
    }

    pub fn sub(&mut self, rd: CoreReg, rn: CoreReg, op2: Op2) {
        self.dp3("sub", Cond::Al, OP_SUB, false, rd, rn, op2);
    }

    pub fn subs(&mut self, rd: CoreReg, rn: CoreReg, op2: Op2) {
        self.dp3("sub", Cond::Al, OP_SUB, true, rd, rn, op2);
    }

    pub fn sbc(&mut self, rd: CoreReg, rn: CoreReg, op2: Op2) {
        self.dp3("sbc", Cond::Al, OP_SBC, false, rd, rn, op2);
    }

    pub fn rsb(&mut self, rd: CoreReg, rn: CoreReg, op2: Op2) {
        self.dp3("rsb", Cond::Al, OP_RSB, false, rd, rn, op2);
    }

    pub fn rsbs(&mut self, rd: CoreReg, rn: CoreReg, op2: Op2) {
        self.dp3("rsb", Cond::Al, OP_RSB, true, rd, rn, op2);
    }

    /// Reverse subtract with carry: `rd = op2 - rn - !C`.
    pub fn rsc(&mut self, rd: CoreReg, rn: CoreReg, op2: Op2) {
        self.dp3("rsc", Cond::Al, OP_RSC, false, rd, rn, op2);
    }

    pub fn and_(&mut self, rd: CoreReg, rn: CoreReg, op2: Op2) {
        self.dp3("and", Cond::Al, OP_AND, false, rd, rn, op2);
    }

    pub fn orr(&mut self, rd: CoreReg, rn: CoreReg, op2: Op2) {
        self.dp3("orr", Cond::Al, OP_ORR, false, rd, rn, op2);
    }

    pub fn eor(&mut self, rd: CoreReg, rn: CoreReg, op2: Op2) {
        self.dp3("eor", Cond::Al, OP_EOR, false, rd, rn, op2);
    }

    pub fn eor_cond(&mut self, cond: Cond, rd: CoreReg, rn: CoreReg, op2: Op2) {
        self.dp3("eor", cond, OP_EOR, false, rd, rn, op2);
    }

    pub fn bic(&mut self, rd: CoreReg, rn: CoreReg, op2: Op2) {
        self.dp3("bic", Cond::Al, OP_BIC, false, rd, rn, op2);
    }

    pub fn cmp(&mut self, rn: CoreReg, op2: Op2) {
        let word = self.dp(Cond::Al, OP_CMP, true, 0, rn.code(), &op2);
        self.push(word, format!("cmp {}, {op2}", rn.name()));
    }

    pub fn tst(&mut self, rn: CoreReg, op2: Op2) {
        let word = self.dp(Cond::Al, OP_TST, true, 0, rn.code(), &op2);
        self.push(word, format!("tst {}, {op2}", rn.name()));
    }

    pub fn mov(&mut self, rd: CoreReg, rm: CoreReg) {
        self.mov_cond(Cond::Al, rd, rm);
    }

    pub fn mov_cond(&mut self, cond: Cond, rd: CoreReg, rm: CoreReg) {
        let op2 = Op2::Reg(rm);
        let word = self.dp(cond, OP_MOV, false, rd.code(), 0, &op2);
        self.push(word, format!("mov{} {}, {}", cond.suffix(), rd.name(), rm.name()));
    }

    pub fn mvn(&mut self, rd: CoreReg, op2: Op2) {
        let word = self.dp(Cond::Al, OP_MVN, false, rd.code(), 0, &op2);
        self.push(word, format!("mvn {}, {op2}", rd.name()));
    }

    /// `mov rd, rm, <shift> #amount` — immediate-shift forms.

    pub fn lsl(&mut self, rd: CoreReg, rm: CoreReg, amount: u32) {
        self.shift_imm("lsl", false, rd, rm, Shift::Lsl, amount);
    }

    pub fn lsr(&mut self, rd: CoreReg, rm: CoreReg, amount: u32) {
        self.shift_imm("lsr", false, rd, rm, Shift::Lsr, amount);
    }

    pub fn lsrs(&mut self, rd: CoreReg, rm: CoreReg, amount: u32) {
        self.shift_imm("lsr", true, rd, rm, Shift::Lsr, amount);
    }

    pub fn asr(&mut self, rd: CoreReg, rm: CoreReg, amount: u32) {
        self.shift_imm("asr", false, rd, rm, Shift::Asr, amount);
    }

    pub fn ror(&mut self, rd: CoreReg, rm: CoreReg, amount: u32) {
        self.shift_imm("ror", false, rd, rm, Shift::Ror, amount);
    }

    fn shift_imm(&mut self, name: &str, s: bool, rd: CoreReg, rm: CoreReg, sh: Shift, amount: u32) {
        let op2 = Op2::RegShiftImm(rm, sh, amount);
        let word = self.dp(Cond::Al, OP_MOV, s, rd.code(), 0, &op2);
        let s = if s { "s" } else { "" };
        self.push(
            word,
            format!("{name}{s} {}, {}, #{amount}", rd.name(), rm.name()),
        );
    }

    /// Register-specified shifts: `lsl rd, rm, rs` and friends.
    pub fn shift_reg(&mut self, sh: Shift, rd: CoreReg, rm: CoreReg, rs: CoreReg) {
        self.shift_reg_cond(Cond::Al, sh, rd, rm, rs);
    }

    pub fn shift_reg_cond(&mut self, cond: Cond, sh: Shift, rd: CoreReg, rm: CoreReg, rs: CoreReg) {
        let op2 = Op2::RegShiftReg(rm, sh, rs);
        let word = self.dp(cond, OP_MOV, false, rd.code(), 0, &op2);
        self.push(
            word,
            format!(
                "{}{} {}, {}, {}",
                sh.name(),
                cond.suffix(),
                rd.name(),
                rm.name(),
                rs.name()
            ),
        );
    }

    // Immediate materialization.

    /// `mov rd, #imm` via a data-processing immediate; the value must encode.
    pub fn mov_imm8(&mut self, cond: Cond, rd: CoreReg, v: u32) {
        let op2 = Op2::imm(v).expect("immediate not encodable");
        let word = self.dp(cond, OP_MOV, false, rd.code(), 0, &op2);
        self.push(word, format!("mov{} {}, #{}", cond.suffix(), rd.name(), v as i32));
    }

    pub fn movw(&mut self, rd: CoreReg, v: u16) {
        let v = u32::from(v);
        let word = Cond::Al.bits() | 0x0300_0000 | ((v >> 12) << 16) | (rd.code() << 12) | (v & 0xFFF);
        self.push(word, format!("movw {}, #{v}", rd.name()));
    }

    pub fn movt(&mut self, rd: CoreReg, v: u16) {
        let v = u32::from(v);
        let word = Cond::Al.bits() | 0x0340_0000 | ((v >> 12) << 16) | (rd.code() << 12) | (v & 0xFFF);
        self.push(word, format!("movt {}, #{v}", rd.name()));
    }

    /// Materialize an arbitrary 32-bit value with the cheapest sequence:
    /// a rotated immediate, a `mvn`, a single `movw`, or a `movw`/`movt` pair.
    pub fn mov_imm32(&mut self, rd: CoreReg, v: i32) {
        let u = v as u32;
        if let Some(op2) = Op2::imm(u) {
            let word = self.dp(Cond::Al, OP_MOV, false, rd.code(), 0, &op2);
            self.push(word, format!("mov {}, #{v}", rd.name()));
        } else if let Some(op2) = Op2::imm(!u) {
            let word = self.dp(Cond::Al, OP_MVN, false, rd.code(), 0, &op2);
            self.push(word, format!("mvn {}, #{}", rd.name(), !u as i32));
        } else if u <= 0xFFFF {
            self.movw(rd, u as u16);
        } else {
            self.movw(rd, (u & 0xFFFF) as u16);
            self.movt(rd, (u >> 16) as u16);
        }
    }

    // Multiplies and divides.

    pub fn mul(&mut self, rd: CoreReg, rn: CoreReg, rm: CoreReg) {
        let word =
            Cond::Al.bits() | (rd.code() << 16) | (rm.code() << 8) | 0x90 | rn.code();
        self.push(word, format!("mul {}, {}, {}", rd.name(), rn.name(), rm.name()));
    }

    /// `rd = rn * rm + ra`.
    pub fn mla(&mut self, rd: CoreReg, rn: CoreReg, rm: CoreReg, ra: CoreReg) {
        let word = Cond::Al.bits()
            | 0x0020_0000
            | (rd.code() << 16)
            | (ra.code() << 12)
            | (rm.code() << 8)
            | 0x90
            | rn.code();
        self.push(
            word,
            format!("mla {}, {}, {}, {}", rd.name(), rn.name(), rm.name(), ra.name()),
        );
    }

    /// `rd = ra - rn * rm`.
    pub fn mls(&mut self, rd: CoreReg, rn: CoreReg, rm: CoreReg, ra: CoreReg) {
        let word = Cond::Al.bits()
            | 0x0060_0000
            | (rd.code() << 16)
            | (ra.code() << 12)
            | (rm.code() << 8)
            | 0x90
            | rn.code();
        self.push(
            word,
            format!("mls {}, {}, {}, {}", rd.name(), rn.name(), rm.name(), ra.name()),
        );
    }

    pub fn smull(&mut self, rdlo: CoreReg, rdhi: CoreReg, rn: CoreReg, rm: CoreReg) {
        let word = Cond::Al.bits()
            | 0x00C0_0000
            | (rdhi.code() << 16)
            | (rdlo.code() << 12)
            | (rm.code() << 8)
            | 0x90
            | rn.code();
        self.push(
            word,
            format!(
                "smull {}, {}, {}, {}",
                rdlo.name(),
                rdhi.name(),
                rn.name(),
                rm.name()
            ),
        );
    }

    pub fn umull(&mut self, rdlo: CoreReg, rdhi: CoreReg, rn: CoreReg, rm: CoreReg) {
        let word = Cond::Al.bits()
            | 0x0080_0000
            | (rdhi.code() << 16)
            | (rdlo.code() << 12)
            | (rm.code() << 8)
            | 0x90
            | rn.code();
        self.push(
            word,
            format!(
                "umull {}, {}, {}, {}",
                rdlo.name(),
                rdhi.name(),
                rn.name(),
                rm.name()
            ),
        );
    }

    pub fn sdiv(&mut self, rd: CoreReg, rn: CoreReg, rm: CoreReg) {
        let word = Cond::Al.bits()
            | 0x0710_F010
            | (rd.code() << 16)
            | (rm.code() << 8)
            | rn.code();
        self.push(word, format!("sdiv {}, {}, {}", rd.name(), rn.name(), rm.name()));
    }

    pub fn udiv(&mut self, rd: CoreReg, rn: CoreReg, rm: CoreReg) {
        let word = Cond::Al.bits()
            | 0x0730_F010
            | (rd.code() << 16)
            | (rm.code() << 8)
            | rn.code();
        self.push(word, format!("udiv {}, {}, {}", rd.name(), rn.name(), rm.name()));
    }

    pub fn clz(&mut self, rd: CoreReg, rm: CoreReg) {
        let word = Cond::Al.bits() | 0x016F_0F10 | (rd.code() << 12) | rm.code();
        self.push(word, format!("clz {}, {}", rd.name(), rm.name()));
    }

    /// Unsigned bit-field extract: `rd = rn[lsb .. lsb+width]`.
    pub fn ubfx(&mut self, rd: CoreReg, rn: CoreReg, lsb: u32, width: u32) {
        debug_assert!(width >= 1 && lsb + width <= 32);
        let word = Cond::Al.bits()
            | 0x07E0_0050
            | ((width - 1) << 16)
            | (rd.code() << 12)
            | (lsb << 7)
            | rn.code();
        self.push(
            word,
            format!("ubfx {}, {}, #{lsb}, #{width}", rd.name(), rn.name()),
        );
    }

    /// Signed bit-field extract.
    pub fn sbfx(&mut self, rd: CoreReg, rn: CoreReg, lsb: u32, width: u32) {
        debug_assert!(width >= 1 && lsb + width <= 32);
        let word = Cond::Al.bits()
            | 0x07A0_0050
            | ((width - 1) << 16)
            | (rd.code() << 12)
            | (lsb << 7)
            | rn.code();
        self.push(
            word,
            format!("sbfx {}, {}, #{lsb}, #{width}", rd.name(), rn.name()),
        );
    }

    // Loads and stores.

    fn mem_text(name: &str, cond: Cond, rt: CoreReg, base: CoreReg, offset: i32) -> String {
        if offset == 0 {
            format!("{name}{} {}, [{}]", cond.suffix(), rt.name(), base.name())
        } else {
            format!(
                "{name}{} {}, [{}, #{offset}]",
                cond.suffix(),
                rt.name(),
                base.name()
            )
        }
    }

    fn mem_word(&mut self, name: &str, cond: Cond, l: bool, b: bool, rt: CoreReg, base: CoreReg, offset: i32) {
        let (u, imm) = if offset >= 0 {
            (1u32, offset as u32)
        } else {
            (0u32, (-offset) as u32)
        };
        debug_assert!(imm < 0x1000, "load/store offset out of range: {offset}");
        let word = cond.bits()
            | 0x0400_0000
            | (1 << 24) // offset addressing
            | (u << 23)
            | (u32::from(b) << 22)
            | (u32::from(l) << 20)
            | (base.code() << 16)
            | (rt.code() << 12)
            | imm;
        let text = Self::mem_text(name, cond, rt, base, offset);
        self.push(word, text);
    }

    pub fn ldr(&mut self, rt: CoreReg, base: CoreReg, offset: i32) {
        self.mem_word("ldr", Cond::Al, true, false, rt, base, offset);
    }

    pub fn ldr_cond(&mut self, cond: Cond, rt: CoreReg, base: CoreReg, offset: i32) {
        self.mem_word("ldr", cond, true, false, rt, base, offset);
    }

    pub fn str(&mut self, rt: CoreReg, base: CoreReg, offset: i32) {
        self.mem_word("str", Cond::Al, false, false, rt, base, offset);
    }

    pub fn ldrb(&mut self, rt: CoreReg, base: CoreReg, offset: i32) {
        self.mem_word("ldrb", Cond::Al, true, true, rt, base, offset);
    }

    pub fn strb(&mut self, rt: CoreReg, base: CoreReg, offset: i32) {
        self.mem_word("strb", Cond::Al, false, true, rt, base, offset);
    }

    fn mem_misc(&mut self, name: &str, l: bool, op: u32, rt: CoreReg, base: CoreReg, offset: i32) {
        let (u, imm) = if offset >= 0 {
            (1u32, offset as u32)
        } else {
            (0u32, (-offset) as u32)
        };
        debug_assert!(imm < 0x100, "load/store offset out of range: {offset}");
        let word = Cond::Al.bits()
            | (1 << 24)
            | (u << 23)
            | (1 << 22) // immediate form
            | (u32::from(l) << 20)
            | (base.code() << 16)
            | (rt.code() << 12)
            | ((imm >> 4) << 8)
            | 0x90
            | (op << 5)
            | (imm & 0xF);
        let text = Self::mem_text(name, Cond::Al, rt, base, offset);
        self.push(word, text);
    }

    pub fn ldrh(&mut self, rt: CoreReg, base: CoreReg, offset: i32) {
        self.mem_misc("ldrh", true, 0b01, rt, base, offset);
    }

    pub fn strh(&mut self, rt: CoreReg, base: CoreReg, offset: i32) {
        self.mem_misc("strh", false, 0b01, rt, base, offset);
    }

    pub fn ldrsb(&mut self, rt: CoreReg, base: CoreReg, offset: i32) {
        self.mem_misc("ldrsb", true, 0b10, rt, base, offset);
    }

    pub fn ldrsh(&mut self, rt: CoreReg, base: CoreReg, offset: i32) {
        self.mem_misc("ldrsh", true, 0b11, rt, base, offset);
    }

    /// `ldrd rt, rt2, [base, #offset]`; `rt` must be even and `rt2 == rt+1`.
    pub fn ldrd(&mut self, rt: CoreReg, rt2: CoreReg, base: CoreReg, offset: i32) {
        debug_assert!(rt.code() % 2 == 0 && rt2.code() == rt.code() + 1);
        let (u, imm) = if offset >= 0 {
            (1u32, offset as u32)
        } else {
            (0u32, (-offset) as u32)
        };
        debug_assert!(imm < 0x100);
        let word = Cond::Al.bits()
            | (1 << 24)
            | (u << 23)
            | (1 << 22)
            | (base.code() << 16)
            | (rt.code() << 12)
            | ((imm >> 4) << 8)
            | 0xD0
            | (imm & 0xF);
        let text = format!(
            "ldrd {}, {}, [{}, #{offset}]",
            rt.name(),
            rt2.name(),
            base.name()
        );
        self.push(word, text);
    }

    pub fn strd(&mut self, rt: CoreReg, rt2: CoreReg, base: CoreReg, offset: i32) {
        debug_assert!(rt.code() % 2 == 0 && rt2.code() == rt.code() + 1);
        let (u, imm) = if offset >= 0 {
            (1u32, offset as u32)
        } else {
            (0u32, (-offset) as u32)
        };
        debug_assert!(imm < 0x100);
        let word = Cond::Al.bits()
            | (1 << 24)
            | (u << 23)
            | (1 << 22)
            | (base.code() << 16)
            | (rt.code() << 12)
            | ((imm >> 4) << 8)
            | 0xF0
            | (imm & 0xF);
        let text = format!(
            "strd {}, {}, [{}, #{offset}]",
            rt.name(),
            rt2.name(),
            base.name()
        );
        self.push(word, text);
    }

    /// `ldr rt, [base, rm, lsl #shift]`.
    pub fn ldr_reg(&mut self, rt: CoreReg, base: CoreReg, rm: CoreReg, shift: u32) {
        self.mem_reg("ldr", true, false, rt, base, rm, shift);
    }

    pub fn str_reg(&mut self, rt: CoreReg, base: CoreReg, rm: CoreReg, shift: u32) {
        self.mem_reg("str", false, false, rt, base, rm, shift);
    }

    pub fn ldrb_reg(&mut self, rt: CoreReg, base: CoreReg, rm: CoreReg, shift: u32) {
        self.mem_reg("ldrb", true, true, rt, base, rm, shift);
    }

    pub fn strb_reg(&mut self, rt: CoreReg, base: CoreReg, rm: CoreReg, shift: u32) {
        self.mem_reg("strb", false, true, rt, base, rm, shift);
    }

    fn mem_reg(&mut self, name: &str, l: bool, b: bool, rt: CoreReg, base: CoreReg, rm: CoreReg, shift: u32) {
        debug_assert!(shift < 32);
        let word = Cond::Al.bits()
            | 0x0600_0000
            | (1 << 24)
            | (1 << 23)
            | (u32::from(b) << 22)
            | (u32::from(l) << 20)
            | (base.code() << 16)
            | (rt.code() << 12)
            | (shift << 7)
            | rm.code();
        let text = if shift == 0 {
            format!("{name} {}, [{}, {}]", rt.name(), base.name(), rm.name())
        } else {
            format!(
                "{name} {}, [{}, {}, lsl #{shift}]",
                rt.name(),
                base.name(),
                rm.name()
            )
        };
        self.push(word, text);
    }

    pub fn ldrex(&mut self, rt: CoreReg, base: CoreReg) {
        let word = Cond::Al.bits() | 0x0190_0F9F | (base.code() << 16) | (rt.code() << 12);
        self.push(word, format!("ldrex {}, [{}]", rt.name(), base.name()));
    }

    /// `strex rd, rt, [base]`; `rd` receives 0 on success.
    pub fn strex(&mut self, rd: CoreReg, rt: CoreReg, base: CoreReg) {
        let word = Cond::Al.bits()
            | 0x0180_0F90
            | (base.code() << 16)
            | (rd.code() << 12)
            | rt.code();
        self.push(
            word,
            format!("strex {}, {}, [{}]", rd.name(), rt.name(), base.name()),
        );
    }

    /// `ldrexd rt, rt2, [base]`; `rt` must be even and `rt2 == rt+1`.
    pub fn ldrexd(&mut self, rt: CoreReg, rt2: CoreReg, base: CoreReg) {
        debug_assert!(rt.code() % 2 == 0 && rt2.code() == rt.code() + 1);
        let word = Cond::Al.bits() | 0x01B0_0F9F | (base.code() << 16) | (rt.code() << 12);
        self.push(
            word,
            format!("ldrexd {}, {}, [{}]", rt.name(), rt2.name(), base.name()),
        );
    }

    pub fn strexd(&mut self, rd: CoreReg, rt: CoreReg, rt2: CoreReg, base: CoreReg) {
        debug_assert!(rt.code() % 2 == 0 && rt2.code() == rt.code() + 1);
        let word = Cond::Al.bits()
            | 0x01A0_0F90
            | (base.code() << 16)
            | (rd.code() << 12)
            | rt.code();
        self.push(
            word,
            format!(
                "strexd {}, {}, {}, [{}]",
                rd.name(),
                rt.name(),
                rt2.name(),
                base.name()
            ),
        );
    }

    // Block transfers.

    fn reg_list_text(mask: u32) -> String {
        let names: Vec<&str> = (0..16)
            .filter(|i| mask & (1 << i) != 0)
            .map(|i| CoreReg::from_code(i).name())
            .collect();
        format!("{{{}}}", names.join(", "))
    }

    pub fn push_list(&mut self, mask: u32) {
        debug_assert!(mask != 0);
        // stmdb sp!, {...}
        let word = Cond::Al.bits() | 0x092D_0000 | mask;
        let text = format!("push {}", Self::reg_list_text(mask));
        self.push(word, text);
    }

    pub fn pop_list(&mut self, mask: u32) {
        debug_assert!(mask != 0);
        // ldmia sp!, {...}
        let word = Cond::Al.bits() | 0x08BD_0000 | mask;
        let text = format!("pop {}", Self::reg_list_text(mask));
        self.push(word, text);
    }

    /// `stm base, {...}` (increment-after, no writeback).
    pub fn stm(&mut self, base: CoreReg, mask: u32) {
        debug_assert!(mask != 0);
        let word = Cond::Al.bits() | 0x0880_0000 | (base.code() << 16) | mask;
        let text = format!("stm {}, {}", base.name(), Self::reg_list_text(mask));
        self.push(word, text);
    }

    pub fn ldm(&mut self, base: CoreReg, mask: u32) {
        debug_assert!(mask != 0);
        let word = Cond::Al.bits() | 0x0890_0000 | (base.code() << 16) | mask;
        let text = format!("ldm {}, {}", base.name(), Self::reg_list_text(mask));
        self.push(word, text);
    }

    // Branches.

    pub fn b(&mut self, label: LabelIdx) {
        self.b_cond(Cond::Al, label);
    }

    pub fn b_cond(&mut self, cond: Cond, label: LabelIdx) {
        self.fixups.push(Fixup {
            offset: self.pc_offset(),
            label,
        });
        let word = cond.bits() | 0x0A00_0000;
        self.push(word, format!("b{} l{}", cond.suffix(), usize::from(label)));
    }

    pub fn bx(&mut self, rm: CoreReg) {
        let word = Cond::Al.bits() | 0x012F_FF10 | rm.code();
        self.push(word, format!("bx {}", rm.name()));
    }

    pub fn blx(&mut self, rm: CoreReg) {
        let word = Cond::Al.bits() | 0x012F_FF30 | rm.code();
        self.push(word, format!("blx {}", rm.name()));
    }

    pub fn bkpt(&mut self, imm: u16) {
        let imm = u32::from(imm);
        let word = Cond::Al.bits() | 0x0120_0070 | ((imm >> 4) << 8) | (imm & 0xF);
        self.push(word, format!("bkpt #{imm}"));
    }

    pub fn dmb(&mut self, kind: Barrier) {
        let (option, name) = match kind {
            Barrier::Ish => (0xB, "ish"),
            Barrier::Ishst => (0xA, "ishst"),
        };
        self.push(0xF57F_F050 | option, format!("dmb {name}"));
    }

    // Floating point (VFP).

    fn vd_s(s: SReg) -> (u32, u32) {
        (s.code() >> 1, s.code() & 1)
    }

    fn vd_d(d: DReg) -> (u32, u32) {
        (d.code() & 0xF, d.code() >> 4)
    }

    pub fn vldr_s(&mut self, sd: SReg, base: CoreReg, offset: i32) {
        self.vmem(false, true, sd.code(), base, offset, &format!("vldr {}", sd.name()));
    }

    pub fn vstr_s(&mut self, sd: SReg, base: CoreReg, offset: i32) {
        self.vmem(false, false, sd.code(), base, offset, &format!("vstr {}", sd.name()));
    }

    pub fn vldr_d(&mut self, dd: DReg, base: CoreReg, offset: i32) {
        self.vmem(true, true, dd.code(), base, offset, &format!("vldr {}", dd.name()));
    }

    pub fn vstr_d(&mut self, dd: DReg, base: CoreReg, offset: i32) {
        self.vmem(true, false, dd.code(), base, offset, &format!("vstr {}", dd.name()));
    }

    fn vmem(&mut self, dbl: bool, l: bool, code: u32, base: CoreReg, offset: i32, head: &str) {
        debug_assert!(offset % 4 == 0, "vfp offset must be word aligned");
        let (u, imm8) = if offset >= 0 {
            (1u32, (offset as u32) / 4)
        } else {
            (0u32, ((-offset) as u32) / 4)
        };
        debug_assert!(imm8 < 0x100);
        let (vd, dbit) = if dbl {
            (code & 0xF, code >> 4)
        } else {
            (code >> 1, code & 1)
        };
        let word = Cond::Al.bits()
            | 0x0D00_0000
            | (u << 23)
            | (dbit << 22)
            | (u32::from(l) << 20)
            | (base.code() << 16)
            | (vd << 12)
            | (if dbl { 0xB00 } else { 0xA00 })
            | imm8;
        let text = if offset == 0 {
            format!("{head}, [{}]", base.name())
        } else {
            format!("{head}, [{}, #{offset}]", base.name())
        };
        self.push(word, text);
    }

    /// `vpush {dlo .. dlo+count-1}`.
    pub fn vpush_d(&mut self, dlo: DReg, count: u32) {
        debug_assert!(count >= 1 && dlo.code() + count <= 16);
        let (vd, dbit) = Self::vd_d(dlo);
        let word = Cond::Al.bits() | 0x0D2D_0B00 | (dbit << 22) | (vd << 12) | (count * 2);
        let text = format!("vpush {}", Self::dreg_list_text(dlo, count));
        self.push(word, text);
    }

    pub fn vpop_d(&mut self, dlo: DReg, count: u32) {
        debug_assert!(count >= 1 && dlo.code() + count <= 16);
        let (vd, dbit) = Self::vd_d(dlo);
        let word = Cond::Al.bits() | 0x0CBD_0B00 | (dbit << 22) | (vd << 12) | (count * 2);
        let text = format!("vpop {}", Self::dreg_list_text(dlo, count));
        self.push(word, text);
    }

    fn dreg_list_text(dlo: DReg, count: u32) -> String {
        let regs: Vec<&str> = (0..count).map(|i| DReg::from_code(dlo.code() + i).name()).collect();
        format!("{{{}}}", regs.join(", "))
    }

    /// `vstm base, {dlo .. dlo+count-1}` (increment-after, no writeback).
    pub fn vstm_d(&mut self, base: CoreReg, dlo: DReg, count: u32) {
        self.vblock(false, base, dlo, count);
    }

    pub fn vldm_d(&mut self, base: CoreReg, dlo: DReg, count: u32) {
        self.vblock(true, base, dlo, count);
    }

    fn vblock(&mut self, l: bool, base: CoreReg, dlo: DReg, count: u32) {
        debug_assert!(count >= 1 && dlo.code() + count <= 16);
        let (vd, dbit) = Self::vd_d(dlo);
        let word = Cond::Al.bits()
            | 0x0C80_0000
            | (dbit << 22)
            | (u32::from(l) << 20)
            | (base.code() << 16)
            | (vd << 12)
            | 0xB00
            | (count * 2);
        let name = if l { "vldm" } else { "vstm" };
        let regs: Vec<String> = (0..count)
            .map(|i| DReg::from_code(dlo.code() + i).name().to_string())
            .collect();
        let text = format!("{name} {}, {{{}}}", base.name(), regs.join(", "));
        self.push(word, text);
    }

    pub fn vmov_ss(&mut self, sd: SReg, sm: SReg) {
        let (vd, d) = Self::vd_s(sd);
        let (vm, m) = Self::vd_s(sm);
        let word =
            Cond::Al.bits() | 0x0EB0_0A40 | (d << 22) | (vd << 12) | (m << 5) | vm;
        self.push(word, format!("vmov.f32 {}, {}", sd.name(), sm.name()));
    }

    pub fn vmov_dd(&mut self, dd: DReg, dm: DReg) {
        let (vd, d) = Self::vd_d(dd);
        let (vm, m) = Self::vd_d(dm);
        let word =
            Cond::Al.bits() | 0x0EB0_0B40 | (d << 22) | (vd << 12) | (m << 5) | vm;
        self.push(word, format!("vmov.f64 {}, {}", dd.name(), dm.name()));
    }

    /// `vmov sn, rt` — core to FPU.
    pub fn vmov_sr(&mut self, sn: SReg, rt: CoreReg) {
        let (vn, n) = Self::vd_s(sn);
        let word =
            Cond::Al.bits() | 0x0E00_0A10 | (vn << 16) | (rt.code() << 12) | (n << 7);
        self.push(word, format!("vmov {}, {}", sn.name(), rt.name()));
    }

    /// `vmov rt, sn` — FPU to core.
    pub fn vmov_rs(&mut self, rt: CoreReg, sn: SReg) {
        let (vn, n) = Self::vd_s(sn);
        let word =
            Cond::Al.bits() | 0x0E10_0A10 | (vn << 16) | (rt.code() << 12) | (n << 7);
        self.push(word, format!("vmov {}, {}", rt.name(), sn.name()));
    }

    /// `vmov dm, rt, rt2` — a core pair into a double register.
    pub fn vmov_drr(&mut self, dm: DReg, rt: CoreReg, rt2: CoreReg) {
        let (vm, m) = Self::vd_d(dm);
        let word = Cond::Al.bits()
            | 0x0C40_0B10
            | (rt2.code() << 16)
            | (rt.code() << 12)
            | (m << 5)
            | vm;
        self.push(
            word,
            format!("vmov {}, {}, {}", dm.name(), rt.name(), rt2.name()),
        );
    }

    /// `vmov rt, rt2, dm` — a double register into a core pair.
    pub fn vmov_rrd(&mut self, rt: CoreReg, rt2: CoreReg, dm: DReg) {
        let (vm, m) = Self::vd_d(dm);
        let word = Cond::Al.bits()
            | 0x0C50_0B10
            | (rt2.code() << 16)
            | (rt.code() << 12)
            | (m << 5)
            | vm;
        self.push(
            word,
            format!("vmov {}, {}, {}", rt.name(), rt2.name(), dm.name()),
        );
    }

    fn vdp_s(&mut self, name: &str, base: u32, sd: SReg, sn: SReg, sm: SReg) {
        let (vd, d) = Self::vd_s(sd);
        let (vn, n) = Self::vd_s(sn);
        let (vm, m) = Self::vd_s(sm);
        let word = Cond::Al.bits()
            | base
            | (d << 22)
            | (vn << 16)
            | (vd << 12)
            | (n << 7)
            | (m << 5)
            | vm;
        self.push(
            word,
            format!("{name}.f32 {}, {}, {}", sd.name(), sn.name(), sm.name()),
        );
    }

    fn vdp_d(&mut self, name: &str, base: u32, dd: DReg, dn: DReg, dm: DReg) {
        let (vd, d) = Self::vd_d(dd);
        let (vn, n) = Self::vd_d(dn);
        let (vm, m) = Self::vd_d(dm);
        let word = Cond::Al.bits()
            | base
            | 0x100 // the sz bit column selecting f64
            | (d << 22)
            | (vn << 16)
            | (vd << 12)
            | (n << 7)
            | (m << 5)
            | vm;
        self.push(
            word,
            format!("{name}.f64 {}, {}, {}", dd.name(), dn.name(), dm.name()),
        );
    }

    pub fn vadd_s(&mut self, sd: SReg, sn: SReg, sm: SReg) {
        self.vdp_s("vadd", 0x0E30_0A00, sd, sn, sm);
    }

    pub fn vadd_d(&mut self, dd: DReg, dn: DReg, dm: DReg) {
        self.vdp_d("vadd", 0x0E30_0A00, dd, dn, dm);
    }

    pub fn vsub_s(&mut self, sd: SReg, sn: SReg, sm: SReg) {
        self.vdp_s("vsub", 0x0E30_0A40, sd, sn, sm);
    }

    pub fn vsub_d(&mut self, dd: DReg, dn: DReg, dm: DReg) {
        self.vdp_d("vsub", 0x0E30_0A40, dd, dn, dm);
    }

    pub fn vmul_s(&mut self, sd: SReg, sn: SReg, sm: SReg) {
        self.vdp_s("vmul", 0x0E20_0A00, sd, sn, sm);
    }

    pub fn vmul_d(&mut self, dd: DReg, dn: DReg, dm: DReg) {
        self.vdp_d("vmul", 0x0E20_0A00, dd, dn, dm);
    }

    pub fn vdiv_s(&mut self, sd: SReg, sn: SReg, sm: SReg) {
        self.vdp_s("vdiv", 0x0E80_0A00, sd, sn, sm);
    }

    pub fn vdiv_d(&mut self, dd: DReg, dn: DReg, dm: DReg) {
        self.vdp_d("vdiv", 0x0E80_0A00, dd, dn, dm);
    }

    pub fn vneg_s(&mut self, sd: SReg, sm: SReg) {
        let (vd, d) = Self::vd_s(sd);
        let (vm, m) = Self::vd_s(sm);
        let word =
            Cond::Al.bits() | 0x0EB1_0A40 | (d << 22) | (vd << 12) | (m << 5) | vm;
        self.push(word, format!("vneg.f32 {}, {}", sd.name(), sm.name()));
    }

    pub fn vneg_d(&mut self, dd: DReg, dm: DReg) {
        let (vd, d) = Self::vd_d(dd);
        let (vm, m) = Self::vd_d(dm);
        let word =
            Cond::Al.bits() | 0x0EB1_0B40 | (d << 22) | (vd << 12) | (m << 5) | vm;
        self.push(word, format!("vneg.f64 {}, {}", dd.name(), dm.name()));
    }

    pub fn vcmp_s(&mut self, sd: SReg, sm: SReg) {
        let (vd, d) = Self::vd_s(sd);
        let (vm, m) = Self::vd_s(sm);
        let word =
            Cond::Al.bits() | 0x0EB4_0A40 | (d << 22) | (vd << 12) | (m << 5) | vm;
        self.push(word, format!("vcmp.f32 {}, {}", sd.name(), sm.name()));
    }

    pub fn vcmp_d(&mut self, dd: DReg, dm: DReg) {
        let (vd, d) = Self::vd_d(dd);
        let (vm, m) = Self::vd_d(dm);
        let word =
            Cond::Al.bits() | 0x0EB4_0B40 | (d << 22) | (vd << 12) | (m << 5) | vm;
        self.push(word, format!("vcmp.f64 {}, {}", dd.name(), dm.name()));
    }

    pub fn vcmp_s_zero(&mut self, sd: SReg) {
        let (vd, d) = Self::vd_s(sd);
        let word = Cond::Al.bits() | 0x0EB5_0A40 | (d << 22) | (vd << 12);
        self.push(word, format!("vcmp.f32 {}, #0.0", sd.name()));
    }

    pub fn vcmp_d_zero(&mut self, dd: DReg) {
        let (vd, d) = Self::vd_d(dd);
        let word = Cond::Al.bits() | 0x0EB5_0B40 | (d << 22) | (vd << 12);
        self.push(word, format!("vcmp.f64 {}, #0.0", dd.name()));
    }

    /// Transfer the FP status flags to the APSR.
    pub fn vmrs(&mut self) {
        self.push(
            Cond::Al.bits() | 0x0EF1_FA10,
            "vmrs apsr_nzcv, fpscr".to_string(),
        );
    }

    // Conversions. Naming: vcvt_<to>_<from>.

    pub fn vcvt_d_s(&mut self, dd: DReg, sm: SReg) {
        let (vd, d) = Self::vd_d(dd);
        let (vm, m) = Self::vd_s(sm);
        let word =
            Cond::Al.bits() | 0x0EB7_0AC0 | (d << 22) | (vd << 12) | (m << 5) | vm;
        self.push(word, format!("vcvt.f64.f32 {}, {}", dd.name(), sm.name()));
    }

    pub fn vcvt_s_d(&mut self, sd: SReg, dm: DReg) {
        let (vd, d) = Self::vd_s(sd);
        let (vm, m) = Self::vd_d(dm);
        let word =
            Cond::Al.bits() | 0x0EB7_0BC0 | (d << 22) | (vd << 12) | (m << 5) | vm;
        self.push(word, format!("vcvt.f32.f64 {}, {}", sd.name(), dm.name()));
    }

    /// Signed 32-bit integer (in `sm`) to f32.
    pub fn vcvt_s32_to_f32(&mut self, sd: SReg, sm: SReg) {
        let (vd, d) = Self::vd_s(sd);
        let (vm, m) = Self::vd_s(sm);
        let word =
            Cond::Al.bits() | 0x0EB8_0AC0 | (d << 22) | (vd << 12) | (m << 5) | vm;
        self.push(word, format!("vcvt.f32.s32 {}, {}", sd.name(), sm.name()));
    }

    /// Signed 32-bit integer (in `sm`) to f64.
    pub fn vcvt_s32_to_f64(&mut self, dd: DReg, sm: SReg) {
        let (vd, d) = Self::vd_d(dd);
        let (vm, m) = Self::vd_s(sm);
        let word =
            Cond::Al.bits() | 0x0EB8_0BC0 | (d << 22) | (vd << 12) | (m << 5) | vm;
        self.push(word, format!("vcvt.f64.s32 {}, {}", dd.name(), sm.name()));
    }

    /// f32 to signed 32-bit integer, rounding toward zero.
    pub fn vcvt_f32_to_s32(&mut self, sd: SReg, sm: SReg) {
        let (vd, d) = Self::vd_s(sd);
        let (vm, m) = Self::vd_s(sm);
        let word =
            Cond::Al.bits() | 0x0EBD_0AC0 | (d << 22) | (vd << 12) | (m << 5) | vm;
        self.push(word, format!("vcvt.s32.f32 {}, {}", sd.name(), sm.name()));
    }

    /// f64 to signed 32-bit integer, rounding toward zero.
    pub fn vcvt_f64_to_s32(&mut self, sd: SReg, dm: DReg) {
        let (vd, d) = Self::vd_s(sd);
        let (vm, m) = Self::vd_d(dm);
        let word =
            Cond::Al.bits() | 0x0EBD_0BC0 | (d << 22) | (vd << 12) | (m << 5) | vm;
        self.push(word, format!("vcvt.s32.f64 {}, {}", sd.name(), dm.name()));
    }

    // Finalization.

    /// Resolve every pending branch and return the code bytes and the
    /// listing. A branch whose label was never bound, or whose displacement
    /// does not fit in a 24-bit word offset, is an error.
    pub fn finalize(mut self) -> Result<(Vec<u8>, Vec<String>), CompilationError> {
        for fixup in &self.fixups {
            let target = self.labels[fixup.label].ok_or_else(|| {
                CompilationError::InternalError(format!(
                    "branch to unbound label l{}",
                    usize::from(fixup.label)
                ))
            })?;
            // The branch displacement is relative to the branch's address
            // plus 8 (two words of pipeline prefetch), in words.
            let delta = i64::from(target) - (i64::from(fixup.offset) + 8);
            debug_assert_eq!(delta % 4, 0);
            let words = delta / 4;
            if !(-(1 << 23)..(1 << 23)).contains(&words) {
                return Err(CompilationError::LimitExceeded(format!(
                    "branch displacement {delta} out of range"
                )));
            }
            let site = usize::try_from(fixup.offset).unwrap();
            let mut insn = LittleEndian::read_u32(&self.buf[site..site + 4]);
            insn |= (words as u32) & 0x00FF_FFFF;
            LittleEndian::write_u32(&mut self.buf[site..site + 4], insn);
        }
        Ok((self.buf, self.listing))
    }

    /// The listing so far, one line per entry. Used by tests and logging.
    pub fn listing(&self) -> String {
        self.listing.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::arm::{CoreReg, DReg, SReg};

    #[test]
    fn encodes_basic_data_processing() {
        let mut a = Assembler::new();
        a.add(CoreReg::R0, CoreReg::R1, Op2::Reg(CoreReg::R2));
        a.mov_imm8(Cond::Al, CoreReg::R0, 1);
        a.bx(CoreReg::Lr);
        let (code, _) = a.finalize().unwrap();
        assert_eq!(&code[0..4], &0xE081_0002u32.to_le_bytes());
        assert_eq!(&code[4..8], &0xE3A0_0001u32.to_le_bytes());
        assert_eq!(&code[8..12], &0xE12F_FF1Eu32.to_le_bytes());
    }

    #[test]
    fn encodes_push_pop() {
        let mut a = Assembler::new();
        a.push_list((1 << 4) | (1 << 14)); // push {r4, lr}
        a.pop_list((1 << 4) | (1 << 15)); // pop {r4, pc}
        let (code, listing) = a.finalize().unwrap();
        assert_eq!(&code[0..4], &0xE92D_4010u32.to_le_bytes());
        assert_eq!(&code[4..8], &0xE8BD_8010u32.to_le_bytes());
        assert_eq!(listing[0], "push {r4, lr}");
        assert_eq!(listing[1], "pop {r4, pc}");
    }

    #[test]
    fn rotated_immediates() {
        assert!(matches!(Op2::imm(0xFF), Some(Op2::Imm(0xFF, 0, 0xFF))));
        assert!(Op2::imm(0x3F0).is_some());
        assert!(Op2::imm(0xFF00_0000).is_some());
        assert!(Op2::imm(0x101).is_none());
        assert!(Op2::imm(0x1FF).is_none());
    }

    #[test]
    fn mov_imm32_strategies() {
        let mut a = Assembler::new();
        a.mov_imm32(CoreReg::R0, 0xFF); // mov
        a.mov_imm32(CoreReg::R1, -1); // mvn #0
        a.mov_imm32(CoreReg::R2, 0x1234); // movw
        a.mov_imm32(CoreReg::R3, 0x1234_5678); // movw+movt
        let listing = a.listing();
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines[0], "mov r0, #255");
        assert_eq!(lines[1], "mvn r1, #0");
        assert_eq!(lines[2], "movw r2, #4660");
        assert_eq!(lines[3], "movw r3, #22136");
        assert_eq!(lines[4], "movt r3, #4660");
    }

    #[test]
    fn forward_branch_patching() {
        let mut a = Assembler::new();
        let l = a.new_label();
        a.b_cond(Cond::Eq, l); // offset 0
        a.mov(CoreReg::R0, CoreReg::R1); // offset 4
        a.bind(l); // offset 8
        a.bx(CoreReg::Lr);
        let (code, _) = a.finalize().unwrap();
        // Displacement: 8 - (0 + 8) = 0 words.
        assert_eq!(&code[0..4], &0x0A00_0000u32.to_le_bytes());
    }

    #[test]
    fn backward_branch_patching() {
        let mut a = Assembler::new();
        let l = a.new_label();
        a.bind(l); // offset 0
        a.mov(CoreReg::R0, CoreReg::R1); // offset 0
        a.b(l); // offset 4; displacement 0 - 12 = -3 words
        let (code, _) = a.finalize().unwrap();
        assert_eq!(&code[4..8], &0xEAFF_FFFDu32.to_le_bytes());
    }

    #[test]
    fn unbound_label_is_an_error() {
        let mut a = Assembler::new();
        let l = a.new_label();
        a.b(l);
        assert!(a.finalize().is_err());
    }

    #[test]
    fn vfp_listing() {
        let mut a = Assembler::new();
        a.vldr_s(SReg::S0, CoreReg::Sp, 8);
        a.vadd_d(DReg::D0, DReg::D1, DReg::D2);
        a.vmov_drr(DReg::D3, CoreReg::R0, CoreReg::R1);
        a.vmrs();
        let listing = a.listing();
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines[0], "vldr s0, [sp, #8]");
        assert_eq!(lines[1], "vadd.f64 d0, d1, d2");
        assert_eq!(lines[2], "vmov d3, r0, r1");
        assert_eq!(lines[3], "vmrs apsr_nzcv, fpscr");
    }

    #[test]
    fn sdiv_encoding() {
        let mut a = Assembler::new();
        a.sdiv(CoreReg::R0, CoreReg::R1, CoreReg::R2);
        let (code, listing) = a.finalize().unwrap();
        assert_eq!(&code[0..4], &0xE710_F211u32.to_le_bytes());
        assert_eq!(listing[0], "sdiv r0, r1, r2");
    }
}
