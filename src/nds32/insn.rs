// This module defines the instruction model the relaxation core reasons about: an Opcode
// enum covering the NDS32 subset that matters for relaxation (address formation, ALU and
// load/store forms with compact equivalents, load/store-multiple, every branch, call and
// jump form in both widths, and the no-ops), the operand-carrying Insn struct, the
// symbolic operand attached to instructions that reference a label (with its hi20/lo12
// part and GOT/GOTOFF/PLT flavor), and the control-flow classification used by the block
// builder and the CFG. Operand conventions per opcode are documented on the enum; the
// same Insn value is what the codec encodes, decodes and converts between widths.

//! NDS32 instruction model.

use std::fmt;

use super::reg::Reg;
use crate::core::symbols::SymbolId;

/// Encoded width of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Width {
    Compact,
    Full,
}

impl Width {
    pub const fn bytes(self) -> u32 {
        match self {
            Width::Compact => 2,
            Width::Full => 4,
        }
    }
}

/// Opcodes known to the relaxation core.
///
/// Operand conventions (`Insn` fields): `rt` destination/first, `ra` source/base,
/// `rb` second source or jump register, `imm` immediate or byte displacement.
/// `lmw`/`smw` use `rt..=rb` as the register range and `ra` as the base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Sethi,
    Ori,
    Addi,
    Movi,
    Add,
    Sub,
    And,
    Or,
    Xor,
    Lwi,
    Swi,
    Lw,
    Lmw,
    Smw,
    J,
    Jal,
    Jr,
    Jral,
    Ret,
    Beq,
    Bne,
    Beqz,
    Bnez,
    Bgez,
    Bltz,
    Bgtz,
    Blez,
    Bgezal,
    Bltzal,
    Nop,
    Mov55,
    Movi55,
    Add333,
    Lwi333,
    Swi333,
    J8,
    Beqz38,
    Bnez38,
    Beqs38,
    Bnes38,
    Jr5,
    Jral5,
    Ret5,
    Nop16,
}

/// Control-flow role of an instruction at the end of a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKind {
    NonBranch,
    UncondBranch,
    CondBranch,
    UncondCall,
    CondCall,
    IndirectJump,
    IndirectCall,
    Return,
}

impl FlowKind {
    /// Ends a basic block.
    pub fn is_terminator(self) -> bool {
        self != FlowKind::NonBranch
    }

    /// Control may continue with the next instruction in layout order.
    pub fn has_fallthrough(self) -> bool {
        matches!(
            self,
            FlowKind::NonBranch | FlowKind::CondBranch | FlowKind::CondCall
        )
    }

    pub fn is_call(self) -> bool {
        matches!(
            self,
            FlowKind::UncondCall | FlowKind::CondCall | FlowKind::IndirectCall
        )
    }
}

impl Opcode {
    pub const fn name(self) -> &'static str {
        match self {
            Opcode::Sethi => "sethi",
            Opcode::Ori => "ori",
            Opcode::Addi => "addi",
            Opcode::Movi => "movi",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Lwi => "lwi",
            Opcode::Swi => "swi",
            Opcode::Lw => "lw",
            Opcode::Lmw => "lmw.bi",
            Opcode::Smw => "smw.bi",
            Opcode::J => "j",
            Opcode::Jal => "jal",
            Opcode::Jr => "jr",
            Opcode::Jral => "jral",
            Opcode::Ret => "ret",
            Opcode::Beq => "beq",
            Opcode::Bne => "bne",
            Opcode::Beqz => "beqz",
            Opcode::Bnez => "bnez",
            Opcode::Bgez => "bgez",
            Opcode::Bltz => "bltz",
            Opcode::Bgtz => "bgtz",
            Opcode::Blez => "blez",
            Opcode::Bgezal => "bgezal",
            Opcode::Bltzal => "bltzal",
            Opcode::Nop => "nop",
            Opcode::Mov55 => "mov55",
            Opcode::Movi55 => "movi55",
            Opcode::Add333 => "add333",
            Opcode::Lwi333 => "lwi333",
            Opcode::Swi333 => "swi333",
            Opcode::J8 => "j8",
            Opcode::Beqz38 => "beqz38",
            Opcode::Bnez38 => "bnez38",
            Opcode::Beqs38 => "beqs38",
            Opcode::Bnes38 => "bnes38",
            Opcode::Jr5 => "jr5",
            Opcode::Jral5 => "jral5",
            Opcode::Ret5 => "ret5",
            Opcode::Nop16 => "nop16",
        }
    }

    pub const fn width(self) -> Width {
        match self {
            Opcode::Mov55
            | Opcode::Movi55
            | Opcode::Add333
            | Opcode::Lwi333
            | Opcode::Swi333
            | Opcode::J8
            | Opcode::Beqz38
            | Opcode::Bnez38
            | Opcode::Beqs38
            | Opcode::Bnes38
            | Opcode::Jr5
            | Opcode::Jral5
            | Opcode::Ret5
            | Opcode::Nop16 => Width::Compact,
            _ => Width::Full,
        }
    }

    pub const fn flow(self) -> FlowKind {
        match self {
            Opcode::J | Opcode::J8 => FlowKind::UncondBranch,
            Opcode::Jal => FlowKind::UncondCall,
            Opcode::Beq
            | Opcode::Bne
            | Opcode::Beqz
            | Opcode::Bnez
            | Opcode::Bgez
            | Opcode::Bltz
            | Opcode::Bgtz
            | Opcode::Blez
            | Opcode::Beqz38
            | Opcode::Bnez38
            | Opcode::Beqs38
            | Opcode::Bnes38 => FlowKind::CondBranch,
            Opcode::Bgezal | Opcode::Bltzal => FlowKind::CondCall,
            Opcode::Jr | Opcode::Jr5 => FlowKind::IndirectJump,
            Opcode::Jral | Opcode::Jral5 => FlowKind::IndirectCall,
            Opcode::Ret | Opcode::Ret5 => FlowKind::Return,
            _ => FlowKind::NonBranch,
        }
    }

    /// Branch whose inverse condition exists, for the skip-over sequences.
    pub const fn inverse_branch(self) -> Option<Opcode> {
        Some(match self {
            Opcode::Beq => Opcode::Bne,
            Opcode::Bne => Opcode::Beq,
            Opcode::Beqz => Opcode::Bnez,
            Opcode::Bnez => Opcode::Beqz,
            Opcode::Bgez => Opcode::Bltz,
            Opcode::Bltz => Opcode::Bgez,
            Opcode::Bgtz => Opcode::Blez,
            Opcode::Blez => Opcode::Bgtz,
            // A skipped conditional call is a plain conditional branch on the inverse.
            Opcode::Bgezal => Opcode::Bltz,
            Opcode::Bltzal => Opcode::Bgez,
            _ => return None,
        })
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which part of a symbol's value an operand carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymPart {
    /// Upper 20 bits (`hi20`), as used by `sethi`.
    Hi20,
    /// Lower 12 bits (`lo12`), as used by `ori`.
    Lo12,
    /// Whole value: branch/call targets and `movi` address loads.
    Full,
}

/// Position-independent flavor of a symbolic operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PicFlavor {
    #[default]
    Abs,
    Got,
    GotOff,
    Plt,
}

impl fmt::Display for PicFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PicFlavor::Abs => Ok(()),
            PicFlavor::Got => write!(f, "@GOT"),
            PicFlavor::GotOff => write!(f, "@GOTOFF"),
            PicFlavor::Plt => write!(f, "@PLT"),
        }
    }
}

/// Symbolic operand of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymOperand {
    pub sym: SymbolId,
    pub addend: i64,
    pub part: SymPart,
    pub flavor: PicFlavor,
}

impl SymOperand {
    pub fn target(sym: SymbolId) -> Self {
        Self {
            sym,
            addend: 0,
            part: SymPart::Full,
            flavor: PicFlavor::Abs,
        }
    }

    pub fn hi20(sym: SymbolId, flavor: PicFlavor) -> Self {
        Self {
            sym,
            addend: 0,
            part: SymPart::Hi20,
            flavor,
        }
    }

    pub fn lo12(sym: SymbolId, flavor: PicFlavor) -> Self {
        Self {
            sym,
            addend: 0,
            part: SymPart::Lo12,
            flavor,
        }
    }

    pub fn with_addend(mut self, addend: i64) -> Self {
        self.addend = addend;
        self
    }

    /// Same symbol, addend and flavor; parts may differ.
    pub fn same_reference(&self, other: &SymOperand) -> bool {
        self.sym == other.sym && self.addend == other.addend && self.flavor == other.flavor
    }
}

/// One real (already macro-expanded) instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Insn {
    pub op: Opcode,
    pub rt: Reg,
    pub ra: Reg,
    pub rb: Reg,
    pub imm: i32,
    pub sym: Option<SymOperand>,
}

const R0: Reg = Reg::from_field(0);

impl Insn {
    pub const fn new(op: Opcode) -> Self {
        Self {
            op,
            rt: R0,
            ra: R0,
            rb: R0,
            imm: 0,
            sym: None,
        }
    }

    pub fn width(&self) -> Width {
        self.op.width()
    }

    pub fn flow(&self) -> FlowKind {
        self.op.flow()
    }

    pub fn with_sym(mut self, sym: SymOperand) -> Self {
        self.sym = Some(sym);
        self
    }

    pub fn sethi(rt: Reg, imm20: i32) -> Self {
        Self { rt, imm: imm20, ..Self::new(Opcode::Sethi) }
    }

    pub fn ori(rt: Reg, ra: Reg, imm15: i32) -> Self {
        Self { rt, ra, imm: imm15, ..Self::new(Opcode::Ori) }
    }

    pub fn addi(rt: Reg, ra: Reg, imm15s: i32) -> Self {
        Self { rt, ra, imm: imm15s, ..Self::new(Opcode::Addi) }
    }

    pub fn movi(rt: Reg, imm20s: i32) -> Self {
        Self { rt, imm: imm20s, ..Self::new(Opcode::Movi) }
    }

    /// Three-register ALU operation (`add`, `sub`, `and`, `or`, `xor`).
    pub fn alu(op: Opcode, rt: Reg, ra: Reg, rb: Reg) -> Self {
        Self { rt, ra, rb, ..Self::new(op) }
    }

    pub fn lwi(rt: Reg, ra: Reg, offset: i32) -> Self {
        Self { rt, ra, imm: offset, ..Self::new(Opcode::Lwi) }
    }

    pub fn swi(rt: Reg, ra: Reg, offset: i32) -> Self {
        Self { rt, ra, imm: offset, ..Self::new(Opcode::Swi) }
    }

    pub fn lw(rt: Reg, ra: Reg, rb: Reg) -> Self {
        Self { rt, ra, rb, ..Self::new(Opcode::Lw) }
    }

    /// `lmw.bi first..=last, [base]`.
    pub fn lmw(first: Reg, last: Reg, base: Reg) -> Self {
        Self { rt: first, rb: last, ra: base, ..Self::new(Opcode::Lmw) }
    }

    /// `smw.bi first..=last, [base]`.
    pub fn smw(first: Reg, last: Reg, base: Reg) -> Self {
        Self { rt: first, rb: last, ra: base, ..Self::new(Opcode::Smw) }
    }

    pub fn j(target: SymbolId) -> Self {
        Self::new(Opcode::J).with_sym(SymOperand::target(target))
    }

    pub fn jal(target: SymbolId) -> Self {
        Self::new(Opcode::Jal).with_sym(SymOperand::target(target))
    }

    pub fn jr(rb: Reg) -> Self {
        Self { rb, ..Self::new(Opcode::Jr) }
    }

    pub fn jral(rb: Reg) -> Self {
        Self { rt: Reg::LP, rb, ..Self::new(Opcode::Jral) }
    }

    pub fn ret() -> Self {
        Self { rb: Reg::LP, ..Self::new(Opcode::Ret) }
    }

    /// `beq`/`bne rt, ra, target`.
    pub fn branch_cmp(op: Opcode, rt: Reg, ra: Reg, target: SymbolId) -> Self {
        Self { rt, ra, ..Self::new(op) }.with_sym(SymOperand::target(target))
    }

    /// `beqz`..`blez`, `bgezal`, `bltzal rt, target`.
    pub fn branch_zero(op: Opcode, rt: Reg, target: SymbolId) -> Self {
        Self { rt, ..Self::new(op) }.with_sym(SymOperand::target(target))
    }

    pub fn nop() -> Self {
        Self::new(Opcode::Nop)
    }

    pub fn mov55(rt: Reg, ra: Reg) -> Self {
        Self { rt, ra, ..Self::new(Opcode::Mov55) }
    }

    pub fn jral5(rb: Reg) -> Self {
        Self { rt: Reg::LP, rb, ..Self::new(Opcode::Jral5) }
    }

    pub fn jr5(rb: Reg) -> Self {
        Self { rb, ..Self::new(Opcode::Jr5) }
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sym = |f: &mut fmt::Formatter<'_>| -> fmt::Result {
            match self.sym {
                Some(s) => match s.part {
                    SymPart::Hi20 => write!(f, "hi20(sym#{}{})", s.sym.0, s.flavor),
                    SymPart::Lo12 => write!(f, "lo12(sym#{}{})", s.sym.0, s.flavor),
                    SymPart::Full => write!(f, "sym#{}{}", s.sym.0, s.flavor),
                },
                None => write!(f, "{}", self.imm),
            }
        };
        write!(f, "{} ", self.op)?;
        match self.op {
            Opcode::Sethi | Opcode::Movi | Opcode::Movi55 => {
                write!(f, "{}, ", self.rt)?;
                sym(f)
            }
            Opcode::Ori | Opcode::Addi => {
                write!(f, "{}, {}, ", self.rt, self.ra)?;
                sym(f)
            }
            Opcode::Add | Opcode::Sub | Opcode::And | Opcode::Or | Opcode::Xor | Opcode::Add333 => {
                write!(f, "{}, {}, {}", self.rt, self.ra, self.rb)
            }
            Opcode::Lwi | Opcode::Swi | Opcode::Lwi333 | Opcode::Swi333 => {
                write!(f, "{}, [{} + {}]", self.rt, self.ra, self.imm)
            }
            Opcode::Lw => write!(f, "{}, [{} + {}]", self.rt, self.ra, self.rb),
            Opcode::Lmw | Opcode::Smw => {
                write!(f, "{}, [{}], {}", self.rt, self.ra, self.rb)
            }
            Opcode::Mov55 => write!(f, "{}, {}", self.rt, self.ra),
            Opcode::Jr | Opcode::Jr5 | Opcode::Jral | Opcode::Jral5 | Opcode::Ret | Opcode::Ret5 => {
                write!(f, "{}", self.rb)
            }
            Opcode::Beq | Opcode::Bne => {
                write!(f, "{}, {}, ", self.rt, self.ra)?;
                sym(f)
            }
            Opcode::Beqz
            | Opcode::Bnez
            | Opcode::Bgez
            | Opcode::Bltz
            | Opcode::Bgtz
            | Opcode::Blez
            | Opcode::Bgezal
            | Opcode::Bltzal
            | Opcode::Beqz38
            | Opcode::Bnez38
            | Opcode::Beqs38
            | Opcode::Bnes38 => {
                write!(f, "{}, ", self.rt)?;
                sym(f)
            }
            Opcode::J | Opcode::Jal | Opcode::J8 => sym(f),
            Opcode::Nop | Opcode::Nop16 => Ok(()),
        }
    }
}
