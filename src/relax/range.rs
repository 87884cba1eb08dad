// This module holds the range tables of the relaxation engine. A RangeClass names one of
// the five displacement intervals a branch can be placed in (S256, S16K, S64K, S16M and
// the unbounded U4G), and a BranchShape captures the operands of a symbolic branch or call
// that survive relaxation (the condition registers and the opcode). For every shape and
// class there is exactly one instruction sequence, built by BranchShape::sequence: the
// written branch in its smallest encoding, an inverted branch over a jump for long
// conditional branches, or a sethi/ori/jr-style absolute sequence through the assembler
// temporary for the unbounded class. Class selection is monotonic: a branch never returns
// to a smaller class than the one it was committed to in an earlier pass. LoadForm plays the
// same role for symbolic movi address loads.

//! Range classes and relaxation sequences.

use std::fmt;

use crate::core::error::{RelaxError, RelaxResult};
use crate::nds32::insn::{Insn, Opcode};
use crate::nds32::reg::Reg;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RangeClass {
    S256,
    S16K,
    S64K,
    S16M,
    U4G,
}

impl RangeClass {
    pub const ALL: [RangeClass; 5] = [
        RangeClass::S256,
        RangeClass::S16K,
        RangeClass::S64K,
        RangeClass::S16M,
        RangeClass::U4G,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Inclusive displacement interval, `None` for the unbounded class.
    pub const fn bounds(self) -> Option<(i64, i64)> {
        match self {
            RangeClass::S256 => Some((-256, 254)),
            RangeClass::S16K => Some((-16_384, 16_382)),
            RangeClass::S64K => Some((-65_536, 65_534)),
            RangeClass::S16M => Some((-16_777_216, 16_777_214)),
            RangeClass::U4G => None,
        }
    }

    pub fn contains(self, disp: i64) -> bool {
        match self.bounds() {
            Some((lo, hi)) => (lo..=hi).contains(&disp),
            None => true,
        }
    }
}

impl fmt::Display for RangeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RangeClass::S256 => "S256",
            RangeClass::S16K => "S16K",
            RangeClass::S64K => "S64K",
            RangeClass::S16M => "S16M",
            RangeClass::U4G => "U4G",
        };
        f.write_str(name)
    }
}

/// Operands of a symbolic branch that relaxation preserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchShape {
    /// `j`
    Jump,
    /// `jal`
    Call,
    /// `beqz`/`bnez rt`
    CondZero { op: Opcode, rt: Reg },
    /// `bgez`/`bltz`/`bgtz`/`blez rt`
    CondSign { op: Opcode, rt: Reg },
    /// `beq`/`bne rt, ra`
    CondCmp { op: Opcode, rt: Reg, ra: Reg },
    /// `bgezal`/`bltzal rt`
    CondCall { op: Opcode, rt: Reg },
}

/// What the operand field of a sequence step refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOperand {
    None,
    /// Pc-relative displacement to the branch target.
    Target,
    /// Pc-relative displacement to the synthetic label after the sequence.
    SkipLabel,
    TargetHi20,
    TargetLo12,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub insn: Insn,
    pub operand: StepOperand,
}

impl Step {
    fn new(insn: Insn, operand: StepOperand) -> Self {
        Self { insn, operand }
    }
}

/// Instruction sequence chosen for one shape and class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    pub steps: Vec<Step>,
}

impl Sequence {
    pub fn size(&self) -> u32 {
        self.steps.iter().map(|s| s.insn.width().bytes()).sum()
    }

    /// Byte offset of the instruction carrying the pc-relative target, if any.
    pub fn target_offset(&self) -> Option<u32> {
        let mut offset = 0;
        for step in &self.steps {
            if step.operand == StepOperand::Target {
                return Some(offset);
            }
            offset += step.insn.width().bytes();
        }
        None
    }

    /// Whether an inverted branch skips over the rest of the sequence.
    pub fn has_skip(&self) -> bool {
        self.steps.iter().any(|s| s.operand == StepOperand::SkipLabel)
    }
}

/// `sethi ta, hi20(target); ori ta, ta, lo12(target)`
fn absolute_prefix(steps: &mut Vec<Step>) {
    steps.push(Step::new(Insn::sethi(Reg::TA, 0), StepOperand::TargetHi20));
    steps.push(Step::new(Insn::ori(Reg::TA, Reg::TA, 0), StepOperand::TargetLo12));
}

impl BranchShape {
    /// Classify a symbolic branch or call. Compact forms map to their full-width shape.
    pub fn from_insn(insn: &Insn) -> RelaxResult<BranchShape> {
        let shape = match insn.op {
            Opcode::J | Opcode::J8 => BranchShape::Jump,
            Opcode::Jal => BranchShape::Call,
            Opcode::Beqz | Opcode::Bnez => BranchShape::CondZero {
                op: insn.op,
                rt: insn.rt,
            },
            Opcode::Beqz38 => BranchShape::CondZero {
                op: Opcode::Beqz,
                rt: insn.rt,
            },
            Opcode::Bnez38 => BranchShape::CondZero {
                op: Opcode::Bnez,
                rt: insn.rt,
            },
            Opcode::Bgez | Opcode::Bltz | Opcode::Bgtz | Opcode::Blez => BranchShape::CondSign {
                op: insn.op,
                rt: insn.rt,
            },
            Opcode::Beq | Opcode::Bne => BranchShape::CondCmp {
                op: insn.op,
                rt: insn.rt,
                ra: insn.ra,
            },
            Opcode::Beqs38 => BranchShape::CondCmp {
                op: Opcode::Beq,
                rt: insn.rt,
                ra: Reg::R5,
            },
            Opcode::Bnes38 => BranchShape::CondCmp {
                op: Opcode::Bne,
                rt: insn.rt,
                ra: Reg::R5,
            },
            Opcode::Bgezal | Opcode::Bltzal => BranchShape::CondCall {
                op: insn.op,
                rt: insn.rt,
            },
            op => return Err(RelaxError::UnclassifiableOpcode { opcode: op.name() }),
        };
        Ok(shape)
    }

    /// Class reached by the form the instruction was written in.
    pub fn written_class(op: Opcode) -> RangeClass {
        match op {
            Opcode::J8 | Opcode::Beqz38 | Opcode::Bnez38 | Opcode::Beqs38 | Opcode::Bnes38 => {
                RangeClass::S256
            }
            Opcode::Beq | Opcode::Bne => RangeClass::S16K,
            Opcode::J | Opcode::Jal => RangeClass::S16M,
            _ => RangeClass::S64K,
        }
    }

    fn base_insn(self) -> Insn {
        match self {
            BranchShape::Jump => Insn::new(Opcode::J),
            BranchShape::Call => Insn::new(Opcode::Jal),
            BranchShape::CondZero { op, rt }
            | BranchShape::CondSign { op, rt }
            | BranchShape::CondCall { op, rt } => Insn { rt, ..Insn::new(op) },
            BranchShape::CondCmp { op, rt, ra } => Insn { rt, ra, ..Insn::new(op) },
        }
    }

    /// The inverted condition that skips over a long sequence.
    fn inverted(self) -> Option<Insn> {
        let base = self.base_insn();
        base.op.inverse_branch().map(|op| Insn { op, ..base })
    }

    fn compact_form(self) -> Option<Insn> {
        match self {
            BranchShape::Jump => Some(Insn::new(Opcode::J8)),
            BranchShape::CondZero { op, rt } if rt.is_low3() => {
                let op = if op == Opcode::Beqz { Opcode::Beqz38 } else { Opcode::Bnez38 };
                Some(Insn { rt, ..Insn::new(op) })
            }
            BranchShape::CondCmp { op, rt, ra } if ra == Reg::R5 && rt.is_low3() && rt != Reg::R5 => {
                let op = if op == Opcode::Beq { Opcode::Beqs38 } else { Opcode::Bnes38 };
                Some(Insn { rt, ..Insn::new(op) })
            }
            _ => None,
        }
    }

    /// Instruction sequence for `class`. `allow_compact` enables the 16-bit short forms.
    pub fn sequence(self, class: RangeClass, allow_compact: bool) -> Sequence {
        let mut steps = Vec::with_capacity(4);
        let direct = |steps: &mut Vec<Step>| steps.push(Step::new(self.base_insn(), StepOperand::Target));

        match (self, class) {
            (_, RangeClass::S256) if allow_compact && self.compact_form().is_some() => {
                if let Some(short) = self.compact_form() {
                    steps.push(Step::new(short, StepOperand::Target));
                }
            }
            (BranchShape::Jump, RangeClass::U4G) => {
                absolute_prefix(&mut steps);
                steps.push(Step::new(Insn::jr(Reg::TA), StepOperand::None));
            }
            (BranchShape::Call, RangeClass::U4G) => {
                absolute_prefix(&mut steps);
                steps.push(Step::new(Insn::jral(Reg::TA), StepOperand::None));
            }
            (BranchShape::Jump | BranchShape::Call, _) => direct(&mut steps),
            (BranchShape::CondCmp { .. }, RangeClass::S256 | RangeClass::S16K) => direct(&mut steps),
            (_, RangeClass::S256 | RangeClass::S16K | RangeClass::S64K)
                if !matches!(self, BranchShape::CondCmp { .. }) =>
            {
                direct(&mut steps)
            }
            (_, RangeClass::U4G) => {
                if let Some(inv) = self.inverted() {
                    steps.push(Step::new(inv, StepOperand::SkipLabel));
                }
                absolute_prefix(&mut steps);
                let transfer = if matches!(self, BranchShape::CondCall { .. }) {
                    Insn::jral(Reg::TA)
                } else {
                    Insn::jr(Reg::TA)
                };
                steps.push(Step::new(transfer, StepOperand::None));
            }
            _ => {
                if let Some(inv) = self.inverted() {
                    steps.push(Step::new(inv, StepOperand::SkipLabel));
                }
                let far = if matches!(self, BranchShape::CondCall { .. }) {
                    Insn::new(Opcode::Jal)
                } else {
                    Insn::new(Opcode::J)
                };
                steps.push(Step::new(far, StepOperand::Target));
            }
        }
        Sequence { steps }
    }

    /// Smallest class whose sequence reaches a target `disp` bytes from the start of the
    /// sequence. `None` means the target is not known at assembly time.
    pub fn smallest_fitting(self, disp: Option<i64>, allow_compact: bool) -> RangeClass {
        let Some(disp) = disp else {
            return RangeClass::U4G;
        };
        for class in RangeClass::ALL {
            let seq = self.sequence(class, allow_compact);
            let reach = disp - seq.target_offset().unwrap_or(0) as i64;
            if class.contains(reach) {
                return class;
            }
        }
        RangeClass::U4G
    }

    /// Class to commit for this pass: never below `committed`.
    pub fn select(self, committed: RangeClass, disp: Option<i64>, allow_compact: bool) -> RangeClass {
        committed.max(self.smallest_fitting(disp, allow_compact))
    }
}

/// Encoding chosen for a symbolic `movi` address load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LoadForm {
    Movi55,
    Movi,
    Sethi,
    SethiOri,
}

impl LoadForm {
    pub const fn size(self) -> u32 {
        match self {
            LoadForm::Movi55 => 2,
            LoadForm::Movi | LoadForm::Sethi => 4,
            LoadForm::SethiOri => 8,
        }
    }

    /// Smallest form able to load `value`; `None` for relocatable symbols.
    pub fn for_value(value: Option<i64>, allow_compact: bool) -> LoadForm {
        match value {
            Some(v) if allow_compact && (-16..=15).contains(&v) => LoadForm::Movi55,
            Some(v) if (-(1 << 19)..(1 << 19)).contains(&v) => LoadForm::Movi,
            Some(v) if v & 0xfff == 0 && (-(1i64 << 31)..=0xffff_ffff).contains(&v) => LoadForm::Sethi,
            _ => LoadForm::SethiOri,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(n: u8) -> Reg {
        Reg::new(n).unwrap()
    }

    #[test]
    fn test_jump_sequence_sizes() {
        let sizes: Vec<u32> = RangeClass::ALL
            .iter()
            .map(|&c| BranchShape::Jump.sequence(c, true).size())
            .collect();
        assert_eq!(sizes, vec![2, 4, 4, 4, 12]);
        assert_eq!(BranchShape::Jump.sequence(RangeClass::S256, false).size(), 4);
        let call: Vec<u32> = RangeClass::ALL
            .iter()
            .map(|&c| BranchShape::Call.sequence(c, true).size())
            .collect();
        assert_eq!(call, vec![4, 4, 4, 4, 12]);
    }

    #[test]
    fn test_conditional_sequence_sizes() {
        let table = |shape: BranchShape| -> Vec<u32> {
            RangeClass::ALL
                .iter()
                .map(|&c| shape.sequence(c, true).size())
                .collect()
        };
        let low = BranchShape::CondZero { op: Opcode::Beqz, rt: r(3) };
        let high = BranchShape::CondZero { op: Opcode::Bnez, rt: r(9) };
        assert_eq!(table(low), vec![2, 4, 4, 8, 16]);
        assert_eq!(table(high), vec![4, 4, 4, 8, 16]);

        let sign = BranchShape::CondSign { op: Opcode::Bgtz, rt: r(1) };
        assert_eq!(table(sign), vec![4, 4, 4, 8, 16]);

        let cmp_r5 = BranchShape::CondCmp { op: Opcode::Beq, rt: r(2), ra: Reg::R5 };
        let cmp = BranchShape::CondCmp { op: Opcode::Bne, rt: r(2), ra: r(3) };
        assert_eq!(table(cmp_r5), vec![2, 4, 8, 8, 16]);
        assert_eq!(table(cmp), vec![4, 4, 8, 8, 16]);

        let call = BranchShape::CondCall { op: Opcode::Bgezal, rt: r(0) };
        assert_eq!(table(call), vec![4, 4, 4, 8, 16]);
    }

    #[test]
    fn test_long_sequences_invert_the_condition() {
        let shape = BranchShape::CondCall { op: Opcode::Bltzal, rt: r(4) };
        let seq = shape.sequence(RangeClass::S16M, true);
        assert_eq!(seq.steps[0].insn.op, Opcode::Bgez);
        assert_eq!(seq.steps[0].operand, StepOperand::SkipLabel);
        assert_eq!(seq.steps[1].insn.op, Opcode::Jal);
        assert_eq!(seq.target_offset(), Some(4));

        let seq = shape.sequence(RangeClass::U4G, true);
        let ops: Vec<Opcode> = seq.steps.iter().map(|s| s.insn.op).collect();
        assert_eq!(ops, vec![Opcode::Bgez, Opcode::Sethi, Opcode::Ori, Opcode::Jral]);
        assert_eq!(seq.steps[3].insn.rb, Reg::TA);
        assert!(seq.has_skip());
        assert_eq!(seq.target_offset(), None);
    }

    #[test]
    fn test_selection_boundaries() {
        let j = BranchShape::Jump;
        assert_eq!(j.smallest_fitting(Some(254), true), RangeClass::S256);
        assert_eq!(j.smallest_fitting(Some(256), true), RangeClass::S16K);
        assert_eq!(j.smallest_fitting(Some(-256), true), RangeClass::S256);
        assert_eq!(j.smallest_fitting(Some(300), true), RangeClass::S16K);
        assert_eq!(j.smallest_fitting(Some(20_000_000), true), RangeClass::U4G);
        assert_eq!(j.smallest_fitting(None, true), RangeClass::U4G);

        // The far jump of an inverted sequence sits 4 bytes into the frag.
        let bnez = BranchShape::CondZero { op: Opcode::Bnez, rt: r(9) };
        assert_eq!(bnez.smallest_fitting(Some(-16_777_214), true), RangeClass::U4G);
        assert_eq!(bnez.smallest_fitting(Some(-16_777_212), true), RangeClass::S16M);
    }

    #[test]
    fn test_select_never_shrinks() {
        let j = BranchShape::Jump;
        assert_eq!(j.select(RangeClass::S16M, Some(4), true), RangeClass::S16M);
        assert_eq!(j.select(RangeClass::S256, Some(4000), true), RangeClass::S16K);
    }

    #[test]
    fn test_from_insn() {
        let beqs = Insn { rt: r(1), ..Insn::new(Opcode::Beqs38) };
        assert_eq!(
            BranchShape::from_insn(&beqs).unwrap(),
            BranchShape::CondCmp { op: Opcode::Beq, rt: r(1), ra: Reg::R5 }
        );
        assert!(matches!(
            BranchShape::from_insn(&Insn::jr(r(1))),
            Err(RelaxError::UnclassifiableOpcode { opcode: "jr" })
        ));
    }

    #[test]
    fn test_load_forms() {
        assert_eq!(LoadForm::for_value(Some(-16), true), LoadForm::Movi55);
        assert_eq!(LoadForm::for_value(Some(-16), false), LoadForm::Movi);
        assert_eq!(LoadForm::for_value(Some(0x7ffff), true), LoadForm::Movi);
        assert_eq!(LoadForm::for_value(Some(0x8000_0000), true), LoadForm::Sethi);
        assert_eq!(LoadForm::for_value(Some(0x8000_0001), true), LoadForm::SethiOri);
        assert_eq!(LoadForm::for_value(None, true), LoadForm::SethiOri);
    }
}
