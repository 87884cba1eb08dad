//! Register dependency facts.
//!
//! Every instruction is summarized as an ordered list of `(register, access)` facts. The
//! liveness walk and the per-block witness sets only look at the first fact naming a
//! register, so the order is significant. Reads are listed before writes, and a register
//! that is both read and written by a single-register instruction collapses into one
//! `ReadWrite` fact.
//!
//! Load-multiple is the exception. `lmw` lists the loaded registers before its base
//! register, so a base register inside the loaded range is seen as written first.
//! `RelaxConfig::multi_reg_base_conservative` moves the base read to the front.

use super::insn::{Insn, Opcode};
use super::reg::Reg;
use crate::core::config::RelaxConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    pub fn is_read(self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    pub fn is_write(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

/// One dependency fact. The register is kept as a raw number and validated by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegDep {
    pub reg: u8,
    pub access: Access,
}

impl RegDep {
    pub fn read(reg: Reg) -> Self {
        Self {
            reg: reg.num(),
            access: Access::Read,
        }
    }

    pub fn write(reg: Reg) -> Self {
        Self {
            reg: reg.num(),
            access: Access::Write,
        }
    }
}

/// `lmw`/`smw` with a first register above the last one.
pub fn is_malformed_multi(insn: &Insn) -> bool {
    matches!(insn.op, Opcode::Lmw | Opcode::Smw) && insn.rt > insn.rb
}

fn regs_in(first: Reg, last: Reg) -> impl Iterator<Item = Reg> {
    (first.num()..=last.num()).filter_map(Reg::new)
}

/// Dependency facts of `insn` in scan order.
pub fn dependencies(insn: &Insn, config: &RelaxConfig) -> Vec<RegDep> {
    let mut reads: Vec<Reg> = Vec::with_capacity(2);
    let mut writes: Vec<Reg> = Vec::with_capacity(1);

    match insn.op {
        Opcode::Sethi | Opcode::Movi | Opcode::Movi55 => writes.push(insn.rt),
        Opcode::Ori | Opcode::Addi | Opcode::Mov55 | Opcode::Lwi | Opcode::Lwi333 => {
            reads.push(insn.ra);
            writes.push(insn.rt);
        }
        Opcode::Add
        | Opcode::Sub
        | Opcode::And
        | Opcode::Or
        | Opcode::Xor
        | Opcode::Add333
        | Opcode::Lw => {
            reads.push(insn.ra);
            reads.push(insn.rb);
            writes.push(insn.rt);
        }
        Opcode::Swi | Opcode::Swi333 => {
            reads.push(insn.rt);
            reads.push(insn.ra);
        }
        Opcode::Lmw => {
            let loaded = regs_in(insn.rt, insn.rb).map(RegDep::write);
            return if config.multi_reg_base_conservative {
                std::iter::once(RegDep::read(insn.ra)).chain(loaded).collect()
            } else {
                loaded.chain(std::iter::once(RegDep::read(insn.ra))).collect()
            };
        }
        Opcode::Smw => {
            return regs_in(insn.rt, insn.rb)
                .chain(std::iter::once(insn.ra))
                .map(RegDep::read)
                .collect();
        }
        Opcode::J | Opcode::J8 | Opcode::Nop | Opcode::Nop16 => {}
        Opcode::Jal => writes.push(Reg::LP),
        Opcode::Jr | Opcode::Jr5 | Opcode::Ret | Opcode::Ret5 => reads.push(insn.rb),
        Opcode::Jral | Opcode::Jral5 => {
            reads.push(insn.rb);
            writes.push(insn.rt);
        }
        Opcode::Beq | Opcode::Bne => {
            reads.push(insn.rt);
            reads.push(insn.ra);
        }
        Opcode::Beqs38 | Opcode::Bnes38 => {
            reads.push(insn.rt);
            reads.push(Reg::R5);
        }
        Opcode::Beqz
        | Opcode::Bnez
        | Opcode::Bgez
        | Opcode::Bltz
        | Opcode::Bgtz
        | Opcode::Blez
        | Opcode::Beqz38
        | Opcode::Bnez38 => reads.push(insn.rt),
        Opcode::Bgezal | Opcode::Bltzal => {
            reads.push(insn.rt);
            writes.push(Reg::LP);
        }
    }

    let mut facts: Vec<RegDep> = Vec::with_capacity(reads.len() + writes.len());
    for r in reads {
        if !facts.iter().any(|d| d.reg == r.num()) {
            facts.push(RegDep::read(r));
        }
    }
    for w in writes {
        match facts.iter_mut().find(|d| d.reg == w.num()) {
            Some(fact) => fact.access = Access::ReadWrite,
            None => facts.push(RegDep::write(w)),
        }
    }
    facts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(n: u8) -> Reg {
        Reg::new(n).unwrap()
    }

    #[test]
    fn test_ori_same_register_is_read_write() {
        let facts = dependencies(&Insn::ori(r(6), r(6), 0), &RelaxConfig::default());
        assert_eq!(
            facts,
            vec![RegDep {
                reg: 6,
                access: Access::ReadWrite
            }]
        );
    }

    #[test]
    fn test_calls_write_link_pointer() {
        let cfg = RelaxConfig::default();
        let facts = dependencies(&Insn::jral(r(6)), &cfg);
        assert_eq!(facts, vec![RegDep::read(r(6)), RegDep::write(Reg::LP)]);
        let facts = dependencies(&Insn::new(Opcode::Jal), &cfg);
        assert_eq!(facts, vec![RegDep::write(Reg::LP)]);
    }

    #[test]
    fn test_lmw_lists_loads_before_base() {
        let insn = Insn::lmw(r(2), r(4), r(3));
        let facts = dependencies(&insn, &RelaxConfig::default());
        assert_eq!(facts.first(), Some(&RegDep::write(r(2))));
        assert_eq!(facts.last(), Some(&RegDep::read(r(3))));
        // The base is written before it is read.
        let first_base = facts.iter().find(|d| d.reg == 3).unwrap();
        assert_eq!(first_base.access, Access::Write);

        let conservative = RelaxConfig::default().with_multi_reg_base_conservative(true);
        let facts = dependencies(&insn, &conservative);
        assert_eq!(facts.first(), Some(&RegDep::read(r(3))));
    }

    #[test]
    fn test_smw_reads_everything() {
        let facts = dependencies(&Insn::smw(r(6), r(8), Reg::SP), &RelaxConfig::default());
        assert_eq!(facts.len(), 4);
        assert!(facts.iter().all(|d| d.access == Access::Read));
        assert!(!is_malformed_multi(&Insn::smw(r(6), r(8), Reg::SP)));
        assert!(is_malformed_multi(&Insn::lmw(r(8), r(6), Reg::SP)));
    }
}
