//! Consumer patterns of an address-formation idiom.
//!
//! After `sethi r, hi20(S@K); ori r, r, lo12(S@K)` the linker can only contract the
//! formation if every use of `r` is one of the patterns below, chosen by the flavor `K`:
//!
//! | flavor | cooperating | leaf |
//! |---|---|---|
//! | absolute | | `jral r`, `jral5 r`, `jr r`, `jr5 r` |
//! | `@GOT` | | `lw rX, [r + gp]` |
//! | `@GOTOFF` | | `add rX, r, gp` |
//! | `@PLT` | `add r, r, gp` | `jral r`, `jral5 r` |
//!
//! The base register may be either operand of the `lw`/`add`.

use crate::cfg::block::InsnId;
use crate::nds32::insn::{Insn, Opcode, PicFlavor};
use crate::nds32::reg::Reg;

/// How far along its pattern a formation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Right after the `ori`.
    AfterLo,
    /// After the cooperating base-add.
    AfterBase(InsnId),
}

impl Stage {
    pub fn intermediate(self) -> Option<InsnId> {
        match self {
            Stage::AfterLo => None,
            Stage::AfterBase(id) => Some(id),
        }
    }
}

/// What the walk does after a leaf consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafAction {
    /// The register is dead afterwards.
    End,
    /// The leaf read the register without changing it.
    Continue,
    /// The leaf is a register call; the call rule decides what follows.
    Call,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recognized {
    Cooperating,
    Leaf(LeafAction),
    NoMatch,
}

fn base_plus_gp(insn: &Insn, reg: Reg) -> bool {
    reg != Reg::GP && ((insn.ra == reg && insn.rb == Reg::GP) || (insn.ra == Reg::GP && insn.rb == reg))
}

/// Classify `insn` as a use of the formed register `reg` at `stage`.
pub fn recognize(insn: &Insn, reg: Reg, flavor: PicFlavor, stage: Stage) -> Recognized {
    let after_lo = stage == Stage::AfterLo;
    match (flavor, insn.op) {
        (PicFlavor::Abs, Opcode::Jral | Opcode::Jral5) if after_lo && insn.rb == reg => {
            Recognized::Leaf(LeafAction::Call)
        }
        (PicFlavor::Abs, Opcode::Jr | Opcode::Jr5) if after_lo && insn.rb == reg => {
            Recognized::Leaf(LeafAction::End)
        }
        (PicFlavor::Got, Opcode::Lw) | (PicFlavor::GotOff, Opcode::Add) if after_lo && base_plus_gp(insn, reg) => {
            if insn.rt == reg {
                Recognized::Leaf(LeafAction::End)
            } else {
                Recognized::Leaf(LeafAction::Continue)
            }
        }
        (PicFlavor::Plt, Opcode::Add) if after_lo && insn.rt == reg && base_plus_gp(insn, reg) => {
            Recognized::Cooperating
        }
        (PicFlavor::Plt, Opcode::Jral | Opcode::Jral5) if !after_lo && insn.rb == reg => {
            Recognized::Leaf(LeafAction::Call)
        }
        _ => Recognized::NoMatch,
    }
}
