//! Full-width to compact-width size conversion.
//!
//! An instruction becomes a [`CompactFrag`] when the codec knows a compact equivalent for
//! its exact operands and it carries no symbolic operand. The frag starts compact and is
//! re-checked every pass: it widens when a relocation group forces it wide, or when it
//! sits right before an alignment request and the position after it is no longer 4-byte
//! aligned. Widening is permanent.

use super::frag::{CompactFrag, RelaxFlags};
use crate::core::config::RelaxConfig;
use crate::nds32::codec::InsnCodec;
use crate::nds32::insn::{Insn, Width};

/// Build the compactable state for `insn`, or `None` if it must stay as written.
///
/// Instructions written in compact form keep their compact encoding even when the
/// configuration does not narrow full-width ones.
pub fn plan<C: InsnCodec>(codec: &C, insn: &Insn, config: &RelaxConfig) -> Option<CompactFrag> {
    if insn.sym.is_some() {
        return None;
    }
    match insn.width() {
        Width::Compact => codec.widen(insn).map(|wide| CompactFrag {
            wide,
            narrow: *insn,
            widened: false,
        }),
        Width::Full if config.compaction_enabled() => codec.narrow(insn).map(|narrow| CompactFrag {
            wide: *insn,
            narrow,
            widened: false,
        }),
        Width::Full => None,
    }
}

/// Size of a compactable frag placed at `address` for this pass.
pub fn resize(frag: &mut CompactFrag, flags: &RelaxFlags, address: u32) -> u32 {
    if !frag.widened {
        let misaligns = flags.align_sensitive && (address + 2) % 4 != 0;
        if flags.force_wide || misaligns {
            log::trace!("widening {} at {:#x}", frag.narrow, address);
            frag.widened = true;
        }
    }
    current_size(frag)
}

pub fn current_size(frag: &CompactFrag) -> u32 {
    chosen(frag).width().bytes()
}

/// The instruction that will be emitted.
pub fn chosen(frag: &CompactFrag) -> Insn {
    if frag.widened {
        frag.wide
    } else {
        frag.narrow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nds32::codec::Nds32Codec;
    use crate::nds32::insn::Opcode;
    use crate::nds32::reg::Reg;

    fn r(n: u8) -> Reg {
        Reg::new(n).unwrap()
    }

    #[test]
    fn test_plan_respects_configuration() {
        let codec = Nds32Codec::new();
        let add = Insn::alu(Opcode::Add, r(1), r(2), r(3));
        assert!(plan(&codec, &add, &RelaxConfig::default()).is_some());
        assert!(plan(&codec, &add, &RelaxConfig::no_optimize()).is_none());

        // Written compact stays compactable either way.
        let add333 = Insn::alu(Opcode::Add333, r(1), r(2), r(3));
        let frag = plan(&codec, &add333, &RelaxConfig::no_optimize()).unwrap();
        assert_eq!(frag.wide, add);
    }

    #[test]
    fn test_alignment_sensitive_widening_is_sticky() {
        let codec = Nds32Codec::new();
        let mut frag = plan(&codec, &Insn::nop(), &RelaxConfig::default()).unwrap();
        let flags = RelaxFlags {
            relaxable: true,
            align_sensitive: true,
            ..RelaxFlags::default()
        };
        assert_eq!(resize(&mut frag, &flags, 2), 2);
        assert_eq!(resize(&mut frag, &flags, 4), 4);
        assert!(frag.widened);
        assert_eq!(resize(&mut frag, &flags, 2), 4);
        assert_eq!(chosen(&frag).op, Opcode::Nop);
    }

    #[test]
    fn test_force_wide() {
        let codec = Nds32Codec::new();
        let mut frag = plan(&codec, &Insn::jral(r(6)), &RelaxConfig::default()).unwrap();
        assert_eq!(frag.narrow.op, Opcode::Jral5);
        let flags = RelaxFlags {
            force_wide: true,
            ..RelaxFlags::default()
        };
        assert_eq!(resize(&mut frag, &flags, 0), 4);
    }
}
