// This module implements the fragment stream the relaxation engine iterates over. Each
// section owns an ordered list of fragments stored in one arena indexed by FragId. A Fixed
// fragment holds bytes whose size never changes (data and instructions without a variable
// part); the variable kinds hold a single instruction whose encoding is chosen later: a
// symbolic branch or call (Branch), a full-width instruction with a compact equivalent
// (Compactable), a symbolic movi address load (AddrLoad), and alignment padding (Align).
// Fragments also carry the relaxation state bits, the original opcode, the instruction
// count and 32-bit snapshot, the label-alignment fixup placed at their start, and every
// pending fixup attached to them. Pending fixups live in a second arena indexed by FixupId
// so chains between them survive until the final rewrite.

//! Fragment stream.

use std::fmt;

use super::range::{BranchShape, LoadForm, RangeClass};
use crate::core::diagnostics::SourceLoc;
use crate::core::symbols::SymbolId;
use crate::nds32::insn::{Insn, Opcode, SymOperand};
use crate::reloc::{Fixup, FixupId};

/// Upper bound on the size of one variable fragment.
pub const MAX_VARIABLE_GROWTH: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionId(pub u32);

impl SectionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragId(pub u32);

impl FragId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FragId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frag#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Text,
    Data,
}

#[derive(Debug, Clone)]
pub struct Section<'a> {
    pub id: SectionId,
    pub name: &'a str,
    pub kind: SectionKind,
    /// Fragments in layout order.
    pub frags: Vec<FragId>,
}

/// Relaxation state bits of a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelaxFlags {
    /// May change encoding. Cleared inside `no_relax` regions.
    pub relaxable: bool,
    /// Encoding differs from the one first estimated.
    pub relaxed: bool,
    /// Must stay full width.
    pub force_wide: bool,
    /// Followed directly by an alignment request.
    pub align_sensitive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchFrag {
    pub shape: BranchShape,
    pub target: SymOperand,
    /// Committed class.
    pub class: RangeClass,
    /// Whether the 16-bit short forms may be used.
    pub compact_ok: bool,
    /// Synthetic label after an inverted sequence, created at the final rewrite.
    pub skip_label: Option<SymbolId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactFrag {
    pub wide: Insn,
    pub narrow: Insn,
    /// Set once the compact form was given up.
    pub widened: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrLoadFrag {
    pub insn: Insn,
    pub target: SymOperand,
    pub form: LoadForm,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragKind {
    Fixed,
    Branch(BranchFrag),
    Compactable(CompactFrag),
    AddrLoad(AddrLoadFrag),
    Align { pow: u8, max_skip: Option<u32> },
}

#[derive(Debug, Clone)]
pub struct Frag {
    pub id: FragId,
    pub section: SectionId,
    /// Position in the section's layout order.
    pub seq: u32,
    pub kind: FragKind,
    /// Contents of a fixed fragment.
    pub bytes: Vec<u8>,
    /// Committed size.
    pub size: u32,
    /// Address computed by the latest layout pass.
    pub address: u32,
    pub flags: RelaxFlags,
    pub orig_opcode: Option<Opcode>,
    /// Instructions covered by a variable fragment.
    pub insn_num: u32,
    /// Full-width encoding of the instruction as written.
    pub insn32: u32,
    pub label_fixup: Option<FixupId>,
    pub fixups: Vec<FixupId>,
    pub loc: SourceLoc,
}

#[derive(Debug, Default)]
pub struct FragStream<'a> {
    sections: Vec<Section<'a>>,
    frags: Vec<Frag>,
    fixups: Vec<Fixup>,
}

impl<'a> FragStream<'a> {
    pub fn new() -> Self {
        Self {
            sections: Vec::new(),
            frags: Vec::new(),
            fixups: Vec::new(),
        }
    }

    pub fn add_section(&mut self, name: &'a str, kind: SectionKind) -> SectionId {
        let id = SectionId(self.sections.len() as u32);
        self.sections.push(Section {
            id,
            name,
            kind,
            frags: Vec::new(),
        });
        id
    }

    pub fn find_section(&self, name: &str) -> Option<SectionId> {
        self.sections.iter().find(|s| s.name == name).map(|s| s.id)
    }

    pub fn section(&self, id: SectionId) -> &Section<'a> {
        &self.sections[id.index()]
    }

    pub fn sections(&self) -> &[Section<'a>] {
        &self.sections
    }

    pub fn frag(&self, id: FragId) -> &Frag {
        &self.frags[id.index()]
    }

    pub fn frag_mut(&mut self, id: FragId) -> &mut Frag {
        &mut self.frags[id.index()]
    }

    pub fn frag_count(&self) -> usize {
        self.frags.len()
    }

    pub fn fixup(&self, id: FixupId) -> &Fixup {
        &self.fixups[id.index()]
    }

    pub fn last_frag(&self, section: SectionId) -> Option<FragId> {
        self.sections[section.index()].frags.last().copied()
    }

    fn push_frag(&mut self, section: SectionId, kind: FragKind, size: u32, loc: SourceLoc) -> FragId {
        let id = FragId(self.frags.len() as u32);
        let seq = self.sections[section.index()].frags.len() as u32;
        self.frags.push(Frag {
            id,
            section,
            seq,
            kind,
            bytes: Vec::new(),
            size,
            address: 0,
            flags: RelaxFlags::default(),
            orig_opcode: None,
            insn_num: 0,
            insn32: 0,
            label_fixup: None,
            fixups: Vec::new(),
            loc,
        });
        self.sections[section.index()].frags.push(id);
        id
    }

    /// Open a new fixed fragment unconditionally.
    pub fn start_fixed(&mut self, section: SectionId, loc: SourceLoc) -> FragId {
        self.push_frag(section, FragKind::Fixed, 0, loc)
    }

    /// The fixed fragment at the end of `section`, opening one if the tail is variable.
    pub fn tail_fixed(&mut self, section: SectionId, loc: SourceLoc) -> FragId {
        match self.last_frag(section) {
            Some(id) if self.frag(id).kind == FragKind::Fixed => id,
            _ => self.start_fixed(section, loc),
        }
    }

    /// Append bytes to the tail fixed fragment. Returns the fragment and the offset of
    /// the first appended byte.
    pub fn append_bytes(&mut self, section: SectionId, bytes: &[u8], loc: SourceLoc) -> (FragId, u32) {
        let id = self.tail_fixed(section, loc);
        let frag = self.frag_mut(id);
        let offset = frag.bytes.len() as u32;
        frag.bytes.extend_from_slice(bytes);
        frag.size = frag.bytes.len() as u32;
        (id, offset)
    }

    /// Append a variable fragment with its initial size estimate.
    pub fn push_variable(&mut self, section: SectionId, kind: FragKind, size: u32, loc: SourceLoc) -> FragId {
        self.push_frag(section, kind, size, loc)
    }

    /// Attach a fixup to its fragment.
    pub fn add_fixup(&mut self, fixup: Fixup) -> FixupId {
        let id = FixupId(self.fixups.len() as u32);
        let frag = fixup.frag;
        self.fixups.push(fixup);
        self.frags[frag.index()].fixups.push(id);
        id
    }

    /// Attach the label-alignment fixup carried at offset 0 of `frag`.
    pub fn set_label_fixup(&mut self, fixup: Fixup) -> FixupId {
        let id = FixupId(self.fixups.len() as u32);
        let frag = fixup.frag;
        self.fixups.push(fixup);
        self.frags[frag.index()].label_fixup = Some(id);
        id
    }

    /// Sum of committed sizes.
    pub fn section_size(&self, section: SectionId) -> u32 {
        self.sections[section.index()]
            .frags
            .iter()
            .map(|&id| self.frags[id.index()].size)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nds32::insn::Insn;

    #[test]
    fn test_fixed_bytes_accumulate_in_tail() {
        let mut stream = FragStream::new();
        let text = stream.add_section(".text", SectionKind::Text);
        let (a, off_a) = stream.append_bytes(text, &[1, 2, 3, 4], SourceLoc::new(1));
        let (b, off_b) = stream.append_bytes(text, &[5, 6], SourceLoc::new(2));
        assert_eq!(a, b);
        assert_eq!((off_a, off_b), (0, 4));
        assert_eq!(stream.frag(a).size, 6);

        let narrow = Insn::new(Opcode::Nop16);
        let var = stream.push_variable(
            text,
            FragKind::Compactable(CompactFrag {
                wide: Insn::nop(),
                narrow,
                widened: false,
            }),
            2,
            SourceLoc::new(3),
        );
        let (c, off_c) = stream.append_bytes(text, &[7, 8], SourceLoc::new(4));
        assert_ne!(c, a);
        assert_eq!(off_c, 0);
        assert_eq!(stream.frag(var).seq, 1);
        assert_eq!(stream.frag(c).seq, 2);
        assert_eq!(stream.section_size(text), 10);
        assert_eq!(stream.find_section(".text"), Some(text));
    }
}
