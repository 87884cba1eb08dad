//! Relocation kinds, pending fixups and the final relocation records.
//!
//! A [`Fixup`] is attached to a fragment while the unit is being built or analysed; it
//! becomes a [`RelocRecord`] with a section offset once the relaxation engine has fixed
//! every fragment address. Chains between fixups (suffix relocations pointing at their
//! parent's record) survive that translation as indices into the section's record list.

pub mod emit;
pub mod idiom;
pub mod tree;

use std::fmt;

use crate::core::symbols::SymbolId;
use crate::nds32::insn::PicFlavor;
use crate::relax::frag::FragId;

/// Address-formation suffix carried by the nodes of a contracted idiom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuffixKind {
    Got,
    GotOffset,
    PltGot,
    MultiCall,
}

impl SuffixKind {
    pub fn for_flavor(flavor: PicFlavor) -> SuffixKind {
        match flavor {
            PicFlavor::Abs => SuffixKind::MultiCall,
            PicFlavor::Got => SuffixKind::Got,
            PicFlavor::GotOff => SuffixKind::GotOffset,
            PicFlavor::Plt => SuffixKind::PltGot,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelocKind {
    /// Pc-relative displacement of at most 17 bits (conditional and compact branches).
    PcRelNear,
    /// 25-bit pc-relative displacement of `j`/`jal`.
    PcRelFar,
    AbsoluteWord,
    /// Upper 20 bits of a symbol value (`sethi`).
    Hi20(PicFlavor),
    /// Lower 12 bits of a symbol value (`ori`).
    Lo12(PicFlavor),
    AddrSuffix(SuffixKind),
    CompactWidthHint,
    LabelAlignment,
    GroupLeafCount,
}

impl RelocKind {
    pub fn is_pc_relative(self) -> bool {
        matches!(self, RelocKind::PcRelNear | RelocKind::PcRelFar)
    }
}

impl fmt::Display for RelocKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelocKind::PcRelNear => write!(f, "pc-relative-near"),
            RelocKind::PcRelFar => write!(f, "pc-relative-far"),
            RelocKind::AbsoluteWord => write!(f, "absolute-word"),
            RelocKind::Hi20(flavor) => write!(f, "hi20{}", flavor),
            RelocKind::Lo12(flavor) => write!(f, "lo12{}", flavor),
            RelocKind::AddrSuffix(kind) => {
                let name = match kind {
                    SuffixKind::Got => "got",
                    SuffixKind::GotOffset => "got-offset",
                    SuffixKind::PltGot => "plt-got",
                    SuffixKind::MultiCall => "multi-call",
                };
                write!(f, "address-formation-suffix{{{}}}", name)
            }
            RelocKind::CompactWidthHint => write!(f, "compact-width-hint"),
            RelocKind::LabelAlignment => write!(f, "label-alignment-marker"),
            RelocKind::GroupLeafCount => write!(f, "relocation-group-leaf-count"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FixupId(pub u32);

impl FixupId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A relocation pending on a fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixup {
    pub frag: FragId,
    /// Byte offset inside the fragment.
    pub offset: u32,
    pub sym: Option<SymbolId>,
    pub addend: i64,
    pub kind: RelocKind,
    pub chain: Option<FixupId>,
}

impl Fixup {
    pub fn new(frag: FragId, offset: u32, sym: Option<SymbolId>, addend: i64, kind: RelocKind) -> Self {
        Self {
            frag,
            offset,
            sym,
            addend,
            kind,
            chain: None,
        }
    }

    pub fn chained_to(mut self, parent: FixupId) -> Self {
        self.chain = Some(parent);
        self
    }
}

/// One relocation of the final output, ordered by offset within its section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocRecord {
    pub offset: u32,
    pub symbol: Option<SymbolId>,
    pub addend: i64,
    pub kind: RelocKind,
    /// Index of the record this one is chained to, in the same section.
    pub chain: Option<usize>,
}

impl fmt::Display for RelocRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x} {}", self.offset, self.kind)?;
        if let Some(sym) = self.symbol {
            write!(f, " sym#{}", sym.0)?;
        }
        if self.addend != 0 {
            write!(f, " {:+}", self.addend)?;
        }
        if let Some(chain) = self.chain {
            write!(f, " -> #{}", chain)?;
        }
        Ok(())
    }
}
