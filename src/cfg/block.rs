// This module implements the instruction-node and basic-block builder. The assembler calls
// it once per emitted instruction and once per text label, in source order. Every section
// keeps its own open block: a label closes a non-empty open block and starts a new one (or
// attaches to the empty block already open), and a branch, call, jump or return closes the
// block it ends. Instruction nodes are stored in one arena indexed by InsnId and carry the
// register-dependency facts of the instruction, the fragment and offset it was emitted
// into, prev/next links in section layout order, and the fixups the relocation emitter
// attaches later. Block 0 is the indirect sentinel: it never holds instructions and stands
// for every target the assembler cannot see. Successor edges, predecessor counts and the
// per-register witness sets are left empty here and filled in by ControlFlowGraph::build.

//! Instruction nodes and the basic-block builder.

use std::fmt;

use hashbrown::HashMap;

use super::graph::ControlFlowGraph;
use crate::core::diagnostics::{Diagnostics, SourceLoc};
use crate::core::error::RelaxResult;
use crate::core::symbols::{SymbolId, SymbolTable};
use crate::nds32::deps::RegDep;
use crate::nds32::insn::{Insn, Width};
use crate::nds32::reg::RegSet;
use crate::relax::frag::{FragId, SectionId};
use crate::reloc::FixupId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlockId(pub u32);

impl BlockId {
    /// Stands for every successor the assembler cannot see.
    pub const SENTINEL: BlockId = BlockId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_sentinel(self) -> bool {
        self == Self::SENTINEL
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_sentinel() {
            write!(f, "bb.sentinel")
        } else {
            write!(f, "bb{}", self.0)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InsnId(pub u32);

impl InsnId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InsnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i{}", self.0)
    }
}

/// One emitted instruction.
#[derive(Debug, Clone)]
pub struct InsnNode {
    pub insn: Insn,
    pub width: Width,
    /// Register-dependency facts in the order the witness scan consumes them.
    pub deps: Vec<RegDep>,
    pub block: BlockId,
    pub section: SectionId,
    pub frag: FragId,
    /// Byte offset inside `frag`; 0 for variable fragments.
    pub offset: u32,
    pub prev: Option<InsnId>,
    pub next: Option<InsnId>,
    pub loc: SourceLoc,
    /// Emitted inside a region where relaxation is disabled.
    pub no_relax: bool,
    /// Call hint: the callee does not read its argument registers.
    pub args_unused: bool,
    pub fixups: Vec<FixupId>,
}

impl InsnNode {
    pub fn new(insn: Insn, deps: Vec<RegDep>, section: SectionId, frag: FragId, offset: u32, loc: SourceLoc) -> Self {
        Self {
            insn,
            width: insn.width(),
            deps,
            block: BlockId::SENTINEL,
            section,
            frag,
            offset,
            prev: None,
            next: None,
            loc,
            no_relax: false,
            args_unused: false,
            fixups: Vec::new(),
        }
    }

    pub fn with_no_relax(mut self, no_relax: bool) -> Self {
        self.no_relax = no_relax;
        self
    }

    pub fn with_args_unused(mut self, args_unused: bool) -> Self {
        self.args_unused = args_unused;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub id: BlockId,
    /// `None` only for the sentinel.
    pub section: Option<SectionId>,
    pub insns: Vec<InsnId>,
    pub labels: Vec<SymbolId>,
    pub cfg_next: Option<BlockId>,
    pub cfg_target: Option<BlockId>,
    /// Continuation after an unconditional or indirect call.
    pub return_to: Option<BlockId>,
    pub use_before_set: RegSet,
    pub set_before_use: RegSet,
    pub preds: u32,
    /// Reached from more than one analysed path.
    pub in_common: bool,
    /// Registers a previous analysis found read at the head of this block.
    pub in_critical: RegSet,
}

impl BasicBlock {
    fn new(id: BlockId, section: Option<SectionId>) -> Self {
        Self {
            id,
            section,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    pub fn last_insn(&self) -> Option<InsnId> {
        self.insns.last().copied()
    }
}

/// Output of the builder, consumed by [`ControlFlowGraph::build`].
#[derive(Debug)]
pub struct BlockParts {
    pub blocks: Vec<BasicBlock>,
    pub insns: Vec<InsnNode>,
    /// Blocks of each section in layout order, sections in creation order.
    pub layout: Vec<(SectionId, Vec<BlockId>)>,
    pub labels: HashMap<SymbolId, BlockId>,
}

#[derive(Debug)]
pub struct BlockBuilder {
    blocks: Vec<BasicBlock>,
    insns: Vec<InsnNode>,
    open: HashMap<SectionId, BlockId>,
    layout: Vec<(SectionId, Vec<BlockId>)>,
    last_insn: HashMap<SectionId, InsnId>,
    labels: HashMap<SymbolId, BlockId>,
}

impl Default for BlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockBuilder {
    pub fn new() -> Self {
        Self {
            blocks: vec![BasicBlock::new(BlockId::SENTINEL, None)],
            insns: Vec::new(),
            open: HashMap::new(),
            layout: Vec::new(),
            last_insn: HashMap::new(),
            labels: HashMap::new(),
        }
    }

    fn open_block(&mut self, section: SectionId) -> BlockId {
        if let Some(&id) = self.open.get(&section) {
            return id;
        }
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::new(id, Some(section)));
        match self.layout.iter_mut().find(|(s, _)| *s == section) {
            Some((_, order)) => order.push(id),
            None => self.layout.push((section, vec![id])),
        }
        self.open.insert(section, id);
        id
    }

    /// Place a label at the current position of `section`.
    pub fn label(&mut self, section: SectionId, sym: SymbolId) -> BlockId {
        if let Some(&open) = self.open.get(&section) {
            if !self.blocks[open.index()].is_empty() {
                self.open.remove(&section);
            }
        }
        let id = self.open_block(section);
        self.blocks[id.index()].labels.push(sym);
        self.labels.insert(sym, id);
        id
    }

    /// Append an instruction to the open block of its section.
    pub fn push(&mut self, mut node: InsnNode) -> InsnId {
        let section = node.section;
        let block = self.open_block(section);
        let id = InsnId(self.insns.len() as u32);
        node.block = block;
        node.prev = self.last_insn.insert(section, id);
        if let Some(prev) = node.prev {
            self.insns[prev.index()].next = Some(id);
        }
        let terminates = node.insn.flow().is_terminator();
        self.insns.push(node);
        self.blocks[block.index()].insns.push(id);
        if terminates {
            self.open.remove(&section);
        }
        id
    }

    pub fn insn(&self, id: InsnId) -> &InsnNode {
        &self.insns[id.index()]
    }

    pub fn insn_mut(&mut self, id: InsnId) -> &mut InsnNode {
        &mut self.insns[id.index()]
    }

    pub fn insn_count(&self) -> usize {
        self.insns.len()
    }

    /// Number of blocks, sentinel included.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn into_parts(self) -> BlockParts {
        BlockParts {
            blocks: self.blocks,
            insns: self.insns,
            layout: self.layout,
            labels: self.labels,
        }
    }

    /// Resolve edges, predecessor counts and witness sets.
    pub fn finish(self, symbols: &SymbolTable<'_>, diags: &mut Diagnostics) -> RelaxResult<ControlFlowGraph> {
        ControlFlowGraph::build(self.into_parts(), symbols, diags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nds32::insn::Opcode;
    use crate::nds32::reg::Reg;

    fn node(insn: Insn) -> InsnNode {
        InsnNode::new(insn, Vec::new(), SectionId(0), FragId(0), 0, SourceLoc::new(1))
    }

    fn r(n: u8) -> Reg {
        Reg::new(n).unwrap()
    }

    #[test]
    fn test_labels_and_terminators_split_blocks() {
        let mut builder = BlockBuilder::new();
        let text = SectionId(0);
        let a = builder.push(node(Insn::movi(r(1), 1)));
        let l1 = builder.label(text, SymbolId(0));
        // A second label on an empty block attaches to it.
        assert_eq!(builder.label(text, SymbolId(1)), l1);
        let b = builder.push(node(Insn::jr(r(2))));
        let c = builder.push(node(Insn::new(Opcode::Nop)));

        let parts = builder.into_parts();
        assert_eq!(parts.blocks.len(), 4);
        assert!(parts.blocks[0].is_empty());
        assert_eq!(parts.insns[a.index()].block, BlockId(1));
        assert_eq!(parts.insns[b.index()].block, l1);
        assert_eq!(parts.insns[c.index()].block, BlockId(3));
        assert_eq!(parts.blocks[l1.index()].labels, vec![SymbolId(0), SymbolId(1)]);
        assert_eq!(parts.layout, vec![(text, vec![BlockId(1), BlockId(2), BlockId(3)])]);
        assert_eq!(parts.insns[b.index()].prev, Some(a));
        assert_eq!(parts.insns[b.index()].next, Some(c));
    }

    #[test]
    fn test_sections_keep_separate_open_blocks() {
        let mut builder = BlockBuilder::new();
        let text = SectionId(0);
        let other = SectionId(1);
        let a = builder.push(node(Insn::movi(r(1), 1)));
        let b = builder.push(InsnNode {
            section: other,
            ..node(Insn::movi(r(2), 2))
        });
        let c = builder.push(node(Insn::movi(r(3), 3)));
        assert_eq!(builder.insn(a).block, builder.insn(c).block);
        assert_ne!(builder.insn(a).block, builder.insn(b).block);
        assert_eq!(builder.insn(c).prev, Some(a));
        assert_eq!(builder.insn(b).prev, None);
        assert_eq!(builder.block_count(), 3);
    }
}
