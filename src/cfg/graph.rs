// This module resolves the basic blocks produced by the builder into a control-flow graph.
// For every section the blocks are visited in layout order and the terminator of each
// block decides its edges: a fall-through block, conditional branch or conditional call
// continues at the next block (cfg_next); an unconditional or indirect call records the
// next block as return_to, which only the liveness call rule follows; every direct branch
// or call resolves its target label through the label index into cfg_target. Targets the
// assembler cannot pin down (undefined, weak or absolute symbols, and every register jump,
// register call and return) point at the sentinel block. A label that resolves into a
// different section is an advisory warning and also points at the sentinel. Predecessor
// counts are the number of incoming edges plus one unknown predecessor for blocks carrying
// a global or weak label. Finally the per-register witness sets are computed: scanning the
// dependency facts of a block in order, the first fact naming a register puts it in
// use_before_set (read) or set_before_use (write). Register numbers outside the register
// file abort the unit.

//! Control-flow graph over basic blocks.

use hashbrown::HashMap;

use super::block::{BasicBlock, BlockId, BlockParts, InsnId, InsnNode};
use crate::core::diagnostics::Diagnostics;
use crate::core::error::{RelaxError, RelaxResult};
use crate::core::symbols::{Binding, SymbolId, SymbolTable};
use crate::nds32::insn::FlowKind;
use crate::nds32::reg::{Reg, RegSet, NUM_REGS};
use crate::relax::frag::SectionId;

#[derive(Debug)]
pub struct ControlFlowGraph {
    blocks: Vec<BasicBlock>,
    insns: Vec<InsnNode>,
    layout: Vec<(SectionId, Vec<BlockId>)>,
    labels: HashMap<SymbolId, BlockId>,
}

impl ControlFlowGraph {
    pub fn build(parts: BlockParts, symbols: &SymbolTable<'_>, diags: &mut Diagnostics) -> RelaxResult<Self> {
        let mut cfg = ControlFlowGraph {
            blocks: parts.blocks,
            insns: parts.insns,
            layout: parts.layout,
            labels: parts.labels,
        };
        cfg.validate()?;
        cfg.resolve_edges(symbols, diags)?;
        cfg.count_preds(symbols);
        cfg.compute_witnesses();
        log::debug!(
            "🔧 CFG: {} blocks, {} instructions, {} sections",
            cfg.blocks.len() - 1,
            cfg.insns.len(),
            cfg.layout.len()
        );
        Ok(cfg)
    }

    fn validate(&self) -> RelaxResult<()> {
        match self.blocks.first() {
            Some(sentinel) if sentinel.id.is_sentinel() && sentinel.is_empty() => {}
            _ => return Err(RelaxError::corrupt("block 0 is not an empty sentinel")),
        }
        for (idx, node) in self.insns.iter().enumerate() {
            for dep in &node.deps {
                if dep.reg >= NUM_REGS {
                    return Err(RelaxError::InvalidRegister {
                        reg: dep.reg,
                        insn: idx as u32,
                    });
                }
            }
            let owner = self
                .blocks
                .get(node.block.index())
                .ok_or_else(|| RelaxError::corrupt(format!("i{} points at missing {}", idx, node.block)))?;
            if !owner.insns.contains(&InsnId(idx as u32)) {
                return Err(RelaxError::corrupt(format!(
                    "i{} is not listed by its block {}",
                    idx, node.block
                )));
            }
        }
        for block in &self.blocks {
            if let Some(bad) = block.insns.iter().find(|i| i.index() >= self.insns.len()) {
                return Err(RelaxError::corrupt(format!("{} lists missing {}", block.id, bad)));
            }
        }
        Ok(())
    }

    fn resolve_edges(&mut self, symbols: &SymbolTable<'_>, diags: &mut Diagnostics) -> RelaxResult<()> {
        let layout = std::mem::take(&mut self.layout);
        for (section, order) in &layout {
            for (pos, &id) in order.iter().enumerate() {
                let next = order.get(pos + 1).copied();
                let flow = self.flow_of(id);
                let target = match flow {
                    FlowKind::UncondBranch | FlowKind::CondBranch | FlowKind::UncondCall | FlowKind::CondCall => {
                        Some(self.branch_target(id, *section, symbols, diags)?)
                    }
                    FlowKind::IndirectJump | FlowKind::IndirectCall | FlowKind::Return => Some(BlockId::SENTINEL),
                    FlowKind::NonBranch => None,
                };

                let block = &mut self.blocks[id.index()];
                block.cfg_target = target;
                if flow.has_fallthrough() {
                    block.cfg_next = next;
                }
                if matches!(flow, FlowKind::UncondCall | FlowKind::IndirectCall) {
                    block.return_to = next;
                }
                log::trace!(
                    "{} {:?}: next={:?} target={:?} return_to={:?}",
                    id,
                    flow,
                    block.cfg_next,
                    block.cfg_target,
                    block.return_to
                );
            }
        }
        self.layout = layout;
        Ok(())
    }

    fn branch_target(
        &self,
        id: BlockId,
        section: SectionId,
        symbols: &SymbolTable<'_>,
        diags: &mut Diagnostics,
    ) -> RelaxResult<BlockId> {
        let Some(last) = self.blocks[id.index()].last_insn() else {
            return Ok(BlockId::SENTINEL);
        };
        let node = &self.insns[last.index()];
        let Some(target) = node.insn.sym else {
            return Ok(BlockId::SENTINEL);
        };
        let sym = symbols.get(target.sym);
        if sym.is_preemptible() || sym.absolute.is_some() {
            return Ok(BlockId::SENTINEL);
        }
        match sym.def {
            Some(def) if def.section != section => {
                diags.warn(
                    node.loc,
                    format!("branch target `{}` is defined in another section", sym.name),
                );
                Ok(BlockId::SENTINEL)
            }
            _ => self
                .labels
                .get(&target.sym)
                .copied()
                .ok_or_else(|| RelaxError::corrupt(format!("label `{}` has no block", sym.name))),
        }
    }

    fn count_preds(&mut self, symbols: &SymbolTable<'_>) {
        let mut preds = vec![0u32; self.blocks.len()];
        for block in self.blocks.iter().skip(1) {
            for succ in [block.cfg_next, block.cfg_target, block.return_to].into_iter().flatten() {
                if !succ.is_sentinel() {
                    preds[succ.index()] += 1;
                }
            }
            let exported = block
                .labels
                .iter()
                .any(|&l| matches!(symbols.get(l).binding, Binding::Global | Binding::Weak));
            if exported {
                preds[block.id.index()] += 1;
            }
        }
        for (block, count) in self.blocks.iter_mut().zip(preds) {
            block.preds = count;
        }
    }

    fn compute_witnesses(&mut self) {
        for block in self.blocks.iter_mut() {
            let mut decided = RegSet::new();
            for &id in &block.insns {
                for dep in &self.insns[id.index()].deps {
                    if decided.contains_num(dep.reg) {
                        continue;
                    }
                    let Some(reg) = Reg::new(dep.reg) else {
                        continue;
                    };
                    if dep.access.is_read() {
                        block.use_before_set.insert(reg);
                    } else {
                        block.set_before_use.insert(reg);
                    }
                    decided.insert(reg);
                }
            }
        }
    }

    /// Control-flow role of the block's last instruction; a block closed by a label falls through.
    pub fn flow_of(&self, id: BlockId) -> FlowKind {
        self.blocks[id.index()]
            .last_insn()
            .map(|i| self.insns[i.index()].insn.flow())
            .filter(|f| f.is_terminator())
            .unwrap_or(FlowKind::NonBranch)
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn insn(&self, id: InsnId) -> &InsnNode {
        &self.insns[id.index()]
    }

    pub fn insn_mut(&mut self, id: InsnId) -> &mut InsnNode {
        &mut self.insns[id.index()]
    }

    pub fn insns(&self) -> impl Iterator<Item = (InsnId, &InsnNode)> {
        self.insns.iter().enumerate().map(|(i, n)| (InsnId(i as u32), n))
    }

    pub fn insn_count(&self) -> usize {
        self.insns.len()
    }

    pub fn block_of_label(&self, sym: SymbolId) -> Option<BlockId> {
        self.labels.get(&sym).copied()
    }

    /// Blocks of `section` in layout order.
    pub fn section_blocks(&self, section: SectionId) -> &[BlockId] {
        self.layout
            .iter()
            .find(|(s, _)| *s == section)
            .map(|(_, order)| order.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::block::BlockBuilder;
    use crate::core::config::RelaxConfig;
    use crate::core::diagnostics::SourceLoc;
    use crate::core::symbols::SymbolDef;
    use crate::nds32::deps::{dependencies, Access, RegDep};
    use crate::nds32::insn::{Insn, Opcode};
    use crate::nds32::reg::Reg;
    use crate::relax::frag::FragId;

    fn r(n: u8) -> Reg {
        Reg::new(n).unwrap()
    }

    struct Unit<'a> {
        builder: BlockBuilder,
        symbols: SymbolTable<'a>,
        config: RelaxConfig,
    }

    impl<'a> Unit<'a> {
        fn new() -> Self {
            Self {
                builder: BlockBuilder::new(),
                symbols: SymbolTable::new(),
                config: RelaxConfig::default(),
            }
        }

        fn label(&mut self, name: &'a str, section: SectionId) -> SymbolId {
            let sym = self.symbols.intern(name);
            let def = SymbolDef {
                section,
                frag: FragId(0),
                offset: 0,
            };
            self.symbols.define(sym, def, SourceLoc::new(1)).unwrap();
            if section == SectionId(0) {
                self.builder.label(section, sym);
            }
            sym
        }

        fn emit(&mut self, insn: Insn) -> InsnId {
            let deps = dependencies(&insn, &self.config);
            self.builder
                .push(InsnNode::new(insn, deps, SectionId(0), FragId(0), 0, SourceLoc::new(2)))
        }

        fn finish(self) -> (RelaxResult<ControlFlowGraph>, Diagnostics) {
            let mut diags = Diagnostics::new();
            let cfg = self.builder.finish(&self.symbols, &mut diags);
            (cfg, diags)
        }
    }

    #[test]
    fn test_edges_by_terminator() {
        let mut unit = Unit::new();
        let ext = unit.symbols.intern("ext");
        let head = unit.label("head", SectionId(0));
        unit.emit(Insn::branch_zero(Opcode::Beqz, r(1), head));
        unit.emit(Insn::jal(ext));
        unit.emit(Insn::jr(r(2)));
        unit.emit(Insn::ret());
        let (cfg, _) = unit.finish();
        let cfg = cfg.unwrap();

        let order = cfg.section_blocks(SectionId(0)).to_vec();
        assert_eq!(order.len(), 4);
        let (b0, b1, b2, b3) = (order[0], order[1], order[2], order[3]);
        assert_eq!(cfg.block(b0).cfg_target, Some(b0));
        assert_eq!(cfg.block(b0).cfg_next, Some(b1));
        assert_eq!(cfg.block(b1).cfg_target, Some(BlockId::SENTINEL));
        assert_eq!(cfg.block(b1).cfg_next, None);
        assert_eq!(cfg.block(b1).return_to, Some(b2));
        assert_eq!(cfg.flow_of(b2), FlowKind::IndirectJump);
        assert_eq!(cfg.block(b2).cfg_target, Some(BlockId::SENTINEL));
        assert_eq!(cfg.flow_of(b3), FlowKind::Return);
        // Self loop plus fall-in edges.
        assert_eq!(cfg.block(b0).preds, 1);
        assert_eq!(cfg.block(b2).preds, 1);
    }

    #[test]
    fn test_exported_label_counts_unknown_pred() {
        let mut unit = Unit::new();
        unit.emit(Insn::nop());
        let entry = unit.label("entry", SectionId(0));
        unit.symbols.set_binding(entry, Binding::Global);
        unit.emit(Insn::ret());
        let (cfg, _) = unit.finish();
        let cfg = cfg.unwrap();
        let block = cfg.block_of_label(entry).unwrap();
        assert_eq!(cfg.block(block).preds, 2);
    }

    #[test]
    fn test_cross_section_target_warns() {
        let mut unit = Unit::new();
        let data = unit.label("table", SectionId(1));
        unit.emit(Insn::j(data));
        let (cfg, diags) = unit.finish();
        let cfg = cfg.unwrap();
        let first = cfg.section_blocks(SectionId(0))[0];
        assert_eq!(cfg.block(first).cfg_target, Some(BlockId::SENTINEL));
        assert_eq!(diags.warnings().count(), 1);
    }

    #[test]
    fn test_witness_sets() {
        let mut unit = Unit::new();
        unit.emit(Insn::alu(Opcode::Add, r(1), r(2), r(1)));
        unit.emit(Insn::movi(r(3), 0));
        unit.emit(Insn::alu(Opcode::Add, r(4), r(3), r(3)));
        let (cfg, _) = unit.finish();
        let cfg = cfg.unwrap();
        let block = cfg.block(cfg.section_blocks(SectionId(0))[0]);
        assert!(block.use_before_set.contains(r(1)));
        assert!(block.use_before_set.contains(r(2)));
        assert!(block.set_before_use.contains(r(3)));
        assert!(!block.use_before_set.contains(r(3)));
        assert!(block.set_before_use.contains(r(4)));
    }

    #[test]
    fn test_invalid_register_aborts() {
        let mut unit = Unit::new();
        let id = unit.emit(Insn::nop());
        unit.builder.insn_mut(id).deps.push(RegDep {
            reg: 40,
            access: Access::Read,
        });
        let (cfg, _) = unit.finish();
        assert_eq!(
            cfg.err(),
            Some(RelaxError::InvalidRegister { reg: 40, insn: 0 })
        );
    }
}
