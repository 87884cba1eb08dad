//! Emission of contraction relocations for untainted trees.
//!
//! Every non-root node of a tree receives an address-formation-suffix fixup chained to its
//! parent's fixup; the root's fixup is the `lo12` fixup the `ori` already carries. Every
//! leaf additionally receives a group-leaf-count marker, chained to the leaf's suffix,
//! whose addend is the tree's leaf count. A leaf sitting in a compactable fragment is
//! forced to full width and marked with a compact-width hint. All of this happens before
//! relaxation so the forced widths take part in layout.

use hashbrown::{HashMap, HashSet};

use super::tree::{RelocForest, RelocTree, TreeNodeId};
use super::{Fixup, FixupId, RelocKind, SuffixKind};
use crate::cfg::graph::ControlFlowGraph;
use crate::core::error::{RelaxError, RelaxResult};
use crate::core::session::AssemblySession;
use crate::relax::frag::{FragKind, FragStream};

/// Attach the fixups of every emittable tree. Returns the number of trees emitted.
pub fn emit_forest(
    forest: &RelocForest,
    cfg: &mut ControlFlowGraph,
    stream: &mut FragStream<'_>,
    session: &AssemblySession<'_>,
) -> RelaxResult<usize> {
    let mut emitted = 0;
    for tree in forest.emittable() {
        emit_tree(tree, cfg, stream)?;
        emitted += 1;
    }
    session.record(|s| {
        s.idioms_contracted += emitted;
        s.idioms_vetoed += forest.tainted_count();
    });
    Ok(emitted)
}

fn emit_tree(tree: &RelocTree, cfg: &mut ControlFlowGraph, stream: &mut FragStream<'_>) -> RelaxResult<()> {
    let formation = &tree.formation;
    let root_fixup = cfg
        .insn(formation.lo)
        .fixups
        .iter()
        .copied()
        .find(|&fx| matches!(stream.fixup(fx).kind, RelocKind::Lo12(_)))
        .ok_or_else(|| RelaxError::corrupt(format!("{} has no lo12 fixup", formation.lo)))?;

    let suffix = RelocKind::AddrSuffix(SuffixKind::for_flavor(formation.operand.flavor));
    let sym = Some(formation.operand.sym);
    let addend = formation.operand.addend;
    let mut fixup_of: HashMap<TreeNodeId, FixupId> = HashMap::new();
    fixup_of.insert(TreeNodeId::ROOT, root_fixup);
    let mut widened = HashSet::new();

    // Pre-order so a parent's fixup exists before its children chain to it.
    let mut stack = vec![TreeNodeId::ROOT];
    while let Some(id) = stack.pop() {
        let children: Vec<TreeNodeId> = tree.children(id).collect();
        stack.extend(children.into_iter().rev());
        let node = tree.node(id);
        let Some(parent) = node.parent else {
            continue;
        };
        let parent_fixup = fixup_of
            .get(&parent)
            .copied()
            .ok_or_else(|| RelaxError::corrupt(format!("tree node {} visited before its parent", id.0)))?;

        let (frag, offset) = {
            let insn = cfg.insn(node.insn);
            (insn.frag, insn.offset)
        };
        let fx = stream.add_fixup(Fixup::new(frag, offset, sym, addend, suffix).chained_to(parent_fixup));
        cfg.insn_mut(node.insn).fixups.push(fx);
        fixup_of.insert(id, fx);

        if node.is_leaf() {
            let count = Fixup::new(frag, offset, None, tree.leaf_count() as i64, RelocKind::GroupLeafCount)
                .chained_to(fx);
            let count = stream.add_fixup(count);
            cfg.insn_mut(node.insn).fixups.push(count);

            if matches!(stream.frag(frag).kind, FragKind::Compactable(_)) && widened.insert(frag) {
                stream.frag_mut(frag).flags.force_wide = true;
                let hint = stream.add_fixup(Fixup::new(frag, 0, None, 0, RelocKind::CompactWidthHint).chained_to(fx));
                cfg.insn_mut(node.insn).fixups.push(hint);
            }
        }
    }
    log::debug!(
        "📦 contracted {} ({} leaves, {})",
        formation.lo,
        tree.leaf_count(),
        suffix
    );
    Ok(())
}
