// This module builds the relocation trees of the eligible address formations. A tree is
// rooted at the formation (the `ori`, whose lo12 fixup becomes the root record; the
// `sethi` is kept alongside) and holds one trie path per consumer path: an optional
// cooperating base-add followed by the leaf. Paths that share their prefix share nodes, so
// alternative consumers become siblings. Nodes live in a per-tree arena with parent,
// first-child and next-sibling links. After insertion the leaf counts are computed in post
// order. A tree is vetoed by tainting: tainting a node taints its whole sibling level and
// every ancestor up to the root, and a tree with a tainted root is never emitted. Taint
// sources are a fan-out above the configured cap, a participant emitted in a no_relax
// region, and an instruction claimed by two trees (an advisory warning).

//! Relocation trees of contractible address formations.

use hashbrown::HashMap;

use crate::cfg::block::InsnId;
use crate::cfg::graph::ControlFlowGraph;
use crate::cfg::liveness::{ConsumerPath, Eligibility, Formation, FormationResult};
use crate::core::config::RelaxConfig;
use crate::core::diagnostics::Diagnostics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeNodeId(pub u32);

impl TreeNodeId {
    pub const ROOT: TreeNodeId = TreeNodeId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub insn: InsnId,
    pub parent: Option<TreeNodeId>,
    pub first_child: Option<TreeNodeId>,
    pub next_sibling: Option<TreeNodeId>,
    pub tainted: bool,
    /// Leaves at or below this node.
    pub leaf_num: u32,
}

impl TreeNode {
    fn new(insn: InsnId, parent: Option<TreeNodeId>) -> Self {
        Self {
            insn,
            parent,
            first_child: None,
            next_sibling: None,
            tainted: false,
            leaf_num: 0,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.parent.is_some() && self.first_child.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct RelocTree {
    pub formation: Formation,
    nodes: Vec<TreeNode>,
}

impl RelocTree {
    pub fn new(formation: Formation) -> Self {
        Self {
            formation,
            nodes: vec![TreeNode::new(formation.lo, None)],
        }
    }

    /// Build the tree of an eligible formation and count its leaves.
    pub fn from_paths(formation: Formation, paths: &[ConsumerPath]) -> Self {
        let mut tree = Self::new(formation);
        for path in paths {
            tree.insert_path(path);
        }
        tree.count_leaves();
        tree
    }

    pub fn node(&self, id: TreeNodeId) -> &TreeNode {
        &self.nodes[id.index()]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (TreeNodeId, &TreeNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (TreeNodeId(i as u32), n))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn children(&self, id: TreeNodeId) -> impl Iterator<Item = TreeNodeId> + '_ {
        std::iter::successors(self.nodes[id.index()].first_child, move |c| {
            self.nodes[c.index()].next_sibling
        })
    }

    fn child_with(&mut self, parent: TreeNodeId, insn: InsnId) -> TreeNodeId {
        if let Some(found) = self.children(parent).find(|&c| self.nodes[c.index()].insn == insn) {
            return found;
        }
        let id = TreeNodeId(self.nodes.len() as u32);
        // Keep siblings in insertion order.
        match self.children(parent).last() {
            Some(last) => self.nodes[last.index()].next_sibling = Some(id),
            None => self.nodes[parent.index()].first_child = Some(id),
        }
        self.nodes.push(TreeNode::new(insn, Some(parent)));
        id
    }

    pub fn insert_path(&mut self, path: &ConsumerPath) -> TreeNodeId {
        let mut at = TreeNodeId::ROOT;
        if let Some(mid) = path.intermediate {
            at = self.child_with(at, mid);
        }
        self.child_with(at, path.leaf)
    }

    /// Post-order leaf counts.
    pub fn count_leaves(&mut self) {
        let mut stack = vec![(TreeNodeId::ROOT, false)];
        while let Some((id, processed)) = stack.pop() {
            if processed {
                let children: Vec<TreeNodeId> = self.children(id).collect();
                let node = &self.nodes[id.index()];
                let count = if children.is_empty() {
                    u32::from(node.parent.is_some())
                } else {
                    children.iter().map(|c| self.nodes[c.index()].leaf_num).sum()
                };
                self.nodes[id.index()].leaf_num = count;
                continue;
            }
            stack.push((id, true));
            let children: Vec<TreeNodeId> = self.children(id).collect();
            for child in children {
                stack.push((child, false));
            }
        }
    }

    pub fn leaf_count(&self) -> u32 {
        self.nodes[0].leaf_num
    }

    pub fn leaves(&self) -> impl Iterator<Item = (TreeNodeId, &TreeNode)> {
        self.nodes().filter(|(_, n)| n.is_leaf())
    }

    /// Taint `id`, its sibling level and every ancestor.
    pub fn taint(&mut self, id: TreeNodeId) {
        let level: Vec<TreeNodeId> = match self.nodes[id.index()].parent {
            Some(parent) => self.children(parent).collect(),
            None => vec![id],
        };
        for node in level {
            self.nodes[node.index()].tainted = true;
        }
        let mut up = self.nodes[id.index()].parent;
        while let Some(ancestor) = up {
            self.nodes[ancestor.index()].tainted = true;
            up = self.nodes[ancestor.index()].parent;
        }
    }

    pub fn is_tainted(&self) -> bool {
        self.nodes[0].tainted
    }

    /// Every instruction taking part in the contraction, `sethi` included.
    pub fn participants(&self) -> impl Iterator<Item = (Option<TreeNodeId>, InsnId)> + '_ {
        std::iter::once((None, self.formation.hi)).chain(self.nodes().map(|(id, n)| (Some(id), n.insn)))
    }
}

/// All trees of one unit.
#[derive(Debug, Default)]
pub struct RelocForest {
    trees: Vec<RelocTree>,
}

impl RelocForest {
    /// Build the trees of every eligible formation and apply the taint rules.
    pub fn build(results: &[FormationResult], cfg: &ControlFlowGraph, config: &RelaxConfig, diags: &mut Diagnostics) -> Self {
        let mut forest = RelocForest::default();
        for result in results {
            if result.eligibility == Eligibility::RecognizedConsumer {
                forest.trees.push(RelocTree::from_paths(result.formation, &result.paths));
            }
        }
        forest.taint_fanout(config);
        forest.taint_no_relax(cfg);
        forest.taint_duplicates(cfg, diags);
        forest
    }

    fn taint_fanout(&mut self, config: &RelaxConfig) {
        for tree in &mut self.trees {
            let over: Vec<TreeNodeId> = tree
                .nodes()
                .filter(|(_, n)| n.leaf_num > config.max_call_fanout)
                .map(|(id, _)| id)
                .collect();
            for id in over {
                log::trace!("tree of {} exceeds fan-out {}", tree.formation.lo, config.max_call_fanout);
                tree.taint(id);
            }
        }
    }

    fn taint_no_relax(&mut self, cfg: &ControlFlowGraph) {
        for tree in &mut self.trees {
            let hits: Vec<TreeNodeId> = tree
                .participants()
                .filter(|&(_, insn)| cfg.insn(insn).no_relax)
                .map(|(node, _)| node.unwrap_or(TreeNodeId::ROOT))
                .collect();
            for id in hits {
                tree.taint(id);
            }
        }
    }

    fn taint_duplicates(&mut self, cfg: &ControlFlowGraph, diags: &mut Diagnostics) {
        let mut claims: HashMap<InsnId, usize> = HashMap::new();
        let mut vetoed: Vec<usize> = Vec::new();
        for (index, tree) in self.trees.iter().enumerate() {
            for (_, insn) in tree.participants() {
                match claims.get(&insn) {
                    Some(&owner) if owner != index => {
                        diags.warn(cfg.insn(insn).loc, "duplicate relaxation pattern");
                        vetoed.push(owner);
                        vetoed.push(index);
                    }
                    Some(_) => {}
                    None => {
                        claims.insert(insn, index);
                    }
                }
            }
        }
        for index in vetoed {
            self.trees[index].taint(TreeNodeId::ROOT);
        }
    }

    pub fn trees(&self) -> &[RelocTree] {
        &self.trees
    }

    /// Trees that will be emitted.
    pub fn emittable(&self) -> impl Iterator<Item = &RelocTree> {
        self.trees.iter().filter(|t| !t.is_tainted() && t.leaf_count() > 0)
    }

    pub fn tainted_count(&self) -> usize {
        self.trees.iter().filter(|t| t.is_tainted()).count()
    }
}
