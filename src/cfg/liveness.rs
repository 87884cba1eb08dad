// This module implements the relaxation-eligibility analysis. find_formations pairs every
// `sethi r, hi20(S@K)` with the `ori r, r, lo12(S@K)` that completes it in the same block;
// halves that cannot be paired are advisory warnings. LivenessAnalyzer then decides, per
// formation, whether the formed register flows only into the recognized consumers of its
// flavor (see reloc::idiom). The walk starts right after the `ori` and visits nodes keyed by
// (block, start index, pattern stage, call context, merged). Inside a node the first
// dependency fact naming the register decides (read: used, write: redefined) unless the
// instruction matches the pattern for the current stage. At the end of a block the
// terminator picks the successors: fall-through, branch targets, the callee subgraph of a
// conditional call (walked in callee context, where returns are neutral) and the return
// continuation of a call for call-preserved registers. Unknown successors are used unless
// the register is call-preserved. The walk is an explicit stack with an InProgress/Done
// state per node: re-entering an in-progress node is a loop and counts as used, re-entering
// a finished node marks its block in_common and reuses the finished result, except that a
// finished result which reached a consumer counts as used. A consumer reached through a
// block with two or more predecessors, or through a block already in_common, is also used.
// Blocks whose head reads the register are remembered in in_critical and short-circuit
// later walks.

//! Relaxation-eligibility analysis of address-formation idioms.

use hashbrown::{HashMap, HashSet};

use super::block::{BlockId, InsnId};
use super::graph::ControlFlowGraph;
use crate::core::config::RelaxConfig;
use crate::core::diagnostics::Diagnostics;
use crate::core::error::{RelaxError, RelaxResult};
use crate::nds32::insn::{FlowKind, Opcode, SymOperand, SymPart};
use crate::nds32::reg::Reg;
use crate::reloc::idiom::{recognize, LeafAction, Recognized, Stage};

/// A `sethi`/`ori` pair forming the address of one symbol in one register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Formation {
    pub hi: InsnId,
    pub lo: InsnId,
    pub reg: Reg,
    /// The `lo12` operand of the `ori`.
    pub operand: SymOperand,
    pub block: BlockId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Some path reads the register outside the recognized patterns.
    Used,
    /// Every path redefines the register before reading it.
    RedefinedSafe,
    /// Every use is a recognized consumer.
    RecognizedConsumer,
}

/// One way from a formation to a leaf consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerPath {
    pub intermediate: Option<InsnId>,
    pub leaf: InsnId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormationResult {
    pub formation: Formation,
    pub eligibility: Eligibility,
    /// Consumer paths in discovery order; empty unless the formation is eligible.
    pub paths: Vec<ConsumerPath>,
}

/// Pair every `hi20` sethi with its `lo12` ori.
pub fn find_formations(cfg: &ControlFlowGraph, diags: &mut Diagnostics) -> Vec<Formation> {
    let mut formations = Vec::new();
    let mut paired: HashSet<InsnId> = HashSet::new();

    for (id, node) in cfg.insns() {
        let Some(hi) = node.insn.sym.filter(|s| s.part == SymPart::Hi20) else {
            continue;
        };
        if node.insn.op != Opcode::Sethi {
            continue;
        }
        let reg = node.insn.rt;
        let block = cfg.block(node.block);
        let after = block.insns.iter().skip_while(|&&i| i != id).skip(1);

        let mut lo = None;
        for &next in after {
            let candidate = cfg.insn(next);
            let completes = candidate.insn.op == Opcode::Ori
                && candidate.insn.rt == reg
                && candidate.insn.ra == reg
                && candidate
                    .insn
                    .sym
                    .is_some_and(|s| s.part == SymPart::Lo12 && s.same_reference(&hi));
            if completes {
                lo = Some(next);
                break;
            }
            if candidate.deps.iter().any(|d| d.reg == reg.num()) {
                break;
            }
        }

        match lo {
            Some(lo) => {
                paired.insert(lo);
                let operand = cfg.insn(lo).insn.sym.unwrap_or(hi);
                formations.push(Formation {
                    hi: id,
                    lo,
                    reg,
                    operand,
                    block: node.block,
                });
            }
            None => diags.warn(node.loc, format!("unmatched hi20 address formation in {}", reg)),
        }
    }

    for (id, node) in cfg.insns() {
        let orphan = node.insn.op == Opcode::Ori
            && node.insn.sym.is_some_and(|s| s.part == SymPart::Lo12)
            && !paired.contains(&id);
        if orphan {
            diags.warn(node.loc, format!("unmatched lo12 address formation in {}", node.insn.rt));
        }
    }
    log::debug!("🔍 {} address formations", formations.len());
    formations
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CallContext {
    Top,
    /// Inside the callee of a conditional call; returns go back to the caller's
    /// fall-through, which is walked separately.
    Callee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NodeKey {
    block: BlockId,
    start: usize,
    stage: Stage,
    ctx: CallContext,
    merged: bool,
}

#[derive(Debug, Clone, Default)]
struct Outcome {
    used: bool,
    leaves: Vec<ConsumerPath>,
}

#[derive(Debug, Clone)]
enum VisitState {
    InProgress,
    Done(Outcome),
}

/// A node being scanned, with the successors still to join.
#[derive(Debug)]
struct Frame {
    key: NodeKey,
    outcome: Outcome,
    pending: Vec<NodeKey>,
}

impl Frame {
    fn new(key: NodeKey) -> Self {
        Self {
            key,
            outcome: Outcome::default(),
            pending: Vec::new(),
        }
    }
}

pub struct LivenessAnalyzer<'c> {
    config: &'c RelaxConfig,
}

impl<'c> LivenessAnalyzer<'c> {
    pub fn new(config: &'c RelaxConfig) -> Self {
        Self { config }
    }

    fn preserved(&self, reg: Reg) -> bool {
        self.config.call_preserved.contains(reg)
    }

    /// Decide whether `formation` may be contracted.
    pub fn analyze(&self, cfg: &mut ControlFlowGraph, formation: &Formation) -> RelaxResult<FormationResult> {
        let start = cfg
            .block(formation.block)
            .insns
            .iter()
            .position(|&i| i == formation.lo)
            .map(|p| p + 1)
            .ok_or_else(|| RelaxError::corrupt(format!("{} is not in its block {}", formation.lo, formation.block)))?;
        let root = NodeKey {
            block: formation.block,
            start,
            stage: Stage::AfterLo,
            ctx: CallContext::Top,
            merged: false,
        };

        let mut states: HashMap<NodeKey, VisitState> = HashMap::new();
        states.insert(root, VisitState::InProgress);
        let mut stack = vec![self.scan(cfg, formation, root)];
        let outcome = loop {
            let Some(frame) = stack.last_mut() else {
                break Outcome {
                    used: true,
                    leaves: Vec::new(),
                };
            };
            if let Some(child) = frame.pending.pop() {
                match states.get(&child) {
                    Some(VisitState::InProgress) => frame.outcome.used = true,
                    Some(VisitState::Done(done)) => {
                        frame.outcome.used |= done.used || !done.leaves.is_empty();
                        cfg.block_mut(child.block).in_common = true;
                        log::trace!("{} re-entered, marked in_common", child.block);
                    }
                    None => {
                        states.insert(child, VisitState::InProgress);
                        let next = self.scan(cfg, formation, child);
                        stack.push(next);
                    }
                }
                continue;
            }

            let Some(done) = stack.pop() else {
                continue;
            };
            states.insert(done.key, VisitState::Done(done.outcome.clone()));
            match stack.last_mut() {
                Some(parent) => {
                    parent.outcome.used |= done.outcome.used;
                    parent.outcome.leaves.extend(done.outcome.leaves);
                }
                None => break done.outcome,
            }
        };

        let eligibility = if outcome.used {
            Eligibility::Used
        } else if outcome.leaves.is_empty() {
            Eligibility::RedefinedSafe
        } else {
            Eligibility::RecognizedConsumer
        };
        let mut paths = Vec::new();
        if eligibility == Eligibility::RecognizedConsumer {
            for path in outcome.leaves {
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }
        log::debug!(
            "🔍 formation {} in {}: {:?}, {} consumer paths",
            formation.lo,
            formation.reg,
            eligibility,
            paths.len()
        );
        Ok(FormationResult {
            formation: *formation,
            eligibility,
            paths,
        })
    }

    /// Scan one node up to its first decision; successors are left in `pending`.
    fn scan(&self, cfg: &mut ControlFlowGraph, formation: &Formation, key: NodeKey) -> Frame {
        let reg = formation.reg;
        let mut frame = Frame::new(key);
        if key.block.is_sentinel() {
            frame.outcome.used = !self.preserved(reg);
            return frame;
        }

        let block = cfg.block(key.block);
        let blocked = key.merged || block.in_common;
        let mut stage = key.stage;
        let mut pos = key.start;

        if key.start == 0 {
            if block.in_critical.contains(reg) {
                frame.outcome.used = true;
                return frame;
            }
            if !block.use_before_set.contains(reg) {
                if block.set_before_use.contains(reg) {
                    return frame;
                }
                pos = block.insns.len();
            }
        }

        let mut critical = false;
        let mut decided = false;
        while let Some(&id) = block.insns.get(pos) {
            let node = cfg.insn(id);
            match recognize(&node.insn, reg, formation.operand.flavor, stage) {
                Recognized::Cooperating => {
                    if blocked {
                        frame.outcome.used = true;
                        decided = true;
                        break;
                    }
                    stage = Stage::AfterBase(id);
                }
                Recognized::Leaf(action) => {
                    if blocked {
                        frame.outcome.used = true;
                        decided = true;
                        break;
                    }
                    frame.outcome.leaves.push(ConsumerPath {
                        intermediate: stage.intermediate(),
                        leaf: id,
                    });
                    match action {
                        LeafAction::End => {
                            decided = true;
                            break;
                        }
                        LeafAction::Continue | LeafAction::Call => {}
                    }
                }
                Recognized::NoMatch => {
                    if let Some(dep) = node.deps.iter().find(|d| d.reg == reg.num()) {
                        if dep.access.is_read() {
                            frame.outcome.used = true;
                            critical = key.start == 0 && stage == key.stage;
                        }
                        decided = true;
                        break;
                    }
                }
            }
            pos += 1;
        }

        if !decided {
            self.successors(cfg, formation, key, stage, &mut frame);
        }
        if critical {
            log::trace!("{} reads {} at its head, marked in_critical", key.block, reg);
            cfg.block_mut(key.block).in_critical.insert(reg);
        }
        frame
    }

    fn successor_key(&self, cfg: &ControlFlowGraph, key: NodeKey, block: BlockId, stage: Stage, ctx: CallContext) -> NodeKey {
        let merged = key.merged || (!block.is_sentinel() && cfg.block(block).preds >= 2);
        NodeKey {
            block,
            start: 0,
            stage,
            ctx,
            merged,
        }
    }

    /// Follow `succ`, treating a missing successor (end of section) like the sentinel.
    fn follow(&self, cfg: &ControlFlowGraph, reg: Reg, key: NodeKey, succ: Option<BlockId>, stage: Stage, ctx: CallContext, frame: &mut Frame) {
        match succ {
            Some(block) if !block.is_sentinel() => frame.pending.push(self.successor_key(cfg, key, block, stage, ctx)),
            _ => frame.outcome.used |= !self.preserved(reg),
        }
    }

    /// What happens to the register across a call made by the terminator of `key.block`.
    fn call_rule(&self, cfg: &ControlFlowGraph, formation: &Formation, key: NodeKey, stage: Stage, frame: &mut Frame) {
        let reg = formation.reg;
        let block = cfg.block(key.block);
        let args_unused = block.last_insn().is_some_and(|i| cfg.insn(i).args_unused);
        if self.config.arg_regs.contains(reg) && !args_unused {
            frame.outcome.used = true;
        } else if self.preserved(reg) {
            let ret = block.return_to;
            self.follow(cfg, reg, key, ret, stage, key.ctx, frame);
        }
    }

    fn successors(&self, cfg: &ControlFlowGraph, formation: &Formation, key: NodeKey, stage: Stage, frame: &mut Frame) {
        let reg = formation.reg;
        let block = cfg.block(key.block);
        match cfg.flow_of(key.block) {
            FlowKind::NonBranch => self.follow(cfg, reg, key, block.cfg_next, stage, key.ctx, frame),
            FlowKind::UncondBranch => self.follow(cfg, reg, key, block.cfg_target, stage, key.ctx, frame),
            FlowKind::CondBranch => {
                self.follow(cfg, reg, key, block.cfg_next, stage, key.ctx, frame);
                self.follow(cfg, reg, key, block.cfg_target, stage, key.ctx, frame);
            }
            FlowKind::UncondCall | FlowKind::IndirectCall => self.call_rule(cfg, formation, key, stage, frame),
            FlowKind::CondCall => {
                self.follow(cfg, reg, key, block.cfg_next, stage, key.ctx, frame);
                match block.cfg_target {
                    Some(callee) if !callee.is_sentinel() => {
                        let callee_key = self.successor_key(cfg, key, callee, stage, CallContext::Callee);
                        frame.pending.push(callee_key);
                    }
                    _ => {
                        let args_unused = block.last_insn().is_some_and(|i| cfg.insn(i).args_unused);
                        if self.config.arg_regs.contains(reg) && !args_unused {
                            frame.outcome.used = true;
                        }
                    }
                }
            }
            FlowKind::IndirectJump => frame.outcome.used |= !self.preserved(reg),
            FlowKind::Return => {
                if key.ctx == CallContext::Top && self.config.ret_regs.contains(reg) {
                    frame.outcome.used = true;
                }
            }
        }
    }
}
