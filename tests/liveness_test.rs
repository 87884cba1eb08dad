//! Eligibility of address formations for contraction.
//!
//! The first group of tests runs whole units through the assembler and looks at the
//! contraction relocations that come out; the second builds graphs by hand to inspect
//! the per-block marks the analysis leaves behind.

use bumpalo::Bump;
use nds32_relax::cfg::{find_formations, BlockBuilder, ControlFlowGraph, Eligibility, FormationResult, InsnId, InsnNode, LivenessAnalyzer};
use nds32_relax::core::{SymbolDef, SymbolId};
use nds32_relax::nds32::deps::dependencies;
use nds32_relax::nds32::{Insn, Opcode, PicFlavor, Reg, SymOperand};
use nds32_relax::relax::{FragId, SectionId};
use nds32_relax::reloc::SuffixKind;
use nds32_relax::{
    Assembler, AssemblySession, Diagnostics, RelaxConfig, RelaxResult, RelocKind, RelocRecord, SourceLoc, SymbolTable,
    UnitOutput,
};

fn r(n: u8) -> Reg {
    Reg::new(n).unwrap()
}

fn loc(line: u32) -> SourceLoc {
    SourceLoc::new(line)
}

fn assemble<'a>(
    session: &AssemblySession<'a>,
    config: RelaxConfig,
    build: impl FnOnce(&mut Assembler<'_, 'a>) -> RelaxResult<()>,
) -> UnitOutput<'a> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut asm = Assembler::new(session, config);
    build(&mut asm).expect("unit should be accepted");
    asm.finish().expect("unit should relax")
}

fn formation(asm: &mut Assembler<'_, '_>, reg: Reg, name: &str, flavor: PicFlavor) -> RelaxResult<()> {
    let sym = asm.symbol(name);
    asm.emit(Insn::sethi(reg, 0).with_sym(SymOperand::hi20(sym, flavor)), loc(1))?;
    asm.emit(Insn::ori(reg, reg, 0).with_sym(SymOperand::lo12(sym, flavor)), loc(2))?;
    Ok(())
}

fn suffixes(unit: &UnitOutput<'_>) -> Vec<RelocRecord> {
    unit.section(".text")
        .unwrap()
        .relocs
        .iter()
        .filter(|rec| matches!(rec.kind, RelocKind::AddrSuffix(_)))
        .cloned()
        .collect()
}

#[test]
fn test_single_consumer_yields_one_leaf() {
    let arena = Bump::new();
    let session = AssemblySession::new(&arena);
    let unit = assemble(&session, RelaxConfig::default(), |asm| {
        formation(asm, Reg::TA, "callee", PicFlavor::Abs)?;
        asm.emit(Insn::jral(Reg::TA), loc(3))?;
        asm.emit(Insn::ret(), loc(4))?;
        Ok(())
    });

    let text = unit.section(".text").unwrap();
    let lo = text
        .relocs
        .iter()
        .position(|rec| rec.kind == RelocKind::Lo12(PicFlavor::Abs))
        .unwrap();
    let suffix = text
        .relocs
        .iter()
        .position(|rec| rec.kind == RelocKind::AddrSuffix(SuffixKind::MultiCall))
        .unwrap();
    assert_eq!(suffixes(&unit).len(), 1);
    assert_eq!(text.relocs[suffix].offset, 8);
    assert_eq!(text.relocs[suffix].chain, Some(lo));

    let counts: Vec<_> = text.relocs_of_kind(RelocKind::GroupLeafCount).collect();
    assert_eq!(counts.len(), 1);
    assert_eq!(counts[0].addend, 1);
    assert_eq!(counts[0].chain, Some(suffix));

    // The leaf was compactable, so it is forced to full width and flagged.
    assert_eq!(text.relocs_of_kind(RelocKind::CompactWidthHint).count(), 1);
    assert_eq!(text.bytes.len(), 4 + 4 + 4 + 2);
    assert_eq!(unit.stats.idioms_found, 1);
    assert_eq!(unit.stats.idioms_contracted, 1);
}

#[test]
fn test_read_after_preserving_call_vetoes() {
    let arena = Bump::new();
    let session = AssemblySession::new(&arena);
    let unit = assemble(&session, RelaxConfig::default(), |asm| {
        formation(asm, r(6), "callee", PicFlavor::Abs)?;
        asm.emit(Insn::jral(r(6)), loc(3))?;
        asm.emit(Insn::alu(Opcode::Add, r(1), r(6), r(2)), loc(4))?;
        asm.emit(Insn::ret(), loc(5))?;
        Ok(())
    });
    assert!(suffixes(&unit).is_empty());
    assert_eq!(unit.section(".text").unwrap().relocs_of_kind(RelocKind::GroupLeafCount).count(), 0);
    assert_eq!(unit.stats.idioms_contracted, 0);
    assert_eq!(unit.stats.idioms_vetoed, 1);
}

#[test]
fn test_read_on_other_branch_path_vetoes() {
    let arena = Bump::new();
    let session = AssemblySession::new(&arena);
    let unit = assemble(&session, RelaxConfig::default(), |asm| {
        let other = asm.symbol("other");
        formation(asm, Reg::TA, "callee", PicFlavor::Abs)?;
        asm.emit(Insn::branch_zero(Opcode::Beqz, r(0), other), loc(3))?;
        asm.emit(Insn::jral(Reg::TA), loc(4))?;
        asm.emit(Insn::ret(), loc(5))?;
        asm.label("other", loc(6));
        asm.emit(Insn::alu(Opcode::Add, r(1), Reg::TA, r(2)), loc(7))?;
        asm.emit(Insn::ret(), loc(8))?;
        Ok(())
    });
    assert!(suffixes(&unit).is_empty());
}

#[test]
fn test_unused_arguments_allow_contraction_in_arg_register() {
    fn unit_with(args_unused: bool) -> usize {
        let arena = Bump::new();
        let session = AssemblySession::new(&arena);
        let unit = assemble(&session, RelaxConfig::default(), |asm| {
            formation(asm, r(0), "callee", PicFlavor::Abs)?;
            asm.emit_call(Insn::jral(r(0)), loc(3), args_unused)?;
            asm.emit(Insn::ret(), loc(4))?;
            Ok(())
        });
        suffixes(&unit).len()
    }
    assert_eq!(unit_with(false), 0);
    assert_eq!(unit_with(true), 1);
}

#[test]
fn test_got_load_is_flavored() {
    let arena = Bump::new();
    let session = AssemblySession::new(&arena);
    let unit = assemble(&session, RelaxConfig::default(), |asm| {
        formation(asm, Reg::TA, "var", PicFlavor::Got)?;
        asm.emit(Insn::lw(Reg::TA, Reg::TA, Reg::GP), loc(3))?;
        asm.emit(Insn::ret(), loc(4))?;
        Ok(())
    });
    let found = suffixes(&unit);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].kind, RelocKind::AddrSuffix(SuffixKind::Got));
    let text = unit.section(".text").unwrap();
    assert_eq!(text.relocs_of_kind(RelocKind::Hi20(PicFlavor::Got)).count(), 1);
}

#[test]
fn test_contraction_disabled_without_size_optimization() {
    let arena = Bump::new();
    let session = AssemblySession::new(&arena);
    let unit = assemble(&session, RelaxConfig::no_optimize(), |asm| {
        formation(asm, Reg::TA, "callee", PicFlavor::Abs)?;
        asm.emit(Insn::jral(Reg::TA), loc(3))?;
        asm.emit(Insn::ret(), loc(4))?;
        Ok(())
    });
    assert!(suffixes(&unit).is_empty());
    assert_eq!(unit.stats.idioms_found, 0);
}

#[test]
fn test_unmatched_sethi_warns() {
    let arena = Bump::new();
    let session = AssemblySession::new(&arena);
    let unit = assemble(&session, RelaxConfig::default(), |asm| {
        let sym = asm.symbol("lonely");
        asm.emit(Insn::sethi(r(7), 0).with_sym(SymOperand::hi20(sym, PicFlavor::Abs)), loc(1))?;
        asm.emit(Insn::ret(), loc(2))?;
        Ok(())
    });
    assert!(!unit.diagnostics.has_errors());
    let warning = unit.diagnostics.warnings().next().unwrap();
    assert!(warning.message.contains("unmatched"));
}

/// Hand-built unit for graph-level checks.
struct Graph {
    builder: BlockBuilder,
    symbols: SymbolTable<'static>,
    config: RelaxConfig,
}

impl Graph {
    fn new(config: RelaxConfig) -> Self {
        Self {
            builder: BlockBuilder::new(),
            symbols: SymbolTable::new(),
            config,
        }
    }

    fn sym(&mut self, name: &'static str) -> SymbolId {
        self.symbols.intern(name)
    }

    fn label(&mut self, name: &'static str) -> SymbolId {
        let sym = self.symbols.intern(name);
        let def = SymbolDef {
            section: SectionId(0),
            frag: FragId(0),
            offset: 0,
        };
        self.symbols.define(sym, def, loc(1)).unwrap();
        self.builder.label(SectionId(0), sym);
        sym
    }

    fn emit(&mut self, insn: Insn) -> InsnId {
        let deps = dependencies(&insn, &self.config);
        self.builder
            .push(InsnNode::new(insn, deps, SectionId(0), FragId(0), 0, loc(2)))
    }

    fn formation(&mut self, reg: Reg, name: &'static str) {
        let sym = self.sym(name);
        self.emit(Insn::sethi(reg, 0).with_sym(SymOperand::hi20(sym, PicFlavor::Abs)));
        self.emit(Insn::ori(reg, reg, 0).with_sym(SymOperand::lo12(sym, PicFlavor::Abs)));
    }

    fn analyze(self) -> (Vec<FormationResult>, ControlFlowGraph) {
        let mut diags = Diagnostics::new();
        let mut cfg = self.builder.finish(&self.symbols, &mut diags).unwrap();
        let analyzer = LivenessAnalyzer::new(&self.config);
        let results = find_formations(&cfg, &mut diags)
            .iter()
            .map(|f| analyzer.analyze(&mut cfg, f).unwrap())
            .collect();
        (results, cfg)
    }
}

#[test]
fn test_conditional_calls_merging_mark_common_successor() {
    let mut graph = Graph::new(RelaxConfig::default());
    let x2 = graph.sym("x2");
    let common = graph.sym("common");
    let func = graph.sym("func");

    graph.formation(r(6), "var");
    graph.emit(Insn::branch_zero(Opcode::Beqz, r(0), x2));
    graph.emit(Insn::branch_zero(Opcode::Bgezal, r(1), func));
    graph.emit(Insn::j(common));
    graph.label("x2");
    graph.emit(Insn::branch_zero(Opcode::Bgezal, r(2), func));
    graph.label("common");
    graph.emit(Insn::alu(Opcode::Add, r(1), r(6), r(2)));
    graph.emit(Insn::ret());
    graph.label("func");
    graph.emit(Insn::ret());

    let (results, cfg) = graph.analyze();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].eligibility, Eligibility::Used);
    let block = cfg.block_of_label(common).unwrap();
    assert_eq!(cfg.block(block).preds, 2);
    assert!(cfg.block(block).in_common);
}

#[test]
fn test_consumer_behind_merge_point_is_vetoed() {
    let mut graph = Graph::new(RelaxConfig::default());
    let join = graph.sym("join");
    graph.formation(Reg::TA, "callee");
    graph.emit(Insn::branch_zero(Opcode::Beqz, r(0), join));
    graph.emit(Insn::addi(r(1), r(1), 1));
    graph.label("join");
    graph.emit(Insn::jral(Reg::TA));
    graph.emit(Insn::ret());

    let (results, _) = graph.analyze();
    assert_eq!(results[0].eligibility, Eligibility::Used);
}

#[test]
fn test_load_multiple_base_asymmetry() {
    fn eligibility(conservative: bool) -> Eligibility {
        let config = RelaxConfig::default().with_multi_reg_base_conservative(conservative);
        let mut graph = Graph::new(config);
        graph.formation(r(6), "buf");
        graph.emit(Insn::lmw(r(6), r(8), r(6)));
        graph.emit(Insn::ret());
        let (results, _) = graph.analyze();
        results[0].eligibility
    }
    // The loaded registers are listed before the base, so by default the reload of r6
    // hides its use as the base address.
    assert_eq!(eligibility(false), Eligibility::RedefinedSafe);
    assert_eq!(eligibility(true), Eligibility::Used);
}
