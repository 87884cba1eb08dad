//! Property tests for range selection and whole-unit relaxation.

use bumpalo::Bump;
use proptest::prelude::*;
use proptest::sample::Index;

use nds32_relax::nds32::{Insn, InsnCodec, Nds32Codec, Opcode, Reg, Width};
use nds32_relax::relax::{BranchShape, RangeClass};
use nds32_relax::{Assembler, AssemblySession, RelaxConfig, RelocKind, SourceLoc, SymbolId, UnitOutput};

fn shapes() -> impl Strategy<Value = BranchShape> {
    let r1 = Reg::new(1).unwrap();
    let r2 = Reg::new(2).unwrap();
    prop_oneof![
        Just(BranchShape::Jump),
        Just(BranchShape::Call),
        Just(BranchShape::CondZero { op: Opcode::Beqz, rt: r1 }),
        Just(BranchShape::CondSign { op: Opcode::Bgez, rt: r1 }),
        Just(BranchShape::CondCmp { op: Opcode::Bne, rt: r1, ra: r2 }),
        Just(BranchShape::CondCmp { op: Opcode::Beq, rt: r1, ra: Reg::R5 }),
        Just(BranchShape::CondCall { op: Opcode::Bgezal, rt: r1 }),
    ]
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Jump,
    Zero,
    Compare,
}

fn narrowable() -> impl Strategy<Value = Insn> {
    let reg = || (0u8..32).prop_map(|n| Reg::new(n).unwrap());
    prop_oneof![
        (reg(), reg(), reg()).prop_map(|(rt, ra, rb)| Insn::alu(Opcode::Add, rt, ra, rb)),
        (reg(), -64i32..64).prop_map(|(rt, imm)| Insn::movi(rt, imm)),
        (reg(), reg(), (-4i32..12).prop_map(|w| w * 4)).prop_map(|(rt, ra, off)| Insn::lwi(rt, ra, off)),
        (reg(), reg()).prop_map(|(rt, ra)| Insn::addi(rt, ra, 0)),
    ]
}

fn kinds() -> impl Strategy<Value = Kind> {
    prop_oneof![Just(Kind::Jump), Just(Kind::Zero), Just(Kind::Compare)]
}

/// One branch, the bytes after it, and the label closing the gap.
type Step = (Kind, u32, Index);

fn assemble_steps<'a>(session: &AssemblySession<'a>, steps: &[Step]) -> (UnitOutput<'a>, Vec<SymbolId>) {
    let mut asm = Assembler::new(session, RelaxConfig::default());
    let labels: Vec<SymbolId> = (0..steps.len()).map(|i| asm.symbol(&format!("l{}", i))).collect();
    let r1 = Reg::new(1).unwrap();
    let r2 = Reg::new(2).unwrap();
    let mut line = 0;
    for (i, (kind, gap, target)) in steps.iter().enumerate() {
        line += 1;
        let to = labels[target.index(labels.len())];
        let insn = match kind {
            Kind::Jump => Insn::j(to),
            Kind::Zero => Insn::branch_zero(Opcode::Beqz, r1, to),
            Kind::Compare => Insn::branch_cmp(Opcode::Bne, r1, r2, to),
        };
        asm.emit(insn, SourceLoc::new(line)).unwrap();
        asm.data(&vec![0; *gap as usize * 2], SourceLoc::new(line));
        asm.label(&format!("l{}", i), SourceLoc::new(line));
    }
    asm.emit(Insn::ret(), SourceLoc::new(line + 1)).unwrap();
    (asm.finish().unwrap(), labels)
}

proptest! {
    #[test]
    fn prop_selected_class_reaches_target(shape in shapes(), half in -40_000_000i64..40_000_000, compact in any::<bool>()) {
        let disp = half * 2;
        let class = shape.smallest_fitting(Some(disp), compact);
        let seq = shape.sequence(class, compact);
        let reach = disp - seq.target_offset().unwrap_or(0) as i64;
        prop_assert!(class.contains(reach));
    }

    #[test]
    fn prop_selection_is_monotone_in_distance(shape in shapes(), a in 0i64..20_000_000, b in 0i64..20_000_000) {
        let (near, far) = if a <= b { (a * 2, b * 2) } else { (b * 2, a * 2) };
        prop_assert!(shape.smallest_fitting(Some(near), true) <= shape.smallest_fitting(Some(far), true));
    }

    #[test]
    fn prop_unknown_target_is_worst_case(shape in shapes(), committed in prop::sample::select(RangeClass::ALL.to_vec())) {
        prop_assert_eq!(shape.select(committed, None, true), RangeClass::U4G);
    }

    #[test]
    fn prop_compact_form_widens_back(insn in narrowable()) {
        let codec = Nds32Codec::new();
        if let Some(compact) = codec.narrow(&insn) {
            let encoded = codec.encode(&compact).unwrap();
            prop_assert_eq!(encoded.width, Width::Compact);
            prop_assert_eq!(codec.widen(&compact), Some(insn));
        }
    }

    #[test]
    fn prop_every_branch_reaches_its_label(steps in prop::collection::vec((kinds(), 0u32..20_000, any::<Index>()), 1..8)) {
        let arena = Bump::new();
        let session = AssemblySession::new(&arena);
        let (unit, labels) = assemble_steps(&session, &steps);
        prop_assert!(!unit.diagnostics.has_errors());
        let text = unit.section(".text").unwrap();

        // Each label opens a fragment carrying a label-alignment marker.
        let addresses: Vec<u32> = text
            .relocs_of_kind(RelocKind::LabelAlignment)
            .map(|rec| rec.offset)
            .collect();
        prop_assert_eq!(addresses.len(), labels.len());

        let codec = Nds32Codec::new();
        for rec in text.relocs.iter().filter(|rec| rec.kind.is_pc_relative()) {
            let sym = rec.symbol.unwrap();
            let Some(index) = labels.iter().position(|&l| l == sym) else {
                // Skip labels of inverted conditions.
                prop_assert!(unit.symbols.get(sym).synthetic);
                continue;
            };
            let insn = codec.decode(&text.bytes[rec.offset as usize..]).unwrap();
            prop_assert_eq!(insn.imm as i64, addresses[index] as i64 - rec.offset as i64);
        }
    }

    #[test]
    fn prop_relaxation_is_reproducible(steps in prop::collection::vec((kinds(), 0u32..5_000, any::<Index>()), 1..6)) {
        let arena = Bump::new();
        let first = AssemblySession::new(&arena);
        let second = AssemblySession::new(&arena);
        let (a, _) = assemble_steps(&first, &steps);
        let (b, _) = assemble_steps(&second, &steps);
        let (a, b) = (a.section(".text").unwrap(), b.section(".text").unwrap());
        prop_assert_eq!(&a.bytes, &b.bytes);
        prop_assert_eq!(&a.relocs, &b.relocs);
    }
}
