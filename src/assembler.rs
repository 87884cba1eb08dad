// This module is the assembler-facing driver of the relaxation core. The surrounding
// assembler feeds it one already macro-expanded instruction at a time together with the
// labels, directives and section switches it meets, in source order. Every instruction is
// placed into a fragment right away: symbolic branches and calls get a branch fragment,
// `movi` of a symbol gets an address-load fragment, instructions with a compact twin get a
// compactable fragment inside a relax region, and everything else is encoded into the
// tail fixed fragment with its hi20/lo12 fixups. At the same time the instruction node is
// handed to the block builder so the control-flow graph mirrors the fragment stream.
// `finish` closes the unit: it builds the graph, runs the eligibility analysis over every
// address formation, emits the contraction relocations of the surviving trees, and only
// then relaxes and encodes every section, because forced widths must take part in layout.

//! Unit-level driver: instruction intake, directives and the end-of-unit pipeline.

use crate::cfg::block::{BlockBuilder, InsnId, InsnNode};
use crate::cfg::liveness::{find_formations, Eligibility, LivenessAnalyzer};
use crate::core::config::RelaxConfig;
use crate::core::diagnostics::{Diagnostics, SourceLoc};
use crate::core::error::{RelaxError, RelaxResult};
use crate::core::session::{AssemblySession, SessionStats};
use crate::core::symbols::{Binding, SymbolDef, SymbolId, SymbolTable};
use crate::nds32::codec::{InsnCodec, Nds32Codec};
use crate::nds32::deps::{dependencies, is_malformed_multi};
use crate::nds32::insn::{FlowKind, Insn, Opcode, SymOperand, SymPart, Width};
use crate::relax::compact;
use crate::relax::engine::{RelaxEngine, SectionOutput, MAX_ALIGN_POW};
use crate::relax::frag::{AddrLoadFrag, BranchFrag, FragId, FragKind, FragStream, SectionId, SectionKind};
use crate::relax::range::{BranchShape, LoadForm, RangeClass};
use crate::reloc::emit::emit_forest;
use crate::reloc::tree::RelocForest;
use crate::reloc::{Fixup, FixupId, RelocKind};

/// Everything one unit produces.
#[derive(Debug)]
pub struct UnitOutput<'a> {
    pub sections: Vec<SectionOutput<'a>>,
    pub symbols: SymbolTable<'a>,
    pub diagnostics: Diagnostics,
    pub stats: SessionStats,
}

impl<'a> UnitOutput<'a> {
    pub fn section(&self, name: &str) -> Option<&SectionOutput<'a>> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn symbol_name(&self, id: SymbolId) -> &'a str {
        self.symbols.name(id)
    }
}

/// Collects one unit and runs the relaxation pipeline over it.
pub struct Assembler<'s, 'a, C: InsnCodec = Nds32Codec> {
    session: &'s AssemblySession<'a>,
    config: RelaxConfig,
    codec: C,
    symbols: SymbolTable<'a>,
    stream: FragStream<'a>,
    blocks: BlockBuilder,
    diags: Diagnostics,
    current: SectionId,
    /// Cleared inside a `no_relax` region.
    relax_region: bool,
}

impl<'s, 'a> Assembler<'s, 'a, Nds32Codec> {
    pub fn new(session: &'s AssemblySession<'a>, config: RelaxConfig) -> Self {
        Self::with_codec(session, config, Nds32Codec::new())
    }
}

impl<'s, 'a, C: InsnCodec> Assembler<'s, 'a, C> {
    /// Start a unit with `.text` as the current section.
    pub fn with_codec(session: &'s AssemblySession<'a>, config: RelaxConfig, codec: C) -> Self {
        let mut stream = FragStream::new();
        let text = stream.add_section(session.intern_str(".text"), SectionKind::Text);
        Self {
            session,
            config,
            codec,
            symbols: SymbolTable::new(),
            stream,
            blocks: BlockBuilder::new(),
            diags: Diagnostics::new(),
            current: text,
            relax_region: true,
        }
    }

    pub fn config(&self) -> &RelaxConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diags
    }

    pub fn symbols(&self) -> &SymbolTable<'a> {
        &self.symbols
    }

    pub fn frag_stream(&self) -> &FragStream<'a> {
        &self.stream
    }

    pub fn current_section(&self) -> SectionId {
        self.current
    }

    /// Intern `name` as a symbol without defining it.
    pub fn symbol(&mut self, name: &str) -> SymbolId {
        let name = self.session.intern_str(name);
        self.symbols.intern(name)
    }

    /// Switch to section `name`, creating it on first use.
    pub fn section(&mut self, name: &str, kind: SectionKind) -> SectionId {
        let id = match self.stream.find_section(name) {
            Some(id) => id,
            None => {
                let name = self.session.intern_str(name);
                self.stream.add_section(name, kind)
            }
        };
        self.current = id;
        id
    }

    /// Define `name` at the current position.
    pub fn label(&mut self, name: &str, loc: SourceLoc) -> SymbolId {
        let sym = self.symbol(name);
        let section = self.current;
        let text = self.stream.section(section).kind == SectionKind::Text;

        let frag = if text && self.config.emit_label_markers && self.relax_region {
            let frag = self.stream.start_fixed(section, loc);
            self.stream
                .set_label_fixup(Fixup::new(frag, 0, None, 0, RelocKind::LabelAlignment));
            frag
        } else {
            self.stream.tail_fixed(section, loc)
        };
        let offset = self.stream.frag(frag).bytes.len() as u32;

        if let Err(first) = self.symbols.define(sym, SymbolDef { section, frag, offset }, loc) {
            self.diags
                .error(loc, format!("symbol `{}` is already defined at {}", name, first));
            return sym;
        }
        if text {
            self.blocks.label(section, sym);
        }
        sym
    }

    pub fn global(&mut self, name: &str) -> SymbolId {
        let sym = self.symbol(name);
        self.symbols.set_binding(sym, Binding::Global);
        sym
    }

    pub fn weak(&mut self, name: &str) -> SymbolId {
        let sym = self.symbol(name);
        self.symbols.set_binding(sym, Binding::Weak);
        sym
    }

    /// `.equ name, value`
    pub fn equ(&mut self, name: &str, value: i64, loc: SourceLoc) -> SymbolId {
        let sym = self.symbol(name);
        let existing = self.symbols.get(sym);
        if existing.is_defined() {
            let first = existing.loc;
            self.diags
                .error(loc, format!("symbol `{}` is already defined at {}", name, first));
            return sym;
        }
        self.symbols.set_absolute(sym, value);
        self.symbols.get_mut(sym).loc = loc;
        sym
    }

    /// Enter (`false`) or leave (`true`) a `no_relax` region.
    pub fn set_relax(&mut self, on: bool) {
        log::trace!("relax region {}", if on { "on" } else { "off" });
        self.relax_region = on;
    }

    pub fn relax_region(&self) -> bool {
        self.relax_region
    }

    /// `.align 2**pow` with an optional bound on the padding. Powers above
    /// [`MAX_ALIGN_POW`] are reported and ignored.
    pub fn align(&mut self, pow: u8, max_skip: Option<u32>, loc: SourceLoc) -> Option<FragId> {
        if pow > MAX_ALIGN_POW {
            self.diags.error(
                loc,
                format!("alignment 2**{} exceeds the maximum of 2**{}", pow, MAX_ALIGN_POW),
            );
            return None;
        }
        let section = self.current;
        if pow >= 2 {
            if let Some(last) = self.stream.last_frag(section) {
                let frag = self.stream.frag_mut(last);
                if matches!(frag.kind, FragKind::Compactable(_)) {
                    frag.flags.align_sensitive = true;
                }
            }
        }
        let frag = self
            .stream
            .push_variable(section, FragKind::Align { pow, max_skip }, 0, loc);
        self.stream.frag_mut(frag).flags.relaxable = self.relax_region;
        Some(frag)
    }

    /// Raw bytes into the current section.
    pub fn data(&mut self, bytes: &[u8], loc: SourceLoc) {
        self.stream.append_bytes(self.current, bytes, loc);
    }

    /// `.word value`
    pub fn word_value(&mut self, value: u32, loc: SourceLoc) {
        let bytes = if self.config.big_endian {
            value.to_be_bytes()
        } else {
            value.to_le_bytes()
        };
        self.data(&bytes, loc);
    }

    /// `.word sym + addend`, resolved by the linker.
    pub fn word_symbol(&mut self, name: &str, addend: i64, loc: SourceLoc) -> FixupId {
        let sym = self.symbol(name);
        let (frag, offset) = self.stream.append_bytes(self.current, &[0; 4], loc);
        self.stream
            .add_fixup(Fixup::new(frag, offset, Some(sym), addend, RelocKind::AbsoluteWord))
    }

    pub fn emit(&mut self, insn: Insn, loc: SourceLoc) -> RelaxResult<InsnId> {
        self.emit_node(insn, loc, false)
    }

    /// Emit a call whose argument registers the caller has declared unused.
    pub fn emit_call(&mut self, insn: Insn, loc: SourceLoc, args_unused: bool) -> RelaxResult<InsnId> {
        self.emit_node(insn, loc, args_unused)
    }

    fn emit_node(&mut self, insn: Insn, loc: SourceLoc, args_unused: bool) -> RelaxResult<InsnId> {
        if is_malformed_multi(&insn) {
            self.diags
                .error(loc, format!("malformed register range in `{}`", insn));
        }
        let deps = dependencies(&insn, &self.config);
        self.session.record(|s| s.instructions += 1);

        let section = self.current;
        let mut fixups = Vec::new();
        let (frag, offset) = match insn.sym {
            Some(target) if target.part == SymPart::Full && insn.flow() != FlowKind::NonBranch => {
                (self.push_branch(&insn, target, loc)?, 0)
            }
            Some(target) if target.part == SymPart::Full && insn.op == Opcode::Movi => {
                (self.push_load(&insn, target, loc)?, 0)
            }
            Some(_) if insn.flow() != FlowKind::NonBranch => {
                return Err(RelaxError::Encoding {
                    opcode: insn.op.name(),
                    reason: "branch target must be a whole symbol".to_string(),
                });
            }
            Some(target) if target.part == SymPart::Full => {
                return Err(RelaxError::Encoding {
                    opcode: insn.op.name(),
                    reason: "a whole-symbol operand needs a branch, call or movi".to_string(),
                });
            }
            Some(target) => {
                let (frag, offset) = self.push_fixed(&insn, loc)?;
                let kind = match target.part {
                    SymPart::Hi20 => RelocKind::Hi20(target.flavor),
                    _ => RelocKind::Lo12(target.flavor),
                };
                let fx = self
                    .stream
                    .add_fixup(Fixup::new(frag, offset, Some(target.sym), target.addend, kind));
                fixups.push(fx);
                (frag, offset)
            }
            None => match self.plan_compact(&insn, loc)? {
                Some(frag) => (frag, 0),
                None => self.push_fixed(&insn, loc)?,
            },
        };

        let node = InsnNode::new(insn, deps, section, frag, offset, loc)
            .with_no_relax(!self.relax_region)
            .with_args_unused(args_unused);
        let id = self.blocks.push(node);
        self.blocks.insn_mut(id).fixups.extend(fixups);
        Ok(id)
    }

    fn push_fixed(&mut self, insn: &Insn, loc: SourceLoc) -> RelaxResult<(FragId, u32)> {
        let bytes = self.codec.encode(insn)?.to_bytes();
        Ok(self.stream.append_bytes(self.current, &bytes, loc))
    }

    /// Full-width encoding kept on variable frags for the linker's benefit.
    fn wide_bits(&self, insn: &Insn) -> RelaxResult<u32> {
        let mut wide = match insn.width() {
            Width::Compact => self.codec.widen(insn).unwrap_or(*insn),
            Width::Full => *insn,
        };
        wide.sym = None;
        Ok(self.codec.encode(&wide)?.bits)
    }

    fn push_variable(&mut self, insn: &Insn, kind: FragKind, size: u32, relaxable: bool, loc: SourceLoc) -> RelaxResult<FragId> {
        let insn32 = self.wide_bits(insn)?;
        let frag = self.stream.push_variable(self.current, kind, size, loc);
        let frag_mut = self.stream.frag_mut(frag);
        frag_mut.flags.relaxable = relaxable;
        frag_mut.orig_opcode = Some(insn.op);
        frag_mut.insn_num = 1;
        frag_mut.insn32 = insn32;
        Ok(frag)
    }

    fn push_branch(&mut self, insn: &Insn, target: SymOperand, loc: SourceLoc) -> RelaxResult<FragId> {
        let shape = BranchShape::from_insn(insn)?;
        let relaxable = self.relax_region && self.config.relax_branches;
        let compact_ok = self.config.compaction_enabled() || insn.width() == Width::Compact;
        let class = if relaxable {
            RangeClass::S256
        } else {
            BranchShape::written_class(insn.op)
        };
        let size = shape.sequence(class, compact_ok).size();
        let kind = FragKind::Branch(BranchFrag {
            shape,
            target,
            class,
            compact_ok,
            skip_label: None,
        });
        self.push_variable(insn, kind, size, relaxable, loc)
    }

    fn push_load(&mut self, insn: &Insn, target: SymOperand, loc: SourceLoc) -> RelaxResult<FragId> {
        let form = if self.relax_region && self.config.compaction_enabled() {
            LoadForm::Movi55
        } else {
            LoadForm::Movi
        };
        let kind = FragKind::AddrLoad(AddrLoadFrag {
            insn: *insn,
            target,
            form,
        });
        self.push_variable(insn, kind, form.size(), self.relax_region, loc)
    }

    fn plan_compact(&mut self, insn: &Insn, loc: SourceLoc) -> RelaxResult<Option<FragId>> {
        if !self.relax_region {
            return Ok(None);
        }
        let Some(planned) = compact::plan(&self.codec, insn, &self.config) else {
            return Ok(None);
        };
        // Both widths must encode, the choice between them is made during relaxation.
        if self.codec.encode(&planned.narrow).is_err() || self.codec.encode(&planned.wide).is_err() {
            return Ok(None);
        }
        let size = compact::current_size(&planned);
        let frag = self.push_variable(insn, FragKind::Compactable(planned), size, true, loc)?;
        Ok(Some(frag))
    }

    /// Close the unit: analyze, contract, relax and encode.
    pub fn finish(self) -> RelaxResult<UnitOutput<'a>> {
        let Assembler {
            session,
            config,
            codec,
            mut symbols,
            mut stream,
            blocks,
            mut diags,
            ..
        } = self;

        let mut cfg = blocks.finish(&symbols, &mut diags)?;
        session.record(|s| {
            s.blocks = cfg.blocks().len().saturating_sub(1);
            s.fragments = stream.frag_count();
        });
        log::info!(
            "🔍 unit has {} instructions in {} blocks",
            cfg.insn_count(),
            cfg.blocks().len().saturating_sub(1)
        );

        if config.contraction_enabled() {
            let formations = find_formations(&cfg, &mut diags);
            let analyzer = LivenessAnalyzer::new(&config);
            let mut results = Vec::with_capacity(formations.len());
            for formation in &formations {
                results.push(analyzer.analyze(&mut cfg, formation)?);
            }
            let used = results
                .iter()
                .filter(|r| r.eligibility == Eligibility::Used)
                .count();
            session.record(|s| {
                s.idioms_found += formations.len();
                s.idioms_vetoed += used;
            });
            let forest = RelocForest::build(&results, &cfg, &config, &mut diags);
            emit_forest(&forest, &mut cfg, &mut stream, session)?;
        }

        let engine = RelaxEngine::new(&config, &codec);
        let ids: Vec<SectionId> = stream.sections().iter().map(|s| s.id).collect();
        let mut sections = Vec::with_capacity(ids.len());
        for id in ids {
            let passes = engine.relax_section(&mut stream, id, &symbols)?;
            session.record(|s| s.relax_passes += passes);
            sections.push(engine.finalize_section(&mut stream, id, &mut symbols, session, &mut diags)?);
        }

        let stats = session.stats();
        log::info!("📦 {}", stats);
        Ok(UnitOutput {
            sections,
            symbols,
            diagnostics: diags,
            stats,
        })
    }
}
