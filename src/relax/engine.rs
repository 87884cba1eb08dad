// This module implements the fixed-point relaxation engine. relax_section first lays out
// every fragment of a section with its initial estimate, then runs passes until no fragment
// changes size. Within a pass fragments are visited in layout order with a running address;
// a target behind the current fragment is read from its already updated address, a target
// ahead of it from its previous-pass address plus the growth accumulated so far in this pass
// (the stretch). Branch fragments commit to max(previous class, smallest fitting class),
// compactable fragments widen when forced or misaligned, address loads pick their form from
// the symbol value, and alignment fragments absorb the difference. Variable fragments never
// shrink, so the loop terminates; the configured pass bound turns a runaway stream into an
// internal error instead of a hang. finalize_section then performs the one rewrite pass:
// encode the chosen sequences, create the synthetic labels inverted branches skip to, fill
// alignment with no-ops, and turn every pending fixup into an ordered RelocRecord with its
// chain resolved to a record index.

//! Fixed-point relaxation and final rewrite of a section.

use hashbrown::HashMap;

use super::compact;
use super::frag::{FragId, FragKind, FragStream, SectionId, SectionKind, MAX_VARIABLE_GROWTH};
use super::range::{BranchShape, LoadForm, StepOperand};
use crate::core::config::RelaxConfig;
use crate::core::diagnostics::Diagnostics;
use crate::core::error::{RelaxError, RelaxResult};
use crate::core::session::AssemblySession;
use crate::core::symbols::{SymbolDef, SymbolId, SymbolTable};
use crate::nds32::codec::InsnCodec;
use crate::nds32::insn::{Insn, Opcode, PicFlavor, SymOperand, Width};
use crate::reloc::{FixupId, RelocKind, RelocRecord};

/// Bytes and relocations of one section after relaxation.
#[derive(Debug, Clone)]
pub struct SectionOutput<'a> {
    pub id: SectionId,
    pub name: &'a str,
    pub kind: SectionKind,
    pub bytes: Vec<u8>,
    pub relocs: Vec<RelocRecord>,
}

impl<'a> SectionOutput<'a> {
    pub fn relocs_of_kind(&self, kind: RelocKind) -> impl Iterator<Item = &RelocRecord> {
        self.relocs.iter().filter(move |r| r.kind == kind)
    }
}

/// Final value of a symbolic operand as seen from one section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolved {
    /// Section-relative address.
    Local(i64),
    Absolute(i64),
    External,
}

/// A relocation waiting for the final record order.
struct Pending {
    offset: u32,
    symbol: Option<SymbolId>,
    addend: i64,
    kind: RelocKind,
    source: Option<FixupId>,
    chain: Option<FixupId>,
}

impl Pending {
    fn new(offset: u32, symbol: Option<SymbolId>, addend: i64, kind: RelocKind) -> Self {
        Self {
            offset,
            symbol,
            addend,
            kind,
            source: None,
            chain: None,
        }
    }
}

/// Largest alignment power a 32-bit section can honour.
pub const MAX_ALIGN_POW: u8 = 31;

pub fn align_padding(address: u32, pow: u8, max_skip: Option<u32>) -> u32 {
    let align = 1u32 << pow.min(MAX_ALIGN_POW);
    let padding = (align - address % align) % align;
    match max_skip {
        Some(max) if padding > max => 0,
        _ => padding,
    }
}

fn hi20(value: i64) -> i32 {
    ((value >> 12) & 0xfffff) as i32
}

fn lo12(value: i64) -> i32 {
    (value & 0xfff) as i32
}

pub struct RelaxEngine<'c, C: InsnCodec> {
    config: &'c RelaxConfig,
    codec: &'c C,
}

impl<'c, C: InsnCodec> RelaxEngine<'c, C> {
    pub fn new(config: &'c RelaxConfig, codec: &'c C) -> Self {
        Self { config, codec }
    }

    /// Assign addresses from the committed sizes without re-measuring anything.
    pub fn layout(&self, stream: &mut FragStream<'_>, section: SectionId) {
        let ids = stream.section(section).frags.clone();
        let mut address = 0u32;
        for id in ids {
            let frag = stream.frag_mut(id);
            frag.address = address;
            if let FragKind::Align { pow, max_skip } = frag.kind {
                frag.size = align_padding(address, pow, max_skip);
            }
            address += frag.size;
        }
    }

    /// Run passes until no fragment changes size. Returns the number of passes.
    pub fn relax_section(
        &self,
        stream: &mut FragStream<'_>,
        section: SectionId,
        symbols: &SymbolTable<'_>,
    ) -> RelaxResult<usize> {
        self.layout(stream, section);
        let mut passes = 0;
        loop {
            if passes >= self.config.max_relax_passes {
                return Err(RelaxError::NonConvergent {
                    section: stream.section(section).name.to_string(),
                    passes,
                });
            }
            passes += 1;
            if !self.pass(stream, section, symbols)? {
                break;
            }
        }
        log::debug!(
            "🔧 {} converged after {} passes, {} bytes",
            stream.section(section).name,
            passes,
            stream.section_size(section)
        );
        Ok(passes)
    }

    fn pass(&self, stream: &mut FragStream<'_>, section: SectionId, symbols: &SymbolTable<'_>) -> RelaxResult<bool> {
        let ids = stream.section(section).frags.clone();
        let mut address = 0u32;
        let mut changed = false;

        for id in ids {
            let (old_address, old_size) = {
                let frag = stream.frag(id);
                (frag.address, frag.size)
            };
            let stretch = address as i64 - old_address as i64;
            stream.frag_mut(id).address = address;
            let new_size = self.measure(stream, id, stretch, symbols)?;

            let frag = stream.frag_mut(id);
            if new_size != old_size {
                let sized_by_content = matches!(frag.kind, FragKind::Align { .. } | FragKind::Fixed);
                if !sized_by_content {
                    if new_size < old_size {
                        return Err(RelaxError::corrupt(format!(
                            "{} shrank from {} to {} bytes",
                            id, old_size, new_size
                        )));
                    }
                    if new_size > MAX_VARIABLE_GROWTH {
                        return Err(RelaxError::corrupt(format!(
                            "{} grew to {} bytes",
                            id, new_size
                        )));
                    }
                    frag.flags.relaxed = true;
                }
                log::trace!("{} at {:#x}: {} -> {} bytes", id, address, old_size, new_size);
                changed = true;
            }
            frag.size = new_size;
            address += new_size;
        }
        Ok(changed)
    }

    /// Size of fragment `id` at its (already updated) address for this pass.
    fn measure(
        &self,
        stream: &mut FragStream<'_>,
        id: FragId,
        stretch: i64,
        symbols: &SymbolTable<'_>,
    ) -> RelaxResult<u32> {
        let frag = stream.frag(id);
        let address = frag.address;
        match &frag.kind {
            FragKind::Fixed => Ok(frag.bytes.len() as u32),
            FragKind::Align { pow, max_skip } => Ok(align_padding(address, *pow, *max_skip)),
            FragKind::Branch(branch) => {
                let (shape, committed, compact_ok, target) =
                    (branch.shape, branch.class, branch.compact_ok, branch.target);
                let class = if frag.flags.relaxable {
                    let disp = self
                        .pass_target(stream, symbols, &target, frag.section, frag.seq, stretch)
                        .map(|dest| dest - address as i64);
                    shape.select(committed, disp, compact_ok)
                } else {
                    committed
                };
                if let FragKind::Branch(branch) = &mut stream.frag_mut(id).kind {
                    branch.class = class;
                }
                Ok(shape.sequence(class, compact_ok).size())
            }
            FragKind::Compactable(_) => {
                let frag = stream.frag_mut(id);
                let flags = frag.flags;
                match &mut frag.kind {
                    FragKind::Compactable(c) => Ok(compact::resize(c, &flags, address)),
                    _ => Err(RelaxError::corrupt(format!("{} changed kind", id))),
                }
            }
            FragKind::AddrLoad(load) => {
                let allow_compact = frag.flags.relaxable && self.config.compaction_enabled();
                let value = absolute_value(symbols, &load.target);
                let form = load.form.max(LoadForm::for_value(value, allow_compact));
                if let FragKind::AddrLoad(load) = &mut stream.frag_mut(id).kind {
                    load.form = form;
                }
                Ok(form.size())
            }
        }
    }

    /// Target address during a pass, `None` when only the linker can know it.
    fn pass_target(
        &self,
        stream: &FragStream<'_>,
        symbols: &SymbolTable<'_>,
        target: &SymOperand,
        section: SectionId,
        seq: u32,
        stretch: i64,
    ) -> Option<i64> {
        let sym = symbols.get(target.sym);
        if !sym.is_resolvable_in(section) {
            return None;
        }
        let def = sym.def?;
        let dest = stream.frag(def.frag);
        let base = if dest.seq > seq {
            dest.address as i64 + stretch
        } else {
            dest.address as i64
        };
        Some(base + def.offset as i64 + target.addend)
    }

    fn resolve(&self, stream: &FragStream<'_>, symbols: &SymbolTable<'_>, target: &SymOperand, section: SectionId) -> Resolved {
        let sym = symbols.get(target.sym);
        if let Some(value) = sym.absolute {
            return Resolved::Absolute(value + target.addend);
        }
        match sym.def {
            Some(def) if sym.is_resolvable_in(section) => {
                let frag = stream.frag(def.frag);
                Resolved::Local(frag.address as i64 + def.offset as i64 + target.addend)
            }
            _ => Resolved::External,
        }
    }

    /// Encode every fragment of `section` and produce its ordered relocations.
    pub fn finalize_section<'a>(
        &self,
        stream: &mut FragStream<'a>,
        section: SectionId,
        symbols: &mut SymbolTable<'a>,
        session: &AssemblySession<'a>,
        diags: &mut Diagnostics,
    ) -> RelaxResult<SectionOutput<'a>> {
        let (name, kind, ids) = {
            let sec = stream.section(section);
            (sec.name, sec.kind, sec.frags.clone())
        };
        let mut out: Vec<u8> = Vec::with_capacity(stream.section_size(section) as usize);
        let mut pending: Vec<Pending> = Vec::new();

        for id in ids {
            let start = out.len() as u32;
            let frag = stream.frag(id);
            if start != frag.address {
                return Err(RelaxError::corrupt(format!(
                    "{} laid out at {:#x} but emitted at {:#x}",
                    id, frag.address, start
                )));
            }

            if let Some(label) = frag.label_fixup {
                let fixup = stream.fixup(label);
                pending.push(Pending {
                    source: Some(label),
                    ..Pending::new(start, fixup.sym, fixup.addend, fixup.kind)
                });
            }
            let mut attached = frag.fixups.clone();
            attached.sort_by_key(|&fx| stream.fixup(fx).offset);
            for fx in attached {
                let fixup = stream.fixup(fx);
                pending.push(Pending {
                    source: Some(fx),
                    chain: fixup.chain,
                    ..Pending::new(start + fixup.offset, fixup.sym, fixup.addend, fixup.kind)
                });
            }

            match frag.kind.clone() {
                FragKind::Fixed => out.extend_from_slice(&frag.bytes),
                FragKind::Align { pow, .. } => {
                    let size = frag.size;
                    if kind == SectionKind::Text {
                        if self.config.emit_label_markers && frag.flags.relaxable {
                            pending.push(Pending::new(start, None, pow as i64, RelocKind::LabelAlignment));
                        }
                        out.extend_from_slice(&self.codec.nop_padding(size));
                    } else {
                        out.resize(out.len() + size as usize, 0);
                    }
                }
                FragKind::Compactable(c) => {
                    let insn = compact::chosen(&c);
                    self.codec.encode(&insn)?.write_to(&mut out);
                    let written_full = frag.orig_opcode.map(|op| op.width()) == Some(Width::Full);
                    if !c.widened && written_full {
                        session.record(|s| s.compacted += 1);
                    }
                }
                FragKind::Branch(_) => {
                    self.emit_branch(stream, id, symbols, session, diags, &mut out, &mut pending)?;
                }
                FragKind::AddrLoad(load) => {
                    self.emit_load(stream, id, &load, symbols, &mut out, &mut pending)?;
                }
            }

            let frag = stream.frag(id);
            if frag.flags.relaxed {
                session.record(|s| s.relaxed += 1);
                log::trace!(
                    "{} relaxed: {} insn from {:#010x} now {} bytes",
                    id,
                    frag.insn_num,
                    frag.insn32,
                    frag.size
                );
            }
            let emitted = out.len() as u32 - start;
            if emitted != frag.size {
                return Err(RelaxError::corrupt(format!(
                    "{} emitted {} bytes, committed {}",
                    id, emitted, frag.size
                )));
            }
        }

        pending.sort_by_key(|p| p.offset);
        let index: HashMap<FixupId, usize> = pending
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.source.map(|fx| (fx, i)))
            .collect();
        let relocs = pending
            .iter()
            .map(|p| RelocRecord {
                offset: p.offset,
                symbol: p.symbol,
                addend: p.addend,
                kind: p.kind,
                chain: p.chain.and_then(|fx| index.get(&fx).copied()),
            })
            .collect::<Vec<_>>();

        log::debug!("📦 {}: {} bytes, {} relocations", name, out.len(), relocs.len());
        Ok(SectionOutput {
            id: section,
            name,
            kind,
            bytes: out,
            relocs,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_branch<'a>(
        &self,
        stream: &mut FragStream<'a>,
        id: FragId,
        symbols: &mut SymbolTable<'a>,
        session: &AssemblySession<'a>,
        diags: &mut Diagnostics,
        out: &mut Vec<u8>,
        pending: &mut Vec<Pending>,
    ) -> RelaxResult<()> {
        let frag = stream.frag(id);
        let FragKind::Branch(branch) = frag.kind.clone() else {
            return Err(RelaxError::corrupt(format!("{} is not a branch", id)));
        };
        let (address, loc, relaxable, section) = (frag.address, frag.loc, frag.flags.relaxable, frag.section);
        let seq = branch.shape.sequence(branch.class, branch.compact_ok);
        let target = self.resolve(stream, symbols, &branch.target, section);
        session.record(|s| s.branches_by_class[branch.class.index()] += 1);
        log::trace!(
            "{} {} -> {} ({} bytes)",
            id,
            symbols.name(branch.target.sym),
            branch.class,
            seq.size()
        );

        let skip_label = if seq.has_skip() {
            let label = symbols.intern(session.synthetic_label());
            symbols.mark_synthetic(label);
            let def = SymbolDef {
                section,
                frag: id,
                offset: seq.size(),
            };
            symbols
                .define(label, def, loc)
                .map_err(|_| RelaxError::corrupt(format!("synthetic label of {} already defined", id)))?;
            if let FragKind::Branch(b) = &mut stream.frag_mut(id).kind {
                b.skip_label = Some(label);
            }
            Some(label)
        } else {
            None
        };

        let mut offset = 0u32;
        for step in &seq.steps {
            let pc = address + offset;
            let mut insn: Insn = step.insn;
            match step.operand {
                StepOperand::None => {}
                StepOperand::Target => {
                    let kind = if matches!(insn.op, Opcode::J | Opcode::Jal) {
                        RelocKind::PcRelFar
                    } else {
                        RelocKind::PcRelNear
                    };
                    match target {
                        Resolved::Local(dest) => {
                            let mut disp = dest - pc as i64;
                            if disp & 1 != 0 {
                                diags.error(
                                    loc,
                                    format!(
                                        "branch to `{}` targets a misaligned address ({} bytes away)",
                                        symbols.name(branch.target.sym),
                                        disp
                                    ),
                                );
                                disp = 0;
                            } else if !BranchShape::written_class(insn.op).contains(disp) {
                                if relaxable {
                                    return Err(RelaxError::corrupt(format!(
                                        "{} committed to {} but target is {} bytes away",
                                        id, branch.class, disp
                                    )));
                                }
                                diags.error(
                                    loc,
                                    format!(
                                        "branch to `{}` is out of range ({} bytes) and relaxation is disabled",
                                        symbols.name(branch.target.sym),
                                        disp
                                    ),
                                );
                                disp = 0;
                            }
                            insn.imm = disp as i32;
                            if self.config.keep_pcrel_relocs {
                                pending.push(Pending::new(pc, Some(branch.target.sym), branch.target.addend, kind));
                            }
                        }
                        Resolved::Absolute(_) | Resolved::External => {
                            pending.push(Pending::new(pc, Some(branch.target.sym), branch.target.addend, kind));
                        }
                    }
                }
                StepOperand::SkipLabel => {
                    insn.imm = (seq.size() - offset) as i32;
                    if self.config.keep_pcrel_relocs {
                        pending.push(Pending::new(pc, skip_label, 0, RelocKind::PcRelNear));
                    }
                }
                StepOperand::TargetHi20 => match target {
                    Resolved::Absolute(value) => insn.imm = hi20(value),
                    _ => pending.push(Pending::new(
                        pc,
                        Some(branch.target.sym),
                        branch.target.addend,
                        RelocKind::Hi20(PicFlavor::Abs),
                    )),
                },
                StepOperand::TargetLo12 => match target {
                    Resolved::Absolute(value) => insn.imm = lo12(value),
                    _ => pending.push(Pending::new(
                        pc,
                        Some(branch.target.sym),
                        branch.target.addend,
                        RelocKind::Lo12(PicFlavor::Abs),
                    )),
                },
            }
            self.codec.encode(&insn)?.write_to(out);
            offset += insn.width().bytes();
        }
        Ok(())
    }

    fn emit_load(
        &self,
        stream: &FragStream<'_>,
        id: FragId,
        load: &super::frag::AddrLoadFrag,
        symbols: &SymbolTable<'_>,
        out: &mut Vec<u8>,
        pending: &mut Vec<Pending>,
    ) -> RelaxResult<()> {
        let address = stream.frag(id).address;
        let rt = load.insn.rt;
        let value = absolute_value(symbols, &load.target);
        let need_value = || {
            value.ok_or_else(|| RelaxError::corrupt(format!("{} chose {:?} without a value", id, load.form)))
        };
        let insns: Vec<Insn> = match load.form {
            LoadForm::Movi55 => vec![Insn {
                op: Opcode::Movi55,
                ..Insn::movi(rt, need_value()? as i32)
            }],
            LoadForm::Movi => vec![Insn::movi(rt, need_value()? as i32)],
            LoadForm::Sethi => vec![Insn::sethi(rt, hi20(need_value()?))],
            LoadForm::SethiOri => match value {
                Some(v) => vec![Insn::sethi(rt, hi20(v)), Insn::ori(rt, rt, lo12(v))],
                None => {
                    let flavor = load.target.flavor;
                    pending.push(Pending::new(
                        address,
                        Some(load.target.sym),
                        load.target.addend,
                        RelocKind::Hi20(flavor),
                    ));
                    pending.push(Pending::new(
                        address + 4,
                        Some(load.target.sym),
                        load.target.addend,
                        RelocKind::Lo12(flavor),
                    ));
                    vec![Insn::sethi(rt, 0), Insn::ori(rt, rt, 0)]
                }
            },
        };
        for insn in insns {
            self.codec.encode(&insn)?.write_to(out);
        }
        Ok(())
    }
}

fn absolute_value(symbols: &SymbolTable<'_>, target: &SymOperand) -> Option<i64> {
    symbols.get(target.sym).absolute.map(|v| v + target.addend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diagnostics::SourceLoc;
    use crate::nds32::codec::Nds32Codec;
    use crate::relax::frag::{BranchFrag, RelaxFlags};
    use crate::relax::range::RangeClass;
    use bumpalo::Bump;

    fn branch_frag(stream: &mut FragStream<'_>, section: SectionId, target: SymbolId) -> FragId {
        let id = stream.push_variable(
            section,
            FragKind::Branch(BranchFrag {
                shape: BranchShape::Jump,
                target: SymOperand::target(target),
                class: RangeClass::S256,
                compact_ok: true,
                skip_label: None,
            }),
            2,
            SourceLoc::new(1),
        );
        stream.frag_mut(id).flags = RelaxFlags {
            relaxable: true,
            ..RelaxFlags::default()
        };
        id
    }

    #[test]
    fn test_align_padding() {
        assert_eq!(align_padding(0, 2, None), 0);
        assert_eq!(align_padding(2, 2, None), 2);
        assert_eq!(align_padding(5, 3, None), 3);
        assert_eq!(align_padding(5, 3, Some(2)), 0);
        assert_eq!(align_padding(4, 40, None), (1 << MAX_ALIGN_POW) - 4);
    }

    #[test]
    fn test_converged_section_is_a_fixed_point() {
        let config = RelaxConfig::default();
        let codec = Nds32Codec::new();
        let engine = RelaxEngine::new(&config, &codec);
        let mut stream = FragStream::new();
        let mut symbols = SymbolTable::new();
        let text = stream.add_section(".text", SectionKind::Text);
        let target = symbols.intern("far");
        branch_frag(&mut stream, text, target);
        stream.push_variable(text, FragKind::Align { pow: 2, max_skip: None }, 0, SourceLoc::new(2));
        let (frag, _) = stream.append_bytes(text, &[0; 20_000], SourceLoc::new(3));
        symbols
            .define(target, SymbolDef { section: text, frag, offset: 20_000 }, SourceLoc::new(4))
            .unwrap();
        let sizes = |stream: &FragStream<'_>| -> Vec<u32> {
            stream.section(text).frags.iter().map(|&id| stream.frag(id).size).collect()
        };

        let first = engine.relax_section(&mut stream, text, &symbols).unwrap();
        assert!(first >= 2);
        let converged = sizes(&stream);

        let again = engine.relax_section(&mut stream, text, &symbols).unwrap();
        assert_eq!(again, 1);
        assert_eq!(sizes(&stream), converged);
    }

    #[test]
    fn test_forward_branch_grows_with_stretch() {
        let arena = Bump::new();
        let session = AssemblySession::new(&arena);
        let config = RelaxConfig::default();
        let codec = Nds32Codec::new();
        let engine = RelaxEngine::new(&config, &codec);

        let mut stream = FragStream::new();
        let mut symbols = SymbolTable::new();
        let text = stream.add_section(".text", SectionKind::Text);
        let target = symbols.intern("far");
        let branch = branch_frag(&mut stream, text, target);
        let (frag, _) = stream.append_bytes(text, &[0x92; 300], SourceLoc::new(2));
        symbols
            .define(target, SymbolDef { section: text, frag, offset: 300 }, SourceLoc::new(3))
            .unwrap();

        let passes = engine.relax_section(&mut stream, text, &symbols).unwrap();
        assert!(passes >= 2);
        match &stream.frag(branch).kind {
            FragKind::Branch(b) => assert_eq!(b.class, RangeClass::S16K),
            other => panic!("unexpected kind {:?}", other),
        }
        assert_eq!(stream.frag(branch).size, 4);

        let mut diags = Diagnostics::new();
        let out = engine
            .finalize_section(&mut stream, text, &mut symbols, &session, &mut diags)
            .unwrap();
        assert_eq!(out.bytes.len(), 304);
        // j +304, halfword scaled
        assert_eq!(&out.bytes[..4], &[0x48, 0x00, 0x00, 0x98]);
        assert_eq!(out.relocs.len(), 1);
        assert_eq!(out.relocs[0].kind, RelocKind::PcRelFar);
    }

    #[test]
    fn test_pass_bound_is_enforced() {
        let config = RelaxConfig::default().with_max_relax_passes(1);
        let codec = Nds32Codec::new();
        let engine = RelaxEngine::new(&config, &codec);
        let mut stream = FragStream::new();
        let mut symbols = SymbolTable::new();
        let text = stream.add_section(".text", SectionKind::Text);
        let target = symbols.intern("far");
        branch_frag(&mut stream, text, target);
        let (frag, _) = stream.append_bytes(text, &[0; 1000], SourceLoc::new(2));
        symbols
            .define(target, SymbolDef { section: text, frag, offset: 1000 }, SourceLoc::new(2))
            .unwrap();
        assert_eq!(
            engine.relax_section(&mut stream, text, &symbols),
            Err(RelaxError::NonConvergent {
                section: ".text".to_string(),
                passes: 1
            })
        );
    }
}
