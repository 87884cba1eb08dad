//! NDS32 assembler relaxation core.
//!
//! Decides, for one assembly unit, how wide every variable-length branch, call and
//! address-load sequence must be, which full-width instructions may stay in their 16-bit
//! form, and whether a `sethi`/`ori` address formation may be handed to the linker for
//! contraction. The surrounding assembler (parser, macro expansion, object writer) feeds
//! instructions and directives into an [`Assembler`] and collects bytes and relocation
//! records per section from [`UnitOutput`].
//!
//! # Primary Usage
//!
//! ```ignore
//! use bumpalo::Bump;
//! use nds32_relax::{Assembler, AssemblySession, RelaxConfig, SourceLoc};
//! use nds32_relax::nds32::{Insn, Reg};
//!
//! let arena = Bump::new();
//! let session = AssemblySession::new(&arena);
//! let mut asm = Assembler::new(&session, RelaxConfig::default());
//! let target = asm.symbol("done");
//! asm.emit(Insn::j(target), SourceLoc::new(1))?;
//! asm.label("done", SourceLoc::new(2));
//! asm.emit(Insn::ret(), SourceLoc::new(3))?;
//! let unit = asm.finish()?;
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Errors, diagnostics, configuration, session and symbols
//! - [`nds32`] - Registers, instructions, dependency facts and the codec
//! - [`relax`] - Fragments, range classes, compaction and the relaxation engine
//! - [`cfg`] - Basic blocks, the control-flow graph and the eligibility analysis
//! - [`reloc`] - Relocation kinds, idiom recognition, relocation trees and their emission
//! - [`assembler`] - Unit-level driver tying the phases together

pub mod assembler;
pub mod cfg;
pub mod core;
pub mod nds32;
pub mod relax;
pub mod reloc;

pub use assembler::{Assembler, UnitOutput};
pub use cfg::{ControlFlowGraph, Eligibility, LivenessAnalyzer};
pub use core::{
    AssemblySession, Diagnostic, Diagnostics, OptimizeMode, RelaxConfig, RelaxError, RelaxResult, SessionStats,
    Severity, SourceLoc, SymbolId, SymbolTable,
};
pub use relax::{RelaxEngine, SectionKind, SectionOutput};
pub use reloc::{RelocKind, RelocRecord};
