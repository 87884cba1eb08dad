// This module serves as the hub for the infrastructure shared by every phase of the
// relaxation core. It exports the internal error type and its result alias, the
// diagnostics sink that collects user errors and advisory warnings with their source
// locations, the immutable configuration threaded through the CFG build, the eligibility
// analysis and the relaxation engine, the arena-backed assembly session with its
// statistics, and the minimal symbol table the engine resolves branch targets through.
// Nothing here knows about fragments or instructions beyond their identifiers.

//! Shared infrastructure of the relaxation core.
//!
//! # Key Components
//!
//! ## Errors (`error`)
//! - [`RelaxError`] for internal errors that abort the unit
//!
//! ## Diagnostics (`diagnostics`)
//! - User errors and advisory warnings attributed to a [`SourceLoc`]
//!
//! ## Configuration (`config`)
//! - [`RelaxConfig`]: optimize mode, feature switches, ABI register sets
//!
//! ## Session Management (`session`)
//! - Arena-based name interning using `bumpalo`
//! - Per-unit statistics
//!
//! ## Symbols (`symbols`)
//! - Label placement, bindings and absolute values

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod session;
pub mod symbols;

pub use config::{OptimizeMode, RelaxConfig};
pub use diagnostics::{Diagnostic, Diagnostics, Severity, SourceLoc};
pub use error::{RelaxError, RelaxResult};
pub use session::{AssemblySession, SessionStats};
pub use symbols::{Binding, Symbol, SymbolDef, SymbolId, SymbolTable};
