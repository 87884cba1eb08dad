// This module defines the internal error type of the relaxation core using the thiserror
// crate. RelaxError covers the failures that abort a whole assembly unit: an invalid
// register number surfacing from dependency facts, an opcode the classifier cannot place,
// a fragment stream that does not reach a fixed point within the configured number of
// passes, a dangling arena index in the basic-block graph, and instructions the codec
// cannot encode or decode. User errors (out-of-range branches, malformed register ranges)
// and advisory warnings are not errors in this sense; they are collected as diagnostics
// and assembly continues with a best-effort encoding. RelaxResult<T> is the usual alias.

//! Internal error types for the relaxation core.
//!
//! Using thiserror for idiomatic error handling.

use thiserror::Error;

/// Internal error that aborts processing of the current unit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelaxError {
    #[error("internal error: invalid register number {reg} in dependency facts of instruction {insn}")]
    InvalidRegister { reg: u8, insn: u32 },

    #[error("internal error: cannot classify opcode {opcode}")]
    UnclassifiableOpcode { opcode: &'static str },

    #[error("internal error: relaxation of section {section} did not converge after {passes} passes")]
    NonConvergent { section: String, passes: usize },

    #[error("internal error: corrupt dependency graph: {reason}")]
    CorruptGraph { reason: String },

    #[error("internal error: undecodable instruction word {word:#010x}")]
    Undecodable { word: u32 },

    #[error("cannot encode {opcode}: {reason}")]
    Encoding {
        opcode: &'static str,
        reason: String,
    },
}

impl RelaxError {
    /// Shorthand for a [`RelaxError::CorruptGraph`] with a formatted reason.
    pub fn corrupt(reason: impl Into<String>) -> Self {
        RelaxError::CorruptGraph {
            reason: reason.into(),
        }
    }
}

/// Result type alias for relaxation operations.
pub type RelaxResult<T> = Result<T, RelaxError>;
