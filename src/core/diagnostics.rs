// This module collects the user-visible findings of an assembly unit. The relaxation core
// distinguishes three classes of problems: internal errors abort the unit and are carried
// by RelaxError, while user errors (a branch that cannot reach its target in a region where
// relaxation is disabled, a malformed register range in a load/store-multiple) and advisory
// warnings (an unmatched sethi/ori pair, a label resolving into another section, an
// instruction claimed by two relaxation patterns) are recorded here and never stop
// emission. Every diagnostic is attributed to the source location of the instruction that
// caused it and is mirrored to the log facade so a traced run shows it inline with the
// phase output.

//! Diagnostics sink for user errors and advisory warnings.

use std::fmt;

/// Source location attached to emitted instructions and labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SourceLoc {
    /// 1-based line number, 0 for generated code.
    pub line: u32,
}

impl SourceLoc {
    pub const fn new(line: u32) -> Self {
        Self { line }
    }

    /// Location used for synthesized instructions (relaxation sequences, padding).
    pub const fn synthetic() -> Self {
        Self { line: 0 }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "<generated>")
        } else {
            write!(f, "line {}", self.line)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

/// A single reported finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub loc: SourceLoc,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{}: {}: {}", self.loc, tag, self.message)
    }
}

/// Ordered collection of diagnostics for one unit.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an advisory warning.
    pub fn warn(&mut self, loc: SourceLoc, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{}: {}", loc, message);
        self.items.push(Diagnostic {
            severity: Severity::Warning,
            loc,
            message,
        });
    }

    /// Record a user error. Assembly continues with a best-effort encoding.
    pub fn error(&mut self, loc: SourceLoc, message: impl Into<String>) {
        let message = message.into();
        log::error!("{}: {}", loc, message);
        self.items.push(Diagnostic {
            severity: Severity::Error,
            loc,
            message,
        });
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(|d| d.severity == Severity::Warning)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(|d| d.severity == Severity::Error)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
