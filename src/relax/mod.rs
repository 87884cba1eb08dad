//! Relaxation: fragment stream, range tables, compaction and the fixed-point engine.

pub mod compact;
pub mod engine;
pub mod frag;
pub mod range;

pub use engine::{RelaxEngine, SectionOutput};
pub use frag::{FragId, FragKind, FragStream, SectionId, SectionKind};
pub use range::{BranchShape, LoadForm, RangeClass};
