//! Andes NDS32 target description used by the relaxation core.
//!
//! Only the parts of the instruction set the core reasons about are modelled: address
//! formation, the ALU and load/store forms that have compact equivalents, load/store
//! multiple, and every branch, call and jump in both widths.

pub mod codec;
pub mod deps;
pub mod insn;
pub mod reg;

pub use codec::{Encoded, InsnCodec, Nds32Codec};
pub use deps::{Access, RegDep};
pub use insn::{FlowKind, Insn, Opcode, PicFlavor, SymOperand, SymPart, Width};
pub use reg::{Reg, RegSet};
