//! Basic blocks, the control-flow graph and the eligibility analysis run over it.

pub mod block;
pub mod graph;
pub mod liveness;

pub use block::{BasicBlock, BlockBuilder, BlockId, InsnId, InsnNode};
pub use graph::ControlFlowGraph;
pub use liveness::{find_formations, ConsumerPath, Eligibility, Formation, FormationResult, LivenessAnalyzer};
