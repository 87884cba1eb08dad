// This module holds the immutable configuration threaded through every phase of the
// relaxation core. Instead of process-wide option globals (optimize mode, enabled
// features, ABI assumptions), each phase entry point receives a &RelaxConfig. The struct
// covers: whether branches are relaxed at all, whether full-width instructions may be
// converted to their 16-bit forms, whether sethi/ori address-formation idioms are analysed
// for linker contraction, the fan-out cap of a relocation tree, the pass bound of the
// fixed-point loop, the ABI register sets used by the liveness call/return rules, label
// alignment marker emission, data endianness, and the documented load/store-multiple
// ordering switch.

//! Immutable configuration for the relaxation and analysis phases.

use crate::nds32::reg::{Reg, RegSet};

/// Optimization goal, as selected by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizeMode {
    /// Emit instructions as written; only mandatory branch widening happens.
    None,
    /// Prefer the smallest encodings.
    #[default]
    Size,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaxConfig {
    pub optimize: OptimizeMode,
    /// Pick branch sequences by distance. When off every branch keeps the form it was
    /// written in and an unreachable target is a user error.
    pub relax_branches: bool,
    /// Allow full-width to compact-width conversion.
    pub compact: bool,
    /// Run the eligibility analysis and emit contraction relocations.
    pub contract_idioms: bool,
    /// Maximum number of leaf consumers a single address formation may fan out to.
    pub max_call_fanout: u32,
    /// Upper bound on fixed-point passes per section.
    pub max_relax_passes: usize,
    /// Registers carrying call arguments.
    pub arg_regs: RegSet,
    /// Registers carrying return values.
    pub ret_regs: RegSet,
    /// Registers preserved across calls.
    pub call_preserved: RegSet,
    /// Emit label-alignment markers at labels and alignment requests.
    pub emit_label_markers: bool,
    /// Keep pc-relative relocations even for targets resolved at assembly time, so the
    /// linker can still shrink code between them.
    pub keep_pcrel_relocs: bool,
    /// Byte order of data directives. Instructions are always big-endian.
    pub big_endian: bool,
    /// List the base register of `lmw` before the loaded registers in its dependency
    /// facts. Off by default, which keeps the historical write-first ordering.
    pub multi_reg_base_conservative: bool,
}

impl Default for RelaxConfig {
    fn default() -> Self {
        let mut preserved = RegSet::range(6, 14);
        preserved.insert(Reg::FP);
        preserved.insert(Reg::GP);
        preserved.insert(Reg::SP);
        Self {
            optimize: OptimizeMode::Size,
            relax_branches: true,
            compact: true,
            contract_idioms: true,
            max_call_fanout: 4,
            max_relax_passes: 64,
            arg_regs: RegSet::range(0, 5),
            ret_regs: RegSet::range(0, 1),
            call_preserved: preserved,
            emit_label_markers: true,
            keep_pcrel_relocs: true,
            big_endian: true,
            multi_reg_base_conservative: false,
        }
    }
}

impl RelaxConfig {
    /// Configuration that emits every instruction as written.
    pub fn no_optimize() -> Self {
        Self {
            optimize: OptimizeMode::None,
            compact: false,
            contract_idioms: false,
            ..Self::default()
        }
    }

    pub fn with_compact(mut self, compact: bool) -> Self {
        self.compact = compact;
        self
    }

    pub fn with_relax_branches(mut self, relax: bool) -> Self {
        self.relax_branches = relax;
        self
    }

    pub fn with_contract_idioms(mut self, contract: bool) -> Self {
        self.contract_idioms = contract;
        self
    }

    pub fn with_max_call_fanout(mut self, fanout: u32) -> Self {
        self.max_call_fanout = fanout;
        self
    }

    pub fn with_max_relax_passes(mut self, passes: usize) -> Self {
        self.max_relax_passes = passes;
        self
    }

    pub fn with_label_markers(mut self, emit: bool) -> Self {
        self.emit_label_markers = emit;
        self
    }

    pub fn with_big_endian(mut self, big_endian: bool) -> Self {
        self.big_endian = big_endian;
        self
    }

    pub fn with_multi_reg_base_conservative(mut self, conservative: bool) -> Self {
        self.multi_reg_base_conservative = conservative;
        self
    }

    /// Whether compaction is in effect for this run.
    pub fn compaction_enabled(&self) -> bool {
        self.compact && self.optimize == OptimizeMode::Size
    }

    /// Whether idiom contraction is in effect for this run.
    pub fn contraction_enabled(&self) -> bool {
        self.contract_idioms && self.optimize == OptimizeMode::Size
    }
}
