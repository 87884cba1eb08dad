//! NDS32 general-purpose registers and register sets.
//!
//! The register file has 32 general-purpose registers. Compact (16-bit) encodings only
//! address subsets of it: three-bit fields reach `r0`–`r7`, five-bit fields reach all of
//! them. A handful of registers have fixed ABI roles which the liveness analysis and the
//! relaxation sequences depend on.

use std::fmt;

/// Number of general-purpose registers.
pub const NUM_REGS: u8 = 32;

/// DWARF return-address column (`lp`).
pub const DWARF_RETURN_COLUMN: u8 = 30;

/// DWARF CIE data alignment factor.
pub const DWARF_CIE_DATA_ALIGNMENT: i8 = -4;

/// Minimum instruction length in bytes, used for line-table advances.
pub const DWARF_MIN_INSN_LENGTH: u8 = 2;

/// A general-purpose register number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(u8);

impl Reg {
    /// Assembler temporary used by the long branch sequences.
    pub const TA: Reg = Reg(15);
    pub const FP: Reg = Reg(28);
    pub const GP: Reg = Reg(29);
    /// Link pointer, written by every call.
    pub const LP: Reg = Reg(30);
    pub const SP: Reg = Reg(31);
    /// Implicit comparand of `beqs38`/`bnes38`.
    pub const R5: Reg = Reg(5);

    /// Create a register, rejecting numbers outside the register file.
    pub const fn new(num: u8) -> Option<Reg> {
        if num < NUM_REGS {
            Some(Reg(num))
        } else {
            None
        }
    }

    /// Create a register from an encoded field. The caller guarantees the range.
    pub(crate) const fn from_field(num: u32) -> Reg {
        Reg((num & 0x1f) as u8)
    }

    pub const fn num(self) -> u8 {
        self.0
    }

    /// Addressable by a three-bit compact field.
    pub const fn is_low3(self) -> bool {
        self.0 < 8
    }

    /// Look up a register by its assembler name.
    ///
    /// Accepts `r0`..`r31` with or without a `$` prefix and the ABI aliases.
    pub fn from_name(name: &str) -> Option<Reg> {
        let name = name.strip_prefix('$').unwrap_or(name);
        match name {
            "ta" => return Some(Reg::TA),
            "fp" => return Some(Reg::FP),
            "gp" => return Some(Reg::GP),
            "lp" => return Some(Reg::LP),
            "sp" => return Some(Reg::SP),
            _ => {}
        }
        let digits = name.strip_prefix('r')?;
        if digits.is_empty() || (digits.len() > 1 && digits.starts_with('0')) {
            return None;
        }
        digits.parse::<u8>().ok().and_then(Reg::new)
    }

    /// DWARF register number. General-purpose registers map one to one.
    pub const fn dwarf_regnum(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Reg::TA => write!(f, "$ta"),
            Reg::FP => write!(f, "$fp"),
            Reg::GP => write!(f, "$gp"),
            Reg::LP => write!(f, "$lp"),
            Reg::SP => write!(f, "$sp"),
            Reg(n) => write!(f, "$r{}", n),
        }
    }
}

/// Bit set over the 32 general-purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct RegSet(u32);

impl RegSet {
    pub const EMPTY: RegSet = RegSet(0);

    pub const fn new() -> Self {
        RegSet(0)
    }

    /// All registers in `first..=last`.
    pub const fn range(first: u8, last: u8) -> Self {
        if first > last || last >= NUM_REGS {
            return RegSet(0);
        }
        let width = (last - first + 1) as u32;
        let bits = if width == 32 { u32::MAX } else { (1u32 << width) - 1 };
        RegSet(bits << first)
    }

    pub fn of(regs: &[Reg]) -> Self {
        let mut set = RegSet::new();
        for &r in regs {
            set.insert(r);
        }
        set
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, reg: Reg) -> bool {
        self.0 & (1 << reg.0) != 0
    }

    /// Membership test on a raw register number; out-of-range numbers are never members.
    pub fn contains_num(self, num: u8) -> bool {
        num < NUM_REGS && self.0 & (1 << num) != 0
    }

    pub fn insert(&mut self, reg: Reg) {
        self.0 |= 1 << reg.0;
    }

    pub fn remove(&mut self, reg: Reg) {
        self.0 &= !(1 << reg.0);
    }

    pub fn difference(self, other: RegSet) -> RegSet {
        RegSet(self.0 & !other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> u32 {
        self.0.count_ones()
    }

    pub fn iter(self) -> impl Iterator<Item = Reg> {
        (0..NUM_REGS).filter(move |&n| self.0 & (1 << n) != 0).map(Reg)
    }
}

impl fmt::Display for RegSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, r) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", r)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dwarf_frame_constants_match_encoding() {
        use crate::nds32::insn::Width;
        assert_eq!(DWARF_MIN_INSN_LENGTH as u32, Width::Compact.bytes());
        assert_eq!(DWARF_CIE_DATA_ALIGNMENT as i32, -(Width::Full.bytes() as i32));
        assert_eq!(Reg::new(DWARF_RETURN_COLUMN), Some(Reg::LP));
    }

    #[test]
    fn test_register_names() {
        assert_eq!(Reg::from_name("r0"), Reg::new(0));
        assert_eq!(Reg::from_name("$r31"), Some(Reg::SP));
        assert_eq!(Reg::from_name("ta"), Some(Reg::TA));
        assert_eq!(Reg::from_name("$lp"), Some(Reg::LP));
        assert_eq!(Reg::from_name("r32"), None);
        assert_eq!(Reg::from_name("r05"), None);
        assert_eq!(Reg::from_name("x1"), None);
        assert_eq!(Reg::LP.dwarf_regnum(), DWARF_RETURN_COLUMN);
    }

    #[test]
    fn test_regset_operations() {
        let args = RegSet::range(0, 5);
        assert_eq!(args.len(), 6);
        assert!(args.contains(Reg::R5));
        assert!(!args.contains(Reg::TA));

        let mut set = RegSet::new();
        set.insert(Reg::TA);
        set.insert(Reg::GP);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Reg::TA, Reg::GP]);
        set.remove(Reg::TA);
        assert!(!set.contains(Reg::TA));
        assert!(!set.contains_num(40));

        assert_eq!(RegSet::range(0, 31).len(), 32);
        assert!(RegSet::range(4, 2).is_empty());
        assert_eq!(args.difference(RegSet::range(0, 1)).len(), 4);
    }
}
