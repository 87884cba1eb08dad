// This module provides arena-based session management for one assembly unit using the
// bumpalo crate. AssemblySession owns a reference to the arena that backs every interned
// symbol name of the unit, so symbols, labels and synthetic relaxation labels can be passed
// around as plain &'arena str without reference counting. It also tracks SessionStats:
// counts of emitted instructions and fragments, relaxation passes, branches per range
// class, compacted instructions, and how many address-formation idioms were contracted or
// vetoed. Everything allocated through the session is released at once when the arena is
// dropped at end of unit; there is no partial teardown.

//! Arena-based assembly session management.

use bumpalo::Bump;
use hashbrown::HashSet;
use std::cell::RefCell;
use std::fmt;

/// Arena-based assembly session.
///
/// All names interned through the session share the arena lifetime.
pub struct AssemblySession<'arena> {
    arena: &'arena Bump,
    stats: RefCell<SessionStats>,
    interned: RefCell<HashSet<&'arena str>>,
    synthetic_counter: RefCell<u32>,
}

impl<'arena> AssemblySession<'arena> {
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
            interned: RefCell::new(HashSet::new()),
            synthetic_counter: RefCell::new(0),
        }
    }

    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Intern a string in the arena.
    pub fn intern_str(&self, s: &str) -> &'arena str {
        let mut strings = self.interned.borrow_mut();
        if let Some(&interned) = strings.get(s) {
            return interned;
        }
        let interned: &'arena str = self.arena.alloc_str(s);
        strings.insert(interned);
        interned
    }

    /// Fresh name for a synthetic local label inserted by a relaxation sequence.
    pub fn synthetic_label(&self) -> &'arena str {
        let mut counter = self.synthetic_counter.borrow_mut();
        let name = format!(".Lrelax{}", *counter);
        *counter += 1;
        drop(counter);
        self.intern_str(&name)
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }

    /// Update statistics in place.
    pub fn record(&self, f: impl FnOnce(&mut SessionStats)) {
        f(&mut self.stats.borrow_mut());
    }

    pub fn memory_used(&self) -> usize {
        self.arena.allocated_bytes()
    }
}

/// Statistics for one unit.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionStats {
    pub instructions: usize,
    pub fragments: usize,
    pub blocks: usize,
    pub relax_passes: usize,
    /// Branch fragments per final range class, indexed by `RangeClass::index`.
    pub branches_by_class: [usize; 5],
    pub compacted: usize,
    /// Variable fragments that grew past their first estimate.
    pub relaxed: usize,
    pub idioms_found: usize,
    pub idioms_contracted: usize,
    pub idioms_vetoed: usize,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Assembly statistics:")?;
        writeln!(f, "  instructions: {}", self.instructions)?;
        writeln!(f, "  fragments:    {}", self.fragments)?;
        writeln!(f, "  blocks:       {}", self.blocks)?;
        writeln!(f, "  passes:       {}", self.relax_passes)?;
        writeln!(
            f,
            "  branches:     S256={} S16K={} S64K={} S16M={} U4G={}",
            self.branches_by_class[0],
            self.branches_by_class[1],
            self.branches_by_class[2],
            self.branches_by_class[3],
            self.branches_by_class[4]
        )?;
        writeln!(f, "  compacted:    {}", self.compacted)?;
        writeln!(f, "  relaxed:      {}", self.relaxed)?;
        write!(
            f,
            "  idioms:       {} found, {} contracted, {} vetoed",
            self.idioms_found, self.idioms_contracted, self.idioms_vetoed
        )
    }
}
