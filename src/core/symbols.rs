//! Minimal symbol table.
//!
//! Symbol and section management belongs to the surrounding assembler; the relaxation
//! core only needs to know where a label lives (section, fragment, offset), whether it
//! may be overridden at link time, and the value of absolute (`.equ`) symbols.

use hashbrown::HashMap;

use super::diagnostics::SourceLoc;
use crate::relax::frag::{FragId, SectionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

impl SymbolId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Binding {
    #[default]
    Local,
    Global,
    Weak,
}

/// Where a label was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolDef {
    pub section: SectionId,
    pub frag: FragId,
    /// Byte offset inside `frag`.
    pub offset: u32,
}

#[derive(Debug, Clone)]
pub struct Symbol<'a> {
    pub name: &'a str,
    pub binding: Binding,
    pub def: Option<SymbolDef>,
    /// Value of an absolute symbol.
    pub absolute: Option<i64>,
    /// Created by the relaxation engine rather than the source.
    pub synthetic: bool,
    pub loc: SourceLoc,
}

impl<'a> Symbol<'a> {
    fn new(name: &'a str) -> Self {
        Self {
            name,
            binding: Binding::Local,
            def: None,
            absolute: None,
            synthetic: false,
            loc: SourceLoc::default(),
        }
    }

    pub fn is_defined(&self) -> bool {
        self.def.is_some() || self.absolute.is_some()
    }

    /// Undefined or weak: the final address is chosen by the linker.
    pub fn is_preemptible(&self) -> bool {
        !self.is_defined() || self.binding == Binding::Weak
    }

    /// Defined label in `section` whose address the assembler may rely on.
    pub fn is_resolvable_in(&self, section: SectionId) -> bool {
        self.binding != Binding::Weak && self.def.is_some_and(|d| d.section == section)
    }
}

#[derive(Debug, Default)]
pub struct SymbolTable<'a> {
    symbols: Vec<Symbol<'a>>,
    by_name: HashMap<&'a str, SymbolId>,
}

impl<'a> SymbolTable<'a> {
    pub fn new() -> Self {
        Self {
            symbols: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Look up a symbol, creating an undefined local entry on first reference.
    pub fn intern(&mut self, name: &'a str) -> SymbolId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(Symbol::new(name));
        self.by_name.insert(name, id);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: SymbolId) -> &Symbol<'a> {
        &self.symbols[id.index()]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol<'a> {
        &mut self.symbols[id.index()]
    }

    pub fn name(&self, id: SymbolId) -> &'a str {
        self.symbols[id.index()].name
    }

    /// Place a label. Returns the location of the first definition on redefinition.
    pub fn define(&mut self, id: SymbolId, def: SymbolDef, loc: SourceLoc) -> Result<(), SourceLoc> {
        let sym = &mut self.symbols[id.index()];
        if sym.is_defined() {
            return Err(sym.loc);
        }
        sym.def = Some(def);
        sym.loc = loc;
        Ok(())
    }

    pub fn set_absolute(&mut self, id: SymbolId, value: i64) {
        self.symbols[id.index()].absolute = Some(value);
    }

    pub fn set_binding(&mut self, id: SymbolId, binding: Binding) {
        self.symbols[id.index()].binding = binding;
    }

    pub fn mark_synthetic(&mut self, id: SymbolId) {
        self.symbols[id.index()].synthetic = true;
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &Symbol<'a>)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (SymbolId(i as u32), s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_and_preemption() {
        let mut table = SymbolTable::new();
        let foo = table.intern("foo");
        assert_eq!(table.intern("foo"), foo);
        assert!(table.get(foo).is_preemptible());

        let def = SymbolDef {
            section: SectionId(0),
            frag: FragId(0),
            offset: 4,
        };
        table.define(foo, def, SourceLoc::new(1)).unwrap();
        assert!(table.get(foo).is_resolvable_in(SectionId(0)));
        assert!(!table.get(foo).is_resolvable_in(SectionId(1)));
        assert_eq!(table.define(foo, def, SourceLoc::new(9)), Err(SourceLoc::new(1)));

        table.set_binding(foo, Binding::Weak);
        assert!(table.get(foo).is_preemptible());
        assert!(!table.get(foo).is_resolvable_in(SectionId(0)));
    }
}
