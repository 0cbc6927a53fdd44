//! Symbol and keyword interning (spec §4.2).
//!
//! Symbols and keywords are interned for the life of the process: every
//! distinct name maps to exactly one id, and two symbols with the same
//! print name are always the same id. This is what lets the evaluator and
//! VM treat symbol comparison as a pointer (here, integer) compare instead
//! of a string compare.
//!
//! Mirrors the index-newtype-over-a-growable-table pattern the teacher
//! crate uses for `StringId` (`ouros::intern::StringId`), generalised to two
//! independent tables since Idio keywords are a distinct interned type from
//! symbols (spec §3.1, §4.2), not just strings with a `:` prefix.

use std::cell::RefCell;

use ahash::AHashMap;

/// Interned symbol id. `eq?` on symbols is `SymbolId` equality (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct SymbolId(u32);

impl SymbolId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Rebuilds a `SymbolId` from a previously-`index`ed raw value, for
    /// bytecode that bakes a label's id directly into its operand (spec
    /// §4.5 "push-escaper label body") rather than indexing through an
    /// xenv's symbol table -- the id space is process-wide and stable once
    /// interned, so no interner lookup is needed to reconstruct it.
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

/// Interned keyword id. Keywords print as `:name` and are a distinct type
/// from symbols (spec §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct KeywordId(u32);

impl KeywordId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Name → unique-id table with pointer(id)-equality semantics.
///
/// `lookup` interns on miss; there is no way to remove an entry, matching
/// "interned for the process's life" (spec §3.7).
#[derive(Debug, Default)]
struct InternTable<Id> {
    names: Vec<Box<str>>,
    by_name: AHashMap<Box<str>, Id>,
}

impl<Id: Copy> InternTable<Id> {
    fn new() -> Self {
        Self {
            names: Vec::new(),
            by_name: AHashMap::new(),
        }
    }

    fn lookup_or_insert(&mut self, name: &str, make_id: impl FnOnce(u32) -> Id) -> Id {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        let index = u32::try_from(self.names.len()).expect("symbol table overflow");
        let id = make_id(index);
        self.names.push(name.into());
        self.by_name.insert(name.into(), id);
        id
    }

    fn name(&self, index: usize) -> &str {
        &self.names[index]
    }
}

/// Process-wide symbol and keyword interners.
#[derive(Debug)]
pub struct Interns {
    symbols: RefCell<InternTable<SymbolId>>,
    keywords: RefCell<InternTable<KeywordId>>,
}

impl Default for Interns {
    fn default() -> Self {
        Self::new()
    }
}

impl Interns {
    #[must_use]
    pub fn new() -> Self {
        Self {
            symbols: RefCell::new(InternTable::new()),
            keywords: RefCell::new(InternTable::new()),
        }
    }

    pub fn intern_symbol(&self, name: &str) -> SymbolId {
        self.symbols.borrow_mut().lookup_or_insert(name, SymbolId)
    }

    #[must_use]
    pub fn symbol_name(&self, id: SymbolId) -> String {
        self.symbols.borrow().name(id.index()).to_owned()
    }

    pub fn intern_keyword(&self, name: &str) -> KeywordId {
        self.keywords.borrow_mut().lookup_or_insert(name, KeywordId)
    }

    #[must_use]
    pub fn keyword_name(&self, id: KeywordId) -> String {
        self.keywords.borrow().name(id.index()).to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let interns = Interns::new();
        let a = interns.intern_symbol("foo");
        let b = interns.intern_symbol("foo");
        let c = interns.intern_symbol("bar");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(interns.symbol_name(a), "foo");
    }

    #[test]
    fn symbols_and_keywords_are_distinct_tables() {
        let interns = Interns::new();
        let sym = interns.intern_symbol("x");
        let kw = interns.intern_keyword("x");
        // both start at index 0 in their own table but are different types,
        // so they cannot be confused at the type level.
        assert_eq!(sym.index(), 0);
        assert_eq!(kw.index(), 0);
        assert_eq!(interns.keyword_name(kw), "x");
    }
}
