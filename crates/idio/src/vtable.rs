//! Per-type method dictionaries with single-parent inheritance (spec §4.1).
//!
//! Grounded directly on `original_source/src/vtable.c`/`vtable.h`: a vtable
//! is a small vector of named method entries, consulted linearly (the
//! "inline cache" is the hit-count-promotion scheme below, not a hash map --
//! real Idio vtables rarely have more than a couple of dozen entries, so a
//! linear scan with hot entries bubbled toward the front beats hashing).

use std::rc::Rc;

use ahash::AHashMap;

use crate::value::Value;

/// Index into the process-wide vtable table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct VtableId(u32);

/// A vtable method. Carries either no extra data, a fixed-size byte blob
/// copied at construction, or a single rooted [`Value`] -- matching the
/// three payload shapes spec §4.1 calls out for the C union it replaces.
#[derive(Clone)]
pub enum Method {
    Simple(Rc<dyn Fn(&Value, &[Value]) -> Value>),
    Static(Rc<dyn Fn(&Value, &[Value], &[u8]) -> Value>, Rc<[u8]>),
    WithValue(Rc<dyn Fn(&Value, &[Value], &Value) -> Value>, Value),
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple(_) => f.write_str("Method::Simple(..)"),
            Self::Static(_, blob) => write!(f, "Method::Static(.., {} bytes)", blob.len()),
            Self::WithValue(_, _) => f.write_str("Method::WithValue(..)"),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    name: &'static str,
    method: Method,
    /// `true` once this entry was copied down from an ancestor vtable by a
    /// successful recursive lookup; such entries are discarded wholesale on
    /// revalidation since the ancestor may have changed.
    inherited: bool,
    hits: u64,
}

/// A single type's method dictionary.
#[derive(Debug, Clone)]
pub struct Vtable {
    parent: Option<VtableId>,
    type_name: &'static str,
    entries: Vec<Entry>,
    /// The process-wide generation this vtable was last revalidated against.
    generation: u64,
}

impl Vtable {
    #[must_use]
    fn new(type_name: &'static str, parent: Option<VtableId>, generation: u64) -> Self {
        Self {
            parent,
            type_name,
            entries: Vec::new(),
            generation,
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn find_local(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    /// Record a hit and bubble the entry toward the front if it has now
    /// overtaken its predecessor's hit count (spec §4.1: "hit counters
    /// bubble hot entries toward the head"). Ties keep insertion order.
    fn bump(&mut self, index: usize) {
        self.entries[index].hits += 1;
        if index > 0 && self.entries[index].hits > self.entries[index - 1].hits {
            self.entries.swap(index, index - 1);
        }
    }
}

/// Owner of every [`Vtable`] and the global generation counter used to
/// invalidate cached-inherited entries (spec §4.1 "Revalidation").
#[derive(Debug, Default)]
pub struct Vtables {
    tables: Vec<Vtable>,
    generation: u64,
    by_name: AHashMap<&'static str, VtableId>,
}

impl Vtables {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_type(&mut self, type_name: &'static str, parent: Option<VtableId>) -> VtableId {
        if let Some(&id) = self.by_name.get(type_name) {
            return id;
        }
        let id = VtableId(u32::try_from(self.tables.len()).expect("vtable table overflow"));
        self.tables.push(Vtable::new(type_name, parent, self.generation));
        self.by_name.insert(type_name, id);
        id
    }

    fn get(&self, id: VtableId) -> &Vtable {
        &self.tables[id.0 as usize]
    }

    fn get_mut(&mut self, id: VtableId) -> &mut Vtable {
        &mut self.tables[id.0 as usize]
    }

    /// `add`: install (or replace) a method directly on `id`, bumping the
    /// global generation so descendants know their inherited cache may be
    /// stale.
    pub fn add(&mut self, id: VtableId, name: &'static str, method: Method) {
        self.generation += 1;
        let generation = self.generation;
        let vt = self.get_mut(id);
        vt.generation = generation;
        if let Some(index) = vt.find_local(name) {
            vt.entries[index].method = method;
            vt.entries[index].inherited = false;
        } else {
            vt.entries.push(Entry {
                name,
                method,
                inherited: false,
                hits: 0,
            });
        }
    }

    /// Drop every `inherited` entry if our recorded generation is stale
    /// relative to the parent chain (spec §4.1 "Revalidation").
    fn revalidate(&mut self, id: VtableId) {
        let parent = self.get(id).parent;
        if let Some(parent_id) = parent {
            self.revalidate(parent_id);
        }
        let global = self.generation;
        let vt = self.get_mut(id);
        if vt.generation != global {
            vt.entries.retain(|e| !e.inherited);
            vt.generation = global;
        }
    }

    /// `lookup`: walk local entries; on miss, recurse into the parent and
    /// cache a successful result locally as `inherited`.
    pub fn lookup(&mut self, id: VtableId, name: &str) -> Option<Method> {
        self.revalidate(id);
        if let Some(index) = self.get(id).find_local(name) {
            let method = self.get(id).entries[index].method.clone();
            self.get_mut(id).bump(index);
            return Some(method);
        }
        let parent = self.get(id).parent?;
        let method = self.lookup(parent, name)?;
        let vt = self.get_mut(id);
        vt.entries.push(Entry {
            name: Box::leak(name.to_owned().into_boxed_str()),
            method: method.clone(),
            inherited: true,
            hits: 0,
        });
        Some(method)
    }

    pub fn inherit(&mut self, id: VtableId, name: &'static str, method: Method) {
        let vt = self.get_mut(id);
        if let Some(index) = vt.find_local(name) {
            vt.entries[index].method = method;
        } else {
            vt.entries.push(Entry {
                name,
                method,
                inherited: true,
                hits: 0,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_method() -> Method {
        Method::Simple(Rc::new(|_recv, _args| Value::nil()))
    }

    #[test]
    fn lookup_walks_single_parent_chain_and_caches() {
        let mut vts = Vtables::new();
        let base = vts.define_type("base", None);
        let derived = vts.define_type("derived", Some(base));
        vts.add(base, "2string", noop_method());

        assert!(vts.lookup(derived, "2string").is_some());
        // cached as inherited now; a second lookup must still succeed.
        assert!(vts.lookup(derived, "2string").is_some());
        assert!(vts.lookup(derived, "no-such-method").is_none());
    }

    #[test]
    fn add_on_parent_invalidates_derived_inherited_cache() {
        let mut vts = Vtables::new();
        let base = vts.define_type("base", None);
        let derived = vts.define_type("derived", Some(base));
        vts.add(base, "m", noop_method());
        vts.lookup(derived, "m"); // caches inherited entry on derived

        // redefine on base: generation bumps, derived's cached copy must be
        // dropped and re-derived rather than silently going stale.
        vts.add(base, "m", noop_method());
        assert!(vts.lookup(derived, "m").is_some());
    }

    #[test]
    fn hit_counts_promote_hot_entries() {
        let mut vts = Vtables::new();
        let t = vts.define_type("t", None);
        vts.add(t, "a", noop_method());
        vts.add(t, "b", noop_method());
        // "b" inserted after "a", so it starts behind; hit it until it
        // overtakes "a"'s (zero) hit count.
        vts.lookup(t, "b");
        assert_eq!(vts.get(t).entries[0].name, "b");
    }
}
