//! The user-visible `hash` surface type (spec §3.1, §3.6 invariant: "Hash
//! tables carry their chosen equivalence").
//!
//! This is one of the out-of-scope "surface data types" -- it exists here
//! only so `Value::Hash` has somewhere to live and so the module system
//! (which is *not* out of scope) can be built on top of a hash with the
//! same equivalence discipline the language exposes to users.

use crate::value::Value;

/// Which equality a hash table uses to compare keys, matching spec §3.1's
/// invariant that `eq?`/`eqv?`/`equal?` are the three recognised
/// equivalences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Equivalence {
    Eq,
    Eqv,
    Equal,
}

impl Equivalence {
    fn matches(self, a: &Value, b: &Value) -> bool {
        match self {
            Self::Eq => a.is_eq(b),
            Self::Eqv => a.is_eqv(b),
            Self::Equal => a.is_equal(b),
        }
    }
}

/// A minimal association-list-backed hash table. Idio hashes are usually
/// small (module export sets, struct field tables); a linear scan under the
/// chosen equivalence is adequate and keeps this honest about not assuming
/// `Value` is hashable in the general case (it isn't, once `equal?`
/// recursion without cycle detection is in play -- see DESIGN.md).
#[derive(Debug)]
pub struct IdioHash {
    equivalence: Equivalence,
    entries: Vec<(Value, Value)>,
}

impl IdioHash {
    #[must_use]
    pub fn new(equivalence: Equivalence) -> Self {
        Self {
            equivalence,
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| self.equivalence.matches(k, key))
            .map(|(_, v)| v)
    }

    pub fn set(&mut self, key: Value, value: Value) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| self.equivalence.matches(k, &key)) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_equivalence_compares_structurally() {
        let mut h = IdioHash::new(Equivalence::Equal);
        h.set(Value::cons(Value::Fixnum(1), Value::nil()), Value::Fixnum(99));
        let probe = Value::cons(Value::Fixnum(1), Value::nil());
        assert!(h.get(&probe).is_some());
    }

    #[test]
    fn eq_equivalence_requires_identity() {
        let mut h = IdioHash::new(Equivalence::Eq);
        let key = Value::cons(Value::Fixnum(1), Value::nil());
        h.set(key.clone(), Value::Fixnum(1));
        let other = Value::cons(Value::Fixnum(1), Value::nil());
        assert!(h.get(&key).is_some());
        assert!(h.get(&other).is_none());
    }
}
