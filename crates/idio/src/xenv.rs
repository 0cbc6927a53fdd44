//! The execution environment (xenv): the bundle of tables for one
//! compilation unit (spec §3.4, §4.6).

use ahash::AHashMap;

use crate::intern::SymbolId;
use crate::loc::SourceLoc;
use crate::module::ModuleId;
use crate::symbol_info::{ConstantIndex, Scope, SymbolInfo, SymbolTableIndex, ValueIndex};
use crate::value::{ConstantIdio, Value};

/// Index into the process-wide xenv array (spec §3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct XenvId(pub u32);

impl XenvId {
    /// xenv 0: the bootstrap/default shared by C-side init (spec §3.4).
    pub const BOOTSTRAP: Self = Self(0);
}

/// A hashable projection of [`Value`] used to back `ch`, the constants
/// hash. Only the variants that are cheap and correct to hash participate;
/// compound constants (pairs, arrays -- rare as literal constants, but
/// legal via `quote`) fall back to a linear scan of `cs`, which is the
/// "O(1) on the common path, still correct on the rare path" tradeoff spec
/// §4.6 calls for without mandating a specific implementation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Fixnum(i64),
    Constant(ConstantIdio),
    Symbol(SymbolId),
    Keyword(crate::intern::KeywordId),
    Unicode(char),
    Token(u32),
    ICode(u32),
    String(String),
    Unhashable,
}

fn const_key(value: &Value) -> ConstKey {
    match value {
        Value::Fixnum(n) => ConstKey::Fixnum(*n),
        Value::Constant(c) => ConstKey::Constant(*c),
        Value::Symbol(s) => ConstKey::Symbol(*s),
        Value::Keyword(k) => ConstKey::Keyword(*k),
        Value::ConstantUnicode(c) => ConstKey::Unicode(*c),
        Value::ConstantToken(t) => ConstKey::Token(*t),
        Value::ConstantICode(i) => ConstKey::ICode(*i),
        Value::String(s) => ConstKey::String(s.borrow().as_str().to_owned()),
        _ => ConstKey::Unhashable,
    }
}

/// One compilation unit's tables (spec §3.4).
#[derive(Debug)]
pub struct Xenv {
    pub index: XenvId,
    pub desc: String,
    /// entry `i` is the `ci` of the i-th symbol introduced in this unit.
    st: Vec<ConstantIndex>,
    /// entry `i` is the `vi` that a byte-code `IREF` of `i` resolves to.
    vt: Vec<ValueIndex>,
    cs: Vec<Value>,
    ch: AHashMap<ConstKey, ConstantIndex>,
    ses: Vec<Value>,
    sps: Vec<Option<SourceLoc>>,
    pub bc: Vec<u8>,
}

impl Xenv {
    #[must_use]
    pub fn new(index: XenvId, desc: impl Into<String>) -> Self {
        Self {
            index,
            desc: desc.into(),
            st: Vec::new(),
            vt: Vec::new(),
            cs: Vec::new(),
            ch: AHashMap::new(),
            ses: Vec::new(),
            sps: Vec::new(),
            bc: Vec::new(),
        }
    }

    #[must_use]
    pub fn st_len(&self) -> usize {
        self.st.len()
    }

    #[must_use]
    pub fn cs_len(&self) -> usize {
        self.cs.len()
    }

    #[must_use]
    pub fn cs_get(&self, ci: ConstantIndex) -> &Value {
        &self.cs[ci.0 as usize]
    }

    #[must_use]
    pub fn vt_get(&self, si: SymbolTableIndex) -> ValueIndex {
        self.vt[si.0 as usize]
    }

    pub fn vt_set(&mut self, si: SymbolTableIndex, vi: ValueIndex) {
        self.vt[si.0 as usize] = vi;
    }

    #[must_use]
    pub fn st_get(&self, si: SymbolTableIndex) -> ConstantIndex {
        self.st[si.0 as usize]
    }

    /// `constants-lookup-or-extend` (spec §4.6): `ch` mirrors `cs` for O(1)
    /// lookup; on miss, append to `cs` and record the new index.
    pub fn constants_lookup_or_extend(&mut self, value: Value) -> ConstantIndex {
        let key = const_key(&value);
        if key != ConstKey::Unhashable
            && let Some(&ci) = self.ch.get(&key)
        {
            return ci;
        }
        if key == ConstKey::Unhashable {
            // Linear fallback for compound constants: `equal?`-dedup so
            // `(quote (1 2))` compiled twice shares one constant slot.
            for (i, existing) in self.cs.iter().enumerate() {
                if existing.is_equal(&value) {
                    return ConstantIndex(u32::try_from(i).expect("constants table overflow"));
                }
            }
        }
        let ci = ConstantIndex(u32::try_from(self.cs.len()).expect("constants table overflow"));
        self.cs.push(value);
        if key != ConstKey::Unhashable {
            self.ch.insert(key, ci);
        }
        ci
    }

    /// `extend-tables` (spec §4.6): the one place that appends to `st` and
    /// `vt` coherently, keeping `|st| == |vt|` (spec §3.4 invariant).
    ///
    /// In "live" mode the caller supplies an already-resolved `vi`
    /// (`use_live_vi`); in AOT/compile mode the reservation is a running
    /// per-eenv placeholder that the VM resolves for real at load time --
    /// callers pass [`ValueIndex::UNRESOLVED`] and rely on
    /// [`Xenv::vt_set`] to back-patch it later.
    pub fn extend_tables(
        &mut self,
        name: SymbolId,
        scope: Scope,
        module: ModuleId,
        description: impl Into<String>,
        use_live_vi: Option<ValueIndex>,
    ) -> (SymbolTableIndex, SymbolInfo) {
        let ci = self.constants_lookup_or_extend(Value::Symbol(name));
        let si = SymbolTableIndex(u32::try_from(self.st.len()).expect("symbol table overflow"));
        self.st.push(ci);
        self.vt.push(use_live_vi.unwrap_or(ValueIndex::UNRESOLVED));
        debug_assert_eq!(self.st.len(), self.vt.len(), "|st| must equal |vt|");
        let info = SymbolInfo {
            scope,
            xi: self.index,
            si,
            ci,
            vi: use_live_vi.unwrap_or(ValueIndex::UNRESOLVED),
            module,
            description: description.into(),
            name,
        };
        (si, info)
    }

    /// `extend-src-exprs` (spec §4.6): always appends to `ses`; appends a
    /// location to `sps` only if the reader tagged the expression,
    /// otherwise `None`, preserving `|ses| == |sps|`.
    pub fn extend_src_exprs(&mut self, expr: Value, loc: Option<SourceLoc>) -> usize {
        let index = self.ses.len();
        self.ses.push(expr);
        self.sps.push(loc);
        debug_assert_eq!(self.ses.len(), self.sps.len(), "|ses| must equal |sps|");
        index
    }

    #[must_use]
    pub fn ses_len(&self) -> usize {
        self.ses.len()
    }

    #[must_use]
    pub fn src_expr(&self, index: usize) -> &Value {
        &self.ses[index]
    }

    #[must_use]
    pub fn src_prop(&self, index: usize) -> Option<&SourceLoc> {
        self.sps[index].as_ref()
    }

    /// Checks the bounds invariant from spec §8: every operand that indexes
    /// `st`/`cs`/`vt` must be within bounds. Exposed for tests and for the
    /// pre-compilation reader's validation pass (spec §4.7).
    #[must_use]
    pub fn check_invariants(&self) -> bool {
        self.st.len() == self.vt.len() && self.ses.len() == self.sps.len()
    }

    /// Rebuilds a whole xenv from already-decoded cache-file tables (spec
    /// §4.7): unlike [`Self::extend_tables`], which grows `st`/`vt`/`cs`
    /// one symbol at a time as the evaluator compiles, the pre-compilation
    /// reader has every table in hand at once and just needs `ch` rebuilt
    /// to match `cs`.
    #[must_use]
    pub fn from_parts(
        index: XenvId, desc: impl Into<String>, st: Vec<ConstantIndex>, vt: Vec<ValueIndex>, cs: Vec<Value>,
        ses: Vec<Value>, sps: Vec<Option<SourceLoc>>, bc: Vec<u8>,
    ) -> Self {
        let mut ch = AHashMap::new();
        for (i, value) in cs.iter().enumerate() {
            let key = const_key(value);
            if key != ConstKey::Unhashable {
                ch.entry(key).or_insert(ConstantIndex(u32::try_from(i).expect("constants table overflow")));
            }
        }
        Self { index, desc: desc.into(), st, vt, cs, ch, ses, sps, bc }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interns;

    #[test]
    fn extend_tables_keeps_st_and_vt_in_lockstep() {
        let interns = Interns::new();
        let mut xenv = Xenv::new(XenvId(1), "test");
        let module = ModuleId::default();
        let name = interns.intern_symbol("x");
        let (si, info) = xenv.extend_tables(name, Scope::Toplevel, module, "top", None);
        assert_eq!(xenv.st_len(), 1);
        assert!(info.vi == ValueIndex::UNRESOLVED);
        xenv.vt_set(si, ValueIndex(7));
        assert_eq!(xenv.vt_get(si), ValueIndex(7));
        assert!(xenv.check_invariants());
    }

    #[test]
    fn constants_dedup_immediates_but_not_across_unhashable_mutation() {
        let mut xenv = Xenv::new(XenvId(0), "boot");
        let a = xenv.constants_lookup_or_extend(Value::Fixnum(42));
        let b = xenv.constants_lookup_or_extend(Value::Fixnum(42));
        assert_eq!(a, b);
        let list_a = xenv.constants_lookup_or_extend(Value::list(vec![Value::Fixnum(1)]));
        let list_b = xenv.constants_lookup_or_extend(Value::list(vec![Value::Fixnum(1)]));
        assert_eq!(list_a, list_b, "equal? lists should still dedup via the linear fallback");
    }
}
