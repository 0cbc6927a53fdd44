//! The SI (symbol information) 7-tuple (spec §3.2).
//!
//! Every name a module knows about maps to one of these. `vi == 0` means
//! "reserved, not yet bound" -- the VM resolves it on first non-local
//! reference and back-patches both the SI tuple stored in the module and
//! the owning xenv's `vt[si]` (spec §3.2, §4.6).

use crate::intern::SymbolId;
use crate::module::ModuleId;
use crate::xenv::XenvId;

/// Where a binding lives. Mirrors the `ConstantIdio` scope tags (spec §3.1)
/// but kept as its own small enum since scope drives control flow, not just
/// display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Scope {
    Toplevel,
    Predef,
    Dynamic,
    Environ,
    Computed,
}

/// Global value index. `0` is the reserved "unresolved" placeholder; the
/// first real binding is `1` (spec §3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ValueIndex(pub u32);

impl ValueIndex {
    pub const UNRESOLVED: Self = Self(0);

    #[must_use]
    pub fn is_resolved(self) -> bool {
        self.0 != 0
    }
}

/// Symbol-table index within one xenv's `st` (spec §3.2, §3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct SymbolTableIndex(pub u32);

/// Constants-table index within one xenv's `cs` (spec §3.2, §3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ConstantIndex(pub u32);

/// `(scope xi si ci vi module description)` (spec §3.2).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SymbolInfo {
    pub scope: Scope,
    pub xi: XenvId,
    pub si: SymbolTableIndex,
    pub ci: ConstantIndex,
    pub vi: ValueIndex,
    pub module: ModuleId,
    pub description: String,
    pub name: SymbolId,
}

impl SymbolInfo {
    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        !self.vi.is_resolved()
    }
}
