//! Modules: name resolution scope and the registry that backs it
//! (spec §3.3, §4.2).

use ahash::AHashMap;
use indexmap::IndexSet;

use crate::condition::{ConditionType, RunError, RunResult};
use crate::intern::SymbolId;
use crate::symbol_info::SymbolInfo;

/// Index into the process-wide module table. Modules are arena-allocated
/// and referred to by index rather than by pointer so that an SI tuple's
/// `module` field doesn't create a reference cycle with the module that
/// owns it (spec §9 "Cyclic references").
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ModuleId(u32);

/// The name of the root module every other module implicitly imports last
/// (spec §3.3, `original_source/src/module.c`).
pub const ROOT_MODULE_NAME: &str = "Idio";

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Module {
    pub name: SymbolId,
    /// Exported symbol names. For the root module this is implicitly
    /// "every defined symbol" (spec §3.3); we realise that by having
    /// `export_all` short-circuit the usual `exports` list.
    exports: IndexSet<SymbolId>,
    export_all: bool,
    /// `(module)` references, in import order (spec §3.3).
    imports: Vec<ModuleId>,
    symbols: AHashMap<SymbolId, SymbolInfo>,
    /// `Some(target)` when this module is an alias sharing `target`'s
    /// symbols/imports/exports by reference (spec §3.3, §4.2).
    identity: Option<ModuleId>,
}

impl Module {
    fn new(name: SymbolId, export_all: bool) -> Self {
        Self {
            name,
            exports: IndexSet::new(),
            export_all,
            imports: Vec::new(),
            symbols: AHashMap::new(),
            identity: None,
        }
    }

    pub fn export(&mut self, name: SymbolId) {
        self.exports.insert(name);
    }

    #[must_use]
    pub fn exports_name(&self, name: SymbolId) -> bool {
        self.export_all || self.exports.contains(&name)
    }

    #[must_use]
    pub fn exports(&self) -> &IndexSet<SymbolId> {
        &self.exports
    }

    #[must_use]
    pub fn imports(&self) -> &[ModuleId] {
        &self.imports
    }

    pub fn add_import(&mut self, module: ModuleId) {
        if !self.imports.contains(&module) {
            self.imports.push(module);
        }
    }

    #[must_use]
    pub fn local(&self, name: SymbolId) -> Option<&SymbolInfo> {
        self.symbols.get(&name)
    }

    pub fn define(&mut self, name: SymbolId, info: SymbolInfo) {
        self.symbols.insert(name, info);
    }

    #[must_use]
    pub fn symbols(&self) -> impl Iterator<Item = (&SymbolId, &SymbolInfo)> {
        self.symbols.iter()
    }
}

/// name → module registry, plus resolution through the import graph
/// (spec §4.2, §4.3 scope-resolution steps 2-4).
#[derive(Debug, Default)]
pub struct Modules {
    by_name: AHashMap<SymbolId, ModuleId>,
    modules: Vec<Module>,
    root: Option<ModuleId>,
}

impl Modules {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, id: ModuleId) -> &Module {
        &self.modules[id.0 as usize]
    }

    fn get_mut(&mut self, id: ModuleId) -> &mut Module {
        &mut self.modules[id.0 as usize]
    }

    /// `find-module`: returns `default` when the name is unregistered,
    /// rather than erroring (spec §4.2).
    #[must_use]
    pub fn find(&self, name: SymbolId) -> Option<ModuleId> {
        self.by_name.get(&name).copied()
    }

    /// `make-module`: signals a duplicate-name error if `name` already
    /// exists (spec §4.2). Every newly-created module implicitly imports
    /// the root `Idio` module last (spec §3.3), except `Idio` itself.
    pub fn make_module(&mut self, name: SymbolId) -> RunResult<ModuleId> {
        if self.by_name.contains_key(&name) {
            return Err(RunError::new(ConditionType::RtModuleError, "module already exists"));
        }
        let is_root = self.root.is_none();
        let id = ModuleId(u32::try_from(self.modules.len()).expect("module table overflow"));
        let module = Module::new(name, is_root);
        if is_root {
            self.root = Some(id);
        }
        self.modules.push(module);
        self.by_name.insert(name, id);
        if !is_root {
            let root = self.root.expect("root module created first");
            self.get_mut(id).add_import(root);
        }
        Ok(id)
    }

    /// Creates an alias module sharing `target`'s symbols/imports/exports
    /// by reference at creation time (spec §3.3, §4.2).
    pub fn make_alias(&mut self, name: SymbolId, target: ModuleId) -> RunResult<ModuleId> {
        if self.by_name.contains_key(&name) {
            return Err(RunError::new(ConditionType::RtModuleError, "module already exists"));
        }
        let id = ModuleId(u32::try_from(self.modules.len()).expect("module table overflow"));
        let mut module = Module::new(name, false);
        module.identity = Some(target);
        self.modules.push(module);
        self.by_name.insert(name, id);
        Ok(id)
    }

    /// Follows an alias to the module whose tables actually back it.
    #[must_use]
    pub fn resolve_identity(&self, id: ModuleId) -> ModuleId {
        match self.get(id).identity {
            Some(target) => self.resolve_identity(target),
            None => id,
        }
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        self.get(self.resolve_identity(id))
    }

    pub fn module_mut(&mut self, id: ModuleId) -> &mut Module {
        let real = self.resolve_identity(id);
        self.get_mut(real)
    }

    /// Scope-resolution steps 2-3 (spec §4.3): current module's own
    /// symbols, then recursively through imports respecting each module's
    /// exports. Import order is depth-first, matching the order
    /// `imports` were declared in.
    #[must_use]
    pub fn resolve(&self, module: ModuleId, name: SymbolId) -> Option<&SymbolInfo> {
        self.resolve_visiting(module, name, &mut Vec::new())
    }

    fn resolve_visiting<'a>(
        &'a self,
        module: ModuleId,
        name: SymbolId,
        visiting: &mut Vec<ModuleId>,
    ) -> Option<&'a SymbolInfo> {
        let real = self.resolve_identity(module);
        if visiting.contains(&real) {
            return None;
        }
        visiting.push(real);
        let m = self.get(real);
        if let Some(info) = m.local(name) {
            return Some(info);
        }
        for &import in &m.imports {
            let imported = self.get(self.resolve_identity(import));
            if imported.exports_name(name)
                && let Some(info) = self.resolve_visiting(import, name, visiting)
            {
                return Some(info);
            }
        }
        None
    }

    /// Scope-resolution step 4 (spec §4.3): `module/name` direct reference.
    #[must_use]
    pub fn resolve_qualified(&self, left: ModuleId, name: SymbolId) -> Option<&SymbolInfo> {
        let m = self.get(self.resolve_identity(left));
        if m.exports_name(name) { m.local(name) } else { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interns;
    use crate::symbol_info::{ConstantIndex, Scope, SymbolTableIndex, ValueIndex};
    use crate::xenv::XenvId;

    fn sym_info(module: ModuleId, name: SymbolId, scope: Scope) -> SymbolInfo {
        SymbolInfo {
            scope,
            xi: XenvId::BOOTSTRAP,
            si: SymbolTableIndex(0),
            ci: ConstantIndex(0),
            vi: ValueIndex(1),
            module,
            description: "test".into(),
            name,
        }
    }

    #[test]
    fn new_modules_implicitly_import_root_last() {
        let interns = Interns::new();
        let mut modules = Modules::new();
        let root_name = interns.intern_symbol(ROOT_MODULE_NAME);
        let root = modules.make_module(root_name).unwrap();
        let user_name = interns.intern_symbol("user");
        let user = modules.make_module(user_name).unwrap();
        assert_eq!(modules.module(user).imports(), &[root]);
    }

    #[test]
    fn resolve_walks_exported_imports_only() {
        let interns = Interns::new();
        let mut modules = Modules::new();
        let root_name = interns.intern_symbol(ROOT_MODULE_NAME);
        let root = modules.make_module(root_name).unwrap();
        let lib_name = interns.intern_symbol("lib");
        let lib = modules.make_module(lib_name).unwrap();

        let priv_sym = interns.intern_symbol("secret");
        let pub_sym = interns.intern_symbol("public");
        modules.module_mut(lib).define(priv_sym, sym_info(lib, priv_sym, Scope::Toplevel));
        modules.module_mut(lib).define(pub_sym, sym_info(lib, pub_sym, Scope::Toplevel));
        modules.module_mut(lib).export(pub_sym);

        let app_name = interns.intern_symbol("app");
        let app = modules.make_module(app_name).unwrap();
        modules.module_mut(app).add_import(lib);

        assert!(modules.resolve(app, pub_sym).is_some());
        assert!(modules.resolve(app, priv_sym).is_none());
        let _ = root;
    }

    #[test]
    fn alias_shares_identity() {
        let interns = Interns::new();
        let mut modules = Modules::new();
        let root_name = interns.intern_symbol(ROOT_MODULE_NAME);
        modules.make_module(root_name).unwrap();
        let real_name = interns.intern_symbol("real");
        let real = modules.make_module(real_name).unwrap();
        let sym = interns.intern_symbol("thing");
        modules.module_mut(real).define(sym, sym_info(real, sym, Scope::Toplevel));
        modules.module_mut(real).export(sym);

        let alias_name = interns.intern_symbol("alias");
        let alias = modules.make_alias(alias_name, real).unwrap();
        assert!(modules.resolve(alias, sym).is_some());
    }
}
