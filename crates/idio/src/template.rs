//! `define-template` (spec §4.3): templates are ordinary closures, built and
//! invoked at compile time rather than the runtime `EXPANDER` opcode family
//! (`original_source/src/expander.c`'s "expander is just a closure, looked
//! up through the same module graph as everything else, called through the
//! same apply path" design -- re-entering the VM for a handful of
//! instructions is cheaper to get right than a second, bytecode-level
//! expansion protocol).

use ahash::AHashMap;

use crate::condition::RunResult;
use crate::heap::Gc;
use crate::intern::SymbolId;
use crate::runtime::Runtime;
use crate::tracer::VmTracer;
use crate::thread::Thread;
use crate::value::{ConstantIdio, Value};
use crate::vm::call::call_value;
use crate::vm::Closure;

/// name -> macro closure, populated by `define-template` as the evaluator
/// walks a compilation unit top to bottom. A name shadowing an existing
/// template (re-`define-template`) simply overwrites it, same as `define`.
#[derive(Debug, Default)]
pub struct Templates {
    table: AHashMap<SymbolId, Gc<Closure>>,
}

impl Templates {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: SymbolId, closure: Gc<Closure>) {
        self.table.insert(name, closure);
    }

    #[must_use]
    pub fn get(&self, name: SymbolId) -> Option<Gc<Closure>> {
        self.table.get(&name).cloned()
    }

    #[must_use]
    pub fn is_template(&self, name: SymbolId) -> bool {
        self.table.contains_key(&name)
    }
}

fn list_to_args(mut cur: Value) -> Vec<Value> {
    let mut args = Vec::new();
    loop {
        match cur {
            Value::Constant(ConstantIdio::Nil) => break,
            Value::Pair(p) => {
                let cell = p.borrow();
                args.push(cell.car.clone());
                cur = cell.cdr.clone();
            }
            other => {
                args.push(other);
                break;
            }
        }
    }
    args
}

/// If `form` is an application of a registered template, invokes the
/// template's macro closure with the call's unevaluated argument forms and
/// returns the expansion. Callers loop this to a fixpoint: a template's
/// output may itself be headed by another template name (spec §4.3).
pub fn expand_one(
    form: &Value,
    templates: &Templates,
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
) -> RunResult<Option<Value>> {
    let Value::Pair(p) = form else { return Ok(None) };
    let cell = p.borrow();
    let Value::Symbol(head) = &cell.car else { return Ok(None) };
    let Some(closure) = templates.get(*head) else { return Ok(None) };
    let args = list_to_args(cell.cdr.clone());
    drop(cell);
    let expansion = call_value(runtime, thread, tracer, &Value::Closure(closure), args)?;
    Ok(Some(expansion))
}

/// Expands `form` through as many template layers as apply, in the manner
/// of `original_source/src/expander.c`'s `idio-macro-expand`.
pub fn expand_to_fixpoint(
    mut form: Value,
    templates: &Templates,
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
) -> RunResult<Value> {
    while let Some(expanded) = expand_one(&form, templates, runtime, thread, tracer)? {
        form = expanded;
    }
    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleId;
    use crate::xenv::XenvId;

    #[test]
    fn non_template_application_expands_to_nothing() {
        let mut runtime = Runtime::new();
        let mut thread = Thread::new(XenvId::BOOTSTRAP, ModuleId::default());
        let mut tracer = crate::tracer::NoopTracer;
        let templates = Templates::new();
        let form = Value::list(vec![Value::Symbol(runtime.interns.intern_symbol("f")), Value::Fixnum(1)]);
        let expanded = expand_one(&form, &templates, &mut runtime, &mut thread, &mut tracer).unwrap();
        assert!(expanded.is_none());
    }
}
