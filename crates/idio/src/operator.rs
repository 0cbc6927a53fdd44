//! Infix/postfix operators: `define-infix-operator`/`define-postfix-operator`
//! register a priority and a handler function; `operator-expand` runs once
//! template expansion has reached a fixpoint and rewrites operator syntax
//! into ordinary prefix application before `meaning` ever sees it
//! (spec §4.3).
//!
//! The built-in assignment operators (`=`, `:=`, `:+`, `:*`, `:~`, `:$`)
//! are registered at priority 1000, the lowest-binds-last convention the
//! rest of the operator table follows.

use ahash::AHashMap;

use crate::intern::{Interns, SymbolId};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    Infix,
    Postfix,
}

#[derive(Debug, Clone)]
pub struct OperatorDef {
    pub priority: u32,
    pub kind: OperatorKind,
    /// The function symbol invoked as `(handler lhs rhs)` (infix) or
    /// `(handler operand)` (postfix).
    pub handler: SymbolId,
}

/// The priority assignment operators register at (spec §4.3).
pub const ASSIGNMENT_PRIORITY: u32 = 1000;

#[derive(Debug, Default)]
pub struct OperatorTable {
    operators: AHashMap<SymbolId, OperatorDef>,
}

impl OperatorTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the standard assignment operators at
    /// [`ASSIGNMENT_PRIORITY`], named after the forms they desugar to.
    #[must_use]
    pub fn with_builtins(interns: &Interns) -> Self {
        let mut table = Self::new();
        for (op, handler) in [
            ("=", "set!"),
            (":=", "define"),
            (":+", "define"),
            (":*", "define-environ"),
            (":~", "define-dynamic"),
            (":$", "define-computed"),
        ] {
            table.register(
                interns.intern_symbol(op),
                OperatorDef {
                    priority: ASSIGNMENT_PRIORITY,
                    kind: OperatorKind::Infix,
                    handler: interns.intern_symbol(handler),
                },
            );
        }
        table
    }

    pub fn register(&mut self, name: SymbolId, def: OperatorDef) {
        self.operators.insert(name, def);
    }

    #[must_use]
    pub fn get(&self, name: SymbolId) -> Option<&OperatorDef> {
        self.operators.get(&name)
    }

    #[must_use]
    pub fn is_operator(&self, name: SymbolId) -> bool {
        self.operators.contains_key(&name)
    }
}

fn list_items(value: &Value) -> Option<Vec<Value>> {
    let mut items = Vec::new();
    let mut cur = value.clone();
    loop {
        match cur {
            Value::Constant(crate::value::ConstantIdio::Nil) => return Some(items),
            Value::Pair(p) => {
                let cell = p.borrow();
                items.push(cell.car.clone());
                cur = cell.cdr.clone();
            }
            _ => return None,
        }
    }
}

/// Rewrites the simple three-element pattern `(lhs op rhs)` into
/// `(handler lhs rhs)`, and the two-element pattern `(operand op)` into
/// `(handler operand)`. Chained/mixed-priority operator expressions are
/// not attempted: a full precedence-climbing parser is unneeded for the
/// fixed assignment-operator set this evaluator ships with.
#[must_use]
pub fn operator_expand(form: &Value, table: &OperatorTable) -> Value {
    let Some(items) = list_items(form) else {
        return form.clone();
    };
    if items.len() == 3
        && let Value::Symbol(op) = &items[1]
        && let Some(def) = table.get(*op)
        && def.kind == OperatorKind::Infix
    {
        return Value::list(vec![Value::Symbol(def.handler), items[0].clone(), items[2].clone()]);
    }
    if items.len() == 2
        && let Value::Symbol(op) = &items[1]
        && let Some(def) = table.get(*op)
        && def.kind == OperatorKind::Postfix
    {
        return Value::list(vec![Value::Symbol(def.handler), items[0].clone()]);
    }
    form.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_all;

    #[test]
    fn infix_assignment_operator_desugars_to_handler_call() {
        let interns = Interns::new();
        let table = OperatorTable::with_builtins(&interns);
        let forms = read_all("(x = 5)", &interns).unwrap();
        let expanded = operator_expand(&forms[0], &table);
        let items = list_items(&expanded).unwrap();
        assert_eq!(items.len(), 3);
        let name = match &items[0] {
            Value::Symbol(s) => *s,
            _ => panic!("expected symbol"),
        };
        assert_eq!(interns.symbol_name(name), "set!");
    }
}
