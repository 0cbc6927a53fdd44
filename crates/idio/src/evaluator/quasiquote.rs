//! Quasiquote expansion (spec §4.3): rather than emitting bytecode
//! directly, a quasiquoted template is rewritten into an equivalent
//! `cons`/`list`/`append` expression tree, which then goes back through
//! `meaning` like any other application -- the same trick the evaluator
//! uses for `rewrite-body`.

use crate::intern::{Interns, SymbolId};
use crate::value::Value;

pub struct QuasiquoteSymbols {
    pub quasiquote: SymbolId,
    pub unquote: SymbolId,
    pub unquote_splicing: SymbolId,
    pub quote: SymbolId,
    pub cons: SymbolId,
    pub append: SymbolId,
}

impl QuasiquoteSymbols {
    #[must_use]
    pub fn new(interns: &Interns) -> Self {
        Self {
            quasiquote: interns.intern_symbol("quasiquote"),
            unquote: interns.intern_symbol("unquote"),
            unquote_splicing: interns.intern_symbol("unquote-splicing"),
            quote: interns.intern_symbol("quote"),
            cons: interns.intern_symbol("cons"),
            append: interns.intern_symbol("append"),
        }
    }
}

fn tagged_head(value: &Value, tag: SymbolId) -> Option<Value> {
    let Value::Pair(p) = value else { return None };
    let cell = p.borrow();
    if matches!(&cell.car, Value::Symbol(s) if *s == tag) {
        Some(cell.cdr.clone())
    } else {
        None
    }
}

fn first(list: &Value) -> Value {
    let Value::Pair(p) = list else { panic!("expected a pair") };
    p.borrow().car.clone()
}

/// Expands one quasiquoted `template` at nesting `depth` (starts at 1 for
/// the outermost backtick) into an expression `meaning` can compile.
#[must_use]
pub fn expand(template: &Value, depth: u32, sym: &QuasiquoteSymbols) -> Value {
    if let Some(rest) = tagged_head(template, sym.unquote) {
        let inner = first(&rest);
        return if depth == 1 {
            inner
        } else {
            Value::list(vec![
                Value::Symbol(sym.unquote),
                expand(&inner, depth - 1, sym),
            ])
        };
    }
    if let Some(rest) = tagged_head(template, sym.quasiquote) {
        let inner = first(&rest);
        return Value::list(vec![Value::Symbol(sym.quasiquote), expand(&inner, depth + 1, sym)]);
    }
    match template {
        Value::Pair(p) => {
            let cell = p.borrow();
            if let Some(splice_rest) = tagged_head(&cell.car, sym.unquote_splicing)
                && depth == 1
            {
                let spliced = first(&splice_rest);
                let rest = expand(&cell.cdr, depth, sym);
                return Value::list(vec![Value::Symbol(sym.append), spliced, rest]);
            }
            let car = expand(&cell.car, depth, sym);
            let cdr = expand(&cell.cdr, depth, sym);
            Value::list(vec![Value::Symbol(sym.cons), car, cdr])
        }
        other => Value::list(vec![Value::Symbol(sym.quote), other.clone()]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_all;

    #[test]
    fn unquote_at_depth_one_passes_expr_through_unwrapped() {
        let interns = Interns::new();
        let sym = QuasiquoteSymbols::new(&interns);
        let forms = read_all("(a ,b c)", &interns).unwrap();
        let expanded = expand(&forms[0], 1, &sym);
        // (cons (quote a) (cons b (cons (quote c) (quote ()))))
        assert_eq!(expanded.type_name(), "pair");
    }
}
