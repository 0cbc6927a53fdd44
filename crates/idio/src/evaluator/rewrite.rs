//! `rewrite-body` (spec §4.3): hoists a lambda body's leading internal
//! `define`s into a single `letrec`-style frame, so the rest of the
//! evaluator only ever has to compile bodies with no internal defines.

use crate::evaluator::special_forms::Keywords;
use crate::intern::SymbolId;
use crate::value::Value;

pub struct RewrittenBody {
    /// Names bound by leading internal defines, frame-slot order.
    pub names: Vec<SymbolId>,
    /// Their initialising expressions, same order as `names`.
    pub inits: Vec<Value>,
    /// What remains of the body once leading defines are stripped.
    pub rest: Vec<Value>,
}

fn as_define(expr: &Value, kw: &Keywords) -> Option<(SymbolId, Value)> {
    let Value::Pair(p) = expr else { return None };
    let cell = p.borrow();
    let Value::Symbol(head) = &cell.car else { return None };
    if *head != kw.define {
        return None;
    }
    let Value::Pair(rest) = &cell.cdr else { return None };
    let rest = rest.borrow();
    let Value::Symbol(name) = &rest.car else { return None };
    let Value::Pair(init_cell) = &rest.cdr else { return None };
    Some((*name, init_cell.borrow().car.clone()))
}

/// Splits `body` (already flattened to a `Vec<Value>` of top-level forms)
/// into its leading internal defines and the remaining expression
/// sequence.
#[must_use]
pub fn rewrite_body(body: &[Value], kw: &Keywords) -> RewrittenBody {
    let mut names = Vec::new();
    let mut inits = Vec::new();
    let mut split = 0;
    for expr in body {
        match as_define(expr, kw) {
            Some((name, init)) => {
                names.push(name);
                inits.push(init);
                split += 1;
            }
            None => break,
        }
    }
    RewrittenBody {
        names,
        inits,
        rest: body[split..].to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interns;
    use crate::reader::read_all;

    #[test]
    fn hoists_leading_defines_only() {
        let interns = Interns::new();
        let kw = Keywords::new(&interns);
        let body = read_all("(define a 1) (define b 2) (+ a b)", &interns).unwrap();
        let rewritten = rewrite_body(&body, &kw);
        assert_eq!(rewritten.names.len(), 2);
        assert_eq!(rewritten.rest.len(), 1);
    }
}
