//! The fixed set of special-form keywords the evaluator itself recognises,
//! before any template or operator expansion gets a chance to run
//! (spec §4.3).

use crate::intern::{Interns, SymbolId};

/// Interned ids for every special-form keyword, looked up once so
/// `meaning`'s dispatch is an integer compare rather than a string compare.
#[derive(Debug, Clone, Copy)]
pub struct Keywords {
    pub quote: SymbolId,
    pub quasiquote: SymbolId,
    pub unquote: SymbolId,
    pub unquote_splicing: SymbolId,
    pub if_: SymbolId,
    pub cond: SymbolId,
    pub and: SymbolId,
    pub or: SymbolId,
    pub else_: SymbolId,
    pub arrow: SymbolId,
    pub function: SymbolId,
    pub function_name: SymbolId,
    pub function_plus: SymbolId,
    pub define: SymbolId,
    pub set: SymbolId,
    pub begin: SymbolId,
    pub escape: SymbolId,
    pub escape_from: SymbolId,
    pub block: SymbolId,
    pub dynamic: SymbolId,
    pub dynamic_let: SymbolId,
    pub dynamic_unset: SymbolId,
    pub environ_let: SymbolId,
    pub environ_unset: SymbolId,
    pub trap: SymbolId,
    pub include: SymbolId,
    pub template_expand: SymbolId,
    pub define_template: SymbolId,
    pub define_infix_operator: SymbolId,
    pub define_postfix_operator: SymbolId,
    pub define_environ: SymbolId,
    pub define_dynamic: SymbolId,
    pub define_computed: SymbolId,
}

impl Keywords {
    #[must_use]
    pub fn new(interns: &Interns) -> Self {
        Self {
            quote: interns.intern_symbol("quote"),
            quasiquote: interns.intern_symbol("quasiquote"),
            unquote: interns.intern_symbol("unquote"),
            unquote_splicing: interns.intern_symbol("unquote-splicing"),
            if_: interns.intern_symbol("if"),
            cond: interns.intern_symbol("cond"),
            and: interns.intern_symbol("and"),
            or: interns.intern_symbol("or"),
            else_: interns.intern_symbol("else"),
            arrow: interns.intern_symbol("=>"),
            function: interns.intern_symbol("function"),
            function_name: interns.intern_symbol("function/name"),
            function_plus: interns.intern_symbol("function+"),
            define: interns.intern_symbol("define"),
            set: interns.intern_symbol("set!"),
            begin: interns.intern_symbol("begin"),
            escape: interns.intern_symbol("escape"),
            escape_from: interns.intern_symbol("escape-from"),
            block: interns.intern_symbol("block"),
            dynamic: interns.intern_symbol("dynamic"),
            dynamic_let: interns.intern_symbol("dynamic-let"),
            dynamic_unset: interns.intern_symbol("dynamic-unset"),
            environ_let: interns.intern_symbol("environ-let"),
            environ_unset: interns.intern_symbol("environ-unset"),
            trap: interns.intern_symbol("%trap"),
            include: interns.intern_symbol("include"),
            template_expand: interns.intern_symbol("template-expand"),
            define_template: interns.intern_symbol("define-template"),
            define_infix_operator: interns.intern_symbol("define-infix-operator"),
            define_postfix_operator: interns.intern_symbol("define-postfix-operator"),
            define_environ: interns.intern_symbol("define-environ"),
            define_dynamic: interns.intern_symbol("define-dynamic"),
            define_computed: interns.intern_symbol("define-computed"),
        }
    }
}
