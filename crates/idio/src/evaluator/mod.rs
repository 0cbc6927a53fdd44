//! `meaning`: compiles one source form into an IR sequence (spec §4.3).
//!
//! Ties together every helper submodule: [`scope`] for the resolution
//! order, [`special_forms`] for the fixed keyword set, [`quasiquote`] and
//! `crate::operator` for the two syntactic layers that run before a form
//! is compiled proper, [`rewrite`] for internal-define hoisting, and
//! `crate::template` for compile-time macro expansion.

pub mod ir;
pub mod quasiquote;
pub mod rewrite;
pub mod scope;
pub mod special_forms;

use ahash::AHashMap;

use crate::codegen;
use crate::condition::{ConditionType, RunError, RunResult};
use crate::evaluator::ir::{Ir, IrSeq};
use crate::evaluator::rewrite::{rewrite_body, RewrittenBody};
use crate::evaluator::scope::{LexEnv, LexFrame, Resolution};
use crate::evaluator::special_forms::Keywords;
use crate::intern::{Interns, SymbolId};
use crate::module::ModuleId;
use crate::evaluator::quasiquote::QuasiquoteSymbols;
use crate::operator::{operator_expand, OperatorDef, OperatorKind, OperatorTable};
use crate::runtime::Runtime;
use crate::symbol_info::{ConstantIndex, Scope, SymbolInfo, SymbolTableIndex, ValueIndex};
use crate::template::Templates;
use crate::thread::Thread;
use crate::tracer::VmTracer;
use crate::value::{ConstantIdio, Value};
use crate::xenv::XenvId;

/// Everything `meaning` accumulates across one compilation: the fixed
/// keyword/quasiquote tables, the mutable operator and template tables
/// `define-infix-operator`/`define-template` grow as compilation proceeds,
/// a per-xenv cache of symbols already interned into that xenv's `st`, and
/// a counter backing the gensyms a few special forms need for compiler-
/// introduced bindings (trap handlers).
pub struct Compiler {
    pub kw: Keywords,
    pub qq: QuasiquoteSymbols,
    pub operators: OperatorTable,
    pub templates: Templates,
    symbol_si_cache: AHashMap<(XenvId, SymbolId), SymbolTableIndex>,
    gensym_counter: u32,
}

impl Compiler {
    #[must_use]
    pub fn new(interns: &Interns) -> Self {
        Self {
            kw: Keywords::new(interns),
            qq: QuasiquoteSymbols::new(interns),
            operators: OperatorTable::with_builtins(interns),
            templates: Templates::new(),
            symbol_si_cache: AHashMap::new(),
            gensym_counter: 0,
        }
    }

    /// Interns `name` into `xi`'s symbol table at most once per (xenv,
    /// name) pair, reusing the cached `si` on repeat references.
    fn xenv_symbol(
        &mut self,
        runtime: &mut Runtime,
        xi: XenvId,
        module: ModuleId,
        name: SymbolId,
        scope: Scope,
        vi: ValueIndex,
    ) -> SymbolTableIndex {
        if let Some(&si) = self.symbol_si_cache.get(&(xi, name)) {
            return si;
        }
        let (si, _info) = runtime.xenv_mut(xi).extend_tables(name, scope, module, "ref", Some(vi));
        self.symbol_si_cache.insert((xi, name), si);
        si
    }

    fn gensym(&mut self, runtime: &Runtime, tag: &str) -> SymbolId {
        let n = self.gensym_counter;
        self.gensym_counter += 1;
        runtime.interns.intern_symbol(&format!("%{tag}-{n}"))
    }
}

/// Installs every registered primitive as a `Scope::Predef` binding in the
/// root module, exported so every module's import chain can see it. Called
/// once per `Runtime` before any compilation happens (spec §4.2 "predefs
/// are visible everywhere").
pub fn bootstrap_primitives(runtime: &mut Runtime) {
    let root = runtime.root_module;
    let entries: Vec<_> = runtime.primitives.names().collect();
    for (name, _id) in entries {
        runtime.modules.module_mut(root).define(
            name,
            SymbolInfo {
                scope: Scope::Predef,
                xi: XenvId::BOOTSTRAP,
                si: SymbolTableIndex(0),
                ci: ConstantIndex(0),
                vi: ValueIndex::UNRESOLVED,
                module: root,
                description: "primitive".to_owned(),
                name,
            },
        );
        runtime.modules.module_mut(root).export(name);
    }
}

fn malformed(what: &str) -> RunError {
    RunError::new(ConditionType::EvaluationError, format!("malformed {what}"))
}

/// Flattens a proper list into a `Vec`, erroring on an improper tail --
/// every special form's operand list is expected proper (spec §4.3).
fn list_items(value: &Value) -> RunResult<Vec<Value>> {
    let mut items = Vec::new();
    let mut cur = value.clone();
    loop {
        match cur {
            Value::Constant(ConstantIdio::Nil) => return Ok(items),
            Value::Pair(p) => {
                let cell = p.borrow();
                items.push(cell.car.clone());
                cur = cell.cdr.clone();
            }
            _ => return Err(malformed("expression: expected a proper list")),
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn meaning(
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
    cx: &mut Compiler,
    xi: XenvId,
    module: ModuleId,
    lex: &LexEnv,
    form: &Value,
    tail: bool,
) -> RunResult<IrSeq> {
    let expanded = crate::template::expand_to_fixpoint(form.clone(), &cx.templates, runtime, thread, tracer)?;
    let expanded = operator_expand(&expanded, &cx.operators);

    match &expanded {
        Value::Symbol(name) => meaning_reference(runtime, cx, xi, module, lex, *name),

        Value::Pair(p) => {
            let cell = p.borrow();
            let head = cell.car.clone();
            let rest = cell.cdr.clone();
            drop(cell);

            if let Value::Symbol(s) = &head {
                let kw = cx.kw;
                if *s == kw.quote {
                    return meaning_quote(runtime, xi, &rest);
                }
                if *s == kw.quasiquote {
                    return meaning_quasiquote(runtime, thread, tracer, cx, xi, module, lex, &rest, tail);
                }
                if *s == kw.if_ {
                    return meaning_if(runtime, thread, tracer, cx, xi, module, lex, &rest, tail);
                }
                if *s == kw.cond {
                    return meaning_cond(runtime, thread, tracer, cx, xi, module, lex, &rest, tail);
                }
                if *s == kw.and {
                    return meaning_and(runtime, thread, tracer, cx, xi, module, lex, &rest, tail);
                }
                if *s == kw.or {
                    return meaning_or(runtime, thread, tracer, cx, xi, module, lex, &rest, tail);
                }
                if *s == kw.function {
                    return meaning_lambda(runtime, thread, tracer, cx, xi, module, lex, &rest);
                }
                if *s == kw.function_name {
                    return meaning_function_name(runtime, thread, tracer, cx, xi, module, lex, &rest);
                }
                if *s == kw.function_plus {
                    return meaning_function_plus(runtime, thread, tracer, cx, xi, module, lex, &rest, tail);
                }
                if *s == kw.define {
                    return meaning_define(runtime, thread, tracer, cx, xi, module, lex, &rest, Scope::Toplevel);
                }
                if *s == kw.define_environ {
                    return meaning_define(runtime, thread, tracer, cx, xi, module, lex, &rest, Scope::Environ);
                }
                if *s == kw.define_dynamic {
                    return meaning_define(runtime, thread, tracer, cx, xi, module, lex, &rest, Scope::Dynamic);
                }
                if *s == kw.define_computed {
                    return meaning_define(runtime, thread, tracer, cx, xi, module, lex, &rest, Scope::Computed);
                }
                if *s == kw.set {
                    return meaning_set(runtime, thread, tracer, cx, xi, module, lex, &rest);
                }
                if *s == kw.begin {
                    let items = list_items(&rest)?;
                    return compile_body_sequence(runtime, thread, tracer, cx, xi, module, lex, &items, tail);
                }
                if *s == kw.block {
                    return meaning_block(runtime, thread, tracer, cx, xi, module, lex, &rest, tail);
                }
                if *s == kw.escape {
                    return meaning_escape(runtime, thread, tracer, cx, xi, module, lex, &rest, tail);
                }
                if *s == kw.escape_from {
                    return meaning_escape_from(runtime, thread, tracer, cx, xi, module, lex, &rest);
                }
                if *s == kw.dynamic {
                    return meaning_dynamic(runtime, cx, xi, module, lex, &rest);
                }
                if *s == kw.dynamic_let {
                    return meaning_dynamic_let(runtime, thread, tracer, cx, xi, module, lex, &rest, Scope::Dynamic);
                }
                if *s == kw.dynamic_unset {
                    return meaning_dynamic_unset(runtime, thread, tracer, cx, xi, module, lex, &rest, Scope::Dynamic);
                }
                if *s == kw.environ_let {
                    return meaning_dynamic_let(runtime, thread, tracer, cx, xi, module, lex, &rest, Scope::Environ);
                }
                if *s == kw.environ_unset {
                    return meaning_dynamic_unset(runtime, thread, tracer, cx, xi, module, lex, &rest, Scope::Environ);
                }
                if *s == kw.trap {
                    return meaning_trap(runtime, thread, tracer, cx, xi, module, lex, &rest);
                }
                if *s == kw.include {
                    return meaning_include(runtime, thread, tracer, cx, xi, module, lex, &rest, tail);
                }
                if *s == kw.template_expand {
                    return meaning_template_expand(runtime, thread, tracer, cx, xi, module, lex, &rest, tail);
                }
                if *s == kw.define_template {
                    return meaning_define_template(runtime, thread, tracer, cx, xi, module, lex, &rest);
                }
                if *s == kw.define_infix_operator {
                    return meaning_define_operator(runtime, xi, cx, &rest, OperatorKind::Infix);
                }
                if *s == kw.define_postfix_operator {
                    return meaning_define_operator(runtime, xi, cx, &rest, OperatorKind::Postfix);
                }
            }

            let args = list_items(&rest)?;
            compile_application(runtime, thread, tracer, cx, xi, module, lex, &head, &args, tail)
        }

        // Self-evaluating: fixnums, booleans/nil/unspec, strings, keywords,
        // unicode literals. Closures/pairs/etc. never appear here -- a
        // reader only ever hands `meaning` the immediate/compound forms
        // above.
        other => {
            let ci = runtime.xenv_mut(xi).constants_lookup_or_extend(other.clone());
            Ok(IrSeq(vec![Ir::Constant(ci)]))
        }
    }
}

fn meaning_reference(runtime: &mut Runtime, cx: &mut Compiler, xi: XenvId, module: ModuleId, lex: &LexEnv, name: SymbolId) -> RunResult<IrSeq> {
    match scope::resolve(lex, &runtime.modules, module, name) {
        (Resolution::Lexical(depth, index), _) => {
            let node = if depth == 0 {
                Ir::ShallowArgumentRef(index)
            } else {
                Ir::DeepArgumentRef(depth, index)
            };
            Ok(IrSeq(vec![node]))
        }
        (Resolution::Module, Some(info)) if info.scope == Scope::Predef => {
            let pid = runtime
                .primitives
                .find(name)
                .expect("Scope::Predef SymbolInfo without a matching primitive registration");
            Ok(IrSeq(vec![Ir::Predefined(pid.0)]))
        }
        (Resolution::Module, Some(info)) if info.scope == Scope::Computed => {
            let (scope, vi) = (info.scope, info.vi);
            let si = cx.xenv_symbol(runtime, xi, module, name, scope, vi);
            let ph_pid = computed_accessor_pid(runtime, "ph");
            Ok(IrSeq(vec![
                Ir::SymIref(si),
                Ir::Primcall1(ph_pid),
                Ir::PushValue,
                Ir::AllocateFrame(0),
                Ir::PopFunction,
                Ir::FunctionInvoke,
            ]))
        }
        (Resolution::Module, Some(info)) => {
            let (scope, vi) = (info.scope, info.vi);
            let si = cx.xenv_symbol(runtime, xi, module, name, scope, vi);
            Ok(IrSeq(vec![Ir::SymIref(si)]))
        }
        (Resolution::Module, None) => unreachable!("Resolution::Module always carries a SymbolInfo"),
        (Resolution::Unbound, _) => {
            let vi = runtime.alloc_value(Value::Constant(ConstantIdio::Undef));
            let (si, info) = runtime.xenv_mut(xi).extend_tables(name, Scope::Toplevel, module, "auto-toplevel", Some(vi));
            runtime.modules.module_mut(module).define(name, info);
            cx_cache_insert(cx, xi, name, si);
            Ok(IrSeq(vec![Ir::SymIref(si)]))
        }
    }
}

fn cx_cache_insert(cx: &mut Compiler, xi: XenvId, name: SymbolId, si: SymbolTableIndex) {
    cx.symbol_si_cache.insert((xi, name), si);
}

/// A computed variable's value slot holds a `(getter . setter)` pair
/// (spec §4.5 "Computed"); `ph`/`pt` pull the two closures back out.
fn computed_accessor_pid(runtime: &Runtime, name: &str) -> u32 {
    let sym = runtime.interns.intern_symbol(name);
    runtime
        .primitives
        .find(sym)
        .unwrap_or_else(|| panic!("computed-variable accessor `{name}` not registered as a primitive"))
        .0
}

fn meaning_quote(runtime: &mut Runtime, xi: XenvId, rest: &Value) -> RunResult<IrSeq> {
    let items = list_items(rest)?;
    let quoted = items.first().cloned().unwrap_or_else(Value::nil);
    let ci = runtime.xenv_mut(xi).constants_lookup_or_extend(quoted);
    Ok(IrSeq(vec![Ir::Constant(ci)]))
}

#[allow(clippy::too_many_arguments)]
fn meaning_quasiquote(
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
    cx: &mut Compiler,
    xi: XenvId,
    module: ModuleId,
    lex: &LexEnv,
    rest: &Value,
    tail: bool,
) -> RunResult<IrSeq> {
    let items = list_items(rest)?;
    let template = items.first().cloned().unwrap_or_else(Value::nil);
    let expanded = quasiquote::expand(&template, 1, &cx.qq);
    meaning(runtime, thread, tracer, cx, xi, module, lex, &expanded, tail)
}

#[allow(clippy::too_many_arguments)]
fn meaning_if(
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
    cx: &mut Compiler,
    xi: XenvId,
    module: ModuleId,
    lex: &LexEnv,
    rest: &Value,
    tail: bool,
) -> RunResult<IrSeq> {
    let items = list_items(rest)?;
    if items.len() < 2 {
        return Err(malformed("if: expected at least a condition and a consequent"));
    }
    let cond_ir = meaning(runtime, thread, tracer, cx, xi, module, lex, &items[0], false)?;
    let then_ir = meaning(runtime, thread, tracer, cx, xi, module, lex, &items[1], tail)?;
    let else_ir = if items.len() > 2 {
        meaning(runtime, thread, tracer, cx, xi, module, lex, &items[2], tail)?
    } else {
        let ci = runtime.xenv_mut(xi).constants_lookup_or_extend(Value::Constant(ConstantIdio::Unspec));
        IrSeq(vec![Ir::Constant(ci)])
    };

    let then_len = codegen::linearize(&then_ir.0).len();
    let else_len = codegen::linearize(&else_ir.0).len();
    // LongGoto is one opcode byte plus a u16 operand.
    const GOTO_LEN: usize = 3;
    let jump_false_offset =
        u16::try_from(then_len + GOTO_LEN).map_err(|_| RunError::new(ConditionType::EvaluationError, "if consequent too large to jump over"))?;
    let goto_offset =
        u16::try_from(else_len).map_err(|_| RunError::new(ConditionType::EvaluationError, "if alternative too large to jump over"))?;

    let mut seq = cond_ir;
    seq.push(Ir::LongJumpFalse(jump_false_offset));
    seq.extend(then_ir);
    seq.push(Ir::LongGoto(goto_offset));
    seq.extend(else_ir);
    Ok(seq)
}

/// Rewrites one `cond` clause list into nested `if`/`function` forms, the
/// same desugaring `rewrite-body`'s `let`-introduction uses gensym for
/// (spec §4.3, §9 "Template hygiene"). Lone-test and `=>` clauses need a
/// gensym so the test is evaluated exactly once.
fn expand_cond(cx: &mut Compiler, runtime: &Runtime, clauses: &[Value]) -> RunResult<Value> {
    let Some((first, rest)) = clauses.split_first() else {
        return Ok(Value::Constant(ConstantIdio::Unspec));
    };
    let clause_items = list_items(first)?;
    let Some(test) = clause_items.first().cloned() else {
        return Err(malformed("cond: empty clause"));
    };
    if let Value::Symbol(s) = test
        && s == cx.kw.else_
    {
        return Ok(Value::cons(Value::Symbol(cx.kw.begin), Value::list(clause_items[1..].to_vec())));
    }
    if clause_items.len() == 3
        && let Value::Symbol(s) = clause_items[1]
        && s == cx.kw.arrow
    {
        let recv = clause_items[2].clone();
        let tmp = cx.gensym(runtime, "cond");
        let rest_form = expand_cond(cx, runtime, rest)?;
        let body = Value::list(vec![
            Value::Symbol(cx.kw.if_),
            Value::Symbol(tmp),
            Value::list(vec![recv, Value::Symbol(tmp)]),
            rest_form,
        ]);
        let lambda = Value::list(vec![Value::Symbol(cx.kw.function), Value::list(vec![Value::Symbol(tmp)]), body]);
        return Ok(Value::list(vec![lambda, test]));
    }
    if clause_items.len() == 1 {
        let tmp = cx.gensym(runtime, "cond");
        let rest_form = expand_cond(cx, runtime, rest)?;
        let body = Value::list(vec![Value::Symbol(cx.kw.if_), Value::Symbol(tmp), Value::Symbol(tmp), rest_form]);
        let lambda = Value::list(vec![Value::Symbol(cx.kw.function), Value::list(vec![Value::Symbol(tmp)]), body]);
        return Ok(Value::list(vec![lambda, test]));
    }
    let rest_form = expand_cond(cx, runtime, rest)?;
    let begin_expr = Value::cons(Value::Symbol(cx.kw.begin), Value::list(clause_items[1..].to_vec()));
    Ok(Value::list(vec![Value::Symbol(cx.kw.if_), test, begin_expr, rest_form]))
}

#[allow(clippy::too_many_arguments)]
fn meaning_cond(
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
    cx: &mut Compiler,
    xi: XenvId,
    module: ModuleId,
    lex: &LexEnv,
    rest: &Value,
    tail: bool,
) -> RunResult<IrSeq> {
    let clauses = list_items(rest)?;
    let expanded = expand_cond(cx, runtime, &clauses)?;
    meaning(runtime, thread, tracer, cx, xi, module, lex, &expanded, tail)
}

/// `(and)` => `#t`; `(and e)` => `e`; `(and e1 e2...)` => `(if e1 (and e2...) #f)`.
/// No gensym needed since each test is already evaluated at most once.
fn expand_and(kw: Keywords, items: &[Value]) -> Value {
    match items {
        [] => Value::bool(true),
        [only] => only.clone(),
        [first, tail @ ..] => Value::list(vec![Value::Symbol(kw.if_), first.clone(), expand_and(kw, tail), Value::bool(false)]),
    }
}

#[allow(clippy::too_many_arguments)]
fn meaning_and(
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
    cx: &mut Compiler,
    xi: XenvId,
    module: ModuleId,
    lex: &LexEnv,
    rest: &Value,
    tail: bool,
) -> RunResult<IrSeq> {
    let items = list_items(rest)?;
    let expanded = expand_and(cx.kw, &items);
    meaning(runtime, thread, tracer, cx, xi, module, lex, &expanded, tail)
}

/// `(or)` => `#f`; `(or e)` => `e`; `(or e1 e2...)` => a gensym'd `function`
/// so `e1` is evaluated exactly once even though it appears twice in the
/// expansion (spec §9 "Template hygiene").
fn expand_or(cx: &mut Compiler, runtime: &Runtime, items: &[Value]) -> Value {
    match items {
        [] => Value::bool(false),
        [only] => only.clone(),
        [first, tail @ ..] => {
            let tmp = cx.gensym(runtime, "or");
            let rest_form = expand_or(cx, runtime, tail);
            let body = Value::list(vec![Value::Symbol(cx.kw.if_), Value::Symbol(tmp), Value::Symbol(tmp), rest_form]);
            let lambda = Value::list(vec![Value::Symbol(cx.kw.function), Value::list(vec![Value::Symbol(tmp)]), body]);
            Value::list(vec![lambda, first.clone()])
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn meaning_or(
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
    cx: &mut Compiler,
    xi: XenvId,
    module: ModuleId,
    lex: &LexEnv,
    rest: &Value,
    tail: bool,
) -> RunResult<IrSeq> {
    let items = list_items(rest)?;
    let expanded = expand_or(cx, runtime, &items);
    meaning(runtime, thread, tracer, cx, xi, module, lex, &expanded, tail)
}

fn parse_params(form: &Value) -> RunResult<(Vec<SymbolId>, bool)> {
    let mut names = Vec::new();
    let mut cur = form.clone();
    loop {
        match cur {
            Value::Constant(ConstantIdio::Nil) => return Ok((names, false)),
            Value::Symbol(rest_name) => {
                names.push(rest_name);
                return Ok((names, true));
            }
            Value::Pair(p) => {
                let cell = p.borrow();
                let Value::Symbol(name) = cell.car else {
                    return Err(malformed("function parameter list: expected a symbol"));
                };
                names.push(name);
                cur = cell.cdr.clone();
            }
            _ => return Err(malformed("function parameter list")),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn compile_body_sequence(
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
    cx: &mut Compiler,
    xi: XenvId,
    module: ModuleId,
    lex: &LexEnv,
    exprs: &[Value],
    tail: bool,
) -> RunResult<IrSeq> {
    if exprs.is_empty() {
        let ci = runtime.xenv_mut(xi).constants_lookup_or_extend(Value::Constant(ConstantIdio::Unspec));
        return Ok(IrSeq(vec![Ir::Constant(ci)]));
    }
    let mut seq = IrSeq::new();
    let last = exprs.len() - 1;
    for (i, expr) in exprs.iter().enumerate() {
        seq.extend(meaning(runtime, thread, tracer, cx, xi, module, lex, expr, tail && i == last)?);
    }
    Ok(seq)
}

/// Compiles a `function` body, hoisting leading internal defines (via
/// [`rewrite_body`]) into their own inner activation record built with an
/// immediately-applied nested closure -- a `letrec*`-by-desugaring, chosen
/// over growing the caller-built frame in place since the call protocol
/// (spec §4.4) sizes a frame from the argument count alone (see
/// DESIGN.md).
#[allow(clippy::too_many_arguments)]
fn compile_lambda_body(
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
    cx: &mut Compiler,
    xi: XenvId,
    module: ModuleId,
    outer_lex: &LexEnv,
    rewritten: &RewrittenBody,
    tail: bool,
) -> RunResult<IrSeq> {
    if rewritten.names.is_empty() {
        return compile_body_sequence(runtime, thread, tracer, cx, xi, module, outer_lex, &rewritten.rest, tail);
    }

    let inner_lex = outer_lex.extended(LexFrame {
        names: rewritten.names.clone(),
        dotted: false,
    });
    let mut inner_body = IrSeq::new();
    for (i, init) in rewritten.inits.iter().enumerate() {
        inner_body.extend(meaning(runtime, thread, tracer, cx, xi, module, &inner_lex, init, false)?);
        inner_body.push(Ir::ShallowArgumentSet(u32::try_from(i).expect("internal define count overflow")));
    }
    inner_body.extend(compile_body_sequence(runtime, thread, tracer, cx, xi, module, &inner_lex, &rewritten.rest, tail)?);
    inner_body.push(Ir::Return);

    let n = rewritten.names.len();
    let body_len = codegen::linearize(&inner_body.0).len();
    let nil_ci = runtime.xenv_mut(xi).constants_lookup_or_extend(Value::nil());

    let mut seq = IrSeq::new();
    seq.push(Ir::CreateClosure(u32::try_from(n).expect("internal define count overflow"), false, body_len));
    seq.extend(inner_body);
    seq.push(Ir::PushValue);
    for _ in 0..n {
        seq.push(Ir::Constant(nil_ci));
        seq.push(Ir::PushValue);
    }
    seq.push(Ir::AllocateFrame(u32::try_from(n).expect("internal define count overflow")));
    for i in (0..n).rev() {
        seq.push(Ir::PopFrame(u32::try_from(i).expect("internal define count overflow")));
    }
    seq.push(Ir::PopFunction);
    seq.push(Ir::FunctionInvoke);
    Ok(seq)
}

#[allow(clippy::too_many_arguments)]
fn meaning_lambda(
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
    cx: &mut Compiler,
    xi: XenvId,
    module: ModuleId,
    lex: &LexEnv,
    rest: &Value,
) -> RunResult<IrSeq> {
    let Value::Pair(p) = rest else { return Err(malformed("function: expected a parameter list")) };
    let cell = p.borrow();
    let params_form = cell.car.clone();
    let body_form = cell.cdr.clone();
    drop(cell);

    let (names, dotted) = parse_params(&params_form)?;
    let body_items = list_items(&body_form)?;
    let rewritten = rewrite_body(&body_items, &cx.kw);

    let inner_lex = lex.extended(LexFrame {
        names: names.clone(),
        dotted,
    });
    let mut body_seq = compile_lambda_body(runtime, thread, tracer, cx, xi, module, &inner_lex, &rewritten, true)?;
    body_seq.push(Ir::Return);

    let body_len = codegen::linearize(&body_seq.0).len();
    let nparams = u32::try_from(names.len()).expect("parameter count overflow");
    Ok(IrSeq({
        let mut nodes = vec![Ir::CreateClosure(nparams, dotted, body_len)];
        nodes.extend(body_seq.0);
        nodes
    }))
}

/// `function/name name (params) body...` names the closure for backtraces
/// in the original implementation; this VM's `Closure` carries no name
/// field, so the name is dropped and the rest is compiled exactly like a
/// plain `function` (see DESIGN.md).
#[allow(clippy::too_many_arguments)]
fn meaning_function_name(
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
    cx: &mut Compiler,
    xi: XenvId,
    module: ModuleId,
    lex: &LexEnv,
    rest: &Value,
) -> RunResult<IrSeq> {
    let items = list_items(rest)?;
    if items.len() < 2 {
        return Err(malformed("function/name: expected a name, a parameter list, and a body"));
    }
    let Value::Symbol(_) = items[0] else {
        return Err(malformed("function/name: expected a name symbol"));
    };
    let lambda_rest = Value::cons(items[1].clone(), Value::list(items[2..].to_vec()));
    meaning_lambda(runtime, thread, tracer, cx, xi, module, lex, &lambda_rest)
}

/// `function+ var val body...` is sugar for `((function (var) body...) val)`
/// -- a single-binding closed application (spec §4.3 "local-application").
#[allow(clippy::too_many_arguments)]
fn meaning_function_plus(
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
    cx: &mut Compiler,
    xi: XenvId,
    module: ModuleId,
    lex: &LexEnv,
    rest: &Value,
    tail: bool,
) -> RunResult<IrSeq> {
    let items = list_items(rest)?;
    if items.len() < 2 {
        return Err(malformed("function+: expected a variable, a value, and a body"));
    }
    let Value::Symbol(_) = items[0] else {
        return Err(malformed("function+: expected a variable symbol"));
    };
    let params = Value::list(vec![items[0].clone()]);
    let body = Value::list(items[2..].to_vec());
    let lambda_form = Value::cons(Value::Symbol(cx.kw.function), Value::cons(params, body));
    let application = Value::list(vec![lambda_form, items[1].clone()]);
    meaning(runtime, thread, tracer, cx, xi, module, lex, &application, tail)
}

#[allow(clippy::too_many_arguments)]
fn meaning_define(
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
    cx: &mut Compiler,
    xi: XenvId,
    module: ModuleId,
    lex: &LexEnv,
    rest: &Value,
    scope: Scope,
) -> RunResult<IrSeq> {
    let items = list_items(rest)?;
    if items.is_empty() {
        return Err(malformed("define"));
    }
    let (name, value_form) = match &items[0] {
        Value::Symbol(s) => (*s, items.get(1).cloned().unwrap_or_else(Value::nil)),
        Value::Pair(p) => {
            let head_items = list_items(&items[0])?;
            let Value::Symbol(name) = head_items[0] else {
                return Err(malformed("define: expected a name"));
            };
            let params = Value::list(head_items[1..].to_vec());
            let body = Value::list(items[1..].to_vec());
            let lambda_form = Value::cons(Value::Symbol(cx.kw.function), Value::cons(params, body));
            let _ = p;
            (name, lambda_form)
        }
        _ => return Err(malformed("define")),
    };

    let value_ir = meaning(runtime, thread, tracer, cx, xi, module, lex, &value_form, false)?;

    let existing = runtime.modules.module(module).local(name).cloned();
    let vi = match existing {
        Some(info) if info.vi.is_resolved() => info.vi,
        _ => runtime.alloc_value(Value::Constant(ConstantIdio::Undef)),
    };
    let si = cx.xenv_symbol(runtime, xi, module, name, scope, vi);
    let ci = runtime.xenv(xi).st_get(si);
    runtime.modules.module_mut(module).define(
        name,
        SymbolInfo {
            scope,
            xi,
            si,
            ci,
            vi,
            module,
            description: "define".to_owned(),
            name,
        },
    );

    let mut seq = value_ir;
    seq.push(Ir::SymIdef(si));
    Ok(seq)
}

#[allow(clippy::too_many_arguments)]
fn meaning_set(
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
    cx: &mut Compiler,
    xi: XenvId,
    module: ModuleId,
    lex: &LexEnv,
    rest: &Value,
) -> RunResult<IrSeq> {
    let items = list_items(rest)?;
    if items.len() != 2 {
        return Err(malformed("set!: expected a name and a value"));
    }
    let Value::Symbol(name) = items[0] else {
        return Err(malformed("set!: expected a symbol"));
    };
    match scope::resolve(lex, &runtime.modules, module, name) {
        (Resolution::Lexical(depth, index), _) => {
            let mut seq = meaning(runtime, thread, tracer, cx, xi, module, lex, &items[1], false)?;
            seq.push(if depth == 0 {
                Ir::ShallowArgumentSet(index)
            } else {
                Ir::DeepArgumentSet(depth, index)
            });
            Ok(seq)
        }
        (Resolution::Module, Some(info)) if info.scope == Scope::Computed => {
            let (scope, vi) = (info.scope, info.vi);
            let si = cx.xenv_symbol(runtime, xi, module, name, scope, vi);
            let pt_pid = computed_accessor_pid(runtime, "pt");
            let value_ir = meaning(runtime, thread, tracer, cx, xi, module, lex, &items[1], false)?;
            let mut seq = IrSeq(vec![Ir::SymIref(si), Ir::Primcall1(pt_pid), Ir::PushValue]);
            seq.extend(value_ir);
            seq.push(Ir::PushValue);
            seq.push(Ir::AllocateFrame(1));
            seq.push(Ir::PopFrame(0));
            seq.push(Ir::PopFunction);
            seq.push(Ir::FunctionInvoke);
            Ok(seq)
        }
        (Resolution::Module, Some(info)) => {
            let (scope, vi) = (info.scope, info.vi);
            let si = cx.xenv_symbol(runtime, xi, module, name, scope, vi);
            let mut seq = meaning(runtime, thread, tracer, cx, xi, module, lex, &items[1], false)?;
            seq.push(Ir::SymIset(si));
            Ok(seq)
        }
        _ => Err(RunError::new(
            ConditionType::RtVariableUnbound,
            format!("set! of unbound variable: {}", runtime.interns.symbol_name(name)),
        )),
    }
}

#[allow(clippy::too_many_arguments)]
fn meaning_dynamic_let(
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
    cx: &mut Compiler,
    xi: XenvId,
    module: ModuleId,
    lex: &LexEnv,
    rest: &Value,
    scope: Scope,
) -> RunResult<IrSeq> {
    let items = list_items(rest)?;
    if items.is_empty() {
        return Err(malformed("dynamic-let/environ-let: expected a binding"));
    }
    let binding_items = list_items(&items[0])?;
    let (Value::Symbol(name), Some(init_form)) = (binding_items.first().copied().ok_or_else(|| malformed("dynamic-let binding"))?, binding_items.get(1))
    else {
        return Err(malformed("dynamic-let/environ-let binding"));
    };

    let init_ir = meaning(runtime, thread, tracer, cx, xi, module, lex, init_form, false)?;

    let existing = runtime.modules.module(module).local(name).cloned();
    let vi = match existing {
        Some(info) if info.vi.is_resolved() => info.vi,
        _ => {
            let vi = runtime.alloc_value(Value::Constant(ConstantIdio::Undef));
            runtime.modules.module_mut(module).define(
                name,
                SymbolInfo {
                    scope,
                    xi,
                    si: SymbolTableIndex(0),
                    ci: ConstantIndex(0),
                    vi,
                    module,
                    description: "dynamic/environ".to_owned(),
                    name,
                },
            );
            vi
        }
    };
    let si = cx.xenv_symbol(runtime, xi, module, name, scope, vi);

    let body_ir = compile_body_sequence(runtime, thread, tracer, cx, xi, module, lex, &items[1..], false)?;

    let mut seq = init_ir;
    seq.push(Ir::PushValue);
    seq.push(if scope == Scope::Dynamic { Ir::PushDynamic(si) } else { Ir::PushEnviron(si) });
    seq.extend(body_ir);
    seq.push(if scope == Scope::Dynamic { Ir::PopDynamic } else { Ir::PopEnviron });
    Ok(seq)
}

/// `dynamic-unset var body...`/`environ-unset var body...`: like
/// `dynamic-let`/`environ-let` but the pushed value is a hoisted `#<undef>`
/// constant rather than an evaluated init expression (spec §4.3).
#[allow(clippy::too_many_arguments)]
fn meaning_dynamic_unset(
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
    cx: &mut Compiler,
    xi: XenvId,
    module: ModuleId,
    lex: &LexEnv,
    rest: &Value,
    scope: Scope,
) -> RunResult<IrSeq> {
    let items = list_items(rest)?;
    let Some(Value::Symbol(name)) = items.first().copied() else {
        return Err(malformed("dynamic-unset/environ-unset: expected a variable name"));
    };

    let existing = runtime.modules.module(module).local(name).cloned();
    let vi = match existing {
        Some(info) if info.vi.is_resolved() => info.vi,
        _ => {
            let vi = runtime.alloc_value(Value::Constant(ConstantIdio::Undef));
            runtime.modules.module_mut(module).define(
                name,
                SymbolInfo {
                    scope,
                    xi,
                    si: SymbolTableIndex(0),
                    ci: ConstantIndex(0),
                    vi,
                    module,
                    description: "dynamic/environ".to_owned(),
                    name,
                },
            );
            vi
        }
    };
    let si = cx.xenv_symbol(runtime, xi, module, name, scope, vi);

    let body_ir = compile_body_sequence(runtime, thread, tracer, cx, xi, module, lex, &items[1..], false)?;
    let undef_ci = runtime.xenv_mut(xi).constants_lookup_or_extend(Value::Constant(ConstantIdio::Undef));

    let mut seq = IrSeq(vec![Ir::Constant(undef_ci), Ir::PushValue]);
    seq.push(if scope == Scope::Dynamic { Ir::PushDynamic(si) } else { Ir::PushEnviron(si) });
    seq.extend(body_ir);
    seq.push(if scope == Scope::Dynamic { Ir::PopDynamic } else { Ir::PopEnviron });
    Ok(seq)
}

/// `(dynamic var)` reads the same binding `dynamic-let` installs; resolved
/// through ordinary scope lookup rather than a dedicated dynamic-first
/// search, so a lexically-shadowing local of the same name wins (see
/// DESIGN.md).
fn meaning_dynamic(runtime: &mut Runtime, cx: &mut Compiler, xi: XenvId, module: ModuleId, lex: &LexEnv, rest: &Value) -> RunResult<IrSeq> {
    let items = list_items(rest)?;
    let Some(Value::Symbol(name)) = items.first().copied() else {
        return Err(malformed("dynamic: expected a variable name"));
    };
    meaning_reference(runtime, cx, xi, module, lex, name)
}

#[allow(clippy::too_many_arguments)]
fn meaning_trap(
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
    cx: &mut Compiler,
    xi: XenvId,
    module: ModuleId,
    lex: &LexEnv,
    rest: &Value,
) -> RunResult<IrSeq> {
    let items = list_items(rest)?;
    if items.len() < 2 {
        return Err(malformed("trap: expected a condition type, a handler, and a body"));
    }
    let Value::Symbol(cond_sym) = items[0] else {
        return Err(malformed("trap: expected a condition type symbol"));
    };
    let cond_name = runtime.interns.symbol_name(cond_sym);
    let condition: ConditionType = cond_name
        .parse()
        .map_err(|_| RunError::new(ConditionType::EvaluationError, format!("unknown condition type: {cond_name}")))?;

    let handler_ir = meaning(runtime, thread, tracer, cx, xi, module, lex, &items[1], false)?;

    let vi = runtime.alloc_value(Value::Constant(ConstantIdio::Undef));
    let handler_sym = cx.gensym(runtime, "trap");
    let si = cx.xenv_symbol(runtime, xi, module, handler_sym, Scope::Toplevel, vi);

    let body_ir = compile_body_sequence(runtime, thread, tracer, cx, xi, module, lex, &items[2..], false)?;

    let mut seq = handler_ir;
    seq.push(Ir::SymIdef(si));
    seq.push(Ir::PushTrap(condition, si));
    seq.extend(body_ir);
    seq.push(Ir::PopTrap);
    Ok(seq)
}

/// `block body...` runs its body through the same internal-define hoisting
/// a `function` body gets, without introducing a closure boundary of its
/// own beyond the nested frame `compile_lambda_body` already builds for
/// hoisted defines (spec §4.3).
#[allow(clippy::too_many_arguments)]
fn meaning_block(
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
    cx: &mut Compiler,
    xi: XenvId,
    module: ModuleId,
    lex: &LexEnv,
    rest: &Value,
    tail: bool,
) -> RunResult<IrSeq> {
    let items = list_items(rest)?;
    let rewritten = rewrite_body(&items, &cx.kw);
    compile_lambda_body(runtime, thread, tracer, cx, xi, module, lex, &rewritten, tail)
}

/// `escape label body...`: pushes an escaper record labelled `label` before
/// the body and pops it on normal exit. `escape-from label expr` elsewhere
/// unwinds straight to just past the matching `PopEscaper` (spec §4.5).
#[allow(clippy::too_many_arguments)]
fn meaning_escape(
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
    cx: &mut Compiler,
    xi: XenvId,
    module: ModuleId,
    lex: &LexEnv,
    rest: &Value,
    tail: bool,
) -> RunResult<IrSeq> {
    let items = list_items(rest)?;
    if items.is_empty() {
        return Err(malformed("escape: expected a label"));
    }
    let Value::Symbol(label) = items[0] else {
        return Err(malformed("escape: expected a label symbol"));
    };
    let body_ir = compile_body_sequence(runtime, thread, tracer, cx, xi, module, lex, &items[1..], tail)?;
    let body_len = codegen::linearize(&body_ir.0).len();
    // PopEscaper is one opcode byte with no operand.
    let offset = u16::try_from(body_len + 1).map_err(|_| RunError::new(ConditionType::EvaluationError, "escape body too large to jump over"))?;

    let mut seq = IrSeq(vec![Ir::PushEscaper(label, offset)]);
    seq.extend(body_ir);
    seq.push(Ir::PopEscaper);
    Ok(seq)
}

fn meaning_escape_from(
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
    cx: &mut Compiler,
    xi: XenvId,
    module: ModuleId,
    lex: &LexEnv,
    rest: &Value,
) -> RunResult<IrSeq> {
    let items = list_items(rest)?;
    if items.len() != 2 {
        return Err(malformed("escape-from: expected a label and an expression"));
    }
    let Value::Symbol(label) = items[0] else {
        return Err(malformed("escape-from: expected a label symbol"));
    };
    let mut seq = meaning(runtime, thread, tracer, cx, xi, module, lex, &items[1], false)?;
    seq.push(Ir::EscapeFrom(label));
    Ok(seq)
}

/// `include "path"` reads and compiles another file's forms in place of the
/// form itself, rather than re-entering the VM across a fresh xenv boundary
/// the way the original file loader does (see DESIGN.md).
#[allow(clippy::too_many_arguments)]
fn meaning_include(
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
    cx: &mut Compiler,
    xi: XenvId,
    module: ModuleId,
    lex: &LexEnv,
    rest: &Value,
    tail: bool,
) -> RunResult<IrSeq> {
    let items = list_items(rest)?;
    if items.len() != 1 {
        return Err(malformed("include: expected a single path"));
    }
    let path = match &items[0] {
        Value::String(s) => s.borrow().as_str().to_owned(),
        Value::Symbol(s) => runtime.interns.symbol_name(*s).to_owned(),
        _ => return Err(malformed("include: expected a string or symbol path")),
    };
    let source = std::fs::read_to_string(&path).map_err(|e| RunError::new(ConditionType::RtPathError, format!("include: {path}: {e}")))?;
    let forms = crate::reader::read_all(&source, &runtime.interns)?;
    compile_body_sequence(runtime, thread, tracer, cx, xi, module, lex, &forms, tail)
}

/// `template-expand expr` expands `expr` once through the template engine
/// and compiles whatever it expands to, reusing the same expansion call
/// `meaning`'s preamble runs on every form (spec §4.3).
#[allow(clippy::too_many_arguments)]
fn meaning_template_expand(
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
    cx: &mut Compiler,
    xi: XenvId,
    module: ModuleId,
    lex: &LexEnv,
    rest: &Value,
    tail: bool,
) -> RunResult<IrSeq> {
    let items = list_items(rest)?;
    if items.len() != 1 {
        return Err(malformed("template-expand: expected a single expression"));
    }
    let expanded = crate::template::expand_to_fixpoint(items[0].clone(), &cx.templates, runtime, thread, tracer)?;
    meaning(runtime, thread, tracer, cx, xi, module, lex, &expanded, tail)
}

/// `define-template` (spec §4.3): evaluates the macro-producing expression
/// immediately, in its own scratch xenv, and registers the resulting
/// closure rather than emitting any bytecode at the definition site itself
/// (see DESIGN.md's "templates resolved at compile time" decision).
#[allow(clippy::too_many_arguments)]
fn meaning_define_template(
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
    cx: &mut Compiler,
    xi: XenvId,
    module: ModuleId,
    lex: &LexEnv,
    rest: &Value,
) -> RunResult<IrSeq> {
    let items = list_items(rest)?;
    if items.len() != 2 {
        return Err(malformed("define-template: expected a name and a macro expression"));
    }
    let Value::Symbol(name) = items[0] else {
        return Err(malformed("define-template: expected a symbol"));
    };

    let macro_xi = runtime.new_xenv(format!("template:{}", runtime.interns.symbol_name(name)));
    let mut macro_ir = meaning(runtime, thread, tracer, cx, macro_xi, module, lex, &items[1], false)?;
    macro_ir.push(Ir::Finish);
    for node in &macro_ir.0 {
        codegen::emit(runtime.xenv_mut(macro_xi), node);
    }

    let saved_xi = thread.xi;
    let saved_pc = thread.pc;
    thread.xi = macro_xi;
    thread.pc = 0;
    let stop_depth = thread.return_stack_len();
    let result = crate::vm::run_from(runtime, thread, tracer, stop_depth);
    thread.xi = saved_xi;
    thread.pc = saved_pc;
    let result = result?;

    let Value::Closure(closure) = result else {
        return Err(RunError::new(ConditionType::EvaluationError, "define-template's expression must evaluate to a closure"));
    };
    cx.templates.define(name, closure);

    let ci = runtime.xenv_mut(xi).constants_lookup_or_extend(Value::Constant(ConstantIdio::Unspec));
    Ok(IrSeq(vec![Ir::Constant(ci)]))
}

fn meaning_define_operator(runtime: &mut Runtime, xi: XenvId, cx: &mut Compiler, rest: &Value, kind: OperatorKind) -> RunResult<IrSeq> {
    let items = list_items(rest)?;
    if items.len() != 3 {
        return Err(malformed("define-infix-operator/define-postfix-operator: expected operator, priority, handler"));
    }
    let Value::Symbol(op) = items[0] else {
        return Err(malformed("define-infix-operator/define-postfix-operator: expected an operator symbol"));
    };
    let Value::Fixnum(priority) = items[1] else {
        return Err(malformed("define-infix-operator/define-postfix-operator: expected a numeric priority"));
    };
    let Value::Symbol(handler) = items[2] else {
        return Err(malformed("define-infix-operator/define-postfix-operator: expected a handler symbol"));
    };
    cx.operators.register(
        op,
        OperatorDef {
            priority: u32::try_from(priority).unwrap_or(0),
            kind,
            handler,
        },
    );
    let ci = runtime.xenv_mut(xi).constants_lookup_or_extend(Value::Constant(ConstantIdio::Unspec));
    Ok(IrSeq(vec![Ir::Constant(ci)]))
}

/// Compiles `(head arg...)`. Known-predefined heads applied to two or
/// fewer arguments take the `PRIMCALL0/1/2` fast path (spec §4.4); every
/// other application goes through the general push-function/push-args/
/// allocate-frame/pop-frame/pop-function protocol, which is the only path
/// safe when argument evaluation might itself invoke another call (the
/// function register has nowhere else to survive a nested call except the
/// operand stack -- see DESIGN.md).
#[allow(clippy::too_many_arguments)]
fn compile_application(
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
    cx: &mut Compiler,
    xi: XenvId,
    module: ModuleId,
    lex: &LexEnv,
    head: &Value,
    args: &[Value],
    tail: bool,
) -> RunResult<IrSeq> {
    if let Value::Symbol(name) = head
        && args.len() <= 2
    {
        let (res, info) = scope::resolve(lex, &runtime.modules, module, *name);
        if matches!(res, Resolution::Module) && info.is_some_and(|i| i.scope == Scope::Predef) {
            if let Some(pid) = runtime.primitives.find(*name) {
                let mut seq = IrSeq::new();
                match args {
                    [] => seq.push(Ir::Primcall0(pid.0)),
                    [a0] => {
                        seq.extend(meaning(runtime, thread, tracer, cx, xi, module, lex, a0, false)?);
                        seq.push(Ir::Primcall1(pid.0));
                    }
                    [a0, a1] => {
                        seq.extend(meaning(runtime, thread, tracer, cx, xi, module, lex, a0, false)?);
                        seq.push(Ir::PushValue);
                        seq.extend(meaning(runtime, thread, tracer, cx, xi, module, lex, a1, false)?);
                        seq.push(Ir::PopReg1);
                        seq.push(Ir::Primcall2(pid.0));
                    }
                    _ => unreachable!("guarded by args.len() <= 2 above"),
                }
                return Ok(seq);
            }
        }
    }

    let mut seq = meaning(runtime, thread, tracer, cx, xi, module, lex, head, false)?;
    seq.push(Ir::PushValue);
    let n = args.len();
    for arg in args {
        seq.extend(meaning(runtime, thread, tracer, cx, xi, module, lex, arg, false)?);
        seq.push(Ir::PushValue);
    }
    seq.push(Ir::AllocateFrame(u32::try_from(n).expect("argument count overflow")));
    for i in (0..n).rev() {
        seq.push(Ir::PopFrame(u32::try_from(i).expect("argument count overflow")));
    }
    seq.push(Ir::PopFunction);
    seq.push(if tail { Ir::FunctionGoto } else { Ir::FunctionInvoke });
    Ok(seq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Modules;
    use crate::reader::read_all;
    use crate::tracer::NoopTracer;

    fn fresh() -> (Runtime, Thread, ModuleId) {
        let mut runtime = Runtime::new();
        bootstrap_primitives(&mut runtime);
        let user_name = runtime.interns.intern_symbol("user");
        let module = runtime.modules.make_module(user_name).unwrap();
        let thread = Thread::new(XenvId::BOOTSTRAP, module);
        (runtime, thread, module)
    }

    fn compile_and_run(src: &str) -> Value {
        let (mut runtime, mut thread, module) = fresh();
        let mut tracer = NoopTracer;
        let mut cx = Compiler::new(&runtime.interns);
        let forms = read_all(src, &runtime.interns).unwrap();
        let xi = runtime.new_xenv("test");
        let mut seq = IrSeq::new();
        for form in &forms {
            seq.extend(meaning(&mut runtime, &mut thread, &mut tracer, &mut cx, xi, module, &LexEnv::new(), form, false).unwrap());
        }
        seq.push(Ir::Finish);
        for node in &seq.0 {
            codegen::emit(runtime.xenv_mut(xi), node);
        }
        thread.xi = xi;
        thread.pc = 0;
        crate::vm::run(&mut runtime, &mut thread, &mut tracer).unwrap()
    }

    #[test]
    fn compiles_primcall_fast_path_for_small_arity() {
        let result = compile_and_run("(+ 1 2)");
        assert!(matches!(result, Value::Fixnum(3)));
    }

    #[test]
    fn compiles_general_application_for_user_closures() {
        let result = compile_and_run("(define (square x) (* x x)) (square 5)");
        assert!(matches!(result, Value::Fixnum(25)));
    }

    #[test]
    fn if_picks_the_matching_branch() {
        assert!(matches!(compile_and_run("(if #t 1 2)"), Value::Fixnum(1)));
        assert!(matches!(compile_and_run("(if #f 1 2)"), Value::Fixnum(2)));
    }

    #[test]
    fn internal_defines_hoist_into_their_own_frame() {
        let result = compile_and_run("(define (f) (define a 1) (define b 2) (+ a b)) (f)");
        assert!(matches!(result, Value::Fixnum(3)));
    }

    #[test]
    fn quasiquote_splices_and_substitutes() {
        let result = compile_and_run("(define x 2) `(1 ,x 3)");
        let items = list_items(&result).unwrap();
        assert_eq!(items.len(), 3);
        assert!(matches!(items[1], Value::Fixnum(2)));
    }

    #[test]
    fn set_bang_mutates_a_toplevel_binding() {
        let result = compile_and_run("(define x 1) (set! x 2) x");
        assert!(matches!(result, Value::Fixnum(2)));
    }

    #[test]
    fn unbound_variable_reference_raises_through_trap() {
        let result = compile_and_run("(%trap ^rt-variable-unbound (function (msg) 99) totally-unbound-name)");
        assert!(matches!(result, Value::Fixnum(99)));
    }

    #[test]
    fn define_infix_operator_desugars_before_compilation() {
        let result = compile_and_run("(define y 0) (y = 7) y");
        assert!(matches!(result, Value::Fixnum(7)));
    }

    #[test]
    fn cond_picks_the_first_matching_clause() {
        let result = compile_and_run("(cond (#f 1) (#t 2) (else 3))");
        assert!(matches!(result, Value::Fixnum(2)));
    }

    #[test]
    fn cond_falls_through_to_else() {
        let result = compile_and_run("(cond (#f 1) (#f 2) (else 3))");
        assert!(matches!(result, Value::Fixnum(3)));
    }

    #[test]
    fn cond_lone_test_clause_evaluates_its_test_once() {
        let result = compile_and_run("(define n 0) (cond ((begin (set! n (+ n 1)) n)) (else 'unreached)) n");
        assert!(matches!(result, Value::Fixnum(1)));
    }

    #[test]
    fn and_short_circuits_on_the_first_false() {
        assert!(matches!(compile_and_run("(and 1 #f 2)"), Value::Constant(ConstantIdio::False)));
        assert!(matches!(compile_and_run("(and 1 2 3)"), Value::Fixnum(3)));
    }

    #[test]
    fn or_short_circuits_on_the_first_true() {
        assert!(matches!(compile_and_run("(or #f 1 2)"), Value::Fixnum(1)));
        assert!(matches!(compile_and_run("(or #f #f)"), Value::Constant(ConstantIdio::False)));
    }

    #[test]
    fn escape_from_unwinds_to_the_matching_escaper() {
        let result = compile_and_run("(+ 1 (escape out (+ 2 (escape-from out 10) 99)))");
        assert!(matches!(result, Value::Fixnum(11)));
    }

    #[test]
    fn block_hoists_its_own_internal_defines() {
        let result = compile_and_run("(block (define a 1) (define b 2) (+ a b))");
        assert!(matches!(result, Value::Fixnum(3)));
    }

    #[test]
    fn dynamic_let_binds_for_the_duration_of_its_body() {
        let result = compile_and_run("(dynamic-let (d 7) (dynamic d))");
        assert!(matches!(result, Value::Fixnum(7)));
    }

    #[test]
    fn dynamic_let_unwinds_to_unbound_after_its_body() {
        let result = compile_and_run(
            "(dynamic-let (d 7) (dynamic d)) \
             (%trap ^rt-variable-unbound (function (c) 'gone) (dynamic d))",
        );
        assert!(matches!(result, Value::Symbol(_)));
    }

    #[test]
    fn computed_variable_calls_its_getter_and_setter() {
        let result = compile_and_run(
            "(define store 0) \
             (define (get) store) \
             (define (set v) (set! store v)) \
             (computed :$ (cons get set)) \
             (computed = 5) \
             computed",
        );
        assert!(matches!(result, Value::Fixnum(5)));
    }

    #[test]
    fn function_plus_binds_a_single_argument() {
        let result = compile_and_run("(function+ x 5 (* x x))");
        assert!(matches!(result, Value::Fixnum(25)));
    }

    #[test]
    fn function_name_compiles_like_a_plain_function() {
        let result = compile_and_run("((function/name loop (x) (* x 2)) 3)");
        assert!(matches!(result, Value::Fixnum(6)));
    }

    #[test]
    fn unused_modules_import_helper_keeps_clippy_quiet_about_the_type() {
        let _ = Modules::new();
    }
}
