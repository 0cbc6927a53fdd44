//! End-to-end tests driving `ReplSession` the way a script runner or REPL
//! would: source text in, a final [`Value`] out, against a shared evaluator
//! + VM rather than any single module in isolation.

use idio::Value;
use idio::repl::ReplSession;
use idio::tracer::NoopTracer;
use idio::value::ConstantIdio;

/// A primitive call through the PRIMCALL fast path.
#[test]
fn primitive_arithmetic() {
    let mut session = ReplSession::new("<test>");
    let mut tracer = NoopTracer;
    let result = session.execute("(+ 1 2)", &mut tracer).unwrap();
    assert!(matches!(result, Value::Fixnum(3)));
}

/// `define-template` registers a macro whose body runs at compile time and
/// splices its returned form in place of the call.
#[test]
fn template_expansion_rewrites_the_call_site() {
    let mut session = ReplSession::new("<test>");
    let mut tracer = NoopTracer;
    session
        .execute(
            "(define-template my-if (function (c t e) (list 'cond (list c t) (list 'else e))))",
            &mut tracer,
        )
        .unwrap();
    let result = session.execute("(my-if #t 1 2)", &mut tracer).unwrap();
    assert!(matches!(result, Value::Fixnum(1)));
}

/// Recursive `define`d closures call back into themselves through the same
/// toplevel binding a sibling reference would use.
#[test]
fn recursive_closure_computes_factorial() {
    let mut session = ReplSession::new("<test>");
    let mut tracer = NoopTracer;
    session
        .execute("(define (fact n) (if (<= n 1) 1 (* n (fact (- n 1)))))", &mut tracer)
        .unwrap();
    let result = session.execute("(fact 5)", &mut tracer).unwrap();
    assert!(matches!(result, Value::Fixnum(120)));
}

/// `define-infix-operator` rewrites `(lhs op rhs)` into an ordinary call to
/// the registered handler, with `lhs`/`rhs` evaluated as normal arguments.
#[test]
fn infix_operator_desugars_to_a_handler_call() {
    let mut session = ReplSession::new("<test>");
    let mut tracer = NoopTracer;
    session.execute("(define (add2 a b) (+ a b))", &mut tracer).unwrap();
    session.execute("(define-infix-operator ++ 500 add2)", &mut tracer).unwrap();
    let result = session.execute("(1 ++ 2)", &mut tracer).unwrap();
    assert!(matches!(result, Value::Fixnum(3)));
}

/// A `%trap` around a form that references an unbound name catches the
/// `^rt-variable-unbound` condition: the handler runs in place of the
/// unbound reference and its return value becomes the value of that
/// reference, so the body's own value is whatever the handler returned.
#[test]
fn trap_catches_unbound_variable_reference() {
    let mut session = ReplSession::new("<test>");
    let mut tracer = NoopTracer;
    let result = session
        .execute("(%trap ^rt-variable-unbound (function (c) 'caught) undefined-name)", &mut tracer)
        .unwrap();
    match result {
        Value::Symbol(s) => assert_eq!(session.interns().symbol_name(s), "caught"),
        other => panic!("expected the symbol 'caught, got {other:?}"),
    }
}

/// Without a `%trap` in scope, referencing an unbound name is a propagated
/// `^rt-variable-unbound` error rather than a silently-returned value.
#[test]
fn unbound_variable_reference_without_a_trap_is_an_error() {
    let mut session = ReplSession::new("<test>");
    let mut tracer = NoopTracer;
    let err = session.execute("(+ 1 undefined-name)", &mut tracer).unwrap_err();
    assert_eq!(err.condition, idio::ConditionType::RtVariableUnbound);
}

/// `dynamic-let` rebinds a dynamic variable for the extent of its body; the
/// body sees the new value through a plain symbol reference.
#[test]
fn dynamic_let_binds_for_its_extent() {
    let mut session = ReplSession::new("<test>");
    let mut tracer = NoopTracer;
    let result = session.execute("(dynamic-let (D 7) D)", &mut tracer).unwrap();
    assert!(matches!(result, Value::Fixnum(7)));
}

/// Once a `dynamic-let` body has returned, its binding's slot holds the
/// placeholder it started from again, so referencing the name afterward
/// raises the same `^rt-variable-unbound` condition an unbound toplevel
/// reference would.
#[test]
fn dynamic_let_binding_is_unbound_again_after_its_extent() {
    let mut session = ReplSession::new("<test>");
    let mut tracer = NoopTracer;
    session.execute("(dynamic-let (D 7) D)", &mut tracer).unwrap();
    let err = session.execute("D", &mut tracer).unwrap_err();
    assert_eq!(err.condition, idio::ConditionType::RtVariableUnbound);
}

/// `begin` sequences several forms and yields the value of the last one.
#[test]
fn begin_sequences_forms_and_returns_the_last_value() {
    let mut session = ReplSession::new("<test>");
    let mut tracer = NoopTracer;
    let result = session.execute("(begin 1 2 3)", &mut tracer).unwrap();
    assert!(matches!(result, Value::Fixnum(3)));
}

/// `set!` mutates an existing toplevel binding in place; later references
/// see the new value, not the one it was `define`d with.
#[test]
fn set_bang_mutates_an_existing_binding() {
    let mut session = ReplSession::new("<test>");
    let mut tracer = NoopTracer;
    session.execute("(define counter 1)", &mut tracer).unwrap();
    session.execute("(set! counter (+ counter 1))", &mut tracer).unwrap();
    let result = session.execute("counter", &mut tracer).unwrap();
    assert!(matches!(result, Value::Fixnum(2)));
}

/// Two closures built from the same `function` form but in different calls
/// to `(define ...)` are distinct values that close over their own frames.
#[test]
fn closures_close_over_their_own_arguments() {
    let mut session = ReplSession::new("<test>");
    let mut tracer = NoopTracer;
    session.execute("(define (adder n) (function (x) (+ x n)))", &mut tracer).unwrap();
    session.execute("(define add5 (adder 5))", &mut tracer).unwrap();
    session.execute("(define add10 (adder 10))", &mut tracer).unwrap();
    let five = session.execute("(add5 1)", &mut tracer).unwrap();
    let ten = session.execute("(add10 1)", &mut tracer).unwrap();
    assert!(matches!(five, Value::Fixnum(6)));
    assert!(matches!(ten, Value::Fixnum(11)));
}

/// A cache file written by one session and loaded by a fresh one replays
/// the same top-level forms and reaches the same answer (spec's
/// pre-compilation round-trip property).
#[test]
fn precompiled_cache_round_trips_across_sessions() {
    let mut session = ReplSession::new("<test>");
    let mut tracer = NoopTracer;
    let source = "(define (twice x) (* x 2)) (twice 21)";
    session.execute(source, &mut tracer).unwrap();

    let dir = std::env::temp_dir();
    let path = dir.join(format!("idio-e2e-test-{:x}.cache", std::process::id()));
    session.save_cache(&path, Some(source)).unwrap();

    let mut fresh = ReplSession::new("<test>");
    let result = fresh.run_precompiled(&path, Some(source), &mut tracer).unwrap();
    assert!(matches!(result, Value::Fixnum(42)));

    let _ = std::fs::remove_file(&path);
}

/// `quote` returns its argument unevaluated, including nested pairs.
#[test]
fn quote_returns_its_argument_unevaluated() {
    let mut session = ReplSession::new("<test>");
    let mut tracer = NoopTracer;
    let result = session.execute("(quote (a b c))", &mut tracer).unwrap();
    match result {
        Value::Pair(_) => {}
        Value::Constant(ConstantIdio::Nil) => panic!("expected a 3-element list, got nil"),
        other => panic!("expected a pair, got {other:?}"),
    }
}
