//! A persistent REPL/script-running session (spec's ambient "external
//! interfaces" surface, §6.5).
//!
//! `ReplSession` keeps one [`Runtime`], one compile-time [`Compiler`], and
//! one [`Thread`] alive across successive [`ReplSession::execute`] calls,
//! so a `define` in one line is visible to the next -- the same shape as
//! the teacher's `ouros::repl::ReplSession`, with the async/proxy/future
//! machinery dropped: Idio's VM is single-threaded and never yields to a
//! host (spec §5), so there is nothing here to pause and resume.

use crate::condition::RunResult;
use crate::evaluator::{self, Compiler};
use crate::evaluator::scope::LexEnv;
use crate::intern::Interns;
use crate::module::ModuleId;
use crate::reader::Reader;
use crate::runtime::Runtime;
use crate::thread::Thread;
use crate::tracer::VmTracer;
use crate::value::Value;
use crate::xenv::XenvId;

/// A session that reads, compiles, and runs successive top-level forms
/// against accumulated runtime state.
///
/// All forms a session ever reads land in the same xenv, one after the
/// other in `bc`: a REPL is just a script whose source arrives one
/// top-level form at a time (spec §4.6's xenv-growth model makes no
/// distinction between the two).
pub struct ReplSession {
    runtime: Runtime,
    compiler: Compiler,
    module: ModuleId,
    xi: XenvId,
    thread: Thread,
    source_name: String,
}

impl ReplSession {
    /// Creates a session with a fresh [`Runtime`] (bootstrap xenv, root
    /// module, every built-in primitive already bound) and a scratch xenv
    /// to compile into.
    #[must_use]
    pub fn new(source_name: impl Into<String>) -> Self {
        let mut runtime = Runtime::new();
        evaluator::bootstrap_primitives(&mut runtime);
        let compiler = Compiler::new(&runtime.interns);
        let module = runtime.root_module;
        let xi = runtime.new_xenv("repl");
        let thread = Thread::new(xi, module);
        Self {
            runtime,
            compiler,
            module,
            xi,
            thread,
            source_name: source_name.into(),
        }
    }

    #[must_use]
    pub fn interns(&self) -> &Interns {
        &self.runtime.interns
    }

    #[must_use]
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    #[must_use]
    pub fn xi(&self) -> XenvId {
        self.xi
    }

    #[must_use]
    pub fn entry_pc(&self) -> usize {
        self.runtime.xenv(self.xi).bc.len()
    }

    /// Reads every form in `source`, compiling and running each in turn,
    /// and returns the value of the last one. Compiling and running happen
    /// form-by-form (rather than compile-all-then-run-all) so that `(define
    /// x 1) (+ x 1)` on one line sees `x` already bound for the second form,
    /// matching top-level `read-eval-print` order (spec §4.1).
    ///
    /// # Errors
    ///
    /// Returns the reader's or compiler's or the VM's [`RunError`] as soon
    /// as one form fails; forms before the failure keep whatever state they
    /// already committed to the runtime.
    ///
    /// [`RunError`]: crate::condition::RunError
    pub fn execute(&mut self, source: &str, tracer: &mut dyn VmTracer) -> RunResult<Value> {
        let forms = {
            let mut reader = Reader::new(source, &self.source_name, &self.runtime.interns);
            let mut items = Vec::new();
            while let Some(item) = reader.read()? {
                items.push(item);
            }
            items
        };
        let mut last = Value::nil();
        for (form, loc) in forms {
            last = self.eval_one(&form, Some(loc), tracer)?;
        }
        Ok(last)
    }

    /// Compiles and runs a single already-parsed form, for callers (tests,
    /// the pre-compilation loader) that already have a [`Value`] in hand
    /// rather than source text.
    pub fn eval_one(&mut self, form: &Value, loc: Option<crate::loc::SourceLoc>, tracer: &mut dyn VmTracer) -> RunResult<Value> {
        let start_pc = self.runtime.xenv(self.xi).bc.len();
        self.runtime.xenv_mut(self.xi).extend_src_exprs(form.clone(), loc);

        let lex = LexEnv::new();
        let mut ir = evaluator::meaning(
            &mut self.runtime,
            &mut self.thread,
            tracer,
            &mut self.compiler,
            self.xi,
            self.module,
            &lex,
            form,
            false,
        )?;
        ir.push(crate::evaluator::ir::Ir::Finish);
        for node in &ir.0 {
            crate::codegen::emit(self.runtime.xenv_mut(self.xi), node);
        }

        self.thread.pc = start_pc;
        let stop_depth = self.thread.return_stack_len();
        crate::vm::run_from(&mut self.runtime, &mut self.thread, tracer, stop_depth)
    }

    /// Loads a pre-compilation cache file (spec §4.7) into a fresh xenv of
    /// this session and runs it from its recorded entry pc, on a fresh
    /// thread so the cached xenv's bytecode offsets are unambiguous.
    ///
    /// # Errors
    ///
    /// Returns an `^evaluation-error` condition if the cache file is
    /// missing, malformed, or fails validation (wrong commit strings,
    /// checksum mismatch, inconsistent sizes) -- spec §4.7's "did not load"
    /// outcome, reported here as the session's own error type rather than a
    /// silent `None` so a CLI caller has something to print.
    pub fn run_precompiled(
        &mut self, path: &std::path::Path, expected_source: Option<&str>, tracer: &mut dyn VmTracer,
    ) -> RunResult<Value> {
        use crate::condition::{ConditionType, RunError};

        let id = self.runtime.new_xenv("precompiled");
        let Some(loaded) = crate::precompile::try_load_cache(path, &mut self.runtime, id, self.module, expected_source) else {
            return Err(RunError::new(ConditionType::EvaluationError, format!("cache file did not load: {}", path.display())));
        };
        *self.runtime.xenv_mut(id) = loaded.xenv;
        let mut thread = Thread::new(id, self.module);
        thread.pc = loaded.entry_pc;
        crate::vm::run(&mut self.runtime, &mut thread, tracer)
    }

    /// Writes the session's accumulated top-level xenv to `path` as a
    /// pre-compilation cache file, entered at pc 0 -- a fresh `run_precompiled`
    /// of the cache replays every top-level form this session has compiled
    /// so far, the same order `execute` ran them in the first place.
    ///
    /// # Errors
    ///
    /// Propagates the writer's I/O errors.
    pub fn save_cache(&self, path: &std::path::Path, source: Option<&str>) -> std::io::Result<()> {
        let xenv = self.runtime.xenv(self.xi);
        crate::precompile::write_cache(path, &self.runtime.interns, xenv, 0, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::NoopTracer;

    #[test]
    fn definitions_persist_across_execute_calls() {
        let mut session = ReplSession::new("<test>");
        let mut tracer = NoopTracer;
        session.execute("(define x 40)", &mut tracer).unwrap();
        let result = session.execute("(+ x 2)", &mut tracer).unwrap();
        assert!(matches!(result, Value::Fixnum(42)));
    }

    #[test]
    fn one_line_can_reference_its_own_earlier_definition() {
        let mut session = ReplSession::new("<test>");
        let mut tracer = NoopTracer;
        let result = session.execute("(define y 10) (* y y)", &mut tracer).unwrap();
        assert!(matches!(result, Value::Fixnum(100)));
    }

    #[test]
    fn lambda_and_application_span_multiple_lines() {
        let mut session = ReplSession::new("<test>");
        let mut tracer = NoopTracer;
        session.execute("(define (square n) (* n n))", &mut tracer).unwrap();
        let result = session.execute("(square 9)", &mut tracer).unwrap();
        assert!(matches!(result, Value::Fixnum(81)));
    }

    #[test]
    fn save_then_run_precompiled_replays_the_same_forms() {
        let mut session = ReplSession::new("<test>");
        let mut tracer = NoopTracer;
        let source = "(define (square n) (* n n)) (square 6)";
        session.execute(source, &mut tracer).unwrap();

        let dir = std::env::temp_dir();
        let path = dir.join(format!("idio-repl-test-{:x}.cache", std::process::id()));
        session.save_cache(&path, Some(source)).unwrap();

        let mut fresh = ReplSession::new("<test>");
        let result = fresh.run_precompiled(&path, Some(source), &mut tracer).unwrap();
        assert!(matches!(result, Value::Fixnum(36)));

        let _ = std::fs::remove_file(&path);
    }
}
