//! `idio`: run a script, drop into a REPL, or replay a pre-compiled cache
//! file -- the thin binary over the `idio` library crate.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use clap_complete::{Shell, generate};
use idio::repl::ReplSession;
use idio::tracer::{NoopTracer, StderrTracer, VmTracer};
use idio::value::{ConstantIdio, Value};

#[derive(Parser, Debug)]
#[command(name = "idio", about = "Idio: a Scheme-family shell-oriented language")]
struct Args {
    /// Script to run. Omitted: start an interactive read-eval-print loop.
    file: Option<PathBuf>,

    /// Trace every VM opcode fetch and call to stderr.
    #[arg(long)]
    trace: bool,

    /// Ignore and don't write a pre-compilation cache for this run.
    #[arg(long)]
    no_cache: bool,

    /// Print a shell completion script for this binary and exit.
    #[arg(long, value_enum)]
    completions: Option<Shell>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Some(shell) = args.completions {
        let mut cmd = Args::command();
        let name = cmd.get_name().to_owned();
        generate(shell, &mut cmd, name, &mut io::stdout());
        return ExitCode::SUCCESS;
    }

    let mut noop = NoopTracer;
    let mut stderr_tracer = StderrTracer;
    let tracer: &mut dyn VmTracer = if args.trace { &mut stderr_tracer } else { &mut noop };

    match &args.file {
        Some(path) => run_file(path, args.no_cache, tracer),
        None => run_repl(tracer),
    }
}

/// `*idio-cache-dir*` (spec §6.5), read from the environment; falls back to
/// the system temp directory when unset rather than inventing a
/// configuration file.
fn cache_dir() -> PathBuf {
    std::env::var_os("IDIO_CACHE_DIR").map_or_else(std::env::temp_dir, PathBuf::from)
}

fn cache_path_for(source_path: &Path) -> PathBuf {
    let name = source_path.file_name().map_or_else(|| "script".into(), |n| n.to_string_lossy().into_owned());
    cache_dir().join(format!("{name}.cache"))
}

fn run_file(path: &Path, no_cache: bool, tracer: &mut dyn VmTracer) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("idio: cannot read {}: {err}", path.display());
            return ExitCode::FAILURE;
        }
    };

    let mut session = ReplSession::new(path.display().to_string());
    let cache_path = cache_path_for(path);

    if !no_cache
        && let Ok(value) = session.run_precompiled(&cache_path, Some(&source), tracer)
    {
        println!("{}", render(&session, &value));
        return ExitCode::SUCCESS;
    }

    match session.execute(&source, tracer) {
        Ok(value) => {
            if !no_cache
                && let Err(err) = session.save_cache(&cache_path, Some(&source))
            {
                eprintln!("idio: warning: could not write {}: {err}", cache_path.display());
            }
            println!("{}", render(&session, &value));
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("idio: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run_repl(tracer: &mut dyn VmTracer) -> ExitCode {
    let mut session = ReplSession::new("*repl*");
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    print!("idio> ");
    let _ = stdout.flush();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if !line.trim().is_empty() {
            match session.execute(&line, tracer) {
                Ok(value) => println!("{}", render(&session, &value)),
                Err(err) => eprintln!("idio: {err}"),
            }
        }
        print!("idio> ");
        let _ = stdout.flush();
    }
    println!();
    ExitCode::SUCCESS
}

/// A small read-syntax renderer for values the REPL/script runner prints
/// back, covering the same variants `precompile::value_to_datum` does:
/// heap values with no external read-syntax (closures, continuations, ...)
/// fall back to their `#<type-name>` tag.
fn render(session: &ReplSession, value: &Value) -> String {
    match value {
        Value::Fixnum(n) => n.to_string(),
        Value::Constant(c) => c.to_string(),
        Value::Symbol(s) => session.interns().symbol_name(*s),
        Value::Keyword(k) => format!(":{}", session.interns().keyword_name(*k)),
        Value::String(s) => format!("{:?}", s.borrow().as_str()),
        Value::Pair(_) => render_pair(session, value),
        other => format!("#<{}>", other.type_name()),
    }
}

fn render_pair(session: &ReplSession, value: &Value) -> String {
    let mut parts = Vec::new();
    let mut cur = value.clone();
    loop {
        match cur {
            Value::Constant(ConstantIdio::Nil) => break,
            Value::Pair(cell) => {
                let borrowed = cell.borrow();
                parts.push(render(session, &borrowed.car));
                let next = borrowed.cdr.clone();
                drop(borrowed);
                cur = next;
            }
            other => {
                parts.push(".".to_owned());
                parts.push(render(session, &other));
                break;
            }
        }
    }
    format!("({})", parts.join(" "))
}
