//! Idio: a Scheme-family shell-oriented language.
//!
//! This crate is the evaluator/compiler/VM core: reading s-expressions,
//! compiling them to bytecode against a growing symbol/constant/value
//! table set (an "xenv", spec §3.4), and running that bytecode on a
//! stack machine. [`repl::ReplSession`] ties the pieces together into a
//! persistent session a REPL or script runner can drive one top-level
//! form at a time.

pub mod codegen;
pub mod condition;
pub mod evaluator;
pub mod frame;
pub mod heap;
pub mod idio_hash;
pub mod intern;
pub mod loc;
pub mod module;
pub mod operator;
pub mod precompile;
pub mod reader;
pub mod repl;
pub mod resource;
pub mod runtime;
pub mod signal;
pub mod symbol_info;
pub mod template;
pub mod thread;
pub mod tracer;
pub mod value;
pub mod vm;
pub mod vtable;
pub mod xenv;

pub use crate::{
    condition::{ConditionType, RunError, RunResult},
    repl::ReplSession,
    runtime::Runtime,
    thread::Thread,
    value::Value,
};
