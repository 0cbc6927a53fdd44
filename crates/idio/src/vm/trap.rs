//! Trap install and raise (spec §4.5, §7, §8 scenario 4): `PUSH_ITRAP`
//! installs a handler for one condition type; raising a condition searches
//! innermost-out for a match and calls the handler with the call
//! convention any other procedure uses.

use crate::condition::{ConditionType, RunError, RunResult};
use crate::heap::Gc;
use crate::runtime::Runtime;
use crate::thread::{Thread, TrapHandler};
use crate::tracer::{TraceEvent, VmTracer};
use crate::value::{IdioString, Value};
use crate::vm::call::call_value;

pub fn push_trap(runtime: &Runtime, thread: &mut Thread, condition: ConditionType, si: crate::symbol_info::SymbolTableIndex) {
    let vi = runtime.xenv(thread.xi).vt_get(si);
    let handler = runtime.value(vi).clone();
    thread.push_trap(TrapHandler { condition, handler });
}

pub fn pop_trap(thread: &mut Thread) {
    thread.pop_trap();
}

/// Raises `condition`: finds the innermost matching trap and calls its
/// handler with one argument (the message, as a string -- condition
/// objects proper are out of scope per spec §1). No matching trap
/// propagates as an ordinary `Err` up through the caller's `?` chain.
pub fn raise(
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
    condition: ConditionType,
    message: &str,
) -> RunResult<Value> {
    let Some(trap) = thread.unwind_to_trap(condition) else {
        return Err(RunError::new(condition, message.to_owned()));
    };
    tracer.trace(&TraceEvent::TrapRaise { condition, message });
    let arg = Value::String(Gc::new(IdioString::whole(message.to_owned())));
    call_value(runtime, thread, tracer, &trap.handler, vec![arg])
}
