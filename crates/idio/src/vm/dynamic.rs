//! `dynamic-let`/`environ-let` push/pop (spec §4.5): shadow a toplevel
//! value-table slot for the dynamic extent of a body, restoring the prior
//! value on exit even across a non-local exit (the VM truncates
//! `dynamic_bindings`/`environ_bindings` alongside the operand stack when
//! an escape point is restored).

use crate::runtime::Runtime;
use crate::symbol_info::SymbolTableIndex;
use crate::thread::{DynamicBinding, Thread};

pub fn push_dynamic(runtime: &mut Runtime, thread: &mut Thread, si: SymbolTableIndex) {
    let vi = runtime.xenv(thread.xi).vt_get(si);
    let new_value = thread.pop();
    let saved = runtime.value(vi).clone();
    runtime.set_value(vi, new_value);
    thread.push_dynamic(DynamicBinding { vi, saved });
}

pub fn pop_dynamic(runtime: &mut Runtime, thread: &mut Thread) {
    if let Some(binding) = thread.pop_dynamic() {
        runtime.set_value(binding.vi, binding.saved);
    }
}

pub fn push_environ(runtime: &mut Runtime, thread: &mut Thread, si: SymbolTableIndex) {
    let vi = runtime.xenv(thread.xi).vt_get(si);
    let new_value = thread.pop();
    let saved = runtime.value(vi).clone();
    runtime.set_value(vi, new_value);
    thread.push_environ(DynamicBinding { vi, saved });
}

pub fn pop_environ(runtime: &mut Runtime, thread: &mut Thread) {
    if let Some(binding) = thread.pop_environ() {
        runtime.set_value(binding.vi, binding.saved);
    }
}
