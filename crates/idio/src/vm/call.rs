//! The call/return protocol (spec §4.4, §4.5): building a frame from
//! `ALLOCATE_FRAME`/`POP_FRAME`, then either linking it as a closure's new
//! activation record (`FUNCTION_INVOKE`/`FUNCTION_GOTO`) or reading it
//! straight back out as a primitive's argument list.

use crate::condition::{ConditionType, RunError, RunResult};
use crate::frame::Frame;
use crate::heap::Gc;
use crate::runtime::Runtime;
use crate::thread::Thread;
use crate::tracer::{TraceEvent, VmTracer};
use crate::value::Value;
use crate::vm::{Closure, PrimitiveCtx};

/// `FUNCTION_INVOKE`/`FUNCTION_GOTO`'s shared body: dispatches on
/// `thread.func`'s kind. `tail` selects whether a return address is pushed
/// (`Invoke`) or the caller's existing one is reused (`Goto`, spec §4.5
/// "tail calls are constant-stack").
pub fn invoke(runtime: &mut Runtime, thread: &mut Thread, tracer: &mut dyn VmTracer, tail: bool) -> RunResult<()> {
    let frame = thread.take_pending_frame();
    match thread.func.clone() {
        Value::Closure(closure) => {
            let nargs = frame.borrow().len();
            tracer.trace(&TraceEvent::Call {
                callee: &Value::Closure(closure.clone()),
                nargs,
            });
            check_arity(&closure, nargs)?;
            if !tail {
                thread.push_return(thread.xi, thread.pc, thread.frame.clone());
            }
            let c = closure.borrow();
            frame.borrow_mut().parent = c.frame.clone();
            thread.xi = c.xi;
            thread.pc = c.entry_pc;
            drop(c);
            thread.frame = Some(frame);
            Ok(())
        }
        Value::Primitive(id) => {
            let args = Frame::slots_as_vec(&frame);
            tracer.trace(&TraceEvent::Call {
                callee: &Value::Primitive(id),
                nargs: args.len(),
            });
            let func = runtime.primitives.get(id).func.clone();
            let mut ctx = PrimitiveCtx { runtime, thread, tracer };
            let result = func(&mut ctx, &args)?;
            thread.val = result;
            Ok(())
        }
        Value::Continuation(cont) => {
            let value = Frame::slots_as_vec(&frame).into_iter().next().unwrap_or_else(Value::nil);
            let tag = cont.borrow().tag;
            Err(RunError::continuation_invoke(tag, value))
        }
        other => Err(RunError::new(
            ConditionType::EvaluationError,
            format!("{} is not callable", other.type_name()),
        )),
    }
}

fn check_arity(closure: &Gc<Closure>, nargs: usize) -> RunResult<()> {
    let c = closure.borrow();
    let ok = if c.dotted {
        nargs >= c.nparams as usize
    } else {
        nargs == c.nparams as usize
    };
    if ok {
        Ok(())
    } else {
        Err(RunError::new(
            ConditionType::StFunctionArityError,
            format!("expected {} argument(s), got {nargs}", c.nparams),
        ))
    }
}

/// Calls an arbitrary callable value synchronously and returns its result,
/// used by trap-handler dispatch and by `call/cc`'s invocation of its
/// thunk (spec §4.5). Recurses into [`crate::vm::run_from`] for closures so
/// the nested call gets its own slice of the fetch-dispatch loop, bounded
/// by the return-stack depth captured before the call.
pub fn call_value(
    runtime: &mut Runtime,
    thread: &mut Thread,
    tracer: &mut dyn VmTracer,
    callee: &Value,
    args: Vec<Value>,
) -> RunResult<Value> {
    match callee {
        Value::Primitive(id) => {
            let func = runtime.primitives.get(*id).func.clone();
            let mut ctx = PrimitiveCtx { runtime, thread, tracer };
            func(&mut ctx, &args)
        }
        Value::Closure(closure) => {
            check_arity(closure, args.len())?;
            let saved_xi = thread.xi;
            let saved_pc = thread.pc;
            let saved_frame = thread.frame.clone();
            let stop_depth = thread.return_stack_len();
            let c = closure.borrow();
            let frame = Gc::new(Frame::new(c.frame.clone(), args.len()));
            for (i, a) in args.into_iter().enumerate() {
                Frame::set_local(&frame, i, a);
            }
            thread.push_return(saved_xi, saved_pc, saved_frame);
            thread.xi = c.xi;
            thread.pc = c.entry_pc;
            drop(c);
            thread.frame = Some(frame);
            crate::vm::run_from(runtime, thread, tracer, stop_depth)
        }
        Value::Continuation(cont) => {
            let value = args.into_iter().next().unwrap_or_else(Value::nil);
            Err(RunError::continuation_invoke(cont.borrow().tag, value))
        }
        other => Err(RunError::new(
            ConditionType::EvaluationError,
            format!("{} is not callable", other.type_name()),
        )),
    }
}
