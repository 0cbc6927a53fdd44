//! VM observability.
//!
//! The teacher crate has no external logging dependency, instead routing
//! interpreter events through a `VmTracer`-style trait object; we follow
//! the same shape rather than reaching for `tracing`, since the events
//! here are VM-internal and the original C side toggles a single global
//! flag (`idio_vm_start_tracing`/`idio_vm_stop_tracing`) rather than
//! structured spans.

use crate::condition::ConditionType;
use crate::value::Value;

/// One observable VM event (spec §4.4/§4.5/§5): opcode dispatch, a call
/// crossing into a closure/primitive, a trap firing, or the expander
/// re-entering the VM to run a template.
#[derive(Debug, Clone)]
pub enum TraceEvent<'a> {
    Fetch { pc: usize, opcode: u8 },
    Call { callee: &'a Value, nargs: usize },
    Return { pc: usize },
    TrapRaise { condition: ConditionType, message: &'a str },
    ExpanderEnter { template: &'a Value },
    ExpanderExit,
}

/// Sink for [`TraceEvent`]s. Implementations decide what, if anything, to
/// do with each event.
pub trait VmTracer {
    fn trace(&mut self, event: &TraceEvent<'_>);
}

/// The default: tracing off, zero overhead.
#[derive(Debug, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {
    fn trace(&mut self, _event: &TraceEvent<'_>) {}
}

/// Writes a one-line rendering of every event to stderr -- the Rust
/// equivalent of the original `idio_vm_start_tracing` toggle.
#[derive(Debug, Default)]
pub struct StderrTracer;

impl VmTracer for StderrTracer {
    fn trace(&mut self, event: &TraceEvent<'_>) {
        match event {
            TraceEvent::Fetch { pc, opcode } => eprintln!("fetch  pc={pc:06} op={opcode:#04x}"),
            TraceEvent::Call { callee, nargs } => {
                eprintln!("call   {}({} args)", callee.type_name(), nargs);
            }
            TraceEvent::Return { pc } => eprintln!("return pc={pc:06}"),
            TraceEvent::TrapRaise { condition, message } => {
                eprintln!("trap   {condition} {message}");
            }
            TraceEvent::ExpanderEnter { template } => {
                eprintln!("expand enter {}", template.type_name());
            }
            TraceEvent::ExpanderExit => eprintln!("expand exit"),
        }
    }
}

/// Records events in memory instead of printing them, for tests that want
/// to assert on VM behaviour without scraping stderr.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    pub fetches: Vec<(usize, u8)>,
    pub calls: usize,
    pub traps: Vec<ConditionType>,
}

impl VmTracer for RecordingTracer {
    fn trace(&mut self, event: &TraceEvent<'_>) {
        match event {
            TraceEvent::Fetch { pc, opcode } => self.fetches.push((*pc, *opcode)),
            TraceEvent::Call { .. } => self.calls += 1,
            TraceEvent::TrapRaise { condition, .. } => self.traps.push(*condition),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_tracer_counts_calls_and_traps() {
        let mut tracer = RecordingTracer::default();
        tracer.trace(&TraceEvent::Fetch { pc: 0, opcode: 1 });
        tracer.trace(&TraceEvent::Call {
            callee: &Value::Fixnum(0),
            nargs: 2,
        });
        tracer.trace(&TraceEvent::TrapRaise {
            condition: ConditionType::RtVariableUnbound,
            message: "x",
        });
        assert_eq!(tracer.fetches, vec![(0, 1)]);
        assert_eq!(tracer.calls, 1);
        assert_eq!(tracer.traps, vec![ConditionType::RtVariableUnbound]);
    }
}
