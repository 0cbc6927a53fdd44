//! The VM register file: one [`Thread`] per Idio thread of control
//! (spec §3.5).

use crate::frame::Frame;
use crate::heap::Gc;
use crate::intern::SymbolId;
use crate::module::ModuleId;
use crate::value::Value;
use crate::xenv::XenvId;

/// A single dynamic-wind entry: the before/after thunks run when control
/// passes through this point (spec §3.5, §4.5).
#[derive(Debug, Clone)]
pub struct WindPoint {
    pub before: Value,
    pub after: Value,
}

/// A saved escape point: the stack/frame/handler depth a continuation or
/// abort frame restores to when invoked (spec §4.5).
#[derive(Debug, Clone)]
pub struct EscapePoint {
    pub stack_depth: usize,
    pub frame: Option<Gc<Frame>>,
    pub wind_depth: usize,
    pub trap_depth: usize,
}

/// One dynamic/environ binding pushed by `dynamic-let`/`environ-let`
/// (spec §3.5, §4.5): the value-table slot this shadows and the value to
/// restore on exit.
#[derive(Debug, Clone)]
pub struct DynamicBinding {
    pub vi: crate::symbol_info::ValueIndex,
    pub saved: Value,
}

/// An installed trap: the condition type it catches and the handler closure,
/// innermost-last so the VM searches from the end (spec §4.5, §8 scenario 4).
#[derive(Debug, Clone)]
pub struct TrapHandler {
    pub condition: crate::condition::ConditionType,
    pub handler: Value,
}

/// A record pushed by `push-escaper` (spec §4.5): the label `escape-from`
/// matches against, the register-file snapshot to restore, and where to
/// resume once the escape fires (the xenv/pc just after the escaper's
/// body, and the return-stack depth at push time).
#[derive(Debug, Clone)]
pub struct EscaperRecord {
    pub label: SymbolId,
    pub point: EscapePoint,
    pub xi: XenvId,
    pub resume_pc: usize,
    pub return_depth: usize,
}

/// The full VM register file for one thread of control (spec §3.5): current
/// xenv, program counter, value/func/env registers, the frame chain, the
/// operand stack, and the side stacks (dynamic-wind, traps, dynamic
/// bindings) that give call/return and non-local exit their state.
#[derive(Debug)]
pub struct Thread {
    pub xi: XenvId,
    pub pc: usize,
    pub stack: Vec<Value>,
    pub val: Value,
    pub func: Value,
    pub frame: Option<Gc<Frame>>,
    pub module: ModuleId,
    pub reg1: Value,
    pub reg2: Value,
    pub expr: Value,
    winds: Vec<WindPoint>,
    traps: Vec<TrapHandler>,
    dynamic_bindings: Vec<DynamicBinding>,
    environ_bindings: Vec<DynamicBinding>,
    escapes: Vec<EscaperRecord>,
    /// `FUNCTION_INVOKE`'s return address stack: `(xi, pc, frame)` to
    /// resume in once `RETURN` fires. `FUNCTION_GOTO` (tail calls) never
    /// pushes here, which is what makes tail calls constant-stack
    /// (spec §4.5, §8 scenario 3).
    return_stack: Vec<(XenvId, usize, Option<Gc<Frame>>)>,
    /// The frame under construction between `ALLOCATE_FRAME` and
    /// `FUNCTION_INVOKE`/`FUNCTION_GOTO` (spec §4.4's call sequence).
    pending_frame: Option<Gc<Frame>>,
}

impl Thread {
    #[must_use]
    pub fn new(xi: XenvId, module: ModuleId) -> Self {
        Self {
            xi,
            pc: 0,
            stack: Vec::new(),
            val: Value::nil(),
            func: Value::nil(),
            frame: None,
            module,
            reg1: Value::nil(),
            reg2: Value::nil(),
            expr: Value::nil(),
            winds: Vec::new(),
            traps: Vec::new(),
            dynamic_bindings: Vec::new(),
            environ_bindings: Vec::new(),
            escapes: Vec::new(),
            return_stack: Vec::new(),
            pending_frame: None,
        }
    }

    pub fn allocate_pending_frame(&mut self, slot_count: usize) {
        self.pending_frame = Some(Gc::new(Frame::new(None, slot_count)));
    }

    pub fn set_pending_frame_slot(&mut self, index: usize, value: Value) {
        let frame = self.pending_frame.as_ref().expect("no frame under construction");
        Frame::set_local(frame, index, value);
    }

    pub fn take_pending_frame(&mut self) -> Gc<Frame> {
        self.pending_frame.take().expect("no frame under construction")
    }

    #[must_use]
    pub fn pending_frame_len(&self) -> usize {
        self.pending_frame.as_ref().map_or(0, |f| f.borrow().len())
    }

    pub fn push_return(&mut self, xi: XenvId, pc: usize, frame: Option<Gc<Frame>>) {
        self.return_stack.push((xi, pc, frame));
    }

    pub fn pop_return(&mut self) -> Option<(XenvId, usize, Option<Gc<Frame>>)> {
        self.return_stack.pop()
    }

    #[must_use]
    pub fn return_stack_len(&self) -> usize {
        self.return_stack.len()
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    pub fn push_wind(&mut self, point: WindPoint) {
        self.winds.push(point);
    }

    pub fn pop_wind(&mut self) -> Option<WindPoint> {
        self.winds.pop()
    }

    #[must_use]
    pub fn wind_depth(&self) -> usize {
        self.winds.len()
    }

    /// Unwinds (running `after` thunks are the VM's job, not this register
    /// file's) down to `target` depth, used when a continuation or escaper
    /// jumps across dynamic-wind boundaries.
    pub fn winds_above(&self, target: usize) -> &[WindPoint] {
        &self.winds[target..]
    }

    pub fn push_trap(&mut self, trap: TrapHandler) {
        self.traps.push(trap);
    }

    pub fn pop_trap(&mut self) -> Option<TrapHandler> {
        self.traps.pop()
    }

    /// Finds the innermost trap whose condition type matches, searching
    /// from the end of the stack inward (spec §4.5, §8 scenario 4).
    #[must_use]
    pub fn find_trap(&self, condition: crate::condition::ConditionType) -> Option<&TrapHandler> {
        self.traps.iter().rev().find(|t| t.condition == condition)
    }

    /// Pops the innermost trap matching `condition` along with every trap
    /// installed after it, returning the matched record -- "the handler
    /// runs with the trap record popped" (spec §7), so a handler that
    /// raises the same condition again propagates outward instead of
    /// re-entering itself.
    pub fn unwind_to_trap(&mut self, condition: crate::condition::ConditionType) -> Option<TrapHandler> {
        let index = self.traps.iter().rposition(|t| t.condition == condition)?;
        let trap = self.traps[index].clone();
        self.traps.truncate(index);
        Some(trap)
    }

    #[must_use]
    pub fn trap_depth(&self) -> usize {
        self.traps.len()
    }

    pub fn push_dynamic(&mut self, binding: DynamicBinding) {
        self.dynamic_bindings.push(binding);
    }

    pub fn pop_dynamic(&mut self) -> Option<DynamicBinding> {
        self.dynamic_bindings.pop()
    }

    pub fn push_environ(&mut self, binding: DynamicBinding) {
        self.environ_bindings.push(binding);
    }

    pub fn pop_environ(&mut self) -> Option<DynamicBinding> {
        self.environ_bindings.pop()
    }

    pub fn push_escaper(&mut self, record: EscaperRecord) {
        self.escapes.push(record);
    }

    pub fn pop_escaper(&mut self) -> Option<EscaperRecord> {
        self.escapes.pop()
    }

    /// Finds the innermost escaper matching `label`, searching from the end
    /// (spec §4.5 "push-escaper label body"/"escape-from label expr").
    #[must_use]
    pub fn find_escaper(&self, label: SymbolId) -> Option<&EscaperRecord> {
        self.escapes.iter().rev().find(|e| e.label == label)
    }

    /// Pops the innermost escaper matching `label` along with every escaper
    /// pushed after it, returning the matched record -- `escape-from` jumps
    /// out through any escapers nested inside the one it targets.
    pub fn unwind_to_escaper(&mut self, label: SymbolId) -> Option<EscaperRecord> {
        let index = self.escapes.iter().rposition(|e| e.label == label)?;
        let record = self.escapes[index].clone();
        self.escapes.truncate(index);
        Some(record)
    }

    pub fn truncate_return_stack(&mut self, depth: usize) {
        self.return_stack.truncate(depth);
    }

    /// Captures enough of the register file to build a continuation's
    /// restore point (spec §4.5).
    #[must_use]
    pub fn capture_escape_point(&self) -> EscapePoint {
        EscapePoint {
            stack_depth: self.stack.len(),
            frame: self.frame.clone(),
            wind_depth: self.winds.len(),
            trap_depth: self.traps.len(),
        }
    }

    /// Restores the register file to a previously captured escape point,
    /// truncating the operand stack and trap/wind stacks to match. The
    /// caller is responsible for running the appropriate `after` thunks
    /// for any wind points being left (spec §4.5).
    pub fn restore_escape_point(&mut self, point: &EscapePoint) {
        self.stack.truncate(point.stack_depth);
        self.frame = point.frame.clone();
        self.winds.truncate(point.wind_depth);
        self.traps.truncate(point.trap_depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::ConditionType;

    #[test]
    fn find_trap_picks_innermost_match() {
        let mut thread = Thread::new(XenvId::BOOTSTRAP, ModuleId::default());
        thread.push_trap(TrapHandler {
            condition: ConditionType::RtVariableUnbound,
            handler: Value::Fixnum(1),
        });
        thread.push_trap(TrapHandler {
            condition: ConditionType::RtVariableUnbound,
            handler: Value::Fixnum(2),
        });
        let found = thread.find_trap(ConditionType::RtVariableUnbound).unwrap();
        assert!(matches!(found.handler, Value::Fixnum(2)));
    }

    #[test]
    fn escape_point_round_trip_truncates_stack() {
        let mut thread = Thread::new(XenvId::BOOTSTRAP, ModuleId::default());
        thread.push(Value::Fixnum(1));
        let point = thread.capture_escape_point();
        thread.push(Value::Fixnum(2));
        thread.push(Value::Fixnum(3));
        thread.restore_escape_point(&point);
        assert_eq!(thread.stack.len(), 1);
    }
}
