//! Runtime activation frames: the lexical-parameter storage a closure
//! closes over and a call allocates (spec §3.5).

use crate::heap::Gc;
use crate::value::Value;

/// One activation record: a vector of parameter/local slots plus a link to
/// the lexically enclosing frame. Closures capture the frame active at
/// their `make-closure` point (spec §3.5); `LREF`/`LSET` index into the
/// chain by (depth, slot).
#[derive(Debug)]
pub struct Frame {
    pub parent: Option<Gc<Frame>>,
    slots: Vec<Value>,
}

impl Frame {
    #[must_use]
    pub fn new(parent: Option<Gc<Frame>>, slot_count: usize) -> Self {
        Self {
            parent,
            slots: vec![Value::nil(); slot_count],
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Walks `depth` parent links and returns that frame's slot `index`
    /// (the `LREF depth index` addressing mode, spec §4.4/§6.3).
    #[must_use]
    pub fn get(this: &Gc<Frame>, depth: u32, index: usize) -> Value {
        Self::at_depth(this, depth).borrow().slots[index].clone()
    }

    pub fn set(this: &Gc<Frame>, depth: u32, index: usize, value: Value) {
        Self::at_depth(this, depth).borrow_mut().slots[index] = value;
    }

    /// Sets slot `index` of `this` frame directly (depth 0, no parent
    /// walk), used while a frame is still under construction between
    /// `ALLOCATE_FRAME` and `FUNCTION_INVOKE`.
    pub fn set_local(this: &Gc<Frame>, index: usize, value: Value) {
        this.borrow_mut().slots[index] = value;
    }

    /// Snapshot of every slot, in order -- primitives read their arguments
    /// this way rather than walking the frame chain.
    #[must_use]
    pub fn slots_as_vec(this: &Gc<Frame>) -> Vec<Value> {
        this.borrow().slots.clone()
    }

    fn at_depth(this: &Gc<Frame>, depth: u32) -> Gc<Frame> {
        let mut cur = this.clone();
        for _ in 0..depth {
            let next = cur
                .borrow()
                .parent
                .clone()
                .expect("LREF/LSET depth exceeds frame chain");
            cur = next;
        }
        cur
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_set_round_trip_at_depth_zero() {
        let frame = Gc::new(Frame::new(None, 2));
        Frame::set(&frame, 0, 1, Value::Fixnum(42));
        assert!(matches!(Frame::get(&frame, 0, 1), Value::Fixnum(42)));
    }

    #[test]
    fn get_walks_parent_chain() {
        let outer = Gc::new(Frame::new(None, 1));
        Frame::set(&outer, 0, 0, Value::Fixnum(7));
        let inner = Gc::new(Frame::new(Some(outer), 1));
        assert!(matches!(Frame::get(&inner, 1, 0), Value::Fixnum(7)));
    }
}
