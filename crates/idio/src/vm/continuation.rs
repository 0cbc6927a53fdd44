//! First-class continuations (spec §4.5): capturing the register file at a
//! `call/cc` site and restoring it, however many call frames later the
//! continuation is invoked.

use crate::thread::EscapePoint;
use crate::xenv::XenvId;

/// A captured continuation: the escape point to restore plus the xenv/pc to
/// resume at. Invoking one truncates the operand/trap/wind stacks back to
/// `escape` and jumps to `(xi, pc)`, exactly like a non-local `Return` that
/// can fire more than once.
#[derive(Debug, Clone)]
pub struct Continuation {
    pub escape: EscapePoint,
    /// Unique per capture (`Runtime::fresh_cc_tag`); lets the capturing
    /// `call/cc` frame recognise "this is the jump I'm waiting for" when a
    /// `ContinuationUnwind` propagates back up through `?`.
    pub tag: u64,
    pub xi: XenvId,
    pub pc: usize,
}

impl Continuation {
    #[must_use]
    pub fn new(escape: EscapePoint, tag: u64, xi: XenvId, pc: usize) -> Self {
        Self { escape, tag, xi, pc }
    }
}
