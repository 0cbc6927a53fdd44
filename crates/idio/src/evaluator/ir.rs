//! The evaluator's intermediate form: one node per VM instruction, before
//! `codegen` flattens it to bytes (spec §4.3, §4.4).
//!
//! Kept as a typed enum rather than emitting bytecode directly so that
//! `rewrite.rs`'s body-rewriting and the closed-application optimisation
//! (spec §4.3) can inspect and rebuild sequences before they are
//! linearised once, at the end.

use crate::condition::ConditionType;
use crate::intern::SymbolId;
use crate::symbol_info::{ConstantIndex, SymbolTableIndex, ValueIndex};

#[derive(Debug, Clone)]
pub enum Ir {
    Constant(ConstantIndex),
    ShallowArgumentRef(u32),
    DeepArgumentRef(u32, u32),
    ShallowArgumentSet(u32),
    DeepArgumentSet(u32, u32),
    SymIref(SymbolTableIndex),
    FunctionSymIref(SymbolTableIndex),
    SymIdef(SymbolTableIndex),
    SymIset(SymbolTableIndex),
    ValIref(ValueIndex),
    Predefined(u32),
    PushValue,
    PopValue,
    PopReg1,
    PopReg2,
    PopFunction,
    SrcExpr(usize),
    AllocateFrame(u32),
    AllocateDottedFrame(u32),
    PopFrame(u32),
    ExtendFrame,
    ArityEqp(u32),
    ArityGep(u32),
    /// `(nparams, dotted, body byte length)`. The body length is known only
    /// once the body itself has been linearised -- `codegen` splices the
    /// body bytes in right after this instruction's operand, and the VM
    /// skips over them when creating the closure rather than executing
    /// them inline.
    CreateClosure(u32, bool, usize),
    FunctionInvoke,
    FunctionGoto,
    Return,
    Finish,
    LongGoto(u16),
    LongJumpFalse(u16),
    ShortGoto(u8),
    ShortJumpFalse(u8),
    Primcall0(u32),
    Primcall1(u32),
    Primcall2(u32),
    PushDynamic(SymbolTableIndex),
    PopDynamic,
    PushEnviron(SymbolTableIndex),
    PopEnviron,
    PushTrap(ConditionType, SymbolTableIndex),
    PopTrap,
    /// `(label, offset)`: `offset` is the byte distance from just after this
    /// instruction's operands to just after the matching `PopEscaper`,
    /// exactly the forward-jump-offset shape `LongJumpFalse` uses (spec
    /// §4.5 "push-escaper label body").
    PushEscaper(SymbolId, u16),
    PopEscaper,
    /// `escape-from label expr`: `expr`'s IR precedes this node and leaves
    /// its value in `val`; this node itself only performs the unwind+jump.
    EscapeFrom(SymbolId),
    Nop,
    Not,
    Expander(SymbolTableIndex),
    InfixOperator(SymbolTableIndex, u32),
    PostfixOperator(SymbolTableIndex, u32),
}

/// A compiled closure body: its instructions plus how many bytes they
/// linearise to, computed lazily by `codegen` so `CreateClosure`'s operand
/// can be filled in (spec §4.4 "closures carry a length-prefixed body").
#[derive(Debug, Clone, Default)]
pub struct IrSeq(pub Vec<Ir>);

impl IrSeq {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: Ir) {
        self.0.push(node);
    }

    pub fn extend(&mut self, other: IrSeq) {
        self.0.extend(other.0);
    }
}
