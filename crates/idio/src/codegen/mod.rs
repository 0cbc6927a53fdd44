//! Linearisation: turning the evaluator's intermediate form into flat
//! byte code in an xenv's `bc` table (spec §4.4).

pub mod opcode;

use crate::codegen::opcode::Opcode;
use crate::evaluator::ir::Ir;
use crate::symbol_info::{SymbolTableIndex, ValueIndex};
use crate::xenv::Xenv;

/// Appends bytecode for one IR node to `xenv.bc`, returning nothing --
/// callers walk a sequence of IR nodes and call this once per node in
/// order, which is also how `CREATE_CLOSURE`'s body is built (linearise
/// into a scratch buffer, then splice the length-prefixed result in).
pub fn emit(xenv: &mut Xenv, node: &Ir) {
    let mut buf = Vec::new();
    emit_into(&mut buf, node);
    xenv.bc.extend_from_slice(&buf);
}

pub(crate) fn emit_into(buf: &mut Vec<u8>, node: &Ir) {
    match node {
        Ir::Constant(ci) => {
            opcode::push_op(buf, Opcode::ConstantIref);
            opcode::push_uvarint(buf, ci.0);
        }
        Ir::ShallowArgumentRef(idx) => match idx {
            0 => opcode::push_op(buf, Opcode::ShallowArgumentRef0),
            1 => opcode::push_op(buf, Opcode::ShallowArgumentRef1),
            2 => opcode::push_op(buf, Opcode::ShallowArgumentRef2),
            3 => opcode::push_op(buf, Opcode::ShallowArgumentRef3),
            n => {
                opcode::push_op(buf, Opcode::ShallowArgumentRef);
                opcode::push_uvarint(buf, *n);
            }
        },
        Ir::DeepArgumentRef(depth, idx) => {
            opcode::push_op(buf, Opcode::DeepArgumentRef);
            opcode::push_uvarint(buf, *depth);
            opcode::push_uvarint(buf, *idx);
        }
        Ir::ShallowArgumentSet(idx) => match idx {
            0 => opcode::push_op(buf, Opcode::ShallowArgumentSet0),
            1 => opcode::push_op(buf, Opcode::ShallowArgumentSet1),
            2 => opcode::push_op(buf, Opcode::ShallowArgumentSet2),
            3 => opcode::push_op(buf, Opcode::ShallowArgumentSet3),
            n => {
                opcode::push_op(buf, Opcode::ShallowArgumentSet);
                opcode::push_uvarint(buf, *n);
            }
        },
        Ir::DeepArgumentSet(depth, idx) => {
            opcode::push_op(buf, Opcode::DeepArgumentSet);
            opcode::push_uvarint(buf, *depth);
            opcode::push_uvarint(buf, *idx);
        }
        Ir::SymIref(si) => {
            opcode::push_op(buf, Opcode::SymIref);
            opcode::push_uvarint(buf, si.0);
        }
        Ir::FunctionSymIref(si) => {
            opcode::push_op(buf, Opcode::FunctionSymIref);
            opcode::push_uvarint(buf, si.0);
        }
        Ir::SymIdef(si) => {
            opcode::push_op(buf, Opcode::SymIdef);
            opcode::push_uvarint(buf, si.0);
        }
        Ir::SymIset(si) => {
            opcode::push_op(buf, Opcode::SymIset);
            opcode::push_uvarint(buf, si.0);
        }
        Ir::ValIref(vi) => {
            opcode::push_op(buf, Opcode::ValIref);
            opcode::push_uvarint(buf, vi.0);
        }
        Ir::Predefined(index) => {
            let op = match index {
                0 => Opcode::Predefined0,
                1 => Opcode::Predefined1,
                2 => Opcode::Predefined2,
                _ => Opcode::Predefined,
            };
            opcode::push_op(buf, op);
            if *index > 2 {
                opcode::push_uvarint(buf, *index);
            }
        }
        Ir::PushValue => opcode::push_op(buf, Opcode::PushValue),
        Ir::PopValue => opcode::push_op(buf, Opcode::PopValue),
        Ir::PopReg1 => opcode::push_op(buf, Opcode::PopReg1),
        Ir::PopReg2 => opcode::push_op(buf, Opcode::PopReg2),
        Ir::PopFunction => opcode::push_op(buf, Opcode::PopFunction),
        Ir::SrcExpr(index) => {
            opcode::push_op(buf, Opcode::SrcExpr);
            opcode::push_uvarint(buf, *index as u32);
        }
        Ir::AllocateFrame(n) => match n {
            1 => opcode::push_op(buf, Opcode::AllocateFrame1),
            2 => opcode::push_op(buf, Opcode::AllocateFrame2),
            3 => opcode::push_op(buf, Opcode::AllocateFrame3),
            4 => opcode::push_op(buf, Opcode::AllocateFrame4),
            5 => opcode::push_op(buf, Opcode::AllocateFrame5),
            n => {
                opcode::push_op(buf, Opcode::AllocateFrame);
                opcode::push_uvarint(buf, *n);
            }
        },
        Ir::AllocateDottedFrame(n) => {
            opcode::push_op(buf, Opcode::AllocateDottedFrame);
            opcode::push_uvarint(buf, *n);
        }
        Ir::PopFrame(n) => match n {
            0 => opcode::push_op(buf, Opcode::PopFrame0),
            1 => opcode::push_op(buf, Opcode::PopFrame1),
            2 => opcode::push_op(buf, Opcode::PopFrame2),
            3 => opcode::push_op(buf, Opcode::PopFrame3),
            n => {
                opcode::push_op(buf, Opcode::PopFrame);
                opcode::push_uvarint(buf, *n);
            }
        },
        Ir::ExtendFrame => opcode::push_op(buf, Opcode::ExtendFrame),
        Ir::ArityEqp(n) => {
            opcode::push_op(buf, Opcode::Arityeqp);
            opcode::push_uvarint(buf, *n);
        }
        Ir::ArityGep(n) => {
            opcode::push_op(buf, Opcode::Aritygep);
            opcode::push_uvarint(buf, *n);
        }
        Ir::CreateClosure(nparams, dotted, code_len) => {
            opcode::push_op(buf, Opcode::CreateClosure);
            opcode::push_uvarint(buf, *nparams);
            buf.push(u8::from(*dotted));
            opcode::push_uvarint(buf, *code_len as u32);
        }
        Ir::FunctionInvoke => opcode::push_op(buf, Opcode::FunctionInvoke),
        Ir::FunctionGoto => opcode::push_op(buf, Opcode::FunctionGoto),
        Ir::Return => opcode::push_op(buf, Opcode::Return),
        Ir::Finish => opcode::push_op(buf, Opcode::Finish),
        Ir::LongGoto(offset) => {
            opcode::push_op(buf, Opcode::LongGoto);
            opcode::push_uint16(buf, *offset);
        }
        Ir::LongJumpFalse(offset) => {
            opcode::push_op(buf, Opcode::LongJumpFalse);
            opcode::push_uint16(buf, *offset);
        }
        Ir::ShortGoto(offset) => {
            opcode::push_op(buf, Opcode::ShortGoto);
            buf.push(*offset);
        }
        Ir::ShortJumpFalse(offset) => {
            opcode::push_op(buf, Opcode::ShortJumpFalse);
            buf.push(*offset);
        }
        Ir::Primcall0(primid) => {
            opcode::push_op(buf, Opcode::Primcall0);
            opcode::push_uvarint(buf, *primid);
        }
        Ir::Primcall1(primid) => {
            opcode::push_op(buf, Opcode::Primcall1);
            opcode::push_uvarint(buf, *primid);
        }
        Ir::Primcall2(primid) => {
            opcode::push_op(buf, Opcode::Primcall2);
            opcode::push_uvarint(buf, *primid);
        }
        Ir::PushDynamic(si) => {
            opcode::push_op(buf, Opcode::PushIdynamic);
            opcode::push_uvarint(buf, si.0);
        }
        Ir::PopDynamic => opcode::push_op(buf, Opcode::PopDynamic),
        Ir::PushEnviron(si) => {
            opcode::push_op(buf, Opcode::PushIenviron);
            opcode::push_uvarint(buf, si.0);
        }
        Ir::PopEnviron => opcode::push_op(buf, Opcode::PopEnviron),
        Ir::PushTrap(condition, si) => {
            opcode::push_op(buf, Opcode::PushItrap);
            buf.push(condition.to_byte());
            opcode::push_uvarint(buf, si.0);
        }
        Ir::PopTrap => opcode::push_op(buf, Opcode::PopTrap),
        Ir::PushEscaper(label, offset) => {
            opcode::push_op(buf, Opcode::PushIescaper);
            opcode::push_uvarint(buf, label.index() as u32);
            opcode::push_uint16(buf, *offset);
        }
        Ir::PopEscaper => opcode::push_op(buf, Opcode::PopEscaper),
        Ir::EscapeFrom(label) => {
            opcode::push_op(buf, Opcode::EscaperLabelRef);
            opcode::push_uvarint(buf, label.index() as u32);
        }
        Ir::Nop => opcode::push_op(buf, Opcode::Nop),
        Ir::Not => opcode::push_op(buf, Opcode::Not),
        Ir::Expander(si) => {
            opcode::push_op(buf, Opcode::Iexpander);
            opcode::push_uvarint(buf, si.0);
        }
        Ir::InfixOperator(si, priority) => {
            opcode::push_op(buf, Opcode::InfixIoperator);
            opcode::push_uvarint(buf, si.0);
            opcode::push_uvarint(buf, *priority);
        }
        Ir::PostfixOperator(si, priority) => {
            opcode::push_op(buf, Opcode::PostfixIoperator);
            opcode::push_uvarint(buf, si.0);
            opcode::push_uvarint(buf, *priority);
        }
    }
}

/// Measures the byte length a sequence of IR nodes would linearise to,
/// without touching any xenv -- `evaluator::meaning_if`/`meaning_lambda`
/// need this to compute jump offsets and `CREATE_CLOSURE`'s body length
/// before the real emission pass.
#[must_use]
pub(crate) fn linearize(nodes: &[Ir]) -> Vec<u8> {
    let mut buf = Vec::new();
    for node in nodes {
        emit_into(&mut buf, node);
    }
    buf
}

/// `VAL-IREF`'s companion read at VM dispatch time: decodes one operand
/// back out of the byte stream. Kept alongside `emit` since the two must
/// agree on encoding (spec §6.3).
#[must_use]
pub fn read_sym_iref_operand(bc: &[u8], pc: usize) -> (SymbolTableIndex, usize) {
    let (value, next) = opcode::read_uvarint(bc, pc);
    (SymbolTableIndex(value), next)
}

#[must_use]
pub fn read_val_iref_operand(bc: &[u8], pc: usize) -> (ValueIndex, usize) {
    let (value, next) = opcode::read_uvarint(bc, pc);
    (ValueIndex(value), next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleId;
    use crate::symbol_info::ConstantIndex;
    use crate::xenv::XenvId;

    #[test]
    fn emit_constant_iref_round_trips_through_uvarint() {
        let mut xenv = Xenv::new(XenvId(0), "test");
        emit(&mut xenv, &Ir::Constant(ConstantIndex(300)));
        assert_eq!(xenv.bc[0], Opcode::ConstantIref as u8);
        let (value, _) = opcode::read_uvarint(&xenv.bc, 1);
        assert_eq!(value, 300);
        let _ = ModuleId::default();
    }

    #[test]
    fn emit_shallow_argument_ref_specialises_small_indices() {
        let mut xenv = Xenv::new(XenvId(0), "test");
        emit(&mut xenv, &Ir::ShallowArgumentRef(2));
        assert_eq!(xenv.bc, vec![Opcode::ShallowArgumentRef2 as u8]);
    }
}
