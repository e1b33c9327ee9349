//! The verification pass (§4.1, testable property 6): a total function over
//! every block the decoder or optimizer can produce, flagging any block
//! reached through illegal mutation.

use std::collections::HashMap;

use super::block::{Block, InstId};
use super::ty::IrType;
use super::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("inst {inst:?} argument {index}: expected type compatible with {expected:?}, found {actual:?}")]
    ArgumentTypeMismatch {
        inst: InstId,
        index: usize,
        expected: IrType,
        actual: IrType,
    },
    #[error("inst {inst:?}: stored use_count {stored} does not match recomputed {recomputed}")]
    UseCountMismatch {
        inst: InstId,
        stored: u32,
        recomputed: u32,
    },
}

/// Runs the full verification pass over `block`.
///
/// Checks, independently:
/// 1. every argument slot's type is compatible with the opcode's declared
///    slot type (skipped for tombstoned/identity instructions, which by
///    construction no longer carry the original arity);
/// 2. every Inst's stored `use_count` equals the number of live argument
///    slots across the whole block that reference it.
pub fn run(block: &Block) -> Result<(), VerifyError> {
    for (id, inst) in block.insts() {
        if inst.is_invalidated() || inst.is_identity() {
            continue;
        }
        let info = inst.opcode().info();
        for (index, (&arg, &expected)) in inst.args().iter().zip(info.arg_types).enumerate() {
            let actual = arg.get_type(block);
            if !IrType::are_compatible(actual, expected) {
                return Err(VerifyError::ArgumentTypeMismatch {
                    inst: id,
                    index,
                    expected,
                    actual,
                });
            }
        }
    }

    let mut recomputed: HashMap<InstId, u32> = HashMap::new();
    for (_, inst) in block.insts() {
        for &arg in inst.args() {
            if let Value::Inst(target) = arg {
                *recomputed.entry(target).or_insert(0) += 1;
            }
        }
    }

    for (id, inst) in block.insts() {
        let expected = recomputed.get(&id).copied().unwrap_or(0);
        if inst.use_count() != expected {
            return Err(VerifyError::UseCountMismatch {
                inst: id,
                stored: inst.use_count(),
                recomputed: expected,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::Block;
    use crate::ir::opcode::Opcode;
    use crate::ir::value::Imm;
    use crate::location::LocationDescriptor;

    #[test]
    fn accepts_a_well_formed_block() {
        let mut b = Block::new(LocationDescriptor::new(0, 0));
        let a = b.push_inst(
            Opcode::Add32,
            &[Value::from_imm(Imm::U32(1)), Value::from_imm(Imm::U32(2))],
        );
        b.push_inst(Opcode::Sub32, &[Value::Inst(a), Value::from_imm(Imm::U32(3))]);
        assert!(run(&b).is_ok());
    }

    #[test]
    fn flags_a_corrupted_use_count() {
        let mut b = Block::new(LocationDescriptor::new(0, 0));
        let a = b.push_inst(
            Opcode::Add32,
            &[Value::from_imm(Imm::U32(1)), Value::from_imm(Imm::U32(2))],
        );
        b.push_inst(Opcode::Sub32, &[Value::Inst(a), Value::from_imm(Imm::U32(3))]);

        b.test_only_corrupt_use_count(a, 99);
        assert!(matches!(
            run(&b),
            Err(VerifyError::UseCountMismatch { stored: 99, .. })
        ));
    }

    #[test]
    fn flags_an_incompatible_argument_type() {
        let mut b = Block::new(LocationDescriptor::new(0, 0));
        let a = b.push_inst(
            Opcode::ReadMemory64,
            &[Value::from_imm(Imm::U64(0x1000))],
        );
        // `Sub32` declares U32 arguments; feeding it a U64-typed producer
        // is only reachable by bypassing `Block::push_inst`'s own check,
        // which this test does directly to exercise the independent
        // verification pass.
        b.test_only_push_inst_unchecked(Opcode::Sub32, &[Value::Inst(a), Value::from_imm(Imm::U32(3))]);
        assert!(matches!(
            run(&b),
            Err(VerifyError::ArgumentTypeMismatch { .. })
        ));
    }
}
