//! `Value`: either an immediate or a non-owning reference to an `Inst`.

use super::block::{Block, InstId};
use super::ty::IrType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Imm {
    U1(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    /// A constant wider than 64 bits, too large to inline; the handle
    /// indexes the block's constant table.
    Wide(u32),
}

impl Imm {
    pub fn ty(self) -> IrType {
        match self {
            Imm::U1(_) => IrType::U1,
            Imm::U8(_) => IrType::U8,
            Imm::U16(_) => IrType::U16,
            Imm::U32(_) => IrType::U32,
            Imm::U64(_) | Imm::Wide(_) => IrType::U64,
        }
    }
}

/// A small tagged union: an immediate, a reference to an `Inst`, or empty
/// ("no operand"). Non-owning: the `InstId` is only meaningful relative to
/// the `Block` that produced it (§9's "arena plus index" design note).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Empty,
    Immediate(Imm),
    Inst(InstId),
}

impl Default for Value {
    fn default() -> Self {
        Value::Empty
    }
}

impl Value {
    pub fn from_imm(imm: Imm) -> Self {
        Value::Immediate(imm)
    }

    pub fn is_empty(self) -> bool {
        matches!(self, Value::Empty)
    }

    pub fn is_immediate(self, block: &Block) -> bool {
        match self.resolve_identity(block) {
            Value::Immediate(_) => true,
            Value::Empty | Value::Inst(_) => false,
        }
    }

    /// Follows `Identity` chains transparently, per §4.1's canonical
    /// rewrite primitive: once `ReplaceUsesWith` turns an Inst into
    /// `Identity(v)`, every query must see `v`.
    pub fn resolve_identity(self, block: &Block) -> Value {
        let mut current = self;
        loop {
            match current {
                Value::Inst(id) => {
                    let inst = block.inst(id);
                    if inst.opcode() == super::opcode::Opcode::Identity {
                        current = inst.arg(0);
                    } else {
                        return current;
                    }
                }
                _ => return current,
            }
        }
    }

    pub fn get_type(self, block: &Block) -> IrType {
        match self.resolve_identity(block) {
            Value::Empty => IrType::Void,
            Value::Immediate(imm) => imm.ty(),
            Value::Inst(id) => block.inst(id).opcode().info().return_type,
        }
    }

    pub fn get_imm(self, block: &Block) -> Option<Imm> {
        match self.resolve_identity(block) {
            Value::Immediate(imm) => Some(imm),
            _ => None,
        }
    }

    /// Underlying producer after identity resolution, or `None` if this
    /// value is immediate/empty.
    pub fn inst_id(self, block: &Block) -> Option<InstId> {
        match self.resolve_identity(block) {
            Value::Inst(id) => Some(id),
            _ => None,
        }
    }
}
