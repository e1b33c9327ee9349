//! The typed, SSA-style intra-block intermediate representation (spec §3,
//! §4.1).

pub mod block;
pub mod inst;
pub mod opcode;
pub mod opt;
pub mod terminal;
pub mod ty;
pub mod value;
pub mod verify;

pub use block::{Block, Cond, EntryCondition, InstId};
pub use inst::{Inst, PseudoKind, PseudoSlots};
pub use opcode::{Opcode, OpcodeInfo};
pub use terminal::Terminal;
pub use ty::IrType;
pub use value::{Imm, Value};
