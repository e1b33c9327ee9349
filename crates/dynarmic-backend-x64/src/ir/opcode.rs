//! The generated-in-spirit master opcode table.
//!
//! The real dynarmic ships a machine-generated table of several hundred
//! opcodes (one per guest operation plus pseudo-ops). Individual
//! arithmetic/SIMD/floating-point emission templates are out of scope
//! (spec §1); this table carries a representative subset wide enough to
//! exercise every codepath §4.1-§4.6 describe: plain arithmetic, the four
//! pseudo-ops, the memory family, and `Identity`. Optimizations must never
//! match on a numeric opcode value — they go through [`Opcode::info`]'s
//! side-effect predicates instead.

use super::ty::IrType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Tombstone state an Inst is turned into by `Invalidate`: produces
    /// nothing, has no arguments. Never emitted by the decoder or an
    /// optimization pass directly — only reached via `Block::invalidate`.
    Void,
    Identity,

    // Representative arithmetic/bitwise ops. All four are on the
    // `GetNZCVFromOp` whitelist (§4.1, §9 Open Question: membership is
    // closed and must never be inferred — it is exactly this list).
    Add32,
    Add64,
    Sub32,
    Sub64,
    And32,
    And64,
    Or32,
    Or64,
    Eor32,
    Eor64,
    LogicalShiftLeft32,
    LogicalShiftLeft64,

    // Pseudo-operations: each names an auxiliary output of its sole
    // argument's producing Inst.
    GetCarryFromOp,
    GetOverflowFromOp,
    GetGEFromOp,
    GetNZCVFromOp,

    // Memory family.
    ReadMemory8,
    ReadMemory16,
    ReadMemory32,
    ReadMemory64,
    ReadMemory128,
    WriteMemory8,
    WriteMemory16,
    WriteMemory32,
    WriteMemory64,
    WriteMemory128,
    ExclusiveReadMemory8,
    ExclusiveReadMemory16,
    ExclusiveReadMemory32,
    ExclusiveReadMemory64,
    ExclusiveReadMemory128,
    ExclusiveWriteMemory8,
    ExclusiveWriteMemory16,
    ExclusiveWriteMemory32,
    ExclusiveWriteMemory64,
    ExclusiveWriteMemory128,
    ClearExclusive,

    // Guest-register and system access, needed to round out the block
    // terminal/condition-prelude machinery in §4.4.
    GetRegister,
    SetRegister,
    GetNZCVFromRegister,
    SetNZCV,
    CallSupervisor,
}

/// Argument count and type, return type, and side-effect classification for
/// one opcode. Optimizations and the register allocator consult only this
/// table's predicates, never `Opcode` variants directly (§4.1).
#[derive(Debug, Clone, Copy)]
pub struct OpcodeInfo {
    pub arg_types: &'static [IrType],
    pub return_type: IrType,
    pub reads_cpsr: bool,
    pub writes_cpsr: bool,
    pub reads_fpscr: bool,
    pub writes_fpscr: bool,
    pub reads_core_register: bool,
    pub writes_core_register: bool,
    pub reads_system_register: bool,
    pub writes_system_register: bool,
    pub may_cause_exception: bool,
    pub alters_exclusive_state: bool,
    pub is_coprocessor: bool,
    pub is_pseudo_op: bool,
    pub is_shift: bool,
    pub is_shared_memory_access: bool,
    pub is_exclusive_memory_access: bool,
}

impl OpcodeInfo {
    pub const fn any_side_effect(&self) -> bool {
        self.writes_cpsr
            || self.writes_fpscr
            || self.writes_core_register
            || self.writes_system_register
            || self.may_cause_exception
            || self.alters_exclusive_state
    }
}

const fn plain_binop(ty: IrType) -> OpcodeInfo {
    OpcodeInfo {
        arg_types: &[],
        return_type: ty,
        reads_cpsr: false,
        writes_cpsr: false,
        reads_fpscr: false,
        writes_fpscr: false,
        reads_core_register: false,
        writes_core_register: false,
        reads_system_register: false,
        writes_system_register: false,
        may_cause_exception: false,
        alters_exclusive_state: false,
        is_coprocessor: false,
        is_pseudo_op: false,
        is_shift: false,
        is_shared_memory_access: false,
        is_exclusive_memory_access: false,
    }
}

const U32_U32: &[IrType] = &[IrType::U32, IrType::U32];
const U64_U64: &[IrType] = &[IrType::U64, IrType::U64];
const OPAQUE_1: &[IrType] = &[IrType::Opaque];
const U64_U8: &[IrType] = &[IrType::U64, IrType::U8];
const U64_U16: &[IrType] = &[IrType::U64, IrType::U16];
const U64_U32: &[IrType] = &[IrType::U64, IrType::U32];
const U64_U64_PAIR: &[IrType] = &[IrType::U64, IrType::U64];
const U64_U128: &[IrType] = &[IrType::U64, IrType::U128];
const REG_U64: &[IrType] = &[IrType::GuestRegRef, IrType::U64];

const fn value_type_pair(val: IrType) -> &'static [IrType] {
    match val {
        IrType::U8 => U64_U8,
        IrType::U16 => U64_U16,
        IrType::U32 => U64_U32,
        IrType::U64 => U64_U64_PAIR,
        _ => U64_U128,
    }
}

impl Opcode {
    pub fn arity(self) -> usize {
        self.info().arg_types.len()
    }

    pub fn info(self) -> OpcodeInfo {
        use Opcode::*;
        match self {
            Void => OpcodeInfo {
                arg_types: &[],
                ..plain_binop(IrType::Void)
            },
            Identity => OpcodeInfo {
                arg_types: OPAQUE_1,
                ..plain_binop(IrType::Opaque)
            },
            Add32 | Sub32 | And32 | Or32 | Eor32 | LogicalShiftLeft32 => OpcodeInfo {
                arg_types: U32_U32,
                is_shift: matches!(self, LogicalShiftLeft32),
                ..plain_binop(IrType::U32)
            },
            Add64 | Sub64 | And64 | Or64 | Eor64 | LogicalShiftLeft64 => OpcodeInfo {
                arg_types: U64_U64,
                is_shift: matches!(self, LogicalShiftLeft64),
                ..plain_binop(IrType::U64)
            },
            GetCarryFromOp => OpcodeInfo {
                arg_types: OPAQUE_1,
                is_pseudo_op: true,
                ..plain_binop(IrType::U1)
            },
            GetOverflowFromOp => OpcodeInfo {
                arg_types: OPAQUE_1,
                is_pseudo_op: true,
                ..plain_binop(IrType::U1)
            },
            GetGEFromOp => OpcodeInfo {
                arg_types: OPAQUE_1,
                is_pseudo_op: true,
                ..plain_binop(IrType::U32)
            },
            GetNZCVFromOp => OpcodeInfo {
                arg_types: OPAQUE_1,
                is_pseudo_op: true,
                ..plain_binop(IrType::NzcvFlags)
            },
            ReadMemory8 | ReadMemory16 | ReadMemory32 | ReadMemory64 | ReadMemory128 => {
                let ret = match self {
                    ReadMemory8 => IrType::U8,
                    ReadMemory16 => IrType::U16,
                    ReadMemory32 => IrType::U32,
                    ReadMemory64 => IrType::U64,
                    _ => IrType::U128,
                };
                OpcodeInfo {
                    arg_types: &[IrType::U64],
                    may_cause_exception: true,
                    is_shared_memory_access: true,
                    ..plain_binop(ret)
                }
            }
            WriteMemory8 | WriteMemory16 | WriteMemory32 | WriteMemory64 | WriteMemory128 => {
                let val = match self {
                    WriteMemory8 => IrType::U8,
                    WriteMemory16 => IrType::U16,
                    WriteMemory32 => IrType::U32,
                    WriteMemory64 => IrType::U64,
                    _ => IrType::U128,
                };
                OpcodeInfo {
                    arg_types: value_type_pair(val),
                    may_cause_exception: true,
                    is_shared_memory_access: true,
                    ..plain_binop(IrType::Void)
                }
            }
            ExclusiveReadMemory8
            | ExclusiveReadMemory16
            | ExclusiveReadMemory32
            | ExclusiveReadMemory64
            | ExclusiveReadMemory128 => {
                let ret = match self {
                    ExclusiveReadMemory8 => IrType::U8,
                    ExclusiveReadMemory16 => IrType::U16,
                    ExclusiveReadMemory32 => IrType::U32,
                    ExclusiveReadMemory64 => IrType::U64,
                    _ => IrType::U128,
                };
                OpcodeInfo {
                    arg_types: &[IrType::U64],
                    may_cause_exception: true,
                    alters_exclusive_state: true,
                    is_shared_memory_access: true,
                    is_exclusive_memory_access: true,
                    ..plain_binop(ret)
                }
            }
            ExclusiveWriteMemory8
            | ExclusiveWriteMemory16
            | ExclusiveWriteMemory32
            | ExclusiveWriteMemory64
            | ExclusiveWriteMemory128 => {
                let val = match self {
                    ExclusiveWriteMemory8 => IrType::U8,
                    ExclusiveWriteMemory16 => IrType::U16,
                    ExclusiveWriteMemory32 => IrType::U32,
                    ExclusiveWriteMemory64 => IrType::U64,
                    _ => IrType::U128,
                };
                OpcodeInfo {
                    arg_types: value_type_pair(val),
                    may_cause_exception: true,
                    alters_exclusive_state: true,
                    is_shared_memory_access: true,
                    is_exclusive_memory_access: true,
                    ..plain_binop(IrType::U1)
                }
            }
            ClearExclusive => OpcodeInfo {
                arg_types: &[],
                alters_exclusive_state: true,
                ..plain_binop(IrType::Void)
            },
            GetRegister => OpcodeInfo {
                arg_types: &[IrType::GuestRegRef],
                reads_core_register: true,
                ..plain_binop(IrType::U64)
            },
            SetRegister => OpcodeInfo {
                arg_types: REG_U64,
                writes_core_register: true,
                ..plain_binop(IrType::Void)
            },
            GetNZCVFromRegister => OpcodeInfo {
                arg_types: &[],
                reads_cpsr: true,
                ..plain_binop(IrType::NzcvFlags)
            },
            SetNZCV => OpcodeInfo {
                arg_types: &[IrType::NzcvFlags],
                writes_cpsr: true,
                ..plain_binop(IrType::Void)
            },
            CallSupervisor => OpcodeInfo {
                arg_types: &[IrType::U32],
                may_cause_exception: true,
                ..plain_binop(IrType::Void)
            },
        }
    }

    /// The access width a memory-family opcode operates at, in bits.
    /// Programmer error to call on an opcode with no memory width.
    pub fn width_bits(self) -> u32 {
        use Opcode::*;
        match self {
            ReadMemory8 | WriteMemory8 | ExclusiveReadMemory8 | ExclusiveWriteMemory8 => 8,
            ReadMemory16 | WriteMemory16 | ExclusiveReadMemory16 | ExclusiveWriteMemory16 => 16,
            ReadMemory32 | WriteMemory32 | ExclusiveReadMemory32 | ExclusiveWriteMemory32 => 32,
            ReadMemory64 | WriteMemory64 | ExclusiveReadMemory64 | ExclusiveWriteMemory64 => 64,
            ReadMemory128 | WriteMemory128 | ExclusiveReadMemory128 | ExclusiveWriteMemory128 => 128,
            other => crate::error::abort_programmer_error!("{other:?} has no memory access width"),
        }
    }

    /// The fixed whitelist from §4.1/§9: `GetNZCVFromOp` is only legal on a
    /// producer whose opcode preserves host NZCV across emission. Closed by
    /// construction — never inferred from a predicate.
    pub fn preserves_host_nzcv(self) -> bool {
        matches!(
            self,
            Opcode::Add32
                | Opcode::Add64
                | Opcode::Sub32
                | Opcode::Sub64
                | Opcode::And32
                | Opcode::And64
                | Opcode::Or32
                | Opcode::Or64
                | Opcode::Eor32
                | Opcode::Eor64
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_matches_arg_types_len() {
        assert_eq!(Opcode::Add32.arity(), 2);
        assert_eq!(Opcode::Identity.arity(), 1);
        assert_eq!(Opcode::ClearExclusive.arity(), 0);
    }

    #[test]
    fn nzcv_whitelist_excludes_memory_ops() {
        assert!(Opcode::Add32.preserves_host_nzcv());
        assert!(!Opcode::ReadMemory32.preserves_host_nzcv());
        assert!(!Opcode::GetRegister.preserves_host_nzcv());
    }

    #[test]
    fn identity_returns_opaque() {
        assert_eq!(Opcode::Identity.info().return_type, IrType::Opaque);
    }

    #[test]
    fn width_bits_covers_every_memory_width() {
        assert_eq!(Opcode::ReadMemory8.width_bits(), 8);
        assert_eq!(Opcode::WriteMemory16.width_bits(), 16);
        assert_eq!(Opcode::ExclusiveReadMemory32.width_bits(), 32);
        assert_eq!(Opcode::ExclusiveWriteMemory64.width_bits(), 64);
        assert_eq!(Opcode::ReadMemory128.width_bits(), 128);
    }

    #[test]
    #[should_panic]
    fn width_bits_panics_on_non_memory_opcode() {
        Opcode::Add32.width_bits();
    }
}
