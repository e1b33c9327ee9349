//! The closed set of IR value types.

/// A value's IR type. `Opaque` matches anything; it is the return type of
/// `Identity` and of the handful of non-value-carrying tokens (coprocessor
/// info, guest register references, access-type enums) that the frontend
/// and emitter pass around but that the optimizer never needs to reason
/// about structurally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrType {
    Void,
    U1,
    U8,
    U16,
    U32,
    U64,
    U128,
    NzcvFlags,
    Cond,
    CoprocInfo,
    GuestRegRef,
    AccessType,
    Opaque,
}

impl IrType {
    /// `AreTypesCompatible` from §3: equal, or either side is `Opaque`.
    pub fn are_compatible(a: IrType, b: IrType) -> bool {
        a == b || a == IrType::Opaque || b == IrType::Opaque
    }

    pub fn bit_width(self) -> Option<u32> {
        match self {
            IrType::U1 => Some(1),
            IrType::U8 => Some(8),
            IrType::U16 => Some(16),
            IrType::U32 => Some(32),
            IrType::U64 => Some(64),
            IrType::U128 => Some(128),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_is_compatible_with_everything() {
        assert!(IrType::are_compatible(IrType::Opaque, IrType::U32));
        assert!(IrType::are_compatible(IrType::U32, IrType::Opaque));
        assert!(IrType::are_compatible(IrType::Opaque, IrType::Opaque));
    }

    #[test]
    fn distinct_concrete_types_are_incompatible() {
        assert!(!IrType::are_compatible(IrType::U32, IrType::U64));
    }
}
