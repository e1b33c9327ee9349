//! Error handling split (spec §7): programmer errors abort; guest-visible
//! errors are ordinary values delivered through callbacks.

/// Aborts with a consistent prefix. Used for every "programmer error" case
/// in §7: IR arity/type mismatch, use-count mismatch, double-binding a
/// `HostLoc`, emitting past a patch slot. Never surfaced to the embedder.
macro_rules! abort_programmer_error {
    ($($arg:tt)*) => {
        panic!("[dynarmic] programmer error: {}", format!($($arg)*))
    };
}
pub(crate) use abort_programmer_error;

/// A guest-architectural event, delivered through
/// [`crate::callbacks::ExceptionCallbacks`] rather than propagated as a
/// Rust `Result` error — from the core's point of view these are not
/// failures, they are one of the ways a block legitimately ends (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GuestException {
    #[error("supervisor call {imm:#x}")]
    Supervisor { imm: u32 },
    #[error("undefined instruction at {pc:#x}")]
    UndefinedInstruction { pc: u64 },
    #[error("unaligned access of width {width} at {vaddr:#x}")]
    UnalignedAccess { vaddr: u64, width: u32 },
    #[error("data abort at {vaddr:#x}")]
    DataAbort { vaddr: u64 },
}
