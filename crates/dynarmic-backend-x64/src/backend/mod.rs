//! The x86-64 code generation backend: executable memory management,
//! register allocation, and IR-to-machine-code lowering (spec §4.2-§4.4,
//! §4.6).

pub mod code_buffer;
pub mod emitter;
#[cfg(feature = "fastmem")]
pub mod exception_handler;
pub mod memory;
pub mod reg_alloc;

pub use code_buffer::BlockOfCode;
pub use emitter::Emitter;
pub use memory::{AccessStrategy, MemoryAccessKind};
pub use reg_alloc::{HostLoc, RegAlloc};
