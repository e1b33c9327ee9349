//! x86-64 recompiling backend: IR, register allocation, code emission,
//! block cache and dispatch. The public entry point embedders use is
//! [`dynarmic::Jit`](../dynarmic/struct.Jit.html); this crate is the engine
//! underneath it and is not meant to be depended on directly outside this
//! workspace.

pub mod backend;
pub mod cache;
pub mod callbacks;
pub mod config;
pub mod error;
pub mod exclusive_monitor;
pub mod ir;
pub mod jit_state;
pub mod location;
pub mod perf_map;

pub use backend::code_buffer::BlockOfCode;
pub use backend::reg_alloc::RegAlloc;
pub use cache::{BlockCache, PatchInformation};
pub use callbacks::UserCallbacks;
pub use config::Config;
pub use error::GuestException;
pub use exclusive_monitor::ExclusiveMonitor;
pub use ir::{Block, Opcode, Terminal};
pub use jit_state::JitState;
pub use location::LocationDescriptor;
