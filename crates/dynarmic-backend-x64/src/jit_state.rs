//! `JitState`: the plain memory layout shared between host-emitted code and
//! Rust runtime code. Every field's byte offset is part of the ABI between
//! emitted code and the runtime (spec §3, §6); offsets are exposed as
//! associated constants computed with `memoffset`-style `offset_of!`
//! discipline (hand-computed here since the struct is deliberately flat
//! and `#[repr(C)]`, matching the teacher's own `abi::CPU_GPR_OFF`-style
//! ABI tables).

use crate::callbacks::MemoryThunks;
use crate::exclusive_monitor::ExclusiveMonitor;
use crate::location::LocationDescriptor;

/// Power-of-two RSB ring size (§3: "small, power-of-two-sized").
pub const RSB_SIZE: usize = 32;
const RSB_MASK: u32 = (RSB_SIZE - 1) as u32;

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct RsbEntry {
    pub location_descriptor: u64,
    pub host_code_ptr: u64,
}

/// Packaged condition/status flags, kept in the layouts the emitter can
/// restore into host flags with a single instruction pair (§4.4).
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct PackedFlags {
    /// ARM NZCV packed into x86 FLAGS layout (SF/ZF/AF/PF/CF bit positions)
    /// so a `sahf`/`add al,0x7F` pair round-trips it into host EFLAGS.
    pub cpsr_nzcv: u32,
    pub cpsr_q: u32,
    pub cpsr_ge: u32,
    pub cpsr_jaifm: u32,
    pub fpsr_nzcv: u32,
    pub fpsr_qc: u32,
    pub fpsr_idc_ufc: u32,
}

#[derive(Clone, Copy, Default)]
#[repr(C)]
pub struct JitState {
    pub guest_gpr: [u64; 16],
    pub guest_vec: [u128; 32],
    pub flags: PackedFlags,
    pub exclusive_state: u8,
    _pad0: [u8; 7],
    pub exclusive_address: u64,
    pub rsb: [RsbEntry; RSB_SIZE],
    pub rsb_ptr: u32,
    pub mxcsr: u32,
    pub cycles_to_run: u64,
    pub cycles_remaining: i64,
    pub halt_requested: u8,
    pub upper_location_descriptor: u32,
    _pad1: [u8; 3],
    /// Embedder-bound per-width memory callback thunks (§4.6's callback
    /// strategy); null when the chosen strategy for a given block never
    /// needs them.
    pub memory_thunks: *const MemoryThunks,
    pub exclusive_monitor_ptr: *const ExclusiveMonitor,
    pub processor_id: u64,
    /// Base of the embedder's page table (`Config::page_table`), copied in
    /// at construction so emitted code can index it directly.
    pub page_table_base: *const *const u8,
    pub fastmem_base: *mut u8,
}

impl JitState {
    pub const OFFSET_GUEST_GPR: usize = std::mem::offset_of!(JitState, guest_gpr);
    pub const OFFSET_GUEST_VEC: usize = std::mem::offset_of!(JitState, guest_vec);
    pub const OFFSET_FLAGS: usize = std::mem::offset_of!(JitState, flags);
    pub const OFFSET_EXCLUSIVE_STATE: usize = std::mem::offset_of!(JitState, exclusive_state);
    pub const OFFSET_EXCLUSIVE_ADDRESS: usize = std::mem::offset_of!(JitState, exclusive_address);
    pub const OFFSET_RSB: usize = std::mem::offset_of!(JitState, rsb);
    pub const OFFSET_RSB_PTR: usize = std::mem::offset_of!(JitState, rsb_ptr);
    pub const OFFSET_MXCSR: usize = std::mem::offset_of!(JitState, mxcsr);
    pub const OFFSET_CYCLES_TO_RUN: usize = std::mem::offset_of!(JitState, cycles_to_run);
    pub const OFFSET_CYCLES_REMAINING: usize = std::mem::offset_of!(JitState, cycles_remaining);
    pub const OFFSET_HALT_REQUESTED: usize = std::mem::offset_of!(JitState, halt_requested);
    pub const OFFSET_UPPER_LOCATION_DESCRIPTOR: usize =
        std::mem::offset_of!(JitState, upper_location_descriptor);
    pub const OFFSET_MEMORY_THUNKS: usize = std::mem::offset_of!(JitState, memory_thunks);
    pub const OFFSET_EXCLUSIVE_MONITOR_PTR: usize = std::mem::offset_of!(JitState, exclusive_monitor_ptr);
    pub const OFFSET_PROCESSOR_ID: usize = std::mem::offset_of!(JitState, processor_id);
    pub const OFFSET_PAGE_TABLE_BASE: usize = std::mem::offset_of!(JitState, page_table_base);
    pub const OFFSET_FASTMEM_BASE: usize = std::mem::offset_of!(JitState, fastmem_base);

    pub fn push_rsb(&mut self, target: LocationDescriptor, host_code_ptr: u64) {
        let slot = (self.rsb_ptr & RSB_MASK) as usize;
        self.rsb[slot] = RsbEntry {
            location_descriptor: target.raw(),
            host_code_ptr,
        };
        self.rsb_ptr = self.rsb_ptr.wrapping_add(1);
    }

    /// `PopRSBHint`'s lookup half: decrements the pointer and returns the
    /// entry there if its descriptor matches `expected`.
    pub fn pop_rsb(&mut self, expected: LocationDescriptor) -> Option<u64> {
        self.rsb_ptr = self.rsb_ptr.wrapping_sub(1);
        let slot = (self.rsb_ptr & RSB_MASK) as usize;
        let entry = self.rsb[slot];
        if entry.location_descriptor == expected.raw() {
            Some(entry.host_code_ptr)
        } else {
            None
        }
    }

    pub fn nzcv(&self) -> u32 {
        self.flags.cpsr_nzcv
    }

    pub fn set_nzcv(&mut self, value: u32) {
        self.flags.cpsr_nzcv = value;
    }
}
