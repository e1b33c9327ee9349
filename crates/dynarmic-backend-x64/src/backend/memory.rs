//! The guest memory fast path (spec §4.6): three interchangeable forms of
//! the same read/write/exclusive-read/exclusive-write semantics, chosen per
//! [`Config`](crate::config::Config) and required to behave identically up
//! to performance (testable property 10).

use crate::config::{Config, MisalignmentWidths};
use crate::exclusive_monitor::ExclusiveMonitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAccessKind {
    Read,
    Write,
    ExclusiveRead,
    ExclusiveWrite,
}

/// Which strategy a given access width/config combination resolves to.
/// Computed once per block at compile time, never re-derived at guest
/// runtime (§4.6 "the choice is a compile-time property of the config").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessStrategy {
    /// Always-correct fallback: calls into `MemoryCallbacks` directly.
    Callback,
    /// Translates through the embedder's page table, checking alignment
    /// against `detect_misaligned_access_via_page_table` for this width.
    PageTable,
    /// Direct host-memory dereference through the embedder's fastmem
    /// region; only legal when `Config::fastmem` is set and the
    /// instruction carries a `FastmemPatchInfo` fallback slot.
    Fastmem,
}

pub fn choose_strategy(config: &Config, width_bits: u32) -> AccessStrategy {
    if let Some(fastmem) = &config.fastmem {
        let _ = fastmem;
        return AccessStrategy::Fastmem;
    }
    if config.page_table.is_some() {
        return AccessStrategy::PageTable;
    }
    let _ = width_bits;
    AccessStrategy::Callback
}

/// One fastmem recompile-on-fault record: the faulting host code address
/// and the location to re-enter the block at, in the slow (callback) form,
/// after a `SIGSEGV` proves the guest address was not actually mapped
/// (§4.6, feature `fastmem`).
#[derive(Debug, Clone, Copy)]
pub struct FastmemPatchInfo {
    pub fault_pc: usize,
    pub slow_path_pc: usize,
    pub recompile: bool,
}

#[derive(Default)]
pub struct FastmemPatchTable {
    entries: Vec<FastmemPatchInfo>,
}

impl FastmemPatchTable {
    pub fn register(&mut self, entry: FastmemPatchInfo) {
        self.entries.push(entry);
    }

    /// Looks up the patch record whose `fault_pc` contains `host_pc`, used
    /// by the SIGSEGV handler to find where to redirect execution.
    pub fn lookup(&self, host_pc: usize) -> Option<&FastmemPatchInfo> {
        self.entries.iter().find(|e| e.fault_pc == host_pc)
    }
}

/// Whether `width_bits` at `vaddr` (page-table form) counts as misaligned
/// under `config`, honoring `only_detect_misalignment_via_page_table_on_page_boundary`.
pub fn is_misaligned(config: &Config, vaddr: u64, width_bits: u32, page_size_bits: u32) -> bool {
    let width_flag = match width_bits {
        8 => MisalignmentWidths::W8,
        16 => MisalignmentWidths::W16,
        32 => MisalignmentWidths::W32,
        64 => MisalignmentWidths::W64,
        _ => MisalignmentWidths::W128,
    };
    if !config
        .detect_misaligned_access_via_page_table
        .contains(width_flag)
    {
        return false;
    }
    let align = (width_bits / 8) as u64;
    let misaligned = vaddr % align != 0;
    if !misaligned {
        return false;
    }
    if config.only_detect_misalignment_via_page_table_on_page_boundary {
        let page_size = 1u64 << page_size_bits;
        let offset_in_page = vaddr % page_size;
        offset_in_page + align > page_size
    } else {
        true
    }
}

/// `ExclusiveReadMemory`/`ExclusiveWriteMemory` lowering shared across all
/// three access strategies: the actual load/store goes through whichever
/// strategy was chosen, but the exclusive-monitor bookkeeping is identical
/// in all three (§4.6).
pub fn exclusive_read(monitor: &ExclusiveMonitor, processor_id: usize, vaddr: u64, value: u128) {
    monitor.mark_exclusive(processor_id, vaddr, value);
}

pub fn exclusive_write(monitor: &ExclusiveMonitor, processor_id: usize, vaddr: u64) -> Result<u128, ()> {
    monitor.exclusive_write(processor_id, vaddr)
}

/// C-ABI entry points the emitter calls directly (their address is a fixed
/// property of this binary, so the emitter embeds it as an immediate rather
/// than routing it through a per-embedder thunk table like
/// [`crate::callbacks::MemoryThunks`] — these wrap `ExclusiveMonitor`
/// itself, not embedder-supplied code). Checked at emission time against
/// `Config::unsafe_ignore_global_monitor`: when that bit is set, the emitter
/// never emits a call to any of these (spec §5, "checked before the lock is
/// even acquired").
pub unsafe extern "C" fn exclusive_mark_thunk(
    monitor: *const ExclusiveMonitor,
    processor_id: u64,
    vaddr: u64,
    value_lo: u64,
    value_hi: u64,
) {
    let monitor = unsafe { &*monitor };
    let value = ((value_hi as u128) << 64) | value_lo as u128;
    exclusive_read(monitor, processor_id as usize, vaddr, value);
}

/// Returns 1 on a successful exclusive write (the caller should perform the
/// real store), 0 on failure.
pub unsafe extern "C" fn exclusive_write_thunk(
    monitor: *const ExclusiveMonitor,
    processor_id: u64,
    vaddr: u64,
) -> i32 {
    let monitor = unsafe { &*monitor };
    match exclusive_write(monitor, processor_id as usize, vaddr) {
        Ok(_) => 1,
        Err(()) => 0,
    }
}

pub unsafe extern "C" fn exclusive_clear_thunk(monitor: *const ExclusiveMonitor, processor_id: u64) {
    let monitor = unsafe { &*monitor };
    monitor.clear(processor_id as usize);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn base_config() -> Config {
        Config {
            page_table: None,
            fastmem: None,
            detect_misaligned_access_via_page_table: MisalignmentWidths::W32 | MisalignmentWidths::W64,
            only_detect_misalignment_via_page_table_on_page_boundary: false,
            optimizations: Default::default(),
            processor_id: 0,
            exclusive_monitor: Arc::new(ExclusiveMonitor::new(1)),
            always_little_endian: true,
            hook_isb: false,
            wall_clock_cntpct: false,
            enable_perf_map: false,
            perf_map_path: None,
        }
    }

    #[test]
    fn callback_is_the_default_strategy() {
        let config = base_config();
        assert_eq!(choose_strategy(&config, 32), AccessStrategy::Callback);
    }

    #[test]
    fn unmonitored_widths_are_never_flagged_misaligned() {
        let config = base_config();
        assert!(!is_misaligned(&config, 0x1001, 8, 12));
    }

    #[test]
    fn monitored_width_flags_unaligned_access() {
        let config = base_config();
        assert!(is_misaligned(&config, 0x1001, 32, 12));
        assert!(!is_misaligned(&config, 0x1000, 32, 12));
    }

    #[test]
    fn page_boundary_only_mode_ignores_interior_misalignment() {
        let mut config = base_config();
        config.only_detect_misalignment_via_page_table_on_page_boundary = true;
        // Misaligned by 4 bytes but nowhere near a 4KiB page boundary.
        assert!(!is_misaligned(&config, 0x104, 64, 12));
        // Misaligned and straddles the page boundary at 0x1000.
        assert!(is_misaligned(&config, 0xffc, 64, 12));
    }
}
