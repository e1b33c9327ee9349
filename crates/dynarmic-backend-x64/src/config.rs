//! Construction-time configuration consumed by `Jit::new` (spec §6).

use std::path::PathBuf;
use std::sync::Arc;

use bitflags::bitflags;

use crate::exclusive_monitor::ExclusiveMonitor;

bitflags! {
    /// Cross-block and unsafe optimization flags. The unoptimized behavior
    /// (all bits clear) must always be a correct refinement (§9).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Optimizations: u32 {
        const BLOCK_LINKING                       = 1 << 0;
        const RETURN_STACK_BUFFER                 = 1 << 1;
        const FAST_DISPATCH                       = 1 << 2;
        const CONSTANT_FOLDING                    = 1 << 3;
        const MISC_IR_OPT                         = 1 << 4;
        const UNSAFE_UNFUSE_FMA                   = 1 << 5;
        const UNSAFE_IGNORE_GLOBAL_MONITOR         = 1 << 6;
        const UNSAFE_INACCURATE_NAN               = 1 << 7;
    }
}

impl Default for Optimizations {
    fn default() -> Self {
        Optimizations::BLOCK_LINKING
            | Optimizations::RETURN_STACK_BUFFER
            | Optimizations::FAST_DISPATCH
            | Optimizations::CONSTANT_FOLDING
            | Optimizations::MISC_IR_OPT
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MisalignmentWidths: u8 {
        const W8   = 1 << 0;
        const W16  = 1 << 1;
        const W32  = 1 << 2;
        const W64  = 1 << 3;
        const W128 = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PageTableConfig {
    pub base: *const *const u8,
    pub address_space_bits: u32,
    pub pointer_mask_bits: u32,
    pub absolute_offset_page_table: bool,
    pub silently_mirror_page_table: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct FastmemConfig {
    pub base: *mut u8,
    pub address_space_bits: u32,
    pub silently_mirror_fastmem: bool,
    pub recompile_on_fastmem_failure: bool,
    pub fastmem_exclusive_access: bool,
    pub recompile_on_exclusive_fastmem_failure: bool,
}

#[derive(Clone)]
pub struct Config {
    pub page_table: Option<PageTableConfig>,
    pub fastmem: Option<FastmemConfig>,
    pub detect_misaligned_access_via_page_table: MisalignmentWidths,
    pub only_detect_misalignment_via_page_table_on_page_boundary: bool,
    pub optimizations: Optimizations,
    pub processor_id: u32,
    pub exclusive_monitor: Arc<ExclusiveMonitor>,
    pub always_little_endian: bool,
    pub hook_isb: bool,
    pub wall_clock_cntpct: bool,
    pub enable_perf_map: bool,
    pub perf_map_path: Option<PathBuf>,
}

impl Config {
    pub fn unsafe_ignore_global_monitor(&self) -> bool {
        self.optimizations
            .contains(Optimizations::UNSAFE_IGNORE_GLOBAL_MONITOR)
    }
}

// SAFETY: `page_table`/`fastmem` carry raw pointers into guest-memory
// regions the embedder owns for the lifetime of the `Jit`; the embedder is
// responsible for that memory outliving the `Jit` and for not aliasing it
// unsoundly across threads (spec §5: multiple Jits may run on different
// host threads concurrently, sharing only the `ExclusiveMonitor` and
// embedder-visible guest memory).
unsafe impl Send for Config {}
unsafe impl Sync for Config {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_optimizations_exclude_unsafe_bits() {
        let opts = Optimizations::default();
        assert!(opts.contains(Optimizations::BLOCK_LINKING));
        assert!(!opts.contains(Optimizations::UNSAFE_IGNORE_GLOBAL_MONITOR));
        assert!(!opts.contains(Optimizations::UNSAFE_INACCURATE_NAN));
    }
}
