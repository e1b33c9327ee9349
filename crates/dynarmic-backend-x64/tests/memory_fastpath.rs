//! Memory fast-path strategy selection and misalignment detection
//! (testable property 10) plus exclusive-write semantics (property 11,
//! Scenarios D/E — the monitor itself is unit-tested in
//! `exclusive_monitor.rs`; this file covers the config-driven strategy
//! choice that sits in front of it).

use std::sync::Arc;

use dynarmic_backend_x64::backend::memory::{choose_strategy, is_misaligned, AccessStrategy};
use dynarmic_backend_x64::config::{Config, FastmemConfig, MisalignmentWidths, Optimizations, PageTableConfig};
use dynarmic_backend_x64::exclusive_monitor::ExclusiveMonitor;

fn base_config() -> Config {
    Config {
        page_table: None,
        fastmem: None,
        detect_misaligned_access_via_page_table: MisalignmentWidths::empty(),
        only_detect_misalignment_via_page_table_on_page_boundary: false,
        optimizations: Optimizations::default(),
        processor_id: 0,
        exclusive_monitor: Arc::new(ExclusiveMonitor::new(1)),
        always_little_endian: true,
        hook_isb: false,
        wall_clock_cntpct: false,
        enable_perf_map: false,
        perf_map_path: None,
    }
}

/// Property 10 (the strategy-selection half): the three forms are mutually
/// exclusive and fastmem takes priority when configured, matching the
/// reference design's preference order (fastmem is strictly faster than
/// page-table, which is strictly faster than the callback fallback).
#[test]
fn fastmem_takes_priority_over_page_table_when_both_configured() {
    let mut config = base_config();
    config.page_table = Some(PageTableConfig {
        base: std::ptr::null(),
        address_space_bits: 32,
        pointer_mask_bits: 20,
        absolute_offset_page_table: false,
        silently_mirror_page_table: false,
    });
    config.fastmem = Some(FastmemConfig {
        base: std::ptr::null_mut(),
        address_space_bits: 32,
        silently_mirror_fastmem: false,
        recompile_on_fastmem_failure: true,
        fastmem_exclusive_access: false,
        recompile_on_exclusive_fastmem_failure: true,
    });
    assert_eq!(choose_strategy(&config, 32), AccessStrategy::Fastmem);
}

#[test]
fn page_table_is_chosen_over_callback_when_fastmem_is_absent() {
    let mut config = base_config();
    config.page_table = Some(PageTableConfig {
        base: std::ptr::null(),
        address_space_bits: 36,
        pointer_mask_bits: 24,
        absolute_offset_page_table: true,
        silently_mirror_page_table: false,
    });
    assert_eq!(choose_strategy(&config, 64), AccessStrategy::PageTable);
}

#[test]
fn callback_is_the_strategy_with_no_optional_config() {
    let config = base_config();
    assert_eq!(choose_strategy(&config, 8), AccessStrategy::Callback);
}

#[test]
fn width_not_in_the_misalignment_bitmask_is_never_flagged() {
    let mut config = base_config();
    config.detect_misaligned_access_via_page_table = MisalignmentWidths::W64;
    assert!(!is_misaligned(&config, 0x1002, 32, 12));
}
