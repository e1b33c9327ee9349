//! End-to-end scenario A (spec-level scenario): link-then-invalidate,
//! exercised through `Jit::compile`/`Jit::dispatch` rather than by hand
//! constructing `BlockCache` state, since the patch resolution this
//! scenario is actually about lives in `Jit::compile`.

use std::sync::Arc;

use dynarmic::{
    Block, Config, ExclusiveMonitor, Jit, LocationDescriptor, MisalignmentWidths, Optimizations,
    RunExit, Terminal,
};

fn loc(pc: u32) -> LocationDescriptor {
    LocationDescriptor::new(pc, 0)
}

fn test_config() -> Config {
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

/// Translate X (ending in `LinkBlock{Y}`) before Y exists, then translate Y
/// and let `Jit::compile` resolve X's pending patch, then invalidate Y's
/// range and observe X is still dispatchable while Y needs retranslation.
#[test]
fn scenario_a_link_then_invalidate() {
    let mut jit = Jit::new(test_config());

    let mut x = Block::new(loc(0x1000));
    x.set_end(loc(0x1010));
    x.set_terminal(Terminal::LinkBlock { next: loc(0x2000) });
    jit.compile(x).unwrap();

    // Y doesn't exist yet: X's LinkBlock patch sits unresolved in the cache.
    match jit.dispatch(loc(0x2000)) {
        RunExit::NeedsTranslation(target) => assert_eq!(target, loc(0x2000)),
        other => panic!("expected NeedsTranslation before Y compiles, got {other:?}"),
    }
    // X itself is already dispatchable.
    assert!(matches!(jit.dispatch(loc(0x1000)), RunExit::Dispatched(_)));

    let mut y = Block::new(loc(0x2000));
    y.set_end(loc(0x2004));
    y.set_terminal(Terminal::ReturnToDispatch);
    jit.compile(y).unwrap();

    // Compiling Y resolves X's patch as a side effect; Y is now directly
    // dispatchable too.
    match jit.dispatch(loc(0x2000)) {
        RunExit::Dispatched(_) => {}
        other => panic!("expected Dispatched once Y compiles, got {other:?}"),
    }

    // Invalidating Y's range drops Y but leaves X alone: X's patch now
    // targets a location the cache no longer has an entry for, which the
    // embedder must notice and retranslate on next dispatch.
    jit.invalidate_cache_ranges(0x2000, 0x2004);
    match jit.dispatch(loc(0x2000)) {
        RunExit::NeedsTranslation(target) => assert_eq!(target, loc(0x2000)),
        other => panic!("expected NeedsTranslation after invalidation, got {other:?}"),
    }
    assert!(matches!(jit.dispatch(loc(0x1000)), RunExit::Dispatched(_)));
}
