//! RSB push/pop round trip (testable property 9) and Scenario B (RSB round
//! trip surviving invalidation of the target).

use dynarmic_backend_x64::cache::dispatch::try_pop_rsb;
use dynarmic_backend_x64::cache::{BlockCache, BlockDescriptor};
use dynarmic_backend_x64::jit_state::JitState;
use dynarmic_backend_x64::location::LocationDescriptor;

fn loc(pc: u32) -> LocationDescriptor {
    LocationDescriptor::new(pc, 0)
}

#[test]
fn push_then_immediate_pop_hits() {
    let mut state = JitState::default();
    let z = loc(0x4000);
    state.push_rsb(z, 0xc0de);
    assert_eq!(try_pop_rsb(&mut state, z), Some(0xc0de));
}

/// Scenario B: push `Z`, pop it once (bypassing the block lookup), then
/// invalidate `Z` from the block cache and pop again from a *different*
/// call site — the RSB no longer holds an entry for `Z` (it was consumed
/// by the first pop), so the second attempt correctly misses and the
/// caller falls through to the dispatcher instead of crashing.
#[test]
fn rsb_falls_through_safely_after_target_invalidated() {
    let mut state = JitState::default();
    let mut cache = BlockCache::new();
    let z = loc(0x9000);

    cache.insert(
        z,
        BlockDescriptor {
            host_code_ptr: 0xaaaa,
            host_code_size: 16,
        },
        Vec::new(),
        (0x9000, 0x9004),
    );
    state.push_rsb(z, 0xaaaa);

    assert_eq!(try_pop_rsb(&mut state, z), Some(0xaaaa));

    cache.invalidate_cache_ranges(0x9000, 0x9004);
    assert!(cache.get(z).is_none());

    // RSB ring is now empty at this slot (already popped); a second pop
    // attempt for the same descriptor must miss, not panic or return stale
    // data pointing at invalidated code.
    assert_eq!(try_pop_rsb(&mut state, z), None);
}

#[test]
fn pop_with_mismatched_descriptor_misses() {
    let mut state = JitState::default();
    state.push_rsb(loc(0x1000), 0x1234);
    assert_eq!(try_pop_rsb(&mut state, loc(0x2000)), None);
}
