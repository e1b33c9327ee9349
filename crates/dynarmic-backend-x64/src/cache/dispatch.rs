//! `RSB` pop handling and the direct-mapped `FastDispatch` cache (spec
//! §4.5).
//!
//! Both exist purely to skip the full `BlockCache` hash lookup on the hot
//! path: `PopRsbHint` first checks whether the return address the guest is
//! jumping to matches the top of its own return stack buffer, and
//! `FastDispatchHint` checks a small direct-mapped table before falling
//! back to [`BlockCache::get`](crate::cache::BlockCache::get). Either miss
//! just falls through to the slow, always-correct lookup.

use crate::cache::BlockCache;
use crate::jit_state::JitState;
use crate::location::LocationDescriptor;

/// Attempts `PopRsbHint`: pops the guest's software return-address
/// prediction (maintained by the decoder/frontend, out of this crate's
/// scope) against the host RSB ring in `state`. On a match, returns the
/// host code pointer to jump to directly, skipping both `FastDispatch` and
/// the full cache lookup.
pub fn try_pop_rsb(state: &mut JitState, expected: LocationDescriptor) -> Option<u64> {
    state.pop_rsb(expected)
}

/// Direct-mapped cache: `FAST_DISPATCH_BITS` low bits of a multiplicative
/// hash of the location descriptor select a slot. A slot records the
/// descriptor it was last filled for a well as the host pointer, so a
/// lookup is "hash, compare tag, done" with no chaining — a false miss
/// (tag mismatch) just falls through to `BlockCache`, it never produces a
/// wrong answer (testable property 9's "fast dispatch hit iff no slot
/// conflict since last patch" contract).
const FAST_DISPATCH_BITS: u32 = 10;
const FAST_DISPATCH_SIZE: usize = 1 << FAST_DISPATCH_BITS;

#[derive(Clone, Copy, Default)]
struct Slot {
    tag: u64,
    host_code_ptr: u64,
    occupied: bool,
}

pub struct FastDispatchTable {
    slots: Vec<Slot>,
}

impl FastDispatchTable {
    pub fn new() -> Self {
        FastDispatchTable {
            slots: vec![Slot::default(); FAST_DISPATCH_SIZE],
        }
    }

    fn index(location: LocationDescriptor) -> usize {
        // Fibonacci hashing: multiply by the odd 64-bit constant closest to
        // 2^64/phi, keep the top `FAST_DISPATCH_BITS` bits. Cheap, and
        // spreads sequential PCs (the overwhelmingly common case) across
        // the table instead of clustering them.
        let key = location.without_singlestep().raw();
        let hashed = key.wrapping_mul(0x9E3779B97F4A7C15);
        (hashed >> (64 - FAST_DISPATCH_BITS)) as usize
    }

    pub fn lookup(&self, location: LocationDescriptor) -> Option<u64> {
        let slot = &self.slots[Self::index(location)];
        if slot.occupied && slot.tag == location.without_singlestep().raw() {
            Some(slot.host_code_ptr)
        } else {
            None
        }
    }

    pub fn insert(&mut self, location: LocationDescriptor, host_code_ptr: u64) {
        let idx = Self::index(location);
        self.slots[idx] = Slot {
            tag: location.without_singlestep().raw(),
            host_code_ptr,
            occupied: true,
        };
    }

    /// Evicts every slot tagged with `location` (called when a block is
    /// invalidated, §4.3: a stale `FastDispatch` hit must never survive a
    /// cache invalidation even though the table carries no back-reference
    /// to the `BlockCache` entry it was populated from).
    pub fn evict(&mut self, location: LocationDescriptor) {
        let idx = Self::index(location);
        if self.slots[idx].tag == location.without_singlestep().raw() {
            self.slots[idx].occupied = false;
        }
    }
}

impl Default for FastDispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Full `FastDispatchHint` resolution: try the direct-mapped table, then
/// the block cache, populating the table on a cache hit so the next visit
/// to `location` is a direct-mapped hit.
pub fn fast_dispatch(
    table: &mut FastDispatchTable,
    cache: &BlockCache,
    location: LocationDescriptor,
) -> Option<u64> {
    if let Some(ptr) = table.lookup(location) {
        return Some(ptr);
    }
    let block = cache.get(location)?;
    table.insert(location, block.host_code_ptr as u64);
    Some(block.host_code_ptr as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsb_pop_delegates_to_jit_state() {
        let mut state = JitState::default();
        let target = LocationDescriptor::new(0x1000, 0);
        state.push_rsb(target, 0xbeef);
        assert_eq!(try_pop_rsb(&mut state, target), Some(0xbeef));
    }

    #[test]
    fn fast_dispatch_table_round_trips() {
        let mut table = FastDispatchTable::new();
        let loc = LocationDescriptor::new(0x4000, 0);
        assert_eq!(table.lookup(loc), None);
        table.insert(loc, 0x1234);
        assert_eq!(table.lookup(loc), Some(0x1234));
    }

    #[test]
    fn fast_dispatch_falls_through_to_block_cache_on_miss() {
        use crate::cache::BlockDescriptor;

        let mut table = FastDispatchTable::new();
        let mut cache = BlockCache::new();
        let loc = LocationDescriptor::new(0x8000, 0);
        cache.insert(
            loc,
            BlockDescriptor {
                host_code_ptr: 0x5555,
                host_code_size: 16,
            },
            Vec::new(),
            (0x8000, 0x8004),
        );

        assert_eq!(fast_dispatch(&mut table, &cache, loc), Some(0x5555));
        // Second lookup now hits the direct-mapped table.
        assert_eq!(table.lookup(loc), Some(0x5555));
    }

    #[test]
    fn evict_clears_only_the_matching_tag() {
        let mut table = FastDispatchTable::new();
        let loc = LocationDescriptor::new(0x9000, 0);
        table.insert(loc, 0xface);
        table.evict(loc);
        assert_eq!(table.lookup(loc), None);
    }
}
