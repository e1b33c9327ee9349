//! `BlockCache`: location descriptor to compiled host code lookup, plus the
//! patch bookkeeping that lets already-compiled blocks be rewired to call
//! each other directly (`LinkBlockFast`) without round-tripping through the
//! dispatcher (spec §4.3).

pub mod dispatch;

use std::collections::HashMap;

use crate::location::LocationDescriptor;

/// One kind of reference a compiled block holds to another location, each
/// needing a different byte pattern when patched in:
/// - `JccRel32` covers the conditional exits of `Terminal::If`/`CheckBit`/
///   `CheckHalt` (`0f 8x rel32`, 6 bytes).
/// - `JmpRel32` covers `LinkBlock`/`LinkBlockFast` (`e9 rel32`, 5 bytes).
/// - `MovRcxAbs` covers a not-yet-linked `ReturnToDispatch`-style indirect
///   jump that stashes the target location descriptor in rcx for the
///   dispatcher to re-look-up (`48 b9 imm64`, 10 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    JccRel32,
    JmpRel32,
    MovRcxAbs,
}

impl PatchKind {
    pub fn size(self) -> usize {
        match self {
            PatchKind::JccRel32 => 6,
            PatchKind::JmpRel32 => 5,
            PatchKind::MovRcxAbs => 10,
        }
    }
}

/// One patch site inside a compiled block: `host_offset` bytes from the
/// block's own start, referencing `target` with `kind`'s byte layout. The
/// block cache owns the list so invalidating `target` can find and rewrite
/// (or un-patch) every block that links to it (§4.3).
#[derive(Debug, Clone, Copy)]
pub struct PatchInformation {
    pub host_offset: usize,
    pub kind: PatchKind,
    pub target: LocationDescriptor,
}

#[derive(Debug, Clone, Copy)]
pub struct BlockDescriptor {
    pub host_code_ptr: usize,
    pub host_code_size: usize,
}

struct CacheEntry {
    block: BlockDescriptor,
    patches: Vec<PatchInformation>,
}

/// Keyed on [`LocationDescriptor::without_singlestep`] (§9's Open Question
/// decision, see `location.rs`): the range index below never distinguishes
/// single-step compiles from normal ones.
pub struct BlockCache {
    entries: HashMap<LocationDescriptor, CacheEntry>,
    /// Reverse index: every block address range the cache currently
    /// covers, sorted by start, for `invalidate_cache_ranges`.
    ranges: Vec<(u64, u64, LocationDescriptor)>,
}

impl BlockCache {
    pub fn new() -> Self {
        BlockCache {
            entries: HashMap::new(),
            ranges: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, location: LocationDescriptor) -> Option<BlockDescriptor> {
        self.entries
            .get(&location.without_singlestep())
            .map(|e| e.block)
    }

    /// Registers a freshly compiled block. `guest_range` is the
    /// `[start, end)` guest-address range it covers, used only by
    /// `invalidate_cache_ranges` to find blocks overlapping a modified
    /// guest page.
    pub fn insert(
        &mut self,
        location: LocationDescriptor,
        block: BlockDescriptor,
        patches: Vec<PatchInformation>,
        guest_range: (u64, u64),
    ) {
        let key = location.without_singlestep();
        self.entries.insert(key, CacheEntry { block, patches });
        self.ranges.push((guest_range.0, guest_range.1, key));
        self.ranges.sort_by_key(|&(start, _, _)| start);
    }

    /// Removes every cached block whose guest range overlaps
    /// `[start, end)` (a guest self-modifying-code write, §4.3), returning
    /// their locations so the caller can also drop any `LinkBlockFast`
    /// patches elsewhere that target them (handled by `unlink_references_to`).
    pub fn invalidate_cache_ranges(&mut self, start: u64, end: u64) -> Vec<LocationDescriptor> {
        let mut removed = Vec::new();
        self.ranges.retain(|&(s, e, loc)| {
            let overlaps = s < end && start < e;
            if overlaps {
                removed.push(loc);
            }
            !overlaps
        });
        for loc in &removed {
            self.entries.remove(loc);
        }
        removed
    }

    /// Every patch site across the whole cache that targets `location`,
    /// used to unlink references into a block before it is dropped.
    pub fn patches_targeting(&self, location: LocationDescriptor) -> Vec<(LocationDescriptor, PatchInformation)> {
        let key = location.without_singlestep();
        self.entries
            .iter()
            .flat_map(|(loc, entry)| {
                entry
                    .patches
                    .iter()
                    .filter(move |p| p.target.without_singlestep() == key)
                    .map(move |p| (*loc, *p))
            })
            .collect()
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new()
    }
}
