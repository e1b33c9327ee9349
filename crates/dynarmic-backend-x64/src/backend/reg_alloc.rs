//! `RegAlloc`: maps IR values onto the fixed host GPR/XMM file (spec
//! §4.2/§4.3), spilling to a small stack-backed slot array under pressure.
//!
//! Liveness is precomputed once per block as "last-use position": the
//! highest program-order index at which a value is still read. Choosing a
//! spill victim then reduces to picking whichever currently-bound value has
//! the furthest last-use position from the *current* instruction — Belady's
//! optimal offline algorithm, applicable here because the whole block's use
//! positions are known up front before emission starts.

use std::collections::HashMap;

use crate::error::abort_programmer_error;
use crate::ir::{Block, InstId};

/// System-V-ish GPR order, skipping rsp/rbp (frame) and r15 (pinned to the
/// `JitState` base pointer per the ABI, spec §6).
const GPR_POOL: &[u8] = &[0 /*rax*/, 1 /*rcx*/, 2 /*rdx*/, 3 /*rbx*/, 6 /*rsi*/, 7 /*rdi*/, 8, 9, 10, 11, 12, 13, 14];
const XMM_POOL: &[u8] = &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostLoc {
    Gpr(u8),
    Xmm(u8),
    Spill(u32),
}

/// What `use_gpr`/`use_xmm` hand back to the emitter: either the value is
/// already live in a register (`Direct`), or it was spilled and the
/// allocator has just rebound it to a fresh register that still needs a
/// reload `mov` from `slot` before the emitter's caller can read it
/// (spec §4.3/§4.7 "a spilled value read again must be reloaded").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Direct(HostLoc),
    Reload { loc: HostLoc, slot: u32 },
}

impl Access {
    pub fn loc(self) -> HostLoc {
        match self {
            Access::Direct(loc) | Access::Reload { loc, .. } => loc,
        }
    }
}

/// A store the emitter must append before relying on the freed register:
/// `evict_for`/`host_call` only update bookkeeping (they have no access to
/// the `CodeAssembler`), so the actual spill-store instruction is reported
/// back through this queue instead.
#[derive(Debug, Clone, Copy)]
pub enum SpillEvent {
    Store { loc: HostLoc, slot: u32 },
}

#[derive(Debug, Clone, Copy)]
struct Binding {
    loc: HostLoc,
    last_use: usize,
    scratch: bool,
}

/// Precomputed per-`InstId` last-use position, built once before emission
/// starts walking the block.
pub struct LivenessInfo {
    last_use: HashMap<InstId, usize>,
}

impl LivenessInfo {
    pub fn compute(block: &Block) -> Self {
        let mut last_use = HashMap::new();
        for (pos, (_id, inst)) in block.insts().enumerate() {
            for arg in inst.args().iter().take(inst.arg_count()) {
                if let crate::ir::Value::Inst(used) = arg {
                    last_use.insert(*used, pos);
                }
            }
        }
        // Also account for link targets/terminal references conservatively:
        // nothing in `Terminal` reads an `InstId` directly (it only carries
        // `LocationDescriptor`s), so no extra entries are needed there.
        LivenessInfo { last_use }
    }

    fn last_use_of(&self, id: InstId) -> usize {
        self.last_use.get(&id).copied().unwrap_or(usize::MAX)
    }
}

pub struct RegAlloc {
    bindings: HashMap<InstId, Binding>,
    free_gpr: Vec<u8>,
    free_xmm: Vec<u8>,
    next_spill_slot: u32,
    free_spill_slots: Vec<u32>,
    liveness: LivenessInfo,
    pending_spills: Vec<SpillEvent>,
}

impl RegAlloc {
    pub fn new(block: &Block) -> Self {
        RegAlloc {
            bindings: HashMap::new(),
            free_gpr: GPR_POOL.iter().rev().copied().collect(),
            free_xmm: XMM_POOL.iter().rev().copied().collect(),
            next_spill_slot: 0,
            free_spill_slots: Vec::new(),
            liveness: LivenessInfo::compute(block),
            pending_spills: Vec::new(),
        }
    }

    /// Drains the stores the emitter owes before trusting any register this
    /// allocator just reassigned: `evict_for`/`host_call` only touch
    /// bookkeeping, so the caller (`Emitter::access`) must flush these to
    /// real `mov`s before emitting anything that reuses the freed register.
    pub fn take_pending_spills(&mut self) -> Vec<SpillEvent> {
        std::mem::take(&mut self.pending_spills)
    }

    fn alloc_spill_slot(&mut self) -> u32 {
        self.free_spill_slots.pop().unwrap_or_else(|| {
            let slot = self.next_spill_slot;
            self.next_spill_slot += 1;
            slot
        })
    }

    /// Picks the bound, non-scratch value with the furthest last use from
    /// `at_pos` and moves it to a spill slot, returning the register it
    /// freed up. Panics if every bound value is pinned as scratch for the
    /// instruction currently being emitted — that is an emitter bug (it
    /// asked for more scratch registers than exist).
    fn evict_for(&mut self, at_pos: usize, want_gpr: bool) -> u8 {
        let victim = self
            .bindings
            .iter()
            .filter(|(_, b)| !b.scratch && matches!(b.loc, HostLoc::Gpr(_) if want_gpr) | matches!(b.loc, HostLoc::Xmm(_) if !want_gpr))
            .max_by_key(|(_, b)| b.last_use)
            .map(|(id, _)| *id);

        let Some(victim) = victim else {
            abort_programmer_error!("RegAlloc: no evictable register at position {at_pos}");
        };

        let freed_loc = self.bindings.get(&victim).unwrap().loc;
        let freed = match freed_loc {
            HostLoc::Gpr(r) | HostLoc::Xmm(r) => r,
            HostLoc::Spill(_) => unreachable!(),
        };
        let slot = self.alloc_spill_slot();
        self.bindings.get_mut(&victim).unwrap().loc = HostLoc::Spill(slot);
        self.pending_spills.push(SpillEvent::Store { loc: freed_loc, slot });
        freed
    }

    fn alloc_gpr(&mut self, at_pos: usize) -> u8 {
        self.free_gpr.pop().unwrap_or_else(|| self.evict_for(at_pos, true))
    }

    fn alloc_xmm(&mut self, at_pos: usize) -> u8 {
        self.free_xmm.pop().unwrap_or_else(|| self.evict_for(at_pos, false))
    }

    /// Binds `id` to a fresh GPR at program position `at_pos`, marking the
    /// register unavailable until `end_of_alloc_scope` or a future eviction.
    /// If `id` was previously spilled, rebinds it to a fresh register and
    /// reports the reload the caller must emit before reading it.
    pub fn use_gpr(&mut self, id: InstId, at_pos: usize) -> Access {
        if let Some(binding) = self.bindings.get(&id) {
            if let HostLoc::Spill(slot) = binding.loc {
                let reg = self.alloc_gpr(at_pos);
                let loc = HostLoc::Gpr(reg);
                self.bindings.get_mut(&id).unwrap().loc = loc;
                self.free_spill_slots.push(slot);
                return Access::Reload { loc, slot };
            }
            return Access::Direct(binding.loc);
        }
        let reg = self.alloc_gpr(at_pos);
        let loc = HostLoc::Gpr(reg);
        self.bindings.insert(
            id,
            Binding {
                loc,
                last_use: self.liveness.last_use_of(id),
                scratch: false,
            },
        );
        Access::Direct(loc)
    }

    pub fn use_xmm(&mut self, id: InstId, at_pos: usize) -> Access {
        if let Some(binding) = self.bindings.get(&id) {
            if let HostLoc::Spill(slot) = binding.loc {
                let reg = self.alloc_xmm(at_pos);
                let loc = HostLoc::Xmm(reg);
                self.bindings.get_mut(&id).unwrap().loc = loc;
                self.free_spill_slots.push(slot);
                return Access::Reload { loc, slot };
            }
            return Access::Direct(binding.loc);
        }
        let reg = self.alloc_xmm(at_pos);
        let loc = HostLoc::Xmm(reg);
        self.bindings.insert(
            id,
            Binding {
                loc,
                last_use: self.liveness.last_use_of(id),
                scratch: false,
            },
        );
        Access::Direct(loc)
    }

    /// A register the emitter may clobber freely and that carries no IR
    /// value; pinned (`scratch: true`) so it can never itself be chosen as
    /// an eviction victim while held.
    pub fn scratch_gpr(&mut self, at_pos: usize) -> HostLoc {
        let reg = self.alloc_gpr(at_pos);
        HostLoc::Gpr(reg)
    }

    pub fn scratch_xmm(&mut self, at_pos: usize) -> HostLoc {
        let reg = self.alloc_xmm(at_pos);
        HostLoc::Xmm(reg)
    }

    /// Releases a scratch location obtained from `scratch_gpr`/`scratch_xmm`
    /// back to the free pool. Bound IR values are released automatically
    /// once their last use has passed `end_of_alloc_scope`.
    pub fn release_scratch(&mut self, loc: HostLoc) {
        match loc {
            HostLoc::Gpr(r) => self.free_gpr.push(r),
            HostLoc::Xmm(r) => self.free_xmm.push(r),
            HostLoc::Spill(s) => self.free_spill_slots.push(s),
        }
    }

    /// Call after emitting the instruction at `pos`: returns any bound
    /// register whose value's last use was exactly `pos` to the free pool.
    pub fn end_of_alloc_scope(&mut self, pos: usize) {
        let dead: Vec<InstId> = self
            .bindings
            .iter()
            .filter(|(_, b)| b.last_use <= pos)
            .map(|(id, _)| *id)
            .collect();
        for id in dead {
            if let Some(binding) = self.bindings.remove(&id) {
                match binding.loc {
                    HostLoc::Gpr(r) => self.free_gpr.push(r),
                    HostLoc::Xmm(r) => self.free_xmm.push(r),
                    HostLoc::Spill(s) => self.free_spill_slots.push(s),
                }
            }
        }
    }

    /// Diagnostic used by tests and by the emitter's end-of-block assertion
    /// (spec §4.3 "the allocator must reach a fixed point"): true once every
    /// bound value's last use has passed.
    pub fn assert_no_more_uses(&self, past_pos: usize) {
        for (id, binding) in &self.bindings {
            if binding.last_use > past_pos {
                abort_programmer_error!("RegAlloc: {id:?} still live past end of block");
            }
        }
    }

    /// The calling convention boundary (`HostCall` in the reference design):
    /// spills every currently bound, non-scratch value to memory so the
    /// call may clobber the full volatile register set.
    pub fn host_call(&mut self, at_pos: usize) {
        let ids: Vec<InstId> = self.bindings.keys().copied().collect();
        for id in ids {
            if self.bindings[&id].last_use <= at_pos {
                continue;
            }
            if self.bindings[&id].scratch {
                continue;
            }
            if !matches!(self.bindings[&id].loc, HostLoc::Spill(_)) {
                let prev_loc = self.bindings[&id].loc;
                let reg = match prev_loc {
                    HostLoc::Gpr(r) | HostLoc::Xmm(r) => r,
                    HostLoc::Spill(_) => unreachable!(),
                };
                let is_gpr = matches!(prev_loc, HostLoc::Gpr(_));
                let slot = self.alloc_spill_slot();
                self.bindings.get_mut(&id).unwrap().loc = HostLoc::Spill(slot);
                self.pending_spills.push(SpillEvent::Store { loc: prev_loc, slot });
                if is_gpr {
                    self.free_gpr.push(reg);
                } else {
                    self.free_xmm.push(reg);
                }
            }
        }
    }
}
