//! Public facade over [`dynarmic_backend_x64`]: construction, compiling
//! translated blocks, and the run loop that dispatches between them.
//!
//! Decoding guest instructions into [`Block`]s is out of scope here (spec
//! §1): callers hand this crate already-built, already-verified IR and get
//! back a compiled, cached, runnable unit. What this crate adds on top of
//! the backend crate is exactly the orchestration of decode-adjacent
//! concerns the backend doesn't own by itself: running the optimizer,
//! verifying the result, compiling it, inserting it into the cache, and
//! servicing the dispatch loop that ties cache hits, RSB hits, and fast
//! dispatch hits together into one `run` call.

use std::sync::Arc;

use dynarmic_backend_x64::backend::code_buffer::BlockOfCode;
use dynarmic_backend_x64::backend::emitter::Emitter;
use dynarmic_backend_x64::cache::dispatch::{fast_dispatch, try_pop_rsb, FastDispatchTable};
use dynarmic_backend_x64::cache::{BlockCache, BlockDescriptor};
use dynarmic_backend_x64::ir::opt::optimize;
use dynarmic_backend_x64::ir::verify;
use dynarmic_backend_x64::perf_map::PerfMap;

pub use dynarmic_backend_x64::callbacks::{
    A32Coprocessor, CoprocessorAccess, ExceptionCallbacks, InterpreterFallback, MemoryCallbacks,
    TickCallbacks, UserCallbacks,
};
pub use dynarmic_backend_x64::config::{
    Config, FastmemConfig, MisalignmentWidths, Optimizations, PageTableConfig,
};
pub use dynarmic_backend_x64::error::GuestException;
pub use dynarmic_backend_x64::exclusive_monitor::ExclusiveMonitor;
pub use dynarmic_backend_x64::ir::{Block, Cond, EntryCondition, InstId, Opcode, Terminal};
pub use dynarmic_backend_x64::jit_state::JitState;
pub use dynarmic_backend_x64::location::LocationDescriptor;

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("IR verification failed: {0}")]
    Verification(#[from] verify::VerifyError),
}

/// What `Jit::run` returns: either the guest halted cooperatively
/// (`CheckHalt` terminal took its true branch) or dispatch reached a
/// location with no compiled block, meaning the caller must translate one
/// and call `compile` before resuming (spec §4.5's "cache miss triggers
/// translation" policy — translation itself stays outside this crate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    Halted,
    /// Dispatch resolved to a compiled block's entrypoint, via the RSB,
    /// fast dispatch, or the full cache lookup (in that preference order).
    Dispatched(u64),
    NeedsTranslation(LocationDescriptor),
}

/// One translated-and-compiled unit, owning the host bytes backing it.
struct CompiledBlock {
    descriptor: BlockDescriptor,
}

/// The embedder-facing entry point: owns the code buffer, block cache, and
/// fast dispatch table for one guest execution context. Config and
/// callbacks are supplied at construction (spec §6); multiple `Jit`s may
/// exist concurrently on different host threads, sharing only an
/// [`ExclusiveMonitor`] (spec §5).
pub struct Jit {
    config: Config,
    code: BlockOfCode,
    cache: BlockCache,
    fast_dispatch: FastDispatchTable,
    state: JitState,
    compiled: Vec<CompiledBlock>,
    perf_map: Option<PerfMap>,
}

impl Jit {
    pub fn new(config: Config) -> Self {
        tracing::debug!(processor_id = config.processor_id, "constructing Jit");
        let perf_map = if config.enable_perf_map {
            match PerfMap::open(config.perf_map_path.as_deref()) {
                Ok(map) => Some(map),
                Err(err) => {
                    tracing::warn!(%err, "failed to open perf map, continuing without it");
                    None
                }
            }
        } else {
            None
        };
        Jit {
            config,
            code: BlockOfCode::new(),
            cache: BlockCache::new(),
            fast_dispatch: FastDispatchTable::new(),
            state: JitState::default(),
            compiled: Vec::new(),
            perf_map,
        }
    }

    pub fn exclusive_monitor(&self) -> Arc<ExclusiveMonitor> {
        self.config.exclusive_monitor.clone()
    }

    pub fn state(&self) -> &JitState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut JitState {
        &mut self.state
    }

    /// Runs the optimizer, verifies the result, emits host code, and
    /// registers it in the block cache at `block`'s start location. Any
    /// `LinkBlock`/`LinkBlockFast` target not yet compiled is left as an
    /// unpatched reservation; `link` resolves it once the target exists.
    pub fn compile(&mut self, mut block: Block) -> Result<(), CompileError> {
        optimize(&mut block, self.config.optimizations);
        verify::run(&block)?;

        let guest_start = block.start().pc() as u64;
        let guest_end = block.end().pc() as u64;
        let host_start = self.code.current_code_ptr() as usize;
        let start_location = block.start();

        let emitter = Emitter::new(&mut self.code, &block, &self.config);
        let (size, patches) = emitter.emit_block(&block);

        let descriptor = BlockDescriptor {
            host_code_ptr: host_start,
            host_code_size: size,
        };

        // Resolve this block's own outgoing LinkBlock/LinkBlockFast patches
        // against targets already in the cache; a target not yet compiled
        // is resolved later from the other direction, when it compiles
        // (spec §4.3: linking is symmetric, whichever side compiles second
        // does the patching).
        for patch in &patches {
            if let Some(target) = self.cache.get(patch.target) {
                self.code
                    .patch_to_target(patch.host_offset, patch.kind, target.host_code_ptr);
            }
        }

        self.cache.insert(
            start_location,
            descriptor,
            patches,
            (guest_start, guest_end.max(guest_start + 1)),
        );

        // Symmetric half: any already-compiled block with a patch site
        // that was waiting on this location gets wired up now.
        for (_referrer, patch) in self.cache.patches_targeting(start_location) {
            self.code
                .patch_to_target(patch.host_offset, patch.kind, descriptor.host_code_ptr);
        }

        if let Some(map) = &mut self.perf_map {
            map.record(host_start, size, guest_start);
        }

        self.compiled.push(CompiledBlock { descriptor });
        Ok(())
    }

    /// Drops every compiled block whose guest range overlaps
    /// `[start, end)` and evicts any stale fast-dispatch entries for it
    /// (spec §4.3, testable property 8).
    pub fn invalidate_cache_ranges(&mut self, start: u64, end: u64) {
        for location in self.cache.invalidate_cache_ranges(start, end) {
            self.fast_dispatch.evict(location);
        }
    }

    /// One dispatch step from `location`: tries the RSB, then fast
    /// dispatch, then the full cache; returns `NeedsTranslation` on a full
    /// miss rather than translating (decoding/translation is the
    /// embedder's responsibility, spec §1).
    ///
    /// This does not itself jump into host code — doing so safely requires
    /// the embedder-specific trampoline that sets up `r15`/the guest
    /// register file before transferring control, which lives outside this
    /// crate's scope. Callers integrate this resolution step with their own
    /// entry trampoline.
    pub fn dispatch(&mut self, location: LocationDescriptor) -> RunExit {
        if self.config.optimizations.contains(Optimizations::RETURN_STACK_BUFFER) {
            if let Some(ptr) = try_pop_rsb(&mut self.state, location) {
                tracing::trace!(ptr, "RSB hit");
                return RunExit::Dispatched(ptr);
            }
        }
        if self.config.optimizations.contains(Optimizations::FAST_DISPATCH) {
            if let Some(ptr) = fast_dispatch(&mut self.fast_dispatch, &self.cache, location) {
                tracing::trace!(ptr, "fast dispatch hit");
                return RunExit::Dispatched(ptr);
            }
        }
        match self.cache.get(location) {
            Some(block) => RunExit::Dispatched(block.host_code_ptr as u64),
            None => RunExit::NeedsTranslation(location),
        }
    }

    pub fn halt_requested(&self) -> bool {
        self.state.halt_requested != 0
    }

    pub fn request_halt(&mut self) {
        self.state.halt_requested = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullCallbacks;

    impl MemoryCallbacks for NullCallbacks {
        fn read_u8(&mut self, _vaddr: u64) -> u8 { 0 }
        fn read_u16(&mut self, _vaddr: u64) -> u16 { 0 }
        fn read_u32(&mut self, _vaddr: u64) -> u32 { 0 }
        fn read_u64(&mut self, _vaddr: u64) -> u64 { 0 }
        fn read_u128(&mut self, _vaddr: u64) -> u128 { 0 }
        fn write_u8(&mut self, _vaddr: u64, _value: u8) {}
        fn write_u16(&mut self, _vaddr: u64, _value: u16) {}
        fn write_u32(&mut self, _vaddr: u64, _value: u32) {}
        fn write_u64(&mut self, _vaddr: u64, _value: u64) {}
        fn write_u128(&mut self, _vaddr: u64, _value: u128) {}
        fn write_exclusive_u8(&mut self, _vaddr: u64, _value: u8, _expected: u8) -> bool { true }
        fn write_exclusive_u16(&mut self, _vaddr: u64, _value: u16, _expected: u16) -> bool { true }
        fn write_exclusive_u32(&mut self, _vaddr: u64, _value: u32, _expected: u32) -> bool { true }
        fn write_exclusive_u64(&mut self, _vaddr: u64, _value: u64, _expected: u64) -> bool { true }
        fn write_exclusive_u128(&mut self, _vaddr: u64, _value: u128, _expected: u128) -> bool { true }
    }
    impl InterpreterFallback for NullCallbacks {
        fn interpreter_fallback(&mut self, _pc: u64, _num_instructions: u32) {}
    }
    impl ExceptionCallbacks for NullCallbacks {
        fn call_svc(&mut self, _imm: u32) {}
        fn exception_raised(&mut self, _pc: u64, _exception: GuestException) {}
        fn data_cache_operation_raised(&mut self, _op: u32, _addr: u64) {}
        fn instruction_cache_operation_raised(&mut self, _op: u32, _addr: u64) {}
        fn instruction_synchronization_barrier_raised(&mut self) {}
    }
    impl TickCallbacks for NullCallbacks {
        fn add_ticks(&mut self, _n: u64) {}
        fn get_ticks_remaining(&mut self) -> u64 { u64::MAX }
        fn get_cntpct(&mut self) -> u64 { 0 }
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

    #[test]
    fn compiling_a_trivial_block_registers_it_in_the_cache() {
        let mut jit = Jit::new(test_config());
        let mut block = Block::new(LocationDescriptor::new(0x1000, 0));
        block.set_end(LocationDescriptor::new(0x1004, 0));
        block.set_terminal(Terminal::ReturnToDispatch);
        jit.compile(block).unwrap();

        match jit.dispatch(LocationDescriptor::new(0x1000, 0)) {
            RunExit::Dispatched(_ptr) => {}
            other => panic!("expected a resolved dispatch, got {other:?}"),
        }
    }

    #[test]
    fn uncompiled_location_reports_needs_translation() {
        let mut jit = Jit::new(test_config());
        match jit.dispatch(LocationDescriptor::new(0x9999, 0)) {
            RunExit::NeedsTranslation(loc) => assert_eq!(loc, LocationDescriptor::new(0x9999, 0)),
            other => panic!("expected NeedsTranslation, got {other:?}"),
        }
    }

    #[test]
    fn invalidate_cache_ranges_removes_a_compiled_block() {
        let mut jit = Jit::new(test_config());
        let mut block = Block::new(LocationDescriptor::new(0x2000, 0));
        block.set_end(LocationDescriptor::new(0x2004, 0));
        block.set_terminal(Terminal::ReturnToDispatch);
        jit.compile(block).unwrap();
        jit.invalidate_cache_ranges(0x2000, 0x2004);
        assert!(jit.cache.get(LocationDescriptor::new(0x2000, 0)).is_none());
    }
}
