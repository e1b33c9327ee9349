//! `BlockOfCode`: the single, contiguous, page-aligned, executable-writable
//! region recompiled blocks are emitted into (spec §3, §4.2).
//!
//! Two cursors share one mapping: "near" code (the hot path, reachable from
//! dispatch by a 32-bit-displacement jump) grows up from the front, "far"
//! code (cold paths: exception raising, slow memory fallbacks, the
//! constant pool) grows down from the back. `SwitchToFarCode`/
//! `SwitchToNearCode` just swap which cursor subsequent `emit`/`db` calls
//! advance.
//!
//! Backed by an anonymous `mmap` rather than a crate abstraction: the
//! region needs mid-life `mprotect` transitions between RW (while the
//! emitter is writing) and RX (while guest code may be executing
//! concurrently on another host thread, §5), which is exactly the raw
//! `libc::{mmap, mprotect}` pairing other JIT-shaped crates in this
//! workspace's retrieval pack reach for directly rather than going through
//! a higher-level mmap crate.

use std::ptr::NonNull;

use crate::cache::PatchKind;
use crate::error::abort_programmer_error;

const DEFAULT_TOTAL_SIZE: usize = 128 * 1024 * 1024;
const FAR_CODE_FRACTION: usize = 4; // far code gets 1/4 of the arena, near gets the rest.

/// One contiguous MConst (constant pool) entry, deduplicated by bit pattern
/// so two blocks embedding the same 128-bit constant share one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PoolEntry {
    bits: u128,
    offset: usize,
}

pub struct BlockOfCode {
    base: NonNull<u8>,
    total_size: usize,
    near_limit: usize,
    near_cursor: usize,
    far_cursor: usize,
    emitting_far: bool,
    writable: bool,
    pool: Vec<PoolEntry>,
    prelude_complete: bool,
}

// SAFETY: the mapping is never aliased mutably from two threads at once;
// the embedder serializes compilation (§5 "recompilation may run
// concurrently with execution of other, unrelated blocks" never means
// concurrent *emission*).
unsafe impl Send for BlockOfCode {}

impl BlockOfCode {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOTAL_SIZE)
    }

    pub fn with_capacity(total_size: usize) -> Self {
        let page = page_size();
        let total_size = round_up(total_size, page);
        let base = map_rw(total_size);
        BlockOfCode {
            base,
            total_size,
            near_limit: total_size - total_size / FAR_CODE_FRACTION,
            near_cursor: 0,
            far_cursor: total_size,
            emitting_far: false,
            writable: true,
            pool: Vec::new(),
            prelude_complete: false,
        }
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn is_emitting_far_code(&self) -> bool {
        self.emitting_far
    }

    pub fn switch_to_far_code(&mut self) {
        self.emitting_far = true;
    }

    pub fn switch_to_near_code(&mut self) {
        self.emitting_far = false;
    }

    fn cursor(&self) -> usize {
        if self.emitting_far {
            self.far_cursor
        } else {
            self.near_cursor
        }
    }

    /// Absolute host address the next byte written by `emit`/`db` will land
    /// at, for building patch-site bookkeeping (§4.3).
    pub fn current_code_ptr(&self) -> *const u8 {
        unsafe { self.base.as_ptr().add(self.cursor()) }
    }

    fn require_writable(&self) {
        if !self.writable {
            abort_programmer_error!("BlockOfCode: emission attempted while code region is read-execute-only");
        }
    }

    /// Appends raw bytes at the current cursor, the common path for emitted
    /// machine code (from an `iced_x86::code_asm::CodeAssembler` flush) and
    /// literal byte sequences alike.
    pub fn emit(&mut self, bytes: &[u8]) {
        self.require_writable();
        if self.emitting_far {
            if bytes.len() > self.far_cursor - self.near_cursor.min(self.far_cursor) {
                abort_programmer_error!("BlockOfCode: far code region exhausted");
            }
            self.far_cursor -= bytes.len();
            unsafe {
                std::ptr::copy_nonoverlapping(
                    bytes.as_ptr(),
                    self.base.as_ptr().add(self.far_cursor),
                    bytes.len(),
                )
            };
        } else {
            if self.near_cursor + bytes.len() > self.near_limit {
                abort_programmer_error!("BlockOfCode: near code region exhausted");
            }
            unsafe {
                std::ptr::copy_nonoverlapping(
                    bytes.as_ptr(),
                    self.base.as_ptr().add(self.near_cursor),
                    bytes.len(),
                )
            };
            self.near_cursor += bytes.len();
        }
    }

    /// Reserves `size` bytes for a patch site without advancing past it
    /// with real content yet; the caller immediately fills the reservation
    /// with a placeholder (typically a `jmp` to a not-yet-known target) and
    /// the block cache later overwrites exactly `size` bytes in place
    /// (§4.3 "a patch must never change the emitted instruction's length").
    pub fn ensure_patch_location_size(&mut self, size: usize) -> usize {
        self.require_writable();
        let at = self.cursor();
        self.emit(&vec![0x90u8; size]); // nop-filled until the real patch lands
        at
    }

    /// Overwrites a previously reserved patch site. `at` and `bytes.len()`
    /// must exactly match a prior `ensure_patch_location_size` call:
    /// patch sites never change size after reservation (§4.3).
    pub fn patch(&mut self, at: usize, bytes: &[u8]) {
        self.require_writable();
        if at + bytes.len() > self.total_size {
            abort_programmer_error!("BlockOfCode::patch out of bounds");
        }
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.base.as_ptr().add(at), bytes.len())
        };
    }

    /// Resolves one [`PatchInformation`](crate::cache::PatchInformation) site
    /// to `target_host_addr`, encoding the byte sequence its `kind` calls
    /// for and handing it to [`Self::patch`]. `at` is the cursor offset
    /// `ensure_patch_location_size` returned when the site was reserved.
    pub fn patch_to_target(&mut self, at: usize, kind: PatchKind, target_host_addr: usize) {
        let patch_host_addr = self.base.as_ptr() as usize + at;
        match kind {
            PatchKind::JmpRel32 => {
                let rel = target_host_addr as i64 - (patch_host_addr as i64 + kind.size() as i64);
                let rel = i32::try_from(rel).expect("BlockOfCode::patch_to_target: target out of rel32 range");
                let mut bytes = vec![0xe9u8];
                bytes.extend_from_slice(&rel.to_le_bytes());
                self.patch(at, &bytes);
            }
            PatchKind::JccRel32 => {
                let rel = target_host_addr as i64 - (patch_host_addr as i64 + kind.size() as i64);
                let rel = i32::try_from(rel).expect("BlockOfCode::patch_to_target: target out of rel32 range");
                let mut bytes = vec![0x0f, 0x84]; // je; the emitter re-encodes the real condition at emission time
                bytes.extend_from_slice(&rel.to_le_bytes());
                self.patch(at, &bytes);
            }
            PatchKind::MovRcxAbs => {
                let mut bytes = vec![0x48, 0xb9];
                bytes.extend_from_slice(&(target_host_addr as u64).to_le_bytes());
                self.patch(at, &bytes);
            }
        }
    }

    /// Interns a 128-bit constant into the pool (always far code), returning
    /// its offset from `base`. Structural/bit-pattern dedup, not semantic:
    /// `0.0f64` and integer zero share a slot since both are `0u128`.
    pub fn mconst(&mut self, bits: u128) -> usize {
        if let Some(entry) = self.pool.iter().find(|e| e.bits == bits) {
            return entry.offset;
        }
        let was_far = self.emitting_far;
        self.emitting_far = true;
        self.emit(&bits.to_le_bytes());
        let offset = self.far_cursor;
        self.emitting_far = was_far;
        self.pool.push(PoolEntry { bits, offset });
        offset
    }

    /// Marks the dispatcher/prelude as emitted; subsequent compiled blocks
    /// are placed after it. One-time, like the reference design's prelude
    /// step (§4.2).
    pub fn mark_prelude_complete(&mut self) {
        self.prelude_complete = true;
    }

    pub fn prelude_complete(&self) -> bool {
        self.prelude_complete
    }

    /// Flips the whole region to read-execute, disallowing further
    /// `emit`/`patch` calls until `enable_writing` is called again. Callers
    /// do this once immediately before guest code in this region may run
    /// concurrently with further compilation of *other* blocks elsewhere.
    pub fn disable_writing(&mut self) {
        if !self.writable {
            return;
        }
        protect(self.base, self.total_size, Protection::ReadExecute);
        self.writable = false;
    }

    pub fn enable_writing(&mut self) {
        if self.writable {
            return;
        }
        protect(self.base, self.total_size, Protection::ReadWrite);
        self.writable = true;
    }
}

impl Drop for BlockOfCode {
    fn drop(&mut self) {
        unmap(self.base, self.total_size);
    }
}

#[derive(Clone, Copy)]
enum Protection {
    ReadWrite,
    ReadExecute,
}

#[cfg(unix)]
fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

#[cfg(unix)]
fn map_rw(size: usize) -> NonNull<u8> {
    unsafe {
        let ptr = libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        );
        if ptr == libc::MAP_FAILED {
            abort_programmer_error!("BlockOfCode: mmap failed: {}", std::io::Error::last_os_error());
        }
        NonNull::new_unchecked(ptr as *mut u8)
    }
}

#[cfg(unix)]
fn protect(base: NonNull<u8>, size: usize, prot: Protection) {
    let flags = match prot {
        Protection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        Protection::ReadExecute => libc::PROT_READ | libc::PROT_EXEC,
    };
    let rc = unsafe { libc::mprotect(base.as_ptr() as *mut libc::c_void, size, flags) };
    if rc != 0 {
        abort_programmer_error!("BlockOfCode: mprotect failed: {}", std::io::Error::last_os_error());
    }
}

#[cfg(unix)]
fn unmap(base: NonNull<u8>, size: usize) {
    unsafe {
        libc::munmap(base.as_ptr() as *mut libc::c_void, size);
    }
}

fn round_up(n: usize, align: usize) -> usize {
    (n + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn near_and_far_cursors_grow_towards_each_other() {
        let mut code = BlockOfCode::with_capacity(64 * 1024);
        let near_start = code.current_code_ptr();
        code.emit(&[0x90, 0x90]);
        assert_eq!(code.current_code_ptr(), unsafe { near_start.add(2) });

        code.switch_to_far_code();
        let far_start = code.current_code_ptr();
        code.emit(&[0xcc]);
        assert_eq!(code.current_code_ptr(), unsafe { far_start.sub(1) });
    }

    #[test]
    fn mconst_deduplicates_identical_bit_patterns() {
        let mut code = BlockOfCode::with_capacity(64 * 1024);
        let a = code.mconst(0x1234);
        let b = code.mconst(0x1234);
        let c = code.mconst(0x5678);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn patch_overwrites_a_reserved_location_in_place() {
        let mut code = BlockOfCode::with_capacity(64 * 1024);
        let at = code.ensure_patch_location_size(5);
        code.patch(at, &[0xe9, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    #[should_panic(expected = "read-execute-only")]
    fn emission_after_disable_writing_aborts() {
        let mut code = BlockOfCode::with_capacity(64 * 1024);
        code.disable_writing();
        code.emit(&[0x90]);
    }
}
