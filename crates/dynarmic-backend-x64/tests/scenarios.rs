//! End-to-end scenarios D, E (spec-level scenarios; C and the fastmem
//! SIGSEGV recovery path of Scenario C are `#[ignore]`d pending a real host
//! thread/guest-address-space harness, per `backend::exception_handler`'s
//! own ignored test). Scenario A (link-then-invalidate) lives in the
//! `dynarmic` crate's own `tests/scenarios.rs`, exercised through
//! `Jit::compile`/`Jit::dispatch` rather than hand-built `BlockCache` state,
//! since the patch resolution it's actually about lives in `Jit::compile`.
//! Scenario B lives in `rsb.rs`; Scenario F lives in `nzcv.rs`.

use dynarmic_backend_x64::exclusive_monitor::ExclusiveMonitor;

/// Scenario D: exclusive success with no cross-core intervention.
#[test]
fn scenario_d_exclusive_success() {
    let monitor = ExclusiveMonitor::new(1);
    monitor.mark_exclusive(0, 0x8000, 0x42);
    assert_eq!(monitor.exclusive_write(0, 0x8000), Ok(0x42));
}

/// Scenario E: exclusive failure by cross-core intervention.
#[test]
fn scenario_e_exclusive_failure() {
    let monitor = ExclusiveMonitor::new(2);
    monitor.mark_exclusive(0, 0x8000, 0x10);
    monitor.mark_exclusive(1, 0x8000, 0x20);
    assert_eq!(monitor.exclusive_write(1, 0x8000), Ok(0x20));
    assert_eq!(monitor.exclusive_write(0, 0x8000), Err(()));
}
