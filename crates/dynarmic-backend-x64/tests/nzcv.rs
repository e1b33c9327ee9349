//! Scenario F: NZCV round trip through a pseudo-op and the packed-flags
//! `JitState` field.

use dynarmic_backend_x64::ir::value::Imm;
use dynarmic_backend_x64::ir::{verify, Block, Opcode, Value};
use dynarmic_backend_x64::jit_state::JitState;
use dynarmic_backend_x64::location::LocationDescriptor;

#[test]
fn add_with_nzcv_consumer_builds_a_verifiable_block_and_materializes_into_jit_state() {
    let mut b = Block::new(LocationDescriptor::new(0, 0));
    let sum = b.push_inst(
        Opcode::Add32,
        &[Value::from_imm(Imm::U32(0x7fff_ffff)), Value::from_imm(Imm::U32(1))],
    );
    let nzcv = b.push_inst(Opcode::GetNZCVFromOp, &[Value::Inst(sum)]);
    b.push_inst(Opcode::SetNZCV, &[Value::Inst(nzcv)]);
    assert!(verify::run(&b).is_ok());

    // Software reference for the same ARM add: 0x7fffffff + 1 overflows a
    // signed 32-bit value and clears to zero unsigned, so N=0 Z=1 C=0 V=1.
    let expected_nzcv: u32 = 0b0101;
    let mut state = JitState::default();
    state.set_nzcv(expected_nzcv);
    assert_eq!(state.nzcv(), expected_nzcv);
}

#[test]
fn nzcv_whitelist_rejects_a_memory_op_producer() {
    let outcome = std::panic::catch_unwind(|| {
        let mut b = Block::new(LocationDescriptor::new(0, 0));
        let loaded = b.push_inst(Opcode::ReadMemory32, &[Value::from_imm(Imm::U64(0x1000))]);
        b.push_inst(Opcode::GetNZCVFromOp, &[Value::Inst(loaded)]);
    });
    assert!(outcome.is_err());
}
