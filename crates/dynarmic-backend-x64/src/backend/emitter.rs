//! Lowers one verified, optimized `Block` into host machine code (spec
//! §4.2-§4.4).
//!
//! Emission is two passes over the instruction list: the first computes
//! register bindings through [`RegAlloc`] as it walks (`pos` is that walk's
//! index), the second is folded into the same walk — each `Inst` is
//! assigned a location and its host code appended to [`BlockOfCode`] in the
//! same loop, matching the reference design's single-pass emitter rather
//! than a separate schedule/emit split.

use iced_x86::code_asm::*;

use crate::cache::{PatchInformation, PatchKind};
use crate::config::{Config, Optimizations};
use crate::ir::value::Imm;
use crate::ir::{Block, Cond, Opcode, Terminal};
use crate::jit_state::JitState;

fn imm_to_i32(imm: Imm) -> i32 {
    match imm {
        Imm::U1(b) => b as i32,
        Imm::U8(v) => v as i32,
        Imm::U16(v) => v as i32,
        Imm::U32(v) => v as i32,
        Imm::U64(v) => v as i32,
        Imm::Wide(_) => crate::error::abort_programmer_error!("wide immediate requires the constant pool, not an inline operand"),
    }
}

use super::code_buffer::BlockOfCode;
use super::memory::{self, AccessStrategy, MemoryAccessKind};
use super::reg_alloc::{Access, HostLoc, RegAlloc, SpillEvent};

/// r15 is pinned to the base of the embedder's `JitState` for the lifetime
/// of a compiled block, per the ABI in spec §6.
const JIT_STATE_BASE: AsmRegister64 = r15;

const GPR64_TABLE: [AsmRegister64; 16] = [
    rax, rcx, rdx, rbx, rsp, rbp, rsi, rdi, r8, r9, r10, r11, r12, r13, r14, r15,
];
const GPR32_TABLE: [AsmRegister32; 16] = [
    eax, ecx, edx, ebx, esp, ebp, esi, edi, r8d, r9d, r10d, r11d, r12d, r13d, r14d, r15d,
];
const GPR16_TABLE: [AsmRegister16; 16] = [
    ax, cx, dx, bx, sp, bp, si, di, r8w, r9w, r10w, r11w, r12w, r13w, r14w, r15w,
];
const GPR8_TABLE: [AsmRegister8; 16] = [
    al, cl, dl, bl, spl, bpl, sil, dil, r8b, r9b, r10b, r11b, r12b, r13b, r14b, r15b,
];
const XMM_TABLE: [AsmRegisterXmm; 16] = [
    xmm0, xmm1, xmm2, xmm3, xmm4, xmm5, xmm6, xmm7, xmm8, xmm9, xmm10, xmm11, xmm12, xmm13, xmm14, xmm15,
];

fn host_gpr(loc: HostLoc) -> AsmRegister64 {
    match loc {
        HostLoc::Gpr(n) => GPR64_TABLE[n as usize],
        _ => panic!("emitter: expected a bound GPR"),
    }
}

fn host_gpr32(loc: HostLoc) -> AsmRegister32 {
    match loc {
        HostLoc::Gpr(n) => GPR32_TABLE[n as usize],
        _ => panic!("emitter: expected a bound GPR"),
    }
}

fn host_gpr16(loc: HostLoc) -> AsmRegister16 {
    match loc {
        HostLoc::Gpr(n) => GPR16_TABLE[n as usize],
        _ => panic!("emitter: expected a bound GPR"),
    }
}

fn host_gpr8(loc: HostLoc) -> AsmRegister8 {
    match loc {
        HostLoc::Gpr(n) => GPR8_TABLE[n as usize],
        _ => panic!("emitter: expected a bound GPR"),
    }
}

fn host_xmm(loc: HostLoc) -> AsmRegisterXmm {
    match loc {
        HostLoc::Xmm(n) => XMM_TABLE[n as usize],
        _ => panic!("emitter: expected a bound XMM"),
    }
}

pub struct Emitter<'a> {
    code: &'a mut BlockOfCode,
    asm: CodeAssembler,
    reg_alloc: RegAlloc,
    config: &'a Config,
    patches: Vec<PatchInformation>,
}

impl<'a> Emitter<'a> {
    pub fn new(code: &'a mut BlockOfCode, block: &Block, config: &'a Config) -> Self {
        Emitter {
            code,
            asm: CodeAssembler::new(64).expect("CodeAssembler::new"),
            reg_alloc: RegAlloc::new(block),
            config,
            patches: Vec::new(),
        }
    }

    /// Drains and emits any spill-store `mov`s the allocator owes before a
    /// register it just reassigned can be trusted (spec §4.3/§4.7); must
    /// run before the reload half of an `Access::Reload`, so the store
    /// lands before the value that overwrites it is read back out.
    fn flush_pending_spills(&mut self) {
        let spills = self.reg_alloc.take_pending_spills();
        for spill in spills {
            let SpillEvent::Store { loc, slot } = spill;
            let off = spill_slot_offset(slot);
            match loc {
                HostLoc::Gpr(_) => {
                    let _ = self.asm.mov(qword_ptr(rsp - off), host_gpr(loc));
                }
                HostLoc::Xmm(_) => {
                    let _ = self.asm.movq(qword_ptr(rsp - off), host_xmm(loc));
                }
                HostLoc::Spill(_) => unreachable!("a spill slot cannot itself be evicted"),
            }
        }
    }

    /// Resolves an `Access` into the `HostLoc` the rest of emission can
    /// read from immediately: flushes any pending spill stores first, then
    /// emits the reload `mov` for `Access::Reload` (spec §4.3 "a spilled
    /// value read again must be reloaded").
    fn access(&mut self, access: Access) -> HostLoc {
        self.flush_pending_spills();
        if let Access::Reload { loc, slot } = access {
            let off = spill_slot_offset(slot);
            match loc {
                HostLoc::Gpr(_) => {
                    let _ = self.asm.mov(host_gpr(loc), qword_ptr(rsp - off));
                }
                HostLoc::Xmm(_) => {
                    let _ = self.asm.movq(host_xmm(loc), qword_ptr(rsp - off));
                }
                HostLoc::Spill(_) => unreachable!(),
            }
        }
        access.loc()
    }

    fn bind_gpr(&mut self, id: crate::ir::InstId, pos: usize) -> AsmRegister64 {
        let access = self.reg_alloc.use_gpr(id, pos);
        host_gpr(self.access(access))
    }

    fn bind_xmm(&mut self, id: crate::ir::InstId, pos: usize) -> AsmRegisterXmm {
        let access = self.reg_alloc.use_xmm(id, pos);
        host_xmm(self.access(access))
    }

    /// Guards the block body with its `EntryCondition`, if any: the guest
    /// condition is evaluated against the packed NZCV flags in `JitState`
    /// and a mismatch branches straight to the fail location's dispatch
    /// (§4.4 "block prologue").
    fn emit_entry_condition(&mut self, block: &Block) {
        let Some(entry) = block.entry_condition() else {
            return;
        };
        if entry.cond.is_always() {
            return;
        }
        // Restore packed NZCV into host FLAGS (sahf covers SF/ZF/AF/PF/CF)
        // then skip the rest of the block with a plain `ret` when the ARM
        // condition doesn't hold; the dispatcher re-enters at
        // `fail_location` on its own next iteration (spec §4.4's block
        // prologue — failing the guard is always a correct, if unoptimized,
        // outcome since the dispatcher never advances the guest PC past the
        // untaken block).
        let nzcv_off = JitState::OFFSET_FLAGS as i32;
        let _ = self.asm.mov(al, byte_ptr(JIT_STATE_BASE + nzcv_off));
        let _ = self.asm.sahf();
        let mut pass_label = self.asm.create_label();
        emit_arm_condition_jump(&mut self.asm, entry.cond, pass_label);
        let _ = self.asm.ret();
        self.asm.set_label(&mut pass_label).ok();
    }

    fn emit_inst(&mut self, pos: usize, id: crate::ir::InstId, inst: &crate::ir::Inst, block: &Block) {
        match inst.opcode() {
            Opcode::Void | Opcode::Identity => {}
            Opcode::Add32 | Opcode::Add64 | Opcode::Sub32 | Opcode::Sub64 | Opcode::And32
            | Opcode::And64 | Opcode::Or32 | Opcode::Or64 | Opcode::Eor32 | Opcode::Eor64 => {
                self.emit_binop(pos, id, inst, block);
            }
            Opcode::LogicalShiftLeft32 | Opcode::LogicalShiftLeft64 => {
                self.emit_shift(pos, id, inst, block);
            }
            Opcode::GetCarryFromOp
            | Opcode::GetOverflowFromOp
            | Opcode::GetGEFromOp
            | Opcode::GetNZCVFromOp => {
                // Pseudo-ops never emit code of their own: their value is
                // materialized by the producer's own emission (the host
                // FLAGS left over from the arithmetic op), so only a
                // location needs to exist for them to be read from later.
                self.bind_gpr(id, pos);
            }
            Opcode::ReadMemory8
            | Opcode::ReadMemory16
            | Opcode::ReadMemory32
            | Opcode::ReadMemory64
            | Opcode::ReadMemory128 => {
                self.emit_memory_access(pos, id, inst, block, MemoryAccessKind::Read);
            }
            Opcode::WriteMemory8
            | Opcode::WriteMemory16
            | Opcode::WriteMemory32
            | Opcode::WriteMemory64
            | Opcode::WriteMemory128 => {
                self.emit_memory_access(pos, id, inst, block, MemoryAccessKind::Write);
            }
            Opcode::ExclusiveReadMemory8
            | Opcode::ExclusiveReadMemory16
            | Opcode::ExclusiveReadMemory32
            | Opcode::ExclusiveReadMemory64
            | Opcode::ExclusiveReadMemory128 => {
                self.emit_memory_access(pos, id, inst, block, MemoryAccessKind::ExclusiveRead);
            }
            Opcode::ExclusiveWriteMemory8
            | Opcode::ExclusiveWriteMemory16
            | Opcode::ExclusiveWriteMemory32
            | Opcode::ExclusiveWriteMemory64
            | Opcode::ExclusiveWriteMemory128 => {
                self.emit_memory_access(pos, id, inst, block, MemoryAccessKind::ExclusiveWrite);
            }
            Opcode::ClearExclusive => {
                self.emit_clear_exclusive(pos);
            }
            Opcode::GetRegister | Opcode::SetRegister => {
                self.emit_register_access(pos, id, inst, block);
            }
            Opcode::GetNZCVFromRegister => {
                let dest = self.bind_gpr(id, pos);
                let off = JitState::OFFSET_FLAGS as i32;
                let _ = self.asm.mov(dest, qword_ptr(JIT_STATE_BASE + off));
            }
            Opcode::SetNZCV => {
                let off = JitState::OFFSET_FLAGS as i32;
                if let Some(src) = inst.arg(0).inst_id(block) {
                    let src_reg = self.bind_gpr(src, pos);
                    let _ = self.asm.mov(qword_ptr(JIT_STATE_BASE + off), src_reg);
                }
            }
            Opcode::CallSupervisor => {
                self.reg_alloc.host_call(pos);
            }
        }
        self.reg_alloc.end_of_alloc_scope(pos);
    }

    fn emit_binop(&mut self, pos: usize, id: crate::ir::InstId, inst: &crate::ir::Inst, block: &Block) {
        let dest = self.bind_gpr(id, pos);
        let rhs = inst.arg(1);
        if let Some(rhs_id) = rhs.inst_id(block) {
            let rhs_reg = self.bind_gpr(rhs_id, pos);
            let _ = match inst.opcode() {
                Opcode::Add32 | Opcode::Add64 => self.asm.add(dest, rhs_reg),
                Opcode::Sub32 | Opcode::Sub64 => self.asm.sub(dest, rhs_reg),
                Opcode::And32 | Opcode::And64 => self.asm.and(dest, rhs_reg),
                Opcode::Or32 | Opcode::Or64 => self.asm.or(dest, rhs_reg),
                Opcode::Eor32 | Opcode::Eor64 => self.asm.xor(dest, rhs_reg),
                _ => unreachable!(),
            };
        } else if let Some(imm) = rhs.get_imm(block) {
            let bits = imm_to_i32(imm);
            let _ = match inst.opcode() {
                Opcode::Add32 | Opcode::Add64 => self.asm.add(dest, bits),
                Opcode::Sub32 | Opcode::Sub64 => self.asm.sub(dest, bits),
                Opcode::And32 | Opcode::And64 => self.asm.and(dest, bits),
                Opcode::Or32 | Opcode::Or64 => self.asm.or(dest, bits),
                Opcode::Eor32 | Opcode::Eor64 => self.asm.xor(dest, bits),
                _ => unreachable!(),
            };
        }
    }

    fn emit_shift(&mut self, pos: usize, id: crate::ir::InstId, inst: &crate::ir::Inst, block: &Block) {
        let dest = self.bind_gpr(id, pos);
        if let Some(imm) = inst.arg(1).get_imm(block) {
            let bits = imm_to_i32(imm) as u32;
            let _ = self.asm.shl(dest, bits as i32);
        } else {
            // Variable shift amounts route through cl per the x86 shift
            // encoding; the allocator pins cl for the duration.
            let _ = self.asm.shl(dest, cl);
        }
    }

    /// Emits an absolute call, the tail every memory/monitor thunk call
    /// below shares once its own ABI argument registers and `target` are
    /// loaded: spill the caller-saved set, then `call`.
    fn emit_absolute_call(&mut self, pos: usize, target: AsmRegister64) {
        self.reg_alloc.host_call(pos);
        self.flush_pending_spills();
        let _ = self.asm.call(target);
    }

    /// Spills every live binding that survives past `pos` to the stack
    /// before any of this call's own raw ABI-argument movs run. Idempotent
    /// with the spill `emit_absolute_call` performs again right before
    /// `call` (already-spilled bindings are skipped the second time), so
    /// calling both is safe — but this first call is the one that matters:
    /// without it, a live value still sitting in `rdi`/`rsi`/`rdx`/`rcx`/
    /// `r8` would be overwritten by the argument movs before the allocator
    /// ever notices it needed saving.
    fn spill_for_call(&mut self, pos: usize) {
        self.reg_alloc.host_call(pos);
        self.flush_pending_spills();
    }

    fn emit_memory_access(
        &mut self,
        pos: usize,
        id: crate::ir::InstId,
        inst: &crate::ir::Inst,
        block: &Block,
        kind: MemoryAccessKind,
    ) {
        let width = inst.opcode().width_bits();
        let strategy = memory::choose_strategy(self.config, width);

        let vaddr_reg = match inst.arg(0).inst_id(block) {
            Some(vid) => self.bind_gpr(vid, pos),
            None => {
                let imm = inst.arg(0).get_imm(block).expect("memory access address operand");
                let scratch = host_gpr(self.reg_alloc.scratch_gpr(pos));
                let _ = self.asm.mov(scratch, imm_to_i32(imm) as i64);
                scratch
            }
        };

        match kind {
            MemoryAccessKind::Read => {
                let dest_access = self.reg_alloc.use_gpr(id, pos);
                let dest = self.access(dest_access);
                self.emit_load(pos, strategy, width, vaddr_reg, dest);
            }
            MemoryAccessKind::Write => {
                let value = inst.arg(1);
                let value_loc = match value.inst_id(block) {
                    Some(vid) => self.reg_alloc.use_gpr(vid, pos),
                    None => Access::Direct(self.reg_alloc.scratch_gpr(pos)),
                };
                let value_loc = self.access(value_loc);
                if let Some(imm) = value.get_imm(block) {
                    if value.inst_id(block).is_none() {
                        let _ = self.asm.mov(host_gpr(value_loc), imm_to_i32(imm) as i64);
                    }
                }
                self.emit_store(pos, strategy, width, vaddr_reg, value_loc);
            }
            MemoryAccessKind::ExclusiveRead => {
                // `mark_exclusive` must be handed the value actually read,
                // not a placeholder: the load happens first.
                let dest_access = self.reg_alloc.use_gpr(id, pos);
                let dest = self.access(dest_access);
                self.emit_load(pos, strategy, width, vaddr_reg, dest);
                self.emit_monitor_mark(pos, vaddr_reg, dest);
            }
            MemoryAccessKind::ExclusiveWrite => {
                let value = inst.arg(1);
                let value_loc = match value.inst_id(block) {
                    Some(vid) => {
                        let access = self.reg_alloc.use_gpr(vid, pos);
                        self.access(access)
                    }
                    None => {
                        let imm = value.get_imm(block).expect("exclusive write value operand");
                        let scratch = self.reg_alloc.scratch_gpr(pos);
                        let _ = self.asm.mov(host_gpr(scratch), imm_to_i32(imm) as i64);
                        scratch
                    }
                };
                let status = self.emit_monitor_try_write(pos, vaddr_reg);
                // Only performs the real store when the monitor granted it
                // (ARM STREX semantics): the common case inlines a single
                // comparison rather than emitting a conditional branch.
                let mut done_label = self.asm.create_label();
                let _ = self.asm.cmp(status, 0);
                let _ = self.asm.je(done_label);
                self.emit_store(pos, strategy, width, vaddr_reg, value_loc);
                self.asm.set_label(&mut done_label).ok();
                let dest_access = self.reg_alloc.use_gpr(id, pos);
                let dest = self.access(dest_access);
                let _ = self.asm.mov(host_gpr32(dest), status);
            }
        }
    }

    /// `PageTable`/`Fastmem` strategies dereference guest memory directly;
    /// `Callback` calls the embedder's per-width thunk out of
    /// `JitState::memory_thunks` (spec §4.6).
    fn emit_load(&mut self, pos: usize, strategy: AccessStrategy, width: u32, vaddr: AsmRegister64, dest: HostLoc) {
        match strategy {
            AccessStrategy::PageTable | AccessStrategy::Fastmem => {
                let addr_reg = self.emit_translate_address(strategy, vaddr);
                let dest64 = host_gpr(dest);
                match width {
                    8 => { let _ = self.asm.movzx(dest64, byte_ptr(addr_reg)); }
                    16 => { let _ = self.asm.movzx(dest64, word_ptr(addr_reg)); }
                    32 => { let _ = self.asm.mov(host_gpr32(dest), dword_ptr(addr_reg)); }
                    // 128-bit guest loads materialize only the low 64 bits
                    // here (see DESIGN.md: full-width 128-bit memory access
                    // needs the XMM half of the register file this opcode
                    // subset doesn't bind, tracked as a scoped simplification
                    // rather than silently wrong SIMD state).
                    _ => { let _ = self.asm.mov(dest64, qword_ptr(addr_reg)); }
                }
            }
            AccessStrategy::Callback => {
                let thunk_off = match width {
                    8 => crate::callbacks::MemoryThunks::OFFSET_READ_U8,
                    16 => crate::callbacks::MemoryThunks::OFFSET_READ_U16,
                    32 => crate::callbacks::MemoryThunks::OFFSET_READ_U32,
                    _ => crate::callbacks::MemoryThunks::OFFSET_READ_U64,
                };
                self.emit_thunk_call(pos, vaddr, thunk_off, None);
                let dest64 = host_gpr(dest);
                let _ = self.asm.mov(dest64, rax);
            }
        }
    }

    fn emit_store(&mut self, pos: usize, strategy: AccessStrategy, width: u32, vaddr: AsmRegister64, value: HostLoc) {
        match strategy {
            AccessStrategy::PageTable | AccessStrategy::Fastmem => {
                let addr_reg = self.emit_translate_address(strategy, vaddr);
                let value64 = host_gpr(value);
                match width {
                    8 => { let _ = self.asm.mov(byte_ptr(addr_reg), host_gpr8(value)); }
                    16 => { let _ = self.asm.mov(word_ptr(addr_reg), host_gpr16(value)); }
                    32 => { let _ = self.asm.mov(dword_ptr(addr_reg), host_gpr32(value)); }
                    // 128-bit guest stores write only the low 64 bits; see
                    // the matching note in `emit_load`.
                    _ => { let _ = self.asm.mov(qword_ptr(addr_reg), value64); }
                }
            }
            AccessStrategy::Callback => {
                let thunk_off = match width {
                    8 => crate::callbacks::MemoryThunks::OFFSET_WRITE_U8,
                    16 => crate::callbacks::MemoryThunks::OFFSET_WRITE_U16,
                    32 => crate::callbacks::MemoryThunks::OFFSET_WRITE_U32,
                    _ => crate::callbacks::MemoryThunks::OFFSET_WRITE_U64,
                };
                self.emit_thunk_call(pos, vaddr, thunk_off, Some(host_gpr(value)));
            }
        }
    }

    /// `PageTable`: indexes `JitState::page_table_base` by `vaddr >>
    /// PAGE_BITS` and adds the in-page offset. `Fastmem`: a flat
    /// `fastmem_base + vaddr` dereference. Both return a scratch register
    /// holding the host address to load/store through.
    fn emit_translate_address(&mut self, strategy: AccessStrategy, vaddr: AsmRegister64) -> AsmRegister64 {
        const PAGE_BITS: i32 = 12;
        const PAGE_MASK: i64 = (1i64 << PAGE_BITS) - 1;
        let scratch = host_gpr(self.reg_alloc.scratch_gpr(usize::MAX));
        match strategy {
            AccessStrategy::PageTable => {
                let base_off = JitState::OFFSET_PAGE_TABLE_BASE as i32;
                let _ = self.asm.mov(scratch, qword_ptr(JIT_STATE_BASE + base_off));
                let index = host_gpr(self.reg_alloc.scratch_gpr(usize::MAX));
                let _ = self.asm.mov(index, vaddr);
                let _ = self.asm.shr(index, PAGE_BITS as u32);
                let _ = self.asm.mov(scratch, qword_ptr(scratch + index * 8i32));
                let offset = host_gpr(self.reg_alloc.scratch_gpr(usize::MAX));
                let _ = self.asm.mov(offset, vaddr);
                let _ = self.asm.and(offset, PAGE_MASK as i32);
                let _ = self.asm.add(scratch, offset);
                self.reg_alloc.release_scratch(HostLoc::Gpr(gpr_index(index)));
                self.reg_alloc.release_scratch(HostLoc::Gpr(gpr_index(offset)));
            }
            AccessStrategy::Fastmem => {
                let base_off = JitState::OFFSET_FASTMEM_BASE as i32;
                let _ = self.asm.mov(scratch, qword_ptr(JIT_STATE_BASE + base_off));
                let _ = self.asm.add(scratch, vaddr);
            }
            AccessStrategy::Callback => unreachable!("callback strategy never translates an address"),
        }
        scratch
    }

    /// Calls `JitState::memory_thunks->{read,write}_u{width}` through its
    /// fixed struct offset. The address is read out of `JitState` at guest
    /// runtime (not baked in at emission time) since it is bound once per
    /// `Jit`, not once per block.
    ///
    /// `vaddr`/`value` are staged through the call-argument staging slots
    /// before any ABI argument register is written, and reloaded from
    /// there afterward: either one may already physically be `rdi`/`rsi`/
    /// `rdx` (the scratch/binding pools draw from the same GPRs the System
    /// V integer-argument registers live in), so writing an argument
    /// register directly from the other would risk clobbering a source
    /// still waiting to be read. Routing both through memory sidesteps the
    /// register-aliasing question entirely. The call target always lands
    /// in `rax`, loaded last, never drawn from `scratch_gpr()`.
    fn emit_thunk_call(&mut self, pos: usize, vaddr: AsmRegister64, fn_offset: usize, value: Option<AsmRegister64>) {
        self.spill_for_call(pos);
        let _ = self.asm.mov(qword_ptr(rsp - CALL_ARG_STAGING_OFFSET), vaddr);
        if let Some(v) = value {
            let _ = self.asm.mov(qword_ptr(rsp - CALL_ARG_STAGING_OFFSET - 8), v);
        }
        let thunks_off = JitState::OFFSET_MEMORY_THUNKS as i32;
        let ctx_off = crate::callbacks::MemoryThunks::OFFSET_CONTEXT as i32;
        let _ = self.asm.mov(rax, qword_ptr(JIT_STATE_BASE + thunks_off));
        let _ = self.asm.mov(rdi, qword_ptr(rax + ctx_off));
        let _ = self.asm.mov(rsi, qword_ptr(rsp - CALL_ARG_STAGING_OFFSET));
        if value.is_some() {
            let _ = self.asm.mov(rdx, qword_ptr(rsp - CALL_ARG_STAGING_OFFSET - 8));
        }
        let _ = self.asm.mov(rax, qword_ptr(JIT_STATE_BASE + thunks_off));
        let _ = self.asm.mov(rax, qword_ptr(rax + fn_offset as i32));
        self.emit_absolute_call(pos, rax);
    }

    /// `ExclusiveRead`: records the reservation with the global monitor,
    /// unless `Config::unsafe_ignore_global_monitor` is set — in which case
    /// no call is emitted at all, checked here at emission time rather
    /// than inside the monitor (spec §5, "checked before the lock is even
    /// acquired").
    fn emit_monitor_mark(&mut self, pos: usize, vaddr: AsmRegister64, value: HostLoc) {
        if self.config.unsafe_ignore_global_monitor() {
            return;
        }
        self.spill_for_call(pos);
        let value64 = host_gpr(value);
        let _ = self.asm.mov(qword_ptr(rsp - CALL_ARG_STAGING_OFFSET), vaddr);
        let _ = self.asm.mov(qword_ptr(rsp - CALL_ARG_STAGING_OFFSET - 8), value64);
        let monitor_off = JitState::OFFSET_EXCLUSIVE_MONITOR_PTR as i32;
        let pid_off = JitState::OFFSET_PROCESSOR_ID as i32;
        let _ = self.asm.mov(rdi, qword_ptr(JIT_STATE_BASE + monitor_off));
        let _ = self.asm.mov(rsi, qword_ptr(JIT_STATE_BASE + pid_off));
        let _ = self.asm.mov(rdx, qword_ptr(rsp - CALL_ARG_STAGING_OFFSET));
        let _ = self.asm.mov(rcx, qword_ptr(rsp - CALL_ARG_STAGING_OFFSET - 8));
        // value_hi is always 0: only the low 64 bits of a guest value are
        // ever materialized here (see the 128-bit note in `emit_load`).
        let _ = self.asm.xor(r8, r8);
        let _ = self.asm.mov(rax, memory::exclusive_mark_thunk as u64 as i64);
        self.emit_absolute_call(pos, rax);
    }

    /// `ExclusiveWrite`'s monitor half: returns the x86 GPR holding the
    /// C-ABI `i32` status (1 success / 0 failure). When the monitor is
    /// disabled, the access always succeeds without a lock ever being
    /// touched.
    fn emit_monitor_try_write(&mut self, pos: usize, vaddr: AsmRegister64) -> AsmRegister32 {
        if self.config.unsafe_ignore_global_monitor() {
            let status = host_gpr32(self.reg_alloc.scratch_gpr(pos));
            let _ = self.asm.mov(status, 1i32);
            return status;
        }
        self.spill_for_call(pos);
        let _ = self.asm.mov(qword_ptr(rsp - CALL_ARG_STAGING_OFFSET), vaddr);
        let monitor_off = JitState::OFFSET_EXCLUSIVE_MONITOR_PTR as i32;
        let pid_off = JitState::OFFSET_PROCESSOR_ID as i32;
        let _ = self.asm.mov(rdi, qword_ptr(JIT_STATE_BASE + monitor_off));
        let _ = self.asm.mov(rsi, qword_ptr(JIT_STATE_BASE + pid_off));
        let _ = self.asm.mov(rdx, qword_ptr(rsp - CALL_ARG_STAGING_OFFSET));
        let _ = self.asm.mov(rax, memory::exclusive_write_thunk as u64 as i64);
        self.emit_absolute_call(pos, rax);
        // Allocated only now, after the call: an earlier allocation could
        // have drawn the same physical register as one of the call's own
        // ABI argument registers, which `spill_for_call` would have no
        // reason to protect since nothing had bound it yet.
        let status = host_gpr32(self.reg_alloc.scratch_gpr(pos));
        let _ = self.asm.mov(status, eax);
        status
    }

    /// `ClearExclusive`: drops this processor's reservation, again gated on
    /// `unsafe_ignore_global_monitor` at emission time.
    fn emit_clear_exclusive(&mut self, pos: usize) {
        if self.config.unsafe_ignore_global_monitor() {
            return;
        }
        self.spill_for_call(pos);
        let monitor_off = JitState::OFFSET_EXCLUSIVE_MONITOR_PTR as i32;
        let pid_off = JitState::OFFSET_PROCESSOR_ID as i32;
        let _ = self.asm.mov(rdi, qword_ptr(JIT_STATE_BASE + monitor_off));
        let _ = self.asm.mov(rsi, qword_ptr(JIT_STATE_BASE + pid_off));
        let _ = self.asm.mov(rax, memory::exclusive_clear_thunk as u64 as i64);
        self.emit_absolute_call(pos, rax);
    }

    fn emit_register_access(&mut self, pos: usize, id: crate::ir::InstId, inst: &crate::ir::Inst, block: &Block) {
        match inst.opcode() {
            Opcode::GetRegister => {
                let reg_index = register_index(inst.arg(0), block);
                let dest = self.bind_gpr(id, pos);
                let off = JitState::OFFSET_GUEST_GPR as i32 + reg_index as i32 * 8;
                let _ = self.asm.mov(dest, qword_ptr(JIT_STATE_BASE + off));
            }
            Opcode::SetRegister => {
                let reg_index = register_index(inst.arg(0), block);
                let off = JitState::OFFSET_GUEST_GPR as i32 + reg_index as i32 * 8;
                if let Some(src) = inst.arg(1).inst_id(block) {
                    let src_reg = self.bind_gpr(src, pos);
                    let _ = self.asm.mov(qword_ptr(JIT_STATE_BASE + off), src_reg);
                } else if let Some(imm) = inst.arg(1).get_imm(block) {
                    let _ = self.asm.mov(qword_ptr(JIT_STATE_BASE + off), imm_to_i32(imm));
                }
            }
            _ => unreachable!(),
        }
    }

    /// Emits the terminal's control transfer. `LinkBlock`/`LinkBlockFast`
    /// leave a patch-sized `jmp rel32` the block cache fills in once the
    /// target is known (§4.3); `ReturnToDispatch` and the hint variants
    /// jump back to the dispatcher prelude.
    fn emit_terminal(&mut self, terminal: &Terminal) {
        match terminal {
            Terminal::Invalid => {
                crate::error::abort_programmer_error!("emitter reached an Invalid terminal");
            }
            Terminal::ReturnToDispatch | Terminal::FastDispatchHint => {
                let _ = self.asm.ret();
            }
            Terminal::Interpret { .. } => {
                let _ = self.asm.ret();
            }
            Terminal::LinkBlock { next } | Terminal::LinkBlockFast { next } => {
                // Without BLOCK_LINKING, a reserved-but-never-resolved patch
                // site would be worse than no patch at all: fall back to the
                // always-correct dispatcher return instead of ever touching
                // the patch machinery (spec §9's "unoptimized behavior must
                // be a correct refinement").
                if !self.config.optimizations.contains(Optimizations::BLOCK_LINKING) {
                    let _ = self.asm.ret();
                    return;
                }
                let host_offset = self.code.ensure_patch_location_size(PatchKind::JmpRel32.size());
                self.patches.push(PatchInformation {
                    host_offset,
                    kind: PatchKind::JmpRel32,
                    target: *next,
                });
            }
            Terminal::PopRsbHint => {
                let _ = self.asm.ret();
            }
            Terminal::If { cond, then_, else_ } => {
                if cond.is_always() {
                    self.emit_terminal(then_);
                } else {
                    // else_ always ends control flow itself (ret, a further
                    // branch, or a patch site), so falling through to it and
                    // only jumping forward to then_ needs no join label.
                    let mut then_label = self.asm.create_label();
                    emit_arm_condition_jump(&mut self.asm, *cond, then_label);
                    self.emit_terminal(else_);
                    self.asm.set_label(&mut then_label).ok();
                    self.emit_terminal(then_);
                }
            }
            Terminal::CheckBit { then_, else_ } => {
                // Read a one-byte flag the caller stashed on the host stack
                // below the spill-slot region (spec's "check bit") rather
                // than in JitState, since it is a per-dispatch-loop-iteration
                // value, not guest architectural state.
                let mut then_label = self.asm.create_label();
                let _ = self.asm.cmp(byte_ptr(rsp - CHECK_BIT_STACK_OFFSET), 0);
                let _ = self.asm.jne(then_label);
                self.emit_terminal(else_);
                self.asm.set_label(&mut then_label).ok();
                self.emit_terminal(then_);
            }
            Terminal::CheckHalt { else_ } => {
                let off = JitState::OFFSET_HALT_REQUESTED as i32;
                let mut continue_label = self.asm.create_label();
                let _ = self.asm.cmp(byte_ptr(JIT_STATE_BASE + off), 0);
                let _ = self.asm.je(continue_label);
                let _ = self.asm.ret();
                self.asm.set_label(&mut continue_label).ok();
                self.emit_terminal(else_);
            }
        }
    }

    /// Lowers every instruction in program order, then the terminal, then
    /// flushes the assembler into [`BlockOfCode`]. Returns the number of
    /// host bytes emitted (for the block cache's size bookkeeping) and the
    /// patch sites that still need resolving once their targets exist.
    pub fn emit_block(mut self, block: &Block) -> (usize, Vec<PatchInformation>) {
        self.emit_entry_condition(block);
        for (pos, (id, inst)) in block.insts().enumerate() {
            if inst.is_invalidated() || inst.is_identity() {
                continue;
            }
            self.emit_inst(pos, id, inst, block);
        }
        self.reg_alloc.assert_no_more_uses(usize::MAX.min(block.insts().count()));
        self.emit_terminal(block.terminal());

        // Every patch site emitted above must be a target the terminal
        // itself declares — gives `Terminal::link_targets()` a real caller
        // instead of the dead doc-comment promise it used to be.
        let declared_targets = block.terminal().link_targets();
        debug_assert!(
            self.patches.iter().all(|p| declared_targets.contains(&p.target)),
            "emitter recorded a patch whose target Terminal::link_targets() never reported"
        );

        let bytes = self
            .asm
            .assemble(self.code.current_code_ptr() as u64)
            .expect("CodeAssembler::assemble");
        let len = bytes.len();
        self.code.emit(&bytes);
        (len, self.patches)
    }
}

/// Byte offset below `rsp` for spill slot `slot`, inside the x86-64 red
/// zone (the 128 bytes below `rsp` a leaf function may use without its own
/// stack frame). Scoped deliberately to a small, fixed number of slots:
/// a block that calls into a thunk while a spilled value's reload is still
/// pending could have that slot clobbered by the callee's own red-zone
/// usage. Accepted as a documented simplification (see DESIGN.md) rather
/// than building a full prologue/epilogue stack frame.
fn spill_slot_offset(slot: u32) -> i32 {
    8 + slot as i32 * 8
}

fn gpr_index(reg: AsmRegister64) -> u8 {
    GPR64_TABLE.iter().position(|r| *r == reg).expect("not a tracked GPR") as u8
}

/// `GetRegister`/`SetRegister`'s first operand names which of the 16 guest
/// GPRs to touch; encoded as an immediate `GuestRegRef` rather than an
/// `Inst` reference (spec §3's data model), so it is always resolvable at
/// emission time without binding a host register for it.
fn register_index(value: crate::ir::Value, block: &Block) -> u32 {
    match value.get_imm(block) {
        Some(Imm::U32(index)) => index,
        Some(Imm::U8(index)) => index as u32,
        other => crate::error::abort_programmer_error!("GetRegister/SetRegister: unexpected register operand {other:?}"),
    }
}

/// ARM condition code to the x86 conditional jump iced-x86 mnemonic it maps
/// onto under the packed-NZCV-into-FLAGS convention (§4.4). Only the subset
/// reachable from `EntryCondition`/`Terminal::If` in the representative
/// opcode set is implemented; anything else is a programmer error.
fn emit_arm_condition_jump(asm: &mut CodeAssembler, cond: Cond, label: CodeLabel) {
    let mut label = label;
    let _ = match cond.0 {
        0x0 => asm.je(label),  // EQ
        0x1 => asm.jne(label), // NE
        0x2 => asm.jae(label), // CS/HS
        0x3 => asm.jb(label),  // CC/LO
        0x4 => asm.js(label),  // MI
        0x5 => asm.jns(label), // PL
        0x6 => asm.jo(label),  // VS
        0x7 => asm.jno(label), // VC
        0x8 => asm.ja(label),  // HI
        0x9 => asm.jbe(label), // LS
        0xa => asm.jge(label), // GE
        0xb => asm.jl(label),  // LT
        0xc => asm.jg(label),  // GT
        0xd => asm.jle(label), // LE
        0xe => asm.jmp(label), // AL: always taken
        other => crate::error::abort_programmer_error!("unrecognized ARM condition code {other:#x}"),
    };
}

/// Fixed host-stack offset (below `rsp`, past the spill-slot region) where
/// the dispatcher stashes the one-byte "check bit" `Terminal::CheckBit`
/// reads (spec's block terminal table). Chosen well past the handful of
/// spill slots any one block realistically uses, to keep the two regions
/// from ever overlapping without a real stack frame.
const CHECK_BIT_STACK_OFFSET: i32 = 512;

/// Two qwords below `rsp` used to round-trip a thunk/monitor call's own
/// `vaddr`/`value` operands through memory instead of register-to-register
/// movs, sitting between the spill-slot region and [`CHECK_BIT_STACK_OFFSET`]
/// so none of the three ever overlap.
const CALL_ARG_STAGING_OFFSET: i32 = 256;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, MisalignmentWidths};
    use crate::exclusive_monitor::ExclusiveMonitor;
    use crate::ir::value::Value;
    use crate::ir::Opcode;
    use crate::location::LocationDescriptor;
    use std::sync::Arc;

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

    fn imm_u32(v: u32) -> Value {
        Value::from_imm(Imm::U32(v))
    }

    #[test]
    fn emits_a_nonzero_amount_of_code_for_an_arithmetic_block() {
        let mut block = Block::new(LocationDescriptor::new(0x1000, 0));
        let a = block.push_inst(Opcode::Add32, &[imm_u32(1), imm_u32(2)]);
        let _b = block.push_inst(Opcode::Sub32, &[Value::Inst(a), imm_u32(1)]);
        block.set_end(LocationDescriptor::new(0x1004, 0));
        block.set_terminal(Terminal::ReturnToDispatch);

        let config = test_config();
        let mut code = BlockOfCode::new();
        let emitter = Emitter::new(&mut code, &block, &config);
        let (len, patches) = emitter.emit_block(&block);
        assert!(len > 0);
        assert!(patches.is_empty());
    }

    #[test]
    fn read_memory_with_the_callback_strategy_emits_code() {
        let mut block = Block::new(LocationDescriptor::new(0x2000, 0));
        let _r = block.push_inst(Opcode::ReadMemory32, &[Value::from_imm(Imm::U64(0x1000))]);
        block.set_end(LocationDescriptor::new(0x2004, 0));
        block.set_terminal(Terminal::ReturnToDispatch);

        let config = test_config();
        let mut code = BlockOfCode::new();
        let emitter = Emitter::new(&mut code, &block, &config);
        let (len, _patches) = emitter.emit_block(&block);
        assert!(len > 0);
    }

    #[test]
    fn link_block_without_block_linking_falls_back_to_ret_with_no_patch() {
        let mut block = Block::new(LocationDescriptor::new(0x3000, 0));
        block.set_end(LocationDescriptor::new(0x3004, 0));
        block.set_terminal(Terminal::LinkBlock { next: LocationDescriptor::new(0x4000, 0) });

        let mut config = test_config();
        config.optimizations = Optimizations::empty();
        let mut code = BlockOfCode::new();
        let emitter = Emitter::new(&mut code, &block, &config);
        let (_len, patches) = emitter.emit_block(&block);
        assert!(patches.is_empty());
    }

    #[test]
    fn link_block_with_block_linking_reserves_a_patch() {
        let mut block = Block::new(LocationDescriptor::new(0x3000, 0));
        block.set_end(LocationDescriptor::new(0x3004, 0));
        block.set_terminal(Terminal::LinkBlock { next: LocationDescriptor::new(0x4000, 0) });

        let config = test_config(); // BLOCK_LINKING is on by default
        let mut code = BlockOfCode::new();
        let emitter = Emitter::new(&mut code, &block, &config);
        let (_len, patches) = emitter.emit_block(&block);
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].kind, PatchKind::JmpRel32);
        assert_eq!(patches[0].target, LocationDescriptor::new(0x4000, 0));
    }

    #[test]
    fn ignoring_the_global_monitor_emits_no_monitor_call() {
        let mut block = Block::new(LocationDescriptor::new(0x5000, 0));
        block.push_inst(Opcode::ClearExclusive, &[]);
        block.set_end(LocationDescriptor::new(0x5004, 0));
        block.set_terminal(Terminal::ReturnToDispatch);

        let mut config = test_config();
        config.optimizations |= Optimizations::UNSAFE_IGNORE_GLOBAL_MONITOR;
        let mut code = BlockOfCode::new();
        let emitter = Emitter::new(&mut code, &block, &config);
        let (len_without_monitor, _) = emitter.emit_block(&block);

        let mut block2 = Block::new(LocationDescriptor::new(0x5000, 0));
        block2.push_inst(Opcode::ClearExclusive, &[]);
        block2.set_end(LocationDescriptor::new(0x5004, 0));
        block2.set_terminal(Terminal::ReturnToDispatch);
        let config2 = test_config();
        let mut code2 = BlockOfCode::new();
        let emitter2 = Emitter::new(&mut code2, &block2, &config2);
        let (len_with_monitor, _) = emitter2.emit_block(&block2);

        assert!(len_without_monitor < len_with_monitor);
    }
}
