//! User-supplied callback surface the embedder implements (spec §6). Named
//! "user callbacks" rather than "host callbacks" throughout to keep
//! "host" meaning "the x86-64 machine" consistently with the rest of this
//! crate.

use crate::error::GuestException;

pub trait MemoryCallbacks {
    fn read_u8(&mut self, vaddr: u64) -> u8;
    fn read_u16(&mut self, vaddr: u64) -> u16;
    fn read_u32(&mut self, vaddr: u64) -> u32;
    fn read_u64(&mut self, vaddr: u64) -> u64;
    fn read_u128(&mut self, vaddr: u64) -> u128;

    fn write_u8(&mut self, vaddr: u64, value: u8);
    fn write_u16(&mut self, vaddr: u64, value: u16);
    fn write_u32(&mut self, vaddr: u64, value: u32);
    fn write_u64(&mut self, vaddr: u64, value: u64);
    fn write_u128(&mut self, vaddr: u64, value: u128);

    fn write_exclusive_u8(&mut self, vaddr: u64, value: u8, expected: u8) -> bool;
    fn write_exclusive_u16(&mut self, vaddr: u64, value: u16, expected: u16) -> bool;
    fn write_exclusive_u32(&mut self, vaddr: u64, value: u32, expected: u32) -> bool;
    fn write_exclusive_u64(&mut self, vaddr: u64, value: u64, expected: u64) -> bool;
    fn write_exclusive_u128(&mut self, vaddr: u64, value: u128, expected: u128) -> bool;
}

pub trait InterpreterFallback {
    fn interpreter_fallback(&mut self, pc: u64, num_instructions: u32);
}

pub trait ExceptionCallbacks {
    fn call_svc(&mut self, imm: u32);
    fn exception_raised(&mut self, pc: u64, exception: GuestException);
    fn data_cache_operation_raised(&mut self, op: u32, addr: u64);
    fn instruction_cache_operation_raised(&mut self, op: u32, addr: u64);
    fn instruction_synchronization_barrier_raised(&mut self);
}

pub trait TickCallbacks {
    fn add_ticks(&mut self, n: u64);
    fn get_ticks_remaining(&mut self) -> u64;
    fn get_cntpct(&mut self) -> u64;
}

/// What a coprocessor access compiles down to, per §6.
pub enum CoprocessorAccess {
    Callback {
        function: usize,
        user_arg: Option<usize>,
    },
    DirectPointer(*mut u32),
    DirectPointerPair([*mut u32; 2]),
    RaiseException,
}

/// One A32 coprocessor object. Each method answers how that particular
/// compile-time access should be lowered; none of them perform the access
/// themselves (that happens through `CoprocessorAccess::Callback` at guest
/// runtime, or is inlined directly for `DirectPointer*`).
pub trait A32Coprocessor {
    fn compile_send_one_word(&mut self, opc1: u32, crn: u32, crm: u32, opc2: u32) -> CoprocessorAccess;
    fn compile_send_two_words(&mut self, opc: u32, crm: u32) -> CoprocessorAccess;
    fn compile_get_one_word(&mut self, opc1: u32, crn: u32, crm: u32, opc2: u32) -> CoprocessorAccess;
    fn compile_get_two_words(&mut self, opc: u32, crm: u32) -> CoprocessorAccess;
    fn compile_load_words(&mut self, long: bool, has_option: bool, crd: u32) -> CoprocessorAccess;
    fn compile_store_words(&mut self, long: bool, has_option: bool, crd: u32) -> CoprocessorAccess;
    fn compile_internal_operation(&mut self, opc1: u32, crd: u32, crn: u32, crm: u32, opc2: u32) -> CoprocessorAccess;
}

/// Per-width C-ABI entry points the emitter calls directly from generated
/// code for the [`AccessStrategy::Callback`](crate::backend::memory::AccessStrategy::Callback)
/// memory strategy. Built once at `Jit::new` time from the embedder's
/// concrete `MemoryCallbacks` implementation via [`MemoryThunks::bind`];
/// the emitter never sees the embedder's type, only this fixed, monomorphic
/// function-pointer table (width is always known at emission time from the
/// opcode, so there is no need for a runtime-width-dispatching entry point).
/// 128-bit accesses are lowered as two 64-bit calls at the low and high
/// (`vaddr + 8`) addresses rather than a ninth thunk.
#[repr(C)]
pub struct MemoryThunks {
    pub context: *mut (),
    pub read_u8: unsafe extern "C" fn(*mut (), u64) -> u8,
    pub read_u16: unsafe extern "C" fn(*mut (), u64) -> u16,
    pub read_u32: unsafe extern "C" fn(*mut (), u64) -> u32,
    pub read_u64: unsafe extern "C" fn(*mut (), u64) -> u64,
    pub write_u8: unsafe extern "C" fn(*mut (), u64, u8),
    pub write_u16: unsafe extern "C" fn(*mut (), u64, u16),
    pub write_u32: unsafe extern "C" fn(*mut (), u64, u32),
    pub write_u64: unsafe extern "C" fn(*mut (), u64, u64),
}

impl MemoryThunks {
    pub const OFFSET_CONTEXT: usize = std::mem::offset_of!(MemoryThunks, context);
    pub const OFFSET_READ_U8: usize = std::mem::offset_of!(MemoryThunks, read_u8);
    pub const OFFSET_READ_U16: usize = std::mem::offset_of!(MemoryThunks, read_u16);
    pub const OFFSET_READ_U32: usize = std::mem::offset_of!(MemoryThunks, read_u32);
    pub const OFFSET_READ_U64: usize = std::mem::offset_of!(MemoryThunks, read_u64);
    pub const OFFSET_WRITE_U8: usize = std::mem::offset_of!(MemoryThunks, write_u8);
    pub const OFFSET_WRITE_U16: usize = std::mem::offset_of!(MemoryThunks, write_u16);
    pub const OFFSET_WRITE_U32: usize = std::mem::offset_of!(MemoryThunks, write_u32);
    pub const OFFSET_WRITE_U64: usize = std::mem::offset_of!(MemoryThunks, write_u64);

    /// Closes over `callbacks`' concrete type through monomorphized
    /// trampoline functions, so the returned table is plain C-ABI data with
    /// no generic parameter the emitter would need to know about.
    ///
    /// # Safety
    /// `callbacks` must stay valid for as long as the returned table is
    /// installed in a [`crate::jit_state::JitState`].
    pub unsafe fn bind<C: MemoryCallbacks + 'static>(callbacks: *mut C) -> Self {
        unsafe extern "C" fn read_u8<C: MemoryCallbacks>(ctx: *mut (), vaddr: u64) -> u8 {
            unsafe { (*(ctx as *mut C)).read_u8(vaddr) }
        }
        unsafe extern "C" fn read_u16<C: MemoryCallbacks>(ctx: *mut (), vaddr: u64) -> u16 {
            unsafe { (*(ctx as *mut C)).read_u16(vaddr) }
        }
        unsafe extern "C" fn read_u32<C: MemoryCallbacks>(ctx: *mut (), vaddr: u64) -> u32 {
            unsafe { (*(ctx as *mut C)).read_u32(vaddr) }
        }
        unsafe extern "C" fn read_u64<C: MemoryCallbacks>(ctx: *mut (), vaddr: u64) -> u64 {
            unsafe { (*(ctx as *mut C)).read_u64(vaddr) }
        }
        unsafe extern "C" fn write_u8<C: MemoryCallbacks>(ctx: *mut (), vaddr: u64, value: u8) {
            unsafe { (*(ctx as *mut C)).write_u8(vaddr, value) }
        }
        unsafe extern "C" fn write_u16<C: MemoryCallbacks>(ctx: *mut (), vaddr: u64, value: u16) {
            unsafe { (*(ctx as *mut C)).write_u16(vaddr, value) }
        }
        unsafe extern "C" fn write_u32<C: MemoryCallbacks>(ctx: *mut (), vaddr: u64, value: u32) {
            unsafe { (*(ctx as *mut C)).write_u32(vaddr, value) }
        }
        unsafe extern "C" fn write_u64<C: MemoryCallbacks>(ctx: *mut (), vaddr: u64, value: u64) {
            unsafe { (*(ctx as *mut C)).write_u64(vaddr, value) }
        }
        MemoryThunks {
            context: callbacks as *mut (),
            read_u8: read_u8::<C>,
            read_u16: read_u16::<C>,
            read_u32: read_u32::<C>,
            read_u64: read_u64::<C>,
            write_u8: write_u8::<C>,
            write_u16: write_u16::<C>,
            write_u32: write_u32::<C>,
            write_u64: write_u64::<C>,
        }
    }
}

/// Aggregate callback surface a `Jit` is constructed with. Kept as a single
/// trait object behind `&mut dyn UserCallbacks` at the `Jit` boundary so the
/// emitted terminal codegen (§4.4) has one ABI entry point per callback
/// family, matching §6's "vtable-like interface".
pub trait UserCallbacks:
    MemoryCallbacks + InterpreterFallback + ExceptionCallbacks + TickCallbacks
{
}

impl<T> UserCallbacks for T where
    T: MemoryCallbacks + InterpreterFallback + ExceptionCallbacks + TickCallbacks
{
}
