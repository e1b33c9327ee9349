//! `Block`: an ordered arena of `Inst`s plus the metadata the recompilation
//! pipeline needs to lower it to host code.

use crate::error::abort_programmer_error;
use crate::location::LocationDescriptor;

use super::inst::{Inst, PseudoKind};
use super::opcode::Opcode;
use super::terminal::Terminal;
use super::ty::IrType;
use super::value::Value;

/// Index into a `Block`'s instruction arena. Only meaningful relative to
/// the `Block` that produced it — never compared across blocks (the
/// invariant "no Inst in a block references an Inst in any other block" is
/// enforced simply by `InstId` having no block identity of its own: there
/// is no way to construct one except by pushing into a specific `Block`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(u32);

/// ARM-style 4-bit condition code guarding a block's entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cond(pub u8);

impl Cond {
    pub const ALWAYS: Cond = Cond(0xE);

    pub fn is_always(self) -> bool {
        self == Cond::ALWAYS
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EntryCondition {
    pub cond: Cond,
    pub fail_location: LocationDescriptor,
}

pub struct Block {
    start: LocationDescriptor,
    end: LocationDescriptor,
    entry_condition: Option<EntryCondition>,
    terminal: Terminal,
    cycle_count: u64,
    cycle_count_cond_fail: u64,
    insts: Vec<Inst>,
}

impl Block {
    pub fn new(start: LocationDescriptor) -> Self {
        Block {
            start,
            end: start,
            entry_condition: None,
            terminal: Terminal::Invalid,
            cycle_count: 0,
            cycle_count_cond_fail: 0,
            insts: Vec::new(),
        }
    }

    pub fn start(&self) -> LocationDescriptor {
        self.start
    }

    pub fn end(&self) -> LocationDescriptor {
        self.end
    }

    pub fn set_end(&mut self, end: LocationDescriptor) {
        self.end = end;
    }

    pub fn entry_condition(&self) -> Option<EntryCondition> {
        self.entry_condition
    }

    pub fn set_entry_condition(&mut self, cond: EntryCondition) {
        self.entry_condition = Some(cond);
    }

    pub fn terminal(&self) -> &Terminal {
        &self.terminal
    }

    pub fn set_terminal(&mut self, terminal: Terminal) {
        self.terminal = terminal;
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn set_cycle_count(&mut self, n: u64) {
        self.cycle_count = n;
    }

    pub fn cycle_count_cond_fail(&self) -> u64 {
        self.cycle_count_cond_fail
    }

    pub fn set_cycle_count_cond_fail(&mut self, n: u64) {
        self.cycle_count_cond_fail = n;
    }

    pub fn insts(&self) -> impl Iterator<Item = (InstId, &Inst)> {
        self.insts
            .iter()
            .enumerate()
            .map(|(i, inst)| (InstId(i as u32), inst))
    }

    pub fn inst(&self, id: InstId) -> &Inst {
        &self.insts[id.0 as usize]
    }

    fn inst_mut(&mut self, id: InstId) -> &mut Inst {
        &mut self.insts[id.0 as usize]
    }

    /// Construction contract (§4.1): the new Inst's argument count and
    /// types must match `op`'s declared arity/argument types. Appends to
    /// the end of program order, matching the decoder/optimizer's
    /// append-only usage.
    pub fn push_inst(&mut self, op: Opcode, args: &[Value]) -> InstId {
        let info = op.info();
        if args.len() != info.arg_types.len() {
            abort_programmer_error!(
                "{op:?} expects {} argument(s), got {}",
                info.arg_types.len(),
                args.len()
            );
        }
        for (i, (&arg, &expected_ty)) in args.iter().zip(info.arg_types).enumerate() {
            let actual_ty = arg.get_type(self);
            if !IrType::are_compatible(actual_ty, expected_ty) {
                abort_programmer_error!(
                    "{op:?} argument {i}: expected {expected_ty:?}, got {actual_ty:?}"
                );
            }
        }

        let id = InstId(self.insts.len() as u32);
        self.insts.push(Inst::new(op, args));
        for &arg in args {
            self.bump_use_count(arg, 1);
        }

        if let Some(kind) = PseudoKind::for_opcode(op) {
            let producer = match args[0] {
                Value::Inst(pid) => pid,
                _ => abort_programmer_error!("{op:?} requires an Inst-valued producer argument"),
            };
            if kind == PseudoKind::Nzcv {
                let producer_op = self.inst(producer).opcode();
                if !producer_op.preserves_host_nzcv() {
                    abort_programmer_error!(
                        "GetNZCVFromOp is not legal on producer opcode {producer_op:?}"
                    );
                }
            }
            self.inst_mut(producer).pseudo.install(kind, id);
        }

        id
    }

    fn bump_use_count(&mut self, value: Value, delta: i64) {
        if let Value::Inst(id) = value {
            let inst = self.inst_mut(id);
            let new_count = inst.use_count as i64 + delta;
            assert!(new_count >= 0, "use_count underflow on {id:?}");
            inst.use_count = new_count as u32;
        }
    }

    /// Replaces argument slot `index` of `id`, updating use counts so that
    /// `use_count` continues to equal the number of live argument slots
    /// referencing each Inst (§4.1 "atomically from the block's point of
    /// view" — single-threaded mutation makes this trivially atomic).
    pub fn set_arg(&mut self, id: InstId, index: usize, new_value: Value) {
        let old_value = self.inst(id).args[index];
        self.bump_use_count(old_value, -1);
        self.inst_mut(id).args[index] = new_value;
        self.bump_use_count(new_value, 1);
    }

    /// Turns `id` into the `Void` tombstone with no arguments, releasing
    /// its references to its former arguments and nulling its own
    /// pseudo-op back-pointers (§9: they are weak and meaningless once the
    /// producer is dead).
    pub fn invalidate(&mut self, id: InstId) {
        // If `id` is itself a pseudo-op, its producer's back-pointer to it
        // must be nulled too: the producer would otherwise believe a
        // consumer of that kind still exists once `id` is gone.
        if let Some(kind) = PseudoKind::for_opcode(self.inst(id).opcode()) {
            if let Value::Inst(producer) = self.inst(id).arg(0) {
                *self.inst_mut(producer).pseudo.slot_mut(kind) = None;
            }
        }

        let arg_count = self.inst(id).arg_count();
        for i in 0..arg_count {
            let old = self.inst(id).args[i];
            self.bump_use_count(old, -1);
        }
        let inst = self.inst_mut(id);
        inst.op = Opcode::Void;
        inst.args = [Value::Empty; 3];
        inst.arg_count = 0;
        inst.pseudo.clear();
    }

    /// The sole canonical rewrite primitive (§4.1): turns `id` into
    /// `Identity(replacement)`. Idempotent — calling twice with the same
    /// `replacement` leaves the block in the same observable state as
    /// calling once (testable property 2).
    pub fn replace_uses_with(&mut self, id: InstId, replacement: Value) {
        let current = self.inst(id);
        if current.op == Opcode::Identity && current.args[0] == replacement {
            return;
        }

        let arg_count = self.inst(id).arg_count();
        for i in 0..arg_count {
            let old = self.inst(id).args[i];
            self.bump_use_count(old, -1);
        }

        self.bump_use_count(replacement, 1);

        let inst = self.inst_mut(id);
        inst.op = Opcode::Identity;
        inst.args = [Value::Empty; 3];
        inst.args[0] = replacement;
        inst.arg_count = 1;
    }
}

#[cfg(test)]
impl Block {
    /// Test-only hook simulating a corrupted `use_count`, which the public
    /// API (`set_arg`/`invalidate`/`replace_uses_with`) cannot produce —
    /// used to exercise the independent verification pass in isolation.
    pub(crate) fn test_only_corrupt_use_count(&mut self, id: InstId, value: u32) {
        self.inst_mut(id).use_count = value;
    }

    /// Test-only hook bypassing `push_inst`'s construction-time type
    /// check, used to exercise `verify::run`'s independent type check.
    pub(crate) fn test_only_push_inst_unchecked(&mut self, op: Opcode, args: &[Value]) -> InstId {
        let id = InstId(self.insts.len() as u32);
        self.insts.push(Inst::new(op, args));
        for &arg in args {
            self.bump_use_count(arg, 1);
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::value::Imm;

    fn imm_u32(v: u32) -> Value {
        Value::from_imm(Imm::U32(v))
    }

    #[test]
    fn use_count_tracks_argument_slots() {
        let mut b = Block::new(LocationDescriptor::new(0, 0));
        let a = b.push_inst(Opcode::Add32, &[imm_u32(1), imm_u32(2)]);
        let c = b.push_inst(Opcode::Sub32, &[Value::Inst(a), imm_u32(3)]);
        let _d = b.push_inst(Opcode::And32, &[Value::Inst(a), Value::Inst(c)]);
        assert_eq!(b.inst(a).use_count(), 2);
        assert_eq!(b.inst(c).use_count(), 1);
    }

    #[test]
    fn set_arg_rebalances_use_counts() {
        let mut b = Block::new(LocationDescriptor::new(0, 0));
        let a = b.push_inst(Opcode::Add32, &[imm_u32(1), imm_u32(2)]);
        let c = b.push_inst(Opcode::Sub32, &[Value::Inst(a), imm_u32(3)]);
        assert_eq!(b.inst(a).use_count(), 1);
        b.set_arg(c, 0, imm_u32(9));
        assert_eq!(b.inst(a).use_count(), 0);
    }

    #[test]
    fn invalidate_clears_args_and_pseudo_slots() {
        let mut b = Block::new(LocationDescriptor::new(0, 0));
        let a = b.push_inst(Opcode::Add32, &[imm_u32(1), imm_u32(2)]);
        let nzcv = b.push_inst(Opcode::GetNZCVFromOp, &[Value::Inst(a)]);
        assert_eq!(b.inst(a).pseudo_slots().get(PseudoKind::Nzcv), Some(nzcv));

        b.invalidate(nzcv);
        assert!(b.inst(nzcv).is_invalidated());
        assert_eq!(b.inst(nzcv).arg_count(), 0);
        assert_eq!(b.inst(a).use_count(), 0);
    }

    #[test]
    fn replace_uses_with_is_idempotent() {
        let mut b = Block::new(LocationDescriptor::new(0, 0));
        let a = b.push_inst(Opcode::Add32, &[imm_u32(1), imm_u32(2)]);
        let target = b.push_inst(Opcode::Sub32, &[imm_u32(5), imm_u32(6)]);
        let replacement = Value::Inst(a);

        b.replace_uses_with(target, replacement);
        assert!(b.inst(target).is_identity());
        assert_eq!(b.inst(a).use_count(), 1);

        b.replace_uses_with(target, replacement);
        assert!(b.inst(target).is_identity());
        assert_eq!(
            b.inst(a).use_count(),
            1,
            "second ReplaceUsesWith with the same value must not double-count"
        );
    }

    #[test]
    fn identity_is_transparent_to_get_type() {
        let mut b = Block::new(LocationDescriptor::new(0, 0));
        let a = b.push_inst(Opcode::Add64, &[Value::from_imm(Imm::U64(1)), Value::from_imm(Imm::U64(2))]);
        let target = b.push_inst(Opcode::Add32, &[imm_u32(1), imm_u32(2)]);
        b.replace_uses_with(target, Value::Inst(a));
        assert_eq!(Value::Inst(target).get_type(&b), IrType::U64);
    }

    #[test]
    #[should_panic(expected = "at most one pseudo-op consumer")]
    fn second_pseudo_op_of_same_kind_aborts() {
        let mut b = Block::new(LocationDescriptor::new(0, 0));
        let a = b.push_inst(Opcode::Add32, &[imm_u32(1), imm_u32(2)]);
        b.push_inst(Opcode::GetCarryFromOp, &[Value::Inst(a)]);
        b.push_inst(Opcode::GetCarryFromOp, &[Value::Inst(a)]);
    }

    #[test]
    #[should_panic(expected = "not legal on producer opcode")]
    fn nzcv_pseudo_op_rejects_non_whitelisted_producer() {
        let mut b = Block::new(LocationDescriptor::new(0, 0));
        let a = b.push_inst(
            Opcode::ReadMemory32,
            &[Value::from_imm(Imm::U64(0x1000))],
        );
        b.push_inst(Opcode::GetNZCVFromOp, &[Value::Inst(a)]);
    }
}
