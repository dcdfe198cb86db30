//! Phase-2 lowering: linear-scan register allocation over the Phase-1
//! streams.
//!
//! One forward pass per stream.  Each instruction acquires register slots
//! for its sources and destination, appending spill stores and reloads to
//! the Phase-2 stream as needed, then appends its own Phase-2 op.  The
//! allocation discipline is deliberately conservative: the whole file is
//! dropped after every call, and occupants are flushed at labels, jumps,
//! the first push of an argument list, and writes through pointers, so
//! that join points and memory aliases always observe frame state.
//!
//! Spill victims are chosen by furthest end of life.  A victim whose own
//! lifetime would outlast the incoming variable is still spilled; there is
//! no spill-self path.

use log::trace;

use crate::common::PTR_SIZE;
use crate::error::{CompileError, Result};
use crate::middle::ir::{Op, Ph2Instr};
use crate::middle::store::{BaseType, FuncId, Store, VarId, GLOBAL_FRAME};

use super::regfile::{RegFile, REG_COUNT, TEMP_SLOT};

/// Lower both Phase-1 streams into Phase-2 IR.  Run the liveness pass
/// first; lowering trusts the end-of-life indices it left behind.
pub fn lower(store: &mut Store) -> Result<()> {
    Lowerer::new(store).run()
}

struct Lowerer<'a> {
    store: &'a mut Store,
    regs: RegFile,
    cur_fn: FuncId,
    /// Position of the next pushed argument within the current list.
    arg_idx: usize,
}

impl<'a> Lowerer<'a> {
    fn new(store: &'a mut Store) -> Self {
        Lowerer {
            store,
            regs: RegFile::new(),
            cur_fn: GLOBAL_FRAME,
            arg_idx: 0,
        }
    }

    fn push(&mut self, instr: Ph2Instr) -> Result<()> {
        self.store.push_ph2(instr)?;
        Ok(())
    }

    /// Home frame offset of a variable, assigning one at the end of the
    /// owning frame if the variable has none yet.
    fn home_offset(&mut self, var: VarId) -> i32 {
        let v = *self.store.var(var);
        if v.offset != 0 {
            return v.offset;
        }
        let frame = if v.is_global { GLOBAL_FRAME } else { self.cur_fn };
        let ofs = self.store.func(frame).stack_size;
        self.store.var_mut(var).offset = ofs;
        self.store.func_mut(frame).stack_size += PTR_SIZE;
        ofs
    }

    fn store_op(&self, var: VarId) -> Op {
        if self.store.var(var).is_global {
            Op::GlobalStore
        } else {
            Op::Store
        }
    }

    fn load_op(&self, var: VarId) -> Op {
        if self.store.var(var).is_global {
            Op::GlobalLoad
        } else {
            Op::Load
        }
    }

    /// Reload `var` from its home slot into `idx`, leaving the slot clean.
    fn reload(&mut self, var: VarId, idx: usize) -> Result<()> {
        let mut p = Ph2Instr::new(self.load_op(var));
        p.dest = idx as i32;
        p.src0 = self.store.var(var).offset;
        self.regs.occupy(idx, var, false);
        self.push(p)
    }

    /// Occupant with the furthest end of life, skipping `exclude`.
    fn pick_victim(&self, exclude: Option<usize>) -> usize {
        let mut best = 0;
        let mut furthest = 0;
        for i in 0..REG_COUNT {
            if exclude == Some(i) {
                continue;
            }
            if let Some(occ) = self.regs.slots[i].var {
                let eol = self.store.var(occ).eol;
                if eol > furthest || furthest == 0 {
                    furthest = eol;
                    best = i;
                }
            }
        }
        best
    }

    /// Flush slot `idx` to its occupant's home slot.  The occupant keeps
    /// (or is assigned) a home offset even when clean.
    fn spill_slot(&mut self, idx: usize) -> Result<()> {
        let Some(occ) = self.regs.slots[idx].var else {
            return Ok(());
        };
        let ofs = self.home_offset(occ);
        if self.regs.slots[idx].dirty {
            trace!("spill slot {idx} -> offset {ofs}");
            let mut p = Ph2Instr::new(self.store_op(occ));
            p.src0 = idx as i32;
            p.src1 = ofs;
            self.push(p)?;
        }
        Ok(())
    }

    /// Slot holding `var` as a source operand, reloading it from its frame
    /// slot if necessary and spilling a victim when the file is full.
    fn take_for_source(&mut self, var: VarId, reserved: Option<usize>) -> Result<usize> {
        if let Some(i) = self.regs.find(var) {
            return Ok(i);
        }
        if let Some(i) = self.regs.try_free() {
            self.reload(var, i)?;
            return Ok(i);
        }
        let victim = self.pick_victim(reserved);
        self.spill_slot(victim)?;
        self.reload(var, victim)?;
        Ok(victim)
    }

    /// Slot that will hold `var` after the current instruction `pc`.  An
    /// expiring source slot may be reused; `hold_src1` forbids reusing (or
    /// victimizing) `src1`, for ops whose emission reads source 1 after
    /// writing the destination.
    fn take_for_dest(
        &mut self,
        var: VarId,
        pc: usize,
        src0: Option<usize>,
        src1: Option<usize>,
        hold_src1: bool,
    ) -> Result<usize> {
        if let Some(i) = self.regs.find(var) {
            self.regs.slots[i].dirty = true;
            return Ok(i);
        }
        if let Some(i) = self.regs.try_free() {
            self.regs.occupy(i, var, true);
            return Ok(i);
        }
        for reuse in [src0, if hold_src1 { None } else { src1 }] {
            if let Some(i) = reuse {
                if let Some(occ) = self.regs.slots[i].var {
                    if self.store.var(occ).eol == pc {
                        self.regs.occupy(i, var, true);
                        return Ok(i);
                    }
                }
            }
        }
        let victim = self.pick_victim(if hold_src1 { src1 } else { None });
        self.spill_slot(victim)?;
        self.regs.occupy(victim, var, true);
        Ok(victim)
    }

    /// Flush dirty occupants to their frame slots and empty the file.
    /// Occupants dying exactly at `pc` are left alone.  With
    /// `globals_only`, dirty locals are neither stored nor evicted.
    fn spill_all(&mut self, pc: Option<usize>, globals_only: bool) -> Result<()> {
        for i in 0..REG_COUNT {
            let Some(occ) = self.regs.slots[i].var else {
                continue;
            };
            if pc == Some(self.store.var(occ).eol) {
                continue;
            }
            if !self.regs.slots[i].dirty {
                self.regs.evict(i);
                continue;
            }
            if !self.store.var(occ).is_global && globals_only {
                continue;
            }
            let ofs = self.home_offset(occ);
            let mut p = Ph2Instr::new(self.store_op(occ));
            p.src0 = i as i32;
            p.src1 = ofs;
            self.push(p)?;
            self.regs.evict(i);
        }
        Ok(())
    }

    /// Place a variable in its frame: scalars take one padded word,
    /// structs their rounded size, arrays a pointer-sized header followed
    /// by the payload.  Array allocation also stores the payload address
    /// into the header slot, so the variable's name yields the base
    /// pointer.
    fn lower_alloc(&mut self, var: VarId, pc: usize) -> Result<()> {
        let v = *self.store.var(var);
        let frame = if v.is_global { GLOBAL_FRAME } else { self.cur_fn };
        let base_ofs = self.store.func(frame).stack_size;
        self.store.var_mut(var).offset = base_ofs;

        if v.array_size == 0 {
            // scalars pad to one word, structs round up to word size
            let grow = if v.ptr > 0 || v.is_func {
                PTR_SIZE
            } else {
                let ty = self
                    .store
                    .find_type(v.type_name)
                    .ok_or(CompileError::UnknownType(v.type_name))?;
                match self.store.typ(ty).base {
                    BaseType::Int | BaseType::Char => PTR_SIZE,
                    _ => round_word(self.store.typ(ty).size),
                }
            };
            self.store.func_mut(frame).stack_size += grow;
            return Ok(());
        }

        // Array: header word first, then the payload.
        self.store.func_mut(frame).stack_size += PTR_SIZE;
        let reg = self.take_for_dest(var, pc, None, None, false)?;

        let mut addr = Ph2Instr::new(if v.is_global {
            Op::GlobalAddrOf
        } else {
            Op::AddrOf
        });
        addr.src0 = self.store.func(frame).stack_size;
        addr.dest = reg as i32;
        self.push(addr)?;

        let payload = if v.ptr > 0 {
            PTR_SIZE * v.array_size as i32
        } else {
            let ty = self
                .store
                .find_type(v.type_name)
                .ok_or(CompileError::UnknownType(v.type_name))?;
            self.store.typ(ty).size * v.array_size as i32
        };
        self.store.func_mut(frame).stack_size += round_word(payload);

        let mut header = Ph2Instr::new(self.store_op(var));
        header.src0 = reg as i32;
        header.src1 = base_ofs;
        self.push(header)
    }

    /// The global-initializer stream, lowered against the global frame.
    fn run_globals(&mut self) -> Result<()> {
        for i in 0..self.store.global_ir.len() {
            let instr = self.store.global_ir[i];
            match instr.op {
                Op::Alloc => self.lower_alloc(instr.src0_var()?, i)?,
                Op::LoadConst => {
                    let dest = instr.dest_var()?;
                    let reg = self.take_for_dest(dest, i, None, None, false)?;
                    let mut p = Ph2Instr::new(Op::LoadConst);
                    p.src0 = self.store.var(dest).init_val;
                    p.dest = reg as i32;
                    self.push(p)?;
                }
                Op::Assign => {
                    let s0 = self.take_for_source(instr.src0_var()?, None)?;
                    let dest = instr.dest_var()?;
                    let reg = self.take_for_dest(dest, i, Some(s0), None, false)?;
                    let mut p = Ph2Instr::new(Op::Assign);
                    p.src0 = s0 as i32;
                    p.dest = reg as i32;
                    self.push(p)?;
                    // write the initialized value straight home
                    let mut st = Ph2Instr::new(Op::GlobalStore);
                    st.src0 = reg as i32;
                    st.src1 = self.store.var(dest).offset;
                    self.push(st)?;
                }
                op => return Err(CompileError::UnsupportedGlobalOp(op)),
            }
        }
        // hand control to the user program
        let mut jump = Ph2Instr::new(Op::Jump);
        jump.func_name = Some(crate::common::id("main"));
        self.push(jump)
    }

    fn run_body(&mut self) -> Result<()> {
        use Op::*;

        for i in 0..self.store.body_ir.len() {
            let instr = self.store.body_ir[i];
            self.regs.expire(self.store, i);

            // Caller-save discipline: every live value was flushed before
            // the call, and the callee owns all eight slots.
            if i > 0 && matches!(self.store.body_ir[i - 1].op, Call | Indirect) {
                self.regs.clear();
            }

            match instr.op {
                BlockStart => self.push(Ph2Instr::new(BlockStart))?,
                BlockEnd => {
                    if i == 0 || self.store.body_ir[i - 1].op != Return {
                        self.spill_all(None, true)?;
                    }
                    self.push(Ph2Instr::new(BlockEnd))?;
                }
                Define => {
                    let name = instr.func_name.ok_or(CompileError::Malformed(Define))?;
                    self.cur_fn = self
                        .store
                        .find_func(name)
                        .ok_or(CompileError::UnknownFunction(name))?;
                    let mut p = Ph2Instr::new(Define);
                    p.func_name = Some(name);
                    self.push(p)?;

                    // incoming arguments occupy the first slots, dirty, and
                    // the spill writes them into the fresh frame
                    let params = self.store.func(self.cur_fn).params.clone();
                    if params.len() > REG_COUNT {
                        return Err(CompileError::TooManyParams {
                            name,
                            count: params.len(),
                        });
                    }
                    self.regs.clear();
                    for (j, &param) in params.iter().enumerate() {
                        self.regs.occupy(j, param, true);
                    }
                    self.spill_all(None, false)?;
                }
                Alloc => self.lower_alloc(instr.src0_var()?, i)?,
                LoadConst | LoadDataAddr => {
                    let dest = instr.dest_var()?;
                    let reg = self.take_for_dest(dest, i, None, None, false)?;
                    let mut p = Ph2Instr::new(instr.op);
                    p.src0 = self.store.var(dest).init_val;
                    p.dest = reg as i32;
                    self.push(p)?;
                }
                Label => {
                    // synchronize state at join points (e.g. a loop top)
                    // unless control can only arrive with a clean file
                    if i == 0 || !matches!(self.store.body_ir[i - 1].op, Branch | Jump) {
                        self.spill_all(None, false)?;
                    }
                    let mut p = Ph2Instr::new(Label);
                    p.func_name = Some(self.store.var(instr.src0_var()?).name);
                    self.push(p)?;
                }
                Jump => {
                    self.spill_all(None, false)?;
                    let mut p = Ph2Instr::new(Jump);
                    p.func_name = Some(self.store.var(instr.dest_var()?).name);
                    self.push(p)?;
                }
                Branch => {
                    // keep values dying at the branch itself resident
                    self.spill_all(Some(i), false)?;
                    let cond = self.take_for_source(instr.dest_var()?, None)?;
                    let mut p = Ph2Instr::new(Branch);
                    p.src0 = cond as i32;
                    p.true_label = Some(self.store.var(instr.src0_var()?).name);
                    p.false_label = Some(self.store.var(instr.src1_var()?).name);
                    self.push(p)?;
                }
                Push => {
                    if self.arg_idx == 0 {
                        self.spill_all(None, false)?;
                    }
                    let arg = instr.src0_var()?;
                    let mut p = Ph2Instr::new(self.load_op(arg));
                    p.src0 = self.store.var(arg).offset;
                    p.dest = self.arg_idx as i32;
                    self.push(p)?;
                    self.arg_idx += 1;
                }
                Call => {
                    if i == 0 || self.store.body_ir[i - 1].op != Push {
                        self.spill_all(None, false)?;
                    }
                    let mut p = Ph2Instr::new(Call);
                    p.func_name = instr.func_name;
                    self.push(p)?;
                    self.arg_idx = 0;
                }
                Indirect => {
                    if i == 0 || self.store.body_ir[i - 1].op != Push {
                        self.spill_all(None, false)?;
                    }
                    // the call target rides in the reserved temporary, so
                    // the argument registers stay untouched
                    let mut load = Ph2Instr::new(Load);
                    load.src0 = self.store.var(instr.src0_var()?).offset;
                    load.dest = TEMP_SLOT;
                    self.push(load)?;
                    self.push(Ph2Instr::new(Indirect))?;
                    self.arg_idx = 0;
                }
                RetVal => {
                    // slot 0 is the return register
                    let reg = self.take_for_dest(instr.dest_var()?, i, Some(0), None, false)?;
                    let mut p = Ph2Instr::new(Assign);
                    p.src0 = 0;
                    p.dest = reg as i32;
                    self.push(p)?;
                }
                Return => {
                    // locals die with the frame; globals must reach memory
                    self.spill_all(None, true)?;
                    let src = match instr.src0 {
                        Some(v) => self.take_for_source(v, None)? as i32,
                        None => -1,
                    };
                    let mut p = Ph2Instr::new(Return);
                    p.src0 = src;
                    self.push(p)?;
                }
                AddrOf => {
                    let target = instr.src0_var()?;
                    let mut ofs = self.store.var(target).offset;
                    if ofs == 0 {
                        // materialize a home slot so the address is real
                        ofs = self.home_offset(target);
                        if let Some(j) = self.regs.find(target) {
                            let mut st = Ph2Instr::new(self.store_op(target));
                            st.src0 = j as i32;
                            st.src1 = ofs;
                            self.push(st)?;
                        }
                    }
                    // flush any dirty copy so loads through the pointer
                    // observe the latest write
                    if let Some(j) = self.regs.find(target) {
                        if self.regs.slots[j].dirty {
                            let mut st = Ph2Instr::new(self.store_op(target));
                            st.src0 = j as i32;
                            st.src1 = ofs;
                            self.push(st)?;
                        }
                    }
                    let reg = self.take_for_dest(instr.dest_var()?, i, None, None, false)?;
                    let mut p = Ph2Instr::new(if self.store.var(target).is_global {
                        Op::GlobalAddrOf
                    } else {
                        Op::AddrOf
                    });
                    p.src0 = ofs;
                    p.dest = reg as i32;
                    self.push(p)?;
                }
                Read => {
                    let s0 = self.take_for_source(instr.src0_var()?, None)?;
                    let reg = self.take_for_dest(instr.dest_var()?, i, Some(s0), None, false)?;
                    let mut p = Ph2Instr::new(Read);
                    p.src0 = s0 as i32;
                    p.src1 = instr.size;
                    p.dest = reg as i32;
                    self.push(p)?;
                }
                Write => {
                    if !self.store.var(instr.src0_var()?).is_func {
                        // register copies of the pointee go stale on a
                        // store through a pointer; force reloads
                        self.spill_all(None, false)?;
                        let value = self.take_for_source(instr.src0_var()?, None)?;
                        let ptr = self.take_for_source(instr.dest_var()?, Some(value))?;
                        let mut p = Ph2Instr::new(Write);
                        p.src0 = value as i32;
                        p.src1 = ptr as i32;
                        p.dest = instr.size;
                        self.push(p)?;
                    } else {
                        // function-pointer materialization
                        let ptr = self.take_for_source(instr.dest_var()?, None)?;
                        let mut p = Ph2Instr::new(FuncAddr);
                        p.src0 = ptr as i32;
                        p.func_name = Some(self.store.var(instr.src0_var()?).name);
                        self.push(p)?;
                    }
                }
                op if op.is_unary() => {
                    let s0 = self.take_for_source(instr.src0_var()?, None)?;
                    let reg = self.take_for_dest(instr.dest_var()?, i, Some(s0), None, false)?;
                    let mut p = Ph2Instr::new(op);
                    p.src0 = s0 as i32;
                    p.dest = reg as i32;
                    self.push(p)?;
                }
                op if op.is_binary() || op == LogAnd => {
                    let s0 = self.take_for_source(instr.src0_var()?, None)?;
                    let s1 = self.take_for_source(instr.src1_var()?, Some(s0))?;
                    let hold = op == LogAnd;
                    let reg =
                        self.take_for_dest(instr.dest_var()?, i, Some(s0), Some(s1), hold)?;
                    let mut p = Ph2Instr::new(op);
                    p.src0 = s0 as i32;
                    p.src1 = s1 as i32;
                    p.dest = reg as i32;
                    self.push(p)?;
                }
                op => return Err(CompileError::UnsupportedOp(op)),
            }
        }
        Ok(())
    }

    fn run(mut self) -> Result<()> {
        self.run_globals()?;
        self.run_body()
    }
}

fn round_word(bytes: i32) -> i32 {
    (bytes + PTR_SIZE - 1) & !(PTR_SIZE - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;
    use crate::middle::store::Variable;

    fn fresh(store: &mut Store, name: &str, eol: usize) -> VarId {
        let v = store.add_var(Variable::new(id(name), id("int"))).unwrap();
        store.set_liveout(v, eol);
        v
    }

    #[test]
    fn source_reload_marks_slot_clean() {
        let mut store = Store::new();
        let a = fresh(&mut store, "a", 10);
        store.var_mut(a).offset = 8;
        let mut lw = Lowerer::new(&mut store);
        let slot = lw.take_for_source(a, None).unwrap();
        assert!(!lw.regs.slots[slot].dirty);
        let reload = lw.store.ph2_ir.last().unwrap();
        assert_eq!(reload.op, Op::Load);
        assert_eq!(reload.src0, 8);
        assert_eq!(reload.dest, slot as i32);
    }

    #[test]
    fn victim_has_furthest_end_of_life() {
        let mut store = Store::new();
        let vars: Vec<_> = (0..REG_COUNT)
            .map(|n| fresh(&mut store, &format!("v{n}"), 10 + n))
            .collect();
        let incoming = fresh(&mut store, "in", 12);
        let mut lw = Lowerer::new(&mut store);
        for (slot, &v) in vars.iter().enumerate() {
            lw.regs.occupy(slot, v, false);
        }
        let slot = lw.take_for_source(incoming, None).unwrap();
        // v7 has the furthest end of life and loses its slot
        assert_eq!(slot, REG_COUNT - 1);
        assert_eq!(lw.regs.slots[slot].var, Some(incoming));
    }

    #[test]
    fn victim_selection_skips_reserved_slot() {
        let mut store = Store::new();
        let vars: Vec<_> = (0..REG_COUNT)
            .map(|n| fresh(&mut store, &format!("v{n}"), 100 - n))
            .collect();
        let incoming = fresh(&mut store, "in", 5);
        let mut lw = Lowerer::new(&mut store);
        for (slot, &v) in vars.iter().enumerate() {
            lw.regs.occupy(slot, v, false);
        }
        // slot 0 has the furthest end of life but is reserved
        let slot = lw.take_for_source(incoming, Some(0)).unwrap();
        assert_eq!(slot, 1);
    }

    #[test]
    fn dest_reuses_expiring_source_slot() {
        let mut store = Store::new();
        let vars: Vec<_> = (0..REG_COUNT)
            .map(|n| fresh(&mut store, &format!("v{n}"), 50))
            .collect();
        let dest = fresh(&mut store, "d", 60);
        let mut lw = Lowerer::new(&mut store);
        for (slot, &v) in vars.iter().enumerate() {
            lw.regs.occupy(slot, v, false);
        }
        // the source in slot 2 dies at pc 7; its slot is reused in place
        lw.store.set_liveout(vars[2], 7);
        let before = lw.store.ph2_ir.len();
        let slot = lw.take_for_dest(dest, 7, Some(2), None, false).unwrap();
        assert_eq!(slot, 2);
        assert!(lw.regs.slots[2].dirty);
        assert_eq!(lw.store.ph2_ir.len(), before, "no spill emitted");
    }

    #[test]
    fn dirty_spill_writes_to_recorded_home_offset() {
        let mut store = Store::new();
        let a = fresh(&mut store, "a", 10);
        let mut lw = Lowerer::new(&mut store);
        lw.regs.occupy(0, a, true);
        lw.spill_all(None, false).unwrap();
        let assigned = lw.store.var(a).offset;
        assert!(assigned > 0);
        assert_eq!(assigned % PTR_SIZE, 0);
        let st = lw.store.ph2_ir.last().unwrap();
        assert_eq!(st.op, Op::Store);
        assert_eq!(st.src0, 0);
        assert_eq!(st.src1, assigned);
        assert!(lw.regs.slots[0].var.is_none());
    }

    #[test]
    fn globals_only_spill_keeps_dirty_locals_resident() {
        let mut store = Store::new();
        let local = fresh(&mut store, "l", 10);
        let global = store
            .add_var({
                let mut v = Variable::new(id("g"), id("int"));
                v.is_global = true;
                v
            })
            .unwrap();
        store.set_liveout(global, 10);
        let mut lw = Lowerer::new(&mut store);
        lw.regs.occupy(0, local, true);
        lw.regs.occupy(1, global, true);
        lw.spill_all(None, true).unwrap();
        assert_eq!(lw.regs.slots[0].var, Some(local), "dirty local survives");
        assert!(lw.regs.slots[1].var.is_none());
        assert_eq!(lw.store.ph2_ir.last().unwrap().op, Op::GlobalStore);
    }

    #[test]
    fn spill_skips_values_dying_at_pc() {
        let mut store = Store::new();
        let a = fresh(&mut store, "a", 7);
        let mut lw = Lowerer::new(&mut store);
        lw.regs.occupy(0, a, true);
        lw.spill_all(Some(7), false).unwrap();
        assert_eq!(lw.regs.slots[0].var, Some(a));
        assert!(lw.store.ph2_ir.is_empty());
    }
}
