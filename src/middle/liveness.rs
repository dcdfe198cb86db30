//! Variable liveness.
//!
//! A single forward scan over the body IR that records, for every variable,
//! the largest instruction index at which it is still referenced (its end
//! of life).  Loops get a conservative extension: a value read inside a
//! loop is marked in-loop, and any in-loop destination has its end of life
//! pushed out to the end of the current loop, so that values live across
//! the back-edge are still resident when the back-edge executes.
//!
//! Loop extents are recovered from loop-start labels, whose `init_val`
//! carries the body-IR index of the matching loop-end label; a stack of
//! saved end indices handles nesting.

use log::debug;

use crate::error::{CompileError, Result};
use crate::middle::ir::Op;
use crate::middle::store::{Store, EOL_FOREVER};

pub fn analyze(store: &mut Store) -> Result<()> {
    use Op::*;

    // Global initializers first: allocations live for the whole process,
    // and only allocation, constant loading, and assignment may appear.
    for i in 0..store.global_ir.len() {
        let instr = store.global_ir[i];
        match instr.op {
            Alloc => store.set_liveout(instr.src0_var()?, EOL_FOREVER),
            Assign => store.set_liveout(instr.src0_var()?, i),
            LoadConst => {}
            op => return Err(CompileError::UnsupportedGlobalOp(op)),
        }
    }

    // 0 means "not inside a loop"; instruction 0 is always a define.
    let mut loop_end = 0usize;
    let mut loop_stack: Vec<usize> = Vec::new();

    for i in 0..store.body_ir.len() {
        let instr = store.body_ir[i];
        match instr.op {
            Alloc => {
                if store.var(instr.src0_var()?).is_global {
                    return Err(CompileError::GlobalAllocInBody);
                }
            }
            Label => {
                if loop_end == i && loop_end != 0 {
                    loop_end = loop_stack.pop().unwrap_or(0);
                } else {
                    let label = store.var(instr.src0_var()?);
                    if label.init_val != 0 {
                        loop_stack.push(loop_end);
                        loop_end = label.init_val as usize;
                    }
                }
            }
            // The branch condition travels in the dest operand.
            Branch => store.set_liveout(instr.dest_var()?, i),
            Push | Indirect => store.set_liveout(instr.src0_var()?, i),
            Return => {
                if let Some(src0) = instr.src0 {
                    store.set_liveout(src0, i);
                }
            }
            Write => {
                let src0 = instr.src0_var()?;
                if !store.var(src0).is_func {
                    store.set_liveout(src0, i);
                }
                store.set_liveout(instr.dest_var()?, i);
            }
            Assign | AddrOf | Read | Negate | BitNot | LogNot => {
                let src0 = instr.src0_var()?;
                store.set_liveout(src0, i);
                if loop_end != 0 {
                    store.var_mut(src0).in_loop = true;
                }
                let dest = instr.dest_var()?;
                if store.var(dest).in_loop {
                    store.set_liveout(dest, loop_end);
                }
            }
            op if op.is_binary() || op == LogAnd => {
                let src0 = instr.src0_var()?;
                let src1 = instr.src1_var()?;
                store.set_liveout(src0, i);
                store.set_liveout(src1, i);
                if loop_end != 0 {
                    store.var_mut(src0).in_loop = true;
                    store.var_mut(src1).in_loop = true;
                }
                let dest = instr.dest_var()?;
                if store.var(dest).in_loop {
                    store.set_liveout(dest, loop_end);
                }
            }
            _ => {}
        }
    }

    debug!(
        "liveness: {} body instructions, {} variables",
        store.body_ir.len(),
        store.vars.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;
    use crate::middle::ir::Ph1Instr;
    use crate::middle::store::{Variable, GLOBAL_BLOCK};

    fn read2(op: Op, dest: crate::middle::store::VarId, a: crate::middle::store::VarId, b: crate::middle::store::VarId) -> Ph1Instr {
        let mut i = Ph1Instr::new(op);
        i.dest = Some(dest);
        i.src0 = Some(a);
        i.src1 = Some(b);
        i
    }

    #[test]
    fn eol_is_last_reference() {
        let mut store = Store::new();
        let a = store.add_var(Variable::new(id("a"), id("int"))).unwrap();
        let b = store.add_var(Variable::new(id("b"), id("int"))).unwrap();
        let t = store.add_var(Variable::new(id("t"), id("int"))).unwrap();
        let u = store.add_var(Variable::new(id("u"), id("int"))).unwrap();
        store.push_body(Ph1Instr::new(Op::Define)).unwrap();
        store.push_body(read2(Op::Add, t, a, b)).unwrap();
        store.push_body(read2(Op::Add, u, t, a)).unwrap();
        analyze(&mut store).unwrap();
        assert_eq!(store.var(a).eol, 2);
        assert_eq!(store.var(b).eol, 1);
        assert_eq!(store.var(t).eol, 2);
        assert_eq!(store.var(u).eol, 0);
    }

    #[test]
    fn loop_reads_extend_to_loop_end() {
        let mut store = Store::new();
        let s = store.add_var(Variable::new(id("s"), id("int"))).unwrap();
        let i = store.add_var(Variable::new(id("i"), id("int"))).unwrap();
        let start = store.new_label().unwrap();
        let end = store.new_label().unwrap();

        store.push_body(Ph1Instr::new(Op::Define)).unwrap();
        let mut lbl = Ph1Instr::new(Op::Label);
        lbl.src0 = Some(start);
        store.push_body(lbl).unwrap();
        // s = s + i inside the loop
        store.push_body(read2(Op::Add, s, s, i)).unwrap();
        let mut endlbl = Ph1Instr::new(Op::Label);
        endlbl.src0 = Some(end);
        let end_idx = store.push_body(endlbl).unwrap();
        store.var_mut(start).init_val = end_idx as i32;

        analyze(&mut store).unwrap();
        assert!(store.var(s).in_loop);
        assert!(store.var(i).in_loop);
        // the in-loop destination is pushed out to the loop end
        assert_eq!(store.var(s).eol, end_idx);
    }

    #[test]
    fn global_allocations_live_forever() {
        let mut store = Store::new();
        let g = store
            .add_local(GLOBAL_BLOCK, {
                let mut v = Variable::new(id("g"), id("int"));
                v.is_global = true;
                v
            })
            .unwrap();
        let mut alloc = Ph1Instr::new(Op::Alloc);
        alloc.src0 = Some(g);
        store.push_global(alloc).unwrap();
        analyze(&mut store).unwrap();
        assert_eq!(store.var(g).eol, EOL_FOREVER);
    }

    #[test]
    fn global_alloc_in_body_is_fatal() {
        let mut store = Store::new();
        let g = store
            .add_var({
                let mut v = Variable::new(id("g"), id("int"));
                v.is_global = true;
                v
            })
            .unwrap();
        let mut alloc = Ph1Instr::new(Op::Alloc);
        alloc.src0 = Some(g);
        store.push_body(alloc).unwrap();
        assert!(matches!(
            analyze(&mut store),
            Err(CompileError::GlobalAllocInBody)
        ));
    }

    #[test]
    fn unsupported_global_op_is_fatal() {
        let mut store = Store::new();
        let a = store.add_var(Variable::new(id("a"), id("int"))).unwrap();
        let b = store.add_var(Variable::new(id("b"), id("int"))).unwrap();
        let t = store.add_var(Variable::new(id("t"), id("int"))).unwrap();
        store.push_global(read2(Op::Add, t, a, b)).unwrap();
        assert!(matches!(
            analyze(&mut store),
            Err(CompileError::UnsupportedGlobalOp(Op::Add))
        ));
    }
}
