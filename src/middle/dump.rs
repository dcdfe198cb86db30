//! Human-readable IR listings for `--dump-ir`.
//!
//! Pure formatting; never affects lowering or emission.  The Phase-1
//! listing is printed before lowering, the Phase-2 listing after.

use std::fmt::Write;

use crate::middle::ir::{Op, Ph1Instr};
use crate::middle::store::Store;

fn name_of(store: &Store, var: Option<crate::middle::store::VarId>) -> String {
    var.map(|v| store.var(v).name.to_string())
        .unwrap_or_default()
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push('\t');
    }
}

pub fn dump_ph1(store: &Store) -> String {
    let mut out = String::new();
    for instr in store.global_ir.iter() {
        ph1_line(store, instr, &mut out, &mut 0);
    }
    let mut depth = 0;
    for instr in store.body_ir.iter() {
        ph1_line(store, instr, &mut out, &mut depth);
    }
    out.push_str("===\n");
    out
}

fn ph1_line(store: &Store, instr: &Ph1Instr, out: &mut String, depth: &mut usize) {
    use Op::*;

    let dest = name_of(store, instr.dest);
    let src0 = name_of(store, instr.src0);
    let src1 = name_of(store, instr.src1);

    match instr.op {
        Define => {
            let name = instr.func_name.map(|n| n.to_string()).unwrap_or_default();
            let _ = write!(out, "def @{name}(");
            if let Some(f) = instr.func_name.and_then(|n| store.find_func(n)) {
                for (i, &p) in store.func(f).params.iter().enumerate() {
                    if i != 0 {
                        out.push_str(", ");
                    }
                    let p = store.var(p);
                    let _ = write!(out, "{} %{}", p.type_name, p.name);
                }
            }
            out.push(')');
        }
        BlockStart => {
            indent(out, *depth);
            out.push('{');
            *depth += 1;
        }
        BlockEnd => {
            *depth = depth.saturating_sub(1);
            indent(out, *depth);
            out.push('}');
        }
        Alloc => {
            indent(out, *depth);
            if let Some(v) = instr.src0 {
                let v = store.var(v);
                let _ = write!(out, "allocat {}", v.type_name);
                for _ in 0..v.ptr {
                    out.push('*');
                }
                let _ = write!(out, " %{}", v.name);
                if v.array_size > 0 {
                    let _ = write!(out, "[{}]", v.array_size);
                }
            }
        }
        Label => {
            let _ = write!(out, "{src0}");
        }
        Branch => {
            indent(out, *depth);
            let _ = write!(out, "br %{dest}, {src0}, {src1}");
        }
        Jump => {
            indent(out, *depth);
            let _ = write!(out, "j {dest}");
        }
        LoadConst => {
            indent(out, *depth);
            let value = instr.dest.map(|v| store.var(v).init_val).unwrap_or(0);
            let _ = write!(out, "const %{dest}, ${value}");
        }
        LoadDataAddr => {
            indent(out, *depth);
            let ofs = instr.dest.map(|v| store.var(v).init_val).unwrap_or(0);
            let _ = write!(out, "%{dest} = .data ({ofs})");
        }
        Assign => {
            indent(out, *depth);
            let _ = write!(out, "%{dest} = %{src0}");
        }
        Push => {
            indent(out, *depth);
            let _ = write!(out, "push %{src0}");
        }
        Call => {
            indent(out, *depth);
            let name = instr.func_name.map(|n| n.to_string()).unwrap_or_default();
            let _ = write!(out, "call @{name}, {}", instr.arg_count);
        }
        Indirect => {
            indent(out, *depth);
            let _ = write!(out, "indirect call @(%{src0})");
        }
        RetVal => {
            indent(out, *depth);
            let _ = write!(out, "retval %{dest}");
        }
        Return => {
            indent(out, *depth);
            if instr.src0.is_some() {
                let _ = write!(out, "ret %{src0}");
            } else {
                out.push_str("ret");
            }
        }
        AddrOf => {
            indent(out, *depth);
            let _ = write!(out, "%{dest} = &(%{src0})");
        }
        Read => {
            indent(out, *depth);
            let _ = write!(out, "%{dest} = (%{src0}), {}", instr.size);
        }
        Write => {
            indent(out, *depth);
            let is_func = instr.src0.map(|v| store.var(v).is_func).unwrap_or(false);
            if is_func {
                let _ = write!(out, "(%{dest}) = @{src0}");
            } else {
                let _ = write!(out, "(%{dest}) = %{src0}, {}", instr.size);
            }
        }
        Negate | BitNot | LogNot => {
            indent(out, *depth);
            let _ = write!(out, "%{dest} = {} %{src0}", instr.op);
        }
        op if op.is_binary() || op == LogAnd => {
            indent(out, *depth);
            let _ = write!(out, "%{dest} = {op} %{src0}, %{src1}");
        }
        _ => {}
    }
    out.push('\n');
}

pub fn dump_ph2(store: &Store) -> String {
    use Op::*;

    let mut out = String::new();
    for instr in store.ph2_ir.iter() {
        let label = instr.func_name.map(|n| n.to_string()).unwrap_or_default();
        let (d, s0, s1) = (instr.dest, instr.src0, instr.src1);
        match instr.op {
            BlockStart | BlockEnd => continue,
            Define => {
                let _ = write!(out, "{label}:");
            }
            Label => {
                let _ = write!(out, "{label}:");
            }
            LoadConst => {
                let _ = write!(out, "\tli %a{d}, ${s0}");
            }
            LoadDataAddr => {
                let _ = write!(out, "\t%a{d} = .data({s0})");
            }
            AddrOf => {
                let _ = write!(out, "\t%a{d} = %sp + {s0}");
            }
            GlobalAddrOf => {
                let _ = write!(out, "\t%a{d} = %gp + {s0}");
            }
            Assign => {
                let _ = write!(out, "\t%a{d} = %a{s0}");
            }
            Branch => {
                let tt = instr.true_label.map(|n| n.to_string()).unwrap_or_default();
                let ff = instr.false_label.map(|n| n.to_string()).unwrap_or_default();
                let _ = write!(out, "\tbr %a{s0}, {tt}, {ff}");
            }
            Jump => {
                let _ = write!(out, "\tj {label}");
            }
            Load => {
                let _ = write!(out, "\tload %a{d}, {s0}(sp)");
            }
            Store => {
                let _ = write!(out, "\tstore %a{s0}, {s1}(sp)");
            }
            GlobalLoad => {
                let _ = write!(out, "\tload %a{d}, {s0}(gp)");
            }
            GlobalStore => {
                let _ = write!(out, "\tstore %a{s0}, {s1}(gp)");
            }
            Read => {
                let _ = write!(out, "\t%a{d} = (%a{s0}), {s1}");
            }
            Write => {
                let _ = write!(out, "\t(%a{s1}) = %a{s0}, {d}");
            }
            FuncAddr => {
                let _ = write!(out, "\t(%a{s0}) = @{label}");
            }
            Indirect => {
                let _ = write!(out, "\tindirect call @(%t6)");
            }
            Call => {
                let _ = write!(out, "\tcall @{label}");
            }
            Return => {
                if s0 == -1 {
                    let _ = write!(out, "\tret");
                } else {
                    let _ = write!(out, "\tret %a{s0}");
                }
            }
            Negate | BitNot | LogNot => {
                let _ = write!(out, "\t%a{d} = {} %a{s0}", instr.op);
            }
            op => {
                let _ = write!(out, "\t%a{d} = {op} %a{s0}, %a{s1}");
            }
        }
        out.push('\n');
    }
    out
}
