//! End-to-end tests: compile C snippets through the whole pipeline and
//! execute the produced images.

mod util;

use rvcc::common::id;
use rvcc::middle::ir::Op;

use util::{compile, compile_no_libc, run, run_with_output};

#[test]
fn empty_main_exits_zero() {
    assert_eq!(run("int main() { return 0; }"), 0);
}

#[test]
fn constants_fold_into_registers_through_an_add() {
    assert_eq!(run("int main() { int a = 7; int b = 35; return a + b; }"), 42);
}

#[test]
fn while_loop_sums_and_stays_resident() {
    let source = "int main() {
        int s = 0;
        int i = 0;
        while (i < 10) {
            s = s + i;
            i = i + 1;
        }
        return s;
    }";
    assert_eq!(run(source), 45);

    // both loop variables live until the loop-end label, whose index the
    // loop-start label carries; compiled bare so the prelude's own loops
    // stay out of the body stream
    let (store, _) = compile_no_libc(source);
    let end_idx = store
        .body_ir
        .iter()
        .filter(|instr| instr.op == Op::Label)
        .find_map(|instr| {
            let carried = store.var(instr.src0.unwrap()).init_val;
            (carried != 0).then_some(carried as usize)
        })
        .unwrap();
    let i_var = store.vars.iter().find(|v| v.name == id("i")).unwrap();
    let s_var = store.vars.iter().find(|v| v.name == id("s")).unwrap();
    assert!(i_var.in_loop && s_var.in_loop);
    assert_eq!(i_var.eol, end_idx);
    assert!(s_var.eol >= end_idx, "s is read again by the return");
}

#[test]
fn char_array_initializer_and_byte_read() {
    assert_eq!(
        run("int main() { char s[4] = \"abc\"; return s[1]; }"),
        0x62
    );
}

#[test]
fn function_pointer_calls_indirectly() {
    let source = "int g(int x) { return x; }
        int main() {
            int (*f)(int);
            f = &g;
            return f(41) + 1;
        }";
    assert_eq!(run(source), 42);
}

#[test]
fn recursive_factorial_spills_across_calls() {
    let source = "int f(int n) {
        if (n < 2) {
            return 1;
        }
        return n * f(n - 1);
    }
    int main() { return f(5); }";
    assert_eq!(run(source), 120);
}

#[test]
fn global_variables_live_in_the_global_frame() {
    let source = "int g = 5;
        int h;
        int main() {
            h = 2;
            g = g + h;
            return g * h;
        }";
    assert_eq!(run(source), 14);
}

#[test]
fn pointers_read_and_write_through_memory() {
    let source = "int main() {
        int x = 1;
        int *p;
        p = &x;
        *p = 5;
        return x + *p;
    }";
    assert_eq!(run(source), 10);
}

#[test]
fn struct_fields_round_trip() {
    let source = "struct point { int x; int y; };
        int main() {
            struct point p;
            p.x = 40;
            p.y = 2;
            return p.x + p.y;
        }";
    assert_eq!(run(source), 42);
}

#[test]
fn arithmetic_comparisons_and_logic() {
    assert_eq!(run("int main() { return 7 % 3 + 6 / 2; }"), 4);
    assert_eq!(run("int main() { return (3 < 5) + (5 <= 5) + (7 > 9); }"), 2);
    assert_eq!(run("int main() { return (1 && 2) + (0 || 5) + !7 + !0; }"), 3);
    assert_eq!(run("int main() { return (1 << 5) >> 2; }"), 8);
    assert_eq!(run("int main() { return (6 & 3) | (8 ^ 12); }"), 6);
    assert_eq!(run("int main() { return -(~0); }"), 1);
}

#[test]
fn if_else_picks_a_branch() {
    let source = "int pick(int a, int b) {
        if (a < b) {
            return 1;
        } else {
            return 2;
        }
    }
    int main() { return pick(1, 2) * 10 + pick(2, 1); }";
    assert_eq!(run(source), 12);
}

#[test]
fn for_loop_with_break_and_continue() {
    let source = "int main() {
        int s = 0;
        int i;
        for (i = 0; i < 100; i = i + 1) {
            if (i == 7) {
                break;
            }
            if (i % 2 == 1) {
                continue;
            }
            s = s + i;
        }
        return s;
    }";
    // 0 + 2 + 4 + 6
    assert_eq!(run(source), 12);
}

#[test]
fn eight_parameters_fill_every_argument_register() {
    let source = "int sum(int a, int b, int c, int d, int e, int f, int g, int h) {
        return a + b + c + d + e + f + g + h;
    }
    int main() { return sum(1, 2, 3, 4, 5, 6, 7, 8); }";
    assert_eq!(run(source), 36);
}

#[test]
fn zero_parameter_and_variadic_functions_lower() {
    let source = "int seven() { return 7; }
        int first(int a, ...) { return a; }
        int main() { return seven() * 10 + first(2, 8, 9); }";
    assert_eq!(run(source), 72);
}

#[test]
fn immediates_straddle_the_twelve_bit_boundary() {
    assert_eq!(run("int main() { return 2047; }"), 2047);
    assert_eq!(run("int main() { return 2048; }"), 2048);
    assert_eq!(run("int main() { return -2048; }"), -2048);
    assert_eq!(run("int main() { return 0x12345; }"), 0x12345);
}

#[test]
fn large_frames_use_upper_immediate_addressing() {
    let source = "int main() {
        char big[4000];
        int a = 5;
        int b = 6;
        if (a < b) {
            a = a + b;
        }
        big[3999] = 3;
        return a + big[3999];
    }";
    assert_eq!(run(source), 14);
}

#[test]
fn libc_prelude_writes_through_the_syscall_stub() {
    let (status, output) = run_with_output(
        "int main() {
            print(\"hi\\n\");
            return strlen(\"four\");
        }",
    );
    assert_eq!(status, 4);
    assert_eq!(output, b"hi\n");
}

#[test]
fn nested_loops_preserve_loop_extents() {
    let source = "int main() {
        int total = 0;
        int i = 0;
        while (i < 3) {
            int j = 0;
            while (j < 4) {
                total = total + 1;
                j = j + 1;
            }
            i = i + 1;
        }
        return total;
    }";
    assert_eq!(run(source), 12);
}

#[test]
fn pipeline_is_deterministic() {
    let source = "int g = 3;
        int twice(int x) { return x + x; }
        int main() { return twice(g) * g; }";
    let (_, first) = compile(source);
    let (_, second) = compile(source);
    assert_eq!(first.render(), second.render());
    assert_eq!(run(source), 18);
}

#[test]
fn label_table_contains_every_call_target() {
    let (store, elf) = compile("int helper(int x) { return x; } int main() { return helper(3); }");
    let mut elf2 = rvcc::back::elf::Elf::new();
    let labels = rvcc::back::emit(&store, &mut elf2).unwrap();
    assert_eq!(elf.render(), elf2.render());
    assert!(labels.find(id("main")).unwrap() > 0);
    assert!(labels.find(id("helper")).unwrap() > 0);
    assert_eq!(labels.find(id("__syscall")).unwrap(), 60);
    assert!(labels.find(id("nowhere")).is_err());
}
