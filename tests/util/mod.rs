//! Shared test harness: compile C source through the whole pipeline and
//! execute the resulting image on a tiny RV32IM interpreter, observing
//! the exit status and anything written to fd 1.

use rvcc::back::elf::{Elf, CODE_START, LOAD_ADDR};
use rvcc::back::{emit, lower};
use rvcc::front::{libc, parse_into};
use rvcc::middle::{liveness, Store};

const MEM_SIZE: usize = 0x20_0000;
const STACK_TOP: u32 = 0x1f_0000;
const STEP_LIMIT: usize = 50_000_000;

/// Run the full pipeline on `source` (with the libc prelude).
pub fn compile(source: &str) -> (Store, Elf) {
    compile_pipeline(source, true)
}

/// Same pipeline without the prelude, for tests that inspect the store
/// and must not see the prelude's own loops and variables.
pub fn compile_no_libc(source: &str) -> (Store, Elf) {
    compile_pipeline(source, false)
}

fn compile_pipeline(source: &str, with_libc: bool) -> (Store, Elf) {
    let mut store = Store::new();
    if with_libc {
        parse_into(&mut store, libc::PRELUDE).expect("prelude parses");
    }
    parse_into(&mut store, source).expect("source parses");
    liveness::analyze(&mut store).expect("liveness");
    lower(&mut store).expect("lowering");
    let mut elf = Elf::new();
    emit(&store, &mut elf).expect("emission");
    (store, elf)
}

/// Compile and execute; returns the exit status.
pub fn run(source: &str) -> i32 {
    let (_, elf) = compile(source);
    execute(&elf).0
}

/// Compile and execute; returns the exit status and fd-1 output.
pub fn run_with_output(source: &str) -> (i32, Vec<u8>) {
    let (_, elf) = compile(source);
    execute(&elf)
}

/// Load the rendered image at its link address and interpret it.
pub fn execute(elf: &Elf) -> (i32, Vec<u8>) {
    let image = elf.render();
    let mut mem = vec![0u8; MEM_SIZE];
    mem[LOAD_ADDR as usize..LOAD_ADDR as usize + image.len()].copy_from_slice(&image);

    let mut regs = [0i32; 32];
    regs[2] = STACK_TOP as i32; // sp; argc = 0 sits in zeroed memory
    let mut pc = CODE_START as u32;
    let mut output = Vec::new();

    for _ in 0..STEP_LIMIT {
        let word = read32(&mem, pc);
        let opcode = word & 0x7f;
        let rd = (word >> 7 & 0x1f) as usize;
        let funct3 = word >> 12 & 0x7;
        let rs1 = regs[(word >> 15 & 0x1f) as usize];
        let rs2 = regs[(word >> 20 & 0x1f) as usize];
        let funct7 = word >> 25;
        let imm_i = (word as i32) >> 20;
        let mut next = pc.wrapping_add(4);

        match opcode {
            0x37 => regs[rd] = (word & 0xffff_f000) as i32, // lui
            0x13 => {
                regs[rd] = match funct3 {
                    0x0 => rs1.wrapping_add(imm_i),
                    0x4 => rs1 ^ imm_i,
                    other => panic!("unexpected op-imm funct3 {other}"),
                };
            }
            0x33 => {
                regs[rd] = match (funct7, funct3) {
                    (0x00, 0x0) => rs1.wrapping_add(rs2),
                    (0x20, 0x0) => rs1.wrapping_sub(rs2),
                    (0x00, 0x1) => rs1.wrapping_shl(rs2 as u32 & 31),
                    (0x00, 0x2) => (rs1 < rs2) as i32,
                    (0x00, 0x3) => ((rs1 as u32) < rs2 as u32) as i32,
                    (0x00, 0x4) => rs1 ^ rs2,
                    (0x00, 0x6) => rs1 | rs2,
                    (0x00, 0x7) => rs1 & rs2,
                    (0x20, 0x5) => rs1 >> (rs2 as u32 & 31),
                    (0x01, 0x0) => rs1.wrapping_mul(rs2),
                    (0x01, 0x4) => {
                        if rs2 == 0 {
                            -1
                        } else {
                            rs1.wrapping_div(rs2)
                        }
                    }
                    (0x01, 0x6) => {
                        if rs2 == 0 {
                            rs1
                        } else {
                            rs1.wrapping_rem(rs2)
                        }
                    }
                    other => panic!("unexpected op funct {other:?}"),
                };
            }
            0x03 => {
                let addr = rs1.wrapping_add(imm_i) as u32;
                regs[rd] = match funct3 {
                    0x0 => mem[addr as usize] as i8 as i32, // lb
                    0x2 => read32(&mem, addr) as i32,       // lw
                    other => panic!("unexpected load funct3 {other}"),
                };
            }
            0x23 => {
                let imm = ((word as i32) >> 25 << 5) | (word >> 7 & 0x1f) as i32;
                let addr = rs1.wrapping_add(imm) as u32;
                match funct3 {
                    0x0 => mem[addr as usize] = rs2 as u8, // sb
                    0x2 => mem[addr as usize..addr as usize + 4]
                        .copy_from_slice(&(rs2 as u32).to_le_bytes()), // sw
                    other => panic!("unexpected store funct3 {other}"),
                }
            }
            0x63 => {
                let imm = ((word as i32) >> 31 << 12)
                    | ((word >> 25 & 0x3f) as i32) << 5
                    | ((word >> 8 & 0xf) as i32) << 1
                    | ((word >> 7 & 0x1) as i32) << 11;
                let taken = match funct3 {
                    0x0 => rs1 == rs2,
                    0x1 => rs1 != rs2,
                    other => panic!("unexpected branch funct3 {other}"),
                };
                if taken {
                    next = pc.wrapping_add(imm as u32);
                }
            }
            0x6f => {
                let imm = ((word as i32) >> 31 << 20)
                    | ((word >> 21 & 0x3ff) as i32) << 1
                    | ((word >> 20 & 0x1) as i32) << 11
                    | ((word >> 12 & 0xff) as i32) << 12;
                regs[rd] = pc.wrapping_add(4) as i32;
                next = pc.wrapping_add(imm as u32);
            }
            0x67 => {
                let target = rs1.wrapping_add(imm_i) as u32 & !1;
                regs[rd] = pc.wrapping_add(4) as i32;
                next = target;
            }
            0x73 => match regs[17] {
                93 => return (regs[10], output), // exit
                64 => {
                    // write(fd, buf, count); the fd is ignored and the
                    // bytes are captured for assertions
                    let buf = regs[11] as u32 as usize;
                    let len = regs[12] as usize;
                    output.extend_from_slice(&mem[buf..buf + len]);
                    regs[10] = len as i32;
                }
                other => panic!("unexpected syscall {other}"),
            },
            other => panic!("unexpected opcode {other:#x} at pc {pc:#x}"),
        }

        regs[0] = 0;
        pc = next;
    }
    panic!("program did not exit within {STEP_LIMIT} steps");
}

fn read32(mem: &[u8], addr: u32) -> u32 {
    let addr = addr as usize;
    u32::from_le_bytes(mem[addr..addr + 4].try_into().unwrap())
}
