//! Two-pass machine-code emission.
//!
//! Pass A walks the Phase-2 stream summing exact per-op byte sizes and
//! recording every function entry and label offset; several opcodes have
//! two sizes depending on whether their immediate fits the signed 12-bit
//! range.  Pass B walks the stream again, emitting words through the
//! encoder and resolving jumps, branches, and calls against the completed
//! table.  There is no backpatching: the two tables must agree
//! instruction by instruction, so a new opcode has to be added to both
//! passes at once.
//!
//! Code offset 0 holds three synthetic stubs: `__start` (sets up the
//! global frame, loads argc/argv, jumps to the lowered stream), `__exit`
//! (tears the frame down and performs the exit system call), and
//! `__syscall` (marshals four argument registers into the kernel ABI).

use log::debug;

use crate::common::{id, Id};
use crate::error::{CompileError, Result};
use crate::middle::ir::{Op, Ph2Instr};
use crate::middle::store::{FuncId, Store, GLOBAL_FRAME};

use super::elf::{Elf, CODE_START};
use super::rv32::{self, fits_imm12, hi, lo, Reg};

pub const MAX_LABELS: usize = 4096;

/// Largest supported stack frame; anything bigger is a front-end runaway
/// and aborts rather than overflowing offset arithmetic downstream.
pub const MAX_FRAME: i32 = 1 << 20;

const ENTRY_LEN: i32 = 32;
const EXIT_LEN: i32 = 28;
const SYSCALL_LEN: i32 = 48;
/// Size of the three synthetic stubs; the lowered stream starts here.
const STUB_LEN: i32 = ENTRY_LEN + EXIT_LEN + SYSCALL_LEN;

/// Append-only label -> code byte offset table.
pub struct LabelTable {
    entries: Vec<(Id, i32)>,
}

impl LabelTable {
    pub fn new() -> Self {
        LabelTable {
            entries: Vec::new(),
        }
    }

    pub fn add(&mut self, name: Id, offset: i32) -> Result<()> {
        if self.entries.len() >= MAX_LABELS {
            return Err(CompileError::Capacity("labels"));
        }
        self.entries.push((name, offset));
        Ok(())
    }

    pub fn find(&self, name: Id) -> Result<i32> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(_, offset)| offset)
            .ok_or(CompileError::MissingLabel(name))
    }
}

impl Default for LabelTable {
    fn default() -> Self {
        LabelTable::new()
    }
}

/// Emit the Phase-2 stream into the ELF image.  Returns the label table,
/// which tests use to check offset consistency.
pub fn emit(store: &Store, elf: &mut Elf) -> Result<LabelTable> {
    let mut emitter = Emitter {
        store,
        labels: LabelTable::new(),
        data_start: 0,
    };
    let total = emitter.pass_a()?;
    emitter.data_start = CODE_START + total;
    emitter.pass_b(elf)?;
    debug_assert_eq!(elf.code_len(), total, "pass A sizes diverge from pass B");
    elf.data.extend_from_slice(&store.data);
    debug!(
        "emitted {} code bytes, {} data bytes",
        elf.code_len(),
        store.data.len()
    );
    Ok(emitter.labels)
}

struct Emitter<'a> {
    store: &'a Store,
    labels: LabelTable,
    data_start: i32,
}

impl<'a> Emitter<'a> {
    fn func_by_label(&self, name: Option<Id>) -> Result<FuncId> {
        let name = name.ok_or(CompileError::Malformed(Op::Define))?;
        self.store
            .find_func(name)
            .ok_or(CompileError::UnknownFunction(name))
    }

    fn returns_void(&self, func: FuncId) -> bool {
        self.store.var(self.store.func(func).ret).type_name == id("void")
    }

    /// Sum per-op sizes and fill the label table.
    fn pass_a(&mut self) -> Result<i32> {
        use Op::*;

        self.labels.add(id("__start"), 0)?;
        self.labels.add(id("__exit"), ENTRY_LEN)?;
        self.labels.add(id("__syscall"), ENTRY_LEN + EXIT_LEN)?;

        let mut cursor = STUB_LEN;
        let mut block_lv = 0;
        let mut cur_fn = GLOBAL_FRAME;

        for instr in &self.store.ph2_ir {
            match instr.op {
                Define => {
                    cur_fn = self.func_by_label(instr.func_name)?;
                    let frame = self.store.func(cur_fn).stack_size;
                    if frame > MAX_FRAME {
                        return Err(CompileError::FrameTooLarge {
                            name: self.store.func_name(cur_fn),
                            size: frame,
                        });
                    }
                    self.labels
                        .add(instr.func_name.ok_or(CompileError::Malformed(Define))?, cursor)?;
                    cursor += 20;
                }
                BlockStart => block_lv += 1,
                BlockEnd => {
                    // the implicit epilogue of a void function
                    block_lv -= 1;
                    if block_lv == 0 && self.returns_void(cur_fn) {
                        cursor += 24;
                    }
                }
                Label => {
                    self.labels
                        .add(instr.func_name.ok_or(CompileError::Malformed(Label))?, cursor)?;
                }
                Assign => {
                    if instr.dest != instr.src0 {
                        cursor += 4;
                    }
                }
                Load | GlobalLoad => cursor += if fits_imm12(instr.src0) { 4 } else { 16 },
                Store | GlobalStore => cursor += if fits_imm12(instr.src1) { 4 } else { 16 },
                AddrOf | GlobalAddrOf => cursor += if fits_imm12(instr.src0) { 4 } else { 12 },
                Jump => {
                    // the jump into main also picks up argc/argv
                    if instr.func_name == Some(id("main")) {
                        cursor += 20;
                    }
                    cursor += 4;
                }
                LoadConst => cursor += if fits_imm12(instr.src0) { 4 } else { 8 },
                LoadDataAddr | Neq | Geq | Leq | LogOr | LogNot => cursor += 8,
                Eq | FuncAddr => cursor += 12,
                LogAnd => cursor += 16,
                Branch => cursor += 20,
                Return => cursor += 28,
                Call | Indirect | Read | Write | Negate | Add | Sub | Mul | Div | Mod | Gt
                | Lt | BitAnd | BitOr | BitXor | BitNot | Rshift | Lshift => cursor += 4,
                op => return Err(CompileError::UnsupportedOp(op)),
            }
        }
        Ok(cursor)
    }

    fn pass_b(&self, elf: &mut Elf) -> Result<()> {
        use Op::*;
        use Reg::*;

        let globals = self.store.func(GLOBAL_FRAME).stack_size + 4;

        // __start: save gp, pick up argc/argv, carve the global frame out
        // of the stack, and fall into the lowered stream.
        elf.add_symbol("__start", 0);
        elf.write_code_word(rv32::sw(Gp, Sp, -4));
        elf.write_code_word(rv32::lw(A0, Sp, 0));
        elf.write_code_word(rv32::addi(A1, Sp, 4));
        elf.write_code_word(rv32::lui(A7, hi(globals)));
        elf.write_code_word(rv32::addi(A7, A7, lo(globals)));
        elf.write_code_word(rv32::sub(Sp, Sp, A7));
        elf.write_code_word(rv32::addi(Gp, Sp, 0));
        elf.write_code_word(rv32::jal(Ra, STUB_LEN - elf.code_len()));

        // __exit: release the global frame and leave a0 as the status.
        elf.add_symbol("__exit", elf.code_len());
        elf.write_code_word(rv32::lui(A7, hi(globals)));
        elf.write_code_word(rv32::addi(A7, A7, lo(globals)));
        elf.write_code_word(rv32::add(Sp, Sp, A7));
        elf.write_code_word(rv32::lw(Gp, Sp, -4));
        elf.write_code_word(rv32::addi(A0, A0, 0));
        elf.write_code_word(rv32::addi(A7, Zero, 93));
        elf.write_code_word(rv32::ecall());

        // __syscall(num, a, b, c)
        elf.add_symbol("__syscall", elf.code_len());
        elf.write_code_word(rv32::addi(Sp, Sp, -8));
        elf.write_code_word(rv32::sw(Ra, Sp, 0));
        elf.write_code_word(rv32::sw(S0, Sp, 4));
        elf.write_code_word(rv32::addi(A7, A0, 0));
        elf.write_code_word(rv32::addi(A0, A1, 0));
        elf.write_code_word(rv32::addi(A1, A2, 0));
        elf.write_code_word(rv32::addi(A2, A3, 0));
        elf.write_code_word(rv32::ecall());
        elf.write_code_word(rv32::lw(S0, Sp, 4));
        elf.write_code_word(rv32::lw(Ra, Sp, 0));
        elf.write_code_word(rv32::addi(Sp, Sp, 8));
        elf.write_code_word(rv32::jalr(Zero, Ra, 0));

        let mut block_lv = 0;
        let mut cur_fn = GLOBAL_FRAME;

        for instr in &self.store.ph2_ir {
            match instr.op {
                Define => {
                    cur_fn = self.func_by_label(instr.func_name)?;
                    let frame = self.store.func(cur_fn).stack_size + 8;
                    elf.add_symbol(&self.store.func_name(cur_fn), elf.code_len());
                    elf.write_code_word(rv32::sw(Ra, Sp, -8));
                    elf.write_code_word(rv32::sw(S0, Sp, -4));
                    elf.write_code_word(rv32::lui(S0, hi(frame)));
                    elf.write_code_word(rv32::addi(S0, S0, lo(frame)));
                    elf.write_code_word(rv32::sub(Sp, Sp, S0));
                }
                BlockStart => block_lv += 1,
                BlockEnd => {
                    block_lv -= 1;
                    if block_lv == 0 && self.returns_void(cur_fn) {
                        let frame = self.store.func(cur_fn).stack_size + 8;
                        elf.write_code_word(rv32::lui(S0, hi(frame)));
                        elf.write_code_word(rv32::addi(S0, S0, lo(frame)));
                        elf.write_code_word(rv32::add(Sp, Sp, S0));
                        elf.write_code_word(rv32::lw(S0, Sp, -4));
                        elf.write_code_word(rv32::lw(Ra, Sp, -8));
                        elf.write_code_word(rv32::jalr(Zero, Ra, 0));
                    }
                }
                Label => {}
                LoadConst => {
                    let rd = slot_reg(instr.dest)?;
                    if fits_imm12(instr.src0) {
                        elf.write_code_word(rv32::addi(rd, Zero, instr.src0));
                    } else {
                        elf.write_code_word(rv32::lui(rd, hi(instr.src0)));
                        elf.write_code_word(rv32::addi(rd, rd, lo(instr.src0)));
                    }
                }
                LoadDataAddr => {
                    let rd = slot_reg(instr.dest)?;
                    let addr = instr.src0 + self.data_start;
                    elf.write_code_word(rv32::lui(rd, hi(addr)));
                    elf.write_code_word(rv32::addi(rd, rd, lo(addr)));
                }
                AddrOf | GlobalAddrOf => {
                    let base = if instr.op == AddrOf { Sp } else { Gp };
                    let rd = slot_reg(instr.dest)?;
                    if fits_imm12(instr.src0) {
                        elf.write_code_word(rv32::addi(rd, base, instr.src0));
                    } else {
                        elf.write_code_word(rv32::lui(T6, hi(instr.src0)));
                        elf.write_code_word(rv32::addi(T6, T6, lo(instr.src0)));
                        elf.write_code_word(rv32::add(rd, T6, base));
                    }
                }
                Assign => {
                    if instr.dest != instr.src0 {
                        elf.write_code_word(rv32::addi(
                            slot_reg(instr.dest)?,
                            slot_reg(instr.src0)?,
                            0,
                        ));
                    }
                }
                Branch => {
                    // the false edge takes an absolute jump through t6,
                    // the true edge a pc-relative one
                    let name = instr.false_label.ok_or(CompileError::Malformed(Branch))?;
                    let target = self.labels.find(name)? + CODE_START;
                    elf.write_code_word(rv32::lui(T6, hi(target)));
                    elf.write_code_word(rv32::addi(T6, T6, lo(target)));
                    elf.write_code_word(rv32::bne(slot_reg(instr.src0)?, Zero, 8));
                    elf.write_code_word(rv32::jalr(Zero, T6, 0));

                    let name = instr.true_label.ok_or(CompileError::Malformed(Branch))?;
                    let target = self.labels.find(name)?;
                    elf.write_code_word(rv32::jal(Zero, target - elf.code_len()));
                }
                Jump => {
                    let name = instr.func_name.ok_or(CompileError::Malformed(Jump))?;
                    if name == id("main") {
                        let globals = self.store.func(GLOBAL_FRAME).stack_size + 4;
                        elf.write_code_word(rv32::lui(T6, hi(globals)));
                        elf.write_code_word(rv32::addi(T6, T6, lo(globals)));
                        elf.write_code_word(rv32::add(T6, Sp, T6));
                        elf.write_code_word(rv32::lw(A0, T6, 0));
                        elf.write_code_word(rv32::addi(A1, T6, 4));
                    }
                    let target = self.labels.find(name)?;
                    elf.write_code_word(rv32::jal(Zero, target - elf.code_len()));
                }
                Load | GlobalLoad => {
                    let base = if instr.op == Load { Sp } else { Gp };
                    let rd = slot_reg(instr.dest)?;
                    if fits_imm12(instr.src0) {
                        elf.write_code_word(rv32::lw(rd, base, instr.src0));
                    } else {
                        elf.write_code_word(rv32::lui(T6, hi(instr.src0)));
                        elf.write_code_word(rv32::addi(T6, T6, lo(instr.src0)));
                        elf.write_code_word(rv32::add(T6, T6, base));
                        elf.write_code_word(rv32::lw(rd, T6, 0));
                    }
                }
                Store | GlobalStore => {
                    let base = if instr.op == Store { Sp } else { Gp };
                    let rs = slot_reg(instr.src0)?;
                    if fits_imm12(instr.src1) {
                        elf.write_code_word(rv32::sw(rs, base, instr.src1));
                    } else {
                        elf.write_code_word(rv32::lui(T6, hi(instr.src1)));
                        elf.write_code_word(rv32::addi(T6, T6, lo(instr.src1)));
                        elf.write_code_word(rv32::add(T6, T6, base));
                        elf.write_code_word(rv32::sw(rs, T6, 0));
                    }
                }
                Read => {
                    let rd = slot_reg(instr.dest)?;
                    let ptr = slot_reg(instr.src0)?;
                    match instr.src1 {
                        1 => elf.write_code_word(rv32::lb(rd, ptr, 0)),
                        4 => elf.write_code_word(rv32::lw(rd, ptr, 0)),
                        size => return Err(CompileError::AccessSize(size)),
                    }
                }
                Write => {
                    let value = slot_reg(instr.src0)?;
                    let ptr = slot_reg(instr.src1)?;
                    match instr.dest {
                        1 => elf.write_code_word(rv32::sb(value, ptr, 0)),
                        4 => elf.write_code_word(rv32::sw(value, ptr, 0)),
                        size => return Err(CompileError::AccessSize(size)),
                    }
                }
                FuncAddr => {
                    let name = instr.func_name.ok_or(CompileError::Malformed(FuncAddr))?;
                    let target = self.labels.find(name)? + CODE_START;
                    elf.write_code_word(rv32::lui(T6, hi(target)));
                    elf.write_code_word(rv32::addi(T6, T6, lo(target)));
                    elf.write_code_word(rv32::sw(T6, slot_reg(instr.src0)?, 0));
                }
                Indirect => elf.write_code_word(rv32::jalr(Ra, T6, 0)),
                Call => {
                    let name = instr.func_name.ok_or(CompileError::Malformed(Call))?;
                    let target = self.labels.find(name)?;
                    elf.write_code_word(rv32::jal(Ra, target - elf.code_len()));
                }
                Return => {
                    if instr.src0 == -1 {
                        elf.write_code_word(rv32::addi(Zero, Zero, 0));
                    } else {
                        elf.write_code_word(rv32::addi(A0, slot_reg(instr.src0)?, 0));
                    }
                    let frame = self.store.func(cur_fn).stack_size + 8;
                    elf.write_code_word(rv32::lui(S0, hi(frame)));
                    elf.write_code_word(rv32::addi(S0, S0, lo(frame)));
                    elf.write_code_word(rv32::add(Sp, Sp, S0));
                    elf.write_code_word(rv32::lw(S0, Sp, -4));
                    elf.write_code_word(rv32::lw(Ra, Sp, -8));
                    elf.write_code_word(rv32::jalr(Zero, Ra, 0));
                }
                Negate => {
                    elf.write_code_word(rv32::sub(
                        slot_reg(instr.dest)?,
                        Zero,
                        slot_reg(instr.src0)?,
                    ));
                }
                BitNot => {
                    elf.write_code_word(rv32::xori(
                        slot_reg(instr.dest)?,
                        slot_reg(instr.src0)?,
                        -1,
                    ));
                }
                Add | Sub | Mul | Div | Mod | BitAnd | BitOr | BitXor | Rshift | Lshift => {
                    let rd = slot_reg(instr.dest)?;
                    let rs0 = slot_reg(instr.src0)?;
                    let rs1 = slot_reg(instr.src1)?;
                    let word = match instr.op {
                        Add => rv32::add(rd, rs0, rs1),
                        Sub => rv32::sub(rd, rs0, rs1),
                        Mul => rv32::mul(rd, rs0, rs1),
                        Div => rv32::div(rd, rs0, rs1),
                        Mod => rv32::rem(rd, rs0, rs1),
                        BitAnd => rv32::and(rd, rs0, rs1),
                        BitOr => rv32::or(rd, rs0, rs1),
                        BitXor => rv32::xor(rd, rs0, rs1),
                        Rshift => rv32::sra(rd, rs0, rs1),
                        _ => rv32::sll(rd, rs0, rs1),
                    };
                    elf.write_code_word(word);
                }
                Eq | Neq => {
                    let rd = slot_reg(instr.dest)?;
                    elf.write_code_word(rv32::sub(rd, slot_reg(instr.src0)?, slot_reg(instr.src1)?));
                    elf.write_code_word(rv32::sltu(rd, Zero, rd));
                    if instr.op == Eq {
                        elf.write_code_word(rv32::xori(rd, rd, 1));
                    }
                }
                Gt | Lt | Geq | Leq => {
                    let rd = slot_reg(instr.dest)?;
                    let rs0 = slot_reg(instr.src0)?;
                    let rs1 = slot_reg(instr.src1)?;
                    // gt/leq swap operands; geq/leq invert
                    let word = match instr.op {
                        Lt | Geq => rv32::slt(rd, rs0, rs1),
                        _ => rv32::slt(rd, rs1, rs0),
                    };
                    elf.write_code_word(word);
                    if matches!(instr.op, Geq | Leq) {
                        elf.write_code_word(rv32::xori(rd, rd, 1));
                    }
                }
                LogAnd => {
                    // normalize src0, stretch it to a mask, intersect with
                    // src1, normalize again; src1 is read after rd is
                    // written, hence the allocator's hold on it
                    let rd = slot_reg(instr.dest)?;
                    elf.write_code_word(rv32::sltu(rd, Zero, slot_reg(instr.src0)?));
                    elf.write_code_word(rv32::sub(rd, Zero, rd));
                    elf.write_code_word(rv32::and(rd, rd, slot_reg(instr.src1)?));
                    elf.write_code_word(rv32::sltu(rd, Zero, rd));
                }
                LogOr => {
                    let rd = slot_reg(instr.dest)?;
                    elf.write_code_word(rv32::or(rd, slot_reg(instr.src0)?, slot_reg(instr.src1)?));
                    elf.write_code_word(rv32::sltu(rd, Zero, rd));
                }
                LogNot => {
                    let rd = slot_reg(instr.dest)?;
                    elf.write_code_word(rv32::sltu(rd, Zero, slot_reg(instr.src0)?));
                    elf.write_code_word(rv32::xori(rd, rd, 1));
                }
                op => return Err(CompileError::UnsupportedOp(op)),
            }
        }
        Ok(())
    }
}

fn slot_reg(slot: i32) -> Result<Reg> {
    Reg::from_slot(slot).ok_or(CompileError::BadSlot(slot))
}
