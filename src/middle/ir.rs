//! The two intermediate representations.
//!
//! Both IRs are linear instruction streams sharing one closed opcode sum.
//! Phase-1 operands are variable references into the entity store; Phase-2
//! operands are small integers whose meaning depends on the opcode: a
//! register slot index, a frame byte offset, an immediate, or an access
//! size.  Adding an opcode forces updates to liveness, lowering, and both
//! emitter passes by construction (every consumer matches exhaustively).

use derive_more::Display;

use crate::common::Id;
use crate::middle::store::VarId;

/// Opcodes shared by Phase-1 and Phase-2 IR.
///
/// The `Load`/`Store`/`GlobalLoad`/`GlobalStore` spill-and-reload forms and
/// `FuncAddr` only ever appear in Phase-2 IR; they are synthesized by the
/// register allocator.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum Op {
    #[display("define")]
    Define,
    #[display("block_start")]
    BlockStart,
    #[display("block_end")]
    BlockEnd,
    #[display("allocat")]
    Alloc,
    #[display("const")]
    LoadConst,
    #[display("data_addr")]
    LoadDataAddr,
    #[display("label")]
    Label,
    #[display("j")]
    Jump,
    #[display("br")]
    Branch,
    #[display("push")]
    Push,
    #[display("call")]
    Call,
    #[display("indirect")]
    Indirect,
    #[display("retval")]
    RetVal,
    #[display("ret")]
    Return,
    #[display("addr_of")]
    AddrOf,
    #[display("global_addr_of")]
    GlobalAddrOf,
    #[display("read")]
    Read,
    #[display("write")]
    Write,
    #[display("func_addr")]
    FuncAddr,
    #[display("load")]
    Load,
    #[display("store")]
    Store,
    #[display("global_load")]
    GlobalLoad,
    #[display("global_store")]
    GlobalStore,
    #[display("assign")]
    Assign,
    #[display("neg")]
    Negate,
    #[display("add")]
    Add,
    #[display("sub")]
    Sub,
    #[display("mul")]
    Mul,
    #[display("div")]
    Div,
    #[display("mod")]
    Mod,
    #[display("eq")]
    Eq,
    #[display("neq")]
    Neq,
    #[display("gt")]
    Gt,
    #[display("lt")]
    Lt,
    #[display("geq")]
    Geq,
    #[display("leq")]
    Leq,
    #[display("and")]
    BitAnd,
    #[display("or")]
    BitOr,
    #[display("xor")]
    BitXor,
    #[display("not")]
    BitNot,
    #[display("log_and")]
    LogAnd,
    #[display("log_or")]
    LogOr,
    #[display("log_not")]
    LogNot,
    #[display("rshift")]
    Rshift,
    #[display("lshift")]
    Lshift,
}

impl Op {
    /// Binary arithmetic and comparison opcodes: two sources, one
    /// destination.  `LogAnd` is excluded because its destination slot must
    /// not alias source 1 (the emitter reads source 1 after writing the
    /// destination).
    pub fn is_binary(self) -> bool {
        use Op::*;
        matches!(
            self,
            Add | Sub
                | Mul
                | Div
                | Mod
                | Eq
                | Neq
                | Gt
                | Lt
                | Geq
                | Leq
                | BitAnd
                | BitOr
                | BitXor
                | LogOr
                | Rshift
                | Lshift
        )
    }

    /// Unary opcodes: one source, one destination.  `Assign` lowers the
    /// same way and is included.
    pub fn is_unary(self) -> bool {
        use Op::*;
        matches!(self, Assign | Negate | BitNot | LogNot)
    }
}

/// A Phase-1 instruction: opcode plus variable operands.
#[derive(Clone, Copy, Debug)]
pub struct Ph1Instr {
    pub op: Op,
    /// Callee or defined function for `Call` / `Define`.
    pub func_name: Option<Id>,
    pub dest: Option<VarId>,
    pub src0: Option<VarId>,
    pub src1: Option<VarId>,
    /// Number of pushed arguments, carried by `Call` for the listings.
    pub arg_count: usize,
    /// Memory access width in bytes for `Read` / `Write`.
    pub size: i32,
}

impl Ph1Instr {
    /// Operand accessors for passes that require the operand.  A missing
    /// one is a front-end bug surfaced as a shape error.
    pub fn dest_var(&self) -> crate::error::Result<VarId> {
        self.dest.ok_or(crate::error::CompileError::Malformed(self.op))
    }

    pub fn src0_var(&self) -> crate::error::Result<VarId> {
        self.src0.ok_or(crate::error::CompileError::Malformed(self.op))
    }

    pub fn src1_var(&self) -> crate::error::Result<VarId> {
        self.src1.ok_or(crate::error::CompileError::Malformed(self.op))
    }

    pub fn new(op: Op) -> Self {
        Ph1Instr {
            op,
            func_name: None,
            dest: None,
            src0: None,
            src1: None,
            arg_count: 0,
            size: 0,
        }
    }
}

/// A Phase-2 instruction: opcode plus three small integers and optional
/// label names.  `dest`/`src0`/`src1` are interpreted per opcode as a
/// register slot index, a frame byte offset, an immediate, or an access
/// size.  A `Return` with no value carries `src0 == -1`.
#[derive(Clone, Debug)]
pub struct Ph2Instr {
    pub op: Op,
    pub dest: i32,
    pub src0: i32,
    pub src1: i32,
    /// Function label for `Define` / `Call` / `FuncAddr`, plain label for
    /// `Label` / `Jump`.
    pub func_name: Option<Id>,
    pub true_label: Option<Id>,
    pub false_label: Option<Id>,
}

impl Ph2Instr {
    pub fn new(op: Op) -> Self {
        Ph2Instr {
            op,
            dest: 0,
            src0: 0,
            src1: 0,
            func_name: None,
            true_label: None,
            false_label: None,
        }
    }
}
