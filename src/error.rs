//! Compiler errors.
//!
//! The taxonomy is intentionally flat: a table ran out of room, the IR had
//! a shape the back-end does not support, or an access width cannot be
//! encoded.  None of these are recoverable; the driver prints the message
//! and aborts.

use thiserror::Error;

use crate::common::Id;
use crate::middle::ir::Op;

#[derive(Debug, Error)]
pub enum CompileError {
    /// A fixed-capacity table is full.
    #[error("too many {0}")]
    Capacity(&'static str),

    #[error("unsupported {0} operation in global initializer")]
    UnsupportedGlobalOp(Op),

    #[error("global allocation in body statement")]
    GlobalAllocInBody,

    #[error("unknown type `{0}`")]
    UnknownType(Id),

    #[error("unknown function `{0}`")]
    UnknownFunction(Id),

    #[error("function `{name}` has {count} parameters, at most 8 are supported")]
    TooManyParams { name: Id, count: usize },

    #[error("stack frame of `{name}` is {size} bytes, larger than the supported maximum")]
    FrameTooLarge { name: Id, size: i32 },

    #[error("label `{0}` is not present in the label table")]
    MissingLabel(Id),

    #[error("register slot {0} does not map to a machine register")]
    BadSlot(i32),

    #[error("{0} cannot be emitted as Phase-2 IR")]
    UnsupportedOp(Op),

    #[error("{0} instruction is missing an operand")]
    Malformed(Op),

    /// Memory access width other than 1 or 4 bytes.
    #[error("unsupported access size of {0} bytes")]
    AccessSize(i32),

    #[error("lex error at line {line}: unexpected character {found:?}")]
    Lex { line: usize, found: char },

    #[error("parse error at line {line}: {msg}")]
    Parse { line: usize, msg: String },
}

pub type Result<T> = std::result::Result<T, CompileError>;
