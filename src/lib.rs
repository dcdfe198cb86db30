//! This is the compiler as a library.  See `src/bin` for the executable
//! driver built on top of it.
//!
//! The pipeline: the front-end parses C source into the entity store and a
//! linear Phase-1 IR; the liveness pass annotates variable lifetimes; the
//! lowering pass performs linear-scan register allocation and produces
//! Phase-2 IR; the two-pass emitter turns Phase-2 IR into RV32 machine code
//! inside a statically linked ELF image.

pub mod common;
pub mod error;
pub mod front;
pub mod middle;
pub mod back;
