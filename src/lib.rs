//! The compiler back end as a library: reads a serialized AST, lowers it
//! to x86-64 machine code through an abstract-assembler IR, and
//! serializes the result as an ELF64 executable. See `src/bin` for the
//! driver binary.

pub mod back;
pub mod common;
pub mod front;
