//! The back-end of the compiler: the IR buffer and instruction encoder,
//! the symbol tables, the code generator, the ELF writer, and the
//! standard-library blob loader (spec §2, §4).

pub mod codegen;
pub mod elf;
pub mod encode;
pub mod ir;
pub mod stdlib;
pub mod symtab;

pub use codegen::{generate, CodeGenOutput};
pub use elf::write_elf;
pub use ir::{Instruction, IrBuffer, MemOperand, Opcode, Operand, Register};
