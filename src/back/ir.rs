//! Abstract x86-64 assembler instructions and the growable buffer that
//! holds a whole program's worth of them (spec §3, §4.1).
//!
//! `Register`, `Operand`, and `Instruction` are the Rust shape of the
//! `arg_reg_t`/`arg_mem_t`/`arg_const_t`/`AsmCmd` union types in
//! `original_source/source/inter.hpp`; `IrBuffer` is the Rust shape of its
//! `IR` struct, generalized from a manually `realloc`'d C array to a
//! `Vec` (which already doubles on growth, so `IR_resize` has no direct
//! counterpart here — `Vec::push`'s amortized growth *is* that behavior).

use std::fmt;

use derive_more::Display as DeriveDisplay;

use crate::back::encode;
use crate::common::CompileError;

/// A general-purpose register, in x86 hardware order (not alphabetical) —
/// this order is load-bearing: the encoder's ModR/M and REX-prefix logic
/// depends on `id()` matching the real register-field encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, DeriveDisplay)]
pub enum Register {
    #[display("rax")]
    A,
    #[display("rcx")]
    C,
    #[display("rdx")]
    D,
    #[display("rbx")]
    B,
    #[display("rsp")]
    Sp,
    #[display("rbp")]
    Bp,
    #[display("rsi")]
    Si,
    #[display("rdi")]
    Di,
    #[display("r8")]
    R8,
    #[display("r9")]
    R9,
    #[display("r10")]
    R10,
    #[display("r11")]
    R11,
    #[display("r12")]
    R12,
    #[display("r13")]
    R13,
    #[display("r14")]
    R14,
    #[display("r15")]
    R15,
}

impl Register {
    /// The 4-bit register field used by ModR/M and REX, in `0..16`.
    pub const fn id(self) -> u8 {
        use Register::*;
        match self {
            A => 0,
            C => 1,
            D => 2,
            B => 3,
            Sp => 4,
            Bp => 5,
            Si => 6,
            Di => 7,
            R8 => 8,
            R9 => 9,
            R10 => 10,
            R11 => 11,
            R12 => 12,
            R13 => 13,
            R14 => 14,
            R15 => 15,
        }
    }

    /// Whether this register needs the REX extension bit (`R8`..`R15`).
    pub const fn is_extended(self) -> bool {
        self.id() >= 8
    }
}

/// A register operand: width, which register, and (for 8-bit legacy
/// encodings) whether it names the high byte of a 16-bit pair. The
/// supported instruction subset (spec §6.2) only ever uses 64-bit
/// registers, but the field exists because it's part of the operand shape
/// spec §3 defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegOperand {
    pub width: u8,
    pub reg: Register,
    pub high_byte: bool,
}

/// A memory operand: `[base + displacement]`. `index`/`scale` are carried
/// for shape-completeness but spec §4.2 is explicit that only base+
/// displacement is ever encoded; an absolute `[displacement]` form (no
/// base) is used for global-variable access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemOperand {
    pub width: u8,
    pub base: Option<Register>,
    pub index: Option<Register>,
    pub scale: Option<Register>,
    pub displacement: i32,
}

/// An immediate operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstOperand {
    pub width: u8,
    pub value: i64,
}

/// A tagged operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    None,
    Reg(RegOperand),
    Mem(MemOperand),
    Const(ConstOperand),
}

impl Operand {
    pub fn reg64(reg: Register) -> Operand {
        Operand::Reg(RegOperand { width: 64, reg, high_byte: false })
    }

    pub fn mem64(base: Register, displacement: i32) -> Operand {
        Operand::Mem(MemOperand { width: 64, base: Some(base), index: None, scale: None, displacement })
    }

    /// A `[displacement]` absolute memory operand (global variable access).
    pub fn mem64_absolute(displacement: i32) -> Operand {
        Operand::Mem(MemOperand { width: 64, base: None, index: None, scale: None, displacement })
    }

    pub fn const32(value: i64) -> Operand {
        Operand::Const(ConstOperand { width: 32, value })
    }

    pub fn const64(value: i64) -> Operand {
        Operand::Const(ConstOperand { width: 64, value })
    }

    fn as_const_mut(&mut self) -> Option<&mut ConstOperand> {
        match self {
            Operand::Const(c) => Some(c),
            _ => None,
        }
    }

    fn as_mem_mut(&mut self) -> Option<&mut MemOperand> {
        match self {
            Operand::Mem(m) => Some(m),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Reg(r) => write!(f, "{}", r.reg),
            Operand::Const(c) => write!(f, "{}", c.value),
            Operand::Mem(m) => {
                let size_word = match m.width {
                    8 => "BYTE",
                    16 => "WORD",
                    32 => "DWORD",
                    64 => "QWORD",
                    _ => "?",
                };
                write!(f, "{size_word} [{}", m.displacement)?;
                if let Some(base) = m.base {
                    write!(f, "+{base}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Assembler command mnemonics (spec §6.2). Mirrors
/// `original_source/source/inter.hpp`'s `COMMAND_ID` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, DeriveDisplay)]
pub enum Opcode {
    #[display("mov")]
    Mov,
    #[display("push")]
    Push,
    #[display("pop")]
    Pop,
    #[display("add")]
    Add,
    #[display("sub")]
    Sub,
    #[display("imul")]
    Imul,
    #[display("idiv")]
    Idiv,
    #[display("and")]
    And,
    #[display("or")]
    Or,
    #[display("xor")]
    Xor,
    #[display("call")]
    Call,
    #[display("ret")]
    Ret,
    #[display("cdqe")]
    Cdqe,
    #[display("test")]
    Test,
    #[display("cmp")]
    Cmp,
    #[display("jmp")]
    Jmp,
    #[display("je")]
    Je,
    #[display("jne")]
    Jne,
    #[display("jg")]
    Jg,
    #[display("jge")]
    Jge,
    #[display("jl")]
    Jl,
    #[display("jle")]
    Jle,
    #[display("ja")]
    Ja,
    #[display("jae")]
    Jae,
    #[display("jb")]
    Jb,
    #[display("jbe")]
    Jbe,
    #[display("syscall")]
    Syscall,
}

impl Opcode {
    /// Whether this opcode is one of the conditional/unconditional jumps or
    /// `call` — the only opcodes whose single `rel32` immediate is ever
    /// back-patched.
    pub fn is_branch(self) -> bool {
        use Opcode::*;
        matches!(self, Jmp | Je | Jne | Jg | Jge | Jl | Jle | Ja | Jae | Jb | Jbe | Call)
    }
}

/// One abstract assembler instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub op1: Operand,
    pub op2: Operand,
}

impl Instruction {
    pub fn new(opcode: Opcode, op1: Operand, op2: Operand) -> Self {
        Instruction { opcode, op1, op2 }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        if !matches!(self.op1, Operand::None) {
            write!(f, " {}", self.op1)?;
            if !matches!(self.op2, Operand::None) {
                write!(f, ", {}", self.op2)?;
            }
        }
        Ok(())
    }
}

/// A growable, ordered sequence of [`Instruction`]s with a running
/// byte-offset counter (spec §3, §4.1). The invariant `ip ==
/// sum(encode_size(instructions[0..]))` holds after every [`append`].
///
/// [`append`]: IrBuffer::append
#[derive(Debug)]
pub struct IrBuffer {
    instructions: Vec<Instruction>,
    ip: u32,
}

impl IrBuffer {
    pub fn new(capacity: usize) -> Self {
        IrBuffer { instructions: Vec::with_capacity(capacity), ip: 0 }
    }

    /// Current code-segment byte offset: the size of every instruction
    /// appended so far.
    pub fn ip(&self) -> u32 {
        self.ip
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Append an instruction, returning its index ("site") for later
    /// back-patching. Fails if the encoder has no byte pattern for this
    /// (opcode, operand-shape) combination — the buffer is left unchanged
    /// on failure (the instruction is not appended).
    pub fn append(&mut self, opcode: Opcode, op1: Operand, op2: Operand) -> Result<usize, CompileError> {
        let instruction = Instruction::new(opcode, op1, op2);
        let size = encode::instruction_size(&instruction)?;
        let site = self.instructions.len();
        self.instructions.push(instruction);
        self.ip += size as u32;
        log::trace!("ir: appended [{site}] {instruction} ({size} bytes, ip now {})", self.ip);
        Ok(site)
    }

    /// Append a `jmp`/`jcc`/`call` whose rel32 immediate is not yet known,
    /// seeding it with the ip of the instruction right after this one —
    /// the convention [`set_relative`] expects. Returns the site for later
    /// patching.
    ///
    /// [`set_relative`]: IrBuffer::set_relative
    pub fn emit_jump(&mut self, opcode: Opcode) -> Result<usize, CompileError> {
        let site = self.append(opcode, Operand::const32(0), Operand::None)?;
        let next_ip = self.ip as i64;
        self.set_absolute(site, next_ip);
        Ok(site)
    }

    /// Overwrite the 32-bit immediate of an already-emitted instruction
    /// with an absolute value.
    pub fn set_absolute(&mut self, site: usize, value: i64) {
        let constant = self.instructions[site]
            .op1
            .as_const_mut()
            .expect("set_absolute called on a non-constant operand");
        constant.value = value;
    }

    /// Overwrite the 32-bit immediate of an already-emitted jump/call with
    /// `target_ip - stored_value`, where `stored_value` is whatever was
    /// last written there (by [`emit_jump`]'s convention, the ip of the
    /// instruction immediately after the site) — spec §4.4.7.
    ///
    /// [`emit_jump`]: IrBuffer::emit_jump
    pub fn set_relative(&mut self, site: usize, target_ip: i64) {
        let constant = self.instructions[site]
            .op1
            .as_const_mut()
            .expect("set_relative called on a non-constant operand");
        let stored = constant.value;
        constant.value = target_ip - stored;
        log::trace!("ir: back-patched [{site}] to relative {}", constant.value);
    }

    /// Overwrite the displacement of an already-emitted absolute memory
    /// operand (a global-variable access) with its final runtime address,
    /// once the ELF writer has computed the data segment's virtual
    /// address (spec §4.5).
    pub fn set_global_address(&mut self, site: usize, address: i32) {
        let mem = self.instructions[site]
            .op1
            .as_mem_mut()
            .expect("set_global_address called on a non-memory operand");
        mem.displacement = address;
    }

    /// Re-encode every instruction in order into `out`, which must be at
    /// least [`ip`](IrBuffer::ip) bytes long.
    pub fn write_all(&self, out: &mut [u8]) -> Result<(), CompileError> {
        let mut offset = 0usize;
        for instruction in &self.instructions {
            let size = encode::encode(instruction, &mut out[offset..])?;
            offset += size;
        }
        Ok(())
    }

    /// Human-readable hex + mnemonic listing, for the `-o` assembly
    /// listing and for debugging.
    pub fn dump(&self, sink: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(sink, "IR: {} instruction(s), {} byte(s)", self.instructions.len(), self.ip)?;
        let mut ip = 0u32;
        let mut scratch = [0u8; 16];
        for (index, instruction) in self.instructions.iter().enumerate() {
            let size = encode::encode(instruction, &mut scratch).unwrap_or(0);
            write!(sink, "  [{ip:06}] ")?;
            for byte in &scratch[..size] {
                write!(sink, "{byte:02x} ")?;
            }
            writeln!(sink, "\t{index}: {instruction}")?;
            ip += size as u32;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_tracks_total_encoded_size() {
        let mut ir = IrBuffer::new(4);
        ir.append(Opcode::Push, Operand::reg64(Register::A), Operand::None).unwrap();
        ir.append(Opcode::Ret, Operand::None, Operand::None).unwrap();
        let mut expected = 0u32;
        for instruction in ir.instructions() {
            expected += encode::instruction_size(instruction).unwrap() as u32;
        }
        assert_eq!(ir.ip(), expected);
    }

    #[test]
    fn forward_jump_patches_to_the_right_displacement() {
        let mut ir = IrBuffer::new(4);
        let site = ir.emit_jump(Opcode::Jmp).unwrap();
        let site_ip = ir.ip() - encode::instruction_size(&ir.instructions()[site]).unwrap() as u32;
        ir.append(Opcode::Ret, Operand::None, Operand::None).unwrap();
        let target = ir.ip() as i64;
        ir.set_relative(site, target);

        let patched = match ir.instructions()[site].op1 {
            Operand::Const(c) => c.value,
            _ => panic!("expected a constant operand"),
        };
        let size = encode::instruction_size(&ir.instructions()[site]).unwrap() as i64;
        assert_eq!(patched, target - (site_ip as i64 + size));
    }

    #[test]
    fn write_all_reproduces_encode_bytes() {
        let mut ir = IrBuffer::new(4);
        ir.append(Opcode::Mov, Operand::reg64(Register::A), Operand::const32(42)).unwrap();
        let mut out = vec![0u8; ir.ip() as usize];
        ir.write_all(&mut out).unwrap();
        let mut expected = vec![0u8; ir.ip() as usize];
        encode::encode(&ir.instructions()[0], &mut expected).unwrap();
        assert_eq!(out, expected);
    }
}
