//! Pure encoder from one abstract [`Instruction`] to its x86-64 byte
//! encoding (spec §4.2, §6.2).
//!
//! Grounded on `original_source/source/inter.cpp`'s `write_command`, with
//! one deliberate deviation: single-operand `IDIV` encodes ModR/M
//! `11_111_rm`, not the `11_101_rm` the original reuses from `IMUL` by
//! copy-paste (spec §9 flags this as a bug to fix, not an intent to
//! preserve).

use crate::back::ir::{Instruction, Opcode, Operand};
use crate::common::CompileError;

fn unsupported(instruction: &Instruction) -> CompileError {
    CompileError::UnsupportedInstruction { detail: format!("{instruction:?}") }
}

/// `11_reg_rm`.
fn modrm_reg_rm(reg_field: u8, rm_field: u8) -> u8 {
    0xC0 | ((reg_field & 0x7) << 3) | (rm_field & 0x7)
}

/// REX prefix for a two-64-bit-register instruction where `rm_reg` fills
/// the ModR/M rm field (needs REX.B) and `reg_reg` fills the ModR/M reg
/// field (needs REX.R).
fn rex_two_regs(rm_reg: crate::back::ir::Register, reg_reg: crate::back::ir::Register) -> u8 {
    let mut rex = 0x48;
    if rm_reg.is_extended() {
        rex |= 0x01;
    }
    if reg_reg.is_extended() {
        rex |= 0x04;
    }
    rex
}

/// REX prefix for a single-register instruction (`rm_reg` only needs
/// REX.B).
fn rex_one_reg(rm_reg: crate::back::ir::Register) -> u8 {
    0x48 | if rm_reg.is_extended() { 0x01 } else { 0 }
}

fn push_two_regs(out: &mut Vec<u8>, opcode_byte: u8, dst: crate::back::ir::Register, src: crate::back::ir::Register) {
    out.push(rex_two_regs(dst, src));
    out.push(opcode_byte);
    out.push(modrm_reg_rm(src.id(), dst.id()));
}

fn jcc_byte(opcode: Opcode) -> Option<u8> {
    use Opcode::*;
    Some(match opcode {
        Je => 0x84,
        Jne => 0x85,
        Jg => 0x8F,
        Jge => 0x8D,
        Jl => 0x8C,
        Jle => 0x8E,
        Ja => 0x87,
        Jae => 0x83,
        Jb => 0x82,
        Jbe => 0x86,
        _ => return None,
    })
}

fn encode_bytes(instruction: &Instruction) -> Result<Vec<u8>, CompileError> {
    use Opcode::*;
    use Operand::*;

    let mut out = Vec::with_capacity(10);
    let Instruction { opcode, op1, op2 } = *instruction;

    match (opcode, op1, op2) {
        (Mov, Reg(dst), Reg(src)) if dst.width == 64 && src.width == 64 => {
            push_two_regs(&mut out, 0x89, dst.reg, src.reg);
        }
        (Mov, Reg(dst), Const(imm)) if dst.width == 64 => {
            out.push(rex_one_reg(dst.reg));
            out.push(0xC7);
            out.push(modrm_reg_rm(0, dst.reg.id()));
            out.extend_from_slice(&(imm.value as i32).to_le_bytes());
        }
        (Push, Reg(src), None) if src.width == 64 => {
            if src.reg.is_extended() {
                out.push(0x41);
            }
            out.push(0x50 | (src.reg.id() & 0x7));
        }
        (Push, Const(imm), None) => {
            out.push(0x68);
            out.extend_from_slice(&(imm.value as i32).to_le_bytes());
        }
        (Push, Mem(mem), None) if mem.width == 64 => {
            encode_mem_opcode(&mut out, 0xFF, 0b110, mem);
        }
        (Pop, Reg(dst), None) if dst.width == 64 => {
            if dst.reg.is_extended() {
                out.push(0x41);
            }
            out.push(0x58 | (dst.reg.id() & 0x7));
        }
        (Pop, Mem(mem), None) if mem.width == 64 => {
            encode_mem_opcode(&mut out, 0x8F, 0b000, mem);
        }
        (Add, Reg(dst), Reg(src)) if dst.width == 64 && src.width == 64 => {
            push_two_regs(&mut out, 0x01, dst.reg, src.reg);
        }
        (Add, Reg(dst), Const(imm)) if dst.width == 64 => {
            out.push(rex_one_reg(dst.reg));
            out.push(0x81);
            out.push(modrm_reg_rm(0, dst.reg.id()));
            out.extend_from_slice(&(imm.value as i32).to_le_bytes());
        }
        (Sub, Reg(dst), Reg(src)) if dst.width == 64 && src.width == 64 => {
            push_two_regs(&mut out, 0x29, dst.reg, src.reg);
        }
        (Imul, Reg(src), None) if src.width == 64 => {
            out.push(rex_one_reg(src.reg));
            out.push(0xF7);
            out.push(modrm_reg_rm(0b101, src.reg.id()));
        }
        (Idiv, Reg(src), None) if src.width == 64 => {
            out.push(rex_one_reg(src.reg));
            out.push(0xF7);
            out.push(modrm_reg_rm(0b111, src.reg.id()));
        }
        (And, Reg(dst), Reg(src)) if dst.width == 64 && src.width == 64 => {
            push_two_regs(&mut out, 0x21, dst.reg, src.reg);
        }
        (Or, Reg(dst), Reg(src)) if dst.width == 64 && src.width == 64 => {
            push_two_regs(&mut out, 0x09, dst.reg, src.reg);
        }
        (Xor, Reg(dst), Reg(src)) if dst.width == 64 && src.width == 64 => {
            push_two_regs(&mut out, 0x31, dst.reg, src.reg);
        }
        (Test, Reg(a), Reg(b)) if a.width == 64 && b.width == 64 => {
            push_two_regs(&mut out, 0x85, a.reg, b.reg);
        }
        (Cmp, Reg(a), Reg(b)) if a.width == 64 && b.width == 64 => {
            push_two_regs(&mut out, 0x39, a.reg, b.reg);
        }
        (Ret, None, None) => out.push(0xC3),
        (Cdqe, None, None) => {
            out.push(0x48);
            out.push(0x98);
        }
        (Syscall, None, None) => {
            out.push(0x0F);
            out.push(0x05);
        }
        (Jmp, Const(imm), None) if imm.width == 32 => {
            out.push(0xE9);
            out.extend_from_slice(&(imm.value as i32).to_le_bytes());
        }
        (Call, Const(imm), None) if imm.width == 32 => {
            out.push(0xE8);
            out.extend_from_slice(&(imm.value as i32).to_le_bytes());
        }
        (jcc, Const(imm), None) if imm.width == 32 && jcc_byte(jcc).is_some() => {
            out.push(0x0F);
            out.push(jcc_byte(jcc).unwrap());
            out.extend_from_slice(&(imm.value as i32).to_le_bytes());
        }
        _ => return Err(unsupported(instruction)),
    }

    Ok(out)
}

/// PUSH/POP `QWORD PTR [disp32]` or `[reg+disp32]` — shared between the two
/// since they only differ in opcode byte and ModR/M reg field.
fn encode_mem_opcode(out: &mut Vec<u8>, opcode_byte: u8, reg_field: u8, mem: crate::back::ir::MemOperand) {
    match mem.base {
        Some(base) => {
            if base.is_extended() {
                out.push(0x41);
            }
            out.push(opcode_byte);
            out.push(0x80 | ((reg_field & 0x7) << 3) | (base.id() & 0x7));
        }
        None => {
            out.push(opcode_byte);
            out.push(0x04);
            out.push(0x25);
        }
    }
    out.extend_from_slice(&mem.displacement.to_le_bytes());
}

/// Encode `instruction` into `out`, returning the number of bytes written.
pub fn encode(instruction: &Instruction, out: &mut [u8]) -> Result<usize, CompileError> {
    let bytes = encode_bytes(instruction)?;
    out[..bytes.len()].copy_from_slice(&bytes);
    Ok(bytes.len())
}

/// The size in bytes `encode` would produce for `instruction`, without
/// emitting it.
pub fn instruction_size(instruction: &Instruction) -> Result<usize, CompileError> {
    Ok(encode_bytes(instruction)?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::back::ir::Register;

    fn bytes(instruction: Instruction) -> Vec<u8> {
        encode_bytes(&instruction).unwrap()
    }

    #[test]
    fn mov_reg_reg_matches_known_encoding() {
        let instr = Instruction::new(Opcode::Mov, Operand::reg64(Register::A), Operand::reg64(Register::B));
        assert_eq!(bytes(instr), vec![0x48, 0x89, 0xD8]);
    }

    #[test]
    fn idiv_uses_the_corrected_modrm_byte() {
        let instr = Instruction::new(Opcode::Idiv, Operand::reg64(Register::R8), Operand::None);
        assert_eq!(bytes(instr), vec![0x49, 0xF7, 0xF8]);
    }

    #[test]
    fn imul_keeps_the_original_modrm_byte() {
        let instr = Instruction::new(Opcode::Imul, Operand::reg64(Register::Di), Operand::None);
        assert_eq!(bytes(instr), vec![0x48, 0xF7, 0xEF]);
    }

    #[test]
    fn push_extended_register_needs_rex() {
        let instr = Instruction::new(Opcode::Push, Operand::reg64(Register::R12), Operand::None);
        assert_eq!(bytes(instr), vec![0x41, 0x54]);
    }

    #[test]
    fn push_plain_register_has_no_rex() {
        let instr = Instruction::new(Opcode::Push, Operand::reg64(Register::C), Operand::None);
        assert_eq!(bytes(instr), vec![0x51]);
    }

    #[test]
    fn jcc_rel32_encoding() {
        let instr = Instruction::new(Opcode::Jge, Operand::const32(-10), Operand::None);
        let mut expected = vec![0x0F, 0x8D];
        expected.extend_from_slice(&(-10i32).to_le_bytes());
        assert_eq!(bytes(instr), expected);
    }

    #[test]
    fn instruction_size_matches_encode_length() {
        let instr = Instruction::new(Opcode::Mov, Operand::reg64(Register::R9), Operand::const32(123));
        assert_eq!(instruction_size(&instr).unwrap(), encode_bytes(&instr).unwrap().len());
    }

    #[test]
    fn unsupported_shape_is_an_error() {
        let instr = Instruction::new(Opcode::Mov, Operand::None, Operand::None);
        assert!(encode(&instr, &mut [0u8; 16]).is_err());
    }
}
