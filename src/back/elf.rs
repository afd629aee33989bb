//! The ELF64 writer: assembles the standard-library blob, the generated
//! code, and (if present) a globals data segment into a minimal
//! statically-linked executable (spec §4.5, §6.3).
//!
//! Grounded on `original_source/source/elf_output.cpp`'s single-segment
//! layout, generalized to the 2-3 `PT_LOAD` layout spec §4.5 describes,
//! and on `other_examples/...elfgen.rs`'s `generate_elf` for the
//! idiomatic Rust shape (build one `Vec<u8>`, write it in one call, set
//! executable permissions explicitly).

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

use crate::back::ir::IrBuffer;
use crate::common::{CompileError, Id};

const ALIGN: u64 = 4096;
const START_ADDRESS: u64 = 0x400000;
const EHDR_SIZE: u64 = 64;
const PHDR_SIZE: u64 = 56;

const PT_LOAD: u32 = 1;
const PF_R: u32 = 4;
const PF_W: u32 = 2;
const PF_X: u32 = 1;

fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) / align * align
}

fn build_ehdr(entry: u64, phdr_count: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(EHDR_SIZE as usize);
    out.extend_from_slice(&[0x7F, b'E', b'L', b'F']);
    out.push(2); // ELFCLASS64
    out.push(1); // little-endian
    out.push(1); // EI_VERSION
    out.push(0); // ELFOSABI_SYSV
    out.extend_from_slice(&[0u8; 8]); // e_ident padding

    out.extend_from_slice(&2u16.to_le_bytes()); // e_type = ET_EXEC
    out.extend_from_slice(&0x3Eu16.to_le_bytes()); // e_machine = EM_X86_64
    out.extend_from_slice(&1u32.to_le_bytes()); // e_version
    out.extend_from_slice(&entry.to_le_bytes()); // e_entry
    out.extend_from_slice(&EHDR_SIZE.to_le_bytes()); // e_phoff
    out.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
    out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    out.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes()); // e_ehsize
    out.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes()); // e_phentsize
    out.extend_from_slice(&phdr_count.to_le_bytes()); // e_phnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shentsize
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx = SHN_UNDEF

    debug_assert_eq!(out.len() as u64, EHDR_SIZE);
    out
}

#[allow(clippy::too_many_arguments)]
fn build_phdr(flags: u32, offset: u64, vaddr: u64, filesz: u64, memsz: u64, align: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(PHDR_SIZE as usize);
    out.extend_from_slice(&PT_LOAD.to_le_bytes());
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&offset.to_le_bytes());
    out.extend_from_slice(&vaddr.to_le_bytes()); // p_vaddr
    out.extend_from_slice(&vaddr.to_le_bytes()); // p_paddr
    out.extend_from_slice(&filesz.to_le_bytes());
    out.extend_from_slice(&memsz.to_le_bytes());
    out.extend_from_slice(&align.to_le_bytes());
    debug_assert_eq!(out.len() as u64, PHDR_SIZE);
    out
}

/// Build and write the final executable to `out_path`.
///
/// `ir` is mutated: any global-address placeholders recorded during code
/// generation (`global_patch_sites`) are resolved to real virtual
/// addresses here, once the final code-segment size — and therefore the
/// globals segment's address — is known.
pub fn write_elf(
    ir: &mut IrBuffer,
    stdlib: &[u8],
    globals: &[(Id, i64)],
    global_patch_sites: &[(usize, usize)],
    out_path: &Path,
) -> Result<(), CompileError> {
    let generated_size = ir.ip() as u64;
    let code_size = stdlib.len() as u64 + generated_size;
    let code_size_aligned = align_up(code_size, ALIGN);

    let has_globals = !globals.is_empty();
    let globals_size = (globals.len() as u64) * 8;

    let data_offset = ALIGN + code_size_aligned;
    let data_vaddr = START_ADDRESS + data_offset;

    for &(site, global_index) in global_patch_sites {
        let address = data_vaddr + (global_index as u64) * 8;
        ir.set_global_address(site, address as i32);
    }

    let mut generated = vec![0u8; generated_size as usize];
    ir.write_all(&mut generated)?;

    let phdr_count: u16 = if has_globals { 3 } else { 2 };
    let headers_size = EHDR_SIZE + PHDR_SIZE * phdr_count as u64;
    let entry = START_ADDRESS + ALIGN + stdlib.len() as u64;

    let mut out = build_ehdr(entry, phdr_count);
    out.extend(build_phdr(PF_R, 0, START_ADDRESS, headers_size, headers_size, ALIGN));
    out.extend(build_phdr(PF_R | PF_X, ALIGN, START_ADDRESS + ALIGN, code_size, code_size, ALIGN));
    if has_globals {
        out.extend(build_phdr(PF_R | PF_W, data_offset, data_vaddr, globals_size, globals_size, ALIGN));
    }

    out.resize(ALIGN as usize, 0);
    out.extend_from_slice(stdlib);
    out.extend_from_slice(&generated);

    if has_globals {
        out.resize(data_offset as usize, 0);
        for (_, value) in globals {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }

    write_file(out_path, &out)
}

/// Write `bytes` to `out_path` with permissions `0777`, regardless of the
/// process umask — `OpenOptionsExt::mode` is still subject to the umask
/// at `open()` time on Unix, so the mode is set explicitly afterwards.
fn write_file(out_path: &Path, bytes: &[u8]) -> Result<(), CompileError> {
    let mut file = OpenOptions::new().create(true).write(true).truncate(true).mode(0o777).open(out_path)?;
    file.write_all(bytes)?;
    file.set_permissions(std::fs::Permissions::from_mode(0o777))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::back::ir::{Opcode, Operand};

    #[test]
    fn layout_without_globals_has_two_program_headers() {
        let mut ir = IrBuffer::new(4);
        ir.append(Opcode::Ret, Operand::None, Operand::None).unwrap();
        let stdlib = vec![0u8; 16];
        let dir = std::env::temp_dir().join(format!("pictoc-elf-test-{}-a", std::process::id()));
        write_elf(&mut ir, &stdlib, &[], &[], &dir).unwrap();

        let bytes = std::fs::read(&dir).unwrap();
        assert_eq!(&bytes[0..4], &[0x7F, b'E', b'L', b'F']);
        let phnum = u16::from_le_bytes([bytes[56], bytes[57]]);
        assert_eq!(phnum, 2);
        std::fs::remove_file(&dir).unwrap();
    }

    #[test]
    fn layout_with_globals_has_three_program_headers_and_is_aligned() {
        let mut ir = IrBuffer::new(4);
        ir.append(Opcode::Ret, Operand::None, Operand::None).unwrap();
        let stdlib = vec![0u8; 16];
        let globals = vec![(Id::from("g".to_string()), 10_000i64)];
        let dir = std::env::temp_dir().join(format!("pictoc-elf-test-{}-b", std::process::id()));
        write_elf(&mut ir, &stdlib, &globals, &[], &dir).unwrap();

        let bytes = std::fs::read(&dir).unwrap();
        let phnum = u16::from_le_bytes([bytes[56], bytes[57]]);
        assert_eq!(phnum, 3);
        // code segment occupies exactly one ALIGN page (stdlib + one RET
        // fits well under 4096 bytes), followed by 8 bytes for the single
        // global.
        assert_eq!(bytes.len(), ALIGN as usize * 2 + 8);
        std::fs::remove_file(&dir).unwrap();
    }
}
