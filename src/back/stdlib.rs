//! The standard-library blob: a fixed-size, position-dependent binary that
//! supplies `in`, `out`, and `sqrt` at pre-known offsets (spec §6.4).
//!
//! Grounded on `original_source/source/my_stdlib.hpp`'s stdlib constants; the
//! blob itself is opaque machine code this crate never inspects, only
//! copies.

use std::path::Path;

use crate::common::CompileError;

/// Default blob filename.
pub const STDLIB_FILE: &str = "stdlib.bin";

/// Exact required size of the blob, in bytes.
pub const STDLIB_SIZE: usize = 0x14E;

pub const IN_OFFSET: u32 = 0x00;
pub const OUT_OFFSET: u32 = 0x68;
pub const SQRT_OFFSET: u32 = 0xEE;

/// `in` takes no arguments and returns a fixed-point value read from
/// stdin; `out` takes the value to print; `sqrt` takes the value to root.
pub const IN_ARGS: usize = 0;
pub const OUT_ARGS: usize = 1;
pub const SQRT_ARGS: usize = 1;

/// Load the standard-library blob from `path`, verifying its size. The
/// blob is not otherwise validated — it is copied verbatim into the code
/// segment (spec §6.4).
pub fn load(path: &Path) -> Result<Vec<u8>, CompileError> {
    let bytes = std::fs::read(path)?;
    if bytes.len() != STDLIB_SIZE {
        return Err(CompileError::StdlibSizeMismatch { expected: STDLIB_SIZE, found: bytes.len() });
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_size() {
        let dir = std::env::temp_dir().join(format!("pictoc-stdlib-test-{}", std::process::id()));
        std::fs::write(&dir, vec![0u8; 4]).unwrap();
        let err = load(&dir).unwrap_err();
        assert!(matches!(err, CompileError::StdlibSizeMismatch { expected: STDLIB_SIZE, found: 4 }));
        std::fs::remove_file(&dir).unwrap();
    }
}
