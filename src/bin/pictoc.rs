//! The compiler back-end binary: reads a serialized AST, lowers it to
//! x86-64 machine code, and writes both a human-readable assembly
//! listing and an ELF64 executable.
//!
//! Run with `--help` for more info.

use std::path::PathBuf;

use clap::Parser;

use pictoc_back::back::stdlib;
use pictoc_back::back::{codegen, elf};
use pictoc_back::common::CompileError;
use pictoc_back::front;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// path to the serialized AST to compile (spec §6.1)
    #[arg(short, long)]
    input: PathBuf,

    /// path to write the human-readable assembly listing to
    #[arg(short, long)]
    output: PathBuf,

    /// path to the standard-library blob (spec §6.4)
    #[arg(long, default_value = stdlib::STDLIB_FILE)]
    stdlib: PathBuf,
}

fn run(args: Args) -> Result<(), CompileError> {
    let input = std::fs::read_to_string(&args.input)?;
    let ast = front::parse_ast(&input)?;

    log::info!("parsed AST from {}", args.input.display());

    let codegen::CodeGenOutput { mut ir, globals, global_patch_sites, listing } = codegen::generate(&ast)?;
    log::info!("generated {} byte(s) of code, {} global(s)", ir.ip(), globals.len());

    std::fs::write(&args.output, listing)?;

    let blob = stdlib::load(&args.stdlib)?;

    let elf_path = args.output.with_extension("elf");
    elf::write_elf(&mut ir, &blob, &globals, &global_patch_sites, &elf_path)?;
    log::info!("wrote executable to {}", elf_path.display());

    Ok(())
}

fn main() {
    pretty_env_logger::init();
    if let Err(err) = run(Args::parse()) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
