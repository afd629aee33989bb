//! The compiler's single error type.
//!
//! One variant per entry in the error taxonomy: malformed input, undeclared
//! or duplicate names, a missing `main`, arity mismatches, an encoder that
//! cannot produce bytes for some (opcode, operand-shape), and I/O failure.
//! Every compilation stops at the first error; there is no recovery.

use derive_more::{Display, Error};

use crate::common::Id;

/// What kind of AST node a [`CompileError`] is pointing at, for diagnostics.
///
/// The original C++ reference cites the offending node by pointer; a
/// borrowed-tree Rust back end has no stable address to print, so this
/// carries the same information a reader actually wants: what kind of node,
/// and (when relevant) which name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum NodeKind {
    #[display("sequence")]
    Sequence,
    #[display("new-variable")]
    NewVariable,
    #[display("function-definition")]
    FunctionDefinition,
    #[display("parameter")]
    Parameter,
    #[display("argument")]
    Argument,
    #[display("call")]
    Call,
    #[display("if")]
    If,
    #[display("if-branch")]
    Branch,
    #[display("while")]
    While,
    #[display("return")]
    Return,
    #[display("assignment")]
    Assignment,
    #[display("operator")]
    Operator,
    #[display("number literal")]
    Number,
    #[display("variable reference")]
    Variable,
    #[display("definition sequence")]
    DefinitionSequence,
}

/// Fatal compiler errors. The compiler reports the first one and aborts.
#[derive(Debug, Display, Error)]
pub enum CompileError {
    /// A node had the wrong type or shape for its position in the tree.
    #[display("malformed AST: {kind} node: {detail}")]
    MalformedAst { kind: NodeKind, detail: String },

    /// A variable or function was referenced but is not in scope.
    #[display("undeclared name: `{name}`")]
    UndeclaredName { name: Id },

    /// The same name was declared twice in the same scope (variables) or
    /// globally (functions).
    #[display("duplicate declaration: `{name}`")]
    DuplicateDeclaration { name: Id },

    /// No function named `main` was found after the whole program was
    /// processed.
    #[display("main not declared")]
    MissingMain,

    /// A call site's argument count did not match the declared function.
    #[display("arity mismatch calling `{name}`: expected {expected} argument(s), got {got}")]
    ArityMismatch { name: Id, expected: usize, got: usize },

    /// The encoder has no byte pattern for this (opcode, operand-shape)
    /// combination.
    #[display("unsupported instruction shape: {detail}")]
    UnsupportedInstruction { detail: String },

    /// The on-disk AST text format (spec §6.1) could not be parsed.
    #[display("malformed AST input at byte {offset}: {detail}")]
    ParseAst { offset: usize, detail: String },

    /// A required file could not be opened, read, or written.
    #[display("I/O failure: {0}")]
    Io(std::io::Error),

    /// The standard-library blob on disk is not `STDLIB_SIZE` bytes.
    #[display("standard library blob has the wrong size: expected {expected} byte(s), found {found}")]
    StdlibSizeMismatch { expected: usize, found: usize },
}

impl From<std::io::Error> for CompileError {
    fn from(err: std::io::Error) -> Self {
        CompileError::Io(err)
    }
}
