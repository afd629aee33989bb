//! Scope-aware symbol tables: the variable frame chain and the function
//! table (spec §4.3).
//!
//! Grounded on `original_source/source/program.cpp`'s `gnu_hash`/name
//! lookup and `source/inter.hpp`'s `Variable` struct, generalized from a
//! fixed-size C array of frames to a `Vec<Frame>` stack.

use crate::common::{CompileError, Id};

/// `djb2`/gnu-hash, seed 5381, 33-multiplier — the precomputed fast-path
/// used before falling back to full string equality.
pub fn name_hash(name: &str) -> u64 {
    let mut hash: u64 = 5381;
    for byte in name.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u64);
    }
    hash
}

/// One declared variable: a local (negative slot), a parameter (slot
/// `>= 2`), or a global (non-negative index into the globals array).
#[derive(Debug, Clone, Copy)]
pub struct VariableEntry {
    pub name: Id,
    pub name_hash: u64,
    pub slot_index: i32,
    pub initial_value: i64,
}

impl VariableEntry {
    pub fn new(name: Id, slot_index: i32, initial_value: i64) -> Self {
        VariableEntry { name, name_hash: name_hash(&name), slot_index, initial_value }
    }
}

#[derive(Debug, Default)]
struct Frame {
    entries: Vec<VariableEntry>,
}

/// The singly-linked stack of variable frames (spec §3's "scope chain").
/// Frame `0` is always the global frame; it is never popped.
pub struct ScopeChain {
    frames: Vec<Frame>,
    /// Index into `frames` of the current function's parameter scope, set
    /// on function entry and cleared on exit. `frame_size` sums only the
    /// frames above this one, so it never rescans popped frames or
    /// mistakes parameters/globals for locals.
    parameter_scope_depth: Option<usize>,
}

impl ScopeChain {
    pub fn new() -> Self {
        ScopeChain { frames: vec![Frame::default()], parameter_scope_depth: None }
    }

    /// Push a fresh, empty scope (a block, a loop body, a branch).
    pub fn push_scope(&mut self) {
        self.frames.push(Frame::default());
    }

    /// Pop the innermost scope, releasing its declarations.
    pub fn pop_scope(&mut self) {
        assert!(self.frames.len() > 1, "cannot pop the global frame");
        self.frames.pop();
    }

    /// Push the parameter scope for an about-to-be-lowered function body,
    /// recording its depth so `frame_size` knows where locals stop.
    pub fn push_parameter_scope(&mut self) {
        self.parameter_scope_depth = Some(self.frames.len());
        self.frames.push(Frame::default());
    }

    /// Pop the parameter scope on function exit.
    pub fn pop_parameter_scope(&mut self) {
        self.pop_scope();
        self.parameter_scope_depth = None;
    }

    /// Total local slots declared in every scope from the innermost up to
    /// (excluding) the current function's parameter scope — spec §4.3.
    pub fn frame_size(&self) -> usize {
        let start = self.parameter_scope_depth.map_or(1, |depth| depth + 1);
        self.frames[start..].iter().map(|frame| frame.entries.len()).sum()
    }

    /// Declare `entry` in the innermost scope. Fails if the name is
    /// already declared in that same scope (spec's uniqueness invariant;
    /// shadowing an outer scope's name is fine).
    pub fn declare(&mut self, entry: VariableEntry) -> Result<(), CompileError> {
        let innermost = self.frames.last_mut().expect("scope chain is never empty");
        if innermost.entries.iter().any(|existing| existing.name == entry.name) {
            return Err(CompileError::DuplicateDeclaration { name: entry.name });
        }
        innermost.entries.push(entry);
        Ok(())
    }

    /// Look up `name`, searching outward from the innermost scope. If
    /// `max_depth` is `Some(n)`, only the nearest `n` scopes are
    /// considered (depth 1 checks only the current scope — used when
    /// declaring, to detect same-scope redeclaration without this method).
    /// Returns the entry and whether it was found in the global frame.
    pub fn lookup(&self, name: Id, max_depth: Option<usize>) -> Option<(VariableEntry, bool)> {
        let scopes = self.frames.iter().rev().enumerate();
        for (depth, frame) in scopes {
            if let Some(limit) = max_depth {
                if depth >= limit {
                    break;
                }
            }
            if let Some(entry) = frame.entries.iter().rev().find(|e| e.name == name) {
                let is_global = depth == self.frames.len() - 1;
                return Some((*entry, is_global));
            }
        }
        None
    }
}

impl Default for ScopeChain {
    fn default() -> Self {
        Self::new()
    }
}

/// One declared function: name, argument count, and the `ip` its
/// prologue begins at.
#[derive(Debug, Clone, Copy)]
pub struct FunctionEntry {
    pub name: Id,
    pub name_hash: u64,
    pub arg_count: usize,
    pub code_offset: u32,
}

impl FunctionEntry {
    pub fn new(name: Id, arg_count: usize, code_offset: u32) -> Self {
        FunctionEntry { name, name_hash: name_hash(&name), arg_count, code_offset }
    }
}

/// Flat, globally-shared table of function declarations, pre-populated
/// with the standard-library entries (spec §4.3, §6.4).
pub struct FunctionTable {
    entries: Vec<FunctionEntry>,
}

impl FunctionTable {
    pub fn new() -> Self {
        use crate::back::stdlib::{IN_ARGS, IN_OFFSET, OUT_ARGS, OUT_OFFSET, SQRT_ARGS, SQRT_OFFSET};
        let entries = vec![
            FunctionEntry::new(Id::from("in".to_string()), IN_ARGS, IN_OFFSET),
            FunctionEntry::new(Id::from("out".to_string()), OUT_ARGS, OUT_OFFSET),
            FunctionEntry::new(Id::from("sqrt".to_string()), SQRT_ARGS, SQRT_OFFSET),
        ];
        FunctionTable { entries }
    }

    /// Append a user-defined function. Fails on a name already declared
    /// (including a standard-library name).
    pub fn declare(&mut self, name: Id, arg_count: usize, code_offset: u32) -> Result<(), CompileError> {
        if self.lookup(name).is_some() {
            return Err(CompileError::DuplicateDeclaration { name });
        }
        self.entries.push(FunctionEntry::new(name, arg_count, code_offset));
        Ok(())
    }

    pub fn lookup(&self, name: Id) -> Option<FunctionEntry> {
        self.entries.iter().find(|entry| entry.name == name).copied()
    }
}

impl Default for FunctionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declares_and_shadows() {
        let mut chain = ScopeChain::new();
        let x = Id::from("x".to_string());
        chain.declare(VariableEntry::new(x, 0, 0)).unwrap();
        assert!(chain.declare(VariableEntry::new(x, 1, 0)).is_err());

        chain.push_scope();
        chain.declare(VariableEntry::new(x, -1, 0)).unwrap();
        let (found, is_global) = chain.lookup(x, None).unwrap();
        assert_eq!(found.slot_index, -1);
        assert!(!is_global);
        chain.pop_scope();

        let (found, is_global) = chain.lookup(x, None).unwrap();
        assert_eq!(found.slot_index, 0);
        assert!(is_global);
    }

    #[test]
    fn frame_size_ignores_parameters_and_globals() {
        let mut chain = ScopeChain::new();
        chain.declare(VariableEntry::new(Id::from("g".to_string()), 0, 0)).unwrap();

        chain.push_parameter_scope();
        chain.declare(VariableEntry::new(Id::from("p".to_string()), 2, 0)).unwrap();
        assert_eq!(chain.frame_size(), 0);

        chain.push_scope();
        chain.declare(VariableEntry::new(Id::from("a".to_string()), -1, 0)).unwrap();
        assert_eq!(chain.frame_size(), 1);

        chain.push_scope();
        chain.declare(VariableEntry::new(Id::from("b".to_string()), -2, 0)).unwrap();
        assert_eq!(chain.frame_size(), 2);

        chain.pop_scope();
        assert_eq!(chain.frame_size(), 1);
    }

    #[test]
    fn depth_bound_limits_lookup() {
        let mut chain = ScopeChain::new();
        let x = Id::from("x".to_string());
        chain.declare(VariableEntry::new(x, 0, 0)).unwrap();
        chain.push_scope();
        assert!(chain.lookup(x, Some(1)).is_none());
        assert!(chain.lookup(x, None).is_some());
    }

    #[test]
    fn function_table_has_stdlib_entries() {
        let table = FunctionTable::new();
        assert!(table.lookup(Id::from("in".to_string())).is_some());
        assert!(table.lookup(Id::from("out".to_string())).is_some());
        assert!(table.lookup(Id::from("sqrt".to_string())).is_some());
    }

    #[test]
    fn function_table_rejects_duplicates() {
        let mut table = FunctionTable::new();
        let name = Id::from("main".to_string());
        table.declare(name, 0, 0x10).unwrap();
        assert!(table.declare(name, 1, 0x20).is_err());
    }
}
