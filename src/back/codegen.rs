//! The code generator: a recursive walk over the AST that emits IR into
//! an [`IrBuffer`] (spec §4.4).
//!
//! Everything here threads an explicit [`Generator`] value instead of
//! mutating globals — the reference implementation keeps a global
//! function table and line counter (spec §9's design note), but passing
//! state explicitly is the same behaviour with a testable boundary, in
//! the spirit of `CompilerContext` in `examples/parishoffman-smol`'s
//! `back::codegen`.

use crate::back::ir::{Instruction, IrBuffer, Opcode, Operand, Register};
use crate::back::symtab::{FunctionTable, ScopeChain, VariableEntry};
use crate::common::error::NodeKind;
use crate::common::{CompileError, Id};
use crate::front::{Node, NodeType, Op};

fn node_kind(node_type: NodeType) -> NodeKind {
    match node_type {
        NodeType::DefinitionSequence => NodeKind::DefinitionSequence,
        NodeType::Sequence => NodeKind::Sequence,
        NodeType::NewVariable => NodeKind::NewVariable,
        NodeType::FunctionDefinition => NodeKind::FunctionDefinition,
        NodeType::Parameter => NodeKind::Parameter,
        NodeType::Argument => NodeKind::Argument,
        NodeType::Call => NodeKind::Call,
        NodeType::If => NodeKind::If,
        NodeType::Branch => NodeKind::Branch,
        NodeType::While => NodeKind::While,
        NodeType::Return => NodeKind::Return,
        NodeType::Op => NodeKind::Operator,
        NodeType::Num => NodeKind::Number,
        NodeType::Var => NodeKind::Variable,
    }
}

fn malformed(node: &Node, detail: impl Into<String>) -> CompileError {
    CompileError::MalformedAst { kind: node_kind(node.node_type), detail: detail.into() }
}

/// Like [`malformed`], but for shape errors in an assignment (an `Op` node
/// with `op == Assign`) where `NodeKind::Operator` would be too generic to
/// tell an assignment-shape bug apart from an arithmetic/comparison one.
fn malformed_assignment(detail: impl Into<String>) -> CompileError {
    CompileError::MalformedAst { kind: NodeKind::Assignment, detail: detail.into() }
}

/// Scale a source-level real number into the fixed-point ×1000
/// convention (spec §4.4, §9).
fn scale(value: f64) -> i64 {
    (value * 1000.0).round() as i64
}

/// Everything [`generate`] produces: the populated IR, the globals in
/// declaration order with their scaled initial values, the sites in the
/// IR where an absolute global address still needs to be patched in once
/// the final code layout is known (index into `globals`), and a
/// human-readable listing.
#[derive(Debug)]
pub struct CodeGenOutput {
    pub ir: IrBuffer,
    pub globals: Vec<(Id, i64)>,
    pub global_patch_sites: Vec<(usize, usize)>,
    pub listing: String,
}

/// Lower `root` — the Definition-Sequence node at the top of the AST —
/// into a complete program (spec §4.4.1).
pub fn generate(root: &Node) -> Result<CodeGenOutput, CompileError> {
    let mut gen = Generator::new();
    gen.run(root)?;
    let mut listing = String::new();
    if !gen.globals.is_empty() {
        listing.push_str(".data\n");
        for (name, value) in &gen.globals {
            listing.push_str(&format!("  {name}: {value}\n"));
        }
    }
    listing.push_str(".text\n");
    gen.ir.dump(&mut listing).expect("writing to a String cannot fail");
    Ok(CodeGenOutput { ir: gen.ir, globals: gen.globals, global_patch_sites: gen.global_patch_sites, listing })
}

struct Generator {
    ir: IrBuffer,
    functions: FunctionTable,
    scopes: ScopeChain,
    globals: Vec<(Id, i64)>,
    global_patch_sites: Vec<(usize, usize)>,
}

impl Generator {
    fn new() -> Self {
        Generator {
            ir: IrBuffer::new(1024),
            functions: FunctionTable::new(),
            scopes: ScopeChain::new(),
            globals: Vec::new(),
            global_patch_sites: Vec::new(),
        }
    }

    fn run(&mut self, root: &Node) -> Result<(), CompileError> {
        // Entry-point prelude (spec §4.4.1.1): call `main`, then exit with
        // its return value as the process exit code.
        let main_call_site = self.ir.emit_jump(Opcode::Call)?;
        self.ir.append(Opcode::Mov, Operand::reg64(Register::Di), Operand::reg64(Register::A))?;
        self.ir.append(Opcode::Mov, Operand::reg64(Register::A), Operand::const32(60))?;
        self.ir.append(Opcode::Syscall, Operand::None, Operand::None)?;

        let mut cursor = Some(root);
        while let Some(node) = cursor {
            if node.node_type != NodeType::DefinitionSequence {
                return Err(malformed(node, "expected a definition-sequence node"));
            }
            if let Some(def) = node.left.as_deref() {
                match def.node_type {
                    NodeType::NewVariable => self.lower_global(def)?,
                    NodeType::FunctionDefinition => self.lower_function(def)?,
                    _ => return Err(malformed(def, "expected a variable or function definition")),
                }
            }
            cursor = node.right.as_deref();
        }

        let main = self.functions.lookup(Id::from("main".to_string())).ok_or(CompileError::MissingMain)?;
        self.ir.set_relative(main_call_site, main.code_offset as i64);
        Ok(())
    }

    fn lower_global(&mut self, def: &Node) -> Result<(), CompileError> {
        let name = def.ident().ok_or_else(|| malformed(def, "new-variable node has no name"))?;
        let init = def.left.as_deref().ok_or_else(|| malformed(def, "global declared without an initializer"))?;
        let value = init.number().ok_or_else(|| malformed(init, "a global's initializer must be a numeric literal"))?;
        let initial = scale(value);
        let slot_index = self.globals.len() as i32;
        self.scopes.declare(VariableEntry::new(name, slot_index, initial))?;
        self.globals.push((name, initial));
        Ok(())
    }

    fn lower_function(&mut self, def: &Node) -> Result<(), CompileError> {
        let name = def.ident().ok_or_else(|| malformed(def, "function-definition node has no name"))?;

        let mut params = Vec::new();
        let mut cursor = def.left.as_deref();
        while let Some(param) = cursor {
            if param.node_type != NodeType::Parameter {
                return Err(malformed(param, "expected a parameter node"));
            }
            params.push(param.ident().ok_or_else(|| malformed(param, "parameter node has no name"))?);
            cursor = param.right.as_deref();
        }

        let code_offset = self.ir.ip();
        self.functions.declare(name, params.len(), code_offset)?;

        self.ir.append(Opcode::Push, Operand::reg64(Register::Bp), Operand::None)?;
        self.ir.append(Opcode::Mov, Operand::reg64(Register::Bp), Operand::reg64(Register::Sp))?;

        self.scopes.push_parameter_scope();
        for (index, param_name) in params.iter().enumerate() {
            self.scopes.declare(VariableEntry::new(*param_name, 2 + index as i32, 0))?;
        }
        self.scopes.push_scope();
        self.lower_sequence(def.right.as_deref())?;
        self.scopes.pop_scope();
        self.scopes.pop_parameter_scope();

        // Guard epilogue for falling off the end without an explicit
        // `return` (spec §9's open question, resolved: fail closed rather
        // than leave behaviour undefined).
        self.ir.append(Opcode::Mov, Operand::reg64(Register::A), Operand::const32(0))?;
        self.ir.append(Opcode::Mov, Operand::reg64(Register::Sp), Operand::reg64(Register::Bp))?;
        self.ir.append(Opcode::Pop, Operand::reg64(Register::Bp), Operand::None)?;
        self.ir.append(Opcode::Ret, Operand::None, Operand::None)?;

        Ok(())
    }

    fn lower_sequence(&mut self, node: Option<&Node>) -> Result<(), CompileError> {
        let mut cursor = node;
        while let Some(seq) = cursor {
            if seq.node_type != NodeType::Sequence {
                return Err(malformed(seq, "expected a statement-sequence node"));
            }
            if let Some(stmt) = seq.left.as_deref() {
                self.lower_statement(stmt)?;
            }
            cursor = seq.right.as_deref();
        }
        Ok(())
    }

    fn lower_statement(&mut self, stmt: &Node) -> Result<(), CompileError> {
        match stmt.node_type {
            NodeType::NewVariable => self.lower_local(stmt),
            NodeType::Op if stmt.op() == Some(Op::Assign) => self.lower_assignment(stmt),
            NodeType::If => self.lower_if(stmt),
            NodeType::While => self.lower_while(stmt),
            NodeType::Return => self.lower_return(stmt),
            NodeType::Call => {
                self.lower_call(stmt)?;
                self.ir.append(Opcode::Add, Operand::reg64(Register::Sp), Operand::const32(8))?;
                Ok(())
            }
            _ => Err(malformed(stmt, "expected a statement")),
        }
    }

    fn lower_local(&mut self, stmt: &Node) -> Result<(), CompileError> {
        let name = stmt.ident().ok_or_else(|| malformed(stmt, "new-variable node has no name"))?;
        let init = stmt.left.as_deref().ok_or_else(|| malformed(stmt, "local declared without an initializer"))?;
        let slot_index = -1 - self.scopes.frame_size() as i32;
        self.scopes.declare(VariableEntry::new(name, slot_index, 0))?;
        // The initializer's pushed value *is* the variable's stack slot —
        // no further pop (spec §4.4.3).
        self.lower_expr(init)
    }

    fn lower_assignment(&mut self, stmt: &Node) -> Result<(), CompileError> {
        let target = stmt.left.as_deref().ok_or_else(|| malformed_assignment("assignment has no target"))?;
        if target.node_type != NodeType::Var {
            return Err(malformed_assignment("assignment target must be a variable"));
        }
        let name = target.ident().ok_or_else(|| malformed_assignment("assignment target has no name"))?;
        let rhs = stmt.right.as_deref().ok_or_else(|| malformed_assignment("assignment has no right-hand side"))?;

        self.lower_expr(rhs)?;

        let (entry, is_global) = self.scopes.lookup(name, None).ok_or(CompileError::UndeclaredName { name })?;
        if is_global {
            let site = self.ir.append(Opcode::Pop, Operand::mem64_absolute(0), Operand::None)?;
            self.global_patch_sites.push((site, entry.slot_index as usize));
        } else {
            self.ir.append(Opcode::Pop, Operand::mem64(Register::Bp, 8 * entry.slot_index), Operand::None)?;
        }
        Ok(())
    }

    fn lower_if(&mut self, stmt: &Node) -> Result<(), CompileError> {
        let cond = stmt.left.as_deref().ok_or_else(|| malformed(stmt, "if has no condition"))?;
        let branch = stmt.right.as_deref().ok_or_else(|| malformed(stmt, "if has no branch holder"))?;
        if branch.node_type != NodeType::Branch {
            return Err(malformed(branch, "expected an if-branch node"));
        }

        self.lower_expr(cond)?;
        self.ir.append(Opcode::Pop, Operand::reg64(Register::Di), Operand::None)?;
        self.ir.append(Opcode::Test, Operand::reg64(Register::Di), Operand::reg64(Register::Di))?;
        let je_site = self.ir.emit_jump(Opcode::Je)?;

        self.scopes.push_scope();
        self.lower_sequence(branch.left.as_deref())?;
        self.scopes.pop_scope();

        match branch.right.as_deref() {
            Some(else_seq) => {
                let jmp_site = self.ir.emit_jump(Opcode::Jmp)?;
                let l_false = self.ir.ip() as i64;
                self.ir.set_relative(je_site, l_false);

                self.scopes.push_scope();
                self.lower_sequence(Some(else_seq))?;
                self.scopes.pop_scope();

                let l_end = self.ir.ip() as i64;
                self.ir.set_relative(jmp_site, l_end);
            }
            None => {
                let l_false = self.ir.ip() as i64;
                self.ir.set_relative(je_site, l_false);
            }
        }
        Ok(())
    }

    fn lower_while(&mut self, stmt: &Node) -> Result<(), CompileError> {
        let cond = stmt.left.as_deref().ok_or_else(|| malformed(stmt, "while has no condition"))?;
        let body = stmt.right.as_deref();

        let jmp_to_cond = self.ir.emit_jump(Opcode::Jmp)?;
        let l_body = self.ir.ip() as i64;

        self.scopes.push_scope();
        self.lower_sequence(body)?;
        self.scopes.pop_scope();

        let l_cond = self.ir.ip() as i64;
        self.ir.set_relative(jmp_to_cond, l_cond);

        self.lower_expr(cond)?;
        self.ir.append(Opcode::Pop, Operand::reg64(Register::Di), Operand::None)?;
        self.ir.append(Opcode::Test, Operand::reg64(Register::Di), Operand::reg64(Register::Di))?;
        let jne_site = self.ir.emit_jump(Opcode::Jne)?;
        self.ir.set_relative(jne_site, l_body);
        Ok(())
    }

    fn lower_return(&mut self, stmt: &Node) -> Result<(), CompileError> {
        let expr = stmt.left.as_deref().ok_or_else(|| malformed(stmt, "return has no expression"))?;
        self.lower_expr(expr)?;
        self.ir.append(Opcode::Pop, Operand::reg64(Register::A), Operand::None)?;
        self.ir.append(Opcode::Mov, Operand::reg64(Register::Sp), Operand::reg64(Register::Bp))?;
        self.ir.append(Opcode::Pop, Operand::reg64(Register::Bp), Operand::None)?;
        self.ir.append(Opcode::Ret, Operand::None, Operand::None)?;
        Ok(())
    }

    fn lower_expr(&mut self, node: &Node) -> Result<(), CompileError> {
        match node.node_type {
            NodeType::Num => {
                let value = node.number().ok_or_else(|| malformed(node, "number node has no value"))?;
                self.ir.append(Opcode::Push, Operand::const32(scale(value)), Operand::None)?;
                Ok(())
            }
            NodeType::Var => {
                let name = node.ident().ok_or_else(|| malformed(node, "variable node has no name"))?;
                let (entry, is_global) = self.scopes.lookup(name, None).ok_or(CompileError::UndeclaredName { name })?;
                if is_global {
                    let site = self.ir.append(Opcode::Push, Operand::mem64_absolute(0), Operand::None)?;
                    self.global_patch_sites.push((site, entry.slot_index as usize));
                } else {
                    self.ir.append(Opcode::Push, Operand::mem64(Register::Bp, 8 * entry.slot_index), Operand::None)?;
                }
                Ok(())
            }
            NodeType::Call => self.lower_call(node),
            NodeType::Op => {
                let op = node.op().ok_or_else(|| malformed(node, "operator node has no operator"))?;
                let left = node.left.as_deref().ok_or_else(|| malformed(node, "operator has no left operand"))?;
                let right = node.right.as_deref().ok_or_else(|| malformed(node, "operator has no right operand"))?;
                match op {
                    Op::Add | Op::Sub | Op::Mul | Op::Div => self.lower_arith(op, left, right),
                    Op::Eq | Op::Neq | Op::Gre | Op::Les | Op::Geq | Op::Leq => {
                        self.lower_comparison(op, left, right)
                    }
                    Op::Assign => Err(malformed(node, "assignment is a statement, not an expression")),
                }
            }
            _ => Err(malformed(node, "expected an expression")),
        }
    }

    fn lower_arith(&mut self, op: Op, left: &Node, right: &Node) -> Result<(), CompileError> {
        self.lower_expr(left)?;
        self.lower_expr(right)?;
        match op {
            Op::Add => {
                self.ir.append(Opcode::Pop, Operand::reg64(Register::Di), Operand::None)?;
                self.ir.append(Opcode::Pop, Operand::reg64(Register::Si), Operand::None)?;
                self.ir.append(Opcode::Add, Operand::reg64(Register::Di), Operand::reg64(Register::Si))?;
                self.ir.append(Opcode::Push, Operand::reg64(Register::Di), Operand::None)?;
            }
            Op::Sub => {
                // Asymmetric pop order: the right operand is on top of the
                // stack (spec §4.4.4).
                self.ir.append(Opcode::Pop, Operand::reg64(Register::Si), Operand::None)?;
                self.ir.append(Opcode::Pop, Operand::reg64(Register::Di), Operand::None)?;
                self.ir.append(Opcode::Sub, Operand::reg64(Register::Di), Operand::reg64(Register::Si))?;
                self.ir.append(Opcode::Push, Operand::reg64(Register::Di), Operand::None)?;
            }
            Op::Mul => {
                self.ir.append(Opcode::Pop, Operand::reg64(Register::Di), Operand::None)?;
                self.ir.append(Opcode::Pop, Operand::reg64(Register::A), Operand::None)?;
                self.ir.append(Opcode::Imul, Operand::reg64(Register::Di), Operand::None)?;
                self.ir.append(Opcode::Mov, Operand::reg64(Register::Di), Operand::const32(1000))?;
                self.ir.append(Opcode::Idiv, Operand::reg64(Register::Di), Operand::None)?;
                self.ir.append(Opcode::Cdqe, Operand::None, Operand::None)?;
                self.ir.append(Opcode::Push, Operand::reg64(Register::A), Operand::None)?;
            }
            Op::Div => {
                self.ir.append(Opcode::Pop, Operand::reg64(Register::Di), Operand::None)?;
                self.ir.append(Opcode::Pop, Operand::reg64(Register::A), Operand::None)?;
                self.ir.append(Opcode::Mov, Operand::reg64(Register::Si), Operand::const32(1000))?;
                self.ir.append(Opcode::Imul, Operand::reg64(Register::Si), Operand::None)?;
                self.ir.append(Opcode::Idiv, Operand::reg64(Register::Di), Operand::None)?;
                self.ir.append(Opcode::Cdqe, Operand::None, Operand::None)?;
                self.ir.append(Opcode::Push, Operand::reg64(Register::A), Operand::None)?;
            }
            _ => unreachable!("lower_arith only called for Add/Sub/Mul/Div"),
        }
        Ok(())
    }

    fn lower_comparison(&mut self, op: Op, left: &Node, right: &Node) -> Result<(), CompileError> {
        self.lower_expr(left)?;
        self.lower_expr(right)?;
        self.ir.append(Opcode::Pop, Operand::reg64(Register::Si), Operand::None)?;
        self.ir.append(Opcode::Pop, Operand::reg64(Register::Di), Operand::None)?;
        self.ir.append(Opcode::Cmp, Operand::reg64(Register::Di), Operand::reg64(Register::Si))?;
        self.ir.append(Opcode::Mov, Operand::reg64(Register::A), Operand::const32(1000))?;

        let jcc = match op {
            Op::Eq => Opcode::Je,
            Op::Neq => Opcode::Jne,
            Op::Gre => Opcode::Jg,
            Op::Les => Opcode::Jl,
            Op::Geq => Opcode::Jge,
            Op::Leq => Opcode::Jle,
            _ => unreachable!("lower_comparison only called for comparison operators"),
        };
        let site = self.ir.emit_jump(jcc)?;
        self.ir.append(Opcode::Xor, Operand::reg64(Register::A), Operand::reg64(Register::A))?;
        let l_true = self.ir.ip() as i64;
        self.ir.set_relative(site, l_true);
        self.ir.append(Opcode::Push, Operand::reg64(Register::A), Operand::None)?;
        Ok(())
    }

    /// Lower a call expression, leaving the return value on the stack
    /// (spec §4.4.5).
    fn lower_call(&mut self, node: &Node) -> Result<(), CompileError> {
        let name = node.ident().ok_or_else(|| malformed(node, "call node has no callee name"))?;

        let mut args = Vec::new();
        let mut cursor = node.left.as_deref();
        while let Some(arg) = cursor {
            if arg.node_type != NodeType::Argument {
                return Err(malformed(arg, "expected an argument node"));
            }
            args.push(arg.left.as_deref().ok_or_else(|| malformed(arg, "argument node has no expression"))?);
            cursor = arg.right.as_deref();
        }

        let entry = self.functions.lookup(name).ok_or(CompileError::UndeclaredName { name })?;
        if args.len() != entry.arg_count {
            return Err(CompileError::ArityMismatch { name, expected: entry.arg_count, got: args.len() });
        }

        // Reverse source order so the first argument ends up lowest on
        // the stack, at `[BP+16]` in the callee (spec §4.4.5).
        for arg in args.iter().rev() {
            self.lower_expr(arg)?;
        }

        let call_site = self.ir.emit_jump(Opcode::Call)?;
        self.ir.set_relative(call_site, entry.code_offset as i64);

        self.ir.append(Opcode::Add, Operand::reg64(Register::Sp), Operand::const32(8 * args.len() as i64))?;
        self.ir.append(Opcode::Push, Operand::reg64(Register::A), Operand::None)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::back::encode;
    use crate::back::ir::Opcode;
    use crate::front::Value;

    fn num(n: f64) -> Box<Node> {
        Box::new(Node::new(NodeType::Num, Value::Num(n), None, None))
    }

    fn var(name: &str) -> Box<Node> {
        Box::new(Node::new(NodeType::Var, Value::Ident(Id::from(name.to_string())), None, None))
    }

    fn ret(expr: Box<Node>) -> Box<Node> {
        Box::new(Node::new(NodeType::Return, Value::None, Some(expr), None))
    }

    fn seq(stmt: Box<Node>, rest: Option<Box<Node>>) -> Box<Node> {
        Box::new(Node::new(NodeType::Sequence, Value::None, Some(stmt), rest))
    }

    fn func(name: &str, params: Option<Box<Node>>, body: Option<Box<Node>>) -> Box<Node> {
        Box::new(Node::new(NodeType::FunctionDefinition, Value::Ident(Id::from(name.to_string())), params, body))
    }

    fn defseq(def: Option<Box<Node>>, rest: Option<Box<Node>>) -> Box<Node> {
        Box::new(Node::new(NodeType::DefinitionSequence, Value::None, def, rest))
    }

    fn call(name: &str, args: Option<Box<Node>>) -> Box<Node> {
        Box::new(Node::new(NodeType::Call, Value::Ident(Id::from(name.to_string())), args, None))
    }

    /// Sum of `encode::instruction_size` over `instructions[..=index]` — the
    /// ip right after that instruction, computed the same way `IrBuffer`
    /// computes it internally, so tests never hardcode byte counts.
    fn ip_after(instructions: &[Instruction], index: usize) -> i64 {
        instructions[..=index].iter().map(|i| encode::instruction_size(i).unwrap() as i64).sum()
    }

    fn patched(instructions: &[Instruction], index: usize) -> i64 {
        match instructions[index].op1 {
            Operand::Const(c) => c.value,
            _ => panic!("instruction {index} has no constant operand"),
        }
    }

    #[test]
    fn simple_return_emits_prelude_function_and_guard_epilogue() {
        let body = seq(ret(num(5.0)), None);
        let root = defseq(Some(func("main", None, Some(body))), None);

        let out = generate(&root).unwrap();
        let instrs = out.ir.instructions();

        let expected = [
            Opcode::Call,
            Opcode::Mov,
            Opcode::Mov,
            Opcode::Syscall,
            Opcode::Push,
            Opcode::Mov,
            Opcode::Push,
            Opcode::Pop,
            Opcode::Mov,
            Opcode::Pop,
            Opcode::Ret,
            Opcode::Mov,
            Opcode::Mov,
            Opcode::Pop,
            Opcode::Ret,
        ];
        assert_eq!(instrs.len(), expected.len());
        for (instruction, opcode) in instrs.iter().zip(expected.iter()) {
            assert_eq!(instruction.opcode, *opcode);
        }

        // The literal `5` is pushed scaled by 1000.
        assert_eq!(instrs[6].op1, Operand::const32(5000));

        // The prelude's `call main` resolves to the function's code_offset,
        // which is the ip right after the prologue (instructions 4 and 5).
        let target = patched(instrs, 0) + ip_after(instrs, 0);
        assert_eq!(target, ip_after(instrs, 5));
    }

    #[test]
    fn if_else_back_patches_both_branches() {
        let branch = Box::new(Node::new(
            NodeType::Branch,
            Value::None,
            Some(seq(ret(num(1.0)), None)),
            Some(seq(ret(num(2.0)), None)),
        ));
        let if_node = Box::new(Node::new(NodeType::If, Value::None, Some(num(1.0)), Some(branch)));
        let body = seq(if_node, None);
        let root = defseq(Some(func("main", None, Some(body))), None);

        let out = generate(&root).unwrap();
        let instrs = out.ir.instructions();

        let je_index = instrs.iter().position(|i| i.opcode == Opcode::Je).unwrap();
        let jmp_index = instrs.iter().position(|i| i.opcode == Opcode::Jmp).unwrap();

        // `je` skips to the start of the else branch, right after the `jmp`
        // that ends the then branch.
        let je_target = patched(instrs, je_index) + ip_after(instrs, je_index);
        assert_eq!(je_target, ip_after(instrs, jmp_index));

        // `jmp` (the then branch's tail) skips over the whole else branch,
        // landing on the guard epilogue. The else branch's `ret` is the
        // second-to-last `ret` in the function (the last belongs to the
        // guard epilogue).
        let ret_positions: Vec<usize> =
            instrs.iter().enumerate().filter(|(_, i)| i.opcode == Opcode::Ret).map(|(index, _)| index).collect();
        let last_else_ret = ret_positions[ret_positions.len() - 2];
        let jmp_target = patched(instrs, jmp_index) + ip_after(instrs, jmp_index);
        assert_eq!(jmp_target, ip_after(instrs, last_else_ret));
    }

    #[test]
    fn while_loop_jumps_to_condition_then_back_to_the_body() {
        let while_node = Box::new(Node::new(NodeType::While, Value::None, Some(num(1.0)), None));
        let body = seq(while_node, Some(seq(ret(num(0.0)), None)));
        let root = defseq(Some(func("main", None, Some(body))), None);

        let out = generate(&root).unwrap();
        let instrs = out.ir.instructions();

        let jmp_index = instrs.iter().position(|i| i.opcode == Opcode::Jmp).unwrap();
        let jne_index = instrs.iter().position(|i| i.opcode == Opcode::Jne).unwrap();

        // The loop body is empty, so the initial jump to the condition check
        // lands on the very next instruction: a zero relative offset.
        assert_eq!(patched(instrs, jmp_index), 0);

        // `jne` jumps back to the body start, which is right after the
        // initial `jmp`.
        let jne_target = patched(instrs, jne_index) + ip_after(instrs, jne_index);
        assert_eq!(jne_target, ip_after(instrs, jmp_index));
    }

    #[test]
    fn call_with_wrong_argument_count_is_an_arity_mismatch() {
        let helper_body = seq(ret(var("a")), None);
        let param = Box::new(Node::new(NodeType::Parameter, Value::Ident(Id::from("a".to_string())), None, None));
        let helper = func("helper", Some(param), Some(helper_body));

        let main_body = seq(ret(call("helper", None)), None);
        let main = func("main", None, Some(main_body));

        let root = defseq(Some(helper), Some(defseq(Some(main), None)));

        let err = generate(&root).unwrap_err();
        match err {
            CompileError::ArityMismatch { name, expected, got } => {
                assert_eq!(name, Id::from("helper".to_string()));
                assert_eq!(expected, 1);
                assert_eq!(got, 0);
            }
            other => panic!("expected ArityMismatch, got {other:?}"),
        }
    }

    #[test]
    fn reading_an_undeclared_variable_is_an_error() {
        let body = seq(ret(var("missing")), None);
        let root = defseq(Some(func("main", None, Some(body))), None);

        let err = generate(&root).unwrap_err();
        assert!(matches!(err, CompileError::UndeclaredName { name } if name == Id::from("missing".to_string())));
    }

    #[test]
    fn a_program_with_no_main_function_is_rejected() {
        let body = seq(ret(num(0.0)), None);
        let root = defseq(Some(func("not_main", None, Some(body))), None);

        let err = generate(&root).unwrap_err();
        assert!(matches!(err, CompileError::MissingMain));
    }

    #[test]
    fn assigning_to_a_global_records_a_patch_site() {
        let global = Box::new(Node::new(NodeType::NewVariable, Value::Ident(Id::from("g".to_string())), Some(num(3.5)), None));

        let assign = Box::new(Node::new(NodeType::Op, Value::Op(Op::Assign), Some(var("g")), Some(num(1.0))));
        let main_body = seq(assign, Some(seq(ret(num(0.0)), None)));
        let main = func("main", None, Some(main_body));

        let root = defseq(Some(global), Some(defseq(Some(main), None)));

        let out = generate(&root).unwrap();
        assert_eq!(out.globals, vec![(Id::from("g".to_string()), 3500)]);
        assert_eq!(out.global_patch_sites.len(), 1);
        assert_eq!(out.global_patch_sites[0].1, 0);
    }

    #[test]
    fn assigning_to_a_non_variable_target_is_a_malformed_assignment() {
        let assign = Box::new(Node::new(NodeType::Op, Value::Op(Op::Assign), Some(num(1.0)), Some(num(2.0))));
        let main_body = seq(assign, Some(seq(ret(num(0.0)), None)));
        let root = defseq(Some(func("main", None, Some(main_body))), None);

        let err = generate(&root).unwrap_err();
        assert!(matches!(
            err,
            CompileError::MalformedAst { kind: crate::common::error::NodeKind::Assignment, .. }
        ));
    }
}
