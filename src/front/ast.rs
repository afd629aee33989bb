//! The abstract syntax tree the back end consumes.
//!
//! This is the Rust shape of the `Node`/`Tree` records described in spec
//! §3, trimmed to the node types the back end actually dispatches on (the
//! full front end that produces this tree — image scanning, symbol
//! lexing, recursive-descent parsing — lives outside this crate).

use crate::common::Id;

/// Discriminant of an AST node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// Top-level list of variable and function declarations.
    DefinitionSequence,
    /// A statement followed by the rest of a statement list.
    Sequence,
    /// `var name = init;` in a local or global scope.
    NewVariable,
    /// `def name(params) { body }`.
    FunctionDefinition,
    /// One formal parameter in a function's parameter list.
    Parameter,
    /// One actual argument in a call's argument list.
    Argument,
    /// A call expression or call-statement.
    Call,
    /// `if (cond) then [else]`.
    If,
    /// Two-child holder for an `If`'s then/else branches.
    Branch,
    /// `while (cond) body`.
    While,
    /// `return expr;`.
    Return,
    /// A binary operator node, including assignment (`op == Assign`).
    Op,
    /// A numeric literal leaf.
    Num,
    /// A variable-reference leaf.
    Var,
}

/// Arithmetic, comparison, and assignment operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Assign,
    Eq,
    Neq,
    Gre,
    Les,
    Geq,
    Leq,
}

/// The payload carried by a node, per spec §3: an operator code, a
/// double-precision literal, an identifier, or nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Op(Op),
    Num(f64),
    Ident(Id),
}

/// One AST node. Owned by its parent; the tree the back end walks is
/// read-only.
#[derive(Debug)]
pub struct Node {
    pub node_type: NodeType,
    pub value: Value,
    pub left: Option<Box<Node>>,
    pub right: Option<Box<Node>>,
}

impl Node {
    pub fn new(node_type: NodeType, value: Value, left: Option<Box<Node>>, right: Option<Box<Node>>) -> Self {
        Node { node_type, value, left, right }
    }

    /// The identifier carried by this node, if its value is `Ident`.
    pub fn ident(&self) -> Option<Id> {
        match &self.value {
            Value::Ident(id) => Some(*id),
            _ => None,
        }
    }

    /// The operator carried by this node, if its value is `Op`.
    pub fn op(&self) -> Option<Op> {
        match &self.value {
            Value::Op(op) => Some(*op),
            _ => None,
        }
    }

    /// The number carried by this node, if its value is `Num`.
    pub fn number(&self) -> Option<f64> {
        match &self.value {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }
}
