//! Reader for the on-disk AST text format (spec §6.1).
//!
//! The format is a printable preorder serialization with braces:
//! `{type,value[,child1,child2]}`, where `{}` denotes a missing child.
//! `type` is an integer ordinal, `value` is an integer (operator code), a
//! decimal number (numeric literal), an identifier string, or empty (nodes
//! that carry no payload). Whitespace anywhere in the input is
//! insignificant and is stripped before parsing, per spec §6.1.
//!
//! The front end that emits this format is external to this crate (spec
//! §1), so the integer-to-`NodeType`/`Op` mapping below is this reader's
//! own contract rather than a value pinned by spec.md; see DESIGN.md.

use derive_more::{Display, Error};

use crate::common::Id;
use crate::front::ast::{Node, NodeType, Op, Value};

#[derive(Debug, Display, Error)]
#[display("malformed AST input at byte {offset}: {detail}")]
pub struct ReadError {
    pub offset: usize,
    pub detail: String,
}

impl From<ReadError> for crate::common::CompileError {
    fn from(err: ReadError) -> Self {
        crate::common::CompileError::ParseAst { offset: err.offset, detail: err.detail }
    }
}

fn node_type_from_ordinal(ordinal: u32, offset: usize) -> Result<NodeType, ReadError> {
    use NodeType::*;
    Ok(match ordinal {
        0 => DefinitionSequence,
        1 => Sequence,
        2 => NewVariable,
        3 => FunctionDefinition,
        4 => Parameter,
        5 => Argument,
        6 => Call,
        7 => If,
        8 => Branch,
        9 => While,
        10 => Return,
        11 => Op,
        12 => Num,
        13 => Var,
        other => {
            return Err(ReadError { offset, detail: format!("unknown node type ordinal {other}") })
        }
    })
}

fn op_from_ordinal(ordinal: u32, offset: usize) -> Result<Op, ReadError> {
    use Op::*;
    Ok(match ordinal {
        0 => Add,
        1 => Sub,
        2 => Mul,
        3 => Div,
        4 => Assign,
        5 => Eq,
        6 => Neq,
        7 => Gre,
        8 => Les,
        9 => Geq,
        10 => Leq,
        other => return Err(ReadError { offset, detail: format!("unknown operator ordinal {other}") }),
    })
}

/// Which kind of payload a [`NodeType`] carries in the text format.
fn value_kind(node_type: NodeType) -> ValueKind {
    use NodeType::*;
    match node_type {
        DefinitionSequence | Sequence | If | Branch | While | Return => ValueKind::None,
        NewVariable | FunctionDefinition | Parameter | Argument | Call | Var => ValueKind::Ident,
        Op => ValueKind::Op,
        Num => ValueKind::Num,
    }
}

enum ValueKind {
    None,
    Ident,
    Op,
    Num,
}

struct Reader {
    /// Whitespace-stripped input.
    bytes: Vec<u8>,
    pos: usize,
}

impl Reader {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn expect(&mut self, byte: u8) -> Result<(), ReadError> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(ReadError {
                offset: self.pos,
                detail: format!("expected '{}', found {:?}", byte as char, self.peek().map(|b| b as char)),
            })
        }
    }

    /// Read a field: bytes up to (not including) the next `,` or `}`.
    fn read_field(&mut self) -> String {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b',' || b == b'}' {
                break;
            }
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
    }

    fn parse_value(&mut self, kind: ValueKind, offset: usize) -> Result<Value, ReadError> {
        let field = self.read_field();
        Ok(match kind {
            ValueKind::None => Value::None,
            ValueKind::Ident => Value::Ident(Id::from(field)),
            ValueKind::Op => {
                let ordinal: u32 = field
                    .parse()
                    .map_err(|_| ReadError { offset, detail: format!("expected integer operator code, found {field:?}") })?;
                Value::Op(op_from_ordinal(ordinal, offset)?)
            }
            ValueKind::Num => {
                let n: f64 = field
                    .parse()
                    .map_err(|_| ReadError { offset, detail: format!("expected decimal number, found {field:?}") })?;
                Value::Num(n)
            }
        })
    }

    /// Parse one `{type,value[,child1,child2]}` or `{}` record.
    fn parse_node(&mut self) -> Result<Option<Node>, ReadError> {
        let start = self.pos;
        self.expect(b'{')?;

        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(None);
        }

        let type_field = self.read_field();
        let ordinal: u32 = type_field
            .parse()
            .map_err(|_| ReadError { offset: start, detail: format!("expected integer node type, found {type_field:?}") })?;
        let node_type = node_type_from_ordinal(ordinal, start)?;

        self.expect(b',')?;
        let value = self.parse_value(value_kind(node_type), self.pos)?;

        let mut left = None;
        let mut right = None;

        if self.peek() == Some(b',') {
            self.pos += 1;
            left = self.parse_node()?.map(Box::new);

            if self.peek() == Some(b',') {
                self.pos += 1;
                right = self.parse_node()?.map(Box::new);
            }
        }

        self.expect(b'}')?;

        Ok(Some(Node::new(node_type, value, left, right)))
    }
}

/// Parse the text-serialized AST (spec §6.1) into a `Node` tree.
///
/// Returns `Ok(None)` only if the top-level record is itself `{}`, which is
/// a malformed program (an empty `DefinitionSequence` is still a record, not
/// an absent one) — callers should treat a `None` result as
/// [`crate::common::CompileError::ParseAst`].
pub fn parse_ast(input: &str) -> Result<Node, ReadError> {
    let bytes: Vec<u8> = input.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    let mut reader = Reader { bytes, pos: 0 };

    let node = reader.parse_node()?;

    if reader.pos != reader.bytes.len() {
        return Err(ReadError {
            offset: reader.pos,
            detail: "trailing data after top-level AST record".to_string(),
        });
    }

    node.ok_or_else(|| ReadError { offset: 0, detail: "top-level AST record is empty".to_string() })
}
