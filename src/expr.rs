//! The expression evaluator (C2).
//!
//! Parses a small arithmetic grammar (`+ - * /`, unary minus, parens,
//! integers and symbol references) using precedence climbing, folding
//! constants eagerly the moment one side of a binary operation is a bare
//! number. The only shape left unresolved after parsing is a subtraction of
//! two symbols, which is deferred until every symbol's final address is
//! known — it is the one operation [`evaluate`] implements.

use crate::error::{AsError, AsResult, SourceLocation};
use crate::lexer::{Lexer, TokenKind};
use crate::symbol::{SymbolId, SymbolTable};

const PREC_ADD: u8 = 1;
const PREC_MUL: u8 = 2;
/// Sentinel precedence above every real operator: entering `parse_bp` at
/// this level parses exactly one primary term and nothing more, which is
/// how unary minus binds tighter than `*` (`-a*b` is `(-a)*b`, not `-(a*b)`).
const PREC_UNARY: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Subtract,
    Multiply,
    Divide,
}

/// A resolved or partially-resolved expression value: a number, optionally
/// still carrying one unresolved symbol (`symbol + 4`, say).
#[derive(Debug, Clone)]
pub struct Value {
    pub number: i64,
    pub symbol: Option<SymbolId>,
}

impl Value {
    fn number(n: i64) -> Self {
        Value { number: n, symbol: None }
    }
}

#[derive(Debug, Clone)]
pub enum Node {
    Leaf(Value),
    BinOp { op: Op, left: Box<Node>, right: Box<Node> },
}

impl Node {
    fn as_leaf(&self) -> Option<&Value> {
        match self {
            Node::Leaf(v) => Some(v),
            Node::BinOp { .. } => None,
        }
    }

    fn has_symbol(&self) -> bool {
        self.as_leaf().is_some_and(|v| v.symbol.is_some())
    }

    fn is_numeric(&self) -> bool {
        self.as_leaf().is_some_and(|v| v.symbol.is_none())
    }
}

/// Parse a full expression at the lowest precedence (`+`/`-` binding level).
pub fn parse_expression(lexer: &mut Lexer, symtab: &mut SymbolTable) -> AsResult<Node> {
    parse_bp(lexer, symtab, PREC_ADD)
}

fn parse_bp(lexer: &mut Lexer, symtab: &mut SymbolTable, min_prec: u8) -> AsResult<Node> {
    let mut node = parse_primary(lexer, symtab)?;

    loop {
        let (op, prec) = match lexer.kind() {
            TokenKind::Plus => (Op::Add, PREC_ADD),
            TokenKind::Minus => (Op::Subtract, PREC_ADD),
            TokenKind::Star => (Op::Multiply, PREC_MUL),
            TokenKind::Slash => (Op::Divide, PREC_MUL),
            _ => break,
        };
        if prec < min_prec {
            break;
        }
        let loc = lexer.location();
        lexer.advance()?;
        let rhs = parse_bp(lexer, symtab, PREC_MUL)?;
        node = combine(node, op, rhs, loc)?;
    }

    Ok(node)
}

fn parse_primary(lexer: &mut Lexer, symtab: &mut SymbolTable) -> AsResult<Node> {
    match lexer.kind().clone() {
        TokenKind::Plus => {
            lexer.advance()?;
            parse_bp(lexer, symtab, PREC_ADD)
        }
        TokenKind::Minus => {
            lexer.advance()?;
            let sub = parse_bp(lexer, symtab, PREC_UNARY)?;
            if sub.is_numeric() {
                let v = sub.as_leaf().unwrap();
                Ok(Node::Leaf(Value { number: -v.number, symbol: v.symbol }))
            } else {
                Ok(Node::BinOp {
                    op: Op::Subtract,
                    left: Box::new(Node::Leaf(Value::number(0))),
                    right: Box::new(sub),
                })
            }
        }
        TokenKind::Integer(n) => {
            lexer.advance()?;
            Ok(Node::Leaf(Value::number(n)))
        }
        TokenKind::Identifier(name) => {
            let id = symtab.get_or_add(&name);
            lexer.advance()?;
            Ok(Node::Leaf(Value { number: 0, symbol: Some(id) }))
        }
        TokenKind::LParen => {
            lexer.advance()?;
            let node = parse_bp(lexer, symtab, PREC_ADD)?;
            lexer.expect(&TokenKind::RParen)?;
            Ok(node)
        }
        other => Err(AsError::syntactic(
            lexer.location(),
            format!("unexpected token {:?} in expression", other),
        )),
    }
}

fn combine(left: Node, op: Op, right: Node, loc: SourceLocation) -> AsResult<Node> {
    if left.has_symbol() && right.has_symbol() {
        if op != Op::Subtract {
            return Err(AsError::semantic(loc, "invalid operation on two symbols"));
        }
        return Ok(Node::BinOp {
            op: Op::Subtract,
            left: Box::new(left),
            right: Box::new(right),
        });
    }

    // Mirrors the original tool's fold condition exactly, `&&` binding
    // tighter than `||`: a bare number on either side, OR a number on the
    // right paired with a symbol on either side.
    if left.is_numeric() || (right.is_numeric() && (left.has_symbol() || right.has_symbol())) {
        let left_leaf = left.as_leaf().cloned();
        let right_leaf = right.as_leaf().cloned();
        let (mut number, symbol) = match (left_leaf, right_leaf) {
            (Some(l), Some(r)) => (l.number, l.symbol.or(r.symbol)),
            _ => return Err(AsError::semantic(loc, "expression too complex to fold")),
        };
        let right_number = right.as_leaf().unwrap().number;
        match op {
            Op::Add => number += right_number,
            Op::Subtract => number -= right_number,
            Op::Multiply => number *= right_number,
            Op::Divide => {
                if right_number == 0 {
                    return Err(AsError::semantic(loc, "divide by zero"));
                }
                number /= right_number;
            }
        }
        return Ok(Node::Leaf(Value { number, symbol }));
    }

    Ok(Node::BinOp {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

/// Evaluate a parsed expression against the current assembly offset (bound
/// to the `.` pseudo-symbol). The only deferred shape a full parse ever
/// produces is a subtraction of two symbols; anything else is an internal
/// invariant violation, not a user error, because [`combine`] would already
/// have folded or rejected it.
pub fn evaluate(node: &Node, current_offset: u64, symtab: &SymbolTable) -> AsResult<Value> {
    match node {
        Node::Leaf(v) => Ok(v.clone()),
        Node::BinOp { op, left, right } => {
            let left_val = evaluate(left, current_offset, symtab)?;
            let right_val = evaluate(right, current_offset, symtab)?;

            if *op != Op::Subtract {
                panic!("unimplemented operation in deferred expression: {:?}", op);
            }
            let (left_sym, right_sym) = match (left_val.symbol, right_val.symbol) {
                (Some(l), Some(r)) => (l, r),
                _ => panic!("deferred expression can only subtract two symbols"),
            };

            let left_sym = symtab.get(left_sym);
            let right_sym = symtab.get(right_sym);
            if let (Some(ls), Some(rs)) = (left_sym.section, right_sym.section) {
                if ls != rs {
                    return Err(AsError::semantic(
                        SourceLocation::new("<expr>", 0),
                        "cannot subtract two symbols in different sections",
                    ));
                }
            }

            let left_is_dot = left_sym.name == crate::symbol::DOT_SYMBOL;
            let right_is_dot = right_sym.name == crate::symbol::DOT_SYMBOL;
            let left_offset = if left_is_dot { current_offset as i64 } else { left_sym.value as i64 };
            let right_offset = if right_is_dot { current_offset as i64 } else { right_sym.value as i64 };

            Ok(Value::number(left_offset - right_offset))
        }
    }
}

/// Evaluate an expression that must already be a single resolved constant
/// (no deferred symbol subtraction) — the common case for immediates and
/// displacements once assembly has finished and every symbol has an address.
pub fn evaluate_constant(node: &Node, current_offset: u64, symtab: &SymbolTable) -> AsResult<i64> {
    let v = evaluate(node, current_offset, symtab)?;
    Ok(v.number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::SectionId;

    fn parse(src: &str) -> (Node, SymbolTable) {
        let mut symtab = SymbolTable::new();
        let mut lexer = Lexer::new("t.s", src.as_bytes().to_vec()).unwrap();
        let node = parse_expression(&mut lexer, &mut symtab).unwrap();
        (node, symtab)
    }

    #[test]
    fn arithmetic_with_precedence_folds_to_one_leaf() {
        let (node, symtab) = parse("1 + 2 * 3\n");
        assert_eq!(evaluate_constant(&node, 0, &symtab).unwrap(), 7);
    }

    #[test]
    fn unary_minus_binds_tighter_than_multiply() {
        let (node, symtab) = parse("-2 * 3\n");
        assert_eq!(evaluate_constant(&node, 0, &symtab).unwrap(), -6);
    }

    #[test]
    fn parenthesised_expression_overrides_precedence() {
        let (node, symtab) = parse("(1 + 2) * 3\n");
        assert_eq!(evaluate_constant(&node, 0, &symtab).unwrap(), 9);
    }

    #[test]
    fn divide_by_zero_is_a_semantic_error() {
        let (node, symtab) = parse("1 / 0\n");
        assert!(evaluate_constant(&node, 0, &symtab).is_err());
    }

    #[test]
    fn symbol_plus_constant_folds_into_one_leaf_carrying_the_symbol() {
        let (node, mut symtab) = parse("foo + 4\n");
        let foo = symtab.lookup("foo").unwrap();
        symtab.define_at(foo, SectionId(1), 10);
        let value = evaluate(&node, 0, &symtab).unwrap();
        assert_eq!(value.number, 4);
        assert_eq!(value.symbol, Some(foo));
    }

    #[test]
    fn subtracting_two_symbols_in_the_same_section_resolves_to_their_distance() {
        let (node, mut symtab) = parse("b - a\n");
        let a = symtab.lookup("a").unwrap();
        let b = symtab.lookup("b").unwrap();
        symtab.define_at(a, SectionId(1), 4);
        symtab.define_at(b, SectionId(1), 20);
        let value = evaluate(&node, 0, &symtab).unwrap();
        assert_eq!(value.number, 16);
    }

    #[test]
    fn subtracting_symbols_across_sections_is_a_semantic_error() {
        let (node, mut symtab) = parse("b - a\n");
        let a = symtab.lookup("a").unwrap();
        let b = symtab.lookup("b").unwrap();
        symtab.define_at(a, SectionId(1), 4);
        symtab.define_at(b, SectionId(2), 20);
        assert!(evaluate(&node, 0, &symtab).is_err());
    }
}
