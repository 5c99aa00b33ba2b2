//! Expression grammar: AST definitions and a precedence-climbing parser.
//!
//! Every binary operator other than `and`/`or`, membership, identity, the
//! ternary, and assignment lowers to a dunder-method call during
//! compilation, so the AST keeps operators symbolic and the compiler owns
//! the operator-to-method table.

use crate::{
    lex::{CodeError, SourcePos, Token, TokenKind},
    parse::{ParserState, Stat, StatKind, transform_for_to_while},
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Pos,
    Neg,
    BitNot,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    In,
    NotIn,
    Is,
    IsNot,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    // Compound-assignment operators; rewritten onto their targets by the
    // parser and dispatched through the in-place dunders.
    IAdd,
    ISub,
    IMul,
    IDiv,
    IFloorDiv,
    IMod,
    IPow,
    IAnd,
    IOr,
    IXor,
    IShl,
    IShr,
}

impl BinaryOp {
    /// The dunder method the operator lowers to, if it is method-dispatched.
    pub(crate) fn dunder(self) -> Option<&'static str> {
        Some(match self {
            Self::Add => "__add__",
            Self::Sub => "__sub__",
            Self::Mul => "__mul__",
            Self::Div => "__truediv__",
            Self::FloorDiv => "__floordiv__",
            Self::Mod => "__mod__",
            Self::Pow => "__pow__",
            Self::Eq => "__eq__",
            Self::Ne => "__ne__",
            Self::Lt => "__lt__",
            Self::Le => "__le__",
            Self::Gt => "__gt__",
            Self::Ge => "__ge__",
            Self::BitAnd => "__and__",
            Self::BitOr => "__or__",
            Self::BitXor => "__xor__",
            Self::Shl => "__lshift__",
            Self::Shr => "__rshift__",
            Self::IAdd => "__iadd__",
            Self::ISub => "__isub__",
            Self::IMul => "__imul__",
            Self::IDiv => "__itruediv__",
            Self::IFloorDiv => "__ifloordiv__",
            Self::IMod => "__imod__",
            Self::IPow => "__ipow__",
            Self::IAnd => "__iand__",
            Self::IOr => "__ior__",
            Self::IXor => "__ixor__",
            Self::IShl => "__ilshift__",
            Self::IShr => "__irshift__",
            Self::And | Self::Or | Self::In | Self::NotIn | Self::Is | Self::IsNot => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AssignTarget {
    Direct(String),
    Pack(Vec<AssignTarget>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParamKind {
    Named,
    ListArgs,
    Kwargs,
}

#[derive(Debug, Clone)]
pub(crate) struct Parameter {
    pub name: String,
    pub default: Option<Expr>,
    pub kind: ParamKind,
}

/// A function definition: `def`, lambda, or the implicit module root.
#[derive(Debug, Clone, Default)]
pub(crate) struct FnDef {
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub body: Vec<Stat>,
    /// Names declared `global` (bound to module globals).
    pub global_captures: ahash::AHashSet<String>,
    /// Free names captured from the enclosing scope as shared cells.
    pub local_captures: ahash::AHashSet<String>,
    /// Plain locals, initialised to `None` on frame entry.
    pub variables: ahash::AHashSet<String>,
}

/// A list comprehension, already lowered to a hidden list name plus the
/// statements of a desugared for-loop that fills it.
#[derive(Debug, Clone)]
pub(crate) struct ListComp {
    pub list_name: String,
    pub body: Vec<Stat>,
}

#[derive(Debug, Clone)]
pub(crate) struct Expr {
    pub kind: ExprKind,
    pub pos: SourcePos,
}

#[derive(Debug, Clone)]
pub(crate) enum ExprKind {
    Literal(Literal),
    Variable(String),
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    /// Alternating key/value expressions; `**m` appears as `UnpackMapForMap`.
    Map(Vec<Expr>),
    Set(Vec<Expr>),
    ListComp(Box<ListComp>),
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    /// `start:stop:step` inside subscription brackets; omitted bounds are
    /// `None` literals. Only ever appears as the `index` of an `Index` node.
    SliceSpec(Box<[Expr; 3]>),
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Dot {
        target: Box<Expr>,
        name: String,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    IfElse {
        condition: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    Assign {
        target: AssignTarget,
        value: Box<Expr>,
    },
    AssignIndex {
        container: Box<Expr>,
        index: Box<Expr>,
        value: Box<Expr>,
    },
    AssignAttr {
        target: Box<Expr>,
        name: String,
        value: Box<Expr>,
    },
    Function(Box<FnDef>),
    Kwarg {
        name: String,
        value: Box<Expr>,
    },
    Unpack(Box<Expr>),
    UnpackMapForMap(Box<Expr>),
    UnpackMapForCall(Box<Expr>),
}

impl Expr {
    pub(crate) fn new(kind: ExprKind, pos: SourcePos) -> Self {
        Self { kind, pos }
    }

    fn null(pos: SourcePos) -> Self {
        Self::new(ExprKind::Literal(Literal::Null), pos)
    }
}

/// Cursor over one logical statement's tokens.
pub(crate) struct TokenIter<'a> {
    tokens: &'a [Token],
    index: usize,
}

impl<'a> TokenIter<'a> {
    pub(crate) fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, index: 0 }
    }

    pub(crate) fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.index)
    }

    pub(crate) fn peek_at(&self, offset: usize) -> Option<&'a Token> {
        self.tokens.get(self.index + offset)
    }

    pub(crate) fn bump(&mut self) -> Option<&'a Token> {
        let t = self.tokens.get(self.index);
        if t.is_some() {
            self.index += 1;
        }
        t
    }

    pub(crate) fn end(&self) -> bool {
        self.index >= self.tokens.len()
    }

    pub(crate) fn save(&self) -> usize {
        self.index
    }

    pub(crate) fn restore(&mut self, index: usize) {
        self.index = index;
    }

    /// Position of the previous token, for end-of-statement diagnostics.
    pub(crate) fn prev_pos(&self) -> SourcePos {
        self.tokens
            .get(self.index.saturating_sub(1))
            .map_or_else(SourcePos::default, |t| t.pos)
    }

    pub(crate) fn err_here(&self, message: &str) -> CodeError {
        match self.peek() {
            Some(t) => CodeError::new(message, t.pos),
            None => CodeError::new(message, self.prev_pos()),
        }
    }
}

const PREC_ASSIGN: u8 = 1;
const PREC_TERNARY: u8 = 2;
const PREC_OR: u8 = 3;
const PREC_AND: u8 = 4;
const PREC_NOT: u8 = 5;
const PREC_CMP: u8 = 6;
const PREC_BITOR: u8 = 7;
const PREC_BITXOR: u8 = 8;
const PREC_BITAND: u8 = 9;
const PREC_SHIFT: u8 = 10;
const PREC_ADD: u8 = 11;
const PREC_MUL: u8 = 12;
const PREC_POW: u8 = 14;

fn binary_op_of(text: &str) -> Option<(BinaryOp, u8)> {
    Some(match text {
        "or" => (BinaryOp::Or, PREC_OR),
        "and" => (BinaryOp::And, PREC_AND),
        "==" => (BinaryOp::Eq, PREC_CMP),
        "!=" => (BinaryOp::Ne, PREC_CMP),
        "<" => (BinaryOp::Lt, PREC_CMP),
        "<=" => (BinaryOp::Le, PREC_CMP),
        ">" => (BinaryOp::Gt, PREC_CMP),
        ">=" => (BinaryOp::Ge, PREC_CMP),
        "in" => (BinaryOp::In, PREC_CMP),
        "is" => (BinaryOp::Is, PREC_CMP),
        "|" => (BinaryOp::BitOr, PREC_BITOR),
        "^" => (BinaryOp::BitXor, PREC_BITXOR),
        "&" => (BinaryOp::BitAnd, PREC_BITAND),
        "<<" => (BinaryOp::Shl, PREC_SHIFT),
        ">>" => (BinaryOp::Shr, PREC_SHIFT),
        "+" => (BinaryOp::Add, PREC_ADD),
        "-" => (BinaryOp::Sub, PREC_ADD),
        "*" => (BinaryOp::Mul, PREC_MUL),
        "/" => (BinaryOp::Div, PREC_MUL),
        "//" => (BinaryOp::FloorDiv, PREC_MUL),
        "%" => (BinaryOp::Mod, PREC_MUL),
        "**" => (BinaryOp::Pow, PREC_POW),
        _ => return None,
    })
}

fn compound_op_of(text: &str) -> Option<BinaryOp> {
    Some(match text {
        "+=" => BinaryOp::IAdd,
        "-=" => BinaryOp::ISub,
        "*=" => BinaryOp::IMul,
        "/=" => BinaryOp::IDiv,
        "//=" => BinaryOp::IFloorDiv,
        "%=" => BinaryOp::IMod,
        "**=" => BinaryOp::IPow,
        "&=" => BinaryOp::IAnd,
        "|=" => BinaryOp::IOr,
        "^=" => BinaryOp::IXor,
        "<<=" => BinaryOp::IShl,
        ">>=" => BinaryOp::IShr,
        _ => return None,
    })
}

/// Classifies an expression as a direct/pack assignment target.
///
/// Index and attribute targets are handled structurally by the caller; this
/// covers only the shapes that become `DirectAssign` instructions.
fn direct_target_of(expr: &Expr) -> Option<AssignTarget> {
    match &expr.kind {
        ExprKind::Variable(name) => Some(AssignTarget::Direct(name.clone())),
        ExprKind::Tuple(items) | ExprKind::List(items) => {
            let mut pack = Vec::with_capacity(items.len());
            for item in items {
                pack.push(direct_target_of(item)?);
            }
            Some(AssignTarget::Pack(pack))
        }
        _ => None,
    }
}

/// Rewrites `lhs op= rhs` (and `lhs++`/`lhs--`) into an assignment whose
/// value is the in-place dunder call on the original target expression.
fn build_compound_assign(
    lhs: Expr,
    op: BinaryOp,
    rhs: Expr,
    pos: SourcePos,
) -> Result<Expr, CodeError> {
    let value = |target: Expr, rhs: Expr| {
        Box::new(Expr::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(target),
                rhs: Box::new(rhs),
            },
            pos,
        ))
    };
    if let Some(target) = direct_target_of(&lhs) {
        return Ok(Expr::new(
            ExprKind::Assign {
                target,
                value: value(lhs, rhs),
            },
            pos,
        ));
    }
    match lhs.kind.clone() {
        ExprKind::Index { target, index } => Ok(Expr::new(
            ExprKind::AssignIndex {
                container: target,
                index,
                value: value(lhs, rhs),
            },
            pos,
        )),
        ExprKind::Dot { target, name } => Ok(Expr::new(
            ExprKind::AssignAttr {
                target,
                name,
                value: value(lhs, rhs),
            },
            pos,
        )),
        _ => Err(CodeError::new("Expression is not assignable", pos)),
    }
}

fn build_assign(lhs: Expr, value: Expr, pos: SourcePos) -> Result<Expr, CodeError> {
    if let Some(target) = direct_target_of(&lhs) {
        return Ok(Expr::new(
            ExprKind::Assign {
                target,
                value: Box::new(value),
            },
            pos,
        ));
    }
    match lhs.kind {
        ExprKind::Index { target, index } => Ok(Expr::new(
            ExprKind::AssignIndex {
                container: target,
                index,
                value: Box::new(value),
            },
            pos,
        )),
        ExprKind::Dot { target, name } => Ok(Expr::new(
            ExprKind::AssignAttr {
                target,
                name,
                value: Box::new(value),
            },
            pos,
        )),
        _ => Err(CodeError::new("Expression is not assignable", pos)),
    }
}

pub(crate) fn parse_expression(
    p: &mut TokenIter,
    st: &mut ParserState,
) -> Result<Expr, CodeError> {
    if p.end() {
        return Err(p.err_here("Expected an expression"));
    }
    parse_binary(p, st, 0)
}

fn parse_binary(p: &mut TokenIter, st: &mut ParserState, min_prec: u8) -> Result<Expr, CodeError> {
    let mut lhs = parse_prefix(p, st)?;

    loop {
        let Some(tok) = p.peek() else {
            return Ok(lhs);
        };
        let pos = tok.pos;
        let text = tok.text.as_str();

        // The assignment family is right-associative and lowest precedence.
        if (text == "=" || text == ":=" || compound_op_of(text).is_some()) && PREC_ASSIGN >= min_prec
        {
            let compound = compound_op_of(text);
            p.bump();
            if p.end() {
                return Err(p.err_here("Expected an expression"));
            }
            let rhs = parse_binary(p, st, PREC_ASSIGN)?;
            lhs = match compound {
                Some(op) => build_compound_assign(lhs, op, rhs, pos)?,
                None => build_assign(lhs, rhs, pos)?,
            };
            continue;
        }

        // Ternary: `value if condition else alternative`. The `if` may also
        // belong to an enclosing comprehension, so rewind when no `else`
        // follows the condition.
        if text == "if" && PREC_TERNARY >= min_prec {
            let save = p.save();
            p.bump();
            let condition = parse_binary(p, st, PREC_TERNARY + 1)?;
            if p.peek().is_none_or(|t| t.text != "else") {
                p.restore(save);
                return Ok(lhs);
            }
            p.bump();
            if p.end() {
                return Err(p.err_here("Expected an expression"));
            }
            let if_false = parse_binary(p, st, PREC_TERNARY)?;
            lhs = Expr::new(
                ExprKind::IfElse {
                    condition: Box::new(condition),
                    if_true: Box::new(lhs),
                    if_false: Box::new(if_false),
                },
                pos,
            );
            continue;
        }

        // `not in` spans two tokens.
        let (mut op, prec) = if text == "not" {
            if p.peek_at(1).is_some_and(|t| t.text == "in") {
                (BinaryOp::NotIn, PREC_CMP)
            } else {
                return Ok(lhs);
            }
        } else {
            match binary_op_of(text) {
                Some(found) => found,
                None => return Ok(lhs),
            }
        };
        if prec < min_prec {
            return Ok(lhs);
        }
        p.bump();
        if op == BinaryOp::NotIn {
            p.bump();
        }
        if op == BinaryOp::Is && p.peek().is_some_and(|t| t.text == "not") {
            op = BinaryOp::IsNot;
            p.bump();
        }
        if p.end() {
            return Err(p.err_here("Expected an expression"));
        }

        // Power is right-associative; everything else here is left.
        let next_min = if op == BinaryOp::Pow { prec } else { prec + 1 };
        let rhs = parse_binary(p, st, next_min)?;
        lhs = Expr::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            pos,
        );
    }
}

fn parse_prefix(p: &mut TokenIter, st: &mut ParserState) -> Result<Expr, CodeError> {
    let Some(tok) = p.peek() else {
        return Err(p.err_here("Expected an expression"));
    };
    let pos = tok.pos;
    let op = match tok.text.as_str() {
        "+" => Some((UnaryOp::Pos, PREC_POW)),
        "-" => Some((UnaryOp::Neg, PREC_POW)),
        "~" => Some((UnaryOp::BitNot, PREC_POW)),
        "not" => Some((UnaryOp::Not, PREC_NOT + 1)),
        _ => None,
    };
    if let Some((op, operand_prec)) = op {
        p.bump();
        if p.end() {
            return Err(p.err_here("Expected an expression"));
        }
        let operand = parse_binary(p, st, operand_prec)?;
        return Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            pos,
        ));
    }
    let mut value = parse_value(p, st)?;
    loop {
        let before = p.save();
        value = parse_postfix(p, st, value)?;
        if p.save() == before {
            return Ok(value);
        }
    }
}

fn parse_value(p: &mut TokenIter, st: &mut ParserState) -> Result<Expr, CodeError> {
    let Some(tok) = p.peek() else {
        return Err(p.err_here("Expected an expression"));
    };
    let pos = tok.pos;
    match tok.text.as_str() {
        "(" => parse_tuple(p, st),
        "[" => {
            if let Some(comp) = try_parse_list_comprehension(p, st)? {
                Ok(comp)
            } else {
                parse_list(p, st)
            }
        }
        "{" => parse_set_or_map(p, st),
        "lambda" => parse_lambda(p, st),
        _ => {
            let kind = match &tok.kind {
                TokenKind::Null => ExprKind::Literal(Literal::Null),
                TokenKind::Bool(b) => ExprKind::Literal(Literal::Bool(*b)),
                TokenKind::Int(i) => ExprKind::Literal(Literal::Int(*i)),
                TokenKind::Float(f) => ExprKind::Literal(Literal::Float(*f)),
                TokenKind::Str(s) => ExprKind::Literal(Literal::Str(s.clone())),
                TokenKind::Word => ExprKind::Variable(tok.text.clone()),
                TokenKind::Symbol | TokenKind::Keyword => {
                    return Err(p.err_here("Unexpected token"));
                }
            };
            p.bump();
            Ok(Expr::new(kind, pos))
        }
    }
}

fn parse_postfix(p: &mut TokenIter, st: &mut ParserState, arg: Expr) -> Result<Expr, CodeError> {
    let Some(tok) = p.peek() else {
        return Ok(arg);
    };
    let pos = tok.pos;
    match tok.text.as_str() {
        "++" | "--" => {
            let op = if tok.text == "++" {
                BinaryOp::IAdd
            } else {
                BinaryOp::ISub
            };
            p.bump();
            let one = Expr::new(ExprKind::Literal(Literal::Int(1)), pos);
            build_compound_assign(arg, op, one, pos)
        }
        "(" => {
            p.bump();
            let mut args = Vec::new();
            parse_expression_list(p, st, ")", &mut args, true)?;
            p.bump();
            Ok(Expr::new(
                ExprKind::Call {
                    callee: Box::new(arg),
                    args,
                },
                pos,
            ))
        }
        "[" => {
            p.bump();
            let mut bounds: [Option<Expr>; 3] = [None, None, None];
            let mut is_slice = false;
            for i in 0..3 {
                if p.end() {
                    return Err(p.err_here("Expected an expression"));
                }
                let text = p.peek().map(|t| t.text.as_str());
                if text != Some(":") && (text != Some("]") || i == 0) {
                    bounds[i] = Some(parse_expression(p, st)?);
                }
                match p.peek().map(|t| t.text.as_str()) {
                    Some("]") => {
                        p.bump();
                        break;
                    }
                    Some(":") if i < 2 => {
                        is_slice = true;
                        p.bump();
                    }
                    _ => return Err(p.err_here("Expected a ']'")),
                }
            }
            let [start, stop, step] = bounds;
            let index = if is_slice {
                let fill = |b: Option<Expr>| b.unwrap_or_else(|| Expr::null(pos));
                Expr::new(
                    ExprKind::SliceSpec(Box::new([fill(start), fill(stop), fill(step)])),
                    pos,
                )
            } else {
                start.ok_or_else(|| p.err_here("Expected an expression"))?
            };
            Ok(Expr::new(
                ExprKind::Index {
                    target: Box::new(arg),
                    index: Box::new(index),
                },
                pos,
            ))
        }
        "." => {
            p.bump();
            let Some(name_tok) = p.peek() else {
                return Err(p.err_here("Expected an attribute name"));
            };
            if name_tok.kind != TokenKind::Word {
                return Err(p.err_here("Expected an attribute name"));
            }
            let name = name_tok.text.clone();
            p.bump();
            Ok(Expr::new(
                ExprKind::Dot {
                    target: Box::new(arg),
                    name,
                },
                pos,
            ))
        }
        _ => Ok(arg),
    }
}

/// Parses a comma-separated expression list up to `terminate` (exclusive).
///
/// Handles `*iterable` unpacking, and for call argument lists also
/// `name=value` keywords and `**mapping`, enforcing that keywords follow
/// all positional arguments.
pub(crate) fn parse_expression_list(
    p: &mut TokenIter,
    st: &mut ParserState,
    terminate: &str,
    out: &mut Vec<Expr>,
    is_fn_call: bool,
) -> Result<bool, CodeError> {
    let mut must_terminate = false;
    let mut seen_kwarg = false;
    let mut seen_comma = false;
    loop {
        let Some(tok) = p.peek() else {
            return Err(p.err_here("Expected a closing bracket"));
        };
        if tok.text == terminate {
            return Ok(seen_comma);
        }
        if must_terminate {
            return Err(p.err_here("Expected a closing bracket"));
        }

        let pos = tok.pos;
        let mut unpack_map = false;
        let mut unpack = false;
        if tok.text == "*" {
            unpack = true;
            p.bump();
        } else if is_fn_call && tok.text == "**" {
            unpack_map = true;
            p.bump();
        }

        // Keyword argument: `word =` lookahead (but not `==`).
        let mut keyword = None;
        if is_fn_call && !unpack && !unpack_map {
            if let Some(t) = p.peek() {
                if t.kind == TokenKind::Word && p.peek_at(1).is_some_and(|n| n.text == "=") {
                    keyword = Some(t.text.clone());
                    p.bump();
                    p.bump();
                }
            }
        }

        if keyword.is_some() || unpack_map {
            seen_kwarg = true;
        } else if seen_kwarg {
            return Err(CodeError::new("Keyword arguments must appear last", pos));
        }

        let expr = parse_expression(p, st)?;
        let expr = if let Some(name) = keyword {
            Expr::new(
                ExprKind::Kwarg {
                    name,
                    value: Box::new(expr),
                },
                pos,
            )
        } else if unpack {
            Expr::new(ExprKind::Unpack(Box::new(expr)), pos)
        } else if unpack_map {
            Expr::new(ExprKind::UnpackMapForCall(Box::new(expr)), pos)
        } else {
            expr
        };
        out.push(expr);

        if p.peek().is_some_and(|t| t.text == ",") {
            seen_comma = true;
            p.bump();
        } else {
            must_terminate = true;
        }
    }
}

fn parse_tuple(p: &mut TokenIter, st: &mut ParserState) -> Result<Expr, CodeError> {
    let pos = p.peek().map_or_else(SourcePos::default, |t| t.pos);
    p.bump();
    let mut items = Vec::new();
    if p.end() {
        return Err(p.err_here("Expected an expression"));
    }
    let seen_comma = parse_expression_list(p, st, ")", &mut items, false)?;
    p.bump();
    if items.len() == 1 && !seen_comma {
        // Parenthesised expression, not a one-tuple.
        return Ok(items.pop().unwrap_or_else(|| Expr::null(pos)));
    }
    Ok(Expr::new(ExprKind::Tuple(items), pos))
}

fn parse_list(p: &mut TokenIter, st: &mut ParserState) -> Result<Expr, CodeError> {
    let pos = p.peek().map_or_else(SourcePos::default, |t| t.pos);
    p.bump();
    let mut items = Vec::new();
    if p.end() {
        return Err(p.err_here("Expected an expression"));
    }
    parse_expression_list(p, st, "]", &mut items, false)?;
    p.bump();
    Ok(Expr::new(ExprKind::List(items), pos))
}

fn parse_set_or_map(p: &mut TokenIter, st: &mut ParserState) -> Result<Expr, CodeError> {
    let pos = p.peek().map_or_else(SourcePos::default, |t| t.pos);
    let save = p.save();
    // Try a set first; a ':' after the first element means it is a map.
    p.bump();
    let mut items = Vec::new();
    if p.end() {
        return Err(p.err_here("Expected an expression"));
    }
    match parse_expression_list(p, st, "}", &mut items, false) {
        Ok(_) => {
            p.bump();
            if items.is_empty() {
                // `{}` is an empty dict, not an empty set.
                Ok(Expr::new(ExprKind::Map(Vec::new()), pos))
            } else {
                Ok(Expr::new(ExprKind::Set(items), pos))
            }
        }
        Err(_) => {
            p.restore(save);
            parse_map(p, st)
        }
    }
}

fn parse_map(p: &mut TokenIter, st: &mut ParserState) -> Result<Expr, CodeError> {
    let pos = p.peek().map_or_else(SourcePos::default, |t| t.pos);
    p.bump();
    let mut entries = Vec::new();
    let mut must_terminate = false;
    loop {
        let Some(tok) = p.peek() else {
            return Err(p.err_here("Expected a closing bracket"));
        };
        if tok.text == "}" {
            p.bump();
            return Ok(Expr::new(ExprKind::Map(entries), pos));
        }
        if must_terminate {
            return Err(p.err_here("Expected a closing bracket"));
        }

        if tok.text == "**" {
            let unpack_pos = tok.pos;
            p.bump();
            if p.end() {
                return Err(p.err_here("Expected a closing bracket"));
            }
            let map = parse_expression(p, st)?;
            entries.push(Expr::new(
                ExprKind::UnpackMapForMap(Box::new(map)),
                unpack_pos,
            ));
        } else {
            let key = parse_expression(p, st)?;
            entries.push(key);
            if p.peek().is_none_or(|t| t.text != ":") {
                return Err(p.err_here("Expected a ':'"));
            }
            p.bump();
            let value = parse_expression(p, st)?;
            entries.push(value);
        }

        if p.peek().is_some_and(|t| t.text == ",") {
            p.bump();
        } else {
            must_terminate = true;
        }
    }
}

/// Parses `[expr for vars in iterable if cond]`, or rewinds and reports
/// "not a comprehension" by returning `None`.
fn try_parse_list_comprehension(
    p: &mut TokenIter,
    st: &mut ParserState,
) -> Result<Option<Expr>, CodeError> {
    let save = p.save();
    let pos = p.peek().map_or_else(SourcePos::default, |t| t.pos);
    p.bump();

    let Ok(value) = parse_expression(p, st) else {
        p.restore(save);
        return Ok(None);
    };
    if p.peek().is_none_or(|t| t.text != "for") {
        p.restore(save);
        return Ok(None);
    }
    p.bump();

    let target = crate::parse::parse_for_loop_variable_list(p)?;
    p.bump(); // consume `in`

    let iterable = parse_expression(p, st)?;

    let condition = if p.peek().is_some_and(|t| t.text == "if") {
        p.bump();
        parse_expression(p, st)?
    } else {
        Expr::new(ExprKind::Literal(Literal::Bool(true)), pos)
    };

    if p.peek().is_none_or(|t| t.text != "]") {
        return Err(p.err_here("Expected a ']'"));
    }
    p.bump();

    let list_name = st.fresh_name("__ListComp");

    // <list>.append(<value>) guarded by the condition, inside the loop.
    let append_call = Expr::new(
        ExprKind::Call {
            callee: Box::new(Expr::new(
                ExprKind::Dot {
                    target: Box::new(Expr::new(ExprKind::Variable(list_name.clone()), pos)),
                    name: "append".to_string(),
                },
                pos,
            )),
            args: vec![value],
        },
        pos,
    );
    let if_stat = Stat {
        kind: StatKind::If {
            condition,
            body: vec![Stat {
                kind: StatKind::Expr(append_call),
                pos,
            }],
            else_clause: None,
        },
        pos,
    };
    let for_loop = transform_for_to_while(target, iterable, vec![if_stat], None, pos, st);

    Ok(Some(Expr::new(
        ExprKind::ListComp(Box::new(ListComp {
            list_name,
            body: for_loop,
        })),
        pos,
    )))
}

fn parse_lambda(p: &mut TokenIter, st: &mut ParserState) -> Result<Expr, CodeError> {
    let pos = p.peek().map_or_else(SourcePos::default, |t| t.pos);
    p.bump();

    let params = crate::parse::parse_parameter_list(p, st)?;
    if p.peek().is_none_or(|t| t.text != ":") {
        return Err(p.err_here("Expected a ':'"));
    }
    p.bump();
    if p.end() {
        return Err(p.err_here("Expected an expression"));
    }
    let body_expr = parse_expression(p, st)?;

    let mut captures = referenced_variables(&body_expr);
    for param in &params {
        captures.remove(&param.name);
    }

    let def = FnDef {
        name: "<lambda>".to_string(),
        parameters: params,
        body: vec![Stat {
            kind: StatKind::Return(body_expr),
            pos,
        }],
        local_captures: captures,
        ..FnDef::default()
    };
    Ok(Expr::new(ExprKind::Function(Box::new(def)), pos))
}

fn target_names(target: &AssignTarget, out: &mut ahash::AHashSet<String>) {
    match target {
        AssignTarget::Direct(name) => {
            out.insert(name.clone());
        }
        AssignTarget::Pack(items) => {
            for item in items {
                target_names(item, out);
            }
        }
    }
}

/// Every name an expression reads. Nested function bodies are not entered,
/// but their free variables count as referenced here so that captures chain
/// through intermediate scopes.
pub(crate) fn referenced_variables(expr: &Expr) -> ahash::AHashSet<String> {
    let mut out = ahash::AHashSet::new();
    collect_referenced(expr, &mut out);
    out
}

fn collect_referenced(expr: &Expr, out: &mut ahash::AHashSet<String>) {
    match &expr.kind {
        ExprKind::Variable(name) => {
            out.insert(name.clone());
        }
        ExprKind::Function(def) => {
            out.extend(def.local_captures.iter().cloned());
        }
        ExprKind::ListComp(comp) => {
            out.insert(comp.list_name.clone());
            for stat in &comp.body {
                crate::parse::collect_stat_referenced(stat, out);
            }
        }
        _ => {
            for_each_child(expr, &mut |child| collect_referenced(child, out));
        }
    }
}

/// Every name an expression writes through direct `=` assignment.
pub(crate) fn write_variables(expr: &Expr) -> ahash::AHashSet<String> {
    let mut out = ahash::AHashSet::new();
    collect_writes(expr, &mut out);
    out
}

fn collect_writes(expr: &Expr, out: &mut ahash::AHashSet<String>) {
    match &expr.kind {
        ExprKind::Assign { target, value } => {
            target_names(target, out);
            collect_writes(value, out);
        }
        ExprKind::ListComp(comp) => {
            out.insert(comp.list_name.clone());
            for stat in &comp.body {
                crate::parse::collect_stat_writes(stat, out);
            }
        }
        ExprKind::Function(_) => {}
        _ => {
            for_each_child(expr, &mut |child| collect_writes(child, out));
        }
    }
}

fn for_each_child(expr: &Expr, f: &mut impl FnMut(&Expr)) {
    match &expr.kind {
        ExprKind::Literal(_) | ExprKind::Variable(_) | ExprKind::Function(_) => {}
        ExprKind::Tuple(items)
        | ExprKind::List(items)
        | ExprKind::Map(items)
        | ExprKind::Set(items) => items.iter().for_each(f),
        ExprKind::ListComp(_) => {}
        ExprKind::Index { target, index } => {
            f(target);
            f(index);
        }
        ExprKind::SliceSpec(bounds) => bounds.iter().for_each(f),
        ExprKind::Call { callee, args } => {
            f(callee);
            args.iter().for_each(f);
        }
        ExprKind::Dot { target, .. } => f(target),
        ExprKind::Unary { operand, .. } => f(operand),
        ExprKind::Binary { lhs, rhs, .. } => {
            f(lhs);
            f(rhs);
        }
        ExprKind::IfElse {
            condition,
            if_true,
            if_false,
        } => {
            f(condition);
            f(if_true);
            f(if_false);
        }
        ExprKind::Assign { value, .. } => f(value),
        ExprKind::AssignIndex {
            container,
            index,
            value,
        } => {
            f(container);
            f(index);
            f(value);
        }
        ExprKind::AssignAttr { target, value, .. } => {
            f(target);
            f(value);
        }
        ExprKind::Kwarg { value, .. } => f(value),
        ExprKind::Unpack(inner)
        | ExprKind::UnpackMapForMap(inner)
        | ExprKind::UnpackMapForCall(inner) => f(inner),
    }
}
