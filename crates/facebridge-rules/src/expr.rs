//! Rule expressions
//!
//! A deliberately small language: numeric literals, identifiers, arithmetic,
//! comparisons, short-circuit logic, a ternary, and a fixed function table.
//! Comparisons and logic produce 1.0 / 0.0; any non-zero value is truthy.
//!
//! Expressions are parsed once when a rule file is loaded. Evaluation reads
//! identifiers through a lookup closure so the engine can grow the binding
//! set between passes without re-parsing.

use std::fmt;

use thiserror::Error;

use crate::ExprError;

/// Maximum nesting depth accepted by the parser
pub const MAX_DEPTH: usize = 64;

/// Maximum number of tokens in one expression. Bounds the height of
/// operator chains, which evaluation and drop walk recursively.
pub const MAX_TOKENS: usize = 1024;

/// Evaluation failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// Identifier is not (yet) bound
    #[error("Unresolved identifier '{0}'")]
    Unresolved(String),

    /// Result is NaN or infinite
    #[error("Expression produced a non-finite value")]
    NonFinite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Arity {
    Exact(usize),
    AtLeast(usize),
}

/// Built-in functions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Func {
    Abs,
    Min,
    Max,
    Clamp,
    Sqrt,
    Pow,
    Exp,
    Log,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Floor,
    Ceil,
    Round,
    Sign,
    Lerp,
    If,
}

impl Func {
    /// Case-insensitive lookup
    pub fn lookup(name: &str) -> Option<Func> {
        let f = match name.to_ascii_lowercase().as_str() {
            "abs" => Func::Abs,
            "min" => Func::Min,
            "max" => Func::Max,
            "clamp" => Func::Clamp,
            "sqrt" => Func::Sqrt,
            "pow" => Func::Pow,
            "exp" => Func::Exp,
            "log" => Func::Log,
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "asin" => Func::Asin,
            "acos" => Func::Acos,
            "atan" => Func::Atan,
            "atan2" => Func::Atan2,
            "floor" => Func::Floor,
            "ceil" | "ceiling" => Func::Ceil,
            "round" => Func::Round,
            "sign" => Func::Sign,
            "lerp" => Func::Lerp,
            "if" => Func::If,
            _ => return None,
        };
        Some(f)
    }

    pub fn name(self) -> &'static str {
        match self {
            Func::Abs => "abs",
            Func::Min => "min",
            Func::Max => "max",
            Func::Clamp => "clamp",
            Func::Sqrt => "sqrt",
            Func::Pow => "pow",
            Func::Exp => "exp",
            Func::Log => "log",
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Tan => "tan",
            Func::Asin => "asin",
            Func::Acos => "acos",
            Func::Atan => "atan",
            Func::Atan2 => "atan2",
            Func::Floor => "floor",
            Func::Ceil => "ceil",
            Func::Round => "round",
            Func::Sign => "sign",
            Func::Lerp => "lerp",
            Func::If => "if",
        }
    }

    fn arity(self) -> Arity {
        match self {
            Func::Min | Func::Max => Arity::AtLeast(2),
            Func::Pow | Func::Atan2 => Arity::Exact(2),
            Func::Clamp | Func::Lerp | Func::If => Arity::Exact(3),
            _ => Arity::Exact(1),
        }
    }

    fn check_arity(self, actual: usize) -> Result<(), ExprError> {
        let (ok, expected) = match self.arity() {
            Arity::Exact(n) => (actual == n, n),
            Arity::AtLeast(n) => (actual >= n, n),
        };
        if ok {
            Ok(())
        } else {
            Err(ExprError::Arity {
                name: self.name().to_string(),
                expected,
                actual,
            })
        }
    }

    fn apply(self, args: &[f64]) -> f64 {
        match self {
            Func::Abs => args[0].abs(),
            Func::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Func::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            // f64::clamp panics on inverted bounds
            Func::Clamp => args[0].max(args[1]).min(args[2]),
            Func::Sqrt => args[0].sqrt(),
            Func::Pow => args[0].powf(args[1]),
            Func::Exp => args[0].exp(),
            Func::Log => args[0].ln(),
            Func::Sin => args[0].sin(),
            Func::Cos => args[0].cos(),
            Func::Tan => args[0].tan(),
            Func::Asin => args[0].asin(),
            Func::Acos => args[0].acos(),
            Func::Atan => args[0].atan(),
            Func::Atan2 => args[0].atan2(args[1]),
            Func::Floor => args[0].floor(),
            Func::Ceil => args[0].ceil(),
            Func::Round => args[0].round(),
            Func::Sign => {
                if args[0] > 0.0 {
                    1.0
                } else if args[0] < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
            Func::Lerp => args[0] + (args[1] - args[0]) * args[2],
            // Handled lazily in eval_node
            Func::If => {
                if truthy(args[0]) {
                    args[1]
                } else {
                    args[2]
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Node {
    Number(f64),
    Ident(String),
    Unary(UnaryOp, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Ternary(Box<Node>, Box<Node>, Box<Node>),
    Call(Func, Vec<Node>),
}

/// A parsed expression
#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    source: String,
    root: Node,
    identifiers: Vec<String>,
}

impl Expr {
    /// Parse an expression
    pub fn parse(source: &str) -> Result<Expr, ExprError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ExprError::Empty);
        }

        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let root = parser.parse_expr()?;
        if let Some(extra) = parser.tokens.get(parser.pos) {
            return Err(ExprError::UnexpectedToken {
                found: extra.token.to_string(),
                pos: extra.pos,
            });
        }

        let mut identifiers = Vec::new();
        collect_identifiers(&root, &mut identifiers);

        Ok(Expr {
            source: source.to_string(),
            root,
            identifiers,
        })
    }

    /// Original source text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Distinct identifiers in order of first appearance
    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    /// Evaluate against a binding lookup
    pub fn eval<F>(&self, lookup: F) -> Result<f64, EvalError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let value = eval_node(&self.root, &lookup)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(EvalError::NonFinite)
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[inline]
fn truthy(v: f64) -> bool {
    v != 0.0 && !v.is_nan()
}

#[inline]
fn bool_value(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn eval_node<F>(node: &Node, lookup: &F) -> Result<f64, EvalError>
where
    F: Fn(&str) -> Option<f64>,
{
    match node {
        Node::Number(n) => Ok(*n),
        Node::Ident(name) => lookup(name).ok_or_else(|| EvalError::Unresolved(name.clone())),
        Node::Unary(op, operand) => {
            let v = eval_node(operand, lookup)?;
            Ok(match op {
                UnaryOp::Neg => -v,
                UnaryOp::Plus => v,
                UnaryOp::Not => bool_value(!truthy(v)),
            })
        }
        Node::Binary(BinaryOp::And, lhs, rhs) => {
            if !truthy(eval_node(lhs, lookup)?) {
                return Ok(0.0);
            }
            Ok(bool_value(truthy(eval_node(rhs, lookup)?)))
        }
        Node::Binary(BinaryOp::Or, lhs, rhs) => {
            if truthy(eval_node(lhs, lookup)?) {
                return Ok(1.0);
            }
            Ok(bool_value(truthy(eval_node(rhs, lookup)?)))
        }
        Node::Binary(op, lhs, rhs) => {
            let a = eval_node(lhs, lookup)?;
            let b = eval_node(rhs, lookup)?;
            Ok(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Rem => a % b,
                BinaryOp::Lt => bool_value(a < b),
                BinaryOp::Le => bool_value(a <= b),
                BinaryOp::Gt => bool_value(a > b),
                BinaryOp::Ge => bool_value(a >= b),
                BinaryOp::Eq => bool_value(a == b),
                BinaryOp::Ne => bool_value(a != b),
                BinaryOp::And | BinaryOp::Or => unreachable!("short-circuit ops handled above"),
            })
        }
        Node::Ternary(cond, then, otherwise) => {
            if truthy(eval_node(cond, lookup)?) {
                eval_node(then, lookup)
            } else {
                eval_node(otherwise, lookup)
            }
        }
        Node::Call(Func::If, args) => {
            if truthy(eval_node(&args[0], lookup)?) {
                eval_node(&args[1], lookup)
            } else {
                eval_node(&args[2], lookup)
            }
        }
        Node::Call(func, args) => {
            let values = args
                .iter()
                .map(|a| eval_node(a, lookup))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(func.apply(&values))
        }
    }
}

fn collect_identifiers(node: &Node, out: &mut Vec<String>) {
    match node {
        Node::Number(_) => {}
        Node::Ident(name) => {
            if !out.iter().any(|n| n == name) {
                out.push(name.clone());
            }
        }
        Node::Unary(_, operand) => collect_identifiers(operand, out),
        Node::Binary(_, lhs, rhs) => {
            collect_identifiers(lhs, out);
            collect_identifiers(rhs, out);
        }
        Node::Ternary(a, b, c) => {
            collect_identifiers(a, out);
            collect_identifiers(b, out);
            collect_identifiers(c, out);
        }
        Node::Call(_, args) => {
            for arg in args {
                collect_identifiers(arg, out);
            }
        }
    }
}

// ============================================================================
// LEXER
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
    Question,
    Colon,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {}", n),
            Token::Ident(s) => write!(f, "identifier '{}'", s),
            Token::Op(op) => write!(f, "'{}'", op),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::Comma => f.write_str("','"),
            Token::Question => f.write_str("'?'"),
            Token::Colon => f.write_str("':'"),
        }
    }
}

#[derive(Clone, Debug)]
struct Lexed {
    token: Token,
    pos: usize,
}

const TWO_CHAR_OPS: &[&str] = &["<=", ">=", "==", "!=", "&&", "||"];
const ONE_CHAR_OPS: &[&str] = &["+", "-", "*", "/", "%", "<", ">", "!"];

fn tokenize(src: &str) -> Result<Vec<Lexed>, ExprError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if tokens.len() >= MAX_TOKENS {
            return Err(ExprError::TooLong(MAX_TOKENS));
        }
        let c = bytes[i] as char;

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let start = i;

        if c.is_ascii_digit() || (c == '.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                let mut j = i + 1;
                if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                    j += 1;
                }
                if j < bytes.len() && bytes[j].is_ascii_digit() {
                    while j < bytes.len() && bytes[j].is_ascii_digit() {
                        j += 1;
                    }
                    i = j;
                }
            }
            let text = &src[start..i];
            let value: f64 = text
                .parse()
                .map_err(|_| ExprError::InvalidNumber(text.to_string()))?;
            tokens.push(Lexed {
                token: Token::Number(value),
                pos: start,
            });
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'.')
            {
                i += 1;
            }
            tokens.push(Lexed {
                token: Token::Ident(src[start..i].to_string()),
                pos: start,
            });
            continue;
        }

        let simple = match c {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ',' => Some(Token::Comma),
            '?' => Some(Token::Question),
            ':' => Some(Token::Colon),
            _ => None,
        };
        if let Some(token) = simple {
            tokens.push(Lexed { token, pos: start });
            i += 1;
            continue;
        }

        if let Some(op) = TWO_CHAR_OPS
            .iter()
            .find(|op| src.get(i..i + 2) == Some(**op))
        {
            tokens.push(Lexed {
                token: Token::Op(op),
                pos: start,
            });
            i += 2;
            continue;
        }

        if let Some(op) = ONE_CHAR_OPS
            .iter()
            .find(|op| src.get(i..i + 1) == Some(**op))
        {
            tokens.push(Lexed {
                token: Token::Op(op),
                pos: start,
            });
            i += 1;
            continue;
        }

        let ch = src[i..].chars().next().unwrap_or(c);
        return Err(ExprError::UnexpectedChar { ch, pos: start });
    }

    Ok(tokens)
}

// ============================================================================
// PARSER
// ============================================================================

/// Binary operator table, loosest binding first
const LEVELS: &[&[(&str, BinaryOp)]] = &[
    &[("||", BinaryOp::Or)],
    &[("&&", BinaryOp::And)],
    &[("==", BinaryOp::Eq), ("!=", BinaryOp::Ne)],
    &[
        ("<", BinaryOp::Lt),
        ("<=", BinaryOp::Le),
        (">", BinaryOp::Gt),
        (">=", BinaryOp::Ge),
    ],
    &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
    &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
];

struct Parser {
    tokens: Vec<Lexed>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|l| &l.token)
    }

    fn next(&mut self) -> Option<Lexed> {
        let lexed = self.tokens.get(self.pos).cloned();
        if lexed.is_some() {
            self.pos += 1;
        }
        lexed
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExprError> {
        match self.next() {
            Some(l) if l.token == expected => Ok(()),
            Some(l) => Err(ExprError::UnexpectedToken {
                found: l.token.to_string(),
                pos: l.pos,
            }),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::TooDeep(MAX_DEPTH));
        }
        Ok(())
    }

    fn parse_expr(&mut self) -> Result<Node, ExprError> {
        self.enter()?;
        let node = self.parse_ternary();
        self.depth -= 1;
        node
    }

    fn parse_ternary(&mut self) -> Result<Node, ExprError> {
        let cond = self.parse_level(0)?;
        if self.peek() != Some(&Token::Question) {
            return Ok(cond);
        }
        self.pos += 1;
        let then = self.parse_expr()?;
        self.expect(Token::Colon)?;
        let otherwise = self.parse_expr()?;
        Ok(Node::Ternary(
            Box::new(cond),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    fn peek_binary(&self, level: usize) -> Option<BinaryOp> {
        match self.peek() {
            Some(Token::Op(sym)) => LEVELS[level]
                .iter()
                .find(|(s, _)| s == sym)
                .map(|(_, op)| *op),
            _ => None,
        }
    }

    fn parse_level(&mut self, level: usize) -> Result<Node, ExprError> {
        if level == LEVELS.len() {
            return self.parse_unary();
        }
        let mut lhs = self.parse_level(level + 1)?;
        while let Some(op) = self.peek_binary(level) {
            self.pos += 1;
            let rhs = self.parse_level(level + 1)?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Node, ExprError> {
        let op = match self.peek() {
            Some(Token::Op("-")) => Some(UnaryOp::Neg),
            Some(Token::Op("+")) => Some(UnaryOp::Plus),
            Some(Token::Op("!")) => Some(UnaryOp::Not),
            _ => None,
        };
        let Some(op) = op else {
            return self.parse_primary();
        };

        self.pos += 1;
        self.enter()?;
        let operand = self.parse_unary();
        self.depth -= 1;
        Ok(Node::Unary(op, Box::new(operand?)))
    }

    fn parse_primary(&mut self) -> Result<Node, ExprError> {
        let Some(lexed) = self.next() else {
            return Err(ExprError::UnexpectedEnd);
        };

        match lexed.token {
            Token::Number(n) => Ok(Node::Number(n)),
            Token::Ident(name) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    self.parse_call(name)
                } else {
                    Ok(Node::Ident(name))
                }
            }
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            other => Err(ExprError::UnexpectedToken {
                found: other.to_string(),
                pos: lexed.pos,
            }),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Node, ExprError> {
        let func = Func::lookup(&name).ok_or_else(|| ExprError::UnknownFunction(name.clone()))?;

        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
        } else {
            loop {
                args.push(self.parse_expr()?);
                match self.next() {
                    Some(Lexed {
                        token: Token::Comma,
                        ..
                    }) => continue,
                    Some(Lexed {
                        token: Token::RParen,
                        ..
                    }) => break,
                    Some(l) => {
                        return Err(ExprError::UnexpectedToken {
                            found: l.token.to_string(),
                            pos: l.pos,
                        })
                    }
                    None => return Err(ExprError::UnexpectedEnd),
                }
            }
        }

        func.check_arity(args.len())?;
        Ok(Node::Call(func, args))
    }
}
