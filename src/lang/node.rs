use serde::{Deserialize, Serialize};

use super::value::Literal;

/// Binary operators of the source language.
///
/// Only the arithmetic and comparison operators have an instruction
/// mapping; the rest exist so a front end can hand them over and get a
/// precise rejection instead of a silent miscompile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    // ───────────────────────────── Arithmetic ───────────────────────────
    /// `a + b`
    Add,
    /// `a - b`
    Sub,
    /// `a * b`
    Mul,
    /// `a / b`
    Div,
    /// `a % b` (no instruction)
    Rem,

    // ───────────────────────────── Comparison ───────────────────────────
    /// `a == b`
    Eq,
    /// `a != b`
    NotEq,
    /// `a < b`
    Lt,
    /// `a > b`
    Gt,
    /// `a <= b`
    LtEq,
    /// `a >= b`
    GtEq,

    // ─────────────────────────────── Logic ──────────────────────────────
    /// `a && b` (no instruction)
    And,
    /// `a || b` (no instruction)
    Or,
}

impl BinaryOp {
    /// Source spelling of the operator.
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::LtEq => "<=",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

/// Type of a composite literal `T{ ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompositeKind {
    /// Array or slice literal; compiles to a CONS chain.
    Array,
    /// Struct literal of the named type.
    Struct(String),
    /// Map literal.
    Map,
}

impl std::fmt::Display for CompositeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompositeKind::Array => write!(f, "array"),
            CompositeKind::Struct(name) => write!(f, "struct {}", name),
            CompositeKind::Map => write!(f, "map"),
        }
    }
}

/// Expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Literal value: `42`.
    Literal(Literal),

    /// Identifier reference: a parameter, a top-level function or a
    /// constant.
    Ident(String),

    /// Binary operation: `lhs op rhs`.
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    /// Call of a named function or built-in: `f(a, b)`.
    Call { func: String, args: Vec<Expr> },

    /// Composite literal: `{e0, e1, ...}`.
    Composite {
        kind: CompositeKind,
        elems: Vec<Expr>,
    },

    /// Parenthesized expression: `(e)`.
    Paren(Box<Expr>),
}

impl Expr {
    pub fn int(value: i64) -> Self {
        Expr::Literal(Literal::Int(value))
    }

    pub fn ident(name: impl Into<String>) -> Self {
        Expr::Ident(name.into())
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn call(func: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            func: func.into(),
            args,
        }
    }

    /// Array literal.
    pub fn list(elems: Vec<Expr>) -> Self {
        Expr::Composite {
            kind: CompositeKind::Array,
            elems,
        }
    }

    pub fn paren(inner: Expr) -> Self {
        Expr::Paren(Box::new(inner))
    }
}

/// Statement node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// Expression evaluated for its value, which stays on the stack.
    Expr(Expr),

    /// Two-armed conditional. A missing `else` compiles to an empty arm.
    If {
        cond: Expr,
        then: Vec<Stmt>,
        otherwise: Option<Vec<Stmt>>,
    },

    /// `return e`. Only accepted as the final statement of a function body.
    Return(Vec<Expr>),

    /// `a, b = x, y` (rejected).
    Assign {
        targets: Vec<String>,
        values: Vec<Expr>,
    },

    /// `for { ... }` (rejected).
    Loop { body: Vec<Stmt> },
}

impl Stmt {
    pub fn expr(expr: Expr) -> Self {
        Stmt::Expr(expr)
    }

    pub fn if_else(cond: Expr, then: Vec<Stmt>, otherwise: Option<Vec<Stmt>>) -> Self {
        Stmt::If {
            cond,
            then,
            otherwise,
        }
    }

    pub fn ret(value: Expr) -> Self {
        Stmt::Return(vec![value])
    }
}
