use std::fmt::Write as _;

use crate::bytecode::frame::Frame;
use crate::lang::node::{Expr, Stmt};

/// A symbol that could not be resolved, with the block where the lookup
/// happened and the frames that were searched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{symbol} not available in {block}{}", render_frames(.frames))]
pub struct NotFoundError {
    pub symbol: String,
    pub block: String,
    /// Slot names per frame, innermost first. Empty when no frame chain
    /// was involved.
    pub frames: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// A variable found neither in the frame chain nor among the constants.
    #[error("compile error: unresolved symbol: {0}")]
    UnresolvedSymbol(NotFoundError),

    /// A `LDF`/`SEL` target that names no block.
    #[error("compile error: unresolved block target: {0}")]
    UnresolvedBlockTarget(NotFoundError),

    /// A construct outside the supported grammar.
    #[error("compile error: cannot compile {construct}{}", render_hint(.hint))]
    UnsupportedConstruct {
        construct: String,
        hint: Option<String>,
    },

    /// A `return` that is not the final statement of a function body.
    #[error(
        "compile error: explicit return not supported in {block}\n  hint: a function returns the value of its last statement"
    )]
    UnsupportedReturn { block: String },

    #[error("compile error: no {entry} function")]
    MissingMain { entry: String },

    #[error("compile error: constant {0} declared twice")]
    DuplicateConstant(String),

    #[error("compile error: function {0} declared twice")]
    DuplicateFunction(String),

    /// A call to a top-level function that no frame binds.
    #[error(
        "compile error: {function} cannot be called from {block}\n  hint: the entry function is not bound in any frame; call a helper function instead"
    )]
    UnreachableFunction { function: String, block: String },

    #[error("compile error: constant {0} refers to itself")]
    CyclicConstant(String),

    #[error("compile error: {name} takes {expected} argument(s), got {got}")]
    BuiltinArity {
        name: String,
        expected: usize,
        got: usize,
    },
}

impl CompileError {
    pub fn unsupported_with_hint(construct: impl Into<String>, hint: impl Into<String>) -> Self {
        CompileError::UnsupportedConstruct {
            construct: construct.into(),
            hint: Some(hint.into()),
        }
    }

    /// Reject a statement kind that has no instruction mapping.
    pub fn unsupported_stmt(stmt: &Stmt) -> Self {
        let hint = match stmt {
            Stmt::Assign { .. } => "bind values through function parameters instead",
            Stmt::Loop { .. } => "use a recursive function instead",
            _ => "this statement is not supported by the code generator",
        };
        Self::unsupported_with_hint(stmt_kind_name(stmt), hint)
    }

    pub fn unresolved_symbol(symbol: &str, block: &str, frame: Option<&Frame<'_>>) -> Self {
        CompileError::UnresolvedSymbol(NotFoundError {
            symbol: symbol.to_string(),
            block: block.to_string(),
            frames: frame.map(Frame::dump).unwrap_or_default(),
        })
    }

    pub fn unresolved_target(target: &str, block: &str) -> Self {
        CompileError::UnresolvedBlockTarget(NotFoundError {
            symbol: target.to_string(),
            block: block.to_string(),
            frames: Vec::new(),
        })
    }

    pub fn unreachable_function(function: &str, block: &str) -> Self {
        CompileError::UnreachableFunction {
            function: function.to_string(),
            block: block.to_string(),
        }
    }

    pub fn missing_main(entry: &str) -> Self {
        CompileError::MissingMain {
            entry: entry.to_string(),
        }
    }
}

fn render_frames(frames: &[Vec<String>]) -> String {
    let mut out = String::new();
    for (depth, names) in frames.iter().enumerate() {
        let _ = write!(out, "\n  frame {}:", depth);
        if names.is_empty() {
            out.push_str(" (empty)");
        }
        for name in names {
            out.push(' ');
            out.push_str(name);
        }
    }
    out
}

fn render_hint(hint: &Option<String>) -> String {
    match hint {
        Some(h) => format!("\n  hint: {}", h),
        None => String::new(),
    }
}

/// Human-readable name of a statement kind
pub fn stmt_kind_name(stmt: &Stmt) -> &'static str {
    match stmt {
        Stmt::Expr(_) => "expression statement",
        Stmt::If { .. } => "if statement",
        Stmt::Return(_) => "return statement",
        Stmt::Assign { .. } => "assignment",
        Stmt::Loop { .. } => "loop",
    }
}

/// Human-readable name of an expression kind
pub fn expr_kind_name(expr: &Expr) -> &'static str {
    match expr {
        Expr::Literal(_) => "literal",
        Expr::Ident(_) => "identifier",
        Expr::Binary { .. } => "binary expression",
        Expr::Call { .. } => "call",
        Expr::Composite { .. } => "composite literal",
        Expr::Paren(_) => "parenthesized expression",
    }
}
