use serde::{Deserialize, Serialize};

use super::node::{Expr, Stmt};

/// A parsed compilation unit, handed over by a front end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Program name, printed in the listing header.
    pub name: String,
    /// Top-level declarations in source order.
    pub decls: Vec<Decl>,
}

/// Top-level declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decl {
    Function(FunctionDecl),
    Const(ConstGroup),
}

/// `func name(params...) { body }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    /// Formal parameters in declaration order; this is the runtime
    /// argument order.
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

/// `const ( a = ...; b = ... )`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstGroup {
    pub names: Vec<String>,
    pub values: ConstValues,
}

/// Initializers of a constant group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstValues {
    /// The group counts up from zero: each name gets its ordinal position.
    AutoIncrement,
    /// One initializer expression per name.
    Exprs(Vec<Expr>),
}

impl Program {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            decls: Vec::new(),
        }
    }

    /// Append a function declaration.
    pub fn function(mut self, name: &str, params: &[&str], body: Vec<Stmt>) -> Self {
        self.decls.push(Decl::Function(FunctionDecl {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            body,
        }));
        self
    }

    /// Append a constant group.
    pub fn constants(mut self, names: &[&str], values: ConstValues) -> Self {
        self.decls.push(Decl::Const(ConstGroup {
            names: names.iter().map(|n| n.to_string()).collect(),
            values,
        }));
        self
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionDecl> {
        self.decls.iter().filter_map(|decl| match decl {
            Decl::Function(func) => Some(func),
            Decl::Const(_) => None,
        })
    }
}
