use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

// =============================================================================
// OPCODE - SECD machine instructions
// =============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Opcode {
    // loads
    Ldc,
    Ld,
    Ldf,

    // arithmetic
    Add,
    Sub,
    Mul,
    Div,

    // comparison
    Ceq,
    Cgt,
    Cgte,

    // pairs
    Atom,
    Cons,
    Car,
    Cdr,

    // ==========================================================================
    // Control flow
    // ==========================================================================
    /// Pop a condition and enter one of two blocks; both end in `JOIN`.
    Sel,
    Join,
    /// Apply the closure on top of the stack to N arguments.
    Ap,
    Rtn,
    /// Open N uninitialized recursive bindings.
    Dum,
    /// Apply like `AP`, binding the frame opened by `DUM` to the arguments.
    Rap,

    // debugging
    Brk,
    Dbug,
}

impl Opcode {
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }
}

/// A built-in primitive: a call that compiles to its own opcode instead of
/// a closure application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Builtin {
    pub name: &'static str,
    pub opcode: Opcode,
    pub arity: usize,
}

pub static BUILTINS: [Builtin; 6] = [
    Builtin {
        name: "ATOM",
        opcode: Opcode::Atom,
        arity: 1,
    },
    Builtin {
        name: "CAR",
        opcode: Opcode::Car,
        arity: 1,
    },
    Builtin {
        name: "CDR",
        opcode: Opcode::Cdr,
        arity: 1,
    },
    Builtin {
        name: "CONS",
        opcode: Opcode::Cons,
        arity: 2,
    },
    Builtin {
        name: "BRK",
        opcode: Opcode::Brk,
        arity: 0,
    },
    Builtin {
        name: "DBUG",
        opcode: Opcode::Dbug,
        arity: 1,
    },
];

/// Look up a built-in by its call name. Names are case sensitive.
pub fn builtin(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}
