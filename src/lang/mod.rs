//! # Source Abstract Syntax Tree
//!
//! The tree a front end produces and the code generator consumes. It
//! covers function declarations, constant groups, a restricted statement
//! set and the expression grammar. A few constructs with no instruction
//! mapping (assignment, loops, non-array composites, some operators) are
//! representable only so they can be rejected with a precise error.
//!
//! ## Documentation conventions
//!
//! - `{ ... }` denotes an array literal, compiled to a CONS chain.

pub mod node;
pub mod program;
pub mod value;
