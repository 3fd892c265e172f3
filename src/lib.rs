//! Code generation and linking for a small SECD machine.
//!
//! A front end hands over a [`lang::program::Program`]; [`compile`] turns
//! it into a [`Listing`] in two stages:
//!
//! 1. [`bytecode::compile::Compiler`] emits one block per function and per
//!    branch arm, with variable loads and jump targets still symbolic.
//! 2. [`bytecode::link::Linker`] resolves variables to frame addresses,
//!    inlines constants, prepends the entry sequence and patches block
//!    names into absolute offsets.

pub mod bytecode;
pub mod lang;
mod options;

pub use bytecode::compile_error::{CompileError, NotFoundError};
pub use bytecode::{LinkedBlock, Listing};
pub use options::CompileOptions;

use bytecode::{compile::Compiler, link::Linker};
use lang::program::Program;

/// Compile and link a whole program.
pub fn compile(program: &Program, options: &CompileOptions) -> Result<Listing, CompileError> {
    let program_bc = Compiler::with_options(options.clone()).compile_program(program)?;
    Linker::new(options).link(&program_bc)
}
