pub mod compile;
pub mod compile_error;
pub mod disasm;
pub mod frame;
pub mod ir;
pub mod link;
pub mod op;

pub use disasm::{LinkedBlock, Listing};
pub use ir::{Block, BlockId, Command, Operand, ProgramBc};
pub use op::Opcode;
