use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bytecode::compile_error::CompileError;
use crate::bytecode::frame::Address;
use crate::bytecode::op::Opcode;

/// An instruction argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    /// Integer operand: a constant, an argument count, a frame address.
    Int(i64),
    /// Literal text, emitted verbatim.
    Str(String),
    /// Symbolic reference to a variable, constant or block, awaiting
    /// resolution.
    Name(String),
    /// Absolute instruction offset of a block.
    Offset(usize),
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Int(n) => write!(f, "{}", n),
            Operand::Str(s) => write!(f, "{}", s),
            Operand::Name(s) => write!(f, "{}", s),
            Operand::Offset(n) => write!(f, "{}", n),
        }
    }
}

/// One symbolic instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub opcode: Opcode,
    pub args: Vec<Operand>,
    pub comment: Option<String>,
}

impl Command {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            args: Vec::new(),
            comment: None,
        }
    }

    pub fn with_args(opcode: Opcode, args: Vec<Operand>) -> Self {
        Self {
            opcode,
            args,
            comment: None,
        }
    }

    pub fn ldc(value: i64) -> Self {
        Self::with_args(Opcode::Ldc, vec![Operand::Int(value)])
    }

    /// `LD <name>`, resolved during linking.
    pub fn ld(name: &str) -> Self {
        Self::with_args(Opcode::Ld, vec![Operand::Name(name.to_string())])
    }

    /// `LD <depth> <index>`
    pub fn ld_addr(address: Address) -> Self {
        Self::with_args(
            Opcode::Ld,
            vec![
                Operand::Int(address.depth as i64),
                Operand::Int(address.index as i64),
            ],
        )
    }

    /// `LDF <name>`, resolved during linking.
    pub fn ldf(name: &str) -> Self {
        Self::with_args(Opcode::Ldf, vec![Operand::Name(name.to_string())])
    }

    pub fn ap(argc: usize) -> Self {
        Self::with_args(Opcode::Ap, vec![Operand::Int(argc as i64)])
    }

    pub fn sel(then_block: &str, else_block: &str) -> Self {
        Self::with_args(
            Opcode::Sel,
            vec![
                Operand::Name(then_block.to_string()),
                Operand::Name(else_block.to_string()),
            ],
        )
    }

    pub fn dum(n: usize) -> Self {
        Self::with_args(Opcode::Dum, vec![Operand::Int(n as i64)])
    }

    pub fn rap(n: usize) -> Self {
        Self::with_args(Opcode::Rap, vec![Operand::Int(n as i64)])
    }

    /// Attach a comment. An empty comment clears it.
    pub fn commented(mut self, comment: impl Into<String>) -> Self {
        let comment = comment.into();
        self.comment = (!comment.is_empty()).then_some(comment);
        self
    }

    /// Attach a comment only if the command has none yet.
    pub fn or_commented(mut self, comment: Option<&str>) -> Self {
        if self.comment.is_none() {
            self.comment = comment.map(str::to_string);
        }
        self
    }

    /// The name of a single-operand symbolic load (`LD x`, `LDF f`).
    pub fn symbol(&self) -> Option<&str> {
        match self.args.as_slice() {
            [Operand::Name(name)] => Some(name),
            _ => None,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.opcode)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Index of a block in its program's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub usize);

/// A named instruction sequence: a function body or a branch arm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub name: String,

    /// Frame slots in runtime argument order. Only top-level blocks carry
    /// slots; a branch arm runs in the frame of its `scope`.
    pub frame: Vec<String>,

    /// The top-level block whose frame this block runs in (itself for a
    /// function body).
    pub scope: BlockId,

    pub commands: Vec<Command>,

    /// Branch arms, in creation order.
    pub children: Vec<BlockId>,
}

impl Block {
    pub fn add(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Unlinked output of the code generator.
///
/// Owns every block in an arena addressed by [`BlockId`], a name table
/// over the arena, and the constant macros.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramBc {
    pub name: String,

    blocks: Vec<Block>,

    /// Block name -> arena index, for function bodies and branch arms.
    index: HashMap<String, BlockId>,

    /// Top-level blocks in declaration order.
    functions: Vec<BlockId>,

    /// Constant name -> command sequence inlined at each reference.
    consts: BTreeMap<String, Vec<Command>>,
}

impl ProgramBc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Register a top-level block with the given frame slots.
    pub fn add_function(
        &mut self,
        name: &str,
        frame: Vec<String>,
    ) -> Result<BlockId, CompileError> {
        if self.index.contains_key(name) {
            return Err(CompileError::DuplicateFunction(name.to_string()));
        }
        let id = BlockId(self.blocks.len());
        self.blocks.push(Block {
            name: name.to_string(),
            frame,
            scope: id,
            commands: Vec::new(),
            children: Vec::new(),
        });
        self.index.insert(name.to_string(), id);
        self.functions.push(id);
        Ok(id)
    }

    /// Create a branch arm under `parent`.
    ///
    /// The name is `<parent>.<parent's command count><tag>`, unique for a
    /// given tag because the count grows between two conditionals of the
    /// same block.
    pub fn child(&mut self, parent: BlockId, tag: &str) -> BlockId {
        let (name, scope) = {
            let parent = self.block(parent);
            (format!("{}.{}{}", parent.name, parent.len(), tag), parent.scope)
        };
        let id = BlockId(self.blocks.len());
        debug!(block = %name, "new branch block");
        self.blocks.push(Block {
            name: name.clone(),
            frame: Vec::new(),
            scope,
            commands: Vec::new(),
            children: Vec::new(),
        });
        self.index.insert(name, id);
        self.blocks[parent.0].children.push(id);
        id
    }

    /// Register a constant macro.
    pub fn add_const(&mut self, name: &str, commands: Vec<Command>) -> Result<(), CompileError> {
        if self.consts.contains_key(name) {
            return Err(CompileError::DuplicateConstant(name.to_string()));
        }
        self.consts.insert(name.to_string(), commands);
        Ok(())
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0]
    }

    pub fn add(&mut self, id: BlockId, command: Command) {
        self.block_mut(id).add(command);
    }

    pub fn extend(&mut self, id: BlockId, commands: impl IntoIterator<Item = Command>) {
        self.block_mut(id).commands.extend(commands);
    }

    pub fn find(&self, name: &str) -> Option<BlockId> {
        self.index.get(name).copied()
    }

    /// Top-level blocks in declaration order.
    pub fn functions(&self) -> &[BlockId] {
        &self.functions
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn consts(&self) -> &BTreeMap<String, Vec<Command>> {
        &self.consts
    }

    pub fn const_body(&self, name: &str) -> Option<&[Command]> {
        self.consts.get(name).map(Vec::as_slice)
    }
}
