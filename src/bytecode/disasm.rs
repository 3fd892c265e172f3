use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bytecode::Command;

/// A fully linked program: the entry sequence followed by every block at
/// its absolute offset. No command carries a symbolic name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub name: String,
    pub preamble: Vec<Command>,
    pub blocks: Vec<LinkedBlock>,
}

/// A block placed at its final position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedBlock {
    pub name: String,
    pub offset: usize,
    pub commands: Vec<Command>,
}

impl Listing {
    /// Every instruction in address order.
    pub fn instructions(&self) -> impl Iterator<Item = &Command> {
        self.preamble
            .iter()
            .chain(self.blocks.iter().flat_map(|b| b.commands.iter()))
    }

    /// Total number of instructions.
    pub fn len(&self) -> usize {
        self.preamble.len() + self.blocks.iter().map(|b| b.commands.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn block(&self, name: &str) -> Option<&LinkedBlock> {
        self.blocks.iter().find(|b| b.name == name)
    }

    /// Absolute offset of the named block.
    pub fn offset_of(&self, name: &str) -> Option<usize> {
        self.block(name).map(|b| b.offset)
    }

    /// Compact binary form for handing the listing to a loader.
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

/// Renders the assembly text:
///
/// ```text
/// ; program: <name>
/// <preamble>
///
/// ; <block>
/// <instructions>
/// ```
impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; program: {}", self.name)?;
        write_commands(f, &self.preamble)?;
        for block in &self.blocks {
            writeln!(f)?;
            writeln!(f, "; {}", block.name)?;
            write_commands(f, &block.commands)?;
        }
        Ok(())
    }
}

/// One column group: comments line up after the widest instruction.
fn write_commands(f: &mut fmt::Formatter<'_>, commands: &[Command]) -> fmt::Result {
    let lines: Vec<String> = commands.iter().map(Command::to_string).collect();
    let width = lines.iter().map(String::len).max().unwrap_or(0);

    for (line, command) in lines.iter().zip(commands) {
        match &command.comment {
            Some(comment) => writeln!(f, "{:<width$} ; {}", line, comment, width = width)?,
            None => writeln!(f, "{}", line)?,
        }
    }
    Ok(())
}
