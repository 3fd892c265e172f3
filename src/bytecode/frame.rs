use serde::{Deserialize, Serialize};

/// Location of a variable: how many frames up, and which slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub depth: usize,
    pub index: usize,
}

/// One lexical scope level: ordered slots plus the enclosing level.
///
/// Frames borrow their slots from the blocks they describe and are chained
/// on the stack while a block is being linked.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    slots: &'a [String],
    parent: Option<&'a Frame<'a>>,
}

impl<'a> Frame<'a> {
    pub fn root(slots: &'a [String]) -> Self {
        Self {
            slots,
            parent: None,
        }
    }

    /// A new innermost frame whose parent is `self`.
    pub fn child(&'a self, slots: &'a [String]) -> Frame<'a> {
        Frame {
            slots,
            parent: Some(self),
        }
    }

    pub fn slots(&self) -> &'a [String] {
        self.slots
    }

    /// This frame followed by each enclosing frame.
    pub fn chain(&self) -> impl Iterator<Item = &Frame<'a>> {
        std::iter::successors(Some(self), |frame| frame.parent)
    }

    /// Find `name`, nearest frame first.
    pub fn find(&self, name: &str) -> Option<Address> {
        self.chain().enumerate().find_map(|(depth, frame)| {
            frame
                .slots
                .iter()
                .position(|slot| slot == name)
                .map(|index| Address { depth, index })
        })
    }

    /// Slot names of every frame in the chain, for error reports.
    pub fn dump(&self) -> Vec<Vec<String>> {
        self.chain().map(|frame| frame.slots.to_vec()).collect()
    }
}
