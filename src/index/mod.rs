// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The two global B-trees of a PFF container.
//!
//! Both the descriptor index and the offset index are stored as trees of
//! fixed 512-byte node pages. A single parametric walker handles both; the
//! page trailer states which index a node belongs to, how large its entries
//! are and at which level it sits (0 = leaf).

pub mod node;
pub mod tree;

pub use node::{BranchEntry, DescriptorIndexValue, IndexNode, NodeEntries, OffsetIndexValue};
pub use tree::{IndexTree, NodeCache};

/// Which of the two global indexes a node or tree belongs to
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IndexKind {
    /// Maps descriptor identifiers to data and local-descriptor block ids
    Descriptor,

    /// Maps block identifiers to physical file extents
    Offset,
}

impl IndexKind {
    /// The page type byte carried in the node trailer.
    #[must_use]
    pub fn page_type(self) -> u8 {
        match self {
            Self::Descriptor => 0x81,
            Self::Offset => 0x80,
        }
    }

    pub(crate) fn from_page_type(value: u8) -> Option<Self> {
        match value {
            0x81 => Some(Self::Descriptor),
            0x80 => Some(Self::Offset),
            _ => None,
        }
    }
}
