// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The per-descriptor secondary B-tree carrying sub-streams.
//!
//! A descriptor with a non-zero `local_descriptors_identifier` owns a small
//! tree of nodes, stored as internal blocks, that maps numeric
//! sub-descriptor identifiers to `(data, local descriptors)` block pairs.
//! Attachments and oversized table values live behind it.

use crate::{context::PffFile, source::ByteSource, variant::Variant, Error};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Signature byte of a local descriptor node
pub const LOCAL_DESCRIPTOR_NODE_SIGNATURE: u8 = 0x02;

/// A leaf value of a local descriptors tree
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LocalDescriptorValue {
    /// The sub-descriptor identifier
    pub identifier: u64,

    /// Block identifier of the sub-descriptor's payload
    pub data_identifier: u64,

    /// Block identifier of a nested local descriptors tree, or 0
    pub local_descriptors_identifier: u64,
}

/// A branch entry pointing at a sub-node
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LocalDescriptorBranch {
    /// First identifier reachable under the sub-node
    pub identifier: u64,

    /// Block identifier of the sub-node
    pub sub_node_identifier: u64,
}

/// The typed entries of one local descriptor node
#[derive(Clone, Debug)]
pub enum LocalNodeEntries {
    /// Leaf values
    Leaf(Vec<LocalDescriptorValue>),

    /// Branch entries
    Branch(Vec<LocalDescriptorBranch>),
}

/// A parsed local descriptor node
#[derive(Clone, Debug)]
pub struct LocalDescriptorNode {
    /// Level of the node; 0 is a leaf
    pub level: u8,

    /// The entries, identifiers strictly ascending
    pub entries: LocalNodeEntries,
}

impl LocalDescriptorNode {
    /// Parses a node from the payload of its backing block.
    pub fn from_bytes(data: &[u8], variant: Variant) -> crate::Result<Self> {
        let mut reader = Cursor::new(data);

        let signature = reader.read_u8()?;
        if signature != LOCAL_DESCRIPTOR_NODE_SIGNATURE {
            return Err(Error::InvalidSignature {
                structure: "local descriptor node",
            });
        }

        let level = reader.read_u8()?;
        let entry_count = reader.read_u16::<LittleEndian>()?;

        if variant == Variant::Bit64 {
            let _padding = reader.read_u32::<LittleEndian>()?;
        }

        let entries = if level == 0 {
            let mut values = Vec::with_capacity(usize::from(entry_count));

            for _ in 0..entry_count {
                values.push(LocalDescriptorValue {
                    identifier: variant.read_pointer(&mut reader)?,
                    data_identifier: variant.read_pointer(&mut reader)?,
                    local_descriptors_identifier: variant.read_pointer(&mut reader)?,
                });
            }

            LocalNodeEntries::Leaf(values)
        } else {
            let mut values = Vec::with_capacity(usize::from(entry_count));

            for _ in 0..entry_count {
                values.push(LocalDescriptorBranch {
                    identifier: variant.read_pointer(&mut reader)?,
                    sub_node_identifier: variant.read_pointer(&mut reader)?,
                });
            }

            LocalNodeEntries::Branch(values)
        };

        let keys: Vec<u64> = match &entries {
            LocalNodeEntries::Leaf(v) => v.iter().map(|e| e.identifier).collect(),
            LocalNodeEntries::Branch(v) => v.iter().map(|e| e.identifier).collect(),
        };
        if keys.windows(2).any(|pair| {
            let (Some(a), Some(b)) = (pair.first(), pair.get(1)) else {
                return false;
            };
            a >= b
        }) {
            return Err(Error::CorruptInput("local descriptor node key ordering"));
        }

        Ok(Self { level, entries })
    }
}

/// Lookup over one descriptor's local descriptors tree
///
/// Holds only the root block identifier; nodes are materialized through the
/// IO context's node cache on demand.
#[derive(Clone, Debug)]
pub struct LocalDescriptorsTree {
    root_identifier: u64,
    recovered: bool,
}

impl LocalDescriptorsTree {
    pub(crate) fn new(root_identifier: u64, recovered: bool) -> Self {
        Self {
            root_identifier,
            recovered,
        }
    }

    /// Resolves a numeric sub-descriptor identifier; `None` if absent.
    pub fn lookup<S: ByteSource>(
        &self,
        file: &mut PffFile<S>,
        identifier: u64,
    ) -> crate::Result<Option<LocalDescriptorValue>> {
        let mut node_identifier = self.root_identifier;

        for _ in 0..64 {
            let node = file.local_descriptor_node(node_identifier, self.recovered)?;

            match &node.entries {
                LocalNodeEntries::Leaf(values) => {
                    return Ok(values
                        .iter()
                        .find(|value| value.identifier == identifier)
                        .copied());
                }
                LocalNodeEntries::Branch(entries) => {
                    let child = entries
                        .iter()
                        .take_while(|entry| entry.identifier <= identifier)
                        .last();

                    let Some(child) = child else {
                        return Ok(None);
                    };

                    node_identifier = child.sub_node_identifier;
                }
            }
        }

        Err(Error::CorruptInput("local descriptors tree recursion depth"))
    }

    /// Collects every leaf value, in identifier order.
    pub fn leaves<S: ByteSource>(
        &self,
        file: &mut PffFile<S>,
    ) -> crate::Result<Vec<LocalDescriptorValue>> {
        let mut result = Vec::new();
        self.collect_leaves(file, self.root_identifier, 0, &mut result)?;
        Ok(result)
    }

    fn collect_leaves<S: ByteSource>(
        &self,
        file: &mut PffFile<S>,
        node_identifier: u64,
        depth: usize,
        result: &mut Vec<LocalDescriptorValue>,
    ) -> crate::Result<()> {
        if depth > 64 {
            return Err(Error::CorruptInput("local descriptors tree recursion depth"));
        }

        let node = file.local_descriptor_node(node_identifier, self.recovered)?;

        match &node.entries {
            LocalNodeEntries::Leaf(values) => result.extend_from_slice(values),
            LocalNodeEntries::Branch(entries) => {
                for entry in entries {
                    self.collect_leaves(file, entry.sub_node_identifier, depth + 1, result)?;
                }
            }
        }

        Ok(())
    }
}
