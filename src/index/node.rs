// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::IndexKind;
use crate::{
    checksum::WeakCrc32,
    variant::{Variant, INDEX_NODE_SIZE},
    Error,
};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// A leaf value of the descriptor index
///
/// Names one logical object in the file. Its payload lives at
/// `data_identifier` in the offset index; `local_descriptors_identifier`
/// (zero if absent) points at the root of its per-descriptor sub-tree.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DescriptorIndexValue {
    /// The 32-bit descriptor identifier
    pub identifier: u32,

    /// Block identifier of the descriptor's payload
    pub data_identifier: u64,

    /// Block identifier of the local descriptors tree, or 0
    pub local_descriptors_identifier: u64,

    /// Identifier of the parent descriptor
    pub parent_identifier: u32,
}

/// A leaf value of the offset index
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OffsetIndexValue {
    /// The block identifier, including its flag bits
    pub identifier: u64,

    /// Physical file offset of the block
    pub file_offset: u64,

    /// Number of user bytes stored in the block
    pub data_size: u32,

    /// Reference count of the block
    pub reference_count: u16,
}

/// An entry of a non-leaf index node
///
/// Carries the *first* key reachable under the child node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BranchEntry {
    /// First key of the child
    pub key: u64,

    /// Identifier (expected back-pointer) of the child node
    pub block_id: u64,

    /// Physical file offset of the child node
    pub file_offset: u64,
}

/// The typed entries of one index node
#[derive(Clone, Debug)]
pub enum NodeEntries {
    /// Non-leaf entries
    Branch(Vec<BranchEntry>),

    /// Descriptor index leaf entries
    Descriptor(Vec<DescriptorIndexValue>),

    /// Offset index leaf entries
    Offset(Vec<OffsetIndexValue>),
}

impl NodeEntries {
    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Branch(v) => v.len(),
            Self::Descriptor(v) => v.len(),
            Self::Offset(v) => v.len(),
        }
    }

    /// Whether there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A parsed 512-byte index node page
#[derive(Clone, Debug)]
pub struct IndexNode {
    /// Which index the node belongs to
    pub kind: IndexKind,

    /// Level of the node; 0 is a leaf
    pub level: u8,

    /// Identifier of the node, stored as its trailer back-pointer
    pub back_pointer: u64,

    /// The live entries, keys strictly ascending
    pub entries: NodeEntries,

    /// Tombstone entries: slots past the live entry count whose bytes are
    /// still intact. Only populated for leaf nodes; used by recovery.
    pub deleted_entries: NodeEntries,
}

fn read_descriptor_value(
    reader: &mut Cursor<&[u8]>,
    variant: Variant,
) -> crate::Result<DescriptorIndexValue> {
    Ok(match variant {
        Variant::Bit32 => DescriptorIndexValue {
            identifier: reader.read_u32::<LittleEndian>()?,
            data_identifier: u64::from(reader.read_u32::<LittleEndian>()?),
            local_descriptors_identifier: u64::from(reader.read_u32::<LittleEndian>()?),
            parent_identifier: reader.read_u32::<LittleEndian>()?,
        },
        Variant::Bit64 => {
            // the identifier is stored as 64-bit but the upper half is unused
            let identifier = reader.read_u64::<LittleEndian>()? as u32;
            let data_identifier = reader.read_u64::<LittleEndian>()?;
            let local_descriptors_identifier = reader.read_u64::<LittleEndian>()?;
            let parent_identifier = reader.read_u32::<LittleEndian>()?;
            let _padding = reader.read_u32::<LittleEndian>()?;

            DescriptorIndexValue {
                identifier,
                data_identifier,
                local_descriptors_identifier,
                parent_identifier,
            }
        }
    })
}

fn read_offset_value(
    reader: &mut Cursor<&[u8]>,
    variant: Variant,
) -> crate::Result<OffsetIndexValue> {
    let identifier = variant.read_pointer(reader)?;
    let file_offset = variant.read_pointer(reader)?;
    let data_size = u32::from(reader.read_u16::<LittleEndian>()?);
    let reference_count = reader.read_u16::<LittleEndian>()?;

    if variant == Variant::Bit64 {
        let _padding = reader.read_u32::<LittleEndian>()?;
    }

    Ok(OffsetIndexValue {
        identifier,
        file_offset,
        data_size,
        reference_count,
    })
}

fn read_branch_entry(reader: &mut Cursor<&[u8]>, variant: Variant) -> crate::Result<BranchEntry> {
    Ok(BranchEntry {
        key: variant.read_pointer(reader)?,
        block_id: variant.read_pointer(reader)?,
        file_offset: variant.read_pointer(reader)?,
    })
}

struct Trailer {
    entry_count: usize,
    max_entry_count: usize,
    entry_size: usize,
    level: u8,
    kind: IndexKind,
    back_pointer: u64,
}

fn read_trailer(data: &[u8], variant: Variant) -> crate::Result<Trailer> {
    let counts_offset = variant.index_entry_area_size();
    let mut reader = Cursor::new(
        data.get(counts_offset..)
            .ok_or(Error::CorruptInput("index node too short"))?,
    );

    let entry_count = usize::from(reader.read_u8()?);
    let max_entry_count = usize::from(reader.read_u8()?);
    let entry_size = usize::from(reader.read_u8()?);
    let level = reader.read_u8()?;

    if variant == Variant::Bit64 {
        let _padding = reader.read_u32::<LittleEndian>()?;
    }

    let page_type = reader.read_u8()?;
    let page_type_copy = reader.read_u8()?;
    let _signature = reader.read_u16::<LittleEndian>()?;

    let (stored_crc, back_pointer) = match variant {
        Variant::Bit32 => {
            let back_pointer = u64::from(reader.read_u32::<LittleEndian>()?);
            let crc = reader.read_u32::<LittleEndian>()?;
            (crc, back_pointer)
        }
        Variant::Bit64 => {
            let crc = reader.read_u32::<LittleEndian>()?;
            let back_pointer = reader.read_u64::<LittleEndian>()?;
            (crc, back_pointer)
        }
    };

    if page_type != page_type_copy {
        return Err(Error::InvalidSignature {
            structure: "index node type copy",
        });
    }

    let kind = IndexKind::from_page_type(page_type).ok_or(Error::InvalidSignature {
        structure: "index node type",
    })?;

    let crc_span = data
        .get(..variant.index_crc_span())
        .ok_or(Error::CorruptInput("index node too short"))?;
    WeakCrc32::from_bytes(crc_span).check(WeakCrc32::from_raw(stored_crc))?;

    Ok(Trailer {
        entry_count,
        max_entry_count,
        entry_size,
        level,
        kind,
        back_pointer,
    })
}

impl IndexNode {
    /// Whether this node is a leaf.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.level == 0
    }

    /// Parses a 512-byte index node page.
    pub fn from_bytes(data: &[u8], variant: Variant) -> crate::Result<Self> {
        if data.len() != INDEX_NODE_SIZE {
            return Err(Error::SizeMismatch(
                INDEX_NODE_SIZE as u64,
                data.len() as u64,
            ));
        }

        let trailer = read_trailer(data, variant)?;

        let expected_entry_size = if trailer.level > 0 {
            variant.index_branch_entry_size()
        } else {
            match trailer.kind {
                IndexKind::Descriptor => variant.descriptor_leaf_entry_size(),
                IndexKind::Offset => variant.offset_leaf_entry_size(),
            }
        };

        if trailer.entry_size != expected_entry_size {
            return Err(Error::CorruptInput("index node entry size"));
        }
        if trailer.entry_count > trailer.max_entry_count
            || trailer.max_entry_count * trailer.entry_size > variant.index_entry_area_size()
        {
            return Err(Error::CorruptInput("index node entry count"));
        }

        let parse_range = |first: usize, count: usize| -> crate::Result<NodeEntries> {
            let start = first * trailer.entry_size;
            let end = start + count * trailer.entry_size;
            let bytes = data
                .get(start..end)
                .ok_or(Error::CorruptInput("index node entries out of range"))?;
            let mut reader = Cursor::new(bytes);

            Ok(if trailer.level > 0 {
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    entries.push(read_branch_entry(&mut reader, variant)?);
                }
                NodeEntries::Branch(entries)
            } else {
                match trailer.kind {
                    IndexKind::Descriptor => {
                        let mut entries = Vec::with_capacity(count);
                        for _ in 0..count {
                            entries.push(read_descriptor_value(&mut reader, variant)?);
                        }
                        NodeEntries::Descriptor(entries)
                    }
                    IndexKind::Offset => {
                        let mut entries = Vec::with_capacity(count);
                        for _ in 0..count {
                            entries.push(read_offset_value(&mut reader, variant)?);
                        }
                        NodeEntries::Offset(entries)
                    }
                }
            })
        };

        let entries = parse_range(0, trailer.entry_count)?;

        // keys must be strictly ascending within a node
        let keys: Vec<u64> = match &entries {
            NodeEntries::Branch(v) => v.iter().map(|e| e.key).collect(),
            NodeEntries::Descriptor(v) => v.iter().map(|e| u64::from(e.identifier)).collect(),
            NodeEntries::Offset(v) => v.iter().map(|e| e.identifier).collect(),
        };
        if keys.windows(2).any(|pair| {
            let (Some(a), Some(b)) = (pair.first(), pair.get(1)) else {
                return false;
            };
            a >= b
        }) {
            return Err(Error::CorruptInput("index node key ordering"));
        }

        // slots past the live count are tombstones; their bytes stay intact
        // until the slot is reused, which is what the recovery scan feeds on
        let deleted_entries = if trailer.level == 0 {
            let tombstones = trailer.max_entry_count - trailer.entry_count;
            parse_range(trailer.entry_count, tombstones)?
        } else {
            match trailer.kind {
                IndexKind::Descriptor => NodeEntries::Descriptor(Vec::new()),
                IndexKind::Offset => NodeEntries::Offset(Vec::new()),
            }
        };

        Ok(Self {
            kind: trailer.kind,
            level: trailer.level,
            back_pointer: trailer.back_pointer,
            entries,
            deleted_entries,
        })
    }
}
