// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Read;

/// Size of an index node page, both variants
pub const INDEX_NODE_SIZE: usize = 512;

/// Alignment unit of block envelopes
pub const BLOCK_ALIGNMENT: u64 = 64;

/// The 32-bit vs. 64-bit flavor of the on-disk format
///
/// The variant is fixed by the file header and decides every
/// width-dependent aspect of parsing: pointer sizes, footer layouts, index
/// entry sizes and data-array identifier widths. All parsing primitives are
/// parameterized over this layout descriptor instead of re-deciding at each
/// call site.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Variant {
    /// The ANSI flavor with 4-byte pointers (data version <= 0x0F)
    Bit32,

    /// The Unicode flavor with 8-byte pointers (data version >= 0x15)
    Bit64,
}

impl Variant {
    /// Width of file offsets and block identifiers.
    #[must_use]
    pub fn pointer_size(self) -> usize {
        match self {
            Self::Bit32 => 4,
            Self::Bit64 => 8,
        }
    }

    /// Size of the footer trailing every data block.
    #[must_use]
    pub fn block_footer_size(self) -> usize {
        match self {
            Self::Bit32 => 12,
            Self::Bit64 => 16,
        }
    }

    /// Size of a branch entry in an index node.
    #[must_use]
    pub fn index_branch_entry_size(self) -> usize {
        match self {
            Self::Bit32 => 12,
            Self::Bit64 => 24,
        }
    }

    /// Size of a leaf entry in the offset index.
    #[must_use]
    pub fn offset_leaf_entry_size(self) -> usize {
        match self {
            Self::Bit32 => 12,
            Self::Bit64 => 24,
        }
    }

    /// Size of a leaf entry in the descriptor index.
    #[must_use]
    pub fn descriptor_leaf_entry_size(self) -> usize {
        match self {
            Self::Bit32 => 16,
            Self::Bit64 => 32,
        }
    }

    /// Bytes of an index node available for entries.
    #[must_use]
    pub fn index_entry_area_size(self) -> usize {
        match self {
            Self::Bit32 => 496,
            Self::Bit64 => 488,
        }
    }

    /// Span of an index node covered by its trailer CRC.
    #[must_use]
    pub fn index_crc_span(self) -> usize {
        match self {
            Self::Bit32 => 500,
            Self::Bit64 => 496,
        }
    }

    /// Width of a block identifier inside a data-array payload.
    #[must_use]
    pub fn array_entry_size(self) -> usize {
        self.pointer_size()
    }

    /// Size of the header of a local descriptor node.
    #[must_use]
    pub fn local_descriptor_header_size(self) -> usize {
        match self {
            Self::Bit32 => 4,
            Self::Bit64 => 8,
        }
    }

    /// Size of a leaf entry in a local descriptor node.
    #[must_use]
    pub fn local_descriptor_leaf_entry_size(self) -> usize {
        match self {
            Self::Bit32 => 12,
            Self::Bit64 => 24,
        }
    }

    /// Size of a branch entry in a local descriptor node.
    #[must_use]
    pub fn local_descriptor_branch_entry_size(self) -> usize {
        match self {
            Self::Bit32 => 8,
            Self::Bit64 => 16,
        }
    }

    /// Reads one variant-width pointer (offset or block identifier).
    pub fn read_pointer<R: Read>(self, reader: &mut R) -> crate::Result<u64> {
        Ok(match self {
            Self::Bit32 => u64::from(reader.read_u32::<LittleEndian>()?),
            Self::Bit64 => reader.read_u64::<LittleEndian>()?,
        })
    }
}

/// The size a block of `data_size` user bytes occupies on disk, including
/// padding to the next 64-byte boundary and the footer.
#[must_use]
pub fn block_envelope_size(variant: Variant, data_size: u32) -> u64 {
    let raw = u64::from(data_size) + variant.block_footer_size() as u64;
    raw.div_ceil(BLOCK_ALIGNMENT) * BLOCK_ALIGNMENT
}
