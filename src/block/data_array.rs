// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{variant::Variant, Error};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Signature byte of a data-array payload
pub const DATA_ARRAY_SIGNATURE: u8 = 0x01;

/// The parsed header of an internal tree-of-blocks payload
///
/// A level-1 array lists leaf block identifiers; a higher level lists
/// sub-arrays. Concatenating the leaves in order yields a logical stream of
/// exactly `total_size` bytes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DataArray {
    /// Tree level; 1 means the entries are leaves
    pub level: u8,

    /// The declared size of the logical stream
    pub total_size: u32,

    /// The child block identifiers, in stream order
    pub entries: Vec<u64>,
}

/// Whether an internal block payload is a data array.
#[must_use]
pub fn is_data_array(data: &[u8]) -> bool {
    matches!(data.first(), Some(&DATA_ARRAY_SIGNATURE)) && matches!(data.get(1), Some(1 | 2))
}

impl DataArray {
    /// Parses a data-array payload.
    pub fn from_bytes(data: &[u8], variant: Variant) -> crate::Result<Self> {
        let mut reader = Cursor::new(data);

        let signature = reader.read_u8()?;
        if signature != DATA_ARRAY_SIGNATURE {
            return Err(Error::InvalidSignature {
                structure: "data array",
            });
        }

        let level = reader.read_u8()?;
        if level == 0 {
            return Err(Error::CorruptInput("data array level"));
        }

        let entry_count = reader.read_u16::<LittleEndian>()?;
        let total_size = reader.read_u32::<LittleEndian>()?;

        let mut entries = Vec::with_capacity(usize::from(entry_count));
        for _ in 0..entry_count {
            entries.push(variant.read_pointer(&mut reader)?);
        }

        Ok(Self {
            level,
            total_size,
            entries,
        })
    }
}
