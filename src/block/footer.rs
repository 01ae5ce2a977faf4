// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{variant::Variant, Error};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// The footer trailing every data block
///
/// Field order differs between the variants (the 32-bit footer stores the
/// back-pointer before the CRC, the 64-bit footer after it), but the
/// carried information is the same.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlockFooter {
    /// Number of user bytes in the block
    pub data_size: u16,

    /// 16-bit signature derived from offset and block identifier
    pub signature: u16,

    /// Weak CRC over the user bytes; 0 means unchecked
    pub crc: u32,

    /// The owning block identifier
    pub back_pointer: u64,
}

impl BlockFooter {
    /// Parses a footer from its raw bytes.
    pub fn from_bytes(data: &[u8], variant: Variant) -> crate::Result<Self> {
        if data.len() != variant.block_footer_size() {
            return Err(Error::SizeMismatch(
                variant.block_footer_size() as u64,
                data.len() as u64,
            ));
        }

        let mut reader = Cursor::new(data);

        let data_size = reader.read_u16::<LittleEndian>()?;
        let signature = reader.read_u16::<LittleEndian>()?;

        let (crc, back_pointer) = match variant {
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

        Ok(Self {
            data_size,
            signature,
            crc,
            back_pointer,
        })
    }
}

/// The 16-bit signature stored in block footers and page trailers,
/// derived from the file offset and the block identifier.
#[must_use]
pub fn block_signature(file_offset: u64, block_id: u64) -> u16 {
    let mixed = file_offset ^ block_id;
    ((mixed >> 16) as u16) ^ (mixed as u16)
}
