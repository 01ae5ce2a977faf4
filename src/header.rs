// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{checksum::WeakCrc32, encryption::EncryptionType, variant::Variant, Error};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Magic bytes at the start of every PFF container (`!BDN`)
pub const MAGIC_BYTES: [u8; 4] = [0x21, 0x42, 0x44, 0x4E];

/// Number of bytes the header parser consumes
pub const FILE_HEADER_SIZE: usize = 564;

// Span of the partial CRC, both variants: bytes 8..479
const CRC_PARTIAL_SPAN: std::ops::Range<usize> = 8..479;

// Span of the full CRC, 64-bit only: bytes 8..524
const CRC_FULL_SPAN: std::ops::Range<usize> = 8..524;

const SENTINEL_OFFSET_32: usize = 460;
const SENTINEL_OFFSET_64: usize = 512;
const SENTINEL: u8 = 0x80;

/// The mail-store flavor recorded in the file header
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ContentType {
    /// Personal Address Book (`PM`)
    Pab,

    /// Personal Storage Table (`SM`)
    Pst,

    /// Offline Storage Table (`SO`)
    Ost,
}

impl TryFrom<[u8; 2]> for ContentType {
    type Error = Error;

    fn try_from(value: [u8; 2]) -> crate::Result<Self> {
        match &value {
            b"PM" => Ok(Self::Pab),
            b"SM" => Ok(Self::Pst),
            b"SO" => Ok(Self::Ost),
            _ => Err(Error::UnsupportedVariant(u16::from_le_bytes(value))),
        }
    }
}

/// The parsed file header
///
/// Carries everything the IO context needs to seed the two global indexes:
/// the variant, the encryption mode, the total file size and the root
/// node offset plus expected back-pointer of both index trees.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileHeader {
    /// 32-bit or 64-bit flavor
    pub variant: Variant,

    /// PAB, PST or OST
    pub content_type: ContentType,

    /// Data version the variant was derived from
    pub data_version: u16,

    /// Block encoding scheme
    pub encryption_type: EncryptionType,

    /// Total size of the file in bytes
    pub file_size: u64,

    /// File offset of the descriptor index root node
    pub descriptor_index_root_offset: u64,

    /// Expected back-pointer of the descriptor index root node
    pub descriptor_index_back_pointer: u64,

    /// File offset of the offset index root node
    pub offset_index_root_offset: u64,

    /// Expected back-pointer of the offset index root node
    pub offset_index_back_pointer: u64,

    /// Whether the allocation tables are marked valid
    pub allocation_table_valid: bool,
}

fn header_byte(data: &[u8], offset: usize) -> crate::Result<u8> {
    data.get(offset)
        .copied()
        .ok_or(Error::CorruptInput("file header too short"))
}

fn detect_variant(data: &[u8], data_version: u16) -> crate::Result<Variant> {
    if data_version <= 0x0F {
        return Ok(Variant::Bit32);
    }
    if data_version >= 0x15 {
        return Ok(Variant::Bit64);
    }

    // Unknown in-between version: disambiguate using the two
    // variant-specific sentinel bytes
    let sentinel_32 = header_byte(data, SENTINEL_OFFSET_32)?;
    let sentinel_64 = header_byte(data, SENTINEL_OFFSET_64)?;

    match (sentinel_32 == SENTINEL, sentinel_64 == SENTINEL) {
        (true, false) => {
            log::debug!("detected 32-bit file for unsupported data version {data_version:#x}");
            Ok(Variant::Bit32)
        }
        (false, true) => {
            log::debug!("detected 64-bit file for unsupported data version {data_version:#x}");
            Ok(Variant::Bit64)
        }
        _ => Err(Error::UnsupportedVariant(data_version)),
    }
}

fn checked_slice(data: &[u8], range: std::ops::Range<usize>) -> crate::Result<&[u8]> {
    data.get(range)
        .ok_or(Error::CorruptInput("file header too short"))
}

impl FileHeader {
    /// Parses the header from the first [`FILE_HEADER_SIZE`] bytes of a file.
    pub fn from_bytes(data: &[u8]) -> crate::Result<Self> {
        if checked_slice(data, 0..4)? != MAGIC_BYTES {
            return Err(Error::InvalidSignature {
                structure: "file header",
            });
        }

        let mut reader = Cursor::new(checked_slice(data, 4..24)?);
        let stored_crc = reader.read_u32::<LittleEndian>()?;

        let mut content_type = [0u8; 2];
        std::io::Read::read_exact(&mut reader, &mut content_type)?;
        let content_type = ContentType::try_from(content_type)?;

        let data_version = reader.read_u16::<LittleEndian>()?;
        let variant = detect_variant(data, data_version)?;

        WeakCrc32::from_bytes(checked_slice(data, CRC_PARTIAL_SPAN)?)
            .check(WeakCrc32::from_raw(stored_crc))?;

        let header = match variant {
            Variant::Bit32 => {
                let mut reader = Cursor::new(checked_slice(data, 168..204)?);

                let file_size = u64::from(reader.read_u32::<LittleEndian>()?);
                let _last_allocation_table_offset = reader.read_u32::<LittleEndian>()?;
                let _total_available_data_size = reader.read_u32::<LittleEndian>()?;
                let _total_available_page_size = reader.read_u32::<LittleEndian>()?;
                let descriptor_index_back_pointer = u64::from(reader.read_u32::<LittleEndian>()?);
                let descriptor_index_root_offset = u64::from(reader.read_u32::<LittleEndian>()?);
                let offset_index_back_pointer = u64::from(reader.read_u32::<LittleEndian>()?);
                let offset_index_root_offset = u64::from(reader.read_u32::<LittleEndian>()?);
                let allocation_table_valid = reader.read_u8()? != 0;

                let sentinel = header_byte(data, SENTINEL_OFFSET_32)?;
                if sentinel != SENTINEL {
                    return Err(Error::InvalidSignature {
                        structure: "file header sentinel",
                    });
                }

                Self {
                    variant,
                    content_type,
                    data_version,
                    encryption_type: EncryptionType::try_from(header_byte(
                        data,
                        SENTINEL_OFFSET_32 + 1,
                    )?)?,
                    file_size,
                    descriptor_index_root_offset,
                    descriptor_index_back_pointer,
                    offset_index_root_offset,
                    offset_index_back_pointer,
                    allocation_table_valid,
                }
            }
            Variant::Bit64 => {
                let mut reader = Cursor::new(checked_slice(data, 184..252)?);

                let file_size = reader.read_u64::<LittleEndian>()?;
                let _last_allocation_table_offset = reader.read_u64::<LittleEndian>()?;
                let _total_available_data_size = reader.read_u64::<LittleEndian>()?;
                let _total_available_page_size = reader.read_u64::<LittleEndian>()?;
                let descriptor_index_back_pointer = reader.read_u64::<LittleEndian>()?;
                let descriptor_index_root_offset = reader.read_u64::<LittleEndian>()?;
                let offset_index_back_pointer = reader.read_u64::<LittleEndian>()?;
                let offset_index_root_offset = reader.read_u64::<LittleEndian>()?;
                let allocation_table_valid = reader.read_u8()? != 0;

                let sentinel = header_byte(data, SENTINEL_OFFSET_64)?;
                if sentinel != SENTINEL {
                    return Err(Error::InvalidSignature {
                        structure: "file header sentinel",
                    });
                }

                let stored_full_crc = {
                    let mut reader = Cursor::new(checked_slice(data, 524..528)?);
                    reader.read_u32::<LittleEndian>()?
                };
                WeakCrc32::from_bytes(checked_slice(data, CRC_FULL_SPAN)?)
                    .check(WeakCrc32::from_raw(stored_full_crc))?;

                Self {
                    variant,
                    content_type,
                    data_version,
                    encryption_type: EncryptionType::try_from(header_byte(
                        data,
                        SENTINEL_OFFSET_64 + 1,
                    )?)?,
                    file_size,
                    descriptor_index_root_offset,
                    descriptor_index_back_pointer,
                    offset_index_root_offset,
                    offset_index_back_pointer,
                    allocation_table_valid,
                }
            }
        };

        log::trace!(
            "parsed file header: {:?} {:?}, {} bytes, encryption {:?}",
            header.variant,
            header.content_type,
            header.file_size,
            header.encryption_type,
        );

        Ok(header)
    }
}
