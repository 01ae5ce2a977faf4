// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Allocation-table pages: fixed-stride bitmaps over the file.
//!
//! A data map (type `0x84`) tracks 64-byte units, a page map (type `0x83`)
//! tracks 512-byte units. The recovery engine walks the zero bits to find
//! unallocated regions worth scanning.

use crate::{checksum::WeakCrc32, source::ByteSource, variant::Variant, Error};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Size of the bitmap payload of an allocation page
pub const ALLOCATION_BITMAP_SIZE: usize = 496;

/// Page size of an allocation table page
pub const ALLOCATION_PAGE_SIZE: usize = 512;

/// File offset of the first data allocation table
pub const FIRST_DATA_ALLOCATION_TABLE_OFFSET: u64 = 0x4400;

/// File offset of the first page allocation table
pub const FIRST_PAGE_ALLOCATION_TABLE_OFFSET: u64 = 0x4600;

/// The two allocation table flavors
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AllocationTableType {
    /// Bitmap over 64-byte data units (`0x84`)
    Data,

    /// Bitmap over 512-byte pages (`0x83`)
    Page,
}

impl AllocationTableType {
    /// Stride of one bitmap bit in bytes.
    #[must_use]
    pub fn stride(self) -> u64 {
        match self {
            Self::Data => 64,
            Self::Page => 512,
        }
    }

    /// Bytes of file coverage of one allocation page.
    #[must_use]
    pub fn coverage(self) -> u64 {
        (ALLOCATION_BITMAP_SIZE as u64) * 8 * self.stride()
    }

    /// First file offset at which a table of this type occurs.
    #[must_use]
    pub fn first_table_offset(self) -> u64 {
        match self {
            Self::Data => FIRST_DATA_ALLOCATION_TABLE_OFFSET,
            Self::Page => FIRST_PAGE_ALLOCATION_TABLE_OFFSET,
        }
    }

    fn from_page_type(value: u8) -> Option<Self> {
        match value {
            0x84 => Some(Self::Data),
            0x83 => Some(Self::Page),
            _ => None,
        }
    }
}

/// A contiguous unallocated region of the file
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FreeExtent {
    /// Start of the region
    pub file_offset: u64,

    /// Length of the region in bytes
    pub size: u64,
}

/// Reads one allocation page and appends its free extents.
///
/// The page's back-pointer names the base offset of its coverage; page maps
/// additionally bias it by `0x200`. A zero bit denotes a free unit; runs of
/// consecutive zero bits are merged into single extents.
pub fn read_allocation_table<S: ByteSource>(
    source: &mut S,
    variant: Variant,
    table_offset: u64,
    expected_type: AllocationTableType,
    extents: &mut Vec<FreeExtent>,
) -> crate::Result<()> {
    let page = source.read_at(table_offset, ALLOCATION_PAGE_SIZE)?;

    let bitmap = page
        .get(..ALLOCATION_BITMAP_SIZE)
        .ok_or(Error::CorruptInput("allocation page too short"))?;

    let mut reader = Cursor::new(
        page.get(ALLOCATION_BITMAP_SIZE..)
            .ok_or(Error::CorruptInput("allocation page too short"))?,
    );

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
            structure: "allocation page type copy",
        });
    }

    let table_type = AllocationTableType::from_page_type(page_type).ok_or(
        Error::InvalidSignature {
            structure: "allocation page type",
        },
    )?;

    if table_type != expected_type {
        return Err(Error::InvalidSignature {
            structure: "allocation page type",
        });
    }

    WeakCrc32::from_bytes(bitmap).check(WeakCrc32::from_raw(stored_crc))?;

    let stride = table_type.stride();
    let mut unit_offset = match table_type {
        AllocationTableType::Page => back_pointer.wrapping_sub(0x200),
        AllocationTableType::Data => back_pointer,
    };

    let mut run_start = 0u64;
    let mut run_size = 0u64;

    for byte in bitmap {
        let mut bits = *byte;

        for _ in 0..8 {
            if bits & 0x80 == 0 {
                if run_size == 0 {
                    run_start = unit_offset;
                }
                run_size += stride;
            } else if run_size > 0 {
                extents.push(FreeExtent {
                    file_offset: run_start,
                    size: run_size,
                });
                run_size = 0;
            }

            bits <<= 1;
            unit_offset += stride;
        }
    }

    if run_size > 0 {
        extents.push(FreeExtent {
            file_offset: run_start,
            size: run_size,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn build_page(table_type: u8, back_pointer: u32, bitmap: &[u8]) -> Vec<u8> {
        let mut page = vec![0u8; ALLOCATION_PAGE_SIZE];
        page[..bitmap.len()].copy_from_slice(bitmap);

        // unset trailing bitmap bytes mean "free"; mark them allocated so
        // the test controls every run
        for byte in &mut page[bitmap.len()..ALLOCATION_BITMAP_SIZE] {
            *byte = 0xFF;
        }

        page[496] = table_type;
        page[497] = table_type;
        page[500..504].copy_from_slice(&back_pointer.to_le_bytes());

        let crc = WeakCrc32::from_bytes(&page[..ALLOCATION_BITMAP_SIZE]).into_u32();
        page[504..508].copy_from_slice(&crc.to_le_bytes());

        page
    }

    #[test]
    fn free_runs_are_merged() -> crate::Result<()> {
        // 0b1001_1110: units 1, 2 free (one run), unit 7 free (another run)
        let page = build_page(0x84, 0x4400, &[0b1001_1110]);
        let mut source = std::io::Cursor::new(page);

        let mut extents = Vec::new();
        read_allocation_table(
            &mut source,
            Variant::Bit32,
            0,
            AllocationTableType::Data,
            &mut extents,
        )?;

        assert_eq!(
            vec![
                FreeExtent {
                    file_offset: 0x4400 + 64,
                    size: 128,
                },
                FreeExtent {
                    file_offset: 0x4400 + 7 * 64,
                    size: 64,
                },
            ],
            extents,
        );

        Ok(())
    }

    #[test]
    fn page_map_base_is_biased() -> crate::Result<()> {
        let page = build_page(0x83, 0x4600, &[0b0111_1111]);
        let mut source = std::io::Cursor::new(page);

        let mut extents = Vec::new();
        read_allocation_table(
            &mut source,
            Variant::Bit32,
            0,
            AllocationTableType::Page,
            &mut extents,
        )?;

        assert_eq!(
            vec![FreeExtent {
                file_offset: 0x4600 - 0x200,
                size: 512,
            }],
            extents,
        );

        Ok(())
    }

    #[test]
    fn type_copy_mismatch_is_rejected() {
        let mut page = build_page(0x84, 0x4400, &[0xFF]);
        page[497] = 0x83;
        let mut source = std::io::Cursor::new(page);

        let mut extents = Vec::new();
        assert!(matches!(
            read_allocation_table(
                &mut source,
                Variant::Bit32,
                0,
                AllocationTableType::Data,
                &mut extents,
            ),
            Err(Error::InvalidSignature { .. })
        ));
    }

    #[test]
    fn crc_mismatch_is_rejected() {
        let mut page = build_page(0x84, 0x4400, &[0xFF]);
        page[0] = 0x00;
        let mut source = std::io::Cursor::new(page);

        let mut extents = Vec::new();
        assert!(matches!(
            read_allocation_table(
                &mut source,
                Variant::Bit32,
                0,
                AllocationTableType::Data,
                &mut extents,
            ),
            Err(Error::CrcMismatch(..))
        ));
    }
}
