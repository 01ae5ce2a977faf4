// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::heap::HeapReference;
use crate::Error;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Signature byte of a table container
pub const TABLE_SIGNATURE: u8 = 0xEC;

const B5_SIGNATURE: u8 = 0xB5;

const HEADER_7C_SIZE: usize = 22;
const COLUMN_7C_SIZE: usize = 8;
const HEADER_AC_SIZE: usize = 40;
const COLUMN_AC_SIZE: usize = 16;

/// The seven record schemes a table can use
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TableType {
    /// GUID keys mapped to 16-byte slots (`0x6c`)
    SixC,

    /// Row set with inline column schema (`0x7c`)
    SevenC,

    /// 64-bit opaque keys mapped to descriptor values (`0x8c`)
    EightC,

    /// GUID keys mapped to 32-bit values (`0x9c`)
    NineC,

    /// Bare cell set without record identifiers (`0xa5`)
    A5,

    /// Row set with column schema in sub-descriptors (`0xac`)
    Ac,

    /// MAPI property set (`0xbc`)
    Bc,
}

impl TryFrom<u8> for TableType {
    type Error = Error;

    fn try_from(value: u8) -> crate::Result<Self> {
        match value {
            0x6C => Ok(Self::SixC),
            0x7C => Ok(Self::SevenC),
            0x8C => Ok(Self::EightC),
            0x9C => Ok(Self::NineC),
            0xA5 => Ok(Self::A5),
            0xAC => Ok(Self::Ac),
            0xBC => Ok(Self::Bc),
            _ => Err(Error::InvalidSignature {
                structure: "table type",
            }),
        }
    }
}

impl From<TableType> for u8 {
    fn from(value: TableType) -> Self {
        match value {
            TableType::SixC => 0x6C,
            TableType::SevenC => 0x7C,
            TableType::EightC => 0x8C,
            TableType::NineC => 0x9C,
            TableType::A5 => 0xA5,
            TableType::Ac => 0xAC,
            TableType::Bc => 0xBC,
        }
    }
}

/// The container header at the start of heap segment 0
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TableContainerHeader {
    /// The record scheme
    pub table_type: TableType,

    /// Heap reference of the type-specific root structure
    pub root_reference: HeapReference,
}

impl TableContainerHeader {
    /// Parses the first bytes of heap segment 0.
    pub fn from_bytes(segment: &[u8]) -> crate::Result<Self> {
        let mut reader = Cursor::new(segment);

        let _page_map_offset = reader.read_u16::<LittleEndian>()?;

        let signature = reader.read_u8()?;
        if signature != TABLE_SIGNATURE {
            return Err(Error::InvalidSignature {
                structure: "table container",
            });
        }

        let table_type = TableType::try_from(reader.read_u8()?)?;
        let root_reference = HeapReference::new(reader.read_u32::<LittleEndian>()?);

        Ok(Self {
            table_type,
            root_reference,
        })
    }
}

/// The `b5` header every record scheme shares
///
/// Describes the record-entry sub-tree: the fixed identifier and value
/// widths of its records, its branching level and the heap reference of
/// its root cell.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TableHeaderB5 {
    /// Width of a record identifier in bytes
    pub entry_identifier_size: u8,

    /// Width of a record value in bytes
    pub entry_value_size: u8,

    /// Branching level of the sub-tree; 0 means the root cell is a flat
    /// record array
    pub entries_level: u8,

    /// Heap reference of the sub-tree root; null for an empty table
    pub entries_reference: HeapReference,
}

impl TableHeaderB5 {
    /// Parses a `b5` header cell.
    pub fn from_bytes(cell: &[u8]) -> crate::Result<Self> {
        let mut reader = Cursor::new(cell);

        let signature = reader.read_u8()?;
        if signature != B5_SIGNATURE {
            return Err(Error::InvalidSignature {
                structure: "table b5 header",
            });
        }

        Ok(Self {
            entry_identifier_size: reader.read_u8()?,
            entry_value_size: reader.read_u8()?,
            entries_level: reader.read_u8()?,
            entries_reference: HeapReference::new(reader.read_u32::<LittleEndian>()?),
        })
    }

    pub(crate) fn expect_record_sizes(
        &self,
        identifier_sizes: &[u8],
        value_sizes: &[u8],
    ) -> crate::Result<()> {
        if identifier_sizes.contains(&self.entry_identifier_size)
            && value_sizes.contains(&self.entry_value_size)
        {
            Ok(())
        } else {
            Err(Error::CorruptInput("b5 record sizes"))
        }
    }

    /// Width of one record of the sub-tree's leaves.
    #[must_use]
    pub fn record_size(&self) -> usize {
        usize::from(self.entry_identifier_size) + usize::from(self.entry_value_size)
    }
}

/// One column of a `7c` or `ac` row table
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ColumnDefinition {
    /// The MAPI entry type
    pub entry_type: u16,

    /// The MAPI value type
    pub value_type: u16,

    /// Offset of the column's slot inside a row
    pub values_array_offset: u16,

    /// Width of the column's slot
    pub values_array_size: u16,

    /// Ordinal of the column
    pub values_array_number: u16,

    /// Descriptor of a nested `a5` table holding oversized cells
    /// (`ac` only, 0 if unused)
    pub sub_table_descriptor: u32,
}

/// The type-specific header of a `7c` table, column schema included
#[derive(Clone, Debug)]
pub struct TableHeader7c {
    /// Width of one row in the values array
    pub row_size: u16,

    /// Heap reference of the shared `b5` header
    pub b5_reference: HeapReference,

    /// Heap reference or local-descriptor id of the values array
    pub values_array_reference: u32,

    /// The column schema
    pub columns: Vec<ColumnDefinition>,
}

impl TableHeader7c {
    /// Parses a `7c` header cell.
    pub fn from_bytes(cell: &[u8]) -> crate::Result<Self> {
        let mut reader = Cursor::new(cell);

        let signature = reader.read_u8()?;
        if signature != 0x7C {
            return Err(Error::InvalidSignature {
                structure: "table 7c header",
            });
        }

        let column_count = usize::from(reader.read_u8()?);
        let _end_offset_32bit = reader.read_u16::<LittleEndian>()?;
        let _end_offset_16bit = reader.read_u16::<LittleEndian>()?;
        let _end_offset_8bit = reader.read_u16::<LittleEndian>()?;
        let row_size = reader.read_u16::<LittleEndian>()?;
        let b5_reference = HeapReference::new(reader.read_u32::<LittleEndian>()?);
        let values_array_reference = reader.read_u32::<LittleEndian>()?;
        let _unknown = reader.read_u32::<LittleEndian>()?;

        // the column definitions trail the header in the same cell
        if cell.len() != HEADER_7C_SIZE + column_count * COLUMN_7C_SIZE {
            return Err(Error::CorruptInput("7c column definitions size"));
        }

        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            columns.push(ColumnDefinition {
                entry_type: reader.read_u16::<LittleEndian>()?,
                value_type: reader.read_u16::<LittleEndian>()?,
                values_array_offset: reader.read_u16::<LittleEndian>()?,
                values_array_size: u16::from(reader.read_u8()?),
                values_array_number: u16::from(reader.read_u8()?),
                sub_table_descriptor: 0,
            });
        }

        Ok(Self {
            row_size,
            b5_reference,
            values_array_reference,
            columns,
        })
    }
}

/// The type-specific header of an `ac` table
///
/// Unlike `7c`, the column schema and the values array live in
/// sub-descriptor streams.
#[derive(Clone, Debug)]
pub struct TableHeaderAc {
    /// Width of one row in the values array
    pub row_size: u16,

    /// Heap reference of the shared `b5` header
    pub b5_reference: HeapReference,

    /// Local-descriptor id (or heap reference) of the values array
    pub values_array_reference: u32,

    /// Number of columns
    pub column_count: usize,

    /// Local-descriptor id of the column definitions stream
    pub column_definitions_reference: u32,
}

impl TableHeaderAc {
    /// Parses an `ac` header cell.
    pub fn from_bytes(cell: &[u8]) -> crate::Result<Self> {
        if cell.len() < HEADER_AC_SIZE {
            return Err(Error::CorruptInput("ac header size"));
        }

        let mut reader = Cursor::new(cell);

        let signature = reader.read_u8()?;
        if signature != 0xAC {
            return Err(Error::InvalidSignature {
                structure: "table ac header",
            });
        }

        let _padding = reader.read_u8()?;
        let _end_offset_32bit = reader.read_u16::<LittleEndian>()?;
        let _end_offset_16bit = reader.read_u16::<LittleEndian>()?;
        let _end_offset_8bit = reader.read_u16::<LittleEndian>()?;
        let row_size = reader.read_u16::<LittleEndian>()?;
        let b5_reference = HeapReference::new(reader.read_u32::<LittleEndian>()?);
        let values_array_reference = reader.read_u32::<LittleEndian>()?;
        let _padding2 = reader.read_u32::<LittleEndian>()?;
        let column_count = usize::from(reader.read_u16::<LittleEndian>()?);
        let column_definitions_reference = reader.read_u32::<LittleEndian>()?;

        Ok(Self {
            row_size,
            b5_reference,
            values_array_reference,
            column_count,
            column_definitions_reference,
        })
    }

    /// Parses the 16-byte column definitions out of their sub-descriptor
    /// stream.
    pub fn parse_columns(&self, data: &[u8]) -> crate::Result<Vec<ColumnDefinition>> {
        if data.len() != self.column_count * COLUMN_AC_SIZE {
            return Err(Error::CorruptInput("ac column definitions size"));
        }

        let mut reader = Cursor::new(data);
        let mut columns = Vec::with_capacity(self.column_count);

        for _ in 0..self.column_count {
            let entry_type = reader.read_u16::<LittleEndian>()?;
            let value_type = reader.read_u16::<LittleEndian>()?;
            let values_array_offset = reader.read_u16::<LittleEndian>()?;
            let values_array_size = reader.read_u16::<LittleEndian>()?;
            let values_array_number = reader.read_u16::<LittleEndian>()?;
            let _unknown = reader.read_u16::<LittleEndian>()?;
            let sub_table_descriptor = reader.read_u32::<LittleEndian>()?;

            columns.push(ColumnDefinition {
                entry_type,
                value_type,
                values_array_offset,
                values_array_size,
                values_array_number,
                sub_table_descriptor,
            });
        }

        Ok(columns)
    }
}
