// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The heap-on-node / table engine.
//!
//! A table is a logical object built over one descriptor's data stream.
//! Every table starts with the heap-on-node cell index; a type byte in the
//! container header selects one of seven record schemes, all sharing the
//! `b5` record-entry sub-tree. The engine yields `(identifier, value type,
//! value)` records; value bytes stay where they are cheapest (inline, heap
//! cell, or block extents behind a sub-descriptor).

mod entries;
pub mod header;
pub mod heap;
pub mod record;
mod values;

pub use header::{ColumnDefinition, TableType};
pub use heap::{HeapIndex, HeapReference};
pub use record::{EntryFlags, EntryIdentifier, RecordEntry, TableFlags};

use crate::{
    block::stream::Segment,
    context::PffFile,
    descriptor::Descriptor,
    index::DescriptorIndexValue,
    local_descriptors::LocalDescriptorsTree,
    name_map::{NameToIdMap, NamedProperty},
    source::ByteSource,
    Error,
};
use byteorder::{LittleEndian, ReadBytesExt};
use entries::{collect_record_chunks, records};
use header::{TableContainerHeader, TableHeader7c, TableHeaderAc, TableHeaderB5};
use std::io::Cursor;
use values::{ResolvedValue, ValueResolver};

// named properties live in this entry type range
const NAMED_RANGE: std::ops::RangeInclusive<u16> = 0x8000..=0xFFFE;

/// A parsed table: record sets, column schema and per-entry values
pub struct Table {
    descriptor_identifier: u32,
    table_type: TableType,
    heap: HeapIndex,
    columns: Vec<ColumnDefinition>,
    sets: Vec<Vec<RecordEntry>>,
    flags: TableFlags,
    local_descriptors: Option<LocalDescriptorsTree>,
    sub_tables: Vec<(u32, Table)>,
}

impl Table {
    /// The descriptor this table was opened from.
    #[must_use]
    pub fn descriptor_identifier(&self) -> u32 {
        self.descriptor_identifier
    }

    /// The record scheme of the table.
    #[must_use]
    pub fn table_type(&self) -> TableType {
        self.table_type
    }

    /// Table-level status flags.
    #[must_use]
    pub fn flags(&self) -> TableFlags {
        self.flags
    }

    /// Number of record sets (rows for row tables).
    #[must_use]
    pub fn number_of_sets(&self) -> usize {
        self.sets.len()
    }

    /// Number of entries per set (columns for row tables).
    #[must_use]
    pub fn number_of_entries(&self) -> usize {
        if self.columns.is_empty() {
            self.sets.first().map_or(0, Vec::len)
        } else {
            self.columns.len()
        }
    }

    /// The column schema of a row table; empty otherwise.
    #[must_use]
    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    /// The entry at `(set, index)`.
    #[must_use]
    pub fn entry(&self, set: usize, index: usize) -> Option<&RecordEntry> {
        self.sets.get(set).and_then(|entries| entries.get(index))
    }

    /// All entries of one set.
    #[must_use]
    pub fn entries(&self, set: usize) -> Option<&[RecordEntry]> {
        self.sets.get(set).map(Vec::as_slice)
    }

    /// Finds an entry by MAPI entry type, optionally constrained to a
    /// value type. Remapped numeric identifiers from the name-to-id map
    /// match as well.
    #[must_use]
    pub fn entry_by_type(
        &self,
        set: usize,
        entry_type: u16,
        value_type: Option<u16>,
    ) -> Option<&RecordEntry> {
        self.sets.get(set)?.iter().find(|entry| {
            let matches_type = match entry.identifier {
                EntryIdentifier::MapiProperty {
                    entry_type: candidate,
                    ..
                } => {
                    candidate == entry_type
                        || matches!(
                            entry.named_property(),
                            Some(NamedProperty::Numeric(numeric)) if *numeric == u32::from(entry_type)
                        )
                }
                _ => false,
            };

            matches_type && value_type.map_or(true, |wanted| entry.value_type == wanted)
        })
    }

    /// Finds an entry by the UTF-8 name its entry type maps to.
    ///
    /// Requires the table to have been opened with a name-to-id map.
    #[must_use]
    pub fn entry_by_utf8_name(&self, set: usize, name: &str) -> Option<&RecordEntry> {
        self.sets.get(set)?.iter().find(|entry| {
            matches!(
                entry.named_property(),
                Some(NamedProperty::Name(candidate)) if candidate == name
            )
        })
    }

    /// The nested `a5` table behind an `ac` column, if any.
    #[must_use]
    pub fn sub_table(&self, descriptor: u32) -> Option<&Table> {
        self.sub_tables
            .iter()
            .find(|(candidate, _)| *candidate == descriptor)
            .map(|(_, table)| table)
    }

    /// The heap-on-node cell index of the table.
    #[must_use]
    pub fn heap(&self) -> &HeapIndex {
        &self.heap
    }

    /// Parses a descriptor's data stream as a table, end to end.
    pub(crate) fn read<S: ByteSource>(
        file: &mut PffFile<S>,
        descriptor: &Descriptor,
        name_map: Option<&dyn NameToIdMap>,
    ) -> crate::Result<Self> {
        if descriptor.data_identifier == 0 {
            return Err(Error::MissingDescriptor(u64::from(descriptor.identifier)));
        }

        let recovered = descriptor.is_recovered();
        let segments = file.resolve_data_segments(
            descriptor.data_identifier,
            recovered,
            descriptor.recovered_value_index(),
        )?;

        let mut decoded = Vec::with_capacity(segments.len());
        for segment in &segments {
            decoded.push(file.segment_data(segment, descriptor.identifier)?);
        }

        let first = decoded.first().ok_or(Error::CorruptInput("empty table"))?;
        let container = TableContainerHeader::from_bytes(first)?;
        log::trace!(
            "descriptor {}: table type {:?}, root {}",
            descriptor.identifier,
            container.table_type,
            container.root_reference,
        );

        let heap = HeapIndex::parse(decoded)?;
        let local_descriptors = file.local_descriptors_tree(descriptor)?;

        let resolver = ValueResolver {
            local_descriptors: local_descriptors.as_ref(),
            recovered,
            table_descriptor: descriptor.identifier,
        };

        let mut flags = TableFlags::default();

        let (columns, sets, sub_tables) = match container.table_type {
            TableType::Bc => {
                let sets = read_bc_values(
                    file,
                    &heap,
                    container.root_reference,
                    &resolver,
                    &mut flags,
                    name_map,
                )?;
                (Vec::new(), sets, Vec::new())
            }
            TableType::SixC => {
                let sets = read_6c_values(&heap, container.root_reference, descriptor.identifier)?;
                (Vec::new(), sets, Vec::new())
            }
            TableType::EightC => {
                let sets = read_8c_values(&heap, container.root_reference, descriptor.identifier)?;
                (Vec::new(), sets, Vec::new())
            }
            TableType::NineC => {
                let sets = read_9c_values(&heap, container.root_reference, descriptor.identifier)?;
                (Vec::new(), sets, Vec::new())
            }
            TableType::A5 => {
                let sets = read_a5_values(&heap, container.root_reference, descriptor.identifier)?;
                (Vec::new(), sets, Vec::new())
            }
            TableType::SevenC => {
                let header =
                    TableHeader7c::from_bytes(heap.cell(container.root_reference)?)?;
                let b5 = TableHeaderB5::from_bytes(heap.cell(header.b5_reference)?)?;
                b5.expect_record_sizes(&[4], &[2, 4])?;

                let columns = header.columns.clone();
                let sets = read_row_sets(
                    file,
                    &heap,
                    &segments,
                    &b5,
                    header.values_array_reference,
                    header.row_size,
                    &columns,
                    &[],
                    &resolver,
                    &mut flags,
                    name_map,
                )?;

                (columns, sets, Vec::new())
            }
            TableType::Ac => {
                let header =
                    TableHeaderAc::from_bytes(heap.cell(container.root_reference)?)?;
                let b5 = TableHeaderB5::from_bytes(heap.cell(header.b5_reference)?)?;
                b5.expect_record_sizes(&[4], &[2, 4])?;

                // the column schema lives in its own sub-descriptor stream
                let column_data = read_reference_bytes(
                    file,
                    &heap,
                    &resolver,
                    header.column_definitions_reference,
                    &mut flags,
                )?;
                let columns = header.parse_columns(&column_data)?;

                // nested a5 tables carry the oversized cells
                let mut sub_tables = Vec::new();
                for column in &columns {
                    if column.sub_table_descriptor != 0
                        && sub_tables
                            .iter()
                            .all(|(id, _)| *id != column.sub_table_descriptor)
                    {
                        let sub_table = read_sub_table(
                            file,
                            local_descriptors.as_ref(),
                            descriptor,
                            column.sub_table_descriptor,
                        )?;
                        sub_tables.push((column.sub_table_descriptor, sub_table));
                    }
                }

                let sets = read_row_sets(
                    file,
                    &heap,
                    &segments,
                    &b5,
                    header.values_array_reference,
                    header.row_size,
                    &columns,
                    &sub_tables,
                    &resolver,
                    &mut flags,
                    name_map,
                )?;

                (columns, sets, sub_tables)
            }
        };

        Ok(Self {
            descriptor_identifier: descriptor.identifier,
            table_type: container.table_type,
            heap,
            columns,
            sets,
            flags,
            local_descriptors,
            sub_tables,
        })
    }

    /// The local descriptors tree backing this table, if any.
    #[must_use]
    pub fn local_descriptors(&self) -> Option<&LocalDescriptorsTree> {
        self.local_descriptors.as_ref()
    }
}

fn lookup_name(name_map: Option<&dyn NameToIdMap>, entry_type: u16) -> Option<NamedProperty> {
    if NAMED_RANGE.contains(&entry_type) {
        name_map?.remap(entry_type)
    } else {
        None
    }
}

/// Reads a `bc` property set: one set of `(entry type, value type, value)`
/// records.
fn read_bc_values<S: ByteSource>(
    file: &mut PffFile<S>,
    heap: &HeapIndex,
    root_reference: HeapReference,
    resolver: &ValueResolver<'_>,
    flags: &mut TableFlags,
    name_map: Option<&dyn NameToIdMap>,
) -> crate::Result<Vec<Vec<RecordEntry>>> {
    let b5 = TableHeaderB5::from_bytes(heap.cell(root_reference)?)?;
    b5.expect_record_sizes(&[2], &[6])?;

    let mut entries = Vec::new();

    for chunk in collect_record_chunks(heap, b5.entries_reference, b5.entries_level, 2)? {
        for record in records(&chunk, b5.record_size())? {
            let mut reader = Cursor::new(record);
            let entry_type = reader.read_u16::<LittleEndian>()?;
            let value_type = reader.read_u16::<LittleEndian>()?;

            let raw = record
                .get(4..8)
                .ok_or(Error::CorruptInput("bc record size"))?;

            let ResolvedValue {
                data,
                flags: entry_flags,
                stream_descriptor,
            } = resolver.resolve(file, heap, value_type, raw, flags)?;

            entries.push(RecordEntry {
                identifier: EntryIdentifier::MapiProperty {
                    entry_type,
                    value_type,
                },
                value_type,
                value: data,
                flags: entry_flags,
                name: lookup_name(name_map, entry_type),
                stream_descriptor,
            });
        }
    }

    Ok(vec![entries])
}

/// Reads a `6c` table: GUID keys indexing 16-byte slots of a values array.
fn read_6c_values(
    heap: &HeapIndex,
    root_reference: HeapReference,
    table_descriptor: u32,
) -> crate::Result<Vec<Vec<RecordEntry>>> {
    let header_cell = heap.cell(root_reference)?;
    if header_cell.len() != 8 {
        return Err(Error::CorruptInput("6c header size"));
    }

    let mut reader = Cursor::new(header_cell);
    let b5_reference = HeapReference::new(reader.read_u32::<LittleEndian>()?);
    let values_reference = HeapReference::new(reader.read_u32::<LittleEndian>()?);

    let b5 = TableHeaderB5::from_bytes(heap.cell(b5_reference)?)?;
    b5.expect_record_sizes(&[16], &[2])?;

    if b5.entries_reference.is_null() && values_reference.is_null() {
        return Ok(vec![Vec::new()]);
    }
    if b5.entries_reference.is_null() || values_reference.is_null() {
        return Err(Error::CorruptInput("6c references"));
    }

    let values = heap.cell(values_reference)?.to_vec();
    let mut entries = Vec::new();

    for chunk in collect_record_chunks(heap, b5.entries_reference, b5.entries_level, 16)? {
        for record in records(&chunk, b5.record_size())? {
            let guid: [u8; 16] = record
                .get(..16)
                .and_then(|b| b.try_into().ok())
                .ok_or(Error::CorruptInput("6c record size"))?;

            let mut reader = Cursor::new(
                record
                    .get(16..)
                    .ok_or(Error::CorruptInput("6c record size"))?,
            );
            let slot = usize::from(reader.read_u16::<LittleEndian>()?);

            let value = values
                .get(slot * 16..(slot + 1) * 16)
                .ok_or(Error::CorruptInput("6c values array slot"))?;

            entries.push(RecordEntry {
                identifier: EntryIdentifier::Guid(guid),
                value_type: 0,
                value: crate::block::stream::DataRef::Buffer(crate::slice::Slice::new(value)),
                flags: EntryFlags::default(),
                name: None,
                stream_descriptor: table_descriptor,
            });
        }
    }

    Ok(vec![entries])
}

/// Reads an `8c` table: 64-bit opaque keys with 32-bit values.
fn read_8c_values(
    heap: &HeapIndex,
    root_reference: HeapReference,
    table_descriptor: u32,
) -> crate::Result<Vec<Vec<RecordEntry>>> {
    let b5 = TableHeaderB5::from_bytes(heap.cell(root_reference)?)?;
    b5.expect_record_sizes(&[8], &[4])?;

    let mut entries = Vec::new();

    for chunk in collect_record_chunks(heap, b5.entries_reference, b5.entries_level, 8)? {
        for record in records(&chunk, b5.record_size())? {
            let mut reader = Cursor::new(record);
            let identifier = reader.read_u64::<LittleEndian>()?;

            let value = record
                .get(8..12)
                .ok_or(Error::CorruptInput("8c record size"))?;

            entries.push(RecordEntry {
                identifier: EntryIdentifier::Secure4(identifier),
                value_type: 0,
                value: crate::block::stream::DataRef::Buffer(crate::slice::Slice::new(value)),
                flags: EntryFlags::default(),
                name: None,
                stream_descriptor: table_descriptor,
            });
        }
    }

    Ok(vec![entries])
}

/// Reads a `9c` table: GUID keys with 32-bit values.
fn read_9c_values(
    heap: &HeapIndex,
    root_reference: HeapReference,
    table_descriptor: u32,
) -> crate::Result<Vec<Vec<RecordEntry>>> {
    let b5 = TableHeaderB5::from_bytes(heap.cell(root_reference)?)?;
    b5.expect_record_sizes(&[16], &[4])?;

    let mut entries = Vec::new();

    for chunk in collect_record_chunks(heap, b5.entries_reference, b5.entries_level, 16)? {
        for record in records(&chunk, b5.record_size())? {
            let guid: [u8; 16] = record
                .get(..16)
                .and_then(|b| b.try_into().ok())
                .ok_or(Error::CorruptInput("9c record size"))?;

            let value = record
                .get(16..20)
                .ok_or(Error::CorruptInput("9c record size"))?;

            entries.push(RecordEntry {
                identifier: EntryIdentifier::Guid(guid),
                value_type: 0,
                value: crate::block::stream::DataRef::Buffer(crate::slice::Slice::new(value)),
                flags: EntryFlags::default(),
                name: None,
                stream_descriptor: table_descriptor,
            });
        }
    }

    Ok(vec![entries])
}

/// Reads an `a5` table: no record identifiers at all. Each heap segment is
/// a set and each of its cells one entry.
fn read_a5_values(
    heap: &HeapIndex,
    root_reference: HeapReference,
    table_descriptor: u32,
) -> crate::Result<Vec<Vec<RecordEntry>>> {
    if !root_reference.is_null() {
        return Err(Error::CorruptInput("a5 root reference"));
    }

    let mut sets = Vec::with_capacity(heap.segment_count());

    for segment in 0..heap.segment_count() {
        let mut entries = Vec::with_capacity(heap.cell_count(segment));

        for cell in 0..heap.cell_count(segment) {
            let bytes = heap.cell_at(segment, cell)?;

            entries.push(RecordEntry {
                identifier: EntryIdentifier::Ordinal(cell as u32),
                value_type: 0,
                value: crate::block::stream::DataRef::Buffer(crate::slice::Slice::new(bytes)),
                flags: EntryFlags::default(),
                name: None,
                stream_descriptor: table_descriptor,
            });
        }

        sets.push(entries);
    }

    Ok(sets)
}

/// Where a row table keeps its values array
enum ValuesArraySource {
    Heap(HeapReference),
    SubDescriptor { descriptor: u32, segments: Vec<Segment> },
}

/// Materializes the bytes a 32-bit reference points at: a heap cell, or a
/// whole sub-descriptor stream.
fn read_reference_bytes<S: ByteSource>(
    file: &mut PffFile<S>,
    heap: &HeapIndex,
    resolver: &ValueResolver<'_>,
    reference: u32,
    flags: &mut TableFlags,
) -> crate::Result<Vec<u8>> {
    if reference & 0x1F == 0 {
        return Ok(heap.cell(HeapReference::new(reference))?.to_vec());
    }

    let read_options = file.read_options();
    let resolved = resolver.resolve_sub_descriptor(file, reference, flags)?;
    read_data_ref(file, &resolved.data, resolved.stream_descriptor, read_options)
}

fn read_data_ref<S: ByteSource>(
    file: &mut PffFile<S>,
    data: &crate::block::stream::DataRef,
    descriptor: u32,
    read_options: crate::block::ReadOptions,
) -> crate::Result<Vec<u8>> {
    match data {
        crate::block::stream::DataRef::Buffer(slice) => Ok(slice.to_vec()),
        crate::block::stream::DataRef::Blocks(segments) => {
            let mut bytes = Vec::new();
            for segment in segments {
                bytes.extend_from_slice(&file.segment_data_with(
                    segment,
                    descriptor,
                    read_options,
                )?);
            }
            Ok(bytes)
        }
    }
}

/// Reads the rows of a `7c` or `ac` table.
#[allow(clippy::too_many_arguments)]
fn read_row_sets<S: ByteSource>(
    file: &mut PffFile<S>,
    heap: &HeapIndex,
    heap_segments: &[Segment],
    b5: &TableHeaderB5,
    values_array_reference: u32,
    row_size: u16,
    columns: &[ColumnDefinition],
    sub_tables: &[(u32, Table)],
    resolver: &ValueResolver<'_>,
    flags: &mut TableFlags,
    name_map: Option<&dyn NameToIdMap>,
) -> crate::Result<Vec<Vec<RecordEntry>>> {
    if b5.entries_reference.is_null() && values_array_reference == 0 {
        return Ok(Vec::new());
    }
    if b5.entries_reference.is_null() || values_array_reference == 0 {
        return Err(Error::CorruptInput("row table references"));
    }
    if row_size == 0 || columns.is_empty() {
        return Err(Error::CorruptInput("values array size"));
    }

    // the first column doubles as the row's self identifier
    let first = columns.first().ok_or(Error::CorruptInput("column schema"))?;
    if first.values_array_offset != 0 || first.values_array_size != 4 {
        return Err(Error::CorruptInput("first column shape"));
    }

    let source = if values_array_reference & 0x1F == 0 {
        ValuesArraySource::Heap(HeapReference::new(values_array_reference))
    } else {
        let resolved = resolver.resolve_sub_descriptor(file, values_array_reference, flags)?;
        match resolved.data {
            crate::block::stream::DataRef::Blocks(segments) => ValuesArraySource::SubDescriptor {
                descriptor: resolved.stream_descriptor,
                segments,
            },
            crate::block::stream::DataRef::Buffer(_) => {
                return Err(Error::MissingDescriptor(u64::from(values_array_reference)))
            }
        }
    };

    let mut values_data = match &source {
        ValuesArraySource::Heap(reference) => heap.cell(*reference)?.to_vec(),
        ValuesArraySource::SubDescriptor {
            descriptor,
            segments,
        } => {
            let mut bytes = Vec::new();
            for segment in segments {
                bytes.extend_from_slice(&file.segment_data(segment, *descriptor)?);
            }
            bytes
        }
    };

    let row_size = usize::from(row_size);
    let row_capacity = values_data.len() / row_size;

    let mut sets = Vec::new();

    for chunk in collect_record_chunks(heap, b5.entries_reference, b5.entries_level, 4)? {
        for record in records(&chunk, b5.record_size())? {
            let mut reader = Cursor::new(record);
            let row_identifier = reader.read_u32::<LittleEndian>()?;
            let row_number = match b5.entry_value_size {
                2 => usize::from(reader.read_u16::<LittleEndian>()?),
                4 => reader.read_u32::<LittleEndian>()? as usize,
                _ => return Err(Error::CorruptInput("row record value size")),
            };

            // the explicit bound on padded or remnant values arrays
            if row_number >= row_capacity {
                return Err(Error::CorruptInput("values array row number"));
            }

            let row_range = row_number * row_size..(row_number + 1) * row_size;

            // rows start with their own values-array identifier; a mismatch
            // after forced decryption means the array was never encrypted
            let self_identifier = read_row_self_identifier(&values_data, row_range.clone())?;
            if self_identifier != row_identifier {
                let retried = match &source {
                    // the values array sits in the table's own heap:
                    // re-decode the owning block bypassing the heuristic
                    // and re-slice the cell out of the raw segment
                    ValuesArraySource::Heap(reference) if file.force_decryption => {
                        let segment = heap_segments
                            .get(reference.segment())
                            .ok_or(Error::CorruptInput("heap segment out of range"))?;

                        let mut read_options = file.read_options();
                        read_options.ignore_force_decryption = true;

                        let raw = file.segment_data_with(
                            segment,
                            resolver.table_descriptor,
                            read_options,
                        )?;

                        Some(heap::cell_in_segment(&raw, reference.cell()?)?.to_vec())
                    }
                    ValuesArraySource::SubDescriptor {
                        descriptor,
                        segments: sub_segments,
                    } if file.force_decryption => {
                        let mut read_options = file.read_options();
                        read_options.ignore_force_decryption = true;

                        let mut bytes = Vec::new();
                        for segment in sub_segments {
                            bytes.extend_from_slice(&file.segment_data_with(
                                segment,
                                *descriptor,
                                read_options,
                            )?);
                        }
                        Some(bytes)
                    }
                    _ => None,
                };

                let Some(retried) = retried else {
                    return Err(Error::CorruptInput("values array identifier"));
                };

                if read_row_self_identifier(&retried, row_range.clone())? != row_identifier {
                    return Err(Error::CorruptInput("values array identifier"));
                }

                log::debug!("values array reads clean without decryption, disabling force");
                values_data = retried;
                file.force_decryption = false;
            }

            let row = values_data
                .get(row_range)
                .ok_or(Error::CorruptInput("values array row bounds"))?
                .to_vec();

            let mut row_entries = Vec::with_capacity(columns.len());

            for column in columns {
                let start = usize::from(column.values_array_offset);
                let end = start + usize::from(column.values_array_size);

                let raw = row
                    .get(start..end)
                    .ok_or(Error::CorruptInput("column slot bounds"))?;

                let sub_table = sub_tables
                    .iter()
                    .find(|(id, _)| *id == column.sub_table_descriptor)
                    .map(|(_, table)| table);

                let ResolvedValue {
                    data,
                    flags: entry_flags,
                    stream_descriptor,
                } = if let Some(sub_table) = sub_table {
                    resolver.resolve_via_sub_table(file, sub_table, raw, flags)?
                } else {
                    resolver.resolve(file, heap, column.value_type, raw, flags)?
                };

                row_entries.push(RecordEntry {
                    identifier: EntryIdentifier::MapiProperty {
                        entry_type: column.entry_type,
                        value_type: column.value_type,
                    },
                    value_type: column.value_type,
                    value: data,
                    flags: entry_flags,
                    name: lookup_name(name_map, column.entry_type),
                    stream_descriptor,
                });
            }

            sets.push(row_entries);
        }
    }

    Ok(sets)
}

fn read_row_self_identifier(
    values_data: &[u8],
    row_range: std::ops::Range<usize>,
) -> crate::Result<u32> {
    let bytes: [u8; 4] = values_data
        .get(row_range)
        .and_then(|row| row.get(..4))
        .and_then(|b| b.try_into().ok())
        .ok_or(Error::CorruptInput("values array row bounds"))?;

    Ok(u32::from_le_bytes(bytes))
}

/// Opens the nested `a5` table an `ac` column points at.
fn read_sub_table<S: ByteSource>(
    file: &mut PffFile<S>,
    local_descriptors: Option<&LocalDescriptorsTree>,
    parent: &Descriptor,
    sub_descriptor: u32,
) -> crate::Result<Table> {
    let tree = local_descriptors.ok_or(Error::MissingDescriptor(u64::from(sub_descriptor)))?;

    let value = tree
        .lookup(file, u64::from(sub_descriptor))?
        .ok_or(Error::MissingDescriptor(u64::from(sub_descriptor)))?;

    let descriptor = Descriptor::from_index_value(
        DescriptorIndexValue {
            identifier: sub_descriptor,
            data_identifier: value.data_identifier,
            local_descriptors_identifier: value.local_descriptors_identifier,
            parent_identifier: parent.identifier,
        },
        parent.is_recovered(),
        0,
    );

    let sub_table = Table::read(file, &descriptor, None)?;

    if sub_table.table_type() != TableType::A5 {
        return Err(Error::CorruptInput("sub-table type"));
    }

    Ok(sub_table)
}

// keep the value-type constants reachable for callers matching on entries
pub use record::value_types;
