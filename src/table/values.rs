// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{
    heap::{HeapIndex, HeapReference},
    record::{inline_value_size, is_reference_type, EntryFlags, TableFlags},
    Table,
};
use crate::{
    block::stream::DataRef, context::PffFile, local_descriptors::LocalDescriptorsTree,
    slice::Slice, source::ByteSource, Error,
};

/// The outcome of resolving one record value
pub(super) struct ResolvedValue {
    pub data: DataRef,
    pub flags: EntryFlags,

    /// The descriptor identifier a stream over this value decrypts under
    pub stream_descriptor: u32,
}

impl ResolvedValue {
    fn inline(bytes: &[u8], descriptor: u32) -> Self {
        Self {
            data: DataRef::Buffer(Slice::new(bytes)),
            flags: EntryFlags::default(),
            stream_descriptor: descriptor,
        }
    }

    fn empty(descriptor: u32) -> Self {
        Self {
            data: DataRef::empty(),
            flags: EntryFlags::default(),
            stream_descriptor: descriptor,
        }
    }

    fn missing(descriptor: u32) -> Self {
        Self {
            data: DataRef::empty(),
            flags: EntryFlags::MISSING_DATA_DESCRIPTOR,
            stream_descriptor: descriptor,
        }
    }
}

/// Shared context for resolving the values of one table
pub(super) struct ValueResolver<'a> {
    pub local_descriptors: Option<&'a LocalDescriptorsTree>,
    pub recovered: bool,
    pub table_descriptor: u32,
}

impl ValueResolver<'_> {
    /// Resolves the raw value bytes of a record into the place its data
    /// lives: small fixed kinds stay inline, zero is the empty stream, a
    /// flag-free reference names a heap cell, anything else a sub-descriptor.
    pub fn resolve<S: ByteSource>(
        &self,
        file: &mut PffFile<S>,
        heap: &HeapIndex,
        value_type: u16,
        raw: &[u8],
        table_flags: &mut TableFlags,
    ) -> crate::Result<ResolvedValue> {
        if let Some(size) = inline_value_size(value_type, raw.len()) {
            let bytes = raw
                .get(..size)
                .ok_or(Error::CorruptInput("inline value size"))?;
            return Ok(ResolvedValue::inline(bytes, self.table_descriptor));
        }

        if !is_reference_type(value_type) {
            return Err(Error::UnsupportedValueType {
                value_type,
                value_size: raw.len(),
            });
        }

        let reference = read_reference(raw)?;

        if reference == 0 {
            return Ok(ResolvedValue::empty(self.table_descriptor));
        }

        if reference & 0x1F == 0 {
            let cell = heap.cell(HeapReference::new(reference))?;
            return Ok(ResolvedValue::inline(cell, self.table_descriptor));
        }

        self.resolve_sub_descriptor(file, reference, table_flags)
    }

    /// Resolves a local-descriptor reference to its block extents.
    ///
    /// An absent sub-descriptor is not an error: the entry is marked
    /// missing, the table is flagged, and the value reads as empty.
    pub fn resolve_sub_descriptor<S: ByteSource>(
        &self,
        file: &mut PffFile<S>,
        reference: u32,
        table_flags: &mut TableFlags,
    ) -> crate::Result<ResolvedValue> {
        let Some(tree) = self.local_descriptors else {
            log::debug!("descriptor {reference:#x} referenced without local descriptors tree");
            table_flags.insert(TableFlags::MISSING_RECORD_ENTRY_DATA);
            return Ok(ResolvedValue::missing(reference));
        };

        let Some(value) = tree.lookup(file, u64::from(reference))? else {
            log::debug!("missing descriptor {reference:#x}, marking entry");
            table_flags.insert(TableFlags::MISSING_RECORD_ENTRY_DATA);
            return Ok(ResolvedValue::missing(reference));
        };

        match file.resolve_data_segments(value.data_identifier, self.recovered, 0) {
            Ok(segments) => Ok(ResolvedValue {
                data: DataRef::Blocks(segments),
                flags: EntryFlags::default(),
                stream_descriptor: reference,
            }),
            Err(error) => {
                // an unreadable sub-descriptor degrades to a missing one
                log::debug!("unreadable descriptor {reference:#x}: {error}");
                table_flags.insert(TableFlags::MISSING_RECORD_ENTRY_DATA);
                Ok(ResolvedValue::missing(reference))
            }
        }
    }

    /// Resolves the value of an `ac` column that points into a nested `a5`
    /// table holding oversized cells.
    pub fn resolve_via_sub_table<S: ByteSource>(
        &self,
        file: &mut PffFile<S>,
        sub_table: &Table,
        raw: &[u8],
        table_flags: &mut TableFlags,
    ) -> crate::Result<ResolvedValue> {
        let reference = read_reference(raw)?;

        if reference == 0 {
            return Ok(ResolvedValue::empty(self.table_descriptor));
        }

        if reference & 0x1F != 0 {
            return self.resolve_sub_descriptor(file, reference, table_flags);
        }

        // the reference addresses the sub-table's cells like a heap
        // reference: high half names the set, the rest the entry
        let set = (reference >> 16) as usize;
        let index = usize::try_from((reference & 0xFFE0) >> 5)
            .ok()
            .and_then(|i| i.checked_sub(1))
            .ok_or(Error::CorruptInput("sub-table reference"))?;

        match sub_table.entry(set, index) {
            Some(entry) => Ok(ResolvedValue {
                data: entry.value_ref().clone(),
                flags: EntryFlags::default(),
                stream_descriptor: entry.stream_descriptor,
            }),
            // a dangling sub-table reference signifies an empty value
            None => Ok(ResolvedValue::empty(self.table_descriptor)),
        }
    }
}

fn read_reference(raw: &[u8]) -> crate::Result<u32> {
    let bytes: [u8; 4] = raw
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or(Error::CorruptInput("value reference size"))?;

    Ok(u32::from_le_bytes(bytes))
}
