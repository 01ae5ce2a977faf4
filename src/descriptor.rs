// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    block::stream::DataStream, context::PffFile, index::DescriptorIndexValue,
    source::ByteSource, table::Table,
};

/// One logical object of the file: a folder, message, attachment or table
///
/// A descriptor is a plain record; its payload is opened through
/// [`crate::PffFile::open_data`] or [`crate::PffFile::open_table`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Descriptor {
    /// The 32-bit descriptor identifier
    pub identifier: u32,

    /// Block identifier of the payload
    pub data_identifier: u64,

    /// Block identifier of the local descriptors tree, or 0
    pub local_descriptors_identifier: u64,

    /// Identifier of the parent descriptor
    pub parent_identifier: u32,

    recovered: bool,
    recovered_value_index: usize,
}

impl Descriptor {
    pub(crate) fn from_index_value(
        value: DescriptorIndexValue,
        recovered: bool,
        recovered_value_index: usize,
    ) -> Self {
        Self {
            identifier: value.identifier,
            data_identifier: value.data_identifier,
            local_descriptors_identifier: value.local_descriptors_identifier,
            parent_identifier: value.parent_identifier,
            recovered,
            recovered_value_index,
        }
    }

    /// Whether this descriptor was salvaged by recovery rather than found
    /// in the live index.
    #[must_use]
    pub fn is_recovered(&self) -> bool {
        self.recovered
    }

    /// Which salvaged candidate this descriptor resolves through.
    #[must_use]
    pub fn recovered_value_index(&self) -> usize {
        self.recovered_value_index
    }

    /// Opens the descriptor's logical data stream.
    pub fn open_data<S: ByteSource>(&self, file: &mut PffFile<S>) -> crate::Result<DataStream> {
        file.open_data(self)
    }

    /// Interprets the descriptor's data stream as a table.
    pub fn open_table<S: ByteSource>(&self, file: &mut PffFile<S>) -> crate::Result<Table> {
        file.open_table(self)
    }
}
