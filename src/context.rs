// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    allocation::{read_allocation_table, AllocationTableType, FreeExtent},
    block::{
        data_array::{is_data_array, DataArray},
        decrypt_block_data, read_block,
        stream::{DataRef, DataStream, Segment},
        ReadOptions,
    },
    descriptor::Descriptor,
    encryption::EncryptionType,
    header::{ContentType, FileHeader, FILE_HEADER_SIZE},
    ids::BlockId,
    index::{DescriptorIndexValue, IndexKind, IndexTree, NodeCache, OffsetIndexValue},
    local_descriptors::{LocalDescriptorNode, LocalDescriptorsTree},
    name_map::NameToIdMap,
    recovery::{self, RecoveryFlags},
    slice::Slice,
    source::ByteSource,
    table::Table,
    variant::Variant,
    Error,
};
use quick_cache::{sync::Cache as QuickCache, UnitWeighter};
use std::{collections::BTreeMap, sync::Arc};

const LOCAL_NODE_CACHE_CAPACITY: usize = 128;

/// Caller-visible configuration of an IO context
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Options {
    /// Treat CRC / size / back-pointer mismatches on blocks as fatal
    /// instead of flag-only
    pub strict_validation: bool,

    /// Disable the table-signature forced-decryption heuristic
    pub ignore_force_decryption: bool,
}

/// The recovered counterparts of the two global indexes
///
/// Distinct instances from the live trees; populated only by
/// [`PffFile::recover`]. A single identifier may carry multiple candidate
/// values, kept in the order they were salvaged.
#[derive(Debug, Default)]
pub(crate) struct RecoveredIndex {
    pub descriptors: BTreeMap<u32, Vec<DescriptorIndexValue>>,
    pub offsets: BTreeMap<u64, Vec<OffsetIndexValue>>,
    pub fragments: Vec<OffsetIndexValue>,
}

impl RecoveredIndex {
    pub fn offset_value(&self, identifier: u64, value_index: usize) -> Option<OffsetIndexValue> {
        self.offsets
            .get(&(identifier & !0x1F))
            .and_then(|values| values.get(value_index))
            .copied()
    }
}

/// An opened PFF container: the byte source, the parsed header, the two
/// global index trees and their caches
///
/// All state is per-context. A caller that wants parallelism opens an
/// independent context per thread; nothing is shared.
pub struct PffFile<S: ByteSource> {
    pub(crate) source: S,
    header: FileHeader,
    pub(crate) descriptor_index: IndexTree,
    pub(crate) offset_index: IndexTree,
    pub(crate) node_cache: NodeCache,
    local_node_cache:
        QuickCache<u64, Arc<LocalDescriptorNode>, UnitWeighter, rustc_hash::FxBuildHasher>,
    pub(crate) recovered: RecoveredIndex,
    pub(crate) force_decryption: bool,
    options: Options,
}

impl<S: ByteSource> PffFile<S> {
    /// Opens a container with default options.
    pub fn open(source: S) -> crate::Result<Self> {
        Self::open_with_options(source, Options::default())
    }

    /// Opens a container.
    ///
    /// Reads and validates the file header and seeds the two global index
    /// trees from its root pointers.
    pub fn open_with_options(mut source: S, options: Options) -> crate::Result<Self> {
        let data = source.read_at(0, FILE_HEADER_SIZE)?;
        let header = FileHeader::from_bytes(&data)?;

        let descriptor_index = IndexTree::new(
            IndexKind::Descriptor,
            header.variant,
            header.descriptor_index_root_offset,
            header.descriptor_index_back_pointer,
        );
        let offset_index = IndexTree::new(
            IndexKind::Offset,
            header.variant,
            header.offset_index_root_offset,
            header.offset_index_back_pointer,
        );

        use quick_cache::sync::DefaultLifecycle;

        #[allow(clippy::default_trait_access)]
        let local_node_cache = QuickCache::with(
            LOCAL_NODE_CACHE_CAPACITY,
            LOCAL_NODE_CACHE_CAPACITY as u64,
            UnitWeighter,
            Default::default(),
            DefaultLifecycle::default(),
        );

        Ok(Self {
            source,
            header,
            descriptor_index,
            offset_index,
            node_cache: NodeCache::new(),
            local_node_cache,
            recovered: RecoveredIndex::default(),
            force_decryption: false,
            options,
        })
    }

    /// The 32-bit or 64-bit flavor of the file.
    #[must_use]
    pub fn variant(&self) -> Variant {
        self.header.variant
    }

    /// PAB, PST or OST.
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.header.content_type
    }

    /// The declared block encoding scheme.
    #[must_use]
    pub fn encryption_type(&self) -> EncryptionType {
        self.header.encryption_type
    }

    /// Total file size according to the header.
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.header.file_size
    }

    /// Whether the header marks the allocation tables as valid.
    #[must_use]
    pub fn allocation_table_valid(&self) -> bool {
        self.header.allocation_table_valid
    }

    pub(crate) fn read_options(&self) -> ReadOptions {
        ReadOptions {
            strict_validation: self.options.strict_validation,
            ignore_force_decryption: self.options.ignore_force_decryption,
        }
    }

    /// Data blocks found by the fragment sweep of the last recovery run.
    #[must_use]
    pub fn recovered_fragments(&self) -> &[OffsetIndexValue] {
        &self.recovered.fragments
    }

    /// Looks up a descriptor in the live index.
    pub fn get_descriptor(&mut self, identifier: u32) -> crate::Result<Descriptor> {
        let value = self
            .descriptor_index
            .lookup_descriptor(&mut self.source, &self.node_cache, identifier)?
            .ok_or(Error::MissingDescriptor(u64::from(identifier)))?;

        Ok(Descriptor::from_index_value(value, false, 0))
    }

    /// Looks up a salvaged descriptor by identifier and candidate index.
    ///
    /// Only meaningful after [`PffFile::recover`] has run.
    pub fn get_recovered_descriptor(
        &mut self,
        identifier: u32,
        value_index: usize,
    ) -> crate::Result<Descriptor> {
        let value = self
            .recovered
            .descriptors
            .get(&identifier)
            .and_then(|values| values.get(value_index))
            .copied()
            .ok_or(Error::MissingDescriptor(u64::from(identifier)))?;

        Ok(Descriptor::from_index_value(value, true, value_index))
    }

    /// Enumerates every live descriptor, in identifier order.
    pub fn descriptors(&mut self) -> crate::Result<Vec<Descriptor>> {
        let values = self
            .descriptor_index
            .descriptor_leaves(&mut self.source, &self.node_cache)?;

        Ok(values
            .into_iter()
            .map(|value| Descriptor::from_index_value(value, false, 0))
            .collect())
    }

    /// Number of salvaged candidates for a recovered descriptor identifier.
    #[must_use]
    pub fn recovered_descriptor_candidates(&self, identifier: u32) -> usize {
        self.recovered
            .descriptors
            .get(&identifier)
            .map_or(0, Vec::len)
    }

    pub(crate) fn lookup_offset_value(
        &mut self,
        identifier: u64,
        recovered: bool,
        value_index: usize,
    ) -> crate::Result<OffsetIndexValue> {
        if recovered {
            if let Some(value) = self.recovered.offset_value(identifier, value_index) {
                return Ok(value);
            }
        }

        self.offset_index
            .lookup_offset(&mut self.source, &self.node_cache, identifier)?
            .ok_or(Error::MissingDescriptor(identifier))
    }

    /// Reads and decrypts the user bytes of one segment.
    pub(crate) fn segment_data(
        &mut self,
        segment: &Segment,
        descriptor_identifier: u32,
    ) -> crate::Result<Slice> {
        self.segment_data_with(segment, descriptor_identifier, self.read_options())
    }

    pub(crate) fn segment_data_with(
        &mut self,
        segment: &Segment,
        descriptor_identifier: u32,
        read_options: ReadOptions,
    ) -> crate::Result<Slice> {
        let (mut flags, mut data) = read_block(
            &mut self.source,
            self.header.variant,
            segment.file_offset,
            segment.data_size,
            segment.block_id,
            read_options.strict_validation,
        )?;

        decrypt_block_data(
            self.header.encryption_type,
            &mut self.force_decryption,
            descriptor_identifier,
            segment.block_id,
            &mut data,
            read_options,
            &mut flags,
        )?;

        Ok(Slice::from(data))
    }

    /// Resolves a data identifier to the ordered physical extents of its
    /// logical stream, splicing data arrays.
    pub(crate) fn resolve_data_segments(
        &mut self,
        data_identifier: u64,
        recovered: bool,
        value_index: usize,
    ) -> crate::Result<Vec<Segment>> {
        let offset_value = self.lookup_offset_value(data_identifier, recovered, value_index)?;
        let block_id = BlockId::new(data_identifier);

        let segment = Segment {
            block_id: BlockId::new(offset_value.identifier),
            file_offset: offset_value.file_offset,
            data_size: offset_value.data_size,
        };

        if !block_id.is_internal() {
            return Ok(vec![segment]);
        }

        // an internal payload may be a tree of blocks
        let (_, payload) = read_block(
            &mut self.source,
            self.header.variant,
            segment.file_offset,
            segment.data_size,
            segment.block_id,
            self.options.strict_validation,
        )?;

        if !is_data_array(&payload) {
            return Ok(vec![segment]);
        }

        let mut segments = Vec::new();
        self.splice_data_array(&payload, recovered, value_index, 0, &mut segments)?;

        let total: u64 = segments.iter().map(|s| u64::from(s.data_size)).sum();
        let declared = DataArray::from_bytes(&payload, self.header.variant)?.total_size;
        if total != u64::from(declared) {
            return Err(Error::CorruptInput("data array size sum"));
        }

        Ok(segments)
    }

    fn splice_data_array(
        &mut self,
        payload: &[u8],
        recovered: bool,
        value_index: usize,
        depth: usize,
        segments: &mut Vec<Segment>,
    ) -> crate::Result<()> {
        if depth > 16 {
            return Err(Error::CorruptInput("data array recursion depth"));
        }

        let array = DataArray::from_bytes(payload, self.header.variant)?;

        for entry in &array.entries {
            let offset_value = self.lookup_offset_value(*entry, recovered, value_index)?;

            if array.level == 1 {
                segments.push(Segment {
                    block_id: BlockId::new(offset_value.identifier),
                    file_offset: offset_value.file_offset,
                    data_size: offset_value.data_size,
                });
            } else {
                let (_, child) = read_block(
                    &mut self.source,
                    self.header.variant,
                    offset_value.file_offset,
                    offset_value.data_size,
                    BlockId::new(offset_value.identifier),
                    self.options.strict_validation,
                )?;

                self.splice_data_array(&child, recovered, value_index, depth + 1, segments)?;
            }
        }

        Ok(())
    }

    /// Opens the logical data stream of a descriptor.
    pub fn open_data(&mut self, descriptor: &Descriptor) -> crate::Result<DataStream> {
        if descriptor.data_identifier == 0 {
            return Err(Error::MissingDescriptor(u64::from(descriptor.identifier)));
        }

        let segments = self.resolve_data_segments(
            descriptor.data_identifier,
            descriptor.is_recovered(),
            descriptor.recovered_value_index(),
        )?;

        Ok(DataStream::new(
            descriptor.identifier,
            DataRef::Blocks(segments),
        ))
    }

    /// Opens the sub-stream behind a local descriptor value.
    pub fn open_local_data(
        &mut self,
        value: &crate::local_descriptors::LocalDescriptorValue,
        recovered: bool,
    ) -> crate::Result<DataStream> {
        let segments = self.resolve_data_segments(value.data_identifier, recovered, 0)?;

        Ok(DataStream::new(
            value.identifier as u32,
            DataRef::Blocks(segments),
        ))
    }

    /// Opens the local descriptors tree of a descriptor, if it has one.
    pub fn local_descriptors_tree(
        &mut self,
        descriptor: &Descriptor,
    ) -> crate::Result<Option<LocalDescriptorsTree>> {
        if descriptor.local_descriptors_identifier == 0 {
            return Ok(None);
        }

        Ok(Some(LocalDescriptorsTree::new(
            descriptor.local_descriptors_identifier,
            descriptor.is_recovered(),
        )))
    }

    /// Reads one local descriptor node through the per-context cache.
    pub(crate) fn local_descriptor_node(
        &mut self,
        block_identifier: u64,
        recovered: bool,
    ) -> crate::Result<Arc<LocalDescriptorNode>> {
        let cache_key = BlockId::new(block_identifier).lookup_key();

        if let Some(node) = self.local_node_cache.get(&cache_key) {
            return Ok(node);
        }

        let offset_value = self.lookup_offset_value(block_identifier, recovered, 0)?;

        let (_, payload) = read_block(
            &mut self.source,
            self.header.variant,
            offset_value.file_offset,
            offset_value.data_size,
            BlockId::new(offset_value.identifier),
            self.options.strict_validation,
        )?;

        let node = Arc::new(LocalDescriptorNode::from_bytes(
            &payload,
            self.header.variant,
        )?);
        self.local_node_cache.insert(cache_key, node.clone());

        Ok(node)
    }

    /// Interprets a descriptor's data stream as a table.
    pub fn open_table(&mut self, descriptor: &Descriptor) -> crate::Result<Table> {
        Table::read(self, descriptor, None)
    }

    /// Like [`PffFile::open_table`], consulting a name-to-id map for
    /// named-property lookups.
    pub fn open_table_with_names(
        &mut self,
        descriptor: &Descriptor,
        name_map: &dyn NameToIdMap,
    ) -> crate::Result<Table> {
        Table::read(self, descriptor, Some(name_map))
    }

    /// Scans for salvageable descriptors and blocks.
    ///
    /// Recovery is additive: it fills the recovered index trees and never
    /// touches answers served from the live indexes. Returns the number of
    /// newly recovered descriptors.
    pub fn recover(&mut self, flags: RecoveryFlags) -> crate::Result<usize> {
        recovery::recover_items(self, flags)
    }

    /// Free extents according to the data allocation tables.
    pub(crate) fn unallocated_data_blocks(&mut self) -> crate::Result<Vec<FreeExtent>> {
        self.unallocated_blocks(AllocationTableType::Data)
    }

    /// Free extents according to the page allocation tables.
    pub(crate) fn unallocated_page_blocks(&mut self) -> crate::Result<Vec<FreeExtent>> {
        self.unallocated_blocks(AllocationTableType::Page)
    }

    fn unallocated_blocks(
        &mut self,
        table_type: AllocationTableType,
    ) -> crate::Result<Vec<FreeExtent>> {
        let mut extents = Vec::new();
        let mut table_offset = table_type.first_table_offset();

        while table_offset < self.header.file_size {
            if let Err(error) = read_allocation_table(
                &mut self.source,
                self.header.variant,
                table_offset,
                table_type,
                &mut extents,
            ) {
                // a broken allocation page does not fail the scan
                log::warn!("skipping allocation table at {table_offset:#x}: {error}");
            }

            table_offset += table_type.coverage();
        }

        Ok(extents)
    }
}
