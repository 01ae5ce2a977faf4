// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Salvaging deleted descriptors and orphaned blocks.
//!
//! Recovery feeds on two sources: tombstone entries still readable in the
//! live index leaves, and unallocated regions of the file that may hold
//! abandoned index pages or data blocks. Everything salvaged lands in the
//! recovered index trees; the live indexes are never touched, so answers
//! for live identifiers do not change.

use crate::{
    allocation::FreeExtent,
    block::{footer::BlockFooter, read_block, BlockFlags},
    checksum::WeakCrc32,
    context::PffFile,
    ids::BlockId,
    index::{node::IndexNode, DescriptorIndexValue, NodeEntries, OffsetIndexValue},
    local_descriptors::LocalDescriptorsTree,
    source::ByteSource,
    variant::{block_envelope_size, Variant, BLOCK_ALIGNMENT, INDEX_NODE_SIZE},
};

/// Caller-provided switches for a recovery scan
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RecoveryFlags {
    /// Scan the entire file instead of only unallocated extents
    pub ignore_allocation_data: bool,

    /// Include the 64-byte-aligned sweep for stray data blocks
    pub scan_for_fragments: bool,
}

const PAGE_ALIGNMENT: u64 = INDEX_NODE_SIZE as u64;

pub(crate) fn recover_items<S: ByteSource>(
    file: &mut PffFile<S>,
    flags: RecoveryFlags,
) -> crate::Result<usize> {
    let file_size = file.file_size();

    // unallocated extents; a file with invalid allocation tables is
    // scanned whole, as if the caller had asked for it
    let (data_extents, scan_whole_file) =
        if flags.ignore_allocation_data || !file.allocation_table_valid() {
            let whole = vec![FreeExtent {
                file_offset: 0,
                size: file_size,
            }];
            (whole, true)
        } else {
            (file.unallocated_data_blocks()?, false)
        };

    let mut page_extents = if scan_whole_file {
        Vec::new()
    } else {
        file.unallocated_page_blocks()?
    };

    // index pages may sit in either list; scan the union once
    let mut scan_extents = data_extents.clone();
    scan_extents.append(&mut page_extents);
    let nodes = scan_index_pages(file, &scan_extents)?;

    // offset values first, so descriptor candidates can resolve through
    // what this very scan salvages
    recover_offset_values(file, &nodes)?;

    let recovered = recover_descriptors(file, &nodes)?;

    if flags.scan_for_fragments {
        recover_data_fragments(file, &data_extents)?;
    }

    log::debug!("recovery: {recovered} descriptor(s) salvaged");
    Ok(recovered)
}

/// Parses every 512-aligned position of the extents as an index page and
/// returns those that parse cleanly.
fn scan_index_pages<S: ByteSource>(
    file: &mut PffFile<S>,
    extents: &[FreeExtent],
) -> crate::Result<Vec<IndexNode>> {
    let variant = file.variant();
    let file_size = file.file_size();
    let mut nodes = Vec::new();

    for extent in extents {
        let mut offset = extent.file_offset.next_multiple_of(PAGE_ALIGNMENT);
        let end = (extent.file_offset + extent.size).min(file_size);

        while offset + PAGE_ALIGNMENT <= end {
            match file.source.read_at(offset, INDEX_NODE_SIZE) {
                Ok(data) => {
                    if let Ok(node) = IndexNode::from_bytes(&data, variant) {
                        log::trace!("recovery: index page candidate at {offset:#x}");
                        nodes.push(node);
                    }
                }
                Err(error) => {
                    // scans never fail over one unreadable candidate
                    log::trace!("recovery: cannot read page at {offset:#x}: {error}");
                }
            }

            offset += PAGE_ALIGNMENT;
        }
    }

    Ok(nodes)
}

fn recover_offset_values<S: ByteSource>(
    file: &mut PffFile<S>,
    scanned_nodes: &[IndexNode],
) -> crate::Result<()> {
    let mut candidates: Vec<OffsetIndexValue> = Vec::new();

    // tombstones of the live offset index
    candidates.extend(
        file.offset_index
            .deleted_offset_leaves(&mut file.source, &file.node_cache)?,
    );

    // leaf entries of abandoned offset index pages
    for node in scanned_nodes {
        for entries in [&node.entries, &node.deleted_entries] {
            if let NodeEntries::Offset(values) = entries {
                candidates.extend(values.iter().filter(|v| v.identifier != 0));
            }
        }
    }

    for candidate in candidates {
        insert_offset_candidate(file, candidate)?;
    }

    Ok(())
}

fn insert_offset_candidate<S: ByteSource>(
    file: &mut PffFile<S>,
    candidate: OffsetIndexValue,
) -> crate::Result<bool> {
    if candidate.file_offset == 0 || candidate.data_size == 0 {
        return Ok(false);
    }

    // live identifiers keep their live answers
    if file
        .offset_index
        .lookup_offset(&mut file.source, &file.node_cache, candidate.identifier)?
        .is_some()
    {
        return Ok(false);
    }

    let values = file
        .recovered
        .offsets
        .entry(candidate.identifier & !0x1F)
        .or_default();

    if values.iter().any(|existing| *existing == candidate) {
        return Ok(false);
    }

    log::trace!(
        "recovery: offset value {:#x} at {:#x}",
        candidate.identifier,
        candidate.file_offset,
    );
    values.push(candidate);

    Ok(true)
}

fn recover_descriptors<S: ByteSource>(
    file: &mut PffFile<S>,
    scanned_nodes: &[IndexNode],
) -> crate::Result<usize> {
    let mut candidates: Vec<DescriptorIndexValue> = Vec::new();

    // tombstones of the live descriptor index
    candidates.extend(
        file.descriptor_index
            .deleted_descriptor_leaves(&mut file.source, &file.node_cache)?,
    );

    // leaf entries of abandoned descriptor index pages
    for node in scanned_nodes {
        for entries in [&node.entries, &node.deleted_entries] {
            if let NodeEntries::Descriptor(values) = entries {
                candidates.extend(values.iter().filter(|v| v.identifier != 0));
            }
        }
    }

    let mut recovered = 0usize;

    for candidate in candidates {
        if candidate.data_identifier == 0 {
            continue;
        }

        // suppress duplicates against the live index
        if file
            .descriptor_index
            .lookup_descriptor(&mut file.source, &file.node_cache, candidate.identifier)?
            .is_some()
        {
            continue;
        }

        // and against what was already recovered
        if file
            .recovered
            .descriptors
            .get(&candidate.identifier)
            .is_some_and(|values| values.contains(&candidate))
        {
            continue;
        }

        if !descriptor_candidate_is_readable(file, &candidate) {
            log::trace!(
                "recovery: descriptor {:#x} candidate does not read cleanly",
                candidate.identifier,
            );
            continue;
        }

        log::debug!("recovery: descriptor {:#x} salvaged", candidate.identifier);
        file.recovered
            .descriptors
            .entry(candidate.identifier)
            .or_default()
            .push(candidate);
        recovered += 1;
    }

    Ok(recovered)
}

/// A candidate survives only if its data block still reads without a CRC
/// failure and its local descriptors tree (if any) walks to leaves cleanly.
fn descriptor_candidate_is_readable<S: ByteSource>(
    file: &mut PffFile<S>,
    candidate: &DescriptorIndexValue,
) -> bool {
    let variant = file.variant();

    let Ok(offset_value) = file.lookup_offset_value(candidate.data_identifier, true, 0) else {
        return false;
    };

    let block = read_block(
        &mut file.source,
        variant,
        offset_value.file_offset,
        offset_value.data_size,
        BlockId::new(offset_value.identifier),
        false,
    );

    match block {
        Ok((flags, _)) if !flags.contains(BlockFlags::CRC_MISMATCH) => {}
        _ => return false,
    }

    if candidate.local_descriptors_identifier != 0 {
        let tree = LocalDescriptorsTree::new(candidate.local_descriptors_identifier, true);
        if tree.leaves(file).is_err() {
            return false;
        }
    }

    true
}

/// The 64-byte-aligned sweep: tests every alignment unit of the extents as
/// the potential end of a data block by parsing a footer out of its tail.
fn recover_data_fragments<S: ByteSource>(
    file: &mut PffFile<S>,
    extents: &[FreeExtent],
) -> crate::Result<()> {
    let variant = file.variant();
    let footer_size = variant.block_footer_size();
    let file_size = file.file_size();

    for extent in extents {
        let mut offset = extent.file_offset.next_multiple_of(BLOCK_ALIGNMENT);
        let end = (extent.file_offset + extent.size).min(file_size);

        while offset + BLOCK_ALIGNMENT <= end {
            let unit_end = offset + BLOCK_ALIGNMENT;

            if let Some(candidate) = try_read_fragment(file, variant, footer_size, unit_end) {
                if insert_offset_candidate(file, candidate)? {
                    log::debug!(
                        "recovery: data block fragment {:#x} at {:#x}",
                        candidate.identifier,
                        candidate.file_offset,
                    );
                    file.recovered.fragments.push(candidate);
                }
            }

            offset += BLOCK_ALIGNMENT;
        }
    }

    Ok(())
}

fn try_read_fragment<S: ByteSource>(
    file: &mut PffFile<S>,
    variant: Variant,
    footer_size: usize,
    unit_end: u64,
) -> Option<OffsetIndexValue> {
    let footer_offset = unit_end - footer_size as u64;
    let footer_data = file.source.read_at(footer_offset, footer_size).ok()?;
    let footer = BlockFooter::from_bytes(&footer_data, variant).ok()?;

    if footer.back_pointer == 0 || footer.data_size == 0 {
        return None;
    }
    if variant == Variant::Bit32 && footer.back_pointer > u64::from(u32::MAX) {
        return None;
    }

    let envelope = block_envelope_size(variant, u32::from(footer.data_size));
    let block_offset = unit_end.checked_sub(envelope)?;

    let payload = file
        .source
        .read_at(block_offset, usize::from(footer.data_size))
        .ok()?;

    if footer.crc == 0 || WeakCrc32::from_bytes(&payload).into_u32() != footer.crc {
        return None;
    }

    Some(OffsetIndexValue {
        identifier: footer.back_pointer,
        file_offset: block_offset,
        data_size: u32::from(footer.data_size),
        reference_count: 0,
    })
}
