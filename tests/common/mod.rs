// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Synthesizes PFF container images in memory.
//!
//! The builder lays out data blocks, index pages and the file header the
//! way the on-disk format demands, so integration tests can exercise the
//! whole read path end to end.

#![allow(dead_code)]

use pff_reader::{encryption, EncryptionType, Variant, WeakCrc32};

pub const HEADER_SIZE: usize = 564;
pub const BLOCK_AREA_START: u64 = 0x4800;

fn block_signature(file_offset: u64, block_id: u64) -> u16 {
    let mixed = file_offset ^ block_id;
    ((mixed >> 16) as u16) ^ (mixed as u16)
}

fn footer_size(variant: Variant) -> usize {
    match variant {
        Variant::Bit32 => 12,
        Variant::Bit64 => 16,
    }
}

fn envelope_size(variant: Variant, data_size: usize) -> usize {
    (data_size + footer_size(variant)).div_ceil(64) * 64
}

#[derive(Clone)]
struct BlockSpec {
    id: u64,
    payload: Vec<u8>,
    cipher: EncryptionType,
    corrupt_crc: bool,
}

#[derive(Clone, Copy)]
pub struct DescriptorSpec {
    pub identifier: u32,
    pub data_identifier: u64,
    pub local_descriptors_identifier: u64,
    pub parent_identifier: u32,
}

/// Builds one container image
pub struct PffBuilder {
    variant: Variant,
    content_type: [u8; 2],
    declared_encryption: u8,
    default_cipher: EncryptionType,
    blocks: Vec<BlockSpec>,
    descriptors: Vec<DescriptorSpec>,
    deleted_descriptors: Vec<DescriptorSpec>,
    deleted_blocks: Vec<BlockSpec>,
    orphan_blocks: Vec<BlockSpec>,
    allocation_maps: bool,
}

impl PffBuilder {
    pub fn new(variant: Variant) -> Self {
        Self {
            variant,
            content_type: *b"SM",
            declared_encryption: 0x00,
            default_cipher: EncryptionType::None,
            blocks: Vec::new(),
            descriptors: Vec::new(),
            deleted_descriptors: Vec::new(),
            deleted_blocks: Vec::new(),
            orphan_blocks: Vec::new(),
            allocation_maps: false,
        }
    }

    /// Writes real allocation tables marking deleted and orphan blocks as
    /// free, and flags them valid in the header.
    pub fn with_allocation_maps(mut self) -> Self {
        self.allocation_maps = true;
        self
    }

    pub fn content_type(mut self, content_type: [u8; 2]) -> Self {
        self.content_type = content_type;
        self
    }

    /// Sets both the header encryption byte and the cipher actually
    /// applied to external blocks.
    pub fn encryption(mut self, encryption: EncryptionType) -> Self {
        self.declared_encryption = u8::from(encryption);
        self.default_cipher = encryption;
        self
    }

    /// Declares one scheme in the header while storing external blocks
    /// under another; used for the forced-decryption scenarios.
    pub fn mismatched_encryption(
        mut self,
        declared: EncryptionType,
        actual: EncryptionType,
    ) -> Self {
        self.declared_encryption = u8::from(declared);
        self.default_cipher = actual;
        self
    }

    /// Adds a data block. Whether it is stored encrypted follows the
    /// builder cipher and the identifier's internal flag.
    pub fn block(mut self, id: u64, payload: Vec<u8>) -> Self {
        let cipher = if id & 0x02 != 0 {
            EncryptionType::None
        } else {
            self.default_cipher
        };

        self.blocks.push(BlockSpec {
            id,
            payload,
            cipher,
            corrupt_crc: false,
        });
        self
    }

    /// Adds a live block stored exactly as given, regardless of the
    /// builder cipher.
    pub fn raw_block(mut self, id: u64, payload: Vec<u8>) -> Self {
        self.blocks.push(BlockSpec {
            id,
            payload,
            cipher: EncryptionType::None,
            corrupt_crc: false,
        });
        self
    }

    /// Adds a block whose stored CRC is wrong.
    pub fn corrupt_block(mut self, id: u64, payload: Vec<u8>) -> Self {
        self.blocks.push(BlockSpec {
            id,
            payload,
            cipher: EncryptionType::None,
            corrupt_crc: true,
        });
        self
    }

    /// Adds a block that is only reachable through offset-index
    /// tombstones (it is written to the file and listed as deleted).
    pub fn deleted_block(mut self, id: u64, payload: Vec<u8>) -> Self {
        let cipher = if id & 0x02 != 0 {
            EncryptionType::None
        } else {
            self.default_cipher
        };

        self.deleted_blocks.push(BlockSpec {
            id,
            payload,
            cipher,
            corrupt_crc: false,
        });
        self
    }

    /// Adds a block that is written to the file but listed nowhere; only
    /// the fragment sweep can find it.
    pub fn orphan_block(mut self, id: u64, payload: Vec<u8>) -> Self {
        self.orphan_blocks.push(BlockSpec {
            id,
            payload,
            cipher: EncryptionType::None,
            corrupt_crc: false,
        });
        self
    }

    pub fn descriptor(mut self, spec: DescriptorSpec) -> Self {
        self.descriptors.push(spec);
        self
    }

    /// Adds a descriptor only present as a tombstone in its leaf page.
    pub fn deleted_descriptor(mut self, spec: DescriptorSpec) -> Self {
        self.deleted_descriptors.push(spec);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let variant = self.variant;

        // block placement, 64-aligned
        let mut image = vec![0u8; BLOCK_AREA_START as usize];
        let mut offsets: Vec<(u64, u64, usize)> = Vec::new(); // (id, offset, size)

        let write_block = |image: &mut Vec<u8>, spec: &BlockSpec| -> (u64, u64, usize) {
            let offset = image.len() as u64;
            let mut stored = spec.payload.clone();
            encryption::encrypt(spec.cipher, spec.id as u32, &mut stored);

            let mut crc = WeakCrc32::from_bytes(&stored).into_u32();
            if spec.corrupt_crc {
                crc ^= 0xDEAD_BEEF;
            }

            let envelope = envelope_size(variant, stored.len());
            let mut bytes = vec![0u8; envelope];
            bytes[..stored.len()].copy_from_slice(&stored);

            let footer = &mut bytes[envelope - footer_size(variant)..];
            footer[0..2].copy_from_slice(&(stored.len() as u16).to_le_bytes());
            footer[2..4].copy_from_slice(&block_signature(offset, spec.id).to_le_bytes());
            match variant {
                Variant::Bit32 => {
                    footer[4..8].copy_from_slice(&(spec.id as u32).to_le_bytes());
                    footer[8..12].copy_from_slice(&crc.to_le_bytes());
                }
                Variant::Bit64 => {
                    footer[4..8].copy_from_slice(&crc.to_le_bytes());
                    footer[8..16].copy_from_slice(&spec.id.to_le_bytes());
                }
            }

            image.extend_from_slice(&bytes);
            (spec.id, offset, spec.payload.len())
        };

        for spec in &self.blocks {
            let entry = write_block(&mut image, spec);
            offsets.push(entry);
        }

        let mut free_extents: Vec<(u64, usize)> = Vec::new();

        let mut deleted_offsets: Vec<(u64, u64, usize)> = Vec::new();
        for spec in &self.deleted_blocks {
            let entry = write_block(&mut image, spec);
            free_extents.push((entry.1, envelope_size(variant, spec.payload.len())));
            deleted_offsets.push(entry);
        }

        for spec in &self.orphan_blocks {
            let entry = write_block(&mut image, spec);
            free_extents.push((entry.1, envelope_size(variant, spec.payload.len())));
        }

        // index pages, 512-aligned
        while image.len() % 512 != 0 {
            image.push(0);
        }

        let offset_root_back = 0x0BBB;
        let descriptor_root_back = 0x0DDD;

        let offset_root_offset = image.len() as u64;
        image.extend_from_slice(&build_offset_leaf(
            variant,
            offset_root_back,
            offset_root_offset,
            &offsets,
            &deleted_offsets,
        ));

        let descriptor_root_offset = image.len() as u64;
        image.extend_from_slice(&build_descriptor_leaf(
            variant,
            descriptor_root_back,
            descriptor_root_offset,
            &self.descriptors,
            &self.deleted_descriptors,
        ));

        let file_size = image.len() as u64;

        if self.allocation_maps {
            write_allocation_maps(&mut image, variant, &free_extents);
        }

        write_header(
            &mut image,
            variant,
            self.content_type,
            self.declared_encryption,
            file_size,
            descriptor_root_offset,
            descriptor_root_back,
            offset_root_offset,
            offset_root_back,
        );

        if self.allocation_maps {
            mark_allocation_valid(&mut image, variant);
        }

        image
    }
}

fn write_allocation_maps(image: &mut [u8], variant: Variant, free_extents: &[(u64, usize)]) {
    // one data map at 0x4400 covers the whole (small) fixture file;
    // everything is allocated except the listed extents
    let mut bitmap = [0xFFu8; 496];

    for (offset, size) in free_extents {
        let first_unit = (offset - 0x4400) / 64;
        let unit_count = size.div_ceil(64) as u64;

        for unit in first_unit..first_unit + unit_count {
            bitmap[(unit / 8) as usize] &= !(0x80 >> (unit % 8));
        }
    }

    write_allocation_page(image, variant, 0x4400, 0x84, &bitmap, 0x4400);

    // the page map marks every page allocated
    write_allocation_page(image, variant, 0x4600, 0x83, &[0xFFu8; 496], 0x4600);
}

fn write_allocation_page(
    image: &mut [u8],
    variant: Variant,
    page_offset: usize,
    page_type: u8,
    bitmap: &[u8; 496],
    back_pointer: u64,
) {
    let page = &mut image[page_offset..page_offset + 512];
    page[..496].copy_from_slice(bitmap);
    page[496] = page_type;
    page[497] = page_type;

    let crc = WeakCrc32::from_bytes(bitmap).into_u32();
    match variant {
        Variant::Bit32 => {
            page[500..504].copy_from_slice(&(back_pointer as u32).to_le_bytes());
            page[504..508].copy_from_slice(&crc.to_le_bytes());
        }
        Variant::Bit64 => {
            page[500..504].copy_from_slice(&crc.to_le_bytes());
            page[504..512].copy_from_slice(&back_pointer.to_le_bytes());
        }
    }
}

fn mark_allocation_valid(image: &mut [u8], variant: Variant) {
    let validity_offset = match variant {
        Variant::Bit32 => 200,
        Variant::Bit64 => 248,
    };
    image[validity_offset] = 1;

    // the validity byte sits inside the header CRC spans
    let crc = WeakCrc32::from_bytes(&image[8..479]).into_u32();
    image[4..8].copy_from_slice(&crc.to_le_bytes());

    if variant == Variant::Bit64 {
        let crc = WeakCrc32::from_bytes(&image[8..524]).into_u32();
        image[524..528].copy_from_slice(&crc.to_le_bytes());
    }
}

fn build_offset_leaf(
    variant: Variant,
    back_pointer: u64,
    page_offset: u64,
    live: &[(u64, u64, usize)],
    deleted: &[(u64, u64, usize)],
) -> Vec<u8> {
    let entry_size = match variant {
        Variant::Bit32 => 12,
        Variant::Bit64 => 24,
    };

    let mut live = live.to_vec();
    live.sort_by_key(|(id, _, _)| *id);

    let mut entries = Vec::new();
    for (id, offset, size) in live.iter().chain(deleted) {
        match variant {
            Variant::Bit32 => {
                entries.extend_from_slice(&(*id as u32).to_le_bytes());
                entries.extend_from_slice(&(*offset as u32).to_le_bytes());
                entries.extend_from_slice(&(*size as u16).to_le_bytes());
                entries.extend_from_slice(&2u16.to_le_bytes());
            }
            Variant::Bit64 => {
                entries.extend_from_slice(&id.to_le_bytes());
                entries.extend_from_slice(&offset.to_le_bytes());
                entries.extend_from_slice(&(*size as u16).to_le_bytes());
                entries.extend_from_slice(&2u16.to_le_bytes());
                entries.extend_from_slice(&[0u8; 4]);
            }
        }
    }

    build_index_page(
        variant,
        0x80,
        back_pointer,
        page_offset,
        &entries,
        live.len(),
        live.len() + deleted.len(),
        entry_size,
    )
}

fn build_descriptor_leaf(
    variant: Variant,
    back_pointer: u64,
    page_offset: u64,
    live: &[DescriptorSpec],
    deleted: &[DescriptorSpec],
) -> Vec<u8> {
    let entry_size = match variant {
        Variant::Bit32 => 16,
        Variant::Bit64 => 32,
    };

    let mut live = live.to_vec();
    live.sort_by_key(|spec| spec.identifier);

    let mut entries = Vec::new();
    for spec in live.iter().chain(deleted) {
        match variant {
            Variant::Bit32 => {
                entries.extend_from_slice(&spec.identifier.to_le_bytes());
                entries.extend_from_slice(&(spec.data_identifier as u32).to_le_bytes());
                entries
                    .extend_from_slice(&(spec.local_descriptors_identifier as u32).to_le_bytes());
                entries.extend_from_slice(&spec.parent_identifier.to_le_bytes());
            }
            Variant::Bit64 => {
                entries.extend_from_slice(&u64::from(spec.identifier).to_le_bytes());
                entries.extend_from_slice(&spec.data_identifier.to_le_bytes());
                entries.extend_from_slice(&spec.local_descriptors_identifier.to_le_bytes());
                entries.extend_from_slice(&spec.parent_identifier.to_le_bytes());
                entries.extend_from_slice(&[0u8; 4]);
            }
        }
    }

    build_index_page(
        variant,
        0x81,
        back_pointer,
        page_offset,
        &entries,
        live.len(),
        live.len() + deleted.len(),
        entry_size,
    )
}

#[allow(clippy::too_many_arguments)]
fn build_index_page(
    variant: Variant,
    page_type: u8,
    back_pointer: u64,
    page_offset: u64,
    entries: &[u8],
    live_count: usize,
    total_count: usize,
    entry_size: usize,
) -> Vec<u8> {
    let mut page = vec![0u8; 512];
    page[..entries.len()].copy_from_slice(entries);

    let counts_offset = match variant {
        Variant::Bit32 => 496,
        Variant::Bit64 => 488,
    };

    page[counts_offset] = live_count as u8;
    page[counts_offset + 1] = total_count as u8;
    page[counts_offset + 2] = entry_size as u8;
    page[counts_offset + 3] = 0; // leaf

    match variant {
        Variant::Bit32 => {
            page[500] = page_type;
            page[501] = page_type;
            page[502..504]
                .copy_from_slice(&block_signature(page_offset, back_pointer).to_le_bytes());
            page[504..508].copy_from_slice(&(back_pointer as u32).to_le_bytes());
            let crc = WeakCrc32::from_bytes(&page[..500]).into_u32();
            page[508..512].copy_from_slice(&crc.to_le_bytes());
        }
        Variant::Bit64 => {
            page[496] = page_type;
            page[497] = page_type;
            page[498..500]
                .copy_from_slice(&block_signature(page_offset, back_pointer).to_le_bytes());
            let crc = WeakCrc32::from_bytes(&page[..496]).into_u32();
            page[500..504].copy_from_slice(&crc.to_le_bytes());
            page[504..512].copy_from_slice(&back_pointer.to_le_bytes());
        }
    }

    page
}

#[allow(clippy::too_many_arguments)]
fn write_header(
    image: &mut [u8],
    variant: Variant,
    content_type: [u8; 2],
    encryption: u8,
    file_size: u64,
    descriptor_root_offset: u64,
    descriptor_root_back: u64,
    offset_root_offset: u64,
    offset_root_back: u64,
) {
    image[0..4].copy_from_slice(&[0x21, 0x42, 0x44, 0x4E]);
    image[8..10].copy_from_slice(&content_type);

    let data_version: u16 = match variant {
        Variant::Bit32 => 0x000E,
        Variant::Bit64 => 0x0017,
    };
    image[10..12].copy_from_slice(&data_version.to_le_bytes());
    image[12..14].copy_from_slice(&19u16.to_le_bytes());
    image[14] = 0x01;
    image[15] = 0x01;

    match variant {
        Variant::Bit32 => {
            image[168..172].copy_from_slice(&(file_size as u32).to_le_bytes());
            image[184..188].copy_from_slice(&(descriptor_root_back as u32).to_le_bytes());
            image[188..192].copy_from_slice(&(descriptor_root_offset as u32).to_le_bytes());
            image[192..196].copy_from_slice(&(offset_root_back as u32).to_le_bytes());
            image[196..200].copy_from_slice(&(offset_root_offset as u32).to_le_bytes());
            image[200] = 0; // allocation tables not maintained
            image[460] = 0x80;
            image[461] = encryption;
        }
        Variant::Bit64 => {
            image[184..192].copy_from_slice(&file_size.to_le_bytes());
            image[216..224].copy_from_slice(&descriptor_root_back.to_le_bytes());
            image[224..232].copy_from_slice(&descriptor_root_offset.to_le_bytes());
            image[232..240].copy_from_slice(&offset_root_back.to_le_bytes());
            image[240..248].copy_from_slice(&offset_root_offset.to_le_bytes());
            image[248] = 0;
            image[512] = 0x80;
            image[513] = encryption;
        }
    }

    let crc = WeakCrc32::from_bytes(&image[8..479]).into_u32();
    image[4..8].copy_from_slice(&crc.to_le_bytes());

    if variant == Variant::Bit64 {
        let crc = WeakCrc32::from_bytes(&image[8..524]).into_u32();
        image[524..528].copy_from_slice(&crc.to_le_bytes());
    }
}

fn heap_segment_with_prefix(prefix: &[u8], cells: &[Vec<u8>]) -> Vec<u8> {
    let mut data = vec![0u8; 2];
    data.extend_from_slice(prefix);

    let mut boundaries = Vec::new();
    for cell in cells {
        boundaries.push(data.len() as u16);
        data.extend_from_slice(cell);
    }
    boundaries.push(data.len() as u16);

    let map_offset = data.len() as u16;
    data.extend_from_slice(&(cells.len() as u16).to_le_bytes());
    data.extend_from_slice(&0u16.to_le_bytes());
    for boundary in &boundaries {
        data.extend_from_slice(&boundary.to_le_bytes());
    }

    data[0..2].copy_from_slice(&map_offset.to_le_bytes());
    data
}

/// Builds a follow-on heap segment: cells plus the trailing page map, with
/// the first two bytes pointing at the map.
pub fn heap_segment(cells: &[Vec<u8>]) -> Vec<u8> {
    heap_segment_with_prefix(&[], cells)
}

/// Builds heap segment 0: the table container header
/// `(0xEC, table type, root reference)` followed by the cells, so cell 0
/// carries heap reference `0x20`.
pub fn table_first_segment(table_type: u8, root_reference: u32, cells: &[Vec<u8>]) -> Vec<u8> {
    let mut container = vec![0u8; 10];
    container[0] = 0xEC;
    container[1] = table_type;
    container[2..6].copy_from_slice(&root_reference.to_le_bytes());
    // bytes 6..10: fill levels

    heap_segment_with_prefix(&container, cells)
}

/// A `b5` header cell.
pub fn b5_cell(id_size: u8, value_size: u8, level: u8, entries_reference: u32) -> Vec<u8> {
    let mut cell = vec![0xB5, id_size, value_size, level];
    cell.extend_from_slice(&entries_reference.to_le_bytes());
    cell
}

/// A heap reference from segment and cell ordinals.
pub fn heap_ref(segment: u16, cell: u16) -> u32 {
    (u32::from(segment) << 16) | (u32::from(cell + 1) << 5)
}

/// A data-array payload over the given entry identifiers.
pub fn data_array_payload(variant: Variant, level: u8, total_size: u32, entries: &[u64]) -> Vec<u8> {
    let mut payload = vec![0x01, level];
    payload.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    payload.extend_from_slice(&total_size.to_le_bytes());

    for entry in entries {
        match variant {
            Variant::Bit32 => payload.extend_from_slice(&(*entry as u32).to_le_bytes()),
            Variant::Bit64 => payload.extend_from_slice(&entry.to_le_bytes()),
        }
    }

    payload
}

/// A local-descriptor leaf node payload.
pub fn local_descriptor_leaf(variant: Variant, entries: &[(u64, u64, u64)]) -> Vec<u8> {
    let mut payload = vec![0x02, 0x00];
    payload.extend_from_slice(&(entries.len() as u16).to_le_bytes());

    if variant == Variant::Bit64 {
        payload.extend_from_slice(&[0u8; 4]);
    }

    for (id, data_id, local_id) in entries {
        match variant {
            Variant::Bit32 => {
                payload.extend_from_slice(&(*id as u32).to_le_bytes());
                payload.extend_from_slice(&(*data_id as u32).to_le_bytes());
                payload.extend_from_slice(&(*local_id as u32).to_le_bytes());
            }
            Variant::Bit64 => {
                payload.extend_from_slice(&id.to_le_bytes());
                payload.extend_from_slice(&data_id.to_le_bytes());
                payload.extend_from_slice(&local_id.to_le_bytes());
            }
        }
    }

    payload
}

/// UTF-16LE bytes of an ASCII string.
pub fn utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect()
}

/// A minimal single-segment `7c` row table.
///
/// Columns are `(entry type, value type, row offset, width)`; column 0 must
/// be the 4-byte self identifier at offset 0. Rows are `(row id, row
/// bytes)`; `extra_cells` become cells 4+ (heap references `0xA0`, ...).
pub fn seven_c_table(
    columns: &[(u16, u16, u16, u8)],
    row_size: u16,
    rows: &[(u32, Vec<u8>)],
    extra_cells: &[Vec<u8>],
) -> Vec<u8> {
    // cell 0 (0x20): 7c header, cell 1 (0x40): b5 header,
    // cell 2 (0x60): row records, cell 3 (0x80): values array
    let mut header = vec![0x7C, columns.len() as u8];
    header.extend_from_slice(&row_size.to_le_bytes()); // 32-bit end offset
    header.extend_from_slice(&row_size.to_le_bytes()); // 16-bit end offset
    header.extend_from_slice(&row_size.to_le_bytes()); // 8-bit end offset
    header.extend_from_slice(&row_size.to_le_bytes()); // cell existence end
    header.extend_from_slice(&heap_ref(0, 1).to_le_bytes());
    header.extend_from_slice(&heap_ref(0, 3).to_le_bytes());
    header.extend_from_slice(&[0u8; 4]);

    for (number, (entry_type, value_type, offset, width)) in columns.iter().enumerate() {
        header.extend_from_slice(&entry_type.to_le_bytes());
        header.extend_from_slice(&value_type.to_le_bytes());
        header.extend_from_slice(&offset.to_le_bytes());
        header.push(*width);
        header.push(number as u8);
    }

    let b5 = b5_cell(4, 2, 0, heap_ref(0, 2));

    let mut records = Vec::new();
    let mut values = Vec::new();
    for (number, (row_id, row)) in rows.iter().enumerate() {
        assert_eq!(row_size as usize, row.len());
        assert_eq!(*row_id, u32::from_le_bytes(row[0..4].try_into().unwrap()));

        records.extend_from_slice(&row_id.to_le_bytes());
        records.extend_from_slice(&(number as u16).to_le_bytes());
        values.extend_from_slice(row);
    }

    let mut cells = vec![header, b5, records, values];
    cells.extend_from_slice(extra_cells);

    table_first_segment(0x7C, heap_ref(0, 0), &cells)
}

/// A minimal single-segment `bc` property-set table.
///
/// `properties` are `(entry type, value type, raw 4-byte value)` records;
/// `extra_cells` become cells 2+ (heap references `0x60`, `0x80`, ...).
pub fn bc_table(properties: &[(u16, u16, [u8; 4])], extra_cells: &[Vec<u8>]) -> Vec<u8> {
    // cell 0 (0x20): b5 header, cell 1 (0x40): record array
    let b5 = b5_cell(2, 6, 0, heap_ref(0, 1));

    let mut records = Vec::new();
    for (entry_type, value_type, value) in properties {
        records.extend_from_slice(&entry_type.to_le_bytes());
        records.extend_from_slice(&value_type.to_le_bytes());
        records.extend_from_slice(value);
    }

    let mut cells = vec![b5, records];
    cells.extend_from_slice(extra_cells);

    table_first_segment(0xBC, heap_ref(0, 0), &cells)
}
