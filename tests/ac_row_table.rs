// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

mod common;

use common::{
    b5_cell, heap_ref, local_descriptor_leaf, table_first_segment, utf16le, DescriptorSpec,
    PffBuilder,
};
use pff_reader::{table::value_types, EncryptionType, PffFile, TableType, Variant};
use std::io::Cursor;
use test_log::test;

const ROW_SIZE: u16 = 13;

fn ac_column(
    entry_type: u16,
    value_type: u16,
    offset: u16,
    size: u16,
    number: u16,
    sub_table: u32,
) -> Vec<u8> {
    let mut column = Vec::new();
    column.extend_from_slice(&entry_type.to_le_bytes());
    column.extend_from_slice(&value_type.to_le_bytes());
    column.extend_from_slice(&offset.to_le_bytes());
    column.extend_from_slice(&size.to_le_bytes());
    column.extend_from_slice(&number.to_le_bytes());
    column.extend_from_slice(&0u16.to_le_bytes());
    column.extend_from_slice(&sub_table.to_le_bytes());
    column
}

fn ac_header(column_count: u16) -> Vec<u8> {
    let mut header = vec![0xAC, 0x00];
    header.extend_from_slice(&ROW_SIZE.to_le_bytes()); // 32-bit end offset
    header.extend_from_slice(&ROW_SIZE.to_le_bytes()); // 16-bit end offset
    header.extend_from_slice(&ROW_SIZE.to_le_bytes()); // 8-bit end offset
    header.extend_from_slice(&ROW_SIZE.to_le_bytes()); // cell existence end
    header.extend_from_slice(&heap_ref(0, 1).to_le_bytes()); // b5
    header.extend_from_slice(&0x8021u32.to_le_bytes()); // values array descriptor
    header.extend_from_slice(&[0u8; 4]);
    header.extend_from_slice(&column_count.to_le_bytes());
    header.extend_from_slice(&0x8001u32.to_le_bytes()); // column defs descriptor
    header.extend_from_slice(&[0u8; 12]);
    header
}

/// An `ac` table keeps its column schema and values array behind local
/// descriptors, and routes one column through a nested `a5` table.
#[test]
fn ac_table_with_sub_descriptors() -> pff_reader::Result<()> {
    let variant = Variant::Bit32;
    let subject = utf16le("Status report");

    // cell 0: ac header, cell 1: b5, cell 2: row records
    let b5 = b5_cell(4, 4, 0, heap_ref(0, 2));

    let row_id = 0x0060_002Eu32;
    let mut records = Vec::new();
    records.extend_from_slice(&row_id.to_le_bytes());
    records.extend_from_slice(&0u32.to_le_bytes());

    let table = table_first_segment(0xAC, heap_ref(0, 0), &[ac_header(3), b5, records]);

    // column definitions: self id, a string routed through the a5
    // sub-table behind descriptor 0x8041, and an inline i32
    let mut columns = Vec::new();
    columns.extend_from_slice(&ac_column(0x67F2, value_types::INTEGER_32BIT, 0, 4, 0, 0));
    columns.extend_from_slice(&ac_column(
        0x0037,
        value_types::STRING_UNICODE,
        4,
        4,
        1,
        0x8041,
    ));
    columns.extend_from_slice(&ac_column(0x0E08, value_types::INTEGER_32BIT, 8, 4, 2, 0));

    // the values array row: self id, sub-table reference (set 0, cell 0),
    // an integer, one existence byte
    let mut row = Vec::new();
    row.extend_from_slice(&row_id.to_le_bytes());
    row.extend_from_slice(&0x20u32.to_le_bytes());
    row.extend_from_slice(&555u32.to_le_bytes());
    row.push(0x07);
    assert_eq!(usize::from(ROW_SIZE), row.len());

    let sub_table = table_first_segment(0xA5, 0, &[subject.clone()]);

    let image = PffBuilder::new(variant)
        .encryption(EncryptionType::Compressible)
        .block(0x140, table)
        .block(0x162, local_descriptor_leaf(
            variant,
            &[
                (0x8001, 0x180, 0),
                (0x8021, 0x1A0, 0),
                (0x8041, 0x1C0, 0),
            ],
        ))
        .block(0x180, columns)
        .block(0x1A0, row)
        .block(0x1C0, sub_table)
        .descriptor(DescriptorSpec {
            identifier: 0x60E,
            data_identifier: 0x140,
            local_descriptors_identifier: 0x162,
            parent_identifier: 0x21,
        })
        .build();

    let mut pff = PffFile::open(Cursor::new(image))?;
    let contents = pff.get_descriptor(0x60E)?;
    let table = pff.open_table(&contents)?;

    assert_eq!(TableType::Ac, table.table_type());
    assert_eq!(1, table.number_of_sets());
    assert_eq!(3, table.number_of_entries());
    assert_eq!(3, table.columns().len());

    // self identifier column
    let entry = table.entry(0, 0).expect("self id column");
    let mut stream = entry.open_stream();
    assert_eq!(row_id.to_le_bytes().to_vec(), stream.read_to_end(&mut pff)?);

    // the subject travels through the nested a5 table
    let entry = table.entry_by_type(0, 0x0037, None).expect("subject column");
    let mut stream = entry.open_stream();
    assert_eq!(subject, stream.read_to_end(&mut pff)?);

    // plain inline column
    let entry = table.entry_by_type(0, 0x0E08, None).expect("size column");
    let mut stream = entry.open_stream();
    assert_eq!(555u32.to_le_bytes().to_vec(), stream.read_to_end(&mut pff)?);

    // the nested table is reachable for inspection
    let sub = table.sub_table(0x8041).expect("a5 sub-table");
    assert_eq!(TableType::A5, sub.table_type());

    Ok(())
}
