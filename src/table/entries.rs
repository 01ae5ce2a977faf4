// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::heap::{HeapIndex, HeapReference};
use crate::Error;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Collects the leaf cells of a record-entry sub-tree, in key order.
///
/// At level 0 the referenced cell is itself a flat array of records. At a
/// higher level it holds `(identifier, child reference)` records and the
/// walker recurses into each child with the level decremented.
pub(super) fn collect_record_chunks(
    heap: &HeapIndex,
    reference: HeapReference,
    level: u8,
    identifier_size: usize,
) -> crate::Result<Vec<Vec<u8>>> {
    let mut chunks = Vec::new();

    if reference.is_null() {
        return Ok(chunks);
    }

    walk(heap, reference, level, identifier_size, &mut chunks)?;
    Ok(chunks)
}

fn walk(
    heap: &HeapIndex,
    reference: HeapReference,
    level: u8,
    identifier_size: usize,
    chunks: &mut Vec<Vec<u8>>,
) -> crate::Result<()> {
    let cell = heap.cell(reference)?;

    if level == 0 {
        chunks.push(cell.to_vec());
        return Ok(());
    }

    let branch_record_size = identifier_size + 4;
    if cell.len() % branch_record_size != 0 {
        return Err(Error::CorruptInput("record entry branch size"));
    }

    // copied out so the recursion does not hold a borrow into the heap
    let cell = cell.to_vec();

    for record in cell.chunks_exact(branch_record_size) {
        let mut reader = Cursor::new(
            record
                .get(identifier_size..)
                .ok_or(Error::CorruptInput("record entry branch size"))?,
        );
        let child = HeapReference::new(reader.read_u32::<LittleEndian>()?);

        walk(heap, child, level - 1, identifier_size, chunks)?;
    }

    Ok(())
}

/// Iterates the fixed-width records of a leaf chunk.
pub(super) fn records(chunk: &[u8], record_size: usize) -> crate::Result<std::slice::ChunksExact<u8>> {
    if record_size == 0 || chunk.len() % record_size != 0 {
        return Err(Error::CorruptInput("record entry chunk size"));
    }

    Ok(chunk.chunks_exact(record_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slice::Slice;
    use test_log::test;

    fn build_segment(cells: &[&[u8]]) -> Slice {
        let mut data = vec![0u8; 2];
        let mut boundaries = vec![];

        for cell in cells {
            boundaries.push(data.len() as u16);
            data.extend_from_slice(cell);
        }
        boundaries.push(data.len() as u16);

        let map_offset = data.len() as u16;
        data.extend_from_slice(&(cells.len() as u16).to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        for boundary in boundaries {
            data.extend_from_slice(&boundary.to_le_bytes());
        }

        data[0..2].copy_from_slice(&map_offset.to_le_bytes());
        Slice::from(data)
    }

    #[test]
    fn level_zero_is_a_single_chunk() -> crate::Result<()> {
        let heap = HeapIndex::parse(vec![build_segment(&[b"\x01\x02\x03\x04"])])?;

        let chunks = collect_record_chunks(&heap, HeapReference::new(0x20), 0, 2)?;
        assert_eq!(vec![b"\x01\x02\x03\x04".to_vec()], chunks);

        Ok(())
    }

    #[test]
    fn branch_level_recurses_in_order() -> crate::Result<()> {
        // cell 0: branch with two children (id size 2)
        let mut branch = vec![];
        branch.extend_from_slice(&1u16.to_le_bytes());
        branch.extend_from_slice(&HeapReference::from_parts(0, 1).raw().to_le_bytes());
        branch.extend_from_slice(&9u16.to_le_bytes());
        branch.extend_from_slice(&HeapReference::from_parts(0, 2).raw().to_le_bytes());

        let heap = HeapIndex::parse(vec![build_segment(&[&branch, b"AA", b"BB"])])?;

        let chunks = collect_record_chunks(&heap, HeapReference::new(0x20), 1, 2)?;
        assert_eq!(vec![b"AA".to_vec(), b"BB".to_vec()], chunks);

        Ok(())
    }

    #[test]
    fn null_reference_yields_nothing() -> crate::Result<()> {
        let heap = HeapIndex::parse(vec![build_segment(&[b"x"])])?;
        assert!(collect_record_chunks(&heap, HeapReference::new(0), 0, 2)?.is_empty());
        Ok(())
    }

    #[test]
    fn ragged_chunks_are_rejected() {
        assert!(records(b"12345", 2).is_err());
        assert!(records(b"1234", 0).is_err());

        let ok: Vec<&[u8]> = records(b"1234", 2).expect("divides evenly").collect();
        assert_eq!(vec![b"12".as_slice(), b"34".as_slice()], ok);
    }
}
