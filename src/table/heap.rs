// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{slice::Slice, Error};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// A 32-bit locator naming one cell of the heap-on-node:
/// `(segment << 16) | ((cell + 1) << 5)`
///
/// The low 5 bits must be zero; the all-zero reference is the null
/// reference.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct HeapReference(u32);

impl HeapReference {
    /// Wraps a raw reference.
    #[must_use]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Builds a reference from a segment ordinal and cell ordinal.
    #[must_use]
    pub fn from_parts(segment: u16, cell: u16) -> Self {
        Self((u32::from(segment) << 16) | (u32::from(cell + 1) << 5))
    }

    /// The raw 32-bit value.
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Whether this is the null reference.
    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The heap segment (physical block ordinal) the cell lives in.
    #[must_use]
    pub fn segment(self) -> usize {
        (self.0 >> 16) as usize
    }

    /// The zero-based cell ordinal within the segment.
    pub fn cell(self) -> crate::Result<usize> {
        if self.0 & 0x1F != 0 {
            return Err(Error::CorruptInput("heap reference flag bits"));
        }

        let index = (self.0 & 0xFFFF) >> 5;
        if index == 0 {
            return Err(Error::CorruptInput("heap reference cell ordinal"));
        }

        Ok(index as usize - 1)
    }
}

impl std::fmt::Display for HeapReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// The cell index over a table's decoded heap segments
///
/// Each segment starts with a 2-byte offset to its page map; the map
/// carries `entry_count + 1` ascending 16-bit boundaries slicing the
/// segment into addressable cells.
#[derive(Clone, Debug)]
pub struct HeapIndex {
    segments: Vec<Slice>,
    cell_ranges: Vec<Vec<(u16, u16)>>,
}

fn parse_page_map(segment: &[u8]) -> crate::Result<Vec<(u16, u16)>> {
    let mut reader = Cursor::new(segment);
    let map_offset = reader.read_u16::<LittleEndian>()?;

    if map_offset == 0 || usize::from(map_offset) >= segment.len() {
        return Err(Error::CorruptInput("heap page map offset"));
    }

    let mut reader = Cursor::new(
        segment
            .get(usize::from(map_offset)..)
            .ok_or(Error::CorruptInput("heap page map offset"))?,
    );

    let entry_count = reader.read_u16::<LittleEndian>()?;
    let _unused_count = reader.read_u16::<LittleEndian>()?;

    if entry_count == 0 {
        return Ok(Vec::new());
    }

    let mut boundaries = Vec::with_capacity(usize::from(entry_count) + 1);
    for _ in 0..=entry_count {
        boundaries.push(reader.read_u16::<LittleEndian>()?);
    }

    let mut ranges = Vec::with_capacity(usize::from(entry_count));
    for pair in boundaries.windows(2) {
        let (Some(start), Some(end)) = (pair.first(), pair.get(1)) else {
            continue;
        };

        if start > end || *end > map_offset {
            return Err(Error::CorruptInput("heap cell boundaries"));
        }

        ranges.push((*start, *end));
    }

    Ok(ranges)
}

impl HeapIndex {
    /// Builds the cell index over decoded segment payloads.
    pub fn parse(segments: Vec<Slice>) -> crate::Result<Self> {
        let mut cell_ranges = Vec::with_capacity(segments.len());

        for segment in &segments {
            cell_ranges.push(parse_page_map(segment)?);
        }

        Ok(Self {
            segments,
            cell_ranges,
        })
    }

    /// Number of heap segments.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Number of cells in one segment.
    #[must_use]
    pub fn cell_count(&self, segment: usize) -> usize {
        self.cell_ranges.get(segment).map_or(0, Vec::len)
    }

    /// The raw bytes of a whole segment.
    pub fn segment(&self, segment: usize) -> crate::Result<&Slice> {
        self.segments
            .get(segment)
            .ok_or(Error::CorruptInput("heap segment out of range"))
    }

    /// The bytes of the cell at `(segment, cell)` ordinals.
    pub fn cell_at(&self, segment: usize, cell: usize) -> crate::Result<&[u8]> {
        let (start, end) = self
            .cell_ranges
            .get(segment)
            .and_then(|ranges| ranges.get(cell))
            .ok_or(Error::CorruptInput("heap cell out of range"))?;

        self.segments
            .get(segment)
            .and_then(|data| data.get(usize::from(*start)..usize::from(*end)))
            .ok_or(Error::CorruptInput("heap cell out of range"))
    }

    /// Resolves a heap reference to its cell bytes.
    pub fn cell(&self, reference: HeapReference) -> crate::Result<&[u8]> {
        self.cell_at(reference.segment(), reference.cell()?)
    }
}

/// Slices one cell out of a raw segment without a built index.
///
/// Used by re-reads that bypass the decryption heuristic: the segment's
/// page map is parsed afresh from the given bytes.
pub(crate) fn cell_in_segment(segment: &[u8], cell: usize) -> crate::Result<&[u8]> {
    let ranges = parse_page_map(segment)?;

    let (start, end) = ranges
        .get(cell)
        .ok_or(Error::CorruptInput("heap cell out of range"))?;

    segment
        .get(usize::from(*start)..usize::from(*end))
        .ok_or(Error::CorruptInput("heap cell out of range"))
}
