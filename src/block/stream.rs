// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{context::PffFile, ids::BlockId, slice::Slice, source::ByteSource, Error};
use std::io::SeekFrom;

/// One physical extent of a logical data stream
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Segment {
    /// Identifier of the backing block
    pub block_id: BlockId,

    /// Physical offset of the block's user bytes
    pub file_offset: u64,

    /// Number of user bytes in the block
    pub data_size: u32,
}

/// Where the bytes of a value or stream live
///
/// Either an already materialized buffer (inline values, heap cells) or an
/// ordered list of block extents that are read and decrypted on demand.
#[derive(Clone, Debug)]
pub enum DataRef {
    /// Materialized bytes
    Buffer(Slice),

    /// Block-backed bytes, decrypted per leaf segment at read time
    Blocks(Vec<Segment>),
}

impl DataRef {
    /// An empty buffer reference.
    #[must_use]
    pub fn empty() -> Self {
        Self::Buffer(Slice::empty())
    }

    /// Total logical size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        match self {
            Self::Buffer(slice) => slice.len() as u64,
            Self::Blocks(segments) => segments.iter().map(|s| u64::from(s.data_size)).sum(),
        }
    }
}

/// Random access over a descriptor's logical data stream
///
/// Behaves like a contiguous file even when the bytes are spliced together
/// from many blocks: `read` advances a cursor, `seek` repositions it.
/// Block-backed segments are validated and decrypted as they are touched.
#[derive(Clone, Debug)]
pub struct DataStream {
    descriptor_identifier: u32,
    data: DataRef,
    total_size: u64,
    position: u64,
}

impl DataStream {
    pub(crate) fn new(descriptor_identifier: u32, data: DataRef) -> Self {
        let total_size = data.size();

        Self {
            descriptor_identifier,
            data,
            total_size,
            position: 0,
        }
    }

    /// Total size of the stream in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.total_size
    }

    /// Whether the stream is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_size == 0
    }

    /// Current cursor position.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Repositions the cursor with the semantics of a contiguous file.
    pub fn seek(&mut self, whence: SeekFrom) -> crate::Result<u64> {
        let target = match whence {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(offset) => i128::from(self.position) + i128::from(offset),
            SeekFrom::End(offset) => i128::from(self.total_size) + i128::from(offset),
        };

        if target < 0 {
            return Err(Error::CorruptInput("seek before start of stream"));
        }

        self.position = target as u64;
        Ok(self.position)
    }

    /// Reads at the cursor into `buf`, advancing it.
    ///
    /// Returns the number of bytes read, 0 at end of stream.
    pub fn read<S: ByteSource>(
        &mut self,
        file: &mut PffFile<S>,
        buf: &mut [u8],
    ) -> crate::Result<usize> {
        if self.position >= self.total_size {
            return Ok(0);
        }

        let remaining = self.total_size - self.position;
        let wanted = (buf.len() as u64).min(remaining) as usize;
        let mut written = 0usize;

        match &self.data {
            DataRef::Buffer(slice) => {
                let start = self.position as usize;
                let bytes = slice
                    .get(start..start + wanted)
                    .ok_or(Error::CorruptInput("stream buffer out of range"))?;
                buf.get_mut(..wanted)
                    .ok_or(Error::CorruptInput("stream read buffer"))?
                    .copy_from_slice(bytes);
                written = wanted;
            }
            DataRef::Blocks(segments) => {
                let mut segment_start = 0u64;

                for segment in segments {
                    let segment_size = u64::from(segment.data_size);
                    let segment_end = segment_start + segment_size;
                    let cursor = self.position + written as u64;

                    if cursor >= segment_start && cursor < segment_end {
                        let data = file.segment_data(segment, self.descriptor_identifier)?;

                        let offset_in_segment = (cursor - segment_start) as usize;
                        let available = data
                            .len()
                            .checked_sub(offset_in_segment)
                            .ok_or(Error::CorruptInput("stream segment out of range"))?;
                        let take = (wanted - written).min(available);

                        let chunk = data
                            .get(offset_in_segment..offset_in_segment + take)
                            .ok_or(Error::CorruptInput("stream segment out of range"))?;
                        buf.get_mut(written..written + take)
                            .ok_or(Error::CorruptInput("stream read buffer"))?
                            .copy_from_slice(chunk);
                        written += take;
                    }

                    if written == wanted {
                        break;
                    }
                    segment_start = segment_end;
                }
            }
        }

        self.position += written as u64;
        Ok(written)
    }

    /// Reads exactly `len` bytes at `offset` without moving the cursor.
    pub fn read_at<S: ByteSource>(
        &mut self,
        file: &mut PffFile<S>,
        offset: u64,
        len: usize,
    ) -> crate::Result<Vec<u8>> {
        let saved = self.position;
        self.position = offset;

        let mut buf = vec![0u8; len];
        let mut filled = 0usize;

        while filled < len {
            let count = self.read(
                file,
                buf.get_mut(filled..)
                    .ok_or(Error::CorruptInput("stream read buffer"))?,
            )?;
            if count == 0 {
                self.position = saved;
                return Err(Error::CorruptInput("read past end of stream"));
            }
            filled += count;
        }

        self.position = saved;
        Ok(buf)
    }

    /// Reads the whole stream into a buffer.
    pub fn read_to_end<S: ByteSource>(&mut self, file: &mut PffFile<S>) -> crate::Result<Vec<u8>> {
        self.read_at(file, 0, self.total_size as usize)
    }
}
