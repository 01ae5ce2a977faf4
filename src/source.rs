// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::io::{Read, Seek, SeekFrom};

/// Random-access byte source a PFF container is read from
///
/// The trait is intentionally tiny: a seek-then-read discipline plus the
/// total size. There is no buffering promise; the layers above keep their
/// own caches. Any `Read + Seek` type (a [`std::fs::File`], a
/// [`std::io::Cursor`] over a byte vector, ...) qualifies through the
/// blanket implementation.
pub trait ByteSource {
    /// Positions the read cursor at an absolute file offset.
    fn seek_to(&mut self, offset: u64) -> crate::Result<()>;

    /// Fills the whole buffer from the current position.
    fn read_exact_buf(&mut self, buf: &mut [u8]) -> crate::Result<()>;

    /// Returns the total size of the source in bytes.
    fn size(&mut self) -> crate::Result<u64>;

    /// Reads `len` bytes at `offset`.
    fn read_at(&mut self, offset: u64, len: usize) -> crate::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.seek_to(offset)?;
        self.read_exact_buf(&mut buf)?;
        Ok(buf)
    }
}

impl<T: Read + Seek> ByteSource for T {
    fn seek_to(&mut self, offset: u64) -> crate::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    fn read_exact_buf(&mut self, buf: &mut [u8]) -> crate::Result<()> {
        self.read_exact(buf)?;
        Ok(())
    }

    fn size(&mut self) -> crate::Result<u64> {
        let position = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(position))?;
        Ok(end)
    }
}

#[cfg(test)]
mod tests {
    use super::ByteSource;
    use std::io::{Cursor, Write};
    use test_log::test;

    #[test]
    fn cursor_read_at() -> crate::Result<()> {
        let mut source = Cursor::new(b"0123456789".to_vec());

        assert_eq!(10, source.size()?);
        assert_eq!(b"345".to_vec(), source.read_at(3, 3)?);

        // position is irrelevant for the next absolute read
        assert_eq!(b"01".to_vec(), source.read_at(0, 2)?);

        Ok(())
    }

    #[test]
    fn file_read_at() -> crate::Result<()> {
        let mut file = tempfile::tempfile()?;
        file.write_all(b"hello block")?;

        assert_eq!(11, ByteSource::size(&mut file)?);
        assert_eq!(b"block".to_vec(), file.read_at(6, 5)?);

        Ok(())
    }

    #[test]
    fn short_read_fails() {
        let mut source = Cursor::new(vec![0u8; 4]);
        assert!(source.read_at(2, 8).is_err());
    }
}
