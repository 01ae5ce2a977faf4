// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::encryption::EncryptionType;

/// Represents errors that can occur while reading a PFF container
#[derive(Debug)]
pub enum Error {
    /// I/O error on the underlying byte source
    Io(std::io::Error),

    /// Magic bytes, a structure signature byte or a variant sentinel
    /// did not match its expected value
    InvalidSignature {
        /// Name of the structure that failed the check
        structure: &'static str,
    },

    /// Unknown data version or file content type
    UnsupportedVariant(u16),

    /// Stored and calculated checksum disagree (stored, calculated)
    CrcMismatch(u32, u32),

    /// Declared size disagrees with the size that was read
    SizeMismatch(u64, u64),

    /// A back-pointer disagrees with the identifier of its owner
    IdentifierMismatch(u64, u64),

    /// A structural invariant of the on-disk format is broken
    CorruptInput(&'static str),

    /// Identifier not present in the live or recovered indexes
    MissingDescriptor(u64),

    /// Table value type / value size combination is not supported
    UnsupportedValueType {
        /// The MAPI value type
        value_type: u16,

        /// The size of the raw value in the record
        value_size: usize,
    },

    /// The decryption codec did not process the whole buffer
    DecryptionFailed(EncryptionType),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PffError: {self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Reader result
pub type Result<T> = std::result::Result<T, Error>;
