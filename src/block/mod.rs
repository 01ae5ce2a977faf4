// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Reading, validating and decrypting single on-disk blocks.
//!
//! A block stores `N` user bytes, padding up to the next 64-byte boundary,
//! and a variant-specific footer. Footer mismatches are surfaced as
//! [`BlockFlags`] rather than errors unless strict validation is requested.

pub mod data_array;
pub mod footer;
pub mod stream;

use crate::{
    checksum::WeakCrc32,
    encryption::{self, EncryptionType},
    ids::{descriptor_contains_table, BlockId},
    source::ByteSource,
    variant::{block_envelope_size, Variant},
    Error,
};
use footer::BlockFooter;

/// Validation and decryption outcomes of a single block read
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BlockFlags(u8);

impl BlockFlags {
    /// Stored CRC disagrees with the payload
    pub const CRC_MISMATCH: Self = Self(0x01);

    /// Footer size disagrees with the declared size
    pub const SIZE_MISMATCH: Self = Self(0x02);

    /// Footer back-pointer disagrees with the block identifier
    pub const IDENTIFIER_MISMATCH: Self = Self(0x04);

    /// The block was decrypted although the file declares no encryption
    pub const DECRYPTION_FORCED: Self = Self(0x08);

    /// Whether a flag is set.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no flag is set.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub(crate) fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

/// Per-read options, all defaulting to off
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ReadOptions {
    /// Treat CRC / size / back-pointer mismatches as fatal
    pub strict_validation: bool,

    /// Disable the table-signature forced-decryption heuristic
    pub ignore_force_decryption: bool,
}

/// Reads a block's user bytes and validates its footer.
///
/// Returns the payload and the validation flags. In strict mode the first
/// failing check (size, then CRC, then back-pointer) becomes an error.
/// Decryption is a separate step, see [`decrypt_block_data`].
pub fn read_block<S: ByteSource>(
    source: &mut S,
    variant: Variant,
    file_offset: u64,
    data_size: u32,
    block_id: BlockId,
    strict: bool,
) -> crate::Result<(BlockFlags, Vec<u8>)> {
    let envelope = block_envelope_size(variant, data_size);
    let footer_size = variant.block_footer_size();

    let data = source.read_at(file_offset, data_size as usize)?;

    let footer_offset = file_offset + envelope - footer_size as u64;
    let footer_data = source.read_at(footer_offset, footer_size)?;
    let footer = BlockFooter::from_bytes(&footer_data, variant)?;

    let mut flags = BlockFlags::default();

    if u32::from(footer.data_size) != data_size {
        if strict {
            return Err(Error::SizeMismatch(
                u64::from(data_size),
                u64::from(footer.data_size),
            ));
        }
        log::warn!(
            "block {block_id}: footer size {} != declared size {data_size}",
            footer.data_size,
        );
        flags.insert(BlockFlags::SIZE_MISMATCH);
    }

    if footer.crc != 0 {
        let calculated = WeakCrc32::from_bytes(&data).into_u32();

        if calculated != footer.crc {
            if strict {
                return Err(Error::CrcMismatch(footer.crc, calculated));
            }
            log::warn!(
                "block {block_id}: crc mismatch (stored {:#x}, calculated {calculated:#x})",
                footer.crc,
            );
            flags.insert(BlockFlags::CRC_MISMATCH);
        }
    }

    if footer.back_pointer != block_id.raw() {
        if strict {
            return Err(Error::IdentifierMismatch(
                block_id.raw(),
                footer.back_pointer,
            ));
        }
        log::warn!(
            "block {block_id}: footer back-pointer {:#x} does not match",
            footer.back_pointer,
        );
        flags.insert(BlockFlags::IDENTIFIER_MISMATCH);
    }

    Ok((flags, data))
}

// A table container starts with 0xEC in its third byte and a known table
// type in its fourth. 0xCC shows up in the probe list although it is not a
// parsable table type.
fn has_table_signature(data: &[u8]) -> bool {
    matches!(data.get(2), Some(0xEC))
        && matches!(
            data.get(3),
            Some(0x6C | 0x7C | 0x8C | 0x9C | 0xA5 | 0xAC | 0xBC | 0xCC)
        )
}

/// Decrypts a block's user bytes in place, applying the forced-decryption
/// heuristic for files whose header lies about their encryption.
///
/// `force_decryption` is the per-context latch: once a probe proves that a
/// nominally unencrypted file carries compressible-encrypted tables, all
/// further external blocks of the context are decrypted from the start.
#[allow(clippy::too_many_arguments)]
pub fn decrypt_block_data(
    encryption_type: EncryptionType,
    force_decryption: &mut bool,
    descriptor_identifier: u32,
    block_id: BlockId,
    data: &mut [u8],
    options: ReadOptions,
    flags: &mut BlockFlags,
) -> crate::Result<()> {
    // the internal flag marks bookkeeping blocks that are never encrypted
    let mut decrypt = !block_id.is_internal();
    let mut effective_type = encryption_type;
    let mut probing = false;

    if encryption_type == EncryptionType::None
        && !options.ignore_force_decryption
        && data.len() > 4
    {
        if descriptor_contains_table(descriptor_identifier) {
            if !has_table_signature(data) {
                log::debug!(
                    "descriptor {descriptor_identifier}: table signature missing, trying forced decryption",
                );
                probing = true;
                effective_type = EncryptionType::Compressible;
                decrypt = true;
                flags.insert(BlockFlags::DECRYPTION_FORCED);
            }
        } else if *force_decryption && !block_id.is_internal() {
            log::debug!("descriptor {descriptor_identifier}: decryption forced");
            effective_type = EncryptionType::Compressible;
            decrypt = true;
            flags.insert(BlockFlags::DECRYPTION_FORCED);
        }
    }

    if decrypt {
        let processed = encryption::decrypt(effective_type, block_id.encryption_key(), data);

        if processed != data.len() {
            return Err(Error::DecryptionFailed(effective_type));
        }

        if probing && has_table_signature(data) {
            log::debug!(
                "compressible-encrypted data detected while encryption type is none, forcing decryption",
            );
            *force_decryption = true;
        }
    }

    Ok(())
}
