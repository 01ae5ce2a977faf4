// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Identifier semantics: block-id flag bits and the descriptor-type
//! classification derived from the low 5 bits of a descriptor identifier.

/// Identifier of a physical block (or block tree) in the offset index
///
/// The low 5 bits carry type flags and are masked off for index lookups.
/// Flag `0x02` marks an *internal* block: tree-of-blocks payloads and other
/// bookkeeping data that is never encrypted.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BlockId(u64);

const FLAG_MASK: u64 = 0x1F;
const FLAG_INTERNAL: u64 = 0x02;

impl BlockId {
    /// Wraps a raw 64-bit block identifier.
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw identifier including flag bits.
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }

    /// The identifier with the flag bits masked off, as used for index lookups.
    #[must_use]
    pub fn lookup_key(self) -> u64 {
        self.0 & !FLAG_MASK
    }

    /// Whether the internal (unencrypted, tree-of-blocks) flag is set.
    #[must_use]
    pub fn is_internal(self) -> bool {
        self.0 & FLAG_INTERNAL != 0
    }

    /// The decryption key derived from this identifier.
    #[must_use]
    pub fn encryption_key(self) -> u32 {
        self.0 as u32
    }
}

impl From<u64> for BlockId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The root descriptor of the message store
pub const DESCRIPTOR_MESSAGE_STORE: u32 = 0x21;

/// The descriptor carrying the name-to-id property map
pub const DESCRIPTOR_NAME_TO_ID_MAP: u32 = 0x61;

// Reserved internal descriptors that are known to hold tables
const DESCRIPTOR_UNKNOWN_2049: u32 = 0x801;
const DESCRIPTOR_UNKNOWN_2081: u32 = 0x821;
const DESCRIPTOR_UNKNOWN_2113: u32 = 0x841;
const DESCRIPTOR_UNKNOWN_3073: u32 = 0xC01;

/// The type carried in the low 5 bits of a descriptor identifier.
#[must_use]
pub fn descriptor_id_type(identifier: u32) -> u8 {
    (identifier & 0x1F) as u8
}

/// Whether a descriptor of this identifier is expected to start with a
/// table container, which makes it eligible for the forced-decryption
/// signature probe.
#[must_use]
pub fn descriptor_contains_table(identifier: u32) -> bool {
    match descriptor_id_type(identifier) {
        // internal descriptors hold tables only for a handful of
        // well-known identifiers
        0x01 => matches!(
            identifier,
            DESCRIPTOR_MESSAGE_STORE
                | DESCRIPTOR_NAME_TO_ID_MAP
                | DESCRIPTOR_UNKNOWN_2049
                | DESCRIPTOR_UNKNOWN_2081
                | DESCRIPTOR_UNKNOWN_2113
                | DESCRIPTOR_UNKNOWN_3073
        ),

        // folders, messages, attachment/recipient tables, ...
        0x02..=0x04 | 0x08 | 0x0D..=0x12 | 0x16..=0x18 => true,

        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn block_id_flags() {
        let id = BlockId::new(0x62);
        assert!(id.is_internal());
        assert_eq!(0x60, id.lookup_key());

        let id = BlockId::new(0x40);
        assert!(!id.is_internal());
        assert_eq!(0x40, id.lookup_key());
    }

    #[test]
    fn encryption_key_is_low_half() {
        let id = BlockId::new(0x1234_5678_9ABC_DEF0);
        assert_eq!(0x9ABC_DEF0, id.encryption_key());
    }

    #[test]
    fn message_store_contains_table() {
        assert!(descriptor_contains_table(DESCRIPTOR_MESSAGE_STORE));
        assert!(descriptor_contains_table(DESCRIPTOR_NAME_TO_ID_MAP));

        // folder
        assert!(descriptor_contains_table(0x8022));

        // plain internal descriptor
        assert!(!descriptor_contains_table(0x41));
    }
}
