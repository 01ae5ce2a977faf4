// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The consumed side of the name-to-id property map.
//!
//! Loading the map (descriptor `0x61`) is an item-layer concern above this
//! crate. The table engine only needs to ask "what does this entry type in
//! the named range map to", so that is the whole interface.

/// What a named property entry type maps to
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NamedProperty {
    /// A remapped numeric identifier
    Numeric(u32),

    /// A property name (decoded from ASCII or UTF-16LE by the loader)
    Name(String),
}

/// Lookup from a MAPI entry type in the named range (`0x8000..=0xFFFE`)
/// to its remapped identifier or name
pub trait NameToIdMap {
    /// Resolves an entry type; `None` if the map has no entry for it.
    fn remap(&self, entry_type: u16) -> Option<NamedProperty>;
}

/// A map over a plain vector of `(entry type, property)` pairs, mostly
/// useful for tests and tools
#[derive(Clone, Debug, Default)]
pub struct StaticNameToIdMap {
    entries: Vec<(u16, NamedProperty)>,
}

impl StaticNameToIdMap {
    /// Creates a map from `(entry type, property)` pairs.
    #[must_use]
    pub fn new(entries: Vec<(u16, NamedProperty)>) -> Self {
        Self { entries }
    }
}

impl NameToIdMap for StaticNameToIdMap {
    fn remap(&self, entry_type: u16) -> Option<NamedProperty> {
        self.entries
            .iter()
            .find(|(candidate, _)| *candidate == entry_type)
            .map(|(_, property)| property.clone())
    }
}
