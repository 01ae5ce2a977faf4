// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{
    node::{IndexNode, NodeEntries},
    DescriptorIndexValue, IndexKind, OffsetIndexValue,
};
use crate::{
    source::ByteSource,
    variant::{Variant, INDEX_NODE_SIZE},
    Error,
};
use quick_cache::{sync::Cache as QuickCache, UnitWeighter};
use std::sync::Arc;

const NODE_CACHE_CAPACITY: usize = 512;

// the offset index masks flag bits out of lookup keys
const OFFSET_KEY_MASK: u64 = !0x1F;

/// Bounded cache of parsed index node pages, keyed by file offset
///
/// Per IO context; stale entries cannot form because the underlying bytes
/// are read-only.
pub struct NodeCache {
    inner: QuickCache<u64, Arc<IndexNode>, UnitWeighter, rustc_hash::FxBuildHasher>,
}

impl NodeCache {
    #[must_use]
    pub(crate) fn new() -> Self {
        use quick_cache::sync::DefaultLifecycle;

        #[allow(clippy::default_trait_access)]
        let inner = QuickCache::with(
            NODE_CACHE_CAPACITY,
            NODE_CACHE_CAPACITY as u64,
            UnitWeighter,
            Default::default(),
            DefaultLifecycle::default(),
        );

        Self { inner }
    }

    fn get(&self, offset: u64) -> Option<Arc<IndexNode>> {
        self.inner.get(&offset)
    }

    fn insert(&self, offset: u64, node: Arc<IndexNode>) {
        self.inner.insert(offset, node);
    }
}

/// Ordered lookup and leaf iteration over one of the two global indexes
///
/// The tree holds only its root coordinates; nodes are materialized through
/// the [`NodeCache`] on demand. Lookup descends with the branch-node rule
/// "a branch entry carries the first key of its child": take the child of
/// the greatest key that is less than or equal to the search key.
#[derive(Clone, Debug)]
pub struct IndexTree {
    kind: IndexKind,
    variant: Variant,
    root_offset: u64,
    root_back_pointer: u64,
}

impl IndexTree {
    /// Creates a tree from root coordinates out of the file header.
    #[must_use]
    pub fn new(kind: IndexKind, variant: Variant, root_offset: u64, root_back_pointer: u64) -> Self {
        Self {
            kind,
            variant,
            root_offset,
            root_back_pointer,
        }
    }

    /// Which index this tree walks.
    #[must_use]
    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    /// Reads one node page through the cache and validates its identity.
    pub fn node<S: ByteSource>(
        &self,
        source: &mut S,
        cache: &NodeCache,
        offset: u64,
        expected_back_pointer: u64,
    ) -> crate::Result<Arc<IndexNode>> {
        let node = if let Some(node) = cache.get(offset) {
            node
        } else {
            let data = source.read_at(offset, INDEX_NODE_SIZE)?;
            let node = Arc::new(IndexNode::from_bytes(&data, self.variant)?);
            cache.insert(offset, node.clone());
            node
        };

        if node.kind != self.kind {
            return Err(Error::InvalidSignature {
                structure: "index node type",
            });
        }
        if node.back_pointer != expected_back_pointer {
            return Err(Error::IdentifierMismatch(
                expected_back_pointer,
                node.back_pointer,
            ));
        }

        Ok(node)
    }

    fn descend<S: ByteSource>(
        &self,
        source: &mut S,
        cache: &NodeCache,
        search_key: u64,
    ) -> crate::Result<Option<Arc<IndexNode>>> {
        let mut offset = self.root_offset;
        let mut back_pointer = self.root_back_pointer;
        let mut previous_level: Option<u8> = None;

        loop {
            let node = self.node(source, cache, offset, back_pointer)?;

            // levels must strictly decrease towards the leaves
            if let Some(previous) = previous_level {
                if node.level >= previous {
                    return Err(Error::CorruptInput("index node level ordering"));
                }
            }
            previous_level = Some(node.level);

            let NodeEntries::Branch(entries) = &node.entries else {
                return Ok(Some(node));
            };

            // greatest key <= search key
            let child = entries
                .iter()
                .take_while(|entry| entry.key <= search_key)
                .last();

            let Some(child) = child else {
                return Ok(None);
            };

            offset = child.file_offset;
            back_pointer = child.block_id;
        }
    }

    /// Looks up a descriptor identifier; `None` if absent.
    pub fn lookup_descriptor<S: ByteSource>(
        &self,
        source: &mut S,
        cache: &NodeCache,
        identifier: u32,
    ) -> crate::Result<Option<DescriptorIndexValue>> {
        let Some(leaf) = self.descend(source, cache, u64::from(identifier))? else {
            return Ok(None);
        };

        let NodeEntries::Descriptor(values) = &leaf.entries else {
            return Err(Error::CorruptInput("descriptor index leaf entry kind"));
        };

        Ok(values
            .iter()
            .find(|value| value.identifier == identifier)
            .copied())
    }

    /// Looks up a block identifier; flag bits are masked off. `None` if absent.
    pub fn lookup_offset<S: ByteSource>(
        &self,
        source: &mut S,
        cache: &NodeCache,
        identifier: u64,
    ) -> crate::Result<Option<OffsetIndexValue>> {
        let search_key = identifier & OFFSET_KEY_MASK;

        let Some(leaf) = self.descend(source, cache, search_key)? else {
            return Ok(None);
        };

        let NodeEntries::Offset(values) = &leaf.entries else {
            return Err(Error::CorruptInput("offset index leaf entry kind"));
        };

        Ok(values
            .iter()
            .find(|value| value.identifier & OFFSET_KEY_MASK == search_key)
            .copied())
    }

    fn walk_leaves<S: ByteSource>(
        &self,
        source: &mut S,
        cache: &NodeCache,
        offset: u64,
        back_pointer: u64,
        depth: usize,
        visitor: &mut dyn FnMut(&IndexNode),
    ) -> crate::Result<()> {
        // the on-disk format has no trees anywhere near this deep
        if depth > 64 {
            return Err(Error::CorruptInput("index tree recursion depth"));
        }

        let node = self.node(source, cache, offset, back_pointer)?;

        if let NodeEntries::Branch(entries) = &node.entries {
            for entry in entries {
                self.walk_leaves(
                    source,
                    cache,
                    entry.file_offset,
                    entry.block_id,
                    depth + 1,
                    visitor,
                )?;
            }
        } else {
            visitor(&node);
        }

        Ok(())
    }

    /// Collects every live descriptor leaf value, in key order.
    pub fn descriptor_leaves<S: ByteSource>(
        &self,
        source: &mut S,
        cache: &NodeCache,
    ) -> crate::Result<Vec<DescriptorIndexValue>> {
        let mut result = Vec::new();

        self.walk_leaves(
            source,
            cache,
            self.root_offset,
            self.root_back_pointer,
            0,
            &mut |node| {
                if let NodeEntries::Descriptor(values) = &node.entries {
                    result.extend_from_slice(values);
                }
            },
        )?;

        Ok(result)
    }

    /// Collects every live offset leaf value, in key order.
    pub fn offset_leaves<S: ByteSource>(
        &self,
        source: &mut S,
        cache: &NodeCache,
    ) -> crate::Result<Vec<OffsetIndexValue>> {
        let mut result = Vec::new();

        self.walk_leaves(
            source,
            cache,
            self.root_offset,
            self.root_back_pointer,
            0,
            &mut |node| {
                if let NodeEntries::Offset(values) = &node.entries {
                    result.extend_from_slice(values);
                }
            },
        )?;

        Ok(result)
    }

    /// Collects tombstone entries from every leaf: slots past the live
    /// entry count whose previous contents are still readable.
    pub fn deleted_descriptor_leaves<S: ByteSource>(
        &self,
        source: &mut S,
        cache: &NodeCache,
    ) -> crate::Result<Vec<DescriptorIndexValue>> {
        let mut result = Vec::new();

        self.walk_leaves(
            source,
            cache,
            self.root_offset,
            self.root_back_pointer,
            0,
            &mut |node| {
                if let NodeEntries::Descriptor(values) = &node.deleted_entries {
                    result.extend(values.iter().filter(|v| v.identifier != 0).copied());
                }
            },
        )?;

        Ok(result)
    }

    /// Tombstone counterpart of [`IndexTree::offset_leaves`].
    pub fn deleted_offset_leaves<S: ByteSource>(
        &self,
        source: &mut S,
        cache: &NodeCache,
    ) -> crate::Result<Vec<OffsetIndexValue>> {
        let mut result = Vec::new();

        self.walk_leaves(
            source,
            cache,
            self.root_offset,
            self.root_back_pointer,
            0,
            &mut |node| {
                if let NodeEntries::Offset(values) = &node.deleted_entries {
                    result.extend(values.iter().filter(|v| v.identifier != 0).copied());
                }
            },
        )?;

        Ok(result)
    }
}
