// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A read-only parser for Microsoft Personal Folder File (PFF) containers,
//! the on-disk format behind PST, OST and PAB mail stores.
//!
//! ##### NOTE
//!
//! > This crate provides the storage and decoding layer only: the file
//! > header, the global index trees, block reading and decryption, data
//! > array splicing, local descriptor trees, the heap-on-node table engine
//! > and a recovery scan for deleted items. Interpreting property values
//! > (strings, times, GUIDs) and the folder/message/attachment facade
//! > belong to a layer above it.
//!
//! ##### About
//!
//! A PFF container is a forest of *descriptors*, each naming one logical
//! object. A descriptor's payload is a logical byte stream spliced from
//! one or more checksummed blocks; most payloads are *tables* that yield
//! `(identifier, value type, value)` records. Both the 32-bit (ANSI) and
//! 64-bit (Unicode) variants of the format are handled by the same code,
//! parameterized over a layout descriptor.
//!
//! # Example usage
//!
//! ```no_run
//! use pff_reader::{PffFile, RecoveryFlags};
//!
//! let file = std::fs::File::open("archive.pst")?;
//! let mut pff = PffFile::open(file)?;
//!
//! // the message store is descriptor 0x21
//! let store = pff.get_descriptor(0x21)?;
//! let table = pff.open_table(&store)?;
//!
//! // PidTagDisplayName
//! if let Some(entry) = table.entry_by_type(0, 0x3001, None) {
//!     let mut stream = entry.open_stream();
//!     let name = stream.read_to_end(&mut pff)?;
//!     println!("store name: {name:?}");
//! }
//!
//! // salvage deleted descriptors
//! let recovered = pff.recover(RecoveryFlags::default())?;
//! println!("{recovered} descriptors recovered");
//! #
//! # Ok::<(), pff_reader::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![warn(missing_docs)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

pub mod allocation;

pub mod block;

mod checksum;

mod context;

mod descriptor;

pub mod encryption;

mod error;

mod header;

pub mod ids;

pub mod index;

pub mod local_descriptors;

mod name_map;

pub mod recovery;

mod slice;

mod source;

pub mod table;

mod variant;

pub use {
    block::{
        stream::{DataRef, DataStream, Segment},
        BlockFlags, ReadOptions,
    },
    checksum::WeakCrc32,
    context::{Options, PffFile},
    descriptor::Descriptor,
    encryption::EncryptionType,
    error::{Error, Result},
    header::{ContentType, FileHeader},
    ids::BlockId,
    index::{DescriptorIndexValue, IndexKind, OffsetIndexValue},
    local_descriptors::{LocalDescriptorValue, LocalDescriptorsTree},
    name_map::{NameToIdMap, NamedProperty, StaticNameToIdMap},
    recovery::RecoveryFlags,
    slice::Slice,
    source::ByteSource,
    table::{
        ColumnDefinition, EntryFlags, EntryIdentifier, HeapReference, RecordEntry, Table,
        TableFlags, TableType,
    },
    variant::Variant,
};
