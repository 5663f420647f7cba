//! An ordered collection of caller owned structures, kept sorted by a pair of caller supplied comparators and
//! backed by a red-black tree.
//!
//! The collection never looks inside the structures it orders. Each entry stores the caller's handle to its
//! structure (a reference, a `Box`, an `Rc`, an index into the caller's own arena, ...) and orders entries with
//! two comparators handed over at initialization:
//!
//! - a [UserStructCompare] which orders two stored structures, used by [insert](OrderedCollection::insert).
//! - a [KeyCompare] which orders a standalone key against a stored structure, used by
//!   [find](OrderedCollection::find) so lookups never need to build a dummy structure.
//!
//! Both comparators must agree. The [UserStructKey] trait, implemented for every [Ord] type, can derive both from a
//! single key accessor through [OrderedCollection::keyed].
//!
//! Entries are addressed through [Entry] handles. A handle stays valid until its own entry is deleted, which makes
//! it safe to fetch the next entry of a traversal and then delete the current one.
//!
//! ## Features
//!
//! - `std`: enables the [harness] module that drives a collection through a line oriented command protocol, and
//!   the `ordered_collection_test` binary built on top of it.
//! - `validate`: checks every red-black and ordering invariant of the tree after each mutation. Slow, meant for
//!   debugging.
//!
//! ## Examples
//!
//! ```rust
//! use ordered_collection::{InsertError, OrderedCollection};
//!
//! struct Device {
//!     id: u32,
//!     name: &'static str,
//! }
//!
//! let devices = [Device { id: 7, name: "serial" }, Device { id: 3, name: "rtc" }, Device { id: 7, name: "dup" }];
//!
//! let mut collection: OrderedCollection<&Device, u32> =
//!     OrderedCollection::init(|a, b| a.id.cmp(&b.id), |key, d| key.cmp(&d.id));
//!
//! for device in &devices {
//!     match collection.insert(device) {
//!         Ok(_) => {}
//!         Err(InsertError::AlreadyExists { existing, .. }) => {
//!             assert_eq!(collection.user_struct(existing).unwrap().name, "serial");
//!         }
//!         Err(err) => panic!("{err}"),
//!     }
//! }
//!
//! let rtc = collection.find(&3).unwrap();
//! assert_eq!(collection.user_struct(rtc).unwrap().name, "rtc");
//! assert_eq!(collection.next(rtc), collection.find(&7));
//!
//! while let Some(entry) = collection.min() {
//!     collection.delete(entry).unwrap();
//! }
//! collection.uninit().unwrap();
//! ```
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#![cfg_attr(not(feature = "std"), no_std)]
extern crate alloc;

mod collection;
#[cfg(feature = "std")]
pub mod harness;
mod node;

pub use collection::{InsertError, Iter, KeyCompare, OrderedCollection, UserStructCompare};
pub use node::Entry;

/// Public result type for the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Public error types for the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Memory for a new node could not be obtained.
    OutOfResources,
    /// A structure with an equal key is already in the collection.
    AlreadyExists,
    /// No structure with the requested key is in the collection.
    NotFound,
    /// The entry handle was deleted already or belongs to another collection.
    InvalidEntry,
    /// The collection still holds entries.
    NotEmpty,
    /// The tree no longer satisfies its ordering or red-black invariants.
    Corrupted,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::OutOfResources => write!(f, "out of resources"),
            Error::AlreadyExists => write!(f, "already exists"),
            Error::NotFound => write!(f, "not found"),
            Error::InvalidEntry => write!(f, "invalid entry"),
            Error::NotEmpty => write!(f, "collection is not empty"),
            Error::Corrupted => write!(f, "collection is corrupted"),
        }
    }
}

/// A trait to allow a type to be ordered by a key embedded in it rather than by itself.
pub trait UserStructKey {
    /// The type used for ordering the structures.
    type Key: Ord + ?Sized;

    /// Returns the key.
    fn key(&self) -> &Self::Key;
}

impl<T> UserStructKey for T
where
    T: Ord,
{
    type Key = Self;
    fn key(&self) -> &T {
        self
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
