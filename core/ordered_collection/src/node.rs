//! Ordered Collection - Node storage for the red-black tree
//!
//! Nodes live in an index-addressed arena and are linked to each other by slot index. A slot never moves once it
//! has been handed out, so an [Entry] stays usable until the node it names is deleted, no matter how the tree is
//! rebalanced around it.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::{Error, Result};

/// The color RED of a node in a red-black tree.
pub const RED: bool = false;
/// The color BLACK of a node in a red-black tree.
pub const BLACK: bool = true;

/// A link to another node in the arena, `None` being the sentinel leaf.
pub(crate) type Link = Option<usize>;

/// Source of unique collection identifiers, used to reject handles from a different collection.
static NEXT_OWNER: AtomicUsize = AtomicUsize::new(1);

/// An opaque handle to a single entry of an [OrderedCollection](crate::OrderedCollection).
///
/// Handles are cheap to copy. A handle remains valid until the entry it refers to is deleted; operations on other
/// entries, including deletes and the rotations they cause, never invalidate it. A handle whose entry has been
/// deleted, or that belongs to another collection, is rejected by every operation that accepts one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Entry {
    owner: usize,
    index: usize,
    generation: u64,
}

impl Entry {
    pub(crate) fn index(&self) -> usize {
        self.index
    }
}

pub(crate) struct Node<U> {
    pub user_struct: U,
    color: bool,
    parent: Link,
    left: Link,
    right: Link,
}

impl<U> Node<U> {
    fn new(user_struct: U) -> Self {
        Node { user_struct, color: RED, parent: None, left: None, right: None }
    }
}

enum Slot<U> {
    Occupied { generation: u64, node: Node<U> },
    Vacant { generation: u64, next_free: Link },
}

impl<U> Slot<U> {
    fn generation(&self) -> u64 {
        match self {
            Slot::Occupied { generation, .. } | Slot::Vacant { generation, .. } => *generation,
        }
    }
}

/// The arena holding every node of a tree.
pub(crate) struct Storage<U> {
    /// Identifier stamped into every [Entry] handed out by this storage.
    owner: usize,
    /// The node slots, occupied or not.
    slots: Vec<Slot<U>>,
    /// The number of occupied slots.
    length: usize,
    /// Head of the linked list of vacant slots.
    available: Link,
    /// Optional upper bound on the number of live nodes.
    limit: Option<usize>,
}

impl<U> Storage<U> {
    /// Create a new, empty storage container with a fresh owner id. Does not allocate.
    pub fn new() -> Storage<U> {
        Storage {
            owner: NEXT_OWNER.fetch_add(1, Ordering::Relaxed),
            slots: Vec::new(),
            length: 0,
            available: None,
            limit: None,
        }
    }

    /// Create a storage container with room for `capacity` nodes before it needs to grow.
    pub fn try_with_capacity(capacity: usize) -> Result<Storage<U>> {
        let mut storage = Self::new();
        storage.slots.try_reserve_exact(capacity).map_err(|_| Error::OutOfResources)?;
        Ok(storage)
    }

    /// Get the number of nodes in the storage container.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Get the number of nodes the storage container can hold without allocating.
    pub fn capacity(&self) -> usize {
        self.slots.capacity() - self.slots.len() + self.vacant()
    }

    fn vacant(&self) -> usize {
        self.slots.len() - self.length
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn set_limit(&mut self, limit: Option<usize>) {
        self.limit = limit;
    }

    /// Add a new node to the storage container, returning the handle of the node.
    ///
    /// The node is red and unlinked. A vacant slot is reused before the arena is grown. If the node limit is
    /// reached, or the arena cannot grow, the user structure is handed back.
    ///
    /// # Time Complexity
    ///
    /// O(1) amortized
    ///
    pub fn add(&mut self, user_struct: U) -> core::result::Result<Entry, U> {
        if self.limit.is_some_and(|limit| self.length >= limit) {
            log::debug!("Node limit of {} reached.", self.length);
            return Err(user_struct);
        }

        let index = match self.available {
            Some(index) => {
                let Slot::Vacant { generation, next_free } = self.slots[index] else {
                    panic!("Occupied slot on the free list.");
                };
                log::trace!("Reusing slot {index} (generation {generation}).");
                self.available = next_free;
                self.slots[index] = Slot::Occupied { generation, node: Node::new(user_struct) };
                index
            }
            None => {
                if self.slots.try_reserve(1).is_err() {
                    log::debug!("Failed to grow node storage past {} slots.", self.slots.len());
                    return Err(user_struct);
                }
                self.slots.push(Slot::Occupied { generation: 0, node: Node::new(user_struct) });
                self.slots.len() - 1
            }
        };

        self.length += 1;
        Ok(self.entry(index))
    }

    /// Delete a node from the storage container, returning the user structure it held.
    ///
    /// The slot's generation is bumped so that outstanding handles to it are recognized as stale.
    ///
    /// # Time Complexity
    ///
    /// O(1)
    ///
    pub fn delete(&mut self, index: usize) -> U {
        let generation = self.slots[index].generation() + 1;
        let slot = core::mem::replace(&mut self.slots[index], Slot::Vacant { generation, next_free: self.available });
        let Slot::Occupied { node, .. } = slot else {
            panic!("Deleted a vacant slot.");
        };
        self.available = Some(index);
        self.length -= 1;
        node.user_struct
    }

    /// Builds the handle for the node currently occupying `index`.
    pub fn entry(&self, index: usize) -> Entry {
        Entry { owner: self.owner, index, generation: self.slots[index].generation() }
    }

    /// Returns true if `entry` was handed out by this storage and its node has not been deleted since.
    pub fn is_live(&self, entry: Entry) -> bool {
        entry.owner == self.owner
            && matches!(
                self.slots.get(entry.index),
                Some(Slot::Occupied { generation, .. }) if *generation == entry.generation
            )
    }

    fn node(&self, index: usize) -> &Node<U> {
        match &self.slots[index] {
            Slot::Occupied { node, .. } => node,
            Slot::Vacant { .. } => panic!("Vacant slot {index} is linked into the tree."),
        }
    }

    fn node_mut(&mut self, index: usize) -> &mut Node<U> {
        match &mut self.slots[index] {
            Slot::Occupied { node, .. } => node,
            Slot::Vacant { .. } => panic!("Vacant slot {index} is linked into the tree."),
        }
    }

    pub fn user_struct(&self, index: usize) -> &U {
        &self.node(index).user_struct
    }

    pub fn parent(&self, index: usize) -> Link {
        self.node(index).parent
    }

    pub fn set_parent(&mut self, index: usize, parent: Link) {
        self.node_mut(index).parent = parent;
    }

    pub fn left(&self, index: usize) -> Link {
        self.node(index).left
    }

    pub fn set_left(&mut self, index: usize, left: Link) {
        self.node_mut(index).left = left;
    }

    pub fn right(&self, index: usize) -> Link {
        self.node(index).right
    }

    pub fn set_right(&mut self, index: usize, right: Link) {
        self.node_mut(index).right = right;
    }

    /// The color of a link, sentinel leaves being black.
    pub fn color(&self, link: Link) -> bool {
        match link {
            Some(index) => self.node(index).color,
            None => BLACK,
        }
    }

    pub fn set_color(&mut self, link: Link, color: bool) {
        if let Some(index) = link {
            self.node_mut(index).color = color;
        }
    }

    pub fn is_red(&self, link: Link) -> bool {
        self.color(link) == RED
    }

    pub fn is_black(&self, link: Link) -> bool {
        self.color(link) == BLACK
    }

    pub fn set_red(&mut self, link: Link) {
        self.set_color(link, RED);
    }

    pub fn set_black(&mut self, link: Link) {
        self.set_color(link, BLACK);
    }

    /// Returns the other child of `index`'s parent.
    pub fn sibling(&self, index: usize) -> Link {
        let parent = self.parent(index)?;
        match Some(index) {
            link if link == self.left(parent) => self.right(parent),
            link if link == self.right(parent) => self.left(parent),
            _ => panic!("Node is not a child of its parent."),
        }
    }

    /// Returns the left most node of the subtree rooted at `index`.
    pub fn subtree_min(&self, index: usize) -> usize {
        let mut current = index;
        while let Some(left) = self.left(current) {
            current = left;
        }
        current
    }

    /// Returns the right most node of the subtree rooted at `index`.
    pub fn subtree_max(&self, index: usize) -> usize {
        let mut current = index;
        while let Some(right) = self.right(current) {
            current = right;
        }
        current
    }

    /// Returns the in-order successor of `index` within its right subtree.
    pub fn successor(&self, index: usize) -> Link {
        self.right(index).map(|right| self.subtree_min(right))
    }

    /// Returns the in-order predecessor of `index` within its left subtree.
    pub fn predecessor(&self, index: usize) -> Link {
        self.left(index).map(|left| self.subtree_max(left))
    }

    /// Returns the height of the subtree under `link`.
    pub fn height(&self, link: Link) -> usize {
        match link {
            None => 0,
            Some(index) => 1 + core::cmp::max(self.height(self.left(index)), self.height(self.right(index))),
        }
    }
}
