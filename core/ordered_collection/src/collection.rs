//! Ordered Collection - Red-Black Tree
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::{cmp::Ordering, fmt, iter::FusedIterator};

use crate::{
    node::{Entry, Link, Storage},
    Error, Result, UserStructKey,
};

/// Orders two user structures by their embedded keys.
pub type UserStructCompare<U> = fn(&U, &U) -> Ordering;

/// Orders a standalone key against the key embedded in a user structure.
pub type KeyCompare<K, U> = fn(&K, &U) -> Ordering;

/// The reasons an [insert](OrderedCollection::insert) can be turned down.
///
/// Both variants hand the rejected user structure back to the caller, who remains responsible for it.
#[derive(Debug)]
pub enum InsertError<U> {
    /// A structure with an equal key is already in the collection.
    AlreadyExists {
        /// The entry holding the structure that was already present.
        existing: Entry,
        /// The structure that was not inserted.
        user_struct: U,
    },
    /// No memory was available for the new node.
    OutOfResources {
        /// The structure that was not inserted.
        user_struct: U,
    },
}

impl<U> InsertError<U> {
    /// The status code matching this error.
    pub fn status(&self) -> Error {
        match self {
            InsertError::AlreadyExists { .. } => Error::AlreadyExists,
            InsertError::OutOfResources { .. } => Error::OutOfResources,
        }
    }

    /// The entry already holding an equal key, if that is why the insert failed.
    pub fn existing(&self) -> Option<Entry> {
        match self {
            InsertError::AlreadyExists { existing, .. } => Some(*existing),
            InsertError::OutOfResources { .. } => None,
        }
    }

    /// Gives back the structure that was not inserted.
    pub fn into_user_struct(self) -> U {
        match self {
            InsertError::AlreadyExists { user_struct, .. } | InsertError::OutOfResources { user_struct } => user_struct,
        }
    }
}

impl<U> fmt::Display for InsertError<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.status(), f)
    }
}

/// A collection of user structures kept in the order defined by its comparators.
///
/// The collection owns its tree nodes but not the structures they refer to: each node holds the handle `U` the
/// caller inserted and gives it back on [delete](Self::delete). `K` is the standalone key type accepted by
/// [find](Self::find).
///
/// The tree is a red-black tree, so lookups, inserts, and deletes take O(log n) comparisons. Nodes are kept in an
/// arena that never moves them, so an [Entry] returned by any operation stays valid until that very entry is
/// deleted.
///
/// The collection performs no internal synchronization.
pub struct OrderedCollection<U, K: ?Sized> {
    storage: Storage<U>,
    root: Link,
    user_struct_compare: UserStructCompare<U>,
    key_compare: KeyCompare<K, U>,
}

impl<U, K: ?Sized> OrderedCollection<U, K> {
    /// Creates an empty collection ordered by the given comparators.
    ///
    /// The comparators must agree with each other: for any two structures `a` and `b` with keys `ka` and `kb`,
    /// `user_struct_compare(a, b)` and `key_compare(ka, b)` must return the same ordering.
    ///
    /// No memory is allocated until the first insert.
    pub fn init(user_struct_compare: UserStructCompare<U>, key_compare: KeyCompare<K, U>) -> Self {
        OrderedCollection { storage: Storage::new(), root: None, user_struct_compare, key_compare }
    }

    /// Creates an empty collection with room for `capacity` entries before node memory needs to grow.
    ///
    /// # Errors
    ///
    /// Returns [OutOfResources](Error::OutOfResources) if the memory could not be reserved.
    ///
    pub fn try_with_capacity(
        capacity: usize,
        user_struct_compare: UserStructCompare<U>,
        key_compare: KeyCompare<K, U>,
    ) -> Result<Self> {
        Ok(OrderedCollection {
            storage: Storage::try_with_capacity(capacity)?,
            root: None,
            user_struct_compare,
            key_compare,
        })
    }

    /// Returns the number of entries in the collection.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Indicates whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.storage.len() == 0
    }

    /// Returns how many more entries fit before node memory needs to grow.
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    /// Returns the height of the tree.
    pub fn height(&self) -> usize {
        self.storage.height(self.root)
    }

    /// Returns the maximum number of entries the collection accepts, if limited.
    pub fn node_limit(&self) -> Option<usize> {
        self.storage.limit()
    }

    /// Caps the number of entries the collection accepts. Inserts beyond the cap fail with
    /// [OutOfResources](InsertError::OutOfResources). Entries already present are never dropped.
    pub fn set_node_limit(&mut self, limit: Option<usize>) {
        self.storage.set_limit(limit);
    }

    /// Inserts a user structure into the collection.
    ///
    /// Returns the entry of the new node. If a structure with an equal key is already present, nothing is inserted
    /// and the error carries both the existing entry and the rejected structure.
    ///
    /// # Time Complexity
    ///
    /// O(log n)
    ///
    /// # Errors
    ///
    /// Returns [AlreadyExists](InsertError::AlreadyExists) if an equal key is already in the collection.
    ///
    /// Returns [OutOfResources](InsertError::OutOfResources) if no memory is available for the node.
    ///
    pub fn insert(&mut self, user_struct: U) -> core::result::Result<Entry, InsertError<U>> {
        let mut parent = None;
        let mut is_left_child = false;
        let mut current = self.root;
        while let Some(node) = current {
            parent = Some(node);
            match (self.user_struct_compare)(&user_struct, self.storage.user_struct(node)) {
                Ordering::Less => {
                    is_left_child = true;
                    current = self.storage.left(node);
                }
                Ordering::Greater => {
                    is_left_child = false;
                    current = self.storage.right(node);
                }
                Ordering::Equal => {
                    return Err(InsertError::AlreadyExists { existing: self.storage.entry(node), user_struct });
                }
            }
        }

        let entry = self.storage.add(user_struct).map_err(|user_struct| InsertError::OutOfResources { user_struct })?;
        let node = entry.index();

        self.storage.set_parent(node, parent);
        match parent {
            None => self.root = Some(node),
            Some(parent) if is_left_child => self.storage.set_left(parent, Some(node)),
            Some(parent) => self.storage.set_right(parent, Some(node)),
        }
        self.fixup_add(node);
        self.validate_if_enabled();

        Ok(entry)
    }

    /// Searches for the entry whose key compares equal to `key`.
    ///
    /// Returns `None` if no such entry exists.
    ///
    /// # Time Complexity
    ///
    /// O(log n)
    ///
    pub fn find(&self, key: &K) -> Option<Entry> {
        let mut current = self.root;
        while let Some(node) = current {
            match (self.key_compare)(key, self.storage.user_struct(node)) {
                Ordering::Equal => return Some(self.storage.entry(node)),
                Ordering::Less => current = self.storage.left(node),
                Ordering::Greater => current = self.storage.right(node),
            }
        }
        None
    }

    /// Returns the user structure referenced by `entry`.
    ///
    /// # Errors
    ///
    /// Returns [InvalidEntry](Error::InvalidEntry) if the entry was deleted or belongs to another collection.
    ///
    pub fn user_struct(&self, entry: Entry) -> Result<&U> {
        if !self.storage.is_live(entry) {
            return Err(Error::InvalidEntry);
        }
        Ok(self.storage.user_struct(entry.index()))
    }

    /// Returns the entry with the smallest key, or `None` if the collection is empty.
    ///
    /// # Time Complexity
    ///
    /// O(log n)
    ///
    pub fn min(&self) -> Option<Entry> {
        self.root.map(|root| self.storage.entry(self.storage.subtree_min(root)))
    }

    /// Returns the entry with the largest key, or `None` if the collection is empty.
    ///
    /// # Time Complexity
    ///
    /// O(log n)
    ///
    pub fn max(&self) -> Option<Entry> {
        self.root.map(|root| self.storage.entry(self.storage.subtree_max(root)))
    }

    /// Returns the entry following `entry` in key order.
    ///
    /// Returns `None` if `entry` holds the largest key. A deleted or foreign entry has no neighbors either.
    ///
    /// # Time Complexity
    ///
    /// O(log n), O(1) amortized over a full traversal.
    ///
    pub fn next(&self, entry: Entry) -> Option<Entry> {
        if !self.storage.is_live(entry) {
            log::warn!("Next requested for an invalid entry {:?}.", entry);
            return None;
        }
        self.next_index(entry.index()).map(|index| self.storage.entry(index))
    }

    /// Returns the entry preceding `entry` in key order.
    ///
    /// Returns `None` if `entry` holds the smallest key. A deleted or foreign entry has no neighbors either.
    ///
    /// # Time Complexity
    ///
    /// O(log n), O(1) amortized over a full traversal.
    ///
    pub fn prev(&self, entry: Entry) -> Option<Entry> {
        if !self.storage.is_live(entry) {
            log::warn!("Prev requested for an invalid entry {:?}.", entry);
            return None;
        }
        self.prev_index(entry.index()).map(|index| self.storage.entry(index))
    }

    fn next_index(&self, node: usize) -> Link {
        if let Some(successor) = self.storage.successor(node) {
            return Some(successor);
        }

        let mut current = node;
        while let Some(parent) = self.storage.parent(current) {
            if self.storage.left(parent) == Some(current) {
                return Some(parent);
            }
            current = parent;
        }
        None
    }

    fn prev_index(&self, node: usize) -> Link {
        if let Some(predecessor) = self.storage.predecessor(node) {
            return Some(predecessor);
        }

        let mut current = node;
        while let Some(parent) = self.storage.parent(current) {
            if self.storage.right(parent) == Some(current) {
                return Some(parent);
            }
            current = parent;
        }
        None
    }

    /// Returns an iterator over the user structures in key order.
    pub fn iter(&self) -> Iter<'_, U, K> {
        Iter {
            collection: self,
            front: self.root.map(|root| self.storage.subtree_min(root)),
            back: self.root.map(|root| self.storage.subtree_max(root)),
            remaining: self.len(),
        }
    }

    /// Deletes `entry` from the collection, giving back the user structure it referenced.
    ///
    /// Every other entry handle stays valid.
    ///
    /// # Time Complexity
    ///
    /// O(log n)
    ///
    /// # Errors
    ///
    /// Returns [InvalidEntry](Error::InvalidEntry) if the entry was deleted already or belongs to another
    /// collection.
    ///
    pub fn delete(&mut self, entry: Entry) -> Result<U> {
        if !self.storage.is_live(entry) {
            log::warn!("Refusing to delete invalid entry {:?}.", entry);
            return Err(Error::InvalidEntry);
        }

        self.remove_node_from_tree(entry.index());
        let user_struct = self.storage.delete(entry.index());
        self.validate_if_enabled();

        Ok(user_struct)
    }

    /// Deletes the entry whose key compares equal to `key`, giving back its user structure.
    ///
    /// # Time Complexity
    ///
    /// O(log n)
    ///
    /// # Errors
    ///
    /// Returns [NotFound](Error::NotFound) if no entry has an equal key.
    ///
    pub fn delete_key(&mut self, key: &K) -> Result<U> {
        let entry = self.find(key).ok_or(Error::NotFound)?;
        self.delete(entry)
    }

    /// Tears the collection down.
    ///
    /// The collection should be emptied first: it never owned the structures its entries refer to, so handles still
    /// in it are simply dropped.
    ///
    /// # Errors
    ///
    /// Returns [NotEmpty](Error::NotEmpty) if entries were left in the collection.
    ///
    pub fn uninit(self) -> Result<()> {
        if !self.is_empty() {
            log::error!("Uninitializing an ordered collection that still holds {} entries.", self.len());
            return Err(Error::NotEmpty);
        }
        Ok(())
    }

    /// Unlinks a node from the tree, leaving its slot for the storage to reclaim.
    fn remove_node_from_tree(&mut self, node: usize) {
        // With two children, trade places with the successor so that the node has at most one child. The nodes
        // themselves move rather than their payloads, so no other entry changes identity.
        if self.storage.left(node).is_some() {
            if let Some(successor) = self.storage.successor(node) {
                self.swap_with_successor(node, successor);
            }
        }

        let parent = self.storage.parent(node);
        match self.storage.left(node).or(self.storage.right(node)) {
            // A node with a single child is black, and the child a red leaf.
            Some(child) => {
                self.storage.set_parent(child, parent);
                self.replace_child(parent, node, Some(child));
                self.storage.set_black(Some(child));
            }
            // A leaf: fixup the tree first so rotates work as expected, then remove the node.
            None => {
                if self.storage.is_black(Some(node)) {
                    self.fixup_delete(node);
                }
                let parent = self.storage.parent(node);
                self.replace_child(parent, node, None);
            }
        }
    }

    /// Moves `successor`, the left most node of `node`'s right subtree, into `node`'s place and `node` into
    /// `successor`'s place. Colors travel with the position.
    fn swap_with_successor(&mut self, node: usize, successor: usize) {
        let node_parent = self.storage.parent(node);
        let node_left = self.storage.left(node);
        let node_right = self.storage.right(node);
        let successor_parent = self.storage.parent(successor);
        let successor_right = self.storage.right(successor);

        let node_color = self.storage.color(Some(node));
        self.storage.set_color(Some(node), self.storage.color(Some(successor)));
        self.storage.set_color(Some(successor), node_color);

        // The successor takes the node's place.
        self.replace_child(node_parent, node, Some(successor));
        self.storage.set_parent(successor, node_parent);
        self.storage.set_left(successor, node_left);
        if let Some(left) = node_left {
            self.storage.set_parent(left, Some(successor));
        }

        if node_right == Some(successor) {
            self.storage.set_right(successor, Some(node));
            self.storage.set_parent(node, Some(successor));
        } else {
            self.storage.set_right(successor, node_right);
            if let Some(right) = node_right {
                self.storage.set_parent(right, Some(successor));
            }
            if let Some(successor_parent) = successor_parent {
                self.storage.set_left(successor_parent, Some(node));
            }
            self.storage.set_parent(node, successor_parent);
        }

        // The node inherits the successor's children, of which there is at most a right one.
        self.storage.set_left(node, None);
        self.storage.set_right(node, successor_right);
        if let Some(right) = successor_right {
            self.storage.set_parent(right, Some(node));
        }
    }

    /// Points whichever link of `parent` referenced `old` at `new`. A `None` parent means `old` was the root.
    fn replace_child(&mut self, parent: Link, old: usize, new: Link) {
        match parent {
            None => self.root = new,
            Some(parent) if self.storage.left(parent) == Some(old) => self.storage.set_left(parent, new),
            Some(parent) => self.storage.set_right(parent, new),
        }
    }

    /// Rotate the subtree to the left and return the new root.
    fn rotate_left(&mut self, node: usize) -> usize {
        let Some(right_child) = self.storage.right(node) else {
            panic!("Rotating left requires a right child.");
        };
        let parent = self.storage.parent(node);
        log::trace!("Rotating left around slot {node}.");

        let inner = self.storage.left(right_child);
        self.storage.set_right(node, inner);
        if let Some(inner) = inner {
            self.storage.set_parent(inner, Some(node));
        }

        self.storage.set_left(right_child, Some(node));
        self.storage.set_parent(node, Some(right_child));

        self.storage.set_parent(right_child, parent);
        self.replace_child(parent, node, Some(right_child));
        right_child
    }

    /// Rotate the subtree to the right and return the new root.
    fn rotate_right(&mut self, node: usize) -> usize {
        let Some(left_child) = self.storage.left(node) else {
            panic!("Rotating right requires a left child.");
        };
        let parent = self.storage.parent(node);
        log::trace!("Rotating right around slot {node}.");

        let inner = self.storage.right(left_child);
        self.storage.set_left(node, inner);
        if let Some(inner) = inner {
            self.storage.set_parent(inner, Some(node));
        }

        self.storage.set_right(left_child, Some(node));
        self.storage.set_parent(node, Some(left_child));

        self.storage.set_parent(left_child, parent);
        self.replace_child(parent, node, Some(left_child));
        left_child
    }

    /// Updates the tree after a node has been added, to meet the red-black tree properties.
    fn fixup_add(&mut self, node: usize) {
        // Case 1: The node is the root of the tree, no fixups needed.
        let Some(mut parent) = self.storage.parent(node) else {
            self.storage.set_black(Some(node));
            return;
        };

        // The parent is black, no fixups needed.
        if self.storage.is_black(Some(parent)) {
            return;
        }

        // Case 2: A red root only needs repainting.
        let Some(grandparent) = self.storage.parent(parent) else {
            self.storage.set_black(Some(parent));
            return;
        };
        let uncle = self.storage.sibling(parent);

        // Case 3: Uncle is red, recolor parent, grandparent, uncle
        if self.storage.is_red(uncle) {
            self.storage.set_black(Some(parent));
            self.storage.set_red(Some(grandparent));
            self.storage.set_black(uncle);

            // Recursively fixup the grandparent
            self.fixup_add(grandparent);
        }
        // Parent is left child of grandparent
        else if self.storage.left(grandparent) == Some(parent) {
            // Case 4a: uncle is black and node is left->right "inner child" of its grandparent
            if self.storage.right(parent) == Some(node) {
                self.rotate_left(parent);
                parent = node;
            }
            // Case 5a: uncle is black and node is left->left "outer child" of its grandparent
            self.rotate_right(grandparent);
            self.storage.set_black(Some(parent));
            self.storage.set_red(Some(grandparent));
        }
        // Parent is right child of grandparent
        else {
            // Case 4b: uncle is black and node is right->left "inner child" of its grandparent
            if self.storage.left(parent) == Some(node) {
                self.rotate_right(parent);
                parent = node;
            }
            // Case 5b: uncle is black and node is right->right "outer child" of its grandparent
            self.rotate_left(grandparent);
            self.storage.set_black(Some(parent));
            self.storage.set_red(Some(grandparent));
        }
    }

    /// Updates the tree before a black leaf is unlinked, to meet the red-black tree properties.
    ///
    /// `node` carries an extra black that has to be pushed up the tree or absorbed by a rotation.
    fn fixup_delete(&mut self, node: usize) {
        // Case 1: The node is the root of the tree, no fixups needed.
        let Some(parent) = self.storage.parent(node) else {
            self.storage.set_black(Some(node));
            return;
        };

        let mut sibling = self.storage.sibling(node);

        // Case 2: The sibling is red
        if self.storage.is_red(sibling) {
            self.storage.set_black(sibling);
            self.storage.set_red(Some(parent));
            if self.storage.left(parent) == Some(node) {
                self.rotate_left(parent);
            } else {
                self.rotate_right(parent);
            }
            sibling = self.storage.sibling(node); // Update sibling for fall through cases 3-6
        }

        let Some(mut sibling) = sibling else {
            panic!("Black node without a sibling, the tree is unbalanced.");
        };

        // Cases 3+4: Black sibling with two black children
        if self.storage.is_black(self.storage.left(sibling)) && self.storage.is_black(self.storage.right(sibling)) {
            self.storage.set_red(Some(sibling));

            // Case 3: Black sibling with two black children + red parent
            if self.storage.is_red(Some(parent)) {
                self.storage.set_black(Some(parent));
            }
            // Case 4: Black sibling with two black children + black parent
            else {
                self.fixup_delete(parent);
            }
            return;
        }

        // Case 5+6: Black sibling with at least one red child
        let node_is_left_child = self.storage.left(parent) == Some(node);

        // Case 5: "outer nephew" is black. Recolor sibling and its child, rotate around sibling
        if node_is_left_child && self.storage.is_black(self.storage.right(sibling)) {
            self.storage.set_black(self.storage.left(sibling));
            self.storage.set_red(Some(sibling));
            sibling = self.rotate_right(sibling);
        } else if !node_is_left_child && self.storage.is_black(self.storage.left(sibling)) {
            self.storage.set_black(self.storage.right(sibling));
            self.storage.set_red(Some(sibling));
            sibling = self.rotate_left(sibling);
        }

        // Case 6: "outer nephew" is red. Recolor sibling + parent + sibling's child, rotate around parent
        self.storage.set_color(Some(sibling), self.storage.color(Some(parent)));
        self.storage.set_black(Some(parent));
        if node_is_left_child {
            self.storage.set_black(self.storage.right(sibling));
            self.rotate_left(parent);
        } else {
            self.storage.set_black(self.storage.left(sibling));
            self.rotate_right(parent);
        }
    }

    /// Checks every ordering and red-black invariant of the tree.
    ///
    /// # Errors
    ///
    /// Returns [Corrupted](Error::Corrupted) if any invariant is violated, logging the first violation found.
    ///
    pub fn validate(&self) -> Result<()> {
        if self.storage.is_red(self.root) {
            log::error!("Validation failed: the root is red.");
            return Err(Error::Corrupted);
        }
        if let Some(root) = self.root {
            if self.storage.parent(root).is_some() {
                log::error!("Validation failed: the root has a parent.");
                return Err(Error::Corrupted);
            }
        }

        let (_, count) = self.validate_subtree(self.root)?;
        if count != self.len() {
            log::error!("Validation failed: {count} nodes reachable, {} expected.", self.len());
            return Err(Error::Corrupted);
        }

        let mut current = self.root.map(|root| self.storage.subtree_min(root));
        while let Some(node) = current {
            let next = self.next_index(node);
            if let Some(next) = next {
                let order = (self.user_struct_compare)(self.storage.user_struct(node), self.storage.user_struct(next));
                if order != Ordering::Less {
                    log::error!("Validation failed: slots {node} and {next} are out of order.");
                    return Err(Error::Corrupted);
                }
            }
            current = next;
        }
        Ok(())
    }

    /// Returns the black height and the node count of the subtree, checking its links and colors.
    fn validate_subtree(&self, link: Link) -> Result<(usize, usize)> {
        let Some(node) = link else {
            return Ok((1, 0));
        };

        for child in [self.storage.left(node), self.storage.right(node)].into_iter().flatten() {
            if self.storage.parent(child) != Some(node) {
                log::error!("Validation failed: slot {child} does not point back to its parent {node}.");
                return Err(Error::Corrupted);
            }
            if self.storage.is_red(Some(node)) && self.storage.is_red(Some(child)) {
                log::error!("Validation failed: red slot {node} has red child {child}.");
                return Err(Error::Corrupted);
            }
        }

        let (left_height, left_count) = self.validate_subtree(self.storage.left(node))?;
        let (right_height, right_count) = self.validate_subtree(self.storage.right(node))?;
        if left_height != right_height {
            log::error!("Validation failed: black heights {left_height} and {right_height} differ under slot {node}.");
            return Err(Error::Corrupted);
        }

        let height = left_height + usize::from(self.storage.is_black(Some(node)));
        Ok((height, left_count + right_count + 1))
    }

    fn validate_if_enabled(&self) {
        #[cfg(feature = "validate")]
        if let Err(err) = self.validate() {
            panic!("Ordered collection failed validation: {err}");
        }
    }
}

impl<U> OrderedCollection<U, U::Key>
where
    U: UserStructKey,
{
    /// Creates an empty collection ordered by the [UserStructKey] of its structures.
    pub fn keyed() -> Self {
        Self::init(compare_user_structs::<U>, compare_key::<U>)
    }
}

fn compare_user_structs<U: UserStructKey>(a: &U, b: &U) -> Ordering {
    a.key().cmp(b.key())
}

fn compare_key<U: UserStructKey>(key: &U::Key, user_struct: &U) -> Ordering {
    key.cmp(user_struct.key())
}

impl<U> Default for OrderedCollection<U, U::Key>
where
    U: UserStructKey,
{
    fn default() -> Self {
        Self::keyed()
    }
}

impl<U, K: ?Sized> fmt::Debug for OrderedCollection<U, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedCollection")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("height", &self.height())
            .finish()
    }
}

impl<'a, U, K: ?Sized> IntoIterator for &'a OrderedCollection<U, K> {
    type Item = &'a U;
    type IntoIter = Iter<'a, U, K>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An in-order iterator over the user structures of an [OrderedCollection].
pub struct Iter<'a, U, K: ?Sized> {
    collection: &'a OrderedCollection<U, K>,
    front: Link,
    back: Link,
    remaining: usize,
}

impl<'a, U, K: ?Sized> Iterator for Iter<'a, U, K> {
    type Item = &'a U;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.front?;
        self.remaining -= 1;
        self.front = self.collection.next_index(node);
        Some(self.collection.storage.user_struct(node))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<U, K: ?Sized> DoubleEndedIterator for Iter<'_, U, K> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.back?;
        self.remaining -= 1;
        self.back = self.collection.prev_index(node);
        Some(self.collection.storage.user_struct(node))
    }
}

impl<U, K: ?Sized> ExactSizeIterator for Iter<'_, U, K> {}

impl<U, K: ?Sized> FusedIterator for Iter<'_, U, K> {}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::vec::Vec;

    fn new_collection() -> OrderedCollection<i32, i32> {
        OrderedCollection::keyed()
    }

    fn keys<U: Copy, K: ?Sized>(collection: &OrderedCollection<U, K>) -> Vec<U> {
        collection.iter().copied().collect()
    }

    fn key_of(collection: &OrderedCollection<i32, i32>, link: Link) -> Option<i32> {
        link.map(|node| *collection.storage.user_struct(node))
    }

    #[test]
    fn simple_test() {
        let mut collection = new_collection();

        assert!(collection.min().is_none());
        assert!(collection.max().is_none());
        assert!(collection.find(&0).is_none());
        assert!(collection.is_empty());

        for key in [5, 3, 7, 2, 6, 8, 9, 10] {
            assert!(collection.insert(key).is_ok());
        }
        assert_eq!(collection.len(), 8);
        let err = collection.insert(10).unwrap_err(); // Can't add the same value twice
        assert_eq!(err.status(), Error::AlreadyExists);
        assert_eq!(collection.len(), 8);

        assert_eq!(keys(&collection), [2, 3, 5, 6, 7, 8, 9, 10]);
        assert!(collection.validate().is_ok());
    }

    #[test]
    fn test_forward_and_backward_listing() {
        let mut collection = new_collection();
        for key in [5, 3, 8, 1, 4] {
            collection.insert(key).unwrap();
        }

        let mut forward = Vec::new();
        let mut current = collection.min();
        while let Some(entry) = current {
            forward.push(*collection.user_struct(entry).unwrap());
            current = collection.next(entry);
        }
        assert_eq!(forward, [1, 3, 4, 5, 8]);

        let mut backward = Vec::new();
        let mut current = collection.max();
        while let Some(entry) = current {
            backward.push(*collection.user_struct(entry).unwrap());
            current = collection.prev(entry);
        }
        assert_eq!(backward, [8, 5, 4, 3, 1]);

        assert_eq!(collection.iter().rev().copied().collect::<Vec<_>>(), backward);
    }

    #[test]
    fn test_duplicate_returns_existing_entry() {
        #[derive(Debug, PartialEq)]
        struct UserStruct {
            key: i32,
            tag: &'static str,
        }

        let first = UserStruct { key: 10, tag: "first" };
        let second = UserStruct { key: 10, tag: "second" };

        let mut collection: OrderedCollection<&UserStruct, i32> =
            OrderedCollection::init(|a, b| a.key.cmp(&b.key), |key, user_struct| key.cmp(&user_struct.key));

        let entry = collection.insert(&first).unwrap();
        match collection.insert(&second) {
            Err(InsertError::AlreadyExists { existing, user_struct }) => {
                assert_eq!(existing, entry);
                assert_eq!(user_struct.tag, "second");
                assert_eq!(collection.user_struct(existing).unwrap().tag, "first");
            }
            other => panic!("unexpected insert result {other:?}"),
        }
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn test_insert_find_delete_round_trip() {
        let mut collection = new_collection();
        let entry = collection.insert(7).unwrap();
        assert_eq!(collection.find(&7), Some(entry));
        assert_eq!(collection.user_struct(entry), Ok(&7));

        assert_eq!(collection.delete(entry), Ok(7));
        assert!(collection.find(&7).is_none());
        assert!(collection.min().is_none());
        assert!(collection.max().is_none());
        assert!(collection.uninit().is_ok());
    }

    #[test]
    fn test_delete_by_key() {
        let mut collection = new_collection();
        for key in [4, 2, 6] {
            collection.insert(key).unwrap();
        }
        let six = collection.find(&6).unwrap();

        assert_eq!(collection.delete_key(&4), Ok(4));
        assert_eq!(collection.delete_key(&4), Err(Error::NotFound));
        assert_eq!(collection.delete_key(&5), Err(Error::NotFound));
        assert_eq!(collection.user_struct(six), Ok(&6));
        assert_eq!(keys(&collection), [2, 6]);
    }

    #[test]
    fn test_stale_entries_are_rejected() {
        let mut collection = new_collection();
        let a = collection.insert(1).unwrap();
        let b = collection.insert(2).unwrap();

        assert_eq!(collection.delete(a), Ok(1));
        assert_eq!(collection.delete(a), Err(Error::InvalidEntry));
        assert_eq!(collection.user_struct(a), Err(Error::InvalidEntry));
        assert!(collection.next(a).is_none());
        assert!(collection.prev(a).is_none());

        // The freed slot is reused, the old handle still does not resolve.
        let c = collection.insert(3).unwrap();
        assert_eq!(a.index(), c.index());
        assert_eq!(collection.user_struct(a), Err(Error::InvalidEntry));
        assert_eq!(collection.next(b), Some(c));

        // Handles from another collection are foreign.
        let mut other = new_collection();
        let foreign = other.insert(2).unwrap();
        assert_eq!(collection.delete(foreign), Err(Error::InvalidEntry));
        assert_eq!(collection.len(), 2);
    }

    #[test]
    fn test_uninit_non_empty() {
        let mut collection = new_collection();
        collection.insert(1).unwrap();
        assert_eq!(collection.uninit(), Err(Error::NotEmpty));
    }

    #[test]
    fn test_node_limit() {
        let mut collection = new_collection();
        collection.set_node_limit(Some(2));
        assert_eq!(collection.node_limit(), Some(2));
        collection.insert(1).unwrap();
        collection.insert(2).unwrap();

        match collection.insert(3) {
            Err(err @ InsertError::OutOfResources { .. }) => {
                assert_eq!(err.status(), Error::OutOfResources);
                assert!(err.existing().is_none());
                assert_eq!(err.into_user_struct(), 3);
            }
            other => panic!("unexpected insert result {other:?}"),
        }

        // Duplicates are reported as such even when the collection is full.
        assert_eq!(collection.insert(2).unwrap_err().status(), Error::AlreadyExists);

        let entry = collection.find(&1).unwrap();
        collection.delete(entry).unwrap();
        assert!(collection.insert(3).is_ok());
        assert_eq!(keys(&collection), [2, 3]);
    }

    #[test]
    fn test_try_with_capacity() {
        let collection =
            OrderedCollection::<i32, i32>::try_with_capacity(64, |a, b| a.cmp(b), |k, u| k.cmp(u)).unwrap();
        assert!(collection.capacity() >= 64);
        assert!(collection.is_empty());

        let result = OrderedCollection::<i32, i32>::try_with_capacity(usize::MAX, |a, b| a.cmp(b), |k, u| k.cmp(u));
        assert_eq!(result.err(), Some(Error::OutOfResources));
    }

    #[test]
    fn test_add_case_3() {
        /* Update colors when parent and uncle nodes are red.
            [17B]                  [17B]
             /  \                  /   \
          [09B] [19B] -------->  [09B] [19R] <- Updated
                /   \                   /  \
              [18R] [75R]  Updated -> [18B] [75B] <- Updated
                      \                       \
                      [81R]                  [81R]
        */
        let mut collection = new_collection();
        collection.insert(17).unwrap();

        // Root should be black
        assert!(collection.storage.is_black(collection.root));

        // Add a node to the right, should be red
        collection.insert(19).unwrap();
        let root = collection.root.unwrap();
        assert!(collection.storage.is_red(collection.storage.right(root)));

        // Ensure no red-reds
        collection.insert(9).unwrap();
        collection.insert(18).unwrap();
        collection.insert(75).unwrap();
        let right = collection.storage.right(root).unwrap();
        assert!(collection.storage.is_black(Some(right)));
        assert!(collection.storage.is_red(collection.storage.left(right)));
        assert!(collection.storage.is_red(collection.storage.right(right)));

        // Adding a node off of 75 should cause a color change
        collection.insert(81).unwrap();
        assert!(collection.storage.is_black(collection.root));
        assert!(collection.storage.is_red(Some(right)));
        assert!(collection.storage.is_black(collection.storage.left(right)));
        let right_r = collection.storage.right(right).unwrap();
        assert!(collection.storage.is_black(Some(right_r)));
        assert!(collection.storage.is_red(collection.storage.right(right_r)));
        assert!(collection.validate().is_ok());
    }

    #[test]
    fn test_add_case_4() {
        /* Parent Node is red, uncle node is black, added node is Inner
           grandchild should cause a rotation.

          Final Expected State:
                   [17B]
                   /   \
                [09B] [24B]
                      /   \
                    [19R] [75R]
        */
        let mut collection = new_collection();
        for key in [17, 9, 19, 75, 24] {
            collection.insert(key).unwrap();
        }

        let root = collection.root.unwrap();
        assert_eq!(key_of(&collection, Some(root)), Some(17));
        assert!(collection.storage.is_black(Some(root)));

        let left = collection.storage.left(root).unwrap();
        assert_eq!(key_of(&collection, Some(left)), Some(9));
        assert!(collection.storage.is_black(Some(left)));
        assert_eq!(collection.storage.parent(left), Some(root));

        let right = collection.storage.right(root).unwrap();
        assert_eq!(key_of(&collection, Some(right)), Some(24));
        assert!(collection.storage.is_black(Some(right)));
        assert_eq!(collection.storage.parent(right), Some(root));

        let right_l = collection.storage.left(right);
        assert_eq!(key_of(&collection, right_l), Some(19));
        assert!(collection.storage.is_red(right_l));

        let right_r = collection.storage.right(right);
        assert_eq!(key_of(&collection, right_r), Some(75));
        assert!(collection.storage.is_red(right_r));
    }

    #[test]
    fn test_rotate_right() {
        /* Verifies that the rotate right function works as expected.
             [50]              [75]
             /  \              /  \
           [10][75]    <--   [50][85]
               /  \          /  \
             [70][85]      [10][70]
        */
        let mut collection = new_collection();
        let node = collection.storage.add(75).unwrap().index();
        let left = collection.storage.add(50).unwrap().index();
        let right = collection.storage.add(85).unwrap().index();
        let left_l = collection.storage.add(10).unwrap().index();
        let left_r = collection.storage.add(70).unwrap().index();

        collection.root = Some(node);
        collection.storage.set_left(node, Some(left));
        collection.storage.set_parent(left, Some(node));
        collection.storage.set_right(node, Some(right));
        collection.storage.set_parent(right, Some(node));
        collection.storage.set_left(left, Some(left_l));
        collection.storage.set_parent(left_l, Some(left));
        collection.storage.set_right(left, Some(left_r));
        collection.storage.set_parent(left_r, Some(left));

        assert_eq!(collection.rotate_right(node), left);

        assert_eq!(collection.root, Some(left));
        assert!(collection.storage.parent(left).is_none());
        assert_eq!(collection.storage.left(left), Some(left_l));
        assert_eq!(collection.storage.right(left), Some(node));
        assert_eq!(collection.storage.parent(node), Some(left));
        assert_eq!(collection.storage.left(node), Some(left_r));
        assert_eq!(collection.storage.parent(left_r), Some(node));
        assert_eq!(collection.storage.right(node), Some(right));
        assert!(collection.storage.left(left_l).is_none());
        assert!(collection.storage.right(left_l).is_none());
    }

    #[test]
    fn test_rotate_left() {
        /* Verifies that the rotate left function works as expected.
             [50]              [75]
             /  \              /  \
           [10][75]    -->   [50][85]
               /  \          /  \
             [70][85]      [10][70]
        */
        let mut collection = new_collection();
        let node = collection.storage.add(50).unwrap().index();
        let left = collection.storage.add(10).unwrap().index();
        let right = collection.storage.add(75).unwrap().index();
        let right_l = collection.storage.add(70).unwrap().index();
        let right_r = collection.storage.add(85).unwrap().index();

        collection.root = Some(node);
        collection.storage.set_left(node, Some(left));
        collection.storage.set_parent(left, Some(node));
        collection.storage.set_right(node, Some(right));
        collection.storage.set_parent(right, Some(node));
        collection.storage.set_left(right, Some(right_l));
        collection.storage.set_parent(right_l, Some(right));
        collection.storage.set_right(right, Some(right_r));
        collection.storage.set_parent(right_r, Some(right));

        assert_eq!(collection.rotate_left(node), right);

        assert_eq!(collection.root, Some(right));
        assert!(collection.storage.parent(right).is_none());
        assert_eq!(collection.storage.left(right), Some(node));
        assert_eq!(collection.storage.right(right), Some(right_r));
        assert_eq!(collection.storage.parent(node), Some(right));
        assert_eq!(collection.storage.left(node), Some(left));
        assert_eq!(collection.storage.right(node), Some(right_l));
        assert_eq!(collection.storage.parent(right_l), Some(node));
    }

    #[test]
    fn test_delete_sibling_of_red() {
        /* Deleting a black leaf whose sibling is red rotates the sibling up.
                 [10B]                    [30B]
                 /   \                    /   \
              [05B] [30R]     -->      [10B] [40B]
                    /   \                 \
                  [20B] [40B]            [20R]
        */
        let mut collection = new_collection();
        for key in [10, 5, 30, 20, 40, 50] {
            collection.insert(key).unwrap();
        }
        let fifty = collection.find(&50).unwrap();
        collection.delete(fifty).unwrap();
        assert!(collection.validate().is_ok());

        let five = collection.find(&5).unwrap();
        collection.delete(five).unwrap();
        assert!(collection.validate().is_ok());

        let root = collection.root.unwrap();
        assert_eq!(key_of(&collection, Some(root)), Some(30));
        let left = collection.storage.left(root);
        assert_eq!(key_of(&collection, left), Some(10));
        assert!(collection.storage.is_black(left));
        assert_eq!(key_of(&collection, collection.storage.right(left.unwrap())), Some(20));
        assert!(collection.storage.is_red(collection.storage.right(left.unwrap())));
        assert_eq!(key_of(&collection, collection.storage.right(root)), Some(40));
        assert_eq!(keys(&collection), [10, 20, 30, 40]);
    }

    #[test]
    fn test_delete_node_with_two_children_keeps_successor_handle() {
        let mut collection = new_collection();
        for key in 0..32 {
            collection.insert(key).unwrap();
        }

        let root = collection.root.unwrap();
        let root_entry = collection.storage.entry(root);
        let root_key = *collection.user_struct(root_entry).unwrap();
        let successor = collection.next(root_entry).unwrap();
        let predecessor = collection.prev(root_entry).unwrap();

        assert_eq!(collection.delete(root_entry), Ok(root_key));
        assert!(collection.validate().is_ok());

        // Both neighbors kept their handles and their keys.
        assert_eq!(collection.user_struct(successor), Ok(&(root_key + 1)));
        assert_eq!(collection.user_struct(predecessor), Ok(&(root_key - 1)));
        assert_eq!(collection.next(predecessor), Some(successor));
        assert_eq!(collection.prev(successor), Some(predecessor));
    }

    #[test]
    fn test_delete_with_adjacent_successor() {
        /*
                 [20B]
                 /   \
              [10B] [30B]
                       \
                      [40R]
        */
        let mut collection = new_collection();
        for key in [20, 10, 30, 40] {
            collection.insert(key).unwrap();
        }
        let thirty = collection.find(&30).unwrap();
        let forty = collection.find(&40).unwrap();
        let twenty = collection.find(&20).unwrap();

        // 30 is the direct right child of 20 and its successor.
        assert_eq!(collection.delete(twenty), Ok(20));
        assert!(collection.validate().is_ok());
        assert_eq!(collection.root, Some(thirty.index()));
        assert_eq!(collection.next(thirty), Some(forty));
        assert_eq!(keys(&collection), [10, 30, 40]);
    }

    #[test]
    fn test_forward_empty_with_prefetched_next() {
        let mut collection = new_collection();
        for key in (0..200).rev() {
            collection.insert(key).unwrap();
        }

        let mut expected = 0;
        let mut current = collection.min();
        while let Some(entry) = current {
            current = collection.next(entry);
            assert_eq!(collection.delete(entry), Ok(expected));
            assert!(collection.validate().is_ok());
            expected += 1;
        }
        assert_eq!(expected, 200);
        assert!(collection.is_empty());
        assert!(collection.uninit().is_ok());
    }

    #[test]
    fn test_backward_empty_with_prefetched_prev() {
        let mut collection = new_collection();
        for key in 0..200 {
            collection.insert(key).unwrap();
        }

        let mut expected = 199;
        let mut current = collection.max();
        while let Some(entry) = current {
            current = collection.prev(entry);
            assert_eq!(collection.delete(entry), Ok(expected));
            assert!(collection.validate().is_ok());
            expected -= 1;
        }
        assert_eq!(expected, -1);
        assert!(collection.min().is_none());
        assert!(collection.max().is_none());
        assert!(collection.find(&0).is_none());
    }

    #[test]
    fn test_get_functions_with_custom_key() {
        #[derive(Debug)]
        struct MyType(usize, usize);
        impl crate::UserStructKey for MyType {
            type Key = usize;
            fn key(&self) -> &Self::Key {
                &self.0
            }
        }

        let mut collection: OrderedCollection<MyType, usize> = OrderedCollection::keyed();
        for i in 0..256 {
            assert!(collection.insert(MyType(i + 1, i)).is_ok());
        }

        for i in 0..256 {
            let entry = collection.find(&(i + 1)).unwrap();
            assert_eq!(collection.user_struct(entry).unwrap().1, i);
        }
        assert!(collection.find(&257).is_none());
        assert!(collection.find(&0).is_none());
    }

    #[test]
    fn test_unsized_key() {
        let mut collection: OrderedCollection<&str, str> =
            OrderedCollection::init(|a, b| a.cmp(b), |key, user_struct| key.cmp(*user_struct));
        for name in ["rtc", "serial", "acpi", "pci"] {
            collection.insert(name).unwrap();
        }
        assert!(collection.find("serial").is_some());
        assert!(collection.find("usb").is_none());
        assert_eq!(collection.iter().copied().collect::<Vec<_>>(), ["acpi", "pci", "rtc", "serial"]);
    }

    #[test]
    fn test_iterator_meets_in_the_middle() {
        let mut collection = new_collection();
        for key in 0..10 {
            collection.insert(key).unwrap();
        }
        let mut iter = collection.iter();
        assert_eq!(iter.len(), 10);
        assert_eq!(iter.next(), Some(&0));
        assert_eq!(iter.next_back(), Some(&9));
        let middle: Vec<_> = iter.by_ref().copied().collect();
        assert_eq!(middle, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(iter.next().is_none());
        assert!(iter.next_back().is_none());
        assert_eq!((&collection).into_iter().count(), 10);
    }

    #[test]
    fn test_validate_detects_corruption() {
        let mut collection = new_collection();
        for key in 0..8 {
            collection.insert(key).unwrap();
        }
        assert!(collection.validate().is_ok());

        let root = collection.root;
        collection.storage.set_red(root);
        assert_eq!(collection.validate(), Err(Error::Corrupted));
        collection.storage.set_black(root);

        let min = collection.min().unwrap().index();
        let parent = collection.storage.parent(min);
        collection.storage.set_parent(min, None);
        assert_eq!(collection.validate(), Err(Error::Corrupted));
        collection.storage.set_parent(min, parent);
        assert!(collection.validate().is_ok());
    }

    #[test]
    fn test_debug() {
        let mut collection = new_collection();
        collection.insert(1).unwrap();
        let debug = std::format!("{collection:?}");
        assert!(debug.contains("len: 1"));
        assert!(debug.contains("height: 1"));
    }
}
