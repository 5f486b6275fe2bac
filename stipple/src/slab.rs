// Copyright 2026 the Stipple Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Generational slot storage and index-linked lists.
//!
//! Surfaces, glyphs and issues all live in a [`Slab`] and are threaded onto
//! one or more [`List`]s through [`Links`] stored inside the entry itself.
//! Handing out `(index, generation)` keys instead of references means a
//! discarded entry can never be reached through an old handle.

use alloc::vec::Vec;
use core::fmt::{Debug, Formatter};

/// Stable handle into a [`Slab`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct Key {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32 },
}

/// Vector-backed storage with slot reuse.
pub(crate) struct Slab<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Slab<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "slot counts are bounded by the device heap, far below u32::MAX"
    )]
    pub(crate) fn insert(&mut self, value: T) -> Key {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            let generation = match slot {
                Slot::Vacant { generation } => generation.wrapping_add(1),
                Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
            };
            *slot = Slot::Occupied { generation, value };
            Key { index, generation }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot::Occupied {
                generation: 0,
                value,
            });
            Key {
                index,
                generation: 0,
            }
        }
    }

    pub(crate) fn remove(&mut self, key: Key) -> Option<T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if !matches!(slot, Slot::Occupied { generation, .. } if *generation == key.generation) {
            return None;
        }
        let old = core::mem::replace(
            slot,
            Slot::Vacant {
                generation: key.generation,
            },
        );
        self.free.push(key.index);
        self.len -= 1;
        match old {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    pub(crate) fn get(&self, key: Key) -> Option<&T> {
        match self.slots.get(key.index as usize)? {
            Slot::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        match self.slots.get_mut(key.index as usize)? {
            Slot::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    /// Returns the key of the live entry at `index`.
    pub(crate) fn key_at(&self, index: u32) -> Option<Key> {
        match self.slots.get(index as usize)? {
            Slot::Occupied { generation, .. } => Some(Key {
                index,
                generation: *generation,
            }),
            Slot::Vacant { .. } => None,
        }
    }

    /// Looks up a live entry by slot index alone.
    ///
    /// Only list walking uses this: list membership implies liveness.
    pub(crate) fn at(&self, index: u32) -> &T {
        match &self.slots[index as usize] {
            Slot::Occupied { value, .. } => value,
            Slot::Vacant { .. } => unreachable!("linked slot {index} is vacant"),
        }
    }

    pub(crate) fn at_mut(&mut self, index: u32) -> &mut T {
        match &mut self.slots[index as usize] {
            Slot::Occupied { value, .. } => value,
            Slot::Vacant { .. } => unreachable!("linked slot {index} is vacant"),
        }
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "slot indices were issued as u32"
    )]
    pub(crate) fn iter(&self) -> impl Iterator<Item = (Key, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, value } => Some((
                    Key {
                        index: index as u32,
                        generation: *generation,
                    },
                    value,
                )),
                Slot::Vacant { .. } => None,
            })
    }
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for Slab<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Slab")
            .field("len", &self.len)
            .field("capacity", &self.slots.len())
            .finish()
    }
}

/// Previous/next pointers embedded in a slab entry.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub(crate) struct Links {
    prev: Option<u32>,
    next: Option<u32>,
}

/// Accessors selecting which [`Links`] of an entry a list threads through.
pub(crate) struct Chain<T> {
    pub(crate) links: fn(&T) -> &Links,
    pub(crate) links_mut: fn(&mut T) -> &mut Links,
}

impl<T> Clone for Chain<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Chain<T> {}

/// Head of a doubly linked list of slab indices.
///
/// The front is the most recently inserted entry.
#[derive(Copy, Clone, Default, Debug)]
pub(crate) struct List {
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl List {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn front(&self) -> Option<u32> {
        self.head
    }

    pub(crate) fn back(&self) -> Option<u32> {
        self.tail
    }

    pub(crate) fn push_front<T>(&mut self, slab: &mut Slab<T>, chain: Chain<T>, index: u32) {
        let old_head = self.head;
        *(chain.links_mut)(slab.at_mut(index)) = Links {
            prev: None,
            next: old_head,
        };
        match old_head {
            Some(head) => (chain.links_mut)(slab.at_mut(head)).prev = Some(index),
            None => self.tail = Some(index),
        }
        self.head = Some(index);
        self.len += 1;
    }

    pub(crate) fn push_back<T>(&mut self, slab: &mut Slab<T>, chain: Chain<T>, index: u32) {
        let old_tail = self.tail;
        *(chain.links_mut)(slab.at_mut(index)) = Links {
            prev: old_tail,
            next: None,
        };
        match old_tail {
            Some(tail) => (chain.links_mut)(slab.at_mut(tail)).next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;
    }

    pub(crate) fn remove<T>(&mut self, slab: &mut Slab<T>, chain: Chain<T>, index: u32) {
        let Links { prev, next } = core::mem::take((chain.links_mut)(slab.at_mut(index)));
        match prev {
            Some(prev) => (chain.links_mut)(slab.at_mut(prev)).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => (chain.links_mut)(slab.at_mut(next)).prev = prev,
            None => self.tail = prev,
        }
        self.len -= 1;
    }

    /// Moves an already-linked entry to the front.
    pub(crate) fn move_to_front<T>(&mut self, slab: &mut Slab<T>, chain: Chain<T>, index: u32) {
        if self.head == Some(index) {
            return;
        }
        self.remove(slab, chain, index);
        self.push_front(slab, chain, index);
    }

    pub(crate) fn pop_back<T>(&mut self, slab: &mut Slab<T>, chain: Chain<T>) -> Option<u32> {
        let tail = self.tail?;
        self.remove(slab, chain, tail);
        Some(tail)
    }

    /// Entry after `index`, walking from front to back.
    pub(crate) fn next<T>(slab: &Slab<T>, chain: Chain<T>, index: u32) -> Option<u32> {
        (chain.links)(slab.at(index)).next
    }

    /// Entry before `index`, walking from back to front.
    pub(crate) fn prev<T>(slab: &Slab<T>, chain: Chain<T>, index: u32) -> Option<u32> {
        (chain.links)(slab.at(index)).prev
    }

    /// Collects the indices from front to back.
    pub(crate) fn indices<T>(&self, slab: &Slab<T>, chain: Chain<T>) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while let Some(index) = cursor {
            out.push(index);
            cursor = Self::next(slab, chain, index);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    struct Node {
        value: u32,
        links: Links,
    }

    const CHAIN: Chain<Node> = Chain {
        links: |n| &n.links,
        links_mut: |n| &mut n.links,
    };

    fn node(value: u32) -> Node {
        Node {
            value,
            links: Links::default(),
        }
    }

    #[test]
    fn stale_keys_miss_after_reuse() {
        let mut slab = Slab::new();
        let a = slab.insert(1_u32);
        assert_eq!(slab.remove(a), Some(1));
        let b = slab.insert(2_u32);
        assert_eq!(a.index, b.index, "slot should be reused");
        assert!(slab.get(a).is_none());
        assert_eq!(slab.get(b), Some(&2));
        assert_eq!(slab.len(), 1);
    }

    #[test]
    fn list_orders_and_moves() {
        let mut slab = Slab::new();
        let mut list = List::new();
        let keys: Vec<_> = (0..4).map(|v| slab.insert(node(v))).collect();
        for key in &keys {
            list.push_front(&mut slab, CHAIN, key.index);
        }
        let values = |list: &List, slab: &Slab<Node>| -> Vec<u32> {
            list.indices(slab, CHAIN)
                .into_iter()
                .map(|i| slab.at(i).value)
                .collect()
        };
        assert_eq!(values(&list, &slab), vec![3, 2, 1, 0]);

        list.move_to_front(&mut slab, CHAIN, keys[0].index);
        assert_eq!(values(&list, &slab), vec![0, 3, 2, 1]);

        list.remove(&mut slab, CHAIN, keys[2].index);
        assert_eq!(values(&list, &slab), vec![0, 3, 1]);
        assert_eq!(list.pop_back(&mut slab, CHAIN), Some(keys[1].index));
        assert_eq!(list.len(), 2);

        list.push_back(&mut slab, CHAIN, keys[1].index);
        assert_eq!(values(&list, &slab), vec![0, 3, 1]);
        assert_eq!(list.back(), Some(keys[1].index));
    }
}
