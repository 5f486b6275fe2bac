// Copyright 2026 the Stipple Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Heap accounting for descriptors and issue arenas.
//!
//! The engine never touches the device heap directly. Every surface
//! descriptor, glyph descriptor and issue arena is charged to an
//! [`Allocator`], and when a charge fails the engine runs its reclaim tiers
//! before trying again.

use core::fmt::Debug;

/// A successful charge against an [`Allocator`].
#[derive(Debug, PartialEq, Eq)]
pub struct Allocation {
    size: usize,
}

impl Allocation {
    /// Creates a record of a `size`-byte charge.
    ///
    /// Intended for [`Allocator`] implementations.
    pub const fn new(size: usize) -> Self {
        Self { size }
    }

    /// Number of bytes charged.
    pub const fn size(&self) -> usize {
        self.size
    }
}

/// General-purpose allocator contract.
pub trait Allocator: Debug {
    /// Charges `size` bytes, or returns `None` when the heap is exhausted.
    fn alloc(&mut self, size: usize) -> Option<Allocation>;

    /// Returns a charge to the heap.
    fn free(&mut self, allocation: Allocation);

    /// Emergency reclaim hook called once after a failed `alloc`.
    ///
    /// Returning `true` makes the engine retry immediately, before it starts
    /// evicting cached objects.
    fn immediate_reclaim(&mut self) -> bool {
        false
    }
}

/// An [`Allocator`] enforcing a fixed byte capacity.
#[derive(Debug, Clone)]
pub struct BudgetAllocator {
    capacity: usize,
    in_use: usize,
    peak: usize,
}

impl BudgetAllocator {
    /// Creates an allocator that can hand out at most `capacity` bytes.
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            in_use: 0,
            peak: 0,
        }
    }

    /// Creates an allocator that never runs out.
    pub const fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    /// Bytes currently charged.
    pub const fn in_use(&self) -> usize {
        self.in_use
    }

    /// Highest value `in_use` has reached.
    pub const fn peak(&self) -> usize {
        self.peak
    }

    /// Total byte capacity.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for BudgetAllocator {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl Allocator for BudgetAllocator {
    fn alloc(&mut self, size: usize) -> Option<Allocation> {
        let in_use = self.in_use.checked_add(size)?;
        if in_use > self.capacity {
            return None;
        }
        self.in_use = in_use;
        self.peak = self.peak.max(in_use);
        Some(Allocation::new(size))
    }

    fn free(&mut self, allocation: Allocation) {
        debug_assert!(
            allocation.size <= self.in_use,
            "freeing more than was allocated"
        );
        self.in_use = self.in_use.saturating_sub(allocation.size);
    }
}

#[cfg(test)]
mod tests {
    use super::{Allocator, BudgetAllocator};

    #[test]
    fn budget_is_enforced() {
        let mut heap = BudgetAllocator::new(100);
        let a = heap.alloc(60).unwrap();
        assert!(heap.alloc(50).is_none());
        heap.free(a);
        assert!(heap.alloc(100).is_some());
        assert_eq!(heap.peak(), 100);
    }
}
