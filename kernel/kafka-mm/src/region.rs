//! # Region Table
//!
//! The extent bookkeeper shared by the physical page manager (physical
//! addresses, merge on free) and the virtual mapper (the fixed kernel-heap
//! window). A table is a flat array of [`Region`] records kept sorted by
//! base; adjacent regions in the same state are merged, overlap is
//! forbidden.
//!
//! The backing array comes from the table's own two-phase allocator: an
//! 8 KiB static arena carries init-time growth, and after `use_dynamic()`
//! new arrays come from the object cache when the caller provides a
//! [`DynHeap`](crate::heap::DynHeap) handle.

use crate::heap::{DynHeap, SwitchableAllocator};
use core::ptr::{self, null_mut};
use log::debug;

/// Default number of slots a table starts with.
pub const INITIAL_REGION_CAPACITY: usize = 64;

/// A half-open extent `[base, base + len)` tagged free or used.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Region {
    pub base: u64,
    pub len: u64,
    pub free: bool,
}

impl Region {
    /// One past the last address of the extent.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base + self.len
    }

    /// Whether `addr` falls inside the extent.
    #[inline]
    #[must_use]
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.end()
    }
}

/// Sorted table of non-overlapping [`Region`]s over a flat backing array.
pub struct RegionTable {
    regions: *mut Region,
    capacity: usize,
    count: usize,
    arena: SwitchableAllocator,
}

// Safety: `regions` points into memory owned via `arena`; the table is a
// single-writer structure serialized by its owner.
unsafe impl Send for RegionTable {}

impl RegionTable {
    /// Create a table with no backing array yet; call [`init`](Self::init)
    /// before use.
    pub fn new(arena_buffer: &'static mut [u8]) -> Self {
        Self {
            regions: null_mut(),
            capacity: 0,
            count: 0,
            arena: SwitchableAllocator::new(arena_buffer),
        }
    }

    /// Allocate the backing array. Idempotent: a second call is a no-op.
    ///
    /// Returns `false` if the arena cannot carry `initial_capacity` slots.
    pub fn init(&mut self, initial_capacity: usize) -> bool {
        if !self.regions.is_null() {
            return true;
        }

        let bytes = initial_capacity * size_of::<Region>();
        let mem = self.arena.allocate(bytes, None).cast::<Region>();
        if mem.is_null() {
            return false;
        }
        unsafe {
            ptr::write_bytes(mem, 0, initial_capacity);
        }

        self.regions = mem;
        self.capacity = initial_capacity;
        self.count = 0;
        true
    }

    /// Flip the backing allocator to dynamic mode.
    pub fn use_dynamic(&mut self) {
        self.arena.use_dynamic();
    }

    #[inline]
    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// The live entries, in table order.
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[Region] {
        if self.regions.is_null() {
            return &[];
        }
        unsafe { core::slice::from_raw_parts(self.regions, self.count) }
    }

    #[inline]
    fn entries_mut(&mut self) -> &mut [Region] {
        if self.regions.is_null() {
            return &mut [];
        }
        unsafe { core::slice::from_raw_parts_mut(self.regions, self.count) }
    }

    /// Read the entry at `index`.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Region> {
        self.entries().get(index).copied()
    }

    /// Mutate the entry at `index`.
    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Region> {
        self.entries_mut().get_mut(index)
    }

    /// Append a region, growing the backing array by doubling when full.
    pub fn add(&mut self, base: u64, len: u64, free: bool, heap: DynHeap<'_, '_>) -> bool {
        if self.regions.is_null() {
            return false;
        }
        if self.count >= self.capacity && !self.grow(self.capacity * 2, heap) {
            return false;
        }

        unsafe {
            self.regions
                .add(self.count)
                .write(Region { base, len, free });
        }
        self.count += 1;
        true
    }

    /// Binary search for the region whose base equals `base` exactly.
    ///
    /// The table must be sorted (every mutating operation keeps it so).
    #[must_use]
    pub fn find(&self, base: u64) -> Option<usize> {
        let entries = self.entries();
        entries.binary_search_by(|r| r.base.cmp(&base)).ok()
    }

    /// Smallest free region with `len >= size`; ties go to the lowest
    /// index.
    #[must_use]
    pub fn find_best_fit(&self, size: u64) -> Option<usize> {
        let mut best: Option<usize> = None;
        let mut smallest = u64::MAX;
        for (i, r) in self.entries().iter().enumerate() {
            if r.free && r.len >= size && r.len < smallest {
                smallest = r.len;
                best = Some(i);
            }
        }
        best
    }

    /// First region containing `addr`, regardless of state.
    #[must_use]
    pub fn find_containing(&self, addr: u64) -> Option<usize> {
        self.entries().iter().position(|r| r.contains(addr))
    }

    /// Insertion sort by base. The table stays small; anything fancier
    /// would not pay for itself.
    pub fn sort(&mut self) {
        let entries = self.entries_mut();
        for i in 1..entries.len() {
            let key = entries[i];
            let mut j = i;
            while j > 0 && entries[j - 1].base > key.base {
                entries[j] = entries[j - 1];
                j -= 1;
            }
            entries[j] = key;
        }
    }

    /// Sort, then fold every adjacent pair in the same free state.
    pub fn merge_adjacent(&mut self) {
        if self.count <= 1 {
            return;
        }
        self.sort();

        let mut i = 0;
        while i + 1 < self.count {
            let curr = self.entries()[i];
            let next = self.entries()[i + 1];

            if curr.end() == next.base && curr.free == next.free {
                self.entries_mut()[i].len += next.len;
                self.remove(i + 1);
                // Stay put: the merged region may also swallow its new
                // neighbour.
            } else {
                i += 1;
            }
        }
    }

    /// Split the region at `index` at `offset` bytes into it.
    ///
    /// The region shrinks to `offset` bytes and a new region covering the
    /// remainder is inserted right after it, preserving the free state.
    /// Fails for out-of-range offsets or when the table cannot grow.
    pub fn split(&mut self, index: usize, offset: u64, heap: DynHeap<'_, '_>) -> bool {
        let Some(region) = self.get(index) else {
            return false;
        };
        if offset == 0 || offset >= region.len {
            return false;
        }
        if self.count >= self.capacity && !self.grow(self.capacity * 2, heap) {
            return false;
        }

        // Shift the tail one slot to the right to open a gap at index + 1.
        unsafe {
            let src = self.regions.add(index + 1);
            let dst = self.regions.add(index + 2);
            ptr::copy(src, dst, self.count - index - 1);

            self.regions.add(index).write(Region {
                base: region.base,
                len: offset,
                free: region.free,
            });
            self.regions.add(index + 1).write(Region {
                base: region.base + offset,
                len: region.len - offset,
                free: region.free,
            });
        }
        self.count += 1;
        true
    }

    /// Remove the entry at `index`, shifting the tail left.
    pub fn remove(&mut self, index: usize) {
        if index >= self.count {
            return;
        }
        unsafe {
            let dst = self.regions.add(index);
            let src = self.regions.add(index + 1);
            ptr::copy(src, dst, self.count - index - 1);
        }
        self.count -= 1;
    }

    /// Log the table at debug level.
    pub fn dump(&self, what: &str) {
        debug!("{what}: {} regions", self.count);
        for (i, r) in self.entries().iter().enumerate() {
            debug!(
                "  region {i}: base={:#x} len={:#x} {}",
                r.base,
                r.len,
                if r.free { "free" } else { "used" }
            );
        }
    }

    /// Replace the backing array with one of `new_capacity` slots.
    fn grow(&mut self, new_capacity: usize, mut heap: DynHeap<'_, '_>) -> bool {
        let new_capacity = new_capacity.max(INITIAL_REGION_CAPACITY);
        if new_capacity <= self.capacity {
            return false;
        }

        let bytes = new_capacity * size_of::<Region>();
        let mem = self
            .arena
            .allocate(bytes, heap.as_deref_mut())
            .cast::<Region>();
        if mem.is_null() {
            return false;
        }

        unsafe {
            ptr::copy_nonoverlapping(self.regions, mem, self.count);
            ptr::write_bytes(mem.add(self.count), 0, new_capacity - self.count);
        }

        let old = self.regions.cast::<u8>();
        self.regions = mem;
        self.capacity = new_capacity;
        self.arena.free(old, heap);
        true
    }
}
