//! # Physical Page Manager
//!
//! Owns every usable byte of physical memory at 4 KiB granularity. The
//! bookkeeping is a [`RegionTable`] over the boot memory map; allocation
//! is best-fit by total length, and freed ranges are merged back with
//! their free neighbours.
//!
//! Physical memory is only ever touched through the [`PhysMapper`] seam
//! (the higher-half direct map in the kernel), which is also how freshly
//! allocated ranges get scrubbed before they are handed out.

use crate::heap::DynHeap;
use crate::region::{INITIAL_REGION_CAPACITY, RegionTable};
use core::ptr;
use kafka_info::boot::MemoryMapEntry;
use kafka_info::memory::{CACHE_LINE, PAGE_SIZE};
use kafka_vmem::{FrameAlloc, PhysAddr, PhysMapper, align_down, align_up};
use log::info;

pub struct PhysicalPageManager<'m, M: PhysMapper> {
    mapper: &'m M,
    hhdm_offset: u64,
    regions: RegionTable,
    initialized: bool,
}

impl<'m, M: PhysMapper> PhysicalPageManager<'m, M> {
    /// Create an empty manager; [`init`](Self::init) imports the memory
    /// map.
    pub fn new(mapper: &'m M, region_arena: &'static mut [u8]) -> Self {
        Self {
            mapper,
            hhdm_offset: 0,
            regions: RegionTable::new(region_arena),
            initialized: false,
        }
    }

    /// Import every usable memory-map entry, rounded inward to page
    /// boundaries, then sort and coalesce.
    ///
    /// Returns `false` when the loader provided no map or the region table
    /// cannot allocate its backing array. Idempotent once it has
    /// succeeded.
    pub fn init(&mut self, mmap: Option<&[MemoryMapEntry]>, hhdm_offset: u64) -> bool {
        if self.initialized {
            return true;
        }
        let Some(entries) = mmap else {
            return false;
        };
        if !self.regions.init(INITIAL_REGION_CAPACITY) {
            return false;
        }

        self.hhdm_offset = hhdm_offset;

        for entry in entries {
            if !entry.is_usable() {
                continue;
            }
            // Round inward: partial pages at either end are unusable.
            let base = align_up(entry.base, PAGE_SIZE as u64);
            let end = align_down(entry.base + entry.length, PAGE_SIZE as u64);
            if end > base {
                self.regions.add(base, end - base, true, None);
            }
        }

        self.regions.merge_adjacent();

        let total: u64 = self.regions.entries().iter().map(|r| r.len).sum();
        info!(
            "pmm: {} usable regions, {} KiB free, hhdm at {:#x}",
            self.regions.count(),
            total / 1024,
            hhdm_offset
        );

        self.initialized = true;
        true
    }

    /// Allocate `n` contiguous pages, best-fit.
    ///
    /// On an exact fit the region flips to used; otherwise the leading
    /// part is split off and marked used. The returned range is zeroed
    /// through the direct map in cache-line strides. Returns
    /// [`PhysAddr::NULL`] when nothing fits or the table cannot split.
    pub fn pmalloc(&mut self, n: u64, heap: DynHeap<'_, '_>) -> PhysAddr {
        if n == 0 {
            return PhysAddr::NULL;
        }
        let size = n * PAGE_SIZE as u64;

        let Some(index) = self.regions.find_best_fit(size) else {
            return PhysAddr::NULL;
        };
        let region = self.regions.get(index).expect("best-fit index is live");
        let base = region.base;

        if region.len == size {
            self.regions.get_mut(index).expect("index is live").free = false;
        } else {
            if !self.regions.split(index, size, heap) {
                return PhysAddr::NULL;
            }
            self.regions.get_mut(index).expect("index is live").free = false;
        }

        self.zero_range(PhysAddr::new(base), size as usize);
        PhysAddr::new(base)
    }

    /// Return `n` pages starting at `base`.
    ///
    /// `base` must be the exact base of a used region. An exact-size free
    /// flips the region; a smaller free splits off the leading part.
    /// Anything else — unknown base, already free, or a size larger than
    /// the region — is silently ignored. Ends by coalescing.
    pub fn pfree(&mut self, base: PhysAddr, n: u64, heap: DynHeap<'_, '_>) {
        let size = n * PAGE_SIZE as u64;

        let Some(index) = self.regions.find(base.as_u64()) else {
            return;
        };
        let region = self.regions.get(index).expect("found index is live");
        if region.free {
            return;
        }

        if region.len == size {
            self.regions.get_mut(index).expect("index is live").free = true;
        } else if size < region.len {
            // Partial free: carve the leading part out and release it.
            if !self.regions.split(index, size, heap) {
                return;
            }
            self.regions.get_mut(index).expect("index is live").free = true;
        } else {
            // Freeing more than was allocated; ignore.
            return;
        }

        self.regions.merge_adjacent();
    }

    /// View a physical address through the direct map.
    #[inline]
    #[must_use]
    pub fn phys_to_virt<T>(&self, phys: PhysAddr) -> *mut T {
        (phys.as_u64() + self.hhdm_offset) as *mut T
    }

    /// Switch the region table's backing allocator over to the object
    /// cache. The cache itself is brought up by the caller first.
    pub fn dynamic_mode(&mut self) {
        self.regions.use_dynamic();
    }

    /// The bookkeeping table, read-only.
    #[must_use]
    pub fn regions(&self) -> &RegionTable {
        &self.regions
    }

    /// Scrub `[base, base + len)` through the direct map, one cache line
    /// at a time.
    fn zero_range(&self, base: PhysAddr, len: usize) {
        let mut offset = 0usize;
        while offset < len {
            let line = unsafe {
                self.mapper.phys_to_mut::<u8>(base + offset as u64) as *mut u8
            };
            let stride = CACHE_LINE.min(len - offset);
            unsafe { ptr::write_bytes(line, 0, stride) };
            offset += stride;
        }
    }
}

impl<M: PhysMapper> FrameAlloc for PhysicalPageManager<'_, M> {
    /// Single zeroed frame for page-table use; interior allocations pass
    /// no dynamic handle by design.
    fn alloc_frame(&mut self) -> Option<PhysAddr> {
        let pa = self.pmalloc(1, None);
        if pa.is_null() { None } else { Some(pa) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;
    use crate::testutil::{TestPhys, leak_arena};
    use kafka_info::boot::MemoryKind;
    use kafka_info::memory::REGION_ARENA_SIZE;

    fn usable(base: u64, length: u64) -> MemoryMapEntry {
        MemoryMapEntry {
            base,
            length,
            kind: MemoryKind::Usable,
        }
    }

    fn reserved(base: u64, length: u64) -> MemoryMapEntry {
        MemoryMapEntry {
            base,
            length,
            kind: MemoryKind::Reserved,
        }
    }

    fn ppm_over<'m>(phys: &'m TestPhys, entries: &[MemoryMapEntry]) -> PhysicalPageManager<'m, TestPhys> {
        let mut ppm = PhysicalPageManager::new(phys, leak_arena(REGION_ARENA_SIZE));
        assert!(ppm.init(Some(entries), 0));
        ppm
    }

    #[test]
    fn init_requires_a_memory_map() {
        let phys = TestPhys::new(0x10_0000, 16);
        let mut ppm = PhysicalPageManager::new(&phys, leak_arena(REGION_ARENA_SIZE));
        assert!(!ppm.init(None, 0));
        assert!(ppm.init(Some(&[usable(0x10_0000, 0x1_0000)]), 0));
    }

    #[test]
    fn init_imports_only_usable_pages_aligned_inward() {
        let phys = TestPhys::new(0x10_0000, 64);
        // Unaligned usable entry plus noise that must be ignored.
        let entries = [
            usable(0x10_0800, 0x3_0000),
            reserved(0x20_0000, 0x1_0000),
        ];
        let ppm = ppm_over(&phys, &entries);

        assert_eq!(ppm.regions().count(), 1);
        assert_eq!(
            ppm.regions().get(0),
            Some(Region { base: 0x10_1000, len: 0x2_F000, free: true })
        );
    }

    /// Scenario S1: allocate four pages out of a single megabyte region,
    /// free them, and the table is back to where it started.
    #[test]
    fn single_region_alloc_free_round_trip() {
        let phys = TestPhys::new(0x10_0000, 256);
        let mut ppm = ppm_over(&phys, &[usable(0x10_0000, 0x10_0000)]);

        assert_eq!(
            ppm.regions().get(0),
            Some(Region { base: 0x10_0000, len: 0x10_0000, free: true })
        );

        let pa = ppm.pmalloc(4, None);
        assert_eq!(pa.as_u64(), 0x10_0000);
        assert_eq!(
            ppm.regions().entries(),
            &[
                Region { base: 0x10_0000, len: 0x4000, free: false },
                Region { base: 0x10_4000, len: 0xC_C000, free: true },
            ]
        );

        ppm.pfree(pa, 4, None);
        assert_eq!(
            ppm.regions().entries(),
            &[Region { base: 0x10_0000, len: 0x10_0000, free: true }]
        );
    }

    /// Scenario S2: adjacent usable entries coalesce at init, and an
    /// allocation splits only the first part.
    #[test]
    fn adjacent_entries_merge_at_init() {
        let phys = TestPhys::new(0x10_0000, 256);
        let mut ppm = ppm_over(
            &phys,
            &[usable(0x10_0000, 0x8_0000), usable(0x18_0000, 0x8_0000)],
        );

        assert_eq!(ppm.regions().count(), 1);
        assert_eq!(
            ppm.regions().get(0),
            Some(Region { base: 0x10_0000, len: 0x10_0000, free: true })
        );

        let pa = ppm.pmalloc(1, None);
        assert_eq!(pa.as_u64(), 0x10_0000);
        assert_eq!(
            ppm.regions().entries(),
            &[
                Region { base: 0x10_0000, len: 0x1000, free: false },
                Region { base: 0x10_1000, len: 0xF_F000, free: true },
            ]
        );
    }

    #[test]
    fn best_fit_picks_the_tightest_hole() {
        let phys = TestPhys::new(0x10_0000, 512);
        // Two separate regions: 16 pages and 4 pages.
        let mut ppm = ppm_over(
            &phys,
            &[usable(0x10_0000, 0x1_0000), usable(0x18_0000, 0x4000)],
        );

        // A 2-page request fits both; the 4-page region is tighter.
        let pa = ppm.pmalloc(2, None);
        assert_eq!(pa.as_u64(), 0x18_0000);
    }

    #[test]
    fn allocation_is_zeroed_through_the_mapper() {
        let phys = TestPhys::new(0x10_0000, 16);
        let mut ppm = ppm_over(&phys, &[usable(0x10_0000, 0x1_0000)]);

        // Dirty a byte that the next allocation will cover.
        unsafe {
            *phys.phys_to_mut::<u8>(PhysAddr::new(0x10_0123)) = 0xAB;
        }

        let pa = ppm.pmalloc(1, None);
        assert_eq!(pa.as_u64(), 0x10_0000);
        assert_eq!(phys.read_u8(0x10_0123), 0);
    }

    #[test]
    fn out_of_memory_returns_null() {
        let phys = TestPhys::new(0x10_0000, 4);
        let mut ppm = ppm_over(&phys, &[usable(0x10_0000, 0x4000)]);

        assert!(ppm.pmalloc(8, None).is_null());
        assert!(!ppm.pmalloc(4, None).is_null());
        assert!(ppm.pmalloc(1, None).is_null());
        assert!(ppm.pmalloc(0, None).is_null());
    }

    #[test]
    fn partial_free_releases_the_leading_pages() {
        let phys = TestPhys::new(0x10_0000, 64);
        let mut ppm = ppm_over(&phys, &[usable(0x10_0000, 0x4_0000)]);

        let pa = ppm.pmalloc(8, None);
        assert_eq!(pa.as_u64(), 0x10_0000);

        ppm.pfree(pa, 2, None);
        assert_eq!(
            ppm.regions().entries(),
            &[
                Region { base: 0x10_0000, len: 0x2000, free: true },
                Region { base: 0x10_2000, len: 0x6000, free: false },
                Region { base: 0x10_8000, len: 0x3_8000, free: true },
            ]
        );
    }

    #[test]
    fn bogus_frees_are_silent_no_ops() {
        let phys = TestPhys::new(0x10_0000, 64);
        let mut ppm = ppm_over(&phys, &[usable(0x10_0000, 0x4_0000)]);

        let pa = ppm.pmalloc(4, None);
        let snapshot: Vec<_> = ppm.regions().entries().to_vec();

        // Unknown base.
        ppm.pfree(PhysAddr::new(0xDEAD_0000), 1, None);
        // Interior address rather than the region base.
        ppm.pfree(pa + 0x1000, 1, None);
        // Oversized free: larger than the original allocation.
        ppm.pfree(pa, 8, None);
        assert_eq!(ppm.regions().entries(), snapshot.as_slice());

        // Double free: the first one lands, the second is ignored.
        ppm.pfree(pa, 4, None);
        let after: Vec<_> = ppm.regions().entries().to_vec();
        ppm.pfree(pa, 4, None);
        assert_eq!(ppm.regions().entries(), after.as_slice());
    }

    #[test]
    fn free_merges_with_both_neighbours() {
        let phys = TestPhys::new(0x10_0000, 64);
        let mut ppm = ppm_over(&phys, &[usable(0x10_0000, 0x4_0000)]);

        let a = ppm.pmalloc(2, None);
        let b = ppm.pmalloc(2, None);
        let c = ppm.pmalloc(2, None);
        assert_eq!(b.as_u64(), a.as_u64() + 0x2000);
        assert_eq!(c.as_u64(), b.as_u64() + 0x2000);

        // Free the outer two, then the middle: everything folds back into
        // one free region.
        ppm.pfree(a, 2, None);
        ppm.pfree(c, 2, None);
        ppm.pfree(b, 2, None);
        assert_eq!(
            ppm.regions().entries(),
            &[Region { base: 0x10_0000, len: 0x4_0000, free: true }]
        );
    }

    #[test]
    fn frame_alloc_seam_hands_out_single_pages() {
        let phys = TestPhys::new(0x10_0000, 16);
        let mut ppm = ppm_over(&phys, &[usable(0x10_0000, 0x1_0000)]);

        let f1 = ppm.alloc_frame().unwrap();
        let f2 = ppm.alloc_frame().unwrap();
        assert_ne!(f1, f2);
        assert!(f1.is_page_aligned());
        assert!(f2.is_page_aligned());
    }

    #[test]
    fn phys_to_virt_applies_the_offset() {
        let phys = TestPhys::new(0x10_0000, 4);
        let mut ppm = PhysicalPageManager::new(&phys, leak_arena(REGION_ARENA_SIZE));
        assert!(ppm.init(Some(&[usable(0x10_0000, 0x4000)]), 0xFFFF_8000_0000_0000));
        let p: *mut u8 = ppm.phys_to_virt(PhysAddr::new(0x12_3000));
        assert_eq!(p as u64, 0xFFFF_8000_0012_3000);
    }
}
