//! # Virtual Memory Mapper
//!
//! Walks the canonical four-level x86-64 page table through the
//! [`PhysMapper`] seam and owns the kernel-heap virtual window
//! `[KERNEL_HEAP_START, KERNEL_HEAP_END)`, handing out page-granular
//! extents from its own region table.
//!
//! Interior tables are created on demand from a [`FrameAlloc`]; every PTE
//! mutation is followed by a local TLB invalidation. Failure semantics
//! follow the stack-wide rule: allocation failure surfaces as a null
//! return or a silently unmapped page, never a panic.

use crate::heap::DynHeap;
use crate::phys::PhysicalPageManager;
use crate::region::{INITIAL_REGION_CAPACITY, RegionTable};
use kafka_info::memory::{KERNEL_HEAP_END, KERNEL_HEAP_START, PAGE_SIZE};
use kafka_vmem::{
    FrameAlloc, PAGE_TABLE_ENTRIES, PageEntryBits, PhysAddr, PhysMapper, VirtAddr, VmFlags, arch,
    table_at,
};
use log::info;

/// Entry bits for kernel heap leaves and interior tables.
const KERNEL_PAGE: PageEntryBits = PageEntryBits::new_kernel_rw();

/// Pages handled per unmap batch.
const UNMAP_BATCH: usize = 64;

pub struct Vmm<'m, M: PhysMapper> {
    mapper: &'m M,
    kernel_pml4: PhysAddr,
    heap_regions: RegionTable,
    initialized: bool,
}

impl<'m, M: PhysMapper> Vmm<'m, M> {
    /// Create an uninitialized mapper; call [`init`](Self::init) (or
    /// [`init_with_root`](Self::init_with_root)) before use.
    pub fn new(mapper: &'m M, region_arena: &'static mut [u8]) -> Self {
        Self {
            mapper,
            kernel_pml4: PhysAddr::NULL,
            heap_regions: RegionTable::new(region_arena),
            initialized: false,
        }
    }

    /// Adopt the currently active page-table root and seed the heap
    /// window.
    pub fn init(&mut self) -> bool {
        self.init_with_root(arch::read_page_table_root())
    }

    /// Adopt `root` as the kernel PML4 and seed the heap-virtual region
    /// table with one free extent spanning the whole window. Idempotent.
    pub fn init_with_root(&mut self, root: PhysAddr) -> bool {
        if self.initialized {
            return true;
        }
        if root.is_null() || !self.heap_regions.init(INITIAL_REGION_CAPACITY) {
            return false;
        }

        self.kernel_pml4 = root;
        self.heap_regions.add(
            KERNEL_HEAP_START,
            KERNEL_HEAP_END - KERNEL_HEAP_START,
            true,
            None,
        );

        info!(
            "vmm: pml4 at {root}, heap window {:#x}..{:#x}",
            KERNEL_HEAP_START, KERNEL_HEAP_END
        );

        self.initialized = true;
        true
    }

    /// The physical address of the kernel PML4.
    #[must_use]
    pub const fn root(&self) -> PhysAddr {
        self.kernel_pml4
    }

    /// Allocate `n` physical pages and map them read/write at a fresh
    /// kernel-heap virtual extent.
    ///
    /// Returns the virtual base, or [`VirtAddr::NULL`] on failure. If the
    /// heap window cannot supply an extent the physical pages are released
    /// again before returning.
    pub fn map_pages(
        &mut self,
        ppm: &mut PhysicalPageManager<'m, M>,
        n: usize,
        mut heap: DynHeap<'_, '_>,
    ) -> VirtAddr {
        if n == 0 || !self.initialized {
            return VirtAddr::NULL;
        }

        let phys = ppm.pmalloc(n as u64, heap.as_deref_mut());
        if phys.is_null() {
            return VirtAddr::NULL;
        }

        let bytes = (n * PAGE_SIZE) as u64;
        let Some(virt) = self.claim_heap_extent(bytes, heap.as_deref_mut()) else {
            // Back out the physical reservation; the caller only sees the
            // null.
            ppm.pfree(phys, n as u64, heap);
            return VirtAddr::NULL;
        };

        for i in 0..n {
            let offset = (i * PAGE_SIZE) as u64;
            self.map_page_native(ppm, virt + offset, phys + offset, KERNEL_PAGE);
        }

        virt
    }

    /// Map a single page with translated flags.
    ///
    /// Interior tables are created on demand from `alloc`; an allocation
    /// failure aborts the mapping silently (a later
    /// [`get_pmaddr`](Self::get_pmaddr) still reports the page unmapped).
    pub fn map_page<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        va: VirtAddr,
        pa: PhysAddr,
        flags: VmFlags,
    ) {
        self.map_page_native(alloc, va, pa, flags.translate());
    }

    /// Install `va → pa` with already-native entry bits.
    fn map_page_native<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        va: VirtAddr,
        pa: PhysAddr,
        native: PageEntryBits,
    ) {
        if self.kernel_pml4.is_null() {
            return;
        }
        // The user bit must be present on every ancestor for a user
        // mapping to take effect.
        let user = native.user_access();

        let pml4 = unsafe { table_at(self.mapper, self.kernel_pml4) };
        let Some(pdpt_pa) = Self::descend(self.mapper, alloc, pml4, va.pml4_index(), user) else {
            return;
        };
        let pdpt = unsafe { table_at(self.mapper, pdpt_pa) };
        let Some(pd_pa) = Self::descend(self.mapper, alloc, pdpt, va.pdpt_index(), user) else {
            return;
        };
        let pd = unsafe { table_at(self.mapper, pd_pa) };
        let Some(pt_pa) = Self::descend(self.mapper, alloc, pd, va.pd_index(), user) else {
            return;
        };

        let pt = unsafe { table_at(self.mapper, pt_pa) };
        pt.set_entry(va.pt_index(), native.with_physical_address(pa));

        arch::invalidate_page(va);
    }

    /// Follow (or create) the next level below `table[index]`.
    fn descend<A: FrameAlloc>(
        mapper: &M,
        alloc: &mut A,
        table: &mut kafka_vmem::PageTable,
        index: usize,
        user: bool,
    ) -> Option<PhysAddr> {
        let entry = table.entry(index);
        if entry.present() {
            return Some(entry.physical_address());
        }

        let frame = alloc.alloc_frame()?;
        unsafe { table_at(mapper, frame) }.zero();
        table.set_entry(
            index,
            KERNEL_PAGE
                .with_user_access(user)
                .with_physical_address(frame),
        );
        Some(frame)
    }

    /// Tear down the heap extent containing `va`: clear every PTE,
    /// invalidate, release the physical frames, then free the extent.
    ///
    /// Pages are processed in batches of [`UNMAP_BATCH`]. Returns whether
    /// a used extent was found.
    pub fn unmap_page(
        &mut self,
        ppm: &mut PhysicalPageManager<'m, M>,
        va: VirtAddr,
        mut heap: DynHeap<'_, '_>,
    ) -> bool {
        let Some(index) = self.heap_regions.find_containing(va.as_u64()) else {
            return false;
        };
        let region = self.heap_regions.get(index).expect("found index is live");
        if region.free {
            return false;
        }

        let base = VirtAddr::new(region.base);
        let pages = (region.len as usize) / PAGE_SIZE;

        let mut batch_phys = [PhysAddr::NULL; UNMAP_BATCH];
        let mut start = 0usize;
        while start < pages {
            let end = (start + UNMAP_BATCH).min(pages);

            // Resolve the whole batch first; the PTEs are gone afterwards.
            for j in start..end {
                let page_va = base + ((j * PAGE_SIZE) as u64);
                batch_phys[j - start] = self.get_pmaddr(page_va);
            }

            for j in start..end {
                let page_va = base + ((j * PAGE_SIZE) as u64);
                self.clear_pte(page_va);
            }

            for j in start..end {
                let pa = batch_phys[j - start];
                if !pa.is_null() {
                    // Frames were allocated as one contiguous run but are
                    // returned page-wise; the PPM merges them back.
                    let frame = PhysAddr::new(pa.as_u64() & !(PAGE_SIZE as u64 - 1));
                    ppm.pfree(frame, 1, heap.as_deref_mut());
                }
            }

            start = end;
        }

        self.heap_regions.get_mut(index).expect("index is live").free = true;
        self.heap_regions.merge_adjacent();
        true
    }

    /// Zero the PTE for `va` (if the chain exists) and invalidate.
    fn clear_pte(&mut self, va: VirtAddr) {
        let pml4 = unsafe { table_at(self.mapper, self.kernel_pml4) };
        let e4 = pml4.entry(va.pml4_index());
        if !e4.present() {
            return;
        }
        let pdpt = unsafe { table_at(self.mapper, e4.physical_address()) };
        let e3 = pdpt.entry(va.pdpt_index());
        if !e3.present() {
            return;
        }
        let pd = unsafe { table_at(self.mapper, e3.physical_address()) };
        let e2 = pd.entry(va.pd_index());
        if !e2.present() {
            return;
        }
        let pt = unsafe { table_at(self.mapper, e2.physical_address()) };
        pt.set_entry(va.pt_index(), PageEntryBits::new());

        arch::invalidate_page(va);
    }

    /// Resolve `va` to its backing physical address, honouring 1 GiB and
    /// 2 MiB leaves. [`PhysAddr::NULL`] when any level is not present.
    #[must_use]
    pub fn get_pmaddr(&self, va: VirtAddr) -> PhysAddr {
        if self.kernel_pml4.is_null() {
            return PhysAddr::NULL;
        }

        let pml4 = unsafe { table_at(self.mapper, self.kernel_pml4) };
        let e4 = pml4.entry(va.pml4_index());
        if !e4.present() {
            return PhysAddr::NULL;
        }

        let pdpt = unsafe { table_at(self.mapper, e4.physical_address()) };
        let e3 = pdpt.entry(va.pdpt_index());
        if !e3.present() {
            return PhysAddr::NULL;
        }
        if e3.large_page() {
            // 1 GiB leaf.
            let base = e3.physical_address().as_u64() & !0x3FFF_FFFF;
            return PhysAddr::new(base | (va.as_u64() & 0x3FFF_FFFF));
        }

        let pd = unsafe { table_at(self.mapper, e3.physical_address()) };
        let e2 = pd.entry(va.pd_index());
        if !e2.present() {
            return PhysAddr::NULL;
        }
        if e2.large_page() {
            // 2 MiB leaf.
            let base = e2.physical_address().as_u64() & !0x1F_FFFF;
            return PhysAddr::new(base | (va.as_u64() & 0x1F_FFFF));
        }

        let pt = unsafe { table_at(self.mapper, e2.physical_address()) };
        let e1 = pt.entry(va.pt_index());
        if !e1.present() {
            return PhysAddr::NULL;
        }

        PhysAddr::new(e1.physical_address().as_u64() | va.page_offset())
    }

    /// Create a fresh address space: a zeroed PML4 with the higher half
    /// (entries 256..512) shared from the kernel's.
    ///
    /// Returns the new root frame, or [`PhysAddr::NULL`] on allocation
    /// failure.
    pub fn create_ptb(&mut self, ppm: &mut PhysicalPageManager<'m, M>) -> PhysAddr {
        let frame = ppm.pmalloc(1, None);
        if frame.is_null() {
            return PhysAddr::NULL;
        }

        let new_pml4 = unsafe { table_at(self.mapper, frame) };
        new_pml4.zero();

        let kernel = unsafe { table_at(self.mapper, self.kernel_pml4) };
        for i in PAGE_TABLE_ENTRIES / 2..PAGE_TABLE_ENTRIES {
            new_pml4.set_entry(i, kernel.entry(i));
        }

        frame
    }

    /// Load a new page-table root.
    ///
    /// # Safety
    /// `pml4_phys` must hold a valid PML4 whose mappings cover the
    /// currently executing code and data; the TLB implicitly flushes its
    /// non-global entries.
    pub unsafe fn switch_ptb(pml4_phys: PhysAddr) {
        unsafe { arch::write_page_table_root(pml4_phys) };
    }

    /// Switch the heap-extent table's backing allocator to the object
    /// cache.
    pub fn dynamic_mode(&mut self) {
        self.heap_regions.use_dynamic();
    }

    /// The heap-virtual extent table, read-only.
    #[must_use]
    pub fn heap_regions(&self) -> &RegionTable {
        &self.heap_regions
    }

    /// Reserve `size` heap-virtual bytes, best-fit.
    fn claim_heap_extent(&mut self, size: u64, heap: DynHeap<'_, '_>) -> Option<VirtAddr> {
        let index = self.heap_regions.find_best_fit(size)?;
        let region = self.heap_regions.get(index).expect("best-fit index is live");

        if region.len != size && !self.heap_regions.split(index, size, heap) {
            return None;
        }
        self.heap_regions.get_mut(index).expect("index is live").free = false;
        Some(VirtAddr::new(region.base))
    }
}
