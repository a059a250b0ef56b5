//! # Memory Manager
//!
//! The struct-of-state that owns the whole stack — physical page manager,
//! virtual mapper, object cache and the switchable byte allocator — and
//! wires their seams together with disjoint borrows. The kernel holds
//! exactly one instance, initialized once from the boot path:
//!
//! 1. [`MemoryManager::init`] — import the memory map, adopt the page
//!    tables.
//! 2. [`MemoryManager::dynamic_alloc`] — bring up the object cache and
//!    flip every two-phase allocator to dynamic mode. One-way.
//!
//! Mapping operations hand the region tables a cell-only view of the
//! cache (no page source), so table growth can never recursively re-enter
//! the mapper servicing it. The byte surface gets the full cache, page
//! refill included.

use crate::heap::SwitchableAllocator;
use crate::phys::PhysicalPageManager;
use crate::slub::{PageSource, Slub, SlubHeap};
use crate::virt::Vmm;
use core::ptr::NonNull;
use kafka_info::boot::MemoryMapEntry;
use kafka_vmem::{PhysAddr, PhysMapper, VirtAddr, VmFlags, arch};
use log::info;

/// The static buffers the manager carves its bootstrap state out of.
pub struct MmArenas {
    /// Region-table arena for the physical page manager.
    pub ppm_regions: &'static mut [u8],
    /// Region-table arena for the kernel-heap virtual window.
    pub vmm_regions: &'static mut [u8],
    /// Slab-descriptor arena for the object cache.
    pub slab_descriptors: &'static mut [u8],
    /// Static side of the switchable kernel byte allocator.
    pub heap: &'static mut [u8],
}

/// Slab memory wired to the real mapper: page runs come from the kernel
/// heap window and go back to it.
///
/// The returned pointers are kernel virtual addresses; this provider is
/// only meaningful once the mappings it creates are live in the current
/// address space.
pub struct VmmPages<'a, 'm, M: PhysMapper> {
    pub vmm: &'a mut Vmm<'m, M>,
    pub ppm: &'a mut PhysicalPageManager<'m, M>,
}

impl<'m, M: PhysMapper> PageSource for VmmPages<'_, 'm, M> {
    fn map_pages(&mut self, n: usize) -> Option<NonNull<u8>> {
        let va = self.vmm.map_pages(self.ppm, n, None);
        NonNull::new(va.as_u64() as *mut u8)
    }

    fn unmap_pages(&mut self, ptr: NonNull<u8>) -> bool {
        let va = VirtAddr::new(ptr.as_ptr() as u64);
        self.vmm.unmap_page(self.ppm, va, None)
    }
}

pub struct MemoryManager<'m, M: PhysMapper> {
    ppm: PhysicalPageManager<'m, M>,
    vmm: Vmm<'m, M>,
    slub: Slub,
    heap: SwitchableAllocator,
    dynamic: bool,
}

impl<'m, M: PhysMapper> MemoryManager<'m, M> {
    pub fn new(mapper: &'m M, arenas: MmArenas) -> Self {
        Self {
            ppm: PhysicalPageManager::new(mapper, arenas.ppm_regions),
            vmm: Vmm::new(mapper, arenas.vmm_regions),
            slub: Slub::new(arenas.slab_descriptors),
            heap: SwitchableAllocator::new(arenas.heap),
            dynamic: false,
        }
    }

    /// Bring up the physical and virtual managers.
    ///
    /// The virtual mapper adopts the active page-table root; if paging is
    /// not live yet (a null root), a fresh PML4 is drawn from the page
    /// manager instead.
    pub fn init(&mut self, mmap: Option<&[MemoryMapEntry]>, hhdm_offset: u64) -> bool {
        if !self.ppm.init(mmap, hhdm_offset) {
            return false;
        }

        let mut root = arch::read_page_table_root();
        if root.is_null() {
            root = self.ppm.pmalloc(1, None);
            if root.is_null() {
                return false;
            }
        }
        self.vmm.init_with_root(root)
    }

    /// Switch the whole stack to dynamic allocation: bring up the object
    /// cache (idempotent) and flip the region tables and the byte
    /// allocator. One-way.
    pub fn dynamic_alloc(&mut self) {
        if self.dynamic {
            return;
        }
        self.slub.init();
        self.ppm.dynamic_mode();
        self.vmm.dynamic_mode();
        self.heap.use_dynamic();
        self.dynamic = true;
        info!("mm: dynamic allocation online");
    }

    /// Allocate `n` contiguous physical pages.
    pub fn pmalloc(&mut self, n: u64) -> PhysAddr {
        let Self { ppm, slub, .. } = self;
        let mut heap = SlubHeap {
            slub,
            pages: None,
        };
        ppm.pmalloc(n, Some(&mut heap))
    }

    /// Free `n` physical pages starting at `base`.
    pub fn pfree(&mut self, base: PhysAddr, n: u64) {
        let Self { ppm, slub, .. } = self;
        let mut heap = SlubHeap {
            slub,
            pages: None,
        };
        ppm.pfree(base, n, Some(&mut heap));
    }

    /// Allocate and map `n` kernel-heap pages; null on failure.
    pub fn map_pages(&mut self, n: usize) -> VirtAddr {
        let Self { ppm, vmm, slub, .. } = self;
        let mut heap = SlubHeap {
            slub,
            pages: None,
        };
        vmm.map_pages(ppm, n, Some(&mut heap))
    }

    /// Map one page at `va` with translated flags.
    pub fn map_page(&mut self, va: VirtAddr, pa: PhysAddr, flags: VmFlags) {
        let Self { ppm, vmm, .. } = self;
        vmm.map_page(ppm, va, pa, flags);
    }

    /// Tear down the heap extent containing `va`.
    pub fn unmap_page(&mut self, va: VirtAddr) -> bool {
        let Self { ppm, vmm, slub, .. } = self;
        let mut heap = SlubHeap {
            slub,
            pages: None,
        };
        vmm.unmap_page(ppm, va, Some(&mut heap))
    }

    /// Resolve a virtual address to its backing physical address.
    #[must_use]
    pub fn get_pmaddr(&self, va: VirtAddr) -> PhysAddr {
        self.vmm.get_pmaddr(va)
    }

    /// Create a fresh address space sharing the kernel's higher half.
    pub fn create_address_space(&mut self) -> PhysAddr {
        let Self { ppm, vmm, .. } = self;
        vmm.create_ptb(ppm)
    }

    /// Load a new page-table root.
    ///
    /// # Safety
    /// See [`Vmm::switch_ptb`].
    pub unsafe fn switch_address_space(pml4_phys: PhysAddr) {
        unsafe { Vmm::<'m, M>::switch_ptb(pml4_phys) };
    }

    /// Byte allocation surface: at least `size` bytes, header-tagged.
    pub fn allocate(&mut self, size: usize) -> *mut u8 {
        let Self {
            ppm,
            vmm,
            slub,
            heap,
            ..
        } = self;
        let mut pages = VmmPages { vmm, ppm };
        Self::allocate_via(heap, slub, &mut pages, size, 1)
    }

    /// Overflow-checked array form of [`allocate`](Self::allocate).
    pub fn allocate_n(&mut self, size: usize, n: usize) -> *mut u8 {
        let Self {
            ppm,
            vmm,
            slub,
            heap,
            ..
        } = self;
        let mut pages = VmmPages { vmm, ppm };
        Self::allocate_via(heap, slub, &mut pages, size, n)
    }

    /// Free a byte-surface block. Null and corrupt pointers are no-ops.
    pub fn free(&mut self, ptr: *mut u8) {
        let Self {
            ppm,
            vmm,
            slub,
            heap,
            ..
        } = self;
        let mut pages = VmmPages { vmm, ppm };
        Self::free_via(heap, slub, &mut pages, ptr);
    }

    /// The byte surface against an explicit page source; the public
    /// methods bind it to [`VmmPages`].
    fn allocate_via(
        heap: &mut SwitchableAllocator,
        slub: &mut Slub,
        pages: &mut dyn PageSource,
        size: usize,
        n: usize,
    ) -> *mut u8 {
        let mut dynamic = SlubHeap {
            slub,
            pages: Some(pages),
        };
        heap.allocate_n(size, n, Some(&mut dynamic))
    }

    fn free_via(
        heap: &mut SwitchableAllocator,
        slub: &mut Slub,
        pages: &mut dyn PageSource,
        ptr: *mut u8,
    ) {
        let mut dynamic = SlubHeap {
            slub,
            pages: Some(pages),
        };
        heap.free(ptr, Some(&mut dynamic));
    }

    /// Read-only views for diagnostics.
    #[must_use]
    pub fn ppm(&self) -> &PhysicalPageManager<'m, M> {
        &self.ppm
    }

    #[must_use]
    pub fn vmm(&self) -> &Vmm<'m, M> {
        &self.vmm
    }

    #[must_use]
    pub fn heap(&self) -> &SwitchableAllocator {
        &self.heap
    }

    #[must_use]
    pub fn slub(&self) -> &Slub {
        &self.slub
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{ALLOC_MAGIC, header_of};
    use crate::region::Region;
    use crate::testutil::{HostPages, TestPhys, leak_arena};
    use kafka_info::boot::{MemoryKind, MemoryMapEntry};
    use kafka_info::memory::{
        KERNEL_ARENA_SIZE, KERNEL_HEAP_START, PAGE_SIZE, REGION_ARENA_SIZE,
        SLAB_DESCRIPTOR_ARENA_SIZE,
    };
    use kafka_vmem::KERNEL_RW;

    const RAM_BASE: u64 = 0x10_0000;

    fn arenas() -> MmArenas {
        MmArenas {
            ppm_regions: leak_arena(REGION_ARENA_SIZE),
            vmm_regions: leak_arena(REGION_ARENA_SIZE),
            slab_descriptors: leak_arena(SLAB_DESCRIPTOR_ARENA_SIZE),
            heap: leak_arena(KERNEL_ARENA_SIZE),
        }
    }

    fn fixture(frames: usize) -> (TestPhys, Vec<MemoryMapEntry>) {
        let phys = TestPhys::new(RAM_BASE, frames);
        let entries = vec![MemoryMapEntry {
            base: RAM_BASE,
            length: (frames * PAGE_SIZE) as u64,
            kind: MemoryKind::Usable,
        }];
        (phys, entries)
    }

    #[test]
    fn init_requires_the_boot_contract() {
        let (phys, entries) = fixture(16);
        let mut mm = MemoryManager::new(&phys, arenas());
        assert!(!mm.init(None, 0));
        assert!(mm.init(Some(&entries), 0));
        // Idempotent.
        assert!(mm.init(Some(&entries), 0));
    }

    /// Invariant 3: a pmalloc/pfree pair leaves the physical table
    /// exactly where it started.
    #[test]
    fn physical_alloc_free_conserves_the_table() {
        let (phys, entries) = fixture(128);
        let mut mm = MemoryManager::new(&phys, arenas());
        assert!(mm.init(Some(&entries), 0));

        let before: Vec<Region> = mm.ppm().regions().entries().to_vec();

        let a = mm.pmalloc(3);
        let b = mm.pmalloc(5);
        assert!(!a.is_null() && !b.is_null());
        mm.pfree(a, 3);
        mm.pfree(b, 5);

        assert_eq!(mm.ppm().regions().entries(), before.as_slice());
    }

    /// Invariant 4 at the manager surface: map, resolve, unmap, gone.
    #[test]
    fn map_resolve_unmap_round_trip() {
        let (phys, entries) = fixture(128);
        let mut mm = MemoryManager::new(&phys, arenas());
        assert!(mm.init(Some(&entries), 0));

        let va = mm.map_pages(2);
        assert!(!va.is_null());
        let pa = mm.get_pmaddr(va);
        assert!(!pa.is_null());

        assert!(mm.unmap_page(va));
        assert!(mm.get_pmaddr(va).is_null());
    }

    #[test]
    fn single_page_mapping_at_a_chosen_address() {
        let (phys, entries) = fixture(128);
        let mut mm = MemoryManager::new(&phys, arenas());
        assert!(mm.init(Some(&entries), 0));

        let va = VirtAddr::new(KERNEL_HEAP_START + 0x20_0000);
        let pa = mm.pmalloc(1);
        mm.map_page(va, pa, KERNEL_RW);
        assert_eq!(mm.get_pmaddr(va), pa);
    }

    #[test]
    fn fresh_address_spaces_share_the_higher_half() {
        let (phys, entries) = fixture(128);
        let mut mm = MemoryManager::new(&phys, arenas());
        assert!(mm.init(Some(&entries), 0));

        // Populate a higher-half slot first.
        assert!(!mm.map_pages(1).is_null());

        let root = mm.create_address_space();
        assert!(!root.is_null());
        assert_ne!(root, mm.vmm().root());
    }

    /// Scenario S6: the static phase, the switch, and both free paths.
    #[test]
    fn two_phase_allocation_lifecycle() {
        let (phys, entries) = fixture(256);
        let mut mm = MemoryManager::new(&phys, arenas());
        assert!(mm.init(Some(&entries), 0));

        let mut host = HostPages::new();

        // Phase one: the static arena serves, and blocks are tracked in
        // the live list.
        let stat = MemoryManager::<TestPhys>::allocate_via(
            &mut mm.heap,
            &mut mm.slub,
            &mut host,
            16,
            1,
        );
        assert!(!stat.is_null());
        assert!(!mm.heap().is_dynamic_ready());
        assert_eq!(mm.heap().live_static_blocks(), 1);

        // The switch is one-way and idempotent.
        mm.dynamic_alloc();
        mm.dynamic_alloc();
        assert!(mm.heap().is_dynamic_ready());
        assert!(mm.slub().is_initialized());

        // Phase two: blocks come from the cache.
        let dyn_block = MemoryManager::<TestPhys>::allocate_via(
            &mut mm.heap,
            &mut mm.slub,
            &mut host,
            16,
            1,
        );
        assert!(!dyn_block.is_null());
        assert!(host.mapped > 0, "dynamic block should come from slab pages");

        // Both blocks free through their own paths.
        MemoryManager::<TestPhys>::free_via(&mut mm.heap, &mut mm.slub, &mut host, dyn_block);
        MemoryManager::<TestPhys>::free_via(&mut mm.heap, &mut mm.slub, &mut host, stat);
        assert_eq!(mm.heap().live_static_blocks(), 0);

        // A corrupted magic byte turns free into a no-op: no crash, no
        // double-free.
        let p = MemoryManager::<TestPhys>::allocate_via(
            &mut mm.heap,
            &mut mm.slub,
            &mut host,
            32,
            1,
        );
        let cells_before = mm.slub().get_cache_for_size(32 + 32).unwrap().free_cells();
        unsafe {
            (*header_of(p).unwrap()).magic ^= 0xFF;
        }
        MemoryManager::<TestPhys>::free_via(&mut mm.heap, &mut mm.slub, &mut host, p);
        assert_eq!(
            mm.slub().get_cache_for_size(32 + 32).unwrap().free_cells(),
            cells_before,
            "a block with a corrupt header must not re-enter the cache"
        );
    }

    #[test]
    fn byte_surface_overflow_checks() {
        let (phys, entries) = fixture(64);
        let mut mm = MemoryManager::new(&phys, arenas());
        assert!(mm.init(Some(&entries), 0));

        let mut host = HostPages::new();
        assert!(
            MemoryManager::<TestPhys>::allocate_via(
                &mut mm.heap,
                &mut mm.slub,
                &mut host,
                usize::MAX,
                2,
            )
            .is_null()
        );
        assert!(
            MemoryManager::<TestPhys>::allocate_via(&mut mm.heap, &mut mm.slub, &mut host, 8, 0)
                .is_null()
        );
    }

    /// Invariant 7: every block carries a valid header with at least the
    /// requested size, in both phases.
    #[test]
    fn header_magic_is_present_on_every_block() {
        let (phys, entries) = fixture(64);
        let mut mm = MemoryManager::new(&phys, arenas());
        assert!(mm.init(Some(&entries), 0));
        let mut host = HostPages::new();

        let mut check = |mm: &mut MemoryManager<TestPhys>, dynamic: bool| {
            for &(size, n) in &[(1usize, 1usize), (16, 1), (100, 3), (4000, 1)] {
                let p = MemoryManager::<TestPhys>::allocate_via(
                    &mut mm.heap,
                    &mut mm.slub,
                    &mut host,
                    size,
                    n,
                );
                assert!(!p.is_null(), "allocate({size}, {n}) failed");
                let header = header_of(p).expect("block must carry a valid header");
                unsafe {
                    assert_eq!((*header).magic, ALLOC_MAGIC);
                    assert!((*header).size >= size * n);
                    assert_eq!((*header).is_dynamic, dynamic);
                }
            }
        };

        check(&mut mm, false);
        mm.dynamic_alloc();
        check(&mut mm, true);
    }
}
