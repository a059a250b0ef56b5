//! # Boot Binding
//!
//! Consumes the loader handoff — framebuffer, HHDM offset, memory map —
//! and brings the memory stack online. A violated boot contract halts the
//! CPU; there is nothing sensible to do without memory.

use crate::allocator;
use kafka_info::boot::{BootInfo, MemoryMapEntry};
use kafka_info::memory::{
    BOOTSTRAP_ARENA_SIZE, KERNEL_ARENA_SIZE, REGION_ARENA_SIZE, SLAB_DESCRIPTOR_ARENA_SIZE,
};
use kafka_mm::heap::StaticArenaAllocator;
use kafka_mm::{HhdmMapper, MemoryManager, MmArenas};
use kafka_qemu::QemuLogger;
use kafka_sync::{SpinLock, SyncOnceCell};
use kafka_vmem::arch;
use log::{LevelFilter, error, info};

/// The one mapper instance; every subsystem borrows it for 'static.
static MAPPER: SyncOnceCell<HhdmMapper> = SyncOnceCell::new();

/// The kernel's memory manager. Locked at this outer surface only; the
/// subsystems below are single-writer by construction.
static MM: SyncOnceCell<SpinLock<MemoryManager<'static, HhdmMapper>>> = SyncOnceCell::new();

/// Static arenas the manager bootstraps from. Handed out exactly once.
static mut PPM_REGION_ARENA: [u8; REGION_ARENA_SIZE] = [0; REGION_ARENA_SIZE];
static mut VMM_REGION_ARENA: [u8; REGION_ARENA_SIZE] = [0; REGION_ARENA_SIZE];
static mut SLAB_DESCRIPTOR_ARENA: [u8; SLAB_DESCRIPTOR_ARENA_SIZE] =
    [0; SLAB_DESCRIPTOR_ARENA_SIZE];
static mut KERNEL_HEAP_ARENA: [u8; KERNEL_ARENA_SIZE] = [0; KERNEL_ARENA_SIZE];

/// Static-only arena for boot-time allocations (the memory-map snapshot
/// among them). Blocks from here must never reach the object cache.
static mut BOOTSTRAP_ARENA: [u8; BOOTSTRAP_ARENA_SIZE] = [0; BOOTSTRAP_ARENA_SIZE];

/// Run a closure against the locked memory manager.
///
/// Returns `None` before [`kernel_main`] has published the manager.
pub fn with_mm<R>(f: impl FnOnce(&mut MemoryManager<'static, HhdmMapper>) -> R) -> Option<R> {
    let mm = MM.get()?;
    Some(mm.with_lock(f))
}

/// Validate the handoff and initialize everything, in order.
pub fn kernel_main(bi: &BootInfo) -> ! {
    let _ = QemuLogger::new(LevelFilter::Trace).init();
    info!("kafka: booting");

    // Boot contract: all three handoffs must be there.
    if !bi.fb.present() {
        error!("boot: no framebuffer; halting");
        arch::halt();
    }
    if bi.hhdm_offset == 0 {
        error!("boot: no HHDM offset; halting");
        arch::halt();
    }
    let Some(entries) = (unsafe { bi.mmap.entries() }) else {
        error!("boot: no memory map; halting");
        arch::halt();
    };
    info!(
        "boot: {}x{} framebuffer, hhdm at {:#x}, {} memory map entries",
        bi.fb.width,
        bi.fb.height,
        bi.hhdm_offset,
        entries.len()
    );

    // Snapshot the memory map out of loader-owned memory before anything
    // starts handing that memory out.
    let mut bootstrap =
        StaticArenaAllocator::new(unsafe { &mut *(&raw mut BOOTSTRAP_ARENA) });
    let entries = snapshot_memory_map(&mut bootstrap, entries);

    let mapper = MAPPER.get_or_init(|| HhdmMapper::new(bi.hhdm_offset));

    let mm = MM.get_or_init(|| {
        // Single handout of the static arenas; the raw-pointer hop is what
        // turns the `static mut`s into the 'static slices the manager
        // keeps.
        let arenas = unsafe {
            MmArenas {
                ppm_regions: &mut *(&raw mut PPM_REGION_ARENA),
                vmm_regions: &mut *(&raw mut VMM_REGION_ARENA),
                slab_descriptors: &mut *(&raw mut SLAB_DESCRIPTOR_ARENA),
                heap: &mut *(&raw mut KERNEL_HEAP_ARENA),
            }
        };
        SpinLock::new(MemoryManager::new(mapper, arenas))
    });

    mm.with_lock(|mm| {
        if !mm.init(Some(entries), bi.hhdm_offset) {
            error!("boot: memory manager init failed; halting");
            arch::halt();
        }
        mm.dynamic_alloc();
    });

    allocator::mark_ready();
    info!("kafka: memory online");

    // Nothing further to run yet.
    arch::halt();
}

/// Copy the loader's memory map into bootstrap-owned storage.
fn snapshot_memory_map(
    bootstrap: &mut StaticArenaAllocator,
    entries: &[MemoryMapEntry],
) -> &'static [MemoryMapEntry] {
    let bytes = core::mem::size_of_val(entries);
    let copy = bootstrap.allocate(bytes).cast::<MemoryMapEntry>();
    if copy.is_null() {
        error!("boot: memory map does not fit the bootstrap arena; halting");
        arch::halt();
    }
    unsafe {
        core::ptr::copy_nonoverlapping(entries.as_ptr(), copy, entries.len());
        core::slice::from_raw_parts(copy, entries.len())
    }
}
