//! # Memory Layout
//!
//! Compile-time constants the memory stack must honour. Arena sizes are
//! grouped here as well so the boot binding and the tests agree on them.

/// Size of one page / physical frame in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Zeroing stride used when scrubbing freshly allocated physical ranges.
pub const CACHE_LINE: usize = 64;

/// First virtual address of the kernel heap window.
///
/// The virtual-memory mapper hands out page-granular extents from
/// `[KERNEL_HEAP_START, KERNEL_HEAP_END)` only.
pub const KERNEL_HEAP_START: u64 = 0xFFFF_8F00_0000_0000;

/// One past the last virtual address of the kernel heap window.
pub const KERNEL_HEAP_END: u64 = 0xFFFF_9000_0000_0000;

/// Static arena backing one region table before the object cache exists.
pub const REGION_ARENA_SIZE: usize = 8 * 1024;

/// Static side of the switchable kernel byte allocator.
pub const KERNEL_ARENA_SIZE: usize = 512 * 1024;

/// Static-only bootstrap allocator; blocks from it must never reach the
/// object cache.
pub const BOOTSTRAP_ARENA_SIZE: usize = 256 * 1024;

/// Bump arena for slab descriptors. Descriptors are never freed.
pub const SLAB_DESCRIPTOR_ARENA_SIZE: usize = 64 * 1024;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(CACHE_LINE.is_power_of_two());
    assert!(PAGE_SIZE % CACHE_LINE == 0);
    assert!(KERNEL_HEAP_START < KERNEL_HEAP_END);
    assert!(KERNEL_HEAP_START % PAGE_SIZE as u64 == 0);
    assert!(KERNEL_HEAP_END % PAGE_SIZE as u64 == 0);
};
