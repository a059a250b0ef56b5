//! # Global Allocator Hook
//!
//! Routes Rust's allocation machinery into the memory manager's byte
//! surface — the moral equivalent of wiring `new`/`delete` into the
//! kernel heap. Until the manager is published every allocation fails
//! with null, which `alloc` surfaces as an allocation error rather than
//! a crash.

use crate::boot::with_mm;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, null_mut};
use core::sync::atomic::{AtomicBool, Ordering};
use kafka_mm::heap::MAX_ALIGN;

/// Flipped once the memory manager is online.
static READY: AtomicBool = AtomicBool::new(false);

/// Called from the boot path after `dynamic_alloc()`.
pub fn mark_ready() {
    READY.store(true, Ordering::Release);
}

/// The kernel's global allocator.
pub struct KernelAllocator;

#[global_allocator]
static GLOBAL_ALLOCATOR: KernelAllocator = KernelAllocator;

unsafe impl GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if !READY.load(Ordering::Acquire) || layout.align() > MAX_ALIGN {
            return null_mut();
        }
        with_mm(|mm| mm.allocate(layout.size())).unwrap_or(null_mut())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if ptr.is_null() {
            return;
        }
        with_mm(|mm| mm.free(ptr));
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let p = unsafe { self.alloc(layout) };
        if !p.is_null() {
            unsafe { ptr::write_bytes(p, 0, layout.size()) };
        }
        p
    }
}
