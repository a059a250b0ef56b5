//! # Kernel synchronization primitives
//!
//! The memory stack itself runs single-writer with interrupts disabled;
//! the lock here only guards the outer surfaces that may be entered from
//! other contexts (the global allocator, teardown handler tables).

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;
mod sync_once_cell;

pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;
