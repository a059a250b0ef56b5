//! # Once-Initialized Cell
//!
//! Publication primitive for the kernel's late-bound globals (the direct
//! mapper, the memory manager). A cell starts empty, exactly one caller
//! gets to fill it, and from then on every reader sees the same value.
//!
//! Losers of the initialization race spin until the winner publishes, so
//! initializers must be short and must not panic — a panicking
//! initializer strands the cell in its claimed state and every later
//! caller with it. The boot path's initializers are infallible by
//! construction.

use core::{
    cell::UnsafeCell,
    hint::spin_loop,
    mem::MaybeUninit,
    sync::atomic::{AtomicU8, Ordering},
};

/// Nothing stored yet; the slot is up for grabs.
const EMPTY: u8 = 0;
/// One caller won the claim and is running its initializer.
const CLAIMED: u8 = 1;
/// The value is stored and visible.
const SET: u8 = 2;

/// A cell that can be written once and read forever after.
pub struct SyncOnceCell<T> {
    state: AtomicU8,
    slot: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Default for SyncOnceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SyncOnceCell<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            slot: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Borrow the slot's contents.
    ///
    /// # Safety
    /// Only call after observing `SET` with acquire ordering; that load
    /// is what synchronizes with the writer's release store.
    #[inline]
    unsafe fn read(&self) -> &T {
        unsafe { (*self.slot.get()).assume_init_ref() }
    }

    /// The stored value, or `None` while nothing has been published.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        match self.state.load(Ordering::Acquire) {
            SET => Some(unsafe { self.read() }),
            _ => None,
        }
    }

    /// Fetch the value, running `init` first if the cell is still empty.
    ///
    /// Exactly one caller's `init` runs; concurrent callers spin until
    /// its result lands and then share it. The claim is decided by a
    /// single compare-exchange on the state byte.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        if let Some(value) = self.get() {
            return value;
        }

        let claimed = self
            .state
            .compare_exchange(EMPTY, CLAIMED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok();

        if claimed {
            let value = init();
            unsafe {
                (*self.slot.get()).write(value);
            }
            // The release store pairs with the acquire loads in `get`;
            // nobody reads the slot before seeing SET.
            self.state.store(SET, Ordering::Release);
        } else {
            // Lost the claim; wait out the winner's initializer.
            while self.state.load(Ordering::Acquire) != SET {
                spin_loop();
            }
        }

        unsafe { self.read() }
    }
}

// Safety: the slot is written exactly once, before SET is published;
// afterwards all access is shared and read-only.
unsafe impl<T: Sync> Sync for SyncOnceCell<T> {}
unsafe impl<T: Send> Send for SyncOnceCell<T> {}
