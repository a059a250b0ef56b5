//! # Back-Off Spinlock
//!
//! One compare-exchange to take the lock, exponentially longer `PAUSE`
//! bursts while somebody else holds it. The burst length doubles per
//! failed attempt and stops growing at `2^10` hints, which keeps the
//! line out of the waiters' caches without letting the wait become
//! unbounded-sloppy.
//!
//! Interrupts are the caller's problem; on the boot path they are off
//! anyway, and nothing below this lock ever spins back on it.

use core::{
    cell::UnsafeCell,
    hint::spin_loop,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

/// Largest back-off exponent; a single wait bursts at most `1 << 10`
/// pause hints.
const BACKOFF_CAP: u32 = 10;

/// Mutual exclusion around a value, acquired by spinning.
pub struct SpinLock<T> {
    held: AtomicBool,
    value: UnsafeCell<T>,
}

// Safety: the lock hands out at most one `&mut T` at a time, so sharing
// the lock itself across threads only requires the value to be sendable.
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            held: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// One acquisition attempt, no waiting.
    #[inline]
    fn try_acquire(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Take the lock if it is free right now; `None` otherwise.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.try_acquire().then(|| SpinLockGuard { lock: self })
    }

    /// Wait for the lock, backing off exponentially between attempts.
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let mut exponent = 0u32;
        while !self.try_acquire() {
            for _ in 0..(1u32 << exponent) {
                spin_loop();
            }
            if exponent < BACKOFF_CAP {
                exponent += 1;
            }
        }
        SpinLockGuard { lock: self }
    }

    /// Run `f` under the lock and hand its result back.
    #[inline]
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.lock())
    }

    /// Direct access through `&mut self`; exclusive ownership already
    /// rules out contention, so nothing is taken.
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}

/// Holds the lock until dropped.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: a live guard means the CAS in `try_acquire` succeeded
        // and nobody else can observe the value until the drop below.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: as above, plus the guard itself is borrowed mutably.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // The store's Release ordering is what makes the critical
        // section visible to the next acquirer.
        self.lock.held.store(false, Ordering::Release);
    }
}
