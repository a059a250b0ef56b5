//! # Direct-Map Physical Access
//!
//! The kernel's [`PhysMapper`]: every physical address is visible at
//! `hhdm_offset + pa`, courtesy of the boot loader's higher-half direct
//! map.

use kafka_vmem::{PhysAddr, PhysMapper};

/// Physical access through the higher-half direct map.
///
/// The offset is captured once at boot and never changes.
#[derive(Copy, Clone)]
pub struct HhdmMapper {
    offset: u64,
}

impl HhdmMapper {
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }

    /// The direct-map offset in use.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }
}

impl PhysMapper for HhdmMapper {
    /// # Safety
    /// The direct map must cover `pa` for the whole of `T`, writable, and
    /// the caller must uphold the usual aliasing rules.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysAddr) -> &'a mut T {
        let va = (self.offset + pa.as_u64()) as *mut T;
        unsafe { &mut *va }
    }
}
