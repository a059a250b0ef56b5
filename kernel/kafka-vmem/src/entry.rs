//! # Page-Table Entry Bits

use crate::PhysAddr;
use bitfield_struct::bitfield;

/// A single 64-bit x86-64 page-table entry in raw bitfield form.
///
/// This models the common superset of the four levels (PML4E, PDPTE, PDE,
/// PTE). An entry either points at the next-level table, or — with
/// `large_page` set at PDPT/PD level — directly maps a 1 GiB / 2 MiB page.
///
/// | Bits  | Name | Meaning |
/// |-------|------|---------|
/// | 0     | `P`  | Present |
/// | 1     | `RW` | Writable |
/// | 2     | `US` | User-mode accessible |
/// | 3     | `PWT`| Write-through caching |
/// | 4     | `PCD`| Cache disable |
/// | 5     | `A`  | Accessed (set by CPU) |
/// | 6     | `D`  | Dirty (leaf only) |
/// | 7     | `PS` | Large-page flag |
/// | 8     | `G`  | Global (leaf only) |
/// | 9‒11  | —    | OS-available |
/// | 12‒51 | addr | Physical frame bits `[51:12]` |
/// | 52‒62 | —    | OS-available / protection key |
/// | 63    | `NX` | Execute disable |
#[bitfield(u64)]
pub struct PageEntryBits {
    /// Present (bit 0). Clear means a not-present entry; any access faults.
    pub present: bool,

    /// Writable (bit 1). Clear means read-only.
    pub writable: bool,

    /// User/Supervisor (bit 2). Set to allow CPL=3 access.
    pub user_access: bool,

    /// Page write-through (bit 3).
    pub write_through: bool,

    /// Page cache disable (bit 4).
    pub cache_disabled: bool,

    /// Accessed (bit 5). Set by the CPU on first access through this entry.
    pub accessed: bool,

    /// Dirty (bit 6). Set by the CPU on first write through a leaf.
    pub dirty: bool,

    /// Page size (bit 7). At PDPT/PD level a set bit makes the entry a
    /// 1 GiB / 2 MiB leaf; must stay clear at PML4 and PT level.
    pub large_page: bool,

    /// Global (bit 8). Leaf-only: the translation survives CR3 reloads.
    pub global_translation: bool,

    /// OS-available (bits 9‒11).
    #[bits(3)]
    pub os_available_low: u8,

    /// Physical frame bits `[51:12]`. Full address is `bits << 12`.
    #[bits(40)]
    frame_bits: u64,

    /// OS-available (bits 52‒58).
    #[bits(7)]
    pub os_available_high: u8,

    /// Protection key (bits 59‒62) where supported, OS use otherwise.
    #[bits(4)]
    pub protection_key: u8,

    /// No-execute (bit 63). Requires `EFER.NXE`.
    pub no_execute: bool,
}

impl PageEntryBits {
    /// Store a page-aligned physical frame address (bits `[51:12]`).
    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysAddr) {
        self.set_frame_bits(phys.as_u64() >> 12);
    }

    /// Builder form of [`set_physical_address`](Self::set_physical_address).
    #[inline]
    #[must_use]
    pub const fn with_physical_address(self, phys: PhysAddr) -> Self {
        self.with_frame_bits(phys.as_u64() >> 12)
    }

    /// The physical frame address this entry stores.
    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysAddr {
        PhysAddr::new(self.frame_bits() << 12)
    }

    /// A present, writable, supervisor-only entry — the shape used for
    /// kernel heap leaves and for interior tables.
    #[inline]
    #[must_use]
    pub const fn new_kernel_rw() -> Self {
        Self::new().with_present(true).with_writable(true)
    }
}
