//! # Architecture-Independent Mapping Flags
//!
//! Callers request mappings in POSIX-ish terms; each architecture binding
//! translates them to its native entry bits. Only the x86-64 translation
//! exists today.

use crate::PageEntryBits;

bitflags::bitflags! {
    /// Mapping-request flags, independent of the page-table format.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct VmFlags: u64 {
        /// Mapping is readable.
        const PROT_READ = 1 << 0;
        /// Mapping is writable.
        const PROT_WRITE = 1 << 1;
        /// Mapping is executable.
        const PROT_EXEC = 1 << 2;

        /// Disable caching for this mapping (MMIO and friends).
        const CACHE_DISABLE = 1 << 16;
        /// Write-through caching.
        const WRITETHROUGH = 1 << 17;
        /// Keep the translation across address-space switches.
        const GLOBAL = 1 << 18;
        /// Request a large-page leaf.
        const HUGE = 1 << 19;
        /// Mapping is reachable from user mode.
        const USER = 1 << 21;
    }
}

/// Kernel read/write data, no execute implied.
pub const KERNEL_RW: VmFlags = VmFlags::PROT_READ.union(VmFlags::PROT_WRITE);

/// Kernel read/execute.
pub const KERNEL_RX: VmFlags = VmFlags::PROT_READ.union(VmFlags::PROT_EXEC);

/// User read/write data.
pub const USER_RW: VmFlags = KERNEL_RW.union(VmFlags::USER);

impl VmFlags {
    /// Translate to native x86-64 entry bits.
    ///
    /// | Request | Native |
    /// |---|---|
    /// | `PROT_READ` | `P` (presence is implied by readability) |
    /// | `PROT_WRITE` | `RW` |
    /// | no `PROT_EXEC` | `NX` (the AMD64 bit is inverted) |
    /// | `USER` | `US` |
    /// | `WRITETHROUGH` | `PWT` |
    /// | `CACHE_DISABLE` | `PCD` |
    /// | `GLOBAL` | `G` |
    /// | `HUGE` | `PS` |
    #[must_use]
    pub const fn translate(self) -> PageEntryBits {
        PageEntryBits::new()
            .with_present(self.contains(Self::PROT_READ))
            .with_writable(self.contains(Self::PROT_WRITE))
            .with_no_execute(!self.contains(Self::PROT_EXEC))
            .with_user_access(self.contains(Self::USER))
            .with_write_through(self.contains(Self::WRITETHROUGH))
            .with_cache_disabled(self.contains(Self::CACHE_DISABLE))
            .with_global_translation(self.contains(Self::GLOBAL))
            .with_large_page(self.contains(Self::HUGE))
    }
}
