//! # Boot Handoff Structures
//!
//! The boot loader hands the kernel a single [`BootInfo`] pointer. Keep
//! everything here `#[repr(C)]` and prefer fixed-size integers at the ABI
//! boundary; enums that cross it are `#[repr(u32)]` tags without payloads.

/// Information the kernel needs immediately after the loader transfers
/// control.
#[repr(C)]
#[derive(Clone)]
pub struct BootInfo {
    /// Higher-half direct-map offset: for every physical address `p` below
    /// the loader's reported ceiling, `p + hhdm_offset` is a mapped,
    /// readable and writable virtual address in the entry page tables.
    ///
    /// Zero means the loader did not provide an HHDM; the kernel treats
    /// that as a violated boot contract.
    pub hhdm_offset: u64,

    /// The physical memory map.
    pub mmap: MemoryMapInfo,

    /// Linear framebuffer, if the loader found one. Diagnostic output
    /// only; the memory stack never touches it.
    pub fb: FramebufferInfo,
}

/// The loader's physical memory map: a pointer/length pair over
/// [`MemoryMapEntry`] records. No ordering is assumed.
#[repr(C)]
#[derive(Clone)]
pub struct MemoryMapInfo {
    /// Physical-or-virtual pointer to the first entry (the loader leaves
    /// it mapped for the kernel). Zero if absent.
    pub entries_ptr: u64,

    /// Number of entries behind `entries_ptr`.
    pub entry_count: u64,
}

impl MemoryMapInfo {
    /// View the raw handoff buffer as a slice of entries.
    ///
    /// Returns `None` when the loader provided no map.
    ///
    /// # Safety
    /// `entries_ptr` must point to `entry_count` valid, mapped
    /// [`MemoryMapEntry`] records that outlive the returned slice.
    #[must_use]
    pub unsafe fn entries(&self) -> Option<&'static [MemoryMapEntry]> {
        if self.entries_ptr == 0 {
            return None;
        }
        let ptr = self.entries_ptr as *const MemoryMapEntry;
        Some(unsafe { core::slice::from_raw_parts(ptr, self.entry_count as usize) })
    }
}

/// One extent of the physical memory map.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct MemoryMapEntry {
    /// Physical base address. Not necessarily page-aligned.
    pub base: u64,

    /// Length in bytes. Not necessarily a page multiple.
    pub length: u64,

    /// What this extent holds.
    pub kind: MemoryKind,
}

impl MemoryMapEntry {
    /// Whether the extent is plain usable RAM the kernel may own.
    #[inline]
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        matches!(self.kind, MemoryKind::Usable)
    }
}

/// Memory map entry classification.
///
/// Only [`MemoryKind::Usable`] extents are admitted to the physical page
/// manager; everything else is left untouched.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MemoryKind {
    /// Conventional RAM, free for the kernel to claim.
    Usable = 0,
    /// Firmware-reserved; never touch.
    Reserved = 1,
    /// ACPI tables the kernel may reclaim after parsing them.
    AcpiReclaimable = 2,
    /// ACPI non-volatile storage.
    AcpiNvs = 3,
    /// Known-bad RAM reported by the loader.
    BadMemory = 4,
    /// Loader code/data; reclaimable once the handoff data is consumed.
    BootloaderReclaimable = 5,
    /// The kernel image and boot modules.
    KernelAndModules = 6,
    /// The linear framebuffer.
    Framebuffer = 7,
}

/// Linear framebuffer description, passed through for early diagnostics.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct FramebufferInfo {
    /// Physical base address of the framebuffer, or 0 if none exists.
    pub ptr: u64,
    /// Total size in bytes.
    pub size: u64,
    /// Visible width in pixels.
    pub width: u64,
    /// Visible height in pixels.
    pub height: u64,
    /// Pixels per scanline; may exceed `width` due to padding.
    pub stride: u64,
}

impl FramebufferInfo {
    /// Whether the loader handed us a framebuffer at all.
    #[inline]
    #[must_use]
    pub const fn present(&self) -> bool {
        self.ptr != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_view_round_trips() {
        let raw = [
            MemoryMapEntry {
                base: 0x10_0000,
                length: 0x8_0000,
                kind: MemoryKind::Usable,
            },
            MemoryMapEntry {
                base: 0xE000_0000,
                length: 0x1000,
                kind: MemoryKind::Reserved,
            },
        ];
        let mmap = MemoryMapInfo {
            entries_ptr: raw.as_ptr() as u64,
            entry_count: raw.len() as u64,
        };
        let view = unsafe { mmap.entries() }.unwrap();
        assert_eq!(view.len(), 2);
        assert!(view[0].is_usable());
        assert!(!view[1].is_usable());
    }

    #[test]
    fn missing_map_is_none() {
        let mmap = MemoryMapInfo {
            entries_ptr: 0,
            entry_count: 0,
        };
        assert!(unsafe { mmap.entries() }.is_none());
    }
}
