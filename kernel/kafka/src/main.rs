//! # Kafka Kernel Entry
//!
//! The boot binding: receive the loader handoff, validate the contract,
//! bring the memory stack up in order (physical → virtual → cache →
//! dynamic allocation), and install the global allocator and logger
//! around it.
//!
//! On hosted targets the binary compiles to an empty stub so the
//! workspace tests build everywhere; the kernel proper only exists for
//! `x86_64-unknown-none`.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]
#![allow(unsafe_code)]

#[cfg(target_os = "none")]
mod allocator;
#[cfg(target_os = "none")]
mod boot;

#[cfg(target_os = "none")]
mod entry {
    use kafka_info::boot::BootInfo;
    use kafka_qemu::qemu_trace;
    use kafka_vmem::arch;

    /// Earliest boot stack, used from the moment the loader jumps in.
    const BOOT_STACK_SIZE: usize = 64 * 1024;

    /// A byte buffer with a guaranteed 16-byte alignment for RSP.
    #[repr(align(16))]
    struct Aligned16<const N: usize>([u8; N]);

    #[unsafe(link_section = ".bss.boot")]
    #[unsafe(no_mangle)]
    static mut BOOT_STACK: Aligned16<BOOT_STACK_SIZE> = Aligned16([0; BOOT_STACK_SIZE]);

    /// The kernel entry point.
    ///
    /// The loader jumps here with the [`BootInfo`] pointer in `rdi`
    /// (SysV). We establish our own stack before touching any Rust code;
    /// the compiler must not assume a valid call frame yet.
    #[unsafe(no_mangle)]
    #[unsafe(naked)]
    pub extern "C" fn _start(_boot_info: *const BootInfo) {
        core::arch::naked_asm!(
            "cli",
            // Keep the handoff pointer while we build the stack.
            "mov r12, rdi",
            "lea rax, [rip + {stack_sym}]",
            "add rax, {stack_size}",
            "and rax, -16",
            "mov rsp, rax",
            // Emulate a CALL so RSP % 16 == 8 at entry.
            "push 0",
            "xor rbp, rbp",
            "mov rdi, r12",
            "jmp {rust_entry}",
            stack_sym = sym BOOT_STACK,
            stack_size = const BOOT_STACK_SIZE,
            rust_entry = sym kernel_entry,
        );
    }

    /// First Rust code on a real stack.
    #[unsafe(no_mangle)]
    extern "C" fn kernel_entry(boot_info: *const BootInfo) -> ! {
        qemu_trace!("kafka: reporting to QEMU\n");

        if boot_info.is_null() {
            qemu_trace!("kafka: loader gave us no boot info; halting\n");
            arch::halt();
        }
        let bi = unsafe { &*boot_info };
        crate::boot::kernel_main(bi)
    }

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        qemu_trace!("kernel panic: {}\n", info);
        arch::halt();
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    // The kernel only runs on the bare-metal target; this stub keeps
    // hosted builds (and `cargo test` across the workspace) green.
    eprintln!("kafka: build for x86_64-unknown-none to get a bootable kernel");
}
