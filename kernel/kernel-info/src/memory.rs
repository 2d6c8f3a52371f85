//! # Physical Memory Layout

use kernel_addr::{PAGE_SIZE, PhysicalAddress};

/// Where the kernel image is loaded in physical memory.
///
/// The exact end of the image is only known at boot (it depends on the
/// linked kernel size) and is handed to the page pool at initialization;
/// this constant is the floor below which no allocatable frame can exist.
pub const KERNEL_PHYS_BASE: u64 = 0x0010_0000; // 1 MiB

/// Exclusive upper bound of managed physical memory.
///
/// Everything between the end of the kernel image and this address belongs
/// to the page pool.
pub const PHYS_MEMORY_TOP: PhysicalAddress = PhysicalAddress::new(0x0800_0000); // 128 MiB

const _: () = {
    assert!(PHYS_MEMORY_TOP.is_page_aligned());
    assert!(PHYS_MEMORY_TOP.as_u64() > KERNEL_PHYS_BASE);
    assert!(KERNEL_PHYS_BASE % PAGE_SIZE == 0);
};
