//! The kernel's global page pool.

use kernel_addr::PhysicalAddress;
use kernel_info::memory::PHYS_MEMORY_TOP;

use crate::mapper::IdentityMapper;
use crate::page_pool::PagePool;

/// The single pool every kernel subsystem allocates frames from.
///
/// Physical memory is identity-mapped when the pool comes up, so the global
/// instance runs on the [`IdentityMapper`].
pub static PAGE_POOL: PagePool<IdentityMapper> = PagePool::new(IdentityMapper);

/// Boot entry point: hand every frame between the end of the kernel image
/// and [`PHYS_MEMORY_TOP`] to [`PAGE_POOL`].
///
/// # Safety
/// - `kernel_end` must point past everything the kernel image still uses.
/// - The range up to [`PHYS_MEMORY_TOP`] must be identity-mapped, writable
///   RAM that no other subsystem touches.
/// - Must be called exactly once, before any other pool operation.
pub unsafe fn init(kernel_end: PhysicalAddress) {
    unsafe { PAGE_POOL.init(kernel_end, PHYS_MEMORY_TOP) }
}
