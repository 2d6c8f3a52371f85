//! The page pool: free-list management and per-frame reference counts.
//!
//! ## Design outline
//!
//! - **Managed range**: `[start, top)` physical bytes, fixed at
//!   initialization. The first pages of the range are carved out for the
//!   frame-state table; everything above it is the allocatable pool.
//! - **Frame states**: each allocatable frame has one [`FrameState`] slot.
//!   Free frames form a singly linked list through their slot indices, so
//!   list membership never touches the frame bytes themselves and a poison
//!   fill cannot clobber list state.
//! - **Reference counts**: an allocated frame records how many owners map
//!   it. `free` and `decrement_refcount` only reclaim on the transition to
//!   zero owners; until then they merely drop one claim.
//! - **Synchronization**: a single [`SpinLock`] serializes every operation
//!   for its full critical section.
//!
//! # Invariants
//! - A frame is `Free` iff it is reachable from `free_head`; its reference
//!   count is then zero by construction.
//! - An `Allocated` frame has `refs >= 1` and is not on the free list.
//! - `free_pages` equals the number of `Free` slots; `total_pages` is its
//!   high-water mark and, after the boot sweep, the pool size.

use core::fmt;
use core::mem::size_of;
use core::ptr;

use kernel_addr::{PAGE_SHIFT, PAGE_SIZE, PhysicalAddress, PhysicalPage};
use kernel_sync::SpinLock;

use crate::mapper::PhysMapper;

/// Byte written over a frame when it enters the free state, to surface
/// dangling references.
pub const FREE_POISON: u8 = 0x01;

/// Byte written over a frame when it is handed out, to surface reads of
/// uninitialized memory. Frames are deliberately *not* zeroed; callers that
/// need zeroed memory must clear it themselves.
pub const ALLOC_POISON: u8 = 0x05;

const _: () = {
    assert!(FREE_POISON != 0);
    assert!(ALLOC_POISON != 0);
    assert!(FREE_POISON != ALLOC_POISON);
};

const PAGE_BYTES: usize = PAGE_SIZE as usize;

/// The free list is empty: no physical frame can satisfy the request.
///
/// Exhaustion is recoverable. Callers fail the requesting operation (the
/// fork, the growth request) and must not treat the pool as corrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("out of physical frames")]
pub struct OutOfFrames;

/// Per-frame bookkeeping. One slot per allocatable frame, indexed by the
/// frame's offset from the pool base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    /// On the free list; `next` is the slot index of the next free frame.
    Free { next: Option<u32> },
    /// Owned by `refs >= 1` holders; `refs > 1` means copy-on-write shared.
    Allocated { refs: u32 },
}

/// Pool state protected by the lock.
struct PoolInner {
    /// Frame-state table, carved from the first pages of the managed range.
    /// Valid for `frame_count` entries once `initialized` is set.
    slots: *mut FrameState,
    /// Number of allocatable frames.
    frame_count: usize,
    /// Base address of the first allocatable frame (just above the table).
    base: PhysicalAddress,
    /// One past the last managed byte.
    top: PhysicalAddress,
    /// Head of the free list.
    free_head: Option<u32>,
    /// Current number of free frames.
    free_pages: u64,
    /// High-water mark of `free_pages`; discovers the pool size during the
    /// boot sweep.
    total_pages: u64,
    initialized: bool,
}

// Safety: the raw table pointer is only dereferenced while holding the
// pool's SpinLock.
unsafe impl Send for PoolInner {}

impl PoolInner {
    const fn new() -> Self {
        Self {
            slots: ptr::null_mut(),
            frame_count: 0,
            base: PhysicalAddress::zero(),
            top: PhysicalAddress::zero(),
            free_head: None,
            free_pages: 0,
            total_pages: 0,
            initialized: false,
        }
    }

    fn require_init(&self) {
        assert!(self.initialized, "page pool used before initialization");
    }

    /// Slot index for `page`, or `None` if the frame lies outside the
    /// allocatable pool.
    fn slot_index(&self, page: PhysicalPage) -> Option<u32> {
        let addr = page.base();
        if addr < self.base || addr >= self.top {
            return None;
        }
        Some(((addr - self.base) >> PAGE_SHIFT) as u32)
    }

    fn page_at(&self, index: u32) -> PhysicalPage {
        PhysicalPage::new(self.base + u64::from(index) * PAGE_SIZE)
    }

    fn state(&self, index: u32) -> FrameState {
        debug_assert!((index as usize) < self.frame_count);
        unsafe { *self.slots.add(index as usize) }
    }

    fn set_state(&mut self, index: u32, state: FrameState) {
        debug_assert!((index as usize) < self.frame_count);
        unsafe { self.slots.add(index as usize).write(state) };
    }

    /// Return a frame whose last claim was just dropped to the free list.
    ///
    /// The poison fill happens here, under the lock: the frame re-enters
    /// the shared free list in the same critical section.
    fn reclaim<M: PhysMapper>(&mut self, index: u32, mapper: &M) {
        fill_page(mapper, self.page_at(index), FREE_POISON);
        self.set_state(index, FrameState::Free { next: self.free_head });
        self.free_head = Some(index);
        self.free_pages += 1;
        if self.free_pages > self.total_pages {
            self.total_pages = self.free_pages;
        }
    }
}

/// Overwrite a whole frame with `pattern` (no-op without the `poison`
/// feature).
fn fill_page<M: PhysMapper>(mapper: &M, page: PhysicalPage, pattern: u8) {
    if cfg!(feature = "poison") {
        let bytes: *mut u8 = unsafe { mapper.phys_to_mut(page.base()) };
        unsafe { bytes.write_bytes(pattern, PAGE_BYTES) };
    }
}

/// Number of pages needed for a frame-state table covering `range_frames`
/// frames.
///
/// Computed over the whole range rather than just the allocatable part;
/// this may over-reserve by one page, which keeps the arithmetic trivial.
const fn frame_table_pages(range_frames: usize) -> usize {
    (range_frames * size_of::<FrameState>()).div_ceil(PAGE_BYTES)
}

/// The physical page allocator.
///
/// One instance owns the entire physical page pool; see [`crate::PAGE_POOL`]
/// for the kernel's global instance. Constructed `const`, initialized once
/// at boot via [`PagePool::init`], then driven exclusively through the
/// public operations — no other code mutates the free list or the frame
/// states.
pub struct PagePool<M> {
    mapper: M,
    inner: SpinLock<PoolInner>,
}

impl<M: PhysMapper> PagePool<M> {
    #[must_use]
    pub const fn new(mapper: M) -> Self {
        Self {
            mapper,
            inner: SpinLock::new(PoolInner::new()),
        }
    }

    /// One-time setup: carve the frame-state table out of `[start, top)`
    /// and hand every remaining frame to the pool.
    ///
    /// Each frame enters through the same reclaim path as a frame freed at
    /// runtime, so it is poisoned and counted identically, and the
    /// high-water `total_pages` mark discovers the pool size.
    ///
    /// # Panics
    /// Panics if called twice, or if the range is too small to hold its own
    /// frame table plus at least one frame.
    ///
    /// # Safety
    /// `[start, top)` must be writable memory that nothing else uses, and
    /// must be reachable through this pool's [`PhysMapper`] for the pool's
    /// whole lifetime. No other pool operation may run concurrently with
    /// initialization.
    pub unsafe fn init(&self, start: PhysicalAddress, top: PhysicalAddress) {
        let start = start.align_up_to_page();
        let top = top.align_down_to_page();
        assert!(start < top, "page pool range is empty");

        let range_frames = ((top - start) >> PAGE_SHIFT) as usize;
        let table_pages = frame_table_pages(range_frames);
        assert!(
            range_frames > table_pages,
            "page pool range too small for its frame table"
        );
        let frame_count = range_frames - table_pages;
        let base = start + (table_pages as u64) * PAGE_SIZE;

        let mut inner = self.inner.lock();
        assert!(!inner.initialized, "page pool initialized twice");

        let slots: *mut FrameState = unsafe { self.mapper.phys_to_mut(start) };
        for i in 0..frame_count {
            unsafe { slots.add(i).write(FrameState::Allocated { refs: 1 }) };
        }

        inner.slots = slots;
        inner.frame_count = frame_count;
        inner.base = base;
        inner.top = top;
        inner.free_head = None;
        inner.free_pages = 0;
        inner.total_pages = 0;

        for i in 0..frame_count as u32 {
            inner.reclaim(i, &self.mapper);
        }
        inner.initialized = true;

        log::info!(
            "page pool: {frame_count} frames at {base}..{top}, {table_pages} table page(s)"
        );
    }

    /// Allocate one page frame.
    ///
    /// The returned frame has reference count exactly 1 and is filled with
    /// [`ALLOC_POISON`], not zeroed.
    ///
    /// # Errors
    /// [`OutOfFrames`] when the free list is empty; no state is mutated.
    pub fn allocate(&self) -> Result<PhysicalPage, OutOfFrames> {
        let page = {
            let mut inner = self.inner.lock();
            inner.require_init();

            let Some(head) = inner.free_head else {
                return Err(OutOfFrames);
            };
            let FrameState::Free { next } = inner.state(head) else {
                panic!("page pool free list corrupted");
            };
            inner.free_head = next;
            inner.set_state(head, FrameState::Allocated { refs: 1 });
            inner.free_pages -= 1;
            inner.page_at(head)
        };

        // Fill outside the lock: the frame is exclusively ours already and
        // the write touches no shared state.
        fill_page(&self.mapper, page, ALLOC_POISON);
        Ok(page)
    }

    /// Drop one claim on `page`; reclaim it if that was the last one.
    ///
    /// For a frame shared copy-on-write (`refs > 1`) this only decrements
    /// the count; the frame stays allocated for the remaining owners. For
    /// the last owner the frame is poisoned and returned to the free list.
    ///
    /// # Panics
    /// Panics if `page` lies outside the allocatable pool or is already
    /// free. Both indicate a kernel bug; there is no recovery path that
    /// does not risk corrupting the free list.
    pub fn free(&self, page: PhysicalPage) {
        let mut inner = self.inner.lock();
        inner.require_init();
        let index = inner
            .slot_index(page)
            .unwrap_or_else(|| panic!("free of {page} outside the managed range"));

        match inner.state(index) {
            FrameState::Allocated { refs } if refs > 1 => {
                inner.set_state(index, FrameState::Allocated { refs: refs - 1 });
            }
            FrameState::Allocated { .. } => inner.reclaim(index, &self.mapper),
            FrameState::Free { .. } => panic!("double free of {page}"),
        }
    }

    /// Record one more owner of an allocated frame, e.g. when fork maps the
    /// same frame into a child's page table instead of copying it.
    ///
    /// # Panics
    /// Panics if `page` lies outside the allocatable pool, is currently
    /// free (a free frame has no owner to share with), or the count
    /// overflows.
    pub fn increment_refcount(&self, page: PhysicalPage) {
        let mut inner = self.inner.lock();
        inner.require_init();
        let index = inner.slot_index(page).unwrap_or_else(|| {
            panic!("increment_refcount of {page} outside the managed range")
        });

        match inner.state(index) {
            FrameState::Allocated { refs } => {
                assert!(refs < u32::MAX, "frame reference count overflow");
                inner.set_state(index, FrameState::Allocated { refs: refs + 1 });
            }
            FrameState::Free { .. } => panic!("increment_refcount of free frame {page}"),
        }
    }

    /// Drop one shared claim on `page`, reclaiming on the transition to
    /// zero owners.
    ///
    /// Unlike [`PagePool::free`], decrementing an already-free frame is a
    /// silent no-op: callers that unmap shared pages may deliver duplicate
    /// notifications.
    ///
    /// # Panics
    /// Panics if `page` lies outside the allocatable pool.
    pub fn decrement_refcount(&self, page: PhysicalPage) {
        let mut inner = self.inner.lock();
        inner.require_init();
        let index = inner.slot_index(page).unwrap_or_else(|| {
            panic!("decrement_refcount of {page} outside the managed range")
        });

        match inner.state(index) {
            FrameState::Free { .. } => {}
            FrameState::Allocated { refs } if refs > 1 => {
                inner.set_state(index, FrameState::Allocated { refs: refs - 1 });
            }
            FrameState::Allocated { .. } => inner.reclaim(index, &self.mapper),
        }
    }

    /// Current number of owners of `page` (zero for a free frame).
    ///
    /// # Panics
    /// Panics if `page` lies outside the allocatable pool.
    #[must_use]
    pub fn reference_count(&self, page: PhysicalPage) -> u32 {
        let inner = self.inner.lock();
        inner.require_init();
        let index = inner.slot_index(page).unwrap_or_else(|| {
            panic!("reference_count of {page} outside the managed range")
        });

        match inner.state(index) {
            FrameState::Free { .. } => 0,
            FrameState::Allocated { refs } => refs,
        }
    }

    /// Size of the pool in bytes (high-water mark of the free count).
    #[must_use]
    pub fn total_memory_size(&self) -> u64 {
        let inner = self.inner.lock();
        inner.require_init();
        inner.total_pages * PAGE_SIZE
    }

    /// Currently free bytes.
    #[must_use]
    pub fn free_memory_size(&self) -> u64 {
        let inner = self.inner.lock();
        inner.require_init();
        inner.free_pages * PAGE_SIZE
    }
}

impl<M> fmt::Debug for PagePool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagePool").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_sizing() {
        // One entry still needs a whole page.
        assert_eq!(frame_table_pages(1), 1);

        // As many entries as fit into one page, then one more.
        let per_page = PAGE_BYTES / size_of::<FrameState>();
        assert_eq!(frame_table_pages(per_page), 1);
        assert_eq!(frame_table_pages(per_page + 1), 2);
    }

    #[test]
    fn poison_patterns_are_distinct_and_nonzero() {
        assert_ne!(FREE_POISON, 0);
        assert_ne!(ALLOC_POISON, 0);
        assert_ne!(FREE_POISON, ALLOC_POISON);
    }
}
