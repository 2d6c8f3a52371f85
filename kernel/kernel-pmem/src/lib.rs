//! # Physical Page Pool
//!
//! The kernel's physical memory allocator: whole 4 KiB page frames for user
//! processes, kernel stacks, page-table pages, and pipe buffers, with
//! per-frame reference counting so that frames can be shared copy-on-write
//! across address spaces.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │         Consumers (VM layer, fork/exit, pipes)      │
//! │   allocate / free / increment / decrement refcount  │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │                  Page Pool                          │
//! │    • index-based free list, O(1) push/pop           │
//! │    • per-frame state: Free or Allocated{refs}       │
//! │    • one spin lock over all pool state              │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │                 PhysMapper                          │
//! │    • physical address → usable pointer              │
//! │    • identity map at boot, heap memory in tests     │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ownership Model
//!
//! Every frame is in exactly one of two states:
//!
//! * **Free** — on the free list, reference count zero, contents poisoned.
//! * **Allocated** — owned by `refs >= 1` holders. `refs > 1` means the
//!   frame is mapped copy-on-write into that many address spaces; dropping
//!   a claim only reclaims the frame once the last owner lets go.
//!
//! A count transition to zero is the single trigger for physical reclaim.
//! Freeing a frame that is already free, or adding a reference to a free
//! frame, indicates a kernel bug and halts rather than risking silent
//! free-list corruption.
//!
//! ## Concurrency
//!
//! All pool state lives behind one non-reentrant [`kernel_sync::SpinLock`].
//! No operation blocks or waits: allocation from an empty pool returns
//! [`OutOfFrames`] immediately, and callers decide whether that fails a
//! fork, a growth request, or a pipe. The allocation-side poison fill runs
//! outside the lock (the frame is already exclusively owned); the
//! reclaim-side fill runs inside it, as part of putting the frame back on
//! the shared free list.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod global;
mod mapper;
mod page_pool;

pub use global::{PAGE_POOL, init};
pub use mapper::{IdentityMapper, PhysMapper};
pub use page_pool::{ALLOC_POISON, FREE_POISON, OutOfFrames, PagePool};
