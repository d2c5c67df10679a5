//! Minimalist heap allocator for a single-threaded address space backed by
//! a monotonically growing program break.
//!
//! The heap is one contiguous arena that only ever grows upward. It is
//! partitioned end to end into regions, each made of a small fixed-size
//! header followed by the payload handed to the caller:
//!
//! ```text
//!                arena (grows upward with the break)
//! +----------+-----------+----------+-----------+----------+---------+
//! | header   | payload   | header   | payload   | header   | payload |
//! +----------+-----------+----------+-----------+----------+---------+
//! ^                      ^                                           ^
//! first region           next region = base + total size             break
//! ```
//!
//! Regions form a doubly linked total order by address. Free regions are
//! additionally threaded onto one of 32 segregated free lists indexed by
//! the power of two bracketing their payload capacity; the list node is
//! overlaid on the first bytes of the free payload, so bookkeeping costs
//! nothing beyond the region header itself. Releasing a region coalesces
//! it with free neighbors, allocation splits oversized regions, and when
//! no free region fits, the arena grows through the [`ProgramBreak`]
//! seam, preferring to extend the last region over appending a new one.
//!
//! All of it assumes a single thread of execution: entry points take
//! `&mut self` and nothing ever blocks or yields. The only call out of
//! the crate is to the break primitive.
//!
//! # Examples
//!
//! ```rust
//! use brkalloc::{ArenaBreak, Heap};
//!
//! let mut heap = Heap::with_break(ArenaBreak::new(4096));
//!
//! let ptr = heap.allocate(100).unwrap();
//! unsafe {
//!     ptr.as_ptr().write_bytes(0xAB, 100);
//!     heap.deallocate(Some(ptr));
//! }
//! ```
//!
//! On unix targets [`Heap::new`] builds a heap over the real `sbrk`.
//! Only one such heap may exist per process, since the break has a
//! single owner.

use std::ptr::NonNull;

mod align;
mod brk;
mod freelist;
mod heap;
mod region;
mod stats;

/// Non-null pointer to `T`. Used in most places instead of `*mut T` so
/// the compiler forces us to handle the `None` case.
pub(crate) type Pointer<T> = Option<NonNull<T>>;

#[cfg(all(unix, not(miri)))]
pub use brk::SystemBreak;
pub use brk::{ArenaBreak, ProgramBreak};
pub use heap::Heap;
pub use region::ALIGNMENT;
pub use stats::HeapInfo;
