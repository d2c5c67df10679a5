//! The program-break seam. The heap engine only ever asks for more bytes
//! at the top of the arena; where those bytes come from is behind the
//! [`ProgramBreak`] trait, with one implementation per environment.

use std::{alloc, ptr::NonNull};

use crate::region::ALIGNMENT;

/// A monotonically growing break pointer owning the top of the arena.
///
/// # Safety
///
/// Implementors promise the contract the heap is built on:
///
/// - exclusivity: nothing else moves this break while the heap lives;
/// - monotonicity: the break only moves up, growth is never undone;
/// - contiguity: a successful `grow(delta)` places `delta` writable
///   bytes immediately after the prior break and returns that prior
///   break.
///
/// Violating any of these makes the heap read and write memory it does
/// not own.
pub unsafe trait ProgramBreak {
    /// Moves the break `delta` bytes up. Returns the prior break on
    /// success and `None` when the environment refuses the growth, in
    /// which case the break is unchanged.
    fn grow(&mut self, delta: usize) -> Option<NonNull<u8>>;

    /// The current break address. Equivalent to growing by zero, minus
    /// the failure case.
    fn current(&self) -> *mut u8;
}

/// The real process break, through `sbrk`.
///
/// The process has exactly one break, so at most one value of this type
/// should be feeding a heap, and nothing else in the process may call
/// `sbrk` or `brk`.
#[cfg(all(unix, not(miri)))]
#[derive(Default)]
pub struct SystemBreak;

#[cfg(all(unix, not(miri)))]
unsafe impl ProgramBreak for SystemBreak {
    fn grow(&mut self, delta: usize) -> Option<NonNull<u8>> {
        let delta = delta.try_into().ok()?;
        // sbrk returns the prior break, or -1 when the kernel refuses.
        let prior = unsafe { libc::sbrk(delta) };
        if prior as isize == -1 {
            return None;
        }
        NonNull::new(prior.cast())
    }

    fn current(&self) -> *mut u8 {
        unsafe { libc::sbrk(0).cast() }
    }
}

/// A break over a fixed-capacity arena taken from the global allocator.
///
/// This is how the heap runs hermetically: every [`crate::Heap`] under
/// test owns its own arena, growth past the capacity is refused exactly
/// like a failing `sbrk`, and Miri can watch all of it. It also serves
/// embeddings that want an allocator confined to a preallocated slab.
///
/// The arena base is aligned; [`ArenaBreak::misaligned`] starts the
/// break a few bytes in, the way a real initial break may sit at an
/// arbitrary address.
pub struct ArenaBreak {
    base: NonNull<u8>,
    layout: alloc::Layout,
    /// Offset of the current break from `base`.
    brk: usize,
}

impl ArenaBreak {
    /// Arena of `capacity` bytes with the break starting at its base.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or the global allocator refuses it.
    pub fn new(capacity: usize) -> Self {
        Self::misaligned(capacity, 0)
    }

    /// Arena whose break starts `offset` bytes past the aligned base,
    /// for exercising initial-alignment handling.
    pub fn misaligned(capacity: usize, offset: usize) -> Self {
        assert!(capacity > 0 && offset < capacity);
        let layout = alloc::Layout::from_size_align(capacity, ALIGNMENT).unwrap();
        let Some(base) = NonNull::new(unsafe { alloc::alloc(layout) }) else {
            alloc::handle_alloc_error(layout);
        };
        Self {
            base,
            layout,
            brk: offset,
        }
    }

    /// Bytes still available before growth gets refused.
    pub fn remaining(&self) -> usize {
        self.layout.size() - self.brk
    }
}

unsafe impl ProgramBreak for ArenaBreak {
    fn grow(&mut self, delta: usize) -> Option<NonNull<u8>> {
        if delta > self.remaining() {
            return None;
        }
        let prior = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(self.brk)) };
        self.brk += delta;
        Some(prior)
    }

    fn current(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().add(self.brk) }
    }
}

impl Drop for ArenaBreak {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) };
    }
}
