use std::{
    fmt,
    ptr::{self, NonNull},
};

#[cfg(all(unix, not(miri)))]
use crate::brk::SystemBreak;
use crate::{
    align::{align_up, align_up_to},
    brk::ProgramBreak,
    freelist::{
        big_enough_class, max_size_of_class, min_size_of_class, FreeLists, FreeNode,
        MAX_FREELIST_INDEX, MIN_FREELIST_INDEX, SPECULATIVE_FREELIST_TRIES,
    },
    region::{Region, ALIGNMENT, ALLOC_UNIT, MAX_REQUEST, METADATA_SIZE, MIN_REGION_SIZE},
    stats::HeapInfo,
    Pointer,
};

/// The allocator: one contiguous arena of regions over a break pointer.
///
/// This owns everything the engine needs, so separate heaps over
/// separate breaks never interfere:
///
/// ```text
///  first_region          last_region         brk.current()
///  v                     v                   v
/// +--------+--------+-----+--------+----------+
/// | region | region | ... | region | (unused) |
/// +--------+--------+-----+--------+----------+
///     ^         ^             ^
///     +---------+-- free ones also sit on free_lists, by size class
/// ```
///
/// All operations are defined for a single thread of execution and take
/// `&mut self`. Nothing here blocks, yields or calls out except to the
/// break primitive `B`.
pub struct Heap<B: ProgramBreak> {
    /// First region in address order, `None` iff the arena is empty.
    first_region: Pointer<Region>,
    /// Last region in address order. Append and extension happen here.
    last_region: Pointer<Region>,
    /// Segregated free lists over all free regions.
    free_lists: FreeLists,
    /// The break this heap grows through. Owned exclusively.
    brk: B,
}

impl<B: ProgramBreak> Heap<B> {
    /// Empty heap growing through the given break.
    pub const fn with_break(brk: B) -> Self {
        Self {
            first_region: None,
            last_region: None,
            free_lists: FreeLists::new(),
            brk,
        }
    }

    /// Allocates `size` bytes and returns the payload address, aligned
    /// to [`ALIGNMENT`]. Returns `None` for `size == 0` and when memory
    /// is exhausted.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.debug_validate();
        let payload = unsafe { self.allocate_payload(size) };
        self.debug_validate();
        payload
    }

    /// Releases an allocation. `None` is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from this heap and not have been released
    /// already.
    pub unsafe fn deallocate(&mut self, ptr: Pointer<u8>) {
        let Some(ptr) = ptr else { return };
        self.debug_validate();
        self.release_region(Region::from_payload(ptr));
        self.debug_validate();
    }

    /// Allocates `count * size` bytes and zeroes them. Returns `None`
    /// when the product overflows or memory is exhausted.
    pub fn allocate_zeroed(&mut self, count: usize, size: usize) -> Option<NonNull<u8>> {
        let total = count.checked_mul(size)?;
        let payload = self.allocate(total)?;
        unsafe { payload.as_ptr().write_bytes(0, total) };
        Some(payload)
    }

    /// Resizes an allocation, in place when possible. A `None` pointer
    /// behaves like [`Heap::allocate`]; `size == 0` releases `ptr` and
    /// returns `None`. On failure the old allocation is untouched and
    /// still valid.
    ///
    /// # Safety
    ///
    /// A `Some` pointer must have come from this heap and not have been
    /// released.
    pub unsafe fn reallocate(&mut self, ptr: Pointer<u8>, size: usize) -> Option<NonNull<u8>> {
        let Some(ptr) = ptr else {
            return self.allocate(size);
        };
        if size == 0 {
            self.deallocate(Some(ptr));
            return None;
        }
        self.debug_validate();
        let payload = self.reallocate_payload(ptr, size);
        self.debug_validate();
        payload
    }

    /// Allocates `size` bytes whose payload address is a multiple of
    /// `align`, which must be a power of two. Alignments up to
    /// [`ALIGNMENT`] come for free; larger ones over-allocate and carve
    /// the region at the aligned address, releasing the cut-off front.
    /// The result is released through [`Heap::deallocate`] like any
    /// other allocation.
    pub fn allocate_aligned(&mut self, align: usize, size: usize) -> Option<NonNull<u8>> {
        if !align.is_power_of_two() {
            return None;
        }
        if align <= ALIGNMENT {
            return self.allocate(size);
        }
        if size == 0 {
            return None;
        }
        let padded = size.checked_add(align + MIN_REGION_SIZE)?;
        if padded > MAX_REQUEST {
            return None;
        }
        self.debug_validate();
        let payload = unsafe { self.allocate_aligned_payload(align, size, padded) };
        self.debug_validate();
        payload
    }

    /// Occupancy summary from one walk over the region list.
    pub fn info(&self) -> HeapInfo {
        let mut info = HeapInfo::default();
        let Some(first) = self.first_region else {
            return info;
        };
        info.arena = self.brk.current() as usize - first.as_ptr() as usize;
        let mut current = Some(first);
        while let Some(region) = current {
            unsafe {
                if region.as_ref().is_free() {
                    info.ordblks += 1;
                    info.fordblks += region.as_ref().max_payload();
                } else {
                    info.uordblks += region.as_ref().used_payload();
                }
                current = self.next_region(region);
            }
        }
        info
    }

    /// Wipes the heap back to the empty state. The break is not
    /// retracted: memory already obtained stays with the process, and
    /// outstanding allocations must not be touched again. Meant for
    /// tests and embeddings that recycle the whole arena.
    pub fn reset(&mut self) {
        self.first_region = None;
        self.last_region = None;
        self.free_lists.clear();
    }

    /// Asserts every structural invariant of the heap: region-list
    /// contiguity and back links, sizes, the no-adjacent-frees rule,
    /// free-list classing and link symmetry, and that free regions and
    /// free-list entries are in one-to-one correspondence. Runs in one
    /// pass over the regions plus one over the lists, mutates nothing,
    /// and panics on the first violation.
    ///
    /// Debug builds run this on entry and exit of every public
    /// operation.
    pub fn validate(&self) {
        let end = self.brk.current() as usize;
        assert_eq!(self.first_region.is_none(), self.last_region.is_none());

        if let Some(first) = self.first_region {
            assert_eq!(first.as_ptr() as usize % ALIGNMENT, 0);
        }

        let mut free_regions = 0usize;
        let mut prev: Pointer<Region> = None;
        let mut prev_free = false;
        let mut current = self.first_region;
        while let Some(region) = current {
            unsafe {
                let r = region.as_ref();
                assert_eq!(r.prev(), prev);
                if let Some(prev) = prev {
                    assert_eq!(Region::after(prev), region.as_ptr().cast());
                }
                assert!(r.total_size() >= MIN_REGION_SIZE);
                assert_eq!(r.total_size() % ALLOC_UNIT, 0);
                assert!(r.used_payload() <= r.max_payload());
                assert!(Region::after(region) as usize <= end);
                if r.is_free() {
                    assert!(!prev_free, "adjacent free regions must have merged");
                    free_regions += 1;
                }
                prev_free = r.is_free();
                prev = Some(region);
                current = self.next_region(region);
            }
        }
        assert_eq!(prev, self.last_region);

        let mut listed = 0usize;
        for index in 0..MAX_FREELIST_INDEX {
            let mut node_prev: Pointer<FreeNode> = None;
            let mut node = self.free_lists.head(index);
            while let Some(current) = node {
                unsafe {
                    assert_eq!(current.as_ref().prev, node_prev);
                    let region = Region::from_free_node(current);
                    assert!(region.as_ref().is_free());
                    assert!(Region::after(region) as usize <= end);
                    let payload = region.as_ref().max_payload() as u64;
                    assert!(min_size_of_class(index) <= payload);
                    assert!(payload < max_size_of_class(index));
                    listed += 1;
                    node_prev = node;
                    node = current.as_ref().next;
                }
            }
        }
        assert_eq!(
            listed, free_regions,
            "free regions and free-list entries must correspond one to one"
        );
    }

    #[inline]
    fn debug_validate(&self) {
        if cfg!(debug_assertions) {
            self.validate();
        }
    }

    /// The region after `region` in address order. Derived, not stored:
    /// regions are contiguous, so the successor starts where this one
    /// ends, unless this is the last region.
    ///
    /// # Safety
    ///
    /// `region` must be a region of this heap.
    #[inline]
    unsafe fn next_region(&self, region: NonNull<Region>) -> Pointer<Region> {
        if Some(region) == self.last_region {
            None
        } else {
            Some(NonNull::new_unchecked(Region::after(region).cast()))
        }
    }

    unsafe fn allocate_payload(&mut self, size: usize) -> Pointer<u8> {
        if size == 0 || size > MAX_REQUEST {
            return None;
        }
        let region = match self.take_from_free_lists(size) {
            Some(region) => region,
            None => self.allocate_new_region(size)?,
        };
        debug_assert!(Region::after(region) as usize <= self.brk.current() as usize);
        Some(Region::payload_address(region))
    }

    /// Searches the free lists for a region holding `size` bytes.
    unsafe fn take_from_free_lists(&mut self, size: usize) -> Pointer<Region> {
        let mut index = big_enough_class(size);

        // The class below the big-enough one is not guaranteed to fit
        // us, but unless `size` is an exact power of two it may, and
        // regions freed moments ago sit right at its head. Probing a few
        // of them is what makes free/allocate cycles of awkward sizes
        // reuse the same region instead of growing the arena.
        if index > MIN_FREELIST_INDEX && (size as u64) < min_size_of_class(index) {
            let mut node = self.free_lists.head(index - 1);
            let mut tries = 0;
            while let Some(candidate) = node {
                if tries == SPECULATIVE_FREELIST_TRIES {
                    break;
                }
                let region = Region::from_free_node(candidate);
                if region.as_ref().max_payload() >= size {
                    return Some(self.use_free_region(region, size));
                }
                node = candidate.as_ref().next;
                tries += 1;
            }
        }

        // Every member of the classes from here up fits, so the head of
        // the first non-empty one wins. `index` can start out at
        // MAX_FREELIST_INDEX for the very largest requests, in which
        // case the probe above was the only hope.
        while index < MAX_FREELIST_INDEX {
            if let Some(node) = self.free_lists.head(index) {
                let region = Region::from_free_node(node);
                return Some(self.use_free_region(region, size));
            }
            index += 1;
        }

        None
    }

    /// Takes a free region off its list and hands `size` bytes of it
    /// out, splitting off whatever is left over.
    unsafe fn use_free_region(
        &mut self,
        mut region: NonNull<Region>,
        size: usize,
    ) -> NonNull<Region> {
        self.free_lists.remove(region);
        region.as_mut().set_used_payload(size);
        self.split_remainder_if_possible(region, size);
        region
    }

    /// Carves the payload beyond `size` into a region of its own, when
    /// there is enough of it to carry a header. The tail is released
    /// through the free path so it can merge with a free successor.
    unsafe fn split_remainder_if_possible(&mut self, mut region: NonNull<Region>, size: usize) {
        let max_payload = region.as_ref().max_payload();
        debug_assert!(size <= max_payload);
        if max_payload - size < MIN_REGION_SIZE {
            // Too small to stand alone; wasted as internal
            // fragmentation.
            return;
        }

        let next = self.next_region(region);
        let end = Region::after(region) as usize;
        let split = align_up(Region::payload_address(region).as_ptr() as usize + size);

        region.as_mut().set_total_size(split - region.as_ptr() as usize);

        let mut tail = NonNull::new_unchecked(split as *mut Region);
        Region::init(tail, end - split, 0);
        tail.as_mut().set_prev(Some(region));
        match next {
            Some(mut next) => next.as_mut().set_prev(Some(tail)),
            None => self.last_region = Some(tail),
        }

        // A free region may already follow, left over from a shrinking
        // reallocation. The tail joins it instead of sitting next to it.
        if !self.merge_into_adjacent_free(tail) {
            self.free_lists.insert(tail);
        }
    }

    /// Tries to absorb a just-freed region into a free neighbor. The
    /// region must be off the free lists; whatever it ends up part of is
    /// reinserted under its new size class. Returns `false` if both
    /// neighbors are used (or missing).
    unsafe fn merge_into_adjacent_free(&mut self, mut region: NonNull<Region>) -> bool {
        debug_assert!(region.as_ref().is_free());
        debug_assert!(Region::after(region) as usize <= self.brk.current() as usize);

        let prev = match region.as_ref().prev() {
            Some(prev) if prev.as_ref().is_free() => Some(prev),
            _ => None,
        };
        let next = self.next_region(region);

        if let Some(mut prev) = prev {
            self.free_lists.remove(prev);
            prev.as_mut().grow_by(region.as_ref().total_size());
            match next {
                Some(mut next) => next.as_mut().set_prev(Some(prev)),
                None => self.last_region = Some(prev),
            }
            // The gap between prev and next is gone, so a free next can
            // now merge too.
            if let Some(mut next) = next {
                if next.as_ref().is_free() {
                    self.free_lists.remove(next);
                    let after_next = self.next_region(next);
                    prev.as_mut().grow_by(next.as_ref().total_size());
                    match after_next {
                        Some(mut after) => after.as_mut().set_prev(Some(prev)),
                        None => self.last_region = Some(prev),
                    }
                }
            }
            self.free_lists.insert(prev);
            return true;
        }

        if let Some(mut next) = next {
            if next.as_ref().is_free() {
                self.free_lists.remove(next);
                let after_next = self.next_region(next);
                region.as_mut().grow_by(next.as_ref().total_size());
                match after_next {
                    Some(mut after) => after.as_mut().set_prev(Some(region)),
                    None => self.last_region = Some(region),
                }
                self.free_lists.insert(region);
                return true;
            }
        }

        false
    }

    /// Standard release: mark free, coalesce with neighbors, and file
    /// whatever survives on its free list.
    unsafe fn release_region(&mut self, mut region: NonNull<Region>) {
        region.as_mut().set_used_payload(0);
        if !self.merge_into_adjacent_free(region) {
            self.free_lists.insert(region);
        }
    }

    /// Grows the last region at the break until its payload capacity
    /// reaches `align_up(size)`, then hands `size` bytes of it out.
    /// Returns `false` without mutating anything when the break refuses.
    unsafe fn extend_last_region(&mut self, mut last: NonNull<Region>, size: usize) -> bool {
        debug_assert_eq!(Some(last), self.last_region);
        let reusable = last.as_ref().max_payload();
        let needed = align_up(size);
        if needed > reusable {
            let delta = needed - reusable;
            let Some(prior) = self.brk.grow(delta) else {
                return false;
            };
            debug_assert_eq!(prior.as_ptr(), Region::after(last));
            last.as_mut().grow_by(delta);
        }
        last.as_mut().set_used_payload(size);
        true
    }

    /// Grows the arena for `size` bytes the free lists could not
    /// provide. Three strategies, cheapest break growth first: extend a
    /// free last region, annex the aligned slack of a used last region,
    /// or append a brand-new region.
    unsafe fn allocate_new_region(&mut self, size: usize) -> Pointer<Region> {
        debug_assert!(size > 0);

        if let Some(mut last) = self.last_region {
            if last.as_ref().is_free() {
                // Remove it first; the grown size files under a
                // different class. On break failure the region stays off
                // the lists, a leak confined to the out-of-memory path.
                self.free_lists.remove(last);
                return if self.extend_last_region(last, size) {
                    Some(last)
                } else {
                    None
                };
            }

            // A used last region may still end in aligned slack. Pay
            // only for the difference and start the new region inside
            // it.
            let aligned_used = align_up(last.as_ref().used_payload());
            let usable = last.as_ref().max_payload() - aligned_used;
            if usable > 0 {
                let request = (METADATA_SIZE + align_up(size)).saturating_sub(usable);
                let prior = self.brk.grow(request)?;
                debug_assert_eq!(prior.as_ptr(), Region::after(last));
                let base = prior.as_ptr().sub(usable);
                last.as_mut().shrink_by(usable);
                let mut region = NonNull::new_unchecked(base.cast::<Region>());
                Region::init(region, request + usable, size);
                region.as_mut().set_prev(Some(last));
                self.last_region = Some(region);
                self.split_remainder_if_possible(region, size);
                return Some(region);
            }
        }

        // Append a brand-new region at the break.
        let request = METADATA_SIZE + align_up(size);
        let prior = self.brk.grow(request)?;
        let base = prior.as_ptr();
        let aligned = align_up(base as usize) as *mut u8;
        if aligned != base {
            // The initial break can sit anywhere. Push it up once and
            // leak the padding; from the first region on, sizes keep
            // everything aligned for the life of the heap.
            debug_assert!(self.last_region.is_none());
            let fixup = aligned as usize - base as usize;
            let extra = self.brk.grow(fixup)?;
            debug_assert_eq!(extra.as_ptr() as usize, base as usize + request);
        }

        let mut region = NonNull::new_unchecked(aligned.cast::<Region>());
        Region::init(region, request, size);
        if let Some(last) = self.last_region {
            debug_assert_eq!(Region::after(last), aligned);
        }
        region.as_mut().set_prev(self.last_region);
        if self.first_region.is_none() {
            self.first_region = Some(region);
        }
        self.last_region = Some(region);
        // The padded request leaves less than a minimal region of
        // slack, so there is nothing to split off.
        Some(region)
    }

    unsafe fn reallocate_payload(&mut self, ptr: NonNull<u8>, size: usize) -> Pointer<u8> {
        if size > MAX_REQUEST {
            return None;
        }
        let mut region = Region::from_payload(ptr);

        // Shrinking, or growing within the current payload capacity,
        // stays in place.
        if size <= region.as_ref().max_payload() {
            region.as_mut().set_used_payload(size);
            self.split_remainder_if_possible(region, size);
            return Some(ptr);
        }

        // Free space right after us can be absorbed without moving.
        if let Some(next) = self.next_region(region) {
            if next.as_ref().is_free() {
                self.free_lists.remove(next);
                let after_next = self.next_region(next);
                region.as_mut().grow_by(next.as_ref().total_size());
                match after_next {
                    Some(mut after) => after.as_mut().set_prev(Some(region)),
                    None => self.last_region = Some(region),
                }
                if size <= region.as_ref().max_payload() {
                    region.as_mut().set_used_payload(size);
                    self.split_remainder_if_possible(region, size);
                    return Some(ptr);
                }
            }
        }

        // Still short, but the last region can grow at the break. If
        // that fails, fall through: the move path may still find room.
        if Some(region) == self.last_region && self.extend_last_region(region, size) {
            return Some(ptr);
        }

        // Move: allocate elsewhere, carry the used bytes over, release
        // this region. On allocation failure the old region is intact.
        let new_ptr = self.allocate_payload(size)?;
        ptr::copy_nonoverlapping(
            ptr.as_ptr(),
            new_ptr.as_ptr(),
            region.as_ref().used_payload(),
        );
        self.release_region(region);
        Some(new_ptr)
    }

    unsafe fn allocate_aligned_payload(
        &mut self,
        align: usize,
        size: usize,
        padded: usize,
    ) -> Pointer<u8> {
        // Over-allocating by `align` plus a minimal region guarantees
        // an aligned address with room for a leading region somewhere in
        // the payload.
        let payload = self.allocate_payload(padded)?;
        let mut region = Region::from_payload(payload);

        if payload.as_ptr() as usize % align == 0 {
            // Already aligned; give the slack back.
            region.as_mut().set_used_payload(size);
            self.split_remainder_if_possible(region, size);
            return Some(payload);
        }

        // Carve the region so the back half starts exactly one header
        // below the aligned address. The front half keeps at least a
        // minimal region and goes back to the free path.
        let aligned = align_up_to(payload.as_ptr() as usize + MIN_REGION_SIZE, align);
        let split = aligned - METADATA_SIZE;
        let end = Region::after(region) as usize;
        let next = self.next_region(region);

        region.as_mut().set_total_size(split - region.as_ptr() as usize);

        let mut tail = NonNull::new_unchecked(split as *mut Region);
        Region::init(tail, end - split, size);
        tail.as_mut().set_prev(Some(region));
        match next {
            Some(mut next) => next.as_mut().set_prev(Some(tail)),
            None => self.last_region = Some(tail),
        }

        self.split_remainder_if_possible(tail, size);
        self.release_region(region);

        Some(Region::payload_address(tail))
    }
}

#[cfg(all(unix, not(miri)))]
impl Heap<SystemBreak> {
    /// Heap over the real program break. The break has a single owner,
    /// so at most one of these may exist per process, and nothing else
    /// in the process may move the break.
    pub const fn new() -> Self {
        Self::with_break(SystemBreak)
    }
}

impl<B: ProgramBreak + Default> Default for Heap<B> {
    fn default() -> Self {
        Self::with_break(B::default())
    }
}

impl<B: ProgramBreak> fmt::Debug for Heap<B> {
    /// Dumps the region chain and the populated free-list classes.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "heap up to {:p}", self.brk.current())?;
        let mut current = self.first_region;
        while let Some(region) = current {
            unsafe {
                let r = region.as_ref();
                writeln!(
                    f,
                    "  [{:p}, {:p}) used {} of {}",
                    region.as_ptr(),
                    Region::after(region),
                    r.used_payload(),
                    r.max_payload(),
                )?;
                current = self.next_region(region);
            }
        }
        for index in 0..MAX_FREELIST_INDEX {
            let mut node = self.free_lists.head(index);
            if node.is_none() {
                continue;
            }
            write!(
                f,
                "  free[{index}] sizes [{}, {}):",
                min_size_of_class(index),
                max_size_of_class(index)
            )?;
            while let Some(current) = node {
                unsafe {
                    write!(f, " {:p}", Region::from_free_node(current).as_ptr())?;
                    node = current.as_ref().next;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::slice;

    use super::*;
    use crate::brk::ArenaBreak;

    fn heap(capacity: usize) -> Heap<ArenaBreak> {
        Heap::with_break(ArenaBreak::new(capacity))
    }

    fn addr(ptr: NonNull<u8>) -> usize {
        ptr.as_ptr() as usize
    }

    #[test]
    fn allocating_zero_bytes_returns_none() {
        let mut heap = heap(1024);
        assert!(heap.allocate(0).is_none());
        assert_eq!(heap.info(), HeapInfo::default());
    }

    #[test]
    fn freed_allocation_is_reused() {
        let mut heap = heap(1024);

        let first = heap.allocate(100).unwrap();
        unsafe { heap.deallocate(Some(first)) };
        let second = heap.allocate(100).unwrap();

        assert_eq!(second, first);
    }

    #[test]
    fn adjacent_allocations_step_forward_by_region_size() {
        let mut heap = heap(1024);

        let first = heap.allocate(100).unwrap();
        let second = heap.allocate(10).unwrap();
        let third = heap.allocate(10).unwrap();

        // A payload of 100 rounds up to 112, plus 16 bytes of header.
        assert_eq!(addr(second), addr(first) + 112 + 16);
        assert_eq!(addr(third), addr(second) + 16 + 16);

        // The payloads must not overlap.
        unsafe {
            first.as_ptr().write_bytes(0xAA, 100);
            second.as_ptr().write_bytes(0xBB, 10);
            third.as_ptr().write_bytes(0xCC, 10);
            assert!(slice::from_raw_parts(first.as_ptr(), 100)
                .iter()
                .all(|byte| *byte == 0xAA));
            assert!(slice::from_raw_parts(second.as_ptr(), 10)
                .iter()
                .all(|byte| *byte == 0xBB));
        }
    }

    #[test]
    fn coalescing_keeps_reusing_the_front_of_the_arena() {
        let mut heap = heap(8192);

        let first = heap.allocate(100).unwrap();
        let second = heap.allocate(10).unwrap();
        let third = heap.allocate(10).unwrap();

        unsafe {
            heap.deallocate(Some(first));

            // The front region is reused despite the used ones after it.
            for _ in 0..10 {
                let again = heap.allocate(100).unwrap();
                assert_eq!(again, first);
                heap.deallocate(Some(again));
            }

            heap.deallocate(Some(second));
            heap.deallocate(Some(third));

            // Everything merged into one region at the front, which now
            // serves any size, growing at the break when it must.
            for size in 1..300 {
                let ptr = heap.allocate(size).unwrap();
                assert_eq!(ptr, first, "size {size}");
                heap.deallocate(Some(ptr));
            }
        }
    }

    #[test]
    fn reallocate_shrinks_in_place_and_splits_the_tail() {
        let mut heap = heap(1024);

        let ptr = heap.allocate(200).unwrap();
        let shrunk = unsafe { heap.reallocate(Some(ptr), 50) }.unwrap();

        assert_eq!(shrunk, ptr);
        // 200 rounds to a 208-byte payload; shrinking to 50 keeps 64
        // bytes of payload and splits the remaining 144 bytes into a
        // free region of 128 payload bytes.
        let info = heap.info();
        assert_eq!(info.arena, 224);
        assert_eq!(info.uordblks, 50);
        assert_eq!(info.ordblks, 1);
        assert_eq!(info.fordblks, 128);
    }

    #[test]
    fn reallocate_absorbs_a_free_successor() {
        let mut heap = heap(1024);

        let first = heap.allocate(64).unwrap();
        let second = heap.allocate(64).unwrap();

        unsafe {
            heap.deallocate(Some(second));
            let grown = heap.reallocate(Some(first), 200).unwrap();
            assert_eq!(grown, first);
        }
    }

    #[test]
    fn reallocate_moves_when_growth_is_blocked() {
        let mut heap = heap(8192);

        let first = heap.allocate(64).unwrap();
        let second = heap.allocate(64).unwrap();

        unsafe {
            first.as_ptr().write_bytes(0xAB, 64);
            second.as_ptr().write_bytes(0xCD, 64);

            // A used region right after pins `first` in place.
            let moved = heap.reallocate(Some(first), 4096).unwrap();
            assert_ne!(moved, first);

            // The used bytes came along, the neighbor is untouched.
            assert!(slice::from_raw_parts(moved.as_ptr(), 64)
                .iter()
                .all(|byte| *byte == 0xAB));
            assert!(slice::from_raw_parts(second.as_ptr(), 64)
                .iter()
                .all(|byte| *byte == 0xCD));

            // The old region went back to the free lists.
            assert_eq!(heap.allocate(64).unwrap(), first);
        }
    }

    #[test]
    fn break_failure_leaves_the_heap_intact() {
        let mut heap = heap(512);

        let ptr = heap.allocate(100).unwrap();
        unsafe { ptr.as_ptr().write_bytes(0x5A, 100) };

        // Far beyond the arena capacity; the break refuses.
        assert!(heap.allocate(100_000).is_none());
        heap.validate();

        // The same through reallocation; the original stays valid.
        assert!(unsafe { heap.reallocate(Some(ptr), 100_000) }.is_none());
        heap.validate();
        unsafe {
            assert!(slice::from_raw_parts(ptr.as_ptr(), 100)
                .iter()
                .all(|byte| *byte == 0x5A));
        }

        // Small allocations still succeed afterwards.
        assert!(heap.allocate(50).is_some());
    }

    #[test]
    fn zeroed_allocation_wipes_recycled_payloads() {
        let mut heap = heap(1024);

        let dirty = heap.allocate(64).unwrap();
        unsafe {
            dirty.as_ptr().write_bytes(0xFF, 64);
            heap.deallocate(Some(dirty));
        }

        let zeroed = heap.allocate_zeroed(4, 16).unwrap();
        assert_eq!(zeroed, dirty);
        unsafe {
            assert!(slice::from_raw_parts(zeroed.as_ptr(), 64)
                .iter()
                .all(|byte| *byte == 0));
        }
    }

    #[test]
    fn zeroed_allocation_refuses_overflowing_products() {
        let mut heap = heap(1024);
        assert!(heap.allocate_zeroed(usize::MAX, 2).is_none());
        assert!(heap.allocate_zeroed(2, usize::MAX).is_none());
        heap.validate();
    }

    #[test]
    fn reallocate_grows_the_last_region_in_place() {
        let mut heap = heap(8192);

        let ptr = heap.allocate(100).unwrap();
        unsafe {
            // Nothing after it, so it grows at the break without moving.
            let grown = heap.reallocate(Some(ptr), 500).unwrap();
            assert_eq!(grown, ptr);

            // And shrinks back in place.
            let shrunk = heap.reallocate(Some(ptr), 100).unwrap();
            assert_eq!(shrunk, ptr);
        }

        let info = heap.info();
        assert_eq!(info.uordblks, 100);
        assert_eq!(info.ordblks, 1);
        assert_eq!(info.fordblks, 384);
    }

    #[test]
    fn reallocate_treats_missing_and_zero_like_allocate_and_free() {
        let mut heap = heap(1024);

        unsafe {
            let ptr = heap.reallocate(None, 40).unwrap();
            assert!(heap.reallocate(Some(ptr), 0).is_none());

            // The region was released and is available again.
            assert_eq!(heap.allocate(40).unwrap(), ptr);

            // Releasing nothing is a no-op.
            heap.deallocate(None);
        }
    }

    #[test]
    fn aligned_allocations_honor_large_alignments() {
        let mut heap = heap(65536);

        // An odd-sized allocation first, so payload addresses drift.
        let _pad = heap.allocate(10).unwrap();

        for align in [32usize, 64, 256, 1024] {
            let ptr = heap.allocate_aligned(align, 50).unwrap();
            assert_eq!(addr(ptr) % align, 0, "align {align}");
            unsafe {
                ptr.as_ptr().write_bytes(0xE1, 50);
                heap.deallocate(Some(ptr));
            }
        }
    }

    #[test]
    fn aligned_allocation_edge_cases() {
        let mut heap = heap(1024);

        // Alignments within the allocation unit take the ordinary path.
        let ptr = heap.allocate_aligned(8, 30).unwrap();
        assert_eq!(addr(ptr) % ALIGNMENT, 0);

        // Rejected requests.
        assert!(heap.allocate_aligned(48, 30).is_none());
        assert!(heap.allocate_aligned(64, 0).is_none());
        heap.validate();
    }

    #[test]
    fn first_allocation_fixes_a_misaligned_break() {
        let mut heap = Heap::with_break(ArenaBreak::misaligned(1024, 8));

        let first = heap.allocate(10).unwrap();
        assert_eq!(addr(first) % ALIGNMENT, 0);

        // Only the region itself counts as arena; the 8 leaked padding
        // bytes sit below it.
        assert_eq!(heap.info().arena, 32);

        let second = heap.allocate(10).unwrap();
        assert_eq!(addr(second), addr(first) + 32);
    }

    #[test]
    fn info_accounts_used_and_free_payloads() {
        let mut heap = heap(1024);
        assert_eq!(heap.info(), HeapInfo::default());

        let first = heap.allocate(100).unwrap();
        let _second = heap.allocate(10).unwrap();

        let info = heap.info();
        assert_eq!(info.arena, 128 + 32);
        assert_eq!(info.uordblks, 110);
        assert_eq!(info.ordblks, 0);
        assert_eq!(info.fordblks, 0);

        unsafe { heap.deallocate(Some(first)) };
        let info = heap.info();
        assert_eq!(info.uordblks, 10);
        assert_eq!(info.ordblks, 1);
        assert_eq!(info.fordblks, 112);
    }

    #[test]
    fn reset_returns_to_the_empty_state() {
        let mut heap = heap(1024);

        heap.allocate(100).unwrap();
        let second = heap.allocate(50).unwrap();
        unsafe { heap.deallocate(Some(second)) };

        heap.reset();
        heap.validate();
        assert_eq!(heap.info(), HeapInfo::default());

        // The heap starts over right at the old break.
        assert!(heap.allocate(20).is_some());
        heap.validate();
    }

    #[test]
    fn debug_output_lists_regions_and_free_classes() {
        let mut heap = heap(1024);
        let first = heap.allocate(100).unwrap();
        heap.allocate(10).unwrap();
        unsafe { heap.deallocate(Some(first)) };

        let dump = format!("{heap:?}");
        assert!(dump.contains("used 0 of 112"));
        assert!(dump.contains("free[6]"));
    }
}
