/// Snapshot of heap occupancy, produced by [`crate::Heap::info`] from a
/// single walk over the region list. The field set follows the classic
/// `mallinfo` shape so callers can report it alongside other allocators;
/// fields this allocator has no notion of stay zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapInfo {
    /// Bytes between the first region and the current break, headers
    /// included. Zero while the heap is empty.
    pub arena: usize,
    /// Number of free regions.
    pub ordblks: usize,
    /// Unused, always zero.
    pub smblks: usize,
    /// Unused, always zero.
    pub hblks: usize,
    /// Unused, always zero.
    pub hblkhd: usize,
    /// Unused, always zero.
    pub usmblks: usize,
    /// Unused, always zero.
    pub fsmblks: usize,
    /// Payload bytes currently handed out to callers.
    pub uordblks: usize,
    /// Payload capacity sitting in free regions.
    pub fordblks: usize,
    /// Unused, always zero.
    pub keepcost: usize,
}
