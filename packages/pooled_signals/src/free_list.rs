use std::cell::Cell;
use std::iter::FusedIterator;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

/// The link value stored in the last free block. There is no next block.
pub(crate) const FREE_LIST_END: usize = usize::MAX;

/// The smallest stride a pool can be created with.
///
/// While a block is free, its first bytes hold the index of the next free block,
/// so every block must have room for one `usize`.
pub const MIN_STRIDE: usize = size_of::<usize>();

/// Threads every block of `buffer` into a free list in address order and returns the index
/// of the first free block (the head of the list).
///
/// Block `i` occupies the bytes `[i * stride, (i + 1) * stride)` of the buffer. While a block is
/// free, its first [`MIN_STRIDE`] bytes contain the index of the next free block. The last block
/// terminates the list. This is a one-time O(n) operation performed when a pool is created.
///
/// # Panics
///
/// Panics if `count` is zero, if `stride` is smaller than [`MIN_STRIDE`] or if the buffer is too
/// small to hold `count` blocks of `stride` bytes.
///
/// # Example
///
/// ```
/// use std::mem::MaybeUninit;
///
/// use pooled_signals::init_free_list;
///
/// let mut buffer = [MaybeUninit::<u8>::uninit(); 64];
/// let head = init_free_list(&mut buffer, 4, 16);
///
/// assert_eq!(head, 0);
/// ```
pub fn init_free_list(buffer: &mut [MaybeUninit<u8>], count: usize, stride: usize) -> usize {
    assert!(count > 0, "free list must have at least one block");
    assert!(
        stride >= MIN_STRIDE,
        "free list stride {stride} is smaller than the minimum of {MIN_STRIDE} bytes"
    );

    let required_len = count
        .checked_mul(stride)
        .expect("free list size overflows usize");

    assert!(
        buffer.len() >= required_len,
        "buffer of {} bytes cannot hold {count} blocks of {stride} bytes",
        buffer.len()
    );

    let base = NonNull::from(buffer).cast::<u8>();

    // SAFETY: We verified above that the buffer is large enough for `count` blocks
    // and that each block has room for the link.
    unsafe { thread_blocks(base, count, stride) }
}

/// Writes the free list links into every block, returning the index of the head block.
///
/// # Safety
///
/// `base` must be valid for writes of `count * stride` bytes and `stride` must be
/// at least [`MIN_STRIDE`].
unsafe fn thread_blocks(base: NonNull<u8>, count: usize, stride: usize) -> usize {
    for index in 0..count {
        let next = index
            .checked_add(1)
            .filter(|next| *next < count)
            .unwrap_or(FREE_LIST_END);

        // SAFETY: Forwarding guarantees from the caller.
        let block = unsafe { block_at(base, index, stride) };

        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            write_link(block, next);
        }
    }

    0
}

/// # Safety
///
/// The block must lie within the allocation that `base` points into.
unsafe fn block_at(base: NonNull<u8>, index: usize, stride: usize) -> NonNull<u8> {
    let offset = index
        .checked_mul(stride)
        .expect("guarded by buffer size checked at pool creation");

    // SAFETY: Forwarding guarantees from the caller.
    unsafe { base.add(offset) }
}

/// # Safety
///
/// The block must be valid for writes of `MIN_STRIDE` bytes.
unsafe fn write_link(block: NonNull<u8>, next: usize) {
    // The buffer may come from the caller with arbitrary alignment, so the link may be unaligned.
    // SAFETY: Forwarding guarantees from the caller.
    unsafe {
        block.cast::<usize>().write_unaligned(next);
    }
}

/// # Safety
///
/// The block must be a free block, i.e. one that has had a link written into it.
unsafe fn read_link(block: NonNull<u8>) -> usize {
    // SAFETY: Forwarding guarantees from the caller.
    unsafe { block.cast::<usize>().read_unaligned() }
}

/// Returns the largest power-of-two alignment that every block in a buffer starting at `base`
/// with the given stride satisfies.
pub(crate) fn block_alignment(base: NonNull<u8>, stride: usize) -> usize {
    let trailing_zeros = (base.as_ptr().addr() | stride).trailing_zeros();

    1_usize
        .checked_shl(trailing_zeros)
        .expect("base pointer is non-null so it has fewer trailing zeros than bits")
}

/// The bookkeeping of a fixed-capacity free list threaded through a buffer of blocks.
///
/// The free list does not know where its buffer is. Pools pass the buffer base pointer to every
/// operation, which means the owner of an embedded buffer may be moved while no blocks are
/// allocated without invalidating the free list.
///
/// The free list uses interior mutability so that pools can be shared via `Rc` and hand out
/// block pointers without any exclusive references to the buffer ever being created.
#[derive(Debug)]
pub(crate) struct FreeList {
    /// Index of the first free block or `FREE_LIST_END` if every block is allocated.
    head: Cell<usize>,

    allocated: Cell<usize>,

    capacity: usize,
    stride: usize,
}

impl FreeList {
    /// Threads all `capacity` blocks of the buffer into a new free list.
    ///
    /// # Safety
    ///
    /// `base` must be valid for writes of `capacity * stride` bytes. The same condition applies
    /// to the `base` passed to every other method.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or `stride` is smaller than [`MIN_STRIDE`].
    pub(crate) unsafe fn new(base: NonNull<u8>, capacity: usize, stride: usize) -> Self {
        assert!(capacity > 0, "pool must have non-zero capacity");
        assert!(
            stride >= MIN_STRIDE,
            "pool stride {stride} is smaller than the minimum of {MIN_STRIDE} bytes"
        );
        assert!(
            capacity < FREE_LIST_END,
            "pool capacity must be less than usize::MAX"
        );

        // SAFETY: Forwarding guarantees from the caller.
        let head = unsafe { thread_blocks(base, capacity, stride) };

        Self {
            head: Cell::new(head),
            allocated: Cell::new(0),
            capacity,
            stride,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn stride(&self) -> usize {
        self.stride
    }

    pub(crate) fn allocated(&self) -> usize {
        self.allocated.get()
    }

    /// Pops the head of the free list.
    ///
    /// # Safety
    ///
    /// See `new()`.
    pub(crate) unsafe fn alloc(&self, base: NonNull<u8>) -> Option<NonNull<u8>> {
        let index = self.head.get();

        if index == FREE_LIST_END {
            return None;
        }

        // SAFETY: Every index on the free list is in bounds.
        let block = unsafe { block_at(base, index, self.stride) };

        // SAFETY: The block was on the free list, so it holds a link.
        self.head.set(unsafe { read_link(block) });

        self.allocated.set(
            self.allocated
                .get()
                .checked_add(1)
                .expect("guarded by capacity < usize::MAX"),
        );

        Some(block)
    }

    /// Pushes a block back onto the head of the free list.
    ///
    /// # Safety
    ///
    /// See `new()`.
    ///
    /// # Panics
    ///
    /// Panics if the pointer is not the start of a block in this buffer. With the
    /// `free_list_check` feature enabled, also panics if the block is already free.
    pub(crate) unsafe fn free(&self, base: NonNull<u8>, block: NonNull<u8>) {
        let Some(index) = self.index_of(base, block.as_ptr()) else {
            panic!(
                "freed pointer {block:?} is not the start of a block in pool with buffer at {base:?}, capacity {} and stride {}",
                self.capacity, self.stride
            );
        };

        #[cfg(feature = "free_list_check")]
        {
            // SAFETY: Forwarding guarantees from the caller.
            let already_free = unsafe { self.is_free(base, block.as_ptr()) };
            assert!(!already_free, "double free of block {index} at {block:?}");
        }

        // SAFETY: The index check above proved that the block is in bounds.
        unsafe {
            write_link(block, self.head.get());
        }

        self.head.set(index);

        self.allocated.set(
            self.allocated
                .get()
                .checked_sub(1)
                .expect("freed a block of a pool with no allocated blocks"),
        );
    }

    /// Returns the index of the block that starts at `ptr`, if `ptr` lies within the buffer
    /// and is aligned to a block boundary relative to `base`.
    pub(crate) fn index_of(&self, base: NonNull<u8>, ptr: *const u8) -> Option<usize> {
        let offset = ptr.addr().checked_sub(base.as_ptr().addr())?;

        if offset.checked_rem(self.stride)? != 0 {
            return None;
        }

        let index = offset.checked_div(self.stride)?;

        (index < self.capacity).then_some(index)
    }

    /// Returns whether the block starting at `ptr` is currently on the free list. O(n).
    ///
    /// # Safety
    ///
    /// See `new()`.
    pub(crate) unsafe fn is_free(&self, base: NonNull<u8>, ptr: *const u8) -> bool {
        let Some(index) = self.index_of(base, ptr) else {
            return false;
        };

        // SAFETY: Forwarding guarantees from the caller.
        unsafe { self.free_indexes(base) }.any(|free_index| free_index == index)
    }

    /// Counts the blocks on the free list by walking it. O(n).
    ///
    /// # Safety
    ///
    /// See `new()`.
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    pub(crate) unsafe fn len(&self, base: NonNull<u8>) -> usize {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe { self.free_indexes(base) }.count()
    }

    /// # Safety
    ///
    /// See `new()`.
    unsafe fn free_indexes(&self, base: NonNull<u8>) -> FreeIndexes<'_> {
        FreeIndexes {
            free_list: self,
            base,
            next: self.head.get(),
            remaining: self.capacity,
        }
    }
}

/// Walks the free list from the head, yielding block indexes.
#[derive(Debug)]
struct FreeIndexes<'a> {
    free_list: &'a FreeList,
    base: NonNull<u8>,
    next: usize,

    // A corrupted free list could contain a cycle, so we never walk more than `capacity` links.
    remaining: usize,
}

impl Iterator for FreeIndexes<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == FREE_LIST_END || self.remaining == 0 {
            return None;
        }

        assert!(
            self.next < self.free_list.capacity,
            "free list link {} points out of bounds of pool with capacity {}",
            self.next,
            self.free_list.capacity
        );

        let index = self.next;

        // SAFETY: The creator of the iterator guarantees the buffer is valid and we checked
        // above that the index is in bounds.
        let block = unsafe { block_at(self.base, index, self.free_list.stride) };

        // SAFETY: The block was reached via the free list, so it holds a link.
        self.next = unsafe { read_link(block) };
        self.remaining = self
            .remaining
            .checked_sub(1)
            .expect("guarded by zero check above");

        Some(index)
    }
}

impl FusedIterator for FreeIndexes<'_> {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    const STRIDE: usize = 16;
    const COUNT: usize = 4;

    fn buffer() -> Vec<MaybeUninit<u8>> {
        vec![MaybeUninit::uninit(); STRIDE * COUNT]
    }

    fn base_of(buffer: &mut [MaybeUninit<u8>]) -> NonNull<u8> {
        NonNull::from(buffer).cast::<u8>()
    }

    #[test]
    fn init_links_blocks_in_address_order() {
        let mut buffer = buffer();

        let head = init_free_list(&mut buffer, COUNT, STRIDE);
        assert_eq!(head, 0);

        let base = base_of(&mut buffer);

        for index in 0..COUNT {
            // SAFETY: Block is in bounds and was just initialized with a link.
            let link = unsafe { read_link(block_at(base, index, STRIDE)) };

            if index == COUNT - 1 {
                assert_eq!(link, FREE_LIST_END);
            } else {
                assert_eq!(link, index + 1);
            }
        }
    }

    #[test]
    #[should_panic]
    fn init_rejects_small_buffer() {
        let mut buffer = vec![MaybeUninit::uninit(); STRIDE];

        init_free_list(&mut buffer, COUNT, STRIDE);
    }

    #[test]
    #[should_panic]
    fn init_rejects_small_stride() {
        let mut buffer = buffer();

        init_free_list(&mut buffer, COUNT, MIN_STRIDE - 1);
    }

    #[test]
    fn alloc_hands_out_blocks_in_order_then_runs_dry() {
        let mut buffer = buffer();
        let base = base_of(&mut buffer);

        // SAFETY: The buffer is large enough and outlives the free list.
        let free_list = unsafe { FreeList::new(base, COUNT, STRIDE) };

        for index in 0..COUNT {
            // SAFETY: Same buffer as used in ctor.
            let block = unsafe { free_list.alloc(base) }.unwrap();
            assert_eq!(free_list.index_of(base, block.as_ptr()), Some(index));
        }

        // SAFETY: Same buffer as used in ctor.
        assert!(unsafe { free_list.alloc(base) }.is_none());
        assert_eq!(free_list.allocated(), COUNT);
    }

    #[test]
    fn free_is_lifo() {
        let mut buffer = buffer();
        let base = base_of(&mut buffer);

        // SAFETY: The buffer is large enough and outlives the free list.
        let free_list = unsafe { FreeList::new(base, COUNT, STRIDE) };

        // SAFETY: Same buffer as used in ctor.
        let a = unsafe { free_list.alloc(base) }.unwrap();
        // SAFETY: Same buffer as used in ctor.
        let b = unsafe { free_list.alloc(base) }.unwrap();

        // SAFETY: Same buffer as used in ctor.
        unsafe {
            free_list.free(base, a);
        }
        // SAFETY: Same buffer as used in ctor.
        unsafe {
            free_list.free(base, b);
        }

        // SAFETY: Same buffer as used in ctor.
        assert_eq!(unsafe { free_list.alloc(base) }, Some(b));
        // SAFETY: Same buffer as used in ctor.
        assert_eq!(unsafe { free_list.alloc(base) }, Some(a));
    }

    #[test]
    fn allocated_plus_free_equals_capacity() {
        let mut buffer = buffer();
        let base = base_of(&mut buffer);

        // SAFETY: The buffer is large enough and outlives the free list.
        let free_list = unsafe { FreeList::new(base, COUNT, STRIDE) };

        let mut blocks = Vec::new();

        for _ in 0..COUNT {
            // SAFETY: Same buffer as used in ctor.
            blocks.push(unsafe { free_list.alloc(base) }.unwrap());

            // SAFETY: Same buffer as used in ctor.
            let free = unsafe { free_list.len(base) };
            assert_eq!(free_list.allocated() + free, COUNT);
        }

        for block in blocks {
            // SAFETY: Same buffer as used in ctor.
            unsafe {
                free_list.free(base, block);
            }

            // SAFETY: Same buffer as used in ctor.
            let free = unsafe { free_list.len(base) };
            assert_eq!(free_list.allocated() + free, COUNT);
        }
    }

    #[test]
    fn index_of_rejects_foreign_and_misaligned() {
        let mut buffer = buffer();
        let base = base_of(&mut buffer);

        // SAFETY: The buffer is large enough and outlives the free list.
        let free_list = unsafe { FreeList::new(base, COUNT, STRIDE) };

        assert_eq!(free_list.index_of(base, base.as_ptr()), Some(0));

        // SAFETY: In bounds of the buffer.
        let misaligned = unsafe { base.add(1) };
        assert_eq!(free_list.index_of(base, misaligned.as_ptr()), None);

        // SAFETY: One past the end of the buffer is a valid pointer to create.
        let past_end = unsafe { base.add(STRIDE * COUNT) };
        assert_eq!(free_list.index_of(base, past_end.as_ptr()), None);

        let before = base.as_ptr().wrapping_sub(STRIDE);
        assert_eq!(free_list.index_of(base, before), None);
    }

    #[test]
    fn is_free_tracks_state() {
        let mut buffer = buffer();
        let base = base_of(&mut buffer);

        // SAFETY: The buffer is large enough and outlives the free list.
        let free_list = unsafe { FreeList::new(base, COUNT, STRIDE) };

        // SAFETY: Same buffer as used in ctor.
        let block = unsafe { free_list.alloc(base) }.unwrap();
        // SAFETY: Same buffer as used in ctor.
        assert!(!unsafe { free_list.is_free(base, block.as_ptr()) });

        // SAFETY: Same buffer as used in ctor.
        unsafe {
            free_list.free(base, block);
        }
        // SAFETY: Same buffer as used in ctor.
        assert!(unsafe { free_list.is_free(base, block.as_ptr()) });
    }

    #[test]
    #[should_panic]
    fn free_foreign_pointer_panics() {
        let mut buffer = buffer();
        let base = base_of(&mut buffer);

        // SAFETY: The buffer is large enough and outlives the free list.
        let free_list = unsafe { FreeList::new(base, COUNT, STRIDE) };

        // SAFETY: Same buffer as used in ctor.
        _ = unsafe { free_list.alloc(base) };

        let mut other = 0_usize;

        // SAFETY: Same buffer as used in ctor. The foreign pointer is rejected before use.
        unsafe {
            free_list.free(base, NonNull::from(&mut other).cast());
        }
    }

    #[cfg(feature = "free_list_check")]
    #[test]
    #[should_panic]
    fn double_free_panics_when_checked() {
        let mut buffer = buffer();
        let base = base_of(&mut buffer);

        // SAFETY: The buffer is large enough and outlives the free list.
        let free_list = unsafe { FreeList::new(base, COUNT, STRIDE) };

        // SAFETY: Same buffer as used in ctor.
        let a = unsafe { free_list.alloc(base) }.unwrap();
        // SAFETY: Same buffer as used in ctor.
        _ = unsafe { free_list.alloc(base) }.unwrap();

        // SAFETY: Same buffer as used in ctor.
        unsafe {
            free_list.free(base, a);
        }
        // SAFETY: Same buffer as used in ctor.
        unsafe {
            free_list.free(base, a);
        }
    }

    #[test]
    fn block_alignment_is_limited_by_stride() {
        let mut buffer = vec![0_u64; 8];
        let base = NonNull::from(buffer.as_mut_slice()).cast::<u8>();

        assert_eq!(block_alignment(base, 24), 8);
        assert_eq!(block_alignment(base, 12), 4);
    }
}
