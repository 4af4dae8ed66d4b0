use std::ptr::NonNull;

/// An allocator that hands out fixed-size blocks from a fixed-capacity pool.
///
/// This is the seam between the connection registry and the memory it lives in. Any type that
/// can hand out blocks of at least the required size and alignment can back a [`Signal`][1] or
/// an [`Observer`][2], which makes it possible to share one pool between many signals or to give
/// a hot signal a dedicated pool.
///
/// All methods take `&self`. Implementations use interior mutability, as the allocator is shared
/// between every registry that allocates from it. Implementations are single-threaded.
///
/// # Safety
///
/// Registries write their nodes into the returned blocks through raw pointers, trusting the
/// allocator's reported dimensions. Implementations must guarantee that:
///
/// * Every block returned by [`alloc()`][3] is valid for reads and writes of [`stride()`][5]
///   bytes and aligned to [`alignment()`][6], which is a power of two.
/// * A block is never handed out again before it has been passed to [`free()`][4].
/// * A block remains valid until it is freed or the allocator is dropped.
/// * `stride()` and `alignment()` never change over the lifetime of the allocator.
///
/// Freeing a block that is not currently allocated would break the second guarantee, which is
/// why [`free()`][4] is itself `unsafe`:
///
/// ```compile_fail
/// use pooled_signals::{BlockAllocator, FixedPool};
///
/// let pool = FixedPool::<32, 4>::new();
/// let block = pool.alloc().unwrap();
///
/// pool.free(block);
/// ```
///
/// An allocator can only be declared with `unsafe impl`:
///
/// ```compile_fail
/// use std::ptr::NonNull;
///
/// use pooled_signals::BlockAllocator;
///
/// struct Empty;
///
/// impl BlockAllocator for Empty {
///     fn capacity(&self) -> usize { 0 }
///     fn stride(&self) -> usize { 16 }
///     fn alignment(&self) -> usize { 16 }
///     fn allocated(&self) -> usize { 0 }
///     fn alloc(&self) -> Option<NonNull<u8>> { None }
///     unsafe fn free(&self, _block: NonNull<u8>) {}
///     fn is_bounded_and_aligned(&self, _ptr: *const u8) -> bool { false }
///     fn is_free(&self, _ptr: *const u8) -> bool { false }
///     fn free_list_len(&self) -> usize { 0 }
/// }
/// ```
///
/// [1]: crate::Signal
/// [2]: crate::Observer
/// [3]: BlockAllocator::alloc
/// [4]: BlockAllocator::free
/// [5]: BlockAllocator::stride
/// [6]: BlockAllocator::alignment
pub unsafe trait BlockAllocator {
    /// The total number of blocks the allocator manages.
    fn capacity(&self) -> usize;

    /// The distance in bytes between the starts of consecutive blocks.
    ///
    /// Every block can hold a value of up to this many bytes.
    fn stride(&self) -> usize;

    /// The alignment in bytes that every block is guaranteed to satisfy.
    fn alignment(&self) -> usize;

    /// The number of blocks currently allocated.
    fn allocated(&self) -> usize;

    /// Whether no blocks are currently allocated.
    fn is_empty(&self) -> bool {
        self.allocated() == 0
    }

    /// Whether every block is currently allocated.
    fn is_full(&self) -> bool {
        self.allocated() == self.capacity()
    }

    /// Takes a vacant block. O(1).
    ///
    /// Returns `None` if every block is already allocated. The contents of the returned block are
    /// unspecified.
    fn alloc(&self) -> Option<NonNull<u8>>;

    /// Returns a block to the allocator. O(1) unless extra diagnostics are enabled.
    ///
    /// # Safety
    ///
    /// The block must have been returned by [`alloc()`][BlockAllocator::alloc] of this allocator
    /// and must not have been freed since. The caller must not access the block afterwards.
    ///
    /// # Panics
    ///
    /// Panics if the pointer is not the start of a block managed by this allocator. With the
    /// `free_list_check` feature enabled, also panics if the block is already vacant.
    unsafe fn free(&self, block: NonNull<u8>);

    /// Whether `ptr` lies within the allocator's buffer and on a block boundary.
    fn is_bounded_and_aligned(&self, ptr: *const u8) -> bool;

    /// Whether the block starting at `ptr` is currently vacant. O(n).
    ///
    /// This is a diagnostic and returns `false` for any pointer that is not
    /// [bounded and aligned][BlockAllocator::is_bounded_and_aligned].
    fn is_free(&self, ptr: *const u8) -> bool;

    /// Counts the vacant blocks by walking the free list. O(n).
    ///
    /// This is a diagnostic. In a healthy allocator it always equals
    /// `capacity() - allocated()`.
    fn free_list_len(&self) -> usize;
}
