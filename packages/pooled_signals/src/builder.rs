use std::alloc::{Layout, alloc};
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use crate::preallocated_pool::Ownership;
use crate::{
    CONNECTION_BLOCK_ALIGN, CONNECTION_BLOCK_SIZE, DEFAULT_POOL_CAPACITY, DropPolicy, MIN_STRIDE,
    PreallocatedPool,
};

/// Builder for creating an instance of [`PreallocatedPool`].
///
/// By default, the pool has [`DEFAULT_POOL_CAPACITY`] blocks, each large enough to hold one
/// signal-side connection, and its buffer is allocated from the global allocator when the pool
/// is built.
///
/// # Examples
///
/// ```
/// use pooled_signals::{BlockAllocator, DropPolicy, PreallocatedPool};
///
/// let pool = PreallocatedPool::builder()
///     .capacity(100)
///     .stride(48)
///     .drop_policy(DropPolicy::MustBeEmpty)
///     .build();
///
/// assert_eq!(pool.capacity(), 100);
/// ```
#[derive(Debug)]
#[must_use]
pub struct PreallocatedPoolBuilder {
    capacity: Option<usize>,
    block_layout: Layout,
    drop_policy: DropPolicy,
}

impl PreallocatedPoolBuilder {
    pub(crate) fn new() -> Self {
        Self {
            capacity: None,
            block_layout: Layout::from_size_align(CONNECTION_BLOCK_SIZE, CONNECTION_BLOCK_ALIGN)
                .expect("connection node layout is a valid layout"),
            drop_policy: DropPolicy::default(),
        }
    }

    /// Sets the number of blocks in the pool.
    ///
    /// When building in a caller-supplied buffer without setting the capacity, the pool uses as
    /// many blocks as fit in the buffer.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn capacity(mut self, capacity: usize) -> Self {
        assert!(capacity > 0, "pool capacity must be non-zero");

        self.capacity = Some(capacity);
        self
    }

    /// Sets the size of each block in bytes, keeping the current block alignment.
    ///
    /// The actual stride of the pool is rounded up to at least [`MIN_STRIDE`] and to a multiple
    /// of the block alignment.
    ///
    /// # Panics
    ///
    /// Panics if the stride overflows `isize` when rounded up to the block alignment.
    pub fn stride(mut self, stride: usize) -> Self {
        self.block_layout = Layout::from_size_align(stride, self.block_layout.align())
            .expect("block stride must not overflow isize when rounded up to alignment");
        self
    }

    /// Sets the size and alignment of each block.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::alloc::Layout;
    ///
    /// use pooled_signals::{BlockAllocator, PreallocatedPool};
    ///
    /// let pool = PreallocatedPool::builder()
    ///     .capacity(4)
    ///     .block_layout(Layout::from_size_align(20, 16).unwrap())
    ///     .build();
    ///
    /// assert_eq!(pool.stride(), 32);
    /// ```
    pub fn block_layout(mut self, layout: Layout) -> Self {
        self.block_layout = layout;
        self
    }

    /// Sizes and aligns each block to hold one `T`.
    pub fn block_layout_of<T>(self) -> Self {
        self.block_layout(Layout::new::<T>())
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs how
    /// to treat blocks still allocated when the pool is dropped.
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Builds the pool, allocating its buffer from the global allocator.
    ///
    /// This is the only allocation the pool ever makes.
    ///
    /// # Panics
    ///
    /// Panics if the total buffer size overflows `isize`.
    #[must_use]
    pub fn build(self) -> PreallocatedPool {
        let stride = self.effective_stride();
        let capacity = self.capacity.unwrap_or(DEFAULT_POOL_CAPACITY);

        let size = stride
            .checked_mul(capacity)
            .expect("pool buffer size overflows usize");

        let layout = Layout::from_size_align(size, self.block_layout.align())
            .expect("pool buffer size overflows isize");

        // SAFETY: The layout is not zero-sized because capacity is non-zero (guarded by
        // `capacity()`) and stride is at least MIN_STRIDE.
        let buffer = NonNull::new(unsafe { alloc(layout) }).expect(
            "we do not intend to handle allocation failure as a real possibility - OOM is panic",
        );

        // SAFETY: We just allocated the buffer with room for every block. It is released with
        // the same layout when the pool is dropped.
        unsafe {
            PreallocatedPool::new_inner(
                buffer,
                size,
                Ownership::Allocated(layout),
                buffer,
                capacity,
                stride,
                self.drop_policy,
            )
        }
    }

    /// Builds the pool in a caller-supplied buffer, taking ownership of it.
    ///
    /// The first block is placed at the first suitably aligned address in the buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer cannot hold the configured capacity or, when no capacity is
    /// configured, cannot hold even one block.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::mem::MaybeUninit;
    ///
    /// use pooled_signals::{BlockAllocator, PreallocatedPool};
    ///
    /// let buffer = vec![MaybeUninit::uninit(); 1024].into_boxed_slice();
    ///
    /// let pool = PreallocatedPool::builder().stride(64).build_in(buffer);
    /// assert!(pool.capacity() >= 15);
    /// ```
    #[must_use]
    pub fn build_in(self, buffer: Box<[MaybeUninit<u8>]>) -> PreallocatedPool {
        let buffer_len = buffer.len();
        let (base, capacity, stride) = self.layout_blocks_in(&buffer);

        let buffer = NonNull::new(Box::into_raw(buffer))
            .expect("boxed pointers are never null")
            .cast::<u8>();

        let base_offset = base
            .checked_sub(buffer.as_ptr().addr())
            .expect("blocks start within the buffer");

        // SAFETY: `layout_blocks_in()` verified that the blocks fit in the buffer.
        let base = unsafe { buffer.add(base_offset) };

        // SAFETY: We own the buffer now and it is dropped as a boxed slice with the pool.
        unsafe {
            PreallocatedPool::new_inner(
                buffer,
                buffer_len,
                Ownership::Boxed,
                base,
                capacity,
                stride,
                self.drop_policy,
            )
        }
    }

    /// Builds the pool in a caller-supplied buffer that lives forever, for example one taken
    /// from a `static` via [`Box::leak()`] or a static cell.
    ///
    /// The buffer is never released by the pool.
    ///
    /// # Panics
    ///
    /// Panics if the buffer cannot hold the configured capacity or, when no capacity is
    /// configured, cannot hold even one block.
    #[must_use]
    pub fn build_in_static(self, buffer: &'static mut [MaybeUninit<u8>]) -> PreallocatedPool {
        let buffer_len = buffer.len();
        let (base, capacity, stride) = self.layout_blocks_in(buffer);

        let buffer = NonNull::from(buffer).cast::<u8>();

        let base_offset = base
            .checked_sub(buffer.as_ptr().addr())
            .expect("blocks start within the buffer");

        // SAFETY: `layout_blocks_in()` verified that the blocks fit in the buffer.
        let base = unsafe { buffer.add(base_offset) };

        // SAFETY: The buffer is borrowed exclusively for 'static, so it outlives the pool.
        unsafe {
            PreallocatedPool::new_inner(
                buffer,
                buffer_len,
                Ownership::Static,
                base,
                capacity,
                stride,
                self.drop_policy,
            )
        }
    }

    fn effective_stride(&self) -> usize {
        self.block_layout
            .size()
            .max(MIN_STRIDE)
            .checked_next_multiple_of(self.block_layout.align())
            .expect("block stride overflows usize when rounded up to alignment")
    }

    /// Decides where the blocks go in the buffer, returning the address of the first block,
    /// the capacity and the stride.
    fn layout_blocks_in(&self, buffer: &[MaybeUninit<u8>]) -> (usize, usize, usize) {
        let stride = self.effective_stride();
        let align = self.block_layout.align();

        let start = buffer.as_ptr().addr();
        let padding = buffer.as_ptr().align_offset(align);
        let usable_len = buffer.len().saturating_sub(padding);

        let capacity = self.capacity.unwrap_or_else(|| {
            usable_len
                .checked_div(stride)
                .expect("guarded by stride being at least MIN_STRIDE")
        });

        assert!(
            capacity > 0,
            "buffer of {} bytes cannot hold a block of {stride} bytes aligned to {align}",
            buffer.len()
        );

        let required_len = capacity
            .checked_mul(stride)
            .expect("pool buffer size overflows usize");

        assert!(
            usable_len >= required_len,
            "buffer of {} bytes cannot hold {capacity} blocks of {stride} bytes aligned to {align}",
            buffer.len()
        );

        let base = start
            .checked_add(padding)
            .expect("guarded by usable length check above");

        (base, capacity, stride)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::BlockAllocator;

    #[test]
    fn defaults() {
        let pool = PreallocatedPoolBuilder::new().build();

        assert_eq!(pool.capacity(), DEFAULT_POOL_CAPACITY);
        assert!(pool.stride() >= CONNECTION_BLOCK_SIZE);
        assert!(pool.alignment() >= CONNECTION_BLOCK_ALIGN);
    }

    #[test]
    fn tiny_stride_is_raised_to_minimum() {
        let pool = PreallocatedPoolBuilder::new()
            .capacity(2)
            .block_layout_of::<u8>()
            .build();

        assert_eq!(pool.stride(), MIN_STRIDE);
    }

    #[test]
    #[should_panic]
    fn zero_capacity_panics() {
        _ = PreallocatedPoolBuilder::new().capacity(0);
    }

    #[test]
    #[should_panic]
    fn build_in_too_small_buffer_panics() {
        let buffer = vec![MaybeUninit::uninit(); 32].into_boxed_slice();

        _ = PreallocatedPoolBuilder::new()
            .capacity(10)
            .stride(16)
            .build_in(buffer);
    }

    #[test]
    #[should_panic]
    fn build_in_buffer_without_room_for_one_block_panics() {
        let buffer = vec![MaybeUninit::uninit(); 4].into_boxed_slice();

        _ = PreallocatedPoolBuilder::new().stride(16).build_in(buffer);
    }

    #[test]
    fn build_in_skips_unaligned_prefix() {
        let pool = PreallocatedPoolBuilder::new()
            .block_layout(Layout::from_size_align(64, 64).unwrap())
            .build_in(vec![MaybeUninit::uninit(); 64 * 4].into_boxed_slice());

        // Depending on where the allocator put the buffer, the first block may move forward.
        assert!(pool.capacity() >= 3);

        let block = pool.alloc().unwrap();
        assert_eq!(block.as_ptr().addr() % 64, 0);
        // SAFETY: The block was allocated from this pool and is not used afterwards.
        unsafe { pool.free(block) };
    }
}
