use std::alloc::{Layout, dealloc};
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};
use std::thread;

use tracing::debug;

use crate::free_list::{FreeList, block_alignment};
use crate::{BlockAllocator, DropPolicy, PreallocatedPoolBuilder};

/// A fixed-capacity pool of equally sized blocks in a buffer chosen at runtime.
///
/// The buffer is either allocated by the builder, supplied by the caller as an owned boxed slice
/// or borrowed from the caller for the `'static` lifetime. The pool never grows: once every block
/// is allocated, [`alloc()`][BlockAllocator::alloc] returns `None` until a block is freed.
///
/// Allocation and deallocation are O(1) and never touch the global allocator.
///
/// # Examples
///
/// ```
/// use pooled_signals::{BlockAllocator, PreallocatedPool};
///
/// let pool = PreallocatedPool::builder().capacity(4).stride(32).build();
///
/// let block = pool.alloc().unwrap();
/// assert_eq!(pool.allocated(), 1);
///
/// // SAFETY: The block came from this pool and is not used afterwards.
/// unsafe { pool.free(block) };
/// assert!(pool.is_empty());
/// ```
pub struct PreallocatedPool {
    /// Start of the memory region we release on drop. May precede `base` by alignment padding.
    buffer: NonNull<u8>,
    buffer_len: usize,
    ownership: Ownership,

    /// Start of the first block.
    base: NonNull<u8>,
    alignment: usize,

    free_list: FreeList,

    drop_policy: DropPolicy,
}

/// How the pool obtained its buffer, which determines how the buffer is released.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Ownership {
    /// Allocated from the global allocator with this layout.
    Allocated(Layout),

    /// Supplied as a `Box<[MaybeUninit<u8>]>` that we reconstitute and drop.
    Boxed,

    /// Borrowed from the caller for `'static`, never released.
    Static,
}

impl PreallocatedPool {
    /// Creates a builder for configuring and creating a pool.
    ///
    /// # Examples
    ///
    /// ```
    /// use pooled_signals::{BlockAllocator, PreallocatedPool};
    ///
    /// let pool = PreallocatedPool::builder()
    ///     .capacity(64)
    ///     .block_layout_of::<[u64; 4]>()
    ///     .build();
    ///
    /// assert_eq!(pool.capacity(), 64);
    /// assert!(pool.stride() >= 32);
    /// ```
    pub fn builder() -> PreallocatedPoolBuilder {
        PreallocatedPoolBuilder::new()
    }

    /// # Safety
    ///
    /// `buffer` must be valid for reads and writes of `buffer_len` bytes for as long as the pool
    /// exists and must be releasable as described by `ownership`. The blocks starting at `base`
    /// must fit within that region.
    pub(crate) unsafe fn new_inner(
        buffer: NonNull<u8>,
        buffer_len: usize,
        ownership: Ownership,
        base: NonNull<u8>,
        capacity: usize,
        stride: usize,
        drop_policy: DropPolicy,
    ) -> Self {
        // SAFETY: Forwarding guarantees from the caller.
        let free_list = unsafe { FreeList::new(base, capacity, stride) };

        let alignment = block_alignment(base, stride);

        debug!(
            capacity,
            stride,
            alignment,
            ?ownership,
            "created preallocated pool"
        );

        Self {
            buffer,
            buffer_len,
            ownership,
            base,
            alignment,
            free_list,
            drop_policy,
        }
    }
}

// SAFETY: Blocks are disjoint `stride()`-sized slices of a buffer that stays valid until the
// pool is dropped, starting at the aligned `base`. The free list hands out each block once
// until it is freed again.
unsafe impl BlockAllocator for PreallocatedPool {
    fn capacity(&self) -> usize {
        self.free_list.capacity()
    }

    fn stride(&self) -> usize {
        self.free_list.stride()
    }

    fn alignment(&self) -> usize {
        self.alignment
    }

    fn allocated(&self) -> usize {
        self.free_list.allocated()
    }

    fn alloc(&self) -> Option<NonNull<u8>> {
        // SAFETY: The buffer is valid for the lifetime of the pool, guaranteed by ctor.
        unsafe { self.free_list.alloc(self.base) }
    }

    unsafe fn free(&self, block: NonNull<u8>) {
        // SAFETY: The buffer is valid for the lifetime of the pool, guaranteed by ctor. The
        // caller guarantees that the block is currently allocated.
        unsafe {
            self.free_list.free(self.base, block);
        }
    }

    fn is_bounded_and_aligned(&self, ptr: *const u8) -> bool {
        self.free_list.index_of(self.base, ptr).is_some()
    }

    fn is_free(&self, ptr: *const u8) -> bool {
        // SAFETY: The buffer is valid for the lifetime of the pool, guaranteed by ctor.
        unsafe { self.free_list.is_free(self.base, ptr) }
    }

    fn free_list_len(&self) -> usize {
        // SAFETY: The buffer is valid for the lifetime of the pool, guaranteed by ctor.
        unsafe { self.free_list.len(self.base) }
    }
}

impl Drop for PreallocatedPool {
    fn drop(&mut self) {
        let allocated = self.free_list.allocated();

        match self.ownership {
            Ownership::Allocated(layout) => {
                // SAFETY: The buffer was allocated by the builder with this exact layout.
                unsafe {
                    dealloc(self.buffer.as_ptr(), layout);
                }
            }
            Ownership::Boxed => {
                let slice = ptr::slice_from_raw_parts_mut(
                    self.buffer.as_ptr().cast::<MaybeUninit<u8>>(),
                    self.buffer_len,
                );

                // SAFETY: The buffer came from `Box::into_raw()` on a boxed slice of this length.
                drop(unsafe { Box::from_raw(slice) });
            }
            Ownership::Static => {}
        }

        // We release the memory first. If we are going to panic, there is little good to expect
        // for the app itself anyway.
        //
        // If we are already panicking, we do not want to panic again because that will
        // simply obscure whatever the original panic was.
        if self.drop_policy == DropPolicy::MustBeEmpty && !thread::panicking() {
            assert!(
                allocated == 0,
                "dropped a pool with {allocated} allocated blocks with a policy that says it must be empty when dropped"
            );
        }
    }
}

impl fmt::Debug for PreallocatedPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreallocatedPool")
            .field("base", &self.base)
            .field("ownership", &self.ownership)
            .field("capacity", &self.free_list.capacity())
            .field("stride", &self.free_list.stride())
            .field("alignment", &self.alignment)
            .field("allocated", &self.free_list.allocated())
            .field("drop_policy", &self.drop_policy)
            .finish()
    }
}
