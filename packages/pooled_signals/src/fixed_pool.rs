use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use crate::free_list::{FreeList, block_alignment};
use crate::{BlockAllocator, MIN_STRIDE};

/// One block of a [`FixedPool`]. The alignment is fixed so that any connection node fits.
#[repr(C, align(16))]
#[derive(Clone, Copy)]
struct Block<const STRIDE: usize>([MaybeUninit<u8>; STRIDE]);

/// A fixed-capacity pool whose buffer of `CAPACITY` blocks is embedded in the pool itself,
/// with both dimensions known at compile time.
///
/// Each block holds at least `STRIDE` bytes; the actual stride is `STRIDE` rounded up to a
/// multiple of 16 bytes, which is also the block alignment.
///
/// Creating the pool performs no heap allocation. The pool may be moved freely while no blocks
/// are allocated; moving it invalidates any outstanding block pointers. To share the pool between
/// signals, move it into a [`SharedPool`][crate::SharedPool].
///
/// # Examples
///
/// ```
/// use pooled_signals::{BlockAllocator, FixedPool};
///
/// let pool = FixedPool::<32, 8>::new();
/// assert_eq!(pool.capacity(), 8);
///
/// let block = pool.alloc().unwrap();
///
/// // SAFETY: The block came from this pool and is not used afterwards.
/// unsafe { pool.free(block) };
/// ```
pub struct FixedPool<const STRIDE: usize, const CAPACITY: usize> {
    blocks: UnsafeCell<[Block<STRIDE>; CAPACITY]>,
    free_list: FreeList,
}

impl<const STRIDE: usize, const CAPACITY: usize> FixedPool<STRIDE, CAPACITY> {
    /// Creates a pool with every block vacant.
    ///
    /// # Panics
    ///
    /// Panics if `CAPACITY` is zero or `STRIDE` is smaller than [`MIN_STRIDE`].
    #[must_use]
    pub fn new() -> Self {
        assert!(CAPACITY > 0, "FixedPool must have non-zero capacity");
        assert!(
            STRIDE >= MIN_STRIDE,
            "FixedPool stride {STRIDE} is smaller than the minimum of {MIN_STRIDE} bytes"
        );

        let mut blocks = [Block([MaybeUninit::uninit(); STRIDE]); CAPACITY];

        // The free list links are indexes written into the block bytes, so they move together
        // with the blocks when we move the array into the pool below.
        let base = NonNull::from(&mut blocks).cast::<u8>();

        // SAFETY: The array has room for exactly CAPACITY blocks of the stride we pass.
        let free_list = unsafe { FreeList::new(base, CAPACITY, size_of::<Block<STRIDE>>()) };

        Self {
            blocks: UnsafeCell::new(blocks),
            free_list,
        }
    }

    fn base(&self) -> NonNull<u8> {
        // Writing through this pointer is permitted because the blocks are in an UnsafeCell.
        NonNull::from(&self.blocks).cast::<u8>()
    }
}

impl<const STRIDE: usize, const CAPACITY: usize> Default for FixedPool<STRIDE, CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: Blocks are disjoint slices of the embedded array, each `stride()` bytes long at the
// alignment of `Block`. The free list hands out each block once until it is freed again.
unsafe impl<const STRIDE: usize, const CAPACITY: usize> BlockAllocator
    for FixedPool<STRIDE, CAPACITY>
{
    fn capacity(&self) -> usize {
        CAPACITY
    }

    fn stride(&self) -> usize {
        self.free_list.stride()
    }

    fn alignment(&self) -> usize {
        block_alignment(self.base(), self.free_list.stride())
    }

    fn allocated(&self) -> usize {
        self.free_list.allocated()
    }

    fn alloc(&self) -> Option<NonNull<u8>> {
        // SAFETY: The embedded buffer lives as long as the pool.
        unsafe { self.free_list.alloc(self.base()) }
    }

    unsafe fn free(&self, block: NonNull<u8>) {
        // SAFETY: The embedded buffer lives as long as the pool. The caller guarantees that
        // the block is currently allocated.
        unsafe {
            self.free_list.free(self.base(), block);
        }
    }

    fn is_bounded_and_aligned(&self, ptr: *const u8) -> bool {
        self.free_list.index_of(self.base(), ptr).is_some()
    }

    fn is_free(&self, ptr: *const u8) -> bool {
        // SAFETY: The embedded buffer lives as long as the pool.
        unsafe { self.free_list.is_free(self.base(), ptr) }
    }

    fn free_list_len(&self) -> usize {
        // SAFETY: The embedded buffer lives as long as the pool.
        unsafe { self.free_list.len(self.base()) }
    }
}

impl<const STRIDE: usize, const CAPACITY: usize> fmt::Debug for FixedPool<STRIDE, CAPACITY> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedPool")
            .field("capacity", &CAPACITY)
            .field("stride", &self.free_list.stride())
            .field("allocated", &self.free_list.allocated())
            .finish()
    }
}
