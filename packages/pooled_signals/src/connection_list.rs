use std::any::type_name;
use std::cell::Cell;
use std::fmt;
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::{Error, Result, SharedPool};

/// One pool-allocated element of a [`ConnectionList`].
///
/// The links are cells so that nodes are only ever accessed via shared references, which allows
/// a signal to keep walking its nodes while callbacks append to the list.
pub(crate) struct Node<T> {
    prev: Cell<Option<NonNull<Node<T>>>>,
    next: Cell<Option<NonNull<Node<T>>>>,
    value: T,
}

/// An ordered doubly-linked list whose nodes are allocated from a [`SharedPool`].
///
/// Every insertion takes one block from the pool and every removal returns it, so once the pool
/// exists the list never touches the global allocator. Iteration order is always insertion
/// order; removing an element never reorders the others.
///
/// # Examples
///
/// ```
/// use pooled_signals::{ConnectionList, SharedPool};
///
/// let pool = SharedPool::for_connections(4);
/// let mut list = ConnectionList::new(&pool);
///
/// list.push_back(1).unwrap();
/// list.push_back(2).unwrap();
/// list.push_back(3).unwrap();
///
/// list.retain(|value| *value != 2);
///
/// assert_eq!(list.iter().copied().collect::<Vec<_>>(), [1, 3]);
/// assert_eq!(pool.allocated(), 2);
/// ```
pub struct ConnectionList<T> {
    pool: SharedPool,

    head: Option<NonNull<Node<T>>>,
    tail: Option<NonNull<Node<T>>>,
    len: usize,

    // We own `T` values stored in the pool.
    _values: PhantomData<T>,
}

impl<T> ConnectionList<T> {
    /// Creates an empty list that allocates its nodes from `pool`.
    ///
    /// # Panics
    ///
    /// Panics if the blocks of the pool are too small or insufficiently aligned to hold a node
    /// containing a `T`.
    #[must_use]
    pub fn new(pool: &SharedPool) -> Self {
        assert!(
            pool.stride() >= size_of::<Node<T>>(),
            "pool stride of {} bytes is too small for a list node of {} which requires {} bytes",
            pool.stride(),
            type_name::<T>(),
            size_of::<Node<T>>()
        );
        assert!(
            pool.alignment() >= align_of::<Node<T>>(),
            "pool alignment of {} bytes is too small for a list node of {} which requires {} bytes",
            pool.alignment(),
            type_name::<T>(),
            align_of::<Node<T>>()
        );

        Self {
            pool: pool.clone(),
            head: None,
            tail: None,
            len: 0,
            _values: PhantomData,
        }
    }

    /// The number of values in the list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the list has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends a value to the end of the list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if the pool has no vacant blocks. The value is dropped.
    pub fn push_back(&mut self, value: T) -> Result<()> {
        let Some(block) = self.pool.alloc() else {
            return Err(Error::PoolExhausted {
                capacity: self.pool.capacity(),
            });
        };

        let node = block.cast::<Node<T>>();

        // SAFETY: The pool hands out each block to one owner only, sized and aligned for a node
        // as guarded by ctor. This is part of the `BlockAllocator` contract.
        unsafe {
            node.write(Node {
                prev: Cell::new(self.tail),
                next: Cell::new(None),
                value,
            });
        }

        match self.tail {
            // SAFETY: The tail is a live node of this list.
            Some(tail) => unsafe { tail.as_ref() }.next.set(Some(node)),
            None => self.head = Some(node),
        }

        self.tail = Some(node);
        self.len = self
            .len
            .checked_add(1)
            .expect("guarded by pool capacity being less than usize::MAX");

        Ok(())
    }

    /// Removes the first value, returning its block to the pool.
    pub fn pop_front(&mut self) -> Option<T> {
        self.head.map(|node| {
            // SAFETY: The head is a live node of this list.
            unsafe { self.unlink(node) }
        })
    }

    /// Removes the last value, returning its block to the pool.
    pub fn pop_back(&mut self) -> Option<T> {
        self.tail.map(|node| {
            // SAFETY: The tail is a live node of this list.
            unsafe { self.unlink(node) }
        })
    }

    /// Removes every value, returning all blocks to the pool.
    pub fn clear(&mut self) {
        while self.pop_front().is_some() {}
    }

    /// Keeps only the values for which `keep` returns `true`, preserving their order.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        let mut cursor = self.cursor_front_mut();

        while let Some(value) = cursor.current() {
            if keep(value) {
                cursor.move_next();
            } else {
                drop(cursor.remove_current());
            }
        }
    }

    /// Iterates over the values in insertion order.
    pub fn iter(&self) -> ConnectionListIter<'_, T> {
        ConnectionListIter {
            next: self.head,
            remaining: self.len,
            _list: PhantomData,
        }
    }

    /// Returns a cursor positioned at the first value, which can remove values while iterating.
    pub fn cursor_front_mut(&mut self) -> CursorMut<'_, T> {
        CursorMut {
            current: self.head,
            list: self,
        }
    }

    pub(crate) fn front(&self) -> Option<NodeRef<T>> {
        self.head.map(|node| NodeRef { node })
    }

    pub(crate) fn back(&self) -> Option<NodeRef<T>> {
        self.tail.map(|node| NodeRef { node })
    }

    /// # Safety
    ///
    /// The node must be a live node of this list and no references to its value may exist.
    unsafe fn unlink(&mut self, node: NonNull<Node<T>>) -> T {
        // SAFETY: Forwarding guarantees from the caller.
        let node_ref = unsafe { node.as_ref() };

        let prev = node_ref.prev.get();
        let next = node_ref.next.get();

        match prev {
            // SAFETY: Neighbors of a live node are live nodes of the same list.
            Some(prev) => unsafe { prev.as_ref() }.next.set(next),
            None => self.head = next,
        }

        match next {
            // SAFETY: Neighbors of a live node are live nodes of the same list.
            Some(next) => unsafe { next.as_ref() }.prev.set(prev),
            None => self.tail = prev,
        }

        self.len = self
            .len
            .checked_sub(1)
            .expect("unlinked a node from an empty list");

        // SAFETY: The node is live, guaranteed by the caller.
        let value_ptr = unsafe { &raw const (*node.as_ptr()).value };

        // SAFETY: The node is no longer reachable from the list and the caller guarantees there
        // are no references to the value, so we can move it out before releasing the block.
        let value = unsafe { value_ptr.read() };

        // SAFETY: The block was allocated from this pool in `push_back()` and the node is no
        // longer reachable, so nothing accesses it after this.
        unsafe {
            self.pool.free(node.cast());
        }

        value
    }
}

impl<T> Drop for ConnectionList<T> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<T: fmt::Debug> fmt::Debug for ConnectionList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<'a, T> IntoIterator for &'a ConnectionList<T> {
    type Item = &'a T;
    type IntoIter = ConnectionListIter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the values of a [`ConnectionList`] in insertion order.
#[derive(Debug)]
pub struct ConnectionListIter<'a, T> {
    next: Option<NonNull<Node<T>>>,
    remaining: usize,
    _list: PhantomData<&'a T>,
}

impl<'a, T> Iterator for ConnectionListIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next?;

        // SAFETY: The list is borrowed for 'a, so its nodes stay alive and unmodified.
        let node = unsafe { node.as_ref() };

        self.next = node.next.get();
        self.remaining = self.remaining.saturating_sub(1);

        Some(&node.value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for ConnectionListIter<'_, T> {}
impl<T> FusedIterator for ConnectionListIter<'_, T> {}

/// A cursor over a [`ConnectionList`] that can remove the value it points at.
///
/// Removing the current value advances the cursor to the next one, so a removal loop never
/// skips or revisits values.
#[derive(Debug)]
pub struct CursorMut<'a, T> {
    list: &'a mut ConnectionList<T>,
    current: Option<NonNull<Node<T>>>,
}

impl<T> CursorMut<'_, T> {
    /// Whether the cursor points at a value. A cursor that moved past the end is not valid.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    /// The value the cursor points at, if it is valid.
    #[must_use]
    pub fn current(&self) -> Option<&T> {
        self.current.map(|node| {
            // SAFETY: The cursor only ever points at live nodes of the exclusively borrowed list.
            &unsafe { node.as_ref() }.value
        })
    }

    /// Moves to the next value. Does nothing if the cursor is not valid.
    pub fn move_next(&mut self) {
        if let Some(node) = self.current {
            // SAFETY: The cursor only ever points at live nodes of the exclusively borrowed list.
            self.current = unsafe { node.as_ref() }.next.get();
        }
    }

    /// Removes the current value from the list and moves to the next one.
    ///
    /// Returns `None` and does nothing if the cursor is not valid.
    pub fn remove_current(&mut self) -> Option<T> {
        let node = self.current?;

        // SAFETY: The cursor only ever points at live nodes of the exclusively borrowed list.
        self.current = unsafe { node.as_ref() }.next.get();

        // SAFETY: The node is live and any reference handed out by `current()` borrowed the
        // cursor, which we now hold exclusively.
        Some(unsafe { self.list.unlink(node) })
    }
}

/// A handle to a node that does not borrow the list.
///
/// Used to walk a list while the list itself may be appended to, e.g. by callbacks invoked
/// from the values. The owner of the list must ensure nodes are not removed while handles
/// to them are in use.
pub(crate) struct NodeRef<T> {
    node: NonNull<Node<T>>,
}

impl<T> NodeRef<T> {
    /// # Safety
    ///
    /// The node must remain in the list for the lifetime `'a`.
    pub(crate) unsafe fn value<'a>(self) -> &'a T {
        // SAFETY: Forwarding guarantees from the caller.
        &unsafe { self.node.as_ref() }.value
    }

    /// # Safety
    ///
    /// The node must still be in the list.
    pub(crate) unsafe fn next(self) -> Option<Self> {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe { self.node.as_ref() }
            .next
            .get()
            .map(|node| Self { node })
    }
}

impl<T> Clone for NodeRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for NodeRef<T> {}

impl<T> PartialEq for NodeRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl<T> Eq for NodeRef<T> {}
