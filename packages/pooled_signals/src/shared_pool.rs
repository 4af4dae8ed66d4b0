use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;
use std::thread::LocalKey;

use crate::connection::{Connection, SignalLink};
use crate::connection_list::Node;
use crate::{BlockAllocator, FixedPool, PreallocatedPool};

/// The number of blocks in the per-thread default pools.
pub const DEFAULT_POOL_CAPACITY: usize = 1024;

/// The block size required to store one signal-side connection.
pub const CONNECTION_BLOCK_SIZE: usize = size_of::<Node<Connection>>();

/// The block alignment required to store one signal-side connection.
pub const CONNECTION_BLOCK_ALIGN: usize = align_of::<Node<Connection>>();

/// The block size required to store one observer-side back link.
pub const OBSERVER_BLOCK_SIZE: usize = size_of::<Node<SignalLink>>();

/// The block alignment required to store one observer-side back link.
pub const OBSERVER_BLOCK_ALIGN: usize = align_of::<Node<SignalLink>>();

/// A [`FixedPool`] dimensioned for `CAPACITY` signal-side connections.
pub type FixedConnectionPool<const CAPACITY: usize> = FixedPool<CONNECTION_BLOCK_SIZE, CAPACITY>;

/// A [`FixedPool`] dimensioned for `CAPACITY` observer-side back links.
pub type FixedObserverPool<const CAPACITY: usize> = FixedPool<OBSERVER_BLOCK_SIZE, CAPACITY>;

thread_local! {
    static DEFAULT_CONNECTION_POOL: RefCell<Option<SharedPool>> = const { RefCell::new(None) };
    static DEFAULT_OBSERVER_POOL: RefCell<Option<SharedPool>> = const { RefCell::new(None) };
}

/// A shared handle to a block allocator, used by signals and observers to allocate their
/// connection nodes.
///
/// Cloning the handle is cheap and yields another handle to the same pool. The pool lives as
/// long as the last handle, so it always outlives every signal and observer that allocates
/// from it.
///
/// Each thread has two lazily created default pools of [`DEFAULT_POOL_CAPACITY`] blocks, one for
/// signals and one for observers, used by [`Signal::new()`][1] and [`Observer::new()`][2].
///
/// # Examples
///
/// ```
/// use pooled_signals::{FixedConnectionPool, SharedPool, Signal};
///
/// let pool = SharedPool::new(FixedConnectionPool::<16>::new());
///
/// let first = Signal::<(i32,)>::with_pool(&pool);
/// let second = Signal::<()>::with_pool(&pool);
///
/// assert_eq!(pool.capacity(), 16);
/// ```
///
/// [1]: crate::Signal::new
/// [2]: crate::Observer::new
#[derive(Clone)]
pub struct SharedPool {
    inner: Rc<dyn BlockAllocator>,
}

impl SharedPool {
    /// Wraps a block allocator into a shared handle.
    #[must_use]
    pub fn new(pool: impl BlockAllocator + 'static) -> Self {
        Self {
            inner: Rc::new(pool),
        }
    }

    /// Creates a heap-buffered pool with blocks sized for `capacity` signal-side connections.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn for_connections(capacity: usize) -> Self {
        Self::new(
            PreallocatedPool::builder()
                .capacity(capacity)
                .block_layout_of::<Node<Connection>>()
                .build(),
        )
    }

    /// Creates a heap-buffered pool with blocks sized for `capacity` observer-side back links.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn for_observers(capacity: usize) -> Self {
        Self::new(
            PreallocatedPool::builder()
                .capacity(capacity)
                .block_layout_of::<Node<SignalLink>>()
                .build(),
        )
    }

    /// Returns the current thread's default pool for signal-side connections, creating it
    /// on first use.
    #[must_use]
    pub fn default_for_connections() -> Self {
        current_default(&DEFAULT_CONNECTION_POOL, || {
            Self::for_connections(DEFAULT_POOL_CAPACITY)
        })
    }

    /// Returns the current thread's default pool for observer-side back links, creating it
    /// on first use.
    #[must_use]
    pub fn default_for_observers() -> Self {
        current_default(&DEFAULT_OBSERVER_POOL, || {
            Self::for_observers(DEFAULT_POOL_CAPACITY)
        })
    }

    /// Replaces the current thread's default pool for signal-side connections.
    ///
    /// Signals created before the call keep using the pool they were created with.
    pub fn set_default_for_connections(pool: Self) {
        DEFAULT_CONNECTION_POOL.with_borrow_mut(|slot| *slot = Some(pool));
    }

    /// Replaces the current thread's default pool for observer-side back links.
    ///
    /// Observers created before the call keep using the pool they were created with.
    pub fn set_default_for_observers(pool: Self) {
        DEFAULT_OBSERVER_POOL.with_borrow_mut(|slot| *slot = Some(pool));
    }

    /// Whether two handles refer to the same pool.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }
}

fn current_default(
    key: &'static LocalKey<RefCell<Option<SharedPool>>>,
    create: fn() -> SharedPool,
) -> SharedPool {
    key.with_borrow_mut(|slot| slot.get_or_insert_with(create).clone())
}

impl Deref for SharedPool {
    type Target = dyn BlockAllocator;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl fmt::Debug for SharedPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedPool")
            .field("capacity", &self.inner.capacity())
            .field("stride", &self.inner.stride())
            .field("allocated", &self.inner.allocated())
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::thread;

    use static_assertions::assert_not_impl_any;

    use super::*;
    use crate::{FixedConnectionPool, Signal};

    fn tick() {}

    assert_not_impl_any!(SharedPool: Send, Sync);

    #[test]
    fn default_is_reused_within_thread() {
        let a = SharedPool::default_for_connections();
        let b = SharedPool::default_for_connections();

        assert!(SharedPool::ptr_eq(&a, &b));
        assert_eq!(a.capacity(), DEFAULT_POOL_CAPACITY);

        let observers = SharedPool::default_for_observers();
        assert!(!SharedPool::ptr_eq(&a, &observers));
    }

    #[test]
    fn default_can_be_replaced() {
        // Runs on its own thread so the replaced default does not leak into other tests.
        thread::spawn(|| {
            let custom = SharedPool::for_connections(3);
            SharedPool::set_default_for_connections(custom.clone());

            assert!(SharedPool::ptr_eq(
                &SharedPool::default_for_connections(),
                &custom
            ));

            let custom = SharedPool::for_observers(5);
            SharedPool::set_default_for_observers(custom.clone());

            assert!(SharedPool::ptr_eq(&SharedPool::default_for_observers(), &custom));
        })
        .join()
        .unwrap();
    }

    #[test]
    fn defaults_are_per_thread() {
        let main_pool = SharedPool::default_for_connections();
        let block = main_pool.alloc().unwrap();

        thread::spawn(|| {
            assert!(SharedPool::default_for_connections().is_empty());
        })
        .join()
        .unwrap();

        // SAFETY: The block was allocated from this pool and is not used afterwards.
        unsafe { main_pool.free(block) };
    }

    #[test]
    fn typed_pools_fit_nodes() {
        let connections = FixedConnectionPool::<4>::new();
        assert!(connections.stride() >= CONNECTION_BLOCK_SIZE);
        assert!(connections.alignment() >= CONNECTION_BLOCK_ALIGN);

        let observers = FixedObserverPool::<4>::new();
        assert!(observers.stride() >= OBSERVER_BLOCK_SIZE);
        assert!(observers.alignment() >= OBSERVER_BLOCK_ALIGN);
    }

    #[test]
    fn clones_share_state() {
        let a = SharedPool::for_connections(2);
        let b = a.clone();

        let block = a.alloc().unwrap();
        assert_eq!(b.allocated(), 1);

        // SAFETY: The block was allocated from this pool and is not used afterwards.
        unsafe { b.free(block) };
        assert!(a.is_empty());
    }

    #[test]
    fn blocks_shared_with_signals_are_never_handed_out_twice() {
        let pool = SharedPool::new(FixedConnectionPool::<4>::new());
        let signal = Signal::<()>::with_pool(&pool);

        signal.connect_fn(tick).unwrap();

        let block = pool.alloc().unwrap();

        // SAFETY: The block was allocated from this pool and is not used afterwards.
        unsafe { pool.free(block) };

        let x = pool.alloc().unwrap();
        let y = pool.alloc().unwrap();

        assert_ne!(x, y);
        assert_eq!(pool.allocated(), 3);
        assert_eq!(pool.allocated() + pool.free_list_len(), pool.capacity());

        // SAFETY: The blocks were allocated from this pool and are not used afterwards.
        unsafe {
            pool.free(x);
            pool.free(y);
        }

        signal.emit();
        assert_eq!(signal.connection_count(), 1);
    }

    #[cfg(feature = "free_list_check")]
    #[test]
    #[should_panic]
    fn double_free_through_shared_pool_panics_when_checked() {
        let pool = SharedPool::new(FixedConnectionPool::<4>::new());
        let signal = Signal::<()>::with_pool(&pool);

        signal.connect_fn(tick).unwrap();

        let block = pool.alloc().unwrap();

        // SAFETY: The block was allocated from this pool. The second free breaks the contract
        // but the diagnostic check rejects it before the free list is modified.
        unsafe {
            pool.free(block);
            pool.free(block);
        }
    }
}
