use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;

use crate::{Arguments, DuplicatePolicy, SharedPool, Signal};

/// Builder for creating an instance of [`Signal`].
///
/// You only need to use this builder if you want to customize the signal configuration.
/// [`Signal::new()`] uses the current thread's default connection pool and allows duplicate
/// connections.
///
/// # Examples
///
/// ```
/// use pooled_signals::{DuplicatePolicy, SharedPool, Signal};
///
/// let pool = SharedPool::for_connections(32);
///
/// let signal = Signal::<(u64, bool)>::builder()
///     .pool(&pool)
///     .duplicate_policy(DuplicatePolicy::Panic)
///     .build();
/// ```
#[must_use]
pub struct SignalBuilder<A> {
    pool: Option<SharedPool>,
    duplicate_policy: DuplicatePolicy,

    _args: PhantomData<fn(A)>,
}

impl<A> fmt::Debug for SignalBuilder<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalBuilder")
            .field("arguments", &format_args!("{}", type_name::<A>()))
            .field("pool", &self.pool)
            .field("duplicate_policy", &self.duplicate_policy)
            .finish()
    }
}

impl<A: Arguments> SignalBuilder<A> {
    pub(crate) fn new() -> Self {
        Self {
            pool: None,
            duplicate_policy: DuplicatePolicy::default(),
            _args: PhantomData,
        }
    }

    /// Sets the pool the signal allocates its connections from.
    pub fn pool(mut self, pool: &SharedPool) -> Self {
        self.pool = Some(pool.clone());
        self
    }

    /// Sets the [duplicate policy][DuplicatePolicy] of the signal. This governs what happens
    /// when a callback that is already connected is connected again.
    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Builds the signal with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if the blocks of the pool are too small to hold a connection.
    #[must_use]
    pub fn build(self) -> Signal<A> {
        let pool = self
            .pool
            .unwrap_or_else(SharedPool::default_for_connections);

        Signal::new_inner(&pool, self.duplicate_policy)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn uses_default_pool_when_unset() {
        let default = SharedPool::default_for_connections();
        let before = default.allocated();

        let signal = Signal::<(u8,)>::builder().build();
        signal.connect_fn(|_| {}).unwrap();

        assert_eq!(default.allocated(), before + 1);
    }

    #[test]
    fn uses_configured_pool() {
        let pool = SharedPool::for_connections(1);

        let signal = Signal::<()>::builder().pool(&pool).build();
        signal.connect_fn(|| {}).unwrap();

        assert!(pool.is_full());
    }

    #[test]
    #[should_panic]
    fn rejects_pool_with_small_blocks() {
        let pool = SharedPool::new(crate::FixedPool::<8, 4>::new());

        _ = Signal::<()>::builder().pool(&pool).build();
    }
}
