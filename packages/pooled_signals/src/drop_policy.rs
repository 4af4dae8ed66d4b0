/// Determines what happens when a pool is dropped while some of its blocks are still allocated.
///
/// Dropping a pool releases its buffer, so any outstanding block pointers are invalidated.
/// By default this is treated as the caller's problem and the pool is dropped silently.
///
/// # Examples
///
/// ```
/// use pooled_signals::{DropPolicy, PreallocatedPool};
///
/// // The drop policy is set at pool creation time.
/// let pool = PreallocatedPool::builder()
///     .capacity(16)
///     .drop_policy(DropPolicy::MustBeEmpty)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The pool may be dropped with blocks still allocated. This is the default.
    #[default]
    MayDropAllocated,

    /// The pool will panic if any block is still allocated when it is dropped.
    ///
    /// This may be valuable when blocks are referenced from unsafe code and it is known that
    /// every block must have been returned before the pool goes away.
    MustBeEmpty,
}
