/// Determines what happens when the same callback is connected to a signal more than once.
///
/// A callback is the same if it is the same method on the same subscriber, or the same free
/// function. Functions are compared by address, see
/// [`Signal::is_connected_fn()`][crate::Signal::is_connected_fn] for the caveats.
///
/// # Examples
///
/// ```
/// use pooled_signals::{DuplicatePolicy, Signal};
///
/// let signal = Signal::<(u32,)>::builder()
///     .duplicate_policy(DuplicatePolicy::Panic)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DuplicatePolicy {
    /// Duplicate connections are accepted and the callback is invoked once per connection.
    /// This is the default.
    #[default]
    Allow,

    /// Connecting a callback that is already connected panics.
    ///
    /// Checking for duplicates makes every connect operation O(n) in the number of connections.
    Panic,
}
