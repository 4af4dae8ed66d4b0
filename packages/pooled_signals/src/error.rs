use thiserror::Error;

/// Errors that can occur when registering connections.
///
/// Contract violations (freeing a foreign block, dropping a pool that must be empty and so on)
/// are not represented here. Those are programming errors and result in a panic.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A pool had no vacant blocks left to satisfy an allocation.
    ///
    /// Pools never grow, so this means the pool was dimensioned too small for the number of
    /// simultaneous connections the application creates.
    #[error("pool with capacity of {capacity} blocks is exhausted")]
    PoolExhausted {
        /// The total number of blocks in the exhausted pool.
        capacity: usize,
    },
}

/// A specialized `Result` type for connection operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
