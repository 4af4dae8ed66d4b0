#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Single-threaded signals and subscribers backed by fixed-capacity free-list pools.
//!
//! A [`Signal`] broadcasts typed arguments to every callback connected to it. Callbacks are
//! methods of [`Subscriber`] types held in an `Rc`, or free functions. Every connection is
//! stored in a node taken from a fixed-capacity pool, so once the pools exist, connecting,
//! emitting and disconnecting perform no heap allocation.
//!
//! The connection is tracked on both sides: the signal remembers its subscribers and each
//! subscriber's embedded [`Observer`] remembers its signals. Whichever side is dropped first
//! disconnects the other, so neither ever holds a dangling reference.
//!
//! # Pools
//!
//! The memory layer can also be used on its own. Two pool flavors implement the
//! [`BlockAllocator`] trait:
//!
//! * [`PreallocatedPool`] manages a buffer chosen at runtime, allocated by its builder or
//!   supplied by the caller.
//! * [`FixedPool`] embeds a buffer whose stride and capacity are known at compile time.
//!
//! Signals and observers allocate through a [`SharedPool`] handle. Each thread has a default
//! pool for each side, which is what [`Signal::new()`] and [`Observer::new()`] use.
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! use pooled_signals::{FixedConnectionPool, Observer, SharedPool, Signal, Subscriber};
//!
//! struct Button {
//!     clicked: Signal<(u32, u32)>,
//! }
//!
//! struct ClickCounter {
//!     observer: Observer,
//!     clicks: Cell<usize>,
//! }
//!
//! impl ClickCounter {
//!     fn on_click(&self, _x: u32, _y: u32) {
//!         self.clicks.set(self.clicks.get() + 1);
//!     }
//! }
//!
//! impl Subscriber for ClickCounter {
//!     fn observer(&self) -> &Observer {
//!         &self.observer
//!     }
//! }
//!
//! // A dedicated pool with room for 8 connections.
//! let pool = SharedPool::new(FixedConnectionPool::<8>::new());
//!
//! let button = Button {
//!     clicked: Signal::with_pool(&pool),
//! };
//!
//! let counter = Rc::new(ClickCounter {
//!     observer: Observer::new(),
//!     clicks: Cell::new(0),
//! });
//!
//! button.clicked.connect(&counter, ClickCounter::on_click)?;
//! button.clicked.emit(10, 20);
//! button.clicked.emit(30, 40);
//!
//! assert_eq!(counter.clicks.get(), 2);
//! assert_eq!(pool.allocated(), 1);
//!
//! // Dropping the subscriber disconnects it.
//! drop(counter);
//! assert_eq!(button.clicked.connection_count(), 0);
//! assert!(pool.is_empty());
//! # Ok::<(), pooled_signals::Error>(())
//! ```

mod arguments;
mod block_allocator;
mod builder;
mod callable;
mod connection;
mod connection_list;
mod drop_policy;
mod duplicate_policy;
mod error;
mod fixed_pool;
mod free_list;
mod observer;
mod preallocated_pool;
mod shared_pool;
mod signal;
mod signal_builder;

pub use arguments::*;
pub use block_allocator::*;
pub use builder::*;
pub(crate) use callable::*;
pub use connection_list::{ConnectionList, ConnectionListIter, CursorMut};
pub use drop_policy::*;
pub use duplicate_policy::*;
pub use error::Error;
pub(crate) use error::Result;
pub use fixed_pool::*;
pub use free_list::{MIN_STRIDE, init_free_list};
pub use observer::*;
pub use preallocated_pool::PreallocatedPool;
pub use shared_pool::*;
pub use signal::Signal;
pub(crate) use signal::SignalCore;
pub use signal_builder::*;

trait Sealed {}
