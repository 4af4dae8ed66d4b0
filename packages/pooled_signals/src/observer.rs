use std::cell::RefCell;
use std::fmt;
use std::ptr::{self, NonNull};
use std::rc::Weak;

use tracing::trace;

use crate::connection::SignalLink;
use crate::{ConnectionList, Result, SharedPool, SignalCore};

/// A type whose methods can be connected to a [`Signal`][crate::Signal].
///
/// Subscribers are stored in an `Rc` and embed an [`Observer`], which remembers every signal the
/// subscriber is connected to. When the subscriber is dropped, the observer disconnects it from
/// all of those signals, so a signal never invokes a destroyed subscriber.
///
/// # Examples
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// use pooled_signals::{Observer, Signal, Subscriber};
///
/// struct Thermometer {
///     observer: Observer,
///     last_reading: Cell<f32>,
/// }
///
/// impl Thermometer {
///     fn on_reading(&self, celsius: f32) {
///         self.last_reading.set(celsius);
///     }
/// }
///
/// impl Subscriber for Thermometer {
///     fn observer(&self) -> &Observer {
///         &self.observer
///     }
/// }
///
/// let readings = Signal::<(f32,)>::new();
/// let thermometer = Rc::new(Thermometer {
///     observer: Observer::new(),
///     last_reading: Cell::new(0.0),
/// });
///
/// readings.connect(&thermometer, Thermometer::on_reading).unwrap();
/// readings.emit(21.5);
/// assert_eq!(thermometer.last_reading.get(), 21.5);
///
/// drop(thermometer);
/// assert_eq!(readings.connection_count(), 0);
/// ```
pub trait Subscriber {
    /// The observer embedded in this subscriber.
    ///
    /// Must return the same observer every time it is called on the same value.
    fn observer(&self) -> &Observer;
}

/// The subscriber-side half of the connection protocol, embedded in every [`Subscriber`].
///
/// Holds one back link per connection, allocated from an observer pool. Dropping the observer
/// silently removes every connection of its subscriber from every signal it is connected to.
pub struct Observer {
    signals: RefCell<ConnectionList<SignalLink>>,
}

impl Observer {
    /// Creates an observer that allocates its back links from the current thread's default
    /// observer pool.
    #[must_use]
    pub fn new() -> Self {
        Self::with_pool(&SharedPool::default_for_observers())
    }

    /// Creates an observer that allocates its back links from `pool`.
    ///
    /// # Panics
    ///
    /// Panics if the blocks of the pool are too small to hold a back link. Pools created via
    /// [`SharedPool::for_observers()`] or sized by [`OBSERVER_BLOCK_SIZE`][1] always fit.
    ///
    /// [1]: crate::OBSERVER_BLOCK_SIZE
    #[must_use]
    pub fn with_pool(pool: &SharedPool) -> Self {
        Self {
            signals: RefCell::new(ConnectionList::new(pool)),
        }
    }

    /// The number of connections the subscriber currently has, across all signals.
    #[must_use]
    pub fn signal_count(&self) -> usize {
        self.signals.borrow().len()
    }

    /// Disconnects the subscriber from every signal without destroying it.
    ///
    /// Signals are not notified back, as the observer already forgot them.
    pub fn disconnect_all(&self) {
        let this = NonNull::from(self);

        // Each link is popped under a short borrow that ends before the signal is called.
        while let Some(link) = self.pop_link() {
            if let Some(signal) = link.signal.upgrade() {
                signal.on_observer_disconnect(this);
            }
        }

        trace!(observer = ?this, "observer disconnected from all signals");
    }

    fn pop_link(&self) -> Option<SignalLink> {
        self.signals.borrow_mut().pop_front()
    }

    /// Records a new connection from `signal`.
    pub(crate) fn on_signal_connect(&self, signal: Weak<SignalCore>) -> Result<()> {
        self.signals.borrow_mut().push_back(SignalLink { signal })
    }

    /// Forgets one connection from `signal`, which has already removed it on its side.
    pub(crate) fn on_signal_disconnect(&self, signal: *const SignalCore) {
        let mut signals = self.signals.borrow_mut();
        let mut cursor = signals.cursor_front_mut();

        while let Some(link) = cursor.current() {
            if ptr::eq(link.signal.as_ptr(), signal) {
                drop(cursor.remove_current());
                return;
            }

            cursor.move_next();
        }
    }
}

impl Default for Observer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("signal_count", &self.signal_count())
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::rc::Rc;

    use static_assertions::assert_not_impl_any;

    use super::*;
    use crate::{FixedObserverPool, Signal};

    assert_not_impl_any!(Observer: Send, Sync);

    struct Listener {
        observer: Observer,
    }

    impl Listener {
        fn with_observer(observer: Observer) -> Rc<Self> {
            Rc::new(Self { observer })
        }

        fn on_event(&self) {}
        fn on_other_event(&self) {}
    }

    impl Subscriber for Listener {
        fn observer(&self) -> &Observer {
            &self.observer
        }
    }

    #[test]
    fn counts_connections_across_signals() {
        let a = Signal::<()>::new();
        let b = Signal::<()>::new();
        let listener = Listener::with_observer(Observer::new());

        a.connect(&listener, Listener::on_event).unwrap();
        a.connect(&listener, Listener::on_other_event).unwrap();
        b.connect(&listener, Listener::on_event).unwrap();

        assert_eq!(listener.observer().signal_count(), 3);

        a.disconnect(&*listener);
        assert_eq!(listener.observer().signal_count(), 1);

        drop(b);
        assert_eq!(listener.observer().signal_count(), 0);
    }

    #[test]
    fn disconnect_all_leaves_subscriber_alive() {
        let a = Signal::<()>::new();
        let b = Signal::<()>::new();
        let listener = Listener::with_observer(Observer::new());

        a.connect(&listener, Listener::on_event).unwrap();
        b.connect(&listener, Listener::on_event).unwrap();

        listener.observer().disconnect_all();

        assert_eq!(listener.observer().signal_count(), 0);
        assert_eq!(a.connection_count(), 0);
        assert_eq!(b.connection_count(), 0);

        // Can connect again afterwards.
        a.connect(&listener, Listener::on_event).unwrap();
        assert_eq!(a.connection_count(), 1);
    }

    #[test]
    fn dedicated_pool_is_used() {
        let pool = SharedPool::new(FixedObserverPool::<2>::new());
        let signal = Signal::<()>::new();
        let listener = Listener::with_observer(Observer::with_pool(&pool));

        signal.connect(&listener, Listener::on_event).unwrap();
        assert_eq!(pool.allocated(), 1);

        drop(listener);
        assert!(pool.is_empty());
    }

    #[test]
    fn observer_survives_dropped_signal() {
        let listener = Listener::with_observer(Observer::new());

        {
            let signal = Signal::<()>::new();
            signal.connect(&listener, Listener::on_event).unwrap();
        }

        assert_eq!(listener.observer().signal_count(), 0);
    }

    #[test]
    #[should_panic]
    fn pool_with_small_blocks_is_rejected() {
        let pool = SharedPool::new(crate::FixedPool::<8, 4>::new());

        _ = Observer::with_pool(&pool);
    }
}
