use std::cell::Cell;
use std::fmt;
use std::ptr::NonNull;
use std::rc::Weak;

use crate::{Callable, Observer, SignalCore};

/// The signal-side record of one connection.
pub(crate) struct Connection {
    pub(crate) callable: Callable,

    /// Identifies the observer for matching only. Never dereferenced, as the observer may be
    /// destroyed or moved without the signal hearing about it first.
    pub(crate) observer: Option<NonNull<Observer>>,

    /// Set when the connection is removed while the signal is emitting. Such connections are
    /// skipped and swept away once the outermost emission completes.
    disconnected: Cell<bool>,
}

impl Connection {
    pub(crate) fn new(callable: Callable, observer: Option<&Observer>) -> Self {
        debug_assert_eq!(
            callable.is_method(),
            observer.is_some(),
            "methods are connected together with their observer, free functions without one"
        );

        Self {
            callable,
            observer: observer.map(NonNull::from),
            disconnected: Cell::new(false),
        }
    }

    pub(crate) fn is_disconnected(&self) -> bool {
        self.disconnected.get()
    }

    pub(crate) fn mark_disconnected(&self) {
        self.disconnected.set(true);
    }

    pub(crate) fn has_observer(&self, observer: NonNull<Observer>) -> bool {
        self.observer == Some(observer)
    }

    /// Tells the subscriber that the signal dropped this connection, so it forgets one back link.
    ///
    /// Does nothing for free functions and for subscribers that are already being destroyed.
    pub(crate) fn notify_disconnect(&self, signal: *const SignalCore) {
        if let Some(subscriber) = self.callable.subscriber() {
            subscriber.observer().on_signal_disconnect(signal);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("callable", &self.callable)
            .field("observer", &self.observer)
            .field("disconnected", &self.disconnected.get())
            .finish()
    }
}

/// The observer-side record of one connection: a back link to the signal.
#[derive(Debug)]
pub(crate) struct SignalLink {
    pub(crate) signal: Weak<SignalCore>,
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{Signal, Subscriber};

    struct Listener {
        observer: Observer,
    }

    impl Listener {
        fn on_event(&self) {}
    }

    impl Subscriber for Listener {
        fn observer(&self) -> &Observer {
            &self.observer
        }
    }

    #[test]
    fn marks_and_matches() {
        let listener = Rc::new(Listener {
            observer: Observer::new(),
        });

        let connection = Connection::new(
            Callable::for_method::<(), _>(&listener, Listener::on_event),
            Some(listener.observer()),
        );

        assert!(!connection.is_disconnected());
        connection.mark_disconnected();
        assert!(connection.is_disconnected());

        assert!(connection.has_observer(NonNull::from(listener.observer())));

        let other = Observer::new();
        assert!(!connection.has_observer(NonNull::from(&other)));
    }

    #[test]
    fn notify_removes_one_back_link() {
        let signal = Signal::<()>::new();
        let listener = Rc::new(Listener {
            observer: Observer::new(),
        });

        signal.connect(&listener, Listener::on_event).unwrap();
        signal.connect(&listener, Listener::on_event).unwrap();
        assert_eq!(listener.observer().signal_count(), 2);

        let connection = Connection::new(
            Callable::for_method::<(), _>(&listener, Listener::on_event),
            Some(listener.observer()),
        );

        connection.notify_disconnect(signal.core_ptr());
        assert_eq!(listener.observer().signal_count(), 1);
    }
}
