use std::any::type_name;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::connection::Connection;
use crate::connection_list::NodeRef;
use crate::{
    Arguments, Callable, ConnectionList, DuplicatePolicy, Observer, Result, SharedPool,
    SignalBuilder, Subscriber,
};

/// A typed broadcast point that invokes every connected callback when emitted.
///
/// `A` is the tuple of arguments the signal is emitted with, of up to eight elements. Callbacks
/// are either methods of a [`Subscriber`] held in an `Rc`, or free functions. They are invoked
/// in the order they were connected.
///
/// Connections are stored in nodes allocated from a [`SharedPool`], so connecting, emitting and
/// disconnecting never touch the global allocator once the pools exist.
///
/// The connection is tracked on both sides. Dropping the signal disconnects every subscriber
/// and dropping a subscriber disconnects it from every signal, so neither side ever holds a
/// dangling reference to the other.
///
/// # Reentrancy
///
/// Callbacks may connect, disconnect, emit the same signal again or drop subscribers:
///
/// * A connection removed during an emission is never invoked again, including later in the
///   same emission. Its node is returned to the pool when the outermost emission completes.
/// * A connection created during an emission is first invoked by the next emission.
///
/// # Examples
///
/// ```
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// use pooled_signals::{Observer, Signal, Subscriber};
///
/// struct Log {
///     observer: Observer,
///     lines: RefCell<Vec<String>>,
/// }
///
/// impl Log {
///     fn on_message(&self, level: u8, message: &'static str) {
///         self.lines.borrow_mut().push(format!("[{level}] {message}"));
///     }
/// }
///
/// impl Subscriber for Log {
///     fn observer(&self) -> &Observer {
///         &self.observer
///     }
/// }
///
/// let messages = Signal::<(u8, &'static str)>::new();
/// let log = Rc::new(Log {
///     observer: Observer::new(),
///     lines: RefCell::new(Vec::new()),
/// });
///
/// messages.connect(&log, Log::on_message).unwrap();
/// messages.emit(1, "hello");
///
/// messages.disconnect(&*log);
/// messages.emit(2, "nobody is listening");
///
/// assert_eq!(*log.lines.borrow(), ["[1] hello"]);
/// ```
pub struct Signal<A> {
    core: Rc<SignalCore>,

    _args: PhantomData<fn(A)>,
}

impl<A: Arguments> Signal<A> {
    /// Creates a signal that allocates its connections from the current thread's default
    /// connection pool.
    #[must_use]
    pub fn new() -> Self {
        Self::with_pool(&SharedPool::default_for_connections())
    }

    /// Creates a signal that allocates its connections from `pool`.
    ///
    /// # Panics
    ///
    /// Panics if the blocks of the pool are too small to hold a connection. Pools created via
    /// [`SharedPool::for_connections()`] or sized by [`CONNECTION_BLOCK_SIZE`][1] always fit.
    ///
    /// [1]: crate::CONNECTION_BLOCK_SIZE
    #[must_use]
    pub fn with_pool(pool: &SharedPool) -> Self {
        Self::builder().pool(pool).build()
    }

    /// Creates a builder for configuring and creating a signal.
    pub fn builder() -> SignalBuilder<A> {
        SignalBuilder::new()
    }

    pub(crate) fn new_inner(pool: &SharedPool, duplicate_policy: DuplicatePolicy) -> Self {
        Self {
            core: Rc::new(SignalCore::new(pool, duplicate_policy)),
            _args: PhantomData,
        }
    }

    /// Connects a method of a subscriber.
    ///
    /// The signal holds only a weak reference to the subscriber. The connection lasts until it
    /// is disconnected explicitly or either the signal or the subscriber is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`][1] if either the connection pool of the signal or the
    /// observer pool of the subscriber has no vacant blocks. Nothing is connected in that case.
    ///
    /// # Panics
    ///
    /// Panics if the method is already connected for this subscriber and the signal was built
    /// with [`DuplicatePolicy::Panic`].
    ///
    /// [1]: crate::Error::PoolExhausted
    pub fn connect<T: Subscriber + 'static>(
        &self,
        subscriber: &Rc<T>,
        method: A::Method<T>,
    ) -> Result<()> {
        let callable = Callable::for_method::<A, T>(subscriber, method);

        self.core.add(callable, Some(subscriber.observer()))?;

        trace!(
            signal = ?self.core_ptr(),
            subscriber = ?Rc::as_ptr(subscriber),
            subscriber_type = type_name::<T>(),
            "connected subscriber"
        );

        Ok(())
    }

    /// Connects a method of a subscriber if there is one. Does nothing for `None`.
    ///
    /// # Errors
    ///
    /// See [`connect()`][Self::connect].
    pub fn connect_opt<T: Subscriber + 'static>(
        &self,
        subscriber: Option<&Rc<T>>,
        method: A::Method<T>,
    ) -> Result<()> {
        match subscriber {
            Some(subscriber) => self.connect(subscriber, method),
            None => Ok(()),
        }
    }

    /// Connects a method of a subscriber that is referenced weakly. Does nothing if the
    /// subscriber has already been dropped.
    ///
    /// # Errors
    ///
    /// See [`connect()`][Self::connect].
    pub fn connect_weak<T: Subscriber + 'static>(
        &self,
        subscriber: &Weak<T>,
        method: A::Method<T>,
    ) -> Result<()> {
        match subscriber.upgrade() {
            Some(subscriber) => self.connect(&subscriber, method),
            None => Ok(()),
        }
    }

    /// Connects a free function.
    ///
    /// Free functions have no subscriber, so the connection lasts until it is disconnected
    /// explicitly or the signal is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`][1] if the connection pool of the signal has no
    /// vacant blocks.
    ///
    /// # Panics
    ///
    /// Panics if the function is already connected and the signal was built with
    /// [`DuplicatePolicy::Panic`].
    ///
    /// [1]: crate::Error::PoolExhausted
    pub fn connect_fn(&self, function: A::Function) -> Result<()> {
        self.core.add(Callable::for_function::<A>(function), None)?;

        trace!(signal = ?self.core_ptr(), "connected function");

        Ok(())
    }

    /// Whether the method is connected for this subscriber.
    ///
    /// Methods are identified by address, with the same caveats as
    /// [`is_connected_fn()`][Self::is_connected_fn].
    #[must_use]
    pub fn is_connected<T: Subscriber + 'static>(
        &self,
        subscriber: &Rc<T>,
        method: A::Method<T>,
    ) -> bool {
        self.core.is_connected(
            Rc::as_ptr(subscriber).cast(),
            A::method_address::<T>(method),
        )
    }

    /// Whether the free function is connected.
    ///
    /// Functions are identified by address. Rust does not guarantee that addresses are unique:
    /// the compiler may merge two functions with identical bodies into one, and a generic
    /// function may have a different address in each codegen unit. Such functions may then
    /// match each other, or fail to match themselves.
    #[must_use]
    pub fn is_connected_fn(&self, function: A::Function) -> bool {
        self.core
            .is_connected(ptr::null(), A::function_address(function))
    }

    /// The number of active connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.core.connection_count()
    }

    /// Invokes every connected callback with a clone of `args`, in connection order.
    ///
    /// Prefer the per-arity [`emit()`][Self::emit] methods, which take the arguments directly.
    pub fn emit_args(&self, args: A)
    where
        A: Clone,
    {
        self.core.emit(args);
    }

    /// Disconnects every method of the subscriber. Does nothing if it is not connected.
    pub fn disconnect<T: Subscriber + ?Sized>(&self, subscriber: &T) {
        let observer = NonNull::from(subscriber.observer());

        let removed = self
            .core
            .remove_matching(|connection| connection.has_observer(observer), true);

        trace!(signal = ?self.core_ptr(), ?observer, removed, "disconnected subscriber");
    }

    /// Disconnects every method of the subscriber if there is one. Does nothing for `None`.
    pub fn disconnect_opt<T: Subscriber + ?Sized>(&self, subscriber: Option<&T>) {
        if let Some(subscriber) = subscriber {
            self.disconnect(subscriber);
        }
    }

    /// Disconnects every connection of the free function. Does nothing if it is not connected.
    ///
    /// Functions are identified by address. Rust does not guarantee that addresses are unique:
    /// the compiler may merge two functions with identical bodies into one, and a generic
    /// function may have a different address in each codegen unit. Such functions may then
    /// match each other, or fail to match themselves.
    pub fn disconnect_fn(&self, function: A::Function) {
        let function = A::function_address(function);

        let removed = self.core.remove_matching(
            |connection| {
                if !connection.callable.matches(ptr::null(), function) {
                    return false;
                }

                assert!(
                    connection.observer.is_none(),
                    "free function connection of signal {:?} has an observer",
                    self.core_ptr()
                );

                true
            },
            true,
        );

        trace!(signal = ?self.core_ptr(), removed, "disconnected function");
    }

    /// Disconnects every callback, notifying each subscriber.
    pub fn disconnect_all(&self) {
        self.core.disconnect_all();
    }

    pub(crate) fn core_ptr(&self) -> *const SignalCore {
        Rc::as_ptr(&self.core)
    }
}

macro_rules! impl_emit {
    ($($ty:ident $arg:ident),*) => {
        impl<$($ty: Clone),*> Signal<($($ty,)*)> {
            /// Invokes every connected callback with the arguments, in connection order.
            ///
            /// Each callback receives its own clone of the arguments.
            pub fn emit(&self $(, $arg: $ty)*) {
                self.emit_args(($($arg,)*));
            }
        }
    };
}

impl_emit!();
impl_emit!(A1 a1);
impl_emit!(A1 a1, A2 a2);
impl_emit!(A1 a1, A2 a2, A3 a3);
impl_emit!(A1 a1, A2 a2, A3 a3, A4 a4);
impl_emit!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5);
impl_emit!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6);
impl_emit!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7);
impl_emit!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7, A8 a8);

impl<A: Arguments> Default for Signal<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Drop for Signal<A> {
    fn drop(&mut self) {
        self.core.disconnect_all();

        trace!(signal = ?Rc::as_ptr(&self.core), "signal dropped");
    }
}

impl<A> fmt::Debug for Signal<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("arguments", &format_args!("{}", type_name::<A>()))
            .field("connection_count", &self.core.connection_count())
            .finish()
    }
}

/// The non-generic state of a signal, shared with the back links held by observers.
pub(crate) struct SignalCore {
    connections: RefCell<ConnectionList<Connection>>,

    /// Number of emissions in progress. Greater than one when a callback emits again.
    emit_depth: Cell<usize>,

    /// Number of connections marked as disconnected but not yet removed from the list.
    pending_removals: Cell<usize>,

    duplicate_policy: DuplicatePolicy,
}

impl SignalCore {
    fn new(pool: &SharedPool, duplicate_policy: DuplicatePolicy) -> Self {
        Self {
            connections: RefCell::new(ConnectionList::new(pool)),
            emit_depth: Cell::new(0),
            pending_removals: Cell::new(0),
            duplicate_policy,
        }
    }

    /// Registers a connection on both sides. If the observer side fails, the signal side is
    /// rolled back so that nothing remains connected.
    fn add(self: &Rc<Self>, callable: Callable, observer: Option<&Observer>) -> Result<()> {
        if self.duplicate_policy == DuplicatePolicy::Panic {
            assert!(
                !self.contains(&callable),
                "{callable:?} is already connected to a signal whose policy forbids duplicate connections"
            );
        }

        self.connections
            .borrow_mut()
            .push_back(Connection::new(callable, observer))?;

        if let Some(observer) = observer {
            if let Err(error) = observer.on_signal_connect(Rc::downgrade(self)) {
                // We just appended it, so it is the last one. Any emission in progress never
                // looks past the node that was last when it started, so removing it is safe.
                drop(self.connections.borrow_mut().pop_back());
                return Err(error);
            }
        }

        Ok(())
    }

    fn contains(&self, callable: &Callable) -> bool {
        self.connections
            .borrow()
            .iter()
            .any(|connection| !connection.is_disconnected() && connection.callable == *callable)
    }

    fn is_connected(&self, receiver: *const (), function: *const ()) -> bool {
        self.connections.borrow().iter().any(|connection| {
            !connection.is_disconnected() && connection.callable.matches(receiver, function)
        })
    }

    fn connection_count(&self) -> usize {
        self.connections
            .borrow()
            .len()
            .checked_sub(self.pending_removals.get())
            .expect("more pending removals than connections")
    }

    /// Removes every connection for which `matches` returns `true`, optionally telling each
    /// affected subscriber to forget its back link. Returns the number of removed connections.
    fn remove_matching(&self, matches: impl Fn(&Connection) -> bool, notify: bool) -> usize {
        let this: *const Self = self;
        let mut removed = 0_usize;

        if self.emit_depth.get() > 0 {
            // The emission holds references to the nodes, so we only mark them for now.
            let connections = self.connections.borrow();

            for connection in connections
                .iter()
                .filter(|connection| !connection.is_disconnected() && matches(connection))
            {
                connection.mark_disconnected();

                if notify {
                    connection.notify_disconnect(this);
                }

                removed = removed.checked_add(1).expect("guarded by pool capacity");
            }

            self.pending_removals.set(
                self.pending_removals
                    .get()
                    .checked_add(removed)
                    .expect("guarded by pool capacity"),
            );
        } else {
            let mut connections = self.connections.borrow_mut();
            let mut cursor = connections.cursor_front_mut();

            while let Some(connection) = cursor.current() {
                if !matches(connection) {
                    cursor.move_next();
                    continue;
                }

                let connection = cursor
                    .remove_current()
                    .expect("cursor pointed at a connection just now");

                if notify {
                    connection.notify_disconnect(this);
                }

                removed = removed.checked_add(1).expect("guarded by pool capacity");
            }
        }

        removed
    }

    fn disconnect_all(&self) {
        let removed = self.remove_matching(|_| true, true);

        trace!(signal = ?ptr::from_ref(self), removed, "disconnected all");
    }

    /// Silently removes every connection of an observer that is disconnecting on its own.
    pub(crate) fn on_observer_disconnect(&self, observer: NonNull<Observer>) {
        self.remove_matching(|connection| connection.has_observer(observer), false);
    }

    fn emit<A: Arguments + Clone>(&self, args: A) {
        // Connections appended from now on lie beyond `last` and are not part of this emission.
        let Some((first, last)) = self.emission_range() else {
            return;
        };

        self.emit_depth.set(
            self.emit_depth
                .get()
                .checked_add(1)
                .expect("emission nesting cannot exceed usize::MAX"),
        );

        // Ends the emission even if a callback panics.
        let _emission = scopeguard::guard((), |()| self.end_emission());

        let mut current = first;

        loop {
            // SAFETY: Nodes are only marked, never removed, while an emission is in progress.
            let connection = unsafe { current.value() };

            if !connection.is_disconnected() {
                // SAFETY: Every callable of a `Signal<A>` is created for `A`.
                unsafe {
                    connection.callable.invoke(args.clone());
                }
            }

            if current == last {
                break;
            }

            // SAFETY: Nodes are only marked, never removed, while an emission is in progress.
            current = unsafe { current.next() }
                .expect("the last node of an emission is always reachable from its first node");
        }
    }

    fn emission_range(&self) -> Option<(NodeRef<Connection>, NodeRef<Connection>)> {
        let connections = self.connections.borrow();

        Some((connections.front()?, connections.back()?))
    }

    fn end_emission(&self) {
        let depth = self
            .emit_depth
            .get()
            .checked_sub(1)
            .expect("ended an emission that was never started");

        self.emit_depth.set(depth);

        if depth == 0 && self.pending_removals.get() > 0 {
            self.pending_removals.set(0);
            self.connections
                .borrow_mut()
                .retain(|connection| !connection.is_disconnected());
        }
    }
}
