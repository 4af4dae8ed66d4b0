use std::fmt;
use std::mem::{self, ManuallyDrop};
use std::ptr::{self, NonNull};
use std::rc::{Rc, Weak};

use crate::{Arguments, Subscriber};

/// A type-erased callback: a free function, or a method together with a weak reference to the
/// subscriber it is invoked on.
///
/// Two callables are equal if they have the same receiver address and the same function address.
pub(crate) struct Callable {
    receiver: Option<Receiver>,

    /// Address of the user's function or method.
    function: *const (),

    /// Address of an `unsafe fn(*const (), *const (), A)` that knows how to invoke `function`.
    thunk: *const (),
}

/// A `Weak<T>` with its type erased, plus the operations we need on it.
struct Receiver {
    ptr: NonNull<()>,
    upgrade: unsafe fn(NonNull<()>) -> Option<Rc<dyn Subscriber>>,
    release: unsafe fn(NonNull<()>),
}

impl Receiver {
    fn new<T: Subscriber + 'static>(subscriber: &Rc<T>) -> Self {
        let weak = Rc::downgrade(subscriber);

        Self {
            ptr: NonNull::new(Weak::into_raw(weak).cast_mut())
                .expect("Weak::into_raw() of a live Rc is never null")
                .cast(),
            upgrade: upgrade::<T>,
            release: release::<T>,
        }
    }
}

/// # Safety
///
/// `ptr` must have been obtained from `Weak::<T>::into_raw()` and the weak reference must not
/// have been released yet.
unsafe fn upgrade<T: Subscriber + 'static>(ptr: NonNull<()>) -> Option<Rc<dyn Subscriber>> {
    // SAFETY: Forwarding guarantees from the caller. We do not take ownership of the weak.
    let weak =
        ManuallyDrop::new(unsafe { Weak::from_raw(ptr.as_ptr().cast_const().cast::<T>()) });

    weak.upgrade().map(|strong| strong as Rc<dyn Subscriber>)
}

/// # Safety
///
/// `ptr` must have been obtained from `Weak::<T>::into_raw()` and is released by this call.
unsafe fn release<T>(ptr: NonNull<()>) {
    // SAFETY: Forwarding guarantees from the caller.
    drop(unsafe { Weak::from_raw(ptr.as_ptr().cast_const().cast::<T>()) });
}

impl Callable {
    pub(crate) fn for_function<A: Arguments>(function: A::Function) -> Self {
        let thunk: unsafe fn(*const (), *const (), A) = A::call_function;

        Self {
            receiver: None,
            function: A::function_address(function),
            thunk: thunk as *const (),
        }
    }

    pub(crate) fn for_method<A: Arguments, T: Subscriber + 'static>(
        subscriber: &Rc<T>,
        method: A::Method<T>,
    ) -> Self {
        let thunk: unsafe fn(*const (), *const (), A) = A::call_method::<T>;

        Self {
            receiver: Some(Receiver::new(subscriber)),
            function: A::method_address::<T>(method),
            thunk: thunk as *const (),
        }
    }

    /// Whether the callable is bound to a subscriber rather than being a free function.
    pub(crate) fn is_method(&self) -> bool {
        self.receiver.is_some()
    }

    /// The address the callable is invoked on, or null for free functions.
    pub(crate) fn receiver_address(&self) -> *const () {
        self.receiver
            .as_ref()
            .map_or(ptr::null(), |receiver| receiver.ptr.as_ptr().cast_const())
    }

    /// Function addresses are not guaranteed unique, so this may match a different function
    /// with an identical body.
    pub(crate) fn matches(&self, receiver: *const (), function: *const ()) -> bool {
        ptr::eq(self.receiver_address(), receiver) && ptr::eq(self.function, function)
    }

    /// Obtains a strong reference to the subscriber, if this is a method whose subscriber is
    /// still alive.
    pub(crate) fn subscriber(&self) -> Option<Rc<dyn Subscriber>> {
        let receiver = self.receiver.as_ref()?;

        // SAFETY: The receiver owns the weak reference until the callable is dropped.
        unsafe { (receiver.upgrade)(receiver.ptr) }
    }

    /// Invokes the callback. Methods whose subscriber is no longer alive are skipped.
    ///
    /// # Safety
    ///
    /// `A` must be the same argument type the callable was created with.
    pub(crate) unsafe fn invoke<A: Arguments>(&self, args: A) {
        // SAFETY: The caller guarantees that the thunk was created for `A`.
        let thunk: unsafe fn(*const (), *const (), A) =
            unsafe { mem::transmute_copy(&self.thunk) };

        // SAFETY: The thunk was created together with the function and receiver, which it
        // knows how to interpret. The weak receiver stays owned by us during the call.
        unsafe { thunk(self.receiver_address(), self.function, args) }
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other.receiver_address(), other.function)
    }
}

impl Drop for Callable {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            // SAFETY: We own the weak reference and nothing uses it after this point.
            unsafe { (receiver.release)(receiver.ptr) }
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("receiver", &self.receiver_address())
            .field("function", &self.function)
            .finish()
    }
}
