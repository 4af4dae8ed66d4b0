use std::mem::{self, ManuallyDrop};
use std::rc::Weak;

use crate::Sealed;

/// An argument list that a [`Signal`][crate::Signal] can be emitted with.
///
/// Implemented for tuples of zero to eight elements. A `Signal<(i32, &str)>` invokes callbacks
/// that take an `i32` and a `&str`, either as free functions of type `fn(i32, &str)` or as
/// methods of a subscriber `T` of type `fn(&T, i32, &str)`.
///
/// This is a sealed trait and exists to map argument tuples to callback types. You never need
/// to implement it.
#[expect(private_bounds, reason = "intentional - sealed trait")]
pub trait Arguments: Sized + Sealed {
    /// The free function type that can be connected to a signal with these arguments.
    type Function: Copy;

    /// The method type of subscriber `T` that can be connected to a signal with these arguments.
    type Method<T>: Copy;

    #[doc(hidden)]
    fn function_address(function: Self::Function) -> *const ();

    #[doc(hidden)]
    fn method_address<T>(method: Self::Method<T>) -> *const ();

    /// Invokes a free function with the arguments.
    ///
    /// # Safety
    ///
    /// `function` must have been obtained from `function_address()` of this type.
    #[doc(hidden)]
    unsafe fn call_function(receiver: *const (), function: *const (), args: Self);

    /// Invokes a method with the arguments if the receiver is still alive.
    ///
    /// # Safety
    ///
    /// `receiver` must have been obtained from `Weak::<T>::into_raw()` and the weak reference
    /// must still be owned by the caller. `method` must have been obtained from
    /// `method_address::<T>()` of this type.
    #[doc(hidden)]
    unsafe fn call_method<T>(receiver: *const (), method: *const (), args: Self);
}

macro_rules! impl_arguments {
    ($($ty:ident $arg:ident),*) => {
        impl<$($ty),*> Sealed for ($($ty,)*) {}

        impl<$($ty),*> Arguments for ($($ty,)*) {
            type Function = fn($($ty),*);
            type Method<T> = fn(&T $(, $ty)*);

            fn function_address(function: Self::Function) -> *const () {
                function as *const ()
            }

            fn method_address<T>(method: Self::Method<T>) -> *const () {
                method as *const ()
            }

            unsafe fn call_function(_receiver: *const (), function: *const (), args: Self) {
                // SAFETY: The caller guarantees the address came from a function of this type.
                let function: Self::Function = unsafe { mem::transmute_copy(&function) };

                let ($($arg,)*) = args;
                function($($arg),*);
            }

            unsafe fn call_method<T>(receiver: *const (), method: *const (), args: Self) {
                // The caller keeps owning the weak reference, so we must not release it.
                // SAFETY: The caller guarantees the receiver came from `Weak::<T>::into_raw()`.
                let weak = ManuallyDrop::new(unsafe { Weak::from_raw(receiver.cast::<T>()) });

                // A subscriber that is being destroyed is never invoked. Holding the strong
                // reference keeps the subscriber alive until the method returns.
                let Some(subscriber) = weak.upgrade() else {
                    return;
                };

                // SAFETY: The caller guarantees the address came from a method of this type.
                let method: Self::Method<T> = unsafe { mem::transmute_copy(&method) };

                let ($($arg,)*) = args;
                method(&subscriber $(, $arg)*);
            }
        }
    };
}

impl_arguments!();
impl_arguments!(A1 a1);
impl_arguments!(A1 a1, A2 a2);
impl_arguments!(A1 a1, A2 a2, A3 a3);
impl_arguments!(A1 a1, A2 a2, A3 a3, A4 a4);
impl_arguments!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5);
impl_arguments!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6);
impl_arguments!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7);
impl_arguments!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7, A8 a8);

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::ptr;
    use std::rc::Rc;

    use super::*;

    thread_local! {
        static LAST_SUM: Cell<i64> = const { Cell::new(0) };
    }

    fn sum3(a: i32, b: i64, c: u8) {
        LAST_SUM.set(i64::from(a) + b + i64::from(c));
    }

    struct Accumulator {
        total: Cell<i64>,
    }

    impl Accumulator {
        fn add2(&self, a: i32, b: i64) {
            self.total.set(self.total.get() + i64::from(a) + b);
        }
    }

    #[test]
    fn calls_function_through_address() {
        let address = <(i32, i64, u8)>::function_address(sum3);

        // SAFETY: The address came from a function of this exact argument type.
        unsafe {
            <(i32, i64, u8)>::call_function(ptr::null(), address, (1, 2, 3));
        }

        assert_eq!(LAST_SUM.get(), 6);
    }

    #[test]
    fn calls_method_while_receiver_alive() {
        let accumulator = Rc::new(Accumulator {
            total: Cell::new(0),
        });

        let receiver = Weak::into_raw(Rc::downgrade(&accumulator)).cast::<()>();
        let address = <(i32, i64)>::method_address::<Accumulator>(Accumulator::add2);

        // SAFETY: The receiver and address were created for exactly these types.
        unsafe {
            <(i32, i64)>::call_method::<Accumulator>(receiver, address, (10, 20));
        }

        assert_eq!(accumulator.total.get(), 30);

        drop(accumulator);

        // The receiver is gone, so this must not do anything.
        // SAFETY: The receiver and address were created for exactly these types.
        unsafe {
            <(i32, i64)>::call_method::<Accumulator>(receiver, address, (10, 20));
        }

        // SAFETY: We created the receiver via `Weak::into_raw()` above.
        drop(unsafe { Weak::from_raw(receiver.cast::<Accumulator>()) });
    }

    #[test]
    fn zero_arguments() {
        fn touch() {
            LAST_SUM.set(-1);
        }

        let address = <()>::function_address(touch);

        // SAFETY: The address came from a function of this exact argument type.
        unsafe {
            <()>::call_function(ptr::null(), address, ());
        }

        assert_eq!(LAST_SUM.get(), -1);
    }
}
