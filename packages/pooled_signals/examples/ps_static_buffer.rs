//! Placing pools in memory chosen by the caller:
//!
//! * A pool whose buffer lives forever, as it would in a `static`.
//! * A pool embedded inline with its capacity fixed at compile time.
//! * Making those pools the defaults of the current thread.

use std::mem::MaybeUninit;
use std::rc::Rc;

use pooled_signals::{
    BlockAllocator, CONNECTION_BLOCK_ALIGN, CONNECTION_BLOCK_SIZE, FixedObserverPool, Observer,
    PreallocatedPool, SharedPool, Signal, Subscriber,
};

struct Beeper {
    observer: Observer,
}

impl Beeper {
    fn beep(&self, times: u32) {
        for _ in 0..times {
            println!("Beep!");
        }
    }
}

impl Subscriber for Beeper {
    fn observer(&self) -> &Observer {
        &self.observer
    }
}

fn main() {
    // Room for 8 connections plus whatever is needed to align the first one.
    let buffer_len = CONNECTION_BLOCK_SIZE * 8 + CONNECTION_BLOCK_ALIGN;
    let buffer: &'static mut [MaybeUninit<u8>] =
        Box::leak(vec![MaybeUninit::uninit(); buffer_len].into_boxed_slice());

    let connections = PreallocatedPool::builder().build_in_static(buffer);
    println!("Static buffer holds {} connections", connections.capacity());

    // Signals and observers created from now on use these pools by default.
    SharedPool::set_default_for_connections(SharedPool::new(connections));
    SharedPool::set_default_for_observers(SharedPool::new(FixedObserverPool::<8>::new()));

    let alarm = Signal::<(u32,)>::new();
    let beeper = Rc::new(Beeper {
        observer: Observer::new(),
    });

    alarm
        .connect(&beeper, Beeper::beep)
        .expect("pool has room for this connection");
    alarm.emit(3);

    println!(
        "Default connection pool has {} block(s) in use",
        SharedPool::default_for_connections().allocated()
    );
}
