//! Basic usage of the `pooled_signals` crate:
//!
//! * Declaring a subscriber type.
//! * Connecting methods and free functions to signals.
//! * Emitting signals.
//! * Disconnecting, explicitly and by dropping either side.

use std::cell::RefCell;
use std::rc::Rc;

use pooled_signals::{Observer, SharedPool, Signal, Subscriber};

struct Downloader {
    progress: Signal<(&'static str, u8)>,
    finished: Signal<(&'static str,)>,
}

struct ProgressBar {
    // Every subscriber embeds an observer, which disconnects it from its signals on drop.
    observer: Observer,
    history: RefCell<Vec<String>>,
}

impl ProgressBar {
    fn on_progress(&self, file: &'static str, percent: u8) {
        self.history.borrow_mut().push(format!("{file}: {percent}%"));
    }

    fn on_finished(&self, file: &'static str) {
        self.history.borrow_mut().push(format!("{file}: done"));
    }
}

impl Subscriber for ProgressBar {
    fn observer(&self) -> &Observer {
        &self.observer
    }
}

fn log_finished(file: &'static str) {
    println!("Finished downloading {file}");
}

fn main() {
    // Connections are stored in fixed-capacity pools. This one has room for 16 connections.
    let pool = SharedPool::for_connections(16);

    let downloader = Downloader {
        progress: Signal::with_pool(&pool),
        finished: Signal::with_pool(&pool),
    };

    let bar = Rc::new(ProgressBar {
        observer: Observer::new(),
        history: RefCell::new(Vec::new()),
    });

    downloader
        .progress
        .connect(&bar, ProgressBar::on_progress)
        .expect("pool has room for this connection");
    downloader
        .finished
        .connect(&bar, ProgressBar::on_finished)
        .expect("pool has room for this connection");
    downloader
        .finished
        .connect_fn(log_finished)
        .expect("pool has room for this connection");

    println!("Pool holds {} of {} connections", pool.allocated(), pool.capacity());

    downloader.progress.emit("kernel.img", 50);
    downloader.progress.emit("kernel.img", 100);
    downloader.finished.emit("kernel.img");

    for line in bar.history.borrow().iter() {
        println!("Progress bar saw: {line}");
    }

    // Once disconnected, the progress bar no longer hears about progress.
    downloader.progress.disconnect(&*bar);
    downloader.progress.emit("initrd.img", 10);

    // Dropping the subscriber disconnects it from every remaining signal.
    drop(bar);

    println!(
        "After dropping the progress bar, `finished` has {} connection(s)",
        downloader.finished.connection_count()
    );

    downloader.finished.emit("initrd.img");
}
