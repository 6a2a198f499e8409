//! Iteration drivers for background loops.
//!
//! A [`Looper`] decides how many times a loop body runs and how the passes
//! are spaced; the loop itself just writes `while looper.next().await { … }`.
//! Tests drive loop bodies a fixed number of times with [`Looper::free`],
//! production uses [`Looper::forever`] with a tick interval, and a
//! [`Stopper`] shuts a loop down from the outside between or during sleeps.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;

#[derive(Clone, Copy, Debug)]
enum Count {
    Times(u64),
    Forever,
}

/// Drives one loop: call [`next`](Looper::next) at the top of every pass.
pub struct Looper {
    remaining: Count,
    interval: Option<Duration>,
    started: bool,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
}

/// Signals the owning [`Looper`] to stop, waking it mid-sleep.
#[derive(Clone)]
pub struct Stopper {
    tx: Arc<watch::Sender<bool>>,
}

impl Stopper {
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

impl Looper {
    fn build(remaining: Count, interval: Option<Duration>) -> Looper {
        let (stop_tx, stop_rx) = watch::channel(false);
        Looper {
            remaining,
            interval,
            started: false,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
        }
    }

    /// `count` back-to-back passes with no delay between them.
    pub fn free(count: u64) -> Looper {
        Looper::build(Count::Times(count), None)
    }

    /// `count` passes spaced `interval` apart. The first pass runs
    /// immediately.
    pub fn timed(count: u64, interval: Duration) -> Looper {
        Looper::build(Count::Times(count), Some(interval))
    }

    /// Passes spaced `interval` apart until the [`Stopper`] fires.
    pub fn forever(interval: Duration) -> Looper {
        Looper::build(Count::Forever, Some(interval))
    }

    pub fn stopper(&self) -> Stopper {
        Stopper {
            tx: Arc::clone(&self.stop_tx),
        }
    }

    /// True when the loop body should run another pass. Sleeps out the
    /// interval (if any) before all but the first pass, and returns false
    /// immediately when stopped.
    pub async fn next(&mut self) -> bool {
        if *self.stop_rx.borrow() {
            return false;
        }
        if let Count::Times(0) = self.remaining {
            return false;
        }
        if self.started {
            if let Some(interval) = self.interval {
                tokio::select! {
                    _ = sleep(interval) => {}
                    _ = self.stop_rx.changed() => return false,
                }
            }
        }
        self.started = true;
        if let Count::Times(ref mut n) = self.remaining {
            *n -= 1;
        }
        true
    }
}
