// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use slog::{debug, Logger};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// How often the keepalive clock wakes up to check its timer.
pub const DEFAULT_RESOLUTION: Duration = Duration::from_millis(100);

/// Something the keepalive clock sends keepalives through.
pub trait KeepaliveTarget: Send + Sync + 'static {
    /// Send one keepalive. Returning [`Error::Closed`] stops the clock.
    fn send_keepalive(&self) -> Result<(), Error>;

    fn closed(&self) -> bool;

    /// The hold time currently in force. Zero turns keepalives off.
    fn hold_time(&self) -> Duration;
}

/// Sends keepalives at a third of the target's hold time. The hold time is
/// read from the target each time the clock is woken through its channel.
pub struct KeepaliveClock {
    resolution: Duration,
    timer: Timer,
    wake_rx: Receiver<()>,
    log: Logger,
}

impl KeepaliveClock {
    pub fn new(
        resolution: Duration,
        wake_rx: Receiver<()>,
        log: Logger,
    ) -> Self {
        Self {
            resolution,
            timer: Timer::new(Duration::ZERO),
            wake_rx,
            log: log.new(slog::o!(
                "component" => crate::COMPONENT_BGP,
                "module" => crate::MOD_CLOCK,
            )),
        }
    }

    pub fn spawn<T: KeepaliveTarget>(
        self,
        name: String,
        target: Arc<T>,
    ) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(name)
            .spawn(move || self.run(target))
    }

    fn run<T: KeepaliveTarget>(mut self, target: Arc<T>) {
        let mut last = Instant::now();
        loop {
            if target.closed() {
                debug!(self.log, "session closed, stopping keepalives");
                return;
            }
            match self.wake_rx.recv_timeout(self.resolution) {
                Ok(()) => {
                    self.configure(target.hold_time());
                    last = Instant::now();
                    continue;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }

            let now = Instant::now();
            self.timer.tick(now - last);
            last = now;

            if self.timer.expired() {
                self.timer.reset();
                match target.send_keepalive() {
                    Ok(()) => {}
                    Err(Error::Closed) => return,
                    Err(e) => debug!(self.log, "keepalive not sent: {e}"),
                }
            }
        }
    }

    fn configure(&mut self, hold: Duration) {
        self.timer.disable();
        if hold.is_zero() {
            debug!(self.log, "keepalives disabled");
            return;
        }
        self.timer.interval = hold / 3;
        self.timer.reset();
        self.timer.enable();
        debug!(self.log, "keepalive interval {:?}", self.timer.interval);
    }
}

#[derive(Debug, Clone)]
pub struct Timer {
    /// How long a timer runs until it fires.
    pub interval: Duration,

    enabled: bool,
    remaining: Duration,
}

impl Timer {
    /// Create a new, disabled timer with the specified interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            enabled: false,
            remaining: interval,
        }
    }

    /// Count down by `elapsed`. Saturates at zero, use `expired` to check
    /// for expiration.
    pub fn tick(&mut self, elapsed: Duration) {
        if self.enabled {
            self.remaining = self.remaining.saturating_sub(elapsed);
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Only enabled timers can expire.
    pub fn enable(&mut self) {
        self.enabled = true
    }

    pub fn disable(&mut self) {
        self.enabled = false
    }

    pub fn expired(&self) -> bool {
        self.enabled && self.remaining.is_zero()
    }

    /// Reset the time remaining to the timer's interval.
    pub fn reset(&mut self) {
        self.remaining = self.interval;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use speaker_common::log::discard_logger;
    use speaker_common::wait_for;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc::sync_channel;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Counter {
        sent: AtomicUsize,
        closed: AtomicBool,
        hold: Mutex<Duration>,
    }

    impl Counter {
        fn set_hold(&self, hold: Duration) {
            *self.hold.lock().expect("lock hold") = hold;
        }
    }

    impl KeepaliveTarget for Counter {
        fn send_keepalive(&self) -> Result<(), Error> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn hold_time(&self) -> Duration {
            *self.hold.lock().expect("lock hold")
        }
    }

    #[test]
    fn timer_expiry() {
        let mut t = Timer::new(Duration::from_secs(3));
        t.tick(Duration::from_secs(5));
        assert!(!t.expired(), "disabled timers do not run");

        t.enable();
        t.tick(Duration::from_secs(2));
        assert!(!t.expired());
        t.tick(Duration::from_secs(2));
        assert!(t.expired());

        t.reset();
        assert!(!t.expired());
        t.tick(Duration::from_secs(3));
        assert!(t.expired());
        t.disable();
        assert!(!t.expired());
    }

    #[test]
    fn keepalives_follow_hold_time() {
        let (wake_tx, wake_rx) = sync_channel(1);
        let target = Arc::new(Counter::default());
        let clock = KeepaliveClock::new(
            Duration::from_millis(10),
            wake_rx,
            discard_logger(),
        );
        let handle = clock
            .spawn("keepalive-test".into(), target.clone())
            .expect("spawn clock");

        // 3s hold time gives a keepalive every second
        target.set_hold(Duration::from_secs(3));
        wake_tx.try_send(()).expect("wake clock");
        wait_for!(target.sent.load(Ordering::SeqCst), >=, 1);

        target.set_hold(Duration::ZERO);
        wake_tx.try_send(()).expect("wake clock");
        std::thread::sleep(Duration::from_millis(100));
        let sent = target.sent.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(1500));
        assert_eq!(sent, target.sent.load(Ordering::SeqCst));

        target.closed.store(true, Ordering::SeqCst);
        handle.join().expect("join clock");
    }

    #[test]
    fn latest_hold_time_wins() {
        let (wake_tx, wake_rx) = sync_channel(1);
        let target = Arc::new(Counter::default());

        // Two updates land before the clock runs. The second wake-up finds
        // the channel full and is dropped, yet the clock must still use the
        // newer hold time.
        target.set_hold(Duration::from_secs(90));
        wake_tx.try_send(()).expect("wake clock");
        target.set_hold(Duration::from_secs(3));
        assert!(wake_tx.try_send(()).is_err());

        let clock = KeepaliveClock::new(
            Duration::from_millis(10),
            wake_rx,
            discard_logger(),
        );
        let handle = clock
            .spawn("keepalive-test".into(), target.clone())
            .expect("spawn clock");
        wait_for!(target.sent.load(Ordering::SeqCst), >=, 1);

        target.closed.store(true, Ordering::SeqCst);
        handle.join().expect("join clock");
    }

    #[test]
    fn dropped_sender_stops_clock() {
        let (wake_tx, wake_rx) = sync_channel::<()>(1);
        let clock = KeepaliveClock::new(
            Duration::from_millis(10),
            wake_rx,
            discard_logger(),
        );
        let handle = clock
            .spawn("keepalive-test".into(), Arc::new(Counter::default()))
            .expect("spawn clock");
        drop(wake_tx);
        handle.join().expect("join clock");
    }
}
