/// Periodic clock - fires a callback on a dedicated thread at a fixed interval
///
/// Deadlines are absolute (`start + interval * n`), so callback time does
/// not accumulate into drift. When a callback overruns its slot the clock
/// fires once immediately, then realigns to the next future deadline
/// instead of bursting through the missed ones.
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::{error, trace, warn};

use crate::error::{Error, Result};

/// Absolute deadline bookkeeping for one clock run.
#[derive(Debug, Clone)]
pub struct Deadlines {
    start: Instant,
    interval: Duration,
    ticks: u32,
}

impl Deadlines {
    pub fn new(start: Instant, interval: Duration) -> Self {
        Self {
            start,
            interval,
            ticks: 0,
        }
    }

    /// First deadline, one interval after `start`.
    pub fn first(&mut self) -> Instant {
        self.ticks = 1;
        self.start + self.interval
    }

    /// Deadline for the tick after the one that just fired, given the
    /// time the callback returned.
    pub fn next_after(&mut self, now: Instant) -> Instant {
        self.ticks = self.ticks.saturating_add(1);
        let due = self.start + self.interval * self.ticks;
        if due >= now {
            return due;
        }

        // Behind: fire once right away. The following deadline is the first
        // grid point after `now`.
        let elapsed = now.duration_since(self.start).as_nanos() / self.interval.as_nanos();
        let behind = elapsed as u32;
        warn!(
            "clock overran by {} tick(s), skipping to the next deadline",
            behind.saturating_sub(self.ticks) + 1
        );
        self.ticks = behind;
        now
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }
}

/// A running clock. Dropping it cancels and joins the thread.
pub struct Clock {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Clock {
    /// Starts firing `callback` every `interval`, first firing one interval from now.
    pub fn start<F>(interval: Duration, mut callback: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        if interval.is_zero() {
            return Err(Error::InvalidConfig("clock interval must be positive".into()));
        }
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let thread = thread::Builder::new()
            .name("gridseq-clock".into())
            .spawn(move || {
                let mut deadlines = Deadlines::new(Instant::now(), interval);
                let mut deadline = deadlines.first();

                loop {
                    // A stop signal or a dropped sender both end the loop.
                    match stop_rx.recv_deadline(deadline) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if !stop_rx.is_empty() {
                        break;
                    }

                    trace!("clock tick {}", deadlines.ticks());
                    callback();
                    deadline = deadlines.next_after(Instant::now());
                }
            })?;

        Ok(Self {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map_or(false, |thread| !thread.is_finished())
    }

    /// Signals the thread and waits for it to exit. No callback runs
    /// after this returns.
    pub fn cancel(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.try_send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("clock thread panicked");
            }
        }
    }
}

impl Drop for Clock {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::channel;
    use std::sync::Arc;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn test_deadlines_are_absolute() {
        let start = Instant::now();
        let mut deadlines = Deadlines::new(start, 10 * MS);
        assert_eq!(deadlines.first(), start + 10 * MS);

        // callback returned 3ms late; the next slot does not move
        assert_eq!(deadlines.next_after(start + 13 * MS), start + 20 * MS);
        assert_eq!(deadlines.next_after(start + 21 * MS), start + 30 * MS);
    }

    #[test]
    fn test_overrun_fires_once_then_skips() {
        let start = Instant::now();
        let mut deadlines = Deadlines::new(start, 10 * MS);
        deadlines.first();

        // tick 1 ran until 47ms: ticks 2..4 are missed
        let late = start + 47 * MS;
        assert_eq!(deadlines.next_after(late), late);
        // after the catch-up firing, resume on the grid
        assert_eq!(deadlines.next_after(start + 48 * MS), start + 50 * MS);
        assert_eq!(deadlines.next_after(start + 50 * MS), start + 60 * MS);
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        assert!(matches!(
            Clock::start(Duration::ZERO, || {}),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_clock_fires_repeatedly() {
        let count = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = channel();
        let counter = Arc::clone(&count);
        let clock = Clock::start(5 * MS, move || {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 == 5 {
                let _ = tx.send(());
            }
        })
        .unwrap();
        assert!(clock.is_running());

        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        clock.cancel();
        let after_cancel = count.load(Ordering::SeqCst);
        assert!(after_cancel >= 5);

        thread::sleep(20 * MS);
        assert_eq!(count.load(Ordering::SeqCst), after_cancel);
    }

    #[test]
    fn test_cancel_before_first_tick() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let clock = Clock::start(Duration::from_millis(200), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let started = Instant::now();
        clock.cancel();
        assert!(started.elapsed() < Duration::from_millis(150));

        thread::sleep(Duration::from_millis(300));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_callback_time_does_not_drift() {
        const TICKS: usize = 50;
        let interval = 10 * MS;
        let (tx, rx) = channel();
        let mut fired = 0;
        let started = Instant::now();

        let clock = Clock::start(interval, move || {
            // 40% of each slot spent in the callback
            thread::sleep(4 * MS);
            fired += 1;
            if fired == TICKS {
                let _ = tx.send(Instant::now());
            }
        })
        .unwrap();

        let finished = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        clock.cancel();
        let elapsed = finished - started;

        // relative scheduling would need at least 50 * 14ms = 700ms
        assert!(elapsed >= interval * TICKS as u32);
        assert!(elapsed < Duration::from_millis(650), "drifted: {elapsed:?}");
    }

    #[test]
    fn test_callbacks_never_overlap() {
        let busy = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let (b, o) = (Arc::clone(&busy), Arc::clone(&overlaps));

        let clock = Clock::start(MS, move || {
            if b.fetch_add(1, Ordering::SeqCst) != 0 {
                o.fetch_add(1, Ordering::SeqCst);
            }
            // overrun every slot
            thread::sleep(3 * MS);
            b.fetch_sub(1, Ordering::SeqCst);
        })
        .unwrap();

        thread::sleep(50 * MS);
        clock.cancel();
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(busy.load(Ordering::SeqCst), 0);
    }
}
