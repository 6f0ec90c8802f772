// Timer-driven consumers
//
// Consumers poll buffer snapshots on their own interval, independent of the
// device rate and of how fast lines arrive. They only ever hold a `BufferView`,
// so they cannot influence ingest, and removing them changes nothing upstream.

use crate::streaming::buffer::{BufferView, Snapshot};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub type ConsumerId = u64;

pub type TickCallback = Box<dyn FnMut() + Send>;

/// Anything that can call a callback periodically.
///
/// Implemented by `TickScheduler`; a UI event loop can implement it over its
/// own timers instead.
pub trait PeriodicScheduler: Send + Sync {
    fn register_periodic(&self, interval: Duration, callback: TickCallback) -> ConsumerId;

    /// Returns false if the id was not registered
    fn unregister(&self, id: ConsumerId) -> bool;
}

struct Registration {
    id: ConsumerId,
    interval: Duration,
    next_due: Instant,
    callback: TickCallback,
}

/// Single-task cooperative scheduler.
///
/// Due callbacks run one after another on the task driving `run`. Callbacks
/// must be quick and must not register or unregister from inside a tick.
pub struct TickScheduler {
    registrations: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
    changed: Notify,
}

impl TickScheduler {
    pub fn new() -> Self {
        Self {
            registrations: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            changed: Notify::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.registrations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fire every callback due at `now`; returns how many ran.
    ///
    /// Missed periods are skipped rather than replayed.
    pub fn run_due(&self, now: Instant) -> usize {
        let mut fired = 0;
        let mut registrations = self.registrations.lock();
        for reg in registrations.iter_mut() {
            if reg.next_due > now {
                continue;
            }
            (reg.callback)();
            fired += 1;

            reg.next_due += reg.interval;
            if reg.next_due <= now {
                reg.next_due = now + reg.interval;
            }
        }
        fired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.registrations.lock().iter().map(|r| r.next_due).min()
    }

    /// Drive the scheduler until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            let deadline = self
                .next_deadline()
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(1));

            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = self.changed.notified() => {}

                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                    self.run_due(Instant::now());
                }
            }
        }
        log::debug!("Tick scheduler stopped");
    }
}

impl Default for TickScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl PeriodicScheduler for TickScheduler {
    fn register_periodic(&self, interval: Duration, callback: TickCallback) -> ConsumerId {
        let interval = interval.max(Duration::from_millis(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.registrations.lock().push(Registration {
            id,
            interval,
            next_due: Instant::now() + interval,
            callback,
        });
        self.changed.notify_one();
        id
    }

    fn unregister(&self, id: ConsumerId) -> bool {
        let mut registrations = self.registrations.lock();
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        let removed = registrations.len() != before;
        drop(registrations);

        if removed {
            self.changed.notify_one();
        }
        removed
    }
}

/// What a live view last rendered
#[derive(Debug, Clone, Default)]
pub struct LiveFrame {
    pub snapshot: Snapshot,
    /// Ticks that picked up new data
    pub refreshes: u64,
    /// Ticks skipped because nothing was appended
    pub idle_ticks: u64,
}

/// Keeps the newest `window` samples for plotting
#[derive(Clone)]
pub struct LiveView {
    view: BufferView,
    window: usize,
    frame: Arc<Mutex<LiveFrame>>,
}

impl LiveView {
    pub fn new(view: BufferView, window: usize) -> Self {
        Self {
            view,
            window: window.max(1),
            frame: Arc::new(Mutex::new(LiveFrame::default())),
        }
    }

    /// Pull a new window if anything was appended since the last one
    pub fn refresh(&self) -> bool {
        let last = self.frame.lock().snapshot.sequence();
        if self.view.sequence() == last {
            self.frame.lock().idle_ticks += 1;
            return false;
        }

        let snapshot = self.view.latest(self.window);
        let mut frame = self.frame.lock();
        frame.snapshot = snapshot;
        frame.refreshes += 1;
        true
    }

    pub fn frame(&self) -> LiveFrame {
        self.frame.lock().clone()
    }

    /// Register `refresh` on a scheduler
    pub fn attach(&self, scheduler: &dyn PeriodicScheduler, interval: Duration) -> ConsumerId {
        let view = self.clone();
        scheduler.register_periodic(
            interval,
            Box::new(move || {
                view.refresh();
            }),
        )
    }
}
