// Fixed-capacity sample ring with overwrite-oldest semantics
//
// Single producer (the ingest worker, through `RingWriter`), any number of
// readers (through cloneable `BufferView`s). Entries are stored behind `Arc`
// so a snapshot only copies pointers while the lock is held; a sample is fully
// built before it is published and is never mutated afterwards.

use crate::streaming::sample::Sample;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Buffer counters
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BufferMetrics {
    pub total_appended: u64,
    pub total_evicted: u64,
    pub current_size: usize,
    pub capacity: usize,
}

/// Shared ring storage
pub struct SampleRingBuffer {
    slots: Mutex<VecDeque<Arc<Sample>>>,
    capacity: usize,
    total_appended: AtomicU64,
    total_evicted: AtomicU64,
}

impl SampleRingBuffer {
    /// Create a ring and return its writer and a first read-only view.
    ///
    /// A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> (RingWriter, BufferView) {
        let ring = Arc::new(Self::with_capacity(capacity));
        (RingWriter::new(Arc::clone(&ring)), BufferView { ring })
    }

    fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            total_appended: AtomicU64::new(0),
            total_evicted: AtomicU64::new(0),
        }
    }

    fn append(&self, sample: Sample) -> bool {
        // Allocate outside the critical section
        let entry = Arc::new(sample);

        let mut slots = self.slots.lock();
        let evicted = if slots.len() == self.capacity {
            slots.pop_front();
            true
        } else {
            false
        };
        slots.push_back(entry);
        // Both counters move under the lock so a locked reader sees
        // appended - evicted == len
        self.total_appended.fetch_add(1, Ordering::Release);
        if evicted {
            self.total_evicted.fetch_add(1, Ordering::Release);
        }
        evicted
    }

    fn snapshot(&self, newest: Option<usize>) -> Snapshot {
        let slots = self.slots.lock();
        let skip = newest.map_or(0, |n| slots.len().saturating_sub(n));
        let samples: Vec<Arc<Sample>> = slots.iter().skip(skip).cloned().collect();
        let sequence = self.total_appended.load(Ordering::Acquire);
        drop(slots);

        Snapshot { samples, sequence }
    }

    fn metrics(&self) -> BufferMetrics {
        let slots = self.slots.lock();
        BufferMetrics {
            total_appended: self.total_appended.load(Ordering::Acquire),
            total_evicted: self.total_evicted.load(Ordering::Acquire),
            current_size: slots.len(),
            capacity: self.capacity,
        }
    }
}

/// Immutable, arrival-ordered copy of the ring contents
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    samples: Vec<Arc<Sample>>,
    /// Total appends at the moment the snapshot was taken
    sequence: u64,
}

impl Snapshot {
    pub fn samples(&self) -> &[Arc<Sample>] {
        &self.samples
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter().map(|s| s.as_ref())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn newest(&self) -> Option<&Sample> {
        self.samples.last().map(|s| s.as_ref())
    }
}

/// Exclusive write handle. Deliberately not `Clone`.
pub struct RingWriter {
    ring: Arc<SampleRingBuffer>,
}

impl RingWriter {
    fn new(ring: Arc<SampleRingBuffer>) -> Self {
        Self { ring }
    }

    /// Append in arrival order. Returns true if the oldest entry was evicted.
    pub fn append(&mut self, sample: Sample) -> bool {
        self.ring.append(sample)
    }

    pub fn view(&self) -> BufferView {
        BufferView {
            ring: Arc::clone(&self.ring),
        }
    }
}

/// Read-only handle for consumers
#[derive(Clone)]
pub struct BufferView {
    ring: Arc<SampleRingBuffer>,
}

impl BufferView {
    pub fn snapshot(&self) -> Snapshot {
        self.ring.snapshot(None)
    }

    /// Snapshot of at most the newest `count` samples
    pub fn latest(&self, count: usize) -> Snapshot {
        self.ring.snapshot(Some(count))
    }

    pub fn len(&self) -> usize {
        self.ring.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity
    }

    /// Appends so far; cheap way for a consumer to skip unchanged ticks
    pub fn sequence(&self) -> u64 {
        self.ring.total_appended.load(Ordering::Acquire)
    }

    pub fn evicted(&self) -> u64 {
        self.ring.total_evicted.load(Ordering::Acquire)
    }

    pub fn get_metrics(&self) -> BufferMetrics {
        self.ring.metrics()
    }

    /// Mint a new writer for a fresh ingest run on the same ring.
    ///
    /// Callers must ensure the previous writer's worker has finished.
    pub(crate) fn writer(&self) -> RingWriter {
        RingWriter::new(Arc::clone(&self.ring))
    }
}
