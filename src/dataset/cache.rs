use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use tracing::{debug, info, warn};

use crate::dataset::{DatasetEntry, DatasetLoader};
use crate::error::{Result, TileError};

/// Default number of datasets kept in memory.
pub const DEFAULT_CAPACITY: usize = 100;
/// Default ceiling on waiting for another request's load of the same dataset.
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(20);

/// Fixed-capacity circular cache of loaded datasets keyed by (descriptor, time tag).
///
/// Lookups scan backwards from the write cursor, so the newest match wins.
/// An empty time tag matches any stored tag for the descriptor. A miss
/// reserves the cursor slot with a loading placeholder, then loads outside the
/// lock; concurrent requests for the same key block on the placeholder until
/// it resolves or the load timeout elapses. Inserting past capacity
/// overwrites the oldest slot.
pub struct DatasetCache {
    loader: Arc<dyn DatasetLoader>,
    ring: Mutex<Ring>,
    load_timeout: Duration,
}

impl DatasetCache {
    pub fn new(loader: Arc<dyn DatasetLoader>) -> Self {
        Self::with_capacity(loader, DEFAULT_CAPACITY)
    }

    /// Panics if `capacity` is zero.
    pub fn with_capacity(loader: Arc<dyn DatasetLoader>, capacity: usize) -> Self {
        assert!(capacity > 0, "dataset cache capacity must be non-zero");
        Self {
            loader,
            ring: Mutex::new(Ring::new(capacity)),
            load_timeout: DEFAULT_LOAD_TIMEOUT,
        }
    }

    /// Set how long a request waits on another request's in-flight load.
    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    #[inline] pub fn capacity(&self) -> usize { self.lock().slots.len() }

    /// Number of occupied slots, placeholders included.
    pub fn len(&self) -> usize { self.lock().slots.iter().filter(|s| s.is_some()).count() }

    #[inline] pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Fetch a dataset, loading it on a miss. Any failure (load error or
    /// timeout waiting on another loader) is reported as `None`.
    pub fn get(&self, descriptor: &str, time_tag: &str) -> Option<Arc<DatasetEntry>> {
        self.try_get(descriptor, time_tag).ok()
    }

    /// Like [`get`](Self::get) but keeps the failure cause.
    pub fn try_get(&self, descriptor: &str, time_tag: &str) -> Result<Arc<DatasetEntry>> {
        let deadline = Instant::now() + self.load_timeout;

        let action = {
            let mut ring = self.lock();
            match ring.find(descriptor, time_tag) {
                Some(idx) => match &ring.slots[idx] {
                    Some(Slot::Ready(entry)) => {
                        debug!(descriptor, time_tag, "dataset cache hit");
                        return Ok(entry.clone());
                    }
                    Some(Slot::Loading(pending)) => Action::Wait(pending.clone()),
                    None => unreachable!("find only returns occupied slots"),
                },
                None => {
                    debug!(descriptor, time_tag, "dataset cache miss");
                    let pending = Arc::new(Pending::new(descriptor, time_tag));
                    ring.insert(Slot::Loading(pending.clone()));
                    Action::Load(pending)
                }
            }
        };

        match action {
            Action::Load(pending) => self.load(&pending),
            Action::Wait(pending) => match pending.wait_until(deadline) {
                Some(Outcome::Ready(entry)) => Ok(entry),
                Some(Outcome::Failed) => Err(TileError::LoadFailure {
                    descriptor: descriptor.to_string(),
                    source: anyhow!("concurrent load failed"),
                }),
                None => {
                    warn!(descriptor, waited = ?self.load_timeout, "timed out waiting for dataset load");
                    Err(TileError::PlaceholderTimeout {
                        descriptor: descriptor.to_string(),
                        waited: self.load_timeout,
                    })
                }
            },
        }
    }

    /// Remove the newest entry matching the key and close the gap.
    /// Returns false if nothing matched.
    pub fn remove(&self, descriptor: &str, time_tag: &str) -> bool {
        let mut ring = self.lock();
        match ring.find(descriptor, time_tag) {
            Some(idx) => {
                ring.remove_at(idx);
                true
            }
            None => false,
        }
    }

    /// Run the loader for a reserved placeholder and publish the outcome.
    fn load(&self, pending: &Arc<Pending>) -> Result<Arc<DatasetEntry>> {
        let started = Instant::now();
        let loaded = self.loader.load(&pending.descriptor);

        match loaded {
            Ok(features) => {
                let entry = Arc::new(DatasetEntry::new(&pending.descriptor, &pending.time_tag, features));
                {
                    let mut ring = self.lock();
                    match ring.position_of(pending) {
                        Some(idx) => ring.slots[idx] = Some(Slot::Ready(entry.clone())),
                        // placeholder was overwritten or removed meanwhile
                        None => ring.insert(Slot::Ready(entry.clone())),
                    }
                }
                pending.resolve(Outcome::Ready(entry.clone()));
                info!(
                    descriptor = %pending.descriptor,
                    features = entry.features().len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "dataset loaded"
                );
                Ok(entry)
            }
            Err(source) => {
                {
                    let mut ring = self.lock();
                    if let Some(idx) = ring.position_of(pending) {
                        ring.remove_at(idx);
                    }
                }
                pending.resolve(Outcome::Failed);
                warn!(descriptor = %pending.descriptor, error = %format!("{source:#}"), "dataset load failed");
                Err(TileError::LoadFailure { descriptor: pending.descriptor.clone(), source })
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Action {
    Load(Arc<Pending>),
    Wait(Arc<Pending>),
}

enum Slot {
    Loading(Arc<Pending>),
    Ready(Arc<DatasetEntry>),
}

impl Slot {
    fn matches(&self, descriptor: &str, time_tag: &str) -> bool {
        let (d, t) = match self {
            Slot::Loading(p) => (p.descriptor.as_str(), p.time_tag.as_str()),
            Slot::Ready(e) => (e.descriptor(), e.time_tag()),
        };
        d == descriptor && (time_tag.is_empty() || t == time_tag)
    }
}

#[derive(Clone)]
enum Outcome {
    Ready(Arc<DatasetEntry>),
    Failed,
}

/// An in-flight load that other requests can wait on.
struct Pending {
    descriptor: String,
    time_tag: String,
    outcome: Mutex<Option<Outcome>>,
    done: Condvar,
}

impl Pending {
    fn new(descriptor: &str, time_tag: &str) -> Self {
        Self {
            descriptor: descriptor.to_string(),
            time_tag: time_tag.to_string(),
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn resolve(&self, outcome: Outcome) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
        self.done.notify_all();
    }

    /// Block until resolved or `deadline` passes (`None`).
    fn wait_until(&self, deadline: Instant) -> Option<Outcome> {
        let mut guard = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(outcome) = guard.as_ref() {
                return Some(outcome.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            guard = self.done.wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Circular slot array. Occupied slots form one run ending just before `cursor`.
struct Ring {
    slots: Vec<Option<Slot>>,
    cursor: usize,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self { slots: (0..capacity).map(|_| None).collect(), cursor: 0 }
    }

    #[inline]
    fn prev(&self, i: usize) -> usize { (i + self.slots.len() - 1) % self.slots.len() }

    #[inline]
    fn next(&self, i: usize) -> usize { (i + 1) % self.slots.len() }

    /// Scan newest to oldest, stopping at the first empty slot.
    fn find(&self, descriptor: &str, time_tag: &str) -> Option<usize> {
        let mut i = self.cursor;
        for _ in 0..self.slots.len() {
            i = self.prev(i);
            match &self.slots[i] {
                None => return None,
                Some(slot) if slot.matches(descriptor, time_tag) => return Some(i),
                Some(_) => {}
            }
        }
        None
    }

    fn position_of(&self, pending: &Arc<Pending>) -> Option<usize> {
        self.slots.iter().position(|s| matches!(s, Some(Slot::Loading(p)) if Arc::ptr_eq(p, pending)))
    }

    /// Write at the cursor (overwriting the oldest slot when full) and advance.
    fn insert(&mut self, slot: Slot) {
        self.slots[self.cursor] = Some(slot);
        self.cursor = self.next(self.cursor);
    }

    /// Empty slot `idx` and shift the newer entries back over the gap, so the
    /// run stays contiguous and the cursor ends on the freed slot.
    fn remove_at(&mut self, idx: usize) {
        self.slots[idx] = None;
        let (mut i, mut j) = (idx, self.next(idx));
        while j != self.cursor && self.slots[j].is_some() {
            self.slots[i] = self.slots[j].take();
            i = j;
            j = self.next(j);
        }
        self.cursor = i;
    }
}
