//! Disk cache of fetched and reprojected datasets, with background size/age expiry.
mod expire;
mod path;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

pub use expire::{
    delete, directory_size, enumerate_cache, expire_dir, flush_files, is_cache_file, safe_delete,
    CacheEndpoint, ExpiryStats, MAX_CACHED_ZOOM,
};
pub use path::{cache_key_dir, normalize_time_tag, DEFAULT_TIME_TAG};

use crate::error::Result;

pub const DEFAULT_MAX_CACHE_SIZE: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_EXPIRE_INTERVAL: Duration = Duration::from_secs(23 * 3600);
pub const DEFAULT_OLDEST_ACCESS: Duration = Duration::from_secs(7 * 24 * 3600);

/// Whether an expiry pass is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Idle,
    Running,
}

#[derive(Debug)]
struct Schedule {
    interval: Duration,
    oldest_access: Duration,
    next_run: SystemTime,
    last_run: Option<SystemTime>,
    shutdown: bool,
}

impl Schedule {
    /// Move `next_run` to the first `base + k * interval` strictly after `now`.
    fn advance_from(&mut self, base: SystemTime, now: SystemTime) {
        let step = self.interval.as_nanos().max(1);
        self.next_run = match now.duration_since(base) {
            Ok(elapsed) => {
                let periods = elapsed.as_nanos() / step + 1;
                base + Duration::from_nanos(u64::try_from(periods * step).unwrap_or(u64::MAX))
            }
            Err(_) => base,
        };
    }
}

struct Shared {
    root: Option<PathBuf>,
    max_size: AtomicU64,
    running: AtomicBool,
    schedule: Mutex<Schedule>,
    wake: Condvar,
    pass: Mutex<()>,
}

struct PassGuard<'a> {
    running: &'a AtomicBool,
    _lock: MutexGuard<'a, ()>,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) { self.running.store(false, Ordering::SeqCst); }
}

impl Shared {
    fn schedule(&self) -> MutexGuard<'_, Schedule> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hold the pass lock and report Running until the guard drops.
    fn begin_pass(&self) -> PassGuard<'_> {
        let lock = self.pass.lock().unwrap_or_else(PoisonError::into_inner);
        self.running.store(true, Ordering::SeqCst);
        PassGuard { running: &self.running, _lock: lock }
    }

    /// One expiry pass over the whole root.
    fn expire(&self, oldest_access: Duration) -> ExpiryStats {
        let Some(root) = &self.root else { return ExpiryStats::default() };
        let _pass = self.begin_pass();
        expire_dir(root, oldest_access, SystemTime::now())
    }

    /// Run when due: measure, expire if over the soft limit, reschedule.
    fn scheduled_pass(&self, oldest_access: Duration) {
        self.scheduled_pass_with(oldest_access, directory_size);
    }

    fn scheduled_pass_with(&self, oldest_access: Duration, measure: impl FnOnce(&Path) -> u64) {
        let Some(root) = &self.root else { return };
        let _pass = self.begin_pass();
        let size_bytes = measure(root);
        let max_bytes = self.max_size.load(Ordering::Relaxed);

        if size_bytes > max_bytes {
            info!(size_bytes, max_bytes, "cache expiry pass starting");
            let stats = expire_dir(root, oldest_access, SystemTime::now());
            info!(
                files_deleted = stats.files_deleted,
                dirs_deleted = stats.dirs_deleted,
                bytes_freed = stats.bytes_freed,
                "cache expiry pass finished"
            );
        } else {
            info!(size_bytes, max_bytes, "cache within limit, nothing to expire");
        }
    }

    fn run_loop(self: Arc<Self>) {
        let mut schedule = self.schedule();
        loop {
            if schedule.shutdown {
                break;
            }
            let now = SystemTime::now();
            match schedule.next_run.duration_since(now) {
                Ok(wait) if !wait.is_zero() => {
                    schedule = self.wake.wait_timeout(schedule, wait).unwrap_or_else(PoisonError::into_inner).0;
                }
                _ => {
                    let oldest_access = schedule.oldest_access;
                    drop(schedule);
                    self.scheduled_pass(oldest_access);

                    schedule = self.schedule();
                    schedule.last_run = Some(now);
                    let base = schedule.next_run;
                    schedule.advance_from(base, SystemTime::now());
                    info!(next_run = ?schedule.next_run, "next cache expiry scheduled");
                }
            }
        }
        debug!("disk cache manager stopped");
    }
}

/// Owns a disk cache root and the background thread that keeps it under
/// its soft size limit.
///
/// The loop sleeps until the next scheduled run or until the schedule is
/// changed. When due and the tree is larger than the limit, it runs an
/// expiry pass (see [`expire_dir`]). Without a root no thread is started and
/// every operation is a no-op.
pub struct DiskCacheManager {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl DiskCacheManager {
    pub fn new(
        root: Option<PathBuf>,
        max_cache_size_bytes: u64,
        expire_base: SystemTime,
        expire_interval: Duration,
        oldest_access: Duration,
    ) -> Result<Self> {
        let mut schedule = Schedule {
            interval: expire_interval.max(Duration::from_secs(1)),
            oldest_access,
            next_run: expire_base,
            last_run: None,
            shutdown: false,
        };
        schedule.advance_from(expire_base, SystemTime::now());

        if let Some(root) = &root {
            std::fs::create_dir_all(root)?;
        }

        let shared = Arc::new(Shared {
            root,
            max_size: AtomicU64::new(max_cache_size_bytes),
            running: AtomicBool::new(false),
            schedule: Mutex::new(schedule),
            wake: Condvar::new(),
            pass: Mutex::new(()),
        });

        let thread = match &shared.root {
            Some(root) => {
                info!(root = %root.display(), max_cache_size_bytes, "disk cache manager started");
                let worker = shared.clone();
                Some(thread::Builder::new().name("disk-cache-expiry".to_string()).spawn(move || worker.run_loop())?)
            }
            None => {
                debug!("no cache directory configured, disk caching disabled");
                None
            }
        };

        Ok(Self { shared, thread: Mutex::new(thread) })
    }

    /// Manager with default limits and schedule, based at now.
    pub fn with_defaults(root: Option<PathBuf>) -> Result<Self> {
        Self::new(root, DEFAULT_MAX_CACHE_SIZE, SystemTime::now(), DEFAULT_EXPIRE_INTERVAL, DEFAULT_OLDEST_ACCESS)
    }

    #[inline] pub fn root(&self) -> Option<&Path> { self.shared.root.as_deref() }

    pub fn state(&self) -> CacheState {
        if self.shared.running.load(Ordering::SeqCst) { CacheState::Running } else { CacheState::Idle }
    }

    pub fn last_run(&self) -> Option<SystemTime> { self.shared.schedule().last_run }

    pub fn next_run(&self) -> SystemTime { self.shared.schedule().next_run }

    pub fn expire_interval(&self) -> Duration { self.shared.schedule().interval }

    pub fn oldest_access(&self) -> Duration { self.shared.schedule().oldest_access }

    pub fn max_cache_size_bytes(&self) -> u64 { self.shared.max_size.load(Ordering::Relaxed) }

    pub fn set_max_cache_size_bytes(&self, bytes: u64) {
        self.shared.max_size.store(bytes, Ordering::Relaxed);
    }

    /// Replace the schedule and wake the loop so it recomputes its sleep.
    /// The next run becomes the first `base + k * interval` after now.
    pub fn initialize_expiry_schedule(&self, base: SystemTime, interval: Duration, oldest_access: Duration) {
        let mut schedule = self.shared.schedule();
        schedule.interval = interval.max(Duration::from_secs(1));
        schedule.oldest_access = oldest_access;
        schedule.advance_from(base, SystemTime::now());
        debug!(next_run = ?schedule.next_run, interval = ?schedule.interval, "expiry schedule updated");
        drop(schedule);
        self.shared.wake.notify_all();
    }

    /// Run one expiry pass now on the calling thread, regardless of size.
    pub fn run_expiry_now(&self) -> ExpiryStats {
        let oldest_access = self.oldest_access();
        let stats = self.shared.expire(oldest_access);
        self.shared.schedule().last_run = Some(SystemTime::now());
        stats
    }

    /// Current total size of the cache tree.
    pub fn cache_size_bytes(&self) -> u64 { self.root().map_or(0, directory_size) }

    pub fn enumerate_cache(&self) -> Vec<CacheEndpoint> { self.root().map_or_else(Vec::new, enumerate_cache) }

    pub fn flush_files(&self) -> ExpiryStats { self.root().map_or_else(ExpiryStats::default, flush_files) }

    /// Remove a subtree; relative paths are taken from the cache root.
    pub fn delete(&self, path: &Path) -> Result<()> {
        let target = match self.root() {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        };
        delete(&target)?;
        Ok(())
    }

    /// Stop the background loop and wait for it. Safe to call twice.
    pub fn shutdown(&self) {
        self.shared.schedule().shutdown = true;
        self.shared.wake.notify_all();
        let handle = self.thread.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.join() {
                warn!("disk cache expiry thread panicked: {e:?}");
            }
        }
    }
}

impl Drop for DiskCacheManager {
    fn drop(&mut self) { self.shutdown(); }
}
