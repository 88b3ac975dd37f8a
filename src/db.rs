//! # Public embeddable database facade
//!
//! [`Db`] wraps the synchronous [`Engine`](crate::engine::Engine) with a
//! small background thread pool that drives flush and compaction work off
//! the caller's hot path. Application code only ever sees [`Db`],
//! [`DbConfig`], and [`DbError`] — the `engine`/`memtable`/`sstable`/`wal`/
//! `manifest`/`compaction` modules remain available for embedders who want
//! the lower-level, fully synchronous API.
//!
//! ## Background automation
//!
//! Every [`Db::put`], [`Db::delete`], and [`Db::delete_range`] call that
//! causes the active memtable to freeze pushes a flush job onto an internal
//! work queue served by [`DbConfig::thread_pool_size`] worker threads. A
//! flush job runs [`Engine::flush_oldest_frozen`] and, once it completes,
//! wakes a separate [`Scheduler`]-driven compaction worker that opportunistically
//! tries [`Engine::minor_compact`] and [`Engine::tombstone_compact`] so that
//! SSTables and tombstones don't pile up between explicit
//! [`Db::major_compact`] calls. That same worker also ticks on a fixed
//! [`DbConfig::compaction_interval_ms`] timer, so compaction still makes
//! progress even during a lull in writes.
//!
//! ## Shutdown
//!
//! [`Db::close`] is safe to call more than once. Dropping a [`Db`] without
//! calling `close` first still shuts the worker pool down and checkpoints
//! the engine, so data is never lost — `close` only exists to surface I/O
//! errors from the final checkpoint to the caller.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;

use crate::compaction::CompactionStrategyType;
use crate::engine::{Engine, EngineConfig, EngineError};
use crate::scheduler::{Scheduler, SchedulerHandle};
use crate::wal::WalSyncModeKind;

const MIN_WRITE_BUFFER_SIZE: usize = 1024;
const MAX_WRITE_BUFFER_SIZE: usize = 256 * 1024 * 1024;
const MIN_COMPACTION_THRESHOLD: usize = 2;
const MAX_COMPACTION_THRESHOLD: usize = 256;
const MAX_TOMBSTONE_COMPACTION_INTERVAL: usize = 604_800;
const MIN_THREAD_POOL_SIZE: usize = 1;
const MAX_THREAD_POOL_SIZE: usize = 32;
const MIN_LEVEL_COUNT: u32 = 1;
const MAX_LEVEL_COUNT: u32 = 32;
const MIN_LEVEL_SIZE_RATIO: u64 = 2;
const MIN_COMPACTION_INTERVAL_MS: u64 = 100;
const MAX_COMPACTION_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;
const MIN_BLOOM_FP_RATE: f64 = 0.0001;
const MAX_BLOOM_FP_RATE: f64 = 0.5;
const MIN_WAL_GROUP_COMMIT_SIZE: u32 = 1;
const MAX_WAL_GROUP_COMMIT_SIZE: u32 = 100_000;
const MAX_WAL_GROUP_COMMIT_INTERVAL_MS: u64 = 60_000;
const MIN_WAL_SEGMENT_MAX_BYTES: u64 = 64 * 1024;

/// Configuration for a [`Db`] instance.
///
/// Exposes the knobs embedders are expected to tune; everything else is
/// fixed at sensible defaults (bucket sizing, bloom fallback behavior, and
/// so on — see [`EngineConfig`] for the full set available to lower-level
/// callers).
#[derive(Debug, Clone, Copy)]
pub struct DbConfig {
    /// Max memtable size (bytes) before it is frozen and queued for flush.
    ///
    /// Must be in `[1024, 256 MiB]`.
    pub write_buffer_size: usize,

    /// Minimum number of similarly-sized SSTables needed to trigger a
    /// background minor compaction.
    ///
    /// Must be in `[2, 64]`.
    pub min_compaction_threshold: usize,

    /// Maximum number of SSTables merged in a single minor compaction.
    ///
    /// Must be in `[min_compaction_threshold, 256]`.
    pub max_compaction_threshold: usize,

    /// Fraction of tombstones (vs. total records) an SSTable needs before
    /// it becomes eligible for background tombstone compaction.
    ///
    /// Must be in `(0.0, 1.0]`.
    pub tombstone_compaction_ratio: f64,

    /// Minimum SSTable age (seconds) before it is eligible for tombstone
    /// compaction.
    ///
    /// Must be in `[0, 604800]` (7 days).
    pub tombstone_compaction_interval: usize,

    /// Number of background worker threads servicing flush/compaction jobs.
    ///
    /// Must be in `[1, 32]`.
    pub thread_pool_size: usize,

    /// Which compaction family governs minor/major compaction.
    ///
    /// Tombstone GC always runs regardless of this choice.
    pub compaction_strategy: CompactionStrategyType,

    /// Number of LSM levels used by leveled/hybrid compaction. Ignored by
    /// pure size-tiered.
    ///
    /// Must be in `[1, 32]`.
    pub level_count: u32,

    /// Per-level size budget multiplier for leveled/hybrid compaction:
    /// `B(L) = base_level_size_bytes * level_size_ratio^L`.
    ///
    /// Must be `>= 2`.
    pub level_size_ratio: u64,

    /// Size budget (bytes) for level 0 under leveled/hybrid compaction.
    pub base_level_size_bytes: u64,

    /// How often the background compaction worker wakes on its own
    /// (independent of flush-driven wakeups) to check for compactable
    /// SSTables, in milliseconds.
    ///
    /// Must be in `[100, 86400000]` (24 hours).
    pub compaction_interval_ms: u64,

    /// Target false-positive rate for SSTable bloom filters.
    ///
    /// Must be in `[0.0001, 0.5]`.
    pub bloom_fp_rate: f64,

    /// Durability/throughput tradeoff for the active WAL: `sync` fsyncs
    /// every write, `group` batches writes, `async` never fsyncs on
    /// append.
    pub wal_sync_mode: WalSyncModeKind,

    /// Number of appends between `fsync`s under `WalSyncModeKind::Group`.
    ///
    /// Must be in `[1, 100000]`.
    pub wal_group_commit_size: u32,

    /// Maximum time (ms) an unsynced append may wait before being flushed
    /// under `WalSyncModeKind::Group`.
    ///
    /// Must be in `[0, 60000]`.
    pub wal_group_commit_interval_ms: u64,

    /// Active WAL segment size (bytes) past which the engine rotates to a
    /// new segment. `0` disables size-based rotation.
    ///
    /// Must be `0` or `>= 65536`.
    pub wal_segment_max_bytes: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            write_buffer_size: 4 * 1024 * 1024,
            min_compaction_threshold: 4,
            max_compaction_threshold: 32,
            tombstone_compaction_ratio: 0.2,
            tombstone_compaction_interval: 3600,
            compaction_strategy: CompactionStrategyType::SizeTiered,
            thread_pool_size: 4,
            level_count: 7,
            level_size_ratio: 10,
            base_level_size_bytes: 10 * 1024 * 1024,
            compaction_interval_ms: 60_000,
            bloom_fp_rate: 0.01,
            wal_sync_mode: WalSyncModeKind::Sync,
            wal_group_commit_size: 64,
            wal_group_commit_interval_ms: 5,
            wal_segment_max_bytes: 64 * 1024 * 1024,
        }
    }
}

impl DbConfig {
    fn validate(&self) -> Result<(), DbError> {
        if !(MIN_WRITE_BUFFER_SIZE..=MAX_WRITE_BUFFER_SIZE).contains(&self.write_buffer_size) {
            return Err(DbError::InvalidConfig(format!(
                "write_buffer_size must be in [{MIN_WRITE_BUFFER_SIZE}, {MAX_WRITE_BUFFER_SIZE}], got {}",
                self.write_buffer_size
            )));
        }
        if !(MIN_COMPACTION_THRESHOLD..=MAX_COMPACTION_THRESHOLD)
            .contains(&self.min_compaction_threshold)
        {
            return Err(DbError::InvalidConfig(format!(
                "min_compaction_threshold must be in [{MIN_COMPACTION_THRESHOLD}, {MAX_COMPACTION_THRESHOLD}], got {}",
                self.min_compaction_threshold
            )));
        }
        if self.max_compaction_threshold > MAX_COMPACTION_THRESHOLD {
            return Err(DbError::InvalidConfig(format!(
                "max_compaction_threshold must be <= {MAX_COMPACTION_THRESHOLD}, got {}",
                self.max_compaction_threshold
            )));
        }
        if self.max_compaction_threshold < self.min_compaction_threshold {
            return Err(DbError::InvalidConfig(format!(
                "max_compaction_threshold ({}) must be >= min_compaction_threshold ({})",
                self.max_compaction_threshold, self.min_compaction_threshold
            )));
        }
        if !(self.tombstone_compaction_ratio > 0.0 && self.tombstone_compaction_ratio <= 1.0) {
            return Err(DbError::InvalidConfig(format!(
                "tombstone_compaction_ratio must be in (0.0, 1.0], got {}",
                self.tombstone_compaction_ratio
            )));
        }
        if self.tombstone_compaction_interval > MAX_TOMBSTONE_COMPACTION_INTERVAL {
            return Err(DbError::InvalidConfig(format!(
                "tombstone_compaction_interval must be <= {MAX_TOMBSTONE_COMPACTION_INTERVAL}, got {}",
                self.tombstone_compaction_interval
            )));
        }
        if !(MIN_THREAD_POOL_SIZE..=MAX_THREAD_POOL_SIZE).contains(&self.thread_pool_size) {
            return Err(DbError::InvalidConfig(format!(
                "thread_pool_size must be in [{MIN_THREAD_POOL_SIZE}, {MAX_THREAD_POOL_SIZE}], got {}",
                self.thread_pool_size
            )));
        }
        if !(MIN_LEVEL_COUNT..=MAX_LEVEL_COUNT).contains(&self.level_count) {
            return Err(DbError::InvalidConfig(format!(
                "level_count must be in [{MIN_LEVEL_COUNT}, {MAX_LEVEL_COUNT}], got {}",
                self.level_count
            )));
        }
        if self.level_size_ratio < MIN_LEVEL_SIZE_RATIO {
            return Err(DbError::InvalidConfig(format!(
                "level_size_ratio must be >= {MIN_LEVEL_SIZE_RATIO}, got {}",
                self.level_size_ratio
            )));
        }
        if self.base_level_size_bytes == 0 {
            return Err(DbError::InvalidConfig(
                "base_level_size_bytes must be > 0".into(),
            ));
        }
        if !(MIN_COMPACTION_INTERVAL_MS..=MAX_COMPACTION_INTERVAL_MS)
            .contains(&self.compaction_interval_ms)
        {
            return Err(DbError::InvalidConfig(format!(
                "compaction_interval_ms must be in [{MIN_COMPACTION_INTERVAL_MS}, {MAX_COMPACTION_INTERVAL_MS}], got {}",
                self.compaction_interval_ms
            )));
        }
        if !(MIN_BLOOM_FP_RATE..=MAX_BLOOM_FP_RATE).contains(&self.bloom_fp_rate) {
            return Err(DbError::InvalidConfig(format!(
                "bloom_fp_rate must be in [{MIN_BLOOM_FP_RATE}, {MAX_BLOOM_FP_RATE}], got {}",
                self.bloom_fp_rate
            )));
        }
        if !(MIN_WAL_GROUP_COMMIT_SIZE..=MAX_WAL_GROUP_COMMIT_SIZE)
            .contains(&self.wal_group_commit_size)
        {
            return Err(DbError::InvalidConfig(format!(
                "wal_group_commit_size must be in [{MIN_WAL_GROUP_COMMIT_SIZE}, {MAX_WAL_GROUP_COMMIT_SIZE}], got {}",
                self.wal_group_commit_size
            )));
        }
        if self.wal_group_commit_interval_ms > MAX_WAL_GROUP_COMMIT_INTERVAL_MS {
            return Err(DbError::InvalidConfig(format!(
                "wal_group_commit_interval_ms must be <= {MAX_WAL_GROUP_COMMIT_INTERVAL_MS}, got {}",
                self.wal_group_commit_interval_ms
            )));
        }
        if self.wal_segment_max_bytes != 0 && self.wal_segment_max_bytes < MIN_WAL_SEGMENT_MAX_BYTES
        {
            return Err(DbError::InvalidConfig(format!(
                "wal_segment_max_bytes must be 0 or >= {MIN_WAL_SEGMENT_MAX_BYTES}, got {}",
                self.wal_segment_max_bytes
            )));
        }
        Ok(())
    }

    fn to_engine_config(self) -> EngineConfig {
        EngineConfig {
            write_buffer_size: self.write_buffer_size,
            compaction_strategy: self.compaction_strategy,
            bucket_low: 0.5,
            bucket_high: 1.5,
            min_sstable_size: 1024,
            min_threshold: self.min_compaction_threshold,
            max_threshold: self.max_compaction_threshold,
            tombstone_ratio_threshold: self.tombstone_compaction_ratio,
            tombstone_compaction_interval: self.tombstone_compaction_interval,
            tombstone_bloom_fallback: true,
            tombstone_range_drop: true,
            thread_pool_size: self.thread_pool_size,
            level_count: self.level_count,
            level_size_ratio: self.level_size_ratio,
            base_level_size_bytes: self.base_level_size_bytes,
            bloom_fp_rate: self.bloom_fp_rate,
            wal_sync_mode: self.wal_sync_mode,
            wal_group_commit_size: self.wal_group_commit_size,
            wal_group_commit_interval_ms: self.wal_group_commit_interval_ms,
            wal_segment_max_bytes: self.wal_segment_max_bytes,
        }
    }
}

/// Errors returned by [`Db`] operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// A `DbConfig` field was outside its accepted range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A call argument violated a precondition (empty key, empty range, etc).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The database has already been closed.
    #[error("database is closed")]
    Closed,

    /// Error surfaced by the underlying storage engine.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// A unit of background work: flush the oldest frozen memtable, then
/// opportunistically compact.
enum Job {
    Flush,
    Shutdown,
}

/// An embeddable, persistent key-value database.
///
/// `Db` is cheap to share: every public method takes `&self`, so wrapping
/// it in an `Arc<Db>` and handing clones to multiple threads is the
/// supported usage pattern (the underlying [`Engine`] is itself built on
/// an `Arc<RwLock<_>>`).
pub struct Db {
    engine: Engine,
    closed: AtomicBool,
    job_tx: crossbeam::channel::Sender<Job>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
    compaction_scheduler: std::sync::Mutex<Scheduler>,
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Db {
    /// Opens (or creates) a database rooted at `path`.
    ///
    /// Validates `config`, then delegates to [`Engine::open`] for crash
    /// recovery (manifest replay, WAL replay, SSTable loading), and starts
    /// `config.thread_pool_size` background workers.
    pub fn open(path: impl AsRef<Path>, config: DbConfig) -> Result<Self, DbError> {
        config.validate()?;

        let engine = Engine::open(path, config.to_engine_config())?;

        let compaction_engine = engine.clone();
        let compaction_scheduler = Scheduler::start(
            "aeternusdb-compaction",
            Duration::from_millis(config.compaction_interval_ms),
            move || {
                if let Err(err) = Self::run_compaction_tick(&compaction_engine) {
                    tracing::warn!(error = %err, "background compaction tick failed");
                }
            },
        );
        let compaction_handle = compaction_scheduler.handle();

        let (job_tx, job_rx) = crossbeam::channel::unbounded::<Job>();
        let mut workers = Vec::with_capacity(config.thread_pool_size);
        for worker_id in 0..config.thread_pool_size {
            let worker_engine = engine.clone();
            let job_rx = job_rx.clone();
            let worker_compaction_handle = compaction_handle.clone();
            workers.push(
                std::thread::Builder::new()
                    .name(format!("aeternusdb-worker-{worker_id}"))
                    .spawn(move || Self::worker_loop(worker_engine, job_rx, worker_compaction_handle))
                    .expect("failed to spawn background worker thread"),
            );
        }

        Ok(Self {
            engine,
            closed: AtomicBool::new(false),
            job_tx,
            workers: std::sync::Mutex::new(workers),
            compaction_scheduler: std::sync::Mutex::new(compaction_scheduler),
        })
    }

    fn worker_loop(
        engine: Engine,
        job_rx: crossbeam::channel::Receiver<Job>,
        compaction_handle: SchedulerHandle,
    ) {
        for job in job_rx {
            match job {
                Job::Shutdown => break,
                Job::Flush => {
                    match Self::run_flush_cycle(&engine) {
                        Ok(()) => compaction_handle.notify(),
                        Err(err) => tracing::warn!(error = %err, "background flush cycle failed"),
                    }
                }
            }
        }
    }

    /// Flush every queued frozen memtable. Compaction itself is left to
    /// the scheduler's compaction worker, woken below once flushing is
    /// done.
    fn run_flush_cycle(engine: &Engine) -> Result<(), EngineError> {
        while engine.flush_oldest_frozen()? {}
        Ok(())
    }

    /// One compaction worker tick: opportunistically run minor and
    /// tombstone compaction. Runs on the scheduler's own thread, either
    /// woken by a flush completing or by the periodic interval timer.
    fn run_compaction_tick(engine: &Engine) -> Result<(), EngineError> {
        let _ = engine.minor_compact()?;
        let _ = engine.tombstone_compact()?;
        Ok(())
    }

    fn schedule_flush(&self) {
        // The channel is unbounded and workers tolerate redundant jobs
        // (flush_oldest_frozen is a no-op once nothing is frozen), so a
        // best-effort send is enough; a closed db simply drops the job.
        let _ = self.job_tx.send(Job::Flush);
    }

    fn check_closed(&self) -> Result<(), DbError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(DbError::Closed)
        } else {
            Ok(())
        }
    }

    /// Inserts or updates a key-value pair.
    ///
    /// Both `key` and `value` must be non-empty.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        self.check_closed()?;
        if key.is_empty() {
            return Err(DbError::InvalidArgument("key must not be empty".into()));
        }
        if value.is_empty() {
            return Err(DbError::InvalidArgument("value must not be empty".into()));
        }

        if self.engine.put(key.to_vec(), value.to_vec())? {
            self.schedule_flush();
        }
        Ok(())
    }

    /// Looks up a single key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        self.check_closed()?;
        if key.is_empty() {
            return Err(DbError::InvalidArgument("key must not be empty".into()));
        }
        Ok(self.engine.get(key.to_vec())?)
    }

    /// Deletes a key (inserts a point tombstone).
    pub fn delete(&self, key: &[u8]) -> Result<(), DbError> {
        self.check_closed()?;
        if key.is_empty() {
            return Err(DbError::InvalidArgument("key must not be empty".into()));
        }

        if self.engine.delete(key.to_vec())? {
            self.schedule_flush();
        }
        Ok(())
    }

    /// Deletes every key in `[start, end)` (inserts a range tombstone).
    ///
    /// `start` and `end` must both be non-empty and `start < end`.
    pub fn delete_range(&self, start: &[u8], end: &[u8]) -> Result<(), DbError> {
        self.check_closed()?;
        if start.is_empty() || end.is_empty() {
            return Err(DbError::InvalidArgument(
                "delete_range bounds must not be empty".into(),
            ));
        }
        if start >= end {
            return Err(DbError::InvalidArgument(
                "delete_range start must be < end".into(),
            ));
        }

        if self.engine.delete_range(start.to_vec(), end.to_vec())? {
            self.schedule_flush();
        }
        Ok(())
    }

    /// Returns every live key-value pair in `[start, end)`, in sorted order.
    ///
    /// `start` and `end` must both be non-empty. `start == end` is allowed
    /// and returns an empty result, matching an empty half-open range.
    pub fn scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, DbError> {
        self.check_closed()?;
        if start.is_empty() || end.is_empty() {
            return Err(DbError::InvalidArgument(
                "scan bounds must not be empty".into(),
            ));
        }
        if start >= end {
            return Ok(Vec::new());
        }

        Ok(self.engine.scan(start, end)?.collect())
    }

    /// Merges every SSTable into one, applying all tombstones.
    ///
    /// Returns `Ok(true)` if a compaction actually ran, `Ok(false)` if there
    /// was nothing to compact (fewer than two SSTables on disk).
    pub fn major_compact(&self) -> Result<bool, DbError> {
        self.check_closed()?;
        Ok(self.engine.major_compact()?)
    }

    fn shutdown_pool(&self) {
        let mut workers = match self.workers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for _ in workers.iter() {
            let _ = self.job_tx.send(Job::Shutdown);
        }
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    /// Shuts down the background worker pool and checkpoints the engine.
    ///
    /// Safe to call multiple times — subsequent calls are no-ops that
    /// return `Ok(())`. Every other method returns [`DbError::Closed`]
    /// once `close` has been called.
    pub fn close(&self) -> Result<(), DbError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.shutdown_pool();
        self.shutdown_compaction_scheduler();
        self.engine.close()?;
        Ok(())
    }

    fn shutdown_compaction_scheduler(&self) {
        let mut scheduler = match self.compaction_scheduler.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        scheduler.shutdown();
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown_pool();
        self.shutdown_compaction_scheduler();
        if let Err(err) = self.engine.close() {
            tracing::warn!(error = %err, "engine close failed during drop");
        }
    }
}
