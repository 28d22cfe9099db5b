//! Search synchronisation
//!
//! Drives the indexer across every record changed between the last sync
//! checkpoint and the current committed version, writing the results to the
//! search engine through a pool of bulk-submitting workers.
//!
//! ## Crash safety
//!
//! `last_indexed_version` on the status document is the only checkpoint,
//! written once at the very end. Re-running an interrupted sync repeats the
//! unfinished window; per-`{id}:{version}` document ids make the repeats
//! idempotent, and stale copies are deleted before re-emission.
//!
//! ## Worker model
//!
//! One driver streams records (id-ordered) into a bounded queue; N workers
//! pull records, generate ops with their own parser caches, and submit
//! batches of `bulk_size`. Shared mutable state is limited to the queue,
//! two atomic counters, the failure tally, and the first-fatal-error slot.
//! Cancellation is checked at batch boundaries.

use crate::database::SplitgillDatabase;
use crate::locking::LockPurpose;
use crate::stores::BulkSummary;
use parking_lot::{Condvar, Mutex};
use serde_json::json;
use splitgill_core::{FailureCounts, ParsingOptions, Result, SplitgillError, StoredRecord, Version};
use splitgill_index::search::match_all;
use splitgill_index::{generate_index_ops, index_template, BulkOp, ParserCache};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Tuning for one sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Rebuild the whole projection instead of resuming from the checkpoint
    pub resync: bool,
    /// Use the full worker pool; `false` forces a single worker
    pub parallel: bool,
    /// Bulk-submitting worker count
    pub worker_count: usize,
    /// Operations per bulk request
    pub bulk_size: usize,
    /// How long to wait for the sync lock
    pub lock_timeout: Duration,
    /// Retry budget for transient failures
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub retry_base: Duration,
    /// Cooperative cancellation flag, checked at batch boundaries
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            resync: false,
            parallel: true,
            worker_count: 4,
            bulk_size: 500,
            lock_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base: Duration::from_millis(100),
            cancel: None,
        }
    }
}

impl SyncOptions {
    /// A resync from scratch.
    pub fn full_resync() -> Self {
        SyncOptions {
            resync: true,
            ..SyncOptions::default()
        }
    }

    fn effective_workers(&self) -> usize {
        if self.parallel {
            self.worker_count.max(1)
        } else {
            1
        }
    }
}

/// Outcome of a sync run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncResult {
    /// Documents written
    pub indexed: u64,
    /// Documents removed
    pub deleted: u64,
    /// Permanent failures tallied by `"{op}:{reason}"`
    pub failed: FailureCounts,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

pub(crate) fn run_sync(db: &SplitgillDatabase, options: SyncOptions) -> Result<SyncResult> {
    let started = Instant::now();
    let _guard = db
        .locks
        .acquire(&db.name, LockPurpose::Sync, options.lock_timeout)
        .map_err(|error| match error {
            SplitgillError::LockTimeout { .. } => SplitgillError::SyncBusy {
                database: db.name.clone(),
            },
            other => other,
        })?;

    let Some(until) = db.committed_version()? else {
        // nothing has ever been committed
        return Ok(SyncResult {
            elapsed: started.elapsed(),
            ..SyncResult::default()
        });
    };

    let options_range = db.options()?;
    // every state is projected with the current options; the history stays
    // in the store for version-aware clients
    let current_options = options_range.latest();

    // templates and indices exist before anything is written
    db.search
        .put_template(&db.names.template(), &index_template(&db.name, &current_options))?;
    for index in db.names.all() {
        db.search.ensure_index(&index)?;
    }

    let mut since = if options.resync {
        // wipe the archive and the checkpoint so the rebuild starts clean;
        // latest-index documents are replaced by id as they re-emit
        db.search
            .delete_by_query(&db.names.arc_wildcard(), &match_all())?;
        db.documents.update_last_indexed(&db.name, None)?;
        None
    } else {
        db.last_indexed_version()?
    };

    if !options.resync && since.is_some_and(|s| s >= until) {
        debug!(database = %db.name, "search projection already current");
        return Ok(SyncResult {
            elapsed: started.elapsed(),
            ..SyncResult::default()
        });
    }

    // an options change newer than the checkpoint reprojects everything
    if since.is_some()
        && options_range
            .latest_version()
            .is_some_and(|opts_version| Some(opts_version) > since)
    {
        info!(database = %db.name, "options changed since last sync, reprojecting all records");
        since = None;
    }

    info!(
        database = %db.name,
        since = since.map(|v| v.as_millis()),
        until = until.as_millis(),
        workers = options.effective_workers(),
        "sync starting"
    );

    // bulk-friendly settings while the stream runs
    let wildcard = db.names.wildcard();
    db.search.put_settings(
        &wildcard,
        &json!({"index": {"refresh_interval": "-1", "number_of_replicas": 0}}),
    )?;

    let outcome = stream_and_write(db, &options, since, until, &current_options);

    // always restore, whatever happened to the stream
    let restored = db.search.put_settings(
        &wildcard,
        &json!({"index": {"refresh_interval": null, "number_of_replicas": null}}),
    );
    // a stuck refresh/replica setting must never go unreported, even when
    // the sync itself is about to return its own error
    if let Err(error) = &restored {
        warn!(database = %db.name, %error, "failed to restore index settings");
    }

    let (indexed, deleted, failed) = outcome?;
    restored?;

    refresh_with_backoff(db, &wildcard, &options)?;

    // the one checkpoint write: everything at or below `until` is now
    // queryable
    db.documents.update_last_indexed(&db.name, Some(until))?;

    let result = SyncResult {
        indexed,
        deleted,
        failed,
        elapsed: started.elapsed(),
    };
    info!(
        database = %db.name,
        indexed = result.indexed,
        deleted = result.deleted,
        failures = result.failed.values().sum::<u64>(),
        elapsed_ms = result.elapsed.as_millis() as u64,
        "sync finished"
    );
    Ok(result)
}

// ============================================================================
// Worker pool
// ============================================================================

struct Shared {
    queue: Mutex<VecDeque<StoredRecord>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    closed: AtomicBool,
    cancelled: AtomicBool,
    indexed: AtomicU64,
    deleted: AtomicU64,
    failed: Mutex<FailureCounts>,
    fatal: Mutex<Option<SplitgillError>>,
}

impl Shared {
    fn new(capacity: usize) -> Self {
        Shared {
            queue: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            closed: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            indexed: AtomicU64::new(0),
            deleted: AtomicU64::new(0),
            failed: Mutex::new(FailureCounts::new()),
            fatal: Mutex::new(None),
        }
    }

    fn stopping(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || self.fatal.lock().is_some()
    }

    fn push(&self, record: StoredRecord) {
        let mut queue = self.queue.lock();
        while queue.len() >= self.capacity {
            if self.stopping() || self.closed.load(Ordering::Acquire) {
                return;
            }
            let _ = self
                .not_full
                .wait_for(&mut queue, Duration::from_millis(50));
        }
        queue.push_back(record);
        drop(queue);
        self.not_empty.notify_one();
    }

    fn pop(&self) -> Option<StoredRecord> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(record) = queue.pop_front() {
                drop(queue);
                self.not_full.notify_one();
                return Some(record);
            }
            if self.closed.load(Ordering::Acquire) || self.stopping() {
                return None;
            }
            let _ = self
                .not_empty
                .wait_for(&mut queue, Duration::from_millis(50));
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    fn record_fatal(&self, error: SplitgillError) {
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            *fatal = Some(error);
        }
        drop(fatal);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

type StreamTotals = (u64, u64, FailureCounts);

fn stream_and_write(
    db: &SplitgillDatabase,
    options: &SyncOptions,
    since: Option<Version>,
    until: Version,
    parsing: &ParsingOptions,
) -> Result<StreamTotals> {
    let shared = Shared::new(options.effective_workers() * 2);
    let cancel = options.cancel.clone();

    std::thread::scope(|scope| {
        let workers: Vec<_> = (0..options.effective_workers())
            .map(|_| scope.spawn(|| worker_loop(db, &shared, options, since, until, parsing)))
            .collect();

        match db.iter_changed(since, until) {
            Ok(stream) => {
                for record in stream {
                    if shared.stopping() {
                        break;
                    }
                    if let Some(cancel) = &cancel {
                        if cancel.load(Ordering::Acquire) {
                            shared.cancelled.store(true, Ordering::Release);
                            break;
                        }
                    }
                    match record {
                        Ok(record) => shared.push(record),
                        Err(error) => {
                            shared.record_fatal(error);
                            break;
                        }
                    }
                }
            }
            Err(error) => shared.record_fatal(error),
        }

        shared.close();
        for worker in workers {
            let _ = worker.join();
        }
    });

    if let Some(error) = shared.fatal.lock().take() {
        return Err(error);
    }
    if shared.cancelled.load(Ordering::Acquire) {
        return Err(SplitgillError::Cancelled);
    }
    let failed = shared.failed.lock().clone();
    Ok((
        shared.indexed.load(Ordering::Acquire),
        shared.deleted.load(Ordering::Acquire),
        failed,
    ))
}

fn worker_loop(
    db: &SplitgillDatabase,
    shared: &Shared,
    options: &SyncOptions,
    since: Option<Version>,
    until: Version,
    parsing: &ParsingOptions,
) {
    // per-worker cache, so workers never contend on parsing state
    let mut cache = ParserCache::with_default_capacity();
    let mut batch: Vec<BulkOp> = Vec::with_capacity(options.bulk_size);

    while let Some(record) = shared.pop() {
        let ops = match generate_index_ops(&record, since, until, &db.names, parsing, &mut cache) {
            Ok(ops) => ops,
            Err(error) => {
                shared.record_fatal(error);
                return;
            }
        };
        batch.extend(ops);
        if batch.len() >= options.bulk_size {
            if at_batch_boundary_stop(shared, options) {
                return;
            }
            submit_batch(db, shared, options, &mut batch);
            if shared.fatal.lock().is_some() {
                return;
            }
        }
    }

    if !batch.is_empty() && !at_batch_boundary_stop(shared, options) {
        submit_batch(db, shared, options, &mut batch);
    }
}

/// Check the cancellation token, flagging the shared state when tripped.
fn at_batch_boundary_stop(shared: &Shared, options: &SyncOptions) -> bool {
    if let Some(cancel) = &options.cancel {
        if cancel.load(Ordering::Acquire) {
            shared.cancelled.store(true, Ordering::Release);
            return true;
        }
    }
    shared.cancelled.load(Ordering::Acquire)
}

fn submit_batch(
    db: &SplitgillDatabase,
    shared: &Shared,
    options: &SyncOptions,
    batch: &mut Vec<BulkOp>,
) {
    let mut to_send = std::mem::take(batch);
    let mut attempt: u32 = 0;

    loop {
        match db.search.bulk(&to_send) {
            Ok(summary) => {
                shared.indexed.fetch_add(summary.indexed, Ordering::AcqRel);
                shared.deleted.fetch_add(summary.deleted, Ordering::AcqRel);
                let retry = sort_failures(&summary, &to_send, shared, attempt < options.max_retries);
                if retry.is_empty() {
                    return;
                }
                attempt += 1;
                warn!(
                    database = %db.name,
                    retrying = retry.len(),
                    attempt,
                    "transient bulk item failures, retrying"
                );
                std::thread::sleep(backoff_delay(options, attempt));
                to_send = retry;
            }
            Err(error) if error.is_retryable() && attempt < options.max_retries => {
                attempt += 1;
                warn!(database = %db.name, %error, attempt, "bulk request failed, retrying");
                std::thread::sleep(backoff_delay(options, attempt));
            }
            Err(error) => {
                shared.record_fatal(error);
                return;
            }
        }
    }
}

/// Split a summary's failures: transient ones (within budget) are returned
/// for retry, everything else is tallied.
fn sort_failures(
    summary: &BulkSummary,
    sent: &[BulkOp],
    shared: &Shared,
    retries_left: bool,
) -> Vec<BulkOp> {
    if summary.failures.is_empty() {
        return Vec::new();
    }
    let mut retry = Vec::new();
    let mut failed = shared.failed.lock();
    for failure in &summary.failures {
        // a batch can hold a Delete and an Index for the same (index,
        // doc_id), so the op kind has to participate in the match
        let failed_delete = failure.op == "delete";
        let found = sent.iter().find(|op| {
            op.is_delete() == failed_delete
                && op.index() == failure.index
                && op.doc_id() == failure.doc_id
        });
        if failure.transient && retries_left {
            if let Some(op) = found {
                retry.push(op.clone());
                continue;
            }
        }
        *failed
            .entry(format!("{}:{}", failure.op, failure.reason))
            .or_insert(0) += 1;
    }
    retry
}

fn backoff_delay(options: &SyncOptions, attempt: u32) -> Duration {
    options.retry_base * 2u32.saturating_pow(attempt.saturating_sub(1))
}

fn refresh_with_backoff(db: &SplitgillDatabase, pattern: &str, options: &SyncOptions) -> Result<()> {
    let mut attempt: u32 = 0;
    loop {
        match db.search.refresh(pattern) {
            Ok(()) => return Ok(()),
            Err(error) if attempt < options.max_retries => {
                attempt += 1;
                warn!(database = %db.name, %error, attempt, "refresh failed, backing off");
                std::thread::sleep(backoff_delay(options, attempt));
            }
            Err(error) => return Err(error),
        }
    }
}
