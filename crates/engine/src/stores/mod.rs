//! Backing store contracts
//!
//! Splitgill sits on two external systems: a document store holding the
//! authoritative versioned records, and a search engine holding the derived
//! projection. These traits capture exactly the operations the core
//! consumes; the wire protocols behind them are out of scope.
//!
//! `memory` provides in-process implementations of both, used for tests and
//! embedded runs.

pub mod memory;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use splitgill_core::{
    DatabaseStatus, FailureCounts, ParsingOptions, Result, StoredRecord, Version,
};
use splitgill_index::BulkOp;
use std::collections::BTreeMap;

/// A document held in the lock registry collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockDocument {
    /// The lock id, `{database}:{purpose}`
    pub lock_id: String,
    /// Token identifying the current holder
    pub owner: String,
    /// When the holder last proved liveness, epoch millis
    pub acquired_at: Version,
    /// Free-form context recorded with the lock
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// A lazily-consumed, id-ordered stream of records.
pub type RecordStream<'a> = Box<dyn Iterator<Item = Result<StoredRecord>> + Send + 'a>;

/// The operations Splitgill needs from the document store.
///
/// Implementations must be safe under concurrent use. The atomicity
/// granularity assumed is per-call: a `write_records` either lands or
/// errors, and the lock operations are atomic against their `_id`.
pub trait DocumentStore: Send + Sync {
    /// Fetch one record by id.
    fn find_record(&self, database: &str, id: &str) -> Result<Option<StoredRecord>>;

    /// Fetch a batch of records by id; missing ids are simply absent.
    fn find_records(&self, database: &str, ids: &[String]) -> Result<Vec<StoredRecord>>;

    /// Bulk upsert records by id.
    fn write_records(&self, database: &str, records: Vec<StoredRecord>) -> Result<()>;

    /// Physically remove records. Only used to roll back records that were
    /// never committed; committed records are deleted logically.
    fn delete_records(&self, database: &str, ids: &[String]) -> Result<u64>;

    /// Every record with staged uncommitted data.
    fn pending_records(&self, database: &str) -> Result<Vec<StoredRecord>>;

    /// Whether any record has staged uncommitted data.
    fn has_pending(&self, database: &str) -> Result<bool>;

    /// Stream the records with at least one committed version in
    /// `(since, until]`, ordered by record id so interrupted consumers can
    /// resume deterministically.
    fn changed_records(
        &self,
        database: &str,
        since: Option<Version>,
        until: Version,
    ) -> Result<RecordStream<'_>>;

    /// The newest committed version across the database's records.
    fn max_committed_version(&self, database: &str) -> Result<Option<Version>>;

    /// Read the database's status document.
    fn read_status(&self, database: &str) -> Result<Option<DatabaseStatus>>;

    /// Write the database's status document.
    fn write_status(&self, status: &DatabaseStatus) -> Result<()>;

    /// Update only the sync checkpoint on the status document, leaving the
    /// commit-side fields alone. A commit may land while a sync is running
    /// (the two hold different locks), so the checkpoint write must not
    /// replace the whole document.
    fn update_last_indexed(&self, database: &str, version: Option<Version>) -> Result<()>;

    /// Append a committed options change to the options history.
    fn append_options(
        &self,
        database: &str,
        version: Version,
        options: &ParsingOptions,
    ) -> Result<()>;

    /// All committed options changes, any order.
    fn options_history(&self, database: &str) -> Result<Vec<(Version, ParsingOptions)>>;

    /// Atomically insert a lock document; `false` when the id is taken.
    fn insert_lock(&self, lock: &LockDocument) -> Result<bool>;

    /// Read a lock document.
    fn read_lock(&self, lock_id: &str) -> Result<Option<LockDocument>>;

    /// Replace a lock iff it is currently held by `expected_owner` (CAS);
    /// `false` when the owner does not match or the lock vanished.
    fn replace_lock(
        &self,
        lock_id: &str,
        expected_owner: &str,
        replacement: &LockDocument,
    ) -> Result<bool>;

    /// Delete a lock iff held by `owner`; `false` otherwise.
    fn remove_lock(&self, lock_id: &str, owner: &str) -> Result<bool>;

    /// Bump `acquired_at` iff held by `owner`; `false` otherwise.
    fn refresh_lock(&self, lock_id: &str, owner: &str, at: Version) -> Result<bool>;
}

/// One failed item out of a bulk call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFailure {
    /// `"index"` or `"delete"`
    pub op: String,
    /// The index the failing op targeted
    pub index: String,
    /// The document the failure applies to
    pub doc_id: String,
    /// The engine's failure reason, e.g. `mapper_parsing_exception`
    pub reason: String,
    /// Whether retrying this item can succeed (429/503 style)
    pub transient: bool,
}

/// The per-item outcome of one bulk call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkSummary {
    /// Index ops applied
    pub indexed: u64,
    /// Delete ops applied (counting only docs that existed)
    pub deleted: u64,
    /// Items that failed
    pub failures: Vec<BulkFailure>,
}

impl BulkSummary {
    /// Fold this summary's failures into a `"{op}:{reason}"` tally.
    pub fn count_failures_into(&self, counts: &mut FailureCounts) {
        for failure in &self.failures {
            *counts
                .entry(format!("{}:{}", failure.op, failure.reason))
                .or_insert(0) += 1;
        }
    }
}

/// The operations Splitgill needs from the search engine.
///
/// A whole-call `Err` with `is_retryable()` means the request never took
/// effect and can be repeated; per-item failures come back in the
/// `BulkSummary`.
pub trait SearchEngine: Send + Sync {
    /// Create or update an index template.
    fn put_template(&self, name: &str, body: &Json) -> Result<()>;

    /// Create an index if it does not exist.
    fn ensure_index(&self, index: &str) -> Result<()>;

    /// Delete an index if it exists.
    fn delete_index(&self, index: &str) -> Result<()>;

    /// Names of existing indices matching a pattern (`foo-*` or exact).
    fn list_indices(&self, pattern: &str) -> Result<Vec<String>>;

    /// Apply dynamic settings to all indices matching the pattern.
    fn put_settings(&self, pattern: &str, settings: &Json) -> Result<()>;

    /// Apply a batch of operations in order.
    fn bulk(&self, ops: &[BulkOp]) -> Result<BulkSummary>;

    /// Make all writes to matching indices visible to search.
    fn refresh(&self, pattern: &str) -> Result<()>;

    /// Delete every document matching a query; returns how many went.
    fn delete_by_query(&self, pattern: &str, query: &Json) -> Result<u64>;

    /// Count documents matching a query.
    fn count(&self, pattern: &str, query: &Json) -> Result<u64>;

    /// Fetch documents matching a query, up to `limit`.
    fn search(&self, pattern: &str, query: &Json, limit: usize) -> Result<Vec<Json>>;
}
