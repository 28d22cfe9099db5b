//! Client and database façade
//!
//! `SplitgillClient` holds the two store handles; `SplitgillDatabase` is the
//! per-database surface: ingest, commit, rollback, reads at any version,
//! options management, search entry points, and sync.
//!
//! ## Ingest/commit discipline
//!
//! Ingest never touches committed state. Each incoming record is compared
//! with the newest committed data and, when it really differs, staged in the
//! record's `next` slot. Commit then promotes every staged record to a
//! single fresh version under the database's commit lock, folding the old
//! state into the backwards diff chain. Nothing is versioned twice and
//! nothing gets a version without going through the lock.

use crate::locking::{LockManager, LockPurpose, DEFAULT_ACQUIRE_TIMEOUT};
use crate::stores::memory::{MemoryDocumentStore, MemorySearchIndex};
use crate::stores::{DocumentStore, RecordStream, SearchEngine};
use crate::sync::{SyncOptions, SyncResult};
use serde_json::{json, Value as Json};
use splitgill_core::{
    check_reserved_keys, diff, prepare, DatabaseStatus, IngestResult, OptionsRange, ParsingOptions,
    PatchOp, PathSeg, Record, Result, SplitgillError, StoredRecord, Value, Version,
};
use splitgill_index::search::version_query;
use splitgill_index::IndexNames;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Records are read and written in batches of this size during ingest.
const INGEST_BATCH_SIZE: usize = 200;

/// Holds the store connections and hands out database façades.
#[derive(Clone)]
pub struct SplitgillClient {
    documents: Arc<dyn DocumentStore>,
    search: Arc<dyn SearchEngine>,
    locks: LockManager,
}

impl SplitgillClient {
    /// A client over the given stores.
    pub fn new(documents: Arc<dyn DocumentStore>, search: Arc<dyn SearchEngine>) -> Self {
        let locks = LockManager::new(documents.clone());
        SplitgillClient {
            documents,
            search,
            locks,
        }
    }

    /// A client over fresh in-memory stores.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemorySearchIndex::new()),
        )
    }

    /// The database façade for a name.
    pub fn database(&self, name: impl Into<String>) -> SplitgillDatabase {
        let name = name.into();
        SplitgillDatabase {
            names: IndexNames::new(name.clone()),
            name,
            documents: self.documents.clone(),
            search: self.search.clone(),
            locks: self.locks.clone(),
            commit_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }

    /// The underlying document store.
    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    /// The underlying search engine.
    pub fn search_engine(&self) -> &Arc<dyn SearchEngine> {
        &self.search
    }
}

/// One managed set of versioned records.
pub struct SplitgillDatabase {
    pub(crate) name: String,
    pub(crate) documents: Arc<dyn DocumentStore>,
    pub(crate) search: Arc<dyn SearchEngine>,
    pub(crate) locks: LockManager,
    pub(crate) names: IndexNames,
    commit_timeout: Duration,
}

impl SplitgillDatabase {
    /// The database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The index names this database projects into.
    pub fn index_names(&self) -> &IndexNames {
        &self.names
    }

    /// Override the commit lock timeout.
    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    // ========================================================================
    // Ingest
    // ========================================================================

    /// Ingest a batch of records, staging the real changes and optionally
    /// committing them as one new version.
    ///
    /// `modified_field` names a volatile top-level field: an update whose
    /// only difference from the committed state sits in that field does not
    /// count as a change.
    pub fn ingest<I>(
        &self,
        records: I,
        commit: bool,
        modified_field: Option<&str>,
    ) -> Result<IngestResult>
    where
        I: IntoIterator<Item = Record>,
    {
        let mut result = IngestResult::default();
        let mut records = records.into_iter();
        loop {
            let chunk: Vec<Record> = records.by_ref().take(INGEST_BATCH_SIZE).collect();
            if chunk.is_empty() {
                break;
            }
            self.ingest_chunk(chunk, modified_field, &mut result)?;
        }
        if commit {
            result.version = self.commit()?;
        }
        debug!(
            database = %self.name,
            upserted = result.upserted,
            modified = result.modified,
            same = result.same,
            "ingest finished"
        );
        Ok(result)
    }

    fn ingest_chunk(
        &self,
        chunk: Vec<Record>,
        modified_field: Option<&str>,
        result: &mut IngestResult,
    ) -> Result<()> {
        // the last occurrence of a duplicated id wins within a batch
        let mut by_id: BTreeMap<String, Record> = BTreeMap::new();
        for record in chunk {
            if record.id.is_empty() {
                return Err(SplitgillError::validation("record id cannot be empty"));
            }
            check_reserved_keys(&record.data)?;
            by_id.insert(record.id.clone(), record);
        }

        let ids: Vec<String> = by_id.keys().cloned().collect();
        let existing: BTreeMap<String, StoredRecord> = self
            .documents
            .find_records(&self.name, &ids)?
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();

        let mut writes = Vec::new();
        let mut removals = Vec::new();

        for (id, record) in by_id {
            let data = prepare(record.data);
            let Some(current) = existing.get(&id) else {
                if data.is_empty_object() {
                    // deleting something that never existed is a no-op
                    continue;
                }
                writes.push(StoredRecord::pending(id, data));
                result.upserted += 1;
                continue;
            };

            let mut updated = current.clone();
            if current.version.is_none() {
                // never committed: the staged data is all there is
                if data.is_empty_object() {
                    removals.push(id);
                    result.modified += 1;
                } else if current.next.as_ref() == Some(&data) {
                    result.same += 1;
                } else {
                    updated.next = Some(data);
                    writes.push(updated);
                    result.modified += 1;
                }
                continue;
            }

            let changes = diff(&current.data, &data);
            if changes.is_empty() {
                // matches the committed state; drop any stale staging
                if current.next.is_some() {
                    updated.next = None;
                    writes.push(updated);
                }
                result.same += 1;
                continue;
            }
            if let Some(field) = modified_field {
                if only_touches_field(&changes, field) {
                    result.same += 1;
                    continue;
                }
            }
            if current.next.as_ref() == Some(&data) {
                // identical data is already staged
                result.same += 1;
                continue;
            }
            updated.next = Some(data);
            writes.push(updated);
            result.modified += 1;
        }

        if !writes.is_empty() {
            self.documents.write_records(&self.name, writes)?;
        }
        if !removals.is_empty() {
            self.documents.delete_records(&self.name, &removals)?;
        }
        Ok(())
    }

    // ========================================================================
    // Commit / rollback
    // ========================================================================

    /// Promote all staged changes (records and options) to one new version.
    ///
    /// Returns the assigned version, or `None` when nothing was staged.
    /// Fails with `CommitConflict` when the commit lock cannot be acquired
    /// in time.
    pub fn commit(&self) -> Result<Option<Version>> {
        let _guard = self
            .locks
            .acquire(&self.name, LockPurpose::Commit, self.commit_timeout)
            .map_err(|error| match error {
                SplitgillError::LockTimeout { .. } => SplitgillError::CommitConflict {
                    database: self.name.clone(),
                },
                other => other,
            })?;
        self.commit_locked()
    }

    fn commit_locked(&self) -> Result<Option<Version>> {
        let mut status = self
            .documents
            .read_status(&self.name)?
            .unwrap_or_else(|| DatabaseStatus::new(&self.name));
        let pending = self.documents.pending_records(&self.name)?;

        if pending.is_empty() && status.pending_options.is_none() {
            return Ok(None);
        }

        // the first data commit of a database gets concrete options, so the
        // projection never has to guess what it was parsed with
        if !pending.is_empty()
            && status.parsing_options.is_none()
            && status.pending_options.is_none()
        {
            status.pending_options = Some(ParsingOptions::default());
        }

        let previous = match status.committed_version {
            Some(version) => Some(version),
            None => self.documents.max_committed_version(&self.name)?,
        };
        let version = Version::next_after(previous);

        let mut writes = Vec::new();
        let mut data_changed = false;
        for mut record in pending {
            let Some(next_data) = record.next.take() else {
                continue;
            };
            if let Some(previous_version) = record.version {
                let backwards = diff(&next_data, &record.data);
                if backwards.is_empty() {
                    // staged data turned out identical; just clear it
                    writes.push(record);
                    continue;
                }
                record.diffs.insert(previous_version, backwards);
            }
            record.data = next_data;
            record.version = Some(version);
            data_changed = true;
            writes.push(record);
        }

        let mut options_changed = false;
        if let Some(options) = status.pending_options.take() {
            if status.parsing_options.as_ref() != Some(&options) {
                self.documents.append_options(&self.name, version, &options)?;
                status.options_version = Some(version);
                status.parsing_options = Some(options);
                options_changed = true;
            }
        }

        if !writes.is_empty() {
            self.documents.write_records(&self.name, writes)?;
        }
        if !data_changed && !options_changed {
            self.documents.write_status(&status)?;
            return Ok(None);
        }

        status.committed_version = Some(version);
        self.documents.write_status(&status)?;
        info!(database = %self.name, %version, "committed");
        Ok(Some(version))
    }

    /// Discard every staged change: pending records revert (new records
    /// disappear entirely) and staged options are dropped. Returns how many
    /// records were touched.
    pub fn rollback_uncommitted(&self) -> Result<u64> {
        let pending = self.documents.pending_records(&self.name)?;
        let mut removals = Vec::new();
        let mut writes = Vec::new();
        for mut record in pending {
            if record.version.is_none() {
                removals.push(record.id);
            } else {
                record.next = None;
                writes.push(record);
            }
        }
        let touched = (removals.len() + writes.len()) as u64;
        if !writes.is_empty() {
            self.documents.write_records(&self.name, writes)?;
        }
        if !removals.is_empty() {
            self.documents.delete_records(&self.name, &removals)?;
        }
        if let Some(mut status) = self.documents.read_status(&self.name)? {
            if status.pending_options.take().is_some() {
                self.documents.write_status(&status)?;
            }
        }
        Ok(touched)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// The record's data at a version (default: the newest committed state).
    /// `None` when the record does not exist, or did not exist yet at the
    /// requested version. A deleted record reads as the empty object.
    pub fn get(&self, id: &str, version: Option<Version>) -> Result<Option<Value>> {
        let Some(record) = self.documents.find_record(&self.name, id)? else {
            return Ok(None);
        };
        match version {
            None => Ok(record.version.map(|_| record.data)),
            Some(version) => record.data_at(version),
        }
    }

    /// The full stored record, diff chain included.
    pub fn get_record(&self, id: &str) -> Result<Option<StoredRecord>> {
        self.documents.find_record(&self.name, id)
    }

    /// Stream the records changed in `(since, until]`, ordered by id so a
    /// restarted consumer resumes deterministically.
    pub fn iter_changed(
        &self,
        since: Option<Version>,
        until: Version,
    ) -> Result<RecordStream<'_>> {
        self.documents.changed_records(&self.name, since, until)
    }

    /// The newest committed version, data or options.
    pub fn committed_version(&self) -> Result<Option<Version>> {
        match self.documents.read_status(&self.name)? {
            Some(status) => Ok(status.committed_version),
            None => self.documents.max_committed_version(&self.name),
        }
    }

    /// The sync checkpoint.
    pub fn last_indexed_version(&self) -> Result<Option<Version>> {
        Ok(self
            .documents
            .read_status(&self.name)?
            .and_then(|status| status.last_indexed_version))
    }

    /// Whether any record or options change is staged.
    pub fn has_uncommitted(&self) -> Result<bool> {
        if self.documents.has_pending(&self.name)? {
            return Ok(true);
        }
        Ok(self
            .documents
            .read_status(&self.name)?
            .map(|status| status.pending_options.is_some())
            .unwrap_or(false))
    }

    // ========================================================================
    // Options
    // ========================================================================

    /// Every committed options version.
    pub fn options(&self) -> Result<OptionsRange> {
        Ok(OptionsRange::new(
            self.documents.options_history(&self.name)?,
        ))
    }

    /// Stage new parsing options, optionally committing straight away.
    /// Staging identical options is a no-op.
    pub fn update_options(
        &self,
        options: ParsingOptions,
        commit: bool,
    ) -> Result<Option<Version>> {
        let mut status = self
            .documents
            .read_status(&self.name)?
            .unwrap_or_else(|| DatabaseStatus::new(&self.name));
        if status.parsing_options.as_ref() == Some(&options) {
            // discard any staged change that this call supersedes
            if status.pending_options.take().is_some() {
                self.documents.write_status(&status)?;
            }
            return Ok(None);
        }
        status.pending_options = Some(options);
        self.documents.write_status(&status)?;
        if commit {
            self.commit()
        } else {
            Ok(None)
        }
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// The index pattern and extra filter for a search at a version.
    /// `None` targets the latest index with no filter; a version targets
    /// every index with a `versions` containment filter.
    pub fn search_target(&self, version: Option<Version>) -> (String, Option<Json>) {
        match version {
            None => (self.names.latest(), None),
            Some(version) => (self.names.wildcard(), Some(version_query(version))),
        }
    }

    /// Count documents matching a query, at the latest state or at a
    /// historical version.
    pub fn count(&self, query: &Json, version: Option<Version>) -> Result<u64> {
        let (pattern, filter) = self.search_target(version);
        self.search.count(&pattern, &combine(query, filter))
    }

    /// Fetch documents matching a query, at the latest state or at a
    /// historical version.
    pub fn search(&self, query: &Json, version: Option<Version>, limit: usize) -> Result<Vec<Json>> {
        let (pattern, filter) = self.search_target(version);
        self.search.search(&pattern, &combine(query, filter), limit)
    }

    // ========================================================================
    // Sync
    // ========================================================================

    /// Project committed history into the search engine. See `SyncOptions`.
    pub fn sync(&self, options: SyncOptions) -> Result<SyncResult> {
        crate::sync::run_sync(self, options)
    }
}

fn combine(query: &Json, filter: Option<Json>) -> Json {
    match filter {
        None => query.clone(),
        Some(filter) => json!({"bool": {"filter": [query.clone(), filter]}}),
    }
}

/// True when every op in a diff touches only the given top-level field.
fn only_touches_field(changes: &[PatchOp], field: &str) -> bool {
    changes.iter().all(|op| {
        matches!(op.path().first(), Some(PathSeg::Key(key)) if key == field)
    })
}
