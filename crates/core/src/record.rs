//! Record model
//!
//! `Record` is a record before Splitgill manages it; `StoredRecord` is the
//! shape that lives in the document store. A stored record's `data` is the
//! newest committed state, and `diffs` holds the backwards patches keyed by
//! the version each one reconstructs. Pending (uncommitted) data sits in
//! `next` until a commit folds it in.
//!
//! A record is never physically removed: deletion is committing an empty
//! data object, so historical states stay reconstructible.

use crate::diffing::{patch, Diff};
use crate::error::Result;
use crate::options::ParsingOptions;
use crate::value::Value;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A record heading into the store: an id and a data tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// The record's identifier, stable for its whole life
    pub id: String,
    /// The record's data
    pub data: Value,
}

impl Record {
    /// A record with the given id and data.
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Record {
            id: id.into(),
            data,
        }
    }

    /// A record with a generated uuid id.
    pub fn with_generated_id(data: Value) -> Self {
        Record {
            id: Uuid::new_v4().to_string(),
            data,
        }
    }

    /// The deletion tombstone for an id: an empty data object.
    pub fn tombstone(id: impl Into<String>) -> Self {
        Record {
            id: id.into(),
            data: Value::empty(),
        }
    }

    /// True when this record deletes rather than upserts.
    pub fn is_delete(&self) -> bool {
        self.data.is_empty_object()
    }
}

/// A record as held by the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// The record's identifier
    pub id: String,
    /// The newest committed data; empty before first commit
    pub data: Value,
    /// The newest committed version; `None` before first commit
    pub version: Option<Version>,
    /// Backwards diffs keyed by the version each reconstructs
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub diffs: BTreeMap<Version, Diff>,
    /// Uncommitted pending data, folded into `data` at commit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<Value>,
}

impl StoredRecord {
    /// A brand-new stored record: nothing committed, all data pending.
    pub fn pending(id: impl Into<String>, data: Value) -> Self {
        StoredRecord {
            id: id.into(),
            data: Value::empty(),
            version: None,
            diffs: BTreeMap::new(),
            next: Some(data),
        }
    }

    /// True when uncommitted data is staged.
    pub fn has_pending(&self) -> bool {
        self.next.is_some()
    }

    /// True when the newest committed state is a deletion.
    pub fn is_deleted(&self) -> bool {
        self.version.is_some() && self.data.is_empty_object()
    }

    /// All committed versions, descending (newest first).
    pub fn versions(&self) -> Vec<Version> {
        let mut versions: Vec<Version> = Vec::with_capacity(self.diffs.len() + 1);
        versions.extend(self.version);
        versions.extend(self.diffs.keys().rev().copied());
        versions
    }

    /// The committed versions that fall in the half-open window
    /// `(since, until]`, ascending. `since = None` means from the beginning.
    pub fn versions_in(&self, since: Option<Version>, until: Version) -> Vec<Version> {
        let mut versions = self.versions();
        versions.reverse();
        versions.retain(|v| since.map_or(true, |s| *v > s) && *v <= until);
        versions
    }

    /// Every committed `(version, data)` state, descending (newest first),
    /// rebuilt by walking the backwards diff chain from `data`.
    pub fn history(&self) -> Result<Vec<(Version, Value)>> {
        let mut states = Vec::with_capacity(self.diffs.len() + 1);
        let Some(version) = self.version else {
            return Ok(states);
        };
        states.push((version, self.data.clone()));
        for (diff_version, diff) in self.diffs.iter().rev() {
            let older = patch(&states[states.len() - 1].1, diff)?;
            states.push((*diff_version, older));
        }
        Ok(states)
    }

    /// Materialize the record's data at a version: the state with the
    /// largest committed version <= the requested one. `None` if the record
    /// did not exist yet at that version.
    pub fn data_at(&self, version: Version) -> Result<Option<Value>> {
        let Some(current) = self.version else {
            return Ok(None);
        };
        if version >= current {
            return Ok(Some(self.data.clone()));
        }
        let mut state = self.data.clone();
        let mut found = None;
        for (diff_version, diff) in self.diffs.iter().rev() {
            state = patch(&state, diff)?;
            if *diff_version <= version {
                found = Some(state);
                break;
            }
        }
        Ok(found)
    }
}

/// Outcome of an ingest call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestResult {
    /// Records seen for the first time
    pub upserted: u64,
    /// Existing records with staged changes
    pub modified: u64,
    /// Records whose data matched what was already there
    pub same: u64,
    /// The version assigned by the commit, when one happened
    pub version: Option<Version>,
}

/// The per-database status document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseStatus {
    /// The database name
    pub name: String,
    /// The newest committed data/options version
    pub committed_version: Option<Version>,
    /// The sync checkpoint: everything at or below this is in the search
    /// engine
    pub last_indexed_version: Option<Version>,
    /// The version of the newest committed parsing options
    pub options_version: Option<Version>,
    /// The newest committed parsing options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsing_options: Option<ParsingOptions>,
    /// Staged options waiting for the next commit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_options: Option<ParsingOptions>,
}

impl DatabaseStatus {
    /// An empty status for a database with no history.
    pub fn new(name: impl Into<String>) -> Self {
        DatabaseStatus {
            name: name.into(),
            committed_version: None,
            last_indexed_version: None,
            options_version: None,
            parsing_options: None,
            pending_options: None,
        }
    }
}
