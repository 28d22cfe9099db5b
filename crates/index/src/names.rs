//! Index name resolution
//!
//! Each database projects into one `latest` index holding the current state
//! of every record, plus a fixed set of archive ("arc") indices holding
//! historical states. A record's historical states always land in the same
//! arc, chosen by a stable hash of its id, so re-syncs overwrite rather than
//! duplicate.

use splitgill_core::{StoredRecord, Version};

/// Number of archive indices per database.
pub const ARC_COUNT: usize = 5;

/// The index names for one database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNames {
    database: String,
}

impl IndexNames {
    /// Names for the given database.
    pub fn new(database: impl Into<String>) -> Self {
        IndexNames {
            database: database.into(),
        }
    }

    /// The database these names belong to.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// The latest index: `data-{db}-latest`.
    pub fn latest(&self) -> String {
        format!("data-{}-latest", self.database)
    }

    /// The archive index for a record id: `data-{db}-arc-{nnn}`.
    pub fn arc_for(&self, record_id: &str) -> String {
        self.arc(arc_number(record_id))
    }

    /// A specific archive index by number.
    pub fn arc(&self, number: usize) -> String {
        format!("data-{}-arc-{:03}", self.database, number)
    }

    /// Wildcard covering every index of this database: `data-{db}-*`.
    pub fn wildcard(&self) -> String {
        format!("data-{}-*", self.database)
    }

    /// Wildcard covering only the archive indices.
    pub fn arc_wildcard(&self) -> String {
        format!("data-{}-arc-*", self.database)
    }

    /// The template name shared by all of this database's indices.
    pub fn template(&self) -> String {
        format!("data-{}", self.database)
    }

    /// Every index this database can use: latest plus all arcs.
    pub fn all(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(ARC_COUNT + 1);
        names.push(self.latest());
        names.extend((0..ARC_COUNT).map(|n| self.arc(n)));
        names
    }

    /// The index a given state of a record belongs in: `latest` when the
    /// state is the record's newest committed one, its arc otherwise.
    pub fn index_for(&self, record: &StoredRecord, version: Version) -> String {
        if record.version == Some(version) {
            self.latest()
        } else {
            self.arc_for(&record.id)
        }
    }
}

/// The arc number for a record id: byte-sum modulo `ARC_COUNT`.
pub fn arc_number(record_id: &str) -> usize {
    let sum: u64 = record_id.bytes().map(u64::from).sum();
    (sum % ARC_COUNT as u64) as usize
}

/// The search document id for one state of a record.
pub fn document_id(record_id: &str, version: Version) -> String {
    format!("{record_id}:{version}")
}
