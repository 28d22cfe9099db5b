//! Bulk operation generation
//!
//! Transforms one record's version history into the operations that bring
//! the search engine up to date. Each committed state becomes one document
//! with id `{record_id}:{version}`, so repeating a sync overwrites rather
//! than duplicates; that per-state id is what makes the whole pipeline
//! resumable.
//!
//! Placement rules:
//!
//! - the record's newest state lives in the `latest` index,
//! - every older state lives in the record's arc index,
//! - when newer versions arrive, the state that used to be newest is
//!   deleted from `latest` and re-created in the arc with its validity
//!   range closed off,
//! - a deletion state (empty data) produces no document at all.

use crate::fields::doc;
use crate::names::{document_id, IndexNames};
use crate::parser::{parse, ParserCache};
use serde_json::{json, Map, Value as Json};
use splitgill_core::{ParsingOptions, Result, StoredRecord, Value, Version};
use tracing::debug;

/// A single bulk operation against the search engine.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOp {
    /// Create or overwrite a document
    Index {
        /// Target index
        index: String,
        /// Document id, `{record_id}:{version}`
        doc_id: String,
        /// Document body
        document: Json,
    },
    /// Remove a document if present
    Delete {
        /// Target index
        index: String,
        /// Document id, `{record_id}:{version}`
        doc_id: String,
    },
}

impl BulkOp {
    /// The index this op targets.
    pub fn index(&self) -> &str {
        match self {
            BulkOp::Index { index, .. } | BulkOp::Delete { index, .. } => index,
        }
    }

    /// The document id this op targets.
    pub fn doc_id(&self) -> &str {
        match self {
            BulkOp::Index { doc_id, .. } | BulkOp::Delete { doc_id, .. } => doc_id,
        }
    }

    /// True for delete ops.
    pub fn is_delete(&self) -> bool {
        matches!(self, BulkOp::Delete { .. })
    }
}

/// Generate the ordered bulk ops for one record, covering the states
/// committed in the window `(since, until]`. `since = None` reindexes the
/// whole history. Every state is parsed with the current options, which is
/// why an options change triggers a full reprojection. Ops are emitted in
/// version-ascending order, which the bulk writer preserves per record.
pub fn generate_index_ops(
    record: &StoredRecord,
    since: Option<Version>,
    until: Version,
    names: &IndexNames,
    options: &ParsingOptions,
    cache: &mut ParserCache,
) -> Result<Vec<BulkOp>> {
    // states ascending, capped at the sync window's upper bound
    let mut states = record.history()?;
    states.reverse();
    states.retain(|(version, _)| *version <= until);
    if states.is_empty() {
        return Ok(Vec::new());
    }

    let fresh_start = states.partition_point(|(version, _)| since.is_some_and(|s| *version <= s));
    if fresh_start == states.len() {
        // nothing new for this record in the window
        return Ok(Vec::new());
    }

    let mut ops = Vec::new();
    let latest_index = names.latest();
    let arc_index = names.arc_for(&record.id);

    // the state that was newest at the checkpoint has been superseded:
    // evict its open-ended document from latest and close it off in the arc
    if fresh_start > 0 {
        let (prev_version, prev_data) = &states[fresh_start - 1];
        ops.push(BulkOp::Delete {
            index: latest_index.clone(),
            doc_id: document_id(&record.id, *prev_version),
        });
        if !prev_data.is_empty_object() {
            let next_version = states[fresh_start].0;
            ops.push(BulkOp::Index {
                index: arc_index.clone(),
                doc_id: document_id(&record.id, *prev_version),
                document: build_document(
                    record,
                    prev_data,
                    *prev_version,
                    Some(next_version),
                    options,
                    cache,
                ),
            });
        }
    }

    for position in fresh_start..states.len() {
        let (version, data) = &states[position];
        let next_version = states.get(position + 1).map(|(v, _)| *v);
        let doc_id = document_id(&record.id, *version);

        // clear any stale copies of this state before re-emitting; this is
        // what makes re-syncs and options changes safe
        ops.push(BulkOp::Delete {
            index: arc_index.clone(),
            doc_id: doc_id.clone(),
        });
        ops.push(BulkOp::Delete {
            index: latest_index.clone(),
            doc_id: doc_id.clone(),
        });

        if data.is_empty_object() {
            continue;
        }

        let target = if next_version.is_none() {
            latest_index.clone()
        } else {
            arc_index.clone()
        };
        ops.push(BulkOp::Index {
            index: target,
            doc_id,
            document: build_document(record, data, *version, next_version, options, cache),
        });
    }

    debug!(
        record = %record.id,
        ops = ops.len(),
        "generated index ops"
    );
    Ok(ops)
}

/// Build the search document for one state of a record.
fn build_document(
    record: &StoredRecord,
    data: &Value,
    version: Version,
    next_version: Option<Version>,
    options: &ParsingOptions,
    cache: &mut ParserCache,
) -> Json {
    let parsed = parse(data, options, cache);

    let mut versions = Map::new();
    versions.insert("gte".to_string(), Json::from(version.as_millis()));
    if let Some(next) = next_version {
        versions.insert("lt".to_string(), Json::from(next.as_millis()));
    }

    let mut document = Map::new();
    document.insert(doc::ID.to_string(), Json::String(record.id.clone()));
    document.insert(doc::VERSION.to_string(), Json::from(version.as_millis()));
    if let Some(next) = next_version {
        document.insert(doc::NEXT.to_string(), Json::from(next.as_millis()));
    }
    document.insert(doc::VERSIONS.to_string(), Json::Object(versions));
    document.insert(doc::DATA.to_string(), parsed.data);
    document.insert(doc::DATA_TYPES.to_string(), json!(parsed.data_types));
    document.insert(doc::PARSED_TYPES.to_string(), json!(parsed.parsed_types));
    Json::Object(document)
}
