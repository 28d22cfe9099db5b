//! # Splitgill
//!
//! A library for storing, updating, and querying versioned semi-structured
//! records. Every record evolves through immutable data versions; any past
//! version can be reconstructed and searched. State lives in two stores: a
//! document store holding the authoritative diff-chained records, and a
//! search engine holding a type-aware projection of every version.
//!
//! # Quick start
//!
//! ```
//! use splitgill::{object, Record, SplitgillClient, SyncOptions};
//!
//! fn main() -> splitgill::Result<()> {
//!     let client = SplitgillClient::in_memory();
//!     let db = client.database("beetles");
//!
//!     // ingest and commit a record
//!     let result = db.ingest(
//!         [Record::new("r1", object! {"name" => "Jeremy", "height" => 40.6})],
//!         true,
//!         None,
//!     )?;
//!     let version = result.version.expect("first commit assigns a version");
//!
//!     // project it into the search engine
//!     db.sync(SyncOptions::default())?;
//!
//!     // query the latest state
//!     let query = splitgill::search::term_query("height", &40.6.into());
//!     assert_eq!(db.count(&query, None)?, 1);
//!
//!     // and read any version back from the store
//!     assert_eq!(
//!         db.get("r1", Some(version))?,
//!         Some(object! {"name" => "Jeremy", "height" => 40.6})
//!     );
//!     Ok(())
//! }
//! ```
//!
//! # Pieces
//!
//! | Concern | Where |
//! |---------|-------|
//! | Value model, diffs, records, options | [`splitgill_core`] |
//! | Parsing, index names, templates, query builders | [`splitgill_index`] |
//! | Store contracts, locking, ingest/commit, sync | [`splitgill_engine`] |
//!
//! The façade re-exports the everyday surface; the member crates stay
//! available for anything deeper.

pub use splitgill_core::{
    check_reserved_keys, diff, object, patch, prepare, DatabaseStatus, Diff, GeoFieldHint,
    IngestResult, OptionsRange, ParsingOptions, ParsingOptionsBuilder, PatchOp, Record, Result,
    SplitgillError, StoredRecord, Value, Version,
};

pub use splitgill_engine::{
    BulkFailure, BulkSummary, DocumentStore, LockDocument, LockManager, LockPurpose,
    MemoryDocumentStore, MemorySearchIndex, RecordStream, SearchEngine, SplitgillClient,
    SplitgillDatabase, SyncOptions, SyncResult,
};

pub use splitgill_index::{
    generate_index_ops, index_template, parse, rebuild_data, BulkOp, IndexNames, ParsedData,
    ParserCache, TypeField, ARC_COUNT,
};

/// Query builders for the search engine.
pub use splitgill_index::search;
