//! Engine layer for Splitgill
//!
//! This crate orchestrates the record store and the search projection:
//! - stores: the document-store and search-engine contracts plus in-memory
//!   implementations
//! - locking: machine-independent database-scoped locks
//! - database: the client/database façade (ingest, commit, reads, options)
//! - sync: the checkpointed projection of history into the search engine

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod database;
pub mod locking;
pub mod stores;
pub mod sync;

pub use database::{SplitgillClient, SplitgillDatabase};
pub use locking::{lock_id, LockGuard, LockManager, LockPurpose, DEFAULT_ACQUIRE_TIMEOUT};
pub use stores::memory::{MemoryDocumentStore, MemorySearchIndex};
pub use stores::{BulkFailure, BulkSummary, DocumentStore, LockDocument, RecordStream, SearchEngine};
pub use sync::{SyncOptions, SyncResult};
