//! Error types for Splitgill
//!
//! A single `SplitgillError` enum covers the whole library. We use
//! `thiserror` for the `Display` and `Error` implementations.
//!
//! ## Classification
//!
//! - **Transient** (`is_retryable()`): store/search I/O hiccups and lock
//!   contention. The sync engine retries these with capped exponential
//!   backoff.
//! - **Permanent**: mapping conflicts and validation failures. Mapping
//!   conflicts during sync are *counted* in the result rather than raised;
//!   validation failures propagate immediately.

use std::collections::BTreeMap;
use thiserror::Error;

/// Result type alias for Splitgill operations
pub type Result<T> = std::result::Result<T, SplitgillError>;

/// Error type for all Splitgill operations
#[derive(Debug, Error)]
pub enum SplitgillError {
    /// Bad input: reserved keys, non-tree values, out-of-range options
    #[error("validation error: {message}")]
    Validation {
        /// What was wrong with the input
        message: String,
    },

    /// The commit lock could not be acquired before the deadline
    #[error("commit conflict on database '{database}': another commit holds the lock")]
    CommitConflict {
        /// The database being committed
        database: String,
    },

    /// The sync lock is held by another process
    #[error("sync already in progress for database '{database}'")]
    SyncBusy {
        /// The database being synced
        database: String,
    },

    /// A lock could not be acquired before its deadline
    #[error("lock '{lock_id}' not acquired within {waited_ms}ms")]
    LockTimeout {
        /// The contended lock id
        lock_id: String,
        /// How long we waited
        waited_ms: u64,
    },

    /// Document store I/O failure
    #[error("document store unavailable: {message}")]
    StoreUnavailable {
        /// Error message
        message: String,
    },

    /// Search engine I/O failure (transient)
    #[error("search engine unavailable: {message}")]
    SearchUnavailable {
        /// Error message
        message: String,
    },

    /// Permanent search failure, e.g. a field mapping conflict
    #[error("mapping conflict: {reason}")]
    MappingConflict {
        /// The reason reported by the search engine
        reason: String,
    },

    /// A sync run was cancelled at a batch boundary
    #[error("sync cancelled")]
    Cancelled,

    /// Bug or invariant violation
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl SplitgillError {
    /// Create a Validation error
    pub fn validation(message: impl Into<String>) -> Self {
        SplitgillError::Validation {
            message: message.into(),
        }
    }

    /// Create a StoreUnavailable error
    pub fn store(message: impl Into<String>) -> Self {
        SplitgillError::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Create a SearchUnavailable error
    pub fn search(message: impl Into<String>) -> Self {
        SplitgillError::SearchUnavailable {
            message: message.into(),
        }
    }

    /// Create a MappingConflict error
    pub fn mapping_conflict(reason: impl Into<String>) -> Self {
        SplitgillError::MappingConflict {
            reason: reason.into(),
        }
    }

    /// Create an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        SplitgillError::Internal {
            message: message.into(),
        }
    }

    /// Check if this error may succeed on retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SplitgillError::StoreUnavailable { .. }
                | SplitgillError::SearchUnavailable { .. }
                | SplitgillError::LockTimeout { .. }
        )
    }

    /// Check if this is a permanent failure that retrying cannot fix
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SplitgillError::MappingConflict { .. } | SplitgillError::Validation { .. }
        )
    }
}

/// Validate a data tree for ingestion: map keys must not start with `_`,
/// except the literal `_id`. Applies at every nesting level since parsed
/// sub-fields share the namespace with user data.
pub fn check_reserved_keys(data: &crate::Value) -> Result<()> {
    match data {
        crate::Value::Object(map) => {
            for (key, value) in map {
                if key.starts_with('_') && key != "_id" {
                    return Err(SplitgillError::validation(format!(
                        "key '{key}' uses the reserved '_' prefix"
                    )));
                }
                check_reserved_keys(value)?;
            }
            Ok(())
        }
        crate::Value::Array(items) => {
            for item in items {
                check_reserved_keys(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Per-reason failure tally, keyed `"<op>:<reason>"`. Used by sync results.
pub type FailureCounts = BTreeMap<String, u64>;
