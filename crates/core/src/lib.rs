//! Core types for Splitgill
//!
//! This crate defines the foundational types used throughout the system:
//! - Value: the unified tree type for record data
//! - Version: millisecond-precision version identifiers
//! - Diff & patch: reversible patches between data trees
//! - Record / StoredRecord: the record model and its diff-chain history
//! - ParsingOptions: validated, versioned parser configuration
//! - SplitgillError: the error hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod diffing;
pub mod error;
pub mod options;
pub mod record;
pub mod value;
pub mod version;

pub use diffing::{diff, patch, Diff, PatchOp, Path, PathSeg};
pub use error::{check_reserved_keys, FailureCounts, Result, SplitgillError};
pub use options::{
    GeoFieldHint, OptionsRange, ParsingOptions, ParsingOptionsBuilder, DEFAULT_KEYWORD_LENGTH,
    MAX_KEYWORD_LENGTH, MIN_KEYWORD_LENGTH,
};
pub use record::{DatabaseStatus, IngestResult, Record, StoredRecord};
pub use value::{prepare, Value};
pub use version::Version;
