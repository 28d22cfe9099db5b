//! Indexing layer for Splitgill
//!
//! Everything between a stored record and the search engine:
//! - parser: data tree → typed-projection tree
//! - geo: hint matching, GeoJSON detection, WKT
//! - fields: document field names and path helpers
//! - names: latest/arc index name resolution
//! - template: the shared index template
//! - search: query builders and the parser inverse
//! - indexer: record history → bulk operations

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod fields;
pub mod geo;
pub mod indexer;
pub mod names;
pub mod parser;
pub mod search;
pub mod template;

pub use fields::TypeField;
pub use geo::Geometry;
pub use indexer::{generate_index_ops, BulkOp};
pub use names::{arc_number, document_id, IndexNames, ARC_COUNT};
pub use parser::{parse, ParsedData, ParserCache, DEFAULT_CACHE_CAPACITY};
pub use search::rebuild_data;
pub use template::index_template;
