//! Record data parsing
//!
//! Converts a record's data tree into the typed-projection tree that gets
//! indexed. Every leaf is expanded into an object holding the unparsed
//! original (`_u`) plus whichever typed projections apply (`_t`, `_k`,
//! `_n`, `_d`, `_b`, `_gp`, `_gs`); containers keep their structure.
//!
//! Alongside the tree, two summaries are collected for every document:
//! `data_types` (`"path:kind"` for the source values) and `parsed_types`
//! (`"path:code"` for the projections emitted).
//!
//! Identical scalars appear over and over across a sync run, so parsed leaf
//! objects are cached in a bounded LRU keyed by the source value. The cache
//! is tied to one options instance and clears itself when options change.

use crate::fields::{data_type_entry, parsed_type_entry, TypeField};
use crate::geo::{as_geometry, match_hint, parse_wkt};
use lru::LruCache;
use serde_json::{Map, Value as Json};
use splitgill_core::{ParsingOptions, Value};
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::num::NonZeroUsize;

/// Default parsed-leaf cache capacity.
pub const DEFAULT_CACHE_CAPACITY: usize = 100_000;

/// The parsed form of one record state.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedData {
    /// The projection tree, the search document's `data` field
    pub data: Json,
    /// Sorted `"path:kind"` entries for the source values
    pub data_types: Vec<String>,
    /// Sorted `"path:code"` entries for the emitted projections
    pub parsed_types: Vec<String>,
}

/// Cache key for parsed leaves. Floats key by bits so bit-identical values
/// share an entry and NaN keys behave.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LeafKey {
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
}

impl LeafKey {
    fn for_value(value: &Value) -> Option<LeafKey> {
        match value {
            Value::Bool(b) => Some(LeafKey::Bool(*b)),
            Value::Int(i) => Some(LeafKey::Int(*i)),
            Value::Float(f) => Some(LeafKey::Float(f.to_bits())),
            Value::String(s) => Some(LeafKey::Str(s.clone())),
            _ => None,
        }
    }
}

/// Bounded cache of parsed leaf objects, valid for one options instance.
pub struct ParserCache {
    entries: LruCache<LeafKey, Map<String, Json>>,
    options: Option<ParsingOptions>,
}

impl ParserCache {
    /// A cache bounded to the given number of leaf entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        ParserCache {
            entries: LruCache::new(capacity),
            options: None,
        }
    }

    /// A cache with the default capacity.
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }

    /// Drop all entries if the options differ from the ones the cache was
    /// filled under.
    fn ensure_options(&mut self, options: &ParsingOptions) {
        if self.options.as_ref() != Some(options) {
            self.entries.clear();
            self.options = Some(options.clone());
        }
    }

    fn get_or_parse(&mut self, value: &Value, options: &ParsingOptions) -> Map<String, Json> {
        match LeafKey::for_value(value) {
            Some(key) => {
                if let Some(hit) = self.entries.get(&key) {
                    return hit.clone();
                }
                let parsed = parse_leaf(value, options);
                self.entries.put(key, parsed.clone());
                parsed
            }
            None => parse_leaf(value, options),
        }
    }
}

impl Default for ParserCache {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Parse one record state into its indexed projection.
///
/// The root must be a map; geo hints apply to it, GeoJSON detection does
/// not.
pub fn parse(data: &Value, options: &ParsingOptions, cache: &mut ParserCache) -> ParsedData {
    cache.ensure_options(options);
    let mut walker = Walker {
        options,
        cache,
        data_types: BTreeSet::new(),
        parsed_types: BTreeSet::new(),
    };
    let data = match data {
        Value::Object(map) => walker.walk_map(map, "", true),
        // non-map roots do not occur through the store; project as a bare
        // container for totality
        other => walker.walk_value(other, ""),
    };
    ParsedData {
        data,
        data_types: walker.data_types.into_iter().collect(),
        parsed_types: walker.parsed_types.into_iter().collect(),
    }
}

struct Walker<'a> {
    options: &'a ParsingOptions,
    cache: &'a mut ParserCache,
    data_types: BTreeSet<String>,
    parsed_types: BTreeSet<String>,
}

impl Walker<'_> {
    fn walk_map(&mut self, map: &BTreeMap<String, Value>, path: &str, is_root: bool) -> Json {
        let mut obj = Map::new();
        for (key, value) in map {
            let child_path = join_path(path, key);
            self.data_types
                .insert(data_type_entry(&child_path, value.kind_name()));
            obj.insert(key.clone(), self.walk_value(value, &child_path));
        }

        if !is_root {
            if let Some(geometry) = as_geometry(map) {
                obj.insert(
                    TypeField::GeoShape.as_str().to_string(),
                    Json::String(geometry.to_wkt()),
                );
                obj.insert(
                    TypeField::GeoPoint.as_str().to_string(),
                    Json::String(geometry.centroid().to_wkt()),
                );
                self.parsed_types
                    .insert(parsed_type_entry(path, TypeField::GeoShape));
                self.parsed_types
                    .insert(parsed_type_entry(path, TypeField::GeoPoint));
            }
        }

        for hint in self.options.geo_hints() {
            let Some(matched) = match_hint(hint, map) else {
                continue;
            };
            let lat_path = join_path(path, &hint.lat_field);
            if let Some(Json::Object(lat_obj)) = obj.get_mut(&hint.lat_field) {
                lat_obj.insert(
                    TypeField::GeoPoint.as_str().to_string(),
                    Json::String(matched.point.to_wkt()),
                );
                lat_obj.insert(
                    TypeField::GeoShape.as_str().to_string(),
                    Json::String(matched.shape.to_wkt()),
                );
                self.parsed_types
                    .insert(parsed_type_entry(&lat_path, TypeField::GeoPoint));
                self.parsed_types
                    .insert(parsed_type_entry(&lat_path, TypeField::GeoShape));
            }
        }

        Json::Object(obj)
    }

    fn walk_value(&mut self, value: &Value, path: &str) -> Json {
        match value {
            Value::Object(map) => self.walk_map(map, path, false),
            Value::Array(items) => {
                let projected = items
                    .iter()
                    .map(|item| {
                        // element kinds merge at the list's own path
                        self.data_types
                            .insert(data_type_entry(path, item.kind_name()));
                        self.walk_value(item, path)
                    })
                    .collect();
                Json::Array(projected)
            }
            // null slots stay null so list positions survive
            Value::Null => Json::Null,
            leaf => {
                let parsed = self.cache.get_or_parse(leaf, self.options);
                for type_field in [
                    TypeField::Text,
                    TypeField::Keyword,
                    TypeField::Number,
                    TypeField::Date,
                    TypeField::Boolean,
                    TypeField::GeoPoint,
                    TypeField::GeoShape,
                ] {
                    if parsed.contains_key(type_field.as_str()) {
                        self.parsed_types
                            .insert(parsed_type_entry(path, type_field));
                    }
                }
                Json::Object(parsed)
            }
        }
    }
}

fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

/// Parse a single scalar leaf into its projection object.
///
/// Empty strings keep only their `_u` so position and fidelity survive
/// without producing searchable projections.
fn parse_leaf(value: &Value, options: &ParsingOptions) -> Map<String, Json> {
    let mut parsed = Map::new();
    match value {
        Value::Bool(b) => {
            parsed.insert(TypeField::Unparsed.as_str().into(), Json::Bool(*b));
            parsed.insert(TypeField::Boolean.as_str().into(), Json::Bool(*b));
            let text = if *b { "true" } else { "false" };
            insert_text_and_keyword(&mut parsed, text, options);
        }
        Value::Int(i) => {
            parsed.insert(TypeField::Unparsed.as_str().into(), Json::from(*i));
            parsed.insert(TypeField::Number.as_str().into(), Json::from(*i as f64));
            insert_text_and_keyword(&mut parsed, &i.to_string(), options);
        }
        Value::Float(f) => {
            parsed.insert(
                TypeField::Unparsed.as_str().into(),
                serde_json::Number::from_f64(*f)
                    .map(Json::Number)
                    .unwrap_or(Json::Null),
            );
            if f.is_finite() {
                parsed.insert(TypeField::Number.as_str().into(), Json::from(*f));
            }
            insert_text_and_keyword(&mut parsed, &options.format_float(*f), options);
        }
        Value::String(s) => {
            parsed.insert(TypeField::Unparsed.as_str().into(), Json::String(s.clone()));
            if s.is_empty() {
                return parsed;
            }
            insert_text_and_keyword(&mut parsed, s, options);
            if let Some(number) = ParsingOptions::parse_number(s) {
                parsed.insert(TypeField::Number.as_str().into(), Json::from(number));
            }
            if let Some(epoch_ms) = options.parse_date(s) {
                parsed.insert(TypeField::Date.as_str().into(), Json::from(epoch_ms));
            }
            if let Some(truth) = options.parse_bool(s) {
                parsed.insert(TypeField::Boolean.as_str().into(), Json::Bool(truth));
            }
            if let Some(geometry) = parse_wkt(s) {
                parsed.insert(
                    TypeField::GeoShape.as_str().into(),
                    Json::String(geometry.to_wkt()),
                );
                parsed.insert(
                    TypeField::GeoPoint.as_str().into(),
                    Json::String(geometry.centroid().to_wkt()),
                );
            }
        }
        // nulls and containers never reach here
        other => {
            parsed.insert(
                TypeField::Unparsed.as_str().into(),
                Json::from(Value::clone(other)),
            );
        }
    }
    parsed
}

fn insert_text_and_keyword(parsed: &mut Map<String, Json>, text: &str, options: &ParsingOptions) {
    parsed.insert(TypeField::Text.as_str().into(), Json::String(text.into()));
    let keyword: String = text.chars().take(options.keyword_length()).collect();
    parsed.insert(TypeField::Keyword.as_str().into(), Json::String(keyword));
}
