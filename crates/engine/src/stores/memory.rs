//! In-memory backing stores
//!
//! `MemoryDocumentStore` and `MemorySearchIndex` implement the two store
//! contracts entirely in process. They back the test suites and make the
//! whole pipeline runnable without external services.
//!
//! The search index evaluates the query DSL subset the search helpers emit:
//! `match_all`, `term` (including containment against `versions` ranges),
//! `range`, `match`, `exists`, `bool`, and `geo_distance`. The template
//! `copy_to` behavior is emulated at write time by collecting `_t`/`_gp`/
//! `_gs` projections into `all_text`/`all_points`/`all_shapes`.

use super::{BulkSummary, DocumentStore, LockDocument, RecordStream, SearchEngine};
use dashmap::DashMap;
use serde_json::Value as Json;
use splitgill_core::{
    DatabaseStatus, ParsingOptions, Result, SplitgillError, StoredRecord, Version,
};
use splitgill_index::BulkOp;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Document store
// ============================================================================

/// An in-memory document store.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    // record ids are kept ordered so changed_records streams by id
    records: DashMap<String, BTreeMap<String, StoredRecord>>,
    status: DashMap<String, DatabaseStatus>,
    options: DashMap<String, Vec<(Version, ParsingOptions)>>,
    locks: DashMap<String, LockDocument>,
}

impl MemoryDocumentStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn find_record(&self, database: &str, id: &str) -> Result<Option<StoredRecord>> {
        Ok(self
            .records
            .get(database)
            .and_then(|db| db.get(id).cloned()))
    }

    fn find_records(&self, database: &str, ids: &[String]) -> Result<Vec<StoredRecord>> {
        let Some(db) = self.records.get(database) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| db.get(id).cloned()).collect())
    }

    fn write_records(&self, database: &str, records: Vec<StoredRecord>) -> Result<()> {
        let mut db = self.records.entry(database.to_string()).or_default();
        for record in records {
            db.insert(record.id.clone(), record);
        }
        Ok(())
    }

    fn delete_records(&self, database: &str, ids: &[String]) -> Result<u64> {
        let Some(mut db) = self.records.get_mut(database) else {
            return Ok(0);
        };
        let mut removed = 0;
        for id in ids {
            if db.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn pending_records(&self, database: &str) -> Result<Vec<StoredRecord>> {
        let Some(db) = self.records.get(database) else {
            return Ok(Vec::new());
        };
        Ok(db
            .values()
            .filter(|record| record.has_pending())
            .cloned()
            .collect())
    }

    fn has_pending(&self, database: &str) -> Result<bool> {
        Ok(self
            .records
            .get(database)
            .map(|db| db.values().any(|record| record.has_pending()))
            .unwrap_or(false))
    }

    fn changed_records(
        &self,
        database: &str,
        since: Option<Version>,
        until: Version,
    ) -> Result<RecordStream<'_>> {
        // snapshot under the shard lock; the stream itself is lock-free
        let changed: Vec<StoredRecord> = self
            .records
            .get(database)
            .map(|db| {
                db.values()
                    .filter(|record| !record.versions_in(since, until).is_empty())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(Box::new(changed.into_iter().map(Ok)))
    }

    fn max_committed_version(&self, database: &str) -> Result<Option<Version>> {
        Ok(self
            .records
            .get(database)
            .and_then(|db| db.values().filter_map(|record| record.version).max()))
    }

    fn read_status(&self, database: &str) -> Result<Option<DatabaseStatus>> {
        Ok(self.status.get(database).map(|status| status.clone()))
    }

    fn write_status(&self, status: &DatabaseStatus) -> Result<()> {
        self.status.insert(status.name.clone(), status.clone());
        Ok(())
    }

    fn update_last_indexed(&self, database: &str, version: Option<Version>) -> Result<()> {
        self.status
            .entry(database.to_string())
            .or_insert_with(|| DatabaseStatus::new(database))
            .last_indexed_version = version;
        Ok(())
    }

    fn append_options(
        &self,
        database: &str,
        version: Version,
        options: &ParsingOptions,
    ) -> Result<()> {
        self.options
            .entry(database.to_string())
            .or_default()
            .push((version, options.clone()));
        Ok(())
    }

    fn options_history(&self, database: &str) -> Result<Vec<(Version, ParsingOptions)>> {
        Ok(self
            .options
            .get(database)
            .map(|history| history.clone())
            .unwrap_or_default())
    }

    fn insert_lock(&self, lock: &LockDocument) -> Result<bool> {
        match self.locks.entry(lock.lock_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(lock.clone());
                Ok(true)
            }
        }
    }

    fn read_lock(&self, lock_id: &str) -> Result<Option<LockDocument>> {
        Ok(self.locks.get(lock_id).map(|lock| lock.clone()))
    }

    fn replace_lock(
        &self,
        lock_id: &str,
        expected_owner: &str,
        replacement: &LockDocument,
    ) -> Result<bool> {
        match self.locks.get_mut(lock_id) {
            Some(mut existing) if existing.owner == expected_owner => {
                *existing = replacement.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn remove_lock(&self, lock_id: &str, owner: &str) -> Result<bool> {
        Ok(self
            .locks
            .remove_if(lock_id, |_, lock| lock.owner == owner)
            .is_some())
    }

    fn refresh_lock(&self, lock_id: &str, owner: &str, at: Version) -> Result<bool> {
        match self.locks.get_mut(lock_id) {
            Some(mut existing) if existing.owner == owner => {
                existing.acquired_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ============================================================================
// Search index
// ============================================================================

/// An in-memory search index.
#[derive(Debug, Default)]
pub struct MemorySearchIndex {
    indices: DashMap<String, BTreeMap<String, Json>>,
    templates: DashMap<String, Json>,
    settings: DashMap<String, Json>,
    refreshes: AtomicU64,
}

impl MemorySearchIndex {
    /// An empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// The settings most recently applied to an index, for assertions.
    pub fn settings_for(&self, index: &str) -> Option<Json> {
        self.settings.get(index).map(|settings| settings.clone())
    }

    /// How many refreshes have been requested.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// The stored template bodies, for assertions.
    pub fn template(&self, name: &str) -> Option<Json> {
        self.templates.get(name).map(|template| template.clone())
    }

    /// Every document in an index, id-ordered, for assertions.
    pub fn documents(&self, index: &str) -> Vec<Json> {
        self.indices
            .get(index)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    fn matching_indices(&self, pattern: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .indices
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|name| pattern_matches(pattern, name))
            .collect();
        names.sort();
        names
    }
}

fn pattern_matches(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => pattern == name,
    }
}

impl SearchEngine for MemorySearchIndex {
    fn put_template(&self, name: &str, body: &Json) -> Result<()> {
        self.templates.insert(name.to_string(), body.clone());
        Ok(())
    }

    fn ensure_index(&self, index: &str) -> Result<()> {
        self.indices.entry(index.to_string()).or_default();
        Ok(())
    }

    fn delete_index(&self, index: &str) -> Result<()> {
        self.indices.remove(index);
        self.settings.remove(index);
        Ok(())
    }

    fn list_indices(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self.matching_indices(pattern))
    }

    fn put_settings(&self, pattern: &str, settings: &Json) -> Result<()> {
        for index in self.matching_indices(pattern) {
            self.settings.insert(index, settings.clone());
        }
        Ok(())
    }

    fn bulk(&self, ops: &[BulkOp]) -> Result<BulkSummary> {
        let mut summary = BulkSummary::default();
        for op in ops {
            match op {
                BulkOp::Index {
                    index,
                    doc_id,
                    document,
                } => {
                    let mut docs = self.indices.entry(index.clone()).or_default();
                    docs.insert(doc_id.clone(), with_copy_fields(document));
                    summary.indexed += 1;
                }
                BulkOp::Delete { index, doc_id } => {
                    if let Some(mut docs) = self.indices.get_mut(index) {
                        if docs.remove(doc_id).is_some() {
                            summary.deleted += 1;
                        }
                    }
                }
            }
        }
        Ok(summary)
    }

    fn refresh(&self, _pattern: &str) -> Result<()> {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn delete_by_query(&self, pattern: &str, query: &Json) -> Result<u64> {
        let mut removed = 0;
        for index in self.matching_indices(pattern) {
            if let Some(mut docs) = self.indices.get_mut(&index) {
                let doomed: Vec<String> = docs
                    .iter()
                    .filter_map(|(id, doc)| {
                        matches(doc, query).ok()?.then(|| id.clone())
                    })
                    .collect();
                for id in doomed {
                    docs.remove(&id);
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    fn count(&self, pattern: &str, query: &Json) -> Result<u64> {
        let mut total = 0;
        for index in self.matching_indices(pattern) {
            if let Some(docs) = self.indices.get(&index) {
                for doc in docs.values() {
                    if matches(doc, query)? {
                        total += 1;
                    }
                }
            }
        }
        Ok(total)
    }

    fn search(&self, pattern: &str, query: &Json, limit: usize) -> Result<Vec<Json>> {
        let mut hits = Vec::new();
        for index in self.matching_indices(pattern) {
            if let Some(docs) = self.indices.get(&index) {
                for doc in docs.values() {
                    if hits.len() >= limit {
                        return Ok(hits);
                    }
                    if matches(doc, query)? {
                        hits.push(doc.clone());
                    }
                }
            }
        }
        Ok(hits)
    }
}

/// Emulate the template's `copy_to` mappings: gather typed projections into
/// the document-wide fields.
fn with_copy_fields(document: &Json) -> Json {
    let mut document = document.clone();
    let mut all_text = Vec::new();
    let mut all_points = Vec::new();
    let mut all_shapes = Vec::new();
    if let Some(data) = document.get("data") {
        collect_projections(data, &mut all_text, &mut all_points, &mut all_shapes);
    }
    if let Json::Object(map) = &mut document {
        if !all_text.is_empty() {
            map.insert("all_text".to_string(), Json::Array(all_text));
        }
        if !all_points.is_empty() {
            map.insert("all_points".to_string(), Json::Array(all_points));
        }
        if !all_shapes.is_empty() {
            map.insert("all_shapes".to_string(), Json::Array(all_shapes));
        }
    }
    document
}

fn collect_projections(
    node: &Json,
    all_text: &mut Vec<Json>,
    all_points: &mut Vec<Json>,
    all_shapes: &mut Vec<Json>,
) {
    match node {
        Json::Object(map) => {
            for (key, value) in map {
                match key.as_str() {
                    "_t" => all_text.push(value.clone()),
                    "_gp" => all_points.push(value.clone()),
                    "_gs" => all_shapes.push(value.clone()),
                    "_u" | "_k" | "_n" | "_d" | "_b" => {}
                    _ => collect_projections(value, all_text, all_points, all_shapes),
                }
            }
        }
        Json::Array(items) => {
            for item in items {
                collect_projections(item, all_text, all_points, all_shapes);
            }
        }
        _ => {}
    }
}

// ============================================================================
// Query evaluation
// ============================================================================

/// Evaluate a query body against one document.
fn matches(doc: &Json, query: &Json) -> Result<bool> {
    let Some(map) = query.as_object() else {
        return Err(unsupported(query));
    };
    let Some((kind, body)) = map.iter().next() else {
        return Err(unsupported(query));
    };
    match kind.as_str() {
        "match_all" => Ok(true),
        "term" => {
            let (field, expected) = single_entry(body).ok_or_else(|| unsupported(query))?;
            Ok(field_values(doc, field)
                .into_iter()
                .any(|value| term_matches(value, expected, field)))
        }
        "range" => {
            let (field, bounds) = single_entry(body).ok_or_else(|| unsupported(query))?;
            Ok(field_values(doc, field)
                .into_iter()
                .any(|value| range_matches(value, bounds)))
        }
        "match" => {
            let (field, wanted) = single_entry(body).ok_or_else(|| unsupported(query))?;
            let wanted = wanted.as_str().unwrap_or_default().to_lowercase();
            Ok(field_values(doc, field).into_iter().any(|value| {
                let haystack = value.as_str().unwrap_or_default().to_lowercase();
                wanted
                    .split_whitespace()
                    .all(|token| haystack.contains(token))
            }))
        }
        "exists" => {
            let field = body
                .get("field")
                .and_then(Json::as_str)
                .ok_or_else(|| unsupported(query))?;
            Ok(!field_values(doc, field).is_empty())
        }
        "bool" => {
            for clause in clauses(body, "filter").chain(clauses(body, "must")) {
                if !matches(doc, clause)? {
                    return Ok(false);
                }
            }
            for clause in clauses(body, "must_not") {
                if matches(doc, clause)? {
                    return Ok(false);
                }
            }
            let should: Vec<&Json> = clauses(body, "should").collect();
            if !should.is_empty() {
                for clause in should {
                    if matches(doc, clause)? {
                        return Ok(true);
                    }
                }
                return Ok(false);
            }
            Ok(true)
        }
        "geo_distance" => geo_distance_matches(doc, body).ok_or_else(|| unsupported(query)),
        _ => Err(unsupported(query)),
    }
}

fn unsupported(query: &Json) -> SplitgillError {
    SplitgillError::internal(format!("unsupported query: {query}"))
}

fn single_entry(body: &Json) -> Option<(&str, &Json)> {
    let map = body.as_object()?;
    let (key, value) = map.iter().next()?;
    Some((key.as_str(), value))
}

fn clauses<'a>(body: &'a Json, key: &str) -> Box<dyn Iterator<Item = &'a Json> + 'a> {
    match body.get(key) {
        Some(Json::Array(items)) => Box::new(items.iter()),
        Some(single) => Box::new(std::iter::once(single)),
        None => Box::new(std::iter::empty()),
    }
}

/// Gather every value at a dotted path, flattening arrays along the way.
fn field_values<'a>(doc: &'a Json, path: &str) -> Vec<&'a Json> {
    let mut current = vec![doc];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for node in current {
            match node {
                Json::Object(map) => {
                    if let Some(value) = map.get(segment) {
                        flatten_into(value, &mut next);
                    }
                }
                _ => {}
            }
        }
        current = next;
    }
    current.into_iter().filter(|v| !v.is_null()).collect()
}

fn flatten_into<'a>(value: &'a Json, out: &mut Vec<&'a Json>) {
    match value {
        Json::Array(items) => {
            for item in items {
                flatten_into(item, out);
            }
        }
        other => out.push(other),
    }
}

fn term_matches(value: &Json, expected: &Json, field: &str) -> bool {
    // a {gte, lt?} object is a range-typed field: term means containment
    if let Some(range) = value.as_object() {
        if let (Some(gte), Some(point)) = (
            range.get("gte").and_then(Json::as_i64),
            expected.as_i64(),
        ) {
            let below_upper = match range.get("lt").and_then(Json::as_i64) {
                Some(lt) => point < lt,
                None => true,
            };
            return gte <= point && below_upper;
        }
        return false;
    }
    match (value.as_f64(), expected.as_f64()) {
        (Some(actual), Some(wanted)) => return actual == wanted,
        _ => {}
    }
    match (value.as_str(), expected.as_str()) {
        (Some(actual), Some(wanted)) => {
            // keyword projections are lowercase-normalized at both ends
            if field.ends_with("._k") {
                actual.to_lowercase() == wanted.to_lowercase()
            } else {
                actual == wanted
            }
        }
        _ => value == expected,
    }
}

fn range_matches(value: &Json, bounds: &Json) -> bool {
    let Some(actual) = value.as_f64() else {
        return false;
    };
    let Some(bounds) = bounds.as_object() else {
        return false;
    };
    for (op, bound) in bounds {
        let Some(bound) = bound.as_f64() else {
            return false;
        };
        let ok = match op.as_str() {
            "gte" => actual >= bound,
            "gt" => actual > bound,
            "lte" => actual <= bound,
            "lt" => actual < bound,
            _ => false,
        };
        if !ok {
            return false;
        }
    }
    true
}

fn geo_distance_matches(doc: &Json, body: &Json) -> Option<bool> {
    let map = body.as_object()?;
    let distance_m: f64 = map
        .get("distance")?
        .as_str()?
        .trim_end_matches('m')
        .parse()
        .ok()?;
    let (field, centre) = map.iter().find(|(key, _)| *key != "distance")?;
    let centre_lat = centre.get("lat")?.as_f64()?;
    let centre_lon = centre.get("lon")?.as_f64()?;
    for value in field_values(doc, field) {
        if let Some((lon, lat)) = parse_wkt_point(value.as_str().unwrap_or_default()) {
            if haversine_m(centre_lat, centre_lon, lat, lon) <= distance_m {
                return Some(true);
            }
        }
    }
    Some(false)
}

fn parse_wkt_point(text: &str) -> Option<(f64, f64)> {
    let body = text
        .trim()
        .strip_prefix("POINT")?
        .trim()
        .strip_prefix('(')?
        .strip_suffix(')')?;
    let mut parts = body.split_whitespace();
    let lon: f64 = parts.next()?.parse().ok()?;
    let lat: f64 = parts.next()?.parse().ok()?;
    Some((lon, lat))
}

fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_008.8;
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}
