//! End-to-end pipeline tests: ingest → commit → sync → search, all against
//! the in-memory stores.

use serde_json::json;
use splitgill::search::{match_all, term_query};
use splitgill::{
    object, GeoFieldHint, MemoryDocumentStore, MemorySearchIndex, ParsingOptionsBuilder, Record,
    SplitgillClient, SplitgillDatabase, SyncOptions, Value, Version,
};
use std::sync::Arc;

struct Fixture {
    search: Arc<MemorySearchIndex>,
    db: SplitgillDatabase,
}

fn fixture(name: &str) -> Fixture {
    let documents = Arc::new(MemoryDocumentStore::new());
    let search = Arc::new(MemorySearchIndex::new());
    let client = SplitgillClient::new(documents, search.clone());
    Fixture {
        search,
        db: client.database(name),
    }
}

fn doc_ids(search: &MemorySearchIndex, index: &str) -> Vec<String> {
    search
        .documents(index)
        .iter()
        .map(|doc| doc["id"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn first_version_lands_in_latest() {
    let Fixture { search, db } = fixture("db");
    db.ingest(
        [Record::new(
            "r1",
            object! {"n" => "Jeremy", "t" => "llama", "h" => 40.6},
        )],
        true,
        None,
    )
    .unwrap();
    let v1 = db.committed_version().unwrap().unwrap();

    let result = db.sync(SyncOptions::default()).unwrap();
    assert_eq!(result.indexed, 1);
    assert!(result.failed.is_empty());

    let latest = search.documents("data-db-latest");
    assert_eq!(latest.len(), 1);
    let doc = &latest[0];
    assert_eq!(doc["id"], "r1");
    assert_eq!(doc["version"], v1.as_millis());
    assert!(doc.get("next").is_none());
    assert_eq!(doc["data"]["h"]["_n"], json!(40.6));

    let data_types = doc["data_types"].as_array().unwrap();
    for expected in ["h:float", "t:str", "n:str"] {
        assert!(data_types.contains(&json!(expected)), "missing {expected}");
    }

    assert_eq!(db.count(&term_query("h", &40.6.into()), None).unwrap(), 1);
    assert_eq!(db.count(&term_query("h", &41.0.into()), None).unwrap(), 0);
}

#[test]
fn update_moves_old_version_to_arc() {
    let Fixture { search, db } = fixture("db");
    db.ingest(
        [Record::new(
            "r1",
            object! {"n" => "Jeremy", "t" => "llama", "h" => 40.6},
        )],
        true,
        None,
    )
    .unwrap();
    let v1 = db.committed_version().unwrap().unwrap();
    db.sync(SyncOptions::default()).unwrap();

    db.ingest(
        [Record::new(
            "r1",
            object! {"n" => "Jeremy", "t" => "Panther", "h" => 40.6},
        )],
        true,
        None,
    )
    .unwrap();
    let v2 = db.committed_version().unwrap().unwrap();
    db.sync(SyncOptions::default()).unwrap();

    // latest holds only v2
    let latest = search.documents("data-db-latest");
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0]["version"], v2.as_millis());
    assert_eq!(latest[0]["data"]["t"]["_u"], "Panther");

    // "r1" byte-sums to arc 003, which now holds v1 with next = v2
    let arc = search.documents("data-db-arc-003");
    assert_eq!(arc.len(), 1);
    assert_eq!(arc[0]["version"], v1.as_millis());
    assert_eq!(arc[0]["next"], v2.as_millis());
    assert_eq!(
        arc[0]["versions"],
        json!({"gte": v1.as_millis(), "lt": v2.as_millis()})
    );

    // searching at each version returns that version's state
    let at_v1 = db.search(&match_all(), Some(v1), 10).unwrap();
    assert_eq!(at_v1.len(), 1);
    assert_eq!(at_v1[0]["data"]["t"]["_u"], "llama");
    let at_v2 = db.search(&match_all(), Some(v2), 10).unwrap();
    assert_eq!(at_v2.len(), 1);
    assert_eq!(at_v2[0]["data"]["t"]["_u"], "Panther");
}

#[test]
fn deletion_clears_latest_and_archives_history() {
    let Fixture { search, db } = fixture("db");
    db.ingest([Record::new("r1", object! {"h" => 1})], true, None)
        .unwrap();
    let v1 = db.committed_version().unwrap().unwrap();
    db.ingest([Record::new("r1", object! {"h" => 2})], true, None)
        .unwrap();
    let v2 = db.committed_version().unwrap().unwrap();
    db.ingest([Record::tombstone("r1")], true, None).unwrap();
    let v3 = db.committed_version().unwrap().unwrap();

    db.sync(SyncOptions::default()).unwrap();

    assert!(doc_ids(&search, "data-db-latest").is_empty());
    let arc = search.documents("data-db-arc-003");
    assert_eq!(arc.len(), 2);
    assert_eq!(arc[0]["version"], v1.as_millis());
    assert_eq!(arc[0]["next"], v2.as_millis());
    assert_eq!(arc[1]["version"], v2.as_millis());
    assert_eq!(arc[1]["next"], v3.as_millis());

    // historical search still finds the record
    assert_eq!(db.search(&match_all(), Some(v2), 10).unwrap().len(), 1);
    // at the deletion version there is nothing
    assert_eq!(db.search(&match_all(), Some(v3), 10).unwrap().len(), 0);
}

#[test]
fn geo_hint_projection() {
    let Fixture { search, db } = fixture("db");
    let options = ParsingOptionsBuilder::new()
        .add_geo_hint(
            GeoFieldHint::new("lat", "lon")
                .with_radius("r_m")
                .with_segments(8),
        )
        .unwrap()
        .build();
    db.update_options(options, true).unwrap().unwrap();

    db.ingest(
        [Record::new(
            "r1",
            object! {"lat" => 51.5, "lon" => -0.1, "r_m" => 100},
        )],
        true,
        None,
    )
    .unwrap();
    db.sync(SyncOptions::default()).unwrap();

    let latest = search.documents("data-db-latest");
    assert_eq!(latest.len(), 1);
    let doc = &latest[0];
    assert_eq!(doc["data"]["lat"]["_gp"], "POINT(-0.1 51.5)");
    let shape = doc["data"]["lat"]["_gs"].as_str().unwrap();
    assert!(shape.starts_with("POLYGON(("));
    // 4 * 8 segments closed: 33 positions, 32 separators
    assert_eq!(shape.matches(',').count(), 32);
    // copy_to target carries the point
    assert_eq!(doc["all_points"], json!(["POINT(-0.1 51.5)"]));

    let near = splitgill::search::geo_distance_query("lat", 51.5, -0.1, 250.0);
    assert_eq!(db.count(&near, None).unwrap(), 1);
}

#[test]
fn sync_without_changes_is_a_no_op() {
    let Fixture { search, db } = fixture("db");
    db.ingest([Record::new("r1", object! {"a" => 1})], true, None)
        .unwrap();
    let first = db.sync(SyncOptions::default()).unwrap();
    assert_eq!(first.indexed, 1);
    let before = search.documents("data-db-latest");

    let second = db.sync(SyncOptions::default()).unwrap();
    assert_eq!(second.indexed, 0);
    assert_eq!(second.deleted, 0);
    assert_eq!(search.documents("data-db-latest"), before);
}

#[test]
fn resync_rebuilds_from_scratch() {
    let Fixture { search, db } = fixture("db");
    db.ingest([Record::new("r1", object! {"a" => 1})], true, None)
        .unwrap();
    db.ingest([Record::new("r1", object! {"a" => 2})], true, None)
        .unwrap();
    db.sync(SyncOptions::default()).unwrap();
    let latest_before = search.documents("data-db-latest");
    let arc_before = search.documents("data-db-arc-003");
    assert_eq!(latest_before.len(), 1);
    assert_eq!(arc_before.len(), 1);

    let result = db.sync(SyncOptions::full_resync()).unwrap();
    assert_eq!(result.indexed, 2);
    assert_eq!(search.documents("data-db-latest"), latest_before);
    assert_eq!(search.documents("data-db-arc-003"), arc_before);
}

#[test]
fn options_change_reprojects_history() {
    let Fixture { search, db } = fixture("db");
    db.ingest([Record::new("r1", object! {"word" => "abcdefghij"})], true, None)
        .unwrap();
    db.sync(SyncOptions::default()).unwrap();
    let before = search.documents("data-db-latest");
    assert_eq!(before[0]["data"]["word"]["_k"], "abcdefghij");

    // shrink the keyword length; the next sync must reproject the record
    // even though no data changed
    let options = ParsingOptionsBuilder::new()
        .set_keyword_length(3)
        .unwrap()
        .build();
    db.update_options(options, true).unwrap().unwrap();
    let result = db.sync(SyncOptions::default()).unwrap();
    assert_eq!(result.indexed, 1);
    let after = search.documents("data-db-latest");
    assert_eq!(after[0]["data"]["word"]["_k"], "abc");
}

#[test]
fn latest_document_version_matches_committed() {
    let Fixture { search, db } = fixture("db");
    for i in 0..3 {
        db.ingest([Record::new("r1", object! {"i" => i as i64})], true, None)
            .unwrap();
    }
    db.sync(SyncOptions::default()).unwrap();

    let committed = db.committed_version().unwrap().unwrap();
    let latest = search.documents("data-db-latest");
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0]["version"], committed.as_millis());
    assert!(latest[0].get("next").is_none());

    // every archived state has a half-open range with next > version
    for doc in search.documents("data-db-arc-003") {
        let version = doc["version"].as_u64().unwrap();
        let next = doc["next"].as_u64().unwrap();
        assert!(next > version);
        assert_eq!(doc["versions"]["gte"].as_u64().unwrap(), version);
        assert_eq!(doc["versions"]["lt"].as_u64().unwrap(), next);
    }
}

#[test]
fn store_reads_match_search_reads() {
    let Fixture { db, .. } = fixture("db");
    db.ingest(
        [Record::new("r1", object! {"name" => "one", "n" => 1})],
        true,
        None,
    )
    .unwrap();
    let v1 = db.committed_version().unwrap().unwrap();
    db.ingest(
        [Record::new("r1", object! {"name" => "two", "n" => 2})],
        true,
        None,
    )
    .unwrap();
    db.sync(SyncOptions::default()).unwrap();

    // rebuild_data on the indexed projection equals the stored state
    let hits = db.search(&match_all(), Some(v1), 10).unwrap();
    let rebuilt = splitgill::rebuild_data(&hits[0]["data"]);
    assert_eq!(rebuilt, db.get("r1", Some(v1)).unwrap().unwrap());
}

#[test]
fn search_target_selection() {
    let Fixture { db, .. } = fixture("db");
    let (pattern, filter) = db.search_target(None);
    assert_eq!(pattern, "data-db-latest");
    assert!(filter.is_none());

    let (pattern, filter) = db.search_target(Some(Version::from_millis(5)));
    assert_eq!(pattern, "data-db-*");
    assert_eq!(filter.unwrap(), json!({"term": {"versions": 5}}));
}

#[test]
fn empty_data_round_trips_through_projection() {
    let Fixture { search, db } = fixture("db");
    db.ingest(
        [Record::new(
            "r1",
            object! {"keep" => "x", "empty" => "", "gap" => Value::Null},
        )],
        true,
        None,
    )
    .unwrap();
    db.sync(SyncOptions::default()).unwrap();

    let doc = &search.documents("data-db-latest")[0];
    assert_eq!(doc["data"]["empty"], json!({"_u": ""}));
    assert_eq!(doc["data"]["gap"], json!(null));
    assert_eq!(
        splitgill::rebuild_data(&doc["data"]),
        object! {"keep" => "x", "empty" => "", "gap" => Value::Null}
    );
}
