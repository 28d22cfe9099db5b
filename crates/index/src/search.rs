//! Search query builders
//!
//! Pure helpers that assemble query DSL bodies for the search engine; no I/O
//! happens here. Term queries pick the right typed sub-field from the value
//! kind, so callers search by meaning rather than by mapping detail.
//!
//! `rebuild_data` inverts the parser, recovering the original data tree from
//! an indexed projection tree.

use crate::fields::{
    boolean_path, date_path, keyword_path, number_path, point_path, shape_path, text_path,
};
use serde_json::{json, Map, Value as Json};
use splitgill_core::{Value, Version};

/// Match documents whose `[version, next)` range covers the given version.
pub fn version_query(version: Version) -> Json {
    json!({"term": {"versions": version.as_millis()}})
}

/// Match documents for a specific record id.
pub fn id_query(record_id: &str) -> Json {
    json!({"term": {"id": record_id}})
}

/// Match everything.
pub fn match_all() -> Json {
    json!({"match_all": {}})
}

/// Exact-match a field, targeting the typed sub-field that fits the value:
/// numbers hit `_n`, booleans `_b`, strings `_k`.
pub fn term_query(field_path: &str, value: &Value) -> Json {
    match value {
        Value::Bool(b) => json!({"term": {boolean_path(field_path): b}}),
        Value::Int(i) => json!({"term": {number_path(field_path): i}}),
        Value::Float(f) => json!({"term": {number_path(field_path): f}}),
        other => {
            let text = match other {
                Value::String(s) => s.clone(),
                other => serde_json::to_string(&other).unwrap_or_default(),
            };
            json!({"term": {keyword_path(field_path): text}})
        }
    }
}

/// Range-match the numeric form of a field. Bounds are inclusive; `None`
/// leaves that side open.
pub fn range_query(field_path: &str, lo: Option<f64>, hi: Option<f64>) -> Json {
    bounded_range(number_path(field_path), lo.map(Json::from), hi.map(Json::from))
}

/// Range-match the date form of a field, bounds in epoch milliseconds.
pub fn date_range_query(field_path: &str, lo: Option<i64>, hi: Option<i64>) -> Json {
    bounded_range(date_path(field_path), lo.map(Json::from), hi.map(Json::from))
}

fn bounded_range(path: String, lo: Option<Json>, hi: Option<Json>) -> Json {
    let mut bounds = Map::new();
    if let Some(lo) = lo {
        bounds.insert("gte".to_string(), lo);
    }
    if let Some(hi) = hi {
        bounds.insert("lte".to_string(), hi);
    }
    json!({"range": {path: bounds}})
}

/// Full-text match on a field's text form.
pub fn text_query(field_path: &str, query: &str) -> Json {
    json!({"match": {text_path(field_path): query}})
}

/// Full-text match across every field via the `all_text` copy target.
pub fn all_text_query(query: &str) -> Json {
    json!({"match": {"all_text": query}})
}

/// Match documents whose point at the field falls within `distance_m`
/// metres of a centre.
pub fn geo_distance_query(field_path: &str, lat: f64, lon: f64, distance_m: f64) -> Json {
    json!({
        "geo_distance": {
            "distance": format!("{distance_m}m"),
            point_path(field_path): {"lat": lat, "lon": lon},
        }
    })
}

/// Match documents whose shape at the field intersects the given WKT shape.
pub fn geo_intersects_query(field_path: &str, wkt: &str) -> Json {
    json!({
        "geo_shape": {
            shape_path(field_path): {
                "shape": wkt,
                "relation": "intersects",
            }
        }
    })
}

/// Combine queries that must all match.
pub fn filter_all(queries: Vec<Json>) -> Json {
    json!({"bool": {"filter": queries}})
}

/// Invert the parser: strip the typed projections from a parsed tree and
/// recover the original data.
///
/// A map holding `_u` is a parsed leaf and yields its unparsed value; any
/// other map is a container whose injected `_gs`/`_gp` keys are dropped and
/// whose members recurse. Null slots stay null.
pub fn rebuild_data(parsed: &Json) -> Value {
    match parsed {
        Json::Object(map) => {
            if let Some(unparsed) = map.get("_u") {
                return Value::from(unparsed.clone());
            }
            Value::Object(
                map.iter()
                    .filter(|(key, _)| *key != "_gs" && *key != "_gp")
                    .map(|(key, value)| (key.clone(), rebuild_data(value)))
                    .collect(),
            )
        }
        Json::Array(items) => Value::Array(items.iter().map(rebuild_data).collect()),
        other => Value::from(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse, ParserCache};
    use splitgill_core::{object, GeoFieldHint, ParsingOptions, ParsingOptionsBuilder};

    #[test]
    fn test_version_query_targets_versions_range() {
        let query = version_query(Version::from_millis(100));
        assert_eq!(query, json!({"term": {"versions": 100}}));
    }

    #[test]
    fn test_term_query_picks_subfield_by_kind() {
        assert_eq!(
            term_query("h", &Value::Float(40.6)),
            json!({"term": {"data.h._n": 40.6}})
        );
        assert_eq!(
            term_query("n", &Value::String("Jeremy".into())),
            json!({"term": {"data.n._k": "Jeremy"}})
        );
        assert_eq!(
            term_query("flag", &Value::Bool(true)),
            json!({"term": {"data.flag._b": true}})
        );
        assert_eq!(
            term_query("count", &Value::Int(3)),
            json!({"term": {"data.count._n": 3}})
        );
    }

    #[test]
    fn test_range_queries() {
        assert_eq!(
            range_query("h", Some(1.0), Some(2.0)),
            json!({"range": {"data.h._n": {"gte": 1.0, "lte": 2.0}}})
        );
        assert_eq!(
            range_query("h", Some(1.0), None),
            json!({"range": {"data.h._n": {"gte": 1.0}}})
        );
        assert_eq!(
            date_range_query("when", None, Some(1000)),
            json!({"range": {"data.when._d": {"lte": 1000}}})
        );
    }

    #[test]
    fn test_text_queries() {
        assert_eq!(
            text_query("n", "jeremy"),
            json!({"match": {"data.n._t": "jeremy"}})
        );
        assert_eq!(
            all_text_query("llama"),
            json!({"match": {"all_text": "llama"}})
        );
    }

    #[test]
    fn test_geo_queries() {
        let distance = geo_distance_query("lat", 51.5, -0.1, 500.0);
        assert_eq!(distance["geo_distance"]["distance"], "500m");
        assert!(distance["geo_distance"]["data.lat._gp"].is_object());

        let intersects = geo_intersects_query("area", "POINT(0 0)");
        assert_eq!(
            intersects["geo_shape"]["data.area._gs"]["shape"],
            "POINT(0 0)"
        );
    }

    fn rebuild_round_trip(data: Value, options: &ParsingOptions) {
        let mut cache = ParserCache::with_default_capacity();
        let parsed = parse(&data, options, &mut cache);
        assert_eq!(rebuild_data(&parsed.data), data);
    }

    #[test]
    fn test_rebuild_inverts_parse() {
        let options = ParsingOptions::default();
        rebuild_round_trip(
            object! {
                "name" => "Jeremy",
                "height" => 40.6,
                "count" => 3,
                "flag" => true,
                "gap" => Value::Null,
                "empty" => "",
                "tags" => Value::Array(vec!["a".into(), Value::Null, Value::Int(2)]),
                "nested" => object! {"inner" => object! {"deep" => "x"}},
            },
            &options,
        );
    }

    #[test]
    fn test_rebuild_strips_injected_geo_keys() {
        let options = ParsingOptionsBuilder::new()
            .add_geo_hint(GeoFieldHint::new("lat", "lon"))
            .unwrap()
            .build();
        rebuild_round_trip(
            object! {
                "lat" => 51.5,
                "lon" => -0.1,
                "loc" => object! {
                    "type" => "Point",
                    "coordinates" => Value::Array(vec![102.0.into(), 0.5.into()]),
                },
            },
            &options,
        );
    }
}
