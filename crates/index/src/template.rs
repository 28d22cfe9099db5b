//! Index template construction
//!
//! One template per database covers the latest index and every arc index
//! through the `data-{db}-*` pattern, so all of a database's indices share a
//! single schema. The typed leaf sub-fields are mapped through dynamic
//! templates keyed on their `_t`/`_k`/... suffixes, with `copy_to` feeding
//! the document-wide `all_text`/`all_points`/`all_shapes` fields.

use crate::fields::doc;
use serde_json::{json, Value as Json};
use splitgill_core::ParsingOptions;

/// The lowercase normalizer applied to keyword projections.
pub const KEYWORD_NORMALIZER: &str = "lowercase_normalizer";

/// Build the index template body for a database.
///
/// The keyword length from the options becomes the `ignore_above` on `_k`
/// mappings, which is why templates are (re)written at sync time: an options
/// change updates the template before any documents are written.
pub fn index_template(database: &str, options: &ParsingOptions) -> Json {
    json!({
        "index_patterns": [format!("data-{database}-*")],
        "template": {
            "settings": index_settings(),
            "mappings": {
                "dynamic_templates": dynamic_templates(options),
                "properties": {
                    "id": {"type": "keyword"},
                    "version": {"type": "date", "format": "epoch_millis"},
                    "next": {"type": "date", "format": "epoch_millis"},
                    "versions": {"type": "date_range", "format": "epoch_millis"},
                    "data_types": {"type": "keyword"},
                    "parsed_types": {"type": "keyword"},
                    "all_text": {"type": "text"},
                    "all_points": {"type": "geo_point"},
                    "all_shapes": {"type": "geo_shape"},
                },
            },
        },
    })
}

fn index_settings() -> Json {
    json!({
        "index": {
            "codec": "best_compression",
            "mapping": {"total_fields": {"limit": 4000}},
        },
        "analysis": {
            "normalizer": {
                KEYWORD_NORMALIZER: {
                    "type": "custom",
                    "filter": ["lowercase"],
                },
            },
        },
    })
}

fn dynamic_templates(options: &ParsingOptions) -> Json {
    json!([
        {
            "text_field": {
                "path_match": "data.*._t",
                "match_pattern": "simple",
                "mapping": {
                    "type": "text",
                    "copy_to": doc::ALL_TEXT,
                },
            },
        },
        {
            "keyword_field": {
                "path_match": "data.*._k",
                "match_pattern": "simple",
                "mapping": {
                    "type": "keyword",
                    "ignore_above": options.keyword_length(),
                    "normalizer": KEYWORD_NORMALIZER,
                },
            },
        },
        {
            "number_field": {
                "path_match": "data.*._n",
                "match_pattern": "simple",
                "mapping": {"type": "double"},
            },
        },
        {
            "date_field": {
                "path_match": "data.*._d",
                "match_pattern": "simple",
                "mapping": {"type": "date", "format": "epoch_millis"},
            },
        },
        {
            "boolean_field": {
                "path_match": "data.*._b",
                "match_pattern": "simple",
                "mapping": {"type": "boolean"},
            },
        },
        {
            "point_field": {
                "path_match": "data.*._gp",
                "match_pattern": "simple",
                "mapping": {
                    "type": "geo_point",
                    "copy_to": doc::ALL_POINTS,
                },
            },
        },
        {
            "shape_field": {
                "path_match": "data.*._gs",
                "match_pattern": "simple",
                "mapping": {
                    "type": "geo_shape",
                    "copy_to": doc::ALL_SHAPES,
                },
            },
        },
        {
            "unparsed_field": {
                "path_match": "data.*._u",
                "match_pattern": "simple",
                "mapping": {"type": "object", "enabled": false},
            },
        },
    ])
}
