//! Parsing options
//!
//! `ParsingOptions` controls how the indexing parser projects leaf values
//! into typed search fields. Options are persisted and versioned exactly like
//! record data: each change is staged, committed with a version, and kept in
//! a history so historical states are reprojected with the options that were
//! active when they were written.
//!
//! `ParsingOptionsBuilder` is the only way to construct options, so every
//! instance has validated bounds.

use crate::error::{Result, SplitgillError};
use crate::version::Version;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Smallest accepted keyword length.
pub const MIN_KEYWORD_LENGTH: usize = 1;
/// Largest accepted keyword length (the search engine's hard term limit).
pub const MAX_KEYWORD_LENGTH: usize = 32766;
/// Default keyword length.
pub const DEFAULT_KEYWORD_LENGTH: usize = 8191;
/// Default float rendering format: 15 significant digits, the precision of a
/// search-engine double.
pub const DEFAULT_FLOAT_FORMAT: &str = "{0:.15g}";

static DEFAULT_TRUE_VALUES: &[&str] = &["true", "yes", "y"];
static DEFAULT_FALSE_VALUES: &[&str] = &["false", "no", "n"];

/// Default date formats: ISO date, naive ISO datetime (with and without
/// fractional seconds), and zoned ISO datetime. First match wins, so the
/// more specific zoned forms come after the naive ones they extend.
static DEFAULT_DATE_FORMATS: Lazy<Vec<String>> = Lazy::new(|| {
    [
        "%Y-%m-%d",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%z",
        "%Y-%m-%dT%H:%M:%S%.f%z",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
});

/// A hint that a pair of fields in a map carry geographic coordinates.
///
/// Applied to every map in a record's data tree. When `radius_field` names a
/// positive numeric field, the hint produces a circle polygon approximated
/// with `4 * segments` sides; otherwise the shape is just the point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeoFieldHint {
    /// Field holding the latitude
    pub lat_field: String,
    /// Field holding the longitude
    pub lon_field: String,
    /// Optional field holding an uncertainty radius in metres
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius_field: Option<String>,
    /// Circle approximation quality, `4 * segments` polygon sides
    #[serde(default = "default_segments")]
    pub segments: u32,
}

fn default_segments() -> u32 {
    16
}

impl GeoFieldHint {
    /// A lat/lon hint with the default segment count.
    pub fn new(lat_field: impl Into<String>, lon_field: impl Into<String>) -> Self {
        GeoFieldHint {
            lat_field: lat_field.into(),
            lon_field: lon_field.into(),
            radius_field: None,
            segments: default_segments(),
        }
    }

    /// Add a radius field to this hint.
    pub fn with_radius(mut self, radius_field: impl Into<String>) -> Self {
        self.radius_field = Some(radius_field.into());
        self
    }

    /// Override the circle approximation quality.
    pub fn with_segments(mut self, segments: u32) -> Self {
        self.segments = segments;
        self
    }
}

/// Immutable, validated parser configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsingOptions {
    keyword_length: usize,
    float_format: String,
    date_formats: Vec<String>,
    true_values: BTreeSet<String>,
    false_values: BTreeSet<String>,
    geo_hints: Vec<GeoFieldHint>,
}

impl Default for ParsingOptions {
    fn default() -> Self {
        ParsingOptionsBuilder::new().build()
    }
}

impl ParsingOptions {
    /// Maximum characters kept in the keyword (`_k`) projection.
    pub fn keyword_length(&self) -> usize {
        self.keyword_length
    }

    /// The configured float format string.
    pub fn float_format(&self) -> &str {
        &self.float_format
    }

    /// The configured date formats, in match order.
    pub fn date_formats(&self) -> &[String] {
        &self.date_formats
    }

    /// The configured geo hints.
    pub fn geo_hints(&self) -> &[GeoFieldHint] {
        &self.geo_hints
    }

    /// Render a float the way it will appear in `_t`/`_k`.
    pub fn format_float(&self, value: f64) -> String {
        format_significant(value, self.significant_digits())
    }

    fn significant_digits(&self) -> usize {
        // "{0:.15g}" -> 15; anything unparseable falls back to the default
        parse_float_format(&self.float_format).unwrap_or(15)
    }

    /// Parse a string as a boolean using the configured true/false values.
    /// Matching is case-insensitive.
    pub fn parse_bool(&self, text: &str) -> Option<bool> {
        let lowered = text.to_lowercase();
        if self.true_values.contains(&lowered) {
            Some(true)
        } else if self.false_values.contains(&lowered) {
            Some(false)
        } else {
            None
        }
    }

    /// Parse a string as a date using the configured formats, first match
    /// wins. Returns epoch milliseconds; naive datetimes and bare dates are
    /// filled with UTC so the result is stable across hosts.
    pub fn parse_date(&self, text: &str) -> Option<i64> {
        for format in &self.date_formats {
            if format_has_zone(format) {
                if let Ok(parsed) = DateTime::parse_from_str(text, format) {
                    return Some(parsed.timestamp_millis());
                }
            } else if format_has_time(format) {
                if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
                    return Some(Utc.from_utc_datetime(&parsed).timestamp_millis());
                }
            } else if let Ok(parsed) = NaiveDate::parse_from_str(text, format) {
                let midnight = parsed.and_hms_opt(0, 0, 0)?;
                return Some(Utc.from_utc_datetime(&midnight).timestamp_millis());
            }
        }
        None
    }

    /// Parse a string as a finite number. NaN and the infinities never
    /// match, in words or symbols.
    pub fn parse_number(text: &str) -> Option<f64> {
        let parsed: f64 = text.parse().ok()?;
        parsed.is_finite().then_some(parsed)
    }
}

fn format_has_zone(format: &str) -> bool {
    format.contains("%z") || format.contains("%:z") || format.contains("%#z")
}

fn format_has_time(format: &str) -> bool {
    format.contains("%H") || format.contains("%T")
}

/// Extract the significant-digit count from a `"{0:.15g}"` style format.
fn parse_float_format(format: &str) -> Option<usize> {
    let start = format.find('.')?;
    let end = format.find('g')?;
    format.get(start + 1..end)?.parse().ok()
}

/// Render a float with the given number of significant digits, trimming
/// trailing zeros, switching to exponent notation the way `%g` does.
fn format_significant(value: f64, sig_digits: usize) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    let sig = sig_digits.max(1);
    let sci = format!("{:.*e}", sig - 1, value);
    let (mantissa, exponent) = match sci.split_once('e') {
        Some(parts) => parts,
        None => return value.to_string(),
    };
    let exponent: i64 = match exponent.parse() {
        Ok(e) => e,
        Err(_) => return value.to_string(),
    };
    if exponent >= -4 && exponent < sig as i64 {
        let decimals = (sig as i64 - 1 - exponent).max(0) as usize;
        trim_trailing_zeros(format!("{value:.decimals$}"))
    } else {
        format!("{}e{:+}", trim_trailing_zeros(mantissa.to_string()), exponent)
    }
}

fn trim_trailing_zeros(text: String) -> String {
    if !text.contains('.') {
        return text;
    }
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Builder for `ParsingOptions`.
///
/// Starts from the library defaults; every mutating method returns the
/// builder for chaining, with the validated ones returning `Result`.
#[derive(Debug, Clone)]
pub struct ParsingOptionsBuilder {
    keyword_length: usize,
    float_format: String,
    date_formats: Vec<String>,
    true_values: BTreeSet<String>,
    false_values: BTreeSet<String>,
    geo_hints: Vec<GeoFieldHint>,
}

impl Default for ParsingOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ParsingOptionsBuilder {
    /// A builder loaded with the default options.
    pub fn new() -> Self {
        ParsingOptionsBuilder {
            keyword_length: DEFAULT_KEYWORD_LENGTH,
            float_format: DEFAULT_FLOAT_FORMAT.to_string(),
            date_formats: DEFAULT_DATE_FORMATS.clone(),
            true_values: DEFAULT_TRUE_VALUES.iter().map(|s| s.to_string()).collect(),
            false_values: DEFAULT_FALSE_VALUES.iter().map(|s| s.to_string()).collect(),
            geo_hints: Vec::new(),
        }
    }

    /// Set the keyword truncation length, accepted range 1..=32766.
    pub fn set_keyword_length(mut self, length: usize) -> Result<Self> {
        if !(MIN_KEYWORD_LENGTH..=MAX_KEYWORD_LENGTH).contains(&length) {
            return Err(SplitgillError::validation(format!(
                "keyword_length {length} outside {MIN_KEYWORD_LENGTH}..={MAX_KEYWORD_LENGTH}"
            )));
        }
        self.keyword_length = length;
        Ok(self)
    }

    /// Set the float rendering format. Must be a `"{0:.Ng}"` style pattern.
    pub fn set_float_format(mut self, format: impl Into<String>) -> Result<Self> {
        let format = format.into();
        if parse_float_format(&format).is_none() {
            return Err(SplitgillError::validation(format!(
                "float_format '{format}' is not a significant-digit pattern"
            )));
        }
        self.float_format = format;
        Ok(self)
    }

    /// Append a date format to try. Duplicates and empty strings are ignored.
    pub fn add_date_format(mut self, format: impl Into<String>) -> Self {
        let format = format.into();
        if !format.is_empty() && !self.date_formats.contains(&format) {
            self.date_formats.push(format);
        }
        self
    }

    /// Remove all date formats; no strings will parse as dates.
    pub fn clear_date_formats(mut self) -> Self {
        self.date_formats.clear();
        self
    }

    /// Restore the default date formats.
    pub fn reset_date_formats(mut self) -> Self {
        self.date_formats = DEFAULT_DATE_FORMATS.clone();
        self
    }

    /// Add a string that parses to `true`. Lowercased before storage;
    /// empty strings are ignored.
    pub fn add_true_value(mut self, value: impl Into<String>) -> Self {
        let value = value.into().to_lowercase();
        if !value.is_empty() {
            self.true_values.insert(value);
        }
        self
    }

    /// Add a string that parses to `false`. Lowercased before storage;
    /// empty strings are ignored.
    pub fn add_false_value(mut self, value: impl Into<String>) -> Self {
        let value = value.into().to_lowercase();
        if !value.is_empty() {
            self.false_values.insert(value);
        }
        self
    }

    /// Add a geo hint. The lat field name must be unique across hints since
    /// it anchors where the parsed point lands.
    pub fn add_geo_hint(mut self, hint: GeoFieldHint) -> Result<Self> {
        if hint.lat_field.is_empty() || hint.lon_field.is_empty() {
            return Err(SplitgillError::validation(
                "geo hint needs non-empty lat and lon field names",
            ));
        }
        if self.geo_hints.iter().any(|h| h.lat_field == hint.lat_field) {
            return Err(SplitgillError::validation(format!(
                "geo hint lat field '{}' already in use",
                hint.lat_field
            )));
        }
        self.geo_hints.push(hint);
        Ok(self)
    }

    /// Remove all geo hints.
    pub fn clear_geo_hints(mut self) -> Self {
        self.geo_hints.clear();
        self
    }

    /// Build the immutable options.
    pub fn build(self) -> ParsingOptions {
        ParsingOptions {
            keyword_length: self.keyword_length,
            float_format: self.float_format,
            date_formats: self.date_formats,
            true_values: self.true_values,
            false_values: self.false_values,
            geo_hints: self.geo_hints,
        }
    }
}

/// Version-keyed parsing options with lookup by the version they were active
/// for. Options committed at version `v` apply to all states in `[v, next)`.
#[derive(Debug, Clone, Default)]
pub struct OptionsRange {
    // ascending by version
    entries: Vec<(Version, ParsingOptions)>,
}

impl OptionsRange {
    /// Build from (version, options) pairs in any order.
    pub fn new(mut entries: Vec<(Version, ParsingOptions)>) -> Self {
        entries.sort_by_key(|(version, _)| *version);
        OptionsRange { entries }
    }

    /// The newest committed options, or the defaults when none exist.
    pub fn latest(&self) -> ParsingOptions {
        self.entries
            .last()
            .map(|(_, options)| options.clone())
            .unwrap_or_default()
    }

    /// The options active at the given version: the newest entry with
    /// version <= the requested one, or the defaults before any entry.
    pub fn at(&self, version: Version) -> ParsingOptions {
        match self
            .entries
            .partition_point(|(entry_version, _)| *entry_version <= version)
        {
            0 => ParsingOptions::default(),
            n => self.entries[n - 1].1.clone(),
        }
    }

    /// The newest options version, if any exist.
    pub fn latest_version(&self) -> Option<Version> {
        self.entries.last().map(|(version, _)| *version)
    }

    /// True when no options have been committed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
