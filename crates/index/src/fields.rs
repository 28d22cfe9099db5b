//! Search document field names and path helpers
//!
//! The typed projections of a leaf live under short suffix fields, e.g. a
//! `height` field in record data becomes:
//!
//! - `data.height._t` (text)
//! - `data.height._k` (keyword)
//! - `data.height._n` (number)
//!
//! plus `data.height._u` holding the unparsed original.

/// Top-level search document field names.
pub mod doc {
    /// The record id
    pub const ID: &str = "id";
    /// The version of this state
    pub const VERSION: &str = "version";
    /// The version this state was replaced at, absent for current states
    pub const NEXT: &str = "next";
    /// The `[version, next)` range this state was live for
    pub const VERSIONS: &str = "versions";
    /// The parsed data tree
    pub const DATA: &str = "data";
    /// `"path:kind"` entries describing the source data types
    pub const DATA_TYPES: &str = "data_types";
    /// `"path:code"` entries describing the emitted projections
    pub const PARSED_TYPES: &str = "parsed_types";
    /// copy_to target for all `_t` projections
    pub const ALL_TEXT: &str = "all_text";
    /// copy_to target for all `_gp` projections
    pub const ALL_POINTS: &str = "all_points";
    /// copy_to target for all `_gs` projections
    pub const ALL_SHAPES: &str = "all_shapes";
}

/// The typed projection sub-fields of a parsed leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeField {
    /// Unparsed original value
    Unparsed,
    /// Full-text searchable form
    Text,
    /// Exact-match (truncated, lowercase-normalized) form
    Keyword,
    /// Double-precision numeric form
    Number,
    /// Epoch-millisecond date form
    Date,
    /// Boolean form
    Boolean,
    /// WKT point form
    GeoPoint,
    /// WKT shape form
    GeoShape,
}

impl TypeField {
    /// The sub-field name, e.g. `_n`.
    pub const fn as_str(&self) -> &'static str {
        match self {
            TypeField::Unparsed => "_u",
            TypeField::Text => "_t",
            TypeField::Keyword => "_k",
            TypeField::Number => "_n",
            TypeField::Date => "_d",
            TypeField::Boolean => "_b",
            TypeField::GeoPoint => "_gp",
            TypeField::GeoShape => "_gs",
        }
    }

    /// The bare code used in `parsed_types` entries, e.g. `n`.
    pub const fn code(&self) -> &'static str {
        match self {
            TypeField::Unparsed => "u",
            TypeField::Text => "t",
            TypeField::Keyword => "k",
            TypeField::Number => "n",
            TypeField::Date => "d",
            TypeField::Boolean => "b",
            TypeField::GeoPoint => "gp",
            TypeField::GeoShape => "gs",
        }
    }
}

impl std::fmt::Display for TypeField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The full path to a typed sub-field: `data.<path>.<suffix>`.
pub fn parsed_path(field_path: &str, type_field: TypeField) -> String {
    format!("{}.{}.{}", doc::DATA, field_path, type_field)
}

/// Path to the text form of a field.
pub fn text_path(field_path: &str) -> String {
    parsed_path(field_path, TypeField::Text)
}

/// Path to the keyword form of a field.
pub fn keyword_path(field_path: &str) -> String {
    parsed_path(field_path, TypeField::Keyword)
}

/// Path to the number form of a field.
pub fn number_path(field_path: &str) -> String {
    parsed_path(field_path, TypeField::Number)
}

/// Path to the date form of a field.
pub fn date_path(field_path: &str) -> String {
    parsed_path(field_path, TypeField::Date)
}

/// Path to the boolean form of a field.
pub fn boolean_path(field_path: &str) -> String {
    parsed_path(field_path, TypeField::Boolean)
}

/// Path to the point form of a field.
pub fn point_path(field_path: &str) -> String {
    parsed_path(field_path, TypeField::GeoPoint)
}

/// Path to the shape form of a field.
pub fn shape_path(field_path: &str) -> String {
    parsed_path(field_path, TypeField::GeoShape)
}

/// A `data_types` entry: `"path:kind"`.
pub fn data_type_entry(field_path: &str, kind: &str) -> String {
    format!("{field_path}:{kind}")
}

/// A `parsed_types` entry: `"path:code"`.
pub fn parsed_type_entry(field_path: &str, type_field: TypeField) -> String {
    format!("{field_path}:{}", type_field.code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsed_paths() {
        assert_eq!(text_path("height"), "data.height._t");
        assert_eq!(number_path("nested.height"), "data.nested.height._n");
        assert_eq!(point_path("lat"), "data.lat._gp");
    }

    #[test]
    fn test_type_entries() {
        assert_eq!(data_type_entry("h", "float"), "h:float");
        assert_eq!(parsed_type_entry("h", TypeField::Number), "h:n");
        assert_eq!(parsed_type_entry("loc", TypeField::GeoShape), "loc:gs");
    }
}
