//! Geographic value handling
//!
//! Three sources of geo data are recognised during parsing:
//!
//! - **Geo hints** from the parsing options: lat/lon(/radius) field
//!   combinations checked against every map in a record's data.
//! - **GeoJSON maps**: a map whose keys are exactly `type` and
//!   `coordinates` with a geometry primitive type.
//! - **WKT strings**: leaf strings holding a `POINT`, `LINESTRING`, or
//!   `POLYGON`.
//!
//! Only the geometry primitives are matched, not multipart geometries;
//! multipart data should be split over multiple fields. Invalid candidates
//! are silently skipped and remain ordinary data.

use splitgill_core::{GeoFieldHint, Value};
use std::collections::BTreeMap;
use std::f64::consts::TAU;

/// A validated geometry: coordinates are `(lon, lat)` pairs, longitudes in
/// [-180, 180], latitudes in [-90, 90].
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    /// A single position
    Point(f64, f64),
    /// An open line of at least two positions
    LineString(Vec<(f64, f64)>),
    /// Closed rings: exterior first, then holes
    Polygon(Vec<Vec<(f64, f64)>>),
}

impl Geometry {
    /// Render as WKT.
    pub fn to_wkt(&self) -> String {
        match self {
            Geometry::Point(lon, lat) => format!("POINT({lon} {lat})"),
            Geometry::LineString(points) => {
                format!("LINESTRING({})", positions_wkt(points))
            }
            Geometry::Polygon(rings) => {
                let rings: Vec<String> = rings
                    .iter()
                    .map(|ring| format!("({})", positions_wkt(ring)))
                    .collect();
                format!("POLYGON({})", rings.join(","))
            }
        }
    }

    /// The centroid, as a point geometry.
    ///
    /// Points are their own centroid, line strings use the vertex mean, and
    /// polygons use the area centroid of the exterior ring (falling back to
    /// the vertex mean for degenerate rings).
    pub fn centroid(&self) -> Geometry {
        match self {
            Geometry::Point(lon, lat) => Geometry::Point(*lon, *lat),
            Geometry::LineString(points) => {
                let (lon, lat) = vertex_mean(points);
                Geometry::Point(lon, lat)
            }
            Geometry::Polygon(rings) => {
                let exterior = &rings[0];
                let (lon, lat) = ring_centroid(exterior);
                Geometry::Point(lon, lat)
            }
        }
    }
}

fn positions_wkt(points: &[(f64, f64)]) -> String {
    points
        .iter()
        .map(|(lon, lat)| format!("{lon} {lat}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn vertex_mean(points: &[(f64, f64)]) -> (f64, f64) {
    let n = points.len() as f64;
    let (lon_sum, lat_sum) = points
        .iter()
        .fold((0.0, 0.0), |(lons, lats), (lon, lat)| {
            (lons + lon, lats + lat)
        });
    (lon_sum / n, lat_sum / n)
}

/// Shoelace area centroid of a closed ring.
fn ring_centroid(ring: &[(f64, f64)]) -> (f64, f64) {
    let mut area = 0.0;
    let mut cx = 0.0;
    let mut cy = 0.0;
    for window in ring.windows(2) {
        let (x1, y1) = window[0];
        let (x2, y2) = window[1];
        let cross = x1 * y2 - x2 * y1;
        area += cross;
        cx += (x1 + x2) * cross;
        cy += (y1 + y2) * cross;
    }
    if area.abs() < f64::EPSILON {
        return vertex_mean(&ring[..ring.len().saturating_sub(1).max(1)]);
    }
    let area = area / 2.0;
    (cx / (6.0 * area), cy / (6.0 * area))
}

// ============================================================================
// Coordinate validation
// ============================================================================

/// Numeric view of a value for coordinate parsing: ints, finite floats, and
/// numeric strings all count.
fn coordinate_number(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) if f.is_finite() => Some(*f),
        Value::String(s) => {
            let parsed: f64 = s.parse().ok()?;
            parsed.is_finite().then_some(parsed)
        }
        _ => None,
    }
}

fn valid_longitude(lon: f64) -> bool {
    (-180.0..=180.0).contains(&lon)
}

fn valid_latitude(lat: f64) -> bool {
    (-90.0..=90.0).contains(&lat)
}

/// Parse a longitude out of a value, range checked.
pub fn parse_longitude(value: &Value) -> Option<f64> {
    coordinate_number(value).filter(|lon| valid_longitude(*lon))
}

/// Parse a latitude out of a value, range checked.
pub fn parse_latitude(value: &Value) -> Option<f64> {
    coordinate_number(value).filter(|lat| valid_latitude(*lat))
}

/// Parse a radius in metres out of a value; must be positive.
pub fn parse_radius(value: &Value) -> Option<f64> {
    coordinate_number(value).filter(|radius| *radius > 0.0)
}

/// Check the winding of a closed ring. Per RFC 7946 the exterior ring must
/// be anticlockwise (`right = true`), holes clockwise. Edge-sum test: a
/// negative sum means anticlockwise.
fn is_winding_valid(ring: &[(f64, f64)], right: bool) -> bool {
    let edge_sum: f64 = ring
        .windows(2)
        .map(|w| (w[1].0 - w[0].0) * (w[1].1 + w[0].1))
        .sum();
    if right {
        edge_sum < 0.0
    } else {
        edge_sum >= 0.0
    }
}

// ============================================================================
// GeoJSON detection
// ============================================================================

/// Check whether a map is a GeoJSON geometry primitive: keys exactly
/// `{type, coordinates}`, type one of Point/LineString/Polygon, coordinates
/// valid. Extra Z coordinates are ignored. Invalid candidates return `None`.
pub fn as_geometry(map: &BTreeMap<String, Value>) -> Option<Geometry> {
    if map.len() != 2 {
        return None;
    }
    let kind = map.get("type")?.as_str()?;
    let coordinates = map.get("coordinates")?;

    match kind {
        "Point" => {
            let (lon, lat) = position(coordinates)?;
            Some(Geometry::Point(lon, lat))
        }
        "LineString" => {
            let points = position_list(coordinates)?;
            (points.len() >= 2).then_some(Geometry::LineString(points))
        }
        "Polygon" => {
            let raw_rings = coordinates.as_array()?;
            if raw_rings.is_empty() {
                return None;
            }
            let mut rings = Vec::with_capacity(raw_rings.len());
            for (index, raw_ring) in raw_rings.iter().enumerate() {
                let ring = position_list(raw_ring)?;
                // rings must be closed and wound per RFC 7946: exterior
                // anticlockwise, holes clockwise
                if ring.len() < 4 || ring[0] != ring[ring.len() - 1] {
                    return None;
                }
                if !is_winding_valid(&ring, index == 0) {
                    return None;
                }
                rings.push(ring);
            }
            Some(Geometry::Polygon(rings))
        }
        _ => None,
    }
}

/// A single `[lon, lat]` or `[lon, lat, z]` position.
fn position(value: &Value) -> Option<(f64, f64)> {
    let coords = value.as_array()?;
    if !(2..=3).contains(&coords.len()) {
        return None;
    }
    let lon = parse_longitude(&coords[0])?;
    let lat = parse_latitude(&coords[1])?;
    Some((lon, lat))
}

fn position_list(value: &Value) -> Option<Vec<(f64, f64)>> {
    value.as_array()?.iter().map(position).collect()
}

// ============================================================================
// Geo hints
// ============================================================================

/// The result of a hint match: the point and the shape to attach under the
/// hint's lat field.
#[derive(Debug, Clone, PartialEq)]
pub struct HintMatch {
    /// The lat/lon point
    pub point: Geometry,
    /// The circle polygon when a radius was found, otherwise the point again
    pub shape: Geometry,
}

/// Check a map against a hint. The lat and lon fields must both be present
/// and hold valid coordinates; an absent or invalid radius degrades the
/// shape to the point rather than failing the match.
pub fn match_hint(hint: &GeoFieldHint, map: &BTreeMap<String, Value>) -> Option<HintMatch> {
    let lat = parse_latitude(map.get(&hint.lat_field)?)?;
    let lon = parse_longitude(map.get(&hint.lon_field)?)?;
    let point = Geometry::Point(lon, lat);

    let radius = hint
        .radius_field
        .as_ref()
        .and_then(|field| map.get(field))
        .and_then(parse_radius);
    let shape = match radius {
        Some(radius) => circle_polygon(lat, lon, radius, hint.segments),
        None => point.clone(),
    };
    Some(HintMatch { point, shape })
}

/// Approximate a circle around a point with a `4 * segments` sided polygon.
/// Metres are converted to degrees with the equirectangular scale at the
/// centre latitude. The ring is generated anticlockwise and closed.
pub fn circle_polygon(lat: f64, lon: f64, radius_m: f64, segments: u32) -> Geometry {
    const METRES_PER_DEGREE: f64 = 111_320.0;
    let sides = (4 * segments.max(1)) as usize;
    let dlat = radius_m / METRES_PER_DEGREE;
    let dlon = radius_m / (METRES_PER_DEGREE * lat.to_radians().cos().abs().max(1e-9));

    let mut ring = Vec::with_capacity(sides + 1);
    for i in 0..sides {
        let theta = TAU * i as f64 / sides as f64;
        let point_lon = (lon + dlon * theta.cos()).clamp(-180.0, 180.0);
        let point_lat = (lat + dlat * theta.sin()).clamp(-90.0, 90.0);
        ring.push((point_lon, point_lat));
    }
    ring.push(ring[0]);
    Geometry::Polygon(vec![ring])
}

// ============================================================================
// WKT parsing
// ============================================================================

/// Try to parse a string as a WKT geometry primitive. Coordinates are range
/// checked and polygons must close; winding is not enforced since WKT has
/// no winding convention.
pub fn parse_wkt(text: &str) -> Option<Geometry> {
    let trimmed = text.trim();
    let upper = trimmed.to_ascii_uppercase();

    if let Some(body) = wkt_body(&upper, trimmed, "POINT") {
        let mut points = wkt_positions(body)?;
        return (points.len() == 1).then(|| {
            let (lon, lat) = points.remove(0);
            Geometry::Point(lon, lat)
        });
    }
    if let Some(body) = wkt_body(&upper, trimmed, "LINESTRING") {
        let points = wkt_positions(body)?;
        return (points.len() >= 2).then_some(Geometry::LineString(points));
    }
    if let Some(body) = wkt_body(&upper, trimmed, "POLYGON") {
        let mut rings = Vec::new();
        for ring_text in split_rings(body) {
            let ring = wkt_positions(&ring_text)?;
            if ring.len() < 4 || ring[0] != ring[ring.len() - 1] {
                return None;
            }
            rings.push(ring);
        }
        return (!rings.is_empty()).then_some(Geometry::Polygon(rings));
    }
    None
}

/// Strip `TYPE ( ... )` and return the inner text, or None if the prefix
/// doesn't match.
fn wkt_body<'a>(upper: &str, original: &'a str, keyword: &str) -> Option<&'a str> {
    if !upper.starts_with(keyword) {
        return None;
    }
    let rest = original[keyword.len()..].trim_start();
    let inner = rest.strip_prefix('(')?.strip_suffix(')')?;
    Some(inner)
}

/// Split a polygon body `(a),(b)` into ring bodies.
fn split_rings(body: &str) -> Vec<String> {
    let mut rings = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in body.chars() {
        match c {
            '(' => {
                depth += 1;
                if depth == 1 {
                    current.clear();
                    continue;
                }
            }
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    rings.push(current.clone());
                    continue;
                }
            }
            _ => {}
        }
        if depth >= 1 {
            current.push(c);
        }
    }
    rings
}

/// Parse `x y, x y, ...` positions with validation. Extra Z values are
/// ignored.
fn wkt_positions(body: &str) -> Option<Vec<(f64, f64)>> {
    body.split(',')
        .map(|pair| {
            let mut numbers = pair.split_whitespace();
            let lon: f64 = numbers.next()?.parse().ok()?;
            let lat: f64 = numbers.next()?.parse().ok()?;
            // a third (Z) value is allowed and dropped; more than that is
            // not a position
            if numbers.clone().count() > 1 {
                return None;
            }
            (valid_longitude(lon) && valid_latitude(lat)).then_some((lon, lat))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use splitgill_core::object;

    fn geojson_point(lon: f64, lat: f64) -> BTreeMap<String, Value> {
        let value = object! {
            "type" => "Point",
            "coordinates" => Value::Array(vec![lon.into(), lat.into()]),
        };
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_point_detection_and_wkt() {
        let map = geojson_point(-0.1, 51.5);
        let geometry = as_geometry(&map).unwrap();
        assert_eq!(geometry, Geometry::Point(-0.1, 51.5));
        assert_eq!(geometry.to_wkt(), "POINT(-0.1 51.5)");
    }

    #[test]
    fn test_point_with_z_coordinate_ignored() {
        let value = object! {
            "type" => "Point",
            "coordinates" => Value::Array(vec![(-0.1).into(), 51.5.into(), 100.0.into()]),
        };
        let geometry = as_geometry(value.as_object().unwrap()).unwrap();
        assert_eq!(geometry, Geometry::Point(-0.1, 51.5));
    }

    #[test]
    fn test_out_of_range_coordinates_rejected() {
        assert!(as_geometry(&geojson_point(-181.0, 0.0)).is_none());
        assert!(as_geometry(&geojson_point(0.0, 95.0)).is_none());
    }

    #[test]
    fn test_extra_keys_disqualify() {
        let value = object! {
            "type" => "Point",
            "coordinates" => Value::Array(vec![0.0.into(), 0.0.into()]),
            "name" => "not geojson",
        };
        assert!(as_geometry(value.as_object().unwrap()).is_none());
    }

    fn ring_value(points: &[(f64, f64)]) -> Value {
        Value::Array(
            points
                .iter()
                .map(|(lon, lat)| Value::Array(vec![(*lon).into(), (*lat).into()]))
                .collect(),
        )
    }

    #[test]
    fn test_polygon_must_close() {
        let open = object! {
            "type" => "Polygon",
            "coordinates" => Value::Array(vec![ring_value(&[
                (0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0),
            ])]),
        };
        assert!(as_geometry(open.as_object().unwrap()).is_none());
    }

    #[test]
    fn test_polygon_winding_enforced() {
        // anticlockwise exterior: valid
        let ccw = object! {
            "type" => "Polygon",
            "coordinates" => Value::Array(vec![ring_value(&[
                (0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0),
            ])]),
        };
        assert!(as_geometry(ccw.as_object().unwrap()).is_some());

        // clockwise exterior: rejected
        let cw = object! {
            "type" => "Polygon",
            "coordinates" => Value::Array(vec![ring_value(&[
                (0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0), (0.0, 0.0),
            ])]),
        };
        assert!(as_geometry(cw.as_object().unwrap()).is_none());
    }

    #[test]
    fn test_polygon_centroid() {
        let square = Geometry::Polygon(vec![vec![
            (0.0, 0.0),
            (2.0, 0.0),
            (2.0, 2.0),
            (0.0, 2.0),
            (0.0, 0.0),
        ]]);
        let centroid = square.centroid();
        match centroid {
            Geometry::Point(lon, lat) => {
                assert!((lon - 1.0).abs() < 1e-9);
                assert!((lat - 1.0).abs() < 1e-9);
            }
            other => panic!("expected point, got {other:?}"),
        }
    }

    #[test]
    fn test_hint_match_point_only() {
        let hint = GeoFieldHint::new("lat", "lon");
        let data = object! {"lat" => 51.5, "lon" => -0.1};
        let matched = match_hint(&hint, data.as_object().unwrap()).unwrap();
        assert_eq!(matched.point, Geometry::Point(-0.1, 51.5));
        assert_eq!(matched.shape, matched.point);
    }

    #[test]
    fn test_hint_match_with_radius_builds_circle() {
        let hint = GeoFieldHint::new("lat", "lon")
            .with_radius("r_m")
            .with_segments(8);
        let data = object! {"lat" => 51.5, "lon" => -0.1, "r_m" => 100};
        let matched = match_hint(&hint, data.as_object().unwrap()).unwrap();
        match &matched.shape {
            Geometry::Polygon(rings) => {
                // 4 * 8 sides plus the closing point
                assert_eq!(rings[0].len(), 33);
                assert_eq!(rings[0][0], rings[0][32]);
            }
            other => panic!("expected polygon, got {other:?}"),
        }
    }

    #[test]
    fn test_hint_match_string_coordinates() {
        let hint = GeoFieldHint::new("lat", "lon");
        let data = object! {"lat" => "51.5", "lon" => "-0.1"};
        assert!(match_hint(&hint, data.as_object().unwrap()).is_some());
    }

    #[test]
    fn test_hint_rejects_invalid_latitude() {
        let hint = GeoFieldHint::new("lat", "lon");
        let data = object! {"lat" => 91.0, "lon" => 0.0};
        assert!(match_hint(&hint, data.as_object().unwrap()).is_none());
    }

    #[test]
    fn test_circle_winding_is_anticlockwise() {
        let circle = circle_polygon(51.5, -0.1, 100.0, 8);
        match &circle {
            Geometry::Polygon(rings) => assert!(is_winding_valid(&rings[0], true)),
            other => panic!("expected polygon, got {other:?}"),
        }
    }

    #[test]
    fn test_wkt_point_parsing() {
        assert_eq!(
            parse_wkt("POINT(-0.1 51.5)"),
            Some(Geometry::Point(-0.1, 51.5))
        );
        assert_eq!(
            parse_wkt("point (-0.1 51.5)"),
            Some(Geometry::Point(-0.1, 51.5))
        );
        assert!(parse_wkt("POINT(-200 51.5)").is_none());
        assert!(parse_wkt("POINTER(-0.1 51.5)").is_none());
    }

    #[test]
    fn test_wkt_linestring_parsing() {
        let parsed = parse_wkt("LINESTRING(0 0,1 1,2 0)").unwrap();
        assert_eq!(
            parsed,
            Geometry::LineString(vec![(0.0, 0.0), (1.0, 1.0), (2.0, 0.0)])
        );
    }

    #[test]
    fn test_wkt_polygon_parsing_requires_closure() {
        assert!(parse_wkt("POLYGON((0 0,1 0,1 1,0 1,0 0))").is_some());
        assert!(parse_wkt("POLYGON((0 0,1 0,1 1,0 1))").is_none());
    }

    #[test]
    fn test_wkt_round_trip() {
        let wkt = "POLYGON((0 0,1 0,1 1,0 1,0 0))";
        let parsed = parse_wkt(wkt).unwrap();
        assert_eq!(parsed.to_wkt(), wkt);
    }
}
