//! Processing extents.
//!
//! An extent is one polygon or multipolygon, either built directly or read
//! from a GeoJSON file that holds exactly one polygonal feature. It is sent
//! to the database as EWKT so that the intersection is evaluated on the real
//! geometry rather than its bounding box.

use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::OnceLock;
use tp_common::{Error, Result};
use tracing::debug;

/// A closed ring of `[x, y]` positions.
pub type Ring = Vec<[f64; 2]>;

/// Exterior ring followed by zero or more holes.
pub type Polygon = Vec<Ring>;

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Polygon(Polygon),
    MultiPolygon(Vec<Polygon>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extent {
    geometry: Geometry,
    srid: Option<u32>,
}

impl Extent {
    pub fn new(geometry: Geometry, srid: Option<u32>) -> Result<Self> {
        if polygons_of(&geometry).is_empty() {
            return Err(Error::InvalidExtent("empty MultiPolygon".into()));
        }
        for polygon in polygons_of(&geometry) {
            validate_polygon(polygon)?;
        }
        Ok(Extent { geometry, srid })
    }

    /// Single-ring polygon from a list of vertices; the ring is closed if needed.
    pub fn from_exterior(mut vertices: Ring, srid: Option<u32>) -> Result<Self> {
        if let (Some(first), Some(last)) = (vertices.first().copied(), vertices.last().copied()) {
            if first != last {
                vertices.push(first);
            }
        }
        Extent::new(Geometry::Polygon(vec![vertices]), srid)
    }

    /// Axis-aligned rectangle.
    pub fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64, srid: Option<u32>) -> Result<Self> {
        Extent::from_exterior(
            vec![[min_x, min_y], [max_x, min_y], [max_x, max_y], [min_x, max_y]],
            srid,
        )
    }

    pub fn from_geojson_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidExtent(format!("cannot read {}: {}", path.display(), e))
        })?;
        let extent = Extent::from_geojson_str(&content)?;
        debug!(path = %path.display(), srid = ?extent.srid, "loaded extent");
        Ok(extent)
    }

    /// Parse a GeoJSON document: a FeatureCollection, a single Feature, or a
    /// bare geometry. Exactly one Polygon or MultiPolygon must be present.
    pub fn from_geojson_str(content: &str) -> Result<Self> {
        let doc: Value = serde_json::from_str(content)
            .map_err(|e| Error::InvalidExtent(format!("not valid JSON: {}", e)))?;

        let srid = doc.get("crs").and_then(crs_srid);
        let geometries: Vec<&Value> = match doc.get("type").and_then(Value::as_str) {
            Some("FeatureCollection") => doc
                .get("features")
                .and_then(Value::as_array)
                .map(|features| features.iter().filter_map(|f| f.get("geometry")).collect())
                .unwrap_or_default(),
            Some("Feature") => doc.get("geometry").into_iter().collect(),
            Some(_) => vec![&doc],
            None => return Err(Error::InvalidExtent("missing GeoJSON 'type'".into())),
        };

        let mut usable: Vec<Geometry> = Vec::new();
        for geometry in geometries {
            if let Some(parsed) = parse_geometry(geometry)? {
                usable.push(parsed);
            }
        }
        match usable.len() {
            1 => Extent::new(usable.remove(0), srid),
            0 => Err(Error::InvalidExtent(
                "no Polygon or MultiPolygon feature found".into(),
            )),
            n => Err(Error::InvalidExtent(format!(
                "expected exactly one polygon feature, found {}",
                n
            ))),
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn srid(&self) -> Option<u32> {
        self.srid
    }

    pub fn polygons(&self) -> Vec<&Polygon> {
        polygons_of(&self.geometry)
    }

    /// `(min_x, min_y, max_x, max_y)` over all rings.
    pub fn bbox(&self) -> (f64, f64, f64, f64) {
        let mut bbox = (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for polygon in self.polygons() {
            for [x, y] in polygon.iter().flatten() {
                bbox.0 = bbox.0.min(*x);
                bbox.1 = bbox.1.min(*y);
                bbox.2 = bbox.2.max(*x);
                bbox.3 = bbox.3.max(*y);
            }
        }
        bbox
    }

    pub fn to_wkt(&self) -> String {
        match &self.geometry {
            Geometry::Polygon(p) => format!("POLYGON{}", polygon_wkt(p)),
            Geometry::MultiPolygon(ps) => {
                let parts: Vec<String> = ps.iter().map(polygon_wkt).collect();
                format!("MULTIPOLYGON({})", parts.join(","))
            }
        }
    }

    /// `SRID=<srid>;<wkt>` when the reference system is known, plain WKT otherwise.
    pub fn to_ewkt(&self) -> String {
        match self.srid {
            Some(srid) => format!("SRID={};{}", srid, self.to_wkt()),
            None => self.to_wkt(),
        }
    }
}

fn polygons_of(geometry: &Geometry) -> Vec<&Polygon> {
    match geometry {
        Geometry::Polygon(p) => vec![p],
        Geometry::MultiPolygon(ps) => ps.iter().collect(),
    }
}

fn validate_polygon(polygon: &Polygon) -> Result<()> {
    if polygon.is_empty() {
        return Err(Error::InvalidExtent("polygon without rings".into()));
    }
    for ring in polygon {
        if ring.len() < 4 {
            return Err(Error::InvalidExtent(format!(
                "ring needs at least 4 positions, got {}",
                ring.len()
            )));
        }
        if ring.first() != ring.last() {
            return Err(Error::InvalidExtent("ring is not closed".into()));
        }
        if ring.iter().flatten().any(|c| !c.is_finite()) {
            return Err(Error::InvalidExtent("non-finite coordinate".into()));
        }
    }
    Ok(())
}

fn polygon_wkt(polygon: &Polygon) -> String {
    let rings: Vec<String> = polygon
        .iter()
        .map(|ring| {
            let coords: Vec<String> = ring.iter().map(|[x, y]| format!("{} {}", x, y)).collect();
            format!("({})", coords.join(","))
        })
        .collect();
    format!("({})", rings.join(","))
}

/// `Ok(None)` for geometry types that cannot serve as an extent.
fn parse_geometry(value: &Value) -> Result<Option<Geometry>> {
    let coords = value.get("coordinates");
    match value.get("type").and_then(Value::as_str) {
        Some("Polygon") => {
            let coords = coords.ok_or_else(|| Error::InvalidExtent("Polygon without coordinates".into()))?;
            Ok(Some(Geometry::Polygon(parse_polygon(coords)?)))
        }
        Some("MultiPolygon") => {
            let parts = coords
                .and_then(Value::as_array)
                .ok_or_else(|| Error::InvalidExtent("MultiPolygon without coordinates".into()))?;
            let polygons = parts.iter().map(parse_polygon).collect::<Result<Vec<_>>>()?;
            Ok(Some(Geometry::MultiPolygon(polygons)))
        }
        _ => Ok(None),
    }
}

fn parse_polygon(value: &Value) -> Result<Polygon> {
    let rings = value
        .as_array()
        .ok_or_else(|| Error::InvalidExtent("polygon coordinates must be an array of rings".into()))?;
    rings
        .iter()
        .map(|ring| -> Result<Ring> {
            ring.as_array()
                .ok_or_else(|| Error::InvalidExtent("ring must be an array of positions".into()))?
                .iter()
                .map(parse_position)
                .collect()
        })
        .collect()
}

fn parse_position(value: &Value) -> Result<[f64; 2]> {
    let pos = value.as_array().filter(|p| p.len() >= 2);
    match pos.map(|p| (p[0].as_f64(), p[1].as_f64())) {
        Some((Some(x), Some(y))) => Ok([x, y]),
        _ => Err(Error::InvalidExtent(format!("invalid position {}", value))),
    }
}

fn epsg_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)epsg:+(\d+)").expect("EPSG pattern is valid"))
}

/// Extract an EPSG code from a GeoJSON `crs` member such as
/// `{"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::28992"}}`.
fn crs_srid(crs: &Value) -> Option<u32> {
    let name = crs.get("properties")?.get("name")?.as_str()?;
    epsg_regex()
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: &str = r#"{
        "type": "FeatureCollection",
        "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::28992"}},
        "features": [
            {"type": "Feature", "properties": {},
             "geometry": {"type": "Polygon",
                          "coordinates": [[[0,0],[10,0],[10,10],[0,10],[0,0]]]}}
        ]
    }"#;

    #[test]
    fn test_parse_feature_collection_with_crs() {
        let extent = Extent::from_geojson_str(SQUARE).unwrap();
        assert_eq!(extent.srid(), Some(28992));
        assert_eq!(
            extent.to_ewkt(),
            "SRID=28992;POLYGON((0 0,10 0,10 10,0 10,0 0))"
        );
        assert_eq!(extent.bbox(), (0.0, 0.0, 10.0, 10.0));
    }

    #[test]
    fn test_bare_multipolygon_without_crs() {
        let doc = r#"{"type": "MultiPolygon", "coordinates": [
            [[[0,0],[1,0],[1,1],[0,0]]],
            [[[5,5],[6,5],[6,6],[5,5]]]
        ]}"#;
        let extent = Extent::from_geojson_str(doc).unwrap();
        assert_eq!(extent.srid(), None);
        assert_eq!(extent.polygons().len(), 2);
        assert!(extent.to_ewkt().starts_with("MULTIPOLYGON(((0 0,"));
    }

    #[test]
    fn test_two_polygon_features_rejected() {
        let doc = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}},
            {"type": "Feature", "geometry": {"type": "Polygon", "coordinates": [[[2,2],[3,2],[3,3],[2,2]]]}}
        ]}"#;
        let err = Extent::from_geojson_str(doc).unwrap_err();
        assert!(matches!(err, Error::InvalidExtent(_)));
        assert!(err.to_string().contains("found 2"));
    }

    #[test]
    fn test_points_only_rejected() {
        let doc = r#"{"type": "Feature", "geometry": {"type": "Point", "coordinates": [1, 2]}}"#;
        let err = Extent::from_geojson_str(doc).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_non_polygon_features_are_ignored() {
        let doc = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "geometry": {"type": "LineString", "coordinates": [[0,0],[1,1]]}},
            {"type": "Feature", "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}}
        ]}"#;
        assert!(Extent::from_geojson_str(doc).is_ok());
    }

    #[test]
    fn test_open_ring_rejected() {
        let doc = r#"{"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1]]]}"#;
        assert!(Extent::from_geojson_str(doc).is_err());
    }

    #[test]
    fn test_from_exterior_closes_ring() {
        let extent = Extent::from_exterior(vec![[0.0, 0.0], [4.0, 0.0], [0.0, 4.0]], Some(7415)).unwrap();
        assert_eq!(extent.to_wkt(), "POLYGON((0 0,4 0,0 4,0 0))");
    }

    #[test]
    fn test_crs_regex_variants() {
        for name in ["EPSG:28992", "epsg::28992", "urn:ogc:def:crs:EPSG::28992"] {
            let crs = serde_json::json!({"type": "name", "properties": {"name": name}});
            assert_eq!(crs_srid(&crs), Some(28992), "{name}");
        }
        let crs = serde_json::json!({"type": "name", "properties": {"name": "CRS84"}});
        assert_eq!(crs_srid(&crs), None);
    }

    #[test]
    fn test_from_missing_file() {
        let err = Extent::from_geojson_file(Path::new("/nonexistent/extent.geojson")).unwrap_err();
        assert!(matches!(err, Error::InvalidExtent(_)));
    }
}
