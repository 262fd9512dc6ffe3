//! Nest geometry: GeoJSON polygons and multi-polygons on WGS84.

use geo::{
    BooleanOps, BoundingRect, Centroid, Contains, GeodesicArea, InteriorPoint, MultiPolygon, Point,
    Polygon, Rect,
};
use geojson::GeoJson;

use crate::error::NestError;

/// Polygon or multi-polygon boundary of a nest, in `(lon, lat)` order.
#[derive(Debug, Clone, PartialEq)]
pub enum NestGeometry {
    /// A single polygon, possibly with holes.
    Polygon(Polygon<f64>),
    /// Several polygons treated as one nest.
    MultiPolygon(MultiPolygon<f64>),
}

impl NestGeometry {
    /// Converts a GeoJSON geometry. Only `Polygon` and `MultiPolygon` are
    /// supported, and every exterior ring needs three distinct vertices.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::GeometryInvalid`] for other geometry types or
    /// degenerate rings.
    pub fn from_geojson(geometry: geojson::Geometry) -> Result<Self, NestError> {
        let geometry = match geo::Geometry::<f64>::try_from(geometry)? {
            geo::Geometry::Polygon(polygon) => Self::Polygon(polygon),
            geo::Geometry::MultiPolygon(multi) => Self::MultiPolygon(multi),
            other => {
                return Err(NestError::GeometryInvalid(format!(
                    "unsupported geometry type {}",
                    geometry_type_name(&other)
                )));
            }
        };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Parses a GeoJSON document holding either a bare geometry or a
    /// feature with a geometry.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::GeometryInvalid`] if the text is not GeoJSON,
    /// has no geometry, or holds an unsupported one.
    pub fn parse(text: &str) -> Result<Self, NestError> {
        match text.parse::<GeoJson>()? {
            GeoJson::Geometry(geometry) => Self::from_geojson(geometry),
            GeoJson::Feature(feature) => {
                let geometry = feature.geometry.ok_or_else(|| {
                    NestError::GeometryInvalid("feature has no geometry".to_string())
                })?;
                Self::from_geojson(geometry)
            }
            GeoJson::FeatureCollection(_) => Err(NestError::GeometryInvalid(
                "expected a geometry, got a feature collection".to_string(),
            )),
        }
    }

    fn validate(&self) -> Result<(), NestError> {
        let polygons: &[Polygon<f64>] = match self {
            Self::Polygon(polygon) => std::slice::from_ref(polygon),
            Self::MultiPolygon(multi) => &multi.0,
        };
        if polygons.is_empty() {
            return Err(NestError::GeometryInvalid(
                "multipolygon has no polygons".to_string(),
            ));
        }
        for polygon in polygons {
            // rings are closed on construction, so a triangle has 4 coords
            if polygon.exterior().0.len() < 4 {
                return Err(NestError::GeometryInvalid(
                    "ring needs at least three distinct points".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// GeoJSON type name.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Polygon(_) => "Polygon",
            Self::MultiPolygon(_) => "MultiPolygon",
        }
    }

    /// Converts back to a GeoJSON geometry.
    #[must_use]
    pub fn to_geojson(&self) -> geojson::Geometry {
        let value = match self {
            Self::Polygon(polygon) => geojson::Value::from(polygon),
            Self::MultiPolygon(multi) => geojson::Value::from(multi),
        };
        geojson::Geometry::new(value)
    }

    /// Serializes as a GeoJSON geometry string, the form stored in the
    /// nests table.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::Internal`] if serialization fails.
    pub fn to_geojson_string(&self) -> Result<String, NestError> {
        serde_json::to_string(&self.to_geojson()).map_err(|e| NestError::Internal(e.to_string()))
    }

    /// Smallest axis-aligned rectangle containing the geometry.
    #[must_use]
    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        match self {
            Self::Polygon(polygon) => polygon.bounding_rect(),
            Self::MultiPolygon(multi) => multi.bounding_rect(),
        }
    }

    /// Exact point-in-polygon test. Points on the boundary are outside.
    #[must_use]
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        let point = Point::new(lon, lat);
        match self {
            Self::Polygon(polygon) => polygon.contains(&point),
            Self::MultiPolygon(multi) => multi.contains(&point),
        }
    }

    /// Geodesic area in square meters.
    #[must_use]
    pub fn area_m2(&self) -> f64 {
        match self {
            Self::Polygon(polygon) => polygon.geodesic_area_unsigned(),
            Self::MultiPolygon(multi) => multi.geodesic_area_unsigned(),
        }
    }

    /// Planar centroid.
    #[must_use]
    pub fn centroid(&self) -> Option<Point<f64>> {
        match self {
            Self::Polygon(polygon) => polygon.centroid(),
            Self::MultiPolygon(multi) => multi.centroid(),
        }
    }

    /// Point to label the nest with: the centroid when it falls inside,
    /// otherwise a point guaranteed to be in the interior.
    #[must_use]
    pub fn label_point(&self) -> Option<Point<f64>> {
        if let Some(centroid) = self.centroid()
            && self.contains(centroid.y(), centroid.x())
        {
            return Some(centroid);
        }
        let interior = match self {
            Self::Polygon(polygon) => polygon.interior_point(),
            Self::MultiPolygon(multi) => multi.interior_point(),
        };
        interior.or_else(|| self.centroid())
    }

    /// Exterior rings as `[lat, lon]` paths, the order webhook consumers
    /// expect.
    #[must_use]
    pub fn poly_path(&self) -> Vec<Vec<[f64; 2]>> {
        let ring_path = |polygon: &Polygon<f64>| -> Vec<[f64; 2]> {
            polygon.exterior().coords().map(|c| [c.y, c.x]).collect()
        };
        match self {
            Self::Polygon(polygon) => vec![ring_path(polygon)],
            Self::MultiPolygon(multi) => multi.iter().map(ring_path).collect(),
        }
    }

    /// Geometry as a multi-polygon.
    #[must_use]
    pub fn to_multi_polygon(&self) -> MultiPolygon<f64> {
        match self {
            Self::Polygon(polygon) => MultiPolygon::new(vec![polygon.clone()]),
            Self::MultiPolygon(multi) => multi.clone(),
        }
    }

    /// Geodesic area of the intersection with `other`, in square meters.
    #[must_use]
    pub fn intersection_area_m2(&self, other: &Self) -> f64 {
        self.to_multi_polygon()
            .intersection(&other.to_multi_polygon())
            .geodesic_area_unsigned()
    }
}

fn geometry_type_name(geometry: &geo::Geometry<f64>) -> &'static str {
    match geometry {
        geo::Geometry::Point(_) => "Point",
        geo::Geometry::Line(_) => "Line",
        geo::Geometry::LineString(_) => "LineString",
        geo::Geometry::Polygon(_) => "Polygon",
        geo::Geometry::MultiPoint(_) => "MultiPoint",
        geo::Geometry::MultiLineString(_) => "MultiLineString",
        geo::Geometry::MultiPolygon(_) => "MultiPolygon",
        geo::Geometry::GeometryCollection(_) => "GeometryCollection",
        geo::Geometry::Rect(_) => "Rect",
        geo::Geometry::Triangle(_) => "Triangle",
    }
}
