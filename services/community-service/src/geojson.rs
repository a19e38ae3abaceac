use serde::Serialize;
use serde_json::{Map, Value};

/// One drawn outline, a sequence of lon/lat (or raw Mercator) pairs.
pub type Ring = Vec<[f64; 2]>;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: [f64; 2] },
    LineString { coordinates: Vec<[f64; 2]> },
    Polygon { coordinates: Vec<Vec<[f64; 2]>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<[f64; 2]>>> },
}

impl Geometry {
    /// Picks the geometry the ring set can actually support: a lone
    /// vertex is a point, two vertices a line, three or more a polygon.
    /// Several rings become one polygon each inside a multipolygon.
    pub fn from_rings(rings: Vec<Ring>) -> Option<Geometry> {
        let mut rings: Vec<Ring> = rings.into_iter().filter(|ring| !ring.is_empty()).collect();
        match rings.len() {
            0 => None,
            1 => {
                let ring = rings.remove(0);
                Some(match ring.len() {
                    1 => Geometry::Point {
                        coordinates: ring[0],
                    },
                    2 => Geometry::LineString { coordinates: ring },
                    _ => Geometry::Polygon {
                        coordinates: vec![ring],
                    },
                })
            }
            _ => Some(Geometry::MultiPolygon {
                coordinates: rings.into_iter().map(|ring| vec![ring]).collect(),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub geometry: Geometry,
    pub properties: Map<String, Value>,
}

impl Feature {
    pub fn new(geometry: Geometry, properties: Map<String, Value>) -> Self {
        Self {
            kind: "Feature",
            geometry,
            properties,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            kind: "FeatureCollection",
            features,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}
