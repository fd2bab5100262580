//! Point features read from a vector layer
//!
//! The store is loaded once per run and never mutated afterwards.

use std::collections::HashMap;
use std::fmt;

use crate::core::error::{Error, LayerKind, Result};
use crate::core::gis::Gis;

/// Planar map coordinate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
}

impl Coordinate {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Planar Euclidean distance, no z contribution
    pub fn distance(&self, other: &Coordinate) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Formats as `x,y`, the form `start_coordinates` expects
impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

/// Join coordinates into one `x1,y1,x2,y2,...` parameter value
pub fn join_coordinates<'a, I>(coordinates: I) -> String
where
    I: IntoIterator<Item = &'a Coordinate>,
{
    coordinates
        .into_iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// A point feature identified by its category id
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub id: u32,
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(id: u32, x: f64, y: f64) -> Self {
        Self { id, x, y }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.x, self.y)
    }
}

/// Immutable set of points ordered by ascending id
#[derive(Debug, Clone)]
pub struct PointSet {
    points: Vec<Point>,
    index: HashMap<u32, usize>,
}

impl PointSet {
    /// Build a store from points in any order. Ids must be unique.
    pub fn from_points(mut points: Vec<Point>) -> Result<Self> {
        points.sort_by_key(|p| p.id);

        let mut index = HashMap::with_capacity(points.len());
        for (i, point) in points.iter().enumerate() {
            if index.insert(point.id, i).is_some() {
                return Err(Error::InvalidInput(format!(
                    "Duplicate point category {}",
                    point.id
                )));
            }
        }

        Ok(Self { points, index })
    }

    /// Load the point features of a vector layer.
    ///
    /// Fails with `SourceUnavailable` when the layer does not exist.
    pub async fn load<G: Gis>(gis: &G, layer: &str) -> Result<Self> {
        gis.require(LayerKind::Vector, layer).await?;
        let points = gis.read_points(layer).await?;
        log::debug!("Loaded {} points from <{}>", points.len(), layer);
        Self::from_points(points)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&Point> {
        self.index.get(&id).map(|&i| &self.points[i])
    }

    /// Ids in ascending order
    pub fn ids(&self) -> Vec<u32> {
        self.points.iter().map(|p| p.id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point> {
        self.points.iter()
    }
}

/// Parse `v.out.ascii format=point separator=pipe` output.
///
/// Lines are `x|y|cat` or `x|y|z|cat`; features without a category are
/// skipped since they cannot be addressed by id.
pub fn parse_point_ascii(text: &str) -> Result<Vec<Point>> {
    let mut points = Vec::new();

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split('|').collect();
        let parse_f64 = |s: &str| {
            s.trim().parse::<f64>().map_err(|_| {
                Error::Parse(format!("line {}: bad coordinate '{}'", lineno + 1, s))
            })
        };

        let (x, y, cat) = match fields.len() {
            2 => continue,
            3 => (parse_f64(fields[0])?, parse_f64(fields[1])?, fields[2]),
            4 => (parse_f64(fields[0])?, parse_f64(fields[1])?, fields[3]),
            _ => {
                return Err(Error::Parse(format!(
                    "line {}: expected x|y|cat, got '{}'",
                    lineno + 1,
                    line
                )))
            }
        };

        if cat.trim().is_empty() {
            continue;
        }
        let id = cat.trim().parse::<u32>().map_err(|_| {
            Error::Parse(format!("line {}: bad category '{}'", lineno + 1, cat))
        })?;

        points.push(Point::new(id, x, y));
    }

    Ok(points)
}
