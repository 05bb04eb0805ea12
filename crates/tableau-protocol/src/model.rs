//! Wire data model: shapes, table summaries and saved drawings.
//!
//! Shapes are a closed set of drawing primitives discriminated by their
//! `type` field, plus whatever extra fields the drawing client attached. The
//! server never interprets geometry when synchronizing a table; the geometry
//! helpers here serve clients and tools.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier of a shape, unique within its table.
pub type ShapeId = u64;

/// Global table identifier.
pub type TableId = u64;

/// A 2D point in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Raw shape fields keyed by name.
pub type Fields = Map<String, Value>;

/// A drawable element of a table.
///
/// On the wire a shape is a flat object:
/// `{"id": 3, "type": "LineShape", "x1": ...}`. The `id` sent by a client on
/// `addShape` is ignored and replaced by the server. Fields the geometry does
/// not know about are kept in `extra` and sent back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Fields")]
pub struct Shape {
    pub id: ShapeId,
    #[serde(flatten)]
    pub geometry: Geometry,
    #[serde(flatten)]
    pub extra: Fields,
}

impl Shape {
    #[must_use]
    pub fn new(id: ShapeId, geometry: Geometry) -> Self {
        Self {
            id,
            geometry,
            extra: Fields::new(),
        }
    }

    /// The `type` tag of this shape.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.geometry.kind()
    }
}

impl TryFrom<Fields> for Shape {
    type Error = serde_json::Error;

    fn try_from(fields: Fields) -> Result<Self, Self::Error> {
        let (id, shape) = split_shape(fields)?;
        Ok(Shape {
            id: id.unwrap_or_default(),
            ..shape
        })
    }
}

/// Replacement for the existing shape with the same `id`.
///
/// Unlike [`Shape`], the `id` is required.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Fields")]
pub struct ShapeUpdate(pub Shape);

impl TryFrom<Fields> for ShapeUpdate {
    type Error = serde_json::Error;

    fn try_from(fields: Fields) -> Result<Self, Self::Error> {
        match split_shape(fields)? {
            (Some(id), shape) => Ok(ShapeUpdate(Shape { id, ..shape })),
            (None, _) => Err(serde::de::Error::missing_field("id")),
        }
    }
}

/// Separate the optional `id`, the geometry and the remaining fields.
fn split_shape(mut fields: Fields) -> Result<(Option<ShapeId>, Shape), serde_json::Error> {
    let id = match fields.remove("id") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(serde_json::from_value(raw)?),
    };
    let geometry: Geometry = serde_json::from_value(Value::Object(fields.clone()))?;
    if let Value::Object(known) = serde_json::to_value(&geometry)? {
        for key in known.keys() {
            fields.remove(key);
        }
    }
    let shape = Shape {
        id: 0,
        geometry,
        extra: fields,
    };
    Ok((id, shape))
}

/// Tool-specific shape fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    /// Straight line between two points.
    #[serde(rename = "LineShape")]
    Line {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        size: f64,
        color: String,
    },
    /// Axis-aligned rectangle from its top-left corner.
    #[serde(rename = "RectangleShape")]
    Rectangle {
        x: f64,
        y: f64,
        w: f64,
        h: f64,
        size: f64,
        color: String,
        fill: String,
    },
    /// Ellipse around centre `(x, y)` with radii `w` and `h`.
    #[serde(rename = "EllipseShape")]
    Ellipse {
        x: f64,
        y: f64,
        w: f64,
        h: f64,
        size: f64,
        color: String,
        fill: String,
    },
    /// Free-hand stroke.
    #[serde(rename = "DotShape")]
    Dot {
        points: Vec<Point>,
        size: f64,
        color: String,
    },
    /// Closed polygon.
    #[serde(rename = "PolygonShape")]
    Polygon {
        corners: Vec<Point>,
        size: f64,
        color: String,
        fill: String,
    },
}

/// Tolerance of the line hit test, in squared-ish determinant units.
const LINE_HIT_TOLERANCE: f64 = 100.0;

impl Geometry {
    /// The wire `type` tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Geometry::Line { .. } => "LineShape",
            Geometry::Rectangle { .. } => "RectangleShape",
            Geometry::Ellipse { .. } => "EllipseShape",
            Geometry::Dot { .. } => "DotShape",
            Geometry::Polygon { .. } => "PolygonShape",
        }
    }

    /// Move the shape by `(dx, dy)`.
    pub fn translate(&mut self, dx: f64, dy: f64) {
        match self {
            Geometry::Line { x1, y1, x2, y2, .. } => {
                *x1 += dx;
                *x2 += dx;
                *y1 += dy;
                *y2 += dy;
            }
            Geometry::Rectangle { x, y, .. } | Geometry::Ellipse { x, y, .. } => {
                *x += dx;
                *y += dy;
            }
            Geometry::Dot { points, .. } => translate_points(points, dx, dy),
            Geometry::Polygon { corners, .. } => translate_points(corners, dx, dy),
        }
    }

    /// Whether `(px, py)` hits the shape.
    #[must_use]
    pub fn hit_test(&self, px: f64, py: f64) -> bool {
        match self {
            Geometry::Line {
                x1,
                y1,
                x2,
                y2,
                size,
                ..
            } => {
                // Collinearity via the determinant avoids dividing by the
                // segment length; the bounding box keeps it to the segment.
                let det = (x2 - x1) * (py - y1) - (y2 - y1) * (px - x1);
                let pad = size.max(1.0);
                det.abs() < LINE_HIT_TOLERANCE
                    && px >= x1.min(*x2) - pad
                    && px <= x1.max(*x2) + pad
                    && py >= y1.min(*y2) - pad
                    && py <= y1.max(*y2) + pad
            }
            Geometry::Rectangle { x, y, w, h, .. } => {
                px >= *x && px <= x + w && py >= *y && py <= y + h
            }
            Geometry::Ellipse { x, y, w, h, .. } => {
                if *w <= 0.0 || *h <= 0.0 {
                    return false;
                }
                let nx = (px - x) / w;
                let ny = (py - y) / h;
                nx * nx + ny * ny <= 1.0
            }
            Geometry::Dot { points, size, .. } => {
                let reach = (size / 2.0).max(1.0);
                match points.as_slice() {
                    [] => false,
                    [only] => distance(*only, Point::new(px, py)) <= reach,
                    _ => points
                        .windows(2)
                        .any(|w| segment_distance(w[0], w[1], Point::new(px, py)) <= reach),
                }
            }
            Geometry::Polygon { corners, .. } => point_in_polygon(corners, Point::new(px, py)),
        }
    }
}

fn translate_points(points: &mut [Point], dx: f64, dy: f64) {
    for p in points {
        p.x += dx;
        p.y += dy;
    }
}

fn distance(a: Point, b: Point) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

fn segment_distance(a: Point, b: Point, p: Point) -> f64 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len2 = dx * dx + dy * dy;
    if len2 == 0.0 {
        return distance(a, p);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len2).clamp(0.0, 1.0);
    distance(Point::new(a.x + t * dx, a.y + t * dy), p)
}

// Even-odd rule.
fn point_in_polygon(corners: &[Point], p: Point) -> bool {
    if corners.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = corners.len() - 1;
    for i in 0..corners.len() {
        let (a, b) = (corners[i], corners[j]);
        if (a.y > p.y) != (b.y > p.y) && p.x < (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Lobby listing entry for one active table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSummary {
    pub id: TableId,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub user_count: usize,
}

/// Listing entry for one saved drawing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSummary {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub shape_count: usize,
    /// RFC 3339 timestamp.
    pub saved_at: String,
}

/// Full table state sent once to a joining viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedTable {
    pub id: TableId,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub shapes: Vec<Shape>,
}

/// The logged-in user as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub nickname: String,
    pub guest: bool,
}
