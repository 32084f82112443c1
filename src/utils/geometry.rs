// Bounding-box math shared by the deduplicator and the grouper
//
// All coordinates are non-negative pixel integers. Gaps are signed: a
// negative gap means the two boxes overlap on that axis.

use serde::{Deserialize, Serialize};

use crate::core::errors::{GeometryError, GeometryResult};

/// A single polygon vertex as reported by the OCR engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<[i32; 2]> for Point {
    fn from(p: [i32; 2]) -> Self {
        Self { x: p[0], y: p[1] }
    }
}

/// Axis-aligned bounding box, inclusive of its edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[u32; 4]", into = "[u32; 4]")]
pub struct BBox {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
}

impl BBox {
    /// Build a box, rejecting inverted extents on either axis
    pub fn new(min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> GeometryResult<Self> {
        if min_x > max_x || min_y > max_y {
            return Err(GeometryError::InvertedBox {
                min_x,
                min_y,
                max_x,
                max_y,
            });
        }
        Ok(Self {
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }

    pub fn min_x(&self) -> u32 {
        self.min_x
    }

    pub fn min_y(&self) -> u32 {
        self.min_y
    }

    pub fn max_x(&self) -> u32 {
        self.max_x
    }

    pub fn max_y(&self) -> u32 {
        self.max_y
    }

    pub fn width(&self) -> u32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn center_y(&self) -> f32 {
        (self.min_y as f32 + self.max_y as f32) / 2.0
    }

    /// The four corners clockwise from top-left, as the overlay expects them
    pub fn corners(&self) -> [Point; 4] {
        let (x0, y0, x1, y1) = (
            self.min_x as i32,
            self.min_y as i32,
            self.max_x as i32,
            self.max_y as i32,
        );
        [
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ]
    }
}

impl TryFrom<[u32; 4]> for BBox {
    type Error = GeometryError;

    fn try_from(v: [u32; 4]) -> Result<Self, Self::Error> {
        BBox::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [u32; 4] {
    fn from(b: BBox) -> Self {
        [b.min_x, b.min_y, b.max_x, b.max_y]
    }
}

/// Axis-aligned extent of an OCR polygon.
///
/// Fails with [`GeometryError::NegativeCoordinate`] if any vertex lies left of
/// or above the frame origin.
pub fn bbox_of(points: &[Point; 4]) -> GeometryResult<BBox> {
    if let Some(p) = points.iter().find(|p| p.x < 0 || p.y < 0) {
        return Err(GeometryError::NegativeCoordinate { x: p.x, y: p.y });
    }

    let min_x = points.iter().map(|p| p.x).min().unwrap_or(0) as u32;
    let max_x = points.iter().map(|p| p.x).max().unwrap_or(0) as u32;
    let min_y = points.iter().map(|p| p.y).min().unwrap_or(0) as u32;
    let max_y = points.iter().map(|p| p.y).max().unwrap_or(0) as u32;

    BBox::new(min_x, min_y, max_x, max_y)
}

pub fn centroid(bbox: &BBox) -> (f32, f32) {
    (
        (bbox.min_x as f32 + bbox.max_x as f32) / 2.0,
        (bbox.min_y as f32 + bbox.max_y as f32) / 2.0,
    )
}

pub fn centroid_distance(a: &BBox, b: &BBox) -> f32 {
    let (ax, ay) = centroid(a);
    let (bx, by) = centroid(b);
    ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
}

pub fn union(a: &BBox, b: &BBox) -> BBox {
    BBox {
        min_x: a.min_x.min(b.min_x),
        min_y: a.min_y.min(b.min_y),
        max_x: a.max_x.max(b.max_x),
        max_y: a.max_y.max(b.max_y),
    }
}

/// Union of any number of boxes; `None` for an empty input
pub fn union_all<'a, I>(boxes: I) -> Option<BBox>
where
    I: IntoIterator<Item = &'a BBox>,
{
    boxes.into_iter().fold(None, |acc, b| match acc {
        None => Some(*b),
        Some(u) => Some(union(&u, b)),
    })
}

/// Signed horizontal distance between two boxes (negative = overlap)
pub fn horizontal_gap(a: &BBox, b: &BBox) -> i64 {
    a.min_x.max(b.min_x) as i64 - a.max_x.min(b.max_x) as i64
}

/// Signed vertical distance between two boxes (negative = overlap)
pub fn vertical_gap(a: &BBox, b: &BBox) -> i64 {
    a.min_y.max(b.min_y) as i64 - a.max_y.min(b.max_y) as i64
}

/// Intersection area divided by the smaller box's area.
///
/// Degenerate (zero-area) boxes yield 0.0.
pub fn overlap_ratio(a: &BBox, b: &BBox) -> f32 {
    let min_area = a.area().min(b.area());
    if min_area == 0 {
        return 0.0;
    }

    let w = (-horizontal_gap(a, b)).max(0) as u64;
    let h = (-vertical_gap(a, b)).max(0) as u64;
    (w * h) as f32 / min_area as f32
}

/// Fraction of `a`'s width that overlaps `b` horizontally.
///
/// A zero-width box counts as fully overlapping when it lies inside `b`.
pub fn horizontal_overlap_fraction(a: &BBox, b: &BBox) -> f32 {
    let overlap = -horizontal_gap(a, b);
    if a.width() == 0 {
        return if overlap >= 0 { 1.0 } else { 0.0 };
    }
    overlap.max(0) as f32 / a.width() as f32
}
