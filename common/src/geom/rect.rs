use super::Coord;
use super::point::Point;
use serde::{Deserialize, Serialize};

/// Closed axis-aligned box in database units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rect {
    pub min: Point<Coord>,
    pub max: Point<Coord>,
}

impl Rect {
    pub fn new(min: Point<Coord>, max: Point<Coord>) -> Self {
        Self { min, max }
    }

    /// Builds a normalized box from two arbitrary corners.
    pub fn from_coords(x1: Coord, y1: Coord, x2: Coord, y2: Coord) -> Self {
        Self {
            min: Point::new(x1.min(x2), y1.min(y2)),
            max: Point::new(x1.max(x2), y1.max(y2)),
        }
    }

    pub fn width(&self) -> Coord {
        self.max.x - self.min.x
    }
    pub fn height(&self) -> Coord {
        self.max.y - self.min.y
    }
    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }
    pub fn min_dim(&self) -> Coord {
        self.width().min(self.height())
    }
    pub fn center(&self) -> Point<Coord> {
        Point::new(
            (self.min.x + self.max.x) / 2,
            (self.min.y + self.max.y) / 2,
        )
    }

    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y
    }

    pub fn bloat(&self, d: Coord) -> Rect {
        Rect::new(
            Point::new(self.min.x - d, self.min.y - d),
            Point::new(self.max.x + d, self.max.y + d),
        )
    }

    pub fn translate(&self, p: Point<Coord>) -> Rect {
        Rect::new(
            Point::new(self.min.x + p.x, self.min.y + p.y),
            Point::new(self.max.x + p.x, self.max.y + p.y),
        )
    }

    /// Open-interior overlap; touching edges do not count.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
    }

    /// Closed intersection; touching edges count.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    pub fn contains(&self, p: Point<Coord>) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        self.contains(other.min) && self.contains(other.max)
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let r = Rect::new(
            Point::new(self.min.x.max(other.min.x), self.min.y.max(other.min.y)),
            Point::new(self.max.x.min(other.max.x), self.max.y.min(other.max.y)),
        );
        r.is_valid().then_some(r)
    }

    pub fn merge(&self, other: &Rect) -> Rect {
        Rect::new(
            Point::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            Point::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        )
    }

    /// Gap between two boxes along each axis, zero where they overlap.
    pub fn gap(&self, other: &Rect) -> (Coord, Coord) {
        let dx = (other.min.x - self.max.x).max(self.min.x - other.max.x).max(0);
        let dy = (other.min.y - self.max.y).max(self.min.y - other.max.y).max(0);
        (dx, dy)
    }

    pub fn distance_sq_to_point(&self, p: Point<Coord>) -> i64 {
        let dx = (self.min.x - p.x).max(p.x - self.max.x).max(0) as i64;
        let dy = (self.min.y - p.y).max(p.y - self.max.y).max(0) as i64;
        dx * dx + dy * dy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_vs_open_overlap() {
        let a = Rect::from_coords(0, 0, 10, 10);
        let b = Rect::from_coords(10, 0, 20, 10);
        assert!(a.intersects(&b));
        assert!(!a.overlaps(&b));
        assert_eq!(a.intersection(&b), Some(Rect::from_coords(10, 0, 10, 10)));
    }

    #[test]
    fn test_gap_and_distance() {
        let a = Rect::from_coords(0, 0, 10, 10);
        let b = Rect::from_coords(14, 13, 20, 20);
        assert_eq!(a.gap(&b), (4, 3));
        assert_eq!(a.distance_sq_to_point(Point::new(13, 14)), 9 + 16);
        assert_eq!(a.distance_sq_to_point(Point::new(5, 5)), 0);
    }
}
