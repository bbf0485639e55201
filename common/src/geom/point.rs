use super::Coord;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Point<T> {
    pub x: T,
    pub y: T,
}

impl<T> Point<T> {
    pub fn new(x: T, y: T) -> Self {
        Self { x, y }
    }
}

impl Point<Coord> {
    pub fn manhattan(&self, other: &Point<Coord>) -> Coord {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }
}
