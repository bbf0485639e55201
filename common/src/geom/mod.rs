pub mod coord;
pub mod point;
pub mod rect;
pub mod rtree;

/// Database units.
pub type Coord = i32;
