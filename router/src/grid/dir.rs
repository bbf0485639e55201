use drt_common::geom::coord::GridPoint;
use serde::{Deserialize, Serialize};

/// Maze step direction. The discriminants are the 3-bit codes stored in the
/// backtrace buffers and the per-node settled-direction bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    #[default]
    Unknown = 0,
    Down = 1,
    South = 2,
    West = 3,
    East = 4,
    North = 5,
    Up = 6,
}

/// Expansion order of the wavefront.
pub const ALL_DIRECTIONS: [Direction; 6] = [
    Direction::Down,
    Direction::South,
    Direction::West,
    Direction::East,
    Direction::North,
    Direction::Up,
];

pub const DIR_BITS: u32 = 3;

impl Direction {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b111 {
            1 => Direction::Down,
            2 => Direction::South,
            3 => Direction::West,
            4 => Direction::East,
            5 => Direction::North,
            6 => Direction::Up,
            _ => Direction::Unknown,
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn reverse(self) -> Self {
        match self {
            Direction::Down => Direction::Up,
            Direction::Up => Direction::Down,
            Direction::South => Direction::North,
            Direction::North => Direction::South,
            Direction::West => Direction::East,
            Direction::East => Direction::West,
            Direction::Unknown => Direction::Unknown,
        }
    }

    pub fn is_via(self) -> bool {
        matches!(self, Direction::Up | Direction::Down)
    }

    /// East or west.
    pub fn is_x(self) -> bool {
        matches!(self, Direction::East | Direction::West)
    }

    /// North or south.
    pub fn is_y(self) -> bool {
        matches!(self, Direction::North | Direction::South)
    }

    pub fn next(self, p: GridPoint) -> GridPoint {
        match self {
            Direction::East => GridPoint::new(p.x + 1, p.y, p.z),
            Direction::West => GridPoint::new(p.x - 1, p.y, p.z),
            Direction::North => GridPoint::new(p.x, p.y + 1, p.z),
            Direction::South => GridPoint::new(p.x, p.y - 1, p.z),
            Direction::Up => GridPoint::new(p.x, p.y, p.z + 1),
            Direction::Down => GridPoint::new(p.x, p.y, p.z - 1),
            Direction::Unknown => p,
        }
    }

    /// The grid `p` was entered from when arriving in this direction.
    pub fn prev(self, p: GridPoint) -> GridPoint {
        self.reverse().next(p)
    }

    /// Direction of the unit step from `a` to an adjacent `b`.
    pub fn between(a: GridPoint, b: GridPoint) -> Self {
        match (b.x - a.x, b.y - a.y, b.z - a.z) {
            (1, 0, 0) => Direction::East,
            (-1, 0, 0) => Direction::West,
            (0, 1, 0) => Direction::North,
            (0, -1, 0) => Direction::South,
            (0, 0, 1) => Direction::Up,
            (0, 0, -1) => Direction::Down,
            _ => Direction::Unknown,
        }
    }

    /// Canonical form for edge storage: west/south/down become the east/north/up
    /// edge of the neighbouring grid.
    pub fn canonical(self, p: GridPoint) -> (GridPoint, Direction) {
        match self {
            Direction::West | Direction::South | Direction::Down => (self.next(p), self.reverse()),
            _ => (p, self),
        }
    }
}
