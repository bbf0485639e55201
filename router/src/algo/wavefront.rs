use crate::grid::{Cost, Direction, dir::DIR_BITS};
use drt_common::geom::Coord;
use drt_common::geom::coord::GridPoint;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Number of recent directions a frontier entry carries before committing
/// the oldest one to the grid.
pub const BUFFER_DEPTH: u32 = 2;

const BUFFER_MASK: u16 = (1 << (BUFFER_DEPTH * DIR_BITS)) - 1;
const DIR_MASK: u16 = (1 << DIR_BITS) - 1;

/// Inclusive maze-index box, used for NDR taper regions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaperBox {
    pub lo: GridPoint,
    pub hi: GridPoint,
}

impl TaperBox {
    pub fn contains(&self, p: GridPoint) -> bool {
        p.x >= self.lo.x
            && p.x <= self.hi.x
            && p.y >= self.lo.y
            && p.y <= self.hi.y
            && p.z >= self.lo.z
            && p.z <= self.hi.z
    }
}

/// One frontier entry.
#[derive(Clone, Copy, Debug)]
pub struct WavefrontGrid {
    pub p: GridPoint,
    pub path_cost: Cost,
    /// Path cost plus heuristic.
    pub cost: Cost,
    /// Manhattan distance to the search center.
    pub dist: Coord,
    /// Wire run since the last via, per axis. `Coord::MAX` before any via.
    pub v_length: (Coord, Coord),
    pub prev_via_up: bool,
    /// Wire run since the last turn. `Coord::MAX` right after a via.
    pub t_length: Coord,
    pub src_taper: Option<TaperBox>,
    buffer: u16,
}

impl WavefrontGrid {
    pub fn seed(p: GridPoint, cost: Cost, dist: Coord, src_taper: Option<TaperBox>) -> Self {
        Self {
            p,
            path_cost: 0,
            cost,
            dist,
            v_length: (Coord::MAX, Coord::MAX),
            prev_via_up: true,
            t_length: Coord::MAX,
            src_taper,
            buffer: 0,
        }
    }

    /// Direction of the step that reached this entry.
    pub fn last_dir(&self) -> Direction {
        Direction::from_bits((self.buffer & DIR_MASK) as u8)
    }

    /// The `i`-th most recent buffered direction, newest first.
    pub fn buffered_dir(&self, i: u32) -> Direction {
        Direction::from_bits(((self.buffer >> (i * DIR_BITS)) & DIR_MASK) as u8)
    }

    /// Pushes `dir` as the newest direction and returns the one evicted from
    /// the far end (`Unknown` while the buffer is still filling).
    pub fn shift_add(&mut self, dir: Direction) -> Direction {
        let tail = self.buffered_dir(BUFFER_DEPTH - 1);
        self.buffer = ((self.buffer << DIR_BITS) | dir.bits() as u16) & BUFFER_MASK;
        tail
    }

    /// Grid at which the evicted direction arrived: walk back through the
    /// buffered directions from `p`.
    pub fn tail_point(&self) -> GridPoint {
        let mut q = self.p;
        for i in 0..BUFFER_DEPTH {
            q = self.buffered_dir(i).prev(q);
        }
        q
    }
}

// Entries are equal when they sort equal; the heap never needs more.
impl PartialEq for WavefrontGrid {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for WavefrontGrid {}

impl Ord for WavefrontGrid {
    // BinaryHeap is a max-heap: the "greatest" entry is the one to pop first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .cmp(&self.cost)
            .then_with(|| other.dist.cmp(&self.dist))
            .then_with(|| self.p.z.cmp(&other.p.z))
            .then_with(|| self.path_cost.cmp(&other.path_cost))
    }
}

impl PartialOrd for WavefrontGrid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Lazy-deletion priority queue of frontier entries.
#[derive(Default)]
pub struct Wavefront {
    heap: BinaryHeap<WavefrontGrid>,
}

impl Wavefront {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, grid: WavefrontGrid) {
        self.heap.push(grid);
    }

    pub fn pop(&mut self) -> Option<WavefrontGrid> {
        self.heap.pop()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
