pub mod dir;
pub mod node;

pub use dir::Direction;
pub use node::Node;

use crate::utils::conversion::GridConverter;
use bitvec::prelude::*;
use drt_common::db::tech::{RoutingLayer, Tech};
use drt_common::geom::Coord;
use drt_common::geom::coord::GridPoint;
use drt_common::geom::point::Point;
use drt_common::geom::rect::Rect;
use node::*;
use serde::{Deserialize, Serialize};

pub type Cost = u64;

pub const MARKER_COST_STEP: u8 = 10;

/// Cost weights of one worker; escalated between iterations by the driver.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CostWeights {
    pub grid: u32,
    pub guide: u32,
    pub block: u32,
    pub drc: u32,
    pub marker: u32,
    pub fixed_shape: u32,
    pub route_with_jumpers: bool,
    pub jumper_multiplier: u32,
    pub iteration: usize,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            grid: 2,
            guide: 1,
            block: 32,
            drc: 8,
            marker: 32,
            fixed_shape: 8,
            route_with_jumpers: false,
            jumper_multiplier: 2,
            iteration: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapeCost {
    RouteShape,
    Marker,
    FixedShape,
}

/// Per-layer data the cost model reads during search.
#[derive(Clone, Debug)]
pub struct LayerInfo {
    pub horizontal: bool,
    pub width: Coord,
    pub min_width: Coord,
    pub pitch: Coord,
    pub offset: Coord,
}

impl LayerInfo {
    fn from_layer(layer: &RoutingLayer) -> Self {
        Self {
            horizontal: layer.is_horizontal(),
            width: layer.width,
            min_width: layer.min_width(),
            pitch: layer.pitch,
            offset: layer.offset,
        }
    }

    /// Whether `c` is one of this layer's own track lines.
    pub fn on_track(&self, c: Coord) -> bool {
        c >= self.offset && (c - self.offset) % self.pitch.max(1) == 0
    }
}

/// The maze of one worker: track index space, per-node edge flags and cost
/// counters, plus the per-search source/destination/guide/backtrace bits.
pub struct GridGraph {
    conv: GridConverter,
    layers: Vec<LayerInfo>,
    z_heights: Vec<Coord>,
    die_box: Rect,
    nodes: Vec<Node>,
    prev_dirs: BitVec,
    src: BitVec,
    dst: BitVec,
    guide: BitVec,
    pub weights: CostWeights,
}

impl GridGraph {
    /// Allocates the maze over the given track lines. Edges are created only
    /// between grids inside `route_box`.
    pub fn new(
        tech: &Tech,
        die_box: Rect,
        route_box: Rect,
        xs: Vec<Coord>,
        ys: Vec<Coord>,
        via_cost: Coord,
        weights: CostWeights,
    ) -> Self {
        let conv = GridConverter::new(xs, ys);
        let layers: Vec<LayerInfo> = tech.layers.iter().map(LayerInfo::from_layer).collect();

        let mut z_heights = Vec::with_capacity(layers.len());
        let mut height = 0;
        for layer in &layers {
            height += layer.pitch * via_cost;
            z_heights.push(height);
        }

        let size = conv.dim_x() * conv.dim_y() * layers.len();
        if size > 200_000_000 {
            log::warn!("Allocating large GridGraph: {} nodes.", size);
        }

        let mut graph = Self {
            conv,
            layers,
            z_heights,
            die_box,
            nodes: vec![Node::default(); size],
            prev_dirs: bitvec![0; size * dir::DIR_BITS as usize],
            src: bitvec![0; size],
            dst: bitvec![0; size],
            guide: bitvec![0; size],
            weights,
        };
        graph.init_edges(&route_box);
        graph
    }

    fn init_edges(&mut self, route_box: &Rect) {
        let Some((x1, y1, x2, y2)) = self.conv.index_box(route_box) else {
            return;
        };
        let top = self.num_layers() as i32 - 1;
        for z in 0..=top {
            let info = self.layers[z as usize].clone();
            let upper = self.layers.get(z as usize + 1).cloned();
            for x in x1..=x2 {
                for y in y1..=y2 {
                    let p = GridPoint::new(x, y, z);
                    let (xc, yc) = (self.conv.x(x), self.conv.y(y));
                    let own_track = if info.horizontal { yc } else { xc };
                    let on_track = info.on_track(own_track);
                    let idx = self.index(p);
                    let node = &mut self.nodes[idx];
                    if x < x2 {
                        node.set(HAS_EDGE_E, true);
                        node.set(GRID_COST_E, !(info.horizontal && on_track));
                    }
                    if y < y2 {
                        node.set(HAS_EDGE_N, true);
                        node.set(GRID_COST_N, !(!info.horizontal && on_track));
                    }
                    if z < top
                        && let Some(up) = &upper
                    {
                        let up_track = if up.horizontal { yc } else { xc };
                        node.set(HAS_EDGE_U, true);
                        node.set(GRID_COST_U, !(on_track && up.on_track(up_track)));
                    }
                }
            }
        }
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn dims(&self) -> (i32, i32, i32) {
        (
            self.conv.dim_x() as i32,
            self.conv.dim_y() as i32,
            self.layers.len() as i32,
        )
    }

    pub fn converter(&self) -> &GridConverter {
        &self.conv
    }

    pub fn layer(&self, z: i32) -> &LayerInfo {
        &self.layers[z as usize]
    }

    pub fn die_box(&self) -> &Rect {
        &self.die_box
    }

    pub fn z_height(&self, z: i32) -> Coord {
        self.z_heights[z as usize]
    }

    #[inline(always)]
    pub fn in_bounds(&self, p: GridPoint) -> bool {
        let (dx, dy, dz) = self.dims();
        p.x >= 0 && p.y >= 0 && p.z >= 0 && p.x < dx && p.y < dy && p.z < dz
    }

    #[inline(always)]
    fn index(&self, p: GridPoint) -> usize {
        let dx = self.conv.dim_x();
        let dy = self.conv.dim_y();
        let (x, y, z) = (p.x as usize, p.y as usize, p.z as usize);
        let plane = if self.layers[z].horizontal { x + y * dx } else { y + x * dy };
        z * dx * dy + plane
    }

    pub fn point(&self, p: GridPoint) -> Point<Coord> {
        self.conv.to_world(p.x, p.y)
    }

    pub fn x_coord(&self, x: i32) -> Coord {
        self.conv.x(x)
    }

    pub fn y_coord(&self, y: i32) -> Coord {
        self.conv.y(y)
    }

    /// Grid exactly at `pt` on layer `z`, if `pt` lies on an x and a y line.
    pub fn grid_at(&self, pt: Point<Coord>, z: usize) -> Option<GridPoint> {
        if z >= self.layers.len() {
            return None;
        }
        let (x, y) = self.conv.to_grid(pt)?;
        Some(GridPoint::new(x, y, z as i32))
    }

    pub fn index_box(&self, rect: &Rect) -> Option<(i32, i32, i32, i32)> {
        self.conv.index_box(rect)
    }

    // ---- edges ----

    #[inline(always)]
    fn edge_flag(&self, p: GridPoint, dir: Direction, e: u16, n: u16, u: u16) -> bool {
        let (q, d) = dir.canonical(p);
        if !self.in_bounds(q) {
            return false;
        }
        let flag = match d {
            Direction::East => e,
            Direction::North => n,
            Direction::Up => u,
            _ => return false,
        };
        self.nodes[self.index(q)].has(flag)
    }

    fn set_edge_flag(&mut self, p: GridPoint, dir: Direction, on: bool, e: u16, n: u16, u: u16) {
        let (q, d) = dir.canonical(p);
        if !self.in_bounds(q) {
            return;
        }
        let flag = match d {
            Direction::East => e,
            Direction::North => n,
            Direction::Up => u,
            _ => return,
        };
        let idx = self.index(q);
        self.nodes[idx].set(flag, on);
    }

    pub fn has_edge(&self, p: GridPoint, dir: Direction) -> bool {
        self.edge_flag(p, dir, HAS_EDGE_E, HAS_EDGE_N, HAS_EDGE_U)
    }

    pub fn set_edge(&mut self, p: GridPoint, dir: Direction, on: bool) {
        self.set_edge_flag(p, dir, on, HAS_EDGE_E, HAS_EDGE_N, HAS_EDGE_U);
    }

    pub fn is_blocked(&self, p: GridPoint, dir: Direction) -> bool {
        self.edge_flag(p, dir, BLOCKED_E, BLOCKED_N, BLOCKED_U)
    }

    pub fn set_blocked(&mut self, p: GridPoint, dir: Direction, on: bool) {
        self.set_edge_flag(p, dir, on, BLOCKED_E, BLOCKED_N, BLOCKED_U);
    }

    pub fn has_grid_cost(&self, p: GridPoint, dir: Direction) -> bool {
        if dir.is_via() && self.is_special_via(self.via_base(p, dir)) {
            return false;
        }
        self.edge_flag(p, dir, GRID_COST_E, GRID_COST_N, GRID_COST_U)
    }

    /// Real distance to the neighbour in `dir`. Only meaningful where
    /// `has_edge` holds.
    pub fn edge_length(&self, p: GridPoint, dir: Direction) -> Coord {
        let q = dir.next(p);
        match dir {
            Direction::East | Direction::West => (self.conv.x(q.x) - self.conv.x(p.x)).abs(),
            Direction::North | Direction::South => (self.conv.y(q.y) - self.conv.y(p.y)).abs(),
            Direction::Up | Direction::Down => (self.z_height(q.z) - self.z_height(p.z)).abs(),
            Direction::Unknown => 0,
        }
    }

    /// Removes every edge touching a grid on `z` whose wire square would
    /// overlap `rect`.
    pub fn remove_edges_covering(&mut self, rect: &Rect, z: i32) {
        let hw = self.layers[z as usize].width / 2;
        let Some((x1, y1, x2, y2)) = self.conv.index_box(&rect.bloat(hw)) else {
            return;
        };
        for x in x1..=x2 {
            for y in y1..=y2 {
                let p = GridPoint::new(x, y, z);
                let square = Rect::new(self.point(p), self.point(p)).bloat(hw);
                if !square.overlaps(rect) {
                    continue;
                }
                for d in dir::ALL_DIRECTIONS {
                    self.set_edge(p, d, false);
                }
            }
        }
    }

    /// Sets or clears the blocked flag of the planar edges leaving every grid
    /// of the index box on `z`.
    pub fn mod_blocked_planar(&mut self, (x1, y1, x2, y2): (i32, i32, i32, i32), z: i32, on: bool) {
        for x in x1..=x2 {
            for y in y1..=y2 {
                let p = GridPoint::new(x, y, z);
                for d in [Direction::East, Direction::West, Direction::North, Direction::South] {
                    self.set_blocked(p, d, on);
                }
            }
        }
    }

    pub fn mod_blocked_via(&mut self, (x1, y1, x2, y2): (i32, i32, i32, i32), z: i32, on: bool) {
        for x in x1..=x2 {
            for y in y1..=y2 {
                let p = GridPoint::new(x, y, z);
                self.set_blocked(p, Direction::Up, on);
                self.set_blocked(p, Direction::Down, on);
            }
        }
    }

    // ---- per-node flags ----

    /// Lower end of the via edge leaving `p` in `dir`.
    fn via_base(&self, p: GridPoint, dir: Direction) -> GridPoint {
        if dir == Direction::Down { dir.next(p) } else { p }
    }

    pub fn is_special_via(&self, p: GridPoint) -> bool {
        self.in_bounds(p) && self.nodes[self.index(p)].has(SPECIAL_VIA)
    }

    pub fn set_special_via(&mut self, p: GridPoint, on: bool) {
        if self.in_bounds(p) {
            let idx = self.index(p);
            self.nodes[idx].set(SPECIAL_VIA, on);
        }
    }

    pub fn is_override_shape_cost_via(&self, p: GridPoint) -> bool {
        self.in_bounds(p) && self.nodes[self.index(p)].has(OVERRIDE_SHAPE_COST_VIA)
    }

    pub fn set_override_shape_cost_via(&mut self, p: GridPoint, on: bool) {
        if self.in_bounds(p) {
            let idx = self.index(p);
            self.nodes[idx].set(OVERRIDE_SHAPE_COST_VIA, on);
        }
    }

    // ---- cost counters ----

    fn counter(node: &Node, kind: ShapeCost, planar: bool) -> u8 {
        match (kind, planar) {
            (ShapeCost::RouteShape, true) => node.route_shape_planar,
            (ShapeCost::RouteShape, false) => node.route_shape_via,
            (ShapeCost::Marker, true) => node.marker_planar,
            (ShapeCost::Marker, false) => node.marker_via,
            (ShapeCost::FixedShape, true) => node.fixed_shape_planar,
            (ShapeCost::FixedShape, false) => node.fixed_shape_via,
        }
    }

    fn counter_mut(node: &mut Node, kind: ShapeCost, planar: bool) -> &mut u8 {
        match (kind, planar) {
            (ShapeCost::RouteShape, true) => &mut node.route_shape_planar,
            (ShapeCost::RouteShape, false) => &mut node.route_shape_via,
            (ShapeCost::Marker, true) => &mut node.marker_planar,
            (ShapeCost::Marker, false) => &mut node.marker_via,
            (ShapeCost::FixedShape, true) => &mut node.fixed_shape_planar,
            (ShapeCost::FixedShape, false) => &mut node.fixed_shape_via,
        }
    }

    /// Counter charged for stepping from `p` in `dir`: planar steps read the
    /// grid stepped onto, via steps read the lower grid of the via, and
    /// `Unknown` reads `p` itself.
    pub fn shape_cost(&self, p: GridPoint, dir: Direction, kind: ShapeCost) -> u8 {
        let (q, planar) = match dir {
            Direction::Unknown => (p, true),
            d if d.is_via() => (self.via_base(p, d), false),
            d => (d.next(p), true),
        };
        if !self.in_bounds(q) {
            return 0;
        }
        Self::counter(&self.nodes[self.index(q)], kind, planar)
    }

    pub fn has_shape_cost(&self, p: GridPoint, dir: Direction, kind: ShapeCost) -> bool {
        self.shape_cost(p, dir, kind) > 0
    }

    pub fn node_cost(&self, p: GridPoint, kind: ShapeCost, planar: bool) -> u8 {
        if !self.in_bounds(p) {
            return 0;
        }
        Self::counter(&self.nodes[self.index(p)], kind, planar)
    }

    pub fn add_cost(&mut self, p: GridPoint, kind: ShapeCost, planar: bool, amount: u8) {
        if self.in_bounds(p) {
            let idx = self.index(p);
            let c = Self::counter_mut(&mut self.nodes[idx], kind, planar);
            *c = c.saturating_add(amount);
        }
    }

    pub fn sub_cost(&mut self, p: GridPoint, kind: ShapeCost, planar: bool, amount: u8) {
        if self.in_bounds(p) {
            let idx = self.index(p);
            let c = Self::counter_mut(&mut self.nodes[idx], kind, planar);
            *c = c.saturating_sub(amount);
        }
    }

    /// Adds marker cost to planar edges on `z` around `rect` and to the via
    /// edges below and above it.
    pub fn add_marker_cost(&mut self, rect: &Rect, z: i32) {
        let Some((x1, y1, x2, y2)) = self.conv.index_box(rect) else {
            return;
        };
        for x in x1..=x2 {
            for y in y1..=y2 {
                let p = GridPoint::new(x, y, z);
                self.add_cost(p, ShapeCost::Marker, true, MARKER_COST_STEP);
                self.add_cost(p, ShapeCost::Marker, false, MARKER_COST_STEP);
                if z > 0 {
                    self.add_cost(GridPoint::new(x, y, z - 1), ShapeCost::Marker, false, MARKER_COST_STEP);
                }
            }
        }
    }

    /// Marker cost on a cut level sits on the via edges crossing it.
    pub fn add_marker_cost_cut(&mut self, rect: &Rect, cut: i32) {
        let Some((x1, y1, x2, y2)) = self.conv.index_box(rect) else {
            return;
        };
        for x in x1..=x2 {
            for y in y1..=y2 {
                self.add_cost(GridPoint::new(x, y, cut), ShapeCost::Marker, false, MARKER_COST_STEP);
            }
        }
    }

    /// Scales every marker counter by `factor`, dropping counters that fall
    /// to zero.
    pub fn decay_markers(&mut self, factor: f64) {
        for node in &mut self.nodes {
            node.marker_planar = (node.marker_planar as f64 * factor) as u8;
            node.marker_via = (node.marker_via as f64 * factor) as u8;
        }
    }

    /// Charges (or refunds) `kind` on every grid of `z` whose default-width
    /// wire would sit closer than min spacing to `rect`.
    pub fn mod_min_spacing_cost_planar(
        &mut self,
        tech: &Tech,
        rect: &Rect,
        z: i32,
        kind: ShapeCost,
        add: bool,
        ndr_spacing: Coord,
    ) {
        let width = self.layers[z as usize].width;
        let hw = width / 2;
        let shape_width = rect.min_dim().max(width);
        let prl = rect.width().max(rect.height());
        let bloat = tech.min_spacing(z as usize, shape_width, prl).max(ndr_spacing);
        let Some((x1, y1, x2, y2)) = self.conv.index_box(&rect.bloat(bloat + hw - 1)) else {
            return;
        };
        let limit = bloat as i64 * bloat as i64;
        for x in x1..=x2 {
            for y in y1..=y2 {
                let p = GridPoint::new(x, y, z);
                let square = Rect::new(self.point(p), self.point(p)).bloat(hw);
                let (dx, dy) = square.gap(rect);
                if (dx as i64 * dx as i64 + dy as i64 * dy as i64) >= limit {
                    continue;
                }
                if add {
                    self.add_cost(p, kind, true, 1);
                } else {
                    self.sub_cost(p, kind, true, 1);
                }
            }
        }
    }

    /// Like [`Self::mod_min_spacing_cost_planar`] for the default via
    /// enclosure on `z`, charging the via edge below (`is_upper_via == false`)
    /// or above `z`.
    pub fn mod_min_spacing_cost_via(
        &mut self,
        tech: &Tech,
        rect: &Rect,
        z: i32,
        kind: ShapeCost,
        add: bool,
        is_upper_via: bool,
        ndr_spacing: Coord,
    ) {
        let (cut, via_z) = if is_upper_via { (z, z) } else { (z - 1, z - 1) };
        if cut < 0 || cut + 1 >= self.num_layers() as i32 {
            return;
        }
        let Some(via) = tech.default_via(cut as usize) else {
            return;
        };
        let enc = via.enclosure(z as usize);
        let shape_width = rect.min_dim().max(enc.min_dim());
        let prl = rect.width().max(rect.height()).min(enc.width().max(enc.height()));
        let bloat = tech.min_spacing(z as usize, shape_width, prl).max(ndr_spacing);
        let reach = bloat + enc.width().max(enc.height());
        let Some((x1, y1, x2, y2)) = self.conv.index_box(&rect.bloat(reach)) else {
            return;
        };
        let limit = bloat as i64 * bloat as i64;
        for x in x1..=x2 {
            for y in y1..=y2 {
                let origin = self.conv.to_world(x, y);
                let (dx, dy) = enc.translate(origin).gap(rect);
                if (dx as i64 * dx as i64 + dy as i64 * dy as i64) >= limit {
                    continue;
                }
                let p = GridPoint::new(x, y, via_z);
                if add {
                    self.add_cost(p, kind, false, 1);
                } else {
                    self.sub_cost(p, kind, false, 1);
                }
            }
        }
    }

    /// Charges (or refunds) `kind` on the via edges of `cut` whose default
    /// cut shape would sit closer than cut spacing to `cut_rect`.
    pub fn mod_cut_spacing_cost(&mut self, tech: &Tech, cut_rect: &Rect, cut: i32, kind: ShapeCost, add: bool) {
        if cut < 0 || cut + 1 >= self.num_layers() as i32 {
            return;
        }
        let Some(via) = tech.default_via(cut as usize) else {
            return;
        };
        let spacing = tech.cut_spacing(cut as usize);
        let reach = spacing + via.cut_shape.width().max(via.cut_shape.height());
        let Some((x1, y1, x2, y2)) = self.conv.index_box(&cut_rect.bloat(reach)) else {
            return;
        };
        let limit = spacing as i64 * spacing as i64;
        for x in x1..=x2 {
            for y in y1..=y2 {
                let (dx, dy) = via.cut_at(self.conv.to_world(x, y)).gap(cut_rect);
                if (dx as i64 * dx as i64 + dy as i64 * dy as i64) >= limit {
                    continue;
                }
                let p = GridPoint::new(x, y, cut);
                if add {
                    self.add_cost(p, kind, false, 1);
                } else {
                    self.sub_cost(p, kind, false, 1);
                }
            }
        }
    }

    // ---- per-search bits ----

    pub fn prev_dir(&self, p: GridPoint) -> Direction {
        let i = self.index(p) * dir::DIR_BITS as usize;
        Direction::from_bits(self.prev_dirs[i..i + dir::DIR_BITS as usize].load_le::<u8>())
    }

    pub fn set_prev_dir(&mut self, p: GridPoint, d: Direction) {
        let i = self.index(p) * dir::DIR_BITS as usize;
        self.prev_dirs[i..i + dir::DIR_BITS as usize].store_le::<u8>(d.bits());
    }

    pub fn reset_prev_dirs(&mut self) {
        self.prev_dirs.fill(false);
    }

    pub fn is_src(&self, p: GridPoint) -> bool {
        self.in_bounds(p) && self.src[self.index(p)]
    }

    pub fn set_src(&mut self, p: GridPoint, on: bool) {
        if self.in_bounds(p) {
            let idx = self.index(p);
            self.src.set(idx, on);
        }
    }

    pub fn is_dst(&self, p: GridPoint) -> bool {
        self.in_bounds(p) && self.dst[self.index(p)]
    }

    pub fn set_dst(&mut self, p: GridPoint, on: bool) {
        if self.in_bounds(p) {
            let idx = self.index(p);
            self.dst.set(idx, on);
        }
    }

    pub fn reset_src_dst(&mut self) {
        self.src.fill(false);
        self.dst.fill(false);
    }

    /// Guide flag of the grid stepped onto (or of `p` for `Unknown`).
    pub fn has_guide(&self, p: GridPoint, dir: Direction) -> bool {
        let q = dir.next(p);
        self.in_bounds(q) && self.guide[self.index(q)]
    }

    pub fn set_guide(&mut self, p: GridPoint, on: bool) {
        if self.in_bounds(p) {
            let idx = self.index(p);
            self.guide.set(idx, on);
        }
    }

    pub fn reset_guides(&mut self) {
        self.guide.fill(false);
    }

    /// Marks every grid as inside the guide, for nets routed without one.
    pub fn fill_guides(&mut self) {
        self.guide.fill(true);
    }
}
