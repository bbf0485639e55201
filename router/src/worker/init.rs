use super::drc::{DrcShape, ShapeDb};
use super::{RipupMode, WorkerTask};
use crate::algo::NdrRule;
use crate::algo::wavefront::{TaperBox, Wavefront};
use crate::error::{RouteError, RouteResult};
use crate::grid::{Direction, GridGraph, ShapeCost};
use crate::legality::RuleSet;
use drt_common::db::core::{LayerRect, Net, PathSeg, Via};
use drt_common::db::indices::NetId;
use drt_common::db::marker::Marker;
use drt_common::db::tech::Tech;
use drt_common::geom::Coord;
use drt_common::geom::coord::GridPoint;
use drt_common::geom::point::Point;
use drt_common::geom::rect::Rect;
use std::collections::HashMap;

/// Wires and vias of one net.
#[derive(Clone, Debug, Default)]
pub struct RouteGeom {
    pub wires: Vec<PathSeg>,
    pub vias: Vec<Via>,
}

impl RouteGeom {
    pub fn is_empty(&self) -> bool {
        self.wires.is_empty() && self.vias.is_empty()
    }

    pub fn clear(&mut self) {
        self.wires.clear();
        self.vias.clear();
    }

    /// Metal and cut shapes, tagged with `net`.
    pub fn shapes(&self, tech: &Tech, net: NetId) -> Vec<DrcShape> {
        let mut out = Vec::with_capacity(self.wires.len() + self.vias.len() * 3);
        for w in &self.wires {
            out.push(DrcShape::metal(w.shape(), w.layer, Some(net), false));
        }
        for v in &self.vias {
            let Some(def) = tech.vias.get(v.def) else {
                continue;
            };
            for z in [def.cut, def.cut + 1] {
                out.push(DrcShape::metal(def.enclosure_at(z, v.point), z, Some(net), false));
            }
            out.push(DrcShape::cut(def.cut_at(v.point), def.cut, Some(net)));
        }
        out
    }
}

/// A connection target: the access grids of one pin, or a single boundary
/// terminal.
#[derive(Clone, Debug)]
pub struct DrPin {
    pub aps: Vec<GridPoint>,
    pub boundary: bool,
    pub taper: Option<TaperBox>,
}

#[derive(Clone, Debug)]
pub struct DrNet {
    pub id: NetId,
    pub ndr: Option<String>,
    pub pins: Vec<DrPin>,
    pub pin_shapes: Vec<LayerRect>,
    pub guides: Vec<LayerRect>,
    /// Committed geometry that survives ripping up the route box.
    pub outside: RouteGeom,
    /// Geometry inside the route box: committed until the net is rerouted.
    pub inside: RouteGeom,
    pub num_reroutes: usize,
    pub modified: bool,
    pub unrouted: Vec<Marker>,
    pub pin_area: i64,
}

impl DrNet {
    pub fn shapes(&self, tech: &Tech) -> Vec<DrcShape> {
        let mut out = self.outside.shapes(tech, self.id);
        out.extend(self.inside.shapes(tech, self.id));
        out.extend(
            self.pin_shapes
                .iter()
                .map(|s| DrcShape::metal(s.rect, s.layer, Some(self.id), true)),
        );
        out
    }
}

/// One worker's private routing state.
pub struct Worker<'a> {
    pub(crate) task: &'a WorkerTask,
    pub(crate) rules: &'a RuleSet,
    pub(crate) grid: GridGraph,
    pub(crate) nets: Vec<DrNet>,
    pub(crate) ndrs: HashMap<String, NdrRule>,
    pub(crate) shapes: ShapeDb<'a>,
    pub(crate) wavefront: Wavefront,
}

impl<'a> Worker<'a> {
    pub fn build(task: &'a WorkerTask, rules: &'a RuleSet) -> RouteResult<Self> {
        let tech = &task.tech;
        let route_box = task.route_box;

        let mut terminals: Vec<Vec<(Point<Coord>, usize, bool)>> = Vec::with_capacity(task.nets.len());
        for tn in &task.nets {
            let mut found = Vec::new();
            for pin in &tn.net.pins {
                for ap in &pin.access_points {
                    if ap.layer < tech.num_layers() && route_box.contains(ap.point) {
                        found.push((ap.point, ap.layer, false));
                    }
                }
            }
            let boundary = if task.iteration == 0 {
                guide_crossings(tech, &tn.net, &route_box)
            } else {
                geometry_crossings(&tn.net, &route_box)
            };
            for (pt, z) in boundary {
                if !found.iter().any(|&(q, l, _)| q == pt && l == z) {
                    found.push((pt, z, true));
                }
            }
            terminals.push(found);
        }

        let (xs, ys) = track_lines(tech, &task.ext_box, &route_box, terminals.iter().flatten().map(|t| t.0));
        let mut grid = GridGraph::new(
            tech,
            task.die_area,
            route_box,
            xs,
            ys,
            task.via_cost,
            task.weights,
        );
        for cut in 0..tech.num_layers().saturating_sub(1) {
            if tech.default_via(cut).is_none() {
                remove_via_edges(&mut grid, cut as i32);
            }
        }

        let mut ndrs = HashMap::new();
        for ndr in &tech.ndrs {
            ndrs.insert(ndr.name.clone(), NdrRule::new(tech, ndr));
        }

        let mut shapes = ShapeDb::new(tech);
        for obs in &task.obstructions {
            if obs.layer >= tech.num_layers() || !obs.rect.intersects(&task.ext_box) {
                continue;
            }
            grid.remove_edges_covering(&obs.rect, obs.layer as i32);
            mod_fixed_cost(&mut grid, tech, obs, true);
            shapes.insert(DrcShape::metal(obs.rect, obs.layer, None, true), None);
        }

        let mut nets = Vec::with_capacity(task.nets.len());
        for (tn, found) in task.nets.iter().zip(terminals) {
            let mut pins = Vec::new();
            for pin in &tn.net.pins {
                let aps: Vec<GridPoint> = pin
                    .access_points
                    .iter()
                    .filter(|ap| ap.layer < tech.num_layers() && route_box.contains(ap.point))
                    .filter_map(|ap| grid.grid_at(ap.point, ap.layer))
                    .collect();
                if !aps.is_empty() {
                    pins.push(DrPin {
                        aps,
                        boundary: false,
                        taper: None,
                    });
                }
            }
            for &(pt, z, boundary) in &found {
                if !boundary {
                    continue;
                }
                let Some(gp) = grid.grid_at(pt, z) else {
                    return Err(RouteError::InvariantViolation(format!(
                        "boundary terminal ({}, {}) of net {} is off the worker grid",
                        pt.x, pt.y, tn.net.name
                    )));
                };
                pins.push(DrPin {
                    aps: vec![gp],
                    boundary: true,
                    taper: None,
                });
            }

            let (outside, mut inside) = split_geometry(&tn.net, &route_box);
            let queued_all = task.ripup_mode == RipupMode::All && pins.len() >= 2;
            if queued_all {
                inside.clear();
            }

            let pin_shapes: Vec<LayerRect> = tn
                .net
                .pins
                .iter()
                .flat_map(|p| p.shapes.iter().copied())
                .filter(|s| s.layer < tech.num_layers() && s.rect.intersects(&task.ext_box))
                .collect();

            let pin_area = tn.net.pin_bbox().map(|b| b.area()).unwrap_or(0);
            nets.push(DrNet {
                id: tn.id,
                ndr: tn.net.ndr.clone(),
                pins,
                pin_shapes,
                guides: tn.net.guides.clone(),
                outside,
                inside,
                num_reroutes: 0,
                modified: queued_all,
                unrouted: Vec::new(),
                pin_area,
            });
        }

        for (i, net) in nets.iter().enumerate() {
            shapes.set_net(i, net.shapes(tech));
        }

        let mut worker = Self {
            task,
            rules,
            grid,
            nets,
            ndrs,
            shapes,
            wavefront: Wavefront::new(),
        };
        worker.init_costs();
        Ok(worker)
    }

    fn init_costs(&mut self) {
        let task = self.task;
        let tech = &task.tech;
        for i in 0..self.nets.len() {
            let shapes = self.nets[i].pin_shapes.clone();
            for s in &shapes {
                mod_pin_cost(&mut self.grid, tech, s, true);
            }
            let outside = std::mem::take(&mut self.nets[i].outside);
            mod_geom_cost(&mut self.grid, tech, &outside, true);
            self.nets[i].outside = outside;
            let inside = std::mem::take(&mut self.nets[i].inside);
            mod_geom_cost(&mut self.grid, tech, &inside, true);
            self.nets[i].inside = inside;
        }

        let aps: Vec<GridPoint> = self
            .nets
            .iter()
            .flat_map(|n| n.pins.iter().filter(|p| !p.boundary))
            .flat_map(|p| p.aps.iter().copied())
            .collect();
        for ap in aps {
            self.grid.set_override_shape_cost_via(ap, true);
            let info = self.grid.layer(ap.z);
            let own = if info.horizontal {
                self.grid.y_coord(ap.y)
            } else {
                self.grid.x_coord(ap.x)
            };
            if !info.on_track(own) {
                self.grid.set_special_via(ap, true);
            }
        }

        if task.auto_taper {
            let radius = task.taper_radius;
            for net in &mut self.nets {
                if net.ndr.is_none() {
                    continue;
                }
                for pin in net.pins.iter_mut().filter(|p| !p.boundary) {
                    pin.taper = taper_box(&self.grid, &pin.aps, radius);
                }
            }
        }

        for m in &task.markers {
            add_marker_cost(&mut self.grid, tech, m);
        }
    }
}

/// Boundary terminals of the first pass: where a guide on a layer whose
/// wires cross the edge strictly spans a route box edge, on the median
/// track of the guide.
pub fn guide_crossings(tech: &Tech, net: &Net, route_box: &Rect) -> Vec<(Point<Coord>, usize)> {
    let mut out = Vec::new();
    for g in &net.guides {
        if g.layer >= tech.num_layers() {
            continue;
        }
        let layer = tech.layer(g.layer);
        let r = &g.rect;
        if layer.is_horizontal() {
            let ys: Vec<Coord> = layer.tracks_in(r.min.y, r.max.y).collect();
            let Some(&y) = ys.get(ys.len() / 2) else {
                continue;
            };
            if y <= route_box.min.y || y >= route_box.max.y {
                continue;
            }
            for x in [route_box.min.x, route_box.max.x] {
                if r.min.x < x && x < r.max.x {
                    out.push((Point::new(x, y), g.layer));
                }
            }
        } else {
            let xs: Vec<Coord> = layer.tracks_in(r.min.x, r.max.x).collect();
            let Some(&x) = xs.get(xs.len() / 2) else {
                continue;
            };
            if x <= route_box.min.x || x >= route_box.max.x {
                continue;
            }
            for y in [route_box.min.y, route_box.max.y] {
                if r.min.y < y && y < r.max.y {
                    out.push((Point::new(x, y), g.layer));
                }
            }
        }
    }
    out.sort_unstable_by_key(|&(p, z)| (z, p.x, p.y));
    out.dedup();
    out
}

/// Boundary terminals where committed wires leave the route box.
pub fn geometry_crossings(net: &Net, route_box: &Rect) -> Vec<(Point<Coord>, usize)> {
    let mut out = Vec::new();
    for w in &net.wires {
        let s = w.normalized();
        let Some(inside) = s.clip(route_box) else {
            continue;
        };
        if inside.begin != s.begin {
            out.push((inside.begin, s.layer));
        }
        if inside.end != s.end {
            out.push((inside.end, s.layer));
        }
    }
    out.sort_unstable_by_key(|&(p, z)| (z, p.x, p.y));
    out.dedup();
    out
}

/// Splits committed geometry into what survives ripping up `route_box` and
/// what lies inside it.
pub fn split_geometry(net: &Net, route_box: &Rect) -> (RouteGeom, RouteGeom) {
    let mut outside = RouteGeom::default();
    let mut inside = RouteGeom::default();
    for w in &net.wires {
        outside.wires.extend(w.subtract(route_box));
        if let Some(c) = w.clip(route_box)
            && c.begin != c.end
        {
            inside.wires.push(c);
        }
    }
    for v in &net.vias {
        if route_box.contains(v.point) {
            inside.vias.push(*v);
        } else {
            outside.vias.push(*v);
        }
    }
    (outside, inside)
}

/// Track lines of the worker's maze: every layer's tracks inside the ext
/// box, the route box edges and the terminal coordinates.
fn track_lines(
    tech: &Tech,
    ext_box: &Rect,
    route_box: &Rect,
    terminals: impl Iterator<Item = Point<Coord>>,
) -> (Vec<Coord>, Vec<Coord>) {
    let has_vertical = tech.layers.iter().any(|l| !l.is_horizontal());
    let has_horizontal = tech.layers.iter().any(|l| l.is_horizontal());
    let mut xs = vec![route_box.min.x, route_box.max.x];
    let mut ys = vec![route_box.min.y, route_box.max.y];
    for layer in &tech.layers {
        if !layer.is_horizontal() || !has_vertical {
            xs.extend(layer.tracks_in(ext_box.min.x, ext_box.max.x));
        }
        if layer.is_horizontal() || !has_horizontal {
            ys.extend(layer.tracks_in(ext_box.min.y, ext_box.max.y));
        }
    }
    for p in terminals {
        xs.push(p.x);
        ys.push(p.y);
    }
    (xs, ys)
}

fn remove_via_edges(grid: &mut GridGraph, cut: i32) {
    let (dx, dy, _) = grid.dims();
    for x in 0..dx {
        for y in 0..dy {
            grid.set_edge(GridPoint::new(x, y, cut), Direction::Up, false);
        }
    }
}

/// Taper region of a pin: its access grids bloated by `radius` pitches,
/// from the lowest access layer up to the highest (at least layer 1).
fn taper_box(grid: &GridGraph, aps: &[GridPoint], radius: Coord) -> Option<TaperBox> {
    let first = aps.first()?;
    let mut lo = *first;
    let mut hi = *first;
    for ap in aps {
        lo = GridPoint::new(lo.x.min(ap.x), lo.y.min(ap.y), lo.z.min(ap.z));
        hi = GridPoint::new(hi.x.max(ap.x), hi.y.max(ap.y), hi.z.max(ap.z));
    }
    let bloat = radius * grid.layer(lo.z).pitch;
    let world = Rect::new(grid.point(lo), grid.point(hi)).bloat(bloat);
    let (x1, y1, x2, y2) = grid.index_box(&world)?;
    let top = if lo.z == 0 { 1.min(grid.num_layers() as i32 - 1) } else { hi.z };
    Some(TaperBox {
        lo: GridPoint::new(x1, y1, lo.z),
        hi: GridPoint::new(x2, y2, top.max(hi.z)),
    })
}

/// Route-shape cost of committed or fresh geometry.
pub fn mod_geom_cost(grid: &mut GridGraph, tech: &Tech, geom: &RouteGeom, add: bool) {
    for w in &geom.wires {
        mod_metal_cost(grid, tech, &w.shape(), w.layer as i32, ShapeCost::RouteShape, add);
    }
    for v in &geom.vias {
        let Some(def) = tech.vias.get(v.def) else {
            continue;
        };
        for z in [def.cut, def.cut + 1] {
            mod_metal_cost(
                grid,
                tech,
                &def.enclosure_at(z, v.point),
                z as i32,
                ShapeCost::RouteShape,
                add,
            );
        }
        grid.mod_cut_spacing_cost(tech, &def.cut_at(v.point), def.cut as i32, ShapeCost::RouteShape, add);
    }
}

fn mod_metal_cost(grid: &mut GridGraph, tech: &Tech, rect: &Rect, z: i32, kind: ShapeCost, add: bool) {
    grid.mod_min_spacing_cost_planar(tech, rect, z, kind, add, 0);
    grid.mod_min_spacing_cost_via(tech, rect, z, kind, add, true, 0);
    grid.mod_min_spacing_cost_via(tech, rect, z, kind, add, false, 0);
}

fn mod_fixed_cost(grid: &mut GridGraph, tech: &Tech, shape: &LayerRect, add: bool) {
    mod_metal_cost(grid, tech, &shape.rect, shape.layer as i32, ShapeCost::FixedShape, add);
}

/// Pin shapes carry fixed-shape cost and block the edges they cover; both
/// are lifted while their own net routes.
pub fn mod_pin_cost(grid: &mut GridGraph, tech: &Tech, shape: &LayerRect, add: bool) {
    mod_fixed_cost(grid, tech, shape, add);
    if let Some(ibox) = grid.index_box(&shape.rect) {
        let z = shape.layer as i32;
        grid.mod_blocked_planar(ibox, z, add);
        grid.mod_blocked_via(ibox, z, add);
    }
}

pub fn add_marker_cost(grid: &mut GridGraph, tech: &Tech, marker: &Marker) {
    if marker.cut {
        if marker.layer + 1 >= tech.num_layers() {
            return;
        }
        let bloat = tech.layer(marker.layer).min_width() / 2;
        grid.add_marker_cost_cut(&marker.bbox.bloat(bloat), marker.layer as i32);
    } else {
        if marker.layer >= tech.num_layers() {
            return;
        }
        let bloat = tech.layer(marker.layer).min_width();
        grid.add_marker_cost(&marker.bbox.bloat(bloat), marker.layer as i32);
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{net, pin, task};
    use super::*;

    #[test]
    fn test_guide_crossing_on_median_track() {
        let mut n = net("a", vec![]);
        // horizontal layer 2 guide spanning x = 3000 over one gcell row
        n.guides.push(LayerRect::new(2, Rect::from_coords(0, 0, 6000, 3000)));
        // vertical layer 1 guide ending on the edge does not cross it
        n.guides.push(LayerRect::new(1, Rect::from_coords(3000, 0, 6000, 3000)));
        let tech = drt_common::util::generator::uniform_tech(3);
        let route_box = Rect::from_coords(0, 0, 3000, 6000);
        let crossings = guide_crossings(&tech, &n, &route_box);
        // 15 tracks 100..2900, the median is 1500
        assert_eq!(crossings, vec![(Point::new(3000, 1500), 2)]);
    }

    #[test]
    fn test_geometry_crossings_and_split() {
        let mut n = net("a", vec![]);
        n.wires.push(PathSeg {
            layer: 0,
            begin: Point::new(2500, 500),
            end: Point::new(3700, 500),
            width: 100,
            ext: 50,
        });
        n.vias.push(Via {
            point: Point::new(2500, 500),
            def: 0,
        });
        n.vias.push(Via {
            point: Point::new(3700, 500),
            def: 0,
        });
        let route_box = Rect::from_coords(0, 0, 3000, 3000);
        assert_eq!(geometry_crossings(&n, &route_box), vec![(Point::new(3000, 500), 0)]);
        let (outside, inside) = split_geometry(&n, &route_box);
        assert_eq!(outside.wires.len(), 1);
        assert_eq!(outside.wires[0].begin, Point::new(3000, 500));
        assert_eq!(inside.wires[0].end, Point::new(3000, 500));
        assert_eq!(inside.vias.len(), 1);
        assert_eq!(outside.vias.len(), 1);
    }

    #[test]
    fn test_worker_terminals_and_costs() {
        let mut t = task(vec![
            net("a", vec![pin("p0", 300, 500, 0), pin("p1", 2100, 500, 0)]),
            net("b", vec![pin("q0", 300, 900, 0), pin("q1", 2100, 900, 0)]),
        ]);
        t.obstructions.push(LayerRect::new(2, Rect::from_coords(1000, 1000, 1400, 1400)));
        let rules = RuleSet::build(&t.tech);
        let w = Worker::build(&t, &rules).unwrap();
        assert_eq!(w.nets.len(), 2);
        assert_eq!(w.nets[0].pins.len(), 2);
        assert!(w.nets.iter().all(|n| n.modified));

        let ap = w.grid.grid_at(Point::new(300, 500), 0).unwrap();
        assert!(w.grid.is_override_shape_cost_via(ap));
        // every pin blocks its own grid until its net routes
        assert!(w.grid.is_blocked(ap, Direction::East));
        assert!(w.grid.node_cost(ap, ShapeCost::FixedShape, true) > 0);

        let covered = w.grid.grid_at(Point::new(1100, 1100), 2).unwrap();
        assert!(!w.grid.has_edge(covered, Direction::East));
        // the obstruction plus four pin shapes
        assert_eq!(w.shapes.len(), 5);
    }

    #[test]
    fn test_taper_box_spans_pin_layers() {
        let t = task(vec![]);
        let rules = RuleSet::build(&t.tech);
        let w = Worker::build(&t, &rules).unwrap();
        let ap = w.grid.grid_at(Point::new(1100, 1100), 0).unwrap();
        let b = taper_box(&w.grid, &[ap], 3).unwrap();
        assert_eq!(b.lo.z, 0);
        assert_eq!(b.hi.z, 1);
        assert_eq!(w.grid.x_coord(b.lo.x), 500);
        assert_eq!(w.grid.x_coord(b.hi.x), 1700);
    }
}
