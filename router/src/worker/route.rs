use super::{NetUpdate, RipupMode, WorkerResult, congestion};
use super::init::{RouteGeom, Worker, add_marker_cost, mod_geom_cost, mod_pin_cost};
use crate::algo::search::{MazePath, SearchRequest, search};
use crate::algo::wavefront::TaperBox;
use crate::algo::{NdrRule, SearchContext};
use crate::error::{RouteError, RouteResult};
use crate::grid::GridGraph;
use drt_common::db::core::{PathSeg, Via};
use drt_common::db::marker::{Constraint, Marker, MarkerSet};
use drt_common::db::tech::Tech;
use drt_common::geom::Coord;
use drt_common::geom::coord::GridPoint;
use drt_common::geom::point::Point;
use drt_common::geom::rect::Rect;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueEntry {
    /// Stale once the net has been rerouted past `num_reroutes`.
    Route { net: usize, num_reroutes: usize },
    Check { net: usize },
}

impl<'a> Worker<'a> {
    /// Ripup-and-reroute loop. Each reroute is followed by a DRC pass on the
    /// net; nets named by the fresh markers are queued again until they hit
    /// the maze end iteration.
    pub fn route_queue(&mut self, stop: &AtomicBool) -> RouteResult<()> {
        let task = self.task;
        let mut queue = self.init_queue();
        while let Some(entry) = queue.pop_front() {
            if stop.load(Ordering::Relaxed) {
                return Err(RouteError::Cancelled);
            }
            let (net, routed) = match entry {
                QueueEntry::Route { net, num_reroutes } => {
                    if num_reroutes != self.nets[net].num_reroutes {
                        continue;
                    }
                    self.reroute(net)?;
                    (net, true)
                }
                QueueEntry::Check { net } => (net, false),
            };
            let markers = self.check_net(net);
            queue.extend(self.requeue(&markers, routed));
            if routed {
                self.grid.decay_markers(task.marker_decay);
            }
            for m in &markers {
                add_marker_cost(&mut self.grid, &task.tech, m);
            }
        }
        Ok(())
    }

    fn init_queue(&self) -> VecDeque<QueueEntry> {
        let task = self.task;
        match task.ripup_mode {
            RipupMode::All => {
                let mut order: Vec<usize> = (0..self.nets.len())
                    .filter(|&i| self.nets[i].pins.len() >= 2)
                    .collect();
                order.sort_by_key(|&i| {
                    let n = &self.nets[i];
                    (n.pins.len(), n.pin_area, n.id)
                });
                if let Some(seed) = task.or_seed
                    && order.len() > 1
                {
                    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(task.id.0 as u64));
                    let swaps = (order.len() as f64 * task.or_k) as usize;
                    for _ in 0..swaps {
                        let i = rng.gen_range(0..order.len() - 1);
                        order.swap(i, i + 1);
                    }
                }
                order
                    .into_iter()
                    .map(|net| QueueEntry::Route { net, num_reroutes: 0 })
                    .collect()
            }
            RipupMode::Drc => self.requeue(&task.markers, true).into(),
            RipupMode::NearDrc => self.near_drc_queue().into(),
        }
    }

    /// Nets with geometry within twice the layer width of a marker, in
    /// marker order.
    fn near_drc_queue(&self) -> Vec<QueueEntry> {
        let task = self.task;
        let tech = &task.tech;
        let mut seen = HashSet::new();
        let mut routes = Vec::new();
        let mut checks = Vec::new();
        for m in &task.markers {
            if !m.bbox.intersects(&task.route_box) || m.layer >= tech.num_layers() {
                continue;
            }
            let area = m.bbox.bloat(2 * tech.layer(m.layer).width);
            let near = self.shapes.owners_near(m.cut, m.layer, &area);
            for (i, net) in self.nets.iter().enumerate() {
                if seen.contains(&i) || !(near.contains(&i) || m.srcs.contains(&net.id)) {
                    continue;
                }
                seen.insert(i);
                if self.can_ripup(i) {
                    routes.push(QueueEntry::Route {
                        net: i,
                        num_reroutes: self.nets[i].num_reroutes,
                    });
                } else {
                    checks.push(QueueEntry::Check { net: i });
                }
            }
        }
        routes.extend(checks);
        routes
    }

    fn can_ripup(&self, i: usize) -> bool {
        let n = &self.nets[i];
        n.num_reroutes < self.task.maze_end_iter && n.pins.len() >= 2
    }

    /// Queue entries for the nets a batch of markers names: reroutable nets
    /// first, then (after a reroute only) checks of the nets that may not be
    /// ripped up again.
    fn requeue(&self, markers: &[Marker], with_checks: bool) -> Vec<QueueEntry> {
        let mut aggressors = HashSet::new();
        let mut victims = HashSet::new();
        let mut routes = Vec::new();
        let mut checks = Vec::new();
        for m in markers {
            if m.constraint == Constraint::Unrouted || !m.bbox.intersects(&self.task.route_box) {
                continue;
            }
            for src in &m.srcs {
                let Some(i) = self.nets.iter().position(|n| n.id == *src) else {
                    continue;
                };
                if self.can_ripup(i) {
                    if aggressors.insert(i) {
                        routes.push(QueueEntry::Route {
                            net: i,
                            num_reroutes: self.nets[i].num_reroutes,
                        });
                    }
                } else if with_checks && victims.insert(i) {
                    checks.push(QueueEntry::Check { net: i });
                }
            }
        }
        routes.extend(checks);
        routes
    }

    fn reroute(&mut self, i: usize) -> RouteResult<()> {
        let task = self.task;
        let tech = &task.tech;
        let old = std::mem::take(&mut self.nets[i].inside);
        mod_geom_cost(&mut self.grid, tech, &old, false);
        self.nets[i].unrouted.clear();
        self.nets[i].modified = true;

        self.net_init(i);
        let routed = self.route_net(i);
        self.net_end(i);

        mod_geom_cost(&mut self.grid, tech, &self.nets[i].inside, true);
        let shapes = self.nets[i].shapes(tech);
        self.shapes.set_net(i, shapes);
        self.nets[i].num_reroutes += 1;
        routed
    }

    /// Lifts the net's own pin and boundary costs and loads its guides.
    fn net_init(&mut self, i: usize) {
        let task = self.task;
        let tech = &task.tech;
        for s in &self.nets[i].pin_shapes {
            mod_pin_cost(&mut self.grid, tech, s, false);
        }
        mod_geom_cost(&mut self.grid, tech, &self.nets[i].outside, false);

        self.grid.reset_guides();
        let guides = &self.nets[i].guides;
        if !task.follow_guide || guides.is_empty() {
            self.grid.fill_guides();
            return;
        }
        for g in guides {
            if g.layer >= tech.num_layers() {
                continue;
            }
            let Some((x1, y1, x2, y2)) = self.grid.index_box(&g.rect) else {
                continue;
            };
            for x in x1..=x2 {
                for y in y1..=y2 {
                    self.grid.set_guide(GridPoint::new(x, y, g.layer as i32), true);
                }
            }
        }
    }

    fn net_end(&mut self, i: usize) {
        let tech = &self.task.tech;
        for s in &self.nets[i].pin_shapes {
            mod_pin_cost(&mut self.grid, tech, s, true);
        }
        mod_geom_cost(&mut self.grid, tech, &self.nets[i].outside, true);
        self.grid.reset_src_dst();
    }

    /// Connects every terminal of net `i`, growing the connected component
    /// from the pin farthest from the terminal centroid. A failed
    /// connection stops the net and leaves an `Unrouted` marker.
    fn route_net(&mut self, i: usize) -> RouteResult<()> {
        let task = self.task;
        let rules = self.rules;
        let tech = &task.tech;
        let pins = self.nets[i].pins.clone();
        if pins.len() <= 1 {
            return Ok(());
        }
        let ndr_name = self.nets[i].ndr.clone();
        let ndr: Option<&NdrRule> = ndr_name.as_ref().and_then(|n| self.ndrs.get(n));
        let tables = rules.tables(ndr.map(|n| n.name.as_str()));
        let grid = &mut self.grid;
        grid.reset_src_dst();

        let mut unconn: BTreeMap<GridPoint, BTreeSet<usize>> = BTreeMap::new();
        for (pi, pin) in pins.iter().enumerate() {
            for &ap in &pin.aps {
                unconn.entry(ap).or_default().insert(pi);
                grid.set_dst(ap, true);
            }
        }

        let mut src_tapers: HashMap<GridPoint, TaperBox> = HashMap::new();
        let tapers: Vec<TaperBox> = pins.iter().filter_map(|p| p.taper).collect();
        if ndr.is_some() {
            for pin in &pins {
                if let Some(b) = pin.taper {
                    for &ap in &pin.aps {
                        src_tapers.insert(ap, b);
                    }
                }
            }
        }

        let (center, center_z) = centroid(grid, pins.iter().map(|p| p.aps[0]));
        let mut src_pin = 0;
        let mut farthest = 0;
        for (&mi, set) in &unconn {
            let d = grid.point(mi).manhattan(&center) + (grid.z_height(mi.z) - center_z).abs();
            for &pi in set {
                if d >= farthest {
                    farthest = d;
                    src_pin = pi;
                }
            }
        }

        let mut conn_comps: Vec<GridPoint> = Vec::new();
        let mut in_cc: HashSet<GridPoint> = HashSet::new();
        let mut cc_box = (pins[src_pin].aps[0], pins[src_pin].aps[0]);
        for &ap in &pins[src_pin].aps {
            grid.set_src(ap, true);
            if in_cc.insert(ap) {
                conn_comps.push(ap);
            }
            grow(&mut cc_box, ap);
            mark_connected(&mut unconn, grid, ap, src_pin);
        }

        let mut first_conn = true;
        while let Some(dst_pin) = next_dst(grid, &unconn, cc_box) {
            grid.reset_prev_dirs();
            let mut ctx = SearchContext::new(tables);
            ctx.ndr = ndr;
            ctx.dst_taper = ndr.and(pins[dst_pin].taper);
            let req = SearchRequest {
                conn_comps: &conn_comps,
                dst_pin: &pins[dst_pin].aps,
                center,
                src_tapers: &src_tapers,
            };
            let Some(path) = search(grid, &mut self.wavefront, &ctx, &req)? else {
                let net = &mut self.nets[i];
                log::warn!(
                    "Worker {}: net {:?} failed to reach terminal {} ({} left unconnected)",
                    task.id.0,
                    net.id,
                    dst_pin,
                    unconn.len()
                );
                net.unrouted.push(unrouted_marker(grid, net.id, cc_box, &pins[dst_pin].aps));
                break;
            };

            let dst = path.points[0];
            let reached: Vec<usize> = unconn
                .get(&dst)
                .map(|s| s.iter().copied().collect())
                .unwrap_or_default();
            if reached.is_empty() {
                return Err(RouteError::InvariantViolation(format!(
                    "path of net {:?} ends at {:?}, which is no destination",
                    self.nets[i].id, dst
                )));
            }
            for pi in reached {
                for &ap in &pins[pi].aps {
                    mark_connected(&mut unconn, grid, ap, pi);
                }
            }
            if first_conn {
                for &cc in &conn_comps {
                    grid.set_src(cc, false);
                }
                conn_comps.clear();
                in_cc.clear();
                first_conn = false;
            }
            for &cell in path.cells.iter().chain(path.points.last()) {
                grid.set_src(cell, true);
                if in_cc.insert(cell) {
                    conn_comps.push(cell);
                }
                grow(&mut cc_box, cell);
            }

            let geom = path_geometry(grid, tech, ndr, &tapers, &path)?;
            let inside = &mut self.nets[i].inside;
            inside.wires.extend(geom.wires);
            inside.vias.extend(geom.vias);
        }
        Ok(())
    }

    /// DRC markers involving net `i`.
    fn check_net(&self, i: usize) -> Vec<Marker> {
        self.shapes.check(&self.task.route_box, Some(i))
    }

    /// Final check of the route box and the updates of every rerouted net.
    pub fn finish(self) -> WorkerResult {
        let task = self.task;
        let tech = &task.tech;
        let mut markers = MarkerSet::new();
        for m in self.shapes.check(&task.route_box, None) {
            markers.insert(m);
        }
        for net in &self.nets {
            for m in &net.unrouted {
                markers.insert(m.clone());
            }
        }

        let congested = (7..=30).contains(&task.iteration) && {
            let boundaries: Vec<Vec<(Point<Coord>, usize)>> = self
                .nets
                .iter()
                .map(|n| {
                    n.pins
                        .iter()
                        .filter(|p| p.boundary)
                        .flat_map(|p| p.aps.iter().map(|&ap| (self.grid.point(ap), ap.z as usize)))
                        .collect()
                })
                .collect();
            congestion::is_congested(tech, &task.route_box, task.congestion_threshold, &boundaries)
        };

        let updates = self
            .nets
            .into_iter()
            .filter(|n| n.modified)
            .map(|n| NetUpdate {
                net: n.id,
                wires: n.inside.wires,
                vias: n.inside.vias,
            })
            .collect();
        log::debug!(
            "Worker {}: {} markers{}",
            task.id.0,
            markers.len(),
            if congested { ", congested" } else { "" }
        );
        WorkerResult {
            id: task.id,
            route_box: task.route_box,
            updates,
            markers: markers.iter().cloned().collect(),
            congested,
            skipped: false,
        }
    }
}

fn centroid(grid: &GridGraph, aps: impl Iterator<Item = GridPoint>) -> (Point<Coord>, Coord) {
    let (mut sx, mut sy, mut sz, mut n) = (0i64, 0i64, 0i64, 0i64);
    for ap in aps {
        let p = grid.point(ap);
        sx += p.x as i64;
        sy += p.y as i64;
        sz += grid.z_height(ap.z) as i64;
        n += 1;
    }
    let n = n.max(1);
    (Point::new((sx / n) as Coord, (sy / n) as Coord), (sz / n) as Coord)
}

fn grow(bbox: &mut (GridPoint, GridPoint), p: GridPoint) {
    let (lo, hi) = bbox;
    *lo = GridPoint::new(lo.x.min(p.x), lo.y.min(p.y), lo.z.min(p.z));
    *hi = GridPoint::new(hi.x.max(p.x), hi.y.max(p.y), hi.z.max(p.z));
}

/// Removes `pin` from the pins waiting at `ap`; the grid stops being a
/// destination once no pin waits there.
fn mark_connected(unconn: &mut BTreeMap<GridPoint, BTreeSet<usize>>, grid: &mut GridGraph, ap: GridPoint, pin: usize) {
    if let Some(set) = unconn.get_mut(&ap) {
        set.remove(&pin);
        if set.is_empty() {
            unconn.remove(&ap);
            grid.set_dst(ap, false);
        }
    }
}

/// Pin of the unconnected access grid closest to the connected component.
fn next_dst(
    grid: &GridGraph,
    unconn: &BTreeMap<GridPoint, BTreeSet<usize>>,
    (lo, hi): (GridPoint, GridPoint),
) -> Option<usize> {
    let ll = grid.point(lo);
    let ur = grid.point(hi);
    let (zl, zh) = (grid.z_height(lo.z), grid.z_height(hi.z));
    let mut best: Option<(Coord, usize)> = None;
    for (&mi, set) in unconn {
        let Some(&pin) = set.iter().next() else {
            continue;
        };
        let p = grid.point(mi);
        let z = grid.z_height(mi.z);
        let dist = (ll.x - p.x).max(p.x - ur.x).max(0)
            + (ll.y - p.y).max(p.y - ur.y).max(0)
            + (zl - z).max(z - zh).max(0);
        if best.is_none_or(|(d, _)| dist < d) {
            best = Some((dist, pin));
            if dist == 0 {
                break;
            }
        }
    }
    best.map(|(_, pin)| pin)
}

fn unrouted_marker(
    grid: &GridGraph,
    net: drt_common::db::indices::NetId,
    (lo, hi): (GridPoint, GridPoint),
    dst: &[GridPoint],
) -> Marker {
    let mut bbox = Rect::new(grid.point(lo), grid.point(hi));
    for &ap in dst {
        let p = grid.point(ap);
        bbox = bbox.merge(&Rect::new(p, p));
    }
    Marker {
        bbox,
        layer: dst.first().map(|p| p.z as usize).unwrap_or(0),
        cut: false,
        constraint: Constraint::Unrouted,
        srcs: BTreeSet::from([net]),
    }
}

/// Wires and vias of a found path. Inside a pin's taper box an NDR net
/// falls back to the default width.
pub fn path_geometry(
    grid: &GridGraph,
    tech: &Tech,
    ndr: Option<&NdrRule>,
    tapers: &[TaperBox],
    path: &MazePath,
) -> RouteResult<RouteGeom> {
    let mut geom = RouteGeom::default();
    for pair in path.points.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if a.z == b.z {
            if a == b {
                continue;
            }
            let z = a.z as usize;
            let layer = tech.layer(z);
            let tapered = tapers.iter().any(|t| t.contains(a) || t.contains(b));
            let (width, ext) = match ndr {
                Some(rule) if !tapered => (
                    layer.width.max(rule.width(a.z)),
                    layer.wire_ext() + rule.extension(a.z),
                ),
                _ => (layer.width, layer.wire_ext()),
            };
            geom.wires.push(
                PathSeg {
                    layer: z,
                    begin: grid.point(a),
                    end: grid.point(b),
                    width,
                    ext,
                }
                .normalized(),
            );
        } else {
            let point = grid.point(a);
            for cut in a.z.min(b.z)..a.z.max(b.z) {
                let def = ndr
                    .and_then(|rule| rule.pref_via(cut))
                    .or_else(|| tech.vias.iter().position(|v| v.cut == cut as usize))
                    .ok_or_else(|| {
                        RouteError::InvariantViolation(format!("path crosses cut {} which has no via", cut))
                    })?;
                geom.vias.push(Via { point, def });
            }
        }
    }
    Ok(geom)
}

#[cfg(test)]
mod tests {
    use super::super::tests::{net, pin, task};
    use super::*;
    use crate::legality::RuleSet;
    use drt_common::db::indices::NetId;

    #[test]
    fn test_all_queue_orders_by_pins_then_area() {
        let t = task(vec![
            net(
                "three",
                vec![pin("a", 300, 300, 0), pin("b", 700, 300, 0), pin("c", 500, 700, 0)],
            ),
            net("wide", vec![pin("a", 300, 1500, 0), pin("b", 2500, 1500, 0)]),
            net("narrow", vec![pin("a", 300, 2500, 0), pin("b", 900, 2500, 0)]),
        ]);
        let rules = RuleSet::build(&t.tech);
        let w = Worker::build(&t, &rules).unwrap();
        let order: Vec<usize> = w
            .init_queue()
            .into_iter()
            .map(|e| match e {
                QueueEntry::Route { net, .. } => net,
                QueueEntry::Check { net } => net,
            })
            .collect();
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[test]
    fn test_requeue_splits_routes_and_checks() {
        let mut t = task(vec![
            net("a", vec![pin("a0", 300, 300, 0), pin("a1", 900, 300, 0)]),
            net("b", vec![pin("b0", 300, 700, 0), pin("b1", 900, 700, 0)]),
        ]);
        t.maze_end_iter = 1;
        let rules = RuleSet::build(&t.tech);
        let mut w = Worker::build(&t, &rules).unwrap();
        w.nets[1].num_reroutes = 1;
        let marker = Marker {
            bbox: Rect::from_coords(300, 350, 900, 650),
            layer: 0,
            cut: false,
            constraint: Constraint::MetalSpacing,
            srcs: BTreeSet::from([NetId::new(0), NetId::new(1)]),
        };
        let entries = w.requeue(std::slice::from_ref(&marker), true);
        assert_eq!(
            entries,
            vec![
                QueueEntry::Route { net: 0, num_reroutes: 0 },
                QueueEntry::Check { net: 1 }
            ]
        );
        assert_eq!(w.requeue(&[marker], false).len(), 1);
    }

    #[test]
    fn test_three_pin_net_connects_every_pin() {
        let t = task(vec![net(
            "three",
            vec![pin("a", 300, 300, 0), pin("b", 1900, 300, 0), pin("c", 1100, 1900, 0)],
        )]);
        let rules = RuleSet::build(&t.tech);
        let mut w = Worker::build(&t, &rules).unwrap();
        w.reroute(0).unwrap();
        let n = &w.nets[0];
        assert!(n.unrouted.is_empty());
        assert_eq!(n.num_reroutes, 1);
        let touches = |pt: Point<Coord>| {
            n.inside
                .wires
                .iter()
                .any(|s| Rect::new(s.begin, s.end).contains(pt) && s.layer == 0)
                || n.inside.vias.iter().any(|v| v.point == pt)
        };
        for pt in [Point::new(300, 300), Point::new(1900, 300), Point::new(1100, 1900)] {
            assert!(touches(pt), "pin at {:?} left unconnected", pt);
        }
    }

    #[test]
    fn test_shape_db_follows_rerouted_nets() {
        let mut t = task(vec![
            net("a", vec![pin("a0", 300, 300, 0), pin("a1", 1500, 300, 0)]),
            net("b", vec![pin("b0", 300, 500, 0), pin("b1", 1500, 500, 0)]),
        ]);
        t.obstructions
            .push(drt_common::db::core::LayerRect::new(1, Rect::from_coords(850, 0, 950, 3000)));
        let rules = RuleSet::build(&t.tech);
        let mut w = Worker::build(&t, &rules).unwrap();
        for i in [0, 1, 0] {
            w.reroute(i).unwrap();
        }
        let mut all = vec![super::super::drc::DrcShape::metal(
            Rect::from_coords(850, 0, 950, 3000),
            1,
            None,
            true,
        )];
        for n in &w.nets {
            all.extend(n.shapes(&t.tech));
        }
        assert_eq!(w.shapes.len(), all.len());

        let kept = w.shapes.check(&t.route_box, None);
        let fresh = super::super::drc::check(&t.tech, &all, &t.route_box, None);
        assert_eq!(kept.len(), fresh.len());
        assert!(kept.iter().all(|m| fresh.contains(m)));
        for i in 0..2 {
            let kept = w.check_net(i);
            let fresh = super::super::drc::check(&t.tech, &all, &t.route_box, Some(w.nets[i].id));
            assert_eq!(kept.len(), fresh.len());
            assert!(kept.iter().all(|m| fresh.contains(m)));
        }
    }

    #[test]
    fn test_walled_in_pin_leaves_unrouted_marker() {
        let mut t = task(vec![net("a", vec![pin("a0", 300, 300, 0), pin("a1", 1500, 1500, 0)])]);
        // obstruction ring on the tracks at 1100 and 1900, every layer
        for z in 0..3 {
            t.obstructions.push(drt_common::db::core::LayerRect::new(
                z,
                Rect::from_coords(1050, 1050, 1950, 1150),
            ));
            t.obstructions.push(drt_common::db::core::LayerRect::new(
                z,
                Rect::from_coords(1050, 1850, 1950, 1950),
            ));
            t.obstructions.push(drt_common::db::core::LayerRect::new(
                z,
                Rect::from_coords(1050, 1050, 1150, 1950),
            ));
            t.obstructions.push(drt_common::db::core::LayerRect::new(
                z,
                Rect::from_coords(1850, 1050, 1950, 1950),
            ));
        }
        let rules = RuleSet::build(&t.tech);
        let mut w = Worker::build(&t, &rules).unwrap();
        w.reroute(0).unwrap();
        assert_eq!(w.nets[0].unrouted.len(), 1);
        assert_eq!(w.nets[0].unrouted[0].constraint, Constraint::Unrouted);
    }
}
