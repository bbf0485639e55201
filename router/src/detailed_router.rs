use crate::dist::Cluster;
use crate::error::{RouteError, RouteResult};
use crate::grid::CostWeights;
use crate::legality::RuleSet;
use crate::strategy::{ClipGrowth, SearchRepairArgs, strategy};
use crate::worker::{self, RipupMode, TaskNet, WorkerResult, WorkerTask};
use drt_common::db::core::{Design, GCellPattern, Net};
use drt_common::db::indices::{NetId, WorkerId};
use drt_common::db::marker::Constraint;
use drt_common::geom::rect::Rect;
use drt_common::geom::rtree::SpatialIndex;
use drt_common::util::config::DetailedRoutingConfig;
use drt_common::util::profiler::{BusyClock, ScopedTimer};
use rayon::prelude::*;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Outcome of a routing run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteSummary {
    /// Iterations that ran workers.
    pub iterations: usize,
    pub markers: usize,
    pub unrouted: usize,
}

/// Route box, ext box and drc box of every worker of one iteration, grouped
/// into the four checkerboard batches and chunked by `batch_size`.
pub fn partition(
    gcell: &GCellPattern,
    die: &Rect,
    size: usize,
    offset: i32,
    mt_safe_dist: i32,
    drc_safe_dist: i32,
    batch_size: usize,
) -> Vec<Vec<Vec<(Rect, Rect, Rect)>>> {
    let cx = gcell.count_x(die) as i64;
    let cy = gcell.count_y(die) as i64;
    let step = size.max(1) as i64;
    let mut batches: Vec<Vec<Vec<(Rect, Rect, Rect)>>> = vec![Vec::new(); 4];

    let mut i = offset as i64;
    let mut x_idx = 0usize;
    while i < cx {
        let mut j = offset as i64;
        let mut y_idx = 0usize;
        while j < cy {
            let (lo_i, hi_i) = (i.max(0), (i + step - 1).min(cx - 1));
            let (lo_j, hi_j) = (j.max(0), (j + step - 1).min(cy - 1));
            if hi_i >= 0 && hi_j >= 0 {
                let lo = gcell.gcell_box(lo_i as usize, lo_j as usize, die);
                let hi = gcell.gcell_box(hi_i as usize, hi_j as usize, die);
                let route_box = lo.merge(&hi);
                let boxes = (route_box, route_box.bloat(mt_safe_dist), route_box.bloat(drc_safe_dist));
                let batch = &mut batches[(x_idx % 2) * 2 + y_idx % 2];
                match batch.last_mut() {
                    Some(chunk) if chunk.len() < batch_size.max(1) => chunk.push(boxes),
                    _ => batch.push(vec![boxes]),
                }
            }
            j += step;
            y_idx += 1;
        }
        i += step;
        x_idx += 1;
    }
    batches
}

fn net_bbox(net: &Net) -> Option<Rect> {
    net.pins
        .iter()
        .flat_map(|p| p.shapes.iter().map(|s| s.rect))
        .chain(net.pins.iter().flat_map(|p| p.access_points.iter().map(|ap| Rect::new(ap.point, ap.point))))
        .chain(net.guides.iter().map(|g| g.rect))
        .chain(net.wires.iter().map(|w| w.shape()))
        .chain(net.vias.iter().map(|v| Rect::new(v.point, v.point)))
        .reduce(|a, b| a.merge(&b))
}

/// Replaces the committed state inside the route box with a worker's
/// result: rerouted nets lose their geometry inside the box and gain the new
/// paths; markers touching the box are replaced by the worker's.
pub fn commit(design: &mut Design, result: &WorkerResult) {
    if result.skipped {
        return;
    }
    let route_box = result.route_box;
    for update in &result.updates {
        let Some(net) = design.nets.get_mut(update.net.index()) else {
            log::warn!("Worker {} updated unknown net {:?}", result.id.0, update.net);
            continue;
        };
        net.wires = net.wires.iter().flat_map(|w| w.subtract(&route_box)).collect();
        net.wires.extend(update.wires.iter().copied());
        net.vias.retain(|v| !route_box.contains(v.point));
        net.vias.extend(update.vias.iter().copied());
    }
    design.markers.remove_intersecting(&route_box);
    for m in &result.markers {
        design.markers.insert(m.clone());
    }
}

pub struct DetailedRouter<'a> {
    design: &'a mut Design,
    config: &'a DetailedRoutingConfig,
    rules: RuleSet,
    gcell: GCellPattern,
    pool: rayon::ThreadPool,
    cluster: Option<Cluster>,
    stop: Arc<AtomicBool>,
    growth: ClipGrowth,
    congested: bool,
}

impl<'a> DetailedRouter<'a> {
    pub fn new(design: &'a mut Design, config: &'a DetailedRoutingConfig, stop: Arc<AtomicBool>) -> RouteResult<Self> {
        if config.max_threads == 0 {
            return Err(RouteError::InvalidConfig("max_threads must be at least 1".to_string()));
        }
        if config.batch_size == 0 {
            return Err(RouteError::InvalidConfig("batch_size must be at least 1".to_string()));
        }
        if config.via_cost <= 0 {
            return Err(RouteError::InvalidConfig("via_cost must be positive".to_string()));
        }
        design.validate()?;

        let gcell = design.gcell_pattern(config.gcell_tracks);
        if gcell.step_x <= 0 || gcell.step_y <= 0 {
            return Err(RouteError::InvalidConfig(format!(
                "gcell step {}x{} is not positive",
                gcell.step_x, gcell.step_y
            )));
        }
        let synthesized = design.synthesize_guides(&gcell);
        if synthesized > 0 {
            log::info!("Synthesized guides for {} nets", synthesized);
        }

        let rules = {
            let _t = ScopedTimer::new("Legality tables");
            RuleSet::build(&design.tech)
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_threads)
            .build()
            .map_err(|e| RouteError::InvalidConfig(e.to_string()))?;
        let cluster = if config.distributed {
            Some(Cluster::start(config.cloud_size, &rules, Arc::clone(&stop))?)
        } else {
            None
        };

        Ok(Self {
            design,
            config,
            rules,
            gcell,
            pool,
            cluster,
            stop,
            growth: ClipGrowth::default(),
            congested: false,
        })
    }

    /// Runs the strategy until no markers remain or the end iteration is
    /// passed. On cancellation the design keeps the last committed batch.
    pub fn run(&mut self) -> RouteResult<RouteSummary> {
        let _t = ScopedTimer::new("Detailed routing");
        log::info!(
            "Starting Detailed Routing: {} nets, {} threads{}",
            self.design.nets.len(),
            self.config.max_threads,
            if self.cluster.is_some() { " (distributed)" } else { "" }
        );

        let mut summary = RouteSummary::default();
        let schedule = strategy(self.config.route_shape_cost, self.config.marker_cost);
        for (iter, args) in schedule.iter().enumerate() {
            if iter > self.config.end_iteration {
                break;
            }
            let size = self.growth.apply(args, self.congested, self.config.max_clipsize_increase);
            if self.search_repair(iter, args, size)? {
                summary.iterations += 1;
            }
            if self.design.markers.is_empty() {
                log::info!("Converged at iter {}!", iter);
                break;
            }
        }

        summary.markers = self.design.markers.len();
        summary.unrouted = self
            .design
            .markers
            .iter()
            .filter(|m| m.constraint == Constraint::Unrouted)
            .flat_map(|m| m.srcs.iter())
            .collect::<std::collections::BTreeSet<_>>()
            .len();
        Ok(summary)
    }

    /// One iteration. Returns false when the iteration had nothing to
    /// repair.
    fn search_repair(&mut self, iter: usize, args: &SearchRepairArgs, size: usize) -> RouteResult<bool> {
        if args.ripup_mode != RipupMode::All && self.design.markers.is_empty() {
            return Ok(false);
        }
        let timer = ScopedTimer::at(log::Level::Debug, format!("Iter {} search-repair", iter));
        let busy = BusyClock::new();
        self.congested = false;

        let batches = partition(
            &self.gcell,
            &self.design.die_area,
            size,
            args.offset,
            self.config.mt_safe_dist,
            self.config.drc_safe_dist,
            self.config.batch_size,
        );
        let total: usize = batches.iter().flatten().map(|c| c.len()).sum();
        let progress = AtomicUsize::new(0);
        let mut next_id = 0usize;

        for chunk in batches.iter().flatten() {
            if self.stop.load(Ordering::Relaxed) {
                eprint!("\r\x1b[K");
                return Err(RouteError::Cancelled);
            }
            let tasks: Vec<WorkerTask> = {
                let index = self.net_index();
                chunk
                    .iter()
                    .map(|&(route_box, ext_box, drc_box)| {
                        let id = WorkerId::new(next_id);
                        next_id += 1;
                        self.task(id, iter, args, route_box, ext_box, drc_box, &index)
                    })
                    .collect()
            };

            let results = match self.cluster.as_mut() {
                Some(cluster) => {
                    let results = cluster.run_batch(&tasks);
                    let p = progress.fetch_add(tasks.len(), Ordering::Relaxed) + tasks.len();
                    eprint!("\r\x1b[36m[DR Iter {}] {}/{}\x1b[0m\x1b[K", iter, p, total);
                    let _ = std::io::stderr().flush();
                    results?
                }
                None => self.run_local(&tasks, iter, &progress, total, &busy)?,
            };

            for result in &results {
                self.congested |= result.congested;
                commit(self.design, result);
            }
        }
        eprint!("\r\x1b[K");

        log::info!(
            "Iter {}: {} workers (size {}, offset {}, {:?}), markers: {}, Time: {}ms, busy {:.1} threads",
            iter,
            total,
            size,
            args.offset,
            args.ripup_mode,
            self.design.markers.len(),
            timer.elapsed().as_millis(),
            busy.utilization(timer.elapsed())
        );
        Ok(true)
    }

    fn run_local(
        &self,
        tasks: &[WorkerTask],
        iter: usize,
        progress: &AtomicUsize,
        total: usize,
        busy: &BusyClock,
    ) -> RouteResult<Vec<WorkerResult>> {
        let rules = &self.rules;
        let stop = &*self.stop;
        let outcomes: Vec<RouteResult<WorkerResult>> = self.pool.install(|| {
            tasks
                .par_iter()
                .map(|task| {
                    let res = busy.time(|| worker::run(task, rules, stop));
                    let p = progress.fetch_add(1, Ordering::Relaxed) + 1;
                    if p.is_multiple_of(16) || p == total {
                        eprint!("\r\x1b[36m[DR Iter {}] {}/{}\x1b[0m\x1b[K", iter, p, total);
                        let _ = std::io::stderr().flush();
                    }
                    res
                })
                .collect()
        });

        let mut results = Vec::with_capacity(outcomes.len());
        for (task, outcome) in tasks.iter().zip(outcomes) {
            match outcome {
                Ok(r) => results.push(r),
                Err(RouteError::Cancelled) => {
                    eprint!("\r\x1b[K");
                    return Err(RouteError::Cancelled);
                }
                Err(e) => log::error!("Worker {} abandoned: {}", task.id.0, e),
            }
        }
        if self.stop.load(Ordering::Relaxed) {
            eprint!("\r\x1b[K");
            return Err(RouteError::Cancelled);
        }
        Ok(results)
    }

    fn net_index(&self) -> SpatialIndex {
        SpatialIndex::bulk_load(
            self.design
                .nets
                .iter()
                .enumerate()
                .filter_map(|(i, n)| net_bbox(n).map(|b| (b, i)))
                .collect(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn task(
        &self,
        id: WorkerId,
        iter: usize,
        args: &SearchRepairArgs,
        route_box: Rect,
        ext_box: Rect,
        drc_box: Rect,
        index: &SpatialIndex,
    ) -> WorkerTask {
        let design = &*self.design;
        let config = self.config;
        let nets = index
            .query(ext_box)
            .into_iter()
            .map(|i| TaskNet {
                id: NetId::new(i),
                net: design.nets[i].clone(),
            })
            .collect();
        let obstructions = design
            .obstructions
            .iter()
            .filter(|o| o.rect.intersects(&ext_box))
            .copied()
            .collect();
        let markers = design.markers.intersecting(&drc_box).cloned().collect();
        WorkerTask {
            id,
            route_box,
            ext_box,
            drc_box,
            iteration: iter,
            ripup_mode: args.ripup_mode,
            follow_guide: args.follow_guide,
            weights: CostWeights {
                grid: config.grid_cost,
                guide: config.guide_cost,
                block: config.block_cost,
                drc: args.drc_cost,
                marker: args.marker_cost,
                fixed_shape: args.fixed_shape_cost,
                route_with_jumpers: config.route_with_jumpers,
                jumper_multiplier: config.jumper_cost_multiplier,
                iteration: iter,
            },
            maze_end_iter: args.maze_end_iter,
            marker_decay: args.marker_decay,
            via_cost: config.via_cost,
            taper_radius: config.taper_box_radius,
            auto_taper: config.auto_taper_ndr_nets,
            or_seed: config.or_seed,
            or_k: config.or_k,
            congestion_threshold: config.congestion_threshold,
            die_area: design.die_area,
            tech: design.tech.clone(),
            nets,
            obstructions,
            markers,
        }
    }
}

/// Routes `design` in place with the configured strategy.
pub fn run(design: &mut Design, config: &DetailedRoutingConfig, stop: Arc<AtomicBool>) -> RouteResult<RouteSummary> {
    DetailedRouter::new(design, config, stop)?.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::NetUpdate;
    use drt_common::db::core::{PathSeg, Via};
    use drt_common::db::marker::Marker;
    use drt_common::geom::point::Point;
    use std::collections::BTreeSet;

    fn pattern() -> (GCellPattern, Rect) {
        let die = Rect::from_coords(0, 0, 10_000, 10_000);
        let g = GCellPattern {
            origin: Point::new(0, 0),
            step_x: 1000,
            step_y: 1000,
        };
        (g, die)
    }

    #[test]
    fn test_partition_covers_die_once() {
        let (g, die) = pattern();
        for offset in [0, -2, -5] {
            let batches = partition(&g, &die, 7, offset, 100, 50, 1024);
            let boxes: Vec<Rect> = batches.iter().flatten().flatten().map(|b| b.0).collect();
            let area: i64 = boxes.iter().map(|b| b.area()).sum();
            assert_eq!(area, die.area(), "offset {}", offset);
            for (i, a) in boxes.iter().enumerate() {
                for b in &boxes[i + 1..] {
                    assert!(!a.overlaps(b));
                }
            }
        }
    }

    #[test]
    fn test_partition_checkerboard() {
        let (g, die) = pattern();
        let batches = partition(&g, &die, 3, 0, 100, 50, 1024);
        // 4 x 4 workers, four per batch; same-batch workers never touch
        assert!(batches.iter().all(|b| b.iter().flatten().count() == 4));
        for batch in &batches {
            let ext: Vec<Rect> = batch.iter().flatten().map(|b| b.0).collect();
            for (i, a) in ext.iter().enumerate() {
                for b in &ext[i + 1..] {
                    assert!(!a.intersects(b));
                }
            }
        }
        let chunked = partition(&g, &die, 3, 0, 100, 50, 3);
        assert_eq!(chunked[0].len(), 2);
        assert_eq!(chunked[0][0].len(), 3);
    }

    #[test]
    fn test_commit_replaces_inside() {
        let mut design = crate::tests::two_net_design();
        let route_box = Rect::from_coords(0, 0, 1000, 1000);
        design.nets[0].wires = vec![PathSeg {
            layer: 0,
            begin: Point::new(500, 500),
            end: Point::new(1500, 500),
            width: 100,
            ext: 50,
        }];
        design.nets[0].vias = vec![Via { point: Point::new(500, 500), def: 0 }];
        let stale = Marker {
            bbox: Rect::from_coords(900, 900, 1100, 1100),
            layer: 0,
            cut: false,
            constraint: Constraint::Short,
            srcs: BTreeSet::from([NetId::new(0)]),
        };
        let far = Marker {
            bbox: Rect::from_coords(5000, 5000, 5100, 5100),
            ..stale.clone()
        };
        design.markers.insert(stale);
        design.markers.insert(far.clone());

        let new_wire = PathSeg {
            layer: 0,
            begin: Point::new(300, 700),
            end: Point::new(1000, 700),
            width: 100,
            ext: 50,
        };
        let result = WorkerResult {
            id: WorkerId::new(0),
            route_box,
            updates: vec![NetUpdate {
                net: NetId::new(0),
                wires: vec![new_wire],
                vias: vec![],
            }],
            markers: vec![],
            congested: false,
            skipped: false,
        };
        commit(&mut design, &result);
        let net = &design.nets[0];
        assert!(net.vias.is_empty());
        assert_eq!(net.wires.len(), 2);
        assert!(net.wires.contains(&new_wire));
        assert!(net.wires.iter().any(|w| w.begin == Point::new(1000, 500) && w.end == Point::new(1500, 500)));
        assert_eq!(design.markers.iter().cloned().collect::<Vec<_>>(), vec![far]);
    }

    #[test]
    fn test_skipped_result_keeps_markers() {
        let mut design = crate::tests::two_net_design();
        let m = Marker {
            bbox: Rect::from_coords(100, 100, 200, 200),
            layer: 0,
            cut: false,
            constraint: Constraint::MetalSpacing,
            srcs: BTreeSet::new(),
        };
        design.markers.insert(m);
        let result = WorkerResult {
            id: WorkerId::new(0),
            route_box: Rect::from_coords(0, 0, 1000, 1000),
            updates: vec![],
            markers: vec![],
            congested: false,
            skipped: true,
        };
        commit(&mut design, &result);
        assert_eq!(design.markers.len(), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut design = crate::tests::two_net_design();
        let config = DetailedRoutingConfig {
            max_threads: 0,
            ..Default::default()
        };
        let err = DetailedRouter::new(&mut design, &config, Arc::new(AtomicBool::new(false)));
        assert!(matches!(err, Err(RouteError::InvalidConfig(_))));
    }
}
