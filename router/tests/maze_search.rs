use drt_common::geom::Coord;
use drt_common::geom::coord::GridPoint;
use drt_common::geom::rect::Rect;
use drt_common::util::generator::uniform_tech;
use drt_router::algo::SearchContext;
use drt_router::algo::cost::{est_cost, next_path_cost};
use drt_router::algo::search::{MazePath, SearchRequest, search};
use drt_router::algo::wavefront::{Wavefront, WavefrontGrid};
use drt_router::grid::dir::ALL_DIRECTIONS;
use drt_router::grid::{CostWeights, Direction, GridGraph, ShapeCost};
use drt_router::legality::{LegalityTables, RuleSet};
use proptest::prelude::*;
use std::collections::HashMap;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn graph(layers: usize, nx: i32, ny: i32) -> GridGraph {
    let tech = uniform_tech(layers);
    let xs: Vec<Coord> = (0..nx).map(|i| 100 + 200 * i).collect();
    let ys: Vec<Coord> = (0..ny).map(|i| 100 + 200 * i).collect();
    let die = Rect::from_coords(0, 0, 200 * nx, 200 * ny);
    let mut g = GridGraph::new(&tech, die, die, xs, ys, 4, CostWeights::default());
    for x in 0..nx {
        for y in 0..ny {
            for z in 0..layers as i32 {
                g.set_guide(GridPoint::new(x, y, z), true);
            }
        }
    }
    g
}

fn route(g: &mut GridGraph, rules: &RuleSet, src: GridPoint, dst: GridPoint) -> Option<MazePath> {
    let ctx = SearchContext::new(&rules.default);
    g.set_src(src, true);
    g.set_dst(dst, true);
    let tapers = HashMap::new();
    let conn = [src];
    let pin = [dst];
    let req = SearchRequest {
        conn_comps: &conn,
        dst_pin: &pin,
        center: g.point(src),
        src_tapers: &tapers,
    };
    let mut wf = Wavefront::new();
    search(g, &mut wf, &ctx, &req).ok().flatten()
}

/// Every grid walked, source first.
fn walk(path: &MazePath) -> Vec<GridPoint> {
    let mut out = Vec::new();
    let mut points = path.points.iter().rev();
    let Some(&first) = points.next() else {
        return out;
    };
    out.push(first);
    let mut at = first;
    for &next in points {
        while at != next {
            at = GridPoint::new(
                at.x + (next.x - at.x).signum(),
                at.y + (next.y - at.y).signum(),
                at.z + (next.z - at.z).signum(),
            );
            out.push(at);
        }
    }
    out
}

/// Planar runs enclosed by two vias: (layer, prev via below, next via below, dx, dy).
fn via_runs(cells: &[GridPoint], g: &GridGraph) -> Vec<(usize, bool, bool, Coord, Coord)> {
    let mut runs = Vec::new();
    let mut entered: Option<(bool, GridPoint)> = None;
    for pair in cells.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if a.z == b.z {
            continue;
        }
        if let Some((prev_down, start)) = entered {
            let dx = (g.x_coord(a.x) - g.x_coord(start.x)).abs();
            let dy = (g.y_coord(a.y) - g.y_coord(start.y)).abs();
            runs.push((a.z as usize, prev_down, b.z < a.z, dx, dy));
        }
        entered = Some((b.z > a.z, b));
    }
    runs
}

fn has_forbidden_run(tables: &LegalityTables, runs: &[(usize, bool, bool, Coord, Coord)]) -> bool {
    runs.iter().any(|&(z, prev_down, curr_down, dx, dy)| {
        (dy == 0 && dx > 0 && tables.is_via2via_forbidden_len(z, prev_down, curr_down, true, dx))
            || (dx == 0 && dy > 0 && tables.is_via2via_forbidden_len(z, prev_down, curr_down, false, dy))
    })
}

#[test]
fn test_straight_run_on_open_layer() {
    init_logger();
    let mut g = graph(2, 8, 5);
    let rules = RuleSet::build(&uniform_tech(2));
    let src = GridPoint::new(0, 2, 0);
    let dst = GridPoint::new(5, 2, 0);
    let Some(path) = route(&mut g, &rules, src, dst) else {
        panic!("open layer must route");
    };
    assert_eq!(path.points, vec![dst, src]);
    assert_eq!(path.path_cost, 1000);
    assert_eq!(path.cells.len(), 5);
}

#[test]
fn test_detour_around_blocked_node() {
    init_logger();
    let mut g = graph(2, 8, 5);
    let rules = RuleSet::build(&uniform_tech(2));
    let blocked = GridPoint::new(3, 2, 0);
    for z in 0..2 {
        for d in ALL_DIRECTIONS {
            g.set_edge(GridPoint::new(3, 2, z), d, false);
        }
    }
    let src = GridPoint::new(0, 2, 0);
    let dst = GridPoint::new(5, 2, 0);
    let Some(path) = route(&mut g, &rules, src, dst) else {
        panic!("detour expected");
    };
    assert!(path.points.len() > 2);
    assert!(path.cells.len() > 5);
    assert!(path.path_cost > 1000);
    assert!(!walk(&path).contains(&blocked));
}

#[test]
fn test_single_track_cut_is_unreachable() {
    init_logger();
    let mut g = graph(2, 8, 1);
    let rules = RuleSet::build(&uniform_tech(2));
    for z in 0..2 {
        for d in ALL_DIRECTIONS {
            g.set_edge(GridPoint::new(3, 0, z), d, false);
        }
    }
    let found = route(&mut g, &rules, GridPoint::new(0, 0, 0), GridPoint::new(5, 0, 0));
    assert!(found.is_none());
}

#[test]
fn test_stacked_access_avoids_forbidden_via_spacing() {
    init_logger();
    let tech = uniform_tech(3);
    let rules = RuleSet::build(&tech);
    // A one-track x run on M2 between two V1 vias is too close.
    assert!(rules.default.is_via2via_forbidden_len(1, true, true, true, 200));

    let mut g = graph(3, 6, 6);
    let src = GridPoint::new(2, 2, 0);
    let dst = GridPoint::new(3, 2, 0);
    for p in [src, dst] {
        for d in [Direction::East, Direction::West, Direction::North, Direction::South] {
            g.set_edge(p, d, false);
        }
    }
    let Some(path) = route(&mut g, &rules, src, dst) else {
        panic!("both pins are reachable from M2");
    };
    let cells = walk(&path);
    assert_eq!(cells.first(), Some(&src));
    assert_eq!(cells.last(), Some(&dst));
    // the direct up, east, down shape would walk only three cells
    assert!(path.cells.len() > 3);
    assert!(!has_forbidden_run(&rules.default, &via_runs(&cells, &g)));
}

#[test]
fn test_repeat_search_settles_identically() {
    init_logger();
    let rules = RuleSet::build(&uniform_tech(3));
    let mut g = graph(3, 8, 8);
    g.add_cost(GridPoint::new(3, 3, 0), ShapeCost::RouteShape, true, 2);
    let src = GridPoint::new(0, 1, 0);
    let dst = GridPoint::new(6, 5, 1);
    let first = route(&mut g, &rules, src, dst);
    g.reset_prev_dirs();
    let second = route(&mut g, &rules, src, dst);
    assert!(first.is_some());
    assert_eq!(first, second);
}

fn grid_point(nx: i32, ny: i32, nz: i32) -> impl Strategy<Value = GridPoint> {
    (0..nx, 0..ny, 0..nz).prop_map(|(x, y, z)| GridPoint::new(x, y, z))
}

proptest! {
    #[test]
    fn prop_estimate_covers_planar_distance(src in grid_point(8, 8, 3), dst in grid_point(8, 8, 3)) {
        let rules = RuleSet::build(&uniform_tech(3));
        let ctx = SearchContext::new(&rules.default);
        let g = graph(3, 8, 8);
        let est = est_cost(&g, &ctx, src, dst, dst, Direction::Unknown);
        let planar = (g.x_coord(src.x) - g.x_coord(dst.x)).abs() + (g.y_coord(src.y) - g.y_coord(dst.y)).abs();
        prop_assert!(est >= planar as u64);
    }

    #[test]
    fn prop_step_cost_covers_edge_length(
        p in grid_point(8, 8, 3),
        dir_idx in 0usize..6,
        cost in 0u64..5_000,
        noise in proptest::collection::vec((grid_point(8, 8, 3), 0u8..4), 0..12),
    ) {
        let rules = RuleSet::build(&uniform_tech(3));
        let ctx = SearchContext::new(&rules.default);
        let mut g = graph(3, 8, 8);
        for (q, amount) in noise {
            g.add_cost(q, ShapeCost::RouteShape, true, amount);
            g.add_cost(q, ShapeCost::Marker, false, amount);
        }
        let dir = ALL_DIRECTIONS[dir_idx];
        prop_assume!(g.has_edge(p, dir));
        let mut curr = WavefrontGrid::seed(p, 0, 0, None);
        curr.path_cost = cost;
        let next = next_path_cost(&g, &ctx, &curr, dir);
        prop_assert!(next >= cost + g.edge_length(p, dir) as u64);
    }

    #[test]
    fn prop_found_paths_walk_existing_edges(
        src in grid_point(8, 8, 3),
        dst in grid_point(8, 8, 3),
        blocked in proptest::collection::vec(grid_point(8, 8, 3), 0..10),
    ) {
        prop_assume!(src != dst && !blocked.contains(&src) && !blocked.contains(&dst));
        let rules = RuleSet::build(&uniform_tech(3));
        let mut g = graph(3, 8, 8);
        for b in &blocked {
            for d in ALL_DIRECTIONS {
                g.set_edge(*b, d, false);
            }
        }
        if let Some(path) = route(&mut g, &rules, src, dst) {
            prop_assert_eq!(path.points.first(), Some(&dst));
            prop_assert_eq!(path.points.last(), Some(&src));
            for pair in path.points.windows(2) {
                prop_assert_ne!(pair[0], pair[1]);
            }
            let cells = walk(&path);
            prop_assert_eq!(cells.len(), path.cells.len() + 1);
            for pair in cells.windows(2) {
                let d = Direction::between(pair[0], pair[1]);
                prop_assert_ne!(d, Direction::Unknown);
                prop_assert!(g.has_edge(pair[0], d));
            }
        }
    }
}
