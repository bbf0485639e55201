use super::SearchContext;
use super::cost::{est_cost, next_path_cost};
use super::wavefront::{BUFFER_DEPTH, TaperBox, Wavefront, WavefrontGrid};
use crate::error::{RouteError, RouteResult};
use crate::grid::dir::ALL_DIRECTIONS;
use crate::grid::{Cost, Direction, GridGraph};
use drt_common::geom::Coord;
use drt_common::geom::coord::GridPoint;
use drt_common::geom::point::Point;
use std::collections::HashMap;

/// A found connection. `points` holds only the direction-change grids,
/// destination first and source last; `cells` holds every grid walked,
/// destination first, excluding the source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MazePath {
    pub points: Vec<GridPoint>,
    pub cells: Vec<GridPoint>,
    pub path_cost: Cost,
}

/// One source-to-pin search over a prepared grid.
pub struct SearchRequest<'a> {
    pub conn_comps: &'a [GridPoint],
    pub dst_pin: &'a [GridPoint],
    pub center: Point<Coord>,
    pub src_tapers: &'a HashMap<GridPoint, TaperBox>,
}

fn expandable(grid: &GridGraph, ctx: &SearchContext, curr: &WavefrontGrid, dir: Direction) -> bool {
    let p = curr.p;
    if !grid.has_edge(p, dir) {
        return false;
    }
    let q = dir.next(p);
    if grid.is_src(q) || grid.prev_dir(q) != Direction::Unknown || curr.last_dir() == dir.reverse() {
        return false;
    }
    if let Some(ndr) = ctx.ndr {
        let layer_width = grid.layer(p.z).width;
        if ndr.width(p.z) > layer_width && !grid.is_src(p) {
            let hw = ndr.width(p.z) / 2;
            let die = grid.die_box();
            if dir.is_y() {
                let x = grid.x_coord(p.x);
                if x - hw < die.min.x || x + hw > die.max.x {
                    return false;
                }
            } else if dir.is_x() {
                let y = grid.y_coord(p.y);
                if y - hw < die.min.y || y + hw > die.max.y {
                    return false;
                }
            }
        }
    }
    true
}

fn expand(
    grid: &mut GridGraph,
    wavefront: &mut Wavefront,
    ctx: &SearchContext,
    curr: &WavefrontGrid,
    dir: Direction,
    dst: (GridPoint, GridPoint),
    center: Point<Coord>,
) {
    let p = curr.p;
    let next_p = dir.next(p);
    let el = grid.edge_length(p, dir);
    let est = est_cost(grid, ctx, p, dst.0, dst.1, dir);
    let path_cost = next_path_cost(grid, ctx, curr, dir);

    let mut next = *curr;
    next.p = next_p;
    next.path_cost = path_cost;
    next.cost = path_cost + est;
    next.dist = grid.point(next_p).manhattan(&center);

    if dir.is_via() {
        next.v_length = (0, 0);
        next.prev_via_up = dir == Direction::Down;
    } else if curr.v_length.0 != Coord::MAX && curr.v_length.1 != Coord::MAX {
        if dir.is_x() {
            next.v_length.0 += el;
        } else {
            next.v_length.1 += el;
        }
    }

    if curr.t_length != Coord::MAX {
        next.t_length = curr.t_length.saturating_add(el);
    }
    if curr.last_dir() != Direction::Unknown && curr.last_dir() != dir {
        next.t_length = el;
    }
    if dir.is_via() {
        next.t_length = Coord::MAX;
    }

    next.src_taper = curr.src_taper.filter(|b| b.contains(next_p));

    let tail = next.shift_add(dir);
    if tail == Direction::Unknown {
        wavefront.push(next);
        return;
    }
    let tail_p = next.tail_point();
    let settled = grid.prev_dir(tail_p);
    if settled == Direction::Unknown || settled == tail {
        grid.set_prev_dir(tail_p, tail);
        wavefront.push(next);
    }
}

fn trace_back(grid: &GridGraph, curr: &WavefrontGrid) -> RouteResult<MazePath> {
    let mut points = Vec::new();
    let mut cells = Vec::new();
    let mut prev = Direction::Unknown;
    let mut q = curr.p;

    for i in 0..BUFFER_DEPTH {
        if grid.is_src(q) {
            break;
        }
        let d = curr.buffered_dir(i);
        if d == Direction::Unknown {
            return Err(RouteError::InvariantViolation(format!(
                "frontier buffer ran out at {:?} before reaching a source",
                q
            )));
        }
        cells.push(q);
        if d != prev {
            points.push(q);
        }
        q = d.prev(q);
        prev = d;
    }

    let mut steps = 0usize;
    let limit = {
        let (dx, dy, dz) = grid.dims();
        dx as usize * dy as usize * dz as usize
    };
    while !grid.is_src(q) {
        let d = grid.prev_dir(q);
        if d == Direction::Unknown {
            return Err(RouteError::InvariantViolation(format!(
                "settled chain broken at {:?} before reaching a source",
                q
            )));
        }
        steps += 1;
        if steps > limit {
            return Err(RouteError::InvariantViolation(format!(
                "settled chain loops through {:?}",
                q
            )));
        }
        cells.push(q);
        if d != prev {
            points.push(q);
        }
        q = d.prev(q);
        prev = d;
    }

    if !points.is_empty() {
        points.push(q);
    }
    Ok(MazePath {
        points,
        cells,
        path_cost: curr.path_cost,
    })
}

/// Best-first search from the connected component to any grid of the
/// destination pin. Returns `Ok(None)` when the frontier runs dry; the
/// grid's settled directions are left for the caller to reset.
pub fn search(
    grid: &mut GridGraph,
    wavefront: &mut Wavefront,
    ctx: &SearchContext,
    req: &SearchRequest,
) -> RouteResult<Option<MazePath>> {
    let (dx, dy, dz) = grid.dims();
    let mut dst1 = GridPoint::new(dx - 1, dy - 1, dz - 1);
    let mut dst2 = GridPoint::new(0, 0, 0);
    for mi in req.dst_pin {
        dst1 = GridPoint::new(dst1.x.min(mi.x), dst1.y.min(mi.y), dst1.z.min(mi.z));
        dst2 = GridPoint::new(dst2.x.max(mi.x), dst2.y.max(mi.y), dst2.z.max(mi.z));
    }

    wavefront.clear();
    for &idx in req.conn_comps {
        if grid.is_dst(idx) {
            return Ok(Some(MazePath {
                points: vec![idx],
                cells: Vec::new(),
                path_cost: 0,
            }));
        }
        let dist = grid.point(idx).manhattan(&req.center);
        let est = est_cost(grid, ctx, idx, dst1, dst2, Direction::Unknown);
        let taper = ctx.ndr.and(req.src_tapers.get(&idx).copied());
        wavefront.push(WavefrontGrid::seed(idx, est, dist, taper));
    }

    while let Some(curr) = wavefront.pop() {
        if grid.prev_dir(curr.p) != Direction::Unknown {
            continue;
        }
        if grid.is_dst(curr.p) {
            return trace_back(grid, &curr).map(Some);
        }
        for dir in ALL_DIRECTIONS {
            if expandable(grid, ctx, &curr, dir) {
                expand(grid, wavefront, ctx, &curr, dir, (dst1, dst2), req.center);
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::CostWeights;
    use crate::legality::RuleSet;
    use drt_common::geom::rect::Rect;
    use drt_common::util::generator::uniform_tech;

    fn open_graph(n: i32) -> GridGraph {
        let tech = uniform_tech(2);
        let tracks: Vec<Coord> = (0..n).map(|i| 100 + 200 * i).collect();
        let side = 200 * n;
        let die = Rect::from_coords(0, 0, side, side);
        let mut g = GridGraph::new(&tech, die, die, tracks.clone(), tracks, 4, CostWeights::default());
        for x in 0..n {
            for y in 0..n {
                for z in 0..2 {
                    g.set_guide(GridPoint::new(x, y, z), true);
                }
            }
        }
        g
    }

    fn run(g: &mut GridGraph, src: GridPoint, dst: GridPoint) -> Option<MazePath> {
        let tech = uniform_tech(2);
        let rules = RuleSet::build(&tech);
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

    #[test]
    fn test_source_on_destination() {
        let mut g = open_graph(4);
        let p = GridPoint::new(1, 1, 0);
        let path = run(&mut g, p, p).map(|m| m.points);
        assert_eq!(path, Some(vec![p]));
    }

    #[test]
    fn test_one_step() {
        let mut g = open_graph(4);
        let src = GridPoint::new(1, 1, 0);
        let dst = GridPoint::new(2, 1, 0);
        let found = run(&mut g, src, dst);
        assert_eq!(found.as_ref().map(|m| m.points.clone()), Some(vec![dst, src]));
        assert_eq!(found.map(|m| m.path_cost), Some(200));
    }

    #[test]
    fn test_l_shape_has_corner() {
        let mut g = open_graph(6);
        let src = GridPoint::new(0, 0, 0);
        let dst = GridPoint::new(3, 3, 0);
        let found = run(&mut g, src, dst);
        let Some(found) = found else {
            panic!("expected a path");
        };
        assert_eq!(found.points.first(), Some(&dst));
        assert_eq!(found.points.last(), Some(&src));
        assert!(found.points.len() >= 3);
        assert_eq!(found.cells.first(), Some(&dst));
        assert!(!found.cells.contains(&src));
    }

    #[test]
    fn test_unreachable_returns_none() {
        let mut g = open_graph(4);
        let src = GridPoint::new(0, 0, 0);
        let dst = GridPoint::new(3, 3, 1);
        for d in ALL_DIRECTIONS {
            g.set_edge(dst, d, false);
        }
        assert!(run(&mut g, src, dst).is_none());
    }
}
