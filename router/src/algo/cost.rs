use super::SearchContext;
use super::wavefront::WavefrontGrid;
use crate::grid::{Cost, CostWeights, Direction, GridGraph, ShapeCost};
use crate::utils::conversion::{lower_bound, upper_bound};
use drt_common::geom::Coord;
use drt_common::geom::coord::GridPoint;

/// Weight of a forbidden via-to-via or egress length. Marker pressure takes
/// over from DRC pressure after the first few iterations.
fn via2via_weight(w: &CostWeights) -> Cost {
    if w.iteration >= 3 { w.marker as Cost } else { w.drc as Cost }
}

fn turn_weight(w: &CostWeights) -> Cost {
    if w.iteration >= 3 { w.drc as Cost } else { w.marker as Cost }
}

fn guide_weight(w: &CostWeights) -> Cost {
    if w.route_with_jumpers {
        w.guide as Cost * w.jumper_multiplier as Cost
    } else {
        w.guide as Cost
    }
}

fn block_cost(grid: &GridGraph, z: i32) -> Cost {
    grid.weights.block as Cost * grid.layer(z).min_width.max(0) as Cost * 20
}

/// Lower bound on the remaining cost after stepping from `src` in `dir`
/// towards the destination box `[dst1, dst2]`. `Unknown` estimates from
/// `src` itself.
pub fn est_cost(
    grid: &GridGraph,
    ctx: &SearchContext,
    src: GridPoint,
    dst1: GridPoint,
    dst2: GridPoint,
    dir: Direction,
) -> Cost {
    let el = if dir == Direction::Unknown { 0 } else { grid.edge_length(src, dir) };
    let next = dir.next(src);
    let np = grid.point(next);
    let d1 = grid.point(dst1);
    let d2 = grid.point(dst2);

    let min_x = (d1.x - np.x).max(np.x - d2.x).max(0);
    let min_y = (d1.y - np.y).max(np.y - d2.y).max(0);
    let min_z = (grid.z_height(dst1.z) - grid.z_height(src.z))
        .max(grid.z_height(src.z) - grid.z_height(dst2.z))
        .max(0);

    let mut bends = 0;
    if dir != Direction::Unknown {
        bends += (min_x != 0 && !dir.is_x()) as Cost;
        bends += (min_y != 0 && !dir.is_y()) as Cost;
        bends += (min_z != 0 && !dir.is_via()) as Cost;
    }

    // A single-point destination on this layer needs a via at the pin; an
    // approach offset whose length is forbidden for both via orientations
    // is penalized up front.
    let mut penalty = 0;
    if dst1 == dst2 && next.z == dst1.z {
        let z = next.z;
        let top = grid.num_layers() as i32 - 1;
        let (gap, is_x) = if grid.layer(z).horizontal {
            ((np.y - d1.y).abs(), false)
        } else {
            ((np.x - d1.x).abs(), true)
        };
        let t = ctx.tables;
        let forbidden = gap != 0
            && (t.is_via2via_forbidden_len(z as usize, false, false, is_x, gap) || z == 0)
            && (t.is_via2via_forbidden_len(z as usize, true, true, is_x, gap) || z == top);
        if forbidden {
            penalty = 2 * via2via_weight(&grid.weights) * el as Cost;
        }
    }

    min_x as Cost + min_y as Cost + min_z as Cost + bends + penalty
}

/// Path cost of the entry reached by stepping from `curr` in `dir`.
pub fn next_path_cost(grid: &GridGraph, ctx: &SearchContext, curr: &WavefrontGrid, dir: Direction) -> Cost {
    let p = curr.p;
    let z = p.z as usize;
    let el = grid.edge_length(p, dir) as Cost;
    let curr_dir = curr.last_dir();
    let t = ctx.tables;
    let mut cost = curr.path_cost;

    if curr_dir != dir && curr_dir != Direction::Unknown {
        cost += 1;
    }

    if dir.is_via() {
        let (vx, vy) = curr.v_length;
        let prev_down = !curr.prev_via_up;
        let curr_down = dir != Direction::Up;
        let forbidden = if vx == 0 && vy > 0 {
            t.is_via2via_forbidden_len(z, prev_down, curr_down, false, vy)
        } else if vx > 0 && vy == 0 {
            t.is_via2via_forbidden_len(z, prev_down, curr_down, true, vx)
        } else if t.is_via2via_prl(z, prev_down, curr_down, false, vy)
            || t.is_via2via_prl(z, prev_down, curr_down, true, vx)
        {
            t.is_via2via_forbidden_len(z, prev_down, curr_down, false, vy)
                || t.is_via2via_forbidden_len(z, prev_down, curr_down, true, vx)
        } else {
            t.is_via2via_forbidden_len(z, prev_down, curr_down, false, vy)
                && t.is_via2via_forbidden_len(z, prev_down, curr_down, true, vx)
        };
        if forbidden {
            cost += 2 * via2via_weight(&grid.weights) * el;
        }
    }

    if curr_dir != Direction::Unknown && curr_dir != dir {
        let forbidden = if dir.is_via() {
            let down = dir != Direction::Up;
            !curr_dir.is_via() && t.is_via_forbidden_turn_len(z, down, curr_dir.is_x(), curr.t_length)
        } else {
            let down = !curr.prev_via_up;
            match curr_dir {
                d if d.is_x() => t.is_via_forbidden_turn_len(z, down, true, curr.v_length.0),
                d if d.is_y() => t.is_via_forbidden_turn_len(z, down, false, curr.v_length.1),
                _ => false,
            }
        };
        if forbidden {
            cost += 2 * turn_weight(&grid.weights) * el;
        }
    }

    if use_ndr_costs(ctx, curr) {
        cost + ndr_costs(grid, ctx, p, dir, curr_dir)
    } else {
        cost + costs(grid, p, dir)
    }
}

/// NDR costs apply outside the source and destination taper boxes.
pub fn use_ndr_costs(ctx: &SearchContext, curr: &WavefrontGrid) -> bool {
    if ctx.ndr.is_none() {
        return false;
    }
    if curr.src_taper.is_some_and(|b| b.contains(curr.p)) {
        return false;
    }
    !ctx.dst_taper.is_some_and(|b| b.contains(curr.p))
}

fn has_fixed_shape_cost(grid: &GridGraph, p: GridPoint, dir: Direction) -> bool {
    if dir.is_via() {
        let base = if dir == Direction::Down { dir.next(p) } else { p };
        if grid.is_override_shape_cost_via(base) {
            return false;
        }
    }
    grid.has_shape_cost(p, dir, ShapeCost::FixedShape)
}

/// Cost of the edge from `p` in `dir` for a default-rule wire.
pub fn costs(grid: &GridGraph, p: GridPoint, dir: Direction) -> Cost {
    let w = &grid.weights;
    let el = grid.edge_length(p, dir) as Cost;
    let mut cost = el;
    if grid.has_grid_cost(p, dir) {
        cost += w.grid as Cost * el;
    }
    if grid.has_shape_cost(p, dir, ShapeCost::RouteShape) {
        cost += w.drc as Cost * el;
    }
    if grid.has_shape_cost(p, dir, ShapeCost::Marker) {
        cost += w.marker as Cost * el;
    }
    if has_fixed_shape_cost(grid, p, dir) {
        cost += w.fixed_shape as Cost * el;
    }
    if grid.is_blocked(p, dir) {
        cost += block_cost(grid, p.z);
    }
    if !grid.has_guide(p, dir) {
        cost += guide_weight(w) * el;
    }
    cost
}

/// Index range of the tracks inside `[lo, hi]`; empty when `start > end`.
fn span(tracks: &[Coord], lo: Coord, hi: Coord) -> (i32, i32) {
    let start = lower_bound(tracks, lo) as i32;
    let mut end = upper_bound(tracks, hi) as i32;
    if tracks.get(end as usize).is_some_and(|&t| t > hi) {
        end -= 1;
    }
    (start, end)
}

/// Cost of the edge from `p` in `dir` for a non-default-rule wire: the
/// shape flags are summed over every grid the wider wire and its spacing
/// halo would cover.
pub fn ndr_costs(grid: &GridGraph, ctx: &SearchContext, p: GridPoint, dir: Direction, prev_dir: Direction) -> Cost {
    let Some(ndr) = ctx.ndr else {
        return costs(grid, p, dir);
    };
    if dir.is_via() {
        return via_ndr_costs(grid, ctx, p, dir, prev_dir);
    }
    let w = &grid.weights;
    let el = grid.edge_length(p, dir) as Cost;
    let mut cost = el;
    if grid.has_grid_cost(p, dir) {
        cost += w.grid as Cost * el;
    }
    if !grid.has_guide(p, dir) {
        cost += guide_weight(w) * el;
    }

    let r = ndr.window(p.z);
    let wext = ndr.extension(p.z);
    let (xc, yc) = (grid.x_coord(p.x), grid.y_coord(p.y));
    let seg_start = prev_dir == Direction::Unknown || prev_dir != dir;
    let next = dir.next(p);
    let dst_end = prev_dir != Direction::Unknown && grid.is_dst(next);

    let (mut x1, mut x2, mut y1, mut y2);
    if dir.is_y() {
        (x1, x2) = (xc - r, xc + r);
        (y1, y2) = (yc, yc);
        if seg_start {
            if dir == Direction::North {
                y1 = yc - r - wext;
            } else {
                y2 = yc + r + wext;
            }
        }
        if dst_end {
            let ny = grid.y_coord(next.y);
            if dir == Direction::North {
                y2 = ny + r + wext;
            } else {
                y1 = ny - r - wext;
            }
        }
    } else {
        (y1, y2) = (yc - r, yc + r);
        (x1, x2) = (xc, xc);
        if seg_start {
            if dir == Direction::East {
                x1 = xc - r - wext;
            } else {
                x2 = xc + r + wext;
            }
        }
        if dst_end {
            let nx = grid.x_coord(next.x);
            if dir == Direction::East {
                x2 = nx + r + wext;
            } else {
                x1 = nx - r - wext;
            }
        }
    }

    let conv = grid.converter();
    let (sx, ex) = span(conv.xs(), x1, x2);
    let (sy, ey) = span(conv.ys(), y1, y2);
    for x in sx..=ex {
        for y in sy..=ey {
            let q = GridPoint::new(x, y, p.z);
            if has_fixed_shape_cost(grid, q, dir) {
                cost += w.fixed_shape as Cost * el;
            }
            if grid.has_shape_cost(q, dir, ShapeCost::RouteShape) {
                cost += w.drc as Cost * el;
            }
            if grid.has_shape_cost(q, dir, ShapeCost::Marker) {
                cost += w.marker as Cost * el;
            }
            if grid.is_blocked(q, dir) {
                cost += block_cost(grid, p.z);
            }
        }
    }
    cost
}

fn via_ndr_costs(grid: &GridGraph, ctx: &SearchContext, p: GridPoint, dir: Direction, prev_dir: Direction) -> Cost {
    let cut = if dir == Direction::Up { p.z } else { p.z - 1 };
    let Some(ndr) = ctx.ndr.filter(|n| n.pref_via(cut).is_some()) else {
        return costs(grid, p, dir);
    };
    let w = &grid.weights;
    let el = grid.edge_length(p, dir) as Cost;
    let mut cost = el;
    if has_fixed_shape_cost(grid, p, dir) {
        cost += w.fixed_shape as Cost * el;
    }
    if grid.has_shape_cost(p, dir, ShapeCost::RouteShape) {
        cost += w.drc as Cost * el;
    }
    if grid.has_shape_cost(p, dir, ShapeCost::Marker) {
        cost += w.marker as Cost * el;
    }
    if grid.is_blocked(p, dir) {
        cost += block_cost(grid, p.z);
    }

    let r = ndr.window(p.z);
    let (xc, yc) = (grid.x_coord(p.x), grid.y_coord(p.y));
    let conv = grid.converter();
    let (mut sx, mut ex) = span(conv.xs(), xc - r, xc + r);
    let (mut sy, mut ey) = span(conv.ys(), yc - r, yc + r);
    match prev_dir {
        Direction::North => ey = p.y - 1,
        Direction::South => sy = p.y + 1,
        Direction::East => sx = p.x + 1,
        Direction::West => ex = p.x - 1,
        _ => {}
    }
    for x in sx..=ex {
        for y in sy..=ey {
            let q = GridPoint::new(x, y, p.z);
            for (kind, weight) in [
                (ShapeCost::FixedShape, w.fixed_shape),
                (ShapeCost::RouteShape, w.drc),
                (ShapeCost::Marker, w.marker),
            ] {
                if grid.has_shape_cost(q, Direction::Unknown, kind) {
                    cost += weight as Cost * el;
                }
            }
        }
    }
    cost
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::NdrRule;
    use crate::grid::CostWeights;
    use crate::legality::RuleSet;
    use drt_common::db::tech::Ndr;
    use drt_common::geom::rect::Rect;
    use drt_common::util::generator::uniform_tech;

    fn graph() -> GridGraph {
        let tech = uniform_tech(3);
        let tracks: Vec<Coord> = (0..8).map(|i| 100 + 200 * i).collect();
        let die = Rect::from_coords(0, 0, 1600, 1600);
        let mut g = GridGraph::new(&tech, die, die, tracks.clone(), tracks, 4, CostWeights::default());
        for x in 0..8 {
            for y in 0..8 {
                for z in 0..3 {
                    g.set_guide(GridPoint::new(x, y, z), true);
                }
            }
        }
        g
    }

    #[test]
    fn test_plain_edge_cost() {
        let mut g = graph();
        let rules = RuleSet::build(&uniform_tech(3));
        let ctx = SearchContext::new(&rules.default);
        let p = GridPoint::new(1, 1, 0);
        let curr = WavefrontGrid::seed(p, 0, 0, None);
        assert_eq!(next_path_cost(&g, &ctx, &curr, Direction::East), 200);
        // wrong way on a horizontal layer: grid cost 2 * 200
        assert_eq!(next_path_cost(&g, &ctx, &curr, Direction::North), 600);

        g.add_cost(GridPoint::new(2, 1, 0), ShapeCost::RouteShape, true, 1);
        assert_eq!(costs(&g, p, Direction::East), 200 + 8 * 200);
        g.set_guide(GridPoint::new(0, 1, 0), false);
        assert_eq!(costs(&g, p, Direction::West), 200 + 200);
    }

    #[test]
    fn test_bend_adds_one() {
        let g = graph();
        let rules = RuleSet::build(&uniform_tech(3));
        let ctx = SearchContext::new(&rules.default);
        let mut curr = WavefrontGrid::seed(GridPoint::new(2, 1, 1), 0, 0, None);
        curr.shift_add(Direction::North);
        curr.v_length = (0, 200);
        curr.t_length = Coord::MAX;
        let straight = next_path_cost(&g, &ctx, &curr, Direction::North);
        assert_eq!(straight, 200);
        // a turn onto the wrong-way direction pays the bend and grid cost
        assert_eq!(next_path_cost(&g, &ctx, &curr, Direction::East), 1 + 200 + 400);
    }

    #[test]
    fn test_via_after_short_run_pays_turn_weight() {
        let mut g = graph();
        let rules = RuleSet::build(&uniform_tech(3));
        let ctx = SearchContext::new(&rules.default);
        let mut curr = WavefrontGrid::seed(GridPoint::new(2, 2, 1), 0, 0, None);
        curr.shift_add(Direction::East);
        // x runs of 101..=199 before a via on M2 are forbidden
        curr.t_length = 100;
        let clear = next_path_cost(&g, &ctx, &curr, Direction::Down);
        for len in [101, 150, 199] {
            curr.t_length = len;
            assert_eq!(next_path_cost(&g, &ctx, &curr, Direction::Down), clear + 2 * 32 * 800);
        }
        curr.t_length = 200;
        assert_eq!(next_path_cost(&g, &ctx, &curr, Direction::Down), clear);

        // from the third iteration turns weigh as DRC cost
        g.weights.iteration = 3;
        curr.t_length = 200;
        let clear_up = next_path_cost(&g, &ctx, &curr, Direction::Up);
        curr.t_length = 150;
        assert_eq!(next_path_cost(&g, &ctx, &curr, Direction::Up), clear_up + 2 * 8 * 800);
    }

    #[test]
    fn test_turn_after_short_via_run_pays_turn_weight() {
        let g = graph();
        let rules = RuleSet::build(&uniform_tech(3));
        let ctx = SearchContext::new(&rules.default);
        let mut curr = WavefrontGrid::seed(GridPoint::new(2, 2, 1), 0, 0, None);
        curr.shift_add(Direction::East);
        curr.prev_via_up = false;
        curr.t_length = Coord::MAX;
        curr.v_length = (250, 0);
        let clear = next_path_cost(&g, &ctx, &curr, Direction::North);
        curr.v_length = (150, 0);
        assert_eq!(next_path_cost(&g, &ctx, &curr, Direction::North), clear + 2 * 32 * 200);
        // no fat enclosure along y on M2, so a y run never forbids the turn
        curr.shift_add(Direction::North);
        curr.v_length = (0, 150);
        let y_turn = next_path_cost(&g, &ctx, &curr, Direction::East);
        curr.v_length = (0, 250);
        assert_eq!(next_path_cost(&g, &ctx, &curr, Direction::East), y_turn);
    }

    #[test]
    fn test_diagonal_via_pair_checks_either_axis_below_prl() {
        let g = graph();
        let rules = RuleSet::build(&uniform_tech(3));
        let ctx = SearchContext::new(&rules.default);
        let p = GridPoint::new(2, 2, 1);
        let clear = next_path_cost(&g, &ctx, &WavefrontGrid::seed(p, 0, 0, None), Direction::Down);
        let step = |vx: Coord, vy: Coord| {
            let mut curr = WavefrontGrid::seed(p, 0, 0, None);
            curr.prev_via_up = false;
            curr.v_length = (vx, vy);
            next_path_cost(&g, &ctx, &curr, Direction::Down)
        };
        let penalty = 2 * 8 * 800;
        // V1 to V1 on M2: x forbids [0, 280], y forbids [0, 200]; the x run
        // stays below the 180 enclosure overlap, so one axis is enough
        assert_eq!(step(100, 300), clear + penalty);
        // past both overlaps, both axes must be forbidden
        assert_eq!(step(200, 250), clear);
        assert_eq!(step(200, 150), clear + penalty);
        // straight runs use their own axis only
        assert_eq!(step(0, 150), clear + penalty);
        assert_eq!(step(0, 201), clear);
        assert_eq!(step(281, 0), clear);
    }

    #[test]
    fn test_est_cost_counts_axes() {
        let g = graph();
        let rules = RuleSet::build(&uniform_tech(3));
        let ctx = SearchContext::new(&rules.default);
        let src = GridPoint::new(0, 0, 0);
        let dst = GridPoint::new(3, 2, 0);
        assert_eq!(est_cost(&g, &ctx, src, dst, dst, Direction::Unknown), 600 + 400);
        // stepping east leaves 400 x, 400 y and one bend still to go
        assert_eq!(est_cost(&g, &ctx, src, dst, dst, Direction::East), 400 + 400 + 1);
        // a 200 approach offset on the pin layer is a forbidden via-to-via
        // length for both via orientations: 2 * drc * edge length
        let pin = GridPoint::new(4, 3, 1);
        let from = GridPoint::new(3, 1, 1);
        assert_eq!(
            est_cost(&g, &ctx, from, pin, pin, Direction::North),
            200 + 200 + 1 + 2 * 8 * 200
        );
        // no via lands on the lowest layer from below, so the penalty never
        // applies there
        let pin = GridPoint::new(3, 1, 0);
        let from = GridPoint::new(2, 0, 0);
        assert_eq!(est_cost(&g, &ctx, from, pin, pin, Direction::East), 200 + 1);
    }

    #[test]
    fn test_ndr_window_sees_neighbour_tracks() {
        let tech = uniform_tech(3);
        let ndr = Ndr {
            name: "wide".to_string(),
            widths: vec![200; 3],
            spacings: vec![200; 3],
            wire_exts: Vec::new(),
            pref_vias: Vec::new(),
        };
        let rule = NdrRule::new(&tech, &ndr);
        // 200 / 2 + 200 + 100 / 2 - 1
        assert_eq!(rule.window(0), 349);

        let mut g = graph();
        let rules = RuleSet::build(&tech);
        let mut ctx = SearchContext::new(&rules.default);
        ctx.ndr = Some(&rule);
        let p = GridPoint::new(3, 3, 0);
        // one track above the wire, read when stepping east onto x = 4
        g.add_cost(GridPoint::new(4, 4, 0), ShapeCost::RouteShape, true, 1);
        assert_eq!(costs(&g, p, Direction::East), 200);
        let plain = ndr_costs(&g, &ctx, p, Direction::East, Direction::East);
        assert_eq!(plain, 200 + 8 * 200);
    }
}
