use drt_common::db::tech::Tech;
use drt_common::geom::Coord;
use drt_common::geom::point::Point;
use drt_common::geom::rect::Rect;

/// Lowest maze layer counted by the congestion estimate.
pub const MIN_CONGESTION_LAYER: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    West,
    East,
    South,
    North,
}

fn side_of(route_box: &Rect, p: Point<Coord>) -> Option<Side> {
    if p.x == route_box.min.x {
        Some(Side::West)
    } else if p.x == route_box.max.x {
        Some(Side::East)
    } else if p.y == route_box.min.y {
        Some(Side::South)
    } else if p.y == route_box.max.y {
        Some(Side::North)
    } else {
        None
    }
}

/// Whether the pass-through traffic of a worker fills its tracks.
///
/// `boundaries` holds, per net, the boundary terminals of the worker. A net
/// passes through when it has terminals on both the low and high edge of
/// an axis; its crossings on each layer are compared with the tracks of
/// that layer spanning the worker.
pub fn is_congested(
    tech: &Tech,
    route_box: &Rect,
    threshold: f64,
    boundaries: &[Vec<(Point<Coord>, usize)>],
) -> bool {
    let n = tech.num_layers();
    let mut h_cross = vec![0usize; n];
    let mut v_cross = vec![0usize; n];

    for terms in boundaries {
        let sides: Vec<Option<Side>> = terms.iter().map(|&(p, _)| side_of(route_box, p)).collect();
        let has = |s: Side| sides.contains(&Some(s));
        let through_x = has(Side::West) && has(Side::East);
        let through_y = has(Side::South) && has(Side::North);
        for (&(_, z), side) in terms.iter().zip(&sides) {
            if z >= n {
                continue;
            }
            match side {
                Some(Side::West | Side::East) if through_x => h_cross[z] += 1,
                Some(Side::South | Side::North) if through_y => v_cross[z] += 1,
                _ => {}
            }
        }
    }

    for z in MIN_CONGESTION_LAYER..n {
        let layer = tech.layer(z);
        let tracks = if layer.is_horizontal() {
            layer.tracks_in(route_box.min.y, route_box.max.y).count()
        } else {
            layer.tracks_in(route_box.min.x, route_box.max.x).count()
        };
        if tracks == 0 {
            continue;
        }
        // both edges of a crossing net are counted
        let crossings = (h_cross[z] + v_cross[z]) as f64 / 2.0;
        if crossings / tracks as f64 >= threshold {
            log::debug!(
                "layer {} congested: {:.1} crossings over {} tracks",
                layer.name,
                crossings,
                tracks
            );
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use drt_common::util::generator::uniform_tech;

    fn through(z: usize, y: Coord) -> Vec<(Point<Coord>, usize)> {
        vec![(Point::new(0, y), z), (Point::new(2000, y), z)]
    }

    #[test]
    fn test_pass_through_nets_fill_tracks() {
        let tech = uniform_tech(6);
        let route_box = Rect::from_coords(0, 0, 2000, 2000);
        // ten tracks on z 4; four nets is a factor of 0.4
        let nets: Vec<_> = (0..4).map(|i| through(4, 100 + 200 * i)).collect();
        assert!(is_congested(&tech, &route_box, 0.4, &nets));
        assert!(!is_congested(&tech, &route_box, 0.4, &nets[..3]));
    }

    #[test]
    fn test_low_layers_and_one_sided_nets_ignored() {
        let tech = uniform_tech(6);
        let route_box = Rect::from_coords(0, 0, 2000, 2000);
        let low: Vec<_> = (0..10).map(|i| through(2, 100 + 200 * i)).collect();
        assert!(!is_congested(&tech, &route_box, 0.4, &low));
        let one_sided: Vec<_> = (0..10)
            .map(|i| vec![(Point::new(0, 100 + 200 * i), 4), (Point::new(0, 300 + 200 * i), 4)])
            .collect();
        assert!(!is_congested(&tech, &route_box, 0.4, &one_sided));
    }
}
