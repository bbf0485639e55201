pub mod algo;
pub mod detailed_router;
pub mod dist;
pub mod error;
pub mod grid;
pub mod legality;
pub mod strategy;
pub mod utils;
pub mod worker;

use detailed_router::RouteSummary;
use drt_common::db::core::Design;
use drt_common::util::config::Config;
use error::RouteResult;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Detailed-routes `design` in place.
pub fn route(design: &mut Design, config: &Config) -> RouteResult<RouteSummary> {
    route_with_stop(design, config, Arc::new(AtomicBool::new(false)))
}

/// Like [`route`], stopping at the next worker boundary once `stop` is set.
pub fn route_with_stop(design: &mut Design, config: &Config, stop: Arc<AtomicBool>) -> RouteResult<RouteSummary> {
    detailed_router::run(design, &config.detailed_routing, stop)
}

#[cfg(test)]
pub(crate) mod tests {
    use drt_common::db::core::{AccessPoint, Design, LayerRect, Net, Pin};
    use drt_common::db::marker::MarkerSet;
    use drt_common::geom::Coord;
    use drt_common::geom::point::Point;
    use drt_common::geom::rect::Rect;
    use drt_common::util::generator::uniform_tech;

    fn pin(x: Coord, y: Coord) -> Pin {
        Pin {
            name: format!("p_{}_{}", x, y),
            shapes: vec![LayerRect::new(0, Rect::from_coords(x - 50, y - 50, x + 50, y + 50))],
            access_points: vec![AccessPoint {
                point: Point::new(x, y),
                layer: 0,
                cost: 0,
            }],
        }
    }

    /// Two horizontal two-pin nets on a 3000 x 3000 die.
    pub(crate) fn two_net_design() -> Design {
        let net = |name: &str, y: Coord| Net {
            name: name.to_string(),
            ndr: None,
            pins: vec![pin(300, y), pin(2700, y)],
            guides: vec![],
            wires: vec![],
            vias: vec![],
        };
        Design {
            name: "two_nets".to_string(),
            die_area: Rect::from_coords(0, 0, 3000, 3000),
            tech: uniform_tech(3),
            gcell: None,
            nets: vec![net("a", 700), net("b", 2300)],
            obstructions: vec![],
            markers: MarkerSet::new(),
        }
    }
}
