use drt_common::db::core::{AccessPoint, Design, LayerRect, Net, PathSeg, Pin};
use drt_common::db::indices::{NetId, WorkerId};
use drt_common::db::marker::{Constraint, Marker, MarkerSet};
use drt_common::geom::Coord;
use drt_common::geom::point::Point;
use drt_common::geom::rect::Rect;
use drt_common::util::generator::uniform_tech;
use drt_router::detailed_router::commit;
use drt_router::grid::CostWeights;
use drt_router::legality::RuleSet;
use drt_router::worker::{self, RipupMode, TaskNet, WorkerResult, WorkerTask};
use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;

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

fn vertical(x: Coord, y0: Coord, y1: Coord) -> PathSeg {
    PathSeg {
        layer: 1,
        begin: Point::new(x, y0),
        end: Point::new(x, y1),
        width: 100,
        ext: 50,
    }
}

/// Two nets whose M2 wires overlap on the line where two route boxes meet.
fn shorted_nets() -> Vec<Net> {
    let net = |name: &str, y: Coord, wire: PathSeg| Net {
        name: name.to_string(),
        ndr: None,
        pins: vec![pin(300, y), pin(2700, y)],
        guides: vec![],
        wires: vec![wire],
        vias: vec![],
    };
    vec![
        net("a", 2700, vertical(1500, 1500, 2100)),
        net("b", 300, vertical(1500, 900, 1700)),
    ]
}

fn short_marker() -> Marker {
    Marker {
        bbox: Rect::from_coords(1450, 1450, 1550, 1750),
        layer: 1,
        cut: false,
        constraint: Constraint::Short,
        srcs: [NetId::new(0), NetId::new(1)].into_iter().collect::<BTreeSet<_>>(),
    }
}

fn task(id: usize, route_box: Rect, ext_box: Rect) -> WorkerTask {
    let die = Rect::from_coords(0, 0, 3000, 3000);
    WorkerTask {
        id: WorkerId::new(id),
        route_box,
        ext_box,
        drc_box: ext_box,
        iteration: 3,
        ripup_mode: RipupMode::Drc,
        follow_guide: false,
        weights: CostWeights {
            iteration: 3,
            ..CostWeights::default()
        },
        // checks only: nothing may be ripped up
        maze_end_iter: 0,
        marker_decay: 0.95,
        via_cost: 4,
        taper_radius: 3,
        auto_taper: true,
        or_seed: None,
        or_k: 0.0,
        congestion_threshold: 0.4,
        die_area: die,
        tech: uniform_tech(3),
        nets: shorted_nets()
            .into_iter()
            .enumerate()
            .map(|(i, net)| TaskNet { id: NetId::new(i), net })
            .collect(),
        obstructions: vec![],
        markers: vec![short_marker()],
    }
}

fn run_pair() -> (WorkerResult, WorkerResult) {
    let _ = env_logger::builder().is_test(true).try_init();
    let left = task(0, Rect::from_coords(0, 0, 1500, 3000), Rect::from_coords(0, 0, 2100, 3000));
    let right = task(1, Rect::from_coords(1500, 0, 3000, 3000), Rect::from_coords(900, 0, 3000, 3000));
    let rules = RuleSet::build(&left.tech);
    let stop = AtomicBool::new(false);
    let a = worker::run(&left, &rules, &stop).unwrap();
    let b = worker::run(&right, &rules, &stop).unwrap();
    (a, b)
}

#[test]
fn test_overlap_violation_counted_once() {
    let (a, b) = run_pair();
    assert!(!a.skipped && !b.skipped);
    assert!(a.updates.is_empty() && b.updates.is_empty());
    assert!(!a.markers.is_empty());
    assert!(a.markers.iter().all(|m| m.constraint == Constraint::Short));
    assert_eq!(a.markers, b.markers);

    let mut merged = MarkerSet::new();
    for m in a.markers.iter().chain(&b.markers) {
        merged.insert(m.clone());
    }
    assert_eq!(merged.len(), a.markers.len());
}

#[test]
fn test_serial_commit_keeps_one_copy() {
    let (a, b) = run_pair();
    let mut design = Design {
        name: "overlap".to_string(),
        die_area: Rect::from_coords(0, 0, 3000, 3000),
        tech: uniform_tech(3),
        gcell: None,
        nets: shorted_nets(),
        obstructions: vec![],
        markers: MarkerSet::new(),
    };
    design.markers.insert(short_marker());
    commit(&mut design, &a);
    commit(&mut design, &b);
    assert_eq!(design.markers.len(), a.markers.len());
    assert!(design.markers.iter().all(|m| m.constraint == Constraint::Short));
    assert_eq!(design.nets[0].wires, vec![vertical(1500, 1500, 2100)]);
}
