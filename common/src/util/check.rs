use crate::db::core::Design;
use crate::db::indices::NetId;
use crate::db::marker::Constraint;
use crate::geom::Coord;
use crate::geom::point::Point;
use crate::geom::rect::Rect;
use rayon::prelude::*;
use std::collections::VecDeque;
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const BIN_SIZE: Coord = 4000;

/// Verifies committed routing: no shorts between different nets or against
/// obstructions, and every multi-pin net connects all of its pins.
pub fn run(design: &Design) -> Result<(), String> {
    log::info!("Starting Design Verification (Shorts/Opens)");

    let (shorts_result, opens_result) =
        rayon::join(|| check_shorts(design), || check_opens(design));

    let mut valid = true;
    let mut msgs = Vec::new();

    match shorts_result {
        Err(e) => {
            log::error!("\x1b[31mFAIL\x1b[0m: Short Circuits Detected");
            log::error!("{}", e);
            msgs.push(e);
            valid = false;
        }
        Ok(_) => log::info!("\x1b[32mPASS\x1b[0m: No Shorts found."),
    }

    match opens_result {
        Err(e) => {
            log::error!("\x1b[31mFAIL\x1b[0m: Open Net (Disconnected) Detected");
            log::error!("{}", e);
            msgs.push(e);
            valid = false;
        }
        Ok(_) => log::info!("\x1b[32mPASS\x1b[0m: All nets are fully connected."),
    }

    if !design.markers.is_empty() {
        log::error!(
            "\x1b[31mFAIL\x1b[0m: {} standing DRC markers",
            design.markers.len()
        );
        msgs.push(format!("{} standing DRC markers", design.markers.len()));
        valid = false;
    } else {
        log::info!("\x1b[32mPASS\x1b[0m: No standing DRC markers.");
    }

    if valid {
        log::info!("\x1b[32mSUCCESS\x1b[0m: ROUTING IS CLEAN");
        Ok(())
    } else {
        log::error!(
            "\x1b[31mFAILURE\x1b[0m: ROUTING NOT FULLY LEGAL ({} Errors)",
            msgs.len()
        );
        Err(msgs.join("; "))
    }
}

/// Plain-text marker report, one line per marker, grouped totals first.
pub fn marker_report(design: &Design) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "design: {}", design.name);
    let _ = writeln!(out, "total markers: {}", design.markers.len());
    for constraint in [
        Constraint::Short,
        Constraint::MetalSpacing,
        Constraint::CutSpacing,
        Constraint::Unrouted,
    ] {
        let _ = writeln!(
            out,
            "  {:<14} {}",
            constraint.name(),
            design.markers.count(constraint)
        );
    }
    for marker in design.markers.iter() {
        let layer_name = if marker.cut {
            design
                .tech
                .cut_layers
                .get(marker.layer)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| format!("cut{}", marker.layer))
        } else {
            design
                .tech
                .layers
                .get(marker.layer)
                .map(|l| l.name.clone())
                .unwrap_or_else(|| format!("layer{}", marker.layer))
        };
        let nets: Vec<&str> = marker
            .srcs
            .iter()
            .filter_map(|id| design.nets.get(id.index()).map(|n| n.name.as_str()))
            .collect();
        let _ = writeln!(
            out,
            "{} {} ( {} {} ) ( {} {} ) nets: {}",
            marker.constraint.name(),
            layer_name,
            marker.bbox.min.x,
            marker.bbox.min.y,
            marker.bbox.max.x,
            marker.bbox.max.y,
            nets.join(" ")
        );
    }
    out
}

#[derive(Clone, Copy, Debug)]
struct Shape {
    rect: Rect,
    layer: usize,
    net: Option<NetId>,
}

#[derive(Hash, Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Debug)]
struct BinKey {
    layer: usize,
    bx: i32,
    by: i32,
}

fn net_shapes(design: &Design, net_id: NetId) -> Vec<Shape> {
    let net = design.net(net_id);
    let mut shapes = Vec::new();
    for wire in &net.wires {
        shapes.push(Shape {
            rect: wire.shape(),
            layer: wire.layer,
            net: Some(net_id),
        });
    }
    for via in &net.vias {
        let Some(def) = design.tech.vias.get(via.def) else {
            continue;
        };
        for z in [def.cut, def.cut + 1] {
            shapes.push(Shape {
                rect: def.enclosure_at(z, via.point),
                layer: z,
                net: Some(net_id),
            });
        }
    }
    for pin in &net.pins {
        for s in &pin.shapes {
            shapes.push(Shape {
                rect: s.rect,
                layer: s.layer,
                net: Some(net_id),
            });
        }
    }
    shapes
}

fn check_shorts(design: &Design) -> Result<(), String> {
    let mut all_bin_entries: Vec<(BinKey, Shape)> = design
        .net_ids()
        .collect::<Vec<_>>()
        .par_iter()
        .flat_map(|&net_id| net_shapes(design, net_id))
        .chain(design.obstructions.par_iter().map(|o| Shape {
            rect: o.rect,
            layer: o.layer,
            net: None,
        }))
        .flat_map_iter(|s| {
            let start_bx = s.rect.min.x.div_euclid(BIN_SIZE);
            let end_bx = s.rect.max.x.div_euclid(BIN_SIZE);
            let start_by = s.rect.min.y.div_euclid(BIN_SIZE);
            let end_by = s.rect.max.y.div_euclid(BIN_SIZE);
            (start_bx..=end_bx).flat_map(move |bx| {
                (start_by..=end_by).map(move |by| {
                    (
                        BinKey {
                            layer: s.layer,
                            bx,
                            by,
                        },
                        s,
                    )
                })
            })
        })
        .collect();

    all_bin_entries.par_sort_unstable_by(|a, b| a.0.cmp(&b.0));

    let mut chunks = Vec::new();
    if !all_bin_entries.is_empty() {
        let mut start = 0;
        for i in 1..all_bin_entries.len() {
            if all_bin_entries[i].0 != all_bin_entries[i - 1].0 {
                chunks.push((start, i));
                start = i;
            }
        }
        chunks.push((start, all_bin_entries.len()));
    }

    let error_found = AtomicBool::new(false);
    let error_count = AtomicUsize::new(0);
    let error_msg = Arc::new(Mutex::new(String::new()));

    chunks.par_iter().for_each(|&(start, end)| {
        let slice = &all_bin_entries[start..end];
        for i in 0..slice.len() {
            for j in (i + 1)..slice.len() {
                let (key, s1) = &slice[i];
                let s2 = &slice[j].1;
                if s1.net == s2.net || !s1.rect.overlaps(&s2.rect) {
                    continue;
                }
                // Count each pair only in the bin holding the overlap's lower-left corner.
                let Some(overlap) = s1.rect.intersection(&s2.rect) else {
                    continue;
                };
                if overlap.min.x.div_euclid(BIN_SIZE) != key.bx
                    || overlap.min.y.div_euclid(BIN_SIZE) != key.by
                {
                    continue;
                }
                error_count.fetch_add(1, Ordering::Relaxed);
                if !error_found.swap(true, Ordering::Relaxed) {
                    let name = |n: Option<NetId>| {
                        n.map(|id| design.net(id).name.clone())
                            .unwrap_or_else(|| "<obstruction>".to_string())
                    };
                    if let Ok(mut msg) = error_msg.lock() {
                        *msg = format!(
                            "SHORT: '{}' vs '{}' on Layer {} at ({}, {})",
                            name(s1.net),
                            name(s2.net),
                            key.layer,
                            overlap.min.x,
                            overlap.min.y
                        );
                    }
                }
            }
        }
    });

    if error_found.load(Ordering::Relaxed) {
        let first = error_msg.lock().map(|m| m.clone()).unwrap_or_default();
        Err(format!(
            "{} ({} shorts)",
            first,
            error_count.load(Ordering::Relaxed)
        ))
    } else {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
enum Conductor {
    Wire {
        layer: usize,
        a: Point<Coord>,
        b: Point<Coord>,
    },
    Via {
        lo: usize,
        p: Point<Coord>,
    },
    Access {
        pin: usize,
        layer: usize,
        p: Point<Coord>,
    },
}

impl Conductor {
    fn touches_point(&self, layer: usize, p: Point<Coord>) -> bool {
        match *self {
            Conductor::Wire { layer: l, a, b } => l == layer && Rect::from_coords(a.x, a.y, b.x, b.y).contains(p),
            Conductor::Via { lo, p: q } => (layer == lo || layer == lo + 1) && q == p,
            Conductor::Access { layer: l, p: q, .. } => l == layer && q == p,
        }
    }

    fn anchors(&self) -> Vec<(usize, Point<Coord>)> {
        match *self {
            Conductor::Wire { layer, a, b } => vec![(layer, a), (layer, b)],
            Conductor::Via { lo, p } => vec![(lo, p), (lo + 1, p)],
            Conductor::Access { layer, p, .. } => vec![(layer, p)],
        }
    }

    fn connects(&self, other: &Conductor) -> bool {
        if let (Conductor::Access { pin: p1, .. }, Conductor::Access { pin: p2, .. }) = (self, other)
            && p1 == p2
        {
            return true;
        }
        if let (
            Conductor::Wire { layer: l1, a: a1, b: b1 },
            Conductor::Wire { layer: l2, a: a2, b: b2 },
        ) = (self, other)
        {
            return l1 == l2
                && Rect::from_coords(a1.x, a1.y, b1.x, b1.y)
                    .intersects(&Rect::from_coords(a2.x, a2.y, b2.x, b2.y));
        }
        self.anchors()
            .iter()
            .any(|&(l, p)| other.touches_point(l, p))
            || other.anchors().iter().any(|&(l, p)| self.touches_point(l, p))
    }
}

fn check_opens(design: &Design) -> Result<(), String> {
    let error_found = AtomicBool::new(false);
    let error_count = AtomicUsize::new(0);
    let error_msg = Arc::new(Mutex::new(String::new()));

    design.nets.par_iter().for_each(|net| {
        if net.pins.len() < 2 {
            return;
        }

        let mut nodes: Vec<Conductor> = Vec::new();
        let mut pin_first = Vec::with_capacity(net.pins.len());
        for (pin_idx, pin) in net.pins.iter().enumerate() {
            pin_first.push(nodes.len());
            for ap in &pin.access_points {
                nodes.push(Conductor::Access {
                    pin: pin_idx,
                    layer: ap.layer,
                    p: ap.point,
                });
            }
        }
        for w in &net.wires {
            nodes.push(Conductor::Wire {
                layer: w.layer,
                a: w.begin,
                b: w.end,
            });
        }
        for v in &net.vias {
            if let Some(def) = design.tech.vias.get(v.def) {
                nodes.push(Conductor::Via {
                    lo: def.cut,
                    p: v.point,
                });
            }
        }

        let n = nodes.len();
        let mut adj = vec![Vec::new(); n];
        for i in 0..n {
            for j in (i + 1)..n {
                if nodes[i].connects(&nodes[j]) {
                    adj[i].push(j);
                    adj[j].push(i);
                }
            }
        }

        let start_node = pin_first[0];
        let mut visited = vec![false; n];
        let mut queue = VecDeque::new();
        visited[start_node] = true;
        queue.push_back(start_node);
        while let Some(u) = queue.pop_front() {
            for &v in &adj[u] {
                if !visited[v] {
                    visited[v] = true;
                    queue.push_back(v);
                }
            }
        }

        if let Some(pin_idx) = pin_first.iter().position(|&first| !visited[first]) {
            error_count.fetch_add(1, Ordering::Relaxed);
            if !error_found.swap(true, Ordering::Relaxed)
                && let Ok(mut msg) = error_msg.lock()
            {
                *msg = format!(
                    "Net '{}': pin '{}' is not connected (Split net).",
                    net.name, net.pins[pin_idx].name
                );
            }
        }
    });

    if error_found.load(Ordering::Relaxed) {
        let first = error_msg.lock().map(|m| m.clone()).unwrap_or_default();
        Err(format!(
            "{} ({} open nets)",
            first,
            error_count.load(Ordering::Relaxed)
        ))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::core::{AccessPoint, LayerRect, Net, PathSeg, Pin};
    use crate::db::marker::MarkerSet;
    use crate::db::tech::{LayerDirection, RoutingLayer, SpacingTable, Tech};

    fn tech() -> Tech {
        Tech {
            dbu_per_micron: 1000,
            layers: vec![RoutingLayer {
                name: "M1".to_string(),
                direction: LayerDirection::Horizontal,
                width: 100,
                min_width: None,
                pitch: 200,
                offset: 0,
                spacing: SpacingTable::simple(100),
                wire_ext: None,
            }],
            cut_layers: vec![],
            vias: vec![],
            ndrs: vec![],
        }
    }

    fn pin(name: &str, x: i32, y: i32) -> Pin {
        Pin {
            name: name.to_string(),
            shapes: vec![],
            access_points: vec![AccessPoint {
                point: Point::new(x, y),
                layer: 0,
                cost: 0,
            }],
        }
    }

    fn wire(x1: i32, y1: i32, x2: i32, y2: i32) -> PathSeg {
        PathSeg {
            layer: 0,
            begin: Point::new(x1, y1),
            end: Point::new(x2, y2),
            width: 100,
            ext: 50,
        }
    }

    fn design(nets: Vec<Net>) -> Design {
        Design {
            name: "t".to_string(),
            die_area: Rect::from_coords(0, 0, 10000, 10000),
            tech: tech(),
            gcell: None,
            nets,
            obstructions: vec![],
            markers: MarkerSet::new(),
        }
    }

    #[test]
    fn test_connected_net_passes() {
        let net = Net {
            name: "a".to_string(),
            ndr: None,
            pins: vec![pin("p0", 0, 0), pin("p1", 1000, 0)],
            guides: vec![],
            wires: vec![wire(0, 0, 600, 0), wire(600, 0, 1000, 0)],
            vias: vec![],
        };
        let d = design(vec![net]);
        assert!(check_opens(&d).is_ok());
        assert!(check_shorts(&d).is_ok());
        assert!(run(&d).is_ok());
    }

    #[test]
    fn test_open_and_short_detected() {
        let a = Net {
            name: "a".to_string(),
            ndr: None,
            pins: vec![pin("p0", 0, 0), pin("p1", 1000, 0)],
            guides: vec![],
            wires: vec![wire(0, 0, 400, 0)],
            vias: vec![],
        };
        let b = Net {
            name: "b".to_string(),
            ndr: None,
            pins: vec![pin("q0", 200, -400), pin("q1", 200, 400)],
            guides: vec![],
            wires: vec![],
            vias: vec![],
        };
        let mut d = design(vec![a, b]);
        d.nets[1].wires.push(PathSeg {
            layer: 0,
            begin: Point::new(200, -400),
            end: Point::new(200, 400),
            width: 100,
            ext: 50,
        });
        assert!(check_opens(&d).is_err());
        assert!(check_shorts(&d).is_err());

        d.nets[1].wires.clear();
        d.obstructions.push(LayerRect::new(0, Rect::from_coords(100, -20, 150, 20)));
        let err = check_shorts(&d).unwrap_err();
        assert!(err.contains("<obstruction>"));
    }
}
