use crate::db::error::DbError;
use crate::db::indices::NetId;
use crate::db::marker::MarkerSet;
use crate::db::tech::Tech;
use crate::geom::Coord;
use crate::geom::point::Point;
use crate::geom::rect::Rect;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerRect {
    pub layer: usize,
    pub rect: Rect,
}

impl LayerRect {
    pub fn new(layer: usize, rect: Rect) -> Self {
        Self { layer, rect }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPoint {
    pub point: Point<Coord>,
    pub layer: usize,
    #[serde(default)]
    pub cost: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pin {
    pub name: String,
    #[serde(default)]
    pub shapes: Vec<LayerRect>,
    pub access_points: Vec<AccessPoint>,
}

/// A committed wire. Endpoints are track centers; the drawn shape extends
/// by `ext` past each end.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathSeg {
    pub layer: usize,
    pub begin: Point<Coord>,
    pub end: Point<Coord>,
    pub width: Coord,
    pub ext: Coord,
}

impl PathSeg {
    /// Orders the endpoints so `begin` is lower-left.
    pub fn normalized(mut self) -> Self {
        if (self.end.x, self.end.y) < (self.begin.x, self.begin.y) {
            std::mem::swap(&mut self.begin, &mut self.end);
        }
        self
    }

    pub fn is_horizontal(&self) -> bool {
        self.begin.y == self.end.y
    }

    pub fn length(&self) -> Coord {
        self.begin.manhattan(&self.end)
    }

    pub fn shape(&self) -> Rect {
        let hw = self.width / 2;
        let s = self.normalized();
        if s.is_horizontal() {
            Rect::from_coords(s.begin.x - self.ext, s.begin.y - hw, s.end.x + self.ext, s.end.y + hw)
        } else {
            Rect::from_coords(s.begin.x - hw, s.begin.y - self.ext, s.end.x + hw, s.end.y + self.ext)
        }
    }

    /// Centerline part of the segment inside the closed `rect`.
    pub fn clip(&self, rect: &Rect) -> Option<PathSeg> {
        let s = self.normalized();
        let line = Rect::new(s.begin, s.end);
        let inside = line.intersection(rect)?;
        Some(PathSeg {
            begin: inside.min,
            end: inside.max,
            ..s
        })
    }

    /// Centerline parts strictly outside the interior of `rect`, i.e. what
    /// survives when the inside of `rect` is ripped up.
    pub fn subtract(&self, rect: &Rect) -> Vec<PathSeg> {
        let s = self.normalized();
        let Some(inside) = s.clip(rect) else {
            return vec![s];
        };
        let mut out = Vec::new();
        if inside.begin != s.begin {
            out.push(PathSeg { end: inside.begin, ..s });
        }
        if inside.end != s.end {
            out.push(PathSeg { begin: inside.end, ..s });
        }
        out
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Via {
    pub point: Point<Coord>,
    /// Index into `Tech::vias`.
    pub def: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Net {
    pub name: String,
    #[serde(default)]
    pub ndr: Option<String>,
    pub pins: Vec<Pin>,
    #[serde(default)]
    pub guides: Vec<LayerRect>,
    #[serde(default)]
    pub wires: Vec<PathSeg>,
    #[serde(default)]
    pub vias: Vec<Via>,
}

impl Net {
    pub fn is_routed(&self) -> bool {
        !self.wires.is_empty() || !self.vias.is_empty()
    }

    pub fn pin_bbox(&self) -> Option<Rect> {
        self.pins
            .iter()
            .flat_map(|p| p.access_points.iter())
            .map(|ap| Rect::new(ap.point, ap.point))
            .reduce(|a, b| a.merge(&b))
    }

    pub fn num_access_points(&self) -> usize {
        self.pins.iter().map(|p| p.access_points.len()).sum()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GCellPattern {
    pub origin: Point<Coord>,
    pub step_x: Coord,
    pub step_y: Coord,
}

impl GCellPattern {
    pub fn count_x(&self, die: &Rect) -> usize {
        ((die.max.x - self.origin.x + self.step_x - 1) / self.step_x.max(1)).max(1) as usize
    }

    pub fn count_y(&self, die: &Rect) -> usize {
        ((die.max.y - self.origin.y + self.step_y - 1) / self.step_y.max(1)).max(1) as usize
    }

    /// Gcell holding `p`, clamped to the die's gcell range.
    pub fn index_of(&self, p: Point<Coord>, die: &Rect) -> (usize, usize) {
        let i = (p.x - self.origin.x).div_euclid(self.step_x.max(1)).max(0) as usize;
        let j = (p.y - self.origin.y).div_euclid(self.step_y.max(1)).max(0) as usize;
        (i.min(self.count_x(die) - 1), j.min(self.count_y(die) - 1))
    }

    /// Box of gcell (i, j), with the last row/column stretched to the die edge.
    pub fn gcell_box(&self, i: usize, j: usize, die: &Rect) -> Rect {
        let nx = self.count_x(die);
        let ny = self.count_y(die);
        let x1 = self.origin.x + i as Coord * self.step_x;
        let y1 = self.origin.y + j as Coord * self.step_y;
        let x2 = if i + 1 >= nx { die.max.x } else { x1 + self.step_x };
        let y2 = if j + 1 >= ny { die.max.y } else { y1 + self.step_y };
        Rect::from_coords(x1.max(die.min.x), y1.max(die.min.y), x2, y2)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Design {
    pub name: String,
    pub die_area: Rect,
    pub tech: Tech,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcell: Option<GCellPattern>,
    pub nets: Vec<Net>,
    #[serde(default)]
    pub obstructions: Vec<LayerRect>,
    #[serde(default)]
    pub markers: MarkerSet,
}

impl Design {
    pub fn num_nets(&self) -> usize {
        self.nets.len()
    }

    pub fn net(&self, id: NetId) -> &Net {
        &self.nets[id.index()]
    }

    pub fn net_ids(&self) -> impl Iterator<Item = NetId> {
        (0..self.nets.len()).map(NetId::new)
    }

    pub fn gcell_pattern(&self, fallback_tracks: Coord) -> GCellPattern {
        self.gcell.unwrap_or_else(|| {
            let pitch = self
                .tech
                .layers
                .iter()
                .map(|l| l.pitch)
                .max()
                .unwrap_or(1);
            GCellPattern {
                origin: self.die_area.min,
                step_x: pitch * fallback_tracks,
                step_y: pitch * fallback_tracks,
            }
        })
    }

    pub fn validate(&self) -> Result<(), DbError> {
        let num_layers = self.tech.num_layers();
        if num_layers == 0 {
            return Err(DbError::NoRoutingLayers);
        }
        if self.die_area.width() <= 0 || self.die_area.height() <= 0 {
            return Err(DbError::EmptyDieArea(format!("{:?}", self.die_area)));
        }
        for via in &self.tech.vias {
            if via.cut + 1 >= num_layers {
                return Err(DbError::UnknownCutLevel {
                    via: via.name.clone(),
                    cut: via.cut,
                    available: num_layers.saturating_sub(1),
                });
            }
        }
        for ndr in &self.tech.ndrs {
            if ndr.widths.len() != num_layers || ndr.spacings.len() != num_layers {
                return Err(DbError::NdrLayerCount {
                    ndr: ndr.name.clone(),
                    got: ndr.widths.len().min(ndr.spacings.len()),
                    expected: num_layers,
                });
            }
        }
        for net in &self.nets {
            if let Some(ndr) = &net.ndr
                && self.tech.ndr(ndr).is_none()
            {
                return Err(DbError::UnknownNdr {
                    net: net.name.clone(),
                    ndr: ndr.clone(),
                });
            }
            for pin in &net.pins {
                if pin.access_points.is_empty() {
                    return Err(DbError::NoAccessPoints {
                        net: net.name.clone(),
                        pin: pin.name.clone(),
                    });
                }
                let layers = pin
                    .access_points
                    .iter()
                    .map(|ap| ap.layer)
                    .chain(pin.shapes.iter().map(|s| s.layer));
                for layer in layers {
                    if layer >= num_layers {
                        return Err(DbError::UnknownLayer {
                            net: net.name.clone(),
                            layer,
                        });
                    }
                }
            }
            for layer in net
                .guides
                .iter()
                .map(|g| g.layer)
                .chain(net.wires.iter().map(|w| w.layer))
            {
                if layer >= num_layers {
                    return Err(DbError::UnknownLayer {
                        net: net.name.clone(),
                        layer,
                    });
                }
            }
        }
        Ok(())
    }

    /// Gives every multi-pin net without guides a pattern route in gcell
    /// units: pins are chained nearest-first, each hop becomes a horizontal
    /// leg along the source row and a vertical leg along the target column,
    /// and every pin gcell is guided from its lowest access layer up to the
    /// leg layers.
    pub fn synthesize_guides(&mut self, gcell: &GCellPattern) -> usize {
        let num_layers = self.tech.num_layers();
        let pick = |want_horizontal: bool| {
            (1..num_layers)
                .find(|&z| self.tech.is_horizontal(z) == want_horizontal)
                .or_else(|| (0..num_layers).find(|&z| self.tech.is_horizontal(z) == want_horizontal))
        };
        let (Some(h_layer), Some(v_layer)) = (pick(true), pick(false)) else {
            return 0;
        };
        let top = h_layer.max(v_layer);
        let die = self.die_area;

        let mut count = 0;
        for net in &mut self.nets {
            if !net.guides.is_empty() || net.pins.len() < 2 {
                continue;
            }
            let anchors: Vec<(usize, usize, usize)> = net
                .pins
                .iter()
                .filter_map(|pin| {
                    let low = pin.access_points.iter().map(|ap| ap.layer).min()?;
                    let ap = pin.access_points.first()?;
                    let (i, j) = gcell.index_of(ap.point, &die);
                    Some((i, j, low))
                })
                .collect();
            if anchors.len() < 2 {
                continue;
            }

            let mut guides: Vec<LayerRect> = Vec::new();
            let mut push = |g: LayerRect| {
                if !guides.contains(&g) {
                    guides.push(g);
                }
            };
            for &(i, j, low) in &anchors {
                for z in low..=top {
                    push(LayerRect::new(z, gcell.gcell_box(i, j, &die)));
                }
            }

            let mut remaining: Vec<usize> = (1..anchors.len()).collect();
            let mut curr = 0;
            while !remaining.is_empty() {
                let (ci, cj, _) = anchors[curr];
                let mut best_k = 0;
                let mut best_dist = usize::MAX;
                for (k, &idx) in remaining.iter().enumerate() {
                    let (ti, tj, _) = anchors[idx];
                    let dist = ci.abs_diff(ti) + cj.abs_diff(tj);
                    if dist < best_dist {
                        best_dist = dist;
                        best_k = k;
                    }
                }
                let next = remaining.remove(best_k);
                let (ni, nj, _) = anchors[next];
                let row = gcell
                    .gcell_box(ci.min(ni), cj, &die)
                    .merge(&gcell.gcell_box(ci.max(ni), cj, &die));
                let col = gcell
                    .gcell_box(ni, cj.min(nj), &die)
                    .merge(&gcell.gcell_box(ni, cj.max(nj), &die));
                push(LayerRect::new(h_layer, row));
                push(LayerRect::new(v_layer, col));
                curr = next;
            }

            net.guides = guides;
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(x1: i32, y1: i32, x2: i32, y2: i32) -> PathSeg {
        PathSeg {
            layer: 0,
            begin: Point::new(x1, y1),
            end: Point::new(x2, y2),
            width: 100,
            ext: 50,
        }
    }

    #[test]
    fn test_segment_shape() {
        let shape = seg(1000, 200, 0, 200).shape();
        assert_eq!(shape, Rect::from_coords(-50, 150, 1050, 250));
        let shape = seg(0, 0, 0, 400).shape();
        assert_eq!(shape, Rect::from_coords(-50, -50, 50, 450));
    }

    #[test]
    fn test_clip_and_subtract() {
        let route_box = Rect::from_coords(0, 0, 500, 500);
        let s = seg(-200, 100, 800, 100);
        let inside = s.clip(&route_box);
        assert_eq!(inside.map(|c| (c.begin, c.end)), Some((Point::new(0, 100), Point::new(500, 100))));
        let outside = s.subtract(&route_box);
        assert_eq!(outside.len(), 2);
        assert_eq!(outside[0].end, Point::new(0, 100));
        assert_eq!(outside[1].begin, Point::new(500, 100));

        let away = seg(600, 100, 900, 100);
        assert!(away.clip(&route_box).is_none());
        assert_eq!(away.subtract(&route_box), vec![away]);
    }

    #[test]
    fn test_gcell_boxes_cover_die() {
        let die = Rect::from_coords(0, 0, 1050, 1000);
        let pattern = GCellPattern {
            origin: Point::new(0, 0),
            step_x: 300,
            step_y: 500,
        };
        assert_eq!(pattern.count_x(&die), 4);
        assert_eq!(pattern.count_y(&die), 2);
        assert_eq!(pattern.gcell_box(3, 1, &die), Rect::from_coords(900, 500, 1050, 1000));
        assert_eq!(pattern.index_of(Point::new(950, 20), &die), (3, 0));
        assert_eq!(pattern.index_of(Point::new(5000, 999), &die), (3, 1));
    }

    #[test]
    fn test_pattern_guides_follow_pin_chain() {
        use crate::db::core::{AccessPoint, Pin};
        use crate::util::generator::uniform_tech;

        let ap = |x, y| Pin {
            name: format!("p{}_{}", x, y),
            shapes: vec![],
            access_points: vec![AccessPoint {
                point: Point::new(x, y),
                layer: 0,
                cost: 0,
            }],
        };
        let mut design = Design {
            name: "g".to_string(),
            die_area: Rect::from_coords(0, 0, 3000, 3000),
            tech: uniform_tech(3),
            gcell: None,
            nets: vec![Net {
                name: "n".to_string(),
                ndr: None,
                pins: vec![ap(100, 100), ap(2100, 1100)],
                guides: vec![],
                wires: vec![],
                vias: vec![],
            }],
            obstructions: vec![],
            markers: MarkerSet::new(),
        };
        let pattern = GCellPattern {
            origin: Point::new(0, 0),
            step_x: 1000,
            step_y: 1000,
        };
        assert_eq!(design.synthesize_guides(&pattern), 1);
        let guides = &design.nets[0].guides;
        // row leg on the horizontal layer, column leg on the vertical layer
        assert!(guides.contains(&LayerRect::new(2, Rect::from_coords(0, 0, 3000, 1000))));
        assert!(guides.contains(&LayerRect::new(1, Rect::from_coords(2000, 0, 3000, 2000))));
        // pin gcells guided on every layer up to the legs
        for z in 0..3 {
            assert!(guides.contains(&LayerRect::new(z, Rect::from_coords(0, 0, 1000, 1000))));
        }
        assert_eq!(design.synthesize_guides(&pattern), 0);
    }
}
