use drt_common::db::indices::NetId;
use drt_common::db::marker::{Constraint, Marker, MarkerSet};
use drt_common::db::tech::Tech;
use drt_common::geom::Coord;
use drt_common::geom::point::Point;
use drt_common::geom::rect::Rect;
use drt_common::geom::rtree::SpatialIndex;
use std::collections::{BTreeMap, BTreeSet};

/// A metal or cut rectangle seen by the worker checker. `net` is `None` for
/// obstructions; `fixed` shapes (pins, obstructions) are never checked
/// against each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrcShape {
    pub rect: Rect,
    pub layer: usize,
    pub cut: bool,
    pub net: Option<NetId>,
    pub fixed: bool,
}

impl DrcShape {
    pub fn metal(rect: Rect, layer: usize, net: Option<NetId>, fixed: bool) -> Self {
        Self {
            rect,
            layer,
            cut: false,
            net,
            fixed,
        }
    }

    pub fn cut(rect: Rect, cut: usize, net: Option<NetId>) -> Self {
        Self {
            rect,
            layer: cut,
            cut: true,
            net,
            fixed: false,
        }
    }
}

/// Box between two rectangles: their overlap where they overlap, the gap
/// between them along each separated axis.
fn between(a: &Rect, b: &Rect) -> Rect {
    let (x1, x2) = (a.min.x.max(b.min.x), a.max.x.min(b.max.x));
    let (y1, y2) = (a.min.y.max(b.min.y), a.max.y.min(b.max.y));
    Rect::new(
        Point::new(x1.min(x2), y1.min(y2)),
        Point::new(x1.max(x2), y1.max(y2)),
    )
}

fn parallel_run(a: &Rect, b: &Rect) -> Coord {
    let px = a.max.x.min(b.max.x) - a.min.x.max(b.min.x);
    let py = a.max.y.min(b.max.y) - a.min.y.max(b.min.y);
    px.max(py).max(0)
}

fn too_close(a: &Rect, b: &Rect, spacing: Coord) -> bool {
    let (dx, dy) = a.gap(b);
    let (dx, dy, s) = (dx as i64, dy as i64, spacing as i64);
    dx * dx + dy * dy < s * s
}

fn max_metal_spacing(tech: &Tech, z: usize) -> Coord {
    tech.layer(z)
        .spacing
        .values
        .iter()
        .flatten()
        .copied()
        .max()
        .unwrap_or(0)
}

fn violation(tech: &Tech, a: &DrcShape, b: &DrcShape) -> Option<Constraint> {
    if a.fixed && b.fixed {
        return None;
    }
    let same_net = a.net.is_some() && a.net == b.net;
    if a.cut {
        if same_net {
            let spacing = tech.same_net_cut_spacing(a.layer);
            return (spacing > 0 && a.rect != b.rect && !a.rect.intersects(&b.rect) && too_close(&a.rect, &b.rect, spacing))
                .then_some(Constraint::CutSpacing);
        }
        if a.rect.overlaps(&b.rect) {
            return Some(Constraint::Short);
        }
        return too_close(&a.rect, &b.rect, tech.cut_spacing(a.layer)).then_some(Constraint::CutSpacing);
    }
    if same_net {
        return None;
    }
    if a.rect.intersects(&b.rect) {
        return Some(Constraint::Short);
    }
    let width = a.rect.min_dim().max(b.rect.min_dim());
    let spacing = tech.min_spacing(a.layer, width, parallel_run(&a.rect, &b.rect));
    too_close(&a.rect, &b.rect, spacing).then_some(Constraint::MetalSpacing)
}

fn reach(tech: &Tech, cut: bool, layer: usize) -> Coord {
    if cut {
        tech.cut_spacing(layer).max(tech.same_net_cut_spacing(layer))
    } else {
        max_metal_spacing(tech, layer)
    }
}

/// The worker's shapes, one R-tree per (cut, layer). Shapes are owned by a
/// worker net index or by nobody (obstructions); a net's shapes are
/// replaced wholesale after it is rerouted.
pub struct ShapeDb<'t> {
    tech: &'t Tech,
    slots: Vec<Option<(DrcShape, Option<usize>)>>,
    free: Vec<usize>,
    net_slots: Vec<Vec<usize>>,
    layers: BTreeMap<(bool, usize), SpatialIndex>,
}

impl<'t> ShapeDb<'t> {
    pub fn new(tech: &'t Tech) -> Self {
        Self {
            tech,
            slots: Vec::new(),
            free: Vec::new(),
            net_slots: Vec::new(),
            layers: BTreeMap::new(),
        }
    }

    fn valid(&self, s: &DrcShape) -> bool {
        if s.cut {
            s.layer + 1 < self.tech.num_layers()
        } else {
            s.layer < self.tech.num_layers()
        }
    }

    /// Adds `shape`; shapes on unknown layers are dropped.
    pub fn insert(&mut self, shape: DrcShape, owner: Option<usize>) {
        if !self.valid(&shape) {
            return;
        }
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some((shape, owner));
                slot
            }
            None => {
                self.slots.push(Some((shape, owner)));
                self.slots.len() - 1
            }
        };
        self.layers
            .entry((shape.cut, shape.layer))
            .or_default()
            .insert(shape.rect, slot);
        if let Some(o) = owner {
            if self.net_slots.len() <= o {
                self.net_slots.resize_with(o + 1, Vec::new);
            }
            self.net_slots[o].push(slot);
        }
    }

    /// Replaces every shape owned by net `owner` with `shapes`.
    pub fn set_net(&mut self, owner: usize, shapes: impl IntoIterator<Item = DrcShape>) {
        let old = self.net_slots.get_mut(owner).map(std::mem::take).unwrap_or_default();
        for slot in old {
            if let Some((s, _)) = self.slots[slot].take() {
                if let Some(index) = self.layers.get_mut(&(s.cut, s.layer)) {
                    index.remove(s.rect, slot);
                }
                self.free.push(slot);
            }
        }
        for s in shapes {
            self.insert(s, Some(owner));
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn owner(&self, slot: usize) -> Option<usize> {
        self.slots.get(slot).and_then(|s| s.as_ref()).and_then(|(_, o)| *o)
    }

    /// Owners of the shapes on (`cut`, `layer`) touching `area`.
    pub fn owners_near(&self, cut: bool, layer: usize, area: &Rect) -> BTreeSet<usize> {
        let Some(index) = self.layers.get(&(cut, layer)) else {
            return BTreeSet::new();
        };
        index.query(*area).into_iter().filter_map(|slot| self.owner(slot)).collect()
    }

    /// Shorts, metal spacing and cut spacing violations whose marker box
    /// touches `region`. With a `target`, only violations involving that
    /// net's shapes are reported.
    pub fn check(&self, region: &Rect, target: Option<usize>) -> Vec<Marker> {
        let mut found = MarkerSet::new();
        match target {
            Some(t) => {
                for &i in self.net_slots.get(t).map(Vec::as_slice).unwrap_or(&[]) {
                    self.check_slot(i, region, &mut found, |j| {
                        j != i && !(self.owner(j) == Some(t) && j < i)
                    });
                }
            }
            None => {
                for i in 0..self.slots.len() {
                    self.check_slot(i, region, &mut found, |j| j > i);
                }
            }
        }
        found.iter().cloned().collect()
    }

    fn check_slot(&self, i: usize, region: &Rect, found: &mut MarkerSet, keep: impl Fn(usize) -> bool) {
        let Some((a, _)) = &self.slots[i] else {
            return;
        };
        let Some(index) = self.layers.get(&(a.cut, a.layer)) else {
            return;
        };
        for j in index.query(a.rect.bloat(reach(self.tech, a.cut, a.layer))) {
            if !keep(j) {
                continue;
            }
            let Some((b, _)) = &self.slots[j] else {
                continue;
            };
            let Some(constraint) = violation(self.tech, a, b) else {
                continue;
            };
            let bbox = between(&a.rect, &b.rect);
            if !bbox.intersects(region) {
                continue;
            }
            found.insert(Marker {
                bbox,
                layer: a.layer,
                cut: a.cut,
                constraint,
                srcs: a.net.into_iter().chain(b.net).collect(),
            });
        }
    }
}

/// One-shot check over a shape list, each shape owned by its net.
pub fn check(tech: &Tech, shapes: &[DrcShape], region: &Rect, target: Option<NetId>) -> Vec<Marker> {
    let mut db = ShapeDb::new(tech);
    for s in shapes {
        db.insert(*s, s.net.map(|n| n.index()));
    }
    db.check(region, target.map(|n| n.index()))
}
