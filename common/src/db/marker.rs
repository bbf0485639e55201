use crate::db::indices::NetId;
use crate::geom::rect::Rect;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Constraint {
    Short,
    MetalSpacing,
    CutSpacing,
    Unrouted,
}

impl Constraint {
    pub fn name(&self) -> &'static str {
        match self {
            Constraint::Short => "Short",
            Constraint::MetalSpacing => "MetalSpacing",
            Constraint::CutSpacing => "CutSpacing",
            Constraint::Unrouted => "Unrouted",
        }
    }
}

/// A design-rule violation. `layer` is a routing layer, or a cut level when
/// `cut` is set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub bbox: Rect,
    pub layer: usize,
    #[serde(default)]
    pub cut: bool,
    pub constraint: Constraint,
    #[serde(default)]
    pub srcs: BTreeSet<NetId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct MarkerKey {
    bbox: Rect,
    layer: usize,
    cut: bool,
    constraint: Constraint,
}

impl Marker {
    fn key(&self) -> MarkerKey {
        MarkerKey {
            bbox: self.bbox,
            layer: self.layer,
            cut: self.cut,
            constraint: self.constraint,
        }
    }
}

/// Markers deduplicated by geometry and constraint. Reports of the same
/// violation from overlapping workers collapse into one entry with the union
/// of their source nets.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Marker>", into = "Vec<Marker>")]
pub struct MarkerSet {
    markers: BTreeMap<MarkerKey, Marker>,
}

impl MarkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when an equivalent marker was already present.
    pub fn insert(&mut self, marker: Marker) -> bool {
        match self.markers.get_mut(&marker.key()) {
            Some(existing) => {
                existing.srcs.extend(marker.srcs);
                false
            }
            None => {
                self.markers.insert(marker.key(), marker);
                true
            }
        }
    }

    pub fn merge(&mut self, other: MarkerSet) {
        for marker in other.markers.into_values() {
            self.insert(marker);
        }
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Marker> {
        self.markers.values()
    }

    pub fn intersecting(&self, rect: &Rect) -> impl Iterator<Item = &Marker> {
        self.markers.values().filter(move |m| m.bbox.intersects(rect))
    }

    pub fn remove_intersecting(&mut self, rect: &Rect) -> usize {
        let before = self.markers.len();
        self.markers.retain(|_, m| !m.bbox.intersects(rect));
        before - self.markers.len()
    }

    pub fn count(&self, constraint: Constraint) -> usize {
        self.markers
            .values()
            .filter(|m| m.constraint == constraint)
            .count()
    }
}

impl From<Vec<Marker>> for MarkerSet {
    fn from(markers: Vec<Marker>) -> Self {
        let mut set = MarkerSet::new();
        for marker in markers {
            set.insert(marker);
        }
        set
    }
}

impl From<MarkerSet> for Vec<Marker> {
    fn from(set: MarkerSet) -> Self {
        set.markers.into_values().collect()
    }
}

impl FromIterator<Marker> for MarkerSet {
    fn from_iter<I: IntoIterator<Item = Marker>>(iter: I) -> Self {
        let mut set = MarkerSet::new();
        for marker in iter {
            set.insert(marker);
        }
        set
    }
}
