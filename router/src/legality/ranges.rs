use drt_common::geom::Coord;
use serde::{Deserialize, Serialize};

/// Disjoint closed length intervals `[lo, hi]`, sorted by `lo`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForbiddenRanges {
    ranges: Vec<(Coord, Coord)>,
}

impl ForbiddenRanges {
    /// Merges overlapping or adjacent closed intervals. Inverted inputs are
    /// dropped.
    pub fn merged(mut raw: Vec<(Coord, Coord)>) -> Self {
        raw.retain(|&(lo, hi)| lo <= hi);
        raw.sort_unstable();
        let mut ranges: Vec<(Coord, Coord)> = Vec::with_capacity(raw.len());
        for (lo, hi) in raw {
            match ranges.last_mut() {
                Some(last) if lo <= last.1.saturating_add(1) => last.1 = last.1.max(hi),
                _ => ranges.push((lo, hi)),
            }
        }
        Self { ranges }
    }

    /// Every interval narrowed to its open interior `(lo, hi)`, stored as
    /// `[lo + 1, hi - 1]`.
    pub fn shrunk(&self) -> Self {
        let ranges = self
            .ranges
            .iter()
            .map(|&(lo, hi)| (lo + 1, hi - 1))
            .filter(|&(lo, hi)| lo <= hi)
            .collect();
        Self { ranges }
    }

    /// Inclusive on both ends.
    pub fn contains(&self, len: Coord) -> bool {
        let idx = self.ranges.partition_point(|&(_, hi)| hi < len);
        self.ranges.get(idx).is_some_and(|&(lo, _)| lo <= len)
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Coord, Coord)> {
        self.ranges.iter()
    }
}
