use crate::geom::Coord;
use crate::geom::point::Point;
use crate::geom::rect::Rect;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerDirection {
    Horizontal,
    Vertical,
}

/// Width x parallel-run-length spacing table. A single-cell table is a
/// plain minimum spacing rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpacingTable {
    #[serde(default = "default_axis")]
    pub widths: Vec<Coord>,
    #[serde(default = "default_axis")]
    pub prls: Vec<Coord>,
    pub values: Vec<Vec<Coord>>,
}

fn default_axis() -> Vec<Coord> {
    vec![0]
}

impl SpacingTable {
    pub fn simple(spacing: Coord) -> Self {
        Self {
            widths: vec![0],
            prls: vec![0],
            values: vec![vec![spacing]],
        }
    }

    /// Row is the last width strictly below `width` (first row always
    /// applies), column likewise for `prl`.
    pub fn lookup(&self, width: Coord, prl: Coord) -> Coord {
        let row = self
            .widths
            .iter()
            .rposition(|&w| w < width)
            .unwrap_or(0)
            .min(self.values.len().saturating_sub(1));
        let Some(values) = self.values.get(row) else {
            return 0;
        };
        let col = self
            .prls
            .iter()
            .rposition(|&p| p < prl)
            .unwrap_or(0)
            .min(values.len().saturating_sub(1));
        values.get(col).copied().unwrap_or(0)
    }

    pub fn min_spacing(&self) -> Coord {
        self.lookup(0, 0)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingLayer {
    pub name: String,
    pub direction: LayerDirection,
    pub width: Coord,
    #[serde(default)]
    pub min_width: Option<Coord>,
    pub pitch: Coord,
    #[serde(default)]
    pub offset: Coord,
    pub spacing: SpacingTable,
    #[serde(default)]
    pub wire_ext: Option<Coord>,
}

impl RoutingLayer {
    pub fn is_horizontal(&self) -> bool {
        self.direction == LayerDirection::Horizontal
    }

    pub fn min_width(&self) -> Coord {
        self.min_width.unwrap_or(self.width)
    }

    pub fn wire_ext(&self) -> Coord {
        self.wire_ext.unwrap_or(self.width / 2)
    }

    /// Track lines of this layer falling in `[lo, hi]`. Horizontal layers
    /// own y tracks, vertical layers own x tracks.
    pub fn tracks_in(&self, lo: Coord, hi: Coord) -> impl Iterator<Item = Coord> + '_ {
        let pitch = self.pitch.max(1);
        let first = if lo <= self.offset {
            self.offset
        } else {
            self.offset + (lo - self.offset + pitch - 1) / pitch * pitch
        };
        (0..)
            .map(move |k| first + k * pitch)
            .take_while(move |&c| c <= hi)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CutLayer {
    pub name: String,
    pub spacing: Coord,
    #[serde(default)]
    pub same_net_spacing: Option<Coord>,
}

/// Via shapes relative to the via origin. `cut` is the cut level between
/// routing layers `cut` and `cut + 1`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ViaDef {
    pub name: String,
    pub cut: usize,
    pub bottom: Rect,
    pub cut_shape: Rect,
    pub top: Rect,
}

impl ViaDef {
    /// Enclosure on routing layer `z`, which must be `cut` or `cut + 1`.
    pub fn enclosure(&self, z: usize) -> Rect {
        if z == self.cut { self.bottom } else { self.top }
    }

    pub fn enclosure_at(&self, z: usize, origin: Point<Coord>) -> Rect {
        self.enclosure(z).translate(origin)
    }

    pub fn cut_at(&self, origin: Point<Coord>) -> Rect {
        self.cut_shape.translate(origin)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NdrVia {
    pub cut: usize,
    pub via: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ndr {
    pub name: String,
    pub widths: Vec<Coord>,
    pub spacings: Vec<Coord>,
    #[serde(default)]
    pub wire_exts: Vec<Coord>,
    #[serde(default)]
    pub pref_vias: Vec<NdrVia>,
}

impl Ndr {
    pub fn width(&self, z: usize) -> Coord {
        self.widths.get(z).copied().unwrap_or(0)
    }

    pub fn spacing(&self, z: usize) -> Coord {
        self.spacings.get(z).copied().unwrap_or(0)
    }

    pub fn wire_ext(&self, z: usize) -> Coord {
        self.wire_exts.get(z).copied().unwrap_or(0)
    }

    pub fn pref_via(&self, cut: usize) -> Option<&str> {
        self.pref_vias
            .iter()
            .find(|v| v.cut == cut)
            .map(|v| v.via.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tech {
    #[serde(default = "default_dbu")]
    pub dbu_per_micron: u32,
    pub layers: Vec<RoutingLayer>,
    #[serde(default)]
    pub cut_layers: Vec<CutLayer>,
    #[serde(default)]
    pub vias: Vec<ViaDef>,
    #[serde(default)]
    pub ndrs: Vec<Ndr>,
}

fn default_dbu() -> u32 {
    1000
}

impl Tech {
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, z: usize) -> &RoutingLayer {
        &self.layers[z]
    }

    pub fn is_horizontal(&self, z: usize) -> bool {
        self.layers[z].is_horizontal()
    }

    /// First via defined on the cut level; the default via for that level.
    pub fn default_via(&self, cut: usize) -> Option<&ViaDef> {
        self.vias.iter().find(|v| v.cut == cut)
    }

    pub fn via(&self, name: &str) -> Option<&ViaDef> {
        self.vias.iter().find(|v| v.name == name)
    }

    pub fn via_index(&self, name: &str) -> Option<usize> {
        self.vias.iter().position(|v| v.name == name)
    }

    pub fn ndr(&self, name: &str) -> Option<&Ndr> {
        self.ndrs.iter().find(|n| n.name == name)
    }

    pub fn min_spacing(&self, z: usize, width: Coord, prl: Coord) -> Coord {
        self.layers[z].spacing.lookup(width, prl)
    }

    pub fn cut_spacing(&self, cut: usize) -> Coord {
        self.cut_layers.get(cut).map(|c| c.spacing).unwrap_or(0)
    }

    pub fn same_net_cut_spacing(&self, cut: usize) -> Coord {
        self.cut_layers
            .get(cut)
            .and_then(|c| c.same_net_spacing)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spacing_table_lookup() {
        let table = SpacingTable {
            widths: vec![0, 100, 300],
            prls: vec![0, 200],
            values: vec![vec![50, 60], vec![70, 90], vec![120, 150]],
        };
        assert_eq!(table.lookup(50, 0), 50);
        assert_eq!(table.lookup(50, 500), 60);
        assert_eq!(table.lookup(100, 0), 50);
        assert_eq!(table.lookup(101, 201), 90);
        assert_eq!(table.lookup(1000, 1000), 150);
        assert_eq!(table.min_spacing(), 50);
    }

    #[test]
    fn test_tracks_in_window() {
        let layer = RoutingLayer {
            name: "M2".to_string(),
            direction: LayerDirection::Vertical,
            width: 100,
            min_width: None,
            pitch: 200,
            offset: 100,
            spacing: SpacingTable::simple(100),
            wire_ext: None,
        };
        let tracks: Vec<Coord> = layer.tracks_in(250, 900).collect();
        assert_eq!(tracks, vec![300, 500, 700, 900]);
        assert_eq!(layer.wire_ext(), 50);
        assert_eq!(layer.min_width(), 100);
    }
}
