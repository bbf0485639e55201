pub mod cost;
pub mod search;
pub mod wavefront;

use crate::legality::LegalityTables;
use drt_common::db::tech::{Ndr, Tech};
use drt_common::geom::Coord;
use wavefront::TaperBox;

/// A non-default wire rule resolved against the tech: per layer, the NDR
/// width, the half-extent of the cost window around a wire, and the extra
/// wire extension past its ends; per cut level, whether the rule names a via.
#[derive(Clone, Debug)]
pub struct NdrRule {
    pub name: String,
    widths: Vec<Coord>,
    spacings: Vec<Coord>,
    windows: Vec<Coord>,
    extensions: Vec<Coord>,
    pref_vias: Vec<Option<usize>>,
}

impl NdrRule {
    pub fn new(tech: &Tech, ndr: &Ndr) -> Self {
        let mut widths = Vec::with_capacity(tech.num_layers());
        let mut spacings = Vec::with_capacity(tech.num_layers());
        let mut windows = Vec::with_capacity(tech.num_layers());
        let mut extensions = Vec::with_capacity(tech.num_layers());
        for (z, layer) in tech.layers.iter().enumerate() {
            let w = layer.width;
            let lw = w.max(ndr.width(z));
            let sp = ndr.spacing(z).max(tech.min_spacing(z, lw, 0));
            widths.push(ndr.width(z));
            spacings.push(ndr.spacing(z));
            windows.push(lw / 2 + sp + w / 2 - 1);
            extensions.push(ndr.wire_ext(z).max(w / 2) - w / 2);
        }
        let pref_vias = (0..tech.num_layers().saturating_sub(1))
            .map(|cut| ndr.pref_via(cut).and_then(|name| tech.via_index(name)))
            .collect();
        Self {
            name: ndr.name.clone(),
            widths,
            spacings,
            windows,
            extensions,
            pref_vias,
        }
    }

    pub fn width(&self, z: i32) -> Coord {
        self.widths.get(z as usize).copied().unwrap_or(0)
    }

    pub fn spacing(&self, z: i32) -> Coord {
        self.spacings.get(z as usize).copied().unwrap_or(0)
    }

    pub fn window(&self, z: i32) -> Coord {
        self.windows.get(z as usize).copied().unwrap_or(0)
    }

    pub fn extension(&self, z: i32) -> Coord {
        self.extensions.get(z as usize).copied().unwrap_or(0)
    }

    /// Index into `Tech::vias` of the preferred via on `cut`.
    pub fn pref_via(&self, cut: i32) -> Option<usize> {
        if cut < 0 {
            return None;
        }
        self.pref_vias.get(cut as usize).copied().flatten()
    }
}

/// Rules of the net being searched.
#[derive(Clone, Copy)]
pub struct SearchContext<'a> {
    pub tables: &'a LegalityTables,
    pub ndr: Option<&'a NdrRule>,
    pub dst_taper: Option<TaperBox>,
}

impl<'a> SearchContext<'a> {
    pub fn new(tables: &'a LegalityTables) -> Self {
        Self {
            tables,
            ndr: None,
            dst_taper: None,
        }
    }
}
