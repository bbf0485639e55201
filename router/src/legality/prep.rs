use super::LegalityTables;
use super::ranges::ForbiddenRanges;
use drt_common::db::tech::{Ndr, Tech, ViaDef};
use drt_common::geom::Coord;
use drt_common::geom::rect::Rect;

/// Builds the via-to-via and via-to-turn tables of every routing layer, for
/// the default rule (`ndr == None`) or for one non-default rule.
pub fn build_tables(tech: &Tech, ndr: Option<&Ndr>) -> LegalityTables {
    let num_layers = tech.num_layers();
    let mut tables = LegalityTables::empty(num_layers);

    for z in 0..num_layers {
        let down_via = if z > 0 { landing_via(tech, ndr, z - 1) } else { None };
        let up_via = if z + 1 < num_layers { landing_via(tech, ndr, z) } else { None };

        let combos = [(down_via, down_via), (down_via, up_via), (up_via, down_via), (up_via, up_via)];
        for (pair, (v1, v2)) in combos.into_iter().enumerate() {
            for (axis, is_x) in [(0, true), (1, false)] {
                let idx = pair * 2 + axis;
                tables.via2via[z][idx] = via2via_ranges(tech, ndr, z, v1, v2, is_x);
                tables.via2via_prl[z][idx] = prl_threshold(z, v1, v2, is_x);
            }
        }

        for (slot, via) in [down_via, up_via].into_iter().enumerate() {
            for (axis, is_x) in [(0, true), (1, false)] {
                tables.turn[z][slot * 2 + axis] = turn_ranges(tech, ndr, z, via, is_x);
            }
        }
    }
    tables
}

/// The via used on cut level `cut`: the rule's preferred via when it names
/// one, otherwise the first via defined on that level.
fn landing_via<'a>(tech: &'a Tech, ndr: Option<&Ndr>, cut: usize) -> Option<&'a ViaDef> {
    ndr.and_then(|n| n.pref_via(cut))
        .and_then(|name| tech.via(name))
        .or_else(|| tech.default_via(cut))
}

fn extent(r: &Rect, along_x: bool) -> Coord {
    if along_x { r.width() } else { r.height() }
}

fn across(r: &Rect, along_x: bool) -> Coord {
    if along_x { r.height() } else { r.width() }
}

fn ndr_spacing(ndr: Option<&Ndr>, z: usize) -> Coord {
    ndr.map(|n| n.spacing(z)).unwrap_or(0)
}

fn via2via_ranges(
    tech: &Tech,
    ndr: Option<&Ndr>,
    z: usize,
    v1: Option<&ViaDef>,
    v2: Option<&ViaDef>,
    is_x: bool,
) -> ForbiddenRanges {
    let (Some(v1), Some(v2)) = (v1, v2) else {
        return ForbiddenRanges::default();
    };
    let mut raw = Vec::new();
    let default_width = tech.layer(z).width;

    // metal spacing between the two enclosures on z
    let box1 = v1.enclosure(z);
    let box2 = v2.enclosure(z);
    let fat1 = across(&box1, is_x) > default_width;
    let fat2 = across(&box2, is_x) > default_width;
    let min_non_overlap = (extent(&box1, is_x) + extent(&box2, is_x)) / 2;
    if fat1 && fat2 {
        let width = box1.min_dim().max(box2.min_dim());
        let prl = across(&box1, is_x).min(across(&box2, is_x));
        let req = tech.min_spacing(z, width, prl).max(ndr_spacing(ndr, z));
        raw.push((min_non_overlap, min_non_overlap + req));
    }

    // the same via twice also meets itself on its other layer
    if v1.name == v2.name {
        let (other, other_z) = if v1.cut == z {
            (v1.top, z + 1)
        } else {
            (v1.bottom, z.saturating_sub(1))
        };
        if other_z < tech.num_layers() {
            let min_non_overlap = extent(&other, is_x);
            let req = tech
                .min_spacing(other_z, other.min_dim(), across(&other, is_x))
                .max(ndr_spacing(ndr, other_z));
            raw.push((min_non_overlap, min_non_overlap + req));
        }
    }

    // cut spacing on a shared cut level
    if v1.cut == v2.cut {
        let same_net = tech.same_net_cut_spacing(v1.cut);
        let spacing = if same_net > 0 { same_net } else { tech.cut_spacing(v1.cut) };
        if spacing > 0 {
            raw.push((0, spacing + extent(&v1.cut_shape, is_x)));
        }
    }

    ForbiddenRanges::merged(raw)
}

fn prl_threshold(z: usize, v1: Option<&ViaDef>, v2: Option<&ViaDef>, is_x: bool) -> Coord {
    match (v1, v2) {
        (Some(v1), Some(v2)) => across(&v1.enclosure(z), is_x).max(across(&v2.enclosure(z), is_x)),
        _ => 0,
    }
}

fn turn_ranges(
    tech: &Tech,
    ndr: Option<&Ndr>,
    z: usize,
    via: Option<&ViaDef>,
    is_x: bool,
) -> ForbiddenRanges {
    let Some(via) = via else {
        return ForbiddenRanges::default();
    };
    let default_width = tech.layer(z).width;
    let width = default_width.max(ndr.map(|n| n.width(z)).unwrap_or(0));
    let enc = via.enclosure(z);
    let fat = across(&enc, is_x) > default_width;

    let mut raw = Vec::new();
    if fat || ndr.is_some() {
        let min_non_overlap = (extent(&enc, is_x) + width) / 2;
        let req = tech
            .min_spacing(z, enc.min_dim().max(width), across(&enc, is_x))
            .max(ndr_spacing(ndr, z));
        raw.push((min_non_overlap, min_non_overlap + req));
    }
    ForbiddenRanges::merged(raw).shrunk()
}
