use crate::db::core::{AccessPoint, Design, GCellPattern, LayerRect, Net, Pin};
use crate::db::marker::MarkerSet;
use crate::db::tech::{CutLayer, LayerDirection, RoutingLayer, SpacingTable, Tech, ViaDef};
use crate::geom::Coord;
use crate::geom::point::Point;
use crate::geom::rect::Rect;
use rand::Rng;
use std::collections::HashSet;

const PITCH: Coord = 200;
const WIDTH: Coord = 100;
const OFFSET: Coord = 100;

pub struct GeneratorParams {
    pub nets: usize,
    pub tracks: usize,
    pub layers: usize,
    pub obstructions: usize,
}

/// Uniform-pitch technology with alternating horizontal/vertical layers,
/// the lowest one horizontal.
pub fn uniform_tech(num_layers: usize) -> Tech {
    let layers = (0..num_layers)
        .map(|z| RoutingLayer {
            name: format!("M{}", z + 1),
            direction: if z % 2 == 0 {
                LayerDirection::Horizontal
            } else {
                LayerDirection::Vertical
            },
            width: WIDTH,
            min_width: None,
            pitch: PITCH,
            offset: OFFSET,
            spacing: SpacingTable::simple(WIDTH),
            wire_ext: None,
        })
        .collect();

    let cut_layers = (0..num_layers.saturating_sub(1))
        .map(|c| CutLayer {
            name: format!("V{}", c + 1),
            spacing: WIDTH,
            same_net_spacing: None,
        })
        .collect();

    let along = Rect::from_coords(-90, -50, 90, 50);
    let across = Rect::from_coords(-50, -90, 50, 90);
    let vias = (0..num_layers.saturating_sub(1))
        .map(|c| {
            let bottom_horizontal = c % 2 == 0;
            ViaDef {
                name: format!("VIA{}{}", c + 1, c + 2),
                cut: c,
                bottom: if bottom_horizontal { along } else { across },
                cut_shape: Rect::from_coords(-50, -50, 50, 50),
                top: if bottom_horizontal { across } else { along },
            }
        })
        .collect();

    Tech {
        dbu_per_micron: 1000,
        layers,
        cut_layers,
        vias,
        ndrs: Vec::new(),
    }
}

pub fn generate_random_design(params: &GeneratorParams) -> Design {
    let mut rng = rand::thread_rng();

    let tracks = params.tracks.max(8);
    let layers = params.layers.max(2);
    let die_side = OFFSET * 2 + PITCH * (tracks as Coord - 1);
    let die_area = Rect::from_coords(0, 0, die_side, die_side);

    log::info!(
        "Generating Benchmark: {} nets, {} layers, Die: {}x{} ({} tracks)",
        params.nets,
        layers,
        die_side,
        die_side,
        tracks
    );

    let mut used: HashSet<(usize, usize)> = HashSet::new();
    let mut nets = Vec::with_capacity(params.nets);
    let max_pins = (tracks * tracks / 4).max(2);

    for n in 0..params.nets {
        if used.len() + 4 > max_pins {
            log::warn!("Die is full after {} nets, stopping early.", n);
            break;
        }
        let num_pins = rng.gen_range(2..=4);
        let cx = rng.gen_range(0..tracks);
        let cy = rng.gen_range(0..tracks);
        let span = (tracks / 4).max(3);

        let mut pins = Vec::with_capacity(num_pins);
        let mut attempts = 0;
        while pins.len() < num_pins && attempts < 100 {
            attempts += 1;
            let tx = (cx + rng.gen_range(0..span)).min(tracks - 1);
            let ty = (cy + rng.gen_range(0..span)).min(tracks - 1);
            if !used.insert((tx, ty)) {
                continue;
            }
            let p = Point::new(OFFSET + tx as Coord * PITCH, OFFSET + ty as Coord * PITCH);
            pins.push(Pin {
                name: format!("p{}", pins.len()),
                shapes: vec![LayerRect::new(0, Rect::new(p, p).bloat(WIDTH / 2))],
                access_points: vec![AccessPoint {
                    point: p,
                    layer: 0,
                    cost: 0,
                }],
            });
        }
        if pins.len() < 2 {
            continue;
        }
        nets.push(Net {
            name: format!("net{}", n),
            ndr: None,
            pins,
            guides: Vec::new(),
            wires: Vec::new(),
            vias: Vec::new(),
        });
    }

    let mut obstructions = Vec::new();
    if layers > 2 {
        for _ in 0..params.obstructions {
            let z = rng.gen_range(2..layers);
            let x = rng.gen_range(0..tracks) as Coord * PITCH;
            let y = rng.gen_range(0..tracks) as Coord * PITCH;
            let w = rng.gen_range(1..=3) as Coord * PITCH;
            let h = rng.gen_range(1..=3) as Coord * PITCH;
            let rect = Rect::from_coords(x, y, (x + w).min(die_side), (y + h).min(die_side));
            obstructions.push(LayerRect::new(z, rect));
        }
    }

    Design {
        name: format!("random_{}", nets.len()),
        die_area,
        tech: uniform_tech(layers),
        gcell: Some(GCellPattern {
            origin: Point::new(0, 0),
            step_x: PITCH * 15,
            step_y: PITCH * 15,
        }),
        nets,
        obstructions,
        markers: MarkerSet::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_design_validates() {
        let design = generate_random_design(&GeneratorParams {
            nets: 20,
            tracks: 40,
            layers: 4,
            obstructions: 5,
        });
        assert!(design.validate().is_ok());
        assert!(design.nets.iter().all(|n| n.pins.len() >= 2));
        assert_eq!(design.tech.vias.len(), 3);
        assert!(design.obstructions.iter().all(|o| o.layer >= 2));
    }

    #[test]
    fn test_design_toml_round_trip() {
        let design = generate_random_design(&GeneratorParams {
            nets: 3,
            tracks: 16,
            layers: 3,
            obstructions: 0,
        });
        let text = toml::to_string(&design).unwrap();
        let back: Design = toml::from_str(&text).unwrap();
        assert_eq!(back.nets.len(), design.nets.len());
        assert_eq!(back.tech.layers.len(), 3);
        assert_eq!(back.die_area, design.die_area);
    }
}
