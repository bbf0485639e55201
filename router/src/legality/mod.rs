pub mod prep;
pub mod ranges;

use drt_common::db::tech::Tech;
use drt_common::geom::Coord;
use ranges::ForbiddenRanges;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-layer via-to-via and via-to-turn forbidden lengths for one wire rule.
///
/// Via-to-via slots are indexed by (previous via below, current via below,
/// measured along x); turn slots by (via below, measured along x).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LegalityTables {
    pub via2via: Vec<[ForbiddenRanges; 8]>,
    pub via2via_prl: Vec<[Coord; 8]>,
    pub turn: Vec<[ForbiddenRanges; 4]>,
}

#[inline(always)]
fn via2via_slot(prev_down: bool, curr_down: bool, is_x: bool) -> usize {
    (if prev_down { 0 } else { 4 }) + (if curr_down { 0 } else { 2 }) + (if is_x { 0 } else { 1 })
}

#[inline(always)]
fn turn_slot(down: bool, is_x: bool) -> usize {
    (if down { 0 } else { 2 }) + (if is_x { 0 } else { 1 })
}

impl LegalityTables {
    pub fn empty(num_layers: usize) -> Self {
        Self {
            via2via: vec![Default::default(); num_layers],
            via2via_prl: vec![[0; 8]; num_layers],
            turn: vec![Default::default(); num_layers],
        }
    }

    /// Whether two consecutive vias at distance `len` on layer `z` violate
    /// spacing. `prev_down`/`curr_down` tell whether each via lands on `z`
    /// from below.
    pub fn is_via2via_forbidden_len(
        &self,
        z: usize,
        prev_down: bool,
        curr_down: bool,
        is_x: bool,
        len: Coord,
    ) -> bool {
        self.via2via
            .get(z)
            .is_some_and(|t| t[via2via_slot(prev_down, curr_down, is_x)].contains(len))
    }

    /// Whether a via-to-via offset of `len` across the measuring axis still
    /// leaves the two enclosures with parallel run length.
    pub fn is_via2via_prl(&self, z: usize, prev_down: bool, curr_down: bool, is_x: bool, len: Coord) -> bool {
        self.via2via_prl
            .get(z)
            .is_some_and(|t| len < t[via2via_slot(prev_down, curr_down, is_x)])
    }

    /// Whether a via followed (or preceded) by a turn `len` away on layer `z`
    /// violates spacing.
    pub fn is_via_forbidden_turn_len(&self, z: usize, down: bool, is_x: bool, len: Coord) -> bool {
        self.turn
            .get(z)
            .is_some_and(|t| t[turn_slot(down, is_x)].contains(len))
    }
}

/// Tables for the default rule and for every non-default rule of a tech,
/// built once per run and shared read-only by all workers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RuleSet {
    pub default: LegalityTables,
    pub ndrs: HashMap<String, LegalityTables>,
}

impl RuleSet {
    pub fn build(tech: &Tech) -> Self {
        let default = prep::build_tables(tech, None);
        let ndrs = tech
            .ndrs
            .iter()
            .map(|ndr| (ndr.name.clone(), prep::build_tables(tech, Some(ndr))))
            .collect();
        log::debug!("Built legality tables for {} layer(s), {} NDR(s)", tech.num_layers(), tech.ndrs.len());
        Self { default, ndrs }
    }

    /// Tables of the named rule, falling back to the default rule.
    pub fn tables(&self, ndr: Option<&str>) -> &LegalityTables {
        ndr.and_then(|n| self.ndrs.get(n)).unwrap_or(&self.default)
    }
}
