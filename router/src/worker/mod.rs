pub mod congestion;
pub mod drc;
pub mod init;
pub mod route;

use crate::error::RouteResult;
use crate::grid::CostWeights;
use crate::legality::RuleSet;
use drt_common::db::core::{LayerRect, Net, PathSeg, Via};
use drt_common::db::indices::{NetId, WorkerId};
use drt_common::db::marker::Marker;
use drt_common::db::tech::Tech;
use drt_common::geom::Coord;
use drt_common::geom::rect::Rect;
use drt_common::util::profiler::ScopedTimer;
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;

/// Which nets a worker rips up and reroutes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RipupMode {
    /// Every net with terminals in the route box.
    All,
    /// Nets named by markers in the route box.
    Drc,
    /// Nets with geometry near a marker.
    NearDrc,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskNet {
    pub id: NetId,
    pub net: Net,
}

/// Everything one worker needs, cut from the committed design at the start
/// of its batch. Self-contained so it can be shipped as bytes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerTask {
    pub id: WorkerId,
    pub route_box: Rect,
    pub ext_box: Rect,
    pub drc_box: Rect,
    pub iteration: usize,
    pub ripup_mode: RipupMode,
    pub follow_guide: bool,
    pub weights: CostWeights,
    pub maze_end_iter: usize,
    pub marker_decay: f64,
    pub via_cost: Coord,
    pub taper_radius: Coord,
    pub auto_taper: bool,
    pub or_seed: Option<u64>,
    pub or_k: f64,
    pub congestion_threshold: f64,
    pub die_area: Rect,
    pub tech: Tech,
    pub nets: Vec<TaskNet>,
    pub obstructions: Vec<LayerRect>,
    pub markers: Vec<Marker>,
}

impl WorkerTask {
    pub fn to_bytes(&self) -> RouteResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> RouteResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// New geometry of a rerouted net inside the route box.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetUpdate {
    pub net: NetId,
    pub wires: Vec<PathSeg>,
    pub vias: Vec<Via>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerResult {
    pub id: WorkerId,
    pub route_box: Rect,
    pub updates: Vec<NetUpdate>,
    pub markers: Vec<Marker>,
    pub congested: bool,
    /// Nothing was routed; the committed markers of the box stand.
    pub skipped: bool,
}

impl WorkerResult {
    pub fn to_bytes(&self) -> RouteResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> RouteResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn skipped(task: &WorkerTask) -> Self {
        Self {
            id: task.id,
            route_box: task.route_box,
            updates: Vec::new(),
            markers: Vec::new(),
            congested: false,
            skipped: true,
        }
    }
}

/// Builds the worker's maze from the task, runs the ripup-and-reroute queue
/// and checks the result. Checks `stop` between nets.
pub fn run(task: &WorkerTask, rules: &RuleSet, stop: &AtomicBool) -> RouteResult<WorkerResult> {
    if task.iteration > 0 && task.markers.is_empty() {
        return Ok(WorkerResult::skipped(task));
    }
    let _t = ScopedTimer::at(log::Level::Debug, format!("Worker {}", task.id.0));
    let mut worker = init::Worker::build(task, rules)?;
    worker.route_queue(stop)?;
    Ok(worker.finish())
}
