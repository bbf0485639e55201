use crate::geom::Coord;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub detailed_routing: DetailedRoutingConfig,
    #[serde(default)]
    pub input: InputConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            detailed_routing: DetailedRoutingConfig::default(),
            input: InputConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetailedRoutingConfig {
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
    #[serde(default = "default_end_iteration")]
    pub end_iteration: usize,
    #[serde(default = "default_mt_safe_dist")]
    pub mt_safe_dist: Coord,
    #[serde(default = "default_drc_safe_dist")]
    pub drc_safe_dist: Coord,
    /// Gcell edge in tracks, used when the design carries no gcell pattern.
    #[serde(default = "default_gcell_tracks")]
    pub gcell_tracks: Coord,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_via_cost")]
    pub via_cost: Coord,
    #[serde(default = "default_grid_cost")]
    pub grid_cost: u32,
    #[serde(default = "default_guide_cost")]
    pub guide_cost: u32,
    #[serde(default = "default_block_cost")]
    pub block_cost: u32,
    #[serde(default = "default_route_shape_cost")]
    pub route_shape_cost: u32,
    #[serde(default = "default_marker_cost")]
    pub marker_cost: u32,
    #[serde(default = "default_fixed_shape_cost")]
    pub fixed_shape_cost: u32,
    #[serde(default)]
    pub route_with_jumpers: bool,
    #[serde(default = "default_jumper_cost_multiplier")]
    pub jumper_cost_multiplier: u32,
    #[serde(default = "default_max_clipsize_increase")]
    pub max_clipsize_increase: usize,
    #[serde(default = "default_congestion_threshold")]
    pub congestion_threshold: f64,
    #[serde(default = "default_taper_box_radius")]
    pub taper_box_radius: Coord,
    #[serde(default = "default_auto_taper_ndr_nets")]
    pub auto_taper_ndr_nets: bool,
    #[serde(default)]
    pub distributed: bool,
    #[serde(default = "default_cloud_size")]
    pub cloud_size: usize,
    #[serde(default)]
    pub or_seed: Option<u64>,
    #[serde(default)]
    pub or_k: f64,
}

impl Default for DetailedRoutingConfig {
    fn default() -> Self {
        Self {
            max_threads: default_max_threads(),
            end_iteration: default_end_iteration(),
            mt_safe_dist: default_mt_safe_dist(),
            drc_safe_dist: default_drc_safe_dist(),
            gcell_tracks: default_gcell_tracks(),
            batch_size: default_batch_size(),
            via_cost: default_via_cost(),
            grid_cost: default_grid_cost(),
            guide_cost: default_guide_cost(),
            block_cost: default_block_cost(),
            route_shape_cost: default_route_shape_cost(),
            marker_cost: default_marker_cost(),
            fixed_shape_cost: default_fixed_shape_cost(),
            route_with_jumpers: false,
            jumper_cost_multiplier: default_jumper_cost_multiplier(),
            max_clipsize_increase: default_max_clipsize_increase(),
            congestion_threshold: default_congestion_threshold(),
            taper_box_radius: default_taper_box_radius(),
            auto_taper_ndr_nets: default_auto_taper_ndr_nets(),
            distributed: false,
            cloud_size: default_cloud_size(),
            or_seed: None,
            or_k: 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_design_file")]
    pub design_file: String,
    #[serde(default = "default_output_file")]
    pub output_file: String,
    #[serde(default = "default_report_file")]
    pub report_file: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            design_file: default_design_file(),
            output_file: default_output_file(),
            report_file: default_report_file(),
        }
    }
}

fn default_max_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_end_iteration() -> usize {
    64
}

fn default_mt_safe_dist() -> Coord {
    2000
}

fn default_drc_safe_dist() -> Coord {
    500
}

fn default_gcell_tracks() -> Coord {
    15
}

fn default_batch_size() -> usize {
    1024
}

fn default_via_cost() -> Coord {
    4
}

fn default_grid_cost() -> u32 {
    2
}

fn default_guide_cost() -> u32 {
    1
}

fn default_block_cost() -> u32 {
    32
}

fn default_route_shape_cost() -> u32 {
    8
}

fn default_marker_cost() -> u32 {
    32
}

fn default_fixed_shape_cost() -> u32 {
    8
}

fn default_jumper_cost_multiplier() -> u32 {
    2
}

fn default_max_clipsize_increase() -> usize {
    18
}

fn default_congestion_threshold() -> f64 {
    0.4
}

fn default_taper_box_radius() -> Coord {
    3
}

fn default_auto_taper_ndr_nets() -> bool {
    true
}

fn default_cloud_size() -> usize {
    2
}

fn default_design_file() -> String {
    "inputs/design.toml".to_string()
}

fn default_output_file() -> String {
    "output/routed.toml".to_string()
}

fn default_report_file() -> String {
    "output/drc.rpt".to_string()
}
