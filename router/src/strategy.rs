use crate::worker::RipupMode;

/// Parameters of one search-and-repair iteration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchRepairArgs {
    /// Worker edge in gcells.
    pub size: usize,
    /// Gcell index of the first worker; negative offsets shift the worker
    /// boundaries off the die origin.
    pub offset: i32,
    pub maze_end_iter: usize,
    pub drc_cost: u32,
    pub marker_cost: u32,
    pub fixed_shape_cost: u32,
    pub marker_decay: f64,
    pub ripup_mode: RipupMode,
    pub follow_guide: bool,
}

/// One row per iteration. Costs are multiples of the route-shape cost `sc`
/// and the marker cost `mc`.
#[rustfmt::skip]
const TABLE: [(usize, i32, usize, u32, u32, u32, f64, RipupMode, bool); 65] = {
    use RipupMode::{All, Drc, NearDrc};
    [
        (7,  0,  3,  1,  0,   1, 0.950, All,     true),  //  0
        (7, -2,  3,  1,  1,   1, 0.950, All,     true),  //  1
        (7, -5,  3,  1,  1,   1, 0.950, All,     true),  //  2
        (7,  0,  8,  1, 32,   2, 0.950, Drc,     false), //  3
        (7, -1,  8,  1, 32,   2, 0.950, Drc,     false), //  4
        (7, -2,  8,  1, 32,   2, 0.950, Drc,     false), //  5
        (7, -3,  8,  1, 32,   2, 0.950, Drc,     false), //  6
        (7, -4,  8,  1, 32,   2, 0.950, Drc,     false), //  7
        (7, -5,  8,  1, 32,   2, 0.950, Drc,     false), //  8
        (7, -6,  8,  1, 32,   2, 0.950, Drc,     false), //  9
        (7,  0,  8,  2, 32,   3, 0.950, Drc,     false), // 10
        (7, -1,  8,  2, 32,   3, 0.950, Drc,     false), // 11
        (7, -2,  8,  2, 32,   3, 0.950, Drc,     false), // 12
        (7, -3,  8,  2, 32,   3, 0.950, Drc,     false), // 13
        (7, -4,  8,  2, 32,   3, 0.950, Drc,     false), // 14
        (7, -5,  8,  2, 32,   4, 0.950, Drc,     false), // 15
        (7, -6,  8,  2, 32,   4, 0.950, Drc,     false), // 16
        (7, -3,  8,  1, 32,   4, 0.950, All,     false), // 17
        (7,  0,  8,  4, 32,   4, 0.950, Drc,     false), // 18
        (7, -1,  8,  4, 32,   4, 0.950, Drc,     false), // 19
        (7, -2,  8,  4, 32,  10, 0.950, Drc,     false), // 20
        (7, -3,  8,  4, 32,  10, 0.950, Drc,     false), // 21
        (7, -4,  8,  4, 32,  10, 0.950, Drc,     false), // 22
        (7, -5,  8,  1, 32,  10, 0.950, NearDrc, false), // 23
        (7, -6,  8,  4, 32,  10, 0.950, Drc,     false), // 24
        (5, -2,  8,  1, 32,  10, 0.950, All,     false), // 25
        (7,  0,  8,  8, 64,  10, 0.950, Drc,     false), // 26
        (7, -1,  8,  8, 64,  10, 0.950, Drc,     false), // 27
        (7, -2,  8,  8, 64,  10, 0.950, Drc,     false), // 28
        (7, -3,  8,  8, 64,  10, 0.950, Drc,     false), // 29
        (7, -4,  8,  1, 32,  50, 0.950, NearDrc, false), // 30
        (7, -5,  8,  8, 64,  50, 0.950, Drc,     false), // 31
        (7, -6,  8,  8, 64,  50, 0.950, Drc,     false), // 32
        (3, -1,  8,  1, 32,  50, 0.950, All,     false), // 33
        (7,  0,  8, 16, 128, 50, 0.950, Drc,     false), // 34
        (7, -1,  8, 16, 128, 50, 0.950, Drc,     false), // 35
        (7, -2,  8, 16, 128, 50, 0.950, Drc,     false), // 36
        (7, -3,  8,  1, 32,  50, 0.950, NearDrc, false), // 37
        (7, -4,  8, 16, 128, 50, 0.950, Drc,     false), // 38
        (7, -5,  8, 16, 128, 50, 0.950, Drc,     false), // 39
        (7, -6,  8, 16, 128, 100, 0.990, Drc,    false), // 40
        (3, -2,  8,  1, 32, 100, 0.990, All,     false), // 41
        (7,  0, 16, 16, 128, 100, 0.990, Drc,    false), // 42
        (7, -1, 16, 16, 128, 100, 0.990, Drc,    false), // 43
        (7, -2, 16,  1, 32, 100, 0.990, NearDrc, false), // 44
        (7, -3, 16, 16, 128, 100, 0.990, Drc,    false), // 45
        (7, -4, 16, 16, 128, 100, 0.990, Drc,    false), // 46
        (7, -5, 16, 16, 128, 100, 0.990, Drc,    false), // 47
        (7, -6, 16, 16, 128, 100, 0.990, Drc,    false), // 48
        (3,  0,  8,  1, 32, 100, 0.990, All,     false), // 49
        (7,  0, 32, 32, 256, 100, 0.999, Drc,    false), // 50
        (7, -1, 32,  1, 32, 100, 0.999, NearDrc, false), // 51
        (7, -2, 32, 32, 256, 100, 0.999, Drc,    false), // 52
        (7, -3, 32, 32, 256, 100, 0.999, Drc,    false), // 53
        (7, -4, 32, 32, 256, 100, 0.999, Drc,    false), // 54
        (7, -5, 32, 32, 256, 100, 0.999, Drc,    false), // 55
        (7, -6, 32, 32, 256, 100, 0.999, Drc,    false), // 56
        (3, -1,  8,  1, 32, 100, 0.999, All,     false), // 57
        (7,  0, 64,  1, 32, 100, 0.999, NearDrc, false), // 58
        (7, -1, 64, 64, 512, 100, 0.999, Drc,    false), // 59
        (7, -2, 64, 64, 512, 100, 0.999, Drc,    false), // 60
        (7, -3, 64, 64, 512, 100, 0.999, Drc,    false), // 61
        (7, -4, 64, 64, 512, 100, 0.999, Drc,    false), // 62
        (7, -5, 64, 64, 512, 100, 0.999, Drc,    false), // 63
        (7, -6, 64, 64, 512, 100, 0.999, Drc,    false), // 64
    ]
};

/// The iteration schedule. Marker cost columns are stored for the default
/// marker cost of 32 and rescaled to `marker_cost`; the first row keeps a
/// zero marker cost.
pub fn strategy(route_shape_cost: u32, marker_cost: u32) -> Vec<SearchRepairArgs> {
    TABLE
        .iter()
        .map(|&(size, offset, maze_end_iter, drc, marker, fixed, decay, ripup_mode, follow_guide)| {
            let marker_cost = match marker {
                0 => 0,
                1 => route_shape_cost,
                m => m / 32 * marker_cost,
            };
            SearchRepairArgs {
                size,
                offset,
                maze_end_iter,
                drc_cost: drc * route_shape_cost,
                marker_cost,
                fixed_shape_cost: fixed * route_shape_cost,
                marker_decay: decay,
                ripup_mode,
                follow_guide,
            }
        })
        .collect()
}

/// Clip-size growth carried between iterations.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClipGrowth {
    inc: f32,
}

impl ClipGrowth {
    /// Effective worker size of `args`. Only repair iterations grow.
    pub fn apply(&mut self, args: &SearchRepairArgs, congested: bool, max_increase: usize) -> usize {
        if args.ripup_mode == RipupMode::All {
            return args.size;
        }
        if congested {
            self.inc += 2.0;
        } else {
            self.inc = (self.inc - 0.2).max(0.0);
        }
        args.size + max_increase.min(self.inc.round() as usize)
    }
}
