// Packed per-grid state (8 bytes). Edge flags describe the east/north/up edge
// leaving this grid; west/south/down edges live on the neighbour.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct Node {
    flags: u16,
    pub route_shape_planar: u8,
    pub route_shape_via: u8,
    pub marker_planar: u8,
    pub marker_via: u8,
    pub fixed_shape_planar: u8,
    pub fixed_shape_via: u8,
}

pub const HAS_EDGE_E: u16 = 1 << 0;
pub const HAS_EDGE_N: u16 = 1 << 1;
pub const HAS_EDGE_U: u16 = 1 << 2;
pub const BLOCKED_E: u16 = 1 << 3;
pub const BLOCKED_N: u16 = 1 << 4;
pub const BLOCKED_U: u16 = 1 << 5;
pub const GRID_COST_E: u16 = 1 << 6;
pub const GRID_COST_N: u16 = 1 << 7;
pub const GRID_COST_U: u16 = 1 << 8;
pub const SPECIAL_VIA: u16 = 1 << 9;
pub const OVERRIDE_SHAPE_COST_VIA: u16 = 1 << 10;

impl Node {
    #[inline(always)]
    pub fn has(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }

    #[inline(always)]
    pub fn set(&mut self, flag: u16, on: bool) {
        if on {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_is_eight_bytes() {
        assert_eq!(std::mem::size_of::<Node>(), 8);
    }

    #[test]
    fn test_flags_are_independent() {
        let mut node = Node::default();
        node.set(HAS_EDGE_E, true);
        node.set(GRID_COST_U, true);
        assert!(node.has(HAS_EDGE_E));
        assert!(!node.has(HAS_EDGE_N));
        assert!(node.has(GRID_COST_U));
        node.set(HAS_EDGE_E, false);
        assert!(!node.has(HAS_EDGE_E));
        assert!(node.has(GRID_COST_U));
    }
}
