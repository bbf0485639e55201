use drt_common::geom::Coord;
use drt_common::geom::point::Point;
use drt_common::geom::rect::Rect;

/// Sorted x/y coordinate lines of a worker's maze and the mapping between
/// database units and maze indices.
#[derive(Clone, Debug, Default)]
pub struct GridConverter {
    xs: Vec<Coord>,
    ys: Vec<Coord>,
}

impl GridConverter {
    pub fn new(mut xs: Vec<Coord>, mut ys: Vec<Coord>) -> Self {
        xs.sort_unstable();
        xs.dedup();
        ys.sort_unstable();
        ys.dedup();
        Self { xs, ys }
    }

    pub fn dim_x(&self) -> usize {
        self.xs.len()
    }

    pub fn dim_y(&self) -> usize {
        self.ys.len()
    }

    pub fn xs(&self) -> &[Coord] {
        &self.xs
    }

    pub fn ys(&self) -> &[Coord] {
        &self.ys
    }

    #[inline(always)]
    pub fn x(&self, i: i32) -> Coord {
        self.xs[i as usize]
    }

    #[inline(always)]
    pub fn y(&self, j: i32) -> Coord {
        self.ys[j as usize]
    }

    pub fn to_world(&self, i: i32, j: i32) -> Point<Coord> {
        Point::new(self.x(i), self.y(j))
    }

    /// Exact index of a point lying on both an x and a y line.
    pub fn to_grid(&self, p: Point<Coord>) -> Option<(i32, i32)> {
        let i = self.xs.binary_search(&p.x).ok()?;
        let j = self.ys.binary_search(&p.y).ok()?;
        Some((i as i32, j as i32))
    }

    pub fn x_lower_bound(&self, v: Coord) -> usize {
        lower_bound(&self.xs, v)
    }

    pub fn x_upper_bound(&self, v: Coord) -> usize {
        upper_bound(&self.xs, v)
    }

    pub fn y_lower_bound(&self, v: Coord) -> usize {
        lower_bound(&self.ys, v)
    }

    pub fn y_upper_bound(&self, v: Coord) -> usize {
        upper_bound(&self.ys, v)
    }

    /// Index ranges of the lines inside the closed `rect`, or None when no
    /// grid falls inside it.
    pub fn index_box(&self, rect: &Rect) -> Option<(i32, i32, i32, i32)> {
        let (x1, x2) = inner_range(&self.xs, rect.min.x, rect.max.x)?;
        let (y1, y2) = inner_range(&self.ys, rect.min.y, rect.max.y)?;
        Some((x1 as i32, y1 as i32, x2 as i32, y2 as i32))
    }
}

/// First index whose value is >= `v`; may equal `len`.
pub fn lower_bound(tracks: &[Coord], v: Coord) -> usize {
    tracks.partition_point(|&t| t < v)
}

/// First index whose value is > `v`, clamped to the last index.
pub fn upper_bound(tracks: &[Coord], v: Coord) -> usize {
    tracks
        .partition_point(|&t| t <= v)
        .min(tracks.len().saturating_sub(1))
}

fn inner_range(tracks: &[Coord], lo: Coord, hi: Coord) -> Option<(usize, usize)> {
    let first = lower_bound(tracks, lo);
    let last = tracks.partition_point(|&t| t <= hi);
    (first < last).then(|| (first, last - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_tie_break() {
        let tracks = [100, 300, 500, 700];
        assert_eq!(lower_bound(&tracks, 300), 1);
        assert_eq!(lower_bound(&tracks, 301), 2);
        assert_eq!(lower_bound(&tracks, 800), 4);
        assert_eq!(upper_bound(&tracks, 300), 2);
        assert_eq!(upper_bound(&tracks, 0), 0);
        assert_eq!(upper_bound(&tracks, 900), 3);
    }

    #[test]
    fn test_index_box() {
        let conv = GridConverter::new(vec![500, 100, 300, 300], vec![0, 200, 400]);
        assert_eq!(conv.dim_x(), 3);
        assert_eq!(conv.index_box(&Rect::from_coords(150, 0, 500, 250)), Some((1, 0, 2, 1)));
        assert_eq!(conv.index_box(&Rect::from_coords(310, 0, 490, 400)), None);
        assert_eq!(conv.to_grid(Point::new(300, 400)), Some((1, 2)));
        assert_eq!(conv.to_grid(Point::new(301, 400)), None);
    }
}
