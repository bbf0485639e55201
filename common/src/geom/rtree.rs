use super::rect::Rect;
use rstar::{AABB, RTree};

pub struct SpatialIndex {
    tree: RTree<IndexedRect>,
}

#[derive(PartialEq)]
struct IndexedRect {
    rect: Rect,
    id: usize,
}

impl rstar::RTreeObject for IndexedRect {
    type Envelope = AABB<[i32; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.rect.min.x, self.rect.min.y],
            [self.rect.max.x, self.rect.max.y],
        )
    }
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self { tree: RTree::new() }
    }

    pub fn bulk_load(items: Vec<(Rect, usize)>) -> Self {
        let items = items
            .into_iter()
            .map(|(rect, id)| IndexedRect { rect, id })
            .collect();
        Self {
            tree: RTree::bulk_load(items),
        }
    }

    pub fn insert(&mut self, rect: Rect, id: usize) {
        self.tree.insert(IndexedRect { rect, id });
    }

    /// Removes the entry `(rect, id)`. False when no such entry exists.
    pub fn remove(&mut self, rect: Rect, id: usize) -> bool {
        self.tree.remove(&IndexedRect { rect, id }).is_some()
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Ids of every rect intersecting `rect`, touching edges included.
    /// Sorted so callers iterate deterministically.
    pub fn query(&self, rect: Rect) -> Vec<usize> {
        let aabb = AABB::from_corners([rect.min.x, rect.min.y], [rect.max.x, rect.max.y]);
        let mut ids: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&aabb)
            .map(|item| item.id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new()
    }
}
