//! Spatial index over territory bounding boxes.
//!
//! Uses an R-tree so overlap candidates for a claimed loop are found without
//! scanning every territory on the map.

use std::collections::HashMap;

use rstar::{AABB, RTree, RTreeObject};

use crate::Bounds;

use super::Territory;

/// Territory bounds wrapper for R-tree spatial indexing.
#[derive(Debug, Clone)]
pub struct TerritoryBounds {
    pub territory_id: String,
    pub bounds: Bounds,
}

impl RTreeObject for TerritoryBounds {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bounds.min_lng, self.bounds.min_lat],
            [self.bounds.max_lng, self.bounds.max_lat],
        )
    }
}

/// Bounding box index with dirty tracking.
///
/// Writes only mark the index dirty; the tree is bulk loaded again on the
/// next query.
#[derive(Debug)]
pub struct TerritoryIndex {
    tree: RTree<TerritoryBounds>,
    dirty: bool,
}

impl Default for TerritoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl TerritoryIndex {
    pub fn new() -> Self {
        Self {
            tree: RTree::new(),
            dirty: false,
        }
    }

    /// Mark the index as needing rebuild.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Rebuild the index from the current territories.
    pub fn rebuild(&mut self, territories: &HashMap<String, Territory>) {
        let bounds: Vec<TerritoryBounds> = territories
            .values()
            .map(|territory| TerritoryBounds {
                territory_id: territory.id.clone(),
                bounds: territory.polygon.bounds(),
            })
            .collect();

        self.tree = RTree::bulk_load(bounds);
        self.dirty = false;
    }

    /// Ensure the index is up to date.
    pub fn ensure_built(&mut self, territories: &HashMap<String, Territory>) {
        if self.dirty {
            self.rebuild(territories);
        }
    }

    /// Ids of territories whose bounding box intersects `bounds`.
    pub fn query(&self, bounds: &Bounds) -> Vec<String> {
        let search = AABB::from_corners(
            [bounds.min_lng, bounds.min_lat],
            [bounds.max_lng, bounds.max_lat],
        );

        self.tree
            .locate_in_envelope_intersecting(&search)
            .map(|b| b.territory_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}
