//! Basin storage and spatial lookup.
//!
//! Basins are immutable reference data loaded once. The only write path
//! is the offline cluster-label write-back, which is validated up front
//! and applied in one pass so a concurrent reader of a snapshot never
//! sees a half-labelled population.
//!
//! Spatial queries go through an R-tree over basin bounding boxes:
//! coarse envelope filtering first, exact predicate on the filtered
//! candidates only. At ~190k polygons a full-table scan per query is
//! not an option.

use std::collections::HashMap;

use geo::{BoundingRect, Contains, Intersects, MultiPolygon, Point};
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::error::{BasinError, Result};
use crate::schema::RawAttributes;

/// A hydrological sub-basin: stable id, raw attribute vectors aligned
/// to the schema catalog, and a geodetic multi-polygon geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Basin {
    pub id: u64,
    pub attrs: RawAttributes,
    pub geom: MultiPolygon<f64>,
    /// Derived label written back by the offline clustering job.
    #[serde(default)]
    pub cluster_id: Option<u32>,
}

/// The consumed basin-store interface: id lookup, region intersection,
/// point containment.
pub trait BasinStore {
    fn get(&self, id: u64) -> Option<&Basin>;

    /// Ids of all basins whose geometry intersects the polygon,
    /// boundary-touching basins included.
    fn basins_intersecting(&self, region: &MultiPolygon<f64>) -> Vec<u64>;

    /// The basin whose polygon contains the point, if any.
    fn basin_containing(&self, point: &Point<f64>) -> Option<u64>;
}

/// R-tree entry: basin bounding box plus its position in the backing vec.
struct Envelope {
    aabb: AABB<[f64; 2]>,
    pos: usize,
}

impl RTreeObject for Envelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// In-memory basin store with an R-tree built at construction.
pub struct MemoryBasinStore {
    basins: Vec<Basin>,
    by_id: HashMap<u64, usize>,
    tree: RTree<Envelope>,
}

impl MemoryBasinStore {
    pub fn new(basins: Vec<Basin>) -> Self {
        let by_id = basins.iter().enumerate().map(|(i, b)| (b.id, i)).collect();
        let entries: Vec<Envelope> = basins
            .iter()
            .enumerate()
            .filter_map(|(pos, b)| {
                let rect = b.geom.bounding_rect()?;
                Some(Envelope {
                    aabb: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                    pos,
                })
            })
            .collect();
        let tree = RTree::bulk_load(entries);
        MemoryBasinStore { basins, by_id, tree }
    }

    pub fn len(&self) -> usize {
        self.basins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.basins.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Basin> {
        self.basins.iter()
    }

    /// Bulk cluster-label write-back. Every id is validated before any
    /// label is assigned: either the whole table applies or none of it.
    pub fn set_cluster_labels(&mut self, labels: &[(u64, u32)]) -> Result<()> {
        for &(id, _) in labels {
            if !self.by_id.contains_key(&id) {
                return Err(BasinError::UnknownBasin(id));
            }
        }
        for &(id, cluster) in labels {
            let pos = self.by_id[&id];
            self.basins[pos].cluster_id = Some(cluster);
        }
        Ok(())
    }
}

impl BasinStore for MemoryBasinStore {
    fn get(&self, id: u64) -> Option<&Basin> {
        self.by_id.get(&id).map(|&pos| &self.basins[pos])
    }

    fn basins_intersecting(&self, region: &MultiPolygon<f64>) -> Vec<u64> {
        let Some(rect) = region.bounding_rect() else {
            return Vec::new();
        };
        let query = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
        let mut ids: Vec<u64> = self
            .tree
            .locate_in_envelope_intersecting(&query)
            .filter(|e| self.basins[e.pos].geom.intersects(region))
            .map(|e| self.basins[e.pos].id)
            .collect();
        // Envelope queries return in tree order; keep output deterministic.
        ids.sort_unstable();
        ids
    }

    fn basin_containing(&self, point: &Point<f64>) -> Option<u64> {
        let query = AABB::from_point([point.x(), point.y()]);
        let mut hits: Vec<u64> = self
            .tree
            .locate_in_envelope_intersecting(&query)
            .filter(|e| self.basins[e.pos].geom.contains(point))
            .map(|e| self.basins[e.pos].id)
            .collect();
        // Basins tile the surface with shared boundaries; a point on a
        // shared edge resolves to the lowest id for determinism.
        hits.sort_unstable();
        hits.first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use crate::synthetic::{square_basin, square_region};

    fn grid_store() -> MemoryBasinStore {
        let schema = Schema::basin08();
        // 3x3 grid of 1-degree squares, ids 1..=9, west to east then south to north.
        let mut basins = Vec::new();
        let mut id = 1;
        for row in 0..3 {
            for col in 0..3 {
                basins.push(square_basin(&schema, id, col as f64, row as f64, 1.0));
                id += 1;
            }
        }
        MemoryBasinStore::new(basins)
    }

    #[test]
    fn point_lookup_finds_containing_basin() {
        let store = grid_store();
        assert_eq!(store.basin_containing(&Point::new(0.5, 0.5)), Some(1));
        assert_eq!(store.basin_containing(&Point::new(2.5, 2.5)), Some(9));
        assert_eq!(store.basin_containing(&Point::new(10.0, 10.0)), None);
    }

    #[test]
    fn intersection_query_returns_touching_superset() {
        let store = grid_store();
        // A region covering the middle of the grid overlaps all 9 squares.
        let region = square_region(0.5, 0.5, 2.5, 2.5);
        let ids = store.basins_intersecting(&region);
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);

        // A region inside one square touches its neighbours not at all.
        let region = square_region(0.2, 0.2, 0.8, 0.8);
        assert_eq!(store.basins_intersecting(&region), vec![1]);
    }

    #[test]
    fn cluster_writeback_is_all_or_nothing() {
        let mut store = grid_store();
        let err = store.set_cluster_labels(&[(1, 0), (999, 1)]).unwrap_err();
        assert!(matches!(err, BasinError::UnknownBasin(999)));
        // The valid entry before the bad one must not have been applied.
        assert_eq!(store.get(1).unwrap().cluster_id, None);

        store.set_cluster_labels(&[(1, 0), (2, 1)]).unwrap();
        assert_eq!(store.get(1).unwrap().cluster_id, Some(0));
        assert_eq!(store.get(2).unwrap().cluster_id, Some(1));
    }
}
