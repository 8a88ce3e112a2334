//! Named, time-sliced region geometries.
//!
//! The polity collaborator: each named region carries one geometry per
//! validity interval (e.g. a polity boundary as of 962, 970, 980 CE).
//! Slices are immutable reference data; a query year resolves to the
//! slice whose interval contains it.

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};

/// One geometry valid over a closed year interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionSlice {
    pub from_year: i32,
    pub to_year: i32,
    pub geom: MultiPolygon<f64>,
}

/// The consumed region-store interface.
pub trait RegionStore {
    /// The geometry of `name` valid at `year`, if any.
    fn get_region(&self, name: &str, year: i32) -> Option<&MultiPolygon<f64>>;
}

/// In-memory region store keyed by name.
#[derive(Debug, Default)]
pub struct MemoryRegionStore {
    entries: Vec<(String, Vec<RegionSlice>)>,
}

impl MemoryRegionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, slice: RegionSlice) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, slices)) => {
                slices.push(slice);
                slices.sort_by_key(|s| s.from_year);
            }
            None => self.entries.push((name.to_string(), vec![slice])),
        }
    }

    /// All slices of a named region, ordered by start year.
    pub fn slices(&self, name: &str) -> Option<&[RegionSlice]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, slices)| slices.as_slice())
    }
}

impl RegionStore for MemoryRegionStore {
    fn get_region(&self, name: &str, year: i32) -> Option<&MultiPolygon<f64>> {
        self.slices(name)?
            .iter()
            .find(|s| s.from_year <= year && year <= s.to_year)
            .map(|s| &s.geom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::square_region;

    #[test]
    fn year_resolves_to_the_containing_slice() {
        let mut store = MemoryRegionStore::new();
        store.insert(
            "Northern Song",
            RegionSlice { from_year: 970, to_year: 979, geom: square_region(0.0, 0.0, 2.0, 2.0) },
        );
        store.insert(
            "Northern Song",
            RegionSlice { from_year: 962, to_year: 969, geom: square_region(0.0, 0.0, 1.0, 1.0) },
        );

        assert!(store.get_region("Northern Song", 965).is_some());
        assert!(store.get_region("Northern Song", 975).is_some());
        assert!(store.get_region("Northern Song", 990).is_none());
        assert!(store.get_region("Liao", 965).is_none());

        // Slices come back ordered by start year regardless of insertion order.
        let slices = store.slices("Northern Song").unwrap();
        assert_eq!(slices[0].from_year, 962);
        assert_eq!(slices[1].from_year, 970);
    }
}
