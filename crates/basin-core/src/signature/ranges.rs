//! Global normalization ranges.
//!
//! One (min, max) record per numeric field, computed once over the full
//! basin population. Every normalization call for any entity uses the
//! same table; substituting local min/max would make signatures
//! incomparable across queries. Recomputation produces a new table with
//! a bumped version, never a mutation of the old one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::schema::Schema;
use crate::store::Basin;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeTable {
    pub version: u32,
    /// field code → (min, max), in the field's scaled unit.
    ranges: BTreeMap<String, (f64, f64)>,
}

impl RangeTable {
    /// Scan the full population once and record per-field min/max.
    /// Missing values are skipped; a field missing everywhere gets no
    /// entry, so normalizing it later fails loudly instead of guessing.
    pub fn compute(basins: &[Basin], schema: &Schema, version: u32) -> Self {
        let mut ranges = BTreeMap::new();
        for (i, field) in schema.numeric.iter().enumerate() {
            let mut min = f64::INFINITY;
            let mut max = f64::NEG_INFINITY;
            for basin in basins {
                if let Some(v) = basin.attrs.numeric[i] {
                    let v = v * field.scale;
                    min = min.min(v);
                    max = max.max(v);
                }
            }
            if min.is_finite() {
                ranges.insert(field.code.to_string(), (min, max));
            }
        }
        RangeTable { version, ranges }
    }

    /// The (0, 1) table: normalization through it is the identity on
    /// already-normalized values (up to clamping).
    pub fn identity(schema: &Schema) -> Self {
        let ranges = schema
            .numeric
            .iter()
            .map(|f| (f.code.to_string(), (0.0, 1.0)))
            .collect();
        RangeTable { version: 0, ranges }
    }

    pub fn get(&self, code: &str) -> Option<(f64, f64)> {
        self.ranges.get(code).copied()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::grid_population;

    #[test]
    fn compute_covers_every_numeric_field() {
        let schema = Schema::basin08();
        let basins = grid_population(&schema, 3, 3);
        let table = RangeTable::compute(&basins, &schema, 1);
        assert_eq!(table.len(), schema.numeric.len());
        for field in &schema.numeric {
            let (min, max) = table.get(field.code).unwrap();
            assert!(min <= max, "{}: min {} > max {}", field.code, min, max);
        }
    }

    #[test]
    fn temperature_ranges_are_in_scaled_units() {
        let schema = Schema::basin08();
        let basins = grid_population(&schema, 2, 2);
        let table = RangeTable::compute(&basins, &schema, 1);

        let i = schema.numeric_index("tmp_dc_syr").unwrap();
        let raw_max = basins
            .iter()
            .filter_map(|b| b.attrs.numeric[i])
            .fold(f64::NEG_INFINITY, f64::max);
        let (_, max) = table.get("tmp_dc_syr").unwrap();
        assert!((max - raw_max * 0.1).abs() < 1e-12);
    }

    #[test]
    fn all_missing_field_gets_no_entry() {
        let schema = Schema::basin08();
        let mut basins = grid_population(&schema, 2, 2);
        let i = schema.numeric_index("gdp_ud_sav").unwrap();
        for b in &mut basins {
            b.attrs.numeric[i] = None;
        }
        let table = RangeTable::compute(&basins, &schema, 1);
        assert!(table.get("gdp_ud_sav").is_none());
        assert_eq!(table.len(), schema.numeric.len() - 1);
    }
}
