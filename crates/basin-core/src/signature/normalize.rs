//! Raw attributes → unit-scaled signature vector.
//!
//! Numeric fields are min/max-scaled against the global range table and
//! clamped to [0, 1]: observed values can land outside the table after
//! source-data revisions, and clamping keeps them comparable at the cost
//! of saturating the tails. Compositional shares pass through unchanged.
//! Categorical codes expand to one-hot blocks over the fixed
//! enumeration; an unrecognized code is a schema-drift signal and fails
//! the call rather than being dropped.

use serde::{Deserialize, Serialize};

use crate::error::{BasinError, Result};
use crate::schema::{BandSet, FieldKind, RawAttributes, Schema};
use crate::signature::RangeTable;

/// Share sums may exceed 1 by at most this before the composition is
/// rejected.
pub const COMPOSITION_EPS: f64 = 1e-6;

/// A fixed-width signature vector for one basin or one composite
/// region. Column order follows the catalog restricted to `bands`:
/// numerics, then shares, then one-hot categorical blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub bands: BandSet,
    pub values: Vec<f64>,
}

/// Position of a named column (per `Schema::column_names`) in a
/// signature built under the given band selection.
pub fn column_index(schema: &Schema, bands: BandSet, name: &str) -> Option<usize> {
    schema.column_names(bands).iter().position(|n| n == name)
}

/// Unit-scale one raw numeric value (already in the field's scaled
/// unit) against its global range. Shared by the per-basin path and the
/// composite path so both saturate identically.
pub(crate) fn unit_scale(value: Option<f64>, min: f64, max: f64) -> f64 {
    match value {
        None => 0.0,
        Some(v) => {
            if max == min {
                0.5
            } else {
                ((v - min) / (max - min)).clamp(0.0, 1.0)
            }
        }
    }
}

/// Normalize one basin's raw attributes into a signature.
///
/// Pure and deterministic; renormalizing an already-normalized vector
/// through `RangeTable::identity` reproduces it exactly.
pub fn normalize(
    attrs: &RawAttributes,
    schema: &Schema,
    ranges: &RangeTable,
    bands: BandSet,
) -> Result<Signature> {
    schema.validate(attrs)?;
    if schema.width_for(bands) == 0 {
        return Err(BasinError::InvalidBandSelection);
    }

    let mut values = Vec::with_capacity(schema.width_for(bands));

    // Numeric block.
    for (i, field) in schema.numeric.iter().enumerate() {
        if !bands.contains(field.band) {
            continue;
        }
        let (min, max) = ranges
            .get(field.code)
            .ok_or_else(|| BasinError::MissingRange(field.code.to_string(), ranges.version))?;
        // Missing attributes map to 0.0: the source layer has gaps, and
        // this keeps the vector defined (the matrix-builder default).
        values.push(unit_scale(attrs.numeric[i].map(|raw| raw * field.scale), min, max));
    }

    // Compositional blocks.
    let mut offset = 0;
    for field in &schema.compositional {
        let width = field.width();
        let block = &attrs.shares[offset..offset + width];
        offset += width;
        if !bands.contains(field.band) {
            continue;
        }
        let sum: f64 = block.iter().sum();
        if sum > 1.0 + COMPOSITION_EPS {
            return Err(BasinError::InvalidComposition { field: field.code.to_string(), sum });
        }
        values.extend_from_slice(block);
    }

    // Categorical one-hot blocks.
    for (i, field) in schema.categorical.iter().enumerate() {
        if !bands.contains(field.band) {
            continue;
        }
        let FieldKind::Categorical { categories } = &field.kind else {
            continue;
        };
        let code = attrs.categorical[i];
        let Some(hot) = categories.iter().position(|&c| c == code) else {
            return Err(BasinError::UnknownCategory { field: field.code.to_string(), code });
        };
        let start = values.len();
        values.resize(start + categories.len(), 0.0);
        values[start + hot] = 1.0;
    }

    Ok(Signature { bands, values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use crate::synthetic::grid_population;

    fn fixture() -> (Schema, Vec<crate::store::Basin>, RangeTable) {
        let schema = Schema::basin08();
        let basins = grid_population(&schema, 3, 3);
        let ranges = RangeTable::compute(&basins, &schema, 1);
        (schema, basins, ranges)
    }

    #[test]
    fn normalized_numerics_stay_in_unit_interval() {
        let (schema, basins, ranges) = fixture();
        for basin in &basins {
            let sig = normalize(&basin.attrs, &schema, &ranges, BandSet::full()).unwrap();
            assert_eq!(sig.values.len(), schema.width());
            for (i, &v) in sig.values.iter().enumerate() {
                assert!((0.0..=1.0).contains(&v), "column {i} out of range: {v}");
            }
        }
    }

    #[test]
    fn identity_table_is_idempotent() {
        let (schema, basins, ranges) = fixture();
        let sig = normalize(&basins[4].attrs, &schema, &ranges, BandSet::full()).unwrap();

        // Re-wrap the normalized vector as raw attributes and pass it
        // through the identity table: bitwise-identical output.
        let n = schema.numeric.len();
        let s = schema.n_shares();
        let renorm = RawAttributes {
            numeric: sig.values[..n].iter().map(|&v| Some(v)).collect(),
            shares: sig.values[n..n + s].to_vec(),
            categorical: basins[4].attrs.categorical.clone(),
        };
        let again = normalize(&renorm, &schema, &RangeTable::identity(&schema), BandSet::full())
            .unwrap();
        assert_eq!(sig.values, again.values);
    }

    #[test]
    fn values_outside_the_table_clamp() {
        let (schema, basins, ranges) = fixture();
        let mut attrs = basins[0].attrs.clone();
        let i = schema.numeric_index("pre_mm_syr").unwrap();
        attrs.numeric[i] = Some(1e9);
        let sig = normalize(&attrs, &schema, &ranges, BandSet::full()).unwrap();
        let col = column_index(&schema, BandSet::full(), "n_pre_mm_syr").unwrap();
        assert_eq!(sig.values[col], 1.0);

        attrs.numeric[i] = Some(-1e9);
        let sig = normalize(&attrs, &schema, &ranges, BandSet::full()).unwrap();
        assert_eq!(sig.values[col], 0.0);
    }

    #[test]
    fn missing_range_fails() {
        let (schema, basins, _) = fixture();
        let empty = RangeTable::compute(&[], &schema, 7);
        let err = normalize(&basins[0].attrs, &schema, &empty, BandSet::full()).unwrap_err();
        assert!(matches!(err, BasinError::MissingRange(_, 7)));
    }

    #[test]
    fn unknown_category_code_fails() {
        let (schema, basins, ranges) = fixture();
        let mut attrs = basins[0].attrs.clone();
        attrs.categorical[0] = 99;
        let err = normalize(&attrs, &schema, &ranges, BandSet::full()).unwrap_err();
        match err {
            BasinError::UnknownCategory { field, code } => {
                assert_eq!(field, "lit_cl_smj");
                assert_eq!(code, 99);
            }
            other => panic!("expected UnknownCategory, got {other:?}"),
        }
    }

    #[test]
    fn oversumming_composition_fails() {
        let (schema, basins, ranges) = fixture();
        let mut attrs = basins[0].attrs.clone();
        for s in &mut attrs.shares {
            *s = 0.2;
        }
        let err = normalize(&attrs, &schema, &ranges, BandSet::full()).unwrap_err();
        assert!(matches!(err, BasinError::InvalidComposition { .. }));
    }

    #[test]
    fn band_selection_shrinks_the_vector() {
        let (schema, basins, ranges) = fixture();
        let historic =
            normalize(&basins[0].attrs, &schema, &ranges, BandSet::historic()).unwrap();
        assert_eq!(historic.values.len(), schema.width_for(BandSet::historic()));
        assert!(column_index(&schema, BandSet::historic(), "n_gdp_ud_sav").is_none());

        let err = normalize(&basins[0].attrs, &schema, &ranges, BandSet::empty()).unwrap_err();
        assert!(matches!(err, BasinError::InvalidBandSelection));
    }
}
