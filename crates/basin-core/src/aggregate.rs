//! Areal aggregation: area-weighted composite signatures for arbitrary
//! regions.
//!
//! A region polygon is overlaid on the basin layer: R-tree candidates,
//! exact clip per candidate, geodesic area per clip. Fragment weights
//! are clip areas normalized over the retained fragments, so numeric
//! composites are area-weighted means and categorical composites are
//! area-weighted histograms over the class enumeration (never reduced
//! to a mode). Areas are geodesic square metres; planar area in
//! unprojected degrees would skew every weight for regions spanning
//! real latitude ranges.

use std::time::{Duration, Instant};

use geo::{BooleanOps, GeodesicArea, MultiPolygon, Point};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{BasinError, Result};
use crate::schema::{BandSet, FieldKind, Schema};
use crate::signature::{unit_scale, RangeTable, Signature};
use crate::store::BasinStore;

/// A query region: a point resolved to its containing basin, or an
/// explicit polygon overlaid on the basin layer. No implicit buffering
/// around points.
#[derive(Debug, Clone)]
pub enum RegionInput {
    Point(Point<f64>),
    Polygon(MultiPolygon<f64>),
}

/// Aggregation configuration. The sliver and coverage thresholds are
/// tunable; nothing downstream assumes the defaults are load-bearing.
#[derive(Debug, Clone)]
pub struct AggregateOptions {
    pub bands: BandSet,
    /// Fragments below this fraction of the region's area are dropped
    /// as digitization noise from heterogeneous source-layer scales.
    pub sliver_fraction: f64,
    /// Coverage fractions below this attach a `LowCoverage` warning.
    pub coverage_warn: f64,
    /// Deadline for the whole call; exceeded means a hard error, never
    /// a silently truncated composite.
    pub timeout: Option<Duration>,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        AggregateOptions {
            bands: BandSet::full(),
            sliver_fraction: 1e-3,
            coverage_warn: 0.8,
            timeout: None,
        }
    }
}

/// One basin's overlap with the region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub basin_id: u64,
    /// Geodesic area of the clipped overlap, m².
    pub area_m2: f64,
    /// Share of the retained overlap total. Sums to 1 over all
    /// fragments of one composite.
    pub weight: f64,
}

/// Non-fatal anomalies attached to a successful composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Warning {
    /// The basin layer covers less of the region than the configured
    /// threshold (ocean, missing data, slivered-away fragments).
    LowCoverage { coverage_fraction: f64, threshold: f64 },
    /// Fragments dropped by the sliver filter.
    SliversDropped { count: usize },
}

/// The aggregation result: the composite signature plus the fragment
/// report a caller needs to judge it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Composite {
    pub signature: Signature,
    /// Area-weighted raw numeric values in the field's scaled unit,
    /// ordered as the selected numeric fields; `None` where the value
    /// was missing in every contributing basin.
    pub raw_numeric: Vec<Option<f64>>,
    pub fragments: Vec<Fragment>,
    /// Retained overlap area over the region's own geodesic area.
    pub coverage_fraction: f64,
    pub warnings: Vec<Warning>,
}

/// Compute the composite signature of a region.
///
/// Point inputs resolve to the unique containing basin and degenerate
/// to that basin's own signature with a single weight-1 fragment.
pub fn aggregate<S: BasinStore + ?Sized>(
    store: &S,
    region: &RegionInput,
    schema: &Schema,
    ranges: &RangeTable,
    opts: &AggregateOptions,
) -> Result<Composite> {
    if schema.width_for(opts.bands) == 0 {
        return Err(BasinError::InvalidBandSelection);
    }
    match region {
        RegionInput::Point(p) => aggregate_point(store, p, schema, ranges, opts),
        RegionInput::Polygon(poly) => aggregate_polygon(store, poly, schema, ranges, opts),
    }
}

/// Aggregate many independent regions across the rayon pool. Regions
/// never share state, so results are identical to the serial path.
pub fn aggregate_batch<S: BasinStore + Sync + ?Sized>(
    store: &S,
    regions: &[RegionInput],
    schema: &Schema,
    ranges: &RangeTable,
    opts: &AggregateOptions,
) -> Vec<Result<Composite>> {
    regions
        .par_iter()
        .map(|region| aggregate(store, region, schema, ranges, opts))
        .collect()
}

fn aggregate_point<S: BasinStore + ?Sized>(
    store: &S,
    point: &Point<f64>,
    schema: &Schema,
    ranges: &RangeTable,
    opts: &AggregateOptions,
) -> Result<Composite> {
    let id = store
        .basin_containing(point)
        .ok_or(BasinError::NoCoverage { lon: point.x(), lat: point.y() })?;
    // The store just returned this id.
    let basin = store.get(id).ok_or(BasinError::UnknownBasin(id))?;

    let signature = crate::signature::normalize(&basin.attrs, schema, ranges, opts.bands)?;
    let raw_numeric = schema
        .numeric
        .iter()
        .enumerate()
        .filter(|(_, f)| opts.bands.contains(f.band))
        .map(|(i, f)| basin.attrs.numeric[i].map(|v| v * f.scale))
        .collect();

    Ok(Composite {
        signature,
        raw_numeric,
        fragments: vec![Fragment {
            basin_id: id,
            area_m2: basin.geom.geodesic_area_unsigned(),
            weight: 1.0,
        }],
        coverage_fraction: 1.0,
        warnings: Vec::new(),
    })
}

fn aggregate_polygon<S: BasinStore + ?Sized>(
    store: &S,
    region: &MultiPolygon<f64>,
    schema: &Schema,
    ranges: &RangeTable,
    opts: &AggregateOptions,
) -> Result<Composite> {
    let start = Instant::now();
    let region_area = region.geodesic_area_unsigned();
    if region_area <= 0.0 {
        return Err(BasinError::EmptyIntersection("region has zero area".to_string()));
    }

    let candidates = store.basins_intersecting(region);
    if candidates.is_empty() {
        return Err(BasinError::EmptyIntersection("no candidate basins".to_string()));
    }

    // Exact clip per candidate, deadline checked between clips.
    let mut clipped: Vec<(u64, f64)> = Vec::with_capacity(candidates.len());
    for (done, &id) in candidates.iter().enumerate() {
        if let Some(timeout) = opts.timeout {
            if start.elapsed() >= timeout {
                return Err(BasinError::AggregationTimeout {
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    candidates_done: done,
                    candidates_total: candidates.len(),
                });
            }
        }
        let basin = store.get(id).ok_or(BasinError::UnknownBasin(id))?;
        // Misaligned attribute vectors must fail here, not index out of
        // bounds when the composite is folded.
        schema.validate(&basin.attrs)?;
        let clip = basin.geom.intersection(region);
        let area = clip.geodesic_area_unsigned();
        if area > 0.0 {
            clipped.push((id, area));
        }
    }

    if clipped.is_empty() {
        return Err(BasinError::EmptyIntersection(format!(
            "{} candidates, all with zero-area overlap",
            candidates.len()
        )));
    }

    // Sliver filter.
    let min_area = opts.sliver_fraction * region_area;
    let n_before = clipped.len();
    clipped.retain(|&(_, area)| area >= min_area);
    let slivers = n_before - clipped.len();
    if clipped.is_empty() {
        return Err(BasinError::EmptyIntersection(format!(
            "{n_before} overlapping basins, all below the sliver threshold"
        )));
    }

    let total_area: f64 = clipped.iter().map(|&(_, a)| a).sum();
    let fragments: Vec<Fragment> = clipped
        .iter()
        .map(|&(basin_id, area_m2)| Fragment { basin_id, area_m2, weight: area_m2 / total_area })
        .collect();

    let (signature, raw_numeric) = composite_signature(store, &fragments, schema, ranges, opts)?;

    let coverage_fraction = total_area / region_area;
    let mut warnings = Vec::new();
    if slivers > 0 {
        warnings.push(Warning::SliversDropped { count: slivers });
    }
    if coverage_fraction < opts.coverage_warn {
        warnings.push(Warning::LowCoverage { coverage_fraction, threshold: opts.coverage_warn });
    }

    Ok(Composite { signature, raw_numeric, fragments, coverage_fraction, warnings })
}

/// Fold fragment signatures into the composite: weighted mean of raw
/// numerics (weights renormalized over fragments where the value is
/// present), weighted mean of shares, weighted one-hot histogram for
/// categoricals. The weighted raw numerics then go through the global
/// range table, so a single-fragment composite equals that basin's own
/// normalized signature.
fn composite_signature<S: BasinStore + ?Sized>(
    store: &S,
    fragments: &[Fragment],
    schema: &Schema,
    ranges: &RangeTable,
    opts: &AggregateOptions,
) -> Result<(Signature, Vec<Option<f64>>)> {
    let mut values = Vec::with_capacity(schema.width_for(opts.bands));
    let mut raw_numeric = Vec::new();

    // Numeric block.
    for (i, field) in schema.numeric.iter().enumerate() {
        if !opts.bands.contains(field.band) {
            continue;
        }
        let (min, max) = ranges
            .get(field.code)
            .ok_or_else(|| BasinError::MissingRange(field.code.to_string(), ranges.version))?;
        let mut wsum = 0.0;
        let mut vsum = 0.0;
        for frag in fragments {
            let basin = store.get(frag.basin_id).ok_or(BasinError::UnknownBasin(frag.basin_id))?;
            if let Some(v) = basin.attrs.numeric[i] {
                wsum += frag.weight;
                vsum += frag.weight * v * field.scale;
            }
        }
        let raw = if wsum > 0.0 { Some(vsum / wsum) } else { None };
        raw_numeric.push(raw);
        values.push(unit_scale(raw, min, max));
    }

    // Compositional blocks: weighted mean share by share.
    let mut offset = 0;
    for field in &schema.compositional {
        let width = field.width();
        if opts.bands.contains(field.band) {
            for j in 0..width {
                let mut v = 0.0;
                for frag in fragments {
                    let basin =
                        store.get(frag.basin_id).ok_or(BasinError::UnknownBasin(frag.basin_id))?;
                    v += frag.weight * basin.attrs.shares[offset + j];
                }
                values.push(v);
            }
        }
        offset += width;
    }

    // Categorical blocks: distribution over the enumeration, each class
    // accumulating the weight of the fragments carrying its code.
    for (i, field) in schema.categorical.iter().enumerate() {
        if !opts.bands.contains(field.band) {
            continue;
        }
        let FieldKind::Categorical { categories } = &field.kind else {
            continue;
        };
        let start = values.len();
        values.resize(start + categories.len(), 0.0);
        for frag in fragments {
            let basin = store.get(frag.basin_id).ok_or(BasinError::UnknownBasin(frag.basin_id))?;
            let code = basin.attrs.categorical[i];
            let Some(hot) = categories.iter().position(|&c| c == code) else {
                return Err(BasinError::UnknownCategory { field: field.code.to_string(), code });
            };
            values[start + hot] += frag.weight;
        }
    }

    Ok((Signature { bands: opts.bands, values }, raw_numeric))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use crate::signature::normalize;
    use crate::store::MemoryBasinStore;
    use crate::synthetic::{grid_population, square_region};

    fn fixture() -> (Schema, MemoryBasinStore, RangeTable) {
        let schema = Schema::basin08();
        let basins = grid_population(&schema, 4, 4);
        let ranges = RangeTable::compute(&basins, &schema, 1);
        (schema, MemoryBasinStore::new(basins), ranges)
    }

    #[test]
    fn weights_sum_to_one_for_covered_region() {
        let (schema, store, ranges) = fixture();
        let region = RegionInput::Polygon(square_region(0.3, 0.3, 3.7, 3.7));
        let composite =
            aggregate(&store, &region, &schema, &ranges, &AggregateOptions::default()).unwrap();

        let wsum: f64 = composite.fragments.iter().map(|f| f.weight).sum();
        assert!((wsum - 1.0).abs() < 1e-6, "weights sum to {wsum}");
        assert_eq!(composite.fragments.len(), 16);
        assert!(composite.coverage_fraction > 0.999, "fully covered region");
        assert!(composite.warnings.is_empty());
    }

    #[test]
    fn whole_basin_region_degenerates_to_its_signature() {
        let (schema, store, ranges) = fixture();
        let basin = store.get(6).unwrap().clone();
        let expected = normalize(&basin.attrs, &schema, &ranges, BandSet::full()).unwrap();

        let region = RegionInput::Polygon(basin.geom.clone());
        let composite =
            aggregate(&store, &region, &schema, &ranges, &AggregateOptions::default()).unwrap();

        // Neighbouring basins only touch the boundary: zero-area clips.
        assert_eq!(composite.fragments.len(), 1);
        assert_eq!(composite.fragments[0].basin_id, 6);
        for (a, b) in composite.signature.values.iter().zip(expected.values.iter()) {
            assert!((a - b).abs() < 1e-9, "composite {a} vs normalized {b}");
        }
    }

    #[test]
    fn point_and_polygon_paths_agree() {
        let (schema, store, ranges) = fixture();
        let opts = AggregateOptions::default();

        let via_point = aggregate(
            &store,
            &RegionInput::Point(geo::Point::new(1.5, 2.5)),
            &schema,
            &ranges,
            &opts,
        )
        .unwrap();
        let basin_id = via_point.fragments[0].basin_id;
        let via_polygon = aggregate(
            &store,
            &RegionInput::Polygon(store.get(basin_id).unwrap().geom.clone()),
            &schema,
            &ranges,
            &opts,
        )
        .unwrap();

        assert_eq!(via_point.signature.values, via_polygon.signature.values);
    }

    #[test]
    fn sliver_fragments_are_dropped_and_reported() {
        let (schema, store, ranges) = fixture();
        // Region almost entirely inside basin 1, nudged 0.0005 deg into
        // basin 2: that strip is ~0.06% of the region, under the 0.1%
        // default threshold.
        let region = RegionInput::Polygon(square_region(0.2, 0.2, 1.0005, 1.0));
        let composite =
            aggregate(&store, &region, &schema, &ranges, &AggregateOptions::default()).unwrap();

        assert_eq!(composite.fragments.len(), 1);
        assert_eq!(composite.fragments[0].basin_id, 1);
        assert!(composite.warnings.contains(&Warning::SliversDropped { count: 1 }));

        // Lowering the threshold keeps the strip.
        let opts = AggregateOptions { sliver_fraction: 1e-5, ..AggregateOptions::default() };
        let composite = aggregate(&store, &region, &schema, &ranges, &opts).unwrap();
        assert_eq!(composite.fragments.len(), 2);
    }

    #[test]
    fn low_coverage_warns_but_succeeds() {
        let (schema, store, ranges) = fixture();
        // Half the region hangs off the west edge of the grid.
        let region = RegionInput::Polygon(square_region(-2.0, 0.0, 2.0, 2.0));
        let composite =
            aggregate(&store, &region, &schema, &ranges, &AggregateOptions::default()).unwrap();

        assert!(composite.coverage_fraction < 0.6);
        assert!(matches!(
            composite.warnings.iter().find(|w| matches!(w, Warning::LowCoverage { .. })),
            Some(Warning::LowCoverage { threshold, .. }) if *threshold == 0.8
        ));
        // Weights still sum to 1 over the covered part.
        let wsum: f64 = composite.fragments.iter().map(|f| f.weight).sum();
        assert!((wsum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn misaligned_basin_attributes_fail_instead_of_panicking() {
        let schema = Schema::basin08();
        let mut basins = grid_population(&schema, 2, 2);
        let ranges = RangeTable::compute(&basins, &schema, 1);
        // A dataset row with a truncated numeric vector.
        basins[1].attrs.numeric.truncate(3);
        let store = MemoryBasinStore::new(basins);

        let region = RegionInput::Polygon(square_region(0.2, 0.2, 1.8, 1.8));
        let err = aggregate(&store, &region, &schema, &ranges, &AggregateOptions::default())
            .unwrap_err();
        assert!(matches!(err, BasinError::UnknownField(_)));
    }

    #[test]
    fn disjoint_region_fails_with_empty_intersection() {
        let (schema, store, ranges) = fixture();
        let region = RegionInput::Polygon(square_region(50.0, 50.0, 51.0, 51.0));
        let err = aggregate(&store, &region, &schema, &ranges, &AggregateOptions::default())
            .unwrap_err();
        assert!(matches!(err, BasinError::EmptyIntersection(_)));
    }

    #[test]
    fn offshore_point_fails_with_no_coverage() {
        let (schema, store, ranges) = fixture();
        let err = aggregate(
            &store,
            &RegionInput::Point(geo::Point::new(-30.0, -30.0)),
            &schema,
            &ranges,
            &AggregateOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BasinError::NoCoverage { .. }));
    }

    #[test]
    fn zero_timeout_fails_without_partial_result() {
        let (schema, store, ranges) = fixture();
        let opts =
            AggregateOptions { timeout: Some(Duration::ZERO), ..AggregateOptions::default() };
        let region = RegionInput::Polygon(square_region(0.3, 0.3, 3.7, 3.7));
        let err = aggregate(&store, &region, &schema, &ranges, &opts).unwrap_err();
        assert!(matches!(err, BasinError::AggregationTimeout { candidates_done: 0, .. }));
    }

    #[test]
    fn categorical_composite_is_a_distribution() {
        let (schema, store, ranges) = fixture();
        let region = RegionInput::Polygon(square_region(0.0, 0.0, 4.0, 4.0));
        let composite =
            aggregate(&store, &region, &schema, &ranges, &AggregateOptions::default()).unwrap();

        // Each categorical block sums to 1 (every fragment carries a code).
        let names = schema.column_names(BandSet::full());
        for field in &schema.categorical {
            let block_sum: f64 = names
                .iter()
                .zip(composite.signature.values.iter())
                .filter(|(n, _)| n.starts_with(&format!("cat_{}_", field.code)))
                .map(|(_, &v)| v)
                .sum();
            assert!((block_sum - 1.0).abs() < 1e-9, "{}: {block_sum}", field.code);
        }
    }

    #[test]
    fn batch_matches_serial() {
        let (schema, store, ranges) = fixture();
        let opts = AggregateOptions::default();
        let regions = vec![
            RegionInput::Polygon(square_region(0.2, 0.2, 1.8, 1.8)),
            RegionInput::Point(geo::Point::new(2.5, 2.5)),
            RegionInput::Polygon(square_region(50.0, 50.0, 51.0, 51.0)),
        ];
        let batch = aggregate_batch(&store, &regions, &schema, &ranges, &opts);
        assert_eq!(batch.len(), 3);
        let serial = aggregate(&store, &regions[0], &schema, &ranges, &opts).unwrap();
        assert_eq!(batch[0].as_ref().unwrap().signature.values, serial.signature.values);
        assert!(batch[2].is_err());
    }
}
