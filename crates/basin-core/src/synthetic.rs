//! Synthetic basin populations.
//!
//! Deterministic square-basin grids with smooth west-to-east attribute
//! gradients. Used by the test suite as a fixture with known geometry
//! (every basin is an axis-aligned square, so intersection areas have
//! closed-form expectations) and by the tools as a demo dataset when no
//! real basin layer is at hand.

use geo::{Coord, LineString, MultiPolygon, Polygon};

use crate::schema::{RawAttributes, Schema};
use crate::store::Basin;

/// Axis-aligned rectangle as a single-polygon multi-polygon.
pub fn square_region(lon0: f64, lat0: f64, lon1: f64, lat1: f64) -> MultiPolygon<f64> {
    let ring = LineString::from(vec![
        Coord { x: lon0, y: lat0 },
        Coord { x: lon1, y: lat0 },
        Coord { x: lon1, y: lat1 },
        Coord { x: lon0, y: lat1 },
        Coord { x: lon0, y: lat0 },
    ]);
    MultiPolygon::new(vec![Polygon::new(ring, vec![])])
}

/// Raw attributes at a location: every numeric field carries a linear
/// west-to-east gradient (so no column is constant over a grid), the
/// share block concentrates on an id-dependent class, and categorical
/// codes cycle through their enumerations.
pub fn attrs_at(schema: &Schema, id: u64, lon: f64, lat: f64) -> RawAttributes {
    let numeric = (0..schema.numeric.len())
        .map(|i| {
            let base = (i as f64 + 1.0) * 10.0;
            Some(base + (i as f64 + 1.0) * lon + 0.5 * lat)
        })
        .collect();

    let n_shares = schema.n_shares();
    let mut shares = vec![0.0; n_shares];
    if n_shares > 0 {
        shares[id as usize % n_shares] = 0.6;
        shares[0] += 0.3;
    }

    let categorical = schema
        .categorical
        .iter()
        .map(|f| {
            let n = f.width() as u64;
            (1 + id % n) as u16
        })
        .collect();

    RawAttributes { numeric, shares, categorical }
}

/// One square basin with attributes sampled at its centre.
pub fn square_basin(schema: &Schema, id: u64, lon0: f64, lat0: f64, size: f64) -> Basin {
    let (cx, cy) = (lon0 + size / 2.0, lat0 + size / 2.0);
    Basin {
        id,
        attrs: attrs_at(schema, id, cx, cy),
        geom: square_region(lon0, lat0, lon0 + size, lat0 + size),
        cluster_id: None,
    }
}

/// An `nx` x `ny` grid of unit squares anchored at the origin,
/// ids 1..=nx*ny assigned west to east, then south to north.
pub fn grid_population(schema: &Schema, nx: usize, ny: usize) -> Vec<Basin> {
    let mut basins = Vec::with_capacity(nx * ny);
    let mut id = 1;
    for row in 0..ny {
        for col in 0..nx {
            basins.push(square_basin(schema, id, col as f64, row as f64, 1.0));
            id += 1;
        }
    }
    basins
}
