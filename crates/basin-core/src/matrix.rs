//! Population feature matrices and column standardization.
//!
//! Rows are entities (basins, cities, composites), columns are the
//! expanded signature under a band selection. Standardization statistics
//! are fitted once on a population and persisted with the projection
//! basis, so later entities can be projected into the same space
//! without refitting.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{BasinError, Result};
use crate::schema::{BandSet, Schema};
use crate::signature::{normalize, RangeTable};
use crate::store::Basin;

/// A dense row-major matrix with entity ids and column names attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureMatrix {
    pub ids: Vec<u64>,
    pub columns: Vec<String>,
    pub n_cols: usize,
    data: Vec<f64>,
}

impl FeatureMatrix {
    pub fn from_rows(ids: Vec<u64>, columns: Vec<String>, rows: Vec<Vec<f64>>) -> Self {
        let n_cols = columns.len();
        let mut data = Vec::with_capacity(rows.len() * n_cols);
        for row in rows {
            debug_assert_eq!(row.len(), n_cols);
            data.extend_from_slice(&row);
        }
        FeatureMatrix { ids, columns, n_cols, data }
    }

    /// Normalize every basin of a population into one matrix.
    pub fn build(
        basins: &[Basin],
        schema: &Schema,
        ranges: &RangeTable,
        bands: BandSet,
    ) -> Result<Self> {
        let rows: Vec<Vec<f64>> = basins
            .par_iter()
            .map(|b| normalize(&b.attrs, schema, ranges, bands).map(|sig| sig.values))
            .collect::<Result<_>>()?;
        let ids = basins.iter().map(|b| b.id).collect();
        Ok(FeatureMatrix::from_rows(ids, schema.column_names(bands), rows))
    }

    pub fn n_rows(&self) -> usize {
        self.ids.len()
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n_cols..(i + 1) * self.n_cols]
    }

    /// Row position of an entity id.
    pub fn position(&self, id: u64) -> Option<usize> {
        self.ids.iter().position(|&x| x == id)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks_exact(self.n_cols)
    }
}

/// Per-column z-scaling parameters fitted on a population.
///
/// Zero-variance columns would turn into NaN under scaling; they are
/// detected at fit time, recorded in `dropped`, and excluded from the
/// transformed matrix. Fitting fails outright only when nothing is left.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Standardizer {
    pub version: u32,
    /// Indices (into the fitted matrix's columns) that survived.
    pub kept: Vec<usize>,
    /// Names of the zero-variance columns that were dropped.
    pub dropped: Vec<String>,
    mean: Vec<f64>,
    std: Vec<f64>,
}

/// Standard deviations below this count as zero variance.
const VAR_FLOOR: f64 = 1e-12;

impl Standardizer {
    pub fn fit(matrix: &FeatureMatrix, version: u32) -> Result<Self> {
        let n = matrix.n_rows();
        if n < 2 {
            return Err(BasinError::DegenerateInput { columns: matrix.columns.clone() });
        }

        let d = matrix.n_cols;
        let mut mean = vec![0.0; d];
        for row in matrix.rows() {
            for (m, &v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        for m in &mut mean {
            *m /= n as f64;
        }

        let mut var = vec![0.0; d];
        for row in matrix.rows() {
            for ((s, &v), &m) in var.iter_mut().zip(row).zip(&mean) {
                let dlt = v - m;
                *s += dlt * dlt;
            }
        }

        let mut kept = Vec::with_capacity(d);
        let mut dropped = Vec::new();
        let mut kept_mean = Vec::with_capacity(d);
        let mut kept_std = Vec::with_capacity(d);
        for j in 0..d {
            let std = (var[j] / n as f64).sqrt();
            if std < VAR_FLOOR {
                dropped.push(matrix.columns[j].clone());
            } else {
                kept.push(j);
                kept_mean.push(mean[j]);
                kept_std.push(std);
            }
        }

        if kept.is_empty() {
            return Err(BasinError::DegenerateInput { columns: dropped });
        }

        Ok(Standardizer { version, kept, dropped, mean: kept_mean, std: kept_std })
    }

    pub fn n_cols_out(&self) -> usize {
        self.kept.len()
    }

    /// z-scale one raw signature row into the fitted space.
    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        self.kept
            .iter()
            .enumerate()
            .map(|(out, &j)| (row[j] - self.mean[out]) / self.std[out])
            .collect()
    }

    /// z-scale a whole matrix, keeping ids and the surviving columns.
    pub fn transform(&self, matrix: &FeatureMatrix) -> FeatureMatrix {
        let columns = self.kept.iter().map(|&j| matrix.columns[j].clone()).collect();
        let rows = matrix.rows().map(|r| self.transform_row(r)).collect();
        FeatureMatrix::from_rows(matrix.ids.clone(), columns, rows)
    }
}
