//! Principal-component projection of a standardized population matrix.
//!
//! The leading eigenpairs of the column covariance are extracted by
//! power iteration with deflation; d is at most a few thousand, so a
//! dense d×d covariance is affordable while n (up to ~190k rows) only
//! enters the one accumulation pass. Component signs are fixed so a
//! given seed and matrix always reproduce the same basis.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{BasinError, Result};
use crate::matrix::FeatureMatrix;

const POWER_TOL: f64 = 1e-10;
const POWER_MAX_ITER: usize = 1_000;

/// A fitted projection basis, persisted alongside the standardizer that
/// produced its input space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pca {
    pub version: u32,
    pub n_components: usize,
    /// Row-major components, each of the input width, unit length.
    pub components: Vec<Vec<f64>>,
    /// Eigenvalue per component.
    pub explained_variance: Vec<f64>,
    /// Fraction of total variance per component, ordered descending.
    pub explained_ratio: Vec<f64>,
}

impl Pca {
    /// Fit the leading `n_components` principal components.
    pub fn fit(matrix: &FeatureMatrix, n_components: usize, seed: u64, version: u32) -> Result<Self> {
        let n = matrix.n_rows();
        let d = matrix.n_cols;
        if n_components == 0 || n_components > d || n < 2 {
            return Err(BasinError::InvalidComponents { n_components, n_rows: n, n_cols: d });
        }

        // Column means (near zero for standardized input, but centering
        // here keeps fit valid for any matrix).
        let mut mean = vec![0.0; d];
        for row in matrix.rows() {
            for (m, &v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        for m in &mut mean {
            *m /= n as f64;
        }

        // Covariance C = Xc' Xc / (n - 1).
        let mut cov = vec![0.0; d * d];
        for row in matrix.rows() {
            for i in 0..d {
                let vi = row[i] - mean[i];
                for j in i..d {
                    cov[i * d + j] += vi * (row[j] - mean[j]);
                }
            }
        }
        let denom = (n - 1) as f64;
        for i in 0..d {
            for j in i..d {
                let v = cov[i * d + j] / denom;
                cov[i * d + j] = v;
                cov[j * d + i] = v;
            }
        }
        let total_variance: f64 = (0..d).map(|i| cov[i * d + i]).sum();

        let mut components = Vec::with_capacity(n_components);
        let mut explained_variance = Vec::with_capacity(n_components);
        let mut rng = StdRng::seed_from_u64(seed);

        for _ in 0..n_components {
            let (eigval, eigvec) = leading_eigenpair(&cov, d, &mut rng);
            // Deflate: C <- C - lambda v v'.
            for i in 0..d {
                for j in 0..d {
                    cov[i * d + j] -= eigval * eigvec[i] * eigvec[j];
                }
            }
            explained_variance.push(eigval.max(0.0));
            components.push(eigvec);
        }

        let explained_ratio = explained_variance
            .iter()
            .map(|&ev| if total_variance > 0.0 { ev / total_variance } else { 0.0 })
            .collect();

        Ok(Pca { version, n_components, components, explained_variance, explained_ratio })
    }

    /// Cumulative variance fraction explained by the full basis.
    pub fn total_explained(&self) -> f64 {
        self.explained_ratio.iter().sum()
    }

    /// Project one row (in the fitted input space) onto the basis.
    pub fn project_row(&self, row: &[f64]) -> Vec<f64> {
        self.components
            .iter()
            .map(|c| c.iter().zip(row).map(|(a, b)| a * b).sum())
            .collect()
    }

    /// Project a whole matrix; columns become `pc_1..pc_k`.
    pub fn project(&self, matrix: &FeatureMatrix) -> FeatureMatrix {
        let columns = (1..=self.n_components).map(|i| format!("pc_{i}")).collect();
        let rows = matrix.rows().map(|r| self.project_row(r)).collect();
        FeatureMatrix::from_rows(matrix.ids.clone(), columns, rows)
    }
}

/// Power iteration for the dominant eigenpair of a symmetric matrix.
/// The start vector is drawn from `rng`; the returned vector's sign is
/// fixed by its largest-magnitude coefficient so runs are reproducible.
fn leading_eigenpair(cov: &[f64], d: usize, rng: &mut StdRng) -> (f64, Vec<f64>) {
    let mut v: Vec<f64> = (0..d).map(|_| rng.gen::<f64>() - 0.5).collect();
    normalize_in_place(&mut v);

    let mut eigval = 0.0;
    for _ in 0..POWER_MAX_ITER {
        // w = C v
        let mut w = vec![0.0; d];
        for i in 0..d {
            let row = &cov[i * d..(i + 1) * d];
            w[i] = row.iter().zip(&v).map(|(a, b)| a * b).sum();
        }
        let norm = normalize_in_place(&mut w);
        let delta = (norm - eigval).abs();
        eigval = norm;
        v = w;
        if delta < POWER_TOL * eigval.max(1.0) {
            break;
        }
    }

    // Sign convention: largest-magnitude coefficient positive.
    let pivot = v
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.abs().partial_cmp(&b.abs()).unwrap())
        .map(|(i, _)| i)
        .unwrap_or(0);
    if v[pivot] < 0.0 {
        for x in &mut v {
            *x = -*x;
        }
    }

    (eigval, v)
}

fn normalize_in_place(v: &mut [f64]) -> f64 {
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    norm
}
