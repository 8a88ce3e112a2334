//! k-means partitioning with k-means++ seeding and optional mini-batch
//! updates for the full ~190k-basin population.
//!
//! k is an external configuration choice, never derived here. A fixed
//! seed reproduces assignments byte for byte; label identities across
//! different seeds are arbitrary and carry no meaning. Hitting the
//! iteration cap is reported (`converged = false`), not discarded.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{BasinError, Result};
use crate::matrix::FeatureMatrix;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KMeansOptions {
    pub k: usize,
    /// Independent restarts; the run with lowest inertia wins.
    pub n_init: usize,
    pub max_iter: usize,
    /// Convergence: maximum centroid movement (L2) below this.
    pub tol: f64,
    /// Rows sampled per update step; `None` runs full-batch Lloyd.
    pub batch_size: Option<usize>,
    pub seed: u64,
}

impl Default for KMeansOptions {
    fn default() -> Self {
        KMeansOptions {
            k: 20,
            n_init: 10,
            max_iter: 300,
            tol: 1e-6,
            batch_size: None,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KMeansResult {
    pub labels: Vec<u32>,
    pub centroids: Vec<Vec<f64>>,
    /// Sum of squared distances of every row to its centroid.
    pub inertia: f64,
    /// Iterations used by the winning restart.
    pub iterations: usize,
    /// False when the winning restart hit the iteration cap.
    pub converged: bool,
    /// Per-row distance to the assigned centroid.
    pub distances: Vec<f64>,
}

/// One persisted assignment row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterEntry {
    pub id: u64,
    pub cluster: u32,
    pub distance: f64,
}

/// The versioned assignment artifact produced by the offline job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterTable {
    pub version: u32,
    pub k: usize,
    pub converged: bool,
    pub entries: Vec<ClusterEntry>,
}

impl ClusterTable {
    pub fn from_result(matrix: &FeatureMatrix, result: &KMeansResult, version: u32) -> Self {
        let entries = matrix
            .ids
            .iter()
            .zip(result.labels.iter())
            .zip(result.distances.iter())
            .map(|((&id, &cluster), &distance)| ClusterEntry { id, cluster, distance })
            .collect();
        ClusterTable {
            version,
            k: result.centroids.len(),
            converged: result.converged,
            entries,
        }
    }

    /// (id, cluster) pairs for the store write-back.
    pub fn labels(&self) -> Vec<(u64, u32)> {
        self.entries.iter().map(|e| (e.id, e.cluster)).collect()
    }
}

pub fn kmeans(matrix: &FeatureMatrix, opts: &KMeansOptions) -> Result<KMeansResult> {
    let n = matrix.n_rows();
    if opts.k == 0 || opts.k > n {
        return Err(BasinError::InvalidK { k: opts.k, n_rows: n });
    }

    let mut best: Option<KMeansResult> = None;
    for init in 0..opts.n_init.max(1) {
        // Distinct deterministic stream per restart.
        let mut rng = StdRng::seed_from_u64(opts.seed.wrapping_add(init as u64));
        let run = run_once(matrix, opts, &mut rng);
        if best.as_ref().map_or(true, |b| run.inertia < b.inertia) {
            best = Some(run);
        }
    }
    // n_init >= 1, so best is always set.
    Ok(best.expect("at least one restart"))
}

fn run_once(matrix: &FeatureMatrix, opts: &KMeansOptions, rng: &mut StdRng) -> KMeansResult {
    let mut centroids = plus_plus_init(matrix, opts.k, rng);

    let mut iterations = 0;
    let mut converged = false;
    while iterations < opts.max_iter {
        iterations += 1;
        let movement = match opts.batch_size {
            None => lloyd_step(matrix, &mut centroids),
            Some(batch) => minibatch_step(matrix, &mut centroids, batch, iterations, rng),
        };
        if movement < opts.tol {
            converged = true;
            break;
        }
    }

    // Final full assignment pass (also labels the rows a mini-batch
    // iteration never sampled).
    let (labels, distances) = assign(matrix, &centroids);
    let inertia = distances.iter().map(|d| d * d).sum();

    KMeansResult { labels, centroids, inertia, iterations, converged, distances }
}

/// k-means++ seeding: first centre uniform, each next centre drawn with
/// probability proportional to squared distance from the chosen set.
fn plus_plus_init(matrix: &FeatureMatrix, k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let n = matrix.n_rows();
    let mut centroids: Vec<Vec<f64>> = Vec::with_capacity(k);
    centroids.push(matrix.row(rng.gen_range(0..n)).to_vec());

    let mut sq_dist: Vec<f64> = (0..n)
        .map(|i| squared_distance(matrix.row(i), &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = sq_dist.iter().sum();
        let next = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = n - 1;
            for (i, &d) in sq_dist.iter().enumerate() {
                target -= d;
                if target <= 0.0 {
                    chosen = i;
                    break;
                }
            }
            chosen
        } else {
            // All remaining mass at the chosen centres (duplicates).
            rng.gen_range(0..n)
        };
        let centre = matrix.row(next).to_vec();
        for i in 0..n {
            sq_dist[i] = sq_dist[i].min(squared_distance(matrix.row(i), &centre));
        }
        centroids.push(centre);
    }
    centroids
}

/// One full Lloyd iteration. Returns the maximum centroid movement.
fn lloyd_step(matrix: &FeatureMatrix, centroids: &mut Vec<Vec<f64>>) -> f64 {
    let (labels, _) = assign(matrix, centroids);
    let d = matrix.n_cols;
    let k = centroids.len();

    let mut sums = vec![vec![0.0; d]; k];
    let mut counts = vec![0usize; k];
    for (i, row) in matrix.rows().enumerate() {
        let c = labels[i] as usize;
        counts[c] += 1;
        for (s, &v) in sums[c].iter_mut().zip(row) {
            *s += v;
        }
    }

    let mut movement = 0.0f64;
    for c in 0..k {
        if counts[c] == 0 {
            // Empty cluster keeps its centre.
            continue;
        }
        let inv = 1.0 / counts[c] as f64;
        let mut shift = 0.0;
        for (old, s) in centroids[c].iter_mut().zip(&sums[c]) {
            let new = s * inv;
            shift += (new - *old) * (new - *old);
            *old = new;
        }
        movement = movement.max(shift.sqrt());
    }
    movement
}

/// One mini-batch update: sample rows, assign, move each sampled centre
/// toward its batch mean by a per-centre learning rate that decays with
/// the running count.
fn minibatch_step(
    matrix: &FeatureMatrix,
    centroids: &mut Vec<Vec<f64>>,
    batch_size: usize,
    iteration: usize,
    rng: &mut StdRng,
) -> f64 {
    let n = matrix.n_rows();
    let k = centroids.len();
    let d = matrix.n_cols;
    let batch: Vec<usize> = (0..batch_size.min(n)).map(|_| rng.gen_range(0..n)).collect();

    let mut sums = vec![vec![0.0; d]; k];
    let mut counts = vec![0usize; k];
    for &i in &batch {
        let row = matrix.row(i);
        let (c, _) = nearest_centroid(row, centroids);
        counts[c] += 1;
        for (s, &v) in sums[c].iter_mut().zip(row) {
            *s += v;
        }
    }

    // Decaying step size: proxies the per-centre count accumulated over
    // the iterations seen so far.
    let mut movement = 0.0f64;
    for c in 0..k {
        if counts[c] == 0 {
            continue;
        }
        let eta = 1.0 / (1.0 + (iteration * counts[c]) as f64).sqrt();
        let inv = 1.0 / counts[c] as f64;
        let mut shift = 0.0;
        for (old, s) in centroids[c].iter_mut().zip(&sums[c]) {
            let target = s * inv;
            let new = *old + eta * (target - *old);
            shift += (new - *old) * (new - *old);
            *old = new;
        }
        movement = movement.max(shift.sqrt());
    }
    movement
}

/// Assign every row to its nearest centroid. Row-parallel; per-row work
/// is independent, so the output is identical to the serial pass.
fn assign(matrix: &FeatureMatrix, centroids: &[Vec<f64>]) -> (Vec<u32>, Vec<f64>) {
    let pairs: Vec<(u32, f64)> = (0..matrix.n_rows())
        .into_par_iter()
        .map(|i| {
            let (c, sq) = nearest_centroid(matrix.row(i), centroids);
            (c as u32, sq.sqrt())
        })
        .collect();
    pairs.into_iter().unzip()
}

fn nearest_centroid(row: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    let mut best = 0;
    let mut best_sq = f64::INFINITY;
    for (c, centre) in centroids.iter().enumerate() {
        let sq = squared_distance(row, centre);
        if sq < best_sq {
            best_sq = sq;
            best = c;
        }
    }
    (best, best_sq)
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two tight blobs far apart in 2-D.
    fn two_blob_matrix() -> FeatureMatrix {
        let mut rows = Vec::new();
        let mut ids = Vec::new();
        for i in 0..40u64 {
            let jitter = (i % 5) as f64 * 0.01;
            let (cx, cy) = if i < 20 { (0.0, 0.0) } else { (10.0, 10.0) };
            rows.push(vec![cx + jitter, cy - jitter]);
            ids.push(i + 1);
        }
        FeatureMatrix::from_rows(ids, vec!["x".to_string(), "y".to_string()], rows)
    }

    #[test]
    fn two_blobs_separate_cleanly() {
        let m = two_blob_matrix();
        let opts = KMeansOptions { k: 2, ..Default::default() };
        let result = kmeans(&m, &opts).unwrap();

        assert!(result.converged);
        let first = result.labels[0];
        assert!(result.labels[..20].iter().all(|&l| l == first));
        assert!(result.labels[20..].iter().all(|&l| l != first));
        // Tight blobs: every row sits close to its centre.
        assert!(result.distances.iter().all(|&d| d < 0.1));
    }

    #[test]
    fn fixed_seed_reproduces_assignments_exactly() {
        let m = two_blob_matrix();
        let opts = KMeansOptions { k: 3, seed: 99, ..Default::default() };
        let a = kmeans(&m, &opts).unwrap();
        let b = kmeans(&m, &opts).unwrap();
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.centroids, b.centroids);
        assert_eq!(a.inertia, b.inertia);
    }

    #[test]
    fn minibatch_also_separates_and_reproduces() {
        let m = two_blob_matrix();
        let opts =
            KMeansOptions { k: 2, batch_size: Some(16), max_iter: 50, ..Default::default() };
        let a = kmeans(&m, &opts).unwrap();
        let b = kmeans(&m, &opts).unwrap();
        assert_eq!(a.labels, b.labels);

        let first = a.labels[0];
        assert!(a.labels[..20].iter().all(|&l| l == first));
        assert!(a.labels[20..].iter().all(|&l| l != first));
    }

    #[test]
    fn iteration_cap_reports_non_convergence() {
        let m = two_blob_matrix();
        // tol = 0 can never be undercut, so the cap always hits.
        let opts = KMeansOptions { k: 2, max_iter: 3, tol: 0.0, ..Default::default() };
        let result = kmeans(&m, &opts).unwrap();
        assert!(!result.converged);
        assert_eq!(result.iterations, 3);
    }

    #[test]
    fn invalid_k_fails() {
        let m = two_blob_matrix();
        let opts = KMeansOptions { k: 0, ..Default::default() };
        assert!(matches!(kmeans(&m, &opts).unwrap_err(), BasinError::InvalidK { .. }));
        let opts = KMeansOptions { k: 41, ..Default::default() };
        assert!(matches!(kmeans(&m, &opts).unwrap_err(), BasinError::InvalidK { .. }));
    }

    #[test]
    fn cluster_table_carries_ids_and_distances() {
        let m = two_blob_matrix();
        let opts = KMeansOptions { k: 2, ..Default::default() };
        let result = kmeans(&m, &opts).unwrap();
        let table = ClusterTable::from_result(&m, &result, 5);

        assert_eq!(table.version, 5);
        assert_eq!(table.k, 2);
        assert_eq!(table.entries.len(), 40);
        assert_eq!(table.entries[0].id, 1);
        assert_eq!(table.labels().len(), 40);
    }
}
