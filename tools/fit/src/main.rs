//! Offline batch fit: ranges, matrix, standardization, PCA, k-means.
//! Writes the versioned artifact set consumed by the query path.

use anyhow::{Context, Result};
use clap::Parser;

use basin_core::artifacts::ArtifactSet;
use basin_core::matrix::{FeatureMatrix, Standardizer};
use basin_core::reduce::{kmeans, ClusterTable, KMeansOptions, Pca};
use basin_core::schema::{BandSet, Schema};
use basin_core::signature::RangeTable;
use basin_core::store::Basin;
use basin_core::synthetic::grid_population;

#[derive(Parser, Debug)]
#[command(name = "fit", about = "Fit normalization, projection and cluster artifacts over a basin population")]
struct Args {
    /// Basin dataset (JSON array of basins). Omit to run on a synthetic
    /// demo grid.
    #[arg(short, long)]
    basins: Option<String>,

    /// Output artifact file.
    #[arg(short, long, default_value = "artifacts.json")]
    out: String,

    /// Number of principal components.
    #[arg(long, default_value_t = 10)]
    components: usize,

    /// Number of clusters.
    #[arg(short, long, default_value_t = 20)]
    k: usize,

    /// Mini-batch size; omit for full-batch Lloyd iterations.
    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Version stamped on every produced artifact.
    #[arg(long, default_value_t = 1)]
    version: u32,

    /// Exclude anthropogenic (band D) fields from the feature space.
    #[arg(long)]
    historic: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let schema = Schema::basin08();

    let basins: Vec<Basin> = match &args.basins {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading basin dataset {path}"))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?
        }
        None => {
            eprintln!("No dataset given; fitting a 20x10 synthetic demo grid.");
            grid_population(&schema, 20, 10)
        }
    };
    eprintln!("Population: {} basins", basins.len());

    let bands = if args.historic { BandSet::historic() } else { BandSet::full() };

    let ranges = RangeTable::compute(&basins, &schema, args.version);
    let matrix = FeatureMatrix::build(&basins, &schema, &ranges, bands)?;
    eprintln!("Matrix: {} x {}", matrix.n_rows(), matrix.n_cols);

    let standardizer = Standardizer::fit(&matrix, args.version)?;
    if !standardizer.dropped.is_empty() {
        eprintln!(
            "Dropped {} zero-variance column(s): {}",
            standardizer.dropped.len(),
            standardizer.dropped.join(", ")
        );
    }
    let z = standardizer.transform(&matrix);

    let pca = Pca::fit(&z, args.components, args.seed, args.version)?;
    eprintln!(
        "PCA: {} components, {:.1}% variance explained",
        pca.n_components,
        100.0 * pca.total_explained()
    );
    let reduced = pca.project(&z);

    let opts = KMeansOptions {
        k: args.k,
        batch_size: args.batch_size,
        seed: args.seed,
        ..Default::default()
    };
    let result = kmeans(&reduced, &opts)?;
    if !result.converged {
        eprintln!(
            "Warning: k-means hit the iteration cap ({} iterations) without converging",
            result.iterations
        );
    }

    // Cluster report, largest first, characterized by the standardized
    // signature columns whose cluster means deviate most from the
    // population (population mean is 0 after z-scaling).
    let d = z.n_cols;
    let mut col_sums = vec![vec![0.0; d]; args.k];
    let mut sizes = vec![0usize; args.k];
    for (row, &label) in z.rows().zip(&result.labels) {
        let c = label as usize;
        sizes[c] += 1;
        for (s, &v) in col_sums[c].iter_mut().zip(row) {
            *s += v;
        }
    }
    let mut by_size: Vec<(usize, usize)> = sizes.into_iter().enumerate().collect();
    by_size.sort_by_key(|&(_, n)| std::cmp::Reverse(n));
    eprintln!("Cluster sizes (k = {}, inertia = {:.2}):", args.k, result.inertia);
    for (cluster, n) in by_size {
        let pct = 100.0 * n as f64 / result.labels.len() as f64;
        let traits = if n > 0 {
            let inv = 1.0 / n as f64;
            let mut means: Vec<(usize, f64)> =
                col_sums[cluster].iter().map(|s| s * inv).enumerate().collect();
            means.sort_by(|a, b| {
                b.1.abs().partial_cmp(&a.1.abs()).unwrap_or(std::cmp::Ordering::Equal)
            });
            means
                .iter()
                .take(3)
                .map(|&(j, m)| format!("{} {m:+.2}", z.columns[j]))
                .collect::<Vec<_>>()
                .join(", ")
        } else {
            "empty".to_string()
        };
        eprintln!("  cluster {cluster:2}: {n:6} basins ({pct:5.1}%)  {traits}");
    }

    let clusters = ClusterTable::from_result(&reduced, &result, args.version);
    let artifacts = ArtifactSet { ranges, standardizer, pca, clusters };

    let json = serde_json::to_string_pretty(&artifacts)?;
    std::fs::write(&args.out, json).with_context(|| format!("writing {}", args.out))?;
    eprintln!("Wrote artifact set v{} to {}", artifacts.version(), args.out);
    Ok(())
}
