//! Query-side overlay: aggregate an area-weighted composite signature
//! for a point or bounding box over a basin dataset.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use geo::Point;

use basin_core::aggregate::{aggregate, AggregateOptions, RegionInput, Warning};
use basin_core::schema::{BandSet, Schema};
use basin_core::signature::RangeTable;
use basin_core::store::{Basin, MemoryBasinStore};
use basin_core::synthetic::{grid_population, square_region};

#[derive(Parser, Debug)]
#[command(name = "overlay", about = "Aggregate a composite environmental signature for a point or region")]
struct Args {
    /// Basin dataset (JSON array of basins). Omit to query a synthetic
    /// demo grid.
    #[arg(short, long)]
    basins: Option<String>,

    /// Point query longitude (requires --lat).
    #[arg(long, allow_hyphen_values = true)]
    lon: Option<f64>,

    /// Point query latitude (requires --lon).
    #[arg(long, allow_hyphen_values = true)]
    lat: Option<f64>,

    /// Region query as "lon0,lat0,lon1,lat1".
    #[arg(long)]
    bbox: Option<String>,

    /// Restrict to the physiographic, hydro-climatic and bioclimatic
    /// bands (drop anthropogenic fields).
    #[arg(long)]
    historic: bool,

    /// Fragments below this fraction of the region area are dropped.
    #[arg(long, default_value_t = 1e-3)]
    sliver_fraction: f64,

    /// Warn when covered area falls below this fraction of the region.
    #[arg(long, default_value_t = 0.8)]
    coverage_warn: f64,

    /// Abort aggregation after this many milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Print the normalized signature vector as well.
    #[arg(long)]
    full: bool,
}

fn parse_bbox(s: &str) -> Result<RegionInput> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>().context("bbox values must be numeric"))
        .collect::<Result<_>>()?;
    if parts.len() != 4 {
        bail!("--bbox expects four comma-separated values, got {}", parts.len());
    }
    Ok(RegionInput::Polygon(square_region(parts[0], parts[1], parts[2], parts[3])))
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
            eprintln!("No dataset given; querying a 20x10 synthetic demo grid.");
            grid_population(&schema, 20, 10)
        }
    };
    let ranges = RangeTable::compute(&basins, &schema, 1);
    let store = MemoryBasinStore::new(basins);

    let region = match (args.lon, args.lat, &args.bbox) {
        (Some(lon), Some(lat), None) => RegionInput::Point(Point::new(lon, lat)),
        (None, None, Some(bbox)) => parse_bbox(bbox)?,
        _ => bail!("give either --lon and --lat, or --bbox"),
    };

    let opts = AggregateOptions {
        bands: if args.historic { BandSet::historic() } else { BandSet::full() },
        sliver_fraction: args.sliver_fraction,
        coverage_warn: args.coverage_warn,
        timeout: args.timeout_ms.map(Duration::from_millis),
    };

    let composite = aggregate(&store, &region, &schema, &ranges, &opts)?;

    for warning in &composite.warnings {
        match warning {
            Warning::LowCoverage { coverage_fraction, threshold } => eprintln!(
                "Warning: only {:.1}% of the region lies on basin coverage (threshold {:.0}%)",
                100.0 * coverage_fraction,
                100.0 * threshold
            ),
            Warning::SliversDropped { count } => {
                eprintln!("Warning: dropped {count} sliver fragment(s)")
            }
        }
    }

    println!(
        "Composite over {} fragment(s), coverage {:.1}%",
        composite.fragments.len(),
        100.0 * composite.coverage_fraction
    );
    for fragment in &composite.fragments {
        println!(
            "  basin {:>8}  weight {:6.3}  area {:14.0} m2",
            fragment.basin_id, fragment.weight, fragment.area_m2
        );
    }

    println!("\nRaw field values (area-weighted means, native units):");
    let selected = schema.numeric.iter().filter(|f| opts.bands.contains(f.band));
    for (field, value) in selected.zip(composite.raw_numeric.iter()) {
        match value {
            Some(v) => println!("  {:<14} {:10.3}  {}", field.code, v, field.label),
            None => println!("  {:<14} {:>10}  {}", field.code, "missing", field.label),
        }
    }

    if args.full {
        println!("\nNormalized signature ({} columns):", composite.signature.values.len());
        for (name, value) in schema
            .column_names(opts.bands)
            .iter()
            .zip(composite.signature.values.iter())
        {
            println!("  {name:<16} {value:.4}");
        }
    }

    Ok(())
}
