//! Error taxonomy for the signature engine.
//!
//! Four families: input/config errors (unknown field, missing range,
//! unknown category, invalid k), geometric coverage errors (no containing
//! basin, empty intersection), numerical degeneracy (zero-variance
//! columns), and timeouts on oversized aggregation requests. Anything
//! non-fatal, like low coverage or a clustering run that hit the
//! iteration cap, is a field on a successful result, not an error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BasinError {
    /// A field code not present in the schema catalog.
    #[error("unknown field '{0}'")]
    UnknownField(String),

    /// A numeric field with no entry in the global range table.
    #[error("no normalization range for field '{0}' (range table v{1})")]
    MissingRange(String, u32),

    /// A categorical code outside the field's fixed enumeration.
    /// Signals schema drift in the source data; never silently dropped.
    #[error("unknown category code {code} for field '{field}'")]
    UnknownCategory { field: String, code: u16 },

    /// Compositional shares summing above 1 beyond tolerance.
    #[error("compositional field '{field}' sums to {sum:.6}, expected <= 1")]
    InvalidComposition { field: String, sum: f64 },

    /// An empty band selection, or one excluding every requested field.
    #[error("band selection matches no fields")]
    InvalidBandSelection,

    /// No basin polygon contains the query point.
    #[error("no basin covers point ({lon:.4}, {lat:.4})")]
    NoCoverage { lon: f64, lat: f64 },

    /// No basin overlaps the query region at all (or every overlap fell
    /// below the sliver threshold).
    #[error("no basin intersects the region ({0})")]
    EmptyIntersection(String),

    /// Aggregation exceeded the caller's deadline. Never accompanied by
    /// a partial composite.
    #[error("aggregation timed out after {elapsed_ms} ms ({candidates_done}/{candidates_total} candidates clipped)")]
    AggregationTimeout {
        elapsed_ms: u64,
        candidates_done: usize,
        candidates_total: usize,
    },

    /// Every column of the fit population had zero variance.
    #[error("degenerate input: {} zero-variance column(s), first: {}", .columns.len(), .columns.first().map(String::as_str).unwrap_or("-"))]
    DegenerateInput { columns: Vec<String> },

    /// Cluster count incompatible with the population size.
    #[error("invalid k = {k} for {n_rows} rows")]
    InvalidK { k: usize, n_rows: usize },

    /// Requested entity has no row in the population matrix.
    #[error("entity {0} not present in the population")]
    UnknownEntity(u64),

    /// Query vector width differing from the population's column count.
    #[error("query vector has {got} dimension(s), population has {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Component count incompatible with the matrix shape.
    #[error("invalid component count {n_components} for a {n_rows}x{n_cols} matrix")]
    InvalidComponents {
        n_components: usize,
        n_rows: usize,
        n_cols: usize,
    },

    /// Cluster write-back referencing a basin id the store does not hold.
    #[error("cluster table references unknown basin {0}")]
    UnknownBasin(u64),
}

pub type Result<T> = std::result::Result<T, BasinError>;
