//! Standardized environmental signatures for Earth-surface locations
//! and regions, aggregated from a catalog of hydrological sub-basin
//! attributes.
//!
//! The pipeline: a basin store (immutable reference polygons with raw
//! attributes) feeds the signature normalizer (global min/max ranges,
//! unit-scaled vectors organized into persistence bands); the areal
//! aggregator composes area-weighted signatures for arbitrary points
//! and polygons; the offline reducer standardizes a population matrix,
//! projects it (PCA) and partitions it (k-means); the similarity engine
//! ranks entities in either space at query time against the persisted,
//! versioned batch artifacts.

pub mod aggregate;
pub mod artifacts;
pub mod error;
pub mod matrix;
pub mod reduce;
pub mod region;
pub mod schema;
pub mod signature;
pub mod similar;
pub mod store;
pub mod synthetic;

pub use aggregate::{aggregate, aggregate_batch, AggregateOptions, Composite, RegionInput};
pub use error::{BasinError, Result};
pub use matrix::{FeatureMatrix, Standardizer};
pub use reduce::{kmeans, ClusterTable, KMeansOptions, KMeansResult, Pca};
pub use schema::{Band, BandSet, Schema};
pub use signature::{normalize, RangeTable, Signature};
pub use similar::{nearest, Metric, Query};
pub use store::{Basin, BasinStore, MemoryBasinStore};
