//! Offline batch machinery: PCA projection and k-means partitioning
//! over a standardized population matrix.

mod kmeans;
mod pca;

pub use kmeans::{kmeans, ClusterEntry, ClusterTable, KMeansOptions, KMeansResult};
pub use pca::Pca;
