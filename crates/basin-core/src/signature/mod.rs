//! Signature construction: global normalization ranges and the
//! raw-attributes → unit-scaled-vector mapping.

mod normalize;
mod ranges;

pub use normalize::{column_index, normalize, Signature};
pub(crate) use normalize::unit_scale;
pub use ranges::RangeTable;
