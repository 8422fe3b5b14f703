//! Release metadata: quality profiles and title/year extraction

pub mod quality;
pub mod release_name;

pub use quality::{DvTier, DynamicRange, QualityProfile, Resolution};
pub use release_name::ReleaseName;
