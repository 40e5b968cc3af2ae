//! Feature template capture and matching engine
//!
//! Extracts compact rotation/scale-tolerant signatures (keypoints + binary
//! descriptors) from window regions, persists them in a size-optimized
//! portable form, and matches live captures against the stored library.

pub mod detector;
pub mod error;
pub mod matcher;
pub mod profile;
pub mod region;
pub mod template;

#[cfg(test)]
mod tests;

pub use detector::{DESCRIPTOR_WIDTH, DescriptorSet, FeatureDetector, Keypoint, SMALL_REGION_EDGE};
pub use error::{FeatureError, FeatureResult};
pub use matcher::{MatchResult, MatchStats, MatchTuning, match_descriptor_sets, rank_matches};
pub use profile::{DetectorProfile, ProfileRegistry};
pub use region::{Region, map_display_selection};
pub use template::{FORMAT_VERSION, FeatureTemplate, PortableTemplate, TemplateStore};
