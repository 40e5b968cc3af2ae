//! Detector tuning profiles
//!
//! A profile is a named preset trading recall for speed: dense small levels
//! for tiny icons, coarse pyramids for large window regions. The built-in
//! catalog covers the common cases; operators can register their own presets
//! at runtime without touching the low-level parameters elsewhere.

use serde::{Deserialize, Serialize};

use super::error::{FeatureError, FeatureResult};

/// Named, immutable parameter set for the keypoint detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorProfile {
    pub name: String,
    pub description: String,
    /// Maximum keypoints retained per detection
    pub feature_count: usize,
    /// Pyramid downscale ratio, must be > 1.0
    pub scale_factor: f32,
    /// Number of pyramid levels, >= 1
    pub pyramid_levels: u32,
    /// Keypoints closer than this to the image border are not described
    pub edge_threshold: u32,
    /// Support-region diameter used for orientation and descriptor sampling
    pub patch_size: u32,
    /// FAST corner intensity threshold
    pub fast_threshold: u8,
}

impl DetectorProfile {
    /// Generic preset for typical window content
    pub fn standard() -> Self {
        Self {
            name: "standard".to_string(),
            description: "General-purpose preset for full window captures".to_string(),
            feature_count: 1000,
            scale_factor: 1.2,
            pyramid_levels: 8,
            edge_threshold: 15,
            patch_size: 31,
            fast_threshold: 20,
        }
    }

    /// Tuned for ~25-50 px UI icons: shallow pyramid, small patches,
    /// permissive corner threshold
    pub fn small_icon() -> Self {
        Self {
            name: "small_icon".to_string(),
            description: "Small UI icons around 25-50 px".to_string(),
            feature_count: 500,
            scale_factor: 1.15,
            pyramid_levels: 4,
            edge_threshold: 7,
            patch_size: 15,
            fast_threshold: 10,
        }
    }

    /// Tuned for regions of 100 px and up
    pub fn large_region() -> Self {
        Self {
            name: "large_region".to_string(),
            description: "Large regions of 100 px and up".to_string(),
            feature_count: 1500,
            scale_factor: 1.3,
            pyramid_levels: 8,
            edge_threshold: 15,
            patch_size: 31,
            fast_threshold: 20,
        }
    }

    /// Tuned for text-dense regions where corners are abundant but weak
    pub fn text_dense() -> Self {
        Self {
            name: "text_dense".to_string(),
            description: "Text-heavy regions with many weak corners".to_string(),
            feature_count: 800,
            scale_factor: 1.1,
            pyramid_levels: 3,
            edge_threshold: 7,
            patch_size: 15,
            fast_threshold: 7,
        }
    }
}

/// Ordered catalog of detector profiles, built-in presets first.
///
/// Changing the current profile bumps a generation counter; engines built
/// from an older generation are stale and must be rebuilt by the caller.
pub struct ProfileRegistry {
    profiles: Vec<DetectorProfile>,
    current: usize,
    generation: u64,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self {
            profiles: vec![
                DetectorProfile::standard(),
                DetectorProfile::small_icon(),
                DetectorProfile::large_region(),
                DetectorProfile::text_dense(),
            ],
            current: 0,
            generation: 0,
        }
    }

    pub fn select(&self, name: &str) -> Option<&DetectorProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Append a user profile; built-in profiles are never removed.
    pub fn register(&mut self, profile: DetectorProfile) -> FeatureResult<()> {
        if self.profiles.iter().any(|p| p.name == profile.name) {
            return Err(FeatureError::DuplicateProfileName(profile.name));
        }
        self.profiles.push(profile);
        Ok(())
    }

    pub fn current(&self) -> &DetectorProfile {
        &self.profiles[self.current]
    }

    /// Switch the active profile. Returns the newly current profile, or
    /// `None` (and no change) if the name is unknown.
    pub fn set_current(&mut self, name: &str) -> Option<&DetectorProfile> {
        let idx = self.profiles.iter().position(|p| p.name == name)?;
        self.current = idx;
        self.generation += 1;
        Some(&self.profiles[idx])
    }

    /// Generation of the current profile; engines record this at build time.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn names(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::new()
    }
}
