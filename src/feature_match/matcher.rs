//! Binary descriptor matching under Hamming distance
//!
//! Cross-checked nearest-neighbor matching: a correspondence is accepted
//! only when the two descriptors are each other's mutual nearest neighbor,
//! which suppresses many-to-one spurious matches.

use super::detector::{DescriptorSet, Keypoint};
use super::region::Region;
use super::template::FeatureTemplate;

/// Tunable matching constants.
///
/// The distance cutoff and correspondence floor are hand-tuned separators
/// for the engine's 256-bit descriptors; they are configuration defaults,
/// not protocol constants, and should be re-tuned if the detector family
/// changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchTuning {
    /// Correspondences with Hamming distance below this count as "good"
    pub good_distance: u32,
    /// Fewer total correspondences than this is statistically unreliable
    /// and reported as "no match"
    pub min_correspondences: usize,
}

impl Default for MatchTuning {
    fn default() -> Self {
        Self {
            good_distance: 50,
            min_correspondences: 11,
        }
    }
}

/// One accepted correspondence between a template row and a frame row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Correspondence {
    pub template_idx: usize,
    pub frame_idx: usize,
    pub distance: u32,
}

/// Aggregate outcome of matching one template against one frame.
#[derive(Debug, Clone)]
pub struct MatchStats {
    /// Good-match fraction in [0.0, 1.0]
    pub confidence: f32,
    pub good_matches: usize,
    pub total_matches: usize,
    /// Sorted ascending by distance
    pub correspondences: Vec<Correspondence>,
}

/// Result of one match-loop cycle for one template; ephemeral, rebuilt every
/// tick and never persisted.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub template_name: String,
    pub confidence: f32,
    pub good_match_count: usize,
    /// Copied from the template, used only for overlay rendering
    pub region: Region,
    /// Keypoints detected on the current frame, for visualization
    pub frame_keypoints: Vec<Keypoint>,
}

pub fn hamming_distance(a: &[u8], b: &[u8]) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Match a template descriptor set against a frame descriptor set.
///
/// Returns `None` ("no match", not an error) when either side is missing,
/// empty, degenerate (a single row), or when fewer than
/// `tuning.min_correspondences` cross-checked correspondences survive.
pub fn match_descriptor_sets(
    template: Option<&DescriptorSet>,
    frame: Option<&DescriptorSet>,
    tuning: &MatchTuning,
) -> Option<MatchStats> {
    let template = template?;
    let frame = frame?;
    if template.rows() < 2 || frame.rows() < 2 {
        return None;
    }

    let forward = nearest_neighbors(template, frame);
    let backward = nearest_neighbors(frame, template);

    let mut correspondences: Vec<Correspondence> = forward
        .iter()
        .enumerate()
        .filter_map(|(template_idx, &(frame_idx, distance))| {
            // Cross-check: both sides must agree
            if backward[frame_idx].0 == template_idx {
                Some(Correspondence {
                    template_idx,
                    frame_idx,
                    distance,
                })
            } else {
                None
            }
        })
        .collect();

    correspondences.sort_by(|a, b| {
        a.distance
            .cmp(&b.distance)
            .then(a.template_idx.cmp(&b.template_idx))
    });

    let total_matches = correspondences.len();
    if total_matches < tuning.min_correspondences {
        return None;
    }

    let good_matches = correspondences
        .iter()
        .filter(|c| c.distance < tuning.good_distance)
        .count();

    Some(MatchStats {
        confidence: good_matches as f32 / total_matches as f32,
        good_matches,
        total_matches,
        correspondences,
    })
}

/// Match every template against one frame detection, keep those whose
/// confidence reaches the template's stored threshold (inclusive), and rank
/// them strongest-first.
pub fn rank_matches(
    templates: &[FeatureTemplate],
    frame_keypoints: &[Keypoint],
    frame_descriptors: Option<&DescriptorSet>,
    tuning: &MatchTuning,
) -> Vec<MatchResult> {
    let mut results: Vec<MatchResult> = templates
        .iter()
        .filter_map(|template| {
            let stats =
                match_descriptor_sets(Some(&template.descriptors), frame_descriptors, tuning)?;
            if stats.confidence >= template.confidence_threshold {
                Some(MatchResult {
                    template_name: template.name.clone(),
                    confidence: stats.confidence,
                    good_match_count: stats.good_matches,
                    region: template.region,
                    frame_keypoints: frame_keypoints.to_vec(),
                })
            } else {
                None
            }
        })
        .collect();

    results.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results
}

/// For each row of `from`, the index and distance of its nearest row in `to`.
/// Ties resolve to the lowest index so matching stays deterministic.
fn nearest_neighbors(from: &DescriptorSet, to: &DescriptorSet) -> Vec<(usize, u32)> {
    (0..from.rows())
        .map(|i| {
            let row = from.row(i);
            let mut best = (0, u32::MAX);
            for j in 0..to.rows() {
                let d = hamming_distance(row, to.row(j));
                if d < best.1 {
                    best = (j, d);
                }
            }
            best
        })
        .collect()
}
