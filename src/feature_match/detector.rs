//! Keypoint detection and binary descriptor extraction
//!
//! Multi-scale FAST corners with intensity-centroid orientation and a
//! rotation-steered 256-bit BRIEF descriptor. Detection is fully
//! deterministic for a fixed profile and input buffer: corner scan order,
//! suppression, and retention all use total orderings with explicit
//! tie-breaks, and the test-pair pattern is a fixed table.

use image::{GrayImage, imageops};
use imageproc::contrast::equalize_histogram;
use imageproc::corners::corners_fast9;

use super::error::{FeatureError, FeatureResult};
use super::profile::DetectorProfile;
use super::region::Region;

/// Fixed binary descriptor width in bytes (256 bits).
pub const DESCRIPTOR_WIDTH: usize = 32;

/// Regions with either dimension at or below this get a local-contrast
/// enhancement pre-pass; small UI icons otherwise yield too few stable
/// corners.
pub const SMALL_REGION_EDGE: u32 = 60;

/// Tile edge for the local histogram equalization pre-pass.
const EQUALIZE_TILE: u32 = 8;

/// Smallest pyramid level edge worth detecting on.
const MIN_LEVEL_EDGE: u32 = 12;

/// Cell edge for corner suppression; one corner survives per cell at each
/// pyramid level, so corners on a tighter pitch than this still all survive
/// as long as they land in distinct cells.
const SUPPRESSION_CELL: f32 = 4.0;

/// A detected point of interest, in source-image pixel coordinates.
///
/// Only `x`, `y`, `size`, and `angle` survive serialization; `response` and
/// `octave` are transient detection data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Support-region diameter in source-image pixels
    pub size: f32,
    /// Dominant orientation in degrees, -1.0 if undefined
    pub angle: f32,
    pub response: f32,
    pub octave: u32,
}

/// Fixed-width binary descriptor rows, one per keypoint.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorSet {
    data: Vec<u8>,
    rows: usize,
}

impl DescriptorSet {
    pub fn from_raw(data: Vec<u8>, rows: usize, cols: usize) -> Result<Self, String> {
        if cols != DESCRIPTOR_WIDTH {
            return Err(format!(
                "descriptor width {cols} does not match engine width {DESCRIPTOR_WIDTH}"
            ));
        }
        if data.len() != rows * cols {
            return Err(format!(
                "descriptor buffer holds {} bytes, shape says {rows}x{cols}",
                data.len()
            ));
        }
        Ok(Self { data, rows })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        DESCRIPTOR_WIDTH
    }

    pub fn row(&self, i: usize) -> &[u8] {
        &self.data[i * DESCRIPTOR_WIDTH..(i + 1) * DESCRIPTOR_WIDTH]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    fn push_row(&mut self, row: &[u8; DESCRIPTOR_WIDTH]) {
        self.data.extend_from_slice(row);
        self.rows += 1;
    }

    fn empty() -> Self {
        Self {
            data: Vec::new(),
            rows: 0,
        }
    }
}

/// Configured detector instance, built from one profile.
///
/// Instances are cheap to build; callers rebuild whenever the registry's
/// current profile changes (the generation tag identifies stale instances).
pub struct FeatureDetector {
    profile: DetectorProfile,
    generation: u64,
}

impl FeatureDetector {
    pub fn new(profile: DetectorProfile) -> Self {
        Self::with_generation(profile, 0)
    }

    pub fn with_generation(profile: DetectorProfile, generation: u64) -> Self {
        Self {
            profile,
            generation,
        }
    }

    pub fn profile(&self) -> &DetectorProfile {
        &self.profile
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Detect keypoints and extract descriptors, optionally constrained to a
    /// rectangular sub-window (clamped to image bounds).
    ///
    /// Zero keypoints yields `(vec![], None)` -- not an error. Keypoints
    /// without a single describable patch yield `(keypoints, None)`; callers
    /// that require descriptors must check for both cases.
    pub fn detect(
        &self,
        image: &GrayImage,
        region: Option<Region>,
    ) -> FeatureResult<(Vec<Keypoint>, Option<DescriptorSet>)> {
        let region = match region {
            Some(r) => r.clamp_to(image.width(), image.height())?,
            None => Region::full(image.width(), image.height()),
        };
        if region.area() == 0 {
            return Err(FeatureError::InvalidRegion {
                x: region.x,
                y: region.y,
                width: region.width,
                height: region.height,
                image_width: image.width(),
                image_height: image.height(),
            });
        }

        let mut patch =
            imageops::crop_imm(image, region.x, region.y, region.width, region.height).to_image();

        if needs_contrast_boost(&region) {
            patch = equalize_tiles(&patch, EQUALIZE_TILE);
        }

        let (mut keypoints, descriptors) = self.detect_in_patch(&patch);

        // Report keypoints in full-image coordinates
        for kp in &mut keypoints {
            kp.x += region.x as f32;
            kp.y += region.y as f32;
        }

        Ok((keypoints, descriptors))
    }

    fn detect_in_patch(&self, patch: &GrayImage) -> (Vec<Keypoint>, Option<DescriptorSet>) {
        let mut detected: Vec<(Keypoint, Option<[u8; DESCRIPTOR_WIDTH]>)> = Vec::new();

        for (octave, (level, scale)) in self.build_pyramid(patch).iter().enumerate() {
            let corners = corners_fast9(level, self.profile.fast_threshold);
            let retained = suppress_corners(corners, SUPPRESSION_CELL);

            for corner in retained {
                let angle = orientation(level, corner.0, corner.1, self.profile.patch_size);
                let describable = self.is_describable(level, corner.0, corner.1);
                let descriptor = if describable {
                    Some(self.describe(level, corner.0, corner.1, angle))
                } else {
                    None
                };

                detected.push((
                    Keypoint {
                        x: corner.0 as f32 * scale,
                        y: corner.1 as f32 * scale,
                        size: self.profile.patch_size as f32 * scale,
                        angle,
                        response: corner.2,
                        octave: octave as u32,
                    },
                    descriptor,
                ));
            }
        }

        // Strongest first; full tie-break keeps retention deterministic
        detected.sort_by(|a, b| {
            b.0.response
                .partial_cmp(&a.0.response)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.octave.cmp(&b.0.octave))
                .then(a.0.y.total_cmp(&b.0.y))
                .then(a.0.x.total_cmp(&b.0.x))
        });
        detected.truncate(self.profile.feature_count);

        if detected.is_empty() {
            return (Vec::new(), None);
        }

        let described: Vec<&(Keypoint, Option<[u8; DESCRIPTOR_WIDTH]>)> =
            detected.iter().filter(|(_, d)| d.is_some()).collect();

        if described.is_empty() {
            // Corners exist but none has patch support; callers surface this
            // as "keypoints but no descriptors"
            let keypoints = detected.iter().map(|(kp, _)| *kp).collect();
            return (keypoints, None);
        }

        let mut keypoints = Vec::with_capacity(described.len());
        let mut descriptors = DescriptorSet::empty();
        for (kp, desc) in described {
            keypoints.push(*kp);
            if let Some(desc) = desc {
                descriptors.push_row(desc);
            }
        }
        (keypoints, Some(descriptors))
    }

    fn build_pyramid(&self, base: &GrayImage) -> Vec<(GrayImage, f32)> {
        let mut pyramid = Vec::with_capacity(self.profile.pyramid_levels as usize);
        pyramid.push((base.clone(), 1.0_f32));

        let mut scale = 1.0_f32;
        for _ in 1..self.profile.pyramid_levels {
            scale *= self.profile.scale_factor;
            let width = (base.width() as f32 / scale) as u32;
            let height = (base.height() as f32 / scale) as u32;
            if width < MIN_LEVEL_EDGE || height < MIN_LEVEL_EDGE {
                break;
            }
            let level = imageops::resize(base, width, height, imageops::FilterType::Triangle);
            pyramid.push((level, scale));
        }

        pyramid
    }

    fn is_describable(&self, level: &GrayImage, x: u32, y: u32) -> bool {
        let margin = self
            .profile
            .edge_threshold
            .max(self.profile.patch_size / 2 + 1);
        x >= margin
            && y >= margin
            && x + margin < level.width()
            && y + margin < level.height()
    }

    /// Rotation-steered BRIEF over the fixed test-pair pattern.
    fn describe(&self, level: &GrayImage, x: u32, y: u32, angle: f32) -> [u8; DESCRIPTOR_WIDTH] {
        let mut descriptor = [0u8; DESCRIPTOR_WIDTH];
        // Pattern offsets are laid out for a 31 px patch; scale to profile
        let pattern_scale = self.profile.patch_size as f32 / 31.0;
        let radians = if angle < 0.0 {
            0.0
        } else {
            angle.to_radians()
        };
        let (sin, cos) = radians.sin_cos();
        let cx = x as i64;
        let cy = y as i64;
        let w = level.width() as i64;
        let h = level.height() as i64;

        for (byte_idx, tests) in TEST_PATTERN.chunks(8).enumerate() {
            let mut byte = 0u8;
            for (bit_idx, &(ax, ay, bx, by)) in tests.iter().enumerate() {
                let sample = |dx: i8, dy: i8| -> u8 {
                    let fx = dx as f32 * pattern_scale;
                    let fy = dy as f32 * pattern_scale;
                    let rx = (fx * cos - fy * sin).round() as i64;
                    let ry = (fx * sin + fy * cos).round() as i64;
                    let px = (cx + rx).clamp(0, w - 1) as u32;
                    let py = (cy + ry).clamp(0, h - 1) as u32;
                    level.get_pixel(px, py)[0]
                };
                if sample(ax, ay) < sample(bx, by) {
                    byte |= 1 << bit_idx;
                }
            }
            descriptor[byte_idx] = byte;
        }

        descriptor
    }
}

fn needs_contrast_boost(region: &Region) -> bool {
    region.width.min(region.height) <= SMALL_REGION_EDGE
}

/// Histogram equalization over small tiles, boosting local contrast without
/// letting one bright element flatten the rest of the patch.
pub(crate) fn equalize_tiles(image: &GrayImage, tile: u32) -> GrayImage {
    let mut out = GrayImage::new(image.width(), image.height());
    let mut ty = 0;
    while ty < image.height() {
        let th = tile.min(image.height() - ty);
        let mut tx = 0;
        while tx < image.width() {
            let tw = tile.min(image.width() - tx);
            let sub = imageops::crop_imm(image, tx, ty, tw, th).to_image();
            let equalized = equalize_histogram(&sub);
            for (dx, dy, px) in equalized.enumerate_pixels() {
                out.put_pixel(tx + dx, ty + dy, *px);
            }
            tx += tile;
        }
        ty += tile;
    }
    out
}

/// Grid-based non-maximum suppression: at most one corner per cell, the
/// strongest kept, overall order deterministic. Deduplicates the corner
/// cluster FAST raises around each feature without starving dense layouts
/// where distinct features sit only a few pixels apart.
fn suppress_corners(
    corners: Vec<imageproc::corners::Corner>,
    cell: f32,
) -> Vec<(u32, u32, f32)> {
    let mut scored: Vec<(u32, u32, f32)> = corners.into_iter().map(|c| (c.x, c.y, c.score)).collect();
    scored.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.cmp(&b.1))
            .then(a.0.cmp(&b.0))
    });

    let mut occupied = std::collections::HashSet::new();
    let mut selected = Vec::new();
    for (x, y, score) in scored {
        let gx = (x as f32 / cell) as i32;
        let gy = (y as f32 / cell) as i32;
        if occupied.insert((gx, gy)) {
            selected.push((x, y, score));
        }
    }
    selected
}

/// Dominant orientation from the intensity centroid of the support patch.
/// Returns degrees in [0, 360), or -1.0 when the patch has no gradient.
fn orientation(image: &GrayImage, x: u32, y: u32, patch_size: u32) -> f32 {
    let radius = (patch_size / 2) as i64;
    let mut m01 = 0.0_f32;
    let mut m10 = 0.0_f32;
    let w = image.width() as i64;
    let h = image.height() as i64;

    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy > radius * radius {
                continue;
            }
            let px = x as i64 + dx;
            let py = y as i64 + dy;
            if px < 0 || py < 0 || px >= w || py >= h {
                continue;
            }
            let intensity = image.get_pixel(px as u32, py as u32)[0] as f32;
            m01 += intensity * dy as f32;
            m10 += intensity * dx as f32;
        }
    }

    if m01 == 0.0 && m10 == 0.0 {
        return -1.0;
    }
    let degrees = m01.atan2(m10).to_degrees();
    if degrees < 0.0 { degrees + 360.0 } else { degrees }
}

// Standard ORB test-pair table (learned offsets for a 31 px patch), kept as a
// fixed constant so detection stays deterministic across runs and builds.
#[rustfmt::skip]
const TEST_PATTERN: [(i8, i8, i8, i8); 256] = [
    (8, -3, 9, 5), (-11, 9, -8, 2), (3, -12, -13, 2), (-3, -7, -4, 5),
    (1, -11, 12, -2), (1, -1, 11, -1), (4, -2, -5, -8), (2, -13, -8, 9),
    (-11, 1, 6, 2), (11, 11, 12, -1), (6, -12, -9, -8), (12, 5, 3, -6),
    (1, 1, -4, -1), (7, -4, -6, 7), (-3, 2, 9, -8), (-4, -8, 3, 3),
    (-5, 3, 0, -4), (2, -11, -13, 0), (10, 5, 5, 2), (0, 9, 10, -3),
    (5, -8, -10, 1), (8, 3, -8, -5), (2, -6, -9, -4), (-12, 2, 0, -10),
    (5, -10, -7, -2), (-7, 9, -1, 0), (0, -1, -3, 3), (-12, 5, -2, -1),
    (-1, 1, -5, -11), (-1, 2, -3, 0), (-5, -6, 7, -1), (4, 7, 0, -8),
    (-9, 9, 3, -13), (7, -3, 13, -7), (10, -4, -5, 3), (6, 1, -13, -13),
    (-12, -11, 7, 0), (0, -1, -8, -6), (-10, -5, -6, 7), (10, 2, -6, -12),
    (-11, 8, 4, -2), (9, 0, -11, -4), (0, 11, 6, -11), (4, 1, -10, -3),
    (-6, 12, 1, 12), (-4, -8, 8, -7), (-3, 0, 8, 3), (3, 3, -3, -1),
    (-6, -11, -2, 12), (0, -3, -6, -3), (-6, 3, -12, -8), (6, 3, -2, -10),
    (-3, -10, -1, 0), (11, 2, 11, 3), (1, -8, -10, 8), (2, -2, -7, 8),
    (0, -13, 13, 0), (6, -9, -1, -1), (7, 5, 6, 3), (-13, 7, -7, -7),
    (-5, -13, 5, -11), (6, 7, -2, 12), (-6, -11, 8, 6), (-2, -2, -5, 9),
    (5, 4, 7, -6), (0, 11, -4, -5), (10, 1, 2, -8), (-3, -10, -10, -10),
    (1, 9, 6, -5), (-7, -11, 11, 3), (11, -2, -4, 3), (7, -1, 5, 12),
    (-5, 5, -2, -5), (8, -11, -1, -13), (-13, 2, -11, -8), (-2, 9, 5, 0),
    (2, -5, 2, 0), (3, -13, -12, 9), (6, -3, 5, 4), (10, 10, 1, -9),
    (-13, -8, -4, 10), (2, -2, -3, 8), (-13, -11, -8, -3), (2, -4, -7, -3),
    (12, 0, -2, 13), (-11, 7, -10, -1), (-5, -10, 0, -11), (6, 7, 12, -3),
    (-1, -1, 8, -6), (-6, 3, -1, -3), (-2, -11, -11, -3), (12, -2, 3, -10),
    (-11, -1, -2, -8), (3, -1, 7, 3), (2, -2, -12, 12), (6, -4, 12, -2),
    (-3, 11, 2, -12), (-1, 3, 2, 3), (1, 3, -11, -3), (2, -8, -7, -5),
    (0, -5, -11, -6), (-12, 8, -2, 9), (3, -7, 9, -8), (-10, -6, -1, -11),
    (11, -6, -3, -13), (3, 0, 0, -8), (-5, -2, -1, -13), (-8, -5, -10, -13),
    (7, -13, 0, -3), (1, -4, -1, -13), (6, -5, -7, 8), (8, 7, -5, -13),
    (2, 0, -8, -6), (-8, -3, -13, -6), (-6, 5, 0, 6), (-8, 8, -9, 1),
    (10, 1, -9, 4), (-4, -8, -5, 7), (7, 7, 10, -8), (-7, -3, -1, 1),
    (10, -1, 3, 1), (5, 6, -10, -8), (-6, -13, 5, -8), (4, -3, -4, -13),
    (-3, 4, -2, -13), (10, -11, 9, 11), (-9, 0, 12, 2), (-4, -2, 13, -6),
    (2, -10, -6, 1), (11, -13, 4, -13), (1, -1, 1, 9), (1, -5, -13, -5),
    (7, 4, 12, -7), (0, -2, -8, 3), (7, 2, 2, -8), (-2, 7, -12, -4),
    (1, 11, 6, -2), (-1, -1, -4, 10), (0, 8, 0, -13), (3, 12, 5, -13),
    (-9, -1, 9, -13), (12, 4, -6, -4), (-13, 13, 1, -4), (0, -2, -7, -9),
    (10, -8, -13, 3), (2, -13, 6, 8), (10, -6, -7, 0), (-11, 7, -1, -7),
    (12, 0, 5, -4), (-7, -8, 4, -12), (-13, 5, -5, -2), (0, 5, 4, 4),
    (-2, -11, -1, 8), (9, 3, -1, -12), (0, 6, -10, 12), (1, -8, -7, -10),
    (-6, 4, -6, 3), (5, 1, -3, -9), (-6, 6, -6, 3), (7, -8, 1, -7),
    (3, 8, -9, -5), (2, -4, 5, 7), (11, 4, 6, -3), (-8, -1, 11, -1),
    (-3, -6, -10, -8), (2, 7, 3, -12), (-4, -10, 12, -3), (1, -2, -4, 6),
    (3, 11, -11, 0), (-6, 2, 3, -8), (6, 12, 0, -13), (3, 2, -2, -5),
    (-4, 1, -6, 5), (-12, 0, -13, 9), (-6, 2, 7, -8), (-2, -4, -6, 5),
    (0, 0, 0, -13), (9, -13, -2, 0), (3, -13, 5, -12), (10, 11, -13, -13),
    (-2, 3, -12, 3), (11, 7, -7, 0), (12, 2, 1, -13), (12, -11, 12, -8),
    (-7, -2, -4, -7), (7, 5, -1, -13), (-5, -8, -9, 10), (6, 0, -3, -13),
    (12, 4, -13, 1), (-7, 8, 8, -3), (10, -4, 0, -13), (2, 1, -7, 0),
    (-5, 4, 2, -8), (12, 8, 4, -13), (8, 7, -10, 0), (-3, 6, -2, 4),
    (-5, -1, -8, -12), (4, -1, -2, -10), (6, -4, -13, 9), (-7, 8, -6, -12),
    (-10, 2, -13, 10), (-1, -7, 0, 2), (-5, 6, -5, -12), (6, -13, 7, -3),
    (-13, 2, -1, 8), (2, 8, -13, 0), (-6, -9, 1, -4), (-9, 13, 0, -13),
    (-2, -3, 8, 0), (4, 0, -11, 12), (0, 3, -10, 10), (-6, -9, -3, -2),
    (9, -4, -6, 2), (5, 0, -13, -10), (-3, -8, -13, 3), (-12, -1, -4, -2),
    (7, -9, -4, 3), (-8, -4, 1, 11), (11, 6, 2, -12), (6, 6, -8, 12),
    (-3, -8, 2, -10), (2, 5, -8, 8), (-9, 8, -6, -8), (-4, 0, -11, -7),
    (7, 6, -3, 8), (-5, 7, -12, 5), (2, -8, -5, 1), (0, 4, -5, -3),
    (9, -9, -6, -12), (0, -13, 0, -13), (-7, -11, -3, -13), (6, -12, -7, 10),
    (6, -8, -13, 7), (8, 7, -11, -1), (-11, -5, -6, 9), (6, 4, 2, -13),
    (-1, -6, 3, -9), (1, -4, 4, -3), (-6, 8, -12, 0), (-11, 3, -6, 2),
    (7, -10, 11, -6), (5, 0, 12, -13), (4, -8, 1, -1), (-13, 12, -6, 3),
    (1, 4, -9, -2), (-8, -12, -8, 7), (-9, 5, 0, -5), (9, 7, 5, 3),
    (-12, -2, 8, -8), (3, 7, 12, -8), (-13, 3, -1, -1), (-10, -4, -10, 12),
    (5, -2, 0, 13), (-7, 1, -12, 8), (2, 9, -5, -11), (11, -13, 0, 2),
];
