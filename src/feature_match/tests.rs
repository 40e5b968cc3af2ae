//! Tests for feature capture, serialization, and matching

use image::{GrayImage, Luma};

use super::detector::{DESCRIPTOR_WIDTH, DescriptorSet, FeatureDetector};
use super::error::FeatureError;
use super::matcher::{MatchTuning, match_descriptor_sets, rank_matches};
use super::profile::{DetectorProfile, ProfileRegistry};
use super::region::{Region, map_display_selection};
use super::template::{FeatureTemplate, TemplateStore};

fn lcg(seed: &mut u64) -> u64 {
    *seed = seed
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    *seed >> 33
}

/// Small icon-like test image: bright 3x3 blobs of varying intensity on a
/// dark background, dense enough that matching clears the correspondence
/// floor.
fn synthetic_icon() -> GrayImage {
    let mut img = GrayImage::from_pixel(32, 32, Luma([20]));
    let mut seed = 0x5eed;
    for gy in (9..=21u32).step_by(4) {
        for gx in (9..=21u32).step_by(4) {
            let intensity = 120 + (lcg(&mut seed) % 120) as u8;
            for dy in -1..=1i32 {
                for dx in -1..=1i32 {
                    img.put_pixel(
                        (gx as i32 + dx) as u32,
                        (gy as i32 + dy) as u32,
                        Luma([intensity]),
                    );
                }
            }
        }
    }
    img
}

/// Low-contrast image: blobs 6 gray levels above the background, below the
/// small_icon FAST threshold until the contrast pre-pass stretches them.
fn faint_image(width: u32, height: u32) -> GrayImage {
    let mut img = GrayImage::from_pixel(width, height, Luma([4]));
    for gy in (4..height.saturating_sub(2)).step_by(8) {
        for gx in (4..width.saturating_sub(2)).step_by(8) {
            for dy in -1..=1i32 {
                for dx in -1..=1i32 {
                    img.put_pixel(
                        (gx as i32 + dx) as u32,
                        (gy as i32 + dy) as u32,
                        Luma([10]),
                    );
                }
            }
        }
    }
    img
}

// RM(1,3) codewords: pairwise bit distance >= 4, so rows built from them
// stay >= 128 bits apart and nearest-neighbor assignments are unambiguous.
const CODEWORDS: [u8; 16] = [
    0x00, 0xFF, 0x0F, 0xF0, 0x33, 0xCC, 0x55, 0xAA, 0x3C, 0xC3, 0x5A, 0xA5, 0x66, 0x99, 0x69,
    0x96,
];

fn codeword_rows(count: usize) -> DescriptorSet {
    assert!(count <= CODEWORDS.len());
    let mut data = Vec::with_capacity(count * DESCRIPTOR_WIDTH);
    for &value in CODEWORDS.iter().take(count) {
        data.extend(std::iter::repeat_n(value, DESCRIPTOR_WIDTH));
    }
    DescriptorSet::from_raw(data, count, DESCRIPTOR_WIDTH).unwrap()
}

/// Complement the first `bytes` bytes of one row, adding 8 bits of distance
/// per byte against the original.
fn with_flipped_rows(set: &DescriptorSet, rows: &[usize], bytes: usize) -> DescriptorSet {
    let mut data = set.as_bytes().to_vec();
    for &row in rows {
        for b in 0..bytes {
            data[row * DESCRIPTOR_WIDTH + b] ^= 0xFF;
        }
    }
    DescriptorSet::from_raw(data, set.rows(), DESCRIPTOR_WIDTH).unwrap()
}

fn small_icon_detector() -> FeatureDetector {
    FeatureDetector::new(DetectorProfile::small_icon())
}

#[test]
fn detection_is_deterministic() {
    let img = synthetic_icon();
    let detector = small_icon_detector();

    let (kp1, desc1) = detector.detect(&img, None).unwrap();
    let (kp2, desc2) = detector.detect(&img, None).unwrap();

    assert!(!kp1.is_empty());
    assert_eq!(kp1, kp2);
    assert_eq!(
        desc1.as_ref().unwrap().as_bytes(),
        desc2.as_ref().unwrap().as_bytes()
    );
}

#[test]
fn dense_corners_survive_suppression() {
    // Blobs on a 4 px pitch: suppression may keep only one corner per blob
    // but must not thin distinct blobs below the correspondence floor,
    // otherwise a template can never match its own source frame
    let img = synthetic_icon();
    let detector = small_icon_detector();
    let tuning = MatchTuning::default();

    let (keypoints, descriptors) = detector.detect(&img, None).unwrap();
    let descriptors = descriptors.expect("textured icon must be describable");
    assert!(keypoints.len() >= tuning.min_correspondences);
    assert!(descriptors.rows() >= tuning.min_correspondences);

    let stats =
        match_descriptor_sets(Some(&descriptors), Some(&descriptors), &tuning).unwrap();
    assert_eq!(stats.confidence, 1.0);
}

#[test]
fn detect_rejects_zero_area_region() {
    let img = synthetic_icon();
    let detector = small_icon_detector();

    let err = detector
        .detect(&img, Some(Region::new(40, 40, 10, 10)))
        .unwrap_err();
    assert!(matches!(err, FeatureError::InvalidRegion { .. }));

    let err = detector
        .detect(&img, Some(Region::new(0, 0, 0, 5)))
        .unwrap_err();
    assert!(matches!(err, FeatureError::InvalidRegion { .. }));
}

#[test]
fn detect_reports_region_offset_coordinates() {
    let img = synthetic_icon();
    let detector = small_icon_detector();

    let region = Region::new(4, 4, 28, 28);
    let (keypoints, _) = detector.detect(&img, Some(region)).unwrap();
    for kp in &keypoints {
        assert!(kp.x >= region.x as f32);
        assert!(kp.y >= region.y as f32);
    }
}

#[test]
fn small_regions_get_contrast_pre_pass() {
    // Blob contrast sits below the FAST threshold; only regions small
    // enough to trigger the equalization pre-pass produce keypoints.
    let img = faint_image(70, 70);
    let detector = small_icon_detector();

    let (kp_40x40, _) = detector.detect(&img, Some(Region::new(0, 0, 40, 40))).unwrap();
    assert!(!kp_40x40.is_empty(), "40x40 region should trigger the pre-pass");

    let (kp_40x41, _) = detector.detect(&img, Some(Region::new(0, 0, 40, 41))).unwrap();
    assert!(!kp_40x41.is_empty(), "40x41 region should trigger the pre-pass");

    let (kp_61x61, _) = detector.detect(&img, Some(Region::new(0, 0, 61, 61))).unwrap();
    assert!(kp_61x61.is_empty(), "61x61 region should not be equalized");
}

#[test]
fn capture_distinguishes_no_features_from_no_descriptors() {
    let uniform = GrayImage::from_pixel(50, 50, Luma([128]));
    let detector = small_icon_detector();
    let mut store = TemplateStore::new();

    let err = store
        .capture("flat", &uniform, None, 0.8, 0x1234, &detector)
        .unwrap_err();
    assert!(matches!(err, FeatureError::NoFeaturesFound));

    // Corners only inside the border band: detected, but no patch support
    let mut border_only = GrayImage::from_pixel(50, 50, Luma([20]));
    for gy in (12..=36u32).step_by(8) {
        for dy in -1..=1i32 {
            for dx in -1..=1i32 {
                border_only.put_pixel(
                    (4 + dx) as u32,
                    (gy as i32 + dy) as u32,
                    Luma([200]),
                );
            }
        }
    }
    let err = store
        .capture("border", &border_only, None, 0.8, 0x1234, &detector)
        .unwrap_err();
    assert!(matches!(err, FeatureError::NoDescriptors));
    assert!(store.is_empty());
}

#[test]
fn round_trip_preserves_descriptors_and_keypoints() {
    let img = synthetic_icon();
    let detector = small_icon_detector();
    let mut store = TemplateStore::new();

    let template = store
        .capture("icon", &img, None, 0.7, 0xBEEF, &detector)
        .unwrap()
        .clone();

    let restored = FeatureTemplate::from_portable(template.to_portable().unwrap()).unwrap();

    assert_eq!(restored.name, template.name);
    assert_eq!(restored.hwnd, template.hwnd);
    assert_eq!(restored.region, template.region);
    assert_eq!(restored.confidence_threshold, template.confidence_threshold);
    assert_eq!(
        restored.descriptors.as_bytes(),
        template.descriptors.as_bytes()
    );
    assert_eq!(restored.keypoints.len(), template.keypoints.len());
    for (r, t) in restored.keypoints.iter().zip(&template.keypoints) {
        assert!((r.x - t.x).abs() < 1e-6);
        assert!((r.y - t.y).abs() < 1e-6);
        assert!((r.size - t.size).abs() < 1e-6);
        assert!((r.angle - t.angle).abs() < 1e-6);
    }
}

#[test]
fn matcher_rejects_degenerate_input() {
    let tuning = MatchTuning::default();
    let rows = codeword_rows(16);
    let single = codeword_rows(1);
    let empty = DescriptorSet::from_raw(Vec::new(), 0, DESCRIPTOR_WIDTH).unwrap();

    assert!(match_descriptor_sets(None, Some(&rows), &tuning).is_none());
    assert!(match_descriptor_sets(Some(&rows), None, &tuning).is_none());
    assert!(match_descriptor_sets(Some(&empty), Some(&rows), &tuning).is_none());
    assert!(match_descriptor_sets(Some(&single), Some(&rows), &tuning).is_none());
}

#[test]
fn matcher_requires_eleven_correspondences() {
    let tuning = MatchTuning::default();

    // Ten perfect correspondences are still "no match"
    let ten = codeword_rows(10);
    assert!(match_descriptor_sets(Some(&ten), Some(&ten), &tuning).is_none());

    // Eleven compute a confidence
    let eleven = codeword_rows(11);
    let stats = match_descriptor_sets(Some(&eleven), Some(&eleven), &tuning).unwrap();
    assert_eq!(stats.total_matches, 11);
    assert_eq!(stats.confidence, 1.0);
}

#[test]
fn confidence_threshold_boundary_is_inclusive() {
    let tuning = MatchTuning::default();
    let template = codeword_rows(16);
    // Four rows pushed 56 bits away: beyond the good-distance cutoff but
    // still each other's mutual nearest neighbor
    let frame = with_flipped_rows(&template, &[3, 7, 11, 15], 7);

    let stats = match_descriptor_sets(Some(&template), Some(&frame), &tuning).unwrap();
    assert_eq!(stats.total_matches, 16);
    assert_eq!(stats.good_matches, 12);
    assert_eq!(stats.confidence, 0.75);

    // Reported only when confidence >= threshold, inclusive
    assert!(stats.confidence >= 0.75);
    assert!(stats.confidence < 0.75 + 1e-4);
}

#[test]
fn ranking_includes_a_template_at_its_exact_threshold() {
    let tuning = MatchTuning::default();
    let descriptors = codeword_rows(16);
    // Computed confidence is exactly 12/16 = 0.75
    let frame = with_flipped_rows(&descriptors, &[3, 7, 11, 15], 7);

    let template = FeatureTemplate {
        name: "boundary".to_string(),
        hwnd: 0x1,
        region: Region::new(0, 0, 32, 32),
        confidence_threshold: 0.75,
        keypoints: Vec::new(),
        descriptors,
    };

    let results = rank_matches(std::slice::from_ref(&template), &[], Some(&frame), &tuning);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].template_name, "boundary");
    assert_eq!(results[0].confidence, 0.75);
    assert_eq!(results[0].region, template.region);

    // A hair above the computed confidence drops the template
    let mut strict = template.clone();
    strict.confidence_threshold = 0.76;
    let results = rank_matches(std::slice::from_ref(&strict), &[], Some(&frame), &tuning);
    assert!(results.is_empty());
}

#[test]
fn good_distance_cutoff_is_exclusive() {
    let tuning = MatchTuning::default();
    let template = codeword_rows(12);
    // 48 bits away: under the cutoff of 50, still good
    let near = with_flipped_rows(&template, &[0], 6);
    let stats = match_descriptor_sets(Some(&template), Some(&near), &tuning).unwrap();
    assert_eq!(stats.good_matches, 12);

    // 56 bits away: past the cutoff
    let far = with_flipped_rows(&template, &[0], 7);
    let stats = match_descriptor_sets(Some(&template), Some(&far), &tuning).unwrap();
    assert_eq!(stats.good_matches, 11);
}

#[test]
fn store_rejects_duplicates_and_allows_recapture_after_delete() {
    let img = synthetic_icon();
    let detector = small_icon_detector();
    let mut store = TemplateStore::new();

    store.capture("x", &img, None, 0.8, 1, &detector).unwrap();
    let err = store.capture("x", &img, None, 0.8, 1, &detector).unwrap_err();
    assert!(matches!(err, FeatureError::DuplicateTemplateName(_)));

    store.delete("x").unwrap();
    store.capture("x", &img, None, 0.8, 1, &detector).unwrap();
    assert_eq!(store.len(), 1);

    let err = store.delete("missing").unwrap_err();
    assert!(matches!(err, FeatureError::TemplateNotFound(_)));
}

#[test]
fn small_icon_capture_export_import_match_end_to_end() {
    let img = synthetic_icon();
    let detector = small_icon_detector();
    let mut store = TemplateStore::new();

    store
        .capture("icon", &img, None, 0.7, 0xABCD, &detector)
        .unwrap();

    let path = std::env::temp_dir().join(format!("wfm-roundtrip-{}.json", std::process::id()));
    store.export(&path).unwrap();

    let mut reimported = TemplateStore::new();
    assert_eq!(reimported.import(&path).unwrap(), 1);
    std::fs::remove_file(&path).ok();

    // Matching the source frame against the re-imported template must clear
    // the stored threshold
    let template = reimported.get("icon").unwrap();
    let (_, frame_descriptors) = detector.detect(&img, None).unwrap();
    let stats = match_descriptor_sets(
        Some(&template.descriptors),
        frame_descriptors.as_ref(),
        &MatchTuning::default(),
    )
    .expect("enough correspondences on the identical frame");
    assert!(stats.confidence >= template.confidence_threshold);
}

#[test]
fn import_skips_corrupt_records_and_keeps_the_rest() {
    let img = synthetic_icon();
    let detector = small_icon_detector();
    let mut store = TemplateStore::new();
    store.capture("good", &img, None, 0.8, 1, &detector).unwrap();
    store.capture("bad", &img, None, 0.8, 1, &detector).unwrap();

    let path = std::env::temp_dir().join(format!("wfm-corrupt-{}.json", std::process::id()));
    store.export(&path).unwrap();

    // Corrupt one record's descriptor payload in place
    let mut records: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    records["bad"]["descriptors"] = serde_json::Value::String("!!not-base64!!".to_string());
    std::fs::write(&path, serde_json::to_string(&records).unwrap()).unwrap();

    let mut reimported = TemplateStore::new();
    let count = reimported.import(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(count, 1);
    assert!(reimported.get("good").is_some());
    assert!(reimported.get("bad").is_none());
}

#[test]
fn import_overwrites_matching_names() {
    let img = synthetic_icon();
    let detector = small_icon_detector();

    let mut exported = TemplateStore::new();
    exported
        .capture("icon", &img, None, 0.9, 7, &detector)
        .unwrap();
    let path = std::env::temp_dir().join(format!("wfm-merge-{}.json", std::process::id()));
    exported.export(&path).unwrap();

    let mut store = TemplateStore::new();
    store.capture("icon", &img, None, 0.5, 1, &detector).unwrap();
    assert_eq!(store.import(&path).unwrap(), 1);
    std::fs::remove_file(&path).ok();

    assert_eq!(store.len(), 1);
    assert_eq!(store.get("icon").unwrap().confidence_threshold, 0.9);
    assert_eq!(store.get("icon").unwrap().hwnd, 7);
}

#[test]
fn registry_selects_registers_and_invalidates() {
    let mut registry = ProfileRegistry::new();
    assert_eq!(registry.current().name, "standard");
    assert!(registry.select("small_icon").is_some());
    assert!(registry.select("nonexistent").is_none());

    let custom = DetectorProfile {
        name: "custom".to_string(),
        description: "operator preset".to_string(),
        ..DetectorProfile::small_icon()
    };
    registry.register(custom.clone()).unwrap();
    let err = registry.register(custom).unwrap_err();
    assert!(matches!(err, FeatureError::DuplicateProfileName(_)));

    // Switching profiles bumps the generation so stale detectors show
    let before = registry.generation();
    assert!(registry.set_current("custom").is_some());
    assert!(registry.generation() > before);
    assert_eq!(registry.current().name, "custom");

    assert!(registry.set_current("nonexistent").is_none());
    assert_eq!(registry.current().name, "custom");
}

#[test]
fn display_selection_maps_to_source_coordinates() {
    // Preview shown at half resolution: displayed 400x300, source 800x600
    let region = map_display_selection(Region::new(100, 50, 40, 30), 400, 300, 800, 600).unwrap();
    assert_eq!(region, Region::new(200, 100, 80, 60));

    // Selection partially past the edge clamps into bounds
    let region = map_display_selection(Region::new(390, 290, 20, 20), 400, 300, 800, 600).unwrap();
    assert_eq!(region.x, 780);
    assert_eq!(region.width, 20);

    let err = map_display_selection(Region::new(10, 10, 0, 5), 400, 300, 800, 600).unwrap_err();
    assert!(matches!(err, FeatureError::InvalidRegion { .. }));
}

#[test]
fn descriptor_set_validates_shape() {
    assert!(DescriptorSet::from_raw(vec![0; 64], 2, DESCRIPTOR_WIDTH).is_ok());
    assert!(DescriptorSet::from_raw(vec![0; 63], 2, DESCRIPTOR_WIDTH).is_err());
    assert!(DescriptorSet::from_raw(vec![0; 64], 2, 16).is_err());
}
