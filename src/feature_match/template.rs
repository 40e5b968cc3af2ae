//! Feature templates and the template store
//!
//! A template keeps only what matching needs: the descriptor rows and
//! position/size/angle per keypoint. Raw pixel data is intentionally dropped
//! at capture time so exported libraries stay small; the descriptor buffer
//! is deflated and base64-encoded in the portable JSON form.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use image::GrayImage;
use serde::{Deserialize, Serialize};

use super::detector::{DescriptorSet, FeatureDetector, Keypoint};
use super::error::{FeatureError, FeatureResult};
use super::region::Region;

/// Portable template file format version; bump on any change to descriptor
/// width or record layout so stale files fail loudly instead of silently
/// mis-shaping.
pub const FORMAT_VERSION: u32 = 1;

/// An immutable captured visual signature.
#[derive(Debug, Clone)]
pub struct FeatureTemplate {
    pub name: String,
    /// Window the template was captured from; provenance only, may be stale
    pub hwnd: u64,
    /// Capture region in source-image pixel coordinates
    pub region: Region,
    pub confidence_threshold: f32,
    pub keypoints: Vec<Keypoint>,
    pub descriptors: DescriptorSet,
}

/// One record of the portable template file. Human-inspectable JSON apart
/// from the compressed descriptor payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortableTemplate {
    pub format_version: u32,
    pub name: String,
    pub hwnd: u64,
    pub position: Region,
    pub confidence_threshold: f32,
    /// Descriptor bytes, zlib-deflated then base64-encoded
    pub descriptors: String,
    pub descriptors_shape: [usize; 2],
    /// [x, y, size, angle] per keypoint; other keypoint fields are not
    /// preserved and reset to defaults on reconstruction
    pub keypoints_info: Vec<[f32; 4]>,
}

impl FeatureTemplate {
    pub fn to_portable(&self) -> FeatureResult<PortableTemplate> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(self.descriptors.as_bytes())?;
        let compressed = encoder.finish()?;

        Ok(PortableTemplate {
            format_version: FORMAT_VERSION,
            name: self.name.clone(),
            hwnd: self.hwnd,
            position: self.region,
            confidence_threshold: self.confidence_threshold,
            descriptors: BASE64.encode(compressed),
            descriptors_shape: [self.descriptors.rows(), self.descriptors.cols()],
            keypoints_info: self
                .keypoints
                .iter()
                .map(|kp| [kp.x, kp.y, kp.size, kp.angle])
                .collect(),
        })
    }

    pub fn from_portable(record: PortableTemplate) -> FeatureResult<Self> {
        let decode_err = |reason: String| FeatureError::DecodeError {
            name: record.name.clone(),
            reason,
        };

        if record.format_version != FORMAT_VERSION {
            return Err(decode_err(format!(
                "unsupported format version {} (engine writes {FORMAT_VERSION})",
                record.format_version
            )));
        }

        let compressed = BASE64
            .decode(record.descriptors.as_bytes())
            .map_err(|e| decode_err(format!("descriptor payload is not valid base64: {e}")))?;

        let mut raw = Vec::new();
        ZlibDecoder::new(compressed.as_slice())
            .read_to_end(&mut raw)
            .map_err(|e| decode_err(format!("descriptor payload failed to inflate: {e}")))?;

        let [rows, cols] = record.descriptors_shape;
        let descriptors = DescriptorSet::from_raw(raw, rows, cols).map_err(&decode_err)?;

        if record.keypoints_info.len() != rows {
            return Err(decode_err(format!(
                "{} keypoints for {rows} descriptor rows",
                record.keypoints_info.len()
            )));
        }

        // Only position/size/angle participate in matching and overlay
        // rendering; response and octave reset to placeholders.
        let keypoints = record
            .keypoints_info
            .iter()
            .map(|&[x, y, size, angle]| Keypoint {
                x,
                y,
                size,
                angle,
                response: 0.0,
                octave: 0,
            })
            .collect();

        Ok(Self {
            name: record.name,
            hwnd: record.hwnd,
            region: record.position,
            confidence_threshold: record.confidence_threshold,
            keypoints,
            descriptors,
        })
    }
}

/// In-memory template library, keyed by unique name.
///
/// Owned by one capture/matching session; loops snapshot it before iterating
/// so mutation never races a tick.
#[derive(Debug, Default)]
pub struct TemplateStore {
    templates: BTreeMap<String, FeatureTemplate>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&FeatureTemplate> {
        self.templates.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.templates.keys().map(|k| k.as_str()).collect()
    }

    /// Cloned view for iteration outside the store's lock.
    pub fn snapshot(&self) -> Vec<FeatureTemplate> {
        self.templates.values().cloned().collect()
    }

    /// Detect features in `region` of `image` and store them under `name`.
    ///
    /// Distinguishes "zero keypoints" (`NoFeaturesFound`, pick a
    /// higher-contrast region) from "keypoints but no descriptors"
    /// (`NoDescriptors`, degenerate patch).
    pub fn capture(
        &mut self,
        name: &str,
        image: &GrayImage,
        region: Option<Region>,
        confidence_threshold: f32,
        hwnd: u64,
        detector: &FeatureDetector,
    ) -> FeatureResult<&FeatureTemplate> {
        if self.templates.contains_key(name) {
            return Err(FeatureError::DuplicateTemplateName(name.to_string()));
        }

        let resolved = match region {
            Some(r) => r.clamp_to(image.width(), image.height())?,
            None => Region::full(image.width(), image.height()),
        };

        let (keypoints, descriptors) = detector.detect(image, Some(resolved))?;
        let descriptors = match descriptors {
            Some(d) if !d.is_empty() => d,
            _ if keypoints.is_empty() => return Err(FeatureError::NoFeaturesFound),
            _ => return Err(FeatureError::NoDescriptors),
        };

        log::info!(
            "captured template '{name}': {} keypoints from {}x{} region",
            keypoints.len(),
            resolved.width,
            resolved.height
        );

        let template = FeatureTemplate {
            name: name.to_string(),
            hwnd,
            region: resolved,
            confidence_threshold: confidence_threshold.clamp(0.0, 1.0),
            keypoints,
            descriptors,
        };
        Ok(self
            .templates
            .entry(name.to_string())
            .or_insert(template))
    }

    pub fn delete(&mut self, name: &str) -> FeatureResult<FeatureTemplate> {
        self.templates
            .remove(name)
            .ok_or_else(|| FeatureError::TemplateNotFound(name.to_string()))
    }

    /// Serialize the whole store to a portable JSON file.
    pub fn export(&self, path: &Path) -> FeatureResult<()> {
        let mut records = BTreeMap::new();
        for (name, template) in &self.templates {
            records.insert(name.clone(), template.to_portable()?);
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &records)?;
        log::info!("exported {} templates to {}", records.len(), path.display());
        Ok(())
    }

    /// Merge a portable record set into the store, overwriting entries with
    /// matching names. Corrupt records are logged and skipped; the rest of
    /// the import continues. Returns the number imported.
    pub fn import(&mut self, path: &Path) -> FeatureResult<usize> {
        let reader = BufReader::new(File::open(path)?);
        let records: BTreeMap<String, PortableTemplate> = serde_json::from_reader(reader)?;

        let mut imported = 0;
        for (name, record) in records {
            match FeatureTemplate::from_portable(record) {
                Ok(template) => {
                    self.templates.insert(name, template);
                    imported += 1;
                }
                Err(e) => {
                    log::warn!("skipping template '{name}' during import: {e}");
                }
            }
        }
        log::info!("imported {imported} templates from {}", path.display());
        Ok(imported)
    }
}
