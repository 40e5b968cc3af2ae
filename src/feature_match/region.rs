//! Rectangular regions in source-image pixel coordinates

use serde::{Deserialize, Serialize};

use super::error::{FeatureError, FeatureResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a region covering a whole image
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Clamp this region to image bounds; `InvalidRegion` if nothing remains.
    pub fn clamp_to(&self, image_width: u32, image_height: u32) -> FeatureResult<Region> {
        let x = self.x.min(image_width);
        let y = self.y.min(image_height);
        let width = self.width.min(image_width.saturating_sub(x));
        let height = self.height.min(image_height.saturating_sub(y));

        if width == 0 || height == 0 {
            return Err(FeatureError::InvalidRegion {
                x: self.x,
                y: self.y,
                width: self.width,
                height: self.height,
                image_width,
                image_height,
            });
        }

        Ok(Region {
            x,
            y,
            width,
            height,
        })
    }

    pub fn contains_point(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }

    pub fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

/// Map a selection drawn on a scaled-down preview back to source-image pixels.
///
/// The UI hands over the rectangle in displayed-image coordinates together
/// with the displayed dimensions; the engine owns the conversion to source
/// coordinates before detection runs.
pub fn map_display_selection(
    selection: Region,
    displayed_width: u32,
    displayed_height: u32,
    source_width: u32,
    source_height: u32,
) -> FeatureResult<Region> {
    if displayed_width == 0 || displayed_height == 0 || selection.area() == 0 {
        return Err(FeatureError::InvalidRegion {
            x: selection.x,
            y: selection.y,
            width: selection.width,
            height: selection.height,
            image_width: source_width,
            image_height: source_height,
        });
    }

    let scale_x = source_width as f32 / displayed_width as f32;
    let scale_y = source_height as f32 / displayed_height as f32;

    let mapped = Region {
        x: (selection.x as f32 * scale_x) as u32,
        y: (selection.y as f32 * scale_y) as u32,
        width: (selection.width as f32 * scale_x).round().max(1.0) as u32,
        height: (selection.height as f32 * scale_y).round().max(1.0) as u32,
    };

    mapped.clamp_to(source_width, source_height)
}
