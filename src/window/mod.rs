//! Window enumeration and frame capture boundary
//!
//! The engine never talks to the window manager directly; it consumes these
//! traits, and the platform layer (or a test fake) implements them.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::feature_match::FeatureResult;

/// Opaque native window identifier.
pub type WindowHandle = u64;

/// Identifies a class of target windows.
///
/// Created from static configuration, read-only at runtime. `titles` are
/// candidate substrings tried in order; `class_name` must match exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    pub class_name: String,
    pub titles: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl WindowConfig {
    /// Built-in example configurations, used when no config file is given.
    pub fn defaults() -> Vec<WindowConfig> {
        vec![
            WindowConfig {
                class_name: "UnityWndClass".to_string(),
                titles: vec!["Genshin Impact".to_string()],
                description: "Unity game window".to_string(),
            },
            WindowConfig {
                class_name: "Notepad".to_string(),
                titles: vec!["Notepad".to_string(), "Untitled".to_string()],
                description: "Notepad (capture smoke test)".to_string(),
            },
        ]
    }

    /// Load configurations from a JSON file, or the built-in defaults when
    /// no path is given.
    pub fn load(path: Option<&Path>) -> FeatureResult<Vec<WindowConfig>> {
        match path {
            Some(path) => {
                let reader = std::io::BufReader::new(std::fs::File::open(path)?);
                Ok(serde_json::from_reader(reader)?)
            }
            None => Ok(Self::defaults()),
        }
    }
}

/// Resolves a window configuration to zero or more live window handles.
/// An empty result means no matching windows, not an error.
pub trait WindowLocator {
    fn locate(&self, config: &WindowConfig) -> Vec<WindowHandle>;
}

/// Returns one still pixel buffer for a window handle.
///
/// `Ok(None)` signals "capture unavailable this call" (minimized, occluded,
/// just closed) and is expected transiently; `Err` is reserved for
/// unrecoverable conditions such as an invalid handle. Implementations must
/// return promptly or fail fast.
pub trait FrameSource: Send + Sync {
    fn capture(&self, hwnd: WindowHandle) -> FeatureResult<Option<RgbImage>>;
}
