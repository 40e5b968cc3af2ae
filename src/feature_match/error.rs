use thiserror::Error;

/// A specialized `Result` type for capture and matching operations.
pub type FeatureResult<T> = Result<T, FeatureError>;

/// The error type for all feature capture and matching operations.
///
/// Every variant is recoverable: errors are reported at the boundary of the
/// operation that raised them and never tear down a running session.
#[derive(Debug, Error)]
pub enum FeatureError {
    #[error(
        "Region {x},{y} {width}x{height} has no area inside the {image_width}x{image_height} image"
    )]
    InvalidRegion {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        image_width: u32,
        image_height: u32,
    },

    #[error(
        "No keypoints found in the selected region. Select a higher-contrast region or switch to a more sensitive detector profile."
    )]
    NoFeaturesFound,

    #[error(
        "Keypoints were detected but none could be described; the patch is degenerate. Select a larger or more textured region."
    )]
    NoDescriptors,

    #[error("A template named '{0}' already exists")]
    DuplicateTemplateName(String),

    #[error("No template named '{0}'")]
    TemplateNotFound(String),

    #[error("Failed to decode template '{name}': {reason}")]
    DecodeError { name: String, reason: String },

    #[error("A detector profile named '{0}' is already registered")]
    DuplicateProfileName(String),

    #[error("Frame capture unavailable for window {hwnd:#x}")]
    FrameUnavailable { hwnd: u64 },

    #[error("Template file I/O failed: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Template file is not valid JSON: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}
