pub mod feature_match;
pub mod match_loop;
pub mod window;

pub use feature_match::{
    DetectorProfile, FeatureDetector, FeatureError, FeatureResult, MatchResult, MatchTuning,
    ProfileRegistry, Region, TemplateStore,
};
pub use match_loop::{LoopCommand, LoopState, MatchLoop, PreviewLoop};
pub use window::{FrameSource, WindowConfig, WindowHandle, WindowLocator};
