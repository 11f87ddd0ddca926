pub mod motion;
pub mod stage;

pub use motion::{AnalysisError, MotionDetector, MotionResult};
pub use stage::{AnalysisSettings, AnalysisStage};
