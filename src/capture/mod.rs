pub mod frame;
pub mod image_dir;
pub mod source;
pub mod stage;

#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_capture;

pub use frame::{FrameShape, PixelFormat, SourceFrame};
pub use image_dir::ImageSequenceSource;
pub use source::{open_source, MemorySource, SourceError, SourceOpener, VideoSource};
pub use stage::{CaptureSettings, CaptureStage};

#[cfg(feature = "gstreamer-pipeline")]
pub use gst_capture::GstFileSource;
