//! Video source abstraction and dispatch by path

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use super::frame::SourceFrame;
use super::image_dir::ImageSequenceSource;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{}: no such file or directory", path.display())]
    NotFound { path: PathBuf },

    #[error("{}: {}", path.display(), reason)]
    Open { path: PathBuf, reason: String },

    #[error("{}: video files need the gstreamer-pipeline feature", path.display())]
    Unsupported { path: PathBuf },

    #[error("frame decode failed: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A decoder that yields frames in presentation order.
pub trait VideoSource: Send {
    /// Nominal frames per second. Only meaningful once a frame has been read;
    /// values that are not finite and positive mean "unknown".
    fn frame_rate(&self) -> f64;

    /// Next frame, or `None` at end of stream.
    fn read_next_frame(&mut self) -> Result<Option<SourceFrame>, SourceError>;

    fn close(&mut self) {}
}

/// Deferred open, run on the capture thread so open failures belong to that stage
pub type SourceOpener = Box<dyn FnOnce() -> Result<Box<dyn VideoSource>, SourceError> + Send>;

/// Open whatever lives at `path`: a directory of images, or (with GStreamer)
/// any decodable video file.
pub fn open_source(path: &Path, image_sequence_fps: f64) -> Result<Box<dyn VideoSource>, SourceError> {
    if !path.exists() {
        return Err(SourceError::NotFound {
            path: path.to_path_buf(),
        });
    }

    if path.is_dir() {
        info!("Opening image sequence: {}", path.display());
        return Ok(Box::new(ImageSequenceSource::open(path, image_sequence_fps)?));
    }

    #[cfg(feature = "gstreamer-pipeline")]
    {
        info!("Opening video file: {}", path.display());
        Ok(Box::new(super::gst_capture::GstFileSource::open(path)?))
    }
    #[cfg(not(feature = "gstreamer-pipeline"))]
    {
        Err(SourceError::Unsupported {
            path: path.to_path_buf(),
        })
    }
}

/// Frames held in memory; used for embedding and tests
pub struct MemorySource {
    frames: VecDeque<SourceFrame>,
    fps: f64,
}

impl MemorySource {
    pub fn new(frames: impl IntoIterator<Item = SourceFrame>, fps: f64) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            fps,
        }
    }
}

impl VideoSource for MemorySource {
    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn read_next_frame(&mut self) -> Result<Option<SourceFrame>, SourceError> {
        Ok(self.frames.pop_front())
    }

    fn close(&mut self) {
        self.frames.clear();
    }
}
