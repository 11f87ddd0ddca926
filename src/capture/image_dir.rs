//! Directory of still images played back as a video

use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use super::frame::{FrameShape, PixelFormat, SourceFrame};
use super::source::{SourceError, VideoSource};

const EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Plays `*.png|jpg|jpeg|bmp` files in lexicographic order at a fixed rate
pub struct ImageSequenceSource {
    files: Vec<PathBuf>,
    next: usize,
    fps: f64,
}

impl ImageSequenceSource {
    #[instrument(skip(fps))]
    pub fn open(dir: &Path, fps: f64) -> Result<Self, SourceError> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_image && path.is_file() {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(SourceError::Open {
                path: dir.to_path_buf(),
                reason: "directory contains no images".into(),
            });
        }
        debug!("Found {} images", files.len());

        Ok(Self {
            files,
            next: 0,
            fps,
        })
    }
}

impl VideoSource for ImageSequenceSource {
    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn read_next_frame(&mut self) -> Result<Option<SourceFrame>, SourceError> {
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };

        let image = image::open(path)
            .map_err(|e| SourceError::Decode(format!("{}: {}", path.display(), e)))?
            .to_rgb8();
        let shape = FrameShape::new(image.width(), image.height(), PixelFormat::Rgb24);
        let timestamp = if self.fps > 0.0 {
            self.next as f64 / self.fps
        } else {
            0.0
        };
        self.next += 1;

        Ok(Some(SourceFrame::new(image.into_raw(), shape, timestamp)))
    }

    fn close(&mut self) {
        self.next = self.files.len();
    }
}
