use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One decoded frame as handed over by a video source
#[derive(Clone, Debug)]
pub struct SourceFrame {
    /// Tightly packed pixel rows, `shape.byte_len()` bytes
    pub data: Bytes,
    pub shape: FrameShape,
    /// Presentation time reported by the source, in seconds
    pub timestamp: f64,
}

/// Frame geometry; fixes the payload size of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameShape {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

impl FrameShape {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

impl SourceFrame {
    pub fn new(data: impl Into<Bytes>, shape: FrameShape, timestamp: f64) -> Self {
        Self {
            data: data.into(),
            shape,
            timestamp,
        }
    }

    /// True when the payload length agrees with the declared geometry
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.shape.byte_len()
    }
}
