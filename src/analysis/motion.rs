//! Frame-differencing motion detector
//!
//! Each frame is reduced to grayscale and compared with the frame before
//! it: absolute difference, binary threshold, square dilation to merge
//! nearby changes, then outer contour tracing. Regions smaller than
//! `min_area` are discarded.

use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;
use thiserror::Error;

use crate::capture::frame::{FrameShape, PixelFormat};
use crate::pipeline::message::{Detection, Point};
use crate::AnalysisConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("payload of {actual} bytes does not match {expected} expected for the frame shape")]
    PayloadSize { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MotionResult {
    pub detections: Vec<Detection>,
    pub motion_detected: bool,
}

pub struct MotionDetector {
    config: AnalysisConfig,
    /// Grayscale of the previous frame
    baseline: Option<GrayImage>,
}

impl MotionDetector {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            baseline: None,
        }
    }

    /// Compare `payload` with the previous frame and make it the new baseline.
    pub fn process(
        &mut self,
        payload: &[u8],
        shape: FrameShape,
    ) -> Result<MotionResult, AnalysisError> {
        let gray = to_grayscale(payload, shape)?;

        let result = match self.baseline.as_ref() {
            Some(baseline) if baseline.dimensions() == gray.dimensions() => {
                let mask = change_mask(&gray, baseline, self.config.diff_threshold);
                let merged = dilate(&mask, Norm::LInf, self.config.dilate_iterations);
                let detections: Vec<Detection> = find_regions(&merged)
                    .into_iter()
                    .filter(|d| d.area() >= self.config.min_area)
                    .collect();
                MotionResult {
                    motion_detected: !detections.is_empty(),
                    detections,
                }
            }
            _ => MotionResult::default(),
        };

        self.baseline = Some(gray);
        Ok(result)
    }
}

/// Luma plane of a packed payload
pub fn to_grayscale(payload: &[u8], shape: FrameShape) -> Result<GrayImage, AnalysisError> {
    let expected = shape.byte_len();
    let size_err = || AnalysisError::PayloadSize {
        expected,
        actual: payload.len(),
    };
    if payload.len() != expected {
        return Err(size_err());
    }

    let (width, height) = (shape.width, shape.height);
    let gray = match shape.format {
        PixelFormat::Rgb24 => GrayImage::from_raw(width, height, luma(payload, [0, 1, 2])),
        PixelFormat::Bgr24 => GrayImage::from_raw(width, height, luma(payload, [2, 1, 0])),
        PixelFormat::Gray8 => GrayImage::from_raw(width, height, payload.to_vec()),
    }
    .ok_or_else(size_err)?;
    Ok(gray)
}

/// BT.601 integer luma of packed 3-byte pixels, given the byte offsets of R, G and B
fn luma(payload: &[u8], [ri, gi, bi]: [usize; 3]) -> Vec<u8> {
    payload
        .chunks_exact(3)
        .map(|px| {
            let (r, g, b) = (px[ri] as u32, px[gi] as u32, px[bi] as u32);
            ((r * 77 + g * 150 + b * 29 + 128) >> 8) as u8
        })
        .collect()
}

/// 255 where the frames differ by more than `threshold`, else 0
pub fn change_mask(current: &GrayImage, baseline: &GrayImage, threshold: u8) -> GrayImage {
    let mask = current
        .as_raw()
        .iter()
        .zip(baseline.as_raw())
        .map(|(&a, &b)| if a.abs_diff(b) > threshold { 255 } else { 0 })
        .collect();
    GrayImage::from_raw(current.width(), current.height(), mask)
        .unwrap_or_else(|| GrayImage::new(current.width(), current.height()))
}

/// Outermost contours of the foreground regions of a binary mask
pub fn find_regions(mask: &GrayImage) -> Vec<Detection> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer) && c.parent.is_none())
        .map(|c| {
            Detection::new(
                c.points
                    .into_iter()
                    .map(|p| Point { x: p.x, y: p.y })
                    .collect(),
            )
        })
        .collect()
}
