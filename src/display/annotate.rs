//! Detection overlay: blur, outline, clock

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use color_eyre::{eyre::eyre, Result};
use image::{imageops, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut};
use imageproc::filter::gaussian_blur_f32;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

use crate::capture::frame::{FrameShape, PixelFormat};
use crate::pipeline::message::{BoundingRect, Detection};
use crate::DisplayConfig;

const OUTLINE: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL: Rgb<u8> = Rgb([255, 255, 255]);

/// How each detection is outlined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayMode {
    #[default]
    Contours,
    BoundingBoxes,
}

pub struct Annotator {
    mode: OverlayMode,
    /// Gaussian sigma for detection blur, if enabled
    blur_sigma: Option<f32>,
    font: Option<FontArc>,
}

impl Annotator {
    pub fn new(mode: OverlayMode, blur: bool, blur_kernel: u32) -> Self {
        Self {
            mode,
            blur_sigma: blur.then(|| kernel_sigma(blur_kernel)),
            font: None,
        }
    }

    pub fn from_config(config: &DisplayConfig) -> Result<Self> {
        let annotator = Self::new(config.overlay, config.blur_detections, config.blur_kernel);
        match config.font_path.as_deref() {
            Some(path) => Ok(annotator.with_font(load_font(path)?)),
            None => Ok(annotator),
        }
    }

    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    pub fn annotate(&self, frame: &mut RgbImage, detections: &[Detection], label: &str) {
        for detection in detections {
            let Some(rect) = detection
                .bounding_rect()
                .and_then(|r| clip_rect(r, frame.width(), frame.height()))
            else {
                continue;
            };

            if let Some(sigma) = self.blur_sigma {
                blur_region(frame, rect, sigma);
            }

            match self.mode {
                OverlayMode::Contours => draw_contour(frame, detection),
                OverlayMode::BoundingBoxes => draw_box(frame, rect),
            }
        }

        if let Some(font) = self.font.as_ref() {
            draw_text_mut(frame, LABEL, 10, 10, PxScale::from(22.0), font, label);
        }
    }
}

/// Current local time as shown on screen
pub fn clock_label() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Owned RGB copy of a payload, for drawing on
pub fn to_rgb_image(payload: &[u8], shape: FrameShape) -> Option<RgbImage> {
    if payload.len() != shape.byte_len() {
        return None;
    }
    let rgb = match shape.format {
        PixelFormat::Rgb24 => payload.to_vec(),
        PixelFormat::Bgr24 => payload
            .chunks_exact(3)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect(),
        PixelFormat::Gray8 => payload.iter().flat_map(|&v| [v, v, v]).collect(),
    };
    RgbImage::from_raw(shape.width, shape.height, rgb)
}

fn load_font(path: &Path) -> Result<FontArc> {
    let bytes = std::fs::read(path)?;
    FontArc::try_from_vec(bytes).map_err(|e| eyre!("{}: {}", path.display(), e))
}

/// Sigma OpenCV derives for a kernel of width `ksize` when none is given
fn kernel_sigma(ksize: u32) -> f32 {
    let ksize = ksize.max(3) as f32;
    0.3 * ((ksize - 1.0) * 0.5 - 1.0) + 0.8
}

/// Intersect with the frame; `None` if nothing is left
fn clip_rect(rect: BoundingRect, width: u32, height: u32) -> Option<BoundingRect> {
    let x0 = rect.x.max(0) as i64;
    let y0 = rect.y.max(0) as i64;
    let x1 = (rect.x as i64 + rect.width as i64).min(width as i64);
    let y1 = (rect.y as i64 + rect.height as i64).min(height as i64);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(BoundingRect {
        x: x0 as i32,
        y: y0 as i32,
        width: (x1 - x0) as u32,
        height: (y1 - y0) as u32,
    })
}

fn blur_region(frame: &mut RgbImage, rect: BoundingRect, sigma: f32) {
    let roi = imageops::crop_imm(&*frame, rect.x as u32, rect.y as u32, rect.width, rect.height)
        .to_image();
    let blurred = gaussian_blur_f32(&roi, sigma);
    imageops::replace(frame, &blurred, rect.x as i64, rect.y as i64);
}

/// Offsets of the passes that make up a 2px line
const THICK_PASSES: [(i32, i32); 3] = [(0, 0), (1, 0), (0, 1)];

fn draw_contour(frame: &mut RgbImage, detection: &Detection) {
    let points = &detection.contour;
    if points.len() == 1 {
        let p = points[0];
        for (dx, dy) in THICK_PASSES {
            if let (Ok(x), Ok(y)) = (u32::try_from(p.x + dx), u32::try_from(p.y + dy)) {
                if let Some(px) = frame.get_pixel_mut_checked(x, y) {
                    *px = OUTLINE;
                }
            }
        }
        return;
    }
    for (dx, dy) in THICK_PASSES {
        for (a, b) in points.iter().zip(points.iter().cycle().skip(1)) {
            draw_line_segment_mut(
                frame,
                ((a.x + dx) as f32, (a.y + dy) as f32),
                ((b.x + dx) as f32, (b.y + dy) as f32),
                OUTLINE,
            );
        }
    }
}

fn draw_box(frame: &mut RgbImage, rect: BoundingRect) {
    draw_hollow_rect_mut(
        frame,
        Rect::at(rect.x, rect.y).of_size(rect.width, rect.height),
        OUTLINE,
    );
    // Second, inset pass for a 2px outline
    if rect.width > 2 && rect.height > 2 {
        draw_hollow_rect_mut(
            frame,
            Rect::at(rect.x + 1, rect.y + 1).of_size(rect.width - 2, rect.height - 2),
            OUTLINE,
        );
    }
}
