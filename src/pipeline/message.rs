//! Control-channel records. These carry slot references, never pixels.

use serde::{Deserialize, Serialize};

use crate::capture::frame::FrameShape;

/// A frame record or the end-of-input sentinel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlMessage<T> {
    Frame(T),
    Stop,
}

impl<T> ControlMessage<T> {
    pub fn is_stop(&self) -> bool {
        matches!(self, ControlMessage::Stop)
    }
}

/// Where a payload lives: one shared memory segment of a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRef {
    /// Shared memory object name, e.g. `/motion-4242-capture-0-1`
    pub segment: String,
    pub index: usize,
    pub shape: FrameShape,
}

/// Capture -> Analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedFrame {
    pub frame_id: u64,
    pub timestamp: f64,
    pub slot: SlotRef,
}

/// Analysis -> Presentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedFrame {
    pub frame_id: u64,
    pub timestamp: f64,
    pub slot: SlotRef,
    pub detections: Vec<Detection>,
    pub motion_detected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// Axis-aligned box, inclusive of both edge pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// One region of frame-to-frame change, as its outer contour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub contour: Vec<Point>,
}

impl Detection {
    pub fn new(contour: Vec<Point>) -> Self {
        Self { contour }
    }

    /// Polygon area enclosed by the contour (shoelace formula)
    pub fn area(&self) -> f64 {
        polygon_area(&self.contour)
    }

    pub fn bounding_rect(&self) -> Option<BoundingRect> {
        let first = self.contour.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &self.contour[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(BoundingRect {
            x: min_x,
            y: min_y,
            width: (max_x - min_x + 1) as u32,
            height: (max_y - min_y + 1) as u32,
        })
    }
}

pub(crate) fn polygon_area(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum();
    (twice as f64 / 2.0).abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: i32, y: i32, side: i32) -> Detection {
        Detection::new(vec![
            Point { x, y },
            Point { x: x + side, y },
            Point {
                x: x + side,
                y: y + side,
            },
            Point { x, y: y + side },
        ])
    }

    #[test]
    fn area_is_orientation_independent() {
        let mut det = square(2, 3, 10);
        assert_eq!(det.area(), 100.0);
        det.contour.reverse();
        assert_eq!(det.area(), 100.0);
    }

    #[test]
    fn degenerate_contours_have_no_area() {
        let det = Detection::new(vec![Point { x: 1, y: 1 }, Point { x: 5, y: 1 }]);
        assert_eq!(det.area(), 0.0);
    }

    #[test]
    fn bounding_rect_is_inclusive() {
        let rect = square(2, 3, 10).bounding_rect().unwrap();
        assert_eq!(
            rect,
            BoundingRect {
                x: 2,
                y: 3,
                width: 11,
                height: 11
            }
        );
        assert!(Detection::new(Vec::new()).bounding_rect().is_none());
    }

    #[test]
    fn sentinel_is_distinguishable() {
        assert!(ControlMessage::<u8>::Stop.is_stop());
        assert!(!ControlMessage::Frame(1u8).is_stop());
    }
}
