use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{Rgb, RgbImage};
use motion_pipeline::capture::{
    FrameShape, MemorySource, PixelFormat, SourceError, SourceFrame, SourceOpener, VideoSource,
};
use motion_pipeline::display::{FrameSink, SinkFactory, UserInput};
use motion_pipeline::pipeline::{ExitReason, StageKind, StageStatus};
use motion_pipeline::{Config, Pipeline, PipelineReport};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 64;
const GREEN: Rgb<u8> = Rgb([0, 255, 0]);

#[derive(Clone, Default)]
struct Recorded {
    frames: Arc<Mutex<Vec<RgbImage>>>,
}

impl Recorded {
    fn count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    fn get(&self, index: usize) -> RgbImage {
        self.frames.lock().unwrap()[index].clone()
    }
}

/// Keeps every frame; presses `quit_after.1` once `quit_after.0` frames were shown
struct RecordingSink {
    recorded: Recorded,
    quit_after: Option<(usize, char)>,
}

impl FrameSink for RecordingSink {
    fn show(&mut self, frame: &RgbImage, _label: &str) -> color_eyre::Result<()> {
        self.recorded.frames.lock().unwrap().push(frame.clone());
        Ok(())
    }

    fn poll_input(&mut self, _timeout: Duration) -> color_eyre::Result<Option<UserInput>> {
        Ok(match self.quit_after {
            Some((after, key)) if self.recorded.count() >= after => Some(UserInput::Key(key)),
            _ => None,
        })
    }
}

fn recording_sink(quit_after: Option<(usize, char)>) -> (SinkFactory, Recorded) {
    let recorded = Recorded::default();
    let sink = RecordingSink {
        recorded: recorded.clone(),
        quit_after,
    };
    (Box::new(move || Ok(Box::new(sink) as Box<dyn FrameSink>)), recorded)
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.pipeline.receive_timeout_ms = 20;
    config.pipeline.drain_timeout_ms = 1000;
    config.pipeline.grace_period_ms = 2000;
    config.display.blur_detections = false;
    config
}

/// Black frame, optionally with a white square at (10, 10)
fn frame(index: u64, with_square: bool) -> SourceFrame {
    let image = RgbImage::from_fn(WIDTH, HEIGHT, |x, y| {
        if with_square && (10..40).contains(&x) && (10..40).contains(&y) {
            Rgb([255, 255, 255])
        } else {
            Rgb([0, 0, 0])
        }
    });
    SourceFrame::new(
        image.into_raw(),
        FrameShape::new(WIDTH, HEIGHT, PixelFormat::Rgb24),
        index as f64 / 200.0,
    )
}

fn memory_opener(frames: Vec<SourceFrame>, fps: f64) -> SourceOpener {
    Box::new(move || Ok(Box::new(MemorySource::new(frames, fps)) as Box<dyn VideoSource>))
}

async fn run(pipeline: Pipeline) -> PipelineReport {
    tokio::time::timeout(Duration::from_secs(20), pipeline.run(std::future::pending()))
        .await
        .expect("pipeline should finish on its own")
}

fn exit(report: &PipelineReport, kind: StageKind) -> Option<ExitReason> {
    report
        .status(kind)
        .and_then(StageStatus::report)
        .map(|r| r.exit)
}

#[tokio::test]
async fn single_frame_flows_through_every_stage() {
    let (sink, recorded) = recording_sink(None);
    let pipeline = Pipeline::standard(
        &test_config(),
        memory_opener(vec![frame(0, false)], 200.0),
        sink,
    )
    .unwrap();

    let report = run(pipeline).await;

    assert!(!report.interrupted);
    assert_eq!(report.failures().count(), 0);
    assert_eq!(report.frames(StageKind::Capture), Some(1));
    assert_eq!(report.frames(StageKind::Analysis), Some(1));
    assert_eq!(report.frames(StageKind::Presentation), Some(1));
    assert_eq!(exit(&report, StageKind::Capture), Some(ExitReason::EndOfStream));
    assert_eq!(exit(&report, StageKind::Analysis), Some(ExitReason::StopReceived));
    assert_eq!(exit(&report, StageKind::Presentation), Some(ExitReason::StopReceived));

    assert_eq!(recorded.count(), 1);
    assert!(recorded.get(0).pixels().all(|p| *p == Rgb([0, 0, 0])));
}

#[tokio::test]
async fn failed_open_stops_everyone_without_frames() {
    let (sink, recorded) = recording_sink(None);
    let opener: SourceOpener = Box::new(|| {
        Err(SourceError::NotFound {
            path: "/missing.mp4".into(),
        })
    });
    let pipeline = Pipeline::standard(&test_config(), opener, sink).unwrap();

    let report = run(pipeline).await;

    assert!(report.capture_failed());
    assert_eq!(report.frames(StageKind::Analysis), Some(0));
    assert_eq!(report.frames(StageKind::Presentation), Some(0));
    assert_eq!(report.abandoned().count(), 0);
    assert_eq!(recorded.count(), 0);
}

#[tokio::test]
async fn motion_is_outlined_in_presented_frames() {
    let (sink, recorded) = recording_sink(None);
    let frames = vec![frame(0, false), frame(1, true), frame(2, true)];
    let pipeline =
        Pipeline::standard(&test_config(), memory_opener(frames, 200.0), sink).unwrap();

    let report = run(pipeline).await;

    assert_eq!(report.frames(StageKind::Presentation), Some(3));
    assert_eq!(recorded.count(), 3);
    let has_outline = |image: &RgbImage| image.pixels().any(|p| *p == GREEN);
    assert!(!has_outline(&recorded.get(0)), "no baseline yet");
    assert!(has_outline(&recorded.get(1)), "square appeared");
    assert!(!has_outline(&recorded.get(2)), "nothing moved");
}

#[tokio::test]
async fn quit_key_ends_a_long_stream() {
    let (sink, recorded) = recording_sink(Some((3, 'z')));
    let frames = (0..500).map(|i| frame(i, i % 2 == 1)).collect();
    let pipeline =
        Pipeline::standard(&test_config(), memory_opener(frames, 100.0), sink).unwrap();

    let report = run(pipeline).await;

    assert_eq!(exit(&report, StageKind::Presentation), Some(ExitReason::UserQuit));
    assert_eq!(report.failures().count(), 0);
    let captured = report.frames(StageKind::Capture).unwrap();
    assert!(captured < 500, "capture kept going: {}", captured);
    assert!(recorded.count() >= 3);
}

#[tokio::test]
async fn other_keys_are_ignored() {
    let (sink, recorded) = recording_sink(Some((1, 'q')));
    let frames = (0..5).map(|i| frame(i, false)).collect();
    let pipeline =
        Pipeline::standard(&test_config(), memory_opener(frames, 200.0), sink).unwrap();

    let report = run(pipeline).await;

    assert_eq!(exit(&report, StageKind::Presentation), Some(ExitReason::StopReceived));
    assert_eq!(recorded.count(), 5);
}

#[tokio::test]
async fn interrupt_stops_the_pipeline_within_grace() {
    let (sink, _recorded) = recording_sink(None);
    let frames = (0..1_000).map(|i| frame(i, false)).collect();
    let pipeline =
        Pipeline::standard(&test_config(), memory_opener(frames, 50.0), sink).unwrap();
    let signal = pipeline.shutdown_signal();

    let report = tokio::time::timeout(
        Duration::from_secs(20),
        pipeline.run(tokio::time::sleep(Duration::from_millis(200))),
    )
    .await
    .expect("pipeline should stop after the interrupt");

    assert!(report.interrupted);
    assert!(signal.is_set());
    assert_eq!(report.abandoned().count(), 0);
    assert!(matches!(
        exit(&report, StageKind::Capture),
        Some(ExitReason::Cancelled | ExitReason::DownstreamClosed)
    ));
}
