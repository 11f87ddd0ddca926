use std::thread;
use std::time::{Duration, Instant};

use motion_pipeline::analysis::{AnalysisSettings, AnalysisStage, MotionDetector};
use motion_pipeline::capture::{
    CaptureSettings, CaptureStage, FrameShape, MemorySource, PixelFormat, SourceFrame,
    VideoSource,
};
use motion_pipeline::display::{
    Annotator, FrameSink, HeadlessDisplay, OverlayMode, PresentationSettings, PresentationStage,
};
use motion_pipeline::pipeline::{
    control_channel, AnalyzedFrame, CapturedFrame, ControlMessage, ExitReason, FramePool,
    ShutdownSignal, Stage,
};
use motion_pipeline::{AnalysisConfig, CaptureConfig, DisplayConfig};

const TIMEOUT: Duration = Duration::from_millis(50);

fn capture_settings(slot_count: usize) -> CaptureSettings {
    CaptureSettings::new(&CaptureConfig::default(), slot_count, Duration::from_secs(2))
}

fn analysis_settings() -> AnalysisSettings {
    AnalysisSettings {
        slot_count: 6,
        receive_timeout: TIMEOUT,
        drain_timeout: Duration::from_secs(2),
    }
}

fn headless_presentation(
    input: motion_pipeline::pipeline::ControlReceiver<AnalyzedFrame>,
) -> PresentationStage {
    PresentationStage::new(
        input,
        Annotator::new(OverlayMode::Contours, false, 21),
        Box::new(|| Ok(Box::new(HeadlessDisplay::new()) as Box<dyn FrameSink>)),
        PresentationSettings::new(&DisplayConfig::default(), TIMEOUT),
    )
}

#[test]
fn capture_ids_are_gap_free_and_payloads_readable() {
    let shape = FrameShape::new(4, 4, PixelFormat::Gray8);
    let frames = (0..20u8).map(move |i| SourceFrame::new(vec![i; 16], shape, i as f64 / 500.0));
    let source = MemorySource::new(frames, 500.0);

    let (tx, rx) = control_channel::<CapturedFrame>(4);
    let stage = CaptureStage::new(
        Box::new(move || Ok(Box::new(source) as Box<dyn VideoSource>)),
        tx,
        capture_settings(6),
    );
    let shutdown = ShutdownSignal::new();
    let handle = thread::spawn(move || Box::new(stage).run(shutdown));

    let mut ids = Vec::new();
    while let Some(msg) = rx.recv() {
        match msg {
            ControlMessage::Frame(frame) => {
                let payload = FramePool::attach(&frame.slot).expect("slot readable");
                assert_eq!(payload[0] as u64, frame.frame_id);
                ids.push(frame.frame_id);
            }
            ControlMessage::Stop => break,
        }
    }
    drop(rx);

    let report = handle.join().unwrap().expect("capture succeeds");
    assert_eq!(ids, (0..20).collect::<Vec<u64>>());
    assert_eq!(report.frames, 20);
    assert_eq!(report.exit, ExitReason::EndOfStream);
}

#[test]
fn capture_paces_to_source_rate() {
    let shape = FrameShape::new(2, 2, PixelFormat::Gray8);
    let frames = (0..10).map(move |i| SourceFrame::new(vec![0; 4], shape, i as f64 / 50.0));
    let source = MemorySource::new(frames, 50.0);

    let (tx, rx) = control_channel::<CapturedFrame>(16);
    let stage = CaptureStage::new(
        Box::new(move || Ok(Box::new(source) as Box<dyn VideoSource>)),
        tx,
        capture_settings(18),
    );
    let started = Instant::now();
    let handle = thread::spawn(move || Box::new(stage).run(ShutdownSignal::new()));

    while let Some(msg) = rx.recv() {
        if msg.is_stop() {
            break;
        }
    }
    let elapsed = started.elapsed();
    drop(rx);
    handle.join().unwrap().expect("capture succeeds");

    // Ten frames at 50 FPS: the last one is sent after nine intervals.
    assert!(elapsed >= Duration::from_millis(170), "{:?}", elapsed);
}

#[test]
fn empty_source_sends_only_stop() {
    let (tx, rx) = control_channel::<CapturedFrame>(4);
    let stage = CaptureStage::new(
        Box::new(|| Ok(Box::new(MemorySource::new(Vec::new(), 30.0)) as Box<dyn VideoSource>)),
        tx,
        capture_settings(6),
    );
    let shutdown = ShutdownSignal::new();

    let result = Box::new(stage).run(shutdown.clone());

    assert!(result.is_err());
    assert!(shutdown.is_set());
    assert!(matches!(rx.recv(), Some(ControlMessage::Stop)));
    assert!(rx.recv().is_none());
}

#[test]
fn analysis_forwards_stop_without_frames() {
    let (in_tx, in_rx) = control_channel::<CapturedFrame>(4);
    let (out_tx, out_rx) = control_channel::<AnalyzedFrame>(4);
    let stage = AnalysisStage::new(
        in_rx,
        out_tx,
        MotionDetector::new(AnalysisConfig::default()),
        analysis_settings(),
    );

    in_tx.send_stop().unwrap();
    let report = Box::new(stage).run(ShutdownSignal::new()).unwrap();

    assert_eq!(report.frames, 0);
    assert_eq!(report.exit, ExitReason::StopReceived);
    assert!(matches!(out_rx.recv(), Some(ControlMessage::Stop)));
}

#[test]
fn analysis_notices_shutdown_within_one_timeout() {
    let (_in_tx, in_rx) = control_channel::<CapturedFrame>(4);
    let (out_tx, out_rx) = control_channel::<AnalyzedFrame>(4);
    let stage = AnalysisStage::new(
        in_rx,
        out_tx,
        MotionDetector::new(AnalysisConfig::default()),
        analysis_settings(),
    );
    let shutdown = ShutdownSignal::new();
    let signal = shutdown.clone();
    let handle = thread::spawn(move || Box::new(stage).run(shutdown));

    thread::sleep(Duration::from_millis(30));
    let set_at = Instant::now();
    signal.set();
    let report = handle.join().unwrap().unwrap();

    assert!(set_at.elapsed() < TIMEOUT * 4, "{:?}", set_at.elapsed());
    assert_eq!(report.exit, ExitReason::Cancelled);
    assert!(matches!(out_rx.recv(), Some(ControlMessage::Stop)));
}

#[test]
fn ids_stay_gap_free_through_analysis() {
    let shape = FrameShape::new(4, 4, PixelFormat::Gray8);
    let frames = (0..30u8).map(move |i| SourceFrame::new(vec![i; 16], shape, i as f64 / 500.0));
    let source = MemorySource::new(frames, 500.0);

    let (capture_tx, capture_rx) = control_channel::<CapturedFrame>(4);
    let (analysis_tx, analysis_rx) = control_channel::<AnalyzedFrame>(4);
    let capture = CaptureStage::new(
        Box::new(move || Ok(Box::new(source) as Box<dyn VideoSource>)),
        capture_tx,
        capture_settings(6),
    );
    let analysis = AnalysisStage::new(
        capture_rx,
        analysis_tx,
        MotionDetector::new(AnalysisConfig::default()),
        analysis_settings(),
    );
    let shutdown = ShutdownSignal::new();
    let capture_signal = shutdown.clone();
    let capture = thread::spawn(move || Box::new(capture).run(capture_signal));
    let analysis = thread::spawn(move || Box::new(analysis).run(shutdown));

    let mut ids = Vec::new();
    while let Some(msg) = analysis_rx.recv() {
        match msg {
            ControlMessage::Frame(frame) => {
                let payload = FramePool::attach(&frame.slot).expect("slot readable");
                assert_eq!(payload[0] as u64, frame.frame_id);
                ids.push(frame.frame_id);
            }
            ControlMessage::Stop => break,
        }
    }
    drop(analysis_rx);

    let analysis = analysis.join().unwrap().expect("analysis succeeds");
    let capture = capture.join().unwrap().expect("capture succeeds");
    assert_eq!(ids, (0..30).collect::<Vec<u64>>());
    assert_eq!(capture.frames, 30);
    assert_eq!(analysis.frames, 30);
    assert_eq!(analysis.exit, ExitReason::StopReceived);
}

#[test]
fn analysis_releases_its_pool_when_downstream_lingers() {
    let shape = FrameShape::new(4, 4, PixelFormat::Gray8);
    let mut upstream = FramePool::create("upstream", 1, shape).unwrap();
    let slot = upstream.write_current(&[9; 16]).unwrap();

    let (in_tx, in_rx) = control_channel::<CapturedFrame>(4);
    let (out_tx, out_rx) = control_channel::<AnalyzedFrame>(4);
    in_tx
        .send_frame(CapturedFrame {
            frame_id: 0,
            timestamp: 0.0,
            slot,
        })
        .unwrap();
    in_tx.send_stop().unwrap();

    let stage = AnalysisStage::new(
        in_rx,
        out_tx,
        MotionDetector::new(AnalysisConfig::default()),
        AnalysisSettings {
            drain_timeout: Duration::from_millis(100),
            ..analysis_settings()
        },
    );
    let started = Instant::now();
    // out_rx stays alive and unread for the whole run
    let report = Box::new(stage).run(ShutdownSignal::new()).unwrap();

    assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());
    assert_eq!(report.frames, 1);
    let Some(ControlMessage::Frame(analyzed)) = out_rx.recv() else {
        panic!("expected the analyzed frame first");
    };
    assert!(FramePool::attach(&analyzed.slot).is_err(), "pool was not unlinked");
    assert!(matches!(out_rx.recv(), Some(ControlMessage::Stop)));
    upstream.destroy();
}

#[test]
fn presentation_notices_shutdown_within_one_timeout() {
    let (_tx, rx) = control_channel::<AnalyzedFrame>(4);
    let shutdown = ShutdownSignal::new();
    let signal = shutdown.clone();
    let handle = thread::spawn(move || Box::new(headless_presentation(rx)).run(shutdown));

    thread::sleep(Duration::from_millis(30));
    let set_at = Instant::now();
    signal.set();
    let report = handle.join().unwrap().unwrap();

    assert!(set_at.elapsed() < TIMEOUT * 4, "{:?}", set_at.elapsed());
    assert_eq!(report.frames, 0);
    assert_eq!(report.exit, ExitReason::Cancelled);
}

#[test]
fn presentation_stop_sets_shutdown() {
    let (tx, rx) = control_channel::<AnalyzedFrame>(4);
    tx.send_stop().unwrap();
    let shutdown = ShutdownSignal::new();

    let report = Box::new(headless_presentation(rx))
        .run(shutdown.clone())
        .unwrap();

    assert_eq!(report.frames, 0);
    assert_eq!(report.exit, ExitReason::StopReceived);
    assert!(shutdown.is_set());
}

#[test]
fn presentation_skips_unreadable_slots() {
    let (tx, rx) = control_channel::<AnalyzedFrame>(4);
    let shape = FrameShape::new(2, 2, PixelFormat::Rgb24);
    let mut pool = FramePool::create("stale", 1, shape).unwrap();
    let slot = pool.write_current(&[0; 12]).unwrap();
    pool.destroy();

    tx.send_frame(AnalyzedFrame {
        frame_id: 0,
        timestamp: 0.0,
        slot,
        detections: Vec::new(),
        motion_detected: false,
    })
    .unwrap();
    tx.send_stop().unwrap();

    let report = Box::new(headless_presentation(rx))
        .run(ShutdownSignal::new())
        .unwrap();
    assert_eq!(report.frames, 0);
    assert_eq!(report.exit, ExitReason::StopReceived);
}
