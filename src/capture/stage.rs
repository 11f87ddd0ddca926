//! Capture stage: source -> buffer pool -> channel A

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::frame::SourceFrame;
use super::source::{SourceOpener, VideoSource};
use crate::pipeline::{
    CapturedFrame, ControlSender, ExitReason, FramePool, ShutdownSignal, Stage, StageError,
    StageKind, StageReport,
};
use crate::utils::FpsMeter;
use crate::CaptureConfig;

/// Capture settings resolved by the orchestrator
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub slot_count: usize,
    pub drain_timeout: Duration,
    pub fps_debug: bool,
    pub fallback_fps: f64,
    pub fps_log_interval: Duration,
}

impl CaptureSettings {
    pub fn new(config: &CaptureConfig, slot_count: usize, drain_timeout: Duration) -> Self {
        Self {
            slot_count,
            drain_timeout,
            fps_debug: config.fps_debug,
            fallback_fps: config.fallback_fps,
            fps_log_interval: Duration::from_millis(config.fps_log_interval_ms),
        }
    }
}

pub struct CaptureStage {
    opener: SourceOpener,
    output: ControlSender<CapturedFrame>,
    settings: CaptureSettings,
}

impl CaptureStage {
    pub fn new(
        opener: SourceOpener,
        output: ControlSender<CapturedFrame>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            opener,
            output,
            settings,
        }
    }
}

impl Stage for CaptureStage {
    fn kind(&self) -> StageKind {
        StageKind::Capture
    }

    fn run(self: Box<Self>, shutdown: ShutdownSignal) -> Result<StageReport, StageError> {
        let CaptureStage {
            opener,
            output,
            settings,
        } = *self;
        info!("Capture: started");

        let mut source = match opener() {
            Ok(source) => source,
            Err(e) => return Err(abort(&output, &shutdown, StageError::SourceOpen(e))),
        };

        let first = match source.read_next_frame() {
            Ok(Some(frame)) if frame.is_well_formed() => frame,
            Ok(Some(_)) => {
                warn!("Capture: first frame does not match its declared geometry");
                source.close();
                return Err(abort(&output, &shutdown, StageError::NoFrames));
            }
            Ok(None) => {
                source.close();
                return Err(abort(&output, &shutdown, StageError::NoFrames));
            }
            Err(e) => {
                warn!("Capture: could not read first frame: {}", e);
                source.close();
                return Err(abort(&output, &shutdown, StageError::NoFrames));
            }
        };

        let mut pool = match FramePool::create("capture", settings.slot_count, first.shape) {
            Ok(pool) => pool,
            Err(e) => {
                source.close();
                return Err(abort(&output, &shutdown, StageError::Pool(e)));
            }
        };

        let (frames, exit) = stream(
            &output,
            &settings,
            source.as_mut(),
            &mut pool,
            first,
            &shutdown,
        );

        if output.send_stop().is_err() {
            debug!("Capture: downstream already gone");
        }
        // Queued messages still point into the pool; keep it until the reader lets go.
        if !output.wait_closed(settings.drain_timeout) {
            warn!(
                "Capture: downstream still attached after {:?}, releasing pool anyway",
                settings.drain_timeout
            );
        }
        pool.destroy();
        source.close();

        info!("Capture: finished streaming {} frames", frames);
        Ok(StageReport {
            kind: StageKind::Capture,
            frames,
            exit,
        })
    }
}

/// Startup failure: tell downstream and every other stage, then give up.
fn abort(
    output: &ControlSender<CapturedFrame>,
    shutdown: &ShutdownSignal,
    err: StageError,
) -> StageError {
    error!("Capture: {}", err);
    if output.send_stop().is_err() {
        debug!("Capture: downstream already gone");
    }
    shutdown.set();
    err
}

fn stream(
    output: &ControlSender<CapturedFrame>,
    settings: &CaptureSettings,
    source: &mut dyn VideoSource,
    pool: &mut FramePool,
    first: SourceFrame,
    shutdown: &ShutdownSignal,
) -> (u64, ExitReason) {
    let interval = pacing_interval(source.frame_rate(), settings.fallback_fps);
    let target_fps = 1.0 / interval.as_secs_f64();
    info!(
        "Capture: streaming {}x{} at {:.2} FPS",
        first.shape.width, first.shape.height, target_fps
    );

    let mut meter = settings
        .fps_debug
        .then(|| FpsMeter::new(fps_window(target_fps), settings.fps_log_interval));

    let mut pending = Some(first);
    let mut frame_id: u64 = 0;
    let start = Instant::now();

    let exit = loop {
        if shutdown.is_set() {
            info!("Capture: shutdown signal detected");
            break ExitReason::Cancelled;
        }

        let frame = match pending.take() {
            Some(frame) => frame,
            None => match source.read_next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!("Capture: reached end of stream");
                    break ExitReason::EndOfStream;
                }
                Err(e) => {
                    warn!("Capture: read failed, treating as end of stream: {}", e);
                    break ExitReason::EndOfStream;
                }
            },
        };

        let slot = match pool.write_current(&frame.data) {
            Ok(slot) => slot,
            Err(e) => {
                warn!("Capture: dropping frame: {}", e);
                continue;
            }
        };

        let msg = CapturedFrame {
            frame_id,
            timestamp: frame.timestamp,
            slot,
        };
        if output.send_frame(msg).is_err() {
            warn!("Capture: downstream released the channel");
            break ExitReason::DownstreamClosed;
        }
        metrics::counter!("frames_captured").increment(1);

        pool.advance();
        frame_id += 1;

        // Deadlines hang off a fixed start so sleep overshoot does not accumulate.
        let deadline = start + interval.mul_f64(frame_id as f64);
        if let Some(wait) = deadline.checked_duration_since(Instant::now()) {
            shutdown.wait_timeout(wait);
        }

        if let Some(fps) = meter.as_mut().and_then(FpsMeter::tick) {
            info!("Capture: current FPS: {:.1} (target: {:.1})", fps, target_fps);
        }
    };

    if let Some(meter) = meter.as_ref().filter(|m| m.frames() > 0) {
        info!(
            "Capture: average FPS: {:.2} (target: {:.2})",
            meter.average_fps(),
            target_fps
        );
    }

    (frame_id, exit)
}

/// Time between frames for a reported rate, falling back when it is unusable.
pub fn pacing_interval(fps: f64, fallback_fps: f64) -> Duration {
    let usable = |rate: f64| rate.is_finite() && rate > 0.0;
    let rate = if usable(fps) {
        fps
    } else {
        let fallback = if usable(fallback_fps) { fallback_fps } else { 30.0 };
        warn!("Capture: source reports no usable frame rate, pacing at {}", fallback);
        fallback
    };
    Duration::from_secs_f64(1.0 / rate)
}

/// One second worth of frame intervals
fn fps_window(target_fps: f64) -> usize {
    target_fps.round().max(1.0) as usize
}
