//! Analysis stage: channel A -> motion detector -> buffer pool -> channel B

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::motion::MotionDetector;
use crate::pipeline::{
    AnalyzedFrame, CapturedFrame, ControlMessage, ControlReceiver, ControlSender, ExitReason,
    FramePool, Received, ShutdownSignal, Stage, StageError, StageKind, StageReport,
};

#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub slot_count: usize,
    pub receive_timeout: Duration,
    pub drain_timeout: Duration,
}

pub struct AnalysisStage {
    input: ControlReceiver<CapturedFrame>,
    output: ControlSender<AnalyzedFrame>,
    detector: MotionDetector,
    settings: AnalysisSettings,
}

impl AnalysisStage {
    pub fn new(
        input: ControlReceiver<CapturedFrame>,
        output: ControlSender<AnalyzedFrame>,
        detector: MotionDetector,
        settings: AnalysisSettings,
    ) -> Self {
        Self {
            input,
            output,
            detector,
            settings,
        }
    }
}

impl Stage for AnalysisStage {
    fn kind(&self) -> StageKind {
        StageKind::Analysis
    }

    fn run(self: Box<Self>, shutdown: ShutdownSignal) -> Result<StageReport, StageError> {
        let AnalysisStage {
            input,
            output,
            mut detector,
            settings,
        } = *self;
        info!("Analysis: started");

        // Created once the payload size is known
        let mut pool: Option<FramePool> = None;
        let mut frames: u64 = 0;

        let result = loop {
            if shutdown.is_set() {
                info!("Analysis: shutdown signal detected");
                break Ok(ExitReason::Cancelled);
            }

            let frame = match input.recv_timeout(settings.receive_timeout) {
                Received::Message(ControlMessage::Frame(frame)) => frame,
                Received::Message(ControlMessage::Stop) => {
                    info!("Analysis: received stop signal");
                    break Ok(ExitReason::StopReceived);
                }
                Received::TimedOut => continue,
                Received::Closed => {
                    warn!("Analysis: upstream closed without a stop signal");
                    break Ok(ExitReason::UpstreamClosed);
                }
            };
            let started = Instant::now();

            let view = match FramePool::attach(&frame.slot) {
                Ok(view) => view,
                Err(e) => {
                    warn!("Analysis: skipping frame {}: {}", frame.frame_id, e);
                    continue;
                }
            };

            let motion = match detector.process(&view, frame.slot.shape) {
                Ok(motion) => motion,
                Err(e) => {
                    warn!("Analysis: skipping frame {}: {}", frame.frame_id, e);
                    continue;
                }
            };

            if pool.is_none() {
                match FramePool::create("analysis", settings.slot_count, frame.slot.shape) {
                    Ok(created) => pool = Some(created),
                    Err(e) => break Err(StageError::Pool(e)),
                }
            }
            let Some(out_pool) = pool.as_mut() else {
                continue;
            };

            let slot = match out_pool.write_current(&view) {
                Ok(slot) => slot,
                Err(e) => {
                    warn!("Analysis: skipping frame {}: {}", frame.frame_id, e);
                    continue;
                }
            };
            drop(view);

            let motion_detected = motion.motion_detected;
            if motion_detected {
                debug!(
                    "Analysis: frame {} has {} detections",
                    frame.frame_id,
                    motion.detections.len()
                );
                metrics::counter!("motion_frames").increment(1);
            }

            let enriched = AnalyzedFrame {
                frame_id: frame.frame_id,
                timestamp: frame.timestamp,
                slot,
                detections: motion.detections,
                motion_detected,
            };
            if output.send_frame(enriched).is_err() {
                warn!("Analysis: downstream released the channel");
                break Ok(ExitReason::DownstreamClosed);
            }

            out_pool.advance();
            frames += 1;
            metrics::counter!("frames_analyzed").increment(1);
            metrics::histogram!("analysis_time_us").record(started.elapsed().as_micros() as f64);
        };

        if let Err(e) = &result {
            error!("Analysis: {}", e);
            shutdown.set();
        }

        // No more reads from the capture pool past this point.
        drop(input);

        if output.send_stop().is_err() {
            debug!("Analysis: downstream already gone");
        }
        if let Some(pool) = pool {
            if !output.wait_closed(settings.drain_timeout) {
                warn!(
                    "Analysis: downstream still attached after {:?}, releasing pool anyway",
                    settings.drain_timeout
                );
            }
            pool.destroy();
        }

        info!("Analysis: finished processing {} frames", frames);
        result.map(|exit| StageReport {
            kind: StageKind::Analysis,
            frames,
            exit,
        })
    }
}
