//! Presentation stage: channel B -> annotate -> sink

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::annotate::{clock_label, to_rgb_image, Annotator};
use super::{FrameSink, SinkFactory, UserInput};
use crate::pipeline::{
    AnalyzedFrame, ControlMessage, ControlReceiver, ExitReason, FramePool, Received,
    ShutdownSignal, Stage, StageError, StageKind, StageReport,
};
use crate::DisplayConfig;

#[derive(Debug, Clone)]
pub struct PresentationSettings {
    pub receive_timeout: Duration,
    pub poll_timeout: Duration,
    pub quit_key: char,
}

impl PresentationSettings {
    pub fn new(config: &DisplayConfig, receive_timeout: Duration) -> Self {
        Self {
            receive_timeout,
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
            quit_key: config.quit_key.to_ascii_lowercase(),
        }
    }
}

pub struct PresentationStage {
    input: ControlReceiver<AnalyzedFrame>,
    annotator: Annotator,
    sink_factory: SinkFactory,
    settings: PresentationSettings,
}

impl PresentationStage {
    pub fn new(
        input: ControlReceiver<AnalyzedFrame>,
        annotator: Annotator,
        sink_factory: SinkFactory,
        settings: PresentationSettings,
    ) -> Self {
        Self {
            input,
            annotator,
            sink_factory,
            settings,
        }
    }
}

impl Stage for PresentationStage {
    fn kind(&self) -> StageKind {
        StageKind::Presentation
    }

    fn run(self: Box<Self>, shutdown: ShutdownSignal) -> Result<StageReport, StageError> {
        let PresentationStage {
            input,
            annotator,
            sink_factory,
            settings,
        } = *self;
        info!("Presentation: started");

        let mut sink = match sink_factory() {
            Ok(sink) => sink,
            Err(e) => {
                error!("Presentation: could not open display: {:#}", e);
                shutdown.set();
                return Err(StageError::Display(format!("{:#}", e)));
            }
        };

        let mut frames: u64 = 0;
        let exit = loop {
            if shutdown.is_set() {
                info!("Presentation: shutdown signal detected");
                break ExitReason::Cancelled;
            }

            match input.recv_timeout(settings.receive_timeout) {
                Received::Message(ControlMessage::Frame(frame)) => {
                    if present(&annotator, sink.as_mut(), &frame) {
                        frames += 1;
                    }
                }
                Received::Message(ControlMessage::Stop) => {
                    info!("Presentation: received stop signal");
                    shutdown.set();
                    break ExitReason::StopReceived;
                }
                Received::TimedOut => {}
                Received::Closed => {
                    warn!("Presentation: upstream closed without a stop signal");
                    shutdown.set();
                    break ExitReason::UpstreamClosed;
                }
            }

            match sink.poll_input(settings.poll_timeout) {
                Ok(Some(UserInput::Key(key))) if key == settings.quit_key => {
                    info!("Presentation: quit key pressed");
                    shutdown.set();
                    break ExitReason::UserQuit;
                }
                Ok(Some(UserInput::Close)) => {
                    info!("Presentation: window closed");
                    shutdown.set();
                    break ExitReason::UserQuit;
                }
                Ok(_) => {}
                Err(e) => warn!("Presentation: input polling failed: {:#}", e),
            }
        };

        drop(input);
        sink.teardown();

        info!("Presentation: displayed {} frames", frames);
        Ok(StageReport {
            kind: StageKind::Presentation,
            frames,
            exit,
        })
    }
}

/// Returns whether the frame reached the sink.
fn present(annotator: &Annotator, sink: &mut dyn FrameSink, frame: &AnalyzedFrame) -> bool {
    let started = Instant::now();

    let image = match FramePool::attach(&frame.slot) {
        Ok(view) => to_rgb_image(&view, frame.slot.shape),
        Err(e) => {
            warn!("Presentation: skipping frame {}: {}", frame.frame_id, e);
            return false;
        }
    };
    let Some(mut image) = image else {
        warn!(
            "Presentation: skipping frame {}: payload does not match {}x{}",
            frame.frame_id, frame.slot.shape.width, frame.slot.shape.height
        );
        return false;
    };

    let label = clock_label();
    annotator.annotate(&mut image, &frame.detections, &label);

    if let Err(e) = sink.show(&image, &label) {
        warn!("Presentation: failed to show frame {}: {:#}", frame.frame_id, e);
        return false;
    }

    debug!(
        "Presentation: frame {} shown with {} detections",
        frame.frame_id,
        frame.detections.len()
    );
    metrics::counter!("frames_presented").increment(1);
    metrics::histogram!("render_time_us").record(started.elapsed().as_micros() as f64);
    true
}
