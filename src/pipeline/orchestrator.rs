//! Starts the stages, waits for them and enforces the shutdown grace period.

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

use color_eyre::Result;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use super::channel::control_channel;
use super::shutdown::ShutdownSignal;
use super::stage::{Stage, StageError, StageKind, StageReport};
use crate::analysis::{AnalysisSettings, AnalysisStage, MotionDetector};
use crate::capture::{CaptureSettings, CaptureStage, SourceOpener};
use crate::display::{Annotator, PresentationSettings, PresentationStage, SinkFactory};
use crate::Config;

/// How a stage ended, as seen by the orchestrator
#[derive(Debug)]
pub enum StageStatus {
    Finished(StageReport),
    Failed(StageError),
    /// Still running when the grace period ran out
    Abandoned,
}

impl StageStatus {
    pub fn report(&self) -> Option<&StageReport> {
        match self {
            StageStatus::Finished(report) => Some(report),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct PipelineReport {
    /// In start order
    pub stages: Vec<(StageKind, StageStatus)>,
    /// An external interrupt arrived before every stage finished
    pub interrupted: bool,
}

impl PipelineReport {
    pub fn status(&self, kind: StageKind) -> Option<&StageStatus> {
        self.stages
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, status)| status)
    }

    /// Frames a stage handled, if it finished normally
    pub fn frames(&self, kind: StageKind) -> Option<u64> {
        self.status(kind).and_then(StageStatus::report).map(|r| r.frames)
    }

    pub fn failures(&self) -> impl Iterator<Item = (StageKind, &StageError)> + '_ {
        self.stages.iter().filter_map(|(kind, status)| match status {
            StageStatus::Failed(e) => Some((*kind, e)),
            _ => None,
        })
    }

    pub fn abandoned(&self) -> impl Iterator<Item = StageKind> + '_ {
        self.stages
            .iter()
            .filter(|(_, status)| matches!(status, StageStatus::Abandoned))
            .map(|(kind, _)| *kind)
    }

    pub fn capture_failed(&self) -> bool {
        matches!(self.status(StageKind::Capture), Some(StageStatus::Failed(_)))
    }
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    shutdown: ShutdownSignal,
    grace_period: Duration,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>, grace_period: Duration) -> Self {
        Self {
            stages,
            shutdown: ShutdownSignal::new(),
            grace_period,
        }
    }

    /// Capture -> analysis -> presentation, joined by two control channels.
    #[instrument(skip_all)]
    pub fn standard(config: &Config, opener: SourceOpener, sink_factory: SinkFactory) -> Result<Self> {
        let pipeline = &config.pipeline;
        pipeline.validate()?;

        let slot_count = pipeline.effective_slot_count();
        if slot_count > pipeline.slot_count {
            warn!(
                "Pipeline: raising slot count from {} to {} to cover channel capacity {}",
                pipeline.slot_count, slot_count, pipeline.channel_capacity
            );
        }

        let annotator = Annotator::from_config(&config.display)?;
        let (capture_tx, capture_rx) = control_channel(pipeline.channel_capacity);
        let (analysis_tx, analysis_rx) = control_channel(pipeline.channel_capacity);

        let capture = CaptureStage::new(
            opener,
            capture_tx,
            CaptureSettings::new(&config.capture, slot_count, pipeline.drain_timeout()),
        );
        let analysis = AnalysisStage::new(
            capture_rx,
            analysis_tx,
            MotionDetector::new(config.analysis.clone()),
            AnalysisSettings {
                slot_count,
                receive_timeout: pipeline.receive_timeout(),
                drain_timeout: pipeline.drain_timeout(),
            },
        );
        let presentation = PresentationStage::new(
            analysis_rx,
            annotator,
            sink_factory,
            PresentationSettings::new(&config.display, pipeline.receive_timeout()),
        );

        Ok(Self::new(
            vec![Box::new(capture), Box::new(analysis), Box::new(presentation)],
            pipeline.grace_period(),
        ))
    }

    /// Handle for requesting shutdown from outside.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Run every stage to completion.
    ///
    /// When `interrupt` resolves first the shutdown signal is set and stages
    /// get one grace period to exit; any still running are abandoned.
    pub async fn run(self, interrupt: impl Future<Output = ()>) -> PipelineReport {
        let Pipeline {
            stages,
            shutdown,
            grace_period,
        } = self;

        let (done_tx, done_rx) = flume::unbounded::<(StageKind, StageStatus)>();
        let mut statuses: Vec<(StageKind, Option<StageStatus>)> = Vec::with_capacity(stages.len());

        for stage in stages {
            let kind = stage.kind();
            let done = done_tx.clone();
            let signal = shutdown.clone();

            let spawned = thread::Builder::new()
                .name(format!("stage-{}", kind))
                .spawn(move || {
                    let status = supervise(stage, signal);
                    // Orchestrator may have stopped listening
                    let _ = done.send((kind, status));
                });

            match spawned {
                Ok(_) => {
                    info!("Pipeline: started {} stage", kind);
                    statuses.push((kind, None));
                }
                Err(e) => {
                    error!("Pipeline: could not start {} stage: {}", kind, e);
                    shutdown.set();
                    statuses.push((kind, Some(StageStatus::Failed(StageError::Spawn(e)))));
                }
            }
        }
        drop(done_tx);

        let mut interrupt = std::pin::pin!(interrupt);
        let mut deadline: Option<Instant> = None;
        let mut remaining = statuses.iter().filter(|(_, s)| s.is_none()).count();

        while remaining > 0 {
            let at = deadline;
            let grace = async move {
                match at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                done = done_rx.recv_async() => {
                    let Ok((kind, status)) = done else { break };
                    log_status(kind, &status);
                    if let Some(slot) = statuses.iter_mut().find(|(k, s)| *k == kind && s.is_none()) {
                        slot.1 = Some(status);
                        remaining -= 1;
                    }
                }
                _ = &mut interrupt, if deadline.is_none() => {
                    warn!("Pipeline: interrupted, stopping stages");
                    shutdown.set();
                    deadline = Some(Instant::now() + grace_period);
                }
                _ = grace => {
                    warn!(
                        "Pipeline: {} stage(s) still running after {:?}, abandoning",
                        remaining, grace_period
                    );
                    break;
                }
            }
        }

        let stages = statuses
            .into_iter()
            .map(|(kind, status)| (kind, status.unwrap_or(StageStatus::Abandoned)))
            .collect();
        info!("Pipeline: all stages accounted for");

        PipelineReport {
            stages,
            interrupted: deadline.is_some(),
        }
    }
}

fn supervise(stage: Box<dyn Stage>, shutdown: ShutdownSignal) -> StageStatus {
    let signal = shutdown.clone();
    match panic::catch_unwind(AssertUnwindSafe(move || stage.run(signal))) {
        Ok(Ok(report)) => StageStatus::Finished(report),
        Ok(Err(e)) => StageStatus::Failed(e),
        Err(payload) => {
            // Endpoints dropped during unwinding already tell the neighbours.
            shutdown.set();
            StageStatus::Failed(StageError::Panicked(panic_message(payload.as_ref())))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn log_status(kind: StageKind, status: &StageStatus) {
    match status {
        StageStatus::Finished(report) => info!(
            "Pipeline: {} stage exited ({:?}) after {} frames",
            kind, report.exit, report.frames
        ),
        StageStatus::Failed(e) => error!("Pipeline: {} stage failed: {}", kind, e),
        StageStatus::Abandoned => {}
    }
}
