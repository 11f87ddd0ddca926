use std::fmt;

use thiserror::Error;

use super::pool::PoolError;
use super::shutdown::ShutdownSignal;
use crate::capture::source::SourceError;

/// The three positions in the fixed chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Capture,
    Analysis,
    Presentation,
}

impl StageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Capture => "capture",
            StageKind::Analysis => "analysis",
            StageKind::Presentation => "presentation",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a stage left its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Source ran out of frames
    EndOfStream,
    /// Upstream sentinel received
    StopReceived,
    /// Upstream went away without a sentinel
    UpstreamClosed,
    /// Downstream released its channel
    DownstreamClosed,
    /// Shutdown signal observed
    Cancelled,
    /// Quit key or window close
    UserQuit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub kind: StageKind,
    /// Real frames handled (sentinels excluded)
    pub frames: u64,
    pub exit: ExitReason,
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("could not open video source: {0}")]
    SourceOpen(#[source] SourceError),

    #[error("video source produced no frames")]
    NoFrames,

    #[error("buffer pool unavailable: {0}")]
    Pool(#[from] PoolError),

    #[error("display failed: {0}")]
    Display(String),

    #[error("stage panicked: {0}")]
    Panicked(String),

    #[error("could not start stage thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// One step of the pipeline, run to completion on its own thread.
///
/// Every implementation forwards a sentinel downstream (if it has a
/// downstream) and releases its own pool on every exit path, including
/// the error paths.
pub trait Stage: Send {
    fn kind(&self) -> StageKind;

    fn run(self: Box<Self>, shutdown: ShutdownSignal) -> Result<StageReport, StageError>;
}
