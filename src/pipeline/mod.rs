pub mod channel;
pub mod message;
pub mod orchestrator;
pub mod pool;
pub mod shutdown;
pub mod stage;

pub use channel::{control_channel, ChannelError, ControlReceiver, ControlSender, Received};
pub use message::{AnalyzedFrame, CapturedFrame, ControlMessage, Detection, SlotRef};
pub use orchestrator::{Pipeline, PipelineReport, StageStatus};
pub use pool::{FramePool, PayloadView, PoolError};
pub use shutdown::ShutdownSignal;
pub use stage::{ExitReason, Stage, StageError, StageKind, StageReport};
