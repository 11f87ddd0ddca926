pub mod annotate;
pub mod headless;
pub mod stage;

#[cfg(feature = "sdl-display")]
pub mod display;

use std::time::Duration;

use color_eyre::Result;
use image::RgbImage;

pub use annotate::{Annotator, OverlayMode};
pub use headless::HeadlessDisplay;
pub use stage::{PresentationSettings, PresentationStage};

#[cfg(feature = "sdl-display")]
pub use display::Sdl2Display;

/// User input observed by a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserInput {
    Key(char),
    /// Window closed by the window manager
    Close,
}

/// Where annotated frames end up
pub trait FrameSink {
    /// Present one frame; `label` is the clock text for sinks that show it themselves.
    fn show(&mut self, frame: &RgbImage, label: &str) -> Result<()>;

    /// Wait up to `timeout` for user input.
    fn poll_input(&mut self, timeout: Duration) -> Result<Option<UserInput>>;

    fn teardown(&mut self) {}
}

/// Builds the sink on the presentation thread; window systems are thread-bound.
pub type SinkFactory = Box<dyn FnOnce() -> Result<Box<dyn FrameSink>> + Send>;
