use std::time::Duration;

use color_eyre::Result;
use image::RgbImage;
use tracing::{debug, info};

use super::{FrameSink, UserInput};

/// Sink without a window; frames are counted and dropped
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
    shown: u64,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameSink for HeadlessDisplay {
    fn show(&mut self, frame: &RgbImage, label: &str) -> Result<()> {
        self.shown += 1;
        debug!(
            "Headless: frame {} ({}x{}) at {}",
            self.shown,
            frame.width(),
            frame.height(),
            label
        );
        Ok(())
    }

    fn poll_input(&mut self, _timeout: Duration) -> Result<Option<UserInput>> {
        Ok(None)
    }

    fn teardown(&mut self) {
        info!("Headless: {} frames shown", self.shown);
    }
}
