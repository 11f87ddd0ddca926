//! SDL2 window sink
//! Opens a window sized to the first frame and streams RGB frames into it.

use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use image::RgbImage;
use sdl2::event::Event;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use sdl2::{EventPump, Sdl, VideoSubsystem};
use tracing::{info, instrument};

use super::{FrameSink, UserInput};

struct Surface {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    width: u32,
    height: u32,
}

pub struct Sdl2Display {
    _sdl: Sdl,
    video: VideoSubsystem,
    event_pump: EventPump,
    title: String,
    surface: Option<Surface>,
}

impl Sdl2Display {
    #[instrument(skip(title))]
    pub fn new(title: impl Into<String>) -> Result<Self> {
        let sdl = sdl2::init().map_err(|e| eyre!(e))?;
        let video = sdl.video().map_err(|e| eyre!(e))?;
        let event_pump = sdl.event_pump().map_err(|e| eyre!(e))?;

        Ok(Self {
            _sdl: sdl,
            video,
            event_pump,
            title: title.into(),
            surface: None,
        })
    }

    fn surface(&mut self, width: u32, height: u32) -> Result<&mut Surface> {
        let stale = self
            .surface
            .as_ref()
            .is_some_and(|s| s.width != width || s.height != height);
        if stale {
            self.surface = None;
        }

        if self.surface.is_none() {
            let window = self
                .video
                .window(&self.title, width, height)
                .position_centered()
                .build()?;
            let canvas = window.into_canvas().present_vsync().build()?;
            let texture_creator = canvas.texture_creator();
            info!("Display: opened {}x{} window", width, height);

            self.surface = Some(Surface {
                canvas,
                texture_creator,
                width,
                height,
            });
        }

        self.surface
            .as_mut()
            .ok_or_else(|| eyre!("display surface unavailable"))
    }
}

impl FrameSink for Sdl2Display {
    fn show(&mut self, frame: &RgbImage, label: &str) -> Result<()> {
        let (width, height) = frame.dimensions();
        let title = format!("{} - {}", self.title, label);
        let surface = self.surface(width, height)?;

        let mut texture = surface
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGB24, width, height)
            .map_err(|e| eyre!(e))?;
        texture
            .update(None, frame.as_raw(), (width * 3) as usize)
            .map_err(|e| eyre!(e))?;

        surface.canvas.window_mut().set_title(&title)?;
        surface.canvas.clear();
        surface
            .canvas
            .copy(&texture, None, None)
            .map_err(|e| eyre!(e))?;
        surface.canvas.present();
        Ok(())
    }

    fn poll_input(&mut self, timeout: Duration) -> Result<Option<UserInput>> {
        let first = self
            .event_pump
            .wait_event_timeout(timeout.as_millis().max(1) as u32);

        let pending: Vec<Event> = first
            .into_iter()
            .chain(self.event_pump.poll_iter())
            .collect();

        for event in pending {
            match event {
                Event::Quit { .. } => {
                    info!("Display: quit event received");
                    return Ok(Some(UserInput::Close));
                }
                Event::KeyDown {
                    keycode: Some(key), ..
                } => {
                    let name = key.name().to_lowercase();
                    let mut chars = name.chars();
                    if let (Some(c), None) = (chars.next(), chars.next()) {
                        return Ok(Some(UserInput::Key(c)));
                    }
                }
                _ => {}
            }
        }
        Ok(None)
    }

    fn teardown(&mut self) {
        self.surface = None;
    }
}
