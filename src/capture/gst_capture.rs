//! GStreamer-based video file decoding

use std::path::{Path, PathBuf};

use bytes::{BufMut, BytesMut};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, instrument, warn};

use super::frame::{FrameShape, PixelFormat, SourceFrame};
use super::source::{SourceError, VideoSource};

/// Decodes a local video file to packed RGB frames
pub struct GstFileSource {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    path: PathBuf,
    fps: f64,
}

impl GstFileSource {
    #[instrument]
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let open_err = |reason: String| SourceError::Open {
            path: path.to_path_buf(),
            reason,
        };

        gst::init().map_err(|e| open_err(format!("failed to initialize GStreamer: {}", e)))?;

        let pipeline_str = Self::build_pipeline_string(path);
        info!("Pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| open_err(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| open_err("failed to create pipeline".into()))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| open_err("failed to find appsink element".into()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| open_err("failed to cast to AppSink".into()))?;

        // Pacing is done by the capture stage, never drop decoded frames.
        appsink.set_property("emit-signals", false);
        appsink.set_property("max-buffers", 2u32);
        appsink.set_property("drop", false);
        appsink.set_property("sync", false);

        pipeline
            .set_state(gst::State::Paused)
            .map_err(|e| open_err(format!("failed to start pipeline: {:?}", e)))?;

        // Wait for preroll so missing files and undecodable streams fail here.
        let (state_change, _, _) = pipeline.state(Some(gst::ClockTime::from_seconds(5)));
        if state_change.is_err() {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(open_err(Self::bus_error(&pipeline)));
        }

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| open_err(format!("failed to start pipeline: {:?}", e)))?;

        Ok(Self {
            pipeline,
            appsink,
            path: path.to_path_buf(),
            fps: 0.0,
        })
    }

    fn build_pipeline_string(path: &Path) -> String {
        format!(
            "filesrc location=\"{}\" ! \
             decodebin ! \
             videoconvert ! \
             video/x-raw,format=RGB ! \
             appsink name=appsink",
            path.display()
        )
    }

    fn bus_error(pipeline: &gst::Pipeline) -> String {
        pipeline
            .bus()
            .and_then(|bus| bus.timed_pop_filtered(gst::ClockTime::ZERO, &[gst::MessageType::Error]))
            .and_then(|msg| match msg.view() {
                gst::MessageView::Error(err) => Some(format!(
                    "{} ({})",
                    err.error(),
                    err.debug().map(|d| d.to_string()).unwrap_or_default()
                )),
                _ => None,
            })
            .unwrap_or_else(|| "pipeline failed to preroll".into())
    }
}

impl VideoSource for GstFileSource {
    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn read_next_frame(&mut self) -> Result<Option<SourceFrame>, SourceError> {
        let sample = match self.appsink.pull_sample() {
            Ok(sample) => sample,
            Err(_) if self.appsink.is_eos() => {
                debug!("{}: end of stream", self.path.display());
                return Ok(None);
            }
            Err(_) => return Err(SourceError::Decode(Self::bus_error(&self.pipeline))),
        };

        let buffer = sample
            .buffer()
            .ok_or_else(|| SourceError::Decode("sample contains no buffer".into()))?;
        let caps = sample
            .caps()
            .ok_or_else(|| SourceError::Decode("sample has no caps".into()))?;
        let info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|_| SourceError::Decode("failed to parse video info from caps".into()))?;

        let fps = info.fps();
        if fps.denom() != 0 {
            self.fps = fps.numer() as f64 / fps.denom() as f64;
        }

        let map = buffer
            .map_readable()
            .map_err(|_| SourceError::Decode("failed to map buffer".into()))?;

        // RGB rows are padded to 4-byte strides; repack them tightly.
        let shape = FrameShape::new(info.width(), info.height(), PixelFormat::Rgb24);
        let row_len = shape.width as usize * 3;
        let stride = info.stride()[0] as usize;
        let offset = info.offset()[0];
        let data = map.as_slice();

        let mut packed = BytesMut::with_capacity(shape.byte_len());
        for row in 0..shape.height as usize {
            let start = offset + row * stride;
            let Some(line) = data.get(start..start + row_len) else {
                warn!("{}: short buffer at row {}", self.path.display(), row);
                return Err(SourceError::Decode("buffer shorter than caps".into()));
            };
            packed.put_slice(line);
        }

        let timestamp = buffer
            .pts()
            .map(|pts| pts.nseconds() as f64 / 1e9)
            .unwrap_or(0.0);

        Ok(Some(SourceFrame::new(packed.freeze(), shape, timestamp)))
    }

    fn close(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("Failed to stop pipeline: {:?}", e);
        }
    }
}

impl Drop for GstFileSource {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
