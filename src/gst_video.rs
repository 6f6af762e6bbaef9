//! GStreamer video backend.
//!
//! Each player owns a `uridecodebin ! videoconvert ! videoscale ! appsink`
//! pipeline. Preparation is the pipeline prerolling into PAUSED; the bus is
//! polled on the frame tick for end-of-stream and errors.

use crate::video::{PlayerState, VideoBackend, VideoPlayer};
use anyhow::{anyhow, Context, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Video frame extracted from the pipeline.
#[derive(Clone)]
pub struct VideoFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Creates GStreamer players resolving clips against a media directory.
pub struct GstBackend {
    media_dir: PathBuf,
}

impl GstBackend {
    /// Initialize GStreamer (once per process) and create the backend.
    pub fn init(media_dir: impl Into<PathBuf>) -> Result<Self> {
        gst::init().context("Failed to initialize GStreamer")?;
        tracing::info!("GStreamer initialized: {}", gst::version_string());
        Ok(Self {
            media_dir: media_dir.into(),
        })
    }
}

impl VideoBackend for GstBackend {
    type Player = GstPlayer;

    fn create_player(&mut self, label: &str) -> Result<GstPlayer> {
        Ok(GstPlayer::new(label, self.media_dir.clone()))
    }
}

pub struct GstPlayer {
    label: String,
    media_dir: PathBuf,
    clip: Option<String>,
    pipeline: Option<gst::Pipeline>,
    current_frame: Arc<Mutex<Option<VideoFrame>>>,
    state: PlayerState,
    looping: bool,
    finished: bool,
    error: Option<anyhow::Error>,
}

impl GstPlayer {
    fn new(label: &str, media_dir: PathBuf) -> Self {
        Self {
            label: label.to_string(),
            media_dir,
            clip: None,
            pipeline: None,
            current_frame: Arc::new(Mutex::new(None)),
            state: PlayerState::Stopped,
            looping: false,
            finished: false,
            error: None,
        }
    }

    /// Latest decoded frame, if any.
    pub fn current_frame(&self) -> Option<VideoFrame> {
        self.current_frame.lock().ok()?.clone()
    }

    fn pipeline(&self) -> Result<&gst::Pipeline> {
        self.pipeline
            .as_ref()
            .with_context(|| format!("{}: no clip loaded", self.label))
    }

    fn set_pipeline_state(&self, state: gst::State) -> Result<()> {
        self.pipeline()?
            .set_state(state)
            .with_context(|| format!("{}: failed to set pipeline to {:?}", self.label, state))?;
        Ok(())
    }

    fn clear_frame(&self) {
        if let Ok(mut guard) = self.current_frame.lock() {
            *guard = None;
        }
    }
}

fn clip_uri(media_dir: &Path, clip: &str) -> Result<String> {
    let path = media_dir.join(clip);
    let path = std::fs::canonicalize(&path)
        .with_context(|| format!("Video file not found: {}", path.display()))?;
    Ok(format!("file://{}", path.display()))
}

fn build_pipeline(uri: &str, current_frame: Arc<Mutex<Option<VideoFrame>>>) -> Result<gst::Pipeline> {
    let pipeline = gst::Pipeline::new();

    let src = gst::ElementFactory::make("uridecodebin")
        .name("source")
        .property("uri", uri)
        .build()
        .context("Failed to create uridecodebin")?;

    let convert = gst::ElementFactory::make("videoconvert")
        .name("convert")
        .build()
        .context("Failed to create videoconvert")?;

    let scale = gst::ElementFactory::make("videoscale")
        .name("scale")
        .build()
        .context("Failed to create videoscale")?;

    let appsink = gst_app::AppSink::builder()
        .name("sink")
        .caps(
            &gst_video::VideoCapsBuilder::new()
                .format(gst_video::VideoFormat::Rgba)
                .build(),
        )
        .build();

    pipeline
        .add_many([&src, &convert, &scale, appsink.upcast_ref()])
        .context("Failed to add elements to pipeline")?;

    gst::Element::link_many([&convert, &scale, appsink.upcast_ref()])
        .context("Failed to link elements")?;

    // uridecodebin exposes its pads once the container is parsed.
    let convert_weak = convert.downgrade();
    src.connect_pad_added(move |_src, src_pad| {
        let Some(convert) = convert_weak.upgrade() else {
            return;
        };
        let Some(sink_pad) = convert.static_pad("sink") else {
            tracing::error!("videoconvert has no sink pad");
            return;
        };
        if sink_pad.is_linked() {
            return;
        }

        let caps = src_pad.current_caps().unwrap_or_else(|| src_pad.query_caps(None));
        let is_video = caps
            .structure(0)
            .is_some_and(|s| s.name().starts_with("video/"));
        if is_video {
            if let Err(e) = src_pad.link(&sink_pad) {
                tracing::error!("Failed to link pads: {:?}", e);
            }
        }
    });

    appsink.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .new_sample(move |appsink| {
                let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                let caps = sample.caps().ok_or(gst::FlowError::Error)?;

                let info = gst_video::VideoInfo::from_caps(caps).map_err(|_| gst::FlowError::Error)?;
                let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;

                let frame = VideoFrame {
                    pixels: map.as_slice().to_vec(),
                    width: info.width(),
                    height: info.height(),
                };
                if let Ok(mut guard) = current_frame.lock() {
                    *guard = Some(frame);
                }

                Ok(gst::FlowSuccess::Ok)
            })
            .build(),
    );

    Ok(pipeline)
}

impl VideoPlayer for GstPlayer {
    fn load(&mut self, clip: &str, looping: bool) -> Result<()> {
        if let Some(pipeline) = self.pipeline.take() {
            let _ = pipeline.set_state(gst::State::Null);
        }
        self.clear_frame();
        self.state = PlayerState::Stopped;
        self.finished = false;
        self.error = None;

        let uri = clip_uri(&self.media_dir, clip)?;
        tracing::debug!("{}: loading {}", self.label, uri);
        self.pipeline = Some(build_pipeline(&uri, Arc::clone(&self.current_frame))?);
        self.clip = Some(clip.to_string());
        self.looping = looping;
        Ok(())
    }

    fn clip(&self) -> Option<&str> {
        self.clip.as_deref()
    }

    fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    fn prepare(&mut self) -> Result<()> {
        if self.state == PlayerState::Stopped {
            self.set_pipeline_state(gst::State::Paused)?;
        }
        Ok(())
    }

    fn is_prepared(&self) -> bool {
        self.pipeline.as_ref().is_some_and(|p| {
            matches!(p.current_state(), gst::State::Paused | gst::State::Playing)
        })
    }

    fn play(&mut self) -> Result<()> {
        if self.state == PlayerState::EndOfStream {
            self.pipeline()?
                .seek_simple(gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT, gst::ClockTime::ZERO)
                .context("Failed to rewind")?;
        }
        self.set_pipeline_state(gst::State::Playing)?;
        self.state = PlayerState::Playing;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        if self.state != PlayerState::Playing {
            return Ok(());
        }
        self.set_pipeline_state(gst::State::Paused)?;
        self.state = PlayerState::Paused;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.pipeline.is_some() {
            self.set_pipeline_state(gst::State::Null)?;
        }
        self.clear_frame();
        self.state = PlayerState::Stopped;
        self.finished = false;
        self.error = None;
        Ok(())
    }

    fn state(&self) -> PlayerState {
        self.state
    }

    fn position(&self) -> Option<f32> {
        self.pipeline
            .as_ref()?
            .query_position::<gst::ClockTime>()
            .map(|p| p.mseconds() as f32 / 1000.0)
    }

    fn update(&mut self, _dt: Duration) {
        let Some(bus) = self.pipeline.as_ref().and_then(|p| p.bus()) else {
            return;
        };

        while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Eos, gst::MessageType::Error]) {
            match msg.view() {
                gst::MessageView::Eos(_) => {
                    self.finished = true;
                    if self.looping {
                        if let Some(pipeline) = &self.pipeline {
                            let _ = pipeline.seek_simple(
                                gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
                                gst::ClockTime::ZERO,
                            );
                        }
                    } else {
                        self.state = PlayerState::EndOfStream;
                    }
                }
                gst::MessageView::Error(err) => {
                    tracing::error!(
                        "{}: GStreamer error: {} ({:?})",
                        self.label,
                        err.error(),
                        err.debug()
                    );
                    if let Some(pipeline) = &self.pipeline {
                        let _ = pipeline.set_state(gst::State::Null);
                    }
                    self.state = PlayerState::Stopped;
                    self.error = Some(anyhow!("{}: {}", self.label, err.error()));
                }
                _ => {}
            }
        }
    }

    fn take_finished(&mut self) -> bool {
        std::mem::take(&mut self.finished)
    }

    fn take_error(&mut self) -> Option<anyhow::Error> {
        self.error.take()
    }
}

impl Drop for GstPlayer {
    fn drop(&mut self) {
        if let Some(pipeline) = &self.pipeline {
            let _ = pipeline.set_state(gst::State::Null);
        }
    }
}
